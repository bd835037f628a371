//! # Loopback Tests
//!
//! A real two-player session over UDP datagrams and a TCP control stream on
//! 127.0.0.1, plus configuration loaded from disk.
//!
//! Run with: cargo test --package lockstep_net --test loopback_test

use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::thread;
use std::time::Duration;

use lockstep_net::lockstep_shared::{ByteWriter, FrameNumber, MergedFrame};
use lockstep_net::{
    ConfigError, LockstepConfig, LockstepCoordinator, Mailboxes, NetworkPoller, SimulationHost,
    SyncState, TcpControlLink, UdpTransport,
};

#[derive(Default)]
struct Frames(Vec<(FrameNumber, MergedFrame)>);

impl SimulationHost for Frames {
    fn write_input(&mut self, frame: FrameNumber, writer: &mut ByteWriter) {
        writer.write_u32(frame);
    }

    fn tick(&mut self, frame: FrameNumber, inputs: &MergedFrame) {
        self.0.push((frame, inputs.clone()));
    }

    fn on_frames_applied(&mut self, _count: u32) {}
}

type LoopbackPoller = NetworkPoller<UdpTransport, TcpControlLink>;

fn loopback_links() -> (UdpTransport, TcpControlLink, UdpTransport, TcpControlLink) {
    let any: SocketAddr = ([127, 0, 0, 1], 0).into();
    let a = UdpSocket::bind(any).unwrap();
    let b = UdpSocket::bind(any).unwrap();
    let a_addr = a.local_addr().unwrap();
    let b_addr = b.local_addr().unwrap();

    let listener = TcpListener::bind(any).unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();

    (
        UdpTransport::from_socket(a, b_addr).unwrap(),
        TcpControlLink::new(server).unwrap(),
        UdpTransport::from_socket(b, a_addr).unwrap(),
        TcpControlLink::new(client).unwrap(),
    )
}

#[test]
fn udp_session_reaches_frame_limit() {
    let config = LockstepConfig {
        latency_samples: 2,
        ..LockstepConfig::default()
    };
    let tick = u64::from(config.tick_time_ms);
    let (authority_udp, authority_tcp, participant_udp, participant_tcp) = loopback_links();

    let authority_mail = Mailboxes::new();
    let mut authority_poller: LoopbackPoller =
        NetworkPoller::new(config.clone(), authority_mail.clone());
    let peer = authority_poller.add_peer(authority_udp, authority_tcp);
    let mut authority = LockstepCoordinator::authority(config.clone(), authority_mail);
    authority.add_participant(peer).unwrap();

    let participant_mail = Mailboxes::new();
    let mut participant_poller: LoopbackPoller =
        NetworkPoller::new(config.clone(), participant_mail.clone());
    let authority_peer = participant_poller.add_peer(participant_udp, participant_tcp);
    let mut participant =
        LockstepCoordinator::participant(config, participant_mail, authority_peer);

    let limit = 10;
    authority.set_frame_limit(Some(limit));
    participant.set_frame_limit(Some(limit));
    authority.start_sync(0);
    participant.start_sync(0);

    let mut authority_host = Frames::default();
    let mut participant_host = Frames::default();
    let mut now = 0;
    for _ in 0..2000 {
        if authority.current_frame() == limit && participant.current_frame() == limit {
            break;
        }
        now += tick;
        authority_poller.poll(now);
        participant_poller.poll(now);
        authority.eval_frame(now, tick, &mut authority_host);
        participant.eval_frame(now, tick, &mut participant_host);
        authority_poller.poll(now);
        participant_poller.poll(now);
        // Loopback delivery is asynchronous.
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(authority.state(), SyncState::Running);
    assert_eq!(authority.current_frame(), limit);
    assert_eq!(participant.current_frame(), limit);
    assert_eq!(authority_host.0, participant_host.0);
    assert_eq!(authority_host.0.len(), limit as usize);
}

#[test]
fn tcp_close_ends_participant() {
    let config = LockstepConfig::default();
    let (authority_udp, authority_tcp, participant_udp, participant_tcp) = loopback_links();

    let mut authority_poller: LoopbackPoller = NetworkPoller::new(config.clone(), Mailboxes::new());
    let peer = authority_poller.add_peer(authority_udp, authority_tcp);

    let mail = Mailboxes::new();
    let mut participant_poller: LoopbackPoller = NetworkPoller::new(config.clone(), mail.clone());
    let authority_peer = participant_poller.add_peer(participant_udp, participant_tcp);
    let mut participant = LockstepCoordinator::participant(config, mail, authority_peer);

    drop(authority_poller.remove_peer(peer));

    let mut host = Frames::default();
    for step in 0..500 {
        participant_poller.poll(step);
        participant.eval_frame(step, 0, &mut host);
        if participant.state() == SyncState::Ended {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(participant.state(), SyncState::Ended);
    assert!(participant_poller.peers().is_empty());
}

#[test]
fn config_loads_from_file() {
    let path = std::env::temp_dir().join(format!("lockstep_config_{}.toml", std::process::id()));
    std::fs::write(&path, "tick_time_ms = 33\nmax_delay_frames = 4\n").unwrap();
    let config = LockstepConfig::from_toml_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.tick_time_ms, 33);
    assert_eq!(config.max_delay_frames, 4);
    assert_eq!(config.max_wait_diff_frames, LockstepConfig::default().max_wait_diff_frames);
}

#[test]
fn missing_config_file_is_an_error() {
    let path = std::env::temp_dir().join("lockstep_config_does_not_exist.toml");
    assert!(matches!(LockstepConfig::from_toml_file(&path), Err(ConfigError::Io(_))));
}
