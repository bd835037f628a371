//! # Lockstep Session Tests
//!
//! Whole sessions: coordinators, pollers and lossy links stepped on a
//! simulated clock.
//!
//! Run with: cargo test --package lockstep_net --test lockstep_session_test -- --nocapture

use lockstep_net::lockstep_shared::{ByteWriter, EndReason, FrameNumber, MergedFrame, PlayerId};
use lockstep_net::{
    ControlLink, DatagramSocket, LinkSwitch, LockstepConfig, LockstepCoordinator, LossyLink,
    Mailboxes, MemoryControlLink, NetworkConditions, NetworkPoller, SimulationHost, SyncNotice,
    SyncState,
};

#[derive(Default)]
struct Recorder {
    ticks: Vec<(FrameNumber, MergedFrame)>,
    applied: Vec<u32>,
    notices: Vec<SyncNotice>,
    salt: u32,
    pad: usize,
}

impl SimulationHost for Recorder {
    fn write_input(&mut self, frame: FrameNumber, writer: &mut ByteWriter) {
        writer.write_u32(frame);
        writer.write_u32(self.salt);
        writer.write_bytes(&vec![0; self.pad]);
    }

    fn tick(&mut self, frame: FrameNumber, inputs: &MergedFrame) {
        self.ticks.push((frame, inputs.clone()));
    }

    fn on_frames_applied(&mut self, count: u32) {
        self.applied.push(count);
    }

    fn on_notice(&mut self, notice: SyncNotice) {
        self.notices.push(notice);
    }
}

struct Peer<S, C> {
    coordinator: LockstepCoordinator,
    poller: NetworkPoller<S, C>,
    host: Recorder,
}

impl<S: DatagramSocket, C: ControlLink> Peer<S, C> {
    fn step(&mut self, now_ms: u64, elapsed_ms: u64) {
        self.poller.poll(now_ms);
        self.coordinator.eval_frame(now_ms, elapsed_ms, &mut self.host);
        self.poller.poll(now_ms);
    }

    fn frames(&self) -> Vec<FrameNumber> {
        self.host.ticks.iter().map(|(frame, _)| *frame).collect()
    }
}

type MemoryPeer = Peer<LossyLink, MemoryControlLink>;

struct Session {
    authority: MemoryPeer,
    participants: Vec<MemoryPeer>,
    /// Silences what each participant sends.
    uplinks: Vec<LinkSwitch>,
    now_ms: u64,
    tick_ms: u64,
}

impl Session {
    fn new(
        config: &LockstepConfig,
        players: u32,
        conditions: NetworkConditions,
        seed: u64,
    ) -> Self {
        let mail = Mailboxes::new();
        let mut authority = Peer {
            coordinator: LockstepCoordinator::authority(config.clone(), mail.clone()),
            poller: NetworkPoller::new(config.clone(), mail),
            host: Recorder::default(),
        };

        let mut participants = Vec::new();
        let mut uplinks = Vec::new();
        for index in 1..=players {
            let (authority_end, participant_end) =
                LossyLink::pair(conditions, seed + u64::from(index));
            let (authority_control, participant_control) = MemoryControlLink::pair();
            uplinks.push(participant_end.switch());

            let peer = authority.poller.add_peer(authority_end, authority_control);
            authority.coordinator.add_participant(peer).unwrap();

            let mail = Mailboxes::new();
            let mut poller = NetworkPoller::new(config.clone(), mail.clone());
            let authority_peer = poller.add_peer(participant_end, participant_control);
            participants.push(Peer {
                coordinator: LockstepCoordinator::participant(config.clone(), mail, authority_peer),
                poller,
                host: Recorder {
                    salt: index * 1000,
                    ..Recorder::default()
                },
            });
        }

        authority.coordinator.start_sync(0);
        for participant in &mut participants {
            participant.coordinator.start_sync(0);
        }
        Self {
            authority,
            participants,
            uplinks,
            now_ms: 0,
            tick_ms: u64::from(config.tick_time_ms),
        }
    }

    fn step(&mut self) {
        self.now_ms += self.tick_ms;
        self.authority.step(self.now_ms, self.tick_ms);
        for participant in &mut self.participants {
            participant.step(self.now_ms, self.tick_ms);
        }
    }

    /// Steps until `done` holds, failing after `limit` steps.
    fn run_until(&mut self, limit: usize, mut done: impl FnMut(&Self) -> bool) {
        for _ in 0..limit {
            if done(self) {
                return;
            }
            self.step();
        }
        assert!(done(self), "condition not reached within {limit} steps");
    }

    fn all_at(&self, frame: FrameNumber) -> bool {
        self.authority.coordinator.current_frame() >= frame
            && self.participants.iter().all(|p| p.coordinator.current_frame() >= frame)
    }

    fn assert_in_step(&self) {
        for participant in &self.participants {
            let common = participant.host.ticks.len().min(self.authority.host.ticks.len());
            assert_eq!(participant.host.ticks[..common], self.authority.host.ticks[..common]);
        }
    }
}

fn quick_sync() -> LockstepConfig {
    LockstepConfig {
        latency_samples: 2,
        ..LockstepConfig::default()
    }
}

// ============================================================================
// STEADY STATE
// ============================================================================

#[test]
fn two_peers_reach_frame_ten_at_tick_rate() {
    let config = quick_sync();
    assert_eq!(config.tick_time_ms, 50);
    assert_eq!(config.max_delay_frames, 2);

    let mut session = Session::new(&config, 1, NetworkConditions::GOOD, 1);
    session.authority.coordinator.set_frame_limit(Some(10));
    session.participants[0].coordinator.set_frame_limit(Some(10));

    session.run_until(300, |s| s.all_at(10));
    // Let the participant settle on the limit.
    for _ in 0..5 {
        session.step();
    }

    assert_eq!(session.authority.coordinator.current_frame(), 10);
    assert_eq!(session.participants[0].coordinator.current_frame(), 10);
    assert_eq!(session.authority.frames(), (1..=10).collect::<Vec<_>>());
    assert!(session.authority.host.applied.iter().all(|&count| count <= 2));
    assert!(session.participants[0].host.applied.iter().all(|&count| count <= 2));
    session.assert_in_step();

    // Every merged frame carries both players' input for that frame.
    for (frame, inputs) in &session.authority.host.ticks {
        assert_eq!(inputs.len(), 2);
        assert_eq!(&inputs.get(PlayerId::AUTHORITY).unwrap()[..4], &frame.to_be_bytes());
        assert_eq!(&inputs.get(PlayerId(1)).unwrap()[..4], &frame.to_be_bytes());
    }
}

#[test]
fn lossy_session_stays_in_step() {
    let conditions = NetworkConditions::POOR.with_loss(15);
    let mut session = Session::new(&quick_sync(), 3, conditions, 99);

    session.run_until(3000, |s| s.all_at(60));

    session.assert_in_step();
    let frames = session.authority.frames();
    assert_eq!(frames[..60], (1..=60).collect::<Vec<_>>()[..]);
    for participant in &session.participants {
        assert!(participant.host.applied.iter().all(|&count| count <= 2));
    }
}

#[test]
fn round_start_reaches_everyone() {
    let mut session = Session::new(&quick_sync(), 2, NetworkConditions::GOOD, 5);
    session.run_until(200, |s| {
        s.authority.coordinator.state() == SyncState::Running
            && s.participants.iter().all(|p| p.coordinator.state() == SyncState::Running)
    });

    let players = vec![PlayerId::AUTHORITY, PlayerId(1), PlayerId(2)];
    let started = SyncNotice::RoundStarted { players };
    assert!(session.authority.host.notices.contains(&started));
    for (index, participant) in session.participants.iter().enumerate() {
        assert!(participant.host.notices.contains(&started));
        assert_eq!(participant.coordinator.local_player(), Some(PlayerId(index as u32 + 1)));
        assert_eq!(participant.coordinator.latency().sample_count(), 2);
    }
}

// ============================================================================
// STRAGGLERS
// ============================================================================

#[test]
fn silent_participant_stalls_then_resumes() {
    let mut session = Session::new(&quick_sync(), 1, NetworkConditions::GOOD, 3);
    session.run_until(300, |s| s.all_at(5));

    session.uplinks[0].set_blocked(true);
    session.run_until(100, |s| s.authority.coordinator.state() == SyncState::Stalled);

    let straggler = PlayerId(1);
    assert_eq!(session.authority.coordinator.stalled_players(), vec![straggler]);
    assert!(session
        .authority
        .host
        .notices
        .iter()
        .any(|n| matches!(n, SyncNotice::Stalled { player, .. } if *player == straggler)));

    // Nothing new can be merged while the straggler is silent.
    for _ in 0..5 {
        session.step();
    }
    let frozen = session.authority.coordinator.current_frame();
    for _ in 0..10 {
        session.step();
    }
    assert_eq!(session.authority.coordinator.current_frame(), frozen);
    assert_eq!(session.participants[0].coordinator.state(), SyncState::Stalled);
    assert_eq!(session.participants[0].coordinator.stalled_players(), vec![straggler]);

    session.uplinks[0].set_blocked(false);
    session.run_until(200, |s| s.authority.coordinator.state() == SyncState::Running);
    assert!(session
        .authority
        .host
        .notices
        .iter()
        .any(|n| matches!(n, SyncNotice::Resumed { player, .. } if *player == straggler)));

    let target = frozen + 10;
    session.run_until(400, |s| s.all_at(target));
    assert!(session.authority.coordinator.stats().stalls >= 1);
    assert!(session.authority.coordinator.stats().resumes >= 1);
    session.assert_in_step();
}

// ============================================================================
// LEAVING
// ============================================================================

#[test]
fn lost_control_stream_ends_session_for_everyone() {
    let mut session = Session::new(&quick_sync(), 2, NetworkConditions::GOOD, 11);
    session.run_until(300, |s| s.all_at(3));

    // Participant 1 vanishes: its transports are dropped without a goodbye.
    let gone = session.participants.remove(0);
    drop(gone);

    session.run_until(20, |s| {
        s.authority.coordinator.state() == SyncState::Ended
            && s.participants[0].coordinator.state() == SyncState::Ended
    });
    let ended = SyncNotice::SessionEnded {
        reason: EndReason::TransportFailure,
    };
    assert!(session.authority.host.notices.contains(&ended));
    assert!(session.participants[0].host.notices.contains(&ended));
}

#[test]
fn graceful_leave_lets_the_rest_play_on() {
    let mut session = Session::new(&quick_sync(), 2, NetworkConditions::GOOD, 13);
    session.run_until(300, |s| s.all_at(3));

    session.participants[0].coordinator.leave();
    session.step();
    let leaver = session.participants.remove(0);
    assert_eq!(leaver.coordinator.state(), SyncState::Ended);

    session.run_until(20, |s| s.authority.coordinator.players().len() == 2);
    assert!(session
        .authority
        .host
        .notices
        .contains(&SyncNotice::PlayerLeft { player: PlayerId(1) }));

    let target = session.authority.coordinator.current_frame() + 10;
    session.run_until(400, |s| s.all_at(target));
    assert_eq!(session.authority.coordinator.state(), SyncState::Running);
    assert!(session.participants[0]
        .host
        .notices
        .contains(&SyncNotice::PlayerLeft { player: PlayerId(1) }));
    session.assert_in_step();
}

#[test]
fn authority_end_reaches_participants() {
    let mut session = Session::new(&quick_sync(), 2, NetworkConditions::GOOD, 17);
    session.run_until(300, |s| s.all_at(2));

    session.authority.coordinator.end_session(EndReason::Requested);
    session.run_until(10, |s| {
        s.participants.iter().all(|p| p.coordinator.state() == SyncState::Ended)
    });
    for participant in &session.participants {
        assert!(participant.host.notices.contains(&SyncNotice::SessionEnded {
            reason: EndReason::Requested
        }));
    }

    // Ended coordinators stop executing frames.
    let frame = session.authority.coordinator.current_frame();
    for _ in 0..5 {
        session.step();
    }
    assert_eq!(session.authority.coordinator.current_frame(), frame);
}

// ============================================================================
// PAYLOAD LIMITS
// ============================================================================

#[test]
fn merged_frame_too_large_for_a_datagram_ends_session() {
    let config = LockstepConfig {
        max_datagram_bytes: 300,
        ..quick_sync()
    };
    assert!(config.validate().is_ok());

    let mut session = Session::new(&config, 2, NetworkConditions::GOOD, 21);
    // Each input fits on its own; three of them merged do not.
    session.authority.host.pad = 100;
    for participant in &mut session.participants {
        participant.host.pad = 100;
    }

    session.run_until(200, |s| {
        s.authority.coordinator.state() == SyncState::Ended
            && s.participants.iter().all(|p| p.coordinator.state() == SyncState::Ended)
    });

    let ended = SyncNotice::SessionEnded {
        reason: EndReason::PayloadTooLarge,
    };
    assert!(session.authority.host.notices.contains(&ended));
    assert!(session.authority.host.ticks.is_empty());
    assert_eq!(session.authority.coordinator.current_frame(), 0);
    for participant in &session.participants {
        assert!(participant.host.notices.contains(&ended));
        assert_eq!(participant.coordinator.current_frame(), 0);
    }
    assert!(!session
        .authority
        .host
        .notices
        .iter()
        .any(|n| matches!(n, SyncNotice::Stalled { .. })));
}
