//! # Lockstep Simulation
//!
//! Runs one authority and several participants in a single process and
//! checks that every peer executed the same frames with the same inputs.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --features sim --bin lockstep_sim -- --players 4 --frames 200 --loss 10 --tick-ms 16
//! cargo run --features sim --bin lockstep_sim -- --udp --players 2 --config lockstep.toml
//! ```
//!
//! Without `--udp` peers talk over lossy in-memory links; with it they use
//! real UDP sockets and TCP control streams on loopback.

use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::process::ExitCode;

use lockstep_net::lockstep_shared::{ByteWriter, EndReason, FrameNumber, MergedFrame, PeerId};
use lockstep_net::{
    ControlLink, DatagramSocket, LockstepConfig, LockstepCoordinator, LossyLink, Mailboxes,
    MemoryControlLink, NetError, NetworkConditions, NetworkPoller, SimulationHost, SyncNotice,
    SyncState, TcpControlLink, TickClock, UdpTransport,
};
use tracing_subscriber::EnvFilter;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

struct Options {
    players: u32,
    frames: FrameNumber,
    loss: u8,
    tick_ms: Option<u32>,
    config: Option<String>,
    udp: bool,
    seed: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            players: 3,
            frames: 100,
            loss: 0,
            tick_ms: None,
            config: None,
            udp: false,
            seed: 42,
        }
    }
}

/// Folds every executed frame into a running hash.
struct ChecksumHost {
    seed: u64,
    state: u64,
    checksums: Vec<u64>,
    stalls: u32,
    ended: Option<EndReason>,
}

impl ChecksumHost {
    fn new(seed: u64) -> Self {
        Self {
            seed,
            state: FNV_OFFSET,
            checksums: Vec::new(),
            stalls: 0,
            ended: None,
        }
    }

    fn fold(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }
}

impl SimulationHost for ChecksumHost {
    fn write_input(&mut self, frame: FrameNumber, writer: &mut ByteWriter) {
        let mixed = (u64::from(frame) ^ self.seed).wrapping_mul(FNV_PRIME);
        writer.write_u32(frame);
        writer.write_u64(mixed);
    }

    fn tick(&mut self, frame: FrameNumber, inputs: &MergedFrame) {
        self.fold(&frame.to_be_bytes());
        for (player, snapshot) in inputs.iter() {
            self.fold(&player.0.to_be_bytes());
            self.fold(snapshot);
        }
        self.checksums.push(self.state);
    }

    fn on_frames_applied(&mut self, _count: u32) {}

    fn on_notice(&mut self, notice: SyncNotice) {
        match notice {
            SyncNotice::Stalled { .. } => self.stalls += 1,
            SyncNotice::SessionEnded { reason } => self.ended = Some(reason),
            _ => {}
        }
    }
}

struct Endpoint<S, C> {
    name: String,
    coordinator: LockstepCoordinator,
    poller: NetworkPoller<S, C>,
    host: ChecksumHost,
}

impl<S: DatagramSocket, C: ControlLink> Endpoint<S, C> {
    fn finished(&self, frames: FrameNumber) -> bool {
        self.coordinator.state() == SyncState::Ended || self.coordinator.current_frame() >= frames
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let Some(options) = parse_args() else {
        return ExitCode::SUCCESS;
    };

    let mut config = match &options.config {
        Some(path) => match LockstepConfig::from_toml_file(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => LockstepConfig::default(),
    };
    if let Some(tick_ms) = options.tick_ms {
        config.tick_time_ms = tick_ms;
    }
    if let Err(err) = config.validate() {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         LOCKSTEP SIMULATION                                      ║");
    println!("║         ONE AUTHORITY, EVERYONE IN STEP                          ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();
    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    let transport = if options.udp {
        "UDP + TCP (loopback)"
    } else {
        "in-memory"
    };
    println!("│ Transport:          {transport}");
    println!("│ Players:            {}", options.players + 1);
    println!("│ Frames:             {}", options.frames);
    println!("│ Packet Loss:        {}%", options.loss);
    println!("│ Tick:               {} ms", config.tick_time_ms);
    println!("│ Max Delay:          {} frames", config.max_delay_frames);
    println!("│ Max Wait Diff:      {} frames", config.max_wait_diff_frames);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let result = if options.udp {
        build_udp(&options, &config)
            .map(|(authority, participants)| run(&options, &config, authority, participants))
    } else {
        let (authority, participants) = build_memory(&options, &config);
        Ok(run(&options, &config, authority, participants))
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn parse_args() -> Option<Options> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--players" | "-p" => {
                if let Some(v) = value.and_then(|v| v.parse().ok()) {
                    options.players = v;
                    i += 1;
                }
            }
            "--frames" | "-f" => {
                if let Some(v) = value.and_then(|v| v.parse().ok()) {
                    options.frames = v;
                    i += 1;
                }
            }
            "--loss" | "-l" => {
                if let Some(v) = value.and_then(|v| v.parse().ok()) {
                    options.loss = v;
                    i += 1;
                }
            }
            "--tick-ms" | "-t" => {
                if let Some(v) = value.and_then(|v| v.parse().ok()) {
                    options.tick_ms = Some(v);
                    i += 1;
                }
            }
            "--seed" | "-s" => {
                if let Some(v) = value.and_then(|v| v.parse().ok()) {
                    options.seed = v;
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if let Some(v) = value {
                    options.config = Some(v.clone());
                    i += 1;
                }
            }
            "--udp" => options.udp = true,
            "--help" | "-h" => {
                println!("Usage: lockstep_sim [OPTIONS]");
                println!();
                println!("Options:");
                println!(
                    "  -p, --players <NUM>    Participants besides the authority (default: 3)"
                );
                println!("  -f, --frames <NUM>     Frames to run (default: 100)");
                println!("  -l, --loss <PERCENT>   Packet loss on in-memory links (default: 0)");
                println!("  -t, --tick-ms <MS>     Frame duration, overrides the config file");
                println!("  -s, --seed <NUM>       Seed for the in-memory links (default: 42)");
                println!("  -c, --config <FILE>    TOML configuration file");
                println!("      --udp              Use UDP and TCP on loopback");
                println!("  -h, --help             Show this help");
                return None;
            }
            other => eprintln!("ignoring unknown argument {other}"),
        }
        i += 1;
    }
    Some(options)
}

type MemoryEndpoint = Endpoint<LossyLink, MemoryControlLink>;

fn build_memory(
    options: &Options,
    config: &LockstepConfig,
) -> (MemoryEndpoint, Vec<MemoryEndpoint>) {
    let conditions = NetworkConditions::GOOD.with_loss(options.loss);
    let authority_mail = Mailboxes::new();
    let mut authority = Endpoint {
        name: "authority".into(),
        coordinator: LockstepCoordinator::authority(config.clone(), authority_mail.clone()),
        poller: NetworkPoller::new(config.clone(), authority_mail),
        host: ChecksumHost::new(0),
    };

    let mut participants = Vec::new();
    for index in 1..=options.players {
        let (authority_end, participant_end) =
            LossyLink::pair(conditions, options.seed.wrapping_add(u64::from(index)));
        let (authority_control, participant_control) = MemoryControlLink::pair();
        let peer = authority.poller.add_peer(authority_end, authority_control);
        participants.push(join(
            config,
            &mut authority,
            peer,
            participant_end,
            participant_control,
            index,
        ));
    }
    (authority, participants)
}

type UdpEndpoint = Endpoint<UdpTransport, TcpControlLink>;

fn build_udp(
    options: &Options,
    config: &LockstepConfig,
) -> Result<(UdpEndpoint, Vec<UdpEndpoint>), NetError> {
    let loopback: SocketAddr = ([127, 0, 0, 1], 0).into();
    let listener = TcpListener::bind(loopback).map_err(lockstep_net::TransportError::from)?;
    let listen_addr = listener.local_addr().map_err(lockstep_net::TransportError::from)?;

    let authority_mail = Mailboxes::new();
    let mut authority = Endpoint {
        name: "authority".into(),
        coordinator: LockstepCoordinator::authority(config.clone(), authority_mail.clone()),
        poller: NetworkPoller::new(config.clone(), authority_mail),
        host: ChecksumHost::new(0),
    };

    let mut participants = Vec::new();
    for index in 1..=options.players {
        let connect = || -> std::io::Result<_> {
            let authority_socket = UdpSocket::bind(loopback)?;
            let participant_socket = UdpSocket::bind(loopback)?;
            let authority_addr = authority_socket.local_addr()?;
            let participant_addr = participant_socket.local_addr()?;

            let outgoing = TcpStream::connect(listen_addr)?;
            let (incoming, _) = listener.accept()?;
            Ok((
                UdpTransport::from_socket(authority_socket, participant_addr)?,
                UdpTransport::from_socket(participant_socket, authority_addr)?,
                TcpControlLink::new(incoming)?,
                TcpControlLink::new(outgoing)?,
            ))
        };
        let (authority_udp, participant_udp, authority_tcp, participant_tcp) =
            connect().map_err(lockstep_net::TransportError::from)?;
        let peer = authority.poller.add_peer(authority_udp, authority_tcp);
        participants.push(join(
            config,
            &mut authority,
            peer,
            participant_udp,
            participant_tcp,
            index,
        ));
    }
    Ok((authority, participants))
}

fn join<S: DatagramSocket, C: ControlLink>(
    config: &LockstepConfig,
    authority: &mut Endpoint<S, C>,
    peer_on_authority: PeerId,
    socket: S,
    control: C,
    index: u32,
) -> Endpoint<S, C> {
    let mailboxes = Mailboxes::new();
    let mut poller = NetworkPoller::new(config.clone(), mailboxes.clone());
    let authority_peer = poller.add_peer(socket, control);
    if let Err(err) = authority.coordinator.add_participant(peer_on_authority) {
        tracing::error!(%err, index, "participant refused");
    }
    Endpoint {
        name: format!("participant {index}"),
        coordinator: LockstepCoordinator::participant(config.clone(), mailboxes, authority_peer),
        poller,
        host: ChecksumHost::new(u64::from(index) * 0x1000),
    }
}

/// Steps every endpoint once per tick until all reach the last frame.
///
/// Returns whether every peer agreed on every frame.
fn run<S: DatagramSocket, C: ControlLink>(
    options: &Options,
    config: &LockstepConfig,
    mut authority: Endpoint<S, C>,
    mut participants: Vec<Endpoint<S, C>>,
) -> bool {
    authority.coordinator.set_frame_limit(Some(options.frames));
    authority.coordinator.start_sync(0);
    for participant in &mut participants {
        participant.coordinator.set_frame_limit(Some(options.frames));
        participant.coordinator.start_sync(0);
    }

    let mut clock = TickClock::new(config.tick_time_ms);
    let tick_budget = u64::from(options.frames) * 4 + 400;
    let mut ticks = 0;
    while ticks < tick_budget {
        ticks += 1;
        let (now_ms, elapsed_ms) = clock.wait_for_next_tick();
        step(&mut authority, now_ms, elapsed_ms);
        for participant in &mut participants {
            step(participant, now_ms, elapsed_ms);
        }
        if authority.finished(options.frames)
            && participants.iter().all(|p| p.finished(options.frames))
        {
            break;
        }
    }

    authority.coordinator.end_session(EndReason::Requested);
    for _ in 0..10 {
        let now_ms = clock.now_ms();
        step(&mut authority, now_ms, 0);
        for participant in &mut participants {
            step(participant, now_ms, 0);
        }
    }

    report(&authority, &participants, &clock)
}

fn step<S: DatagramSocket, C: ControlLink>(
    endpoint: &mut Endpoint<S, C>,
    now_ms: u64,
    elapsed_ms: u64,
) {
    endpoint.poller.poll(now_ms);
    endpoint.coordinator.eval_frame(now_ms, elapsed_ms, &mut endpoint.host);
    endpoint.poller.poll(now_ms);
}

fn report<S: DatagramSocket, C: ControlLink>(
    authority: &Endpoint<S, C>,
    participants: &[Endpoint<S, C>],
    clock: &TickClock,
) -> bool {
    let reference = &authority.host.checksums;
    let mut agreed = true;

    println!("┌─ PEERS ─────────────────────────────────────────────────────────┐");
    for endpoint in std::iter::once(authority).chain(participants) {
        let checksums = &endpoint.host.checksums;
        let common = checksums.len().min(reference.len());
        let matches = checksums[..common] == reference[..common];
        agreed &= matches;

        let mut retransmitted = 0;
        for peer in endpoint.poller.peers() {
            if let Some(channel) = endpoint.poller.channel(peer) {
                retransmitted += channel.stats().retransmitted_bytes;
            }
        }
        let stats = endpoint.coordinator.stats();
        println!(
            "│ {:<16} frames {:>6}  stalls {:>3}  catch-up {:>4}  resent {:>8} B  {:<9} {}",
            endpoint.name,
            endpoint.coordinator.current_frame(),
            endpoint.host.stalls,
            stats.catch_up_evals,
            retransmitted,
            endpoint.host.ended.map_or_else(|| "-".to_string(), |reason| format!("{reason:?}")),
            if matches { "in step" } else { "DIVERGED" },
        );
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let ticks = clock.stats();
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║                    SIMULATION COMPLETE                           ║");
    println!("╠══════════════════════════════════════════════════════════════════╣");
    println!("║ Total Ticks:        {:>10}                                   ║", ticks.total_ticks);
    println!("║ Late Ticks:         {:>10}                                   ║", ticks.late_ticks);
    let merged = authority.coordinator.stats().frames_merged;
    let verdict = if agreed { "PASS" } else { "FAIL" };
    println!("║ Frames Merged:      {merged:>10}                                   ║");
    println!("║ Result:             {verdict:>10}                                   ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    agreed
}
