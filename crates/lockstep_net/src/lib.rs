//! # Lockstep Net - Deterministic Frame Synchronization
//!
//! Keeps a group of peers executing the identical sequence of simulation
//! frames over an unreliable datagram network.
//!
//! ## Architecture
//!
//! - **Channel**: partially-reliable transport over UDP (cumulative acks,
//!   retransmission window, heartbeats)
//! - **Frame buffers**: frame-stamped payloads consumed in strict order
//! - **Coordinator**: one authority merges every player's input into
//!   canonical frames; participants execute exactly what it sends
//! - **Poller**: the only code that touches sockets; talks to the
//!   coordinator through two mailboxes
//!
//! ```text
//! PARTICIPANT                        AUTHORITY
//!   |                                   |
//!   |--- Frame N input (reliable) ----->|  <- merge once everyone's in
//!   |<-- Merged frame N (reliable) -----|
//!   |                                   |
//!   |    both execute frame N with the same inputs
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use lockstep_net::{LockstepConfig, LockstepCoordinator, Mailboxes, TickClock};
//!
//! let config = LockstepConfig::default();
//! let mut authority = LockstepCoordinator::authority(config, Mailboxes::new());
//! authority.start_sync(0);
//!
//! let mut clock = TickClock::new(authority.config().tick_time_ms);
//! loop {
//!     let (now_ms, elapsed_ms) = clock.wait_for_next_tick();
//!     authority.eval_frame(now_ms, elapsed_ms, &mut game);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod channel;
pub mod config;
pub mod error;
pub mod frame_buffer;
pub mod latency;
pub mod lockstep;
pub mod mailbox;
pub mod peers;
pub mod poller;
pub mod simulation;
pub mod tick;
pub mod transport;

pub use lockstep_shared;

// Re-exports for convenience
pub use channel::{ChannelStats, ReliableChannel, RetransmitWindow};
pub use config::LockstepConfig;
pub use error::{ConfigError, NetError, NetResult, SessionError, TransportError, TransportResult};
pub use frame_buffer::{FrameBuffer, FrameRecord};
pub use latency::LatencyEstimator;
pub use lockstep::{
    CoordinatorStats, EvalReport, LockstepCoordinator, SimulationHost, SyncNotice, SyncState,
};
pub use mailbox::{Inbound, Mailbox, Mailboxes, Outbound};
pub use peers::PeerTable;
pub use poller::{NetworkPoller, PollerHandle, PollerStats};
pub use simulation::{LinkStats, LinkSwitch, LossyLink, NetworkConditions};
pub use tick::{TickClock, TickStats};
pub use transport::{
    ControlLink, DatagramSocket, MemoryControlLink, TcpControlLink, TransportStats, UdpTransport,
};
