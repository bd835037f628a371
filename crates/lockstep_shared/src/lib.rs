//! # Lockstep Shared
//!
//! Wire types used by the authority and by every participant.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER open a socket or spawn a thread. Anything that
//! touches the network lives in `lockstep_net`.
//!
//! ## Contents
//!
//! - [`cursor`]: big-endian byte cursors (also the simulation's snapshot cursor)
//! - [`packet`]: datagram header and reliable chunk framing
//! - [`frame`]: frame-stamped snapshots and the merged canonical frame
//! - [`control`]: control stream messages
//! - [`error`]: framing errors

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod control;
pub mod cursor;
pub mod error;
pub mod frame;
pub mod ids;
pub mod packet;

pub use control::{ControlMessage, EndReason, MAX_CONTROL_MESSAGE};
pub use cursor::{ByteReader, ByteWriter};
pub use error::{FramingError, FramingResult};
pub use frame::{FrameMessage, MergedFrame};
pub use ids::{FrameNumber, PeerId, PlayerId};
pub use packet::{encode_packet, Chunk, ChunkHeader, Packet, PacketHeader, MAX_DATAGRAM_SIZE};
