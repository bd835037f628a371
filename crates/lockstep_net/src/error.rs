//! # Network Error Types
//!
//! ## Taxonomy
//!
//! - **Framing**: malformed bytes; fatal to one datagram, the channel lives on
//! - **Transport**: the socket refused or failed; channel state is untouched
//! - **Config**: rejected at startup, never at runtime
//! - **Session**: a membership request the coordinator refused
//!
//! Stalls and buffer growth are not errors. They are reported as
//! [`crate::lockstep::SyncNotice`] values and log warnings respectively.

use std::io;

use lockstep_shared::FramingError;
use thiserror::Error;

/// Socket-level failures.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The OS reported an I/O error.
    #[error("socket i/o error: {0}")]
    Io(#[from] io::Error),

    /// The outbound buffer stayed full for the whole retry budget.
    #[error("send buffer full after {attempts} attempts")]
    SendBufferFull {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The socket accepted fewer bytes than the datagram holds.
    #[error("short send: {sent} of {expected} bytes")]
    ShortSend {
        /// Bytes accepted.
        sent: usize,
        /// Bytes in the datagram.
        expected: usize,
    },

    /// The remote end closed the connection.
    #[error("connection closed by peer")]
    Closed,
}

impl TransportError {
    /// Returns true if the failure ends the connection for good.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ),
            Self::SendBufferFull { .. } | Self::ShortSend { .. } => false,
        }
    }
}

/// Invalid configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),

    /// The TOML did not parse.
    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Session membership failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Only the authority manages players.
    #[error("operation requires the authority role")]
    NotAuthority,

    /// Every player slot is taken.
    #[error("session full ({max} players)")]
    Full {
        /// Player capacity.
        max: usize,
    },

    /// Players can only join before the round starts.
    #[error("round already in progress")]
    InProgress,

    /// The peer already holds a player slot.
    #[error("peer already joined")]
    AlreadyJoined,
}

/// Umbrella error for the crate.
#[derive(Error, Debug)]
pub enum NetError {
    /// Malformed wire data.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Socket failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Bad configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Session membership failure.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for crate operations.
pub type NetResult<T> = Result<T, NetError>;
