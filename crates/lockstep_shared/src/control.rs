//! # Control Stream Messages
//!
//! Session management travels on the connection-oriented stream, never on
//! the datagram channel.
//!
//! ## Message Structure
//!
//! ```text
//! ┌──────────────┬─────────┬──────────────────────┐
//! │ Length (4)   │ Tag (1) │ Fields (Length - 1)  │
//! └──────────────┴─────────┴──────────────────────┘
//! ```
//!
//! `Length` counts the tag and the fields, not itself.

use crate::cursor::{ByteReader, ByteWriter};
use crate::error::{FramingError, FramingResult};
use crate::ids::{FrameNumber, PlayerId};

/// Upper bound on one control message body.
pub const MAX_CONTROL_MESSAGE: usize = 64 * 1024;

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EndReason {
    /// A peer asked to end the session.
    Requested = 0,
    /// A peer's transport failed or closed.
    TransportFailure = 1,
    /// The authority went away.
    AuthorityLost = 2,
    /// A frame payload could not fit in one datagram.
    PayloadTooLarge = 3,
}

impl EndReason {
    /// Converts from u8. Unknown values map to `Requested`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::TransportFailure,
            2 => Self::AuthorityLost,
            3 => Self::PayloadTooLarge,
            _ => Self::Requested,
        }
    }
}

/// Messages exchanged on the control stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    /// Authority -> participant: your player number.
    Welcome {
        /// Assigned player.
        player: PlayerId,
    },
    /// Participant -> authority: latency probe.
    Ping {
        /// Sender's clock when the probe left.
        stamp_ms: u64,
    },
    /// Authority -> participant: latency probe echo.
    Pong {
        /// Stamp copied from the probe.
        stamp_ms: u64,
    },
    /// Participant -> authority: latency estimate available.
    Ready {
        /// Participant's mean half round-trip.
        latency_ms: u32,
    },
    /// Authority -> participant: the round begins.
    RoundStart {
        /// Last frame considered executed; the first frame run is `start_frame + 1`.
        start_frame: FrameNumber,
        /// Every player taking part, ascending.
        players: Vec<PlayerId>,
    },
    /// Authority -> participant: frame advancement paused on a straggler.
    Stalled {
        /// The straggling player.
        player: PlayerId,
        /// Authority frame at the time of the stall.
        frame: FrameNumber,
    },
    /// Authority -> participant: a straggler caught up.
    Resumed {
        /// The recovered player.
        player: PlayerId,
        /// Authority frame at the time of the resume.
        frame: FrameNumber,
    },
    /// Authority -> participant: a player was removed from the session.
    PlayerLeft {
        /// The departed player.
        player: PlayerId,
    },
    /// Participant -> authority: graceful departure.
    Leave,
    /// Either direction: the session is over for everyone.
    SessionEnd {
        /// Why the session ended.
        reason: EndReason,
    },
}

impl ControlMessage {
    const TAG_WELCOME: u8 = 1;
    const TAG_PING: u8 = 2;
    const TAG_PONG: u8 = 3;
    const TAG_READY: u8 = 4;
    const TAG_ROUND_START: u8 = 5;
    const TAG_STALLED: u8 = 6;
    const TAG_RESUMED: u8 = 7;
    const TAG_PLAYER_LEFT: u8 = 8;
    const TAG_LEAVE: u8 = 9;
    const TAG_SESSION_END: u8 = 10;

    /// Appends the length-prefixed message to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::TooLarge`] if the body exceeds
    /// [`MAX_CONTROL_MESSAGE`].
    pub fn encode_into(&self, writer: &mut ByteWriter) -> FramingResult<()> {
        let start = writer.len();
        writer.write_u32(0);
        match self {
            Self::Welcome { player } => {
                writer.write_u8(Self::TAG_WELCOME);
                writer.write_u32(player.0);
            }
            Self::Ping { stamp_ms } => {
                writer.write_u8(Self::TAG_PING);
                writer.write_u64(*stamp_ms);
            }
            Self::Pong { stamp_ms } => {
                writer.write_u8(Self::TAG_PONG);
                writer.write_u64(*stamp_ms);
            }
            Self::Ready { latency_ms } => {
                writer.write_u8(Self::TAG_READY);
                writer.write_u32(*latency_ms);
            }
            Self::RoundStart {
                start_frame,
                players,
            } => {
                writer.write_u8(Self::TAG_ROUND_START);
                writer.write_u32(*start_frame);
                let count = u16::try_from(players.len())
                    .map_err(|_| FramingError::TooLarge(players.len()))?;
                writer.write_u16(count);
                for player in players {
                    writer.write_u32(player.0);
                }
            }
            Self::Stalled { player, frame } => {
                writer.write_u8(Self::TAG_STALLED);
                writer.write_u32(player.0);
                writer.write_u32(*frame);
            }
            Self::Resumed { player, frame } => {
                writer.write_u8(Self::TAG_RESUMED);
                writer.write_u32(player.0);
                writer.write_u32(*frame);
            }
            Self::PlayerLeft { player } => {
                writer.write_u8(Self::TAG_PLAYER_LEFT);
                writer.write_u32(player.0);
            }
            Self::Leave => writer.write_u8(Self::TAG_LEAVE),
            Self::SessionEnd { reason } => {
                writer.write_u8(Self::TAG_SESSION_END);
                writer.write_u8(*reason as u8);
            }
        }
        let body = writer.len() - start - 4;
        if body > MAX_CONTROL_MESSAGE {
            return Err(FramingError::TooLarge(body));
        }
        writer.patch_u32(start, body as u32);
        Ok(())
    }

    /// Encodes the length-prefixed message into a fresh buffer.
    ///
    /// # Errors
    ///
    /// See [`ControlMessage::encode_into`].
    pub fn encode(&self) -> FramingResult<Vec<u8>> {
        let mut writer = ByteWriter::with_capacity(16);
        self.encode_into(&mut writer)?;
        Ok(writer.into_vec())
    }

    /// Returns the total size of the first complete message in `buffer`,
    /// prefix included, or `None` if more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::TooLarge`] for a declared length above
    /// [`MAX_CONTROL_MESSAGE`]; the stream cannot be resynchronised after that.
    pub fn frame_length(buffer: &[u8]) -> FramingResult<Option<usize>> {
        let Some(prefix) = buffer.get(..4) else {
            return Ok(None);
        };
        let mut reader = ByteReader::new(prefix);
        let body = reader.read_u32()? as usize;
        if body > MAX_CONTROL_MESSAGE {
            return Err(FramingError::TooLarge(body));
        }
        let total = 4 + body;
        Ok((buffer.len() >= total).then_some(total))
    }

    /// Decodes one complete length-prefixed message.
    ///
    /// # Errors
    ///
    /// Returns a [`FramingError`] for truncated, oversized, trailing or
    /// unknown-tag input.
    pub fn decode(framed: &[u8]) -> FramingResult<Self> {
        let mut reader = ByteReader::new(framed);
        let body = reader.read_len_prefixed()?;
        if !reader.is_empty() {
            return Err(FramingError::TrailingBytes(reader.remaining()));
        }
        let mut reader = ByteReader::new(body);
        let message = match reader.read_u8()? {
            Self::TAG_WELCOME => Self::Welcome {
                player: PlayerId(reader.read_u32()?),
            },
            Self::TAG_PING => Self::Ping {
                stamp_ms: reader.read_u64()?,
            },
            Self::TAG_PONG => Self::Pong {
                stamp_ms: reader.read_u64()?,
            },
            Self::TAG_READY => Self::Ready {
                latency_ms: reader.read_u32()?,
            },
            Self::TAG_ROUND_START => {
                let start_frame = reader.read_u32()?;
                let count = reader.read_u16()? as usize;
                let mut players = Vec::with_capacity(count);
                for _ in 0..count {
                    players.push(PlayerId(reader.read_u32()?));
                }
                Self::RoundStart {
                    start_frame,
                    players,
                }
            }
            Self::TAG_STALLED => Self::Stalled {
                player: PlayerId(reader.read_u32()?),
                frame: reader.read_u32()?,
            },
            Self::TAG_RESUMED => Self::Resumed {
                player: PlayerId(reader.read_u32()?),
                frame: reader.read_u32()?,
            },
            Self::TAG_PLAYER_LEFT => Self::PlayerLeft {
                player: PlayerId(reader.read_u32()?),
            },
            Self::TAG_LEAVE => Self::Leave,
            Self::TAG_SESSION_END => Self::SessionEnd {
                reason: EndReason::from_u8(reader.read_u8()?),
            },
            tag => return Err(FramingError::UnknownTag(tag)),
        };
        if !reader.is_empty() {
            return Err(FramingError::TrailingBytes(reader.remaining()));
        }
        Ok(message)
    }
}
