//! # Lockstep Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! file is a valid configuration.
//!
//! ```toml
//! tick_time_ms = 50
//! max_delay_frames = 2
//! max_wait_diff_frames = 5
//! latency_samples = 8
//! ```

use std::path::Path;

use lockstep_shared::{ChunkHeader, FrameMessage, PacketHeader, MAX_DATAGRAM_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunables for the channel, the frame buffers and the coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockstepConfig {
    /// Duration of one simulation frame.
    pub tick_time_ms: u32,
    /// Backlog, in frames, tolerated before catch-up kicks in.
    pub max_delay_frames: u32,
    /// How far a player may trail before the authority declares a stall.
    pub max_wait_diff_frames: u32,
    /// Initial retransmission window buffer size.
    pub window_initial_bytes: usize,
    /// Growth step when the retransmission window overflows.
    pub window_growth_bytes: usize,
    /// Window size beyond which growth is logged as a warning.
    pub window_warn_bytes: usize,
    /// Initial per-peer frame buffer capacity.
    pub frame_buffer_initial: usize,
    /// Queued frames beyond which growth is logged as a warning.
    pub frame_buffer_warn: usize,
    /// Capacity of the latency sample ring.
    pub latency_samples: usize,
    /// Interval between latency probes while synchronizing.
    pub ping_interval_ms: u64,
    /// Idle time after which a heartbeat packet is sent.
    pub heartbeat_interval_ms: u64,
    /// Send attempts before a full socket buffer is reported.
    pub send_retry_budget: u32,
    /// Largest datagram the channel will emit.
    pub max_datagram_bytes: usize,
}

impl Default for LockstepConfig {
    fn default() -> Self {
        Self {
            tick_time_ms: 50,
            max_delay_frames: 2,
            max_wait_diff_frames: 5,
            window_initial_bytes: 4 * 1024,
            window_growth_bytes: 4 * 1024,
            window_warn_bytes: 256 * 1024,
            frame_buffer_initial: 64,
            frame_buffer_warn: 1024,
            latency_samples: 8,
            ping_interval_ms: 20,
            heartbeat_interval_ms: 100,
            send_retry_budget: 3,
            max_datagram_bytes: MAX_DATAGRAM_SIZE,
        }
    }
}

impl LockstepConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on bad syntax or unknown keys and
    /// [`ConfigError::Invalid`] on out-of-range values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// See [`LockstepConfig::from_toml_str`]; I/O failures are
    /// [`ConfigError::Io`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks every value is usable.
    ///
    /// # Errors
    ///
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });
        if self.tick_time_ms == 0 {
            return invalid("tick_time_ms", "must be greater than zero");
        }
        if self.max_wait_diff_frames == 0 {
            return invalid("max_wait_diff_frames", "must be at least one frame");
        }
        if self.window_initial_bytes == 0 {
            return invalid("window_initial_bytes", "must be greater than zero");
        }
        if self.window_growth_bytes == 0 {
            return invalid("window_growth_bytes", "must be greater than zero");
        }
        if self.window_warn_bytes < self.window_initial_bytes {
            return invalid("window_warn_bytes", "must not be below window_initial_bytes");
        }
        if self.frame_buffer_initial == 0 {
            return invalid("frame_buffer_initial", "must be greater than zero");
        }
        if self.latency_samples == 0 {
            return invalid("latency_samples", "must be greater than zero");
        }
        if self.send_retry_budget == 0 {
            return invalid("send_retry_budget", "must allow at least one attempt");
        }
        if self.max_datagram_bytes <= Self::FRAME_OVERHEAD
            || self.max_datagram_bytes > MAX_DATAGRAM_SIZE
        {
            return invalid(
                "max_datagram_bytes",
                "must fit a framed payload and a UDP datagram",
            );
        }
        Ok(())
    }

    /// Packet header, chunk header and frame prefix around every frame payload.
    pub const FRAME_OVERHEAD: usize =
        PacketHeader::SIZE + ChunkHeader::SIZE + FrameMessage::PREFIX_SIZE;

    /// Largest snapshot or merged frame that still fits one datagram.
    #[must_use]
    pub const fn max_frame_payload_bytes(&self) -> usize {
        self.max_datagram_bytes.saturating_sub(Self::FRAME_OVERHEAD)
    }

    /// Frames a peer may run its input ahead of its executed frame.
    #[must_use]
    pub const fn input_lead_frames(&self) -> u32 {
        self.max_delay_frames + self.max_wait_diff_frames + 1
    }

    /// Delay frames sized to the measured latency, never below the
    /// configured minimum.
    #[must_use]
    pub fn effective_delay_frames(&self, latency_ms: Option<u32>) -> u32 {
        let from_latency = latency_ms.map_or(0, |ms| ms.div_ceil(self.tick_time_ms));
        self.max_delay_frames.max(from_latency)
    }
}
