//! # Network Simulation
//!
//! In-memory datagram links with configurable misbehaviour, for tests, the
//! demo binary and benchmarks.
//!
//! ## Features
//!
//! - Packet loss
//! - Duplication
//! - Reordering
//! - Delay measured in receiver poll steps, with jitter
//! - A manual switch that silences one direction
//!
//! Everything is driven by a seeded `StdRng`, so a run is reproducible.

mod link;

pub use link::{LinkStats, LinkSwitch, LossyLink};

/// Network conditions for one link direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkConditions {
    /// Receiver poll steps before a datagram becomes visible.
    pub delay_steps: u32,
    /// Extra random delay, `0..=jitter_steps`.
    pub jitter_steps: u32,
    /// Packet loss percentage (0-100).
    pub packet_loss_percent: u8,
    /// Duplicate packet percentage (0-100).
    pub duplicate_percent: u8,
    /// Out-of-order percentage (0-100).
    pub out_of_order_percent: u8,
}

impl NetworkConditions {
    /// Instant, lossless delivery.
    pub const PERFECT: Self = Self {
        delay_steps: 0,
        jitter_steps: 0,
        packet_loss_percent: 0,
        duplicate_percent: 0,
        out_of_order_percent: 0,
    };

    /// One step of delay, nothing lost.
    pub const GOOD: Self = Self {
        delay_steps: 1,
        jitter_steps: 0,
        packet_loss_percent: 0,
        duplicate_percent: 0,
        out_of_order_percent: 0,
    };

    /// Lossy, jittery, reordering.
    pub const POOR: Self = Self {
        delay_steps: 1,
        jitter_steps: 2,
        packet_loss_percent: 10,
        duplicate_percent: 5,
        out_of_order_percent: 10,
    };

    /// Instant, lossless delivery.
    #[must_use]
    pub const fn perfect() -> Self {
        Self::PERFECT
    }

    /// Copy of `self` with a different loss rate.
    #[must_use]
    pub const fn with_loss(self, percent: u8) -> Self {
        Self {
            packet_loss_percent: if percent > 100 { 100 } else { percent },
            ..self
        }
    }

    /// Copy of `self` with a different fixed delay.
    #[must_use]
    pub const fn with_delay(self, steps: u32) -> Self {
        Self {
            delay_steps: steps,
            ..self
        }
    }

    /// Returns true if the packet should be dropped.
    #[must_use]
    pub fn should_drop(&self, roll: u32) -> bool {
        roll % 100 < u32::from(self.packet_loss_percent)
    }

    /// Returns true if the packet should be delivered twice.
    #[must_use]
    pub fn should_duplicate(&self, roll: u32) -> bool {
        roll % 100 < u32::from(self.duplicate_percent)
    }

    /// Returns true if the packet should be held back past later ones.
    #[must_use]
    pub fn should_reorder(&self, roll: u32) -> bool {
        roll % 100 < u32::from(self.out_of_order_percent)
    }
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self::GOOD
    }
}
