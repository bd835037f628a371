//! Identifiers used across the lockstep session.

use std::fmt;

/// Simulation frame number.
///
/// Frame 0 means "nothing executed yet"; the first executed frame is 1.
pub type FrameNumber = u32;

/// Handle into an endpoint's connection arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl PeerId {
    /// Invalid/null peer handle.
    pub const NULL: Self = Self(u32::MAX);

    /// Returns true if this is the null handle.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    /// Slot index inside the arena.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Lockstep player number.
///
/// The authority's own player is always [`PlayerId::AUTHORITY`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PlayerId(pub u32);

impl PlayerId {
    /// The authority's local player.
    pub const AUTHORITY: Self = Self(0);
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}
