//! Authority and participant specifics.

use lockstep_shared::{FrameNumber, MergedFrame, PeerId, PlayerId};

use super::straggler::StragglerTracker;

/// Authority-only state.
#[derive(Debug)]
pub struct AuthorityRole {
    /// Every player's contributions and watermarks.
    pub tracker: StragglerTracker,
    /// Number handed to the next participant.
    pub next_player: u32,
}

/// Participant-only state.
#[derive(Debug)]
pub struct ParticipantRole {
    /// Peer handle of the authority.
    pub authority: PeerId,
    /// Player number assigned by `Welcome`.
    pub local_player: Option<PlayerId>,
    /// `Ready` already sent this synchronization.
    pub ready_sent: bool,
    /// Earliest time of the next latency probe.
    pub next_ping_ms: u64,
}

/// What a coordinator does beyond the shared tick logic.
#[derive(Debug)]
pub enum Role {
    /// Merges contributions and broadcasts the canonical frames.
    Authority(AuthorityRole),
    /// Contributes input to, and executes frames from, the authority.
    Participant(ParticipantRole),
}

impl Role {
    /// Returns true if `player` is driven by this endpoint.
    #[must_use]
    pub fn is_local(&self, player: PlayerId) -> bool {
        self.local_player() == Some(player)
    }

    /// This endpoint's player, once known.
    #[must_use]
    pub fn local_player(&self) -> Option<PlayerId> {
        match self {
            Self::Authority(_) => Some(PlayerId::AUTHORITY),
            Self::Participant(p) => p.local_player,
        }
    }

    /// Returns true for the authority.
    #[must_use]
    #[inline]
    pub const fn is_authority(&self) -> bool {
        matches!(self, Self::Authority(_))
    }

    /// The authority's peer handle, for a participant.
    #[must_use]
    #[inline]
    pub const fn authority_peer(&self) -> Option<PeerId> {
        match self {
            Self::Authority(_) => None,
            Self::Participant(p) => Some(p.authority),
        }
    }

    /// Merges every frame all players have contributed to.
    ///
    /// Participants never merge; their frames arrive already merged.
    pub fn merge_contributions(&mut self) -> Vec<(FrameNumber, MergedFrame)> {
        let Self::Authority(authority) = self else {
            return Vec::new();
        };
        let mut merged = Vec::new();
        while let Some(frame) = authority.tracker.try_merge() {
            merged.push(frame);
        }
        merged
    }
}
