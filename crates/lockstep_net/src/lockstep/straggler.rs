//! # Straggler Tracking
//!
//! Authority-side bookkeeping for every player in the session: their
//! buffered contributions, their progress watermarks and the per-round merge
//! bitmask.
//!
//! ## Design
//!
//! ```text
//! slot 0 (local)  [c3 c4 c5]      bit 0 = 1
//! slot 1 (peer#0) [c3 c4]         bit 1 = 1   -> frame 3 merges
//! slot 2 (peer#1) []              bit 2 = 0   -> waits; stall check
//! ```
//!
//! - A frame merges only once every slot's bit is set
//! - A missing player is stalled when the authority's input runs more than
//!   `max_wait_diff` frames past that player's newest contribution
//! - New data from a stalled player resumes it immediately

use lockstep_shared::{FrameNumber, MergedFrame, PeerId, PlayerId};

use crate::error::SessionError;
use crate::frame_buffer::FrameBuffer;

/// Most players one session can hold (one bit each).
pub const MAX_PLAYERS: usize = u64::BITS as usize;

/// Watermark value meaning "never".
pub const NEVER: i64 = -1;

/// One player's authority-side state.
#[derive(Debug)]
pub struct PlayerSlot {
    /// Player number.
    pub player: PlayerId,
    /// Remote peer, `None` for the authority's own player.
    pub peer: Option<PeerId>,
    contributions: FrameBuffer,
    /// Last frame this player's contribution was merged into.
    pub last_update_frame: i64,
    /// Newest frame received from this player.
    pub last_recv_frame: i64,
    /// Last merged frame sent to this player.
    pub last_send_frame: i64,
    /// Currently holding the session back.
    pub stalled: bool,
    /// Reported a latency estimate.
    pub ready: bool,
    /// The reported estimate.
    pub latency_ms: Option<u32>,
}

impl PlayerSlot {
    fn new(player: PlayerId, peer: Option<PeerId>, contributions: FrameBuffer) -> Self {
        Self {
            player,
            peer,
            contributions,
            last_update_frame: NEVER,
            last_recv_frame: NEVER,
            last_send_frame: NEVER,
            stalled: false,
            ready: peer.is_none(),
            latency_ms: None,
        }
    }

    /// Contributions received but not merged yet.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.contributions.len()
    }
}

/// What recording a contribution changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recorded {
    /// Queued.
    Queued,
    /// Queued, and the player was stalled until now.
    Resumed,
    /// Already merged or unknown sender; dropped.
    Dropped,
}

/// Per-player merge and stall state.
#[derive(Debug)]
pub struct StragglerTracker {
    /// Slots ordered by player number.
    slots: Vec<PlayerSlot>,
    /// Bit `i` set once slot `i` has its contribution for the next frame.
    merged_bits: u64,
    max_wait_diff: u32,
    merged_frame: FrameNumber,
    buffer_initial: usize,
    buffer_warn: usize,
}

impl StragglerTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new(max_wait_diff: u32, buffer_initial: usize, buffer_warn: usize) -> Self {
        Self {
            slots: Vec::new(),
            merged_bits: 0,
            max_wait_diff,
            merged_frame: 0,
            buffer_initial,
            buffer_warn,
        }
    }

    /// Adds a player.
    ///
    /// # Errors
    ///
    /// [`SessionError::Full`] past [`MAX_PLAYERS`];
    /// [`SessionError::AlreadyJoined`] for a repeated player or peer.
    pub fn add(&mut self, player: PlayerId, peer: Option<PeerId>) -> Result<(), SessionError> {
        if self.slots.len() >= MAX_PLAYERS {
            return Err(SessionError::Full { max: MAX_PLAYERS });
        }
        if self
            .slots
            .iter()
            .any(|s| s.player == player || (peer.is_some() && s.peer == peer))
        {
            return Err(SessionError::AlreadyJoined);
        }
        let mut contributions = FrameBuffer::new(self.buffer_initial, self.buffer_warn);
        if self.merged_frame > 0 {
            // Late slot: position it at the merge point.
            contributions.drain_ready(self.merged_frame);
            contributions.end_frame();
        }
        let at = self.slots.partition_point(|s| s.player < player);
        self.slots.insert(at, PlayerSlot::new(player, peer, contributions));
        self.merged_bits = 0;
        Ok(())
    }

    /// Removes the player connected through `peer`.
    pub fn remove_peer(&mut self, peer: PeerId) -> Option<PlayerSlot> {
        let at = self.slots.iter().position(|s| s.peer == Some(peer))?;
        self.merged_bits = 0;
        Some(self.slots.remove(at))
    }

    /// Queues a contribution from `peer` (`None` for the local player).
    pub fn record(
        &mut self,
        peer: Option<PeerId>,
        frame: FrameNumber,
        payload: Vec<u8>,
    ) -> Recorded {
        let Some(slot) = self.slots.iter_mut().find(|s| s.peer == peer) else {
            return Recorded::Dropped;
        };
        if !slot.contributions.add_frame_data(frame, payload) {
            return Recorded::Dropped;
        }
        slot.last_recv_frame = slot.last_recv_frame.max(i64::from(frame));
        if slot.stalled {
            slot.stalled = false;
            return Recorded::Resumed;
        }
        Recorded::Queued
    }

    fn full_mask(&self) -> u64 {
        match self.slots.len() {
            MAX_PLAYERS => u64::MAX,
            n => (1u64 << n) - 1,
        }
    }

    fn refresh_bits(&mut self) {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.contributions.is_next_frame_ready(self.merged_frame) {
                self.merged_bits |= 1 << i;
            }
        }
    }

    /// Merges the next frame if every player has contributed to it.
    pub fn try_merge(&mut self) -> Option<(FrameNumber, MergedFrame)> {
        if self.slots.is_empty() {
            return None;
        }
        self.refresh_bits();
        if self.merged_bits != self.full_mask() {
            return None;
        }

        let frame = self.merged_frame + 1;
        let mut merged = MergedFrame::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            let payload = slot
                .contributions
                .begin_frame()
                .first()
                .map(|record| record.payload.clone())
                .unwrap_or_default();
            slot.contributions.end_frame();
            slot.last_update_frame = i64::from(frame);
            merged.insert(slot.player, payload);
        }
        self.merged_bits = 0;
        self.merged_frame = frame;
        Some((frame, merged))
    }

    /// Marks players missing from the next merge that trail `input_frame`
    /// by more than the allowed gap. Returns the newly stalled ones.
    pub fn check_stalls(&mut self, input_frame: FrameNumber) -> Vec<PlayerId> {
        self.refresh_bits();
        let limit = i64::from(self.max_wait_diff);
        let mut stalled = Vec::new();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let missing = self.merged_bits & (1 << i) == 0;
            if !missing || slot.stalled || slot.peer.is_none() {
                continue;
            }
            if i64::from(input_frame) - slot.last_recv_frame > limit {
                slot.stalled = true;
                stalled.push(slot.player);
            }
        }
        stalled
    }

    /// Records the last merged frame sent to every remote player.
    pub fn mark_sent(&mut self, frame: FrameNumber) {
        for slot in self.slots.iter_mut().filter(|s| s.peer.is_some()) {
            slot.last_send_frame = i64::from(frame);
        }
    }

    /// Marks the player on `peer` ready with its latency estimate.
    pub fn mark_ready(&mut self, peer: PeerId, latency_ms: u32) -> Option<PlayerId> {
        let slot = self.slots.iter_mut().find(|s| s.peer == Some(peer))?;
        slot.ready = true;
        slot.latency_ms = Some(latency_ms);
        Some(slot.player)
    }

    /// Returns true once every player reported ready.
    #[must_use]
    pub fn all_ready(&self) -> bool {
        self.slots.iter().all(|s| s.ready)
    }

    /// Highest latency any player reported.
    #[must_use]
    pub fn max_latency_ms(&self) -> Option<u32> {
        self.slots.iter().filter_map(|s| s.latency_ms).max()
    }

    /// Players currently stalled, ascending.
    #[must_use]
    pub fn stalled_players(&self) -> Vec<PlayerId> {
        self.slots.iter().filter(|s| s.stalled).map(|s| s.player).collect()
    }

    /// Returns true if any player is stalled.
    #[must_use]
    pub fn any_stalled(&self) -> bool {
        self.slots.iter().any(|s| s.stalled)
    }

    /// Every player, ascending.
    #[must_use]
    pub fn players(&self) -> Vec<PlayerId> {
        self.slots.iter().map(|s| s.player).collect()
    }

    /// Remote peers, in player order.
    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.slots.iter().filter_map(|s| s.peer)
    }

    /// The slot for `player`.
    #[must_use]
    pub fn slot(&self, player: PlayerId) -> Option<&PlayerSlot> {
        self.slots.iter().find(|s| s.player == player)
    }

    /// The player on `peer`.
    #[must_use]
    pub fn player_for(&self, peer: PeerId) -> Option<PlayerId> {
        self.slots.iter().find(|s| s.peer == Some(peer)).map(|s| s.player)
    }

    /// Last merged frame.
    #[must_use]
    #[inline]
    pub const fn merged_frame(&self) -> FrameNumber {
        self.merged_frame
    }

    /// Number of players.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if there are no players.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REMOTE: PeerId = PeerId(0);

    fn tracker() -> StragglerTracker {
        let mut tracker = StragglerTracker::new(5, 16, 1024);
        tracker.add(PlayerId::AUTHORITY, None).unwrap();
        tracker.add(PlayerId(1), Some(REMOTE)).unwrap();
        tracker
    }

    /// Both players contribute frames `from..=to` and they are merged.
    fn run_frames(tracker: &mut StragglerTracker, from: FrameNumber, to: FrameNumber) {
        for frame in from..=to {
            tracker.record(None, frame, vec![0]);
            tracker.record(Some(REMOTE), frame, vec![1]);
            assert_eq!(tracker.try_merge().map(|(f, _)| f), Some(frame));
        }
    }

    #[test]
    fn test_merge_waits_for_every_player() {
        let mut tracker = tracker();
        tracker.record(None, 1, b"a".to_vec());
        assert!(tracker.try_merge().is_none());

        tracker.record(Some(REMOTE), 1, b"b".to_vec());
        let (frame, merged) = tracker.try_merge().unwrap();
        assert_eq!(frame, 1);
        assert_eq!(merged.get(PlayerId::AUTHORITY), Some(&b"a"[..]));
        assert_eq!(merged.get(PlayerId(1)), Some(&b"b"[..]));
        assert_eq!(tracker.slot(PlayerId(1)).unwrap().last_update_frame, 1);
    }

    #[test]
    fn test_silence_within_wait_diff_is_not_a_stall() {
        let mut tracker = tracker();
        run_frames(&mut tracker, 1, 10);

        // Remote silent for 4 frames while the authority keeps producing input.
        for frame in 11..=14 {
            tracker.record(None, frame, vec![0]);
            assert!(tracker.check_stalls(frame).is_empty());
        }
        assert!(!tracker.any_stalled());

        for frame in 11..=14 {
            assert_eq!(tracker.record(Some(REMOTE), frame, vec![1]), Recorded::Queued);
        }
        for frame in 11..=14 {
            assert_eq!(tracker.try_merge().map(|(f, _)| f), Some(frame));
        }
    }

    #[test]
    fn test_silence_beyond_wait_diff_stalls_then_resumes() {
        let mut tracker = tracker();
        run_frames(&mut tracker, 1, 10);

        for frame in 11..=15 {
            tracker.record(None, frame, vec![0]);
            assert!(tracker.check_stalls(frame).is_empty());
        }
        tracker.record(None, 16, vec![0]);
        assert_eq!(tracker.check_stalls(16), vec![PlayerId(1)]);
        assert_eq!(tracker.stalled_players(), vec![PlayerId(1)]);
        // Already stalled players are not reported twice.
        assert!(tracker.check_stalls(17).is_empty());

        assert_eq!(tracker.record(Some(REMOTE), 11, vec![1]), Recorded::Resumed);
        assert!(!tracker.any_stalled());

        // The authority's buffered frames 11..=16 survived the stall.
        for frame in 12..=16 {
            tracker.record(Some(REMOTE), frame, vec![1]);
        }
        for frame in 11..=16 {
            assert_eq!(tracker.try_merge().map(|(f, _)| f), Some(frame));
        }
    }

    #[test]
    fn test_local_player_never_stalls() {
        let mut tracker = StragglerTracker::new(1, 16, 1024);
        tracker.add(PlayerId::AUTHORITY, None).unwrap();
        assert!(tracker.check_stalls(100).is_empty());
    }

    #[test]
    fn test_remove_peer_unblocks_merge() {
        let mut tracker = tracker();
        tracker.record(None, 1, vec![0]);
        assert!(tracker.try_merge().is_none());
        let slot = tracker.remove_peer(REMOTE).unwrap();
        assert_eq!(slot.player, PlayerId(1));
        assert_eq!(tracker.try_merge().map(|(f, _)| f), Some(1));
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let mut tracker = tracker();
        assert_eq!(
            tracker.add(PlayerId(2), Some(REMOTE)),
            Err(SessionError::AlreadyJoined)
        );
    }

    #[test]
    fn test_ready_and_latency() {
        let mut tracker = tracker();
        assert!(!tracker.all_ready());
        assert_eq!(tracker.mark_ready(REMOTE, 30), Some(PlayerId(1)));
        assert!(tracker.all_ready());
        assert_eq!(tracker.max_latency_ms(), Some(30));
    }
}
