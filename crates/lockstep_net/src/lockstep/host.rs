//! The simulation side of the coordinator boundary.

use lockstep_shared::{ByteWriter, EndReason, FrameNumber, MergedFrame, PlayerId};

/// Coordinator state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// Created, not yet synchronizing.
    #[default]
    Idle,
    /// Measuring latency and waiting for the round to start.
    Synchronizing,
    /// Frames are advancing.
    Running,
    /// Frame advancement is paused on a straggler.
    Stalled,
    /// The session is over.
    Ended,
}

impl SyncState {
    /// Returns true while frames may be produced and applied.
    #[must_use]
    #[inline]
    pub const fn is_in_round(self) -> bool {
        matches!(self, Self::Running | Self::Stalled)
    }
}

/// Protocol events surfaced to the simulation host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncNotice {
    /// The round started with these players.
    RoundStarted {
        /// Every player, ascending.
        players: Vec<PlayerId>,
    },
    /// Advancement paused waiting for `player`.
    Stalled {
        /// The straggler.
        player: PlayerId,
        /// Authority frame when the stall was declared.
        frame: FrameNumber,
    },
    /// `player` caught up.
    Resumed {
        /// The recovered player.
        player: PlayerId,
        /// Authority frame when it resumed.
        frame: FrameNumber,
    },
    /// `player` left the session.
    PlayerLeft {
        /// The departed player.
        player: PlayerId,
    },
    /// The session is over for everyone.
    SessionEnded {
        /// Why.
        reason: EndReason,
    },
}

/// Outcome of one [`super::LockstepCoordinator::eval_frame`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvalReport {
    /// Frames applied to the simulation.
    pub applied: u32,
    /// Frames the elapsed time called for, before catch-up.
    pub update_frames: u32,
    /// Whether one catch-up frame was allowed.
    pub catch_up: bool,
    /// State after the call.
    pub state: SyncState,
    /// Last frame executed.
    pub current_frame: FrameNumber,
    /// Last frame input was produced for.
    pub input_frame: FrameNumber,
}

/// The simulation the coordinator drives.
pub trait SimulationHost {
    /// Serializes the local player's input for `frame`.
    fn write_input(&mut self, frame: FrameNumber, writer: &mut ByteWriter);

    /// Executes `frame` with every player's input.
    fn tick(&mut self, frame: FrameNumber, inputs: &MergedFrame);

    /// Called once per evaluation with the number of frames executed, even
    /// when zero.
    fn on_frames_applied(&mut self, count: u32);

    /// Protocol notification. Ignored by default.
    fn on_notice(&mut self, notice: SyncNotice) {
        let _ = notice;
    }
}
