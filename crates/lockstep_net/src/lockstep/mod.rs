//! # Lockstep Coordinator
//!
//! Keeps every peer executing the identical sequence of frames.
//!
//! ## Design
//!
//! ```text
//!            Idle --start_sync--> Synchronizing --RoundStart--> Running
//!                                                               |   ^
//!                                                    straggler  v   | data resumes
//!                                                              Stalled
//!  any state --SessionEnd / transport loss--> Ended
//! ```
//!
//! One coordinator type serves both roles. Per evaluation:
//!
//! 1. Drain the inbound mailbox (frames, control, disconnects)
//! 2. Produce local input up to the allowed lead and send it
//! 3. Authority only: merge every fully-contributed frame, broadcast it,
//!    then check missing players against the stall threshold
//! 4. Work out how many frames the elapsed time calls for, plus at most one
//!    catch-up frame when the backlog is deep
//! 5. Apply ready frames up to that budget and report the count
//!
//! The coordinator never touches a socket; the poller owns those and the
//! two sides meet only at the [`Mailboxes`].

mod host;
mod role;
mod straggler;

pub use host::{EvalReport, SimulationHost, SyncNotice, SyncState};
pub use role::{AuthorityRole, ParticipantRole, Role};
pub use straggler::{PlayerSlot, Recorded, StragglerTracker, MAX_PLAYERS, NEVER};

use std::collections::BTreeSet;

use lockstep_shared::{
    ByteWriter, ControlMessage, EndReason, FrameMessage, FrameNumber, MergedFrame, PeerId, PlayerId,
};

use crate::config::LockstepConfig;
use crate::error::SessionError;
use crate::frame_buffer::FrameBuffer;
use crate::latency::LatencyEstimator;
use crate::mailbox::{Inbound, Mailboxes, Outbound};

/// Coordinator statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// `eval_frame` calls.
    pub evals: u64,
    /// Frames executed.
    pub frames_applied: u64,
    /// Most frames executed by one evaluation.
    pub max_applied_per_eval: u32,
    /// Evaluations that were allowed a catch-up frame.
    pub catch_up_evals: u64,
    /// Local inputs produced.
    pub inputs_sent: u64,
    /// Frames merged (authority only).
    pub frames_merged: u64,
    /// Stalls observed.
    pub stalls: u64,
    /// Resumes observed.
    pub resumes: u64,
}

/// Frame synchronization for one endpoint, in either role.
pub struct LockstepCoordinator {
    config: LockstepConfig,
    mailboxes: Mailboxes,
    role: Role,
    state: SyncState,
    /// Canonical merged frames awaiting execution.
    frames: FrameBuffer,
    input_frame: FrameNumber,
    frame_limit: Option<FrameNumber>,
    accumulated_ms: u64,
    latency: LatencyEstimator,
    effective_delay: u32,
    /// Stalls announced by the authority (participant only).
    remote_stalls: BTreeSet<PlayerId>,
    notices: Vec<SyncNotice>,
    input: ByteWriter,
    stats: CoordinatorStats,
}

impl LockstepCoordinator {
    fn with_role(config: LockstepConfig, mailboxes: Mailboxes, role: Role) -> Self {
        Self {
            frames: FrameBuffer::new(config.frame_buffer_initial, config.frame_buffer_warn),
            latency: LatencyEstimator::new(config.latency_samples),
            effective_delay: config.max_delay_frames,
            config,
            mailboxes,
            role,
            state: SyncState::Idle,
            input_frame: 0,
            frame_limit: None,
            accumulated_ms: 0,
            remote_stalls: BTreeSet::new(),
            notices: Vec::new(),
            input: ByteWriter::with_capacity(256),
            stats: CoordinatorStats::default(),
        }
    }

    /// Creates the authority. Its own player is [`PlayerId::AUTHORITY`].
    #[must_use]
    pub fn authority(config: LockstepConfig, mailboxes: Mailboxes) -> Self {
        let mut tracker = StragglerTracker::new(
            config.max_wait_diff_frames,
            config.frame_buffer_initial,
            config.frame_buffer_warn,
        );
        let added = tracker.add(PlayerId::AUTHORITY, None);
        debug_assert!(added.is_ok());
        let role = Role::Authority(AuthorityRole {
            tracker,
            next_player: PlayerId::AUTHORITY.0 + 1,
        });
        Self::with_role(config, mailboxes, role)
    }

    /// Creates a participant talking to the authority on `authority`.
    #[must_use]
    pub fn participant(config: LockstepConfig, mailboxes: Mailboxes, authority: PeerId) -> Self {
        let role = Role::Participant(ParticipantRole {
            authority,
            local_player: None,
            ready_sent: false,
            next_ping_ms: 0,
        });
        Self::with_role(config, mailboxes, role)
    }

    // ------------------------------------------------------------------
    // Session membership
    // ------------------------------------------------------------------

    /// Gives the participant on `peer` a player number and welcomes it.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotAuthority`] on a participant
    /// - [`SessionError::InProgress`] once the round has started
    /// - [`SessionError::Full`] / [`SessionError::AlreadyJoined`]
    pub fn add_participant(&mut self, peer: PeerId) -> Result<PlayerId, SessionError> {
        if !matches!(self.state, SyncState::Idle | SyncState::Synchronizing) {
            return Err(SessionError::InProgress);
        }
        let Role::Authority(authority) = &mut self.role else {
            return Err(SessionError::NotAuthority);
        };
        let player = PlayerId(authority.next_player);
        authority.tracker.add(player, Some(peer))?;
        authority.next_player += 1;

        tracing::info!(%peer, %player, "participant joined");
        self.send_control(peer, ControlMessage::Welcome { player });
        Ok(player)
    }

    /// Removes the participant on `peer` and tells everyone else.
    ///
    /// Returns the removed player, or `None` if `peer` held no slot.
    pub fn remove_participant(&mut self, peer: PeerId) -> Option<PlayerId> {
        let Role::Authority(authority) = &mut self.role else {
            return None;
        };
        let slot = authority.tracker.remove_peer(peer)?;
        let still_stalled = authority.tracker.any_stalled();
        let player = slot.player;

        tracing::info!(%peer, %player, "participant left");
        self.broadcast(&ControlMessage::PlayerLeft { player });
        self.mailboxes.outbound.push(Outbound::Disconnect { peer });
        self.notices.push(SyncNotice::PlayerLeft { player });
        if self.state == SyncState::Stalled && !still_stalled {
            self.state = SyncState::Running;
        }
        Some(player)
    }

    /// Enters `Synchronizing`, re-arming the latency samples.
    pub fn start_sync(&mut self, now_ms: u64) {
        if !matches!(self.state, SyncState::Idle | SyncState::Synchronizing) {
            tracing::warn!(state = ?self.state, "start_sync outside of setup ignored");
            return;
        }
        self.latency.reset();
        if let Role::Participant(participant) = &mut self.role {
            participant.ready_sent = false;
            participant.next_ping_ms = now_ms;
        }
        self.state = SyncState::Synchronizing;
        tracing::info!(authority = self.role.is_authority(), "synchronization started");
    }

    /// Ends the session for every peer.
    pub fn end_session(&mut self, reason: EndReason) {
        if self.state == SyncState::Ended {
            return;
        }
        self.broadcast(&ControlMessage::SessionEnd { reason });
        self.finish(reason);
    }

    /// Leaves the session gracefully (participant only); the rest play on.
    pub fn leave(&mut self) {
        let Role::Participant(participant) = &self.role else {
            return;
        };
        if self.state == SyncState::Ended {
            return;
        }
        let authority = participant.authority;
        self.send_control(authority, ControlMessage::Leave);
        self.mailboxes.outbound.push(Outbound::Disconnect { peer: authority });
        self.finish(EndReason::Requested);
    }

    /// Stops producing input and executing frames after `limit`.
    pub fn set_frame_limit(&mut self, limit: Option<FrameNumber>) {
        self.frame_limit = limit;
    }

    // ------------------------------------------------------------------
    // Per-tick evaluation
    // ------------------------------------------------------------------

    /// Runs one simulation tick's worth of protocol work.
    ///
    /// `elapsed_ms` is the real time since the previous call. The host's
    /// `on_frames_applied` is called exactly once, with zero when nothing
    /// ran.
    pub fn eval_frame<H>(&mut self, now_ms: u64, elapsed_ms: u64, host: &mut H) -> EvalReport
    where
        H: SimulationHost + ?Sized,
    {
        self.stats.evals += 1;
        self.process_inbound(now_ms);

        let mut update_frames = 0;
        let mut catch_up = false;
        let mut applied = 0;
        match self.state {
            SyncState::Synchronizing => self.synchronize(now_ms),
            SyncState::Running | SyncState::Stalled => {
                update_frames = self.take_update_frames(elapsed_ms);
                self.send_frame_data(update_frames, host);
                if self.role.is_authority() && self.state != SyncState::Ended {
                    self.merge_and_broadcast();
                    self.check_stalls();
                }
                if self.state != SyncState::Ended {
                    (applied, catch_up) = self.apply_frames(update_frames, host);
                }
            }
            SyncState::Idle | SyncState::Ended => {}
        }

        for notice in self.notices.drain(..) {
            host.on_notice(notice);
        }
        host.on_frames_applied(applied);

        EvalReport {
            applied,
            update_frames,
            catch_up,
            state: self.state,
            current_frame: self.current_frame(),
            input_frame: self.input_frame,
        }
    }

    /// Whole ticks in the accumulated time; only the remainder carries over.
    fn take_update_frames(&mut self, elapsed_ms: u64) -> u32 {
        let tick = u64::from(self.config.tick_time_ms);
        self.accumulated_ms += elapsed_ms;
        let frames = self.accumulated_ms / tick;
        self.accumulated_ms %= tick;
        u32::try_from(frames).unwrap_or(u32::MAX)
    }

    /// Produces local input for the frames now due, within the input lead.
    ///
    /// An input too large for one datagram ends the session.
    fn send_frame_data<H>(&mut self, due: u32, host: &mut H)
    where
        H: SimulationHost + ?Sized,
    {
        let current = self.current_frame();
        let mut cap = current.saturating_add(self.config.input_lead_frames());
        if let Some(limit) = self.frame_limit {
            cap = cap.min(limit);
        }
        let prefill = current.saturating_add(self.effective_delay);
        let target = self.input_frame.saturating_add(due).max(prefill).min(cap);

        let limit = self.config.max_frame_payload_bytes();
        let mut outgoing = Vec::new();
        let mut oversized = None;
        while self.input_frame < target {
            let frame = self.input_frame + 1;
            self.input.clear();
            host.write_input(frame, &mut self.input);
            if self.input.len() > limit {
                oversized = Some((frame, self.input.len()));
                break;
            }
            let snapshot = self.input.as_slice().to_vec();
            self.input_frame = frame;
            self.stats.inputs_sent += 1;

            match &mut self.role {
                Role::Authority(authority) => {
                    authority.tracker.record(None, frame, snapshot);
                }
                Role::Participant(participant) => outgoing.push(Outbound::Frame {
                    peer: participant.authority,
                    message: FrameMessage::new(frame, snapshot),
                }),
            }
        }
        if !outgoing.is_empty() {
            self.mailboxes.outbound.push_many(outgoing);
        }
        if let Some((frame, len)) = oversized {
            tracing::error!(frame, len, limit, "local input exceeds the datagram budget");
            self.abort_oversized();
        }
    }

    /// Ends the session everywhere after a payload outgrew the channel.
    fn abort_oversized(&mut self) {
        let reason = EndReason::PayloadTooLarge;
        match self.role.authority_peer() {
            None => self.end_session(reason),
            Some(authority) => {
                self.send_control(authority, ControlMessage::SessionEnd { reason });
                self.finish(reason);
            }
        }
    }

    /// Authority: turns complete rounds into canonical frames.
    ///
    /// A merged frame that cannot reach every participant is never executed
    /// locally; the session ends instead.
    fn merge_and_broadcast(&mut self) {
        let merged = self.role.merge_contributions();
        if merged.is_empty() {
            return;
        }
        let limit = self.config.max_frame_payload_bytes();
        let peers = self.remote_peers();
        let mut outgoing = Vec::with_capacity(merged.len() * peers.len());
        let mut last_sent = None;
        let mut failed = false;
        for (frame, inputs) in merged {
            let bytes = match inputs.encode() {
                Ok(bytes) if bytes.len() <= limit => bytes,
                Ok(bytes) => {
                    tracing::error!(
                        frame,
                        len = bytes.len(),
                        limit,
                        "merged frame exceeds the datagram budget"
                    );
                    failed = true;
                    break;
                }
                Err(err) => {
                    tracing::error!(frame, %err, "merged frame cannot be encoded");
                    failed = true;
                    break;
                }
            };
            for &peer in &peers {
                outgoing.push(Outbound::Frame {
                    peer,
                    message: FrameMessage::new(frame, bytes.clone()),
                });
            }
            self.frames.add_frame_data(frame, bytes);
            self.stats.frames_merged += 1;
            last_sent = Some(frame);
        }
        self.mailboxes.outbound.push_many(outgoing);
        if let (Some(frame), Role::Authority(authority)) = (last_sent, &mut self.role) {
            authority.tracker.mark_sent(frame);
        }
        if failed {
            self.abort_oversized();
        }
    }

    /// Authority: declares players stalled once they trail too far.
    fn check_stalls(&mut self) {
        let frame = self.current_frame();
        let Role::Authority(authority) = &mut self.role else {
            return;
        };
        let newly_stalled = authority.tracker.check_stalls(self.input_frame);
        let any_stalled = authority.tracker.any_stalled();

        for player in newly_stalled {
            tracing::info!(%player, frame, input_frame = self.input_frame, "player stalled");
            self.stats.stalls += 1;
            self.broadcast(&ControlMessage::Stalled { player, frame });
            self.notices.push(SyncNotice::Stalled { player, frame });
        }
        if any_stalled && self.state == SyncState::Running {
            self.state = SyncState::Stalled;
        }
    }

    /// Executes ready frames; returns the count and whether catch-up applied.
    fn apply_frames<H>(&mut self, update_frames: u32, host: &mut H) -> (u32, bool)
    where
        H: SimulationHost + ?Sized,
    {
        let catch_up = self.frames.backlog() > self.effective_delay.saturating_add(update_frames);
        let budget = update_frames.saturating_add(u32::from(catch_up));

        let mut applied = 0;
        while applied < budget && self.frames.is_ready() {
            let frame = self.frames.current_frame() + 1;
            if self.frame_limit.is_some_and(|limit| frame > limit) {
                break;
            }
            let decoded = self
                .frames
                .begin_frame()
                .first()
                .map(|record| MergedFrame::decode(&record.payload));
            let inputs = match decoded {
                Some(Ok(inputs)) => inputs,
                Some(Err(err)) => {
                    tracing::error!(frame, %err, "undecodable merged frame executed empty");
                    MergedFrame::new()
                }
                None => break,
            };
            host.tick(frame, &inputs);
            self.frames.end_frame();
            applied += 1;
        }

        self.stats.frames_applied += u64::from(applied);
        self.stats.max_applied_per_eval = self.stats.max_applied_per_eval.max(applied);
        if catch_up {
            self.stats.catch_up_evals += 1;
        }
        (applied, catch_up)
    }

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    fn synchronize(&mut self, now_ms: u64) {
        match &mut self.role {
            Role::Authority(authority) => {
                if !authority.tracker.all_ready() {
                    return;
                }
                self.effective_delay = self
                    .config
                    .effective_delay_frames(authority.tracker.max_latency_ms());
                let players = authority.tracker.players();
                let start_frame = self.frames.current_frame();
                self.broadcast(&ControlMessage::RoundStart {
                    start_frame,
                    players: players.clone(),
                });
                self.begin_round(players);
            }
            Role::Participant(participant) => {
                if participant.ready_sent {
                    return;
                }
                let authority = participant.authority;
                if self.latency.is_full() {
                    participant.ready_sent = true;
                    let latency_ms = self.latency.mean_latency_ms().unwrap_or(0);
                    tracing::info!(latency_ms, "latency measured; ready");
                    self.send_control(authority, ControlMessage::Ready { latency_ms });
                } else if !self.latency.awaiting_reply() && now_ms >= participant.next_ping_ms {
                    participant.next_ping_ms = now_ms + self.config.ping_interval_ms;
                    self.latency.mark_request(now_ms);
                    self.send_control(authority, ControlMessage::Ping { stamp_ms: now_ms });
                }
            }
        }
    }

    fn begin_round(&mut self, players: Vec<PlayerId>) {
        if let Role::Participant(_) = self.role {
            self.effective_delay = self
                .config
                .effective_delay_frames(self.latency.mean_latency_ms());
        }
        self.state = SyncState::Running;
        self.accumulated_ms = 0;
        tracing::info!(
            players = players.len(),
            delay_frames = self.effective_delay,
            start_frame = self.frames.current_frame(),
            "round started"
        );
        self.notices.push(SyncNotice::RoundStarted { players });
    }

    fn finish(&mut self, reason: EndReason) {
        self.state = SyncState::Ended;
        tracing::info!(?reason, frame = self.current_frame(), "session ended");
        self.notices.push(SyncNotice::SessionEnded { reason });
    }

    // ------------------------------------------------------------------
    // Inbound handling
    // ------------------------------------------------------------------

    fn process_inbound(&mut self, now_ms: u64) {
        for event in self.mailboxes.inbound.drain() {
            match event {
                Inbound::Frame { peer, message } => self.on_frame(peer, message),
                Inbound::Control { peer, message } => self.on_control(now_ms, peer, message),
                Inbound::Disconnected { peer } => self.on_disconnected(peer),
            }
        }
    }

    fn on_frame(&mut self, peer: PeerId, message: FrameMessage) {
        let frame = message.frame;
        match &mut self.role {
            Role::Authority(authority) => {
                match authority.tracker.record(Some(peer), frame, message.snapshot) {
                    Recorded::Queued => {}
                    Recorded::Resumed => {
                        let player = authority.tracker.player_for(peer);
                        let any_stalled = authority.tracker.any_stalled();
                        if let Some(player) = player {
                            self.on_resumed(player, any_stalled);
                        }
                    }
                    Recorded::Dropped => tracing::debug!(%peer, frame, "contribution dropped"),
                }
            }
            Role::Participant(participant) => {
                if peer != participant.authority {
                    tracing::warn!(%peer, frame, "frame from a non-authority peer ignored");
                    return;
                }
                if let Err(err) = MergedFrame::decode(&message.snapshot) {
                    tracing::warn!(frame, %err, "malformed merged frame dropped");
                    return;
                }
                self.frames.add_frame_data(frame, message.snapshot);
            }
        }
    }

    fn on_resumed(&mut self, player: PlayerId, any_stalled: bool) {
        let frame = self.current_frame();
        tracing::info!(%player, frame, "player resumed");
        self.stats.resumes += 1;
        self.broadcast(&ControlMessage::Resumed { player, frame });
        self.notices.push(SyncNotice::Resumed { player, frame });
        if !any_stalled && self.state == SyncState::Stalled {
            self.state = SyncState::Running;
        }
    }

    fn on_control(&mut self, now_ms: u64, peer: PeerId, message: ControlMessage) {
        if self.role.is_authority() {
            self.on_authority_control(peer, message);
        } else {
            self.on_participant_control(now_ms, peer, message);
        }
    }

    fn on_authority_control(&mut self, peer: PeerId, message: ControlMessage) {
        match message {
            ControlMessage::Ping { stamp_ms } => {
                self.send_control(peer, ControlMessage::Pong { stamp_ms });
            }
            ControlMessage::Ready { latency_ms } => {
                if let Role::Authority(authority) = &mut self.role {
                    match authority.tracker.mark_ready(peer, latency_ms) {
                        Some(player) => tracing::info!(%player, latency_ms, "participant ready"),
                        None => tracing::warn!(%peer, "ready from unknown peer"),
                    }
                }
            }
            ControlMessage::Leave => {
                self.remove_participant(peer);
            }
            ControlMessage::SessionEnd { reason } => {
                tracing::info!(%peer, ?reason, "participant ended the session");
                self.end_session(reason);
            }
            other => tracing::warn!(%peer, message = ?other, "unexpected control message"),
        }
    }

    fn on_participant_control(&mut self, now_ms: u64, peer: PeerId, message: ControlMessage) {
        let Role::Participant(participant) = &mut self.role else {
            return;
        };
        if peer != participant.authority {
            tracing::warn!(%peer, ?message, "control from a non-authority peer ignored");
            return;
        }
        match message {
            ControlMessage::Welcome { player } => {
                tracing::info!(%player, "welcomed");
                participant.local_player = Some(player);
            }
            ControlMessage::Pong { stamp_ms } => {
                if self.latency.mark_reply(now_ms) {
                    tracing::trace!(stamp_ms, now_ms, "latency sample");
                }
            }
            ControlMessage::RoundStart { start_frame, players } => {
                if !matches!(self.state, SyncState::Idle | SyncState::Synchronizing) {
                    tracing::warn!(state = ?self.state, "round start outside of setup ignored");
                    return;
                }
                if start_frame != self.frames.current_frame() {
                    tracing::warn!(
                        start_frame,
                        local = self.frames.current_frame(),
                        "round start frame mismatch"
                    );
                }
                self.begin_round(players);
            }
            ControlMessage::Stalled { player, frame } => {
                tracing::info!(%player, frame, "authority reports stall");
                self.remote_stalls.insert(player);
                self.stats.stalls += 1;
                if self.state == SyncState::Running {
                    self.state = SyncState::Stalled;
                }
                self.notices.push(SyncNotice::Stalled { player, frame });
            }
            ControlMessage::Resumed { player, frame } => {
                tracing::info!(%player, frame, "authority reports resume");
                self.remote_stalls.remove(&player);
                self.stats.resumes += 1;
                self.clear_remote_stall();
                self.notices.push(SyncNotice::Resumed { player, frame });
            }
            ControlMessage::PlayerLeft { player } => {
                tracing::info!(%player, "player left");
                self.remote_stalls.remove(&player);
                self.clear_remote_stall();
                self.notices.push(SyncNotice::PlayerLeft { player });
            }
            ControlMessage::SessionEnd { reason } => {
                if self.state != SyncState::Ended {
                    self.finish(reason);
                }
            }
            other => tracing::warn!(%peer, message = ?other, "unexpected control message"),
        }
    }

    fn clear_remote_stall(&mut self) {
        if self.remote_stalls.is_empty() && self.state == SyncState::Stalled {
            self.state = SyncState::Running;
        }
    }

    fn on_disconnected(&mut self, peer: PeerId) {
        if self.state == SyncState::Ended {
            return;
        }
        match &mut self.role {
            Role::Authority(authority) => {
                let Some(slot) = authority.tracker.remove_peer(peer) else {
                    return;
                };
                tracing::warn!(%peer, player = %slot.player, "participant transport lost");
                self.end_session(EndReason::TransportFailure);
            }
            Role::Participant(participant) => {
                if peer == participant.authority {
                    tracing::warn!(%peer, "authority transport lost");
                    self.finish(EndReason::AuthorityLost);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Outbound helpers
    // ------------------------------------------------------------------

    fn send_control(&self, peer: PeerId, message: ControlMessage) {
        self.mailboxes.outbound.push(Outbound::Control { peer, message });
    }

    /// Sends `message` to every remote peer.
    fn broadcast(&self, message: &ControlMessage) {
        let commands: Vec<_> = self
            .remote_peers()
            .into_iter()
            .map(|peer| Outbound::Control {
                peer,
                message: message.clone(),
            })
            .collect();
        self.mailboxes.outbound.push_many(commands);
    }

    fn remote_peers(&self) -> Vec<PeerId> {
        match &self.role {
            Role::Authority(authority) => authority.tracker.peers().collect(),
            Role::Participant(participant) => vec![participant.authority],
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Current state.
    #[must_use]
    #[inline]
    pub const fn state(&self) -> SyncState {
        self.state
    }

    /// Last frame executed.
    #[must_use]
    #[inline]
    pub const fn current_frame(&self) -> FrameNumber {
        self.frames.current_frame()
    }

    /// Last frame local input was produced for.
    #[must_use]
    #[inline]
    pub const fn input_frame(&self) -> FrameNumber {
        self.input_frame
    }

    /// Players currently holding the session back, ascending.
    #[must_use]
    pub fn stalled_players(&self) -> Vec<PlayerId> {
        match &self.role {
            Role::Authority(authority) => authority.tracker.stalled_players(),
            Role::Participant(_) => self.remote_stalls.iter().copied().collect(),
        }
    }

    /// Latency samples gathered while synchronizing.
    #[must_use]
    pub const fn latency(&self) -> &LatencyEstimator {
        &self.latency
    }

    /// This endpoint's player, once known.
    #[must_use]
    pub fn local_player(&self) -> Option<PlayerId> {
        self.role.local_player()
    }

    /// Returns true for the authority.
    #[must_use]
    pub const fn is_authority(&self) -> bool {
        self.role.is_authority()
    }

    /// Every player in the session (authority only; empty otherwise).
    #[must_use]
    pub fn players(&self) -> Vec<PlayerId> {
        match &self.role {
            Role::Authority(authority) => authority.tracker.players(),
            Role::Participant(_) => Vec::new(),
        }
    }

    /// Role-specific state.
    #[must_use]
    pub const fn role(&self) -> &Role {
        &self.role
    }

    /// Delay frames in force for this round.
    #[must_use]
    #[inline]
    pub const fn effective_delay_frames(&self) -> u32 {
        self.effective_delay
    }

    /// Merged frames received but not executed.
    #[must_use]
    pub const fn backlog(&self) -> u32 {
        self.frames.backlog()
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &LockstepConfig {
        &self.config
    }

    /// The mailboxes shared with the poller.
    #[must_use]
    pub const fn mailboxes(&self) -> &Mailboxes {
        &self.mailboxes
    }

    /// Statistics.
    #[must_use]
    pub const fn stats(&self) -> &CoordinatorStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingHost {
        ticks: Vec<(FrameNumber, MergedFrame)>,
        applied: Vec<u32>,
        notices: Vec<SyncNotice>,
        pad: usize,
    }

    impl SimulationHost for RecordingHost {
        fn write_input(&mut self, frame: FrameNumber, writer: &mut ByteWriter) {
            writer.write_u32(frame);
            writer.write_bytes(&vec![0xAB; self.pad]);
        }

        fn tick(&mut self, frame: FrameNumber, inputs: &MergedFrame) {
            self.ticks.push((frame, inputs.clone()));
        }

        fn on_frames_applied(&mut self, count: u32) {
            self.applied.push(count);
        }

        fn on_notice(&mut self, notice: SyncNotice) {
            self.notices.push(notice);
        }
    }

    fn outbound(coordinator: &LockstepCoordinator) -> Vec<Outbound> {
        coordinator.mailboxes().outbound.drain().into_iter().collect()
    }

    #[test]
    fn test_solo_authority_runs_at_tick_rate() {
        let mut authority =
            LockstepCoordinator::authority(LockstepConfig::default(), Mailboxes::new());
        let mut host = RecordingHost::default();
        authority.start_sync(0);

        let report = authority.eval_frame(0, 0, &mut host);
        assert_eq!(report.state, SyncState::Running);
        assert_eq!(
            host.notices,
            vec![SyncNotice::RoundStarted {
                players: vec![PlayerId::AUTHORITY]
            }]
        );

        for i in 1..=10 {
            let report = authority.eval_frame(i * 50, 50, &mut host);
            assert!(report.applied <= 2);
        }
        assert_eq!(authority.current_frame(), 10);
        let frames: Vec<_> = host.ticks.iter().map(|(f, _)| *f).collect();
        assert_eq!(frames, (1..=10).collect::<Vec<_>>());
        assert_eq!(host.ticks[0].1.get(PlayerId::AUTHORITY), Some(&1u32.to_be_bytes()[..]));
        // on_frames_applied is reported every evaluation, including zero.
        assert_eq!(host.applied.len(), 11);
    }

    #[test]
    fn test_partial_tick_time_carries_over() {
        let mut authority =
            LockstepCoordinator::authority(LockstepConfig::default(), Mailboxes::new());
        let mut host = RecordingHost::default();
        authority.start_sync(0);
        authority.eval_frame(0, 0, &mut host);

        assert_eq!(authority.eval_frame(30, 30, &mut host).update_frames, 0);
        assert_eq!(authority.eval_frame(60, 30, &mut host).update_frames, 1);
        assert_eq!(authority.current_frame(), 1);
    }

    #[test]
    fn test_add_participant_sends_welcome() {
        let mut authority =
            LockstepCoordinator::authority(LockstepConfig::default(), Mailboxes::new());
        let player = authority.add_participant(PeerId(3)).unwrap();
        assert_eq!(player, PlayerId(1));
        assert_eq!(
            outbound(&authority),
            vec![Outbound::Control {
                peer: PeerId(3),
                message: ControlMessage::Welcome { player },
            }]
        );
        assert_eq!(authority.players(), vec![PlayerId::AUTHORITY, player]);
    }

    #[test]
    fn test_participant_cannot_add_players() {
        let mut participant = LockstepCoordinator::participant(
            LockstepConfig::default(),
            Mailboxes::new(),
            PeerId(0),
        );
        assert_eq!(participant.add_participant(PeerId(1)), Err(SessionError::NotAuthority));
    }

    #[test]
    fn test_participant_pings_until_ready() {
        let config = LockstepConfig {
            latency_samples: 2,
            ..LockstepConfig::default()
        };
        let authority_peer = PeerId(0);
        let mut participant =
            LockstepCoordinator::participant(config, Mailboxes::new(), authority_peer);
        let mut host = RecordingHost::default();
        participant.start_sync(0);

        let mut now = 0;
        let mut ready = None;
        for _ in 0..10 {
            participant.eval_frame(now, 50, &mut host);
            for command in outbound(&participant) {
                match command {
                    Outbound::Control {
                        message: ControlMessage::Ping { stamp_ms },
                        ..
                    } => participant.mailboxes().inbound.push(Inbound::Control {
                        peer: authority_peer,
                        message: ControlMessage::Pong { stamp_ms },
                    }),
                    Outbound::Control {
                        message: ControlMessage::Ready { latency_ms },
                        ..
                    } => ready = Some(latency_ms),
                    other => panic!("unexpected {other:?}"),
                }
            }
            now += 40;
        }
        // Each pong is read one evaluation (40ms) later: 20ms half round trip.
        assert_eq!(ready, Some(20));
        assert_eq!(participant.latency().sample_count(), 2);
        assert_eq!(participant.state(), SyncState::Synchronizing);
    }

    #[test]
    fn test_authority_disconnect_ends_participant() {
        let mut participant = LockstepCoordinator::participant(
            LockstepConfig::default(),
            Mailboxes::new(),
            PeerId(0),
        );
        let mut host = RecordingHost::default();
        participant.mailboxes().inbound.push(Inbound::Disconnected { peer: PeerId(0) });
        let report = participant.eval_frame(0, 0, &mut host);
        assert_eq!(report.state, SyncState::Ended);
        assert_eq!(
            host.notices,
            vec![SyncNotice::SessionEnded {
                reason: EndReason::AuthorityLost
            }]
        );
    }

    #[test]
    fn test_frame_limit_stops_execution() {
        let mut authority =
            LockstepCoordinator::authority(LockstepConfig::default(), Mailboxes::new());
        let mut host = RecordingHost::default();
        authority.set_frame_limit(Some(3));
        authority.start_sync(0);
        for i in 0..20 {
            authority.eval_frame(i * 50, 50, &mut host);
        }
        assert_eq!(authority.current_frame(), 3);
        assert_eq!(authority.input_frame(), 3);
    }

    fn small_datagrams() -> LockstepConfig {
        LockstepConfig {
            max_datagram_bytes: 300,
            ..LockstepConfig::default()
        }
    }

    #[test]
    fn test_oversized_authority_input_ends_session() {
        let mut authority = LockstepCoordinator::authority(small_datagrams(), Mailboxes::new());
        let mut host = RecordingHost {
            pad: 400,
            ..RecordingHost::default()
        };
        authority.start_sync(0);
        authority.eval_frame(0, 0, &mut host);
        authority.eval_frame(50, 50, &mut host);

        assert_eq!(authority.state(), SyncState::Ended);
        assert_eq!(authority.current_frame(), 0);
        assert!(host.ticks.is_empty());
        assert!(host.notices.contains(&SyncNotice::SessionEnded {
            reason: EndReason::PayloadTooLarge
        }));
    }

    #[test]
    fn test_oversized_participant_input_ends_session() {
        let authority = PeerId(0);
        let mut participant =
            LockstepCoordinator::participant(small_datagrams(), Mailboxes::new(), authority);
        let mut host = RecordingHost {
            pad: 400,
            ..RecordingHost::default()
        };
        participant.start_sync(0);
        participant.mailboxes().inbound.push_many([
            Inbound::Control {
                peer: authority,
                message: ControlMessage::Welcome { player: PlayerId(1) },
            },
            Inbound::Control {
                peer: authority,
                message: ControlMessage::RoundStart {
                    start_frame: 0,
                    players: vec![PlayerId::AUTHORITY, PlayerId(1)],
                },
            },
        ]);
        participant.eval_frame(0, 0, &mut host);
        let report = participant.eval_frame(50, 50, &mut host);

        assert_eq!(report.state, SyncState::Ended);
        let sent = outbound(&participant);
        assert!(!sent.iter().any(|command| matches!(command, Outbound::Frame { .. })));
        assert!(sent.contains(&Outbound::Control {
            peer: authority,
            message: ControlMessage::SessionEnd {
                reason: EndReason::PayloadTooLarge
            },
        }));
    }
}
