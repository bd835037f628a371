//! # Network Poller
//!
//! The network side of the engine: one non-blocking step over every peer.
//!
//! ## Design
//!
//! ```text
//!             outbound mailbox
//!                   |
//!                   v
//! poll(now) -> [send frames/control] -> [heartbeats] -> [read datagrams]
//!                                                        [read control ]
//!                                                              |
//!                                                              v
//!                                                       inbound mailbox
//! ```
//!
//! - Each peer owns a [`ReliableChannel`] and a [`ControlLink`] in a
//!   [`PeerTable`] slot
//! - Framing errors drop one datagram and are logged
//! - A fatal transport error removes the peer and reports `Disconnected`
//! - [`PollerHandle::shutdown`] stops polling and joins before the state is
//!   handed back

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use lockstep_shared::{ControlMessage, FrameMessage, PeerId};

use crate::channel::ReliableChannel;
use crate::config::LockstepConfig;
use crate::error::{NetError, TransportError};
use crate::mailbox::{Inbound, Mailboxes, Outbound};
use crate::peers::PeerTable;
use crate::transport::{ControlLink, DatagramSocket};

/// Poll loop statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollerStats {
    /// `poll` calls.
    pub polls: u64,
    /// Frame messages pushed inbound.
    pub frames_in: u64,
    /// Frame messages handed to a channel.
    pub frames_out: u64,
    /// Control messages pushed inbound.
    pub control_in: u64,
    /// Control messages written.
    pub control_out: u64,
    /// Datagrams or payloads dropped as malformed.
    pub framing_errors: u64,
    /// Non-fatal send/receive failures.
    pub transport_errors: u64,
    /// Peers lost to transport failure.
    pub disconnects: u64,
}

struct PeerLink<S, C> {
    channel: ReliableChannel<S>,
    control: C,
}

/// Drives every peer's transports from one thread.
pub struct NetworkPoller<S, C> {
    peers: PeerTable<PeerLink<S, C>>,
    mailboxes: Mailboxes,
    config: LockstepConfig,
    stats: PollerStats,
}

impl<S: DatagramSocket, C: ControlLink> NetworkPoller<S, C> {
    /// Creates a poller feeding `mailboxes`.
    #[must_use]
    pub fn new(config: LockstepConfig, mailboxes: Mailboxes) -> Self {
        Self {
            peers: PeerTable::new(),
            mailboxes,
            config,
            stats: PollerStats::default(),
        }
    }

    /// Registers a connected peer and returns its handle.
    pub fn add_peer(&mut self, socket: S, control: C) -> PeerId {
        let channel = ReliableChannel::new(socket, &self.config);
        let peer = self.peers.insert(PeerLink { channel, control });
        tracing::debug!(%peer, "peer registered");
        peer
    }

    /// Unregisters a peer, returning its transports.
    pub fn remove_peer(&mut self, peer: PeerId) -> Option<(ReliableChannel<S>, C)> {
        self.peers
            .remove(peer)
            .map(|link| (link.channel, link.control))
    }

    /// Performs one non-blocking step over every peer.
    pub fn poll(&mut self, now_ms: u64) {
        self.stats.polls += 1;
        let mut inbound = Vec::new();
        let mut lost = Vec::new();

        for command in self.mailboxes.outbound.drain() {
            match command {
                Outbound::Frame { peer, message } => {
                    self.send_frame(now_ms, peer, &message, &mut lost);
                }
                Outbound::Control { peer, message } => self.send_control(peer, &message, &mut lost),
                Outbound::Disconnect { peer } => {
                    if let Some(mut link) = self.peers.remove(peer) {
                        if let Err(err) = link.control.flush() {
                            tracing::debug!(%peer, %err, "flush on disconnect failed");
                        }
                        tracing::info!(%peer, "peer disconnected locally");
                    }
                }
            }
        }

        let heartbeat_ms = self.config.heartbeat_interval_ms;
        for (peer, link) in self.peers.iter_mut() {
            if lost.contains(&peer) {
                continue;
            }
            if link.channel.heartbeat_due(now_ms, heartbeat_ms) {
                if let Err(err) = link.channel.send_packet(now_ms, None) {
                    if Self::note_error(&mut self.stats, peer, &err) {
                        lost.push(peer);
                        continue;
                    }
                }
            }
            if let Err(err) = link.control.flush() {
                if Self::note_error(&mut self.stats, peer, &err) {
                    lost.push(peer);
                    continue;
                }
            }
            if !Self::read_datagrams(&mut self.stats, peer, link, &mut inbound)
                || !Self::read_control(&mut self.stats, peer, link, &mut inbound)
            {
                lost.push(peer);
            }
        }

        for peer in lost {
            if self.peers.remove(peer).is_some() {
                self.stats.disconnects += 1;
                tracing::warn!(%peer, "peer transport lost");
                inbound.push(Inbound::Disconnected { peer });
            }
        }

        if !inbound.is_empty() {
            self.mailboxes.inbound.push_many(inbound);
        }
    }

    fn send_frame(
        &mut self,
        now_ms: u64,
        peer: PeerId,
        message: &FrameMessage,
        lost: &mut Vec<PeerId>,
    ) {
        let Some(link) = self.peers.get_mut(peer) else {
            tracing::debug!(%peer, frame = message.frame, "frame for unknown peer dropped");
            return;
        };
        let payload = message.encode();
        match link.channel.send_packet(now_ms, Some(payload.as_slice())) {
            Ok(()) => self.stats.frames_out += 1,
            // A non-fatal transport failure leaves the payload in the window.
            Err(err) => {
                if Self::note_error(&mut self.stats, peer, &err) {
                    lost.push(peer);
                }
            }
        }
    }

    fn send_control(&mut self, peer: PeerId, message: &ControlMessage, lost: &mut Vec<PeerId>) {
        let Some(link) = self.peers.get_mut(peer) else {
            tracing::debug!(%peer, ?message, "control message for unknown peer dropped");
            return;
        };
        match link.control.send(message) {
            Ok(()) => self.stats.control_out += 1,
            Err(err) => {
                if Self::note_error(&mut self.stats, peer, &err) {
                    lost.push(peer);
                }
            }
        }
    }

    /// Logs `err`; returns true if the peer is gone.
    fn note_error(stats: &mut PollerStats, peer: PeerId, err: &NetError) -> bool {
        match err {
            NetError::Transport(transport) if transport.is_fatal() => true,
            NetError::Transport(transport) => {
                stats.transport_errors += 1;
                tracing::warn!(%peer, err = %transport, "transport error");
                false
            }
            NetError::Framing(framing) => {
                stats.framing_errors += 1;
                tracing::warn!(%peer, err = %framing, "framing error");
                false
            }
            other => {
                tracing::warn!(%peer, err = %other, "unexpected poll error");
                false
            }
        }
    }

    /// Returns false if the peer's datagram transport failed for good.
    fn read_datagrams(
        stats: &mut PollerStats,
        peer: PeerId,
        link: &mut PeerLink<S, C>,
        inbound: &mut Vec<Inbound>,
    ) -> bool {
        loop {
            match link.channel.receive() {
                Ok(None) => return true,
                Ok(Some(payloads)) => {
                    for payload in payloads {
                        match FrameMessage::decode(&payload) {
                            Ok(message) => {
                                stats.frames_in += 1;
                                inbound.push(Inbound::Frame { peer, message });
                            }
                            Err(err) => {
                                stats.framing_errors += 1;
                                tracing::warn!(%peer, %err, "malformed frame message");
                            }
                        }
                    }
                }
                Err(NetError::Transport(TransportError::Io(err)))
                    if err.kind() == io::ErrorKind::ConnectionRefused =>
                {
                    // ICMP unreachable from a peer that has not bound yet.
                    tracing::trace!(%peer, "datagram refused");
                    return true;
                }
                Err(err) => {
                    if Self::note_error(stats, peer, &err) {
                        return false;
                    }
                    if !matches!(err, NetError::Framing(_)) {
                        return true;
                    }
                }
            }
        }
    }

    /// Returns false if the control stream closed or became unreadable.
    fn read_control(
        stats: &mut PollerStats,
        peer: PeerId,
        link: &mut PeerLink<S, C>,
        inbound: &mut Vec<Inbound>,
    ) -> bool {
        loop {
            match link.control.try_recv() {
                Ok(None) => return true,
                Ok(Some(message)) => {
                    stats.control_in += 1;
                    tracing::trace!(%peer, ?message, "control in");
                    inbound.push(Inbound::Control { peer, message });
                }
                Err(NetError::Framing(err)) => {
                    // A stream cannot resynchronise after a bad frame.
                    stats.framing_errors += 1;
                    tracing::warn!(%peer, %err, "corrupt control stream");
                    return false;
                }
                Err(err) => return !Self::note_error(stats, peer, &err),
            }
        }
    }

    /// The channel for `peer`.
    #[must_use]
    pub fn channel(&self, peer: PeerId) -> Option<&ReliableChannel<S>> {
        self.peers.get(peer).map(|link| &link.channel)
    }

    /// The channel for `peer`, mutably.
    pub fn channel_mut(&mut self, peer: PeerId) -> Option<&mut ReliableChannel<S>> {
        self.peers.get_mut(peer).map(|link| &mut link.channel)
    }

    /// The control link for `peer`, mutably.
    pub fn control_mut(&mut self, peer: PeerId) -> Option<&mut C> {
        self.peers.get_mut(peer).map(|link| &mut link.control)
    }

    /// Handles of every live peer.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerId> {
        self.peers.ids()
    }

    /// Statistics.
    #[must_use]
    pub const fn stats(&self) -> &PollerStats {
        &self.stats
    }

    /// The mailboxes this poller feeds.
    #[must_use]
    pub const fn mailboxes(&self) -> &Mailboxes {
        &self.mailboxes
    }
}

impl<S, C> NetworkPoller<S, C>
where
    S: DatagramSocket + Send + 'static,
    C: ControlLink + Send + 'static,
{
    /// Moves the poller onto its own thread, polling every `interval`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(mut self, interval: Duration) -> io::Result<PollerHandle<S, C>> {
        let (stop_tx, stop_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
        let epoch = Instant::now();
        let thread = thread::Builder::new()
            .name("lockstep-poll".into())
            .spawn(move || {
                tracing::debug!("poll thread started");
                loop {
                    let now_ms = u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
                    self.poll(now_ms);
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("poll thread stopped");
                self
            })?;
        Ok(PollerHandle {
            stop: stop_tx,
            thread: Some(thread),
        })
    }
}

/// Handle to a poller running on its own thread.
pub struct PollerHandle<S, C> {
    stop: Sender<()>,
    thread: Option<JoinHandle<NetworkPoller<S, C>>>,
}

impl<S, C> PollerHandle<S, C> {
    /// Stops polling, waits for the thread and returns the poller.
    ///
    /// Returns `None` if the poll thread panicked.
    pub fn shutdown(mut self) -> Option<NetworkPoller<S, C>> {
        let _ = self.stop.try_send(());
        self.thread.take().and_then(|thread| thread.join().ok())
    }

    /// Returns true while the poll thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl<S, C> Drop for PollerHandle<S, C> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.stop.try_send(());
            let _ = thread.join();
        }
    }
}
