//! # Reliable Channel
//!
//! Partially-reliable delivery on top of an unreliable datagram socket.
//!
//! ## Design
//!
//! ```text
//! send_packet(payload)                      read_packet(datagram)
//!   |                                          |
//!   v                                          v
//! [window: seq 7 | seq 8 | seq 9]   ->   accept seq > incoming_ack
//!   ^                                          |
//!   |          header.incoming_ack             |
//!   +-------- prune <= ack  <------------------+
//! ```
//!
//! - Every reliable payload gets the next sequence number and stays in the
//!   window until the peer's acknowledgement passes it
//! - While anything is unacknowledged, every packet carries the whole
//!   window, oldest first; otherwise it is a bare heartbeat header
//! - Duplicates and old chunks are filtered on receipt, so the application
//!   sees each payload exactly once, in sequence order
//! - A socket failure never touches sequence state; a framing error drops
//!   the datagram and leaves the channel usable

mod window;

pub use window::RetransmitWindow;

use std::io;

use lockstep_shared::{
    encode_packet, ByteWriter, Chunk, ChunkHeader, FramingError, FramingResult, Packet,
    PacketHeader,
};

use crate::config::LockstepConfig;
use crate::error::{NetResult, TransportError};
use crate::transport::DatagramSocket;

/// Channel statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Packets handed to the socket.
    pub packets_sent: u64,
    /// Of which heartbeats.
    pub heartbeats_sent: u64,
    /// Datagrams parsed successfully.
    pub packets_received: u64,
    /// Reliable payloads enqueued.
    pub reliable_enqueued: u64,
    /// Reliable payloads delivered to the application.
    pub reliable_delivered: u64,
    /// Chunk bytes sent more than once.
    pub retransmitted_bytes: u64,
    /// Chunks dropped as already seen.
    pub duplicates_dropped: u64,
    /// Datagrams dropped as malformed.
    pub framing_errors: u64,
}

/// One peer's partially-reliable channel.
pub struct ReliableChannel<S> {
    socket: S,
    window: RetransmitWindow,
    /// Sequence of the newest reliable payload enqueued.
    outgoing_sequence: u32,
    /// Sequence the peer must acknowledge before the window is empty.
    outgoing_ack: u32,
    /// Highest sequence the peer has acknowledged.
    outgoing_reliable_floor: u32,
    /// Highest incoming sequence accepted.
    incoming_ack: u32,
    /// Highest sequence ever put on the wire.
    highest_sent: u32,
    last_send_ms: Option<u64>,
    max_datagram_bytes: usize,
    send_retry_budget: u32,
    send_buf: ByteWriter,
    recv_buf: Vec<u8>,
    stats: ChannelStats,
}

impl<S: DatagramSocket> ReliableChannel<S> {
    /// Wraps `socket` with the window sizing from `config`.
    #[must_use]
    pub fn new(socket: S, config: &LockstepConfig) -> Self {
        Self {
            socket,
            window: RetransmitWindow::new(
                config.window_initial_bytes,
                config.window_growth_bytes,
                config.window_warn_bytes,
            ),
            outgoing_sequence: 0,
            outgoing_ack: 0,
            outgoing_reliable_floor: 0,
            incoming_ack: 0,
            highest_sent: 0,
            last_send_ms: None,
            max_datagram_bytes: config.max_datagram_bytes,
            send_retry_budget: config.send_retry_budget,
            send_buf: ByteWriter::with_capacity(config.max_datagram_bytes.min(64 * 1024)),
            recv_buf: vec![0u8; config.max_datagram_bytes],
            stats: ChannelStats::default(),
        }
    }

    /// Sends one packet, optionally enqueuing a new reliable payload first.
    ///
    /// The payload is in the window before the socket is touched, so a
    /// failed send loses nothing: the next call carries it again.
    ///
    /// # Errors
    ///
    /// - [`FramingError::TooLarge`] if `reliable` cannot fit in one datagram
    ///   (nothing is enqueued)
    /// - [`TransportError::SendBufferFull`] if the socket stayed full for the
    ///   whole retry budget
    /// - any other socket failure
    pub fn send_packet(&mut self, now_ms: u64, reliable: Option<&[u8]>) -> NetResult<()> {
        if let Some(payload) = reliable {
            let framed = PacketHeader::SIZE + ChunkHeader::SIZE + payload.len();
            if framed > self.max_datagram_bytes {
                return Err(FramingError::TooLarge(payload.len()).into());
            }
            self.outgoing_sequence = self.outgoing_sequence.wrapping_add(1);
            self.window.push(self.outgoing_sequence, payload);
            self.outgoing_ack = self.outgoing_sequence;
            self.stats.reliable_enqueued += 1;
        }

        self.send_buf.clear();
        let heartbeat = !self.has_unacked();
        if heartbeat {
            PacketHeader::new(self.incoming_ack, self.outgoing_sequence, 0)
                .encode(&mut self.send_buf);
        } else {
            let (count, retransmitted, newest) = self.window_prefix();
            let chunks = self
                .window
                .iter()
                .take(count)
                .map(|(sequence, payload)| Chunk { sequence, payload });
            encode_packet(&mut self.send_buf, self.incoming_ack, newest, chunks)?;
            self.stats.retransmitted_bytes += retransmitted as u64;
            self.highest_sent = self.highest_sent.max(newest);
        }

        self.transmit()?;
        self.stats.packets_sent += 1;
        if heartbeat {
            self.stats.heartbeats_sent += 1;
        }
        self.last_send_ms = Some(now_ms);
        Ok(())
    }

    /// Window entries that fit one datagram: `(count, resent bytes, newest sequence)`.
    fn window_prefix(&self) -> (usize, usize, u32) {
        let mut size = PacketHeader::SIZE;
        let mut count = 0;
        let mut retransmitted = 0;
        let mut newest = self.outgoing_reliable_floor;
        for (sequence, payload) in self.window.iter() {
            size += ChunkHeader::SIZE + payload.len();
            if size > self.max_datagram_bytes {
                break;
            }
            if sequence <= self.highest_sent {
                retransmitted += payload.len();
            }
            newest = sequence;
            count += 1;
        }
        (count, retransmitted, newest)
    }

    fn transmit(&mut self) -> Result<(), TransportError> {
        let datagram = self.send_buf.as_slice();
        for _ in 0..self.send_retry_budget {
            match self.socket.send(datagram) {
                Ok(sent) if sent == datagram.len() => return Ok(()),
                Ok(sent) => {
                    return Err(TransportError::ShortSend {
                        sent,
                        expected: datagram.len(),
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
        Err(TransportError::SendBufferFull {
            attempts: self.send_retry_budget,
        })
    }

    /// Parses one received datagram.
    ///
    /// Returns the newly accepted reliable payloads in sequence order; an
    /// empty vector for heartbeats and duplicates. The peer's acknowledgement
    /// in the header prunes the window.
    ///
    /// # Errors
    ///
    /// Any [`FramingError`]. Every chunk is validated before any state
    /// changes, so a malformed datagram has no effect.
    pub fn read_packet(&mut self, datagram: &[u8]) -> FramingResult<Vec<Vec<u8>>> {
        let parsed = Packet::parse(datagram).and_then(|packet| {
            let chunks = packet.chunks().collect::<FramingResult<Vec<_>>>()?;
            Ok((packet.header, chunks))
        });
        let (header, chunks) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                self.stats.framing_errors += 1;
                return Err(err);
            }
        };
        self.stats.packets_received += 1;

        let mut accepted = Vec::new();
        for chunk in chunks {
            if chunk.sequence <= self.incoming_ack {
                self.stats.duplicates_dropped += 1;
                continue;
            }
            if chunk.sequence != self.incoming_ack.wrapping_add(1) {
                tracing::debug!(
                    expected = self.incoming_ack.wrapping_add(1),
                    got = chunk.sequence,
                    "sequence gap in reliable stream; waiting for retransmission"
                );
                break;
            }
            self.incoming_ack = chunk.sequence;
            accepted.push(chunk.payload.to_vec());
        }
        self.stats.reliable_delivered += accepted.len() as u64;

        self.acknowledge(header.incoming_ack);
        Ok(accepted)
    }

    /// Receives and parses one datagram from the socket, if any is pending.
    ///
    /// # Errors
    ///
    /// Socket failures, or a framing error for the datagram just read.
    pub fn receive(&mut self) -> NetResult<Option<Vec<Vec<u8>>>> {
        let mut buffer = std::mem::take(&mut self.recv_buf);
        let result = match self.socket.recv(&mut buffer) {
            Ok(Some(len)) => self.read_packet(&buffer[..len]).map(Some).map_err(Into::into),
            Ok(None) => Ok(None),
            Err(e) => Err(TransportError::from(e).into()),
        };
        self.recv_buf = buffer;
        result
    }

    fn acknowledge(&mut self, ack: u32) {
        if ack <= self.outgoing_reliable_floor {
            return;
        }
        if ack > self.outgoing_ack {
            tracing::warn!(
                ack,
                outgoing_ack = self.outgoing_ack,
                "peer acknowledged a sequence never sent; ignoring"
            );
            return;
        }
        let released = self.window.acknowledge(ack);
        self.outgoing_reliable_floor = ack;
        tracing::trace!(ack, released, "window pruned");
    }

    /// Returns true if the peer has not acknowledged every reliable payload.
    #[must_use]
    #[inline]
    pub const fn has_unacked(&self) -> bool {
        self.outgoing_reliable_floor < self.outgoing_ack
    }

    /// Returns true if nothing was sent for `interval_ms`.
    #[must_use]
    pub fn heartbeat_due(&self, now_ms: u64, interval_ms: u64) -> bool {
        self.last_send_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= interval_ms)
    }

    /// Sequence of the newest reliable payload enqueued.
    #[must_use]
    #[inline]
    pub const fn outgoing_sequence(&self) -> u32 {
        self.outgoing_sequence
    }

    /// Sequence the peer must acknowledge.
    #[must_use]
    #[inline]
    pub const fn outgoing_ack(&self) -> u32 {
        self.outgoing_ack
    }

    /// Highest sequence the peer has acknowledged.
    #[must_use]
    #[inline]
    pub const fn outgoing_reliable_floor(&self) -> u32 {
        self.outgoing_reliable_floor
    }

    /// Highest incoming sequence accepted.
    #[must_use]
    #[inline]
    pub const fn incoming_ack(&self) -> u32 {
        self.incoming_ack
    }

    /// The retransmission window.
    #[must_use]
    pub const fn window(&self) -> &RetransmitWindow {
        &self.window
    }

    /// Statistics.
    #[must_use]
    pub const fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// The underlying socket.
    #[must_use]
    pub const fn socket(&self) -> &S {
        &self.socket
    }

    /// The underlying socket, mutably.
    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Records sent datagrams; optionally refuses sends.
    #[derive(Default)]
    struct RecordingSocket {
        sent: Vec<Vec<u8>>,
        inbox: VecDeque<Vec<u8>>,
        full: bool,
    }

    impl DatagramSocket for RecordingSocket {
        fn send(&mut self, datagram: &[u8]) -> io::Result<usize> {
            if self.full {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.sent.push(datagram.to_vec());
            Ok(datagram.len())
        }

        fn recv(&mut self, buffer: &mut [u8]) -> io::Result<Option<usize>> {
            Ok(self.inbox.pop_front().map(|d| {
                buffer[..d.len()].copy_from_slice(&d);
                d.len()
            }))
        }
    }

    fn channel() -> ReliableChannel<RecordingSocket> {
        ReliableChannel::new(RecordingSocket::default(), &LockstepConfig::default())
    }

    fn last_sent(ch: &ReliableChannel<RecordingSocket>) -> Vec<u8> {
        ch.socket().sent.last().cloned().unwrap()
    }

    #[test]
    fn test_heartbeat_when_idle() {
        let mut a = channel();
        a.send_packet(0, None).unwrap();
        let datagram = last_sent(&a);
        assert_eq!(datagram.len(), PacketHeader::SIZE);
        assert!(Packet::parse(&datagram).unwrap().is_heartbeat());
        assert_eq!(a.stats().heartbeats_sent, 1);
    }

    #[test]
    fn test_window_resent_until_acked() {
        let mut a = channel();
        let mut b = channel();

        a.send_packet(0, Some(&b"one"[..])).unwrap();
        a.send_packet(1, Some(&b"two"[..])).unwrap();
        assert_eq!(a.outgoing_ack(), 2);
        assert_eq!(a.outgoing_reliable_floor(), 0);

        // Second packet carries both payloads.
        let datagram = last_sent(&a);
        assert_eq!(
            b.read_packet(&datagram).unwrap(),
            vec![b"one".to_vec(), b"two".to_vec()]
        );
        assert_eq!(b.incoming_ack(), 2);

        b.send_packet(2, None).unwrap();
        assert!(a.read_packet(&last_sent(&b)).unwrap().is_empty());
        assert_eq!(a.outgoing_reliable_floor(), 2);
        assert!(a.window().is_empty());
        assert!(!a.has_unacked());
    }

    #[test]
    fn test_replayed_packet_yields_nothing() {
        let mut a = channel();
        let mut b = channel();
        a.send_packet(0, Some(&b"payload"[..])).unwrap();
        let datagram = last_sent(&a);

        assert_eq!(b.read_packet(&datagram).unwrap().len(), 1);
        let ack = b.incoming_ack();
        assert!(b.read_packet(&datagram).unwrap().is_empty());
        assert_eq!(b.incoming_ack(), ack);
        assert_eq!(b.stats().duplicates_dropped, 1);
    }

    #[test]
    fn test_framing_error_leaves_state() {
        let mut b = channel();
        let mut bad = ByteWriter::new();
        PacketHeader::new(0, 1, 12).encode(&mut bad);
        bad.write_u32(1);
        bad.write_u32(100); // chunk claims more than the body holds
        bad.write_u32(0);

        assert!(matches!(
            b.read_packet(bad.as_slice()),
            Err(FramingError::LengthMismatch { .. })
        ));
        assert_eq!(b.incoming_ack(), 0);
        assert_eq!(b.stats().framing_errors, 1);
    }

    #[test]
    fn test_full_socket_keeps_payload() {
        let mut a = channel();
        a.socket_mut().full = true;
        assert!(matches!(
            a.send_packet(0, Some(&b"keep"[..])),
            Err(crate::error::NetError::Transport(TransportError::SendBufferFull { attempts: 3 }))
        ));
        assert_eq!(a.window().len(), 1);

        a.socket_mut().full = false;
        a.send_packet(1, None).unwrap();
        let mut b = channel();
        assert_eq!(b.read_packet(&last_sent(&a)).unwrap(), vec![b"keep".to_vec()]);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let config = LockstepConfig {
            max_datagram_bytes: 64,
            ..LockstepConfig::default()
        };
        let mut a = ReliableChannel::new(RecordingSocket::default(), &config);
        assert!(a.send_packet(0, Some(&[0u8; 60][..])).is_err());
        assert_eq!(a.outgoing_sequence(), 0);
        assert!(a.window().is_empty());
    }

    #[test]
    fn test_receive_from_socket() {
        let mut a = channel();
        let mut b = channel();
        a.send_packet(0, Some(&b"x"[..])).unwrap();
        b.socket_mut().inbox.push_back(last_sent(&a));

        assert_eq!(b.receive().unwrap(), Some(vec![b"x".to_vec()]));
        assert_eq!(b.receive().unwrap(), None);
    }

    #[test]
    fn test_heartbeat_due() {
        let mut a = channel();
        assert!(a.heartbeat_due(0, 100));
        a.send_packet(10, None).unwrap();
        assert!(!a.heartbeat_due(50, 100));
        assert!(a.heartbeat_due(110, 100));
    }
}
