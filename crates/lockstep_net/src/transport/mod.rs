//! # Transport Layer
//!
//! The two channels the engine runs on.
//!
//! ## Design
//!
//! - Datagrams: raw UDP, connected to one peer, non-blocking
//! - Control: a length-prefixed byte stream (TCP, or in-memory for tests)
//! - Both are polled; nothing here ever blocks or sleeps

mod control;

pub use control::{ControlLink, MemoryControlLink, TcpControlLink};

use std::io;
use std::net::{SocketAddr, UdpSocket};

/// Non-blocking datagram socket connected to a single peer.
pub trait DatagramSocket {
    /// Sends one datagram.
    ///
    /// `io::ErrorKind::WouldBlock` means the outbound buffer is full and the
    /// caller may retry.
    ///
    /// # Errors
    ///
    /// Any socket-level failure.
    fn send(&mut self, datagram: &[u8]) -> io::Result<usize>;

    /// Receives one datagram into `buffer`, or `None` if nothing is pending.
    ///
    /// # Errors
    ///
    /// Any socket-level failure other than "would block".
    fn recv(&mut self, buffer: &mut [u8]) -> io::Result<Option<usize>>;
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Packets sent.
    pub packets_sent: u64,
    /// Packets received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Send errors.
    pub send_errors: u64,
    /// Receive errors.
    pub recv_errors: u64,
}

/// UDP socket wrapper connected to one peer.
///
/// This is a thin wrapper around std UDP with:
/// - Non-blocking mode
/// - A fixed remote address
/// - Packet statistics
pub struct UdpTransport {
    /// The underlying socket.
    socket: UdpSocket,
    /// Local address.
    local_addr: SocketAddr,
    /// Remote address.
    peer_addr: SocketAddr,
    /// Statistics.
    stats: TransportStats,
}

impl UdpTransport {
    /// Binds to `local` and connects to `peer`.
    ///
    /// # Errors
    ///
    /// Returns the OS error from bind/connect.
    pub fn connect(local: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        Self::from_socket(socket, peer)
    }

    /// Wraps an already bound socket and connects it to `peer`.
    ///
    /// # Errors
    ///
    /// Returns the OS error from connect or from switching to non-blocking.
    pub fn from_socket(socket: UdpSocket, peer: SocketAddr) -> io::Result<Self> {
        socket.connect(peer)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            peer_addr: peer,
            stats: TransportStats::default(),
        })
    }

    /// Returns the local address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the remote address.
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Resets statistics.
    pub fn reset_stats(&mut self) {
        self.stats = TransportStats::default();
    }
}

impl DatagramSocket for UdpTransport {
    fn send(&mut self, datagram: &[u8]) -> io::Result<usize> {
        match self.socket.send(datagram) {
            Ok(n) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += n as u64;
                Ok(n)
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::WouldBlock {
                    self.stats.send_errors += 1;
                }
                Err(e)
            }
        }
    }

    fn recv(&mut self, buffer: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket.recv(buffer) {
            Ok(len) => {
                self.stats.packets_received += 1;
                self.stats.bytes_received += len as u64;
                Ok(Some(len))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => {
                self.stats.recv_errors += 1;
                Err(e)
            }
        }
    }
}
