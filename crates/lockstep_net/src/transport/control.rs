//! # Control Stream Links
//!
//! Length-prefixed [`ControlMessage`] transport over a reliable stream.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use lockstep_shared::{ByteWriter, ControlMessage};

use crate::error::{NetResult, TransportError};

/// Non-blocking, ordered, reliable message link to one peer.
pub trait ControlLink {
    /// Queues a message and pushes as much as possible onto the wire.
    ///
    /// # Errors
    ///
    /// Transport failures, or a message that cannot be encoded.
    fn send(&mut self, message: &ControlMessage) -> NetResult<()>;

    /// Pushes any bytes left over from earlier sends.
    ///
    /// # Errors
    ///
    /// Transport failures.
    fn flush(&mut self) -> NetResult<()>;

    /// Returns the next complete message, or `None` if none is pending.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] once the peer has gone and every buffered
    /// message was delivered; framing errors for corrupt input.
    fn try_recv(&mut self) -> NetResult<Option<ControlMessage>>;
}

/// Control link over a non-blocking TCP stream.
pub struct TcpControlLink {
    stream: TcpStream,
    read_buf: Vec<u8>,
    write_buf: ByteWriter,
    eof: bool,
}

impl TcpControlLink {
    const READ_CHUNK: usize = 4096;

    /// Wraps a connected stream, switching it to non-blocking mode.
    ///
    /// # Errors
    ///
    /// Returns the OS error from `set_nonblocking`/`set_nodelay`.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            read_buf: Vec::with_capacity(Self::READ_CHUNK),
            write_buf: ByteWriter::with_capacity(Self::READ_CHUNK),
            eof: false,
        })
    }

    /// Bytes accepted by `send` but not yet written to the socket.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.write_buf.len()
    }

    fn fill(&mut self) -> Result<(), TransportError> {
        let mut chunk = [0u8; Self::READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn take_message(&mut self) -> NetResult<Option<ControlMessage>> {
        let Some(total) = ControlMessage::frame_length(&self.read_buf)? else {
            return Ok(None);
        };
        let message = ControlMessage::decode(&self.read_buf[..total]);
        self.read_buf.drain(..total);
        Ok(Some(message?))
    }
}

impl ControlLink for TcpControlLink {
    fn send(&mut self, message: &ControlMessage) -> NetResult<()> {
        message.encode_into(&mut self.write_buf)?;
        self.flush()
    }

    fn flush(&mut self) -> NetResult<()> {
        let mut written = 0;
        let pending = self.write_buf.as_slice();
        let result = loop {
            if written == pending.len() {
                break Ok(());
            }
            match self.stream.write(&pending[written..]) {
                Ok(0) => break Err(TransportError::Closed),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => break Err(TransportError::from(e)),
            }
        };
        if written > 0 {
            let rest = self.write_buf.as_slice()[written..].to_vec();
            self.write_buf.clear();
            self.write_buf.write_bytes(&rest);
        }
        result.map_err(Into::into)
    }

    fn try_recv(&mut self) -> NetResult<Option<ControlMessage>> {
        if let Some(message) = self.take_message()? {
            return Ok(Some(message));
        }
        if !self.eof {
            self.fill()?;
        }
        match self.take_message()? {
            Some(message) => Ok(Some(message)),
            None if self.eof => Err(TransportError::Closed.into()),
            None => Ok(None),
        }
    }
}

/// In-process control link backed by a crossbeam channel pair.
///
/// Messages go through the real wire codec so tests exercise the same bytes
/// as TCP.
pub struct MemoryControlLink {
    tx: Option<Sender<Vec<u8>>>,
    rx: Receiver<Vec<u8>>,
}

impl MemoryControlLink {
    /// Creates two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = crossbeam_channel::unbounded();
        let (b_tx, a_rx) = crossbeam_channel::unbounded();
        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }

    /// Closes the sending half; the other end sees `Closed` once drained.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

impl ControlLink for MemoryControlLink {
    fn send(&mut self, message: &ControlMessage) -> NetResult<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        let bytes = message.encode()?;
        tx.send(bytes).map_err(|_| TransportError::Closed)?;
        Ok(())
    }

    fn flush(&mut self) -> NetResult<()> {
        Ok(())
    }

    fn try_recv(&mut self) -> NetResult<Option<ControlMessage>> {
        match self.rx.try_recv() {
            Ok(bytes) => Ok(Some(ControlMessage::decode(&bytes)?)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Closed.into()),
        }
    }
}
