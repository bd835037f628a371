//! # Packet Framing
//!
//! One datagram carries exactly one packet.
//!
//! ## Packet Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (12 bytes, big-endian)                                │
//! ├──────────────────────────────────────────────────────────────┤
//! │ IncomingAck (4) │ OutgoingSequence (4) │ BodyLength (4)      │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Body: BodyLength bytes (empty = heartbeat)                   │
//! │   [Sequence (4) │ ChunkLength (4) │ ChunkLength bytes] ...   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use bytemuck::{Pod, Zeroable};

use crate::cursor::{ByteReader, ByteWriter};
use crate::error::{FramingError, FramingResult};

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Wire layout of the packet header.
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
struct RawPacketHeader {
    incoming_ack: [u8; 4],
    outgoing_sequence: [u8; 4],
    body_length: [u8; 4],
}

/// Wire layout of a reliable chunk header.
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
struct RawChunkHeader {
    sequence: [u8; 4],
    length: [u8; 4],
}

/// Packet header - present in every datagram.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketHeader {
    /// Highest sequence the sender has accepted from us.
    pub incoming_ack: u32,
    /// Sender's newest outgoing sequence.
    pub outgoing_sequence: u32,
    /// Number of body bytes following the header.
    pub body_length: u32,
}

impl PacketHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = std::mem::size_of::<RawPacketHeader>();

    /// Creates a new packet header.
    #[inline]
    #[must_use]
    pub const fn new(incoming_ack: u32, outgoing_sequence: u32, body_length: u32) -> Self {
        Self {
            incoming_ack,
            outgoing_sequence,
            body_length,
        }
    }

    /// Returns true for a zero-length (heartbeat) packet.
    #[inline]
    #[must_use]
    pub const fn is_heartbeat(&self) -> bool {
        self.body_length == 0
    }

    /// Appends the header to `writer`.
    pub fn encode(&self, writer: &mut ByteWriter) {
        writer.write_pod(&RawPacketHeader {
            incoming_ack: self.incoming_ack.to_be_bytes(),
            outgoing_sequence: self.outgoing_sequence.to_be_bytes(),
            body_length: self.body_length.to_be_bytes(),
        });
    }

    /// Reads a header from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Truncated`] on a short buffer.
    pub fn decode(reader: &mut ByteReader<'_>) -> FramingResult<Self> {
        let raw: RawPacketHeader = reader.read_pod()?;
        Ok(Self {
            incoming_ack: u32::from_be_bytes(raw.incoming_ack),
            outgoing_sequence: u32::from_be_bytes(raw.outgoing_sequence),
            body_length: u32::from_be_bytes(raw.body_length),
        })
    }
}

/// Header of one reliable chunk inside a packet body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Sequence number the chunk was enqueued under.
    pub sequence: u32,
    /// Chunk payload length.
    pub length: u32,
}

impl ChunkHeader {
    /// Size of the chunk header in bytes.
    pub const SIZE: usize = std::mem::size_of::<RawChunkHeader>();

    /// Appends the chunk header to `writer`.
    pub fn encode(&self, writer: &mut ByteWriter) {
        writer.write_pod(&RawChunkHeader {
            sequence: self.sequence.to_be_bytes(),
            length: self.length.to_be_bytes(),
        });
    }

    /// Reads a chunk header from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Truncated`] on a short buffer.
    pub fn decode(reader: &mut ByteReader<'_>) -> FramingResult<Self> {
        let raw: RawChunkHeader = reader.read_pod()?;
        Ok(Self {
            sequence: u32::from_be_bytes(raw.sequence),
            length: u32::from_be_bytes(raw.length),
        })
    }
}

/// One reliable chunk borrowed from a received datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Sequence number of the chunk.
    pub sequence: u32,
    /// Chunk payload.
    pub payload: &'a [u8],
}

/// A parsed datagram: header plus an iterator over its chunks.
#[derive(Clone, Debug)]
pub struct Packet<'a> {
    /// The packet header.
    pub header: PacketHeader,
    body: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Parses the header and checks the declared body length.
    ///
    /// # Errors
    ///
    /// - [`FramingError::Truncated`] if the header itself is short
    /// - [`FramingError::LengthMismatch`] if the body is shorter than declared
    /// - [`FramingError::TrailingBytes`] if bytes follow the declared body
    pub fn parse(datagram: &'a [u8]) -> FramingResult<Self> {
        let mut reader = ByteReader::new(datagram);
        let header = PacketHeader::decode(&mut reader)?;
        let declared = header.body_length as usize;
        let remaining = reader.remaining();
        if declared > remaining {
            return Err(FramingError::LengthMismatch {
                declared,
                remaining,
            });
        }
        if declared < remaining {
            return Err(FramingError::TrailingBytes(remaining - declared));
        }
        let body = reader.read_bytes(declared)?;
        Ok(Self { header, body })
    }

    /// Returns true if the packet carries no chunks.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.body.is_empty()
    }

    /// Iterates the reliable chunks in wire order.
    #[must_use]
    pub fn chunks(&self) -> ChunkIter<'a> {
        ChunkIter {
            reader: ByteReader::new(self.body),
            failed: false,
        }
    }
}

/// Iterator over the chunks of a packet body.
///
/// Yields an error at most once and then stops.
#[derive(Clone, Debug)]
pub struct ChunkIter<'a> {
    reader: ByteReader<'a>,
    failed: bool,
}

impl<'a> ChunkIter<'a> {
    fn next_chunk(&mut self) -> FramingResult<Chunk<'a>> {
        let header = ChunkHeader::decode(&mut self.reader)?;
        let declared = header.length as usize;
        let remaining = self.reader.remaining();
        if declared > remaining {
            return Err(FramingError::LengthMismatch {
                declared,
                remaining,
            });
        }
        Ok(Chunk {
            sequence: header.sequence,
            payload: self.reader.read_bytes(declared)?,
        })
    }
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = FramingResult<Chunk<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.is_empty() {
            return None;
        }
        let item = self.next_chunk();
        self.failed = item.is_err();
        Some(item)
    }
}

/// Writes a full packet (header + chunk body) into `writer`.
///
/// `chunks` are emitted in iteration order.
///
/// # Errors
///
/// Returns [`FramingError::TooLarge`] if a chunk or the body overflows `u32`.
pub fn encode_packet<'c, I>(
    writer: &mut ByteWriter,
    incoming_ack: u32,
    outgoing_sequence: u32,
    chunks: I,
) -> FramingResult<()>
where
    I: IntoIterator<Item = Chunk<'c>>,
{
    let start = writer.len();
    PacketHeader::new(incoming_ack, outgoing_sequence, 0).encode(writer);
    let body_start = writer.len();
    for chunk in chunks {
        let length = u32::try_from(chunk.payload.len())
            .map_err(|_| FramingError::TooLarge(chunk.payload.len()))?;
        ChunkHeader {
            sequence: chunk.sequence,
            length,
        }
        .encode(writer);
        writer.write_bytes(chunk.payload);
    }
    let body_len = writer.len() - body_start;
    let body_len = u32::try_from(body_len).map_err(|_| FramingError::TooLarge(body_len))?;
    // body_length is the third u32 of the header
    writer.patch_u32(start + 8, body_len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_sizes() {
        assert_eq!(PacketHeader::SIZE, 12);
        assert_eq!(ChunkHeader::SIZE, 8);
    }

    #[test]
    fn test_heartbeat_layout() {
        let mut writer = ByteWriter::new();
        encode_packet(&mut writer, 3, 9, std::iter::empty()).unwrap();
        assert_eq!(writer.as_slice(), &[0, 0, 0, 3, 0, 0, 0, 9, 0, 0, 0, 0]);

        let packet = Packet::parse(writer.as_slice()).unwrap();
        assert!(packet.is_heartbeat());
        assert_eq!(packet.header, PacketHeader::new(3, 9, 0));
        assert_eq!(packet.chunks().count(), 0);
    }

    #[test]
    fn test_chunks_in_wire_order() {
        let mut writer = ByteWriter::new();
        let chunks = [
            Chunk {
                sequence: 4,
                payload: b"four",
            },
            Chunk {
                sequence: 5,
                payload: b"",
            },
            Chunk {
                sequence: 6,
                payload: b"six!!",
            },
        ];
        encode_packet(&mut writer, 1, 6, chunks).unwrap();

        let packet = Packet::parse(writer.as_slice()).unwrap();
        assert_eq!(packet.header.body_length as usize, writer.len() - PacketHeader::SIZE);
        let parsed: Vec<_> = packet.chunks().collect::<Result<_, _>>().unwrap();
        assert_eq!(parsed, chunks);
    }

    #[test]
    fn test_short_body_is_length_mismatch() {
        let mut writer = ByteWriter::new();
        PacketHeader::new(0, 1, 20).encode(&mut writer);
        writer.write_bytes(&[0; 5]);
        assert_eq!(
            Packet::parse(writer.as_slice()).unwrap_err(),
            FramingError::LengthMismatch {
                declared: 20,
                remaining: 5
            }
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut writer = ByteWriter::new();
        PacketHeader::new(0, 1, 0).encode(&mut writer);
        writer.write_u8(0xFF);
        assert_eq!(
            Packet::parse(writer.as_slice()).unwrap_err(),
            FramingError::TrailingBytes(1)
        );
    }

    #[test]
    fn test_chunk_length_overrun_stops_iteration() {
        let mut writer = ByteWriter::new();
        PacketHeader::new(0, 2, 12).encode(&mut writer);
        ChunkHeader {
            sequence: 2,
            length: 100,
        }
        .encode(&mut writer);
        writer.write_bytes(&[1, 2, 3, 4]);

        let packet = Packet::parse(writer.as_slice()).unwrap();
        let mut chunks = packet.chunks();
        assert!(matches!(
            chunks.next(),
            Some(Err(FramingError::LengthMismatch { declared: 100, .. }))
        ));
        assert!(chunks.next().is_none());
    }
}
