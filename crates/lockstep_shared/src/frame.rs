//! # Frame Payloads
//!
//! What travels inside a reliable chunk.
//!
//! ```text
//! FrameMessage:  [frame (4)][snapshot bytes ...]
//! MergedFrame:   [count (2)] { [player (4)][len (4)][len bytes] } * count
//! ```
//!
//! A participant sends its own action snapshot as the snapshot of a
//! `FrameMessage`. The authority merges one snapshot per player into a
//! `MergedFrame` and broadcasts that, encoded, as the snapshot of its own
//! `FrameMessage`.

use crate::cursor::{ByteReader, ByteWriter};
use crate::error::{FramingError, FramingResult};
use crate::ids::{FrameNumber, PlayerId};

/// Frame-stamped snapshot carried by one reliable chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameMessage {
    /// Frame the snapshot belongs to.
    pub frame: FrameNumber,
    /// Opaque snapshot bytes.
    pub snapshot: Vec<u8>,
}

impl FrameMessage {
    /// Size of the frame prefix.
    pub const PREFIX_SIZE: usize = 4;

    /// Creates a new frame message.
    #[must_use]
    pub fn new(frame: FrameNumber, snapshot: Vec<u8>) -> Self {
        Self { frame, snapshot }
    }

    /// Appends the encoded message to `writer`.
    pub fn encode_into(frame: FrameNumber, snapshot: &[u8], writer: &mut ByteWriter) {
        writer.write_u32(frame);
        writer.write_bytes(snapshot);
    }

    /// Encodes the message into a fresh buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(Self::PREFIX_SIZE + self.snapshot.len());
        Self::encode_into(self.frame, &self.snapshot, &mut writer);
        writer.into_vec()
    }

    /// Decodes a chunk payload.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Truncated`] if the frame prefix is missing.
    pub fn decode(payload: &[u8]) -> FramingResult<Self> {
        let mut reader = ByteReader::new(payload);
        let frame = reader.read_u32()?;
        Ok(Self {
            frame,
            snapshot: reader.read_rest().to_vec(),
        })
    }
}

/// The canonical per-frame payload: one snapshot per player.
///
/// Entries are kept sorted by player so every peer decodes the same bytes
/// into the same order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergedFrame {
    entries: Vec<(PlayerId, Vec<u8>)>,
}

impl MergedFrame {
    /// Creates an empty merged frame.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Creates an empty merged frame with room for `players` entries.
    #[must_use]
    pub fn with_capacity(players: usize) -> Self {
        Self {
            entries: Vec::with_capacity(players),
        }
    }

    /// Inserts a player's snapshot, keeping players ascending.
    ///
    /// A second snapshot for the same player replaces the first.
    pub fn insert(&mut self, player: PlayerId, snapshot: Vec<u8>) {
        match self.entries.binary_search_by_key(&player, |(p, _)| *p) {
            Ok(index) => self.entries[index].1 = snapshot,
            Err(index) => self.entries.insert(index, (player, snapshot)),
        }
    }

    /// Returns a player's snapshot.
    #[must_use]
    pub fn get(&self, player: PlayerId) -> Option<&[u8]> {
        self.entries
            .binary_search_by_key(&player, |(p, _)| *p)
            .ok()
            .map(|index| self.entries[index].1.as_slice())
    }

    /// Iterates `(player, snapshot)` in ascending player order.
    pub fn iter(&self) -> impl Iterator<Item = (PlayerId, &[u8])> {
        self.entries.iter().map(|(p, s)| (*p, s.as_slice()))
    }

    /// Players present in this frame.
    pub fn players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.entries.iter().map(|(p, _)| *p)
    }

    /// Number of player snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no player contributed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clears all entries, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Appends the encoded frame to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::TooLarge`] for more than `u16::MAX` players or
    /// a snapshot larger than `u32::MAX` bytes.
    pub fn encode_into(&self, writer: &mut ByteWriter) -> FramingResult<()> {
        let count = u16::try_from(self.entries.len())
            .map_err(|_| FramingError::TooLarge(self.entries.len()))?;
        writer.write_u16(count);
        for (player, snapshot) in &self.entries {
            writer.write_u32(player.0);
            writer.write_len_prefixed(snapshot)?;
        }
        Ok(())
    }

    /// Encodes the frame into a fresh buffer.
    ///
    /// # Errors
    ///
    /// See [`MergedFrame::encode_into`].
    pub fn encode(&self) -> FramingResult<Vec<u8>> {
        let size = 2 + self.entries.iter().map(|(_, s)| 8 + s.len()).sum::<usize>();
        let mut writer = ByteWriter::with_capacity(size);
        self.encode_into(&mut writer)?;
        Ok(writer.into_vec())
    }

    /// Decodes a merged frame.
    ///
    /// # Errors
    ///
    /// - [`FramingError::Truncated`] / [`FramingError::LengthMismatch`] on
    ///   malformed entries
    /// - [`FramingError::UnorderedPlayers`] if players are not ascending
    /// - [`FramingError::TrailingBytes`] if bytes follow the last entry
    pub fn decode(bytes: &[u8]) -> FramingResult<Self> {
        let mut reader = ByteReader::new(bytes);
        let count = reader.read_u16()? as usize;
        let mut entries: Vec<(PlayerId, Vec<u8>)> = Vec::with_capacity(count);
        for _ in 0..count {
            let player = PlayerId(reader.read_u32()?);
            if entries.last().is_some_and(|(last, _)| *last >= player) {
                return Err(FramingError::UnorderedPlayers(player.0));
            }
            entries.push((player, reader.read_len_prefixed()?.to_vec()));
        }
        if !reader.is_empty() {
            return Err(FramingError::TrailingBytes(reader.remaining()));
        }
        Ok(Self { entries })
    }
}
