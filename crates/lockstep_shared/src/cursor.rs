//! # Byte Cursors
//!
//! Big-endian serialization cursors used for every wire structure and handed
//! to the simulation for its per-frame action snapshot.
//!
//! ## Design
//!
//! - The writer grows; writes cannot fail
//! - The reader is bounds-checked and never panics on short input
//! - Pod structures are copied directly (see [`ByteReader::read_pod`])

use bytemuck::{bytes_of, Pod};

use crate::error::{FramingError, FramingResult};

/// Growable big-endian writer.
///
/// Reuse one writer across packets with [`ByteWriter::clear`] to keep the
/// allocation.
#[derive(Clone, Debug, Default)]
pub struct ByteWriter {
    buffer: Vec<u8>,
}

impl ByteWriter {
    /// Creates an empty writer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Creates a writer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Resets the writer for reuse.
    #[inline]
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns the written bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the writer, returning its buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buffer
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a u16.
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a u32.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes an i32.
    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a u64.
    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes an f32 as its big-endian bit pattern.
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    /// Writes raw bytes with no length prefix.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a `u32` length prefix followed by the bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::TooLarge`] if the slice does not fit a `u32`.
    pub fn write_len_prefixed(&mut self, bytes: &[u8]) -> FramingResult<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| FramingError::TooLarge(bytes.len()))?;
        self.write_u32(len);
        self.write_bytes(bytes);
        Ok(())
    }

    /// Writes a Pod type directly.
    #[inline]
    pub fn write_pod<T: Pod>(&mut self, value: &T) {
        self.buffer.extend_from_slice(bytes_of(value));
    }

    /// Overwrites four bytes at `offset` with a u32.
    ///
    /// Used to back-patch length fields.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the written length.
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }
}

/// Bounds-checked big-endian reader over a borrowed buffer.
#[derive(Clone, Debug)]
pub struct ByteReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader positioned at the start of `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Returns true once every byte has been consumed.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current read offset.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    #[inline]
    fn take(&mut self, needed: usize) -> FramingResult<&'a [u8]> {
        let available = self.remaining();
        if needed > available {
            return Err(FramingError::Truncated { needed, available });
        }
        let slice = &self.buffer[self.position..self.position + needed];
        self.position += needed;
        Ok(slice)
    }

    #[inline]
    fn take_array<const N: usize>(&mut self) -> FramingResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> FramingResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a u16.
    #[inline]
    pub fn read_u16(&mut self) -> FramingResult<u16> {
        self.take_array().map(u16::from_be_bytes)
    }

    /// Reads a u32.
    #[inline]
    pub fn read_u32(&mut self) -> FramingResult<u32> {
        self.take_array().map(u32::from_be_bytes)
    }

    /// Reads an i32.
    #[inline]
    pub fn read_i32(&mut self) -> FramingResult<i32> {
        self.take_array().map(i32::from_be_bytes)
    }

    /// Reads a u64.
    #[inline]
    pub fn read_u64(&mut self) -> FramingResult<u64> {
        self.take_array().map(u64::from_be_bytes)
    }

    /// Reads an f32.
    #[inline]
    pub fn read_f32(&mut self) -> FramingResult<f32> {
        self.read_u32().map(f32::from_bits)
    }

    /// Reads exactly `len` raw bytes.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> FramingResult<&'a [u8]> {
        self.take(len)
    }

    /// Reads a `u32` length prefix and the bytes it declares.
    ///
    /// A prefix larger than the remaining buffer is a
    /// [`FramingError::LengthMismatch`], not a truncation.
    pub fn read_len_prefixed(&mut self) -> FramingResult<&'a [u8]> {
        let declared = self.read_u32()? as usize;
        let remaining = self.remaining();
        if declared > remaining {
            return Err(FramingError::LengthMismatch {
                declared,
                remaining,
            });
        }
        self.take(declared)
    }

    /// Returns every remaining byte.
    #[inline]
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buffer[self.position.min(self.buffer.len())..];
        self.position = self.buffer.len();
        rest
    }

    /// Reads a Pod type directly.
    #[inline]
    pub fn read_pod<T: Pod>(&mut self) -> FramingResult<T> {
        let size = std::mem::size_of::<T>();
        let slice = self.take(size)?;
        // Unaligned read; the buffer carries no alignment guarantee.
        Ok(bytemuck::pod_read_unaligned(slice))
    }
}
