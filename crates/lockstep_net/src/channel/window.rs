//! Retransmission window: FIFO descriptors over one contiguous byte buffer.

use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct WindowEntry {
    sequence: u32,
    length: usize,
}

/// Unacknowledged reliable payloads, oldest first.
///
/// ```text
/// entries:  [ (7, 12) | (8, 40) | (9, 3) ]
/// buffer:   [ 12 bytes | 40 bytes | 3 bytes ]
///             ^ ack reaches 7 -> first 12 bytes reclaimed
/// ```
#[derive(Debug)]
pub struct RetransmitWindow {
    entries: VecDeque<WindowEntry>,
    buffer: Vec<u8>,
    capacity: usize,
    growth: usize,
    warn_bytes: usize,
}

impl RetransmitWindow {
    /// Creates an empty window.
    #[must_use]
    pub fn new(initial_bytes: usize, growth_bytes: usize, warn_bytes: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            buffer: Vec::with_capacity(initial_bytes),
            capacity: initial_bytes,
            growth: growth_bytes.max(1),
            warn_bytes,
        }
    }

    /// Appends a payload tagged with `sequence`.
    ///
    /// Sequences must be pushed in increasing order.
    pub fn push(&mut self, sequence: u32, payload: &[u8]) {
        debug_assert!(self.entries.back().map_or(true, |e| e.sequence < sequence));

        let needed = self.buffer.len() + payload.len();
        if needed > self.capacity {
            let steps = (needed - self.capacity).div_ceil(self.growth);
            let grown = self.capacity + steps * self.growth;
            if grown > self.warn_bytes {
                tracing::warn!(
                    bytes = grown,
                    entries = self.entries.len() + 1,
                    "retransmission window beyond expected bound; peer may be unreachable"
                );
            }
            self.buffer.reserve(grown - self.buffer.len());
            self.capacity = grown;
        }

        self.buffer.extend_from_slice(payload);
        self.entries.push_back(WindowEntry {
            sequence,
            length: payload.len(),
        });
    }

    /// Drops every entry with a sequence at or below `ack` and reclaims its
    /// bytes. Returns the number of bytes released.
    pub fn acknowledge(&mut self, ack: u32) -> usize {
        let mut released = 0;
        while let Some(front) = self.entries.front() {
            if front.sequence > ack {
                break;
            }
            released += front.length;
            self.entries.pop_front();
        }
        if released > 0 {
            self.buffer.drain(..released);
        }
        released
    }

    /// Iterates `(sequence, payload)` oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        let mut offset = 0;
        self.entries.iter().map(move |entry| {
            let start = offset;
            offset += entry.length;
            (entry.sequence, &self.buffer[start..offset])
        })
    }

    /// Bytes currently held.
    #[must_use]
    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Number of unacknowledged payloads.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is awaiting acknowledgement.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current logical capacity in bytes.
    #[must_use]
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest sequence still held.
    #[must_use]
    pub fn oldest_sequence(&self) -> Option<u32> {
        self.entries.front().map(|e| e.sequence)
    }
}
