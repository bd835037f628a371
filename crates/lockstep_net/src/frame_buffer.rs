//! # Frame Buffer
//!
//! Per-peer store of inbound frame-stamped payloads, consumed in strictly
//! increasing frame order.
//!
//! ## Design
//!
//! - Min-heap keyed by frame number: "is the next frame ready" is a peek
//! - The buffer owns queued payloads; [`FrameBuffer::begin_frame`] moves the
//!   ready ones into a scratch list that lives until [`FrameBuffer::end_frame`]
//! - Stale and duplicate frames are dropped with a warning
//! - Growth beyond the expected depth is logged, never refused

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use lockstep_shared::FrameNumber;

/// One inbound frame record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRecord {
    /// Frame the payload belongs to.
    pub frame: FrameNumber,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl Ord for FrameRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.frame.cmp(&other.frame)
    }
}

impl PartialOrd for FrameRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered inbound frame queue for one stream.
#[derive(Debug)]
pub struct FrameBuffer {
    queue: BinaryHeap<Reverse<FrameRecord>>,
    /// Records handed out by the current `begin_frame`.
    applying: Vec<FrameRecord>,
    /// Last frame consumed.
    current_frame: FrameNumber,
    /// Newest frame ever added.
    last_data_frame: FrameNumber,
    warn_depth: usize,
    over_warn: bool,
}

impl FrameBuffer {
    /// Creates an empty buffer positioned before frame 1.
    #[must_use]
    pub fn new(initial_capacity: usize, warn_depth: usize) -> Self {
        Self {
            queue: BinaryHeap::with_capacity(initial_capacity),
            applying: Vec::new(),
            current_frame: 0,
            last_data_frame: 0,
            warn_depth,
            over_warn: false,
        }
    }

    /// Queues a payload for `frame`.
    ///
    /// Returns false, dropping the payload, if `frame` was already consumed.
    pub fn add_frame_data(&mut self, frame: FrameNumber, payload: Vec<u8>) -> bool {
        if frame <= self.current_frame {
            tracing::warn!(frame, current = self.current_frame, "dropping stale frame data");
            return false;
        }
        self.last_data_frame = self.last_data_frame.max(frame);
        self.queue.push(Reverse(FrameRecord { frame, payload }));

        let depth = self.queue.len();
        if depth > self.warn_depth && !self.over_warn {
            self.over_warn = true;
            tracing::warn!(
                depth,
                last_data_frame = self.last_data_frame,
                "frame buffer beyond expected depth"
            );
        } else if depth <= self.warn_depth {
            self.over_warn = false;
        }
        true
    }

    /// Returns true iff the lowest queued frame is `current + 1`.
    #[must_use]
    pub fn is_next_frame_ready(&self, current: FrameNumber) -> bool {
        self.queue
            .peek()
            .is_some_and(|Reverse(record)| record.frame == current.wrapping_add(1))
    }

    /// Returns true iff the frame after the buffer's own position is queued.
    #[must_use]
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.is_next_frame_ready(self.current_frame)
    }

    /// Pops every record at or below `current`, ascending.
    ///
    /// The records stay valid until [`FrameBuffer::end_frame`].
    pub fn drain_ready(&mut self, current: FrameNumber) -> &[FrameRecord] {
        while let Some(Reverse(record)) = self.queue.peek() {
            if record.frame > current {
                break;
            }
            let Some(Reverse(record)) = self.queue.pop() else {
                break;
            };
            if self.applying.last().is_some_and(|last| last.frame == record.frame) {
                tracing::warn!(frame = record.frame, "dropping duplicate frame data");
                continue;
            }
            self.applying.push(record);
        }
        self.current_frame = self.current_frame.max(current);
        &self.applying
    }

    /// Advances to the next frame and returns its records.
    pub fn begin_frame(&mut self) -> &[FrameRecord] {
        let next = self.current_frame.wrapping_add(1);
        self.drain_ready(next)
    }

    /// Releases the records handed out since the last call.
    pub fn end_frame(&mut self) {
        self.applying.clear();
    }

    /// Last frame consumed.
    #[must_use]
    #[inline]
    pub const fn current_frame(&self) -> FrameNumber {
        self.current_frame
    }

    /// Newest frame ever added.
    #[must_use]
    #[inline]
    pub const fn last_data_frame(&self) -> FrameNumber {
        self.last_data_frame
    }

    /// Frames received but not yet consumed (`last_data_frame - current_frame`).
    #[must_use]
    #[inline]
    pub const fn backlog(&self) -> u32 {
        self.last_data_frame.saturating_sub(self.current_frame)
    }

    /// Queued records.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(64, 1024)
    }
}
