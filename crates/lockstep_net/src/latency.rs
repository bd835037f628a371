//! Round-trip latency sampling.

/// Fixed-capacity set of half round-trip samples, in milliseconds.
///
/// Callers re-arm by calling [`LatencyEstimator::mark_request`] again; this
/// type never retries on its own.
#[derive(Clone, Debug)]
pub struct LatencyEstimator {
    samples: Vec<u32>,
    capacity: usize,
    pending_request_ms: Option<u64>,
}

impl LatencyEstimator {
    /// Creates an estimator holding at most `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            pending_request_ms: None,
        }
    }

    /// Records the send time of a probe.
    pub fn mark_request(&mut self, now_ms: u64) {
        self.pending_request_ms = Some(now_ms);
    }

    /// Records the reply to the outstanding probe.
    ///
    /// Returns false if there was no outstanding probe or the ring is full.
    pub fn mark_reply(&mut self, now_ms: u64) -> bool {
        let Some(sent) = self.pending_request_ms.take() else {
            return false;
        };
        if self.is_full() {
            return false;
        }
        let half = now_ms.saturating_sub(sent) / 2;
        self.samples.push(u32::try_from(half).unwrap_or(u32::MAX));
        true
    }

    /// Returns true while a probe is waiting for its reply.
    #[must_use]
    #[inline]
    pub const fn awaiting_reply(&self) -> bool {
        self.pending_request_ms.is_some()
    }

    /// Number of samples collected.
    #[must_use]
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Returns true once no more samples are accepted.
    #[must_use]
    #[inline]
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Mean of the collected samples, or `None` before the first one.
    #[must_use]
    pub fn mean_latency_ms(&self) -> Option<u32> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().map(|&s| u64::from(s)).sum();
        let mean = sum / self.samples.len() as u64;
        Some(u32::try_from(mean).unwrap_or(u32::MAX))
    }

    /// Clears every sample and any outstanding probe.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.pending_request_ms = None;
    }
}
