//! Lossy in-memory datagram link.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::NetworkConditions;
use crate::transport::DatagramSocket;

/// Per-direction delivery statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Datagrams handed to `send`.
    pub sent: u64,
    /// Datagrams lost on purpose.
    pub dropped: u64,
    /// Extra copies injected.
    pub duplicated: u64,
    /// Datagrams held back past later ones.
    pub reordered: u64,
    /// Datagrams handed out by `recv`.
    pub delivered: u64,
}

#[derive(Debug)]
struct InFlight {
    ready_at: u64,
    data: Vec<u8>,
}

/// One direction of a link.
#[derive(Debug, Default)]
struct Pipe {
    queue: VecDeque<InFlight>,
    /// Receiver poll steps elapsed.
    step: u64,
    blocked: bool,
    stats: LinkStats,
}

/// One end of an in-memory datagram link.
///
/// A datagram sent with `delay_steps = d` becomes readable once the
/// receiving end has come up empty `d` times: with one read loop per poll,
/// that is `d` polls later.
pub struct LossyLink {
    outgoing: Arc<Mutex<Pipe>>,
    incoming: Arc<Mutex<Pipe>>,
    conditions: NetworkConditions,
    rng: StdRng,
}

impl LossyLink {
    /// Creates two connected ends with the same conditions both ways.
    #[must_use]
    pub fn pair(conditions: NetworkConditions, seed: u64) -> (Self, Self) {
        Self::pair_asymmetric(conditions, conditions, seed)
    }

    /// Creates two connected ends; `a_to_b` applies to what the first end
    /// sends.
    #[must_use]
    pub fn pair_asymmetric(
        a_to_b: NetworkConditions,
        b_to_a: NetworkConditions,
        seed: u64,
    ) -> (Self, Self) {
        let ab = Arc::new(Mutex::new(Pipe::default()));
        let ba = Arc::new(Mutex::new(Pipe::default()));
        let a = Self {
            outgoing: Arc::clone(&ab),
            incoming: Arc::clone(&ba),
            conditions: a_to_b,
            rng: StdRng::seed_from_u64(seed),
        };
        let b = Self {
            outgoing: ba,
            incoming: ab,
            conditions: b_to_a,
            rng: StdRng::seed_from_u64(seed.wrapping_add(0x9E37_79B9)),
        };
        (a, b)
    }

    /// Handle that silences this end's outgoing direction.
    #[must_use]
    pub fn switch(&self) -> LinkSwitch {
        LinkSwitch {
            pipe: Arc::clone(&self.outgoing),
        }
    }

    /// Silently drops everything this end sends while `blocked`.
    pub fn set_blocked(&self, blocked: bool) {
        self.outgoing.lock().blocked = blocked;
    }

    /// Replaces the conditions applied to this end's sends.
    pub fn set_conditions(&mut self, conditions: NetworkConditions) {
        self.conditions = conditions;
    }

    /// Statistics of the direction this end sends on.
    #[must_use]
    pub fn outgoing_stats(&self) -> LinkStats {
        self.outgoing.lock().stats
    }

    /// Datagrams waiting to be read by this end.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.incoming.lock().queue.len()
    }

    fn roll(&mut self) -> u32 {
        self.rng.gen_range(0..100)
    }
}

impl DatagramSocket for LossyLink {
    fn send(&mut self, datagram: &[u8]) -> io::Result<usize> {
        let loss = self.roll();
        let duplicate = self.roll();
        let reorder = self.roll();
        let jitter = if self.conditions.jitter_steps > 0 {
            self.rng.gen_range(0..=self.conditions.jitter_steps)
        } else {
            0
        };

        let mut pipe = self.outgoing.lock();
        pipe.stats.sent += 1;
        if pipe.blocked || self.conditions.should_drop(loss) {
            pipe.stats.dropped += 1;
            return Ok(datagram.len());
        }

        let mut ready_at = pipe.step + u64::from(self.conditions.delay_steps + jitter);
        if self.conditions.should_reorder(reorder) {
            pipe.stats.reordered += 1;
            ready_at += 1 + u64::from(self.conditions.jitter_steps);
        }
        // Keep the queue sorted by readiness; equal times stay in send order.
        let at = pipe.queue.partition_point(|p| p.ready_at <= ready_at);
        pipe.queue.insert(
            at,
            InFlight {
                ready_at,
                data: datagram.to_vec(),
            },
        );
        if self.conditions.should_duplicate(duplicate) {
            pipe.stats.duplicated += 1;
            let at = pipe.queue.partition_point(|p| p.ready_at <= ready_at + 1);
            pipe.queue.insert(
                at,
                InFlight {
                    ready_at: ready_at + 1,
                    data: datagram.to_vec(),
                },
            );
        }
        Ok(datagram.len())
    }

    fn recv(&mut self, buffer: &mut [u8]) -> io::Result<Option<usize>> {
        let mut pipe = self.incoming.lock();
        let step = pipe.step;
        if pipe.queue.front().is_some_and(|p| p.ready_at <= step) {
            if let Some(packet) = pipe.queue.pop_front() {
                if packet.data.len() > buffer.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "datagram larger than buffer",
                    ));
                }
                buffer[..packet.data.len()].copy_from_slice(&packet.data);
                pipe.stats.delivered += 1;
                return Ok(Some(packet.data.len()));
            }
        }
        pipe.step += 1;
        Ok(None)
    }
}

/// Remote switch for one direction of a [`LossyLink`].
#[derive(Clone)]
pub struct LinkSwitch {
    pipe: Arc<Mutex<Pipe>>,
}

impl LinkSwitch {
    /// Silently drops every datagram while `blocked`.
    pub fn set_blocked(&self, blocked: bool) {
        self.pipe.lock().blocked = blocked;
    }

    /// Returns true while the direction is silenced.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.pipe.lock().blocked
    }

    /// Statistics of the direction.
    #[must_use]
    pub fn stats(&self) -> LinkStats {
        self.pipe.lock().stats
    }
}
