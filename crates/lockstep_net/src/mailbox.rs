//! # Mailboxes
//!
//! The only state shared between the network poll loop and the simulation
//! loop.
//!
//! ## Design
//!
//! ```text
//! NetworkPoller --push--> [inbound]  --drain--> LockstepCoordinator
//! NetworkPoller <-drain-- [outbound] <--push--- LockstepCoordinator
//! ```
//!
//! One mutex per queue, held only while pushing or swapping the queue out.

use std::collections::VecDeque;
use std::sync::Arc;

use lockstep_shared::{ControlMessage, FrameMessage, PeerId};
use parking_lot::Mutex;

/// Mutex-guarded FIFO shared between threads.
#[derive(Debug)]
pub struct Mailbox<T> {
    queue: Arc<Mutex<VecDeque<T>>>,
}

impl<T> Mailbox<T> {
    /// Creates an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Appends one item.
    pub fn push(&self, item: T) {
        self.queue.lock().push_back(item);
    }

    /// Appends several items under one lock.
    pub fn push_many(&self, items: impl IntoIterator<Item = T>) {
        self.queue.lock().extend(items);
    }

    /// Takes every queued item, oldest first.
    #[must_use]
    pub fn drain(&self) -> VecDeque<T> {
        std::mem::take(&mut *self.queue.lock())
    }

    /// Items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Poller -> coordinator events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A reliable frame-sync message arrived.
    Frame {
        /// Sender.
        peer: PeerId,
        /// Decoded message.
        message: FrameMessage,
    },
    /// A control message arrived.
    Control {
        /// Sender.
        peer: PeerId,
        /// Decoded message.
        message: ControlMessage,
    },
    /// The peer's transport failed or closed.
    Disconnected {
        /// The lost peer.
        peer: PeerId,
    },
}

/// Coordinator -> poller commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Send a frame-sync message as a reliable payload.
    Frame {
        /// Destination.
        peer: PeerId,
        /// Message to send.
        message: FrameMessage,
    },
    /// Send a control message.
    Control {
        /// Destination.
        peer: PeerId,
        /// Message to send.
        message: ControlMessage,
    },
    /// Flush and drop the peer.
    Disconnect {
        /// Peer to drop.
        peer: PeerId,
    },
}

/// The inbound/outbound pair for one endpoint.
#[derive(Clone, Debug, Default)]
pub struct Mailboxes {
    /// Poller -> coordinator.
    pub inbound: Mailbox<Inbound>,
    /// Coordinator -> poller.
    pub outbound: Mailbox<Outbound>,
}

impl Mailboxes {
    /// Creates an empty pair.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_queue() {
        let a: Mailbox<u32> = Mailbox::new();
        let b = a.clone();
        a.push(1);
        b.push_many([2, 3]);
        assert_eq!(a.len(), 3);
        assert_eq!(b.drain().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(a.is_empty());
    }

    #[test]
    fn test_cross_thread() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        let producer = mailbox.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..100 {
                producer.push(i);
            }
        });
        handle.join().unwrap();
        let items: Vec<_> = mailbox.drain().into_iter().collect();
        assert_eq!(items, (0..100).collect::<Vec<_>>());
    }
}
