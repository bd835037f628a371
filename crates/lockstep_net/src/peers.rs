//! Slot arena of per-peer state, indexed by [`PeerId`].

use lockstep_shared::PeerId;

/// Slot arena; freed slots are reused, lowest first.
#[derive(Debug)]
pub struct PeerTable<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
    count: usize,
}

impl<T> PeerTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            count: 0,
        }
    }

    /// Stores `value` and returns its handle.
    pub fn insert(&mut self, value: T) -> PeerId {
        self.count += 1;
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(value);
            return PeerId(index);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Some(value));
        PeerId(index)
    }

    /// Removes and returns the value for `id`.
    pub fn remove(&mut self, id: PeerId) -> Option<T> {
        let value = self.slots.get_mut(id.index())?.take()?;
        self.count -= 1;
        self.free.push(id.0);
        // Keep the free list sorted high-to-low so pop() yields the lowest slot.
        self.free.sort_unstable_by(|a, b| b.cmp(a));
        Some(value)
    }

    /// Returns the value for `id`.
    #[must_use]
    pub fn get(&self, id: PeerId) -> Option<&T> {
        self.slots.get(id.index())?.as_ref()
    }

    /// Returns the value for `id`, mutably.
    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut T> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    /// Returns true if `id` is occupied.
    #[must_use]
    pub fn contains(&self, id: PeerId) -> bool {
        self.get(id).is_some()
    }

    /// Occupied slots.
    #[must_use]
    #[inline]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Returns true if no slot is occupied.
    #[must_use]
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterates occupied slots in id order.
    pub fn iter(&self) -> impl Iterator<Item = (PeerId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (PeerId(i as u32), v)))
    }

    /// Iterates occupied slots mutably, in id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PeerId, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|v| (PeerId(i as u32), v)))
    }

    /// Handles of occupied slots.
    #[must_use]
    pub fn ids(&self) -> Vec<PeerId> {
        self.iter().map(|(id, _)| id).collect()
    }
}

impl<T> Default for PeerTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
