//! Fixed-capacity handle registry.
//!
//! [`HandleRegistry`] is a pool-scoped arena of `N` slots mapping object
//! identifiers to shared handles. A slot index is the stable identity of a
//! registered handle; its reference count is explicit slot state. The
//! registry never allocates after construction and is only ever touched
//! under the owning pool's mutex.
//!
//! Invariants:
//! 1. identifiers of occupied slots are pairwise distinct;
//! 2. every occupied slot has a reference count of at least one;
//! 3. at most `N` slots are occupied;
//! 4. when the table is not full, `next_free` names a vacant slot.

use thiserror::Error;

/// Why a handle could not be registered.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// Another caller registered the identifier first; retry the lookup.
    #[error("identifier already registered")]
    Duplicate,

    /// Every slot is occupied.
    #[error("registry full ({capacity} slots)")]
    CapacityExceeded { capacity: usize },
}

#[derive(Debug)]
struct Slot<K, T> {
    id: K,
    refs: u32,
    handle: T,
}

/// Fixed-size, reference-counted directory of open handles.
#[derive(Debug)]
pub struct HandleRegistry<K, T, const N: usize> {
    slots: [Option<Slot<K, T>>; N],
    next_free: usize,
    occupied: usize,
}

impl<K: Copy + Eq, T, const N: usize> HandleRegistry<K, T, N> {
    pub fn new() -> Self {
        assert!(N > 0, "registry capacity must be non-zero");
        Self {
            slots: std::array::from_fn(|_| None),
            next_free: 0,
            occupied: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    fn position(&self, id: K) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(s) if s.id == id))
    }

    /// Whether `id` is registered. Takes no reference.
    pub fn contains(&self, id: K) -> bool {
        self.position(id).is_some()
    }

    /// Look up `id` and take a reference on a hit.
    ///
    /// Returns the slot index and the handle. A miss changes nothing.
    pub fn find_ref(&mut self, id: K) -> Option<(usize, &T)> {
        let index = self.position(id)?;
        let slot = self.slots[index].as_mut()?;
        debug_assert!(slot.refs > 0);
        slot.refs += 1;
        Some((index, &slot.handle))
    }

    /// Register `handle` under `id` with a reference count of one.
    ///
    /// On failure the handle is handed back so the caller can tear it down.
    pub fn insert(&mut self, id: K, handle: T) -> Result<usize, (RegistryError, T)> {
        if self.contains(id) {
            return Err((RegistryError::Duplicate, handle));
        }
        if self.occupied >= N {
            return Err((RegistryError::CapacityExceeded { capacity: N }, handle));
        }

        let index = self.next_free;
        debug_assert!(self.slots[index].is_none(), "free cursor on occupied slot");
        self.slots[index] = Some(Slot {
            id,
            refs: 1,
            handle,
        });
        self.occupied += 1;

        if self.occupied < N {
            // Circular scan starting just past the slot we used.
            let mut i = (index + 1) % N;
            while i != index {
                if self.slots[i].is_none() {
                    self.next_free = i;
                    break;
                }
                i = (i + 1) % N;
            }
        }
        Ok(index)
    }

    /// Drop one reference on the handle registered at `index` under `id`.
    ///
    /// Returns the handle when that was the last reference: the slot is
    /// vacated and becomes the next one handed out. Returns `None` otherwise,
    /// including when `index` does not hold `id`.
    pub fn release(&mut self, index: usize, id: K) -> Option<T> {
        let slot = self.slots.get_mut(index)?.as_mut()?;
        if slot.id != id {
            debug_assert!(false, "release of slot {index} with a foreign id");
            return None;
        }
        slot.refs -= 1;
        if slot.refs > 0 {
            return None;
        }

        let vacated = self.slots[index].take()?;
        self.occupied -= 1;
        self.next_free = index;
        Some(vacated.handle)
    }

    /// Reference count of `id`, or zero if it is not registered.
    pub fn refs(&self, id: K) -> u32 {
        self.position(id)
            .and_then(|i| self.slots[i].as_ref())
            .map(|s| s.refs)
            .unwrap_or(0)
    }

    /// Identifiers of all occupied slots, in slot order.
    pub fn ids(&self) -> impl Iterator<Item = K> + '_ {
        self.slots.iter().flatten().map(|s| s.id)
    }
}

impl<K: Copy + Eq, T, const N: usize> Default for HandleRegistry<K, T, N> {
    fn default() -> Self {
        Self::new()
    }
}
