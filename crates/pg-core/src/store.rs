//! Identity store: identifier-keyed container with stable insertion order.
//!
//! Values live in `Arc`s so that cloning a store (for a history snapshot or
//! a child stage) copies only the slot table. The first write through
//! `get_mut` after a clone detaches that one value (`Arc::make_mut`), so a
//! stored snapshot never observes later mutations.

use crate::error::StageError;
use crate::id::StageId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Anything keyed by a `StageId`.
pub trait Identified {
    fn id(&self) -> StageId;
}

/// Direct reference to a slot in an `IdentityStore`.
///
/// Carries the identifier it was issued for, so a handle whose slot has
/// since been emptied or reused reads as absent instead of aliasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    slot: u32,
    id: StageId,
}

impl Handle {
    pub fn id(&self) -> StageId {
        self.id
    }
}

/// Below this many slots removal never compacts.
const COMPACT_MIN_SLOTS: usize = 64;

pub struct IdentityStore<T> {
    /// Insertion-ordered slots; `None` marks a removed value.
    slots: Vec<Option<Arc<T>>>,
    /// Identifier → slot.
    index: HashMap<StageId, u32>,
}

impl<T> Default for IdentityStore<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> Clone for IdentityStore<T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            index: self.index.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for IdentityStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().flatten().map(|v| &**v))
            .finish()
    }
}

impl<T: PartialEq> PartialEq for IdentityStore<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slots
            .iter()
            .flatten()
            .map(|v| &**v)
            .eq(other.slots.iter().flatten().map(|v| &**v))
    }
}

impl<T: Identified + Clone> IdentityStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value under its own identifier.
    ///
    /// # Errors
    /// `DuplicateId` when the identifier is already present; the store is
    /// left untouched.
    pub fn insert(&mut self, value: T) -> Result<Handle, StageError> {
        let id = value.id();
        if self.index.contains_key(&id) {
            return Err(StageError::DuplicateId(id));
        }
        let slot = self.slots.len() as u32;
        self.slots.push(Some(Arc::new(value)));
        self.index.insert(id, slot);
        Ok(Handle { slot, id })
    }

    pub fn get(&self, id: StageId) -> Option<&T> {
        let slot = *self.index.get(&id)?;
        self.slots[slot as usize].as_deref()
    }

    /// Mutable access; detaches the value from any snapshot sharing it.
    pub fn get_mut(&mut self, id: StageId) -> Option<&mut T> {
        let slot = *self.index.get(&id)?;
        self.slots[slot as usize].as_mut().map(Arc::make_mut)
    }

    pub fn get_by_handle(&self, handle: Handle) -> Option<&T> {
        let value = self.slots.get(handle.slot as usize)?.as_deref()?;
        (value.id() == handle.id).then_some(value)
    }

    pub fn handle_of(&self, id: StageId) -> Option<Handle> {
        self.index.get(&id).map(|&slot| Handle { slot, id })
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.index.contains_key(&id)
    }

    /// Remove by identifier. Removing an absent identifier is a no-op.
    pub fn remove(&mut self, id: StageId) -> Option<T> {
        let slot = self.index.remove(&id)?;
        let value = self.slots[slot as usize].take().map(Arc::unwrap_or_clone);
        if self.slots.len() >= COMPACT_MIN_SLOTS && self.slots.len() > 2 * self.index.len() {
            self.compact();
        }
        value
    }

    /// Drop empty slots, keeping insertion order, and rebuild the index.
    fn compact(&mut self) {
        let before = self.slots.len();
        self.slots.retain(Option::is_some);
        self.index.clear();
        for (slot, value) in self.slots.iter().enumerate() {
            if let Some(value) = value {
                self.index.insert(value.id(), slot as u32);
            }
        }
        log::trace!("compacted identity store {before} -> {} slots", self.slots.len());
    }

    /// Slots in use, live or emptied.
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// All values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().flatten().map(|v| &**v)
    }

    /// All identifiers in insertion order.
    pub fn ids(&self) -> Vec<StageId> {
        self.values().map(Identified::id).collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }

    /// Whether both stores hold the very same allocation for `id`.
    pub fn shares_value(&self, other: &Self, id: StageId) -> bool {
        let slot_of = |s: &Self| {
            s.index
                .get(&id)
                .and_then(|&slot| s.slots[slot as usize].clone())
        };
        match (slot_of(self), slot_of(other)) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
            _ => false,
        }
    }
}
