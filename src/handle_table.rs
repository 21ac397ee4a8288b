//! Fixed-capacity slot allocator for connection and cursor handles.
//!
//! Slots are addressed by small non-negative indices which double as the
//! public handles. Free slots are kept on a stack so acquire and release are
//! O(1); the lowest indices are handed out first on a fresh table and a
//! released index is the next one reused.

use thiserror::Error;

/// Returned when every slot of a table is occupied.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("all {capacity} slots are in use")]
pub struct Exhausted {
    /// Capacity of the exhausted table.
    pub capacity: usize,
}

/// A fixed pool of slots, each either free or holding one `T`.
#[derive(Debug)]
pub struct HandleTable<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> HandleTable<T> {
    /// Creates a table with `capacity` free slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            free: (0..capacity).rev().collect(),
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of free slots.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.capacity() - self.free_count()
    }

    pub fn is_empty(&self) -> bool {
        self.free.len() == self.slots.len()
    }

    /// Reserves the next free slot without claiming it.
    ///
    /// The slot only becomes occupied when [`VacantEntry::insert`] is called;
    /// dropping the entry leaves the table untouched. Holding the entry keeps
    /// the table mutably borrowed, so reservation and population cannot be
    /// interleaved with another claim.
    pub fn vacant_entry(&mut self) -> Result<VacantEntry<'_, T>, Exhausted> {
        let Some(&index) = self.free.last() else {
            return Err(Exhausted {
                capacity: self.capacity(),
            });
        };
        Ok(VacantEntry { table: self, index })
    }

    /// Claims a free slot for `value` and returns its index.
    pub fn acquire(&mut self, value: T) -> Result<usize, Exhausted> {
        Ok(self.vacant_entry()?.insert(value))
    }

    /// Empties the slot at `index` and returns what it held.
    ///
    /// Releasing a free or out-of-range slot is a no-op.
    pub fn release(&mut self, index: usize) -> Option<T> {
        let value = self.slots.get_mut(index)?.take()?;
        self.free.push(index);
        Some(value)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)?.as_mut()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Indices of all occupied slots, ascending.
    pub fn occupied(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| i))
            .collect()
    }
}

/// A reserved but not yet populated slot.
#[derive(Debug)]
pub struct VacantEntry<'a, T> {
    table: &'a mut HandleTable<T>,
    index: usize,
}

impl<T> VacantEntry<'_, T> {
    /// Index the slot will have once populated.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Populates the slot and returns its index.
    pub fn insert(self, value: T) -> usize {
        let popped = self.table.free.pop();
        debug_assert_eq!(popped, Some(self.index));
        self.table.slots[self.index] = Some(value);
        self.index
    }
}
