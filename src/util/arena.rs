//! Generational slot storage.
//!
//! Backs the registration table of a [`ReleasePool`](crate::cx::ReleasePool):
//! every registered cleanup gets an [`ArenaIndex`] it can later be removed by.
//! A stale index (slot reused since) never removes the new occupant.

use core::fmt;

/// An index into an arena with a generation counter for ABA safety.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaIndex {
    index: usize,
    generation: u32,
}

impl ArenaIndex {
    /// Returns the raw slot position.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }

    /// Returns the generation counter.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({}:{})", self.index, self.generation)
    }
}

#[derive(Debug)]
enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Vacant { next_free: Option<usize>, generation: u32 },
}

/// Slot storage with a free list and generation-checked indices.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<usize>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    /// Returns the number of occupied slots.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no slot is occupied.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores `value`, reusing a vacant slot when there is one.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.len += 1;
        if let Some(index) = self.free_head {
            if let Some(slot) = self.slots.get_mut(index) {
                if let Slot::Vacant {
                    next_free,
                    generation,
                } = *slot
                {
                    self.free_head = next_free;
                    *slot = Slot::Occupied { value, generation };
                    return ArenaIndex { index, generation };
                }
            }
        }
        let index = self.slots.len();
        self.slots.push(Slot::Occupied {
            value,
            generation: 0,
        });
        ArenaIndex {
            index,
            generation: 0,
        }
    }

    /// Removes and returns the value at `index` if it is still the occupant.
    pub fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(index.index)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == index.generation => {
                let vacant = Slot::Vacant {
                    next_free: self.free_head,
                    generation: generation.wrapping_add(1),
                };
                let old = core::mem::replace(slot, vacant);
                self.free_head = Some(index.index);
                self.len -= 1;
                match old {
                    Slot::Occupied { value, .. } => Some(value),
                    Slot::Vacant { .. } => None,
                }
            }
            _ => None,
        }
    }

    /// Returns a reference to the occupant of `index`.
    #[must_use]
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        match self.slots.get(index.index)? {
            Slot::Occupied { value, generation } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Empties the arena, returning every occupant in slot order.
    pub fn drain(&mut self) -> Vec<T> {
        let slots = core::mem::take(&mut self.slots);
        self.free_head = None;
        self.len = 0;
        slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Occupied { value, .. } => Some(value),
                Slot::Vacant { .. } => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn stale_index_does_not_remove_new_occupant() {
        let mut arena = Arena::new();
        let first = arena.insert(1);
        assert_eq!(arena.remove(first), Some(1));
        let second = arena.insert(2);
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());
        assert_eq!(arena.remove(first), None);
        assert_eq!(arena.get(second), Some(&2));
    }

    #[test]
    fn drain_skips_vacant_slots() {
        let mut arena = Arena::new();
        let a = arena.insert(10);
        arena.insert(20);
        arena.insert(30);
        arena.remove(a);
        assert_eq!(arena.drain(), vec![20, 30]);
        assert!(arena.is_empty());
        assert_eq!(arena.insert(40).index(), 0);
    }
}
