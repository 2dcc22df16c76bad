/*!
 * Id Allocator
 *
 * Per-kind FIFO free list of table slots. Each slot remembers the id it will
 * hand out next; freeing a slot bumps that id by the table capacity, so a
 * stale handle to a freed object keeps failing the slot's id comparison
 * until the allocator has cycled through every generation.
 *
 * Ids are `generation * capacity + slot + 1`, which keeps every live id
 * strictly positive.
 */

use crate::core::errors::KernelResult;
use crate::core::types::{ObjectId, ObjectKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::error;

struct FreeList {
    queue: VecDeque<usize>,
    next_id: Box<[ObjectId]>,
    in_use: Box<[bool]>,
    live: usize,
}

/// Master list lock plus free list for one object kind
pub struct IdAllocator {
    kind: ObjectKind,
    capacity: usize,
    inner: Mutex<FreeList>,
}

impl IdAllocator {
    pub fn new(kind: ObjectKind, capacity: usize) -> Self {
        let capacity = capacity.clamp(1, (ObjectId::MAX / 2) as usize);
        Self {
            kind,
            capacity,
            inner: Mutex::new(FreeList {
                queue: (0..capacity).collect(),
                next_id: (0..capacity).map(|slot| slot as ObjectId + 1).collect(),
                in_use: vec![false; capacity].into_boxed_slice(),
                live: 0,
            }),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Slot an id would live in; `None` for ids no allocation can produce
    #[inline]
    pub fn slot_of(&self, id: ObjectId) -> Option<usize> {
        if id <= 0 {
            return None;
        }
        Some((id as usize - 1) % self.capacity)
    }

    /// Pop the head of the free list
    pub fn allocate(&self) -> KernelResult<(ObjectId, usize)> {
        let mut list = self.inner.lock();
        let slot = list.queue.pop_front().ok_or(self.kind.exhausted())?;
        list.in_use[slot] = true;
        list.live += 1;
        Ok((list.next_id[slot], slot))
    }

    /// Return a slot to the tail of the free list with its next id bumped
    ///
    /// # Panics
    ///
    /// On a double free or an id the slot never handed out. Both mean the
    /// table is corrupted.
    pub fn free(&self, id: ObjectId) {
        let Some(slot) = self.slot_of(id) else {
            error!(kind = %self.kind, id, "freeing an id no allocation produced");
            panic!("{} table corrupted: free of invalid id {}", self.kind, id);
        };

        let mut list = self.inner.lock();
        if !list.in_use[slot] || list.next_id[slot] != id {
            error!(
                kind = %self.kind,
                id,
                slot,
                expected = list.next_id[slot],
                "double free detected"
            );
            panic!("{} table corrupted: double free of id {}", self.kind, id);
        }

        let next = id
            .checked_add(self.capacity as ObjectId)
            .unwrap_or(slot as ObjectId + 1);
        list.next_id[slot] = next;
        list.in_use[slot] = false;
        list.live -= 1;
        list.queue.push_back(slot);
    }

    /// Number of ids currently handed out
    pub fn live(&self) -> usize {
        self.inner.lock().live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::Status;

    #[test]
    fn test_ids_start_at_one() {
        let ids = IdAllocator::new(ObjectKind::Semaphore, 4);
        assert_eq!(ids.allocate().unwrap(), (1, 0));
        assert_eq!(ids.allocate().unwrap(), (2, 1));
    }

    #[test]
    fn test_freed_slot_goes_to_tail_with_new_generation() {
        let ids = IdAllocator::new(ObjectKind::Port, 3);
        let (first, slot) = ids.allocate().unwrap();
        ids.free(first);

        // Slots 1 and 2 are handed out before slot 0 comes back
        assert_eq!(ids.allocate().unwrap().0, 2);
        assert_eq!(ids.allocate().unwrap().0, 3);
        let (reused, reused_slot) = ids.allocate().unwrap();
        assert_eq!(reused_slot, slot);
        assert_eq!(reused, first + 3);
        assert_eq!(ids.slot_of(reused), Some(slot));
    }

    #[test]
    fn test_exhaustion_maps_to_kind() {
        let ids = IdAllocator::new(ObjectKind::Semaphore, 1);
        ids.allocate().unwrap();
        assert_eq!(ids.allocate(), Err(Status::NoMoreSems));

        let areas = IdAllocator::new(ObjectKind::Area, 1);
        areas.allocate().unwrap();
        assert_eq!(areas.allocate(), Err(Status::NoMemory));
    }

    #[test]
    fn test_live_count() {
        let ids = IdAllocator::new(ObjectKind::Thread, 8);
        let (a, _) = ids.allocate().unwrap();
        ids.allocate().unwrap();
        assert_eq!(ids.live(), 2);
        ids.free(a);
        assert_eq!(ids.live(), 1);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_panics() {
        let ids = IdAllocator::new(ObjectKind::Semaphore, 2);
        let (id, _) = ids.allocate().unwrap();
        ids.free(id);
        ids.free(id);
    }

    #[test]
    fn test_invalid_ids_have_no_slot() {
        let ids = IdAllocator::new(ObjectKind::Team, 4);
        assert_eq!(ids.slot_of(0), None);
        assert_eq!(ids.slot_of(-3), None);
    }
}
