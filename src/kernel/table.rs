/*!
 * Object Table
 *
 * Fixed-capacity arena of slots indexed by id, one table per object kind.
 *
 * # Locking
 *
 * Two levels: the allocator's list lock guards only the free list, and each
 * slot carries its own lock guarding the entry. The list lock is never held
 * while a slot lock is taken. Blocking waits always happen after the slot
 * lock is dropped.
 *
 * A lookup succeeds only when the slot's stored id equals the requested id,
 * so a handle that outlived its object reports the kind's bad-id status
 * instead of reaching whatever now occupies the slot.
 */

use super::id::IdAllocator;
use crate::core::errors::KernelResult;
use crate::core::types::{ObjectId, ObjectKind};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::error;

const FREE: ObjectId = -1;

struct Slot<T> {
    id: ObjectId,
    entry: Option<T>,
}

/// Arena of kernel objects of one kind
pub struct ObjectTable<T> {
    ids: IdAllocator,
    slots: Box<[Mutex<Slot<T>>]>,
}

/// Locked view of one live entry
pub type EntryGuard<'a, T> = MappedMutexGuard<'a, T>;

impl<T> ObjectTable<T> {
    pub fn new(kind: ObjectKind, capacity: usize) -> Self {
        let ids = IdAllocator::new(kind, capacity);
        let slots = (0..ids.capacity())
            .map(|_| Mutex::new(Slot { id: FREE, entry: None }))
            .collect();
        Self { ids, slots }
    }

    #[inline]
    pub fn kind(&self) -> ObjectKind {
        self.ids.kind()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ids.capacity()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.ids.live()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate an id and publish the entry built for it
    pub fn insert_with(&self, build: impl FnOnce(ObjectId) -> T) -> KernelResult<ObjectId> {
        let (id, slot) = self.ids.allocate()?;
        let mut guard = self.slots[slot].lock();
        if guard.id != FREE || guard.entry.is_some() {
            error!(kind = %self.kind(), id, slot, stale = guard.id, "allocated slot still occupied");
            panic!("{} table corrupted: slot {} occupied", self.kind(), slot);
        }
        guard.entry = Some(build(id));
        guard.id = id;
        Ok(id)
    }

    pub fn insert(&self, entry: T) -> KernelResult<ObjectId> {
        self.insert_with(|_| entry)
    }

    fn slot_guard(&self, id: ObjectId) -> KernelResult<MutexGuard<'_, Slot<T>>> {
        let slot = self.ids.slot_of(id).ok_or(self.kind().bad_id())?;
        let guard = self.slots[slot].lock();
        if guard.id != id {
            return Err(self.kind().bad_id());
        }
        Ok(guard)
    }

    /// Lock the slot named by `id`
    pub fn lock(&self, id: ObjectId) -> KernelResult<EntryGuard<'_, T>> {
        let guard = self.slot_guard(id)?;
        MutexGuard::try_map(guard, |slot| slot.entry.as_mut()).map_err(|_| self.kind().bad_id())
    }

    /// Run `f` with the entry locked
    pub fn with<R>(&self, id: ObjectId, f: impl FnOnce(&mut T) -> R) -> KernelResult<R> {
        let mut guard = self.lock(id)?;
        Ok(f(&mut guard))
    }

    /// Whether `id` currently names a live entry
    pub fn contains(&self, id: ObjectId) -> bool {
        self.lock(id).is_ok()
    }

    /// Invalidate `id` and return its entry
    pub fn remove(&self, id: ObjectId) -> KernelResult<T> {
        self.remove_if(id, |_| Ok(()))
    }

    /// Invalidate `id` once `check` accepts the locked entry
    ///
    /// The slot id is cleared under the slot lock before the id goes back
    /// to the allocator, so late arrivals see a bad id, never a half-torn
    /// entry.
    pub fn remove_if(
        &self,
        id: ObjectId,
        check: impl FnOnce(&T) -> KernelResult<()>,
    ) -> KernelResult<T> {
        let entry = {
            let mut guard = self.slot_guard(id)?;
            match guard.entry.as_ref() {
                Some(entry) => check(entry)?,
                None => return Err(self.kind().bad_id()),
            }
            guard.id = FREE;
            guard.entry.take()
        };
        self.ids.free(id);
        entry.ok_or(self.kind().bad_id())
    }

    /// Ids of every live entry matching `pred`, in slot order
    pub fn ids_where(&self, mut pred: impl FnMut(&T) -> bool) -> Vec<ObjectId> {
        let mut ids = Vec::new();
        for slot in self.slots.iter() {
            let guard = slot.lock();
            if let Some(entry) = guard.entry.as_ref() {
                if pred(entry) {
                    ids.push(guard.id);
                }
            }
        }
        ids
    }

    /// First live entry (in slot order) matching `pred`
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<ObjectId> {
        self.slots.iter().find_map(|slot| {
            let guard = slot.lock();
            match guard.entry.as_ref() {
                Some(entry) if pred(entry) => Some(guard.id),
                _ => None,
            }
        })
    }

    /// Cookie-based enumeration: the first entry at or after slot `*cookie`
    /// for which `view` returns `Some`. Advances the cookie past that slot.
    pub fn next_after<R>(
        &self,
        cookie: &mut i32,
        mut view: impl FnMut(ObjectId, &T) -> Option<R>,
    ) -> Option<R> {
        let start = (*cookie).max(0) as usize;
        for index in start..self.slots.len() {
            let guard = self.slots[index].lock();
            if let Some(entry) = guard.entry.as_ref() {
                if let Some(found) = view(guard.id, entry) {
                    *cookie = index as i32 + 1;
                    return Some(found);
                }
            }
        }
        *cookie = self.slots.len() as i32;
        None
    }
}
