/*!
 * Semaphore Engine
 *
 * Counting semaphores stored in an object table.
 *
 * # Design
 *
 * - Fast path: no queue and enough count, decrement under the slot lock
 * - Slow path: the demand is subtracted from `count` up front and the
 *   waiter queued, so a negative count always equals the blocked demand
 * - Grants are strict FIFO; a queued group acquire is never bypassed by a
 *   later, smaller one and is never partially satisfied
 * - Whoever takes a waiter off the queue without granting it puts its
 *   demand back, which is how timeouts and interrupts leave no trace
 * - Waiters are woken only after the slot lock is dropped
 */

use super::types::{SemEntry, SemInfo};
use super::waiter::{Waiter, WaitContext, CANCELLED, DELETED, GRANTED, INTERRUPTED, PENDING};
use crate::core::errors::{KernelResult, Status};
use crate::core::limits::SEM_MAX_COUNT;
use crate::core::sync;
use crate::core::timeout::{ReleaseFlags, Timeout, WaitFlags, WaitOutcome};
use crate::core::types::{ObjectKind, SemId, TeamId, ThreadId};
use crate::kernel::ObjectTable;
use std::sync::Arc;
use tracing::{debug, info};

/// Semaphore table and its operations
pub struct SemaphoreEngine {
    table: ObjectTable<SemEntry>,
}

impl SemaphoreEngine {
    pub fn new(capacity: usize) -> Self {
        info!(capacity, "Semaphore engine initialized");
        Self {
            table: ObjectTable::new(ObjectKind::Semaphore, capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Number of live semaphores
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Create a semaphore with `count` initial units, owned by `owner`
    pub fn create(&self, count: i32, name: &str, owner: TeamId) -> KernelResult<SemId> {
        if count < 0 {
            return Err(Status::BadValue);
        }
        let id = self.table.insert(SemEntry::new(count, name, owner))?;
        debug!(sem = id, count, owner, name, "Created semaphore");
        Ok(id)
    }

    /// Delete a semaphore; blocked acquirers fail with `BadSemId`
    pub fn delete(&self, id: SemId) -> KernelResult<()> {
        self.delete_checked(id, |_| Ok(()))
    }

    /// Delete after `check` accepts the owner, under the slot lock
    pub fn delete_checked(
        &self,
        id: SemId,
        check: impl FnOnce(TeamId) -> KernelResult<()>,
    ) -> KernelResult<()> {
        let entry = self.table.remove_if(id, |sem| check(sem.owner))?;
        let mut woken = 0usize;
        for waiter in entry.waiters.iter() {
            if waiter.transition(DELETED).is_ok() {
                woken += 1;
            }
            waiter.wake();
        }
        debug!(sem = id, owner = entry.owner, woken, "Deleted semaphore");
        Ok(())
    }

    /// Legacy `acquire_sem_etc`
    pub fn acquire_etc(
        &self,
        id: SemId,
        count: i32,
        flags: WaitFlags,
        timeout: i64,
        ctx: Option<&WaitContext>,
    ) -> KernelResult<()> {
        if flags.contains(WaitFlags::RELATIVE_TIMEOUT | WaitFlags::ABSOLUTE_TIMEOUT) {
            return Err(Status::BadValue);
        }
        let interruptible = flags.contains(WaitFlags::CAN_INTERRUPT);
        self.acquire(id, count, Timeout::from_flags(flags, timeout), interruptible, ctx)
    }

    /// Subtract `count`, blocking according to `timeout` when unavailable
    pub fn acquire(
        &self,
        id: SemId,
        count: i32,
        timeout: Timeout,
        interruptible: bool,
        ctx: Option<&WaitContext>,
    ) -> KernelResult<()> {
        self.wait_units(id, count, timeout, interruptible, ctx, false)
    }

    /// Wait until `count` units could be acquired, without taking them
    ///
    /// Queues in FIFO order like an acquire, so it never overtakes an
    /// earlier waiter, but a grant leaves the count untouched.
    pub fn wait_available(
        &self,
        id: SemId,
        count: i32,
        flags: WaitFlags,
        timeout: i64,
        ctx: Option<&WaitContext>,
    ) -> KernelResult<()> {
        if flags.contains(WaitFlags::RELATIVE_TIMEOUT | WaitFlags::ABSOLUTE_TIMEOUT) {
            return Err(Status::BadValue);
        }
        let interruptible = flags.contains(WaitFlags::CAN_INTERRUPT);
        let timeout = Timeout::from_flags(flags, timeout);
        self.wait_units(id, count, timeout, interruptible, ctx, true)
    }

    fn wait_units(
        &self,
        id: SemId,
        count: i32,
        timeout: Timeout,
        interruptible: bool,
        ctx: Option<&WaitContext>,
        peek: bool,
    ) -> KernelResult<()> {
        if count <= 0 {
            return Err(Status::BadValue);
        }
        let thread = ctx.map_or(-1, WaitContext::thread);

        let waiter = {
            let mut sem = self.table.lock(id)?;
            if sem.waiters.is_empty() && sem.count >= count as i64 {
                if !peek {
                    sem.count -= count as i64;
                    sem.latest_holder = thread;
                }
                return Ok(());
            }
            if sem.sealed {
                return Err(Status::BadSemId);
            }
            if !timeout.can_block() {
                return Err(timeout.unsatisfied());
            }
            if ctx.is_some_and(|ctx| ctx.should_abort(interruptible)) {
                return Err(Status::Interrupted);
            }

            let mut waiter = Waiter::new(count, thread, interruptible);
            if peek {
                waiter = waiter.peeking();
            }
            let waiter = Arc::new(waiter);
            sem.count -= waiter.count;
            sem.pending += waiter.count;
            sem.waiters.push_back(waiter.clone());
            waiter
        };

        self.block(id, &waiter, timeout, ctx)
    }

    fn block(
        &self,
        id: SemId,
        waiter: &Arc<Waiter>,
        timeout: Timeout,
        ctx: Option<&WaitContext>,
    ) -> KernelResult<()> {
        {
            let _published = ctx.map(|ctx| ctx.publish(waiter));
            sync::wait(&waiter.state, PENDING, timeout.deadline());
        }

        let outcome = match waiter.state() {
            GRANTED => WaitOutcome::Granted,
            DELETED => WaitOutcome::Deleted,
            _ => self.withdraw(id, waiter),
        };
        outcome.into_result(Status::BadSemId)
    }

    /// Take a timed-out or interrupted waiter back off the queue
    fn withdraw(&self, id: SemId, waiter: &Arc<Waiter>) -> WaitOutcome {
        // A vanished slot means the semaphore was deleted under us
        let Ok(mut sem) = self.table.lock(id) else {
            return WaitOutcome::Deleted;
        };

        let reason = match waiter.transition(CANCELLED) {
            Ok(()) => WaitOutcome::TimedOut,
            Err(GRANTED) => return WaitOutcome::Granted,
            Err(DELETED) => return WaitOutcome::Deleted,
            Err(INTERRUPTED) => WaitOutcome::Interrupted,
            Err(_) => WaitOutcome::TimedOut,
        };

        if let Some(position) = sem.waiters.iter().position(|w| Arc::ptr_eq(w, waiter)) {
            sem.waiters.remove(position);
            sem.restore(waiter);
        }
        let woken = Self::grant_waiters(&mut sem);
        drop(sem);
        Self::wake(woken);
        reason
    }

    /// Hand available units to queued waiters in FIFO order
    fn grant_waiters(sem: &mut SemEntry) -> Vec<Arc<Waiter>> {
        let mut woken = Vec::new();
        while let Some(front) = sem.waiters.front().cloned() {
            if !front.is_pending() {
                sem.waiters.pop_front();
                sem.restore(&front);
                continue;
            }
            if sem.available() < front.count {
                break;
            }
            sem.waiters.pop_front();
            if front.transition(GRANTED).is_ok() {
                if front.peek {
                    sem.restore(&front);
                } else {
                    sem.pending -= front.count;
                    sem.latest_holder = front.thread;
                }
                woken.push(front);
            } else {
                sem.restore(&front);
            }
        }
        woken
    }

    fn wake(woken: Vec<Arc<Waiter>>) {
        for waiter in woken {
            waiter.wake();
        }
    }

    /// Legacy `release_sem_etc`
    pub fn release_etc(&self, id: SemId, count: i32, flags: ReleaseFlags) -> KernelResult<()> {
        if count <= 0 && !flags.contains(ReleaseFlags::RELEASE_ALL) {
            return Err(Status::BadValue);
        }

        let woken = {
            let mut sem = self.table.lock(id)?;
            if flags.contains(ReleaseFlags::RELEASE_IF_WAITING_ONLY) && sem.waiters.is_empty() {
                return Ok(());
            }
            let amount = if flags.contains(ReleaseFlags::RELEASE_ALL) {
                (-sem.count).max(0)
            } else {
                count as i64
            };
            if sem.available() + amount > SEM_MAX_COUNT as i64 {
                return Err(Status::BadValue);
            }
            sem.count += amount;
            Self::grant_waiters(&mut sem)
        };

        Self::wake(woken);
        Ok(())
    }

    pub fn release(&self, id: SemId, count: i32) -> KernelResult<()> {
        self.release_etc(id, count, ReleaseFlags::NONE)
    }

    /// Observable count; negative when acquirers are blocked
    pub fn get_count(&self, id: SemId) -> KernelResult<i32> {
        self.table.with(id, |sem| sem.observable_count())
    }

    /// Transfer ownership; returns the previous owner
    pub fn set_owner(&self, id: SemId, team: TeamId) -> KernelResult<TeamId> {
        self.table
            .with(id, |sem| std::mem::replace(&mut sem.owner, team))
    }

    pub fn owner(&self, id: SemId) -> KernelResult<TeamId> {
        self.table.with(id, |sem| sem.owner)
    }

    pub fn info(&self, id: SemId) -> KernelResult<SemInfo> {
        self.table.with(id, |sem| sem.info(id))
    }

    /// Next semaphore owned by `team` at or after `cookie`
    pub fn next_info(&self, team: TeamId, cookie: &mut i32) -> KernelResult<SemInfo> {
        self.table
            .next_after(cookie, |id, sem| (sem.owner == team).then(|| sem.info(id)))
            .ok_or(Status::BadValue)
    }

    /// Every semaphore owned by `team`
    pub fn owned_by(&self, team: TeamId) -> Vec<SemId> {
        self.table.ids_where(|sem| sem.owner == team)
    }

    /// Wake every waiter with `Deleted` and refuse further blocking acquires
    ///
    /// Acquires the current count can satisfy keep succeeding, which lets a
    /// closed port drain.
    pub fn seal(&self, id: SemId) -> KernelResult<()> {
        let woken = {
            let mut sem = self.table.lock(id)?;
            sem.sealed = true;
            let mut woken = Vec::with_capacity(sem.waiters.len());
            while let Some(waiter) = sem.waiters.pop_front() {
                sem.restore(&waiter);
                if waiter.transition(DELETED).is_ok() {
                    woken.push(waiter);
                }
            }
            woken
        };
        Self::wake(woken);
        Ok(())
    }

    /// Thread currently recorded as the latest holder
    pub fn latest_holder(&self, id: SemId) -> KernelResult<ThreadId> {
        self.table.with(id, |sem| sem.latest_holder)
    }

    #[cfg(test)]
    fn waiters(&self, id: SemId) -> usize {
        self.table.with(id, |sem| sem.waiters.len()).unwrap_or(0)
    }
}
