/*!
 * Waiters and Wait Contexts
 *
 * A `Waiter` is one queued acquire. Its state word is also the word the
 * blocked thread parks on, so every transition out of `PENDING` is a single
 * compare-and-swap followed by a wake.
 *
 * A `WaitContext` belongs to one broker thread and lets other threads
 * interrupt or kill whatever wait it is currently in.
 */

use crate::core::sync;
use crate::core::types::ThreadId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

pub(crate) const PENDING: u32 = 0;
pub(crate) const GRANTED: u32 = 1;
pub(crate) const INTERRUPTED: u32 = 2;
pub(crate) const DELETED: u32 = 3;
pub(crate) const CANCELLED: u32 = 4;

/// One queued acquire request
#[repr(C, align(64))]
pub(crate) struct Waiter {
    pub state: AtomicU32,
    pub count: i64,
    pub thread: ThreadId,
    pub interruptible: bool,
    /// Wants to see the units, not take them
    pub peek: bool,
}

impl Waiter {
    pub fn new(count: i32, thread: ThreadId, interruptible: bool) -> Self {
        Self {
            state: AtomicU32::new(PENDING),
            count: count as i64,
            thread,
            interruptible,
            peek: false,
        }
    }

    pub fn peeking(mut self) -> Self {
        self.peek = true;
        self
    }

    #[inline]
    pub fn state(&self) -> u32 {
        self.state.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.state() == PENDING
    }

    /// Move out of `PENDING`; returns the previous state on failure
    #[inline]
    pub fn transition(&self, to: u32) -> Result<(), u32> {
        self.state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }

    #[inline]
    pub fn wake(&self) {
        sync::wake_all(&self.state);
    }
}

/// Per-thread interrupt and kill state
pub struct WaitContext {
    thread: ThreadId,
    current: Mutex<Option<Arc<Waiter>>>,
    interrupt_pending: AtomicBool,
    killed: AtomicBool,
}

impl WaitContext {
    pub fn new(thread: ThreadId) -> Self {
        Self {
            thread,
            current: Mutex::new(None),
            interrupt_pending: AtomicBool::new(false),
            killed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    pub fn has_pending_interrupt(&self) -> bool {
        self.interrupt_pending.load(Ordering::Acquire)
    }

    /// Whether a wait about to block must fail with `Interrupted` instead
    ///
    /// Consumes a pending interrupt when the wait is interruptible.
    pub(crate) fn should_abort(&self, interruptible: bool) -> bool {
        if self.is_killed() {
            return true;
        }
        interruptible && self.interrupt_pending.swap(false, Ordering::AcqRel)
    }

    /// Make `waiter` the current wait until the returned guard drops
    ///
    /// Rechecks kill and interrupt state under the same lock `interrupt`
    /// takes, so a signal that raced the enqueue is never lost.
    pub(crate) fn publish(&self, waiter: &Arc<Waiter>) -> Published<'_> {
        let mut current = self.current.lock();
        if self.should_abort(waiter.interruptible) {
            let _ = waiter.transition(INTERRUPTED);
        }
        *current = Some(waiter.clone());
        Published { ctx: self }
    }

    /// Interrupt the current wait
    ///
    /// `force` interrupts regardless of `CAN_INTERRUPT`. An interrupt that
    /// reaches no wait is remembered for the next interruptible one; returns
    /// whether a wait was interrupted.
    pub fn interrupt(&self, force: bool) -> bool {
        let current = self.current.lock();
        if let Some(waiter) = current.as_ref() {
            if (force || waiter.interruptible) && waiter.transition(INTERRUPTED).is_ok() {
                waiter.wake();
                return true;
            }
        }
        if !force {
            self.interrupt_pending.store(true, Ordering::Release);
        }
        false
    }

    /// Fail the current and every later blocking wait with `Interrupted`
    pub fn kill(&self) {
        self.killed.store(true, Ordering::Release);
        self.interrupt(true);
    }
}

impl std::fmt::Debug for WaitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitContext")
            .field("thread", &self.thread)
            .field("killed", &self.is_killed())
            .field("interrupt_pending", &self.has_pending_interrupt())
            .finish()
    }
}

pub(crate) struct Published<'a> {
    ctx: &'a WaitContext,
}

impl Drop for Published<'_> {
    fn drop(&mut self) {
        *self.ctx.current.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_only_from_pending() {
        let waiter = Waiter::new(1, 3, false);
        assert!(waiter.transition(GRANTED).is_ok());
        assert_eq!(waiter.transition(CANCELLED), Err(GRANTED));
    }

    #[test]
    fn test_interrupt_without_wait_is_remembered() {
        let ctx = WaitContext::new(1);
        assert!(!ctx.interrupt(false));
        assert!(ctx.has_pending_interrupt());
        assert!(!ctx.should_abort(false));
        assert!(ctx.should_abort(true));
        assert!(!ctx.has_pending_interrupt());
    }

    #[test]
    fn test_publish_applies_pending_interrupt() {
        let ctx = WaitContext::new(1);
        ctx.interrupt(false);
        let waiter = Arc::new(Waiter::new(1, 1, true));
        let _published = ctx.publish(&waiter);
        assert_eq!(waiter.state(), INTERRUPTED);
    }

    #[test]
    fn test_interrupt_skips_uninterruptible_wait() {
        let ctx = WaitContext::new(1);
        let waiter = Arc::new(Waiter::new(1, 1, false));
        let published = ctx.publish(&waiter);
        assert!(!ctx.interrupt(false));
        assert!(waiter.is_pending());
        assert!(ctx.interrupt(true));
        assert_eq!(waiter.state(), INTERRUPTED);
        drop(published);
    }

    #[test]
    fn test_kill_is_sticky() {
        let ctx = WaitContext::new(1);
        ctx.kill();
        assert!(ctx.should_abort(false));
        assert!(ctx.should_abort(false));
        assert!(ctx.is_killed());
    }
}
