/*!
 * Futex-Style Wait Word
 *
 * Uses parking_lot_core for futex-like operations on all platforms.
 * On Linux, this maps directly to futex syscalls for minimal overhead.
 *
 * # Design
 *
 * Follows the Linux futex contract: a thread parks on the address of a
 * 32-bit word only while the word still holds the value it expects. The
 * compare runs under the parking bucket lock, so a waker that changes the
 * word and then unparks can never be missed.
 */

use parking_lot_core::{park, unpark_all, ParkResult, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Result of [`wait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordWait {
    /// The word no longer holds the expected value
    Changed,
    /// The deadline passed with the word unchanged
    TimedOut,
}

#[inline]
fn key(word: &AtomicU32) -> usize {
    word as *const AtomicU32 as usize
}

/// Block while `word == expected`, until `deadline` if one is given
///
/// Spurious unparks are absorbed here; callers only ever see a changed word
/// or an expired deadline.
pub fn wait(word: &AtomicU32, expected: u32, deadline: Option<Instant>) -> WordWait {
    loop {
        if word.load(Ordering::Acquire) != expected {
            return WordWait::Changed;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return WordWait::TimedOut;
            }
        }

        // SAFETY: the callbacks neither panic nor call back into parking_lot,
        // and the key is the address of a word the caller keeps alive for the
        // duration of the call.
        let result = unsafe {
            park(
                key(word),
                || word.load(Ordering::Acquire) == expected,
                || {},
                |_, _| {},
                DEFAULT_PARK_TOKEN,
                deadline,
            )
        };

        if let ParkResult::TimedOut = result {
            if word.load(Ordering::Acquire) == expected {
                return WordWait::TimedOut;
            }
            return WordWait::Changed;
        }
    }
}

/// Wake every thread parked on `word`; returns the number woken
pub fn wake_all(word: &AtomicU32) -> usize {
    // SAFETY: the key is only used for bucket lookup, never dereferenced.
    unsafe { unpark_all(key(word), DEFAULT_UNPARK_TOKEN) }
}
