/*!
 * Timeout Translator
 *
 * Converts the legacy `(flags, timeout)` pair of every blocking call into a
 * host deadline, and the outcome of a wait back into a status.
 *
 * ## Timeout Modes
 *
 * - **Infinite**: no timeout flag given
 * - **Try**: relative timeout `<= 0`, or negative absolute timeout
 * - **Deadline**: relative timeout added to now, or an absolute wall-clock
 *   time (microseconds since the UNIX epoch) converted to an `Instant`
 *
 * ## Example
 *
 * ```ignore
 * let timeout = Timeout::from_flags(WaitFlags::RELATIVE_TIMEOUT, 500_000);
 * handle.acquire_sem_etc(sem, 1, WaitFlags::RELATIVE_TIMEOUT, 500_000)?;
 * ```
 */

use super::errors::Status;
use super::types::now_micros;
use bitflags::bitflags;
use std::time::{Duration, Instant};

bitflags! {
    /// Flags accepted by blocking operations
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WaitFlags: u32 {
        /// Wait may be interrupted by `interrupt_thread`
        const CAN_INTERRUPT = 0x01;
        /// Timeout is relative to now (legacy `B_TIMEOUT`)
        const TIMEOUT = 0x08;
        /// Timeout is relative to now
        const RELATIVE_TIMEOUT = 0x08;
        /// Timeout is an absolute wall-clock time
        const ABSOLUTE_TIMEOUT = 0x10;
        /// Wait may be interrupted by `kill_thread` (always true on this host)
        const KILL_CAN_INTERRUPT = 0x20;
    }
}

impl WaitFlags {
    pub const NONE: WaitFlags = WaitFlags::empty();
}

bitflags! {
    /// Flags accepted by `release_sem_etc`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ReleaseFlags: u32 {
        /// Accepted and ignored; the host scheduler decides
        const DO_NOT_RESCHEDULE = 0x02;
        /// Release exactly enough to satisfy every queued waiter
        const RELEASE_ALL = 0x08;
        /// Release only when someone is waiting
        const RELEASE_IF_WAITING_ONLY = 0x10;
    }
}

impl ReleaseFlags {
    pub const NONE: ReleaseFlags = ReleaseFlags::empty();
}

/// Host-level timeout of a single wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Block until satisfied, deleted or interrupted
    Infinite,
    /// Never block
    Try,
    /// Block until the instant passes
    Deadline(Instant),
}

impl Timeout {
    /// Translate legacy flags plus a microsecond value
    pub fn from_flags(flags: WaitFlags, micros: i64) -> Self {
        if flags.contains(WaitFlags::ABSOLUTE_TIMEOUT) {
            if micros < 0 {
                return Timeout::Try;
            }
            let now_instant = Instant::now();
            let now_wall = now_micros() as i64;
            let remaining = micros.saturating_sub(now_wall);
            if remaining <= 0 {
                return Timeout::Deadline(now_instant);
            }
            return Timeout::Deadline(Self::add_micros(now_instant, remaining));
        }

        if flags.contains(WaitFlags::RELATIVE_TIMEOUT) {
            if micros <= 0 {
                return Timeout::Try;
            }
            return Timeout::Deadline(Self::add_micros(Instant::now(), micros));
        }

        Timeout::Infinite
    }

    /// Relative timeout from a `Duration`
    pub fn after(duration: Duration) -> Self {
        if duration.is_zero() {
            Timeout::Try
        } else {
            Timeout::Deadline(Instant::now() + duration)
        }
    }

    fn add_micros(base: Instant, micros: i64) -> Instant {
        let duration = Duration::from_micros(micros as u64);
        // Very large timeouts degrade to "effectively forever"
        base.checked_add(duration)
            .unwrap_or_else(|| base + Duration::from_secs(u32::MAX as u64))
    }

    /// Deadline to hand to the host wait primitive
    pub fn deadline(self) -> Option<Instant> {
        match self {
            Timeout::Deadline(at) => Some(at),
            Timeout::Infinite | Timeout::Try => None,
        }
    }

    /// Whether a wait with this timeout can possibly block
    pub fn can_block(self) -> bool {
        match self {
            Timeout::Infinite => true,
            Timeout::Try => false,
            Timeout::Deadline(at) => at > Instant::now(),
        }
    }

    /// Status reported when the wait cannot be satisfied in time
    pub fn unsatisfied(self) -> Status {
        match self {
            Timeout::Try => Status::WouldBlock,
            Timeout::Infinite | Timeout::Deadline(_) => Status::TimedOut,
        }
    }
}

/// Typed result of a finished wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Granted,
    TimedOut,
    WouldBlock,
    Interrupted,
    Deleted,
}

impl WaitOutcome {
    /// Map onto the caller-visible status; `deleted` is the kind-specific bad id
    pub fn into_result(self, deleted: Status) -> Result<(), Status> {
        match self {
            WaitOutcome::Granted => Ok(()),
            WaitOutcome::TimedOut => Err(Status::TimedOut),
            WaitOutcome::WouldBlock => Err(Status::WouldBlock),
            WaitOutcome::Interrupted => Err(Status::Interrupted),
            WaitOutcome::Deleted => Err(deleted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_is_infinite() {
        assert_eq!(Timeout::from_flags(WaitFlags::NONE, 1000), Timeout::Infinite);
        assert_eq!(Timeout::from_flags(WaitFlags::CAN_INTERRUPT, 0), Timeout::Infinite);
    }

    #[test]
    fn test_non_positive_relative_is_try() {
        assert_eq!(Timeout::from_flags(WaitFlags::TIMEOUT, 0), Timeout::Try);
        assert_eq!(Timeout::from_flags(WaitFlags::RELATIVE_TIMEOUT, -5), Timeout::Try);
    }

    #[test]
    fn test_relative_becomes_future_deadline() {
        let before = Instant::now();
        let timeout = Timeout::from_flags(WaitFlags::TIMEOUT, 200_000);
        let deadline = timeout.deadline().unwrap();
        assert!(deadline >= before + Duration::from_millis(200));
        assert!(timeout.can_block());
    }

    #[test]
    fn test_absolute_in_past_times_out() {
        let timeout = Timeout::from_flags(WaitFlags::ABSOLUTE_TIMEOUT, 1);
        assert!(matches!(timeout, Timeout::Deadline(_)));
        assert!(!timeout.can_block());
        assert_eq!(timeout.unsatisfied(), Status::TimedOut);
    }

    #[test]
    fn test_negative_absolute_is_try() {
        let timeout = Timeout::from_flags(WaitFlags::ABSOLUTE_TIMEOUT, -1);
        assert_eq!(timeout, Timeout::Try);
        assert_eq!(timeout.unsatisfied(), Status::WouldBlock);
    }

    #[test]
    fn test_absolute_in_future() {
        let at = now_micros() as i64 + 1_000_000;
        let timeout = Timeout::from_flags(WaitFlags::ABSOLUTE_TIMEOUT, at);
        let remaining = timeout.deadline().unwrap() - Instant::now();
        assert!(remaining > Duration::from_millis(500));
        assert!(remaining <= Duration::from_millis(1000));
    }

    #[test]
    fn test_huge_timeout_does_not_overflow() {
        let timeout = Timeout::from_flags(WaitFlags::TIMEOUT, i64::MAX);
        assert!(timeout.can_block());
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(WaitOutcome::Granted.into_result(Status::BadSemId), Ok(()));
        assert_eq!(
            WaitOutcome::Deleted.into_result(Status::BadPortId),
            Err(Status::BadPortId)
        );
    }
}
