/*!
 * Status Codes
 * Legacy discriminated status results with thiserror, miette, and serde support
 *
 * Callers branch on individual variants as control flow (a `TimedOut` is an
 * expected outcome, not an exceptional one), so every legacy status code keeps
 * its own variant and its own integer value.
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Legacy `B_OK`
pub const B_OK: i32 = 0;

const GENERAL_ERROR_BASE: i32 = i32::MIN;
const OS_ERROR_BASE: i32 = GENERAL_ERROR_BASE + 0x1000;
const STORAGE_ERROR_BASE: i32 = GENERAL_ERROR_BASE + 0x6000;
const POSIX_ERROR_BASE: i32 = GENERAL_ERROR_BASE + 0x7000;

/// Non-`OK` status of a kernel-object operation
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Diagnostic)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[error("bad semaphore id")]
    #[diagnostic(
        code(nexus::bad_sem_id),
        help("The semaphore was deleted or the id was never valid.")
    )]
    BadSemId,

    #[error("bad port id")]
    #[diagnostic(
        code(nexus::bad_port_id),
        help("The port was deleted, closed for writing, or the id was never valid.")
    )]
    BadPortId,

    #[error("bad team id")]
    #[diagnostic(code(nexus::bad_team_id))]
    BadTeamId,

    #[error("bad thread id")]
    #[diagnostic(code(nexus::bad_thread_id))]
    BadThreadId,

    #[error("bad thread state")]
    #[diagnostic(
        code(nexus::bad_thread_state),
        help("The thread is not in a state that allows this operation (e.g. resuming a running thread).")
    )]
    BadThreadState,

    #[error("bad value")]
    #[diagnostic(code(nexus::bad_value))]
    BadValue,

    #[error("no more semaphores")]
    #[diagnostic(
        code(nexus::no_more_sems),
        help("The semaphore table is full. Delete unused semaphores or raise NEXUS_MAX_SEMS.")
    )]
    NoMoreSems,

    #[error("no more ports")]
    #[diagnostic(
        code(nexus::no_more_ports),
        help("The port table is full. Delete unused ports or raise NEXUS_MAX_PORTS.")
    )]
    NoMorePorts,

    #[error("no more teams")]
    #[diagnostic(code(nexus::no_more_teams))]
    NoMoreTeams,

    #[error("no more threads")]
    #[diagnostic(code(nexus::no_more_threads))]
    NoMoreThreads,

    #[error("out of memory")]
    #[diagnostic(
        code(nexus::no_memory),
        help("The backing store or mapping could not be created.")
    )]
    NoMemory,

    #[error("operation timed out")]
    #[diagnostic(code(nexus::timed_out))]
    TimedOut,

    #[error("operation would block")]
    #[diagnostic(code(nexus::would_block))]
    WouldBlock,

    #[error("interrupted")]
    #[diagnostic(code(nexus::interrupted))]
    Interrupted,

    #[error("buffer overflow")]
    #[diagnostic(code(nexus::buffer_overflow))]
    BufferOverflow,

    #[error("entry not found")]
    #[diagnostic(code(nexus::entry_not_found))]
    EntryNotFound,

    #[error("operation not supported")]
    #[diagnostic(
        code(nexus::not_supported),
        help("This operation is not available in this personality layer or protocol version.")
    )]
    NotSupported,

    #[error("operation not allowed")]
    #[diagnostic(code(nexus::not_allowed))]
    NotAllowed,
}

impl Status {
    /// Legacy `status_t` value
    pub const fn code(self) -> i32 {
        match self {
            Status::NoMemory => GENERAL_ERROR_BASE,
            Status::BadValue => GENERAL_ERROR_BASE + 5,
            Status::TimedOut => GENERAL_ERROR_BASE + 9,
            Status::Interrupted => GENERAL_ERROR_BASE + 10,
            Status::WouldBlock => GENERAL_ERROR_BASE + 11,
            Status::NotAllowed => GENERAL_ERROR_BASE + 15,
            Status::BadSemId => OS_ERROR_BASE,
            Status::NoMoreSems => OS_ERROR_BASE + 1,
            Status::BadThreadId => OS_ERROR_BASE + 0x100,
            Status::NoMoreThreads => OS_ERROR_BASE + 0x101,
            Status::BadThreadState => OS_ERROR_BASE + 0x102,
            Status::BadTeamId => OS_ERROR_BASE + 0x103,
            Status::NoMoreTeams => OS_ERROR_BASE + 0x104,
            Status::BadPortId => OS_ERROR_BASE + 0x200,
            Status::NoMorePorts => OS_ERROR_BASE + 0x201,
            Status::EntryNotFound => STORAGE_ERROR_BASE + 3,
            Status::NotSupported => POSIX_ERROR_BASE + 3,
            Status::BufferOverflow => POSIX_ERROR_BASE + 41,
        }
    }

    /// Inverse of [`Status::code`]; `None` for `B_OK` and unknown codes
    pub fn from_code(code: i32) -> Option<Self> {
        const ALL: [Status; 18] = [
            Status::BadSemId,
            Status::BadPortId,
            Status::BadTeamId,
            Status::BadThreadId,
            Status::BadThreadState,
            Status::BadValue,
            Status::NoMoreSems,
            Status::NoMorePorts,
            Status::NoMoreTeams,
            Status::NoMoreThreads,
            Status::NoMemory,
            Status::TimedOut,
            Status::WouldBlock,
            Status::Interrupted,
            Status::BufferOverflow,
            Status::EntryNotFound,
            Status::NotSupported,
            Status::NotAllowed,
        ];
        ALL.into_iter().find(|s| Status::code(*s) == code)
    }

    /// Timed-out, would-block and interrupted are expected control-flow results
    pub const fn is_contention(self) -> bool {
        matches!(
            self,
            Status::TimedOut | Status::WouldBlock | Status::Interrupted
        )
    }
}

/// Result type for kernel-object operations
///
/// # Must Use
/// Contention outcomes are carried here too and callers are expected to branch on them
pub type KernelResult<T> = Result<T, Status>;

/// Collapse a result to its legacy `status_t`
pub fn status_code<T>(result: &KernelResult<T>) -> i32 {
    match result {
        Ok(_) => B_OK,
        Err(status) => Status::code(*status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_negative_and_distinct() {
        let mut seen = std::collections::HashSet::new();
        for code in (GENERAL_ERROR_BASE..GENERAL_ERROR_BASE + 0x8000).filter_map(Status::from_code) {
            assert!(code.code() < 0);
            assert!(seen.insert(code.code()));
        }
        assert_eq!(seen.len(), 18);
    }

    #[test]
    fn test_code_round_trip_for_port_id() {
        let code = Status::BadPortId.code();
        assert_eq!(Status::from_code(code), Some(Status::BadPortId));
        assert_eq!(Status::from_code(B_OK), None);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&Status::WouldBlock).unwrap();
        assert_eq!(json, "\"would_block\"");
        let back: Status = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Status::WouldBlock);
    }

    #[test]
    fn test_contention_classification() {
        assert!(Status::TimedOut.is_contention());
        assert!(Status::Interrupted.is_contention());
        assert!(!Status::BadSemId.is_contention());
    }

    #[test]
    fn test_status_code_helper() {
        let ok: KernelResult<()> = Ok(());
        let err: KernelResult<()> = Err(Status::TimedOut);
        assert_eq!(status_code(&ok), B_OK);
        assert_eq!(status_code(&err), Status::TimedOut.code());
    }
}
