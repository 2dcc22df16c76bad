/*!
 * System Limits and Constants
 *
 * Centralized location for table capacities, message bounds and other
 * legacy-visible numbers. Table capacities are defaults; `BrokerConfig`
 * may override them at startup.
 */

// =============================================================================
// OBJECT TABLE CAPACITIES
// =============================================================================

/// Default semaphore table capacity
pub const DEFAULT_MAX_SEMS: usize = 4096;

/// Default port table capacity
pub const DEFAULT_MAX_PORTS: usize = 1024;

/// Default area table capacity
pub const DEFAULT_MAX_AREAS: usize = 1024;

/// Default team table capacity
pub const DEFAULT_MAX_TEAMS: usize = 256;

/// Default thread table capacity
pub const DEFAULT_MAX_THREADS: usize = 1024;

// =============================================================================
// SEMAPHORES
// =============================================================================

/// Largest count a semaphore may hold or be acquired/released by
/// [LINUX-COMPAT] SEM_VALUE_MAX
pub const SEM_MAX_COUNT: i32 = i32::MAX;

// =============================================================================
// PORTS
// =============================================================================

/// Largest queue a port may be created with
pub const PORT_MAX_QUEUE: usize = 256;

/// Largest payload a single port message may carry
pub const PORT_MAX_MESSAGE_SIZE: usize = 4096;

// =============================================================================
// NAMES
// =============================================================================

/// Diagnostic names are truncated to this many bytes
/// [LEGACY] B_OS_NAME_LENGTH
pub const OS_NAME_LENGTH: usize = 32;

// =============================================================================
// THREADS
// =============================================================================

/// Exit code recorded for a thread that was killed
pub const KILLED_EXIT_CODE: i32 = -9;

/// Exit code recorded for a thread whose entry function panicked
pub const PANIC_EXIT_CODE: i32 = -6;

/// Default thread priority
/// [LEGACY] B_NORMAL_PRIORITY
pub const NORMAL_PRIORITY: i32 = 10;

// =============================================================================
// AREAS
// =============================================================================

/// Fallback when the host page size cannot be queried
pub const FALLBACK_PAGE_SIZE: usize = 4096;

// =============================================================================
// WIRE PROTOCOL
// =============================================================================

/// Largest accepted request/reply frame
/// [SECURITY] Bounds per-connection allocation in the daemon
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default daemon socket
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/nexus-kit.sock";
