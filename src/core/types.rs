/*!
 * Core Types
 * Handle and scalar types shared by every engine
 */

use serde::{Deserialize, Serialize};

/// Generic kernel-object handle (signed, namespaced per kind)
pub type ObjectId = i32;

/// Semaphore handle
pub type SemId = ObjectId;

/// Port handle
pub type PortId = ObjectId;

/// Area handle
pub type AreaId = ObjectId;

/// Thread handle
pub type ThreadId = ObjectId;

/// Team (process-equivalent) handle
pub type TeamId = ObjectId;

/// Address type for mapped memory
pub type Address = usize;

/// Size type for memory operations
pub type Size = usize;

/// Timestamp in microseconds since the UNIX epoch
pub type Timestamp = u64;

/// Owner of broker-internal objects (port flow-control and thread-private semaphores)
///
/// User teams are allocated ids starting at 1, so this never collides and is
/// never swept.
pub const KERNEL_TEAM: TeamId = 0;

/// Kind of object an id names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Semaphore,
    Port,
    Area,
    Thread,
    Team,
}

impl ObjectKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Semaphore => "semaphore",
            ObjectKind::Port => "port",
            ObjectKind::Area => "area",
            ObjectKind::Thread => "thread",
            ObjectKind::Team => "team",
        }
    }

    /// Status reported for an id that does not name a live object of this kind
    pub const fn bad_id(self) -> super::errors::Status {
        use super::errors::Status;
        match self {
            ObjectKind::Semaphore => Status::BadSemId,
            ObjectKind::Port => Status::BadPortId,
            ObjectKind::Area => Status::BadValue,
            ObjectKind::Thread => Status::BadThreadId,
            ObjectKind::Team => Status::BadTeamId,
        }
    }

    /// Status reported when the id space of this kind is exhausted
    pub const fn exhausted(self) -> super::errors::Status {
        use super::errors::Status;
        match self {
            ObjectKind::Semaphore => Status::NoMoreSems,
            ObjectKind::Port => Status::NoMorePorts,
            ObjectKind::Area => Status::NoMemory,
            ObjectKind::Thread => Status::NoMoreThreads,
            ObjectKind::Team => Status::NoMoreTeams,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current wall-clock time in microseconds since the UNIX epoch
pub fn now_micros() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as Timestamp)
        .unwrap_or(0)
}
