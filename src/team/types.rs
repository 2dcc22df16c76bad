/*!
 * Team and Thread Types
 */

use crate::core::types::{TeamId, ThreadId, Timestamp};
use serde::{Deserialize, Serialize};

/// Scheduling state as far as the broker can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    /// Spawned and registered, waiting for `resume_thread`
    Suspended,
    /// Running caller code (possibly blocked in a wait)
    Running,
}

/// Snapshot of a thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub thread: ThreadId,
    pub team: TeamId,
    pub name: String,
    pub priority: i32,
    pub state: ThreadState,
}

/// Snapshot of a team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub team: TeamId,
    pub name: String,
    pub thread_count: usize,
    pub created_at: Timestamp,
}

/// What a team's exit sweep reclaimed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub sems: usize,
    pub ports: usize,
    pub areas: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.sems + self.ports + self.areas
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// A message received through a thread's mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Letter {
    pub sender: ThreadId,
    pub code: i32,
    pub data: Vec<u8>,
}
