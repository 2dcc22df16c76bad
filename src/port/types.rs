/*!
 * Port Types
 */

use crate::core::name::ObjectName;
use crate::core::types::{PortId, SemId, TeamId};
use serde::{Deserialize, Serialize};

/// One queued message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Application-defined tag
    pub code: i32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(code: i32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Snapshot of a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub port: PortId,
    pub team: TeamId,
    pub name: String,
    /// Queue length; 0 once the port is closed
    pub capacity: i32,
    /// Messages waiting to be read
    pub queue_count: i32,
    /// Messages ever written
    pub total_count: u64,
}

/// Table entry of one port
///
/// `head` is where the next write lands and `tail` where the next read
/// comes from; both only advance under the slot lock.
pub(crate) struct PortEntry {
    pub owner: TeamId,
    pub name: ObjectName,
    pub closed: bool,
    pub slots: Vec<Option<Message>>,
    pub head: usize,
    pub tail: usize,
    pub read_sem: SemId,
    pub write_sem: SemId,
    pub total_count: u64,
}

impl PortEntry {
    pub fn new(capacity: usize, name: &str, owner: TeamId, read_sem: SemId, write_sem: SemId) -> Self {
        Self {
            owner,
            name: ObjectName::new(name),
            closed: false,
            slots: vec![None; capacity],
            head: 0,
            tail: 0,
            read_sem,
            write_sem,
            total_count: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Capacity as the legacy API reports it
    pub fn reported_capacity(&self) -> i32 {
        if self.closed {
            0
        } else {
            self.capacity() as i32
        }
    }
}
