/*!
 * Semaphore Types
 */

use crate::core::name::ObjectName;
use crate::core::types::{SemId, TeamId, ThreadId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use super::waiter::Waiter;

/// Snapshot of a semaphore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemInfo {
    pub sem: SemId,
    pub team: TeamId,
    pub name: String,
    /// Observable count; negative magnitude is the blocked demand
    pub count: i32,
    /// Last thread granted the semaphore, `-1` if none or unknown
    pub latest_holder: ThreadId,
}

/// Table entry of one semaphore
///
/// `count` is what callers observe: the available amount minus the demand
/// of every queued waiter. `pending` is that queued demand, so the amount
/// actually available to hand out is `count + pending`. Both are only
/// touched under the slot lock.
pub(crate) struct SemEntry {
    pub owner: TeamId,
    pub name: ObjectName,
    pub count: i64,
    pub pending: i64,
    pub waiters: VecDeque<Arc<Waiter>>,
    pub sealed: bool,
    pub latest_holder: ThreadId,
}

impl SemEntry {
    pub fn new(count: i32, name: &str, owner: TeamId) -> Self {
        Self {
            owner,
            name: ObjectName::new(name),
            count: count as i64,
            pending: 0,
            waiters: VecDeque::new(),
            sealed: false,
            latest_holder: -1,
        }
    }

    #[inline]
    pub fn available(&self) -> i64 {
        self.count + self.pending
    }

    pub fn observable_count(&self) -> i32 {
        self.count.clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }

    pub fn info(&self, sem: SemId) -> SemInfo {
        SemInfo {
            sem,
            team: self.owner,
            name: self.name.to_string(),
            count: self.observable_count(),
            latest_holder: self.latest_holder,
        }
    }

    /// Put back the demand of a waiter that leaves the queue without a grant
    #[inline]
    pub fn restore(&mut self, waiter: &Waiter) {
        self.count += waiter.count;
        self.pending -= waiter.count;
    }
}
