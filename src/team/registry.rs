/*!
 * Team Registry
 *
 * Teams are the ownership unit every object is attributed to. A team is
 * swept exactly once: the first sweep flips its `swept` flag, and once the
 * sweep finishes the team is retired so later sweeps report success with
 * nothing to do.
 */

use super::types::TeamInfo;
use crate::core::errors::{KernelResult, Status};
use crate::core::name::ObjectName;
use crate::core::types::{now_micros, ObjectKind, TeamId, Timestamp, KERNEL_TEAM};
use crate::kernel::ObjectTable;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub(crate) struct TeamEntry {
    name: ObjectName,
    created_at: Timestamp,
    swept: bool,
}

/// Outcome of asking to sweep a team
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepClaim {
    /// The caller owns the sweep and must call `retire` when done
    Claimed,
    /// Another caller already swept (or is sweeping) this team
    AlreadySwept,
}

/// Live and retired teams
pub struct TeamRegistry {
    table: ObjectTable<TeamEntry>,
    retired: Arc<DashMap<TeamId, Timestamp, RandomState>>,
}

impl TeamRegistry {
    pub fn new(capacity: usize) -> Self {
        info!(capacity, "Team registry initialized");
        Self {
            table: ObjectTable::new(ObjectKind::Team, capacity),
            retired: Arc::new(DashMap::with_hasher(RandomState::new())),
        }
    }

    pub fn create(&self, name: &str) -> KernelResult<TeamId> {
        let id = self.table.insert(TeamEntry {
            name: ObjectName::new(name),
            created_at: now_micros(),
            swept: false,
        })?;
        debug!(team = id, name, "Created team");
        Ok(id)
    }

    /// Whether `team` may own objects
    pub fn exists(&self, team: TeamId) -> bool {
        team == KERNEL_TEAM || self.table.contains(team)
    }

    pub fn check(&self, team: TeamId) -> KernelResult<()> {
        if self.exists(team) {
            Ok(())
        } else {
            Err(Status::BadTeamId)
        }
    }

    pub fn is_retired(&self, team: TeamId) -> bool {
        self.retired.contains_key(&team)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Claim the one sweep of `team`
    pub fn claim_sweep(&self, team: TeamId) -> KernelResult<SweepClaim> {
        if self.is_retired(team) {
            return Ok(SweepClaim::AlreadySwept);
        }
        match self
            .table
            .with(team, |entry| std::mem::replace(&mut entry.swept, true))
        {
            Ok(false) => Ok(SweepClaim::Claimed),
            Ok(true) => Ok(SweepClaim::AlreadySwept),
            // Retired between the two checks
            Err(_) if self.is_retired(team) => Ok(SweepClaim::AlreadySwept),
            Err(status) => Err(status),
        }
    }

    /// Drop a swept team from the live table
    pub fn retire(&self, team: TeamId) {
        self.retired.insert(team, now_micros());
        if self.table.remove(team).is_ok() {
            debug!(team, "Retired team");
        }
    }

    pub fn info(&self, team: TeamId, thread_count: usize) -> KernelResult<TeamInfo> {
        self.table.with(team, |entry| TeamInfo {
            team,
            name: entry.name.to_string(),
            thread_count,
            created_at: entry.created_at,
        })
    }

    /// Live teams in slot order
    pub fn ids(&self) -> Vec<TeamId> {
        self.table.ids_where(|_| true)
    }
}
