/*!
 * Broker
 *
 * The single arbitration authority: one object table per kind, the team
 * registry and the thread manager, shared behind an `Arc` so every
 * `TeamHandle` and the nexus dispatcher talk to the same state.
 *
 * Table-wide decisions live here: attaching teams, ownership policy for
 * deletes and owner transfers, and the exit sweep.
 */

use super::handle::TeamHandle;
use crate::area::AreaEngine;
use crate::core::config::BrokerConfig;
use crate::core::errors::{KernelResult, Status};
use crate::core::timeout::{ReleaseFlags, WaitFlags};
use crate::core::types::{AreaId, ObjectKind, PortId, SemId, TeamId, KERNEL_TEAM};
use crate::port::PortEngine;
use crate::sem::{SemaphoreEngine, WaitContext};
use crate::team::{TeamInfo, TeamRegistry, ThreadManager};
use std::sync::Arc;
use tracing::info;

pub(crate) struct BrokerInner {
    pub config: BrokerConfig,
    pub sems: Arc<SemaphoreEngine>,
    pub ports: PortEngine,
    pub areas: AreaEngine,
    pub teams: TeamRegistry,
    pub threads: ThreadManager,
}

/// Kernel-object broker
///
/// # Performance
///
/// Cheap to clone; clones share every table.
#[derive(Clone)]
pub struct Broker {
    pub(crate) inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        let sems = Arc::new(SemaphoreEngine::new(config.max_sems));
        let ports = PortEngine::new(
            sems.clone(),
            config.max_ports,
            config.max_port_queue,
            config.max_message_size,
        );
        let areas = AreaEngine::new(config.max_areas);
        let teams = TeamRegistry::new(config.max_teams);
        let threads = ThreadManager::new(sems.clone(), config.max_threads, config.max_message_size);
        info!(
            strict_ownership = config.strict_ownership,
            "Broker initialized"
        );
        Self {
            inner: Arc::new(BrokerInner {
                config,
                sems,
                ports,
                areas,
                teams,
                threads,
            }),
        }
    }

    /// Broker configured from `NEXUS_*` environment variables
    pub fn from_env() -> Self {
        Self::new(BrokerConfig::from_env())
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    pub fn sems(&self) -> &SemaphoreEngine {
        &self.inner.sems
    }

    pub fn ports(&self) -> &PortEngine {
        &self.inner.ports
    }

    pub fn areas(&self) -> &AreaEngine {
        &self.inner.areas
    }

    pub fn teams(&self) -> &TeamRegistry {
        &self.inner.teams
    }

    pub fn threads(&self) -> &ThreadManager {
        &self.inner.threads
    }

    /// Create a team and register the calling thread as its main thread
    pub fn attach(&self, name: &str) -> KernelResult<TeamHandle> {
        let team = self.inner.teams.create(name)?;
        if let Err(status) = self.inner.threads.current(team) {
            self.inner.teams.retire(team);
            return Err(status);
        }
        info!(team, name, "Team attached");
        Ok(TeamHandle::new(self.clone(), team))
    }

    /// Handle for a team attached earlier
    pub fn handle(&self, team: TeamId) -> KernelResult<TeamHandle> {
        if team == KERNEL_TEAM {
            return Err(Status::BadTeamId);
        }
        self.inner.teams.check(team)?;
        Ok(TeamHandle::new(self.clone(), team))
    }

    pub fn team_info(&self, team: TeamId) -> KernelResult<TeamInfo> {
        let thread_count = self.inner.threads.threads_of(team).len();
        self.inner.teams.info(team, thread_count)
    }

    /// Ownership rule for deletes under the configured policy
    ///
    /// Objects the broker owns itself (port flow control, thread block,
    /// exit and mailbox semaphores) are never deleted by a team.
    fn delete_rule(&self, caller: TeamId, owner: TeamId) -> KernelResult<()> {
        if owner == KERNEL_TEAM {
            return Err(Status::NotAllowed);
        }
        if self.inner.config.strict_ownership && caller != owner {
            return Err(Status::NotAllowed);
        }
        Ok(())
    }

    /// Validate an owner transfer and log it
    fn transfer_rule(
        &self,
        kind: ObjectKind,
        id: i32,
        caller: TeamId,
        owner: TeamId,
        new_owner: TeamId,
    ) -> KernelResult<()> {
        if owner == KERNEL_TEAM || new_owner == KERNEL_TEAM {
            return Err(Status::NotAllowed);
        }
        self.inner.teams.check(new_owner)?;
        if self.inner.config.strict_ownership && caller != owner {
            return Err(Status::NotAllowed);
        }
        info!(%kind, id, caller, from = owner, to = new_owner, "Owner transfer");
        Ok(())
    }

    /// Reject semaphores the broker keeps for itself
    fn team_sem(&self, id: SemId) -> KernelResult<()> {
        if self.inner.sems.owner(id)? == KERNEL_TEAM {
            return Err(Status::NotAllowed);
        }
        Ok(())
    }

    /// `acquire_sem_etc` on behalf of a team
    pub fn acquire_sem(
        &self,
        id: SemId,
        count: i32,
        flags: WaitFlags,
        timeout: i64,
        ctx: Option<&WaitContext>,
    ) -> KernelResult<()> {
        self.team_sem(id)?;
        self.inner.sems.acquire_etc(id, count, flags, timeout, ctx)
    }

    /// `release_sem_etc` on behalf of a team
    pub fn release_sem(&self, id: SemId, count: i32, flags: ReleaseFlags) -> KernelResult<()> {
        self.team_sem(id)?;
        self.inner.sems.release_etc(id, count, flags)
    }

    pub fn delete_sem(&self, caller: TeamId, id: SemId) -> KernelResult<()> {
        self.inner
            .sems
            .delete_checked(id, |owner| self.delete_rule(caller, owner))
    }

    pub fn set_sem_owner(&self, caller: TeamId, id: SemId, team: TeamId) -> KernelResult<()> {
        let owner = self.inner.sems.owner(id)?;
        self.transfer_rule(ObjectKind::Semaphore, id, caller, owner, team)?;
        self.inner.sems.set_owner(id, team).map(|_| ())
    }

    pub fn delete_port(&self, caller: TeamId, id: PortId) -> KernelResult<()> {
        self.inner
            .ports
            .delete_checked(id, |owner| self.delete_rule(caller, owner))
    }

    pub fn set_port_owner(&self, caller: TeamId, id: PortId, team: TeamId) -> KernelResult<()> {
        let owner = self.inner.ports.owner(id)?;
        self.transfer_rule(ObjectKind::Port, id, caller, owner, team)?;
        self.inner.ports.set_owner(id, team).map(|_| ())
    }

    /// Areas are only ever deleted by their own team
    pub fn delete_area(&self, caller: TeamId, id: AreaId) -> KernelResult<()> {
        self.inner.areas.delete_checked(id, |owner| {
            if owner == caller {
                Ok(())
            } else {
                Err(Status::NotAllowed)
            }
        })
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("sems", &self.inner.sems.len())
            .field("ports", &self.inner.ports.len())
            .field("areas", &self.inner.areas.len())
            .field("teams", &self.inner.teams.len())
            .field("threads", &self.inner.threads.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_registers_main_thread() {
        let broker = Broker::new(BrokerConfig::minimal());
        let handle = broker.attach("app").unwrap();
        let info = broker.team_info(handle.team()).unwrap();
        assert_eq!(info.name, "app");
        assert_eq!(info.thread_count, 1);
    }

    #[test]
    fn test_lenient_ownership_allows_foreign_delete() {
        let broker = Broker::new(BrokerConfig::minimal());
        let a = broker.attach("a").unwrap();
        let b = broker.attach("b").unwrap();
        let sem = a.create_sem(0, "shared").unwrap();
        assert_eq!(b.delete_sem(sem), Ok(()));
    }

    #[test]
    fn test_strict_ownership_rejects_foreign_delete_and_transfer() {
        let broker = Broker::new(BrokerConfig::minimal().with_strict_ownership(true));
        let a = broker.attach("a").unwrap();
        let b = broker.attach("b").unwrap();
        let sem = a.create_sem(0, "guarded").unwrap();
        assert_eq!(b.delete_sem(sem), Err(Status::NotAllowed));
        assert_eq!(b.set_sem_owner(sem, b.team()), Err(Status::NotAllowed));
        assert_eq!(a.set_sem_owner(sem, b.team()), Ok(()));
        assert_eq!(b.delete_sem(sem), Ok(()));
    }

    #[test]
    fn test_transfer_to_unknown_team() {
        let broker = Broker::new(BrokerConfig::minimal());
        let a = broker.attach("a").unwrap();
        let port = a.create_port(1, "p").unwrap();
        assert_eq!(a.set_port_owner(port, 999), Err(Status::BadTeamId));
    }

    #[test]
    fn test_kernel_handle_refused() {
        let broker = Broker::new(BrokerConfig::minimal());
        assert_eq!(broker.handle(KERNEL_TEAM).err(), Some(Status::BadTeamId));
    }

    #[test]
    fn test_transfer_to_kernel_team_refused() {
        let broker = Broker::new(BrokerConfig::minimal());
        let a = broker.attach("a").unwrap();
        let sem = a.create_sem(0, "mine").unwrap();
        assert_eq!(a.set_sem_owner(sem, KERNEL_TEAM), Err(Status::NotAllowed));
        assert_eq!(broker.sems().owner(sem), Ok(a.team()));
    }
}
