/*!
 * Process-Exit Sweep
 *
 * Reclaims everything a terminated team owns through the normal delete
 * paths, so peers blocked on those objects wake with a bad-id status.
 * Ports go first and take their flow-control semaphores with them, then
 * semaphores, then areas. A failure on one object is logged and the sweep
 * moves on.
 */

use super::broker::Broker;
use crate::core::errors::{KernelResult, Status};
use crate::core::limits::KILLED_EXIT_CODE;
use crate::core::types::{TeamId, KERNEL_TEAM};
use crate::team::{SweepClaim, SweepReport};
use tracing::{info, warn};

impl Broker {
    /// Delete every object `team` owns; a second sweep is an `Ok` no-op
    pub fn sweep_team(&self, team: TeamId) -> KernelResult<SweepReport> {
        if team == KERNEL_TEAM {
            return Err(Status::BadTeamId);
        }
        if self.teams().claim_sweep(team)? == SweepClaim::AlreadySwept {
            return Ok(SweepReport::default());
        }

        let mut report = SweepReport::default();

        for port in self.ports().owned_by(team) {
            match self.ports().delete(port) {
                Ok(()) => report.ports += 1,
                Err(Status::BadPortId) => {}
                Err(status) => warn!(team, port, %status, "sweep failed to delete port"),
            }
        }

        for sem in self.sems().owned_by(team) {
            match self.sems().delete(sem) {
                Ok(()) => report.sems += 1,
                Err(Status::BadSemId) => {}
                Err(status) => warn!(team, sem, %status, "sweep failed to delete semaphore"),
            }
        }

        for area in self.areas().owned_by(team) {
            match self.areas().delete(area) {
                Ok(()) => report.areas += 1,
                Err(Status::BadValue) => {}
                Err(status) => warn!(team, area, %status, "sweep failed to delete area"),
            }
        }

        let exit_codes = self.threads().reap_team(team);
        self.teams().retire(team);
        info!(
            team,
            sems = report.sems,
            ports = report.ports,
            areas = report.areas,
            exit_codes,
            "Swept team"
        );
        Ok(report)
    }

    /// End every thread of `team` with `code`, then sweep it
    pub fn exit_team(&self, team: TeamId, code: i32) -> KernelResult<SweepReport> {
        if self.teams().is_retired(team) {
            return Ok(SweepReport::default());
        }
        self.teams().check(team)?;
        let threads = self.threads().end_team(team, code);
        info!(team, code, threads, "Team exiting");
        self.sweep_team(team)
    }

    /// Kill every thread of `team` and sweep it
    pub fn kill_team(&self, team: TeamId) -> KernelResult<SweepReport> {
        self.exit_team(team, KILLED_EXIT_CODE)
    }
}
