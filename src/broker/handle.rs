/*!
 * Team Handle
 *
 * The legacy handle-based API, bound to one team. Every object created
 * through a handle is owned by its team; every blocking call runs under
 * the calling thread's wait context so `interrupt_thread` and
 * `kill_thread` reach it.
 *
 * ## Example
 *
 * ```ignore
 * let broker = Broker::default();
 * let app = broker.attach("app")?;
 * let sem = app.create_sem(0, "ready")?;
 * app.release_sem(sem)?;
 * app.acquire_sem(sem)?;
 * ```
 */

use super::broker::Broker;
use crate::area::{AddressSpec, AreaInfo, LockMode, Protection};
use crate::core::errors::{KernelResult, Status};
use crate::core::timeout::{ReleaseFlags, WaitFlags};
use crate::core::types::{Address, AreaId, PortId, SemId, Size, TeamId, ThreadId};
use crate::port::{Message, PortInfo};
use crate::sem::SemInfo;
use crate::team::{Letter, SweepReport, TeamInfo, ThreadInfo, ThreadRecord};
use std::sync::Arc;
use tracing::info;

/// Per-team entry point into the broker
#[derive(Clone, Debug)]
pub struct TeamHandle {
    broker: Broker,
    team: TeamId,
}

impl TeamHandle {
    pub(crate) fn new(broker: Broker, team: TeamId) -> Self {
        Self { broker, team }
    }

    #[inline]
    pub fn team(&self) -> TeamId {
        self.team
    }

    #[inline]
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    fn live(&self) -> KernelResult<()> {
        self.broker.teams().check(self.team)
    }

    /// Broker record of the calling thread in this team
    pub fn current_thread(&self) -> KernelResult<Arc<ThreadRecord>> {
        self.live()?;
        self.broker.threads().current(self.team)
    }

    // =========================================================================
    // SEMAPHORES
    // =========================================================================

    pub fn create_sem(&self, count: i32, name: &str) -> KernelResult<SemId> {
        self.live()?;
        self.broker.sems().create(count, name, self.team)
    }

    pub fn delete_sem(&self, id: SemId) -> KernelResult<()> {
        self.broker.delete_sem(self.team, id)
    }

    pub fn acquire_sem(&self, id: SemId) -> KernelResult<()> {
        self.acquire_sem_etc(id, 1, WaitFlags::NONE, 0)
    }

    pub fn acquire_sem_etc(
        &self,
        id: SemId,
        count: i32,
        flags: WaitFlags,
        timeout: i64,
    ) -> KernelResult<()> {
        let me = self.current_thread()?;
        self.broker
            .acquire_sem(id, count, flags, timeout, Some(me.wait_context()))
    }

    pub fn release_sem(&self, id: SemId) -> KernelResult<()> {
        self.release_sem_etc(id, 1, ReleaseFlags::NONE)
    }

    pub fn release_sem_etc(&self, id: SemId, count: i32, flags: ReleaseFlags) -> KernelResult<()> {
        self.broker.release_sem(id, count, flags)
    }

    pub fn get_sem_count(&self, id: SemId) -> KernelResult<i32> {
        self.broker.sems().get_count(id)
    }

    pub fn set_sem_owner(&self, id: SemId, team: TeamId) -> KernelResult<()> {
        self.broker.set_sem_owner(self.team, id, team)
    }

    pub fn get_sem_info(&self, id: SemId) -> KernelResult<SemInfo> {
        self.broker.sems().info(id)
    }

    pub fn get_next_sem_info(&self, team: TeamId, cookie: &mut i32) -> KernelResult<SemInfo> {
        self.broker.sems().next_info(team, cookie)
    }

    // =========================================================================
    // PORTS
    // =========================================================================

    pub fn create_port(&self, capacity: i32, name: &str) -> KernelResult<PortId> {
        self.live()?;
        self.broker.ports().create(capacity, name, self.team)
    }

    pub fn close_port(&self, id: PortId) -> KernelResult<()> {
        self.broker.ports().close(id)
    }

    pub fn delete_port(&self, id: PortId) -> KernelResult<()> {
        self.broker.delete_port(self.team, id)
    }

    pub fn find_port(&self, name: &str) -> KernelResult<PortId> {
        self.broker.ports().find(name)
    }

    pub fn write_port(&self, id: PortId, code: i32, data: &[u8]) -> KernelResult<()> {
        self.write_port_etc(id, code, data, WaitFlags::NONE, 0)
    }

    pub fn write_port_etc(
        &self,
        id: PortId,
        code: i32,
        data: &[u8],
        flags: WaitFlags,
        timeout: i64,
    ) -> KernelResult<()> {
        let me = self.current_thread()?;
        self.broker
            .ports()
            .write_etc(id, code, data, flags, timeout, Some(me.wait_context()))
    }

    /// Read into `buffer`; returns the code and the bytes copied
    pub fn read_port(&self, id: PortId, buffer: &mut [u8]) -> KernelResult<(i32, usize)> {
        self.read_port_etc(id, buffer, WaitFlags::NONE, 0)
    }

    pub fn read_port_etc(
        &self,
        id: PortId,
        buffer: &mut [u8],
        flags: WaitFlags,
        timeout: i64,
    ) -> KernelResult<(i32, usize)> {
        let me = self.current_thread()?;
        self.broker
            .ports()
            .read_etc(id, buffer, flags, timeout, Some(me.wait_context()))
    }

    /// Read the whole next message
    pub fn read_message(&self, id: PortId) -> KernelResult<Message> {
        let me = self.current_thread()?;
        self.broker
            .ports()
            .read_message(id, WaitFlags::NONE, 0, Some(me.wait_context()))
    }

    pub fn port_count(&self, id: PortId) -> KernelResult<i32> {
        self.broker.ports().count(id)
    }

    pub fn port_buffer_size(&self, id: PortId) -> KernelResult<usize> {
        self.port_buffer_size_etc(id, WaitFlags::NONE, 0)
    }

    pub fn port_buffer_size_etc(
        &self,
        id: PortId,
        flags: WaitFlags,
        timeout: i64,
    ) -> KernelResult<usize> {
        let me = self.current_thread()?;
        self.broker
            .ports()
            .buffer_size_etc(id, flags, timeout, Some(me.wait_context()))
    }

    pub fn set_port_owner(&self, id: PortId, team: TeamId) -> KernelResult<()> {
        self.broker.set_port_owner(self.team, id, team)
    }

    pub fn get_port_info(&self, id: PortId) -> KernelResult<PortInfo> {
        self.broker.ports().info(id)
    }

    pub fn get_next_port_info(&self, team: TeamId, cookie: &mut i32) -> KernelResult<PortInfo> {
        self.broker.ports().next_info(team, cookie)
    }

    // =========================================================================
    // AREAS
    // =========================================================================

    /// Create an area; returns its id and mapped address
    pub fn create_area(
        &self,
        name: &str,
        spec: AddressSpec,
        size: Size,
        lock: LockMode,
        protection: Protection,
    ) -> KernelResult<(AreaId, Address)> {
        self.live()?;
        self.broker
            .areas()
            .create(self.team, name, spec, size, lock, protection)
    }

    /// Map another area's backing store into this team
    pub fn clone_area(
        &self,
        name: &str,
        spec: AddressSpec,
        protection: Protection,
        source: AreaId,
    ) -> KernelResult<(AreaId, Address)> {
        self.live()?;
        self.broker
            .areas()
            .clone_area(self.team, name, spec, protection, source)
    }

    pub fn delete_area(&self, id: AreaId) -> KernelResult<()> {
        self.broker.delete_area(self.team, id)
    }

    pub fn resize_area(&self, id: AreaId, size: Size) -> KernelResult<()> {
        self.broker.areas().resize(id, size)
    }

    pub fn set_area_protection(&self, id: AreaId, protection: Protection) -> KernelResult<()> {
        self.broker.areas().set_protection(id, protection)
    }

    pub fn find_area(&self, name: &str) -> KernelResult<AreaId> {
        self.broker.areas().find(name)
    }

    /// Area of this team containing `address`
    pub fn area_for(&self, address: Address) -> KernelResult<AreaId> {
        self.broker.areas().area_for(self.team, address)
    }

    pub fn get_area_info(&self, id: AreaId) -> KernelResult<AreaInfo> {
        self.broker.areas().info(id)
    }

    pub fn get_next_area_info(&self, team: TeamId, cookie: &mut i32) -> KernelResult<AreaInfo> {
        self.broker.areas().next_info(team, cookie)
    }

    pub fn read_area(&self, id: AreaId, offset: usize, buf: &mut [u8]) -> KernelResult<()> {
        self.broker.areas().read(id, offset, buf)
    }

    pub fn write_area(&self, id: AreaId, offset: usize, data: &[u8]) -> KernelResult<()> {
        self.broker.areas().write(id, offset, data)
    }

    // =========================================================================
    // THREADS
    // =========================================================================

    /// Spawn a suspended thread in this team
    pub fn spawn_thread<F>(&self, name: &str, priority: i32, entry: F) -> KernelResult<ThreadId>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let me = self.current_thread()?;
        self.broker.threads().spawn(&me, name, priority, entry)
    }

    pub fn resume_thread(&self, id: ThreadId) -> KernelResult<()> {
        self.broker.threads().resume(id)
    }

    /// Always fails: host threads cannot be suspended from outside
    pub fn suspend_thread(&self, id: ThreadId) -> KernelResult<()> {
        self.broker.threads().suspend(id)
    }

    pub fn wait_for_thread(&self, id: ThreadId) -> KernelResult<i32> {
        let me = self.current_thread()?;
        if me.id() == id {
            return Err(Status::BadThreadId);
        }
        self.broker.threads().wait_for(id, Some(me.wait_context()))
    }

    pub fn kill_thread(&self, id: ThreadId) -> KernelResult<()> {
        self.broker.threads().kill(id)
    }

    /// Interrupt a `CAN_INTERRUPT` wait of `id`, or remember the interrupt
    pub fn interrupt_thread(&self, id: ThreadId) -> KernelResult<()> {
        self.broker.threads().interrupt(id).map(|_| ())
    }

    pub fn send_data(&self, target: ThreadId, code: i32, data: &[u8]) -> KernelResult<()> {
        let me = self.current_thread()?;
        self.broker.threads().send_data(&me, target, code, data)
    }

    pub fn receive_data(&self) -> KernelResult<Letter> {
        let me = self.current_thread()?;
        self.broker.threads().receive_data(&me)
    }

    pub fn has_data(&self) -> KernelResult<bool> {
        let me = self.current_thread()?;
        Ok(self.broker.threads().has_data(&me))
    }

    /// Block the calling thread until `unblock_thread`, a timeout or an interrupt
    pub fn block_thread(&self, flags: WaitFlags, timeout: i64) -> KernelResult<()> {
        let me = self.current_thread()?;
        self.broker.threads().block(&me, flags, timeout)
    }

    pub fn unblock_thread(&self, id: ThreadId) -> KernelResult<()> {
        self.broker.threads().unblock(id)
    }

    pub fn rename_thread(&self, id: ThreadId, name: &str) -> KernelResult<()> {
        self.broker.threads().rename(id, name)
    }

    pub fn set_thread_priority(&self, id: ThreadId, priority: i32) -> KernelResult<i32> {
        self.broker.threads().set_priority(id, priority)
    }

    pub fn get_thread_info(&self, id: ThreadId) -> KernelResult<ThreadInfo> {
        self.broker.threads().info(id)
    }

    pub fn get_next_thread_info(&self, cookie: &mut i32) -> KernelResult<ThreadInfo> {
        self.broker.threads().next_info(self.team, cookie)
    }

    /// Thread of this team called `name`; the calling thread for `None`
    pub fn find_thread(&self, name: Option<&str>) -> KernelResult<ThreadId> {
        match name {
            None => Ok(self.current_thread()?.id()),
            Some(name) => self.broker.threads().find(self.team, name),
        }
    }

    // =========================================================================
    // TEAMS
    // =========================================================================

    pub fn get_team_info(&self) -> KernelResult<TeamInfo> {
        self.broker.team_info(self.team)
    }

    pub fn kill_team(&self, team: TeamId) -> KernelResult<SweepReport> {
        self.broker.kill_team(team)
    }

    /// End this team: its threads stop and everything it owns is swept
    pub fn exit_team(&self, code: i32) -> KernelResult<SweepReport> {
        self.broker.exit_team(self.team, code)
    }

    /// Rebind this handle to a fresh team after `fork`
    ///
    /// The child gets its own team and a fresh record for the calling
    /// thread; nothing blocking-related is carried over from the parent.
    /// The parent team's thread records name threads that do not exist
    /// after `fork`, so they are discarded here.
    pub fn rebind_after_fork(&mut self) -> KernelResult<TeamId> {
        let name = self
            .broker
            .teams()
            .info(self.team, 0)
            .map(|info| info.name)
            .unwrap_or_else(|_| String::from("forked team"));
        let team = self.broker.teams().create(&name)?;
        let discarded = self.broker.threads().discard_team(self.team);
        if let Err(status) = self.broker.threads().current(team) {
            self.broker.teams().retire(team);
            return Err(status);
        }
        info!(parent = self.team, child = team, discarded, "Rebound after fork");
        self.team = team;
        Ok(team)
    }
}
