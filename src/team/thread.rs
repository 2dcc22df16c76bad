/*!
 * Thread Manager
 *
 * Every broker thread owns:
 * - `block_sem` (count 0): its private blocking primitive, also used for
 *   `resume_thread`
 * - `exit_sem` (count 0): never released, deleted when the thread ends so
 *   every `wait_for_thread` wakes at once
 * - a single-slot mailbox for `send_data` / `receive_data`
 *
 * All of them belong to the kernel team, so a team sweep never reaches them
 * directly; they go away with the thread record.
 *
 * # Spawn Rendezvous
 *
 * The parent blocks on a semaphore created for that one spawn right after
 * starting the host thread. The child registers itself, releases it, then
 * blocks on its own `block_sem` until resumed. A thread id handed back by
 * `spawn` therefore always names a registered record, and nothing aimed at
 * the parent's own `block_sem` can cut the rendezvous short.
 *
 * # Exit Codes
 *
 * A finished thread leaves its exit code behind for every `wait_for`
 * caller. Codes are kept per thread until the thread's team is swept, and
 * at most as many as the thread table holds; the oldest go first.
 *
 * OS threads that call into the broker without having been spawned by it
 * are adopted lazily, one record per (OS thread, team) pair.
 */

use super::mailbox::Mailbox;
use super::types::{Letter, ThreadInfo, ThreadState};
use crate::core::errors::{KernelResult, Status};
use crate::core::limits::{KILLED_EXIT_CODE, PANIC_EXIT_CODE, NORMAL_PRIORITY};
use crate::core::name::ObjectName;
use crate::core::timeout::{Timeout, WaitFlags};
use crate::core::types::{ObjectKind, SemId, TeamId, ThreadId, KERNEL_TEAM};
use crate::kernel::ObjectTable;
use crate::sem::{SemaphoreEngine, WaitContext};
use ahash::RandomState;
use dashmap::DashMap;
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

type NativeKey = (std::thread::ThreadId, TeamId);

/// Broker view of one thread
pub struct ThreadRecord {
    id: ThreadId,
    team: TeamId,
    name: Mutex<ObjectName>,
    priority: AtomicI32,
    state: Mutex<ThreadState>,
    adopted: bool,
    block_sem: SemId,
    exit_sem: SemId,
    mailbox: Mailbox,
    wait: Arc<WaitContext>,
}

impl ThreadRecord {
    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub fn team(&self) -> TeamId {
        self.team
    }

    /// Interrupt/kill state of this thread's waits
    #[inline]
    pub fn wait_context(&self) -> &WaitContext {
        &self.wait
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub fn info(&self) -> ThreadInfo {
        ThreadInfo {
            thread: self.id,
            team: self.team,
            name: self.name.lock().to_string(),
            priority: self.priority.load(Ordering::Relaxed),
            state: self.state(),
        }
    }
}

impl std::fmt::Debug for ThreadRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRecord")
            .field("id", &self.id)
            .field("team", &self.team)
            .field("adopted", &self.adopted)
            .finish()
    }
}

/// Thread table plus the bookkeeping around it
///
/// # Performance
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct ThreadManager {
    sems: Arc<SemaphoreEngine>,
    table: Arc<ObjectTable<Arc<ThreadRecord>>>,
    by_native: Arc<DashMap<NativeKey, ThreadId, RandomState>>,
    zombies: Arc<DashMap<ThreadId, (TeamId, i32), RandomState>>,
    /// Burial order of `zombies`, oldest first
    zombie_order: Arc<Mutex<VecDeque<ThreadId>>>,
    zombie_limit: usize,
    max_message_size: usize,
}

fn thread_status(status: Status) -> Status {
    match status {
        Status::BadSemId => Status::BadThreadId,
        other => other,
    }
}

impl ThreadManager {
    pub fn new(sems: Arc<SemaphoreEngine>, capacity: usize, max_message_size: usize) -> Self {
        info!(capacity, "Thread manager initialized");
        Self {
            sems,
            table: Arc::new(ObjectTable::new(ObjectKind::Thread, capacity)),
            by_native: Arc::new(DashMap::with_hasher(RandomState::new())),
            zombies: Arc::new(DashMap::with_hasher(RandomState::new())),
            zombie_order: Arc::new(Mutex::new(VecDeque::new())),
            zombie_limit: capacity.max(1),
            max_message_size,
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn register(
        &self,
        team: TeamId,
        name: &str,
        priority: i32,
        state: ThreadState,
        adopted: bool,
    ) -> KernelResult<Arc<ThreadRecord>> {
        let exhausted = |_| Status::NoMoreThreads;
        let block_sem = self.sems.create(0, name, KERNEL_TEAM).map_err(exhausted)?;
        let exit_sem = match self.sems.create(0, name, KERNEL_TEAM) {
            Ok(sem) => sem,
            Err(_) => {
                let _ = self.sems.delete(block_sem);
                return Err(Status::NoMoreThreads);
            }
        };
        let mailbox = match Mailbox::create(&self.sems, name) {
            Ok(mailbox) => mailbox,
            Err(_) => {
                let _ = self.sems.delete(block_sem);
                let _ = self.sems.delete(exit_sem);
                return Err(Status::NoMoreThreads);
            }
        };

        let mailbox_sems = mailbox.sem_ids();
        let mut created = None;
        let inserted = self.table.insert_with(|id| {
            let record = Arc::new(ThreadRecord {
                id,
                team,
                name: Mutex::new(ObjectName::new(name)),
                priority: AtomicI32::new(priority),
                state: Mutex::new(state),
                adopted,
                block_sem,
                exit_sem,
                mailbox,
                wait: Arc::new(WaitContext::new(id)),
            });
            created = Some(record.clone());
            record
        });

        match (inserted, created) {
            (Ok(id), Some(record)) => {
                debug!(thread = id, team, name, adopted, "Registered thread");
                Ok(record)
            }
            (result, _) => {
                for sem in [block_sem, exit_sem].into_iter().chain(mailbox_sems) {
                    let _ = self.sems.delete(sem);
                }
                Err(result.err().unwrap_or(Status::NoMoreThreads))
            }
        }
    }

    /// Record of a live thread
    pub fn lookup(&self, id: ThreadId) -> KernelResult<Arc<ThreadRecord>> {
        self.table.with(id, |record| record.clone())
    }

    /// Record of the calling OS thread within `team`, adopting it if needed
    pub fn current(&self, team: TeamId) -> KernelResult<Arc<ThreadRecord>> {
        let native = std::thread::current();
        let key = (native.id(), team);
        if let Some(id) = self.by_native.get(&key).map(|entry| *entry.value()) {
            if let Ok(record) = self.lookup(id) {
                return Ok(record);
            }
            self.by_native.remove(&key);
        }

        let name = native.name().unwrap_or("adopted thread");
        let record = self.register(team, name, NORMAL_PRIORITY, ThreadState::Running, true)?;
        self.by_native.insert(key, record.id);
        Ok(record)
    }

    /// Start `entry` on a new host thread in the parent's team
    ///
    /// The new thread stays suspended until `resume`; the returned id names
    /// a registered record.
    pub fn spawn<F>(
        &self,
        parent: &ThreadRecord,
        name: &str,
        priority: i32,
        entry: F,
    ) -> KernelResult<ThreadId>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let team = parent.team;
        let rendezvous = self
            .sems
            .create(0, name, KERNEL_TEAM)
            .map_err(|_| Status::NoMoreThreads)?;
        let outcome: Arc<Mutex<Option<KernelResult<ThreadId>>>> = Arc::default();

        let manager = self.clone();
        let child_outcome = outcome.clone();
        let thread_name = name.to_string();
        let started = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let registered = manager.register(
                    team,
                    &thread_name,
                    priority,
                    ThreadState::Suspended,
                    false,
                );
                *child_outcome.lock() = Some(registered.as_ref().map(|r| r.id).map_err(|s| *s));
                if let Ok(record) = &registered {
                    manager
                        .by_native
                        .insert((std::thread::current().id(), team), record.id);
                }
                let _ = manager.sems.release(rendezvous, 1);
                if let Ok(record) = registered {
                    manager.run(record, entry);
                }
            });
        if let Err(err) = started {
            warn!(team, name, error = %err, "host thread creation failed");
            let _ = self.sems.delete(rendezvous);
            return Err(Status::NoMoreThreads);
        }

        let joined = self
            .sems
            .acquire(rendezvous, 1, Timeout::Infinite, false, None)
            .map_err(thread_status);
        let _ = self.sems.delete(rendezvous);
        joined?;
        let result = outcome.lock().take();
        result.unwrap_or(Err(Status::NoMoreThreads))
    }

    fn run<F>(&self, record: Arc<ThreadRecord>, entry: F)
    where
        F: FnOnce() -> i32,
    {
        let resumed = self
            .sems
            .acquire(record.block_sem, 1, Timeout::Infinite, false, Some(&record.wait));

        let code = match resumed {
            Ok(()) => match catch_unwind(AssertUnwindSafe(entry)) {
                Ok(code) => code,
                Err(_) => {
                    warn!(thread = record.id, team = record.team, "thread function panicked");
                    PANIC_EXIT_CODE
                }
            },
            Err(status) => {
                debug!(thread = record.id, %status, "thread ended before it was resumed");
                KILLED_EXIT_CODE
            }
        };

        let code = if record.wait.is_killed() {
            KILLED_EXIT_CODE
        } else {
            code
        };
        self.finish(&record, code);
    }

    /// Publish the exit code, then tear the record down
    ///
    /// `exit_sem` goes last so waiters find the exit code when they wake.
    fn finish(&self, record: &ThreadRecord, code: i32) {
        // Discarded records have no waiters left to tell
        if !self.table.contains(record.id) {
            return;
        }
        self.bury(record.id, record.team, code);
        if self.table.remove(record.id).is_err() {
            return;
        }
        self.teardown(record);
        debug!(thread = record.id, team = record.team, code, "Thread finished");
    }

    /// Drop everything a removed record holds; `exit_sem` goes last
    fn teardown(&self, record: &ThreadRecord) {
        self.by_native.retain(|_, id| *id != record.id);
        let _ = self.sems.delete(record.block_sem);
        record.mailbox.destroy(&self.sems);
        let _ = self.sems.delete(record.exit_sem);
    }

    fn bury(&self, id: ThreadId, team: TeamId, code: i32) {
        self.zombies.insert(id, (team, code));
        let mut order = self.zombie_order.lock();
        order.push_back(id);
        while order.len() > self.zombie_limit {
            if let Some(oldest) = order.pop_front() {
                self.zombies.remove(&oldest);
            }
        }
    }

    /// Forget the exit codes of `team`'s finished threads
    pub fn reap_team(&self, team: TeamId) -> usize {
        let before = self.zombies.len();
        self.zombies.retain(|_, (owner, _)| *owner != team);
        self.zombie_order
            .lock()
            .retain(|id| self.zombies.contains_key(id));
        before.saturating_sub(self.zombies.len())
    }

    /// Drop every record of `team` without running it to completion
    ///
    /// Used after `fork`, where the parent's threads do not exist in the
    /// child: their records, private semaphores and mailboxes go, and a
    /// host thread still running one of them finds its waits failing.
    pub fn discard_team(&self, team: TeamId) -> usize {
        let mut discarded = 0;
        for id in self.threads_of(team) {
            let Ok(record) = self.table.remove(id) else {
                continue;
            };
            record.wait.kill();
            self.teardown(&record);
            discarded += 1;
        }
        self.by_native.retain(|(_, owner), _| *owner != team);
        debug!(team, discarded, "Discarded inherited thread records");
        discarded
    }

    /// Let a spawned thread start running its function
    pub fn resume(&self, id: ThreadId) -> KernelResult<()> {
        let record = self.lookup(id)?;
        {
            let mut state = record.state.lock();
            if *state != ThreadState::Suspended {
                return Err(Status::BadThreadState);
            }
            *state = ThreadState::Running;
        }
        self.sems
            .release(record.block_sem, 1)
            .map_err(thread_status)
    }

    /// Host threads cannot be stopped from outside
    pub fn suspend(&self, id: ThreadId) -> KernelResult<()> {
        self.lookup(id)?;
        Err(Status::NotSupported)
    }

    /// Block the calling thread on its private semaphore
    pub fn block(&self, record: &ThreadRecord, flags: WaitFlags, timeout: i64) -> KernelResult<()> {
        self.sems
            .acquire_etc(record.block_sem, 1, flags, timeout, Some(&record.wait))
            .map_err(thread_status)
    }

    /// Wake a thread blocked in `block`
    pub fn unblock(&self, id: ThreadId) -> KernelResult<()> {
        let record = self.lookup(id)?;
        if record.state() == ThreadState::Suspended {
            return Err(Status::BadThreadState);
        }
        self.sems
            .release(record.block_sem, 1)
            .map_err(thread_status)
    }

    /// Exit code of `id`, waiting for it to end
    ///
    /// A thread that was never resumed is resumed first. Ids the broker does
    /// not know are treated as host processes.
    pub fn wait_for(&self, id: ThreadId, ctx: Option<&WaitContext>) -> KernelResult<i32> {
        if let Ok(record) = self.lookup(id) {
            if record.state() == ThreadState::Suspended {
                let _ = self.resume(id);
            }
            match self
                .sems
                .acquire(record.exit_sem, 1, Timeout::Infinite, true, ctx)
            {
                Ok(()) | Err(Status::BadSemId) => {}
                Err(status) => return Err(status),
            }
        }

        if let Some(code) = self.zombies.get(&id).map(|entry| entry.value().1) {
            return Ok(code);
        }
        Self::wait_host(id)
    }

    fn wait_host(id: ThreadId) -> KernelResult<i32> {
        if id <= 0 {
            return Err(Status::BadThreadId);
        }
        match waitpid(Pid::from_raw(id), None) {
            Ok(WaitStatus::Exited(_, code)) => Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => Ok(-(signal as i32)),
            Ok(other) => {
                debug!(pid = id, status = ?other, "unexpected host wait status");
                Err(Status::BadThreadId)
            }
            Err(Errno::EINTR) => Err(Status::Interrupted),
            Err(_) => Err(Status::BadThreadId),
        }
    }

    /// Fail the thread's current and later waits; its exit code becomes
    /// `KILLED_EXIT_CODE`
    pub fn kill(&self, id: ThreadId) -> KernelResult<()> {
        let record = self.lookup(id)?;
        record.wait.kill();
        debug!(thread = id, team = record.team, "Killed thread");
        Ok(())
    }

    /// Deliver an interrupt; returns whether a wait was cut short
    pub fn interrupt(&self, id: ThreadId) -> KernelResult<bool> {
        Ok(self.lookup(id)?.wait.interrupt(false))
    }

    pub fn send_data(
        &self,
        sender: &ThreadRecord,
        target: ThreadId,
        code: i32,
        data: &[u8],
    ) -> KernelResult<()> {
        if data.len() > self.max_message_size {
            return Err(Status::BadValue);
        }
        let target = self.lookup(target)?;
        target
            .mailbox
            .send(&self.sems, sender.id, code, data, Some(&sender.wait))
    }

    pub fn receive_data(&self, record: &ThreadRecord) -> KernelResult<Letter> {
        record.mailbox.receive(&self.sems, Some(&record.wait))
    }

    pub fn has_data(&self, record: &ThreadRecord) -> bool {
        record.mailbox.has_data(&self.sems)
    }

    pub fn rename(&self, id: ThreadId, name: &str) -> KernelResult<()> {
        let record = self.lookup(id)?;
        *record.name.lock() = ObjectName::new(name);
        Ok(())
    }

    /// Record a new priority; returns the previous one
    pub fn set_priority(&self, id: ThreadId, priority: i32) -> KernelResult<i32> {
        let record = self.lookup(id)?;
        Ok(record.priority.swap(priority, Ordering::Relaxed))
    }

    pub fn info(&self, id: ThreadId) -> KernelResult<ThreadInfo> {
        Ok(self.lookup(id)?.info())
    }

    /// Next thread of `team` at or after `cookie`
    pub fn next_info(&self, team: TeamId, cookie: &mut i32) -> KernelResult<ThreadInfo> {
        self.table
            .next_after(cookie, |_, record| (record.team == team).then(|| record.info()))
            .ok_or(Status::BadValue)
    }

    /// First thread of `team` called `name`
    pub fn find(&self, team: TeamId, name: &str) -> KernelResult<ThreadId> {
        self.table
            .find(|record| record.team == team && record.name.lock().as_str() == name)
            .ok_or(Status::BadThreadId)
    }

    pub fn threads_of(&self, team: TeamId) -> Vec<ThreadId> {
        self.table.ids_where(|record| record.team == team)
    }

    /// Kill every thread of `team`
    ///
    /// Adopted threads have no host thread of ours to run to completion, so
    /// their records end here with `code`; spawned threads end themselves
    /// as soon as their function returns or their next wait fails.
    pub fn end_team(&self, team: TeamId, code: i32) -> usize {
        let ids = self.threads_of(team);
        for id in &ids {
            let Ok(record) = self.lookup(*id) else {
                continue;
            };
            record.wait.kill();
            if record.adopted {
                self.finish(&record, code);
            }
        }
        ids.len()
    }
}
