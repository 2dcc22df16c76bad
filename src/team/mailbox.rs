/*!
 * Thread Mailbox
 *
 * Single-slot mailbox built on a semaphore pair: `write_sem` starts at one
 * and gates senders, `read_sem` starts at zero and gates the owner.
 */

use super::types::Letter;
use crate::core::errors::{KernelResult, Status};
use crate::core::timeout::WaitFlags;
use crate::core::types::{SemId, ThreadId, KERNEL_TEAM};
use crate::sem::{SemaphoreEngine, WaitContext};
use parking_lot::Mutex;

pub(crate) struct Mailbox {
    write_sem: SemId,
    read_sem: SemId,
    slot: Mutex<Option<Letter>>,
}

fn mailbox_status(status: Status) -> Status {
    match status {
        Status::BadSemId => Status::BadThreadId,
        other => other,
    }
}

impl Mailbox {
    pub fn create(sems: &SemaphoreEngine, name: &str) -> KernelResult<Self> {
        let write_sem = sems.create(1, name, KERNEL_TEAM)?;
        let read_sem = match sems.create(0, name, KERNEL_TEAM) {
            Ok(sem) => sem,
            Err(status) => {
                let _ = sems.delete(write_sem);
                return Err(status);
            }
        };
        Ok(Self {
            write_sem,
            read_sem,
            slot: Mutex::new(None),
        })
    }

    /// Deposit a letter, waiting while the previous one is unread
    pub fn send(
        &self,
        sems: &SemaphoreEngine,
        sender: ThreadId,
        code: i32,
        data: &[u8],
        ctx: Option<&WaitContext>,
    ) -> KernelResult<()> {
        sems.acquire_etc(self.write_sem, 1, WaitFlags::NONE, 0, ctx)
            .map_err(mailbox_status)?;
        *self.slot.lock() = Some(Letter {
            sender,
            code,
            data: data.to_vec(),
        });
        sems.release(self.read_sem, 1).map_err(mailbox_status)
    }

    /// Take the letter, waiting until one arrives
    pub fn receive(&self, sems: &SemaphoreEngine, ctx: Option<&WaitContext>) -> KernelResult<Letter> {
        sems.acquire_etc(self.read_sem, 1, WaitFlags::NONE, 0, ctx)
            .map_err(mailbox_status)?;
        let letter = self.slot.lock().take();
        let _ = sems.release(self.write_sem, 1);
        letter.ok_or(Status::BadThreadState)
    }

    pub fn has_data(&self, sems: &SemaphoreEngine) -> bool {
        sems.get_count(self.read_sem).is_ok_and(|count| count > 0)
    }

    pub fn sem_ids(&self) -> [SemId; 2] {
        [self.write_sem, self.read_sem]
    }

    pub fn destroy(&self, sems: &SemaphoreEngine) {
        for sem in self.sem_ids() {
            let _ = sems.delete(sem);
        }
    }
}
