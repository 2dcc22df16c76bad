/*!
 * Port Engine
 *
 * Bounded FIFO message queues. Each port owns two semaphores:
 * - `write_sem` counts free slots and gates writers
 * - `read_sem` counts filled slots and gates readers
 *
 * Blocking happens only on those semaphores, never under the port's slot
 * lock, and the ring indices only advance under the slot lock. That split
 * is what keeps per-port ordering FIFO with any number of writers and
 * readers.
 *
 * # Lifecycle
 *
 * Open -> Closed (write_sem deleted, read_sem sealed so queued messages
 * still drain) -> Deleted (slot freed, both semaphores deleted).
 */

use super::types::{Message, PortEntry, PortInfo};
use crate::core::errors::{KernelResult, Status};
use crate::core::timeout::WaitFlags;
use crate::core::types::{ObjectKind, PortId, SemId, TeamId, KERNEL_TEAM};
use crate::kernel::ObjectTable;
use crate::sem::{SemaphoreEngine, WaitContext};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Port table and its operations
pub struct PortEngine {
    table: ObjectTable<PortEntry>,
    sems: Arc<SemaphoreEngine>,
    max_queue: usize,
    max_message_size: usize,
}

#[inline]
fn port_status(status: Status) -> Status {
    match status {
        Status::BadSemId => Status::BadPortId,
        other => other,
    }
}

impl PortEngine {
    pub fn new(
        sems: Arc<SemaphoreEngine>,
        capacity: usize,
        max_queue: usize,
        max_message_size: usize,
    ) -> Self {
        info!(capacity, max_queue, max_message_size, "Port engine initialized");
        Self {
            table: ObjectTable::new(ObjectKind::Port, capacity),
            sems,
            max_queue,
            max_message_size,
        }
    }

    #[inline]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Create a port holding up to `queue_length` messages
    pub fn create(&self, queue_length: i32, name: &str, owner: TeamId) -> KernelResult<PortId> {
        if queue_length <= 0 || queue_length as usize > self.max_queue {
            return Err(Status::BadValue);
        }

        // The flow-control semaphores belong to the broker, never to a team,
        // so a sweep can only reach them through the port.
        let write_sem = self
            .sems
            .create(queue_length, name, KERNEL_TEAM)
            .map_err(|_| Status::NoMorePorts)?;
        let read_sem = match self.sems.create(0, name, KERNEL_TEAM) {
            Ok(sem) => sem,
            Err(_) => {
                let _ = self.sems.delete(write_sem);
                return Err(Status::NoMorePorts);
            }
        };

        let entry = PortEntry::new(queue_length as usize, name, owner, read_sem, write_sem);
        match self.table.insert(entry) {
            Ok(id) => {
                debug!(port = id, queue_length, owner, name, "Created port");
                Ok(id)
            }
            Err(status) => {
                let _ = self.sems.delete(read_sem);
                let _ = self.sems.delete(write_sem);
                Err(status)
            }
        }
    }

    /// Legacy `write_port_etc`
    pub fn write_etc(
        &self,
        id: PortId,
        code: i32,
        data: &[u8],
        flags: WaitFlags,
        timeout: i64,
        ctx: Option<&WaitContext>,
    ) -> KernelResult<()> {
        if data.len() > self.max_message_size {
            return Err(Status::BadValue);
        }

        let write_sem = self.table.with(id, |port| {
            if port.closed {
                Err(Status::BadPortId)
            } else {
                Ok(port.write_sem)
            }
        })??;

        self.sems
            .acquire_etc(write_sem, 1, flags, timeout, ctx)
            .map_err(port_status)?;

        let read_sem = {
            let mut port = self.table.lock(id)?;
            if port.closed {
                return Err(Status::BadPortId);
            }
            let head = port.head;
            if port.slots[head].is_some() {
                error!(port = id, head, "write slot already occupied");
                panic!("port {} corrupted: slot {} occupied", id, head);
            }
            port.slots[head] = Some(Message::new(code, data));
            port.head = (head + 1) % port.capacity();
            port.total_count += 1;
            port.read_sem
        };

        if let Err(status) = self.sems.release(read_sem, 1) {
            // Only reachable when the port was deleted after the enqueue
            debug!(port = id, %status, "read semaphore gone after write");
        }
        Ok(())
    }

    pub fn write(&self, id: PortId, code: i32, data: &[u8]) -> KernelResult<()> {
        self.write_etc(id, code, data, WaitFlags::NONE, 0, None)
    }

    fn read_sem(&self, id: PortId) -> KernelResult<SemId> {
        self.table.with(id, |port| port.read_sem)
    }

    /// Dequeue the oldest message, blocking on `read_sem`
    pub fn read_message(
        &self,
        id: PortId,
        flags: WaitFlags,
        timeout: i64,
        ctx: Option<&WaitContext>,
    ) -> KernelResult<Message> {
        let read_sem = self.read_sem(id)?;
        self.sems
            .acquire_etc(read_sem, 1, flags, timeout, ctx)
            .map_err(port_status)?;

        let (message, write_sem) = {
            let mut port = self.table.lock(id)?;
            let tail = port.tail;
            let Some(message) = port.slots[tail].take() else {
                error!(port = id, tail, "granted read found an empty slot");
                panic!("port {} corrupted: slot {} empty", id, tail);
            };
            port.tail = (tail + 1) % port.capacity();
            (message, (!port.closed).then_some(port.write_sem))
        };

        if let Some(write_sem) = write_sem {
            let _ = self.sems.release(write_sem, 1);
        }
        Ok(message)
    }

    /// Legacy `read_port_etc`: copies what fits into `buffer`
    ///
    /// Returns the message code and the number of bytes copied; a longer
    /// payload is truncated, never corrupted.
    pub fn read_etc(
        &self,
        id: PortId,
        buffer: &mut [u8],
        flags: WaitFlags,
        timeout: i64,
        ctx: Option<&WaitContext>,
    ) -> KernelResult<(i32, usize)> {
        let message = self.read_message(id, flags, timeout, ctx)?;
        let copied = message.size().min(buffer.len());
        buffer[..copied].copy_from_slice(&message.payload[..copied]);
        Ok((message.code, copied))
    }

    pub fn read(&self, id: PortId) -> KernelResult<Message> {
        self.read_message(id, WaitFlags::NONE, 0, None)
    }

    /// Size of the next message, blocking until one is queued
    ///
    /// Waits on `read_sem` without taking a unit, so a concurrent reader
    /// never finds the queue emptied by a size query.
    pub fn buffer_size_etc(
        &self,
        id: PortId,
        flags: WaitFlags,
        timeout: i64,
        ctx: Option<&WaitContext>,
    ) -> KernelResult<usize> {
        let read_sem = self.read_sem(id)?;
        self.sems
            .wait_available(read_sem, 1, flags, timeout, ctx)
            .map_err(port_status)?;

        // A reader may have taken the message since; report the one now at
        // the head, or the empty queue as a closed port would
        let size = self.table.with(id, |port| {
            port.slots[port.tail].as_ref().map(Message::size)
        })?;
        size.ok_or(Status::BadPortId)
    }

    pub fn buffer_size(&self, id: PortId) -> KernelResult<usize> {
        self.buffer_size_etc(id, WaitFlags::NONE, 0, None)
    }

    /// Queued message count, clamped to zero while readers are blocked
    pub fn count(&self, id: PortId) -> KernelResult<i32> {
        let read_sem = self.read_sem(id)?;
        let count = self.sems.get_count(read_sem).map_err(port_status)?;
        Ok(count.max(0))
    }

    /// Refuse further writes; queued messages can still be read
    pub fn close(&self, id: PortId) -> KernelResult<()> {
        let (read_sem, write_sem) = self.table.with(id, |port| {
            if port.closed {
                return Err(Status::BadPortId);
            }
            port.closed = true;
            Ok((port.read_sem, port.write_sem))
        })??;

        let _ = self.sems.delete(write_sem);
        let _ = self.sems.seal(read_sem);
        debug!(port = id, "Closed port");
        Ok(())
    }

    pub fn delete(&self, id: PortId) -> KernelResult<()> {
        self.delete_checked(id, |_| Ok(()))
    }

    /// Delete after `check` accepts the owner; waiters on either side fail
    /// with `BadPortId`
    pub fn delete_checked(
        &self,
        id: PortId,
        check: impl FnOnce(TeamId) -> KernelResult<()>,
    ) -> KernelResult<()> {
        let entry = self.table.remove_if(id, |port| check(port.owner))?;
        for sem in [entry.read_sem, entry.write_sem] {
            match self.sems.delete(sem) {
                Ok(()) | Err(Status::BadSemId) => {}
                Err(status) => warn!(port = id, sem, %status, "failed to delete port semaphore"),
            }
        }
        let dropped = entry.slots.iter().filter(|slot| slot.is_some()).count();
        debug!(port = id, owner = entry.owner, dropped, "Deleted port");
        Ok(())
    }

    /// Exact-name lookup
    pub fn find(&self, name: &str) -> KernelResult<PortId> {
        self.table
            .find(|port| port.name.as_str() == name)
            .ok_or(Status::EntryNotFound)
    }

    /// Transfer ownership; returns the previous owner
    pub fn set_owner(&self, id: PortId, team: TeamId) -> KernelResult<TeamId> {
        self.table
            .with(id, |port| std::mem::replace(&mut port.owner, team))
    }

    pub fn owner(&self, id: PortId) -> KernelResult<TeamId> {
        self.table.with(id, |port| port.owner)
    }

    pub fn info(&self, id: PortId) -> KernelResult<PortInfo> {
        let (mut info, read_sem) = self
            .table
            .with(id, |port| (self.snapshot(id, port), port.read_sem))?;
        info.queue_count = self.sems.get_count(read_sem).unwrap_or(0).max(0);
        Ok(info)
    }

    /// Next port owned by `team` at or after `cookie`
    pub fn next_info(&self, team: TeamId, cookie: &mut i32) -> KernelResult<PortInfo> {
        let (mut info, read_sem) = self
            .table
            .next_after(cookie, |id, port| {
                (port.owner == team).then(|| (self.snapshot(id, port), port.read_sem))
            })
            .ok_or(Status::BadValue)?;
        info.queue_count = self.sems.get_count(read_sem).unwrap_or(0).max(0);
        Ok(info)
    }

    fn snapshot(&self, id: PortId, port: &PortEntry) -> PortInfo {
        PortInfo {
            port: id,
            team: port.owner,
            name: port.name.to_string(),
            capacity: port.reported_capacity(),
            queue_count: 0,
            total_count: port.total_count,
        }
    }

    /// Every port owned by `team`
    pub fn owned_by(&self, team: TeamId) -> Vec<PortId> {
        self.table.ids_where(|port| port.owner == team)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::limits::{PORT_MAX_MESSAGE_SIZE, PORT_MAX_QUEUE};
    use std::thread;
    use std::time::Duration;

    fn engines() -> (Arc<SemaphoreEngine>, Arc<PortEngine>) {
        let sems = Arc::new(SemaphoreEngine::new(64));
        let ports = Arc::new(PortEngine::new(
            sems.clone(),
            8,
            PORT_MAX_QUEUE,
            PORT_MAX_MESSAGE_SIZE,
        ));
        (sems, ports)
    }

    #[test]
    fn test_create_validates_queue_length() {
        let (_, ports) = engines();
        assert_eq!(ports.create(0, "zero", 1), Err(Status::BadValue));
        assert_eq!(
            ports.create(PORT_MAX_QUEUE as i32 + 1, "huge", 1),
            Err(Status::BadValue)
        );
        assert!(ports.create(PORT_MAX_QUEUE as i32, "max", 1).is_ok());
    }

    #[test]
    fn test_write_then_read() {
        let (_, ports) = engines();
        let port = ports.create(4, "echo", 1).unwrap();
        ports.write(port, 9, b"hello").unwrap();
        assert_eq!(ports.count(port), Ok(1));
        assert_eq!(ports.buffer_size(port), Ok(5));
        assert_eq!(ports.count(port), Ok(1));
        assert_eq!(ports.read(port), Ok(Message::new(9, b"hello".to_vec())));
        assert_eq!(ports.count(port), Ok(0));
    }

    #[test]
    fn test_empty_and_maximum_payloads() {
        let (_, ports) = engines();
        let port = ports.create(2, "sizes", 1).unwrap();
        let big = vec![0xAB; PORT_MAX_MESSAGE_SIZE];
        ports.write(port, 1, &[]).unwrap();
        ports.write(port, 2, &big).unwrap();
        assert_eq!(ports.read(port).unwrap().payload, Vec::<u8>::new());
        assert_eq!(ports.read(port).unwrap().payload, big);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let (_, ports) = engines();
        let port = ports.create(2, "big", 1).unwrap();
        let data = vec![0; PORT_MAX_MESSAGE_SIZE + 1];
        assert_eq!(ports.write(port, 1, &data), Err(Status::BadValue));
        assert_eq!(ports.count(port), Ok(0));
    }

    #[test]
    fn test_read_truncates_into_small_buffer() {
        let (_, ports) = engines();
        let port = ports.create(1, "trunc", 1).unwrap();
        ports.write(port, 3, b"abcdef").unwrap();
        let mut buffer = [0u8; 4];
        let (code, copied) = ports
            .read_etc(port, &mut buffer, WaitFlags::NONE, 0, None)
            .unwrap();
        assert_eq!((code, copied), (3, 4));
        assert_eq!(&buffer, b"abcd");
    }

    #[test]
    fn test_full_port_would_block() {
        let (_, ports) = engines();
        let port = ports.create(1, "full", 1).unwrap();
        ports.write(port, 1, b"x").unwrap();
        assert_eq!(
            ports.write_etc(port, 2, b"y", WaitFlags::TIMEOUT, 0, None),
            Err(Status::WouldBlock)
        );
        let mut buffer = [0u8; 1];
        ports.read_etc(port, &mut buffer, WaitFlags::NONE, 0, None).unwrap();
        assert_eq!(
            ports.read_etc(port, &mut buffer, WaitFlags::TIMEOUT, 0, None),
            Err(Status::WouldBlock)
        );
    }

    #[test]
    fn test_close_drains_then_fails() {
        let (_, ports) = engines();
        let port = ports.create(4, "closing", 1).unwrap();
        ports.write(port, 1, b"a").unwrap();
        ports.close(port).unwrap();

        assert_eq!(ports.write(port, 2, b"b"), Err(Status::BadPortId));
        assert_eq!(ports.info(port).unwrap().capacity, 0);
        assert_eq!(ports.read(port).unwrap().code, 1);
        assert_eq!(ports.read(port), Err(Status::BadPortId));
        assert_eq!(ports.close(port), Err(Status::BadPortId));
        ports.delete(port).unwrap();
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let (_, ports) = engines();
        let port = ports.create(1, "wake", 1).unwrap();
        let reader = {
            let ports = ports.clone();
            thread::spawn(move || ports.read(port))
        };
        thread::sleep(Duration::from_millis(30));
        ports.close(port).unwrap();
        assert_eq!(reader.join().unwrap(), Err(Status::BadPortId));
    }

    #[test]
    fn test_delete_releases_semaphores() {
        let (sems, ports) = engines();
        let before = sems.len();
        let port = ports.create(2, "gone", 1).unwrap();
        assert_eq!(sems.len(), before + 2);
        ports.delete(port).unwrap();
        assert_eq!(sems.len(), before);
        assert_eq!(ports.read(port), Err(Status::BadPortId));
        assert_eq!(ports.delete(port), Err(Status::BadPortId));
    }

    #[test]
    fn test_find_by_name() {
        let (_, ports) = engines();
        let port = ports.create(1, "registrar", 1).unwrap();
        assert_eq!(ports.find("registrar"), Ok(port));
        assert_eq!(ports.find("nobody"), Err(Status::EntryNotFound));
    }

    #[test]
    fn test_info_counts() {
        let (_, ports) = engines();
        let port = ports.create(3, "info", 4).unwrap();
        ports.write(port, 1, b"1").unwrap();
        ports.write(port, 2, b"2").unwrap();
        ports.read(port).unwrap();

        let info = ports.info(port).unwrap();
        assert_eq!(info.team, 4);
        assert_eq!(info.capacity, 3);
        assert_eq!(info.queue_count, 1);
        assert_eq!(info.total_count, 2);

        let mut cookie = 0;
        assert_eq!(ports.next_info(4, &mut cookie).unwrap().port, port);
        assert_eq!(ports.next_info(4, &mut cookie), Err(Status::BadValue));
    }
}
