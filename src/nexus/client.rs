/*!
 * Nexus Client
 * Blocking client for processes that reach the broker through the daemon
 */

use super::protocol::{read_frame, write_frame, Operation, ProtocolError, Reply, Request};
use crate::area::Protection;
use crate::core::errors::Status;
use crate::core::timeout::{ReleaseFlags, WaitFlags};
use crate::core::types::{AreaId, PortId, SemId, Size, TeamId, KERNEL_TEAM};
use std::os::unix::net::UnixStream;
use std::path::Path;
use thiserror::Error;

/// Client-side failure
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Codec(String),

    #[error("broker returned {0}")]
    Status(#[from] Status),
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => ClientError::Io(e),
            other => ClientError::Codec(other.to_string()),
        }
    }
}

impl ClientError {
    /// Broker status, if the failure was one
    pub fn status(&self) -> Option<Status> {
        match self {
            ClientError::Status(status) => Some(*status),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// One connection to a nexus daemon, acting for one team
#[derive(Debug)]
pub struct NexusClient {
    stream: UnixStream,
    team: TeamId,
    next_cookie: u64,
}

impl NexusClient {
    /// Connect without a team; only `ping` and `attach` make sense until attached
    pub fn connect(path: impl AsRef<Path>) -> ClientResult<Self> {
        Ok(Self {
            stream: UnixStream::connect(path)?,
            team: KERNEL_TEAM,
            next_cookie: 1,
        })
    }

    pub fn team(&self) -> TeamId {
        self.team
    }

    /// Send one request and wait for its reply
    pub fn call(&mut self, request: Request) -> ClientResult<Reply> {
        let cookie = self.next_cookie;
        self.next_cookie = self.next_cookie.wrapping_add(1);
        let request = request.with_cookie(cookie);

        write_frame(&mut self.stream, &request)?;
        let reply: Reply = read_frame(&mut self.stream)?;
        if reply.cookie != cookie {
            return Err(ClientError::Codec(format!(
                "reply cookie {} does not match request {}",
                reply.cookie, cookie
            )));
        }
        Ok(reply.into_result()?)
    }

    fn request(&self, operation: Operation) -> Request {
        Request::new(self.team, operation)
    }

    /// Protocol version spoken by the daemon
    pub fn ping(&mut self) -> ClientResult<u32> {
        let reply = self.call(self.request(Operation::Ping))?;
        Ok(reply.value as u32)
    }

    /// Create a team on the daemon and act for it from now on
    pub fn attach(&mut self, name: &str) -> ClientResult<TeamId> {
        let reply = self.call(self.request(Operation::AttachTeam).with_buffer(name))?;
        self.team = reply.out_id;
        Ok(self.team)
    }

    /// End the team; returns how many objects the sweep reclaimed
    pub fn exit_team(&mut self, code: i32) -> ClientResult<usize> {
        let reply = self.call(self.request(Operation::ExitTeam).with_arg(code as i64))?;
        Ok(reply.value as usize)
    }

    // Semaphores

    pub fn create_sem(&mut self, count: i32, name: &str) -> ClientResult<SemId> {
        let request = self
            .request(Operation::CreateSem)
            .with_buffer(name)
            .with_arg(count as i64);
        Ok(self.call(request)?.out_id)
    }

    pub fn delete_sem(&mut self, id: SemId) -> ClientResult<()> {
        self.call(self.request(Operation::DeleteSem).with_target(id))?;
        Ok(())
    }

    pub fn acquire_sem_etc(
        &mut self,
        id: SemId,
        count: i32,
        flags: WaitFlags,
        timeout: i64,
    ) -> ClientResult<()> {
        let request = self
            .request(Operation::AcquireSem)
            .with_target(id)
            .with_arg(count as i64)
            .with_wait(flags.bits(), timeout);
        self.call(request)?;
        Ok(())
    }

    pub fn acquire_sem(&mut self, id: SemId) -> ClientResult<()> {
        self.acquire_sem_etc(id, 1, WaitFlags::NONE, 0)
    }

    pub fn release_sem_etc(&mut self, id: SemId, count: i32, flags: ReleaseFlags) -> ClientResult<()> {
        let request = self
            .request(Operation::ReleaseSem)
            .with_target(id)
            .with_arg(count as i64)
            .with_wait(flags.bits(), 0);
        self.call(request)?;
        Ok(())
    }

    pub fn release_sem(&mut self, id: SemId) -> ClientResult<()> {
        self.release_sem_etc(id, 1, ReleaseFlags::NONE)
    }

    pub fn get_sem_count(&mut self, id: SemId) -> ClientResult<i32> {
        let reply = self.call(self.request(Operation::GetSemCount).with_target(id))?;
        Ok(reply.value as i32)
    }

    pub fn set_sem_owner(&mut self, id: SemId, team: TeamId) -> ClientResult<()> {
        let request = self
            .request(Operation::SetSemOwner)
            .with_target(id)
            .with_arg(team as i64);
        self.call(request)?;
        Ok(())
    }

    // Ports

    pub fn create_port(&mut self, capacity: i32, name: &str) -> ClientResult<PortId> {
        let request = self
            .request(Operation::CreatePort)
            .with_buffer(name)
            .with_arg(capacity as i64);
        Ok(self.call(request)?.out_id)
    }

    pub fn close_port(&mut self, id: PortId) -> ClientResult<()> {
        self.call(self.request(Operation::ClosePort).with_target(id))?;
        Ok(())
    }

    pub fn delete_port(&mut self, id: PortId) -> ClientResult<()> {
        self.call(self.request(Operation::DeletePort).with_target(id))?;
        Ok(())
    }

    pub fn find_port(&mut self, name: &str) -> ClientResult<PortId> {
        Ok(self.call(self.request(Operation::FindPort).with_buffer(name))?.out_id)
    }

    pub fn write_port_etc(
        &mut self,
        id: PortId,
        code: i32,
        data: &[u8],
        flags: WaitFlags,
        timeout: i64,
    ) -> ClientResult<()> {
        let request = self
            .request(Operation::WritePort)
            .with_target(id)
            .with_arg(code as i64)
            .with_buffer(data)
            .with_wait(flags.bits(), timeout);
        self.call(request)?;
        Ok(())
    }

    pub fn write_port(&mut self, id: PortId, code: i32, data: &[u8]) -> ClientResult<()> {
        self.write_port_etc(id, code, data, WaitFlags::NONE, 0)
    }

    /// Read the next message, keeping at most `max_len` payload bytes
    pub fn read_port_etc(
        &mut self,
        id: PortId,
        max_len: usize,
        flags: WaitFlags,
        timeout: i64,
    ) -> ClientResult<(i32, Vec<u8>)> {
        let request = self
            .request(Operation::ReadPort)
            .with_target(id)
            .with_buffer_size(max_len as u64)
            .with_wait(flags.bits(), timeout);
        let reply = self.call(request)?;
        Ok((reply.value as i32, reply.buffer))
    }

    pub fn read_port(&mut self, id: PortId, max_len: usize) -> ClientResult<(i32, Vec<u8>)> {
        self.read_port_etc(id, max_len, WaitFlags::NONE, 0)
    }

    pub fn port_count(&mut self, id: PortId) -> ClientResult<i32> {
        Ok(self.call(self.request(Operation::PortCount).with_target(id))?.value as i32)
    }

    pub fn port_buffer_size_etc(
        &mut self,
        id: PortId,
        flags: WaitFlags,
        timeout: i64,
    ) -> ClientResult<usize> {
        let request = self
            .request(Operation::PortBufferSize)
            .with_target(id)
            .with_wait(flags.bits(), timeout);
        Ok(self.call(request)?.value as usize)
    }

    pub fn set_port_owner(&mut self, id: PortId, team: TeamId) -> ClientResult<()> {
        let request = self
            .request(Operation::SetPortOwner)
            .with_target(id)
            .with_arg(team as i64);
        self.call(request)?;
        Ok(())
    }

    // Areas

    /// Create an area in the daemon; returns the id, the address is daemon-local
    pub fn create_area(
        &mut self,
        name: &str,
        size: Size,
        protection: Protection,
    ) -> ClientResult<AreaId> {
        let request = self
            .request(Operation::CreateArea)
            .with_buffer(name)
            .with_buffer_size(size as u64)
            .with_arg(protection.bits() as i64);
        Ok(self.call(request)?.out_id)
    }

    pub fn delete_area(&mut self, id: AreaId) -> ClientResult<()> {
        self.call(self.request(Operation::DeleteArea).with_target(id))?;
        Ok(())
    }

    pub fn find_area(&mut self, name: &str) -> ClientResult<AreaId> {
        Ok(self.call(self.request(Operation::FindArea).with_buffer(name))?.out_id)
    }

    pub fn resize_area(&mut self, id: AreaId, size: Size) -> ClientResult<()> {
        let request = self
            .request(Operation::ResizeArea)
            .with_target(id)
            .with_buffer_size(size as u64);
        self.call(request)?;
        Ok(())
    }

    pub fn set_area_protection(&mut self, id: AreaId, protection: Protection) -> ClientResult<()> {
        let request = self
            .request(Operation::SetAreaProtection)
            .with_target(id)
            .with_arg(protection.bits() as i64);
        self.call(request)?;
        Ok(())
    }
}
