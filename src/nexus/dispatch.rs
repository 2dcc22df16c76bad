/*!
 * Request Dispatcher
 *
 * Decodes one `Request` into a broker call and packs the outcome into a
 * `Reply`. Calls may block (acquire, port read/write), so the server runs
 * every dispatch on a blocking thread.
 */

use super::protocol::{Operation, Reply, Request, PROTOCOL_VERSION};
use crate::area::{AddressSpec, LockMode, Protection};
use crate::broker::Broker;
use crate::core::errors::{KernelResult, Status};
use crate::core::timeout::{ReleaseFlags, WaitFlags};
use crate::core::types::{TeamId, KERNEL_TEAM};
use crate::monitoring::RequestSpan;
use crate::sem::WaitContext;
use tracing::{debug, warn};

/// Executes wire requests against a broker
#[derive(Clone, Debug)]
pub struct Dispatcher {
    broker: Broker,
}

impl Dispatcher {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Execute one request; never fails, errors travel in `return_code`
    pub fn dispatch(&self, request: &Request) -> Reply {
        self.dispatch_with(request, None)
    }

    /// Execute one request whose blocking waits run under `ctx`
    ///
    /// The server gives every connection its own context and kills it when
    /// the peer hangs up, which ends any wait still parked for that peer.
    pub fn dispatch_with(&self, request: &Request, ctx: Option<&WaitContext>) -> Reply {
        let may_block = Operation::from_raw(request.operation).is_some_and(Operation::may_block);
        let span = RequestSpan::new(request.operation, request.cookie, request.team, may_block);
        let reply = {
            let _entered = span.enter();
            self.dispatch_inner(request, ctx)
        };
        span.record_return(reply.return_code);
        reply
    }

    fn dispatch_inner(&self, request: &Request, ctx: Option<&WaitContext>) -> Reply {
        let cookie = request.cookie;
        if request.version != PROTOCOL_VERSION {
            warn!(
                version = request.version,
                expected = PROTOCOL_VERSION,
                "rejecting request with foreign protocol version"
            );
            return Reply::error(cookie, Status::NotSupported);
        }
        let Some(operation) = Operation::from_raw(request.operation) else {
            warn!(operation = request.operation, "rejecting unknown operation");
            return Reply::error(cookie, Status::NotSupported);
        };

        debug!(?operation, team = request.team, target = request.target_id, "Dispatching");
        match self.execute(operation, request, ctx) {
            Ok(reply) => reply,
            Err(status) => Reply::error(cookie, status),
        }
    }

    /// A user team that exists
    fn caller(&self, request: &Request) -> KernelResult<TeamId> {
        if request.team == KERNEL_TEAM {
            return Err(Status::BadTeamId);
        }
        self.broker.teams().check(request.team)?;
        Ok(request.team)
    }

    fn execute(
        &self,
        operation: Operation,
        req: &Request,
        ctx: Option<&WaitContext>,
    ) -> KernelResult<Reply> {
        let ok = Reply::ok(req.cookie);
        let wait_flags = WaitFlags::from_bits_truncate(req.flags);
        let b = &self.broker;

        let reply = match operation {
            Operation::Ping => ok.with_value(PROTOCOL_VERSION as i64),

            // Semaphores
            Operation::CreateSem => {
                let team = self.caller(req)?;
                let id = b.sems().create(int_arg(req.arg)?, req.name()?, team)?;
                ok.with_id(id)
            }
            Operation::DeleteSem => {
                b.delete_sem(self.caller(req)?, req.target_id)?;
                ok
            }
            Operation::AcquireSem => {
                b.acquire_sem(req.target_id, int_arg(req.arg)?, wait_flags, req.timeout, ctx)?;
                ok
            }
            Operation::ReleaseSem => {
                let flags = ReleaseFlags::from_bits_truncate(req.flags);
                b.release_sem(req.target_id, int_arg(req.arg)?, flags)?;
                ok
            }
            Operation::GetSemCount => ok.with_value(b.sems().get_count(req.target_id)? as i64),
            Operation::SetSemOwner => {
                b.set_sem_owner(self.caller(req)?, req.target_id, int_arg(req.arg)?)?;
                ok
            }

            // Ports
            Operation::CreatePort => {
                let team = self.caller(req)?;
                let id = b.ports().create(int_arg(req.arg)?, req.name()?, team)?;
                ok.with_id(id)
            }
            Operation::ClosePort => {
                b.ports().close(req.target_id)?;
                ok
            }
            Operation::DeletePort => {
                b.delete_port(self.caller(req)?, req.target_id)?;
                ok
            }
            Operation::FindPort => ok.with_id(b.ports().find(req.name()?)?),
            Operation::WritePort => {
                b.ports().write_etc(
                    req.target_id,
                    int_arg(req.arg)?,
                    &req.buffer,
                    wait_flags,
                    req.timeout,
                    ctx,
                )?;
                ok
            }
            Operation::ReadPort => {
                let mut message =
                    b.ports()
                        .read_message(req.target_id, wait_flags, req.timeout, ctx)?;
                let limit = usize::try_from(req.buffer_size).unwrap_or(usize::MAX);
                message.payload.truncate(limit);
                ok.with_value(message.code as i64)
                    .with_buffer(message.payload)
            }
            Operation::PortCount => ok.with_value(b.ports().count(req.target_id)? as i64),
            Operation::PortBufferSize => {
                let size =
                    b.ports()
                        .buffer_size_etc(req.target_id, wait_flags, req.timeout, ctx)?;
                ok.with_value(size as i64)
            }
            Operation::SetPortOwner => {
                b.set_port_owner(self.caller(req)?, req.target_id, int_arg(req.arg)?)?;
                ok
            }

            // Teams
            Operation::AttachTeam => ok.with_id(b.teams().create(req.name()?)?),
            Operation::ExitTeam => {
                let team = self.caller(req)?;
                let report = b.exit_team(team, int_arg(req.arg)?)?;
                ok.with_value(report.total() as i64)
            }

            // Areas
            Operation::CreateArea => {
                let team = self.caller(req)?;
                let size = usize::try_from(req.buffer_size).map_err(|_| Status::BadValue)?;
                let (id, address) = b.areas().create(
                    team,
                    req.name()?,
                    AddressSpec::Any,
                    size,
                    LockMode::from_legacy(req.flags)?,
                    protection_arg(req.arg)?,
                )?;
                ok.with_id(id).with_value(address as i64)
            }
            Operation::DeleteArea => {
                b.delete_area(self.caller(req)?, req.target_id)?;
                ok
            }
            Operation::FindArea => ok.with_id(b.areas().find(req.name()?)?),
            Operation::ResizeArea => {
                let size = usize::try_from(req.buffer_size).map_err(|_| Status::BadValue)?;
                b.areas().resize(req.target_id, size)?;
                ok
            }
            Operation::SetAreaProtection => {
                b.areas()
                    .set_protection(req.target_id, protection_arg(req.arg)?)?;
                ok
            }
        };
        Ok(reply)
    }
}

fn int_arg(arg: i64) -> KernelResult<i32> {
    i32::try_from(arg).map_err(|_| Status::BadValue)
}

fn protection_arg(arg: i64) -> KernelResult<Protection> {
    let bits = u32::try_from(arg).map_err(|_| Status::BadValue)?;
    Protection::from_bits(bits).ok_or(Status::BadValue)
}
