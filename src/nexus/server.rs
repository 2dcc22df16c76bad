/*!
 * Nexus Server
 *
 * Unix-socket front end of the broker. One task per connection; every
 * request runs on the blocking pool because a dispatch may park the
 * serving thread until a semaphore or port becomes available.
 *
 * A connection stands for the client process: when it closes, for any
 * reason, every team attached through it that has not exited is killed
 * and swept, and a wait still parked for it is cut short.
 */

use super::dispatch::Dispatcher;
use super::protocol::{
    read_frame_async, write_frame_async, Operation, ProtocolError, Reply, Request,
};
use crate::broker::Broker;
use crate::core::errors::{Status, B_OK};
use crate::core::limits::KILLED_EXIT_CODE;
use crate::core::types::TeamId;
use crate::sem::WaitContext;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

/// Broker daemon bound to a socket path
pub struct NexusServer {
    path: PathBuf,
    dispatcher: Dispatcher,
}

impl NexusServer {
    pub fn new(path: impl Into<PathBuf>, broker: Broker) -> Self {
        Self {
            path: path.into(),
            dispatcher: Dispatcher::new(broker),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bind the socket, replacing a stale one left by a previous run
    pub fn bind(&self) -> std::io::Result<UnixListener> {
        if self.path.exists() {
            warn!(path = %self.path.display(), "removing stale socket");
            std::fs::remove_file(&self.path)?;
        }
        let listener = UnixListener::bind(&self.path)?;
        info!(path = %self.path.display(), "Nexus listening");
        Ok(listener)
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> std::io::Result<()> {
        let listener = self.bind()?;
        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
            }
        })
        .await
    }

    /// Accept connections until `shutdown` resolves, then remove the socket file
    pub async fn serve<F>(self, listener: UnixListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Nexus shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let dispatcher = self.dispatcher.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, dispatcher).await {
                                warn!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not remove socket file");
        }
        Ok(())
    }
}

/// What one connection has attached and the wait context its requests run under
struct Session {
    teams: Vec<TeamId>,
    wait: Arc<WaitContext>,
}

impl Session {
    fn new() -> Self {
        Self {
            teams: Vec::new(),
            wait: Arc::new(WaitContext::new(-1)),
        }
    }

    /// Track teams attached and exited through this connection
    fn record(&mut self, operation: u32, team: TeamId, reply: &Reply) {
        if reply.return_code != B_OK {
            return;
        }
        match Operation::from_raw(operation) {
            Some(Operation::AttachTeam) => self.teams.push(reply.out_id),
            Some(Operation::ExitTeam) => self.teams.retain(|t| *t != team),
            _ => {}
        }
    }
}

async fn handle_connection(stream: UnixStream, dispatcher: Dispatcher) -> Result<(), ProtocolError> {
    debug!("Client connected");
    let mut session = Session::new();
    let result = serve_requests(stream, &dispatcher, &mut session).await;
    reclaim(&dispatcher, session).await;
    result
}

async fn serve_requests(
    stream: UnixStream,
    dispatcher: &Dispatcher,
    session: &mut Session,
) -> Result<(), ProtocolError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    while let Some(request) = read_frame_async::<_, Request>(&mut reader).await? {
        let worker = dispatcher.clone();
        let wait = session.wait.clone();
        let (cookie, operation, team) = (request.cookie, request.operation, request.team);
        let mut task =
            tokio::task::spawn_blocking(move || worker.dispatch_with(&request, Some(&wait)));

        let mut hung_up = false;
        let finished = tokio::select! {
            joined = &mut task => Some(joined),
            gone = peer_hung_up(&mut reader) => {
                if gone {
                    debug!(cookie, "peer hung up during request");
                    hung_up = true;
                    session.wait.kill();
                }
                None
            }
        };
        let joined = match finished {
            Some(joined) => joined,
            None => task.await,
        };

        let reply = match joined {
            Ok(reply) => reply,
            Err(e) => {
                error!(cookie, error = %e, "dispatch task failed");
                Reply::error(cookie, Status::NotSupported)
            }
        };
        session.record(operation, team, &reply);
        if hung_up {
            break;
        }
        write_frame_async(&mut write_half, &reply).await?;
    }
    debug!("Client disconnected");
    Ok(())
}

/// Resolves once the peer closed its end; `false` when a request is
/// already buffered instead
async fn peer_hung_up<R: AsyncBufRead + Unpin>(reader: &mut R) -> bool {
    match reader.fill_buf().await {
        Ok(buffered) => buffered.is_empty(),
        Err(_) => true,
    }
}

/// A dropped connection is the death of every team it attached
async fn reclaim(dispatcher: &Dispatcher, session: Session) {
    session.wait.kill();
    for team in session.teams {
        let broker = dispatcher.broker().clone();
        match tokio::task::spawn_blocking(move || broker.exit_team(team, KILLED_EXIT_CODE)).await {
            Ok(Ok(report)) => info!(team, reclaimed = report.total(), "Reclaimed team of closed connection"),
            Ok(Err(status)) => warn!(team, %status, "could not reclaim team of closed connection"),
            Err(e) => error!(team, error = %e, "reclaim task failed"),
        }
    }
}
