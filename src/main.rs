/*!
 * Nexus - Broker Daemon
 *
 * Owns one broker and serves it over a Unix socket so processes that do
 * not embed the library can still share semaphores, ports and areas.
 *
 * Environment:
 * - NEXUS_SOCKET: socket path (default /tmp/nexus-kit.sock)
 * - NEXUS_MAX_*: table capacities
 * - RUST_LOG / NEXUS_TRACE_JSON: logging
 */

use miette::{IntoDiagnostic, Result, WrapErr};
use nexus_kit::core::limits::DEFAULT_SOCKET_PATH;
use nexus_kit::{init_tracing, Broker, BrokerConfig, NexusServer};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = BrokerConfig::from_env();
    info!(
        max_sems = config.max_sems,
        max_ports = config.max_ports,
        max_areas = config.max_areas,
        max_teams = config.max_teams,
        max_threads = config.max_threads,
        "Nexus starting"
    );

    let socket = std::env::var("NEXUS_SOCKET").unwrap_or_else(|_| DEFAULT_SOCKET_PATH.to_string());
    let server = NexusServer::new(&socket, Broker::new(config));

    server
        .run()
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("nexus daemon failed on {socket}"))?;

    info!("Nexus stopped");
    Ok(())
}
