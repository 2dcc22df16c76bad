/*!
 * Nexus
 * Versioned request/reply contract for reaching the broker out of process
 */

mod client;
mod dispatch;
pub mod protocol;
mod server;

pub use client::{ClientError, ClientResult, NexusClient};
pub use dispatch::Dispatcher;
pub use protocol::{Operation, ProtocolError, Reply, Request, PROTOCOL_VERSION};
pub use server::NexusServer;
