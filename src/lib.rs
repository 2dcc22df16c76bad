/*!
 * Nexus Kit
 * Kernel-object broker: semaphores, ports, areas, teams and threads
 * shared by cooperating processes under a legacy handle-based API
 */

pub mod area;
pub mod broker;
pub mod core;
pub mod kernel;
pub mod monitoring;
pub mod nexus;
pub mod port;
pub mod sem;
pub mod team;

// Re-exports
pub use area::{AddressSpec, AreaInfo, LockMode, Protection};
pub use broker::{Broker, TeamHandle};
pub use crate::core::{
    status_code, BrokerConfig, KernelResult, ObjectKind, ReleaseFlags, Status, Timeout,
    WaitFlags, B_OK, KERNEL_TEAM,
};
pub use crate::core::types::{Address, AreaId, ObjectId, PortId, SemId, Size, TeamId, ThreadId};
pub use monitoring::init_tracing;
pub use nexus::{NexusClient, NexusServer};
pub use port::{Message, PortInfo};
pub use sem::SemInfo;
pub use team::{Letter, SweepReport, TeamInfo, ThreadInfo, ThreadState};

use std::sync::OnceLock;

static PROCESS_BROKER: OnceLock<Broker> = OnceLock::new();

/// Broker shared by everything in this process, configured from the environment
pub fn process_broker() -> &'static Broker {
    PROCESS_BROKER.get_or_init(Broker::from_env)
}

/// Attach the calling thread to the process broker as a new team
pub fn attach(name: &str) -> KernelResult<TeamHandle> {
    process_broker().attach(name)
}
