/*!
 * Teams and Threads
 * Ownership units, thread records, the per-thread block primitive and mailbox
 */

mod mailbox;
mod registry;
mod thread;
mod types;

pub use registry::{SweepClaim, TeamRegistry};
pub use thread::{ThreadManager, ThreadRecord};
pub use types::{Letter, SweepReport, TeamInfo, ThreadInfo, ThreadState};
