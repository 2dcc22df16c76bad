/*!
 * Broker
 * Arbitration authority, per-team handle API and process-exit sweep
 */

#[allow(clippy::module_inception)]
mod broker;
mod handle;
mod sweep;

pub use broker::Broker;
pub use handle::TeamHandle;
