/*!
 * Core Module
 * Status codes, handle types, limits, configuration and the host wait primitive
 */

pub mod config;
pub mod errors;
pub mod limits;
pub mod name;
pub mod sync;
pub mod timeout;
pub mod types;

// Re-export for convenience
pub use config::BrokerConfig;
pub use errors::*;
pub use name::ObjectName;
pub use timeout::{ReleaseFlags, Timeout, WaitFlags, WaitOutcome};
pub use types::*;
