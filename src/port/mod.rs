/*!
 * Ports
 * Bounded FIFO message queues with independent read and write flow control
 */

mod engine;
mod types;

pub use engine::PortEngine;
pub use types::{Message, PortInfo};
