/*!
 * Semaphores
 * Counting semaphores with FIFO group acquires and cancellable waits
 */

mod engine;
mod types;
mod waiter;

pub use engine::SemaphoreEngine;
pub use types::SemInfo;
pub use waiter::WaitContext;
