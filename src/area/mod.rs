/*!
 * Areas
 * Named shared-memory regions backed by memfd and mapped per clone
 */

mod backing;
mod engine;
mod types;

pub use backing::{page_size, round_to_pages};
pub use engine::AreaEngine;
pub use types::{AddressSpec, AreaInfo, LockMode, Protection};
