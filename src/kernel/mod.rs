/*!
 * Kernel Object Infrastructure
 * Id allocation and the slot arena every engine stores its objects in
 */

pub mod id;
pub mod table;

pub use id::IdAllocator;
pub use table::{EntryGuard, ObjectTable};
