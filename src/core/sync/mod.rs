/*!
 * Synchronization Primitives
 *
 * The host wait primitive every blocking kernel-object operation parks on.
 *
 * # Performance
 *
 * - Lock-free check before parking
 * - Direct futex syscalls on Linux through parking_lot_core
 * - No allocation per wait
 */

mod futex;

pub use futex::{wait, wake_all, WordWait};
