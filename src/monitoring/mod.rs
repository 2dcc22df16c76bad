/*!
 * Monitoring
 * Tracing setup shared by the daemon and embedding processes
 */

mod tracer;

pub use tracer::{init_tracing, RequestSpan};
