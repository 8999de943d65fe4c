/*!
 * Monitoring
 * Structured tracing setup and timed spans for the stress harness
 */

mod tracer;

pub use tracer::{init_tracing, RunSpan};
