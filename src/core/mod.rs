/*!
 * Core Module
 * Error handling, compiler hints and the synchronization primitives
 */

pub mod errors;
pub mod hints;
pub mod sync;

// Re-export for convenience
pub use errors::*;
pub use hints::*;
