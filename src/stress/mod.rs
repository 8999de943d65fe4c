/*!
 * Stress Harness
 *
 * Token-ring scenario over the futex facade: each thread waits for its slot
 * to change, clears it, sets the next thread's slot and notifies it. A lost
 * wakeup shows up as a stall (bounded by a watchdog timeout) instead of a
 * hang.
 */

mod config;
mod ring;

pub use config::StressConfig;
pub use ring::{run_ring, run_ring_width, RingReport, TokenAtomic};
