/*!
 * AI-OS Futex Library
 * Portable futex-style wait/notify over atomics of any width
 */

#![cfg_attr(feature = "nightly", feature(core_intrinsics))]
#![cfg_attr(feature = "nightly", allow(internal_features))]

pub mod core;
pub mod monitoring;
pub mod stress;

// Re-exports
pub use crate::core::errors::{fatal, FutexError, FutexResult};
pub use crate::core::sync::futex::{notify_n, wait, wait_for, wait_until, wake, wake_all, wake_one};
pub use crate::core::sync::{
    reinterpret_as, DefaultParkingLot, Futex, FutexAtomic, FutexMutex, FutexMutexGuard, FutexRecursiveMutex,
    FutexRecursiveMutexGuard, IpcLock, IpcLockGuard, NativeFutex, ParkingLot, Platform, SyncConfig, TimePoint,
};
pub use monitoring::init_tracing;
pub use stress::{run_ring, run_ring_width, RingReport, StressConfig};
