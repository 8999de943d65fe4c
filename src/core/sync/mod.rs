/*!
 * Synchronization Primitives
 *
 * Futex-style wait/notify over atomics of any width:
 * - Native OS wait-on-address where the OS supports the width
 * - A hashed parking lot everywhere else
 * - A futex-backed mutex and a named inter-process lock on top
 *
 * # Architecture
 *
 * `platform` exposes one `NativeFutex` implementation per OS. `parking` is
 * written once against that trait. `futex` picks between the two per atomic
 * type at compile time.
 *
 * # Performance
 *
 * - Zero allocations: waiter records live on the waiting thread's stack
 * - No syscalls when the value already differs
 * - Notifiers never hold a bucket lock across a wake syscall
 * - Buckets are cache-line aligned to prevent false sharing
 */

pub mod atomic;
mod config;
pub mod futex;
mod ipc_lock;
mod mutex;
pub mod parking;
pub mod platform;
pub mod spinwait;
pub mod time;

pub use atomic::{reinterpret_as, FutexAtomic, Integral, Pod};
pub use config::SyncConfig;
pub use futex::Futex;
pub use ipc_lock::{IpcLock, IpcLockGuard, MAX_LOCK_NAME};
pub use mutex::{FutexMutex, FutexMutexGuard, FutexRecursiveMutex, FutexRecursiveMutexGuard};
pub use parking::{DefaultParkingLot, ParkingLot, WAIT_BUCKETS};
pub use platform::{NativeFutex, Platform};
pub use time::{TimePoint, MAX_WAIT};
