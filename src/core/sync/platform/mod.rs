/*!
 * Native Futex Backends
 *
 * One capability trait, one implementation per OS, selected at build time:
 * - Linux/Android: `futex(2)` on 4-byte words
 * - macOS: `__ulock_wait`/`__ulock_wake` on 4-byte words
 * - Windows: `RtlWaitOnAddress`/`WakeByAddress*` on 1, 2, 4 and 8-byte words
 *
 * Widths a backend cannot wait on natively go through the parking lot,
 * which is itself written against this trait.
 */

use super::atomic::FutexAtomic;
use super::time::TimePoint;
use std::time::Duration;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux;
#[cfg(any(target_os = "macos", target_os = "ios"))]
mod macos;
#[cfg(windows)]
mod windows;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use linux::LinuxFutex as Platform;
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub use macos::DarwinFutex as Platform;
#[cfg(windows)]
pub use windows::WindowsFutex as Platform;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    windows
)))]
compile_error!("ai-os-futex supports Linux, Android, macOS, iOS and Windows only");

/// Bit for a word width in `NativeFutex::NATIVE_WIDTH_MASK`
pub const fn width_bit(width: usize) -> usize {
    1 << width
}

/// Whether `mask` includes `width`
pub const fn supports_width(mask: usize, width: usize) -> bool {
    width < usize::BITS as usize && mask & width_bit(width) != 0
}

/// OS wait-on-address capability
///
/// `wait*` block only while the word still holds `compare` when the OS
/// validates it; they may return spuriously and callers must re-check.
/// Timed variants return `false` on timeout and `true` otherwise.
///
/// `wake*` take a raw address: the word may already be gone by the time the
/// wake is issued (a waiter that saw its wake bit can return and pop its
/// frame), and the OS only uses the address as a key.
pub trait NativeFutex {
    /// Backend name for diagnostics
    const NAME: &'static str;

    /// Widths (bytes) the OS waits on directly, as `width_bit` flags
    const NATIVE_WIDTH_MASK: usize;

    fn wait<A: FutexAtomic>(val: &A, compare: A::Value);

    fn wait_for<A: FutexAtomic>(val: &A, compare: A::Value, duration: Duration) -> bool;

    fn wait_until<A: FutexAtomic, P: TimePoint>(val: &A, compare: A::Value, deadline: &P) -> bool;

    fn wake_one<A: FutexAtomic>(addr: *const A);

    fn wake_n<A: FutexAtomic>(addr: *const A, count: usize);

    fn wake_all<A: FutexAtomic>(addr: *const A);
}
