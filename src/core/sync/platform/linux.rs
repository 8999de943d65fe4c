/*!
 * Linux futex(2) backend
 *
 * The kernel only waits on 4-byte words; other widths are emulated by the
 * parking lot on top of this backend.
 */

use super::{width_bit, NativeFutex};
use crate::core::errors::{fatal, FutexError};
use crate::core::sync::atomic::{reinterpret_as, FutexAtomic};
use crate::core::sync::time::{clamp_duration, TimePoint};
use libc::{c_int, c_long, timespec};
use std::ptr;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

const NANOS_PER_SEC: c_long = 1_000_000_000;

/// Match any waiter bitset (`FUTEX_BITSET_MATCH_ANY`)
const BITSET_MATCH_ANY: u32 = u32::MAX;

const WAIT_PRIVATE: c_int = libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG;
const WAIT_BITSET_PRIVATE: c_int = libc::FUTEX_WAIT_BITSET | libc::FUTEX_PRIVATE_FLAG;
const WAKE_BITSET_PRIVATE: c_int = libc::FUTEX_WAKE_BITSET | libc::FUTEX_PRIVATE_FLAG;

/// `futex(2)` backend
pub struct LinuxFutex;

/// Raw syscall; `Err(errno)` on failure
#[inline]
fn futex(
    word: *const AtomicU32,
    op: c_int,
    val: u32,
    timeout: *const timespec,
    val3: u32,
) -> Result<c_long, c_int> {
    // SAFETY: the kernel validates `word` itself; for wait operations it is a
    // live reference, for wake operations it is only used as a hash key.
    let ret = unsafe { libc::syscall(libc::SYS_futex, word, op, val, timeout, ptr::null::<u32>(), val3) };
    if ret >= 0 {
        Ok(ret)
    } else {
        Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }
}

/// View a 4-byte atomic as the kernel's native word
#[inline(always)]
fn word<A: FutexAtomic>(val: *const A) -> *const AtomicU32 {
    if A::WIDTH != 4 {
        fatal(FutexError::UnsupportedWidth(A::WIDTH));
    }
    val as *const AtomicU32
}

#[inline(always)]
fn expected<A: FutexAtomic>(compare: &A::Value) -> u32 {
    reinterpret_as::<u32, _>(compare)
}

fn to_timespec(d: Duration) -> timespec {
    timespec {
        tv_sec: d.as_secs() as _,
        tv_nsec: d.subsec_nanos() as _,
    }
}

fn monotonic_now() -> timespec {
    let mut ts = timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: `ts` is a valid out-pointer.
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if ret != 0 {
        let code = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        fatal(FutexError::os("clock_gettime(CLOCK_MONOTONIC)", code.into()));
    }
    ts
}

/// Absolute CLOCK_MONOTONIC deadline `remaining` after `now`
fn deadline_after(now: timespec, remaining: Duration) -> timespec {
    let delta = to_timespec(remaining);
    let mut ts = timespec {
        tv_sec: now.tv_sec + delta.tv_sec,
        tv_nsec: now.tv_nsec + delta.tv_nsec,
    };
    if ts.tv_nsec >= NANOS_PER_SEC {
        ts.tv_sec += 1;
        ts.tv_nsec -= NANOS_PER_SEC;
    }
    ts
}

impl NativeFutex for LinuxFutex {
    const NAME: &'static str = "linux-futex";
    const NATIVE_WIDTH_MASK: usize = width_bit(4);

    fn wait<A: FutexAtomic>(val: &A, compare: A::Value) {
        let word = word(val);
        let compare = expected::<A>(&compare);
        loop {
            match futex(word, WAIT_BITSET_PRIVATE, compare, ptr::null(), BITSET_MATCH_ANY) {
                // Valid or spurious wakeup
                Ok(_) | Err(libc::EAGAIN) => return,
                // Untimed waits can report ETIMEDOUT under WSL
                Err(libc::ETIMEDOUT) | Err(libc::EINTR) => continue,
                Err(code) => fatal(FutexError::os("futex(FUTEX_WAIT_BITSET)", code.into())),
            }
        }
    }

    fn wait_for<A: FutexAtomic>(val: &A, compare: A::Value, duration: Duration) -> bool {
        let duration = clamp_duration(duration);
        if duration.is_zero() {
            return false;
        }

        // Relative timeouts are only accepted by plain FUTEX_WAIT
        let ts = to_timespec(duration);
        match futex(word(val), WAIT_PRIVATE, expected::<A>(&compare), &ts, 0) {
            // A signal counts as a spurious wakeup
            Ok(_) | Err(libc::EAGAIN) | Err(libc::EINTR) => true,
            Err(libc::ETIMEDOUT) => false,
            Err(code) => fatal(FutexError::os("futex(FUTEX_WAIT)", code.into())),
        }
    }

    fn wait_until<A: FutexAtomic, P: TimePoint>(val: &A, compare: A::Value, deadline: &P) -> bool {
        let remaining = match deadline.remaining() {
            Some(remaining) => remaining,
            None => return false,
        };

        let ts = deadline_after(monotonic_now(), remaining);
        let word = word(val);
        let compare = expected::<A>(&compare);
        loop {
            match futex(word, WAIT_BITSET_PRIVATE, compare, &ts, BITSET_MATCH_ANY) {
                Ok(_) | Err(libc::EAGAIN) => return true,
                Err(libc::EINTR) => continue,
                Err(libc::ETIMEDOUT) => return false,
                Err(code) => fatal(FutexError::os("futex(FUTEX_WAIT_BITSET)", code.into())),
            }
        }
    }

    fn wake_one<A: FutexAtomic>(addr: *const A) {
        Self::wake_n(addr, 1);
    }

    fn wake_n<A: FutexAtomic>(addr: *const A, count: usize) {
        let count = count.min(i32::MAX as usize) as u32;
        let ret = futex(word(addr), WAKE_BITSET_PRIVATE, count, ptr::null(), BITSET_MATCH_ANY);
        debug_assert!(ret.is_ok(), "futex(FUTEX_WAKE_BITSET) failed: {:?}", ret);
    }

    fn wake_all<A: FutexAtomic>(addr: *const A) {
        Self::wake_n(addr, i32::MAX as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_deadline_carries_nanoseconds() {
        let now = timespec {
            tv_sec: 10,
            tv_nsec: 999_000_000,
        };
        let ts = deadline_after(now, Duration::from_millis(2));
        assert_eq!((ts.tv_sec, ts.tv_nsec), (11, 1_000_000));

        let ts = deadline_after(now, Duration::new(3, 500));
        assert_eq!((ts.tv_sec, ts.tv_nsec), (13, 999_000_500));
    }

    #[test]
    fn test_absolute_wait_times_out() {
        let word = AtomicU32::new(0);
        for millis in [3, 7, 11] {
            let start = Instant::now();
            let deadline = start + Duration::from_millis(millis);
            assert!(!LinuxFutex::wait_until(&word, 0u32, &deadline));
            assert!(start.elapsed() >= Duration::from_millis(millis));
        }
    }
}
