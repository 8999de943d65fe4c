/*!
 * Darwin __ulock backend
 *
 * `__ulock_wait`/`__ulock_wake` are private libSystem entry points with the
 * same compare-and-wait contract as a futex on 4-byte words. Timeouts are
 * relative microseconds; 0 means forever.
 */

use super::{width_bit, NativeFutex};
use crate::core::errors::{fatal, FutexError};
use crate::core::sync::atomic::{reinterpret_as, FutexAtomic};
use crate::core::sync::time::{clamp_duration, TimePoint};
use libc::{c_int, c_void};
use std::time::Duration;

const UL_COMPARE_AND_WAIT: u32 = 1;
const ULF_WAKE_ALL: u32 = 0x0000_0100;
const ULF_NO_ERRNO: u32 = 0x0100_0000;

extern "C" {
    /// Returns the number of remaining waiters, or `-errno` with `ULF_NO_ERRNO`
    fn __ulock_wait(operation: u32, addr: *mut c_void, value: u64, timeout_us: u32) -> c_int;

    fn __ulock_wake(operation: u32, addr: *mut c_void, wake_value: u64) -> c_int;
}

/// `__ulock` backend
pub struct DarwinFutex;

#[inline(always)]
fn word<A: FutexAtomic>(val: *const A) -> *mut c_void {
    if A::WIDTH != 4 {
        fatal(FutexError::UnsupportedWidth(A::WIDTH));
    }
    val as *mut c_void
}

fn ulock_wait<A: FutexAtomic>(val: &A, compare: &A::Value, timeout_us: u32) -> c_int {
    let compare = reinterpret_as::<u32, _>(compare) as u64;
    // SAFETY: `val` is a live 4-byte word for the duration of the call.
    unsafe { __ulock_wait(UL_COMPARE_AND_WAIT | ULF_NO_ERRNO, word(val), compare, timeout_us) }
}

/// Clamped microseconds; `None` when the wait should not happen at all
fn timeout_us(d: Duration) -> Option<u32> {
    let us = clamp_duration(d).as_micros();
    if us == 0 {
        None
    } else {
        Some(us.min(u32::MAX as u128) as u32)
    }
}

fn timed_result(rc: c_int) -> bool {
    if rc >= 0 {
        return true;
    }
    match -rc {
        // A signal counts as a spurious wakeup
        libc::EINTR => true,
        libc::ETIMEDOUT => false,
        code => fatal(FutexError::os("__ulock_wait", code.into())),
    }
}

impl NativeFutex for DarwinFutex {
    const NAME: &'static str = "darwin-ulock";
    const NATIVE_WIDTH_MASK: usize = width_bit(4);

    fn wait<A: FutexAtomic>(val: &A, compare: A::Value) {
        loop {
            let rc = ulock_wait(val, &compare, 0);
            if rc >= 0 {
                return;
            }
            match -rc {
                libc::EINTR => continue,
                code => fatal(FutexError::os("__ulock_wait", code.into())),
            }
        }
    }

    fn wait_for<A: FutexAtomic>(val: &A, compare: A::Value, duration: Duration) -> bool {
        match timeout_us(duration) {
            Some(us) => timed_result(ulock_wait(val, &compare, us)),
            None => false,
        }
    }

    fn wait_until<A: FutexAtomic, P: TimePoint>(val: &A, compare: A::Value, deadline: &P) -> bool {
        match deadline.remaining().and_then(timeout_us) {
            Some(us) => timed_result(ulock_wait(val, &compare, us)),
            None => false,
        }
    }

    fn wake_one<A: FutexAtomic>(addr: *const A) {
        // SAFETY: the address is only used as a key by the kernel.
        unsafe { __ulock_wake(UL_COMPARE_AND_WAIT | ULF_NO_ERRNO, word(addr), 0) };
    }

    fn wake_n<A: FutexAtomic>(addr: *const A, count: usize) {
        if count >= i32::MAX as usize {
            return Self::wake_all(addr);
        }
        for _ in 0..count {
            Self::wake_one(addr);
        }
    }

    fn wake_all<A: FutexAtomic>(addr: *const A) {
        // SAFETY: as above.
        unsafe { __ulock_wake(UL_COMPARE_AND_WAIT | ULF_WAKE_ALL | ULF_NO_ERRNO, word(addr), 0) };
    }
}
