/*!
 * Futex Facade
 *
 * One wait/notify contract for every atomic width. Widths the OS waits on
 * natively go straight to the platform backend; the rest go through the
 * parking lot. The choice is a per-type associated constant, so each
 * monomorphized call compiles down to a single path.
 *
 * # Examples
 *
 * ```
 * use ai_os_futex::core::sync::futex;
 * use std::sync::atomic::{AtomicU8, Ordering};
 * use std::sync::Arc;
 * use std::thread;
 *
 * let flag = Arc::new(AtomicU8::new(0));
 * let waiter = {
 *     let flag = flag.clone();
 *     thread::spawn(move || {
 *         while flag.load(Ordering::Acquire) == 0 {
 *             futex::wait(&*flag, 0);
 *         }
 *     })
 * };
 *
 * flag.store(1, Ordering::Release);
 * futex::wake_all(&*flag);
 * waiter.join().unwrap();
 * ```
 */

use super::atomic::FutexAtomic;
use super::parking::ParkingLot;
use super::platform::{supports_width, NativeFutex, Platform};
use super::time::TimePoint;
use std::marker::PhantomData;
use std::time::Duration;

/// Stateless wait/notify dispatcher for atomics of type `A`
pub struct Futex<A: FutexAtomic> {
    _atomic: PhantomData<A>,
}

impl<A: FutexAtomic> Futex<A> {
    /// Whether `A` is waited on by the OS directly
    pub const NATIVE: bool = !cfg!(feature = "force-parking-lot")
        && supports_width(Platform::NATIVE_WIDTH_MASK, A::WIDTH);

    const VALID_WIDTH: () = assert!(
        matches!(A::WIDTH, 1 | 2 | 4 | 8),
        "futex waits need a 1, 2, 4 or 8 byte atomic"
    );

    /// Name of the mechanism serving `A`
    pub fn backend_name() -> &'static str {
        if Self::NATIVE {
            Platform::NAME
        } else {
            "parking-lot"
        }
    }

    /// Block while `val` holds `compare`; may return spuriously
    #[inline]
    pub fn wait(val: &A, compare: A::Value) {
        let () = Self::VALID_WIDTH;
        if Self::NATIVE {
            Platform::wait(val, compare)
        } else {
            ParkingLot::<Platform>::wait(val, compare)
        }
    }

    /// Block while `val` holds `compare`, for at most `duration`
    ///
    /// Returns `false` on timeout, `true` otherwise (including spurious wakeups).
    #[inline]
    pub fn wait_for(val: &A, compare: A::Value, duration: Duration) -> bool {
        let () = Self::VALID_WIDTH;
        if Self::NATIVE {
            Platform::wait_for(val, compare, duration)
        } else {
            ParkingLot::<Platform>::wait_for(val, compare, duration)
        }
    }

    /// Block while `val` holds `compare`, until `deadline`
    ///
    /// Returns `false` once the deadline has passed; a deadline already in the
    /// past returns `false` without blocking.
    #[inline]
    pub fn wait_until<P: TimePoint>(val: &A, compare: A::Value, deadline: &P) -> bool {
        let () = Self::VALID_WIDTH;
        if Self::NATIVE {
            Platform::wait_until(val, compare, deadline)
        } else {
            ParkingLot::<Platform>::wait_until(val, compare, deadline)
        }
    }

    #[inline]
    pub fn notify_one(val: &A) {
        let () = Self::VALID_WIDTH;
        if Self::NATIVE {
            Platform::wake_one(val as *const A)
        } else {
            ParkingLot::<Platform>::notify_one(val)
        }
    }

    /// Wake at most `count` waiters; `0` is a no-op
    #[inline]
    pub fn notify_n(val: &A, count: usize) {
        let () = Self::VALID_WIDTH;
        if count == 0 {
            return;
        }
        if Self::NATIVE {
            Platform::wake_n(val as *const A, count)
        } else {
            ParkingLot::<Platform>::notify_n(val, count)
        }
    }

    #[inline]
    pub fn notify_all(val: &A) {
        let () = Self::VALID_WIDTH;
        if Self::NATIVE {
            Platform::wake_all(val as *const A)
        } else {
            ParkingLot::<Platform>::notify_all(val)
        }
    }
}

/// Block while `val` holds `compare`
#[inline]
pub fn wait<A: FutexAtomic>(val: &A, compare: A::Value) {
    Futex::<A>::wait(val, compare)
}

/// Block while `val` holds `compare`, for at most `duration`; `false` on timeout
#[inline]
pub fn wait_for<A: FutexAtomic>(val: &A, compare: A::Value, duration: Duration) -> bool {
    Futex::<A>::wait_for(val, compare, duration)
}

/// Block while `val` holds `compare`, until `deadline`; `false` on timeout
#[inline]
pub fn wait_until<A: FutexAtomic, P: TimePoint>(val: &A, compare: A::Value, deadline: &P) -> bool {
    Futex::<A>::wait_until(val, compare, deadline)
}

/// Wake `count` waiters, or all of them once `count` reaches `max_count`
///
/// Callers that track how many threads can possibly be waiting pass that
/// number as `max_count`; use `usize::MAX` otherwise.
#[inline]
pub fn wake<A: FutexAtomic>(val: &A, count: usize, max_count: usize) {
    if count >= max_count {
        Futex::<A>::notify_all(val)
    } else {
        Futex::<A>::notify_n(val, count)
    }
}

/// Wake at most `count` waiters; `0` is a no-op
#[inline]
pub fn notify_n<A: FutexAtomic>(val: &A, count: usize) {
    Futex::<A>::notify_n(val, count)
}

#[inline]
pub fn wake_one<A: FutexAtomic>(val: &A) {
    Futex::<A>::notify_one(val)
}

#[inline]
pub fn wake_all<A: FutexAtomic>(val: &A) {
    Futex::<A>::notify_all(val)
}
