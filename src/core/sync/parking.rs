/*!
 * Parking Lot
 *
 * Software futex for atomic widths the OS cannot wait on directly.
 *
 * # Design
 *
 * A fixed table of 256 cache-line aligned buckets, indexed by the waited
 * address at cache-line granularity. Each bucket is a spin-locked intrusive
 * doubly-linked list of `WaitEntry` records living on the waiters' stacks.
 * A waiter blocks on its own entry's 4-byte `wakeup` word through the native
 * backend, so any atomic width can be waited on.
 *
 * # Handoff
 *
 * Notifiers unlink matching entries under the bucket lock and wake them after
 * releasing it. While a notifier still holds a pointer to an unlinked entry,
 * the entry carries `WAIT_BIT`, and its owner will not return (and pop the
 * entry) until that bit is cleared.
 */

use super::atomic::FutexAtomic;
use super::platform::{NativeFutex, Platform};
use super::spinwait::spin_wait_with_backoff;
use super::time::TimePoint;
use crate::core::hints::{likely, unlikely};
use std::cell::{Cell, UnsafeCell};
use std::marker::{PhantomData, PhantomPinned};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Number of wait buckets (power of two)
pub const WAIT_BUCKETS: usize = 256;

/// Address bits below cache-line granularity, ignored when hashing
const BUCKET_SHIFT: u32 = 5;

const _: () = assert!(WAIT_BUCKETS.is_power_of_two());

/// `wakeup` states
const NO_BITS: u32 = 0;
/// Entry was unlinked by a notifier
const WAKE_BIT: u32 = 1;
/// Notifier still references the entry
const WAIT_BIT: u32 = 2;

/// Per-waiter record, owned by the waiting thread's stack frame
///
/// `prev`/`next` are only touched with the bucket lock held, or by a notifier
/// that unlinked the entry and has not yet cleared `WAIT_BIT`.
struct WaitEntry {
    addr: usize,
    prev: Cell<*const WaitEntry>,
    next: Cell<*const WaitEntry>,
    wakeup: AtomicU32,
    _pinned: PhantomPinned,
}

impl WaitEntry {
    fn new(addr: usize) -> Self {
        Self {
            addr,
            prev: Cell::new(ptr::null()),
            next: Cell::new(ptr::null()),
            wakeup: AtomicU32::new(NO_BITS),
            _pinned: PhantomPinned,
        }
    }
}

struct WaitList {
    head: *const WaitEntry,
    tail: *const WaitEntry,
}

/// One shard of the wait table
#[repr(C, align(64))]
struct WaitBucket {
    locked: AtomicBool,
    list: UnsafeCell<WaitList>,
}

// SAFETY: `list` is only accessed through a `BucketGuard`, which holds `locked`.
unsafe impl Sync for WaitBucket {}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_BUCKET: WaitBucket = WaitBucket::new();

/// Process-wide wait table; never torn down
static BUCKETS: [WaitBucket; WAIT_BUCKETS] = [EMPTY_BUCKET; WAIT_BUCKETS];

/// Bucket index for an address
#[inline(always)]
pub fn bucket_index(addr: usize) -> usize {
    (addr >> BUCKET_SHIFT) & (WAIT_BUCKETS - 1)
}

impl WaitBucket {
    const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            list: UnsafeCell::new(WaitList {
                head: ptr::null(),
                tail: ptr::null(),
            }),
        }
    }

    #[inline(always)]
    fn for_addr(addr: usize) -> &'static WaitBucket {
        &BUCKETS[bucket_index(addr)]
    }

    /// Spin until the bucket is ours; hold times are a few pointer writes
    #[inline]
    fn lock(&self) -> BucketGuard<'_> {
        spin_wait_with_backoff(|| !self.locked.swap(true, Ordering::Acquire));
        BucketGuard { bucket: self }
    }
}

/// Exclusive access to a bucket's list; unlocks on drop
struct BucketGuard<'a> {
    bucket: &'a WaitBucket,
}

impl BucketGuard<'_> {
    #[inline(always)]
    fn list(&mut self) -> &mut WaitList {
        // SAFETY: the guard holds the bucket lock.
        unsafe { &mut *self.bucket.list.get() }
    }

    #[inline(always)]
    fn head(&mut self) -> *const WaitEntry {
        self.list().head
    }

    fn append(&mut self, entry: &WaitEntry) {
        let list = self.list();
        let e = entry as *const WaitEntry;
        entry.prev.set(list.tail);
        entry.next.set(ptr::null());
        if list.tail.is_null() {
            list.head = e;
        } else {
            // SAFETY: linked entries stay alive until unlinked under this lock.
            unsafe { (*list.tail).next.set(e) };
        }
        list.tail = e;
    }

    /// Unlink `e`; returns its successor
    ///
    /// # Safety
    ///
    /// `e` must be linked in this bucket.
    unsafe fn remove(&mut self, e: *const WaitEntry) -> *const WaitEntry {
        let list = self.list();
        let entry = &*e;
        let prev = entry.prev.get();
        let next = entry.next.get();
        if prev.is_null() {
            list.head = next;
        } else {
            (*prev).next.set(next);
        }
        if next.is_null() {
            list.tail = prev;
        } else {
            (*next).prev.set(prev);
        }
        next
    }
}

impl Drop for BucketGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.bucket.locked.store(false, Ordering::Release);
    }
}

/// A linked `WaitEntry`; dropping it completes the unlink protocol
///
/// Runs on every exit path, timeouts included, so no bucket ever keeps a
/// pointer into a returned stack frame.
struct Registration<'a, N: NativeFutex> {
    entry: &'a WaitEntry,
    bucket: &'static WaitBucket,
    _backend: PhantomData<N>,
}

impl<N: NativeFutex> Drop for Registration<'_, N> {
    fn drop(&mut self) {
        let mut guard = self.bucket.lock();
        let mut bits = self.entry.wakeup.load(Ordering::Acquire);
        if bits == NO_BITS {
            // SAFETY: nobody unlinked us, so we are still in this bucket.
            unsafe { guard.remove(self.entry) };
            return;
        }
        drop(guard);

        // A notifier unlinked us and may still be walking its wake chain
        while unlikely(bits & WAIT_BIT != 0) {
            N::wait(&self.entry.wakeup, bits);
            bits = self.entry.wakeup.load(Ordering::Acquire);
        }
    }
}

/// Futex emulation over a native backend `N`
pub struct ParkingLot<N: NativeFutex = Platform> {
    _backend: PhantomData<N>,
}

/// Parking lot over the build target's backend
pub type DefaultParkingLot = ParkingLot<Platform>;

impl<N: NativeFutex> ParkingLot<N> {
    /// Block while `val` holds `compare`
    pub fn wait<A: FutexAtomic>(val: &A, compare: A::Value) {
        Self::park(val, compare, |wakeup| {
            while wakeup.load(Ordering::Acquire) == NO_BITS {
                N::wait(wakeup, NO_BITS);
            }
            true
        });
    }

    /// Block while `val` holds `compare`, for at most `duration`
    ///
    /// `false` if the wait timed out.
    pub fn wait_for<A: FutexAtomic>(val: &A, compare: A::Value, duration: Duration) -> bool {
        Self::park(val, compare, |wakeup| N::wait_for(wakeup, NO_BITS, duration))
    }

    /// Block while `val` holds `compare`, until `deadline`
    ///
    /// `false` if the deadline passed.
    pub fn wait_until<A: FutexAtomic, P: TimePoint>(val: &A, compare: A::Value, deadline: &P) -> bool {
        Self::park(val, compare, |wakeup| N::wait_until(wakeup, NO_BITS, deadline))
    }

    fn park<A, F>(val: &A, compare: A::Value, block: F) -> bool
    where
        A: FutexAtomic,
        F: FnOnce(&AtomicU32) -> bool,
    {
        // Already changed: no registration needed
        if !val.matches(compare) {
            return true;
        }

        let entry = WaitEntry::new(val.addr());
        let bucket = WaitBucket::for_addr(entry.addr);
        bucket.lock().append(&entry);
        let _registration = Registration::<N> {
            entry: &entry,
            bucket,
            _backend: PhantomData,
        };

        // Re-check now that a notify cannot miss us
        if likely(val.matches(compare)) {
            block(&entry.wakeup)
        } else {
            true
        }
    }

    /// Wake one waiter on `val`
    pub fn notify_one<A: FutexAtomic>(val: &A) {
        Self::notify_one_addr(val.addr());
    }

    /// Wake up to `count` waiters on `val`
    pub fn notify_n<A: FutexAtomic>(val: &A, count: usize) {
        Self::notify_many(val.addr(), count);
    }

    /// Wake every waiter on `val`
    pub fn notify_all<A: FutexAtomic>(val: &A) {
        Self::notify_many(val.addr(), usize::MAX);
    }

    fn notify_one_addr(addr: usize) {
        let mut guard = WaitBucket::for_addr(addr).lock();
        let mut e = guard.head();
        while !e.is_null() {
            // SAFETY: linked entries are alive while we hold the lock.
            let entry = unsafe { &*e };
            if entry.addr == addr {
                // The owner cannot observe this until it takes the lock, so no
                // WAIT_BIT is needed; only the wake key is used after unlock.
                entry.wakeup.store(WAKE_BIT, Ordering::Release);
                let word = &entry.wakeup as *const AtomicU32;
                // SAFETY: `e` was found in this bucket's list.
                unsafe { guard.remove(e) };
                drop(guard);
                N::wake_one(word);
                return;
            }
            e = entry.next.get();
        }
    }

    fn notify_many(addr: usize, mut count: usize) {
        if unlikely(count == 0) {
            return;
        }

        let mut wake: *const WaitEntry = ptr::null();
        let mut wake_tail: *const WaitEntry = ptr::null();

        let mut guard = WaitBucket::for_addr(addr).lock();
        let mut e = guard.head();
        while !e.is_null() {
            // SAFETY: linked entries are alive while we hold the lock.
            let entry = unsafe { &*e };
            if entry.addr != addr {
                e = entry.next.get();
                continue;
            }

            // SAFETY: `e` was found in this bucket's list.
            let next = unsafe { guard.remove(e) };
            entry.next.set(ptr::null());
            if wake_tail.is_null() {
                wake = e;
            } else {
                // SAFETY: entries on the wake chain carry WAIT_BIT and stay alive.
                unsafe { (*wake_tail).next.set(e) };
            }
            wake_tail = e;
            entry.wakeup.store(WAKE_BIT | WAIT_BIT, Ordering::Release);
            e = next;

            count -= 1;
            if count == 0 {
                break;
            }
        }
        drop(guard);

        while !wake.is_null() {
            // SAFETY: WAIT_BIT is still set, so the owner has not returned.
            let entry = unsafe { &*wake };
            wake = entry.next.get();
            let word = &entry.wakeup as *const AtomicU32;
            // Releases the owner; `entry` must not be touched after this
            entry.wakeup.store(WAKE_BIT, Ordering::Release);
            N::wake_one(word);
        }
    }

    /// Number of threads parked on `val` (diagnostics only; racy by nature)
    pub fn waiter_count<A: FutexAtomic>(val: &A) -> usize {
        let addr = val.addr();
        let mut guard = WaitBucket::for_addr(addr).lock();
        let mut count = 0;
        let mut e = guard.head();
        while !e.is_null() {
            // SAFETY: linked entries are alive while we hold the lock.
            let entry = unsafe { &*e };
            if entry.addr == addr {
                count += 1;
            }
            e = entry.next.get();
        }
        count
    }
}
