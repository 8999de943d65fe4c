/*!
 * Futex Mutexes
 *
 * Locks built on the futex facade:
 * - `FutexMutex`: one-byte, non-recursive. On Linux and macOS the byte is
 *   waited on through the parking lot, which makes this the main in-crate
 *   consumer of the emulation path.
 * - `FutexRecursiveMutex`: four-byte, re-entrant for its owner; the upper 30
 *   bits of the state count the extra lock depth.
 *
 * Both record their owning thread. Re-locking a non-recursive mutex from its
 * owner, unlocking from another thread, and dropping a held mutex are fatal.
 */

use super::futex::Futex;
use super::spinwait::{spin_try_wait, spin_wait};
use crate::core::errors::{fatal, FutexError, FutexResult};
use crate::core::hints::{likely, unlikely};
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

const UNLOCKED: u8 = 0;
const LOCKED: u8 = 1;
/// Locked, and some thread may be parked on the state
const CONTENDED: u8 = 2;

/// One recursion level in `FutexRecursiveMutex::state`
const DEPTH_UNIT: u32 = 1 << 2;
const DEPTH_MASK: u32 = !(DEPTH_UNIT - 1);
const STATE_MASK: u32 = DEPTH_UNIT - 1;

const NO_OWNER: u64 = 0;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Process-unique id of the calling thread; never `NO_OWNER`
fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// Thread currently holding a lock
///
/// Only the owner writes its own id, and it clears it before releasing the
/// state, so a relaxed load can never falsely report the caller as owner.
struct Owner(AtomicU64);

impl Owner {
    const fn new() -> Self {
        Self(AtomicU64::new(NO_OWNER))
    }

    #[inline]
    fn is_current(&self) -> bool {
        self.0.load(Ordering::Relaxed) == current_thread_id()
    }

    #[inline]
    fn set_current(&self) {
        self.0.store(current_thread_id(), Ordering::Relaxed);
    }

    #[inline]
    fn clear(&self) {
        self.0.store(NO_OWNER, Ordering::Relaxed);
    }

    fn check_not_owner(&self) -> FutexResult<()> {
        if self.is_current() {
            Err(FutexError::MutexMisuse("recursive locking not allowed"))
        } else {
            Ok(())
        }
    }

    fn check_owner(&self) -> FutexResult<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(FutexError::MutexMisuse("not owner"))
        }
    }
}

fn check_idle(locked: bool) -> FutexResult<()> {
    if locked {
        Err(FutexError::MutexMisuse("destroyed while busy"))
    } else {
        Ok(())
    }
}

/// `previous` is the state before adding a `DEPTH_UNIT`
fn check_depth(previous: u32) -> FutexResult<()> {
    if previous & DEPTH_MASK == DEPTH_MASK {
        Err(FutexError::MutexMisuse("recursion overflow"))
    } else {
        Ok(())
    }
}

#[inline]
fn enforce(check: FutexResult<()>) {
    if let Err(err) = check {
        fatal(err);
    }
}

/// Non-recursive mutex; locking twice from the same thread is fatal
pub struct FutexMutex<T: ?Sized> {
    state: AtomicU8,
    owner: Owner,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `state`.
unsafe impl<T: ?Sized + Send> Send for FutexMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for FutexMutex<T> {}

impl<T> FutexMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicU8::new(UNLOCKED),
            owner: Owner::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        enforce(check_idle(self.state.load(Ordering::Relaxed) != UNLOCKED));
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so `data` is read exactly once.
        unsafe { ptr::read(&this.data) }.into_inner()
    }
}

impl<T: ?Sized> FutexMutex<T> {
    pub fn lock(&self) -> FutexMutexGuard<'_, T> {
        if unlikely(
            self.state
                .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_err(),
        ) {
            enforce(self.owner.check_not_owner());
            self.lock_contended();
        }
        self.owner.set_current();
        FutexMutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    #[cold]
    fn lock_contended(&self) {
        // Short holds usually end within a spin round
        if spin_try_wait(|| {
            self.state
                .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        }) {
            return;
        }

        // Once contended, always take the lock as CONTENDED so the eventual
        // unlock knows to wake the next waiter
        while self.state.swap(CONTENDED, Ordering::Acquire) != UNLOCKED {
            Futex::<AtomicU8>::wait(&self.state, CONTENDED);
        }
    }

    pub fn try_lock(&self) -> Option<FutexMutexGuard<'_, T>> {
        if likely(
            self.state
                .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok(),
        ) {
            self.owner.set_current();
            Some(FutexMutexGuard {
                mutex: self,
                _not_send: PhantomData,
            })
        } else {
            enforce(self.owner.check_not_owner());
            None
        }
    }

    /// Whether some thread currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != UNLOCKED
    }

    /// Whether the calling thread holds the lock
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner.is_current()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn unlock(&self) {
        enforce(self.owner.check_owner());
        self.owner.clear();
        if self.state.swap(UNLOCKED, Ordering::Release) == CONTENDED {
            Futex::<AtomicU8>::notify_one(&self.state);
        }
    }
}

impl<T: ?Sized> Drop for FutexMutex<T> {
    fn drop(&mut self) {
        enforce(check_idle(*self.state.get_mut() != UNLOCKED));
    }
}

impl<T: Default> Default for FutexMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for FutexMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = if self.owner.is_current() {
            None
        } else {
            self.try_lock()
        };
        match guard {
            Some(guard) => f.debug_struct("FutexMutex").field("data", &&*guard).finish(),
            None => f.debug_struct("FutexMutex").field("data", &"<locked>").finish(),
        }
    }
}

/// Releases the mutex on drop; must be dropped on the locking thread
#[must_use = "if unused the FutexMutex will immediately unlock"]
pub struct FutexMutexGuard<'a, T: ?Sized> {
    mutex: &'a FutexMutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T: ?Sized> Deref for FutexMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves exclusive access.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for FutexMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves exclusive access.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for FutexMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// Re-entrant mutex; every lock by the owner needs a matching unlock
///
/// Guards hand out shared references only, since the owner may hold several
/// at once.
pub struct FutexRecursiveMutex<T: ?Sized> {
    state: AtomicU32,
    owner: Owner,
    data: UnsafeCell<T>,
}

// SAFETY: only the owning thread reaches `data`, and only through `&T`.
unsafe impl<T: ?Sized + Send> Send for FutexRecursiveMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for FutexRecursiveMutex<T> {}

impl<T> FutexRecursiveMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED as u32),
            owner: Owner::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        enforce(check_idle(self.state.load(Ordering::Relaxed) != 0));
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so `data` is read exactly once.
        unsafe { ptr::read(&this.data) }.into_inner()
    }
}

impl<T: ?Sized> FutexRecursiveMutex<T> {
    pub fn lock(&self) -> FutexRecursiveMutexGuard<'_, T> {
        if unlikely(
            self.state
                .compare_exchange(UNLOCKED as u32, LOCKED as u32, Ordering::Acquire, Ordering::Relaxed)
                .is_err(),
        ) {
            if self.owner.is_current() {
                self.deepen();
                return self.guard();
            }
            self.lock_contended();
        }
        self.owner.set_current();
        self.guard()
    }

    #[cold]
    fn lock_contended(&self) {
        let mut seen = self.state.load(Ordering::Relaxed);
        loop {
            // The owner may be changing its depth, so mark CONTENDED with a CAS
            // that keeps whatever depth is current
            spin_wait(|| {
                match self.state.compare_exchange_weak(
                    seen,
                    (seen & DEPTH_MASK) | CONTENDED as u32,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => true,
                    Err(actual) => {
                        seen = actual;
                        false
                    }
                }
            });
            if seen & STATE_MASK == UNLOCKED as u32 {
                return;
            }
            Futex::<AtomicU32>::wait(&self.state, (seen & DEPTH_MASK) | CONTENDED as u32);
            seen = self.state.load(Ordering::Relaxed);
        }
    }

    pub fn try_lock(&self) -> Option<FutexRecursiveMutexGuard<'_, T>> {
        if likely(
            self.state
                .compare_exchange(UNLOCKED as u32, LOCKED as u32, Ordering::Acquire, Ordering::Relaxed)
                .is_ok(),
        ) {
            self.owner.set_current();
            Some(self.guard())
        } else if self.owner.is_current() {
            self.deepen();
            Some(self.guard())
        } else {
            None
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != 0
    }

    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner.is_current()
    }

    /// Locks held by the owner beyond the first; `0` when unlocked
    pub fn depth(&self) -> u32 {
        (self.state.load(Ordering::Relaxed) & DEPTH_MASK) / DEPTH_UNIT
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn guard(&self) -> FutexRecursiveMutexGuard<'_, T> {
        FutexRecursiveMutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    fn deepen(&self) {
        let previous = self.state.fetch_add(DEPTH_UNIT, Ordering::Relaxed);
        enforce(check_depth(previous));
    }

    fn unlock(&self) {
        enforce(self.owner.check_owner());
        if self.state.load(Ordering::Relaxed) & DEPTH_MASK == 0 {
            // Last level
            self.owner.clear();
            if self.state.swap(UNLOCKED as u32, Ordering::Release) == CONTENDED as u32 {
                Futex::<AtomicU32>::notify_one(&self.state);
            }
        } else {
            self.state.fetch_sub(DEPTH_UNIT, Ordering::Release);
        }
    }
}

impl<T: ?Sized> Drop for FutexRecursiveMutex<T> {
    fn drop(&mut self) {
        enforce(check_idle(*self.state.get_mut() != 0));
    }
}

impl<T: Default> Default for FutexRecursiveMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for FutexRecursiveMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f
                .debug_struct("FutexRecursiveMutex")
                .field("data", &&*guard)
                .finish(),
            None => f
                .debug_struct("FutexRecursiveMutex")
                .field("data", &"<locked>")
                .finish(),
        }
    }
}

/// Releases one level of a [`FutexRecursiveMutex`] on drop
#[must_use = "if unused the FutexRecursiveMutex will immediately unlock"]
pub struct FutexRecursiveMutexGuard<'a, T: ?Sized> {
    mutex: &'a FutexRecursiveMutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T: ?Sized> Deref for FutexRecursiveMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: only the owning thread holds guards.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for FutexRecursiveMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_try_lock_excludes_other_threads() {
        let mutex = FutexMutex::new(5);
        let guard = mutex.lock();
        assert!(mutex.is_locked());
        assert!(mutex.is_owned_by_current_thread());
        thread::scope(|s| {
            s.spawn(|| assert!(mutex.try_lock().is_none()));
        });
        drop(guard);
        assert!(!mutex.is_locked());
        assert!(!mutex.is_owned_by_current_thread());
        assert_eq!(*mutex.try_lock().unwrap(), 5);
    }

    #[test]
    fn test_debug_shows_locked() {
        let mutex = FutexMutex::new(1u32);
        let _guard = mutex.lock();
        assert!(format!("{:?}", mutex).contains("<locked>"));
    }

    #[test]
    fn test_relock_by_owner_is_misuse() {
        let mutex = FutexMutex::new(());
        assert_eq!(mutex.owner.check_not_owner(), Ok(()));
        let _guard = mutex.lock();
        assert_eq!(
            mutex.owner.check_not_owner(),
            Err(FutexError::MutexMisuse("recursive locking not allowed"))
        );
        assert_eq!(mutex.owner.check_owner(), Ok(()));
    }

    #[test]
    fn test_unlock_by_other_thread_is_misuse() {
        let mutex = FutexMutex::new(());
        let _guard = mutex.lock();
        thread::scope(|s| {
            s.spawn(|| {
                assert_eq!(mutex.owner.check_owner(), Err(FutexError::MutexMisuse("not owner")));
                assert_eq!(mutex.owner.check_not_owner(), Ok(()));
            });
        });
    }

    #[test]
    fn test_drop_while_busy_is_misuse() {
        assert_eq!(check_idle(false), Ok(()));
        assert_eq!(
            check_idle(true),
            Err(FutexError::MutexMisuse("destroyed while busy"))
        );
    }

    #[test]
    fn test_thread_ids_are_distinct() {
        let here = current_thread_id();
        let there = thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, NO_OWNER);
        assert_ne!(here, there);
        assert_eq!(here, current_thread_id());
    }

    #[test]
    fn test_counter_under_contention() {
        const THREADS: usize = 8;
        const ITERATIONS: usize = 2_000;

        let mutex = Arc::new(FutexMutex::new(0usize));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let mutex = mutex.clone();
                thread::spawn(move || {
                    for _ in 0..ITERATIONS {
                        *mutex.lock() += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*mutex.lock(), THREADS * ITERATIONS);
        assert_eq!(Arc::try_unwrap(mutex).unwrap().into_inner(), THREADS * ITERATIONS);
    }

    #[test]
    fn test_recursive_depth_tracking() {
        let mutex = FutexRecursiveMutex::new(7);
        let outer = mutex.lock();
        assert_eq!(mutex.depth(), 0);
        let middle = mutex.lock();
        let inner = mutex.try_lock().unwrap();
        assert_eq!(mutex.depth(), 2);
        assert_eq!(*inner + *middle + *outer, 21);

        thread::scope(|s| {
            s.spawn(|| assert!(mutex.try_lock().is_none()));
        });

        drop(inner);
        drop(middle);
        assert_eq!(mutex.depth(), 0);
        assert!(mutex.is_locked());
        drop(outer);
        assert!(!mutex.is_locked());
        assert!(!mutex.is_owned_by_current_thread());

        thread::scope(|s| {
            s.spawn(|| assert_eq!(mutex.try_lock().map(|g| *g), Some(7)));
        });
    }

    #[test]
    fn test_recursive_depth_overflow_is_misuse() {
        assert_eq!(check_depth(LOCKED as u32), Ok(()));
        assert_eq!(check_depth((DEPTH_MASK - DEPTH_UNIT) | CONTENDED as u32), Ok(()));
        assert_eq!(
            check_depth(DEPTH_MASK | LOCKED as u32),
            Err(FutexError::MutexMisuse("recursion overflow"))
        );
    }

    #[test]
    fn test_recursive_unlock_by_other_thread_is_misuse() {
        let mutex = FutexRecursiveMutex::new(());
        let _guard = mutex.lock();
        thread::scope(|s| {
            s.spawn(|| assert_eq!(mutex.owner.check_owner(), Err(FutexError::MutexMisuse("not owner"))));
        });
    }

    #[test]
    fn test_recursive_nested_counter_under_contention() {
        const THREADS: usize = 6;
        const ITERATIONS: usize = 1_000;

        let mutex = Arc::new(FutexRecursiveMutex::new(RefCell::new(0usize)));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let mutex = mutex.clone();
                thread::spawn(move || {
                    for _ in 0..ITERATIONS {
                        let outer = mutex.lock();
                        let inner = mutex.lock();
                        *inner.borrow_mut() += 1;
                        drop(inner);
                        *outer.borrow_mut() += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        let total = Arc::try_unwrap(mutex).unwrap().into_inner().into_inner();
        assert_eq!(total, 2 * THREADS * ITERATIONS);
    }
}
