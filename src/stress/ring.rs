/*!
 * Token Ring
 *
 * `threads` slots, one per thread; exactly one slot holds the token. Each
 * thread waits on its own slot, passes the token to its successor and
 * notifies it, `iterations` times.
 *
 * Waits are bounded only by the stall timeout, so a dropped notification
 * leaves its target blocked until the run fails with `Stalled`.
 */

use super::config::StressConfig;
use crate::core::errors::{FutexError, FutexResult};
use crate::core::sync::{Futex, FutexAtomic};
use crate::monitoring::RunSpan;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// An atomic that can hold "token present" / "token absent"
pub trait TokenAtomic: FutexAtomic + Send + 'static {
    /// Value meaning "no token"
    const EMPTY: Self::Value;

    fn empty() -> Self;

    fn has_token(&self) -> bool;

    fn set_token(&self, present: bool);
}

macro_rules! impl_token_atomic {
    ($($atomic:ty),* $(,)?) => {
        $(
            impl TokenAtomic for $atomic {
                const EMPTY: Self::Value = 0;

                fn empty() -> Self {
                    <$atomic>::new(0)
                }

                #[inline]
                fn has_token(&self) -> bool {
                    self.load(Ordering::Acquire) != 0
                }

                #[inline]
                fn set_token(&self, present: bool) {
                    self.store(present as _, Ordering::Release);
                }
            }
        )*
    };
}

impl_token_atomic!(AtomicU8, AtomicU16, AtomicU32, AtomicU64);

/// Outcome of one ring run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingReport {
    pub width: usize,
    pub backend: &'static str,
    pub threads: usize,
    /// Token handoffs completed
    pub passes: usize,
    /// Waits that returned before the token arrived
    pub spurious_wakeups: usize,
    pub elapsed: Duration,
}

struct Shared<'a, A> {
    slots: &'a [A],
    aborted: &'a AtomicBool,
    passes: &'a AtomicUsize,
    spurious_wakeups: &'a AtomicUsize,
    stall_timeout: Duration,
}

/// Wait for the token; `Ok(false)` if another thread aborted the run
fn await_token<A: TokenAtomic>(shared: &Shared<'_, A>, index: usize) -> FutexResult<bool> {
    let slot = &shared.slots[index];
    let start = Instant::now();
    loop {
        if slot.has_token() {
            return Ok(true);
        }
        if shared.aborted.load(Ordering::Acquire) {
            return Ok(false);
        }
        let waited = start.elapsed();
        if waited >= shared.stall_timeout {
            return Err(FutexError::Stalled {
                width: A::WIDTH,
                thread: index,
                waited_ms: waited.as_millis() as u64,
            });
        }
        if Futex::<A>::wait_for(slot, A::EMPTY, shared.stall_timeout - waited) && !slot.has_token() {
            shared.spurious_wakeups.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Stop the run and release every parked thread so it sees the abort
fn abort_ring<A: TokenAtomic>(shared: &Shared<'_, A>) {
    shared.aborted.store(true, Ordering::Release);
    for slot in shared.slots {
        Futex::<A>::notify_all(slot);
    }
}

fn ring_worker<A: TokenAtomic>(shared: &Shared<'_, A>, index: usize, iterations: usize) -> FutexResult<()> {
    let next = &shared.slots[(index + 1) % shared.slots.len()];
    for _ in 0..iterations {
        if !await_token(shared, index)? {
            return Ok(());
        }
        shared.slots[index].set_token(false);
        next.set_token(true);
        Futex::<A>::notify_one(next);
        shared.passes.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

/// Run the ring on atomics of type `A`
pub fn run_ring<A: TokenAtomic>(config: &StressConfig) -> FutexResult<RingReport> {
    config.validate()?;

    let slots: Vec<A> = (0..config.threads).map(|_| A::empty()).collect();
    slots[0].set_token(true);

    let aborted = AtomicBool::new(false);
    let passes = AtomicUsize::new(0);
    let spurious_wakeups = AtomicUsize::new(0);
    let errors = parking_lot::Mutex::new(Vec::new());
    let shared = Shared {
        slots: &slots,
        aborted: &aborted,
        passes: &passes,
        spurious_wakeups: &spurious_wakeups,
        stall_timeout: config.stall_timeout(),
    };

    let run = RunSpan::new("ring", A::WIDTH, Futex::<A>::backend_name(), config.slow_run());
    let _entered = run.enter();

    thread::scope(|scope| -> FutexResult<()> {
        for index in 0..config.threads {
            let shared = &shared;
            let errors = &errors;
            thread::Builder::new()
                .name(format!("ring-{}-{}", A::WIDTH, index))
                .spawn_scoped(scope, move || {
                    if let Err(err) = ring_worker(shared, index, config.iterations) {
                        tracing::error!(thread = index, error = %err, "ring worker failed");
                        errors.lock().push(err);
                        abort_ring(shared);
                    }
                })?;
        }
        Ok(())
    })?;

    if let Some(err) = errors.into_inner().into_iter().next() {
        return Err(err);
    }

    let report = RingReport {
        width: A::WIDTH,
        backend: Futex::<A>::backend_name(),
        threads: config.threads,
        passes: passes.load(Ordering::Relaxed),
        spurious_wakeups: spurious_wakeups.load(Ordering::Relaxed),
        elapsed: run.elapsed(),
    };
    tracing::info!(
        width = report.width,
        backend = report.backend,
        passes = report.passes,
        spurious_wakeups = report.spurious_wakeups,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "ring completed"
    );
    Ok(report)
}

/// Run the ring on the unsigned atomic of `width` bytes
pub fn run_ring_width(width: usize, config: &StressConfig) -> FutexResult<RingReport> {
    match width {
        1 => run_ring::<AtomicU8>(config),
        2 => run_ring::<AtomicU16>(config),
        4 => run_ring::<AtomicU32>(config),
        8 => run_ring::<AtomicU64>(config),
        other => Err(FutexError::UnsupportedWidth(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn small_config() -> StressConfig {
        StressConfig {
            threads: 3,
            iterations: 200,
            ..Default::default()
        }
    }

    #[test]
    fn test_ring_u8_completes() {
        let report = run_ring::<AtomicU8>(&small_config()).unwrap();
        assert_eq!(report.passes, 3 * 200);
        assert_eq!(report.width, 1);
    }

    #[test]
    fn test_ring_every_width() {
        for width in [1, 2, 4, 8] {
            let report = run_ring_width(width, &small_config()).unwrap();
            assert_eq!(report.passes, 600, "width {}", width);
        }
    }

    fn shared_over<'a>(
        slots: &'a [AtomicU16],
        aborted: &'a AtomicBool,
        counters: &'a [AtomicUsize; 2],
        stall_timeout: Duration,
    ) -> Shared<'a, AtomicU16> {
        Shared {
            slots,
            aborted,
            passes: &counters[0],
            spurious_wakeups: &counters[1],
            stall_timeout,
        }
    }

    #[test]
    fn test_missing_notification_stalls() {
        let slots = [AtomicU16::empty(), AtomicU16::empty()];
        let aborted = AtomicBool::new(false);
        let counters = [AtomicUsize::new(0), AtomicUsize::new(0)];
        let shared = shared_over(&slots, &aborted, &counters, Duration::from_millis(50));

        let start = Instant::now();
        match await_token(&shared, 1) {
            Err(FutexError::Stalled {
                width,
                thread,
                waited_ms,
            }) => {
                assert_eq!(width, 2);
                assert_eq!(thread, 1);
                assert!(waited_ms >= 50);
            }
            other => panic!("expected a stall, got {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_token_handoff_wakes_waiter() {
        let slots = [AtomicU16::empty(), AtomicU16::empty()];
        let aborted = AtomicBool::new(false);
        let counters = [AtomicUsize::new(0), AtomicUsize::new(0)];
        let shared = shared_over(&slots, &aborted, &counters, Duration::from_secs(10));

        thread::scope(|s| {
            let waiter = s.spawn(|| await_token(&shared, 1));
            thread::sleep(Duration::from_millis(30));
            slots[1].set_token(true);
            Futex::<AtomicU16>::notify_one(&slots[1]);
            assert_eq!(waiter.join().unwrap(), Ok(true));
        });
    }

    #[test]
    fn test_abort_releases_parked_threads() {
        let slots = [AtomicU16::empty(), AtomicU16::empty(), AtomicU16::empty()];
        let aborted = AtomicBool::new(false);
        let counters = [AtomicUsize::new(0), AtomicUsize::new(0)];
        let shared = shared_over(&slots, &aborted, &counters, Duration::from_secs(30));

        let start = Instant::now();
        thread::scope(|s| {
            let shared = &shared;
            let waiters: Vec<_> = (1..3).map(|i| s.spawn(move || await_token(shared, i))).collect();
            thread::sleep(Duration::from_millis(30));
            abort_ring(shared);
            for waiter in waiters {
                assert_eq!(waiter.join().unwrap(), Ok(false));
            }
        });
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_ring_rejects_odd_width() {
        assert_eq!(
            run_ring_width(3, &small_config()).unwrap_err(),
            FutexError::UnsupportedWidth(3)
        );
    }
}
