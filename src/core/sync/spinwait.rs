/*!
 * Contended Spin-Wait
 *
 * Predicate-driven spinning for very short critical sections (bucket locks).
 * Spins with CPU pause hints first, then backs off with exponentially growing
 * sleeps. Never parks in a wait primitive, so it is safe to use from inside
 * the parking lot itself.
 */

use super::config::SyncConfig;
use crate::core::hints::{cpu_relax, likely, unlikely};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

/// Shared LCG state; randomizes spin counts so contending threads do not
/// settle into lockstep
static SPIN_SEED: AtomicU32 = AtomicU32::new(0x2545_f491);

/// Randomized spin count between the configured masks
#[inline]
fn contention_spins(config: &SyncConfig) -> u32 {
    let next = SPIN_SEED.load(Ordering::Relaxed);
    SPIN_SEED.store(
        next.wrapping_mul(1_103_515_245).wrapping_add(12_345),
        Ordering::Relaxed,
    );
    ((next >> 24) & config.max_spins) | config.min_spins
}

/// Exponential sleep schedule used once spinning stops paying off
#[derive(Debug, Clone)]
pub struct Backoff {
    sleep: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            sleep: config.backoff_initial,
            max: config.backoff_max,
        }
    }

    /// Sleep for the current step and double the next one
    pub fn snooze(&mut self) {
        thread::sleep(self.sleep);
        self.advance();
    }

    /// Double the next step without sleeping, capped at the configured maximum
    fn advance(&mut self) {
        self.sleep = self.sleep.saturating_mul(2).min(self.max);
    }

    /// Duration of the next sleep
    pub fn current(&self) -> Duration {
        self.sleep
    }
}

/// Call `f` until it returns `true`, pausing the CPU between attempts
///
/// For loops that are guaranteed to make progress within a few attempts,
/// such as a CAS racing against a field update.
#[inline]
pub fn spin_wait(mut f: impl FnMut() -> bool) {
    while !likely(f()) {
        cpu_relax(1);
    }
}

/// Call `f` until it returns `true`, backing off under contention
///
/// The first attempt is inline; the slow path shows up in stack traces as
/// `contended_wait`.
#[inline]
pub fn spin_wait_with_backoff(mut f: impl FnMut() -> bool) {
    if unlikely(!f()) {
        contended_wait(f);
    }
}

#[cold]
#[inline(never)]
fn contended_wait(mut f: impl FnMut() -> bool) {
    let config = SyncConfig::global();
    let mut backoff = Backoff::new(config);
    let mut spins = contention_spins(config);

    loop {
        if likely(f()) {
            return;
        }

        cpu_relax(1);
        spins -= 1;
        if spins == 0 {
            backoff.snooze();
            spins = contention_spins(config);
        }
    }
}

/// Call `f` up to a randomized number of times; `true` as soon as it succeeds
pub fn spin_try_wait(mut f: impl FnMut() -> bool) -> bool {
    if likely(f()) {
        return true;
    }

    let mut spins = contention_spins(SyncConfig::global());
    while spins > 1 {
        spins -= 1;
        cpu_relax(1);
        if likely(f()) {
            return true;
        }
    }
    false
}
