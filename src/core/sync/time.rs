/*!
 * Deadlines
 *
 * Absolute time points for `wait_until`, over either the monotonic clock
 * (`Instant`) or the system clock (`SystemTime`).
 */

use std::time::{Duration, Instant, SystemTime};

/// Longest single wait handed to the OS (0x7fffffff ms, about 24.8 days)
pub const MAX_WAIT: Duration = Duration::from_millis(0x7fff_ffff);

/// Clamp a wait to `[0, MAX_WAIT]`
#[inline]
pub fn clamp_duration(d: Duration) -> Duration {
    d.min(MAX_WAIT)
}

/// A point in time a wait may be bounded by
pub trait TimePoint: Copy + Send + Sync {
    /// Whether the point is expressed on the system (wall) clock
    const IS_SYSTEM_CLOCK: bool;

    /// Clamped time left until this point; `None` once it is reached
    fn remaining(&self) -> Option<Duration>;

    /// The same deadline on the system clock, clamped to `MAX_WAIT` from now
    fn to_system_time(&self) -> SystemTime {
        SystemTime::now() + self.remaining().unwrap_or(Duration::ZERO)
    }
}

impl TimePoint for Instant {
    const IS_SYSTEM_CLOCK: bool = false;

    #[inline]
    fn remaining(&self) -> Option<Duration> {
        self.checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .map(clamp_duration)
    }
}

impl TimePoint for SystemTime {
    const IS_SYSTEM_CLOCK: bool = true;

    #[inline]
    fn remaining(&self) -> Option<Duration> {
        self.duration_since(SystemTime::now())
            .ok()
            .filter(|d| !d.is_zero())
            .map(clamp_duration)
    }

    fn to_system_time(&self) -> SystemTime {
        let now = SystemTime::now();
        match self.duration_since(now) {
            Ok(ahead) if ahead > MAX_WAIT => now + MAX_WAIT,
            _ => *self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp() {
        assert_eq!(clamp_duration(Duration::from_secs(1)), Duration::from_secs(1));
        assert_eq!(clamp_duration(Duration::MAX), MAX_WAIT);
    }

    #[test]
    fn test_past_instant_has_no_remaining() {
        let past = Instant::now() - Duration::from_millis(5);
        assert!(past.remaining().is_none());
    }

    #[test]
    fn test_future_instant() {
        let future = Instant::now() + Duration::from_secs(10);
        let left = future.remaining().unwrap();
        assert!(left <= Duration::from_secs(10));
        assert!(left > Duration::from_secs(9));
    }

    #[test]
    fn test_system_time_far_future_is_clamped() {
        let far = SystemTime::now() + Duration::from_secs(365 * 24 * 3600);
        assert_eq!(far.remaining().unwrap(), MAX_WAIT);
        let converted = far.to_system_time();
        assert!(converted < far);
    }

    #[test]
    fn test_past_system_time() {
        let past = SystemTime::now() - Duration::from_secs(1);
        assert!(past.remaining().is_none());
        assert_eq!(past.to_system_time(), past);
    }
}
