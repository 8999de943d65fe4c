/*!
 * Stress Configuration
 *
 * Loaded from the JSON file named by `FUTEX_STRESS_CONFIG` (if any), then
 * overridden by `FUTEX_STRESS_THREADS` and `FUTEX_STRESS_ITERATIONS`.
 */

use crate::core::errors::{FutexError, FutexResult};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    /// Threads in the ring (at least 2)
    pub threads: usize,
    /// Token visits per thread
    pub iterations: usize,
    /// Atomic widths to exercise, in bytes
    pub widths: Vec<usize>,
    /// Longest a thread may wait for its token before the run is declared stalled
    pub stall_timeout_ms: u64,
    /// Runs slower than this are logged as warnings
    pub slow_run_ms: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            iterations: 1_000,
            widths: vec![1, 2, 4, 8],
            stall_timeout_ms: 5_000,
            slow_run_ms: 1_000,
        }
    }
}

impl StressConfig {
    /// Parse a JSON configuration; missing fields take defaults
    pub fn from_json(raw: &str) -> FutexResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> FutexResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    /// File (if `FUTEX_STRESS_CONFIG` is set) plus environment overrides
    pub fn load() -> FutexResult<Self> {
        let mut config = match std::env::var("FUTEX_STRESS_CONFIG") {
            Ok(path) => {
                tracing::info!(path = %path, "loading stress configuration");
                Self::from_file(path)?
            }
            Err(_) => Self::default(),
        };

        if let Some(threads) = env_usize("FUTEX_STRESS_THREADS")? {
            config.threads = threads;
        }
        if let Some(iterations) = env_usize("FUTEX_STRESS_ITERATIONS")? {
            config.iterations = iterations;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FutexResult<()> {
        if self.threads < 2 {
            return Err(FutexError::InvalidConfig(format!(
                "a ring needs at least 2 threads, got {}",
                self.threads
            )));
        }
        if self.iterations == 0 {
            return Err(FutexError::InvalidConfig("iterations must be positive".into()));
        }
        if self.widths.is_empty() {
            return Err(FutexError::InvalidConfig("no widths selected".into()));
        }
        if let Some(width) = self.widths.iter().find(|w| !matches!(**w, 1 | 2 | 4 | 8)) {
            return Err(FutexError::UnsupportedWidth(*width));
        }
        if self.stall_timeout_ms == 0 {
            return Err(FutexError::InvalidConfig("stall_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn slow_run(&self) -> Duration {
        Duration::from_millis(self.slow_run_ms)
    }
}

fn env_usize(key: &str) -> FutexResult<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| FutexError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_is_valid() {
        assert!(StressConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = StressConfig::from_json(r#"{"threads": 3, "widths": [1, 8]}"#).unwrap();
        assert_eq!(config.threads, 3);
        assert_eq!(config.widths, vec![1, 8]);
        assert_eq!(config.iterations, 1_000);
    }

    #[test]
    fn test_rejects_bad_width() {
        let err = StressConfig::from_json(r#"{"widths": [3]}"#).unwrap_err();
        assert_eq!(err, FutexError::UnsupportedWidth(3));
    }

    #[test]
    fn test_rejects_single_thread() {
        assert!(matches!(
            StressConfig::from_json(r#"{"threads": 1}"#),
            Err(FutexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            StressConfig::from_json("{threads"),
            Err(FutexError::InvalidConfig(_))
        ));
    }
}
