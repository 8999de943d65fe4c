/*!
 * Synchronization Configuration
 *
 * Tuning for the contended spin/backoff loop that guards parking lot buckets.
 * Installed once per process; read lazily on first contention.
 */

use crate::core::errors::{FutexError, FutexResult};
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

/// Process-wide configuration, resolved on first use
static GLOBAL_CONFIG: OnceLock<SyncConfig> = OnceLock::new();

/// Contention backoff configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Lower bound of the randomized spin count (power of two minus one)
    pub min_spins: u32,
    /// Upper bound of the randomized spin count (power of two minus one)
    pub max_spins: u32,
    /// First sleep once a full spin round fails
    #[serde(with = "micros")]
    pub backoff_initial: Duration,
    /// Sleep cap; the sleep doubles each failed round up to this
    #[serde(with = "micros")]
    pub backoff_max: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_spins: 32 - 1,
            max_spins: 128 - 1,
            backoff_initial: Duration::from_micros(500),
            backoff_max: Duration::from_millis(500),
        }
    }
}

impl SyncConfig {
    /// Spin longer before sleeping; for buckets expected to be held only briefly
    pub const fn low_latency() -> Self {
        Self {
            min_spins: 128 - 1,
            max_spins: 512 - 1,
            backoff_initial: Duration::from_micros(50),
            backoff_max: Duration::from_millis(10),
        }
    }

    /// Sleep early; for oversubscribed machines
    pub const fn long_wait() -> Self {
        Self {
            min_spins: 8 - 1,
            max_spins: 32 - 1,
            backoff_initial: Duration::from_millis(1),
            backoff_max: Duration::from_millis(500),
        }
    }

    /// Preset by name: `default`, `low-latency` or `long-wait`
    pub fn from_profile(name: &str) -> FutexResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "default" => Ok(Self::default()),
            "low-latency" | "low_latency" => Ok(Self::low_latency()),
            "long-wait" | "long_wait" => Ok(Self::long_wait()),
            other => Err(FutexError::InvalidConfig(format!("unknown sync profile {:?}", other))),
        }
    }

    /// Preset from `FUTEX_SYNC_PROFILE` (default otherwise), overridden by
    /// `FUTEX_CONTENTION_SPINS`, `FUTEX_BACKOFF_INITIAL_US` and
    /// `FUTEX_BACKOFF_MAX_US`
    pub fn from_env() -> FutexResult<Self> {
        let mut config = match std::env::var("FUTEX_SYNC_PROFILE") {
            Ok(profile) => Self::from_profile(&profile)?,
            Err(_) => Self::default(),
        };

        if let Some(spins) = env_u64("FUTEX_CONTENTION_SPINS")? {
            let spins = u32::try_from(spins)
                .map_err(|_| FutexError::InvalidConfig(format!("spin count {} too large", spins)))?;
            config.max_spins = spins;
            config.min_spins = config.min_spins.min(spins);
        }
        if let Some(us) = env_u64("FUTEX_BACKOFF_INITIAL_US")? {
            config.backoff_initial = Duration::from_micros(us);
        }
        if let Some(us) = env_u64("FUTEX_BACKOFF_MAX_US")? {
            config.backoff_max = Duration::from_micros(us);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the spin masks and the backoff range
    pub fn validate(&self) -> FutexResult<()> {
        for (name, spins) in [("min_spins", self.min_spins), ("max_spins", self.max_spins)] {
            if spins == 0 || !(spins + 1).is_power_of_two() {
                return Err(FutexError::InvalidConfig(format!(
                    "{} must be a power of two minus one, got {}",
                    name, spins
                )));
            }
        }
        if self.min_spins > self.max_spins {
            return Err(FutexError::InvalidConfig(format!(
                "min_spins ({}) exceeds max_spins ({})",
                self.min_spins, self.max_spins
            )));
        }
        if self.backoff_initial.is_zero() || self.backoff_initial > self.backoff_max {
            return Err(FutexError::InvalidConfig(format!(
                "backoff range {:?}..{:?} is empty",
                self.backoff_initial, self.backoff_max
            )));
        }
        Ok(())
    }

    /// Install the process-wide configuration
    ///
    /// Fails if a configuration was already installed or read.
    pub fn install(self) -> FutexResult<()> {
        self.validate()?;
        GLOBAL_CONFIG
            .set(self)
            .map_err(|_| FutexError::InvalidConfig("sync configuration already installed".into()))
    }

    /// The process-wide configuration; falls back to defaults if the
    /// environment is malformed
    pub fn global() -> &'static SyncConfig {
        GLOBAL_CONFIG.get_or_init(|| match Self::from_env() {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring sync configuration from environment");
                Self::default()
            }
        })
    }
}

fn env_u64(key: &str) -> FutexResult<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| FutexError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}

mod micros {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_micros)
    }
}
