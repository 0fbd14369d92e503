//! Queue configuration.
//!
//! A [`QueueConfig`] binds a queue to its storage directory and fixes the
//! retention policy. Configuration is validated when the queue opens, before
//! anything touches the disk.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use rwbuf::config::QueueConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QueueConfig::new("./wal")
//!     .with_ttl(Some(Duration::from_secs(300)))
//!     .with_max_batch_samples(5_000);
//! config.validate()?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default sample time-to-live: two hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Default capacity of a single batch before the queue rotates it.
pub const DEFAULT_MAX_BATCH_SAMPLES: usize = 10_000;

/// Default period of the background sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default upper bound of the engine memory map (1 GiB).
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// Configuration for a [`Queue`](crate::queue::Queue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Directory holding the durable store.
    pub path: PathBuf,

    /// Maximum sample age relative to ingestion time.
    ///
    /// `None` retains committed batches until they are acknowledged: the
    /// ingestion filter and the sweep are both disabled. `Some(ZERO)` is
    /// rejected by [`validate`](Self::validate).
    #[serde(default = "default_ttl")]
    pub ttl: Option<Duration>,

    /// Samples a batch may hold before the queue seals it and opens another.
    #[serde(default = "default_max_batch_samples")]
    pub max_batch_samples: usize,

    /// Period of the background TTL sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: Duration,

    /// Upper bound, in bytes, of the engine memory map.
    #[serde(default = "default_map_size")]
    pub map_size: usize,
}

#[allow(clippy::unnecessary_wraps)] // serde default fn must match the field type
fn default_ttl() -> Option<Duration> {
    Some(DEFAULT_TTL)
}

fn default_max_batch_samples() -> usize {
    DEFAULT_MAX_BATCH_SAMPLES
}

fn default_sweep_interval() -> Duration {
    DEFAULT_SWEEP_INTERVAL
}

fn default_map_size() -> usize {
    DEFAULT_MAP_SIZE
}

impl QueueConfig {
    /// Creates a config for `path` with default retention and sizing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ttl: default_ttl(),
            max_batch_samples: DEFAULT_MAX_BATCH_SAMPLES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            map_size: DEFAULT_MAP_SIZE,
        }
    }

    /// Loads a JSON config file.
    ///
    /// Missing optional fields take their defaults; the result is validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] or [`ConfigError::FileParse`] if the
    /// file cannot be loaded, or any validation error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| ConfigError::FileParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the sample time-to-live (`None` retains until acknowledged).
    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the batch capacity.
    #[must_use]
    pub fn with_max_batch_samples(mut self, max_batch_samples: usize) -> Self {
        self.max_batch_samples = max_batch_samples;
        self
    }

    /// Sets the background sweep period.
    #[must_use]
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Sets the engine memory map size.
    #[must_use]
    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TTL is zero or any size or interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(ConfigError::ZeroTtl.into());
        }
        if self.max_batch_samples == 0 {
            return Err(ConfigError::ZeroBatchCapacity.into());
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval.into());
        }
        if self.map_size == 0 {
            return Err(ConfigError::ZeroMapSize.into());
        }
        Ok(())
    }
}
