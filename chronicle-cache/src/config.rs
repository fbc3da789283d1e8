//! Cache configuration.

use chronicle_core::{ChronicleError, ChronicleResult, ConfigError};
use std::time::Duration;

/// Default timeout for acquiring a per-identity write lock.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 1_000;

/// Default prefix for store names.
pub const DEFAULT_NAME_PREFIX: &str = "HistoricalTimeSeries";

/// Configuration shared by the hierarchical caches and the series facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long a write waits for the identity's lock before giving up.
    pub lock_timeout: Duration,
    /// Per-store entry bound. `None` keeps stores unbounded.
    pub store_capacity: Option<usize>,
    /// Prefix for the names of every store the facade creates.
    pub name_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            store_capacity: None,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Bound every store to `capacity` entries.
    pub fn with_store_capacity(mut self, capacity: usize) -> Self {
        self.store_capacity = Some(capacity);
        self
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Name of a store owned by this configuration.
    pub fn store_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.name_prefix, suffix)
    }

    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `CHRONICLE_LOCK_TIMEOUT_MS`: Write-lock timeout in milliseconds (default: 1000)
    /// - `CHRONICLE_STORE_CAPACITY`: Per-store entry bound (default: unbounded)
    /// - `CHRONICLE_CACHE_PREFIX`: Store name prefix (default: HistoricalTimeSeries)
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`CacheConfig::from_env`] with an explicit variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let lock_timeout = Duration::from_millis(
            var("CHRONICLE_LOCK_TIMEOUT_MS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_LOCK_TIMEOUT_MS),
        );

        let store_capacity = var("CHRONICLE_STORE_CAPACITY").and_then(|s| s.trim().parse().ok());

        let name_prefix = var("CHRONICLE_CACHE_PREFIX")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_NAME_PREFIX.to_string());

        Self {
            lock_timeout,
            store_capacity,
            name_prefix,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ChronicleResult<()> {
        if self.lock_timeout.is_zero() {
            return Err(ChronicleError::Config(ConfigError::InvalidValue {
                field: "lock_timeout".to_string(),
                value: format!("{:?}", self.lock_timeout),
                reason: "lock_timeout must be positive".to_string(),
            }));
        }

        if self.store_capacity == Some(0) {
            return Err(ChronicleError::Config(ConfigError::InvalidValue {
                field: "store_capacity".to_string(),
                value: "0".to_string(),
                reason: "store_capacity must be greater than 0 when set".to_string(),
            }));
        }

        if self.name_prefix.is_empty() {
            return Err(ChronicleError::Config(ConfigError::InvalidValue {
                field: "name_prefix".to_string(),
                value: String::new(),
                reason: "name_prefix must not be empty".to_string(),
            }));
        }

        Ok(())
    }
}
