//! Repository configuration.

use std::time::Duration;

/// Default time a table interface with no borrowers stays cached (60 seconds).
pub const IDLE_TIMEOUT_DEFAULT: Duration = Duration::from_secs(60);

/// Default number of worker shards.
pub const SHARDS_DEFAULT: u32 = 4;

/// Maximum number of worker shards.
pub const SHARDS_MAX: u32 = 256;

/// Configuration for the table interface repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoConfig {
    /// How long an entry must stay unborrowed before it is torn down.
    pub idle_timeout: Duration,
    /// Number of worker shards, each with its own cache.
    pub shard_count: u32,
}

impl RepoConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            idle_timeout: IDLE_TIMEOUT_DEFAULT,
            shard_count: SHARDS_DEFAULT,
        }
    }

    /// Sets the idle timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sets the shard count.
    #[must_use]
    pub const fn with_shard_count(mut self, shard_count: u32) -> Self {
        self.shard_count = shard_count;
        self
    }

    /// Creates a configuration suitable for testing (short idle timeout, two shards).
    #[must_use]
    pub const fn fast_for_testing() -> Self {
        Self {
            idle_timeout: Duration::from_millis(200),
            shard_count: 2,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the idle timeout is zero or the shard count is out
    /// of bounds.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        if self.shard_count == 0 || self.shard_count > SHARDS_MAX {
            return Err(ConfigError::InvalidShardCount {
                count: self.shard_count,
                max: SHARDS_MAX,
            });
        }
        Ok(())
    }
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Entries would be torn down as soon as they go idle.
    #[error("idle timeout must be greater than zero")]
    ZeroIdleTimeout,

    /// Shard count out of bounds.
    #[error("invalid shard count {count} (must be 1..={max})")]
    InvalidShardCount {
        /// Requested count.
        count: u32,
        /// Maximum allowed.
        max: u32,
    },
}
