//! Session and deferred-closer configuration.

use std::error::Error;
use std::fmt;

/// Per-session tuning.
///
/// Applies to every kind that counts acquires (confined, shared and
/// implicit); ignored by structured and global sessions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum number of simultaneously outstanding acquires.
    ///
    /// Default: [`SessionConfig::MAX_ACQUIRES`]. Reaching the limit makes
    /// `acquire()` fail with `OutOfCapacity` instead of wrapping.
    pub max_acquires: u32,
}

impl SessionConfig {
    /// Default acquire limit. The acquire counter is an `i32` whose
    /// negative range is reserved for the closed sentinel (`-1`).
    pub const MAX_ACQUIRES: u32 = i32::MAX as u32;

    /// Check invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_acquires == 0 {
            return Err(ConfigError::ZeroAcquireLimit);
        }
        if self.max_acquires > Self::MAX_ACQUIRES {
            return Err(ConfigError::AcquireLimitTooLarge {
                limit: self.max_acquires,
            });
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_acquires: Self::MAX_ACQUIRES,
        }
    }
}

/// Configuration for the background deferred closer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloserConfig {
    /// Maximum number of sessions closed under one handshake.
    ///
    /// Default: 64. Must be at least 1.
    pub batch_size: usize,
    /// Queue depth past which submissions are closed synchronously on
    /// the submitting thread instead of being queued.
    ///
    /// Default: 1000.
    pub high_water_mark: usize,
}

impl CloserConfig {
    /// Default batch size.
    pub const DEFAULT_BATCH_SIZE: usize = 64;

    /// Default high-water mark.
    pub const DEFAULT_HIGH_WATER_MARK: usize = 1000;

    /// Check invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(())
    }
}

impl Default for CloserConfig {
    fn default() -> Self {
        Self {
            batch_size: Self::DEFAULT_BATCH_SIZE,
            high_water_mark: Self::DEFAULT_HIGH_WATER_MARK,
        }
    }
}

/// Errors from configuration validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_acquires` was zero.
    ZeroAcquireLimit,
    /// `max_acquires` exceeds what the counter can represent.
    AcquireLimitTooLarge {
        /// The rejected limit.
        limit: u32,
    },
    /// `batch_size` was zero.
    ZeroBatchSize,
    /// The worker thread could not be spawned.
    SpawnFailed {
        /// OS error description.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroAcquireLimit => write!(f, "max_acquires must be at least 1"),
            Self::AcquireLimitTooLarge { limit } => write!(
                f,
                "max_acquires {limit} exceeds {}",
                SessionConfig::MAX_ACQUIRES
            ),
            Self::ZeroBatchSize => write!(f, "batch_size must be at least 1"),
            Self::SpawnFailed { reason } => write!(f, "failed to spawn closer thread: {reason}"),
        }
    }
}

impl Error for ConfigError {}
