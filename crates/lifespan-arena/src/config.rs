//! Stack configuration parameters.

use crate::error::StackError;

/// Configuration for a [`Stack`](crate::Stack).
///
/// Validated at construction; immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackConfig {
    /// Size of each block in bytes.
    ///
    /// Default: 4096. Must be at least 1. No single allocation may need
    /// more than this (size plus worst-case alignment padding).
    pub block_size: usize,

    /// Maximum number of blocks the stack may hold.
    ///
    /// Default: `None` (unbounded). When set, must be at least 1.
    pub capacity: Option<u32>,
}

impl StackConfig {
    /// Default block size in bytes.
    pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;

    /// Alignment of every block's base address.
    pub const BLOCK_ALIGN: usize = 16;

    /// A config with the given block size and unbounded capacity.
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            block_size,
            capacity: None,
        }
    }

    /// Bound the number of blocks.
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Check invariants.
    pub fn validate(&self) -> Result<(), StackError> {
        if self.block_size == 0 {
            return Err(StackError::InvalidConfig {
                reason: "block_size must be at least 1",
            });
        }
        if self.capacity == Some(0) {
            return Err(StackError::InvalidConfig {
                reason: "capacity must be at least 1",
            });
        }
        Ok(())
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self::with_block_size(Self::DEFAULT_BLOCK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_4k_unbounded() {
        let config = StackConfig::default();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.capacity, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_values_rejected() {
        assert!(StackConfig::with_block_size(0).validate().is_err());
        assert!(StackConfig::default().capacity(0).validate().is_err());
        assert!(StackConfig::with_block_size(40).capacity(3).validate().is_ok());
    }
}
