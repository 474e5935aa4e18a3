//! Pool configuration parameters.

use canopy_core::PoolError;

use crate::node::HEADER_SIZE;

/// Configuration for a [`TreePool`](crate::TreePool).
///
/// Validated at construction; all values are immutable after creation.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Size of the arena in bytes.
    ///
    /// Default: 40_960 (32KB plus the 8KB extension of the device pool).
    /// Must hold at least one node header.
    pub capacity: u32,

    /// Number of identifier slots reserved up front.
    ///
    /// The identifier table grows past this on demand; reserving avoids
    /// reallocation on the hot path. Default: `capacity / HEADER_SIZE`,
    /// the most nodes the arena can ever hold.
    pub reserved_identifiers: usize,
}

impl PoolConfig {
    /// Default arena capacity in bytes.
    pub const DEFAULT_CAPACITY: u32 = 32_768 + 8_192;

    /// Largest supported capacity. Offsets are `u32` and `u32::MAX` is
    /// reserved as the "no node" sentinel.
    pub const MAX_CAPACITY: u32 = u32::MAX - 1;

    /// Create a config for an arena of `capacity` bytes.
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            reserved_identifiers: (capacity / HEADER_SIZE) as usize,
        }
    }

    /// Check structural constraints.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.capacity < HEADER_SIZE {
            return Err(PoolError::InvalidConfig {
                reason: format!(
                    "capacity must hold at least one {HEADER_SIZE}-byte node header (got {})",
                    self.capacity
                ),
            });
        }
        if self.capacity > Self::MAX_CAPACITY {
            return Err(PoolError::InvalidConfig {
                reason: format!(
                    "capacity must be at most {} bytes (got {})",
                    Self::MAX_CAPACITY,
                    self.capacity
                ),
            });
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capacity_is_device_pool_size() {
        let config = PoolConfig::default();
        assert_eq!(config.capacity, 40_960);
        assert_eq!(config.reserved_identifiers, 2048);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn capacity_below_header_is_rejected() {
        let config = PoolConfig::new(HEADER_SIZE - 1);
        assert!(matches!(
            config.validate(),
            Err(PoolError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn sentinel_capacity_is_rejected() {
        let config = PoolConfig::new(u32::MAX);
        assert!(config.validate().is_err());
    }
}
