//! Store configuration.
//!
//! All parameters are fixed for the lifetime of a [`Store`](crate::Store).
//! Changing them while a store is live is unsupported: the block-id and
//! bucket arithmetic bakes the block size into every placement decision.

/// Fixed numeric parameters for a store.
///
/// Construct with [`Config::default`] and adjust with the chaining setters:
///
/// ```
/// use tempora::Config;
///
/// let config = Config::default()
///     .with_block_size_ms(100)
///     .with_vacuum_delay_ms(5_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Width of one block's time window, in milliseconds. Also the number of
    /// per-millisecond buckets each block allocates.
    pub block_size_ms: i64,
    /// Absolute floor on how long a closed block is protected from vacuum,
    /// in milliseconds past its window end.
    pub vacuum_delay_ms: i64,
    /// Vacuum protection expressed in block widths. The effective delay is
    /// the larger of this (times the block size) and `vacuum_delay_ms`.
    pub vacuum_delay_blocks: i64,
    /// Bounded wait for the rotation lock in `add`, in milliseconds. When
    /// exceeded the add fails with [`Error::Overload`](crate::Error).
    pub rotation_lock_timeout_ms: u64,
}

impl Config {
    /// Default block window: 1 second.
    pub const DEFAULT_BLOCK_SIZE_MS: i64 = 1_000;
    /// Default vacuum delay floor: 1 second.
    pub const DEFAULT_VACUUM_DELAY_MS: i64 = 1_000;
    /// Default vacuum delay in block widths.
    pub const DEFAULT_VACUUM_DELAY_BLOCKS: i64 = 2;
    /// Default rotation-lock wait threshold: 100 ms.
    pub const DEFAULT_ROTATION_LOCK_TIMEOUT_MS: u64 = 100;

    /// Effective vacuum delay: the larger of the absolute floor and the
    /// block-width multiple.
    pub fn effective_vacuum_delay_ms(&self) -> i64 {
        self.vacuum_delay_ms
            .max(self.block_size_ms * self.vacuum_delay_blocks)
    }

    /// Set the block window size in milliseconds.
    pub fn with_block_size_ms(mut self, block_size_ms: i64) -> Self {
        self.block_size_ms = block_size_ms;
        self
    }

    /// Set the absolute vacuum delay floor in milliseconds.
    pub fn with_vacuum_delay_ms(mut self, vacuum_delay_ms: i64) -> Self {
        self.vacuum_delay_ms = vacuum_delay_ms;
        self
    }

    /// Set the vacuum delay in block widths.
    pub fn with_vacuum_delay_blocks(mut self, vacuum_delay_blocks: i64) -> Self {
        self.vacuum_delay_blocks = vacuum_delay_blocks;
        self
    }

    /// Set the rotation-lock wait threshold in milliseconds.
    pub fn with_rotation_lock_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.rotation_lock_timeout_ms = timeout_ms;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size_ms: Self::DEFAULT_BLOCK_SIZE_MS,
            vacuum_delay_ms: Self::DEFAULT_VACUUM_DELAY_MS,
            vacuum_delay_blocks: Self::DEFAULT_VACUUM_DELAY_BLOCKS,
            rotation_lock_timeout_ms: Self::DEFAULT_ROTATION_LOCK_TIMEOUT_MS,
        }
    }
}
