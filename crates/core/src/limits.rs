//! Resource bounds shared across the workspace
//!
//! Every bound the store enforces is collected here with its default, so
//! that option validation happens in one place. Custom limits are set at
//! store open time; violations of option ranges are `InvalidInput`.

use crate::error::{Error, Result};

/// Resource bounds and tuning defaults.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum number of distinct variables in one query (default: 100)
    pub max_query_variables: usize,

    /// Leapfrog seek/advance bound per query (default: 1 000 000)
    pub max_iterations: u64,

    /// Default query deadline in milliseconds (default: 30 000)
    pub default_deadline_ms: u64,

    /// Largest result set the cache will hold, in rows (default: 10 000)
    pub max_result_size: usize,

    /// Statistics call timeout in milliseconds (default: 60 000)
    pub stats_timeout_ms: u64,

    /// Modification count that schedules a statistics rebuild (default: 10 000)
    pub stats_modification_threshold: u64,

    /// Periodic statistics tick in seconds (default: 3 600)
    pub stats_tick_secs: u64,

    /// Bucket count for numeric histograms (default: 100)
    pub histogram_buckets: usize,

    /// Default snapshot TTL in seconds (default: 300)
    pub snapshot_ttl_secs: u64,

    /// Result-cache entry TTL in seconds (default: 300)
    pub cache_ttl_secs: u64,

    /// Ids pre-allocated per dictionary shard block (default: 1 000)
    pub id_block_size: u64,

    /// Safety margin persisted ahead of the id high-water mark (default: 1 000)
    pub id_safety_margin: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_query_variables: 100,
            max_iterations: 1_000_000,
            default_deadline_ms: 30_000,
            max_result_size: 10_000,
            stats_timeout_ms: 60_000,
            stats_modification_threshold: 10_000,
            stats_tick_secs: 3_600,
            histogram_buckets: 100,
            snapshot_ttl_secs: 300,
            cache_ttl_secs: 300,
            id_block_size: 1_000,
            id_safety_margin: 1_000,
        }
    }
}

impl Limits {
    /// Small bounds for tests that exercise limit enforcement.
    pub fn with_small_limits() -> Self {
        Limits {
            max_query_variables: 4,
            max_iterations: 1_000,
            default_deadline_ms: 2_000,
            max_result_size: 16,
            stats_timeout_ms: 1_000,
            stats_modification_threshold: 10,
            stats_tick_secs: 1,
            histogram_buckets: 4,
            snapshot_ttl_secs: 1,
            cache_ttl_secs: 1,
            id_block_size: 8,
            id_safety_margin: 8,
        }
    }

    /// Validate option ranges at ingress.
    ///
    /// `infinity` is not representable: every timeout and bound must be a
    /// positive finite value.
    pub fn validate(&self) -> Result<()> {
        if self.max_query_variables == 0 {
            return Err(Error::invalid_input("max_query_variables must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(Error::invalid_input("max_iterations must be positive"));
        }
        if self.default_deadline_ms == 0 {
            return Err(Error::invalid_input("default_deadline_ms must be positive"));
        }
        if self.stats_timeout_ms == 0 {
            return Err(Error::invalid_input("stats_timeout_ms must be positive"));
        }
        if self.histogram_buckets == 0 || self.histogram_buckets > 100_000 {
            return Err(Error::invalid_input(
                "histogram_buckets must be in 1..=100000",
            ));
        }
        if self.id_block_size == 0 {
            return Err(Error::invalid_input("id_block_size must be positive"));
        }
        if self.id_safety_margin == 0 {
            return Err(Error::invalid_input("id_safety_margin must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(Limits::default().validate().is_ok());
        assert!(Limits::with_small_limits().validate().is_ok());
    }

    #[test]
    fn test_zero_bounds_rejected() {
        let mut l = Limits::default();
        l.max_iterations = 0;
        assert!(l.validate().is_err());

        let mut l = Limits::default();
        l.default_deadline_ms = 0;
        assert!(l.validate().is_err());

        let mut l = Limits::default();
        l.histogram_buckets = 0;
        assert!(l.validate().is_err());
    }
}
