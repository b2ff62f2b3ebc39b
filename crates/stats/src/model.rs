//! The statistics snapshot and its persistence format
//!
//! Persistence uses bincode, a non-self-describing data-only format: the
//! byte stream can only populate the fields declared here, never
//! materialise code or new symbols. A schema version field is validated
//! before anything else is trusted; records that fail validation are
//! treated as absent.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;
use triad_core::{Result, TermId};
use triad_storage::{keys, Backend, Cf};

/// Current on-disk schema version of the statistics record.
pub const STATS_SCHEMA_VERSION: u16 = 1;

/// Upper bound on a statistics record; anything larger is corrupt.
const MAX_RECORD_BYTES: usize = 256 * 1024 * 1024;

/// An equi-width histogram over the numeric objects of one predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericHistogram {
    /// Smallest admitted value
    pub min: f64,
    /// Largest admitted value
    pub max: f64,
    /// Width of each bucket; zero when `min == max`
    pub bucket_width: f64,
    /// Occurrence count per bucket
    pub buckets: Vec<u64>,
    /// Total admitted occurrences
    pub total: u64,
}

impl NumericHistogram {
    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// The bucket a value falls into.
    pub fn bucket_for(&self, value: f64) -> usize {
        if self.bucket_width <= 0.0 {
            return 0;
        }
        let idx = ((value - self.min) / self.bucket_width) as usize;
        idx.min(self.buckets.len().saturating_sub(1))
    }

    /// The fraction of occurrences falling in `[lo, hi]`, integrating
    /// partial buckets pro-rata. Open ends are unbounded.
    pub fn fraction_in_range(&self, lo: Option<f64>, hi: Option<f64>) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let lo = lo.unwrap_or(f64::NEG_INFINITY);
        let hi = hi.unwrap_or(f64::INFINITY);
        if lo > hi || hi < self.min || lo > self.max {
            return 0.0;
        }
        if self.bucket_width <= 0.0 {
            // Degenerate histogram: every value equals min
            return if lo <= self.min && self.min <= hi {
                1.0
            } else {
                0.0
            };
        }
        let mut covered = 0.0;
        for (i, &count) in self.buckets.iter().enumerate() {
            let b_lo = self.min + i as f64 * self.bucket_width;
            let b_hi = b_lo + self.bucket_width;
            let overlap = (hi.min(b_hi) - lo.max(b_lo)).max(0.0);
            if overlap > 0.0 {
                covered += count as f64 * (overlap / self.bucket_width).min(1.0);
            }
        }
        (covered / self.total as f64).clamp(0.0, 1.0)
    }
}

/// A point-in-time statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Total indexed triples
    pub triple_count: u64,
    /// Distinct subjects
    pub distinct_subjects: u64,
    /// Distinct predicates
    pub distinct_predicates: u64,
    /// Distinct objects
    pub distinct_objects: u64,
    /// Occurrence count per predicate
    pub predicate_histogram: FxHashMap<TermId, u64>,
    /// Numeric value distribution per predicate
    pub numeric_histograms: FxHashMap<TermId, NumericHistogram>,
}

impl Statistics {
    /// True when no collection has happened yet.
    pub fn is_empty(&self) -> bool {
        self.triple_count == 0 && self.predicate_histogram.is_empty()
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedStats {
    version: u16,
    stats: Statistics,
}

/// Persist the snapshot as the single versioned record in `meta`.
pub fn save(backend: &Backend, stats: &Statistics) -> Result<()> {
    let record = PersistedStats {
        version: STATS_SCHEMA_VERSION,
        stats: stats.clone(),
    };
    let bytes = bincode::serialize(&record)
        .map_err(|e| triad_core::Error::internal(format!("statistics encode: {e}")))?;
    backend.put_sync(Cf::Meta, keys::meta::STATS, &bytes)
}

/// Load the persisted snapshot. Unknown versions, malformed bytes and
/// structurally invalid records all load as `None`.
pub fn load(backend: &Backend) -> Result<Option<Statistics>> {
    let Some(bytes) = backend.get(Cf::Meta, keys::meta::STATS)? else {
        return Ok(None);
    };
    if bytes.len() > MAX_RECORD_BYTES {
        warn!(len = bytes.len(), "statistics record oversized, ignoring");
        return Ok(None);
    }
    let record: PersistedStats = match bincode::deserialize(&bytes) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "statistics record malformed, ignoring");
            return Ok(None);
        }
    };
    if record.version != STATS_SCHEMA_VERSION {
        warn!(version = record.version, "statistics record has unknown version, ignoring");
        return Ok(None);
    }
    if !shape_is_valid(&record.stats) {
        warn!("statistics record structurally invalid, ignoring");
        return Ok(None);
    }
    Ok(Some(record.stats))
}

fn shape_is_valid(stats: &Statistics) -> bool {
    let histogram_sum: u64 = stats.predicate_histogram.values().sum();
    if histogram_sum > stats.triple_count {
        return false;
    }
    stats.numeric_histograms.values().all(|h| {
        h.min <= h.max
            && h.min.is_finite()
            && h.max.is_finite()
            && !h.buckets.is_empty()
            && h.buckets.iter().sum::<u64>() == h.total
    })
}
