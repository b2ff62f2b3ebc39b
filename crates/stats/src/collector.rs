//! Streaming statistics collection
//!
//! Collection never holds the data set in memory. Distinct counts come
//! from run-length counting over the first key component of each index;
//! the predicate histogram falls out of the POS scan for free. Numeric
//! histograms are two-pass: the POS scan establishes per-predicate
//! min/max on the fly, then one more prefix scan per numeric predicate
//! fills the buckets. Only objects that decode as inline numerics are
//! admitted.

use crate::model::{NumericHistogram, Statistics};
use rustc_hash::FxHashMap;
use tracing::debug;
use triad_core::{Result, TermId};
use triad_storage::{IndexKind, ReadView};

struct MinMax {
    min: f64,
    max: f64,
    count: u64,
}

/// Collect a fresh statistics snapshot through a read view.
pub fn collect(view: ReadView<'_>, bucket_count: usize) -> Result<Statistics> {
    let mut stats = Statistics::default();

    // Pass over POS: triple count, predicate histogram, distinct
    // predicates, numeric min/max per predicate.
    let mut ranges: FxHashMap<TermId, MinMax> = FxHashMap::default();
    {
        let mut iter = view.prefix_iter(IndexKind::Pos.cf(), &[])?;
        let mut current_p: Option<TermId> = None;
        while let Some(key) = iter.key() {
            let triple = IndexKind::Pos.triple_from_key(key)?;
            stats.triple_count += 1;
            *stats.predicate_histogram.entry(triple.p).or_insert(0) += 1;
            if current_p != Some(triple.p) {
                current_p = Some(triple.p);
                stats.distinct_predicates += 1;
            }
            if let Some(value) = triple.o.inline_numeric() {
                let entry = ranges.entry(triple.p).or_insert(MinMax {
                    min: value,
                    max: value,
                    count: 0,
                });
                entry.min = entry.min.min(value);
                entry.max = entry.max.max(value);
                entry.count += 1;
            }
            iter.next()?;
        }
    }

    stats.distinct_subjects = count_leading_runs(view, IndexKind::Spo)?;
    stats.distinct_objects = count_leading_runs(view, IndexKind::Osp)?;

    // Second pass per numeric predicate: fill the buckets.
    for (p, range) in ranges {
        let mut histogram = NumericHistogram {
            min: range.min,
            max: range.max,
            bucket_width: if range.max > range.min {
                (range.max - range.min) / bucket_count as f64
            } else {
                0.0
            },
            buckets: vec![0; if range.max > range.min { bucket_count } else { 1 }],
            total: 0,
        };
        let mut iter = view.prefix_iter(IndexKind::Pos.cf(), &p.to_be_bytes())?;
        while let Some(key) = iter.key() {
            let triple = IndexKind::Pos.triple_from_key(key)?;
            if let Some(value) = triple.o.inline_numeric() {
                let idx = histogram.bucket_for(value);
                histogram.buckets[idx] += 1;
                histogram.total += 1;
            }
            iter.next()?;
        }
        debug_assert_eq!(histogram.total, range.count);
        stats.numeric_histograms.insert(p, histogram);
    }

    debug!(
        triples = stats.triple_count,
        predicates = stats.distinct_predicates,
        numeric = stats.numeric_histograms.len(),
        "statistics collected"
    );
    Ok(stats)
}

/// Count distinct values of the leading key component of an index.
fn count_leading_runs(view: ReadView<'_>, kind: IndexKind) -> Result<u64> {
    let mut iter = view.prefix_iter(kind.cf(), &[])?;
    let mut runs = 0u64;
    let mut current: Option<[u8; 8]> = None;
    while let Some(key) = iter.key() {
        let mut lead = [0u8; 8];
        lead.copy_from_slice(&key[..8]);
        if current != Some(lead) {
            current = Some(lead);
            runs += 1;
        }
        iter.next()?;
    }
    Ok(runs)
}
