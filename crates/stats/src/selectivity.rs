//! Selectivity helpers for the cost model

use crate::model::Statistics;
use triad_core::TermId;

/// Fallback selectivity for a numeric range with no histogram.
const DEFAULT_RANGE_SELECTIVITY: f64 = 1.0 / 3.0;

/// The fraction of all triples carrying predicate `p`.
///
/// Falls back to an even split across the distinct predicates when `p`
/// has no histogram entry.
pub fn predicate_selectivity(stats: &Statistics, p: TermId) -> f64 {
    if stats.triple_count == 0 {
        return 1.0;
    }
    match stats.predicate_histogram.get(&p) {
        Some(&count) => count as f64 / stats.triple_count as f64,
        None => 1.0 / stats.distinct_predicates.max(1) as f64,
    }
}

/// The fraction of `p`-triples whose numeric object lies in `[lo, hi]`,
/// integrating histogram buckets with partial-bucket pro-rata.
pub fn range_selectivity(
    stats: &Statistics,
    p: TermId,
    lo: Option<f64>,
    hi: Option<f64>,
) -> f64 {
    match stats.numeric_histograms.get(&p) {
        Some(h) => h.fraction_in_range(lo, hi),
        None => DEFAULT_RANGE_SELECTIVITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NumericHistogram;

    fn stats() -> Statistics {
        let mut s = Statistics {
            triple_count: 1000,
            distinct_predicates: 4,
            ..Statistics::default()
        };
        s.predicate_histogram.insert(TermId::from_u64(1), 100);
        s.numeric_histograms.insert(
            TermId::from_u64(1),
            NumericHistogram {
                min: 0.0,
                max: 100.0,
                bucket_width: 10.0,
                buckets: vec![10; 10],
                total: 100,
            },
        );
        s
    }

    #[test]
    fn test_predicate_selectivity_from_histogram() {
        let s = stats();
        assert!((predicate_selectivity(&s, TermId::from_u64(1)) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_predicate_selectivity_fallback() {
        let s = stats();
        assert!((predicate_selectivity(&s, TermId::from_u64(9)) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_predicate_selectivity_empty_store() {
        let s = Statistics::default();
        assert_eq!(predicate_selectivity(&s, TermId::from_u64(1)), 1.0);
    }

    #[test]
    fn test_range_selectivity_pro_rata() {
        let s = stats();
        let f = range_selectivity(&s, TermId::from_u64(1), Some(0.0), Some(50.0));
        assert!((f - 0.5).abs() < 1e-9);
        let f = range_selectivity(&s, TermId::from_u64(1), Some(0.0), Some(5.0));
        assert!((f - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_range_selectivity_fallback() {
        let s = stats();
        let f = range_selectivity(&s, TermId::from_u64(9), Some(0.0), Some(1.0));
        assert!((f - 1.0 / 3.0).abs() < 1e-9);
    }
}
