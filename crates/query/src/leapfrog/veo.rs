//! Variable elimination ordering
//!
//! Before execution the executor fixes the order in which variables are
//! bound. Each variable gets a selectivity score; ascending sort puts
//! the most selective variable first. The score of a variable sums, over
//! the patterns mentioning it:
//!
//! - a base cost by position: subject and object positions are
//!   high-cardinality, predicate positions low;
//! - a multiplier shrinking with the number of constants in the pattern
//!   (more constants, tighter scan);
//! - the predicate's histogram selectivity when the pattern's predicate
//!   is constant;
//!
//! and divides by the square of the mention count, so variables shared
//! across several patterns are favoured.

use crate::plan::{EncodedPattern, PatSlot};
use triad_stats::{predicate_selectivity, Statistics};
use triad_storage::TripleSlot;

const BASE_SUBJECT: f64 = 1_000.0;
const BASE_PREDICATE: f64 = 10.0;
const BASE_OBJECT: f64 = 1_000.0;
const CONSTANT_MULTIPLIER: f64 = 0.25;

/// Compute the variable elimination order for a pattern set.
///
/// Only variables that occur in the patterns appear in the result.
pub fn elimination_order(
    patterns: &[EncodedPattern],
    stats: &Statistics,
    var_count: usize,
) -> Vec<usize> {
    let mut scored: Vec<(f64, usize)> = Vec::new();
    for var in 0..var_count {
        let mut total = 0.0;
        let mut mentions = 0u32;
        for pattern in patterns.iter().filter(|p| p.mentions(var)) {
            mentions += 1;
            let base = pattern
                .positions_of(var)
                .iter()
                .map(|pos| match pos {
                    TripleSlot::S => BASE_SUBJECT,
                    TripleSlot::P => BASE_PREDICATE,
                    TripleSlot::O => BASE_OBJECT,
                })
                .fold(f64::INFINITY, f64::min);
            let const_mult = CONSTANT_MULTIPLIER.powi(pattern.const_count() as i32);
            let hist_mult = match pattern.p {
                PatSlot::Const(p) => predicate_selectivity(stats, p).clamp(1e-6, 1.0),
                PatSlot::Var(_) => 1.0,
            };
            total += base * const_mult * hist_mult;
        }
        if mentions > 0 {
            // Multi-pattern bonus: shared variables bind earlier.
            let score = total / (mentions as f64 * mentions as f64);
            scored.push((score, var));
        }
    }
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));
    scored.into_iter().map(|(_, var)| var).collect()
}
