//! The cost model
//!
//! Cost is a dimensionless scalar blending io (estimated rows touched,
//! the dominant term), cpu (join output produced) and filter work.
//! Weights are a named record with a default preset; `with_weights`
//! builds a model for diagnostic experiments and `explain_cost` renders
//! the per-node breakdown.

use crate::plan::{EncodedPattern, PatSlot, PlanNode, VarTable};
use std::sync::Arc;
use triad_stats::{predicate_selectivity, range_selectivity, Statistics};
use triad_storage::RangeBound;

/// Generic selectivity assumed for filters the model cannot analyse.
const DEFAULT_FILTER_SELECTIVITY: f64 = 0.5;

/// Cost weight preset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostWeights {
    /// Weight of rows read from the indices
    pub io: f64,
    /// Weight of rows produced by joins
    pub cpu: f64,
    /// Weight of rows pushed through filters
    pub filter: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        CostWeights {
            io: 1.0,
            cpu: 0.2,
            filter: 0.1,
        }
    }
}

/// The cost model over one statistics snapshot.
#[derive(Debug, Clone)]
pub struct CostModel {
    weights: CostWeights,
    stats: Arc<Statistics>,
}

impl CostModel {
    /// Model with default weights.
    pub fn new(stats: Arc<Statistics>) -> CostModel {
        CostModel {
            weights: CostWeights::default(),
            stats,
        }
    }

    /// Model with explicit weights.
    pub fn with_weights(stats: Arc<Statistics>, weights: CostWeights) -> CostModel {
        CostModel { weights, stats }
    }

    /// The statistics snapshot in use.
    pub fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }

    /// The active weight preset.
    pub fn weights(&self) -> CostWeights {
        self.weights
    }

    fn triple_count(&self) -> f64 {
        self.stats.triple_count.max(1) as f64
    }

    /// Estimated matching rows of one pattern.
    pub fn pattern_rows(&self, pattern: &EncodedPattern) -> f64 {
        let mut selectivity = 1.0;
        if let PatSlot::Const(p) = pattern.p {
            selectivity *= predicate_selectivity(&self.stats, p);
        }
        if let PatSlot::Const(_) = pattern.s {
            selectivity *= 1.0 / self.stats.distinct_subjects.max(1) as f64;
        }
        if let PatSlot::Const(_) = pattern.o {
            selectivity *= 1.0 / self.stats.distinct_objects.max(1) as f64;
        }
        (self.triple_count() * selectivity).max(if pattern.is_ground() { 0.0 } else { 1.0 })
    }

    /// Estimated rows of a numeric range scan over predicate `p`.
    pub fn range_rows(&self, p: triad_core::TermId, lo: RangeBound, hi: RangeBound) -> f64 {
        let count = *self.stats.predicate_histogram.get(&p).unwrap_or(&0) as f64;
        let lo = bound_value(lo);
        let hi = bound_value(hi);
        let fraction = range_selectivity(&self.stats, p, lo, hi);
        (count * fraction).max(1.0)
    }

    /// Estimated output of joining two inputs sharing `shared` variables.
    pub fn join_rows(&self, left: f64, right: f64, shared: usize) -> f64 {
        if shared == 0 {
            // Cartesian product
            left * right
        } else {
            (left * right / self.triple_count()).max(1.0)
        }
    }

    /// Estimated rows surviving a generic filter.
    pub fn filter_rows(&self, input: f64) -> f64 {
        input * DEFAULT_FILTER_SELECTIVITY
    }

    /// Estimated cost of a leapfrog join: the most selective driver's
    /// cardinality times the iterator count times a log-seek factor.
    pub fn leapfrog_cost(&self, patterns: &[EncodedPattern]) -> f64 {
        let driver = patterns
            .iter()
            .map(|p| self.pattern_rows(p))
            .fold(f64::INFINITY, f64::min)
            .max(1.0);
        let k = patterns.len().max(1) as f64;
        driver * k * self.triple_count().log2().max(1.0) * self.weights.io
    }

    /// Total weighted cost of a plan node.
    pub fn node_cost(&self, node: &PlanNode) -> f64 {
        match node {
            PlanNode::EmptyScan => 0.0,
            PlanNode::PatternScan { est_rows, .. } => self.weights.io * est_rows,
            PlanNode::RangeScan { est_rows, .. } => self.weights.io * est_rows,
            PlanNode::LeapfrogJoin { patterns, est_rows, .. } => {
                self.leapfrog_cost(patterns) + self.weights.cpu * est_rows
            }
            PlanNode::HashJoin {
                left,
                right,
                est_rows,
                ..
            } => self.node_cost(left) + self.node_cost(right) + self.weights.cpu * est_rows,
            PlanNode::Filter { input, .. } => {
                self.node_cost(input) + self.weights.filter * input.est_rows()
            }
        }
    }

    /// Render the cost breakdown of a plan.
    pub fn explain_cost(&self, node: &PlanNode, vars: &VarTable) -> String {
        format!(
            "total cost {:.1} (weights io={} cpu={} filter={})\n{}",
            self.node_cost(node),
            self.weights.io,
            self.weights.cpu,
            self.weights.filter,
            node.explain(vars)
        )
    }
}

fn bound_value(b: RangeBound) -> Option<f64> {
    match b {
        RangeBound::Unbounded => None,
        RangeBound::Inclusive(v) | RangeBound::Exclusive(v) => Some(v),
    }
}
