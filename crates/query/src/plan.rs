//! Plan representation: encoded patterns, the variable table, plan nodes
//! and the per-query resource guard

use crate::algebra::Expression;
use smallvec::SmallVec;
use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::time::Instant;
use triad_core::{Error, Result, Slot, TermId, TriplePattern};
use triad_storage::{RangeBound, TripleSlot};

/// Maps variable names to dense indices for the whole query.
#[derive(Debug, Clone, Default)]
pub struct VarTable {
    names: Vec<String>,
    index: FxHashMap<String, usize>,
}

impl VarTable {
    /// Build from names in first-occurrence order.
    pub fn from_names(names: Vec<String>) -> VarTable {
        let mut index = FxHashMap::default();
        for (i, n) in names.iter().enumerate() {
            index.insert(n.clone(), i);
        }
        VarTable { names, index }
    }

    /// The index of a name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// The name at an index.
    pub fn name(&self, i: usize) -> &str {
        &self.names[i]
    }

    /// All names in index order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when no variables exist.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A pattern slot after constant encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatSlot {
    /// An encoded constant
    Const(TermId),
    /// A variable index
    Var(usize),
}

impl PatSlot {
    /// The variable index, if any.
    pub fn var(self) -> Option<usize> {
        match self {
            PatSlot::Var(v) => Some(v),
            PatSlot::Const(_) => None,
        }
    }
}

/// A triple pattern with encoded constants and indexed variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncodedPattern {
    /// Subject slot
    pub s: PatSlot,
    /// Predicate slot
    pub p: PatSlot,
    /// Object slot
    pub o: PatSlot,
}

impl EncodedPattern {
    /// Slots in (s, p, o) order.
    pub fn slots(&self) -> [PatSlot; 3] {
        [self.s, self.p, self.o]
    }

    /// The slot at a triple position.
    pub fn slot_at(&self, pos: TripleSlot) -> PatSlot {
        match pos {
            TripleSlot::S => self.s,
            TripleSlot::P => self.p,
            TripleSlot::O => self.o,
        }
    }

    /// Distinct variable indices, in slot order.
    pub fn vars(&self) -> SmallVec<[usize; 3]> {
        let mut out: SmallVec<[usize; 3]> = SmallVec::new();
        for slot in self.slots() {
            if let Some(v) = slot.var() {
                if !out.contains(&v) {
                    out.push(v);
                }
            }
        }
        out
    }

    /// Whether the pattern mentions a variable.
    pub fn mentions(&self, var: usize) -> bool {
        self.slots().iter().any(|s| s.var() == Some(var))
    }

    /// The triple positions holding a variable.
    pub fn positions_of(&self, var: usize) -> SmallVec<[TripleSlot; 3]> {
        let mut out = SmallVec::new();
        for (slot, pos) in self
            .slots()
            .into_iter()
            .zip([TripleSlot::S, TripleSlot::P, TripleSlot::O])
        {
            if slot.var() == Some(var) {
                out.push(pos);
            }
        }
        out
    }

    /// Number of constant slots.
    pub fn const_count(&self) -> usize {
        self.slots().iter().filter(|s| s.var().is_none()).count()
    }

    /// True when every slot is constant.
    pub fn is_ground(&self) -> bool {
        self.const_count() == 3
    }

    /// The storage lookup pattern given current bindings.
    pub fn to_lookup(&self, bindings: &[Option<TermId>]) -> TriplePattern {
        let slot = |s: PatSlot| match s {
            PatSlot::Const(id) => Slot::Bound(id),
            PatSlot::Var(v) => bindings.get(v).copied().flatten().into(),
        };
        TriplePattern::new(slot(self.s), slot(self.p), slot(self.o))
    }
}

/// Per-query deadline and iteration budget, checked cooperatively at
/// every seek, search and state-machine transition.
#[derive(Debug)]
pub struct QueryGuard {
    started: Instant,
    deadline: Instant,
    max_iterations: u64,
    iterations: Cell<u64>,
}

impl QueryGuard {
    /// Create a guard with an absolute deadline and iteration bound.
    pub fn new(deadline: Instant, max_iterations: u64) -> QueryGuard {
        QueryGuard {
            started: Instant::now(),
            deadline,
            max_iterations,
            iterations: Cell::new(0),
        }
    }

    /// Fail with `timeout` once the deadline has passed.
    pub fn check_deadline(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            Err(Error::timeout(self.started.elapsed().as_millis() as u64))
        } else {
            Ok(())
        }
    }

    /// Count one leapfrog iteration and check both bounds.
    pub fn tick(&self) -> Result<()> {
        let used = self.iterations.get() + 1;
        self.iterations.set(used);
        if used > self.max_iterations {
            return Err(Error::max_iterations(self.max_iterations));
        }
        self.check_deadline()
    }

    /// Iterations consumed so far.
    pub fn iterations(&self) -> u64 {
        self.iterations.get()
    }
}

/// A physical plan for one basic graph pattern (plus absorbed filters).
#[derive(Debug, Clone)]
pub enum PlanNode {
    /// A constant was unknown to the dictionary: no results
    EmptyScan,
    /// Scan one pattern through an index
    PatternScan {
        /// The pattern
        pattern: EncodedPattern,
        /// Estimated matching rows
        est_rows: f64,
    },
    /// Drive one pattern through the numeric-range index
    RangeScan {
        /// The rewritten pattern
        pattern: EncodedPattern,
        /// The range-indexed predicate
        p: TermId,
        /// The object variable the scan binds
        var: usize,
        /// Lower bound
        lo: RangeBound,
        /// Upper bound
        hi: RangeBound,
        /// Estimated matching rows
        est_rows: f64,
    },
    /// Worst-case-optimal multiway join over all patterns
    LeapfrogJoin {
        /// The joined patterns
        patterns: Vec<EncodedPattern>,
        /// Variable elimination order
        veo: Vec<usize>,
        /// Estimated output rows
        est_rows: f64,
    },
    /// Hash join of two sub-plans on shared variables
    HashJoin {
        /// Probe side
        left: Box<PlanNode>,
        /// Build side
        right: Box<PlanNode>,
        /// Join variables (always bound on both sides)
        on: Vec<usize>,
        /// Estimated output rows
        est_rows: f64,
    },
    /// Residual filter over a sub-plan
    Filter {
        /// The condition
        expr: Expression,
        /// Input plan
        input: Box<PlanNode>,
        /// Estimated output rows
        est_rows: f64,
    },
}

impl PlanNode {
    /// The node's estimated output cardinality.
    pub fn est_rows(&self) -> f64 {
        match self {
            PlanNode::EmptyScan => 0.0,
            PlanNode::PatternScan { est_rows, .. }
            | PlanNode::RangeScan { est_rows, .. }
            | PlanNode::LeapfrogJoin { est_rows, .. }
            | PlanNode::HashJoin { est_rows, .. }
            | PlanNode::Filter { est_rows, .. } => *est_rows,
        }
    }

    /// Short name of the chosen strategy, for explain output.
    pub fn strategy(&self) -> &'static str {
        match self {
            PlanNode::EmptyScan => "empty",
            PlanNode::PatternScan { .. } => "pattern-scan",
            PlanNode::RangeScan { .. } => "range-scan",
            PlanNode::LeapfrogJoin { .. } => "leapfrog",
            PlanNode::HashJoin { .. } => "hash-join",
            PlanNode::Filter { .. } => self.filter_input_strategy(),
        }
    }

    fn filter_input_strategy(&self) -> &'static str {
        match self {
            PlanNode::Filter { input, .. } => input.strategy(),
            _ => unreachable!(),
        }
    }

    /// True when a range scan drives any part of the plan.
    pub fn uses_range_index(&self) -> bool {
        match self {
            PlanNode::RangeScan { .. } => true,
            PlanNode::HashJoin { left, right, .. } => {
                left.uses_range_index() || right.uses_range_index()
            }
            PlanNode::Filter { input, .. } => input.uses_range_index(),
            _ => false,
        }
    }

    /// Render the operator tree with per-node cardinality estimates.
    pub fn explain(&self, vars: &VarTable) -> String {
        let mut out = String::new();
        self.explain_into(vars, 0, &mut out);
        out
    }

    fn explain_into(&self, vars: &VarTable, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        let var_name = |v: usize| format!("?{}", vars.name(v));
        let slot = |s: PatSlot| match s {
            PatSlot::Const(id) => format!("{id}"),
            PatSlot::Var(v) => var_name(v),
        };
        let pattern = |p: &EncodedPattern| format!("{} {} {}", slot(p.s), slot(p.p), slot(p.o));
        match self {
            PlanNode::EmptyScan => {
                out.push_str(&format!("{indent}empty [est 0]\n"));
            }
            PlanNode::PatternScan {
                pattern: p,
                est_rows,
            } => {
                out.push_str(&format!(
                    "{indent}pattern-scan {} [est {:.0}]\n",
                    pattern(p),
                    est_rows
                ));
            }
            PlanNode::RangeScan {
                pattern: p,
                var,
                lo,
                hi,
                est_rows,
                ..
            } => {
                out.push_str(&format!(
                    "{indent}range-scan {} on {} in {:?}..{:?} [est {:.0}]\n",
                    pattern(p),
                    var_name(*var),
                    lo,
                    hi,
                    est_rows
                ));
            }
            PlanNode::LeapfrogJoin {
                patterns,
                veo,
                est_rows,
            } => {
                let order: Vec<String> = veo.iter().map(|&v| var_name(v)).collect();
                out.push_str(&format!(
                    "{indent}leapfrog veo: {} [est {:.0}]\n",
                    order.join(" "),
                    est_rows
                ));
                for p in patterns {
                    out.push_str(&format!("{indent}  pattern {}\n", pattern(p)));
                }
            }
            PlanNode::HashJoin {
                left,
                right,
                on,
                est_rows,
            } => {
                let keys: Vec<String> = on.iter().map(|&v| var_name(v)).collect();
                out.push_str(&format!(
                    "{indent}hash-join on {} [est {:.0}]\n",
                    keys.join(" "),
                    est_rows
                ));
                left.explain_into(vars, depth + 1, out);
                right.explain_into(vars, depth + 1, out);
            }
            PlanNode::Filter {
                expr,
                input,
                est_rows,
            } => {
                out.push_str(&format!("{indent}filter {expr:?} [est {:.0}]\n", est_rows));
                input.explain_into(vars, depth + 1, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(n: u64) -> TermId {
        TermId::from_u64(n)
    }

    #[test]
    fn test_encoded_pattern_vars() {
        let p = EncodedPattern {
            s: PatSlot::Var(0),
            p: PatSlot::Const(id(1)),
            o: PatSlot::Var(1),
        };
        assert_eq!(p.vars().as_slice(), &[0, 1]);
        assert!(p.mentions(0));
        assert!(!p.mentions(2));
        assert_eq!(p.const_count(), 1);
        assert!(!p.is_ground());
    }

    #[test]
    fn test_repeated_var_positions() {
        let p = EncodedPattern {
            s: PatSlot::Var(0),
            p: PatSlot::Const(id(1)),
            o: PatSlot::Var(0),
        };
        assert_eq!(p.vars().as_slice(), &[0]);
        assert_eq!(p.positions_of(0).as_slice(), &[TripleSlot::S, TripleSlot::O]);
    }

    #[test]
    fn test_to_lookup_uses_bindings() {
        let p = EncodedPattern {
            s: PatSlot::Var(0),
            p: PatSlot::Const(id(1)),
            o: PatSlot::Var(1),
        };
        let bindings = vec![Some(id(7)), None];
        let lookup = p.to_lookup(&bindings);
        assert_eq!(lookup.s, Slot::Bound(id(7)));
        assert_eq!(lookup.p, Slot::Bound(id(1)));
        assert_eq!(lookup.o, Slot::Any);
    }

    #[test]
    fn test_guard_iteration_bound() {
        let guard = QueryGuard::new(Instant::now() + Duration::from_secs(60), 3);
        assert!(guard.tick().is_ok());
        assert!(guard.tick().is_ok());
        assert!(guard.tick().is_ok());
        let err = guard.tick().unwrap_err();
        assert_eq!(err.code(), "max_iterations_exceeded");
    }

    #[test]
    fn test_guard_deadline() {
        let guard = QueryGuard::new(Instant::now() - Duration::from_millis(1), 1000);
        let err = guard.check_deadline().unwrap_err();
        assert_eq!(err.code(), "timeout");
    }

    #[test]
    fn test_var_table() {
        let vars = VarTable::from_names(vec!["x".into(), "y".into()]);
        assert_eq!(vars.index_of("x"), Some(0));
        assert_eq!(vars.index_of("z"), None);
        assert_eq!(vars.name(1), "y");
        assert_eq!(vars.len(), 2);
    }
}
