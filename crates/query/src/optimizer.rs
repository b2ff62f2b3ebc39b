//! Plan enumeration: join reordering, filter push-down, range rewrites
//! and the leapfrog-vs-hash decision
//!
//! BGPs up to [`DP_PATTERN_LIMIT`] patterns are ordered by a dynamic
//! program over connected subsets; larger BGPs fall back to a greedy
//! ordering that repeatedly takes the pattern with the lowest
//! incremental cost given the variables already bound. Conjunctive
//! numeric comparisons over the object of a range-indexed predicate
//! rewrite that pattern into a range scan, which lets the numeric index
//! drive the plan. The leapfrog strategy is chosen when enough patterns
//! share a join variable and its estimated cost beats the hash
//! pipeline.

use crate::algebra::{Aggregate, Algebra, Expression, Pattern, TermOrVar};
use crate::cost::CostModel;
use crate::leapfrog::veo::elimination_order;
use crate::plan::{EncodedPattern, PatSlot, PlanNode, VarTable};
use rustc_hash::FxHashSet;
use triad_core::{Error, Result, TermId};
use triad_storage::{Dictionary, RangeBound, TripleIndexes};

/// Largest BGP planned by exhaustive DP; beyond this, greedy.
pub const DP_PATTERN_LIMIT: usize = 6;

/// The executable tree: algebra with every BGP lowered to a physical
/// plan and every variable resolved to its index.
#[derive(Debug, Clone)]
pub enum Planned {
    /// A lowered basic graph pattern
    Bgp(PlanNode),
    /// Inner join of two sub-trees
    Join(Box<Planned>, Box<Planned>),
    /// Left outer join
    LeftJoin {
        /// Required side
        left: Box<Planned>,
        /// Optional side
        right: Box<Planned>,
        /// Join condition
        filter: Option<Expression>,
    },
    /// Concatenation
    Union(Box<Planned>, Box<Planned>),
    /// Anti-join
    Minus(Box<Planned>, Box<Planned>),
    /// Row filter
    Filter {
        /// Condition
        expr: Expression,
        /// Input
        input: Box<Planned>,
    },
    /// BIND
    Extend {
        /// Input
        input: Box<Planned>,
        /// Target variable index
        var: usize,
        /// Definition
        expr: Expression,
    },
    /// Projection
    Project {
        /// Input
        input: Box<Planned>,
        /// Visible variable indices
        vars: Vec<usize>,
    },
    /// Duplicate elimination
    Distinct(Box<Planned>),
    /// Sort
    OrderBy {
        /// Input
        input: Box<Planned>,
        /// `(key expression, descending)` pairs
        keys: Vec<(Expression, bool)>,
    },
    /// LIMIT/OFFSET
    Slice {
        /// Input
        input: Box<Planned>,
        /// Rows skipped
        offset: usize,
        /// Row cap
        limit: Option<usize>,
    },
    /// GROUP BY + aggregates
    Group {
        /// Input
        input: Box<Planned>,
        /// Group-key variable indices
        by: Vec<usize>,
        /// `(output variable index, aggregate)` pairs
        aggregates: Vec<(usize, Aggregate)>,
    },
}

impl Planned {
    /// Render the plan tree, delegating to [`PlanNode::explain`] for
    /// lowered BGPs.
    pub fn explain(&self, vars: &VarTable) -> String {
        let mut out = String::new();
        self.explain_into(vars, 0, &mut out);
        out
    }

    fn explain_into(&self, vars: &VarTable, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        match self {
            Planned::Bgp(node) => {
                for line in node.explain(vars).lines() {
                    out.push_str(&indent);
                    out.push_str(line);
                    out.push('\n');
                }
            }
            Planned::Join(a, b) => {
                out.push_str(&format!("{indent}join\n"));
                a.explain_into(vars, depth + 1, out);
                b.explain_into(vars, depth + 1, out);
            }
            Planned::LeftJoin { left, right, .. } => {
                out.push_str(&format!("{indent}left-join\n"));
                left.explain_into(vars, depth + 1, out);
                right.explain_into(vars, depth + 1, out);
            }
            Planned::Union(a, b) => {
                out.push_str(&format!("{indent}union\n"));
                a.explain_into(vars, depth + 1, out);
                b.explain_into(vars, depth + 1, out);
            }
            Planned::Minus(a, b) => {
                out.push_str(&format!("{indent}minus\n"));
                a.explain_into(vars, depth + 1, out);
                b.explain_into(vars, depth + 1, out);
            }
            Planned::Filter { expr, input } => {
                out.push_str(&format!("{indent}filter {expr:?}\n"));
                input.explain_into(vars, depth + 1, out);
            }
            Planned::Extend { input, var, .. } => {
                out.push_str(&format!("{indent}extend ?{}\n", vars.name(*var)));
                input.explain_into(vars, depth + 1, out);
            }
            Planned::Project { input, vars: pv } => {
                let names: Vec<String> =
                    pv.iter().map(|&v| format!("?{}", vars.name(v))).collect();
                out.push_str(&format!("{indent}project {}\n", names.join(" ")));
                input.explain_into(vars, depth + 1, out);
            }
            Planned::Distinct(input) => {
                out.push_str(&format!("{indent}distinct\n"));
                input.explain_into(vars, depth + 1, out);
            }
            Planned::OrderBy { input, keys } => {
                out.push_str(&format!("{indent}order-by ({} keys)\n", keys.len()));
                input.explain_into(vars, depth + 1, out);
            }
            Planned::Slice {
                input,
                offset,
                limit,
            } => {
                out.push_str(&format!("{indent}slice offset={offset} limit={limit:?}\n"));
                input.explain_into(vars, depth + 1, out);
            }
            Planned::Group { input, by, .. } => {
                let names: Vec<String> =
                    by.iter().map(|&v| format!("?{}", vars.name(v))).collect();
                out.push_str(&format!("{indent}group by {}\n", names.join(" ")));
                input.explain_into(vars, depth + 1, out);
            }
        }
    }

    /// True when a range scan drives any BGP of the tree.
    pub fn uses_range_index(&self) -> bool {
        match self {
            Planned::Bgp(node) => node.uses_range_index(),
            Planned::Join(a, b) | Planned::Union(a, b) | Planned::Minus(a, b) => {
                a.uses_range_index() || b.uses_range_index()
            }
            Planned::LeftJoin { left, right, .. } => {
                left.uses_range_index() || right.uses_range_index()
            }
            Planned::Filter { input, .. }
            | Planned::Extend { input, .. }
            | Planned::Project { input, .. }
            | Planned::Distinct(input)
            | Planned::OrderBy { input, .. }
            | Planned::Slice { input, .. }
            | Planned::Group { input, .. } => input.uses_range_index(),
        }
    }
}

/// One merged numeric constraint extracted from filter conjuncts.
#[derive(Debug, Clone, Copy)]
struct RangeConstraint {
    lo: RangeBound,
    hi: RangeBound,
}

/// The query planner.
pub struct Planner<'s> {
    model: CostModel,
    dict: &'s Dictionary,
    indexes: &'s TripleIndexes,
    leapfrog_min_patterns: usize,
    max_variables: usize,
}

impl<'s> Planner<'s> {
    /// Build a planner over the current statistics snapshot.
    pub fn new(
        model: CostModel,
        dict: &'s Dictionary,
        indexes: &'s TripleIndexes,
    ) -> Planner<'s> {
        Planner {
            model,
            dict,
            indexes,
            leapfrog_min_patterns: 2,
            max_variables: 100,
        }
    }

    /// Override the minimum pattern count for the leapfrog strategy.
    pub fn with_leapfrog_min_patterns(mut self, n: usize) -> Self {
        self.leapfrog_min_patterns = n.max(1);
        self
    }

    /// Override the hard cap on variables per query.
    pub fn with_max_variables(mut self, n: usize) -> Self {
        self.max_variables = n;
        self
    }

    /// The cost model in use.
    pub fn model(&self) -> &CostModel {
        &self.model
    }

    /// Lower an algebra tree to an executable plan.
    pub fn plan(&self, algebra: &Algebra, vars: &VarTable) -> Result<Planned> {
        if vars.len() > self.max_variables {
            return Err(Error::invalid_plan(format!(
                "query has {} variables, limit is {}",
                vars.len(),
                self.max_variables
            )));
        }
        self.plan_inner(algebra, vars)
    }

    fn plan_inner(&self, algebra: &Algebra, vars: &VarTable) -> Result<Planned> {
        match algebra {
            Algebra::Bgp(patterns) => self.plan_bgp(patterns, Vec::new(), vars),
            Algebra::Filter { expr, input } => {
                // Collapse a chain of filters over a BGP so all conjuncts
                // can push down together.
                let mut conjuncts = Vec::new();
                split_conjuncts(expr, &mut conjuncts);
                let mut inner = input.as_ref();
                while let Algebra::Filter { expr, input } = inner {
                    split_conjuncts(expr, &mut conjuncts);
                    inner = input.as_ref();
                }
                if let Algebra::Bgp(patterns) = inner {
                    self.plan_bgp(patterns, conjuncts, vars)
                } else {
                    let input = Box::new(self.plan_inner(inner, vars)?);
                    Ok(conjuncts.into_iter().fold(*input, |acc, expr| {
                        Planned::Filter {
                            expr,
                            input: Box::new(acc),
                        }
                    }))
                }
            }
            Algebra::Join(a, b) => Ok(Planned::Join(
                Box::new(self.plan_inner(a, vars)?),
                Box::new(self.plan_inner(b, vars)?),
            )),
            Algebra::LeftJoin { left, right, filter } => Ok(Planned::LeftJoin {
                left: Box::new(self.plan_inner(left, vars)?),
                right: Box::new(self.plan_inner(right, vars)?),
                filter: filter.clone(),
            }),
            Algebra::Union(a, b) => Ok(Planned::Union(
                Box::new(self.plan_inner(a, vars)?),
                Box::new(self.plan_inner(b, vars)?),
            )),
            Algebra::Minus(a, b) => Ok(Planned::Minus(
                Box::new(self.plan_inner(a, vars)?),
                Box::new(self.plan_inner(b, vars)?),
            )),
            Algebra::Extend { input, var, expr } => Ok(Planned::Extend {
                input: Box::new(self.plan_inner(input, vars)?),
                var: vars
                    .index_of(var)
                    .ok_or_else(|| Error::invalid_plan(format!("unknown variable ?{var}")))?,
                expr: expr.clone(),
            }),
            Algebra::Project { input, vars: pv } => {
                let mut indices = Vec::with_capacity(pv.len());
                for name in pv {
                    indices.push(vars.index_of(name).ok_or_else(|| {
                        Error::invalid_plan(format!("projected unknown variable ?{name}"))
                    })?);
                }
                Ok(Planned::Project {
                    input: Box::new(self.plan_inner(input, vars)?),
                    vars: indices,
                })
            }
            Algebra::Distinct(input) => {
                Ok(Planned::Distinct(Box::new(self.plan_inner(input, vars)?)))
            }
            Algebra::OrderBy { input, keys } => Ok(Planned::OrderBy {
                input: Box::new(self.plan_inner(input, vars)?),
                keys: keys
                    .iter()
                    .map(|k| (k.expr.clone(), k.descending))
                    .collect(),
            }),
            Algebra::Slice {
                input,
                offset,
                limit,
            } => Ok(Planned::Slice {
                input: Box::new(self.plan_inner(input, vars)?),
                offset: *offset,
                limit: *limit,
            }),
            Algebra::Group {
                input,
                by,
                aggregates,
            } => {
                let mut by_ix = Vec::with_capacity(by.len());
                for name in by {
                    by_ix.push(vars.index_of(name).ok_or_else(|| {
                        Error::invalid_plan(format!("grouping on unknown variable ?{name}"))
                    })?);
                }
                let mut aggs = Vec::with_capacity(aggregates.len());
                for (name, agg) in aggregates {
                    let ix = vars.index_of(name).ok_or_else(|| {
                        Error::invalid_plan(format!("aggregate output ?{name} unknown"))
                    })?;
                    aggs.push((ix, agg.clone()));
                }
                Ok(Planned::Group {
                    input: Box::new(self.plan_inner(input, vars)?),
                    by: by_ix,
                    aggregates: aggs,
                })
            }
        }
    }

    /// Lower one BGP with its pushed-down filter conjuncts.
    fn plan_bgp(
        &self,
        patterns: &[Pattern],
        filters: Vec<Expression>,
        vars: &VarTable,
    ) -> Result<Planned> {
        let mut encoded = Vec::with_capacity(patterns.len());
        for p in patterns {
            match self.encode_pattern(p, vars)? {
                Some(ep) => encoded.push(ep),
                // A constant unknown to the dictionary matches nothing.
                None => return Ok(Planned::Bgp(PlanNode::EmptyScan)),
            }
        }

        // Extract numeric range constraints that an indexed predicate
        // can satisfy; consumed conjuncts vanish from the residual set.
        let (range_rewrites, residual) = self.extract_ranges(&encoded, filters, vars);

        let node = if range_rewrites.is_empty() {
            self.choose_strategy(&encoded, vars)?
        } else {
            self.hash_pipeline(&encoded, &range_rewrites)?
        };

        // Residual filters sit at the earliest point that binds their
        // variables — for a lowered BGP that is directly above the join.
        let node = residual.into_iter().fold(node, |acc, expr| {
            let est = self.model.filter_rows(acc.est_rows());
            PlanNode::Filter {
                expr,
                input: Box::new(acc),
                est_rows: est,
            }
        });
        Ok(Planned::Bgp(node))
    }

    fn encode_slot(&self, slot: &TermOrVar, vars: &VarTable) -> Result<Option<PatSlot>> {
        match slot {
            TermOrVar::Var(name) => {
                let ix = vars
                    .index_of(name)
                    .ok_or_else(|| Error::invalid_plan(format!("unknown variable ?{name}")))?;
                Ok(Some(PatSlot::Var(ix)))
            }
            TermOrVar::Term(term) => Ok(self.dict.get_if_present(term)?.map(PatSlot::Const)),
        }
    }

    fn encode_pattern(&self, p: &Pattern, vars: &VarTable) -> Result<Option<EncodedPattern>> {
        let (Some(s), Some(pp), Some(o)) = (
            self.encode_slot(&p.s, vars)?,
            self.encode_slot(&p.p, vars)?,
            self.encode_slot(&p.o, vars)?,
        ) else {
            return Ok(None);
        };
        Ok(Some(EncodedPattern { s, p: pp, o }))
    }

    /// Pull `?v op number` conjuncts into range rewrites for patterns of
    /// the shape `?s <p> ?v` where `<p>` is range-indexed.
    fn extract_ranges(
        &self,
        patterns: &[EncodedPattern],
        filters: Vec<Expression>,
        vars: &VarTable,
    ) -> (Vec<(usize, usize, TermId, RangeConstraint)>, Vec<Expression>) {
        let mut residual = Vec::new();
        let mut constraints: Vec<(usize, RangeConstraint, Vec<Expression>)> = Vec::new();

        for expr in filters {
            match as_range_conjunct(&expr, vars) {
                Some((var, constraint)) => {
                    match constraints.iter_mut().find(|(v, _, _)| *v == var) {
                        Some((_, existing, sources)) => {
                            existing.lo = tighter_lo(existing.lo, constraint.lo);
                            existing.hi = tighter_hi(existing.hi, constraint.hi);
                            sources.push(expr);
                        }
                        None => constraints.push((var, constraint, vec![expr])),
                    }
                }
                None => residual.push(expr),
            }
        }

        let mut rewrites = Vec::new();
        for (var, constraint, sources) in constraints {
            let target = patterns.iter().enumerate().find(|(_, p)| {
                p.o == PatSlot::Var(var)
                    && matches!(p.p, PatSlot::Const(pid) if self.indexes.is_range_indexed(pid))
            });
            match target {
                Some((idx, pattern)) => {
                    let PatSlot::Const(pid) = pattern.p else {
                        unreachable!("matched constant predicate")
                    };
                    rewrites.push((idx, var, pid, constraint));
                }
                // No indexed pattern binds this variable: the conjuncts
                // stay ordinary filters.
                None => residual.extend(sources),
            }
        }
        (rewrites, residual)
    }

    /// Pick leapfrog or the hash pipeline for a plain BGP.
    fn choose_strategy(&self, patterns: &[EncodedPattern], vars: &VarTable) -> Result<PlanNode> {
        if patterns.is_empty() {
            return Ok(PlanNode::LeapfrogJoin {
                patterns: Vec::new(),
                veo: Vec::new(),
                est_rows: 1.0,
            });
        }
        let hash_plan = self.hash_pipeline(patterns, &[])?;
        let eligible = patterns.len() >= self.leapfrog_min_patterns
            && has_shared_variable(patterns);
        if !eligible {
            return Ok(hash_plan);
        }
        let veo = elimination_order(patterns, self.model.stats(), vars.len());
        let leapfrog = PlanNode::LeapfrogJoin {
            patterns: patterns.to_vec(),
            veo,
            est_rows: hash_plan.est_rows(),
        };
        if self.model.leapfrog_cost(patterns) <= self.model.node_cost(&hash_plan) {
            Ok(leapfrog)
        } else {
            Ok(hash_plan)
        }
    }

    /// Left-deep hash-join pipeline in DP or greedy order, with range
    /// rewrites as scan sources.
    fn hash_pipeline(
        &self,
        patterns: &[EncodedPattern],
        rewrites: &[(usize, usize, TermId, RangeConstraint)],
    ) -> Result<PlanNode> {
        let scans: Vec<PlanNode> = patterns
            .iter()
            .enumerate()
            .map(|(i, p)| match rewrites.iter().find(|(idx, ..)| *idx == i) {
                Some((_, var, pid, c)) => PlanNode::RangeScan {
                    pattern: *p,
                    p: *pid,
                    var: *var,
                    lo: c.lo,
                    hi: c.hi,
                    est_rows: self.model.range_rows(*pid, c.lo, c.hi),
                },
                None => PlanNode::PatternScan {
                    pattern: *p,
                    est_rows: self.model.pattern_rows(p),
                },
            })
            .collect();

        let order = if scans.len() <= DP_PATTERN_LIMIT {
            self.dp_order(patterns, &scans)
        } else {
            self.greedy_order(patterns, &scans)
        };

        let mut iter = order.into_iter();
        let first = iter.next().expect("at least one pattern");
        let mut node = scans[first].clone();
        let mut bound: FxHashSet<usize> = pattern_vars(&patterns[first]);
        for idx in iter {
            let right = scans[idx].clone();
            let right_vars = pattern_vars(&patterns[idx]);
            let on: Vec<usize> = right_vars.intersection(&bound).copied().collect();
            let est = self
                .model
                .join_rows(node.est_rows(), right.est_rows(), on.len());
            bound.extend(right_vars);
            node = PlanNode::HashJoin {
                left: Box::new(node),
                right: Box::new(right),
                on,
                est_rows: est,
            };
        }
        Ok(node)
    }

    /// Exhaustive order search over connected subsets.
    fn dp_order(&self, patterns: &[EncodedPattern], scans: &[PlanNode]) -> Vec<usize> {
        let n = patterns.len();
        if n <= 1 {
            return (0..n).collect();
        }
        // dp[mask] = (cost, rows, order)
        let mut dp: Vec<Option<(f64, f64, Vec<usize>)>> = vec![None; 1 << n];
        for i in 0..n {
            let rows = scans[i].est_rows();
            dp[1 << i] = Some((self.model.weights().io * rows, rows, vec![i]));
        }
        for mask in 1usize..(1 << n) {
            let Some((cost, rows, order)) = dp[mask].clone() else {
                continue;
            };
            for next in 0..n {
                if mask & (1 << next) != 0 {
                    continue;
                }
                // Prefer connected extensions; allow cartesian only when
                // nothing connected remains.
                let connected = is_connected(patterns, mask, next);
                if !connected && (0..n).any(|j| mask & (1 << j) == 0 && is_connected(patterns, mask, j)) {
                    continue;
                }
                let shared = shared_with_mask(patterns, mask, next);
                let out = self.model.join_rows(rows, scans[next].est_rows(), shared);
                let step_cost = self.model.weights().io * scans[next].est_rows()
                    + self.model.weights().cpu * out;
                let total = cost + step_cost;
                let new_mask = mask | (1 << next);
                let better = match &dp[new_mask] {
                    None => true,
                    Some((existing, _, _)) => total < *existing,
                };
                if better {
                    let mut new_order = order.clone();
                    new_order.push(next);
                    dp[new_mask] = Some((total, out, new_order));
                }
            }
        }
        dp[(1 << n) - 1]
            .clone()
            .map(|(_, _, order)| order)
            .unwrap_or_else(|| (0..n).collect())
    }

    /// Greedy lowest-incremental-cost ordering for large BGPs.
    fn greedy_order(&self, patterns: &[EncodedPattern], scans: &[PlanNode]) -> Vec<usize> {
        let n = patterns.len();
        let mut remaining: FxHashSet<usize> = (0..n).collect();
        let mut order = Vec::with_capacity(n);
        let mut bound: FxHashSet<usize> = FxHashSet::default();
        let mut rows = 1.0f64;

        while !remaining.is_empty() {
            let mut best: Option<(f64, usize, f64)> = None;
            for &i in &remaining {
                let shared = pattern_vars(&patterns[i]).intersection(&bound).count();
                // Disconnected patterns only once nothing connected remains
                if !bound.is_empty() && shared == 0 {
                    let any_connected = remaining.iter().any(|&j| {
                        pattern_vars(&patterns[j]).intersection(&bound).count() > 0
                    });
                    if any_connected {
                        continue;
                    }
                }
                let out = if order.is_empty() {
                    scans[i].est_rows()
                } else {
                    self.model.join_rows(rows, scans[i].est_rows(), shared)
                };
                let step = self.model.weights().io * scans[i].est_rows()
                    + self.model.weights().cpu * out;
                if best.map_or(true, |(c, _, _)| step < c) {
                    best = Some((step, i, out));
                }
            }
            let (_, pick, out) = best.expect("remaining is non-empty");
            remaining.remove(&pick);
            bound.extend(pattern_vars(&patterns[pick]));
            rows = out;
            order.push(pick);
        }
        order
    }
}

fn pattern_vars(p: &EncodedPattern) -> FxHashSet<usize> {
    p.vars().into_iter().collect()
}

fn has_shared_variable(patterns: &[EncodedPattern]) -> bool {
    for (i, a) in patterns.iter().enumerate() {
        for b in &patterns[i + 1..] {
            if a.vars().iter().any(|v| b.mentions(*v)) {
                return true;
            }
        }
    }
    false
}

fn is_connected(patterns: &[EncodedPattern], mask: usize, next: usize) -> bool {
    shared_with_mask(patterns, mask, next) > 0
}

fn shared_with_mask(patterns: &[EncodedPattern], mask: usize, next: usize) -> usize {
    let next_vars = pattern_vars(&patterns[next]);
    let mut bound = FxHashSet::default();
    for (i, p) in patterns.iter().enumerate() {
        if mask & (1 << i) != 0 {
            bound.extend(pattern_vars(p));
        }
    }
    next_vars.intersection(&bound).count()
}

/// Split nested conjunctions into a flat list.
fn split_conjuncts(expr: &Expression, out: &mut Vec<Expression>) {
    match expr {
        Expression::And(a, b) => {
            split_conjuncts(a, out);
            split_conjuncts(b, out);
        }
        other => out.push(other.clone()),
    }
}

/// Recognise `?v op number` (either operand order) as a range constraint.
fn as_range_conjunct(expr: &Expression, vars: &VarTable) -> Option<(usize, RangeConstraint)> {
    let open = RangeConstraint {
        lo: RangeBound::Unbounded,
        hi: RangeBound::Unbounded,
    };
    let number = |e: &Expression| -> Option<f64> {
        match e {
            Expression::Const(t) => t.as_f64(),
            _ => None,
        }
    };
    let var = |e: &Expression| -> Option<usize> {
        match e {
            Expression::Var(name) => vars.index_of(name),
            _ => None,
        }
    };
    let (v, c, flipped, op): (usize, f64, bool, &Expression) = match expr {
        Expression::Lt(a, b) | Expression::Le(a, b) | Expression::Gt(a, b) | Expression::Ge(a, b) => {
            if let (Some(v), Some(c)) = (var(a), number(b)) {
                (v, c, false, expr)
            } else if let (Some(v), Some(c)) = (var(b), number(a)) {
                (v, c, true, expr)
            } else {
                return None;
            }
        }
        _ => return None,
    };
    // `c op ?v` is `?v flipped-op c`
    let constraint = match (op, flipped) {
        (Expression::Lt(..), false) | (Expression::Gt(..), true) => RangeConstraint {
            hi: RangeBound::Exclusive(c),
            ..open
        },
        (Expression::Le(..), false) | (Expression::Ge(..), true) => RangeConstraint {
            hi: RangeBound::Inclusive(c),
            ..open
        },
        (Expression::Gt(..), false) | (Expression::Lt(..), true) => RangeConstraint {
            lo: RangeBound::Exclusive(c),
            ..open
        },
        (Expression::Ge(..), false) | (Expression::Le(..), true) => RangeConstraint {
            lo: RangeBound::Inclusive(c),
            ..open
        },
        _ => return None,
    };
    Some((v, constraint))
}

fn bound_limit(b: RangeBound) -> Option<(f64, bool)> {
    match b {
        RangeBound::Unbounded => None,
        RangeBound::Inclusive(v) => Some((v, true)),
        RangeBound::Exclusive(v) => Some((v, false)),
    }
}

fn make_bound(v: f64, inclusive: bool) -> RangeBound {
    if inclusive {
        RangeBound::Inclusive(v)
    } else {
        RangeBound::Exclusive(v)
    }
}

fn tighter_lo(a: RangeBound, b: RangeBound) -> RangeBound {
    match (bound_limit(a), bound_limit(b)) {
        (None, _) => b,
        (_, None) => a,
        (Some((va, ia)), Some((vb, _))) if va > vb => make_bound(va, ia),
        (Some((va, ia)), Some((vb, ib))) if va == vb => make_bound(va, ia && ib),
        (_, Some((vb, ib))) => make_bound(vb, ib),
    }
}

fn tighter_hi(a: RangeBound, b: RangeBound) -> RangeBound {
    match (bound_limit(a), bound_limit(b)) {
        (None, _) => b,
        (_, None) => a,
        (Some((va, ia)), Some((vb, _))) if va < vb => make_bound(va, ia),
        (Some((va, ia)), Some((vb, ib))) if va == vb => make_bound(va, ia && ib),
        (_, Some((vb, ib))) => make_bound(vb, ib),
    }
}
