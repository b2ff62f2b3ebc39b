//! Plan execution: binding streams and stream transforms
//!
//! [`execute`] lowers a [`Planned`] tree into a lazy iterator of binding
//! rows. BGP plan nodes drive the storage layer (leapfrog, index scans,
//! range scans, hash joins); every other operator is a stream transform
//! over rows. A row is a fixed-width vector indexed by the query's
//! variable table; unbound variables are `None`.
//!
//! Expression evaluation follows SPARQL's error-as-unbound discipline:
//! a type error makes the expression evaluate to nothing, which a
//! filter treats as false.

use crate::algebra::{Aggregate, Expression, Function};
use crate::leapfrog::LeapfrogExecutor;
use crate::optimizer::Planned;
use crate::plan::{EncodedPattern, PatSlot, PlanNode, QueryGuard, VarTable};
use chrono::Utc;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::rc::Rc;
use triad_core::{Result, Term, TermId, TermKind, Triple};
use triad_storage::{Dictionary, ReadView, TripleIndexes};
use uuid::Uuid;

/// One binding row: per-variable optional ids.
pub type Row = SmallVec<[Option<TermId>; 8]>;

/// A lazy stream of binding rows.
pub type RowIter<'v> = Box<dyn Iterator<Item = Result<Row>> + 'v>;

/// Everything execution needs from the store.
#[derive(Clone)]
pub struct ExecParams<'v> {
    /// Read source (live or snapshot)
    pub view: ReadView<'v>,
    /// The dictionary, for decoding and computed values
    pub dict: &'v Dictionary,
    /// The triple indices
    pub indexes: &'v TripleIndexes,
    /// Deadline and iteration budget
    pub guard: Rc<QueryGuard>,
    /// The query's variable table
    pub vars: Rc<VarTable>,
}

impl<'v> ExecParams<'v> {
    fn empty_row(&self) -> Row {
        let mut row = Row::new();
        row.resize(self.vars.len(), None);
        row
    }
}

/// Execute a plan into a lazy row stream.
pub fn execute<'v>(params: &ExecParams<'v>, plan: &Planned) -> Result<RowIter<'v>> {
    match plan {
        Planned::Bgp(node) => execute_node(params, node),
        Planned::Join(a, b) => {
            let on: Vec<usize> = certain_vars(a)
                .intersection(&certain_vars(b))
                .copied()
                .collect();
            let left = execute(params, a)?;
            let right: Vec<Row> = execute(params, b)?.collect::<Result<_>>()?;
            Ok(hash_join(left, right, on))
        }
        Planned::LeftJoin { left, right, filter } => {
            let left_rows = execute(params, left)?;
            let right: Vec<Row> = execute(params, right)?.collect::<Result<_>>()?;
            Ok(left_join(params.clone(), left_rows, right, filter.clone()))
        }
        Planned::Union(a, b) => {
            let left = execute(params, a)?;
            let right = execute(params, b)?;
            Ok(Box::new(left.chain(right)))
        }
        Planned::Minus(a, b) => {
            let left = execute(params, a)?;
            let right: Vec<Row> = execute(params, b)?.collect::<Result<_>>()?;
            Ok(Box::new(left.filter(move |row| match row {
                Ok(row) => !right.iter().any(|r| minus_removes(row, r)),
                Err(_) => true,
            })))
        }
        Planned::Filter { expr, input } => {
            let inner = execute(params, input)?;
            let params = params.clone();
            let expr = expr.clone();
            Ok(Box::new(inner.filter(move |row| match row {
                Ok(row) => eval_truth(&params, row, &expr),
                Err(_) => true,
            })))
        }
        Planned::Extend { input, var, expr } => {
            let inner = execute(params, input)?;
            let params = params.clone();
            let var = *var;
            let expr = expr.clone();
            Ok(Box::new(inner.map(move |row| {
                let mut row = row?;
                if let Some(value) = eval(&params, &row, &expr)? {
                    if let Some(term) = value_to_term(&params, value)? {
                        row[var] = Some(intern_term(&params, &term)?);
                    }
                }
                Ok(row)
            })))
        }
        Planned::Project { input, vars } => {
            let inner = execute(params, input)?;
            let keep: FxHashSet<usize> = vars.iter().copied().collect();
            let width = params.vars.len();
            Ok(Box::new(inner.map(move |row| {
                let row = row?;
                let mut out = Row::new();
                out.resize(width, None);
                for &v in keep.iter() {
                    out[v] = row[v];
                }
                Ok(out)
            })))
        }
        Planned::Distinct(input) => {
            let inner = execute(params, input)?;
            let mut seen: FxHashSet<Row> = FxHashSet::default();
            Ok(Box::new(inner.filter(move |row| match row {
                Ok(row) => seen.insert(row.clone()),
                Err(_) => true,
            })))
        }
        Planned::OrderBy { input, keys } => {
            let mut rows: Vec<Row> = execute(params, input)?.collect::<Result<_>>()?;
            let mut sort_keys: Vec<Vec<SortKey>> = Vec::with_capacity(rows.len());
            for row in &rows {
                let mut ks = Vec::with_capacity(keys.len());
                for (expr, _) in keys {
                    ks.push(sort_key(params, row, expr)?);
                }
                sort_keys.push(ks);
            }
            // Stable sort: equal keys keep the producer's order.
            let mut order: Vec<usize> = (0..rows.len()).collect();
            let directions: Vec<bool> = keys.iter().map(|(_, desc)| *desc).collect();
            order.sort_by(|&a, &b| {
                for (i, desc) in directions.iter().enumerate() {
                    let ord = sort_keys[a][i].cmp(&sort_keys[b][i]);
                    let ord = if *desc { ord.reverse() } else { ord };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            let mut sorted = Vec::with_capacity(rows.len());
            for i in order {
                sorted.push(std::mem::take(&mut rows[i]));
            }
            Ok(Box::new(sorted.into_iter().map(Ok)))
        }
        Planned::Slice {
            input,
            offset,
            limit,
        } => {
            let inner = execute(params, input)?;
            let taken = limit.unwrap_or(usize::MAX);
            Ok(Box::new(inner.skip(*offset).take(taken)))
        }
        Planned::Group {
            input,
            by,
            aggregates,
        } => execute_group(params, input, by, aggregates),
    }
}

fn execute_node<'v>(params: &ExecParams<'v>, node: &PlanNode) -> Result<RowIter<'v>> {
    match node {
        PlanNode::EmptyScan => Ok(Box::new(std::iter::empty())),
        PlanNode::PatternScan { pattern, .. } => scan_pattern(params, *pattern),
        PlanNode::RangeScan {
            pattern,
            p,
            var,
            lo,
            hi,
            ..
        } => {
            let stream = params.indexes.range_at(params.view, *p, *lo, *hi)?;
            let params_cloned = params.clone();
            let pattern = *pattern;
            let var = *var;
            Ok(Box::new(stream.filter_map(move |triple| {
                match triple {
                    Err(e) => Some(Err(e)),
                    Ok(triple) => {
                        if let Err(e) = params_cloned.guard.check_deadline() {
                            return Some(Err(e));
                        }
                        let mut row = params_cloned.empty_row();
                        match pattern.s {
                            PatSlot::Const(id) if id != triple.s => return None,
                            PatSlot::Const(_) => {}
                            PatSlot::Var(v) => row[v] = Some(triple.s),
                        }
                        row[var] = Some(triple.o);
                        Some(Ok(row))
                    }
                }
            })))
        }
        PlanNode::LeapfrogJoin { patterns, veo, .. } => {
            let exec = LeapfrogExecutor::new(
                params.view,
                params.indexes,
                Rc::clone(&params.guard),
                patterns.clone(),
                veo.clone(),
                params.vars.len(),
            );
            Ok(Box::new(LeapfrogRows { exec }))
        }
        PlanNode::HashJoin {
            left, right, on, ..
        } => {
            let left_rows = execute_node(params, left)?;
            let right_rows: Vec<Row> = execute_node(params, right)?.collect::<Result<_>>()?;
            Ok(hash_join(left_rows, right_rows, on.clone()))
        }
        PlanNode::Filter { expr, input, .. } => {
            let inner = execute_node(params, input)?;
            let params = params.clone();
            let expr = expr.clone();
            Ok(Box::new(inner.filter(move |row| match row {
                Ok(row) => eval_truth(&params, row, &expr),
                Err(_) => true,
            })))
        }
    }
}

struct LeapfrogRows<'v> {
    exec: LeapfrogExecutor<'v>,
}

impl Iterator for LeapfrogRows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.exec.next_binding() {
            Ok(Some(bindings)) => Some(Ok(bindings.into_iter().collect())),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Scan one pattern through the best index, yielding bound rows.
fn scan_pattern<'v>(params: &ExecParams<'v>, pattern: EncodedPattern) -> Result<RowIter<'v>> {
    let lookup = pattern.to_lookup(&[]);
    let stream = params.indexes.lookup_at(params.view, lookup)?;
    let params = params.clone();
    Ok(Box::new(stream.filter_map(move |triple| match triple {
        Err(e) => Some(Err(e)),
        Ok(triple) => {
            if let Err(e) = params.guard.check_deadline() {
                return Some(Err(e));
            }
            bind_pattern(&params, &pattern, &triple).map(Ok)
        }
    })))
}

/// Bind a pattern against a concrete triple; repeated variables must
/// agree.
fn bind_pattern(params: &ExecParams<'_>, pattern: &EncodedPattern, triple: &Triple) -> Option<Row> {
    let mut row = params.empty_row();
    for (slot, value) in [
        (pattern.s, triple.s),
        (pattern.p, triple.p),
        (pattern.o, triple.o),
    ] {
        match slot {
            PatSlot::Const(id) => {
                if id != value {
                    return None;
                }
            }
            PatSlot::Var(v) => match row[v] {
                Some(existing) if existing != value => return None,
                _ => row[v] = Some(value),
            },
        }
    }
    Some(row)
}

/// Hash join: materialised right side keyed on `on`, lazy left probe.
fn hash_join<'v>(left: RowIter<'v>, right: Vec<Row>, on: Vec<usize>) -> RowIter<'v> {
    let mut table: FxHashMap<Vec<Option<TermId>>, Vec<Row>> = FxHashMap::default();
    for row in right {
        let key: Vec<Option<TermId>> = on.iter().map(|&v| row[v]).collect();
        table.entry(key).or_default().push(row);
    }
    Box::new(left.flat_map(move |row| -> Vec<Result<Row>> {
        match row {
            Err(e) => vec![Err(e)],
            Ok(row) => {
                let key: Vec<Option<TermId>> = on.iter().map(|&v| row[v]).collect();
                match table.get(&key) {
                    None => Vec::new(),
                    Some(matches) => matches
                        .iter()
                        .filter_map(|r| merge_rows(&row, r))
                        .map(Ok)
                        .collect(),
                }
            }
        }
    }))
}

/// Left outer join with an optional condition on the merged row.
fn left_join<'v>(
    params: ExecParams<'v>,
    left: RowIter<'v>,
    right: Vec<Row>,
    filter: Option<Expression>,
) -> RowIter<'v> {
    Box::new(left.flat_map(move |row| -> Vec<Result<Row>> {
        match row {
            Err(e) => vec![Err(e)],
            Ok(row) => {
                let mut merged: Vec<Row> = Vec::new();
                for r in &right {
                    if let Some(candidate) = merge_rows(&row, r) {
                        let keep = match &filter {
                            Some(expr) => eval_truth(&params, &candidate, expr),
                            None => true,
                        };
                        if keep {
                            merged.push(candidate);
                        }
                    }
                }
                if merged.is_empty() {
                    vec![Ok(row)]
                } else {
                    merged.into_iter().map(Ok).collect()
                }
            }
        }
    }))
}

/// Compatible-row merge: `None` yields to the other side; bound values
/// must agree.
fn merge_rows(a: &Row, b: &Row) -> Option<Row> {
    let mut out = a.clone();
    for (i, value) in b.iter().enumerate() {
        match (out[i], value) {
            (Some(x), Some(y)) if x != *y => return None,
            (None, Some(y)) => out[i] = Some(*y),
            _ => {}
        }
    }
    Some(out)
}

/// MINUS semantics: the right row removes the left row when they are
/// compatible and share at least one bound variable.
fn minus_removes(left: &Row, right: &Row) -> bool {
    let mut overlap = false;
    for (l, r) in left.iter().zip(right.iter()) {
        match (l, r) {
            (Some(x), Some(y)) => {
                if x != y {
                    return false;
                }
                overlap = true;
            }
            _ => {}
        }
    }
    overlap
}

fn execute_group<'v>(
    params: &ExecParams<'v>,
    input: &Planned,
    by: &[usize],
    aggregates: &[(usize, Aggregate)],
) -> Result<RowIter<'v>> {
    struct Acc {
        count: u64,
        bound_counts: FxHashMap<usize, u64>,
        sums: FxHashMap<usize, (f64, u64, bool)>,
        mins: FxHashMap<usize, (SortKey, Option<TermId>)>,
        maxs: FxHashMap<usize, (SortKey, Option<TermId>)>,
    }

    let rows = execute(params, input)?;
    let mut groups: Vec<(Vec<Option<TermId>>, Acc)> = Vec::new();
    let mut index: FxHashMap<Vec<Option<TermId>>, usize> = FxHashMap::default();

    for row in rows {
        let row = row?;
        params.guard.check_deadline()?;
        let key: Vec<Option<TermId>> = by.iter().map(|&v| row[v]).collect();
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push((
                key,
                Acc {
                    count: 0,
                    bound_counts: FxHashMap::default(),
                    sums: FxHashMap::default(),
                    mins: FxHashMap::default(),
                    maxs: FxHashMap::default(),
                },
            ));
            groups.len() - 1
        });
        let acc = &mut groups[slot].1;
        acc.count += 1;
        for (_, agg) in aggregates {
            let source = match agg {
                Aggregate::Count(None) => continue,
                Aggregate::Count(Some(v))
                | Aggregate::Sum(v)
                | Aggregate::Min(v)
                | Aggregate::Max(v)
                | Aggregate::Avg(v) => v,
            };
            let Some(source_ix) = params.vars.index_of(source) else {
                continue;
            };
            let Some(id) = row[source_ix] else { continue };
            match agg {
                Aggregate::Count(Some(_)) => {
                    *acc.bound_counts.entry(source_ix).or_insert(0) += 1;
                }
                Aggregate::Sum(_) | Aggregate::Avg(_) => {
                    if let Some(n) = numeric_of_id(params, id)? {
                        let entry = acc.sums.entry(source_ix).or_insert((0.0, 0, true));
                        entry.0 += n;
                        entry.1 += 1;
                        entry.2 &= n.fract() == 0.0;
                    }
                }
                Aggregate::Min(_) | Aggregate::Max(_) => {
                    let key = sort_key_of_id(params, Some(id))?;
                    if matches!(agg, Aggregate::Min(_)) {
                        let entry = acc
                            .mins
                            .entry(source_ix)
                            .or_insert((key.clone(), Some(id)));
                        if key < entry.0 {
                            *entry = (key, Some(id));
                        }
                    } else {
                        let entry = acc
                            .maxs
                            .entry(source_ix)
                            .or_insert((key.clone(), Some(id)));
                        if key > entry.0 {
                            *entry = (key, Some(id));
                        }
                    }
                }
                Aggregate::Count(None) => unreachable!(),
            }
        }
    }

    let mut out_rows = Vec::with_capacity(groups.len());
    for (key, acc) in groups {
        let mut row = params.empty_row();
        for (i, &v) in by.iter().enumerate() {
            row[v] = key[i];
        }
        for (target, agg) in aggregates {
            let value: Option<Term> = match agg {
                Aggregate::Count(None) => Some(Term::integer(acc.count as i64)),
                Aggregate::Count(Some(v)) => {
                    let ix = params.vars.index_of(v);
                    let n = ix.and_then(|ix| acc.bound_counts.get(&ix)).copied().unwrap_or(0);
                    Some(Term::integer(n as i64))
                }
                Aggregate::Sum(v) => params.vars.index_of(v).and_then(|ix| {
                    acc.sums.get(&ix).map(|(sum, _, integral)| {
                        if *integral {
                            Term::integer(*sum as i64)
                        } else {
                            Term::double(*sum)
                        }
                    })
                }),
                Aggregate::Avg(v) => params.vars.index_of(v).and_then(|ix| {
                    acc.sums
                        .get(&ix)
                        .filter(|(_, n, _)| *n > 0)
                        .map(|(sum, n, _)| Term::double(sum / *n as f64))
                }),
                Aggregate::Min(v) => {
                    let id = params
                        .vars
                        .index_of(v)
                        .and_then(|ix| acc.mins.get(&ix))
                        .and_then(|(_, id)| *id);
                    if let Some(id) = id {
                        row[*target] = Some(id);
                    }
                    None
                }
                Aggregate::Max(v) => {
                    let id = params
                        .vars
                        .index_of(v)
                        .and_then(|ix| acc.maxs.get(&ix))
                        .and_then(|(_, id)| *id);
                    if let Some(id) = id {
                        row[*target] = Some(id);
                    }
                    None
                }
            };
            if let Some(term) = value {
                row[*target] = Some(intern_term(params, &term)?);
            }
        }
        out_rows.push(Ok(row));
    }
    Ok(Box::new(out_rows.into_iter()))
}

fn certain_vars(plan: &Planned) -> FxHashSet<usize> {
    fn node_vars(node: &PlanNode, out: &mut FxHashSet<usize>) {
        match node {
            PlanNode::EmptyScan => {}
            PlanNode::PatternScan { pattern, .. } => out.extend(pattern.vars()),
            PlanNode::RangeScan { pattern, var, .. } => {
                out.extend(pattern.vars());
                out.insert(*var);
            }
            PlanNode::LeapfrogJoin { patterns, .. } => {
                for p in patterns {
                    out.extend(p.vars());
                }
            }
            PlanNode::HashJoin { left, right, .. } => {
                node_vars(left, out);
                node_vars(right, out);
            }
            PlanNode::Filter { input, .. } => node_vars(input, out),
        }
    }
    let mut out = FxHashSet::default();
    match plan {
        Planned::Bgp(node) => node_vars(node, &mut out),
        Planned::Join(a, b) => {
            out = certain_vars(a);
            out.extend(certain_vars(b));
        }
        Planned::LeftJoin { left, .. } => out = certain_vars(left),
        Planned::Union(a, b) => {
            let right = certain_vars(b);
            out = certain_vars(a).intersection(&right).copied().collect();
        }
        Planned::Minus(a, _) => out = certain_vars(a),
        Planned::Filter { input, .. }
        | Planned::Distinct(input)
        | Planned::OrderBy { input, .. }
        | Planned::Slice { input, .. } => out = certain_vars(input),
        Planned::Extend { input, .. } => out = certain_vars(input),
        Planned::Project { input, vars } => {
            let keep: FxHashSet<usize> = vars.iter().copied().collect();
            out = certain_vars(input).intersection(&keep).copied().collect();
        }
        Planned::Group { by, aggregates, .. } => {
            out.extend(by.iter().copied());
            out.extend(aggregates.iter().map(|(v, _)| *v));
        }
    }
    out
}

// ---------------------------------------------------------------------
// Expression evaluation
// ---------------------------------------------------------------------

/// An evaluated expression value.
#[derive(Debug, Clone)]
pub enum Value {
    /// An encoded term
    Id(TermId),
    /// A raw term (constants, computed strings)
    Term(Term),
    /// A computed number
    Num(f64),
    /// A computed boolean
    Bool(bool),
}

/// Evaluate an expression over a row. `Ok(None)` is SPARQL's evaluation
/// error: unbound input or a type mismatch.
pub fn eval(params: &ExecParams<'_>, row: &Row, expr: &Expression) -> Result<Option<Value>> {
    use Expression::*;
    Ok(match expr {
        Var(name) => params
            .vars
            .index_of(name)
            .and_then(|ix| row.get(ix).copied().flatten())
            .map(Value::Id),
        Const(t) => Some(Value::Term(t.clone())),
        Bound(name) => {
            let bound = params
                .vars
                .index_of(name)
                .and_then(|ix| row.get(ix).copied().flatten())
                .is_some();
            Some(Value::Bool(bound))
        }
        Not(e) => match eval(params, row, e)?.and_then(|v| truth(params, &v)) {
            Some(b) => Some(Value::Bool(!b)),
            None => None,
        },
        And(a, b) => {
            let a = eval(params, row, a)?.and_then(|v| truth(params, &v));
            let b = eval(params, row, b)?.and_then(|v| truth(params, &v));
            match (a, b) {
                (Some(false), _) | (_, Some(false)) => Some(Value::Bool(false)),
                (Some(true), Some(true)) => Some(Value::Bool(true)),
                _ => None,
            }
        }
        Or(a, b) => {
            let a = eval(params, row, a)?.and_then(|v| truth(params, &v));
            let b = eval(params, row, b)?.and_then(|v| truth(params, &v));
            match (a, b) {
                (Some(true), _) | (_, Some(true)) => Some(Value::Bool(true)),
                (Some(false), Some(false)) => Some(Value::Bool(false)),
                _ => None,
            }
        }
        Eq(a, b) => compare(params, row, a, b)?.map(|o| Value::Bool(o == std::cmp::Ordering::Equal)),
        Ne(a, b) => compare(params, row, a, b)?.map(|o| Value::Bool(o != std::cmp::Ordering::Equal)),
        Lt(a, b) => compare(params, row, a, b)?.map(|o| Value::Bool(o == std::cmp::Ordering::Less)),
        Le(a, b) => compare(params, row, a, b)?.map(|o| Value::Bool(o != std::cmp::Ordering::Greater)),
        Gt(a, b) => compare(params, row, a, b)?.map(|o| Value::Bool(o == std::cmp::Ordering::Greater)),
        Ge(a, b) => compare(params, row, a, b)?.map(|o| Value::Bool(o != std::cmp::Ordering::Less)),
        Add(a, b) => arith(params, row, a, b, |x, y| x + y)?,
        Sub(a, b) => arith(params, row, a, b, |x, y| x - y)?,
        Mul(a, b) => arith(params, row, a, b, |x, y| x * y)?,
        Div(a, b) => arith(params, row, a, b, |x, y| x / y)?,
        Call(f, args) => eval_call(params, row, *f, args)?,
    })
}

fn arith(
    params: &ExecParams<'_>,
    row: &Row,
    a: &Expression,
    b: &Expression,
    op: impl Fn(f64, f64) -> f64,
) -> Result<Option<Value>> {
    let (Some(a), Some(b)) = (eval(params, row, a)?, eval(params, row, b)?) else {
        return Ok(None);
    };
    let (Some(x), Some(y)) = (numeric(params, &a)?, numeric(params, &b)?) else {
        return Ok(None);
    };
    Ok(Some(Value::Num(op(x, y))))
}

fn eval_call(
    params: &ExecParams<'_>,
    row: &Row,
    f: Function,
    args: &[Expression],
) -> Result<Option<Value>> {
    let arg = |i: usize| -> Result<Option<Value>> {
        match args.get(i) {
            Some(e) => eval(params, row, e),
            None => Ok(None),
        }
    };
    Ok(match f {
        Function::Now => Some(Value::Term(Term::typed(
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            triad_core::term::xsd::DATE_TIME,
        ))),
        Function::Rand => Some(Value::Num(rand::random::<f64>())),
        Function::Uuid => Some(Value::Term(Term::iri(format!("urn:uuid:{}", Uuid::new_v4())))),
        Function::Str => match arg(0)? {
            Some(v) => value_to_term(params, v)?.map(|t| {
                let lexical = match t {
                    Term::Iri(s) | Term::Blank(s) => s,
                    Term::Typed { lexical, .. } | Term::LangString { lexical, .. } => lexical,
                };
                Value::Term(Term::string(lexical))
            }),
            None => None,
        },
        Function::Lang => match arg(0)? {
            Some(v) => value_to_term(params, v)?.map(|t| {
                let lang = match t {
                    Term::LangString { lang, .. } => lang,
                    _ => String::new(),
                };
                Value::Term(Term::string(lang))
            }),
            None => None,
        },
        Function::Datatype => match arg(0)? {
            Some(v) => match value_to_term(params, v)? {
                Some(Term::Typed { datatype, .. }) => Some(Value::Term(Term::iri(datatype))),
                Some(Term::LangString { .. }) => Some(Value::Term(Term::iri(
                    "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString",
                ))),
                _ => None,
            },
            None => None,
        },
        Function::Abs => match arg(0)? {
            Some(v) => numeric(params, &v)?.map(|n| Value::Num(n.abs())),
            None => None,
        },
        Function::Ceil => match arg(0)? {
            Some(v) => numeric(params, &v)?.map(|n| Value::Num(n.ceil())),
            None => None,
        },
        Function::Floor => match arg(0)? {
            Some(v) => numeric(params, &v)?.map(|n| Value::Num(n.floor())),
            None => None,
        },
        Function::Round => match arg(0)? {
            Some(v) => numeric(params, &v)?.map(|n| Value::Num(n.round())),
            None => None,
        },
        Function::StrLen => match arg(0)? {
            Some(v) => value_to_term(params, v)?.and_then(|t| match t {
                Term::Typed { lexical, .. } | Term::LangString { lexical, .. } => {
                    Some(Value::Num(lexical.chars().count() as f64))
                }
                _ => None,
            }),
            None => None,
        },
        Function::Concat => {
            let mut out = String::new();
            for expr in args {
                let Some(v) = eval(params, row, expr)? else {
                    return Ok(None);
                };
                match value_to_term(params, v)? {
                    Some(Term::Typed { lexical, .. }) | Some(Term::LangString { lexical, .. }) => {
                        out.push_str(&lexical)
                    }
                    _ => return Ok(None),
                }
            }
            Some(Value::Term(Term::string(out)))
        }
    })
}

/// Compare two expressions: numerically when both are numeric,
/// otherwise by term identity/ordering.
fn compare(
    params: &ExecParams<'_>,
    row: &Row,
    a: &Expression,
    b: &Expression,
) -> Result<Option<std::cmp::Ordering>> {
    let (Some(a), Some(b)) = (eval(params, row, a)?, eval(params, row, b)?) else {
        return Ok(None);
    };
    if let (Some(x), Some(y)) = (numeric(params, &a)?, numeric(params, &b)?) {
        return Ok(x.partial_cmp(&y));
    }
    let (Some(ta), Some(tb)) = (value_to_term(params, a)?, value_to_term(params, b)?) else {
        return Ok(None);
    };
    Ok(Some(ta.cmp(&tb)))
}

/// SPARQL effective boolean value, extended over ids.
fn truth(params: &ExecParams<'_>, value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Num(n) => Some(*n != 0.0 && !n.is_nan()),
        Value::Id(id) => {
            if let Some(n) = id.inline_numeric() {
                return Some(n != 0.0);
            }
            if let Some(term) = id.decode_inline() {
                return term_truth(&term);
            }
            params.dict.decode(*id).ok().and_then(|t| term_truth(&t))
        }
        Value::Term(t) => term_truth(t),
    }
}

fn term_truth(term: &Term) -> Option<bool> {
    match term {
        Term::Typed { lexical, datatype } => {
            if datatype == triad_core::term::xsd::BOOLEAN {
                Some(lexical == "true")
            } else if let Some(n) = term.as_f64() {
                Some(n != 0.0 && !n.is_nan())
            } else if datatype == triad_core::term::xsd::STRING {
                Some(!lexical.is_empty())
            } else {
                None
            }
        }
        Term::LangString { lexical, .. } => Some(!lexical.is_empty()),
        _ => None,
    }
}

fn numeric(params: &ExecParams<'_>, value: &Value) -> Result<Option<f64>> {
    Ok(match value {
        Value::Num(n) => Some(*n),
        Value::Bool(_) => None,
        Value::Id(id) => numeric_of_id(params, *id)?,
        Value::Term(t) => t.as_f64(),
    })
}

fn numeric_of_id(params: &ExecParams<'_>, id: TermId) -> Result<Option<f64>> {
    if let Some(n) = id.inline_numeric() {
        return Ok(Some(n));
    }
    if id.is_inline() {
        return Ok(None);
    }
    // Large numeric literals live in the dictionary.
    if id.dict_kind() == Some(TermKind::Literal) {
        return Ok(params.dict.decode(id)?.as_f64());
    }
    Ok(None)
}

fn value_to_term(params: &ExecParams<'_>, value: Value) -> Result<Option<Term>> {
    Ok(match value {
        Value::Term(t) => Some(t),
        Value::Id(id) => Some(params.dict.decode(id)?),
        Value::Num(n) => Some(if n.fract() == 0.0 && n.abs() < 9e15 {
            Term::integer(n as i64)
        } else {
            Term::double(n)
        }),
        Value::Bool(b) => Some(Term::boolean(b)),
    })
}

/// Intern a computed term: inline when possible, dictionary otherwise.
fn intern_term(params: &ExecParams<'_>, term: &Term) -> Result<TermId> {
    if let Some(id) = TermId::try_inline(term) {
        return Ok(id);
    }
    params.dict.encode(term)
}

/// Evaluate an expression to its effective boolean value; errors count
/// as false, per filter semantics.
pub fn eval_truth(params: &ExecParams<'_>, row: &Row, expr: &Expression) -> bool {
    match eval(params, row, expr) {
        Ok(Some(v)) => truth(params, &v).unwrap_or(false),
        _ => false,
    }
}

// ---------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------

/// A totally ordered sort key: unbound < blank < IRI < literal, with
/// numeric literals compared by value.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    /// No value
    Unbound,
    /// Blank node by label
    Blank(String),
    /// IRI by text
    Iri(String),
    /// Numeric literal by value
    Number(f64),
    /// Any other literal by lexical form then suffix
    Literal(String, String),
}

impl SortKey {
    fn rank(&self) -> u8 {
        match self {
            SortKey::Unbound => 0,
            SortKey::Blank(_) => 1,
            SortKey::Iri(_) => 2,
            SortKey::Number(_) => 3,
            SortKey::Literal(..) => 4,
        }
    }
}

impl Eq for SortKey {}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use SortKey::*;
        self.rank().cmp(&other.rank()).then_with(|| match (self, other) {
            (Blank(a), Blank(b)) | (Iri(a), Iri(b)) => a.cmp(b),
            (Number(a), Number(b)) => a.total_cmp(b),
            (Literal(a, da), Literal(b, db)) => a.cmp(b).then_with(|| da.cmp(db)),
            _ => std::cmp::Ordering::Equal,
        })
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn sort_key(params: &ExecParams<'_>, row: &Row, expr: &Expression) -> Result<SortKey> {
    match eval(params, row, expr)? {
        None => Ok(SortKey::Unbound),
        Some(Value::Num(n)) => Ok(SortKey::Number(n)),
        Some(Value::Bool(b)) => Ok(SortKey::Literal(b.to_string(), "bool".into())),
        Some(Value::Id(id)) => sort_key_of_id(params, Some(id)),
        Some(Value::Term(t)) => Ok(term_sort_key(&t)),
    }
}

fn sort_key_of_id(params: &ExecParams<'_>, id: Option<TermId>) -> Result<SortKey> {
    let Some(id) = id else {
        return Ok(SortKey::Unbound);
    };
    if let Some(n) = id.inline_numeric() {
        return Ok(SortKey::Number(n));
    }
    let term = params.dict.decode(id)?;
    Ok(term_sort_key(&term))
}

fn term_sort_key(term: &Term) -> SortKey {
    match term {
        Term::Blank(label) => SortKey::Blank(label.clone()),
        Term::Iri(iri) => SortKey::Iri(iri.clone()),
        t @ Term::Typed { lexical, datatype } => match t.as_f64() {
            Some(n) => SortKey::Number(n),
            None => SortKey::Literal(lexical.clone(), datatype.clone()),
        },
        Term::LangString { lexical, lang } => SortKey::Literal(lexical.clone(), lang.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::build::*;
    use crate::algebra::{Algebra, OrderKey};
    use crate::cost::CostModel;
    use crate::optimizer::Planner;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use triad_core::Triple;
    use triad_stats::Statistics;
    use triad_storage::{Backend, WriteOpts};

    struct Fixture {
        _dir: TempDir,
        backend: Arc<Backend>,
        dict: Dictionary,
        indexes: TripleIndexes,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(Backend::open(dir.path(), true).unwrap());
        let dict = Dictionary::open(Arc::clone(&backend), 2, 100, 100).unwrap();
        let indexes = TripleIndexes::open(Arc::clone(&backend)).unwrap();
        Fixture {
            _dir: dir,
            backend,
            dict,
            indexes,
        }
    }

    fn iri(name: &str) -> Term {
        Term::iri(format!("http://example.org/{name}"))
    }

    fn insert(f: &Fixture, triples: &[(Term, Term, Term)]) {
        let encoded: Vec<Triple> = triples
            .iter()
            .map(|(s, p, o)| {
                let ids = f.dict.encode_many(&[s.clone(), p.clone(), o.clone()]).unwrap();
                Triple::new(ids[0], ids[1], ids[2])
            })
            .collect();
        f.indexes.insert_batch(&encoded, &WriteOpts::default()).unwrap();
    }

    fn run(f: &Fixture, algebra: &Algebra) -> Vec<Vec<Option<Term>>> {
        let vars = Rc::new(VarTable::from_names(algebra.variables()));
        let planner = Planner::new(
            CostModel::new(Arc::new(Statistics::default())),
            &f.dict,
            &f.indexes,
        );
        let plan = planner.plan(algebra, &vars).unwrap();
        let params = ExecParams {
            view: ReadView::Live(&f.backend),
            dict: &f.dict,
            indexes: &f.indexes,
            guard: Rc::new(QueryGuard::new(
                Instant::now() + Duration::from_secs(30),
                1_000_000,
            )),
            vars: Rc::clone(&vars),
        };
        execute(&params, &plan)
            .unwrap()
            .map(|row| {
                row.unwrap()
                    .into_iter()
                    .map(|id| id.map(|id| f.dict.decode(id).unwrap()))
                    .collect()
            })
            .collect()
    }

    fn seed_people(f: &Fixture) {
        let name = iri("name");
        let age = iri("age");
        insert(
            f,
            &[
                (iri("alice"), name.clone(), Term::string("Alice")),
                (iri("alice"), age.clone(), Term::integer(42)),
                (iri("bob"), name.clone(), Term::string("Bob")),
                (iri("bob"), age.clone(), Term::integer(17)),
                (iri("carol"), name.clone(), Term::string("Carol")),
            ],
        );
    }

    #[test]
    fn test_bgp_join_and_filter() {
        let f = fixture();
        seed_people(&f);
        let algebra = Algebra::Filter {
            expr: Expression::Ge(Box::new(var("a")), Box::new(lit(Term::integer(18)))),
            input: Box::new(Algebra::Bgp(vec![
                pat(v("x"), t(iri("name")), v("n")),
                pat(v("x"), t(iri("age")), v("a")),
            ])),
        };
        let rows = run(&f, &algebra);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], Some(Term::string("Alice")));
    }

    #[test]
    fn test_left_join_keeps_unmatched() {
        let f = fixture();
        seed_people(&f);
        let algebra = Algebra::LeftJoin {
            left: Box::new(Algebra::Bgp(vec![pat(v("x"), t(iri("name")), v("n"))])),
            right: Box::new(Algebra::Bgp(vec![pat(v("x"), t(iri("age")), v("a"))])),
            filter: None,
        };
        let rows = run(&f, &algebra);
        assert_eq!(rows.len(), 3);
        // Carol has no age: her ?a stays unbound
        let carol = rows
            .iter()
            .find(|r| r[1] == Some(Term::string("Carol")))
            .unwrap();
        assert_eq!(carol[2], None);
    }

    #[test]
    fn test_union_and_distinct() {
        let f = fixture();
        seed_people(&f);
        let branch = Algebra::Bgp(vec![pat(v("x"), t(iri("name")), v("n"))]);
        let algebra = Algebra::Distinct(Box::new(Algebra::Union(
            Box::new(branch.clone()),
            Box::new(branch),
        )));
        let rows = run(&f, &algebra);
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_minus_removes_compatible() {
        let f = fixture();
        seed_people(&f);
        let algebra = Algebra::Minus(
            Box::new(Algebra::Bgp(vec![pat(v("x"), t(iri("name")), v("n"))])),
            Box::new(Algebra::Bgp(vec![pat(v("x"), t(iri("age")), v("a"))])),
        );
        let rows = run(&f, &algebra);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], Some(Term::string("Carol")));
    }

    #[test]
    fn test_order_by_and_slice() {
        let f = fixture();
        seed_people(&f);
        let algebra = Algebra::Slice {
            input: Box::new(Algebra::OrderBy {
                input: Box::new(Algebra::Bgp(vec![pat(v("x"), t(iri("age")), v("a"))])),
                keys: vec![OrderKey::desc("a")],
            }),
            offset: 0,
            limit: Some(1),
        };
        let rows = run(&f, &algebra);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], Some(Term::integer(42)));
    }

    #[test]
    fn test_extend_binds_computed_value() {
        let f = fixture();
        seed_people(&f);
        let algebra = Algebra::Extend {
            input: Box::new(Algebra::Bgp(vec![pat(v("x"), t(iri("age")), v("a"))])),
            var: "double_age".into(),
            expr: Expression::Mul(Box::new(var("a")), Box::new(lit(Term::integer(2)))),
        };
        let rows = run(&f, &algebra);
        let doubled: Vec<Option<Term>> = rows.iter().map(|r| r[2].clone()).collect();
        assert!(doubled.contains(&Some(Term::integer(84))));
        assert!(doubled.contains(&Some(Term::integer(34))));
    }

    #[test]
    fn test_project_hides_variables() {
        let f = fixture();
        seed_people(&f);
        let algebra = Algebra::Project {
            input: Box::new(Algebra::Bgp(vec![pat(v("x"), t(iri("name")), v("n"))])),
            vars: vec!["n".into()],
        };
        let rows = run(&f, &algebra);
        for row in rows {
            assert_eq!(row[0], None, "?x must be projected away");
            assert!(row[1].is_some());
        }
    }

    #[test]
    fn test_group_aggregates() {
        let f = fixture();
        let team = iri("team");
        let score = iri("score");
        insert(
            &f,
            &[
                (iri("p1"), team.clone(), Term::string("red")),
                (iri("p1"), score.clone(), Term::integer(10)),
                (iri("p2"), team.clone(), Term::string("red")),
                (iri("p2"), score.clone(), Term::integer(20)),
                (iri("p3"), team.clone(), Term::string("blue")),
                (iri("p3"), score.clone(), Term::integer(7)),
            ],
        );
        let algebra = Algebra::Group {
            input: Box::new(Algebra::Bgp(vec![
                pat(v("p"), t(team), v("t")),
                pat(v("p"), t(score), v("s")),
            ])),
            by: vec!["t".into()],
            aggregates: vec![
                ("total".into(), Aggregate::Sum("s".into())),
                ("n".into(), Aggregate::Count(None)),
            ],
        };
        let rows = run(&f, &algebra);
        assert_eq!(rows.len(), 2);
        let red = rows
            .iter()
            .find(|r| r[1] == Some(Term::string("red")))
            .unwrap();
        assert_eq!(red[3], Some(Term::integer(30)));
        assert_eq!(red[4], Some(Term::integer(2)));
    }

    #[test]
    fn test_sort_key_ordering() {
        let unbound = SortKey::Unbound;
        let blank = SortKey::Blank("b".into());
        let iri_key = SortKey::Iri("http://a".into());
        let num = SortKey::Number(4.0);
        let lit = SortKey::Literal("zzz".into(), "dt".into());
        let mut keys = vec![lit.clone(), num.clone(), iri_key.clone(), blank.clone(), unbound.clone()];
        keys.sort();
        assert_eq!(keys, vec![unbound, blank, iri_key, num, lit]);
    }
}
