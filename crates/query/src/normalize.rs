//! Query normalisation and cache-key construction
//!
//! Two queries that differ only in variable naming or in the order of
//! patterns inside a BGP should hit the same cache slot. Normalisation
//! therefore:
//!
//! 1. sorts the patterns of every BGP by a canonical key that treats all
//!    variables as equal wildcards (clause order inside a conjunction is
//!    not semantically meaningful; everywhere else order is preserved),
//! 2. renames variables to positional names (`$0`, `$1`, …) in
//!    first-occurrence order over the sorted tree.
//!
//! The cache key is the blake3 hash of the bincode encoding of the
//! normalised form — fixed length and collision-resistant.

use crate::algebra::{Algebra, Expression, OrderKey, Pattern, QueryForm, TermOrVar};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// An opaque, fixed-length result-cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub [u8; 32]);

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "…")
    }
}

/// Whether the result of this query may be cached at all.
pub fn is_cacheable(form: &QueryForm) -> bool {
    form.algebra().is_deterministic()
}

/// The cache key of a query: hash of its normalised form.
pub fn cache_key(form: &QueryForm) -> CacheKey {
    let normalised = normalise(form);
    let bytes = bincode::serialize(&normalised).expect("algebra serialisation is infallible");
    CacheKey(*blake3::hash(&bytes).as_bytes())
}

/// Produce the normalised form of a query.
pub fn normalise(form: &QueryForm) -> QueryForm {
    let sorted = match form {
        QueryForm::Select(a) => QueryForm::Select(sort_bgps(a)),
        QueryForm::Ask(a) => QueryForm::Ask(sort_bgps(a)),
        QueryForm::Construct { template, algebra } => QueryForm::Construct {
            template: template.clone(),
            algebra: sort_bgps(algebra),
        },
    };
    let mut renamer = Renamer::default();
    match &sorted {
        QueryForm::Select(a) => QueryForm::Select(renamer.algebra(a)),
        QueryForm::Ask(a) => QueryForm::Ask(renamer.algebra(a)),
        QueryForm::Construct { template, algebra } => {
            // The where clause drives naming; template vars follow.
            let algebra = renamer.algebra(algebra);
            let template = template.iter().map(|p| renamer.pattern(p)).collect();
            QueryForm::Construct { template, algebra }
        }
    }
}

/// Sort key for one pattern slot with variables collapsed to a wildcard.
fn slot_key(slot: &TermOrVar) -> Vec<u8> {
    match slot {
        TermOrVar::Var(_) => vec![0x00],
        TermOrVar::Term(t) => {
            let mut k = vec![0x01];
            k.extend_from_slice(&t.canonical_bytes());
            k
        }
    }
}

fn pattern_key(p: &Pattern) -> Vec<u8> {
    let mut k = slot_key(&p.s);
    k.push(0xFF);
    k.extend(slot_key(&p.p));
    k.push(0xFF);
    k.extend(slot_key(&p.o));
    k
}

fn sort_bgps(algebra: &Algebra) -> Algebra {
    match algebra {
        Algebra::Bgp(patterns) => {
            let mut sorted = patterns.clone();
            sorted.sort_by_cached_key(pattern_key);
            Algebra::Bgp(sorted)
        }
        Algebra::Join(a, b) => Algebra::Join(Box::new(sort_bgps(a)), Box::new(sort_bgps(b))),
        Algebra::LeftJoin { left, right, filter } => Algebra::LeftJoin {
            left: Box::new(sort_bgps(left)),
            right: Box::new(sort_bgps(right)),
            filter: filter.clone(),
        },
        Algebra::Union(a, b) => Algebra::Union(Box::new(sort_bgps(a)), Box::new(sort_bgps(b))),
        Algebra::Minus(a, b) => Algebra::Minus(Box::new(sort_bgps(a)), Box::new(sort_bgps(b))),
        Algebra::Filter { expr, input } => Algebra::Filter {
            expr: expr.clone(),
            input: Box::new(sort_bgps(input)),
        },
        Algebra::Extend { input, var, expr } => Algebra::Extend {
            input: Box::new(sort_bgps(input)),
            var: var.clone(),
            expr: expr.clone(),
        },
        Algebra::Project { input, vars } => Algebra::Project {
            input: Box::new(sort_bgps(input)),
            vars: vars.clone(),
        },
        Algebra::Distinct(input) => Algebra::Distinct(Box::new(sort_bgps(input))),
        Algebra::OrderBy { input, keys } => Algebra::OrderBy {
            input: Box::new(sort_bgps(input)),
            keys: keys.clone(),
        },
        Algebra::Slice {
            input,
            offset,
            limit,
        } => Algebra::Slice {
            input: Box::new(sort_bgps(input)),
            offset: *offset,
            limit: *limit,
        },
        Algebra::Group {
            input,
            by,
            aggregates,
        } => Algebra::Group {
            input: Box::new(sort_bgps(input)),
            by: by.clone(),
            aggregates: aggregates.clone(),
        },
    }
}

#[derive(Default)]
struct Renamer {
    names: FxHashMap<String, String>,
}

impl Renamer {
    fn rename(&mut self, name: &str) -> String {
        if let Some(n) = self.names.get(name) {
            return n.clone();
        }
        let fresh = format!("${}", self.names.len());
        self.names.insert(name.to_string(), fresh.clone());
        fresh
    }

    fn slot(&mut self, slot: &TermOrVar) -> TermOrVar {
        match slot {
            TermOrVar::Var(name) => TermOrVar::Var(self.rename(name)),
            TermOrVar::Term(t) => TermOrVar::Term(t.clone()),
        }
    }

    fn pattern(&mut self, p: &Pattern) -> Pattern {
        Pattern {
            s: self.slot(&p.s),
            p: self.slot(&p.p),
            o: self.slot(&p.o),
        }
    }

    fn expression(&mut self, e: &Expression) -> Expression {
        use Expression::*;
        let bin = |s: &mut Self, a: &Expression, b: &Expression| {
            (Box::new(s.expression(a)), Box::new(s.expression(b)))
        };
        match e {
            Var(name) => Var(self.rename(name)),
            Const(t) => Const(t.clone()),
            Bound(name) => Bound(self.rename(name)),
            Not(a) => Not(Box::new(self.expression(a))),
            And(a, b) => {
                let (a, b) = bin(self, a, b);
                And(a, b)
            }
            Or(a, b) => {
                let (a, b) = bin(self, a, b);
                Or(a, b)
            }
            Eq(a, b) => {
                let (a, b) = bin(self, a, b);
                Eq(a, b)
            }
            Ne(a, b) => {
                let (a, b) = bin(self, a, b);
                Ne(a, b)
            }
            Lt(a, b) => {
                let (a, b) = bin(self, a, b);
                Lt(a, b)
            }
            Le(a, b) => {
                let (a, b) = bin(self, a, b);
                Le(a, b)
            }
            Gt(a, b) => {
                let (a, b) = bin(self, a, b);
                Gt(a, b)
            }
            Ge(a, b) => {
                let (a, b) = bin(self, a, b);
                Ge(a, b)
            }
            Add(a, b) => {
                let (a, b) = bin(self, a, b);
                Add(a, b)
            }
            Sub(a, b) => {
                let (a, b) = bin(self, a, b);
                Sub(a, b)
            }
            Mul(a, b) => {
                let (a, b) = bin(self, a, b);
                Mul(a, b)
            }
            Div(a, b) => {
                let (a, b) = bin(self, a, b);
                Div(a, b)
            }
            Call(f, args) => Call(*f, args.iter().map(|a| self.expression(a)).collect()),
        }
    }

    fn algebra(&mut self, a: &Algebra) -> Algebra {
        match a {
            Algebra::Bgp(patterns) => {
                Algebra::Bgp(patterns.iter().map(|p| self.pattern(p)).collect())
            }
            Algebra::Join(l, r) => {
                Algebra::Join(Box::new(self.algebra(l)), Box::new(self.algebra(r)))
            }
            Algebra::LeftJoin { left, right, filter } => Algebra::LeftJoin {
                left: Box::new(self.algebra(left)),
                right: Box::new(self.algebra(right)),
                filter: filter.as_ref().map(|f| self.expression(f)),
            },
            Algebra::Union(l, r) => {
                Algebra::Union(Box::new(self.algebra(l)), Box::new(self.algebra(r)))
            }
            Algebra::Minus(l, r) => {
                Algebra::Minus(Box::new(self.algebra(l)), Box::new(self.algebra(r)))
            }
            Algebra::Filter { expr, input } => Algebra::Filter {
                expr: self.expression(expr),
                input: Box::new(self.algebra(input)),
            },
            Algebra::Extend { input, var, expr } => {
                let input = Box::new(self.algebra(input));
                let expr = self.expression(expr);
                Algebra::Extend {
                    input,
                    var: self.rename(var),
                    expr,
                }
            }
            Algebra::Project { input, vars } => {
                let input = Box::new(self.algebra(input));
                Algebra::Project {
                    input,
                    vars: vars.iter().map(|v| self.rename(v)).collect(),
                }
            }
            Algebra::Distinct(input) => Algebra::Distinct(Box::new(self.algebra(input))),
            Algebra::OrderBy { input, keys } => {
                let input = Box::new(self.algebra(input));
                Algebra::OrderBy {
                    input,
                    keys: keys
                        .iter()
                        .map(|k| OrderKey {
                            expr: self.expression(&k.expr),
                            descending: k.descending,
                        })
                        .collect(),
                }
            }
            Algebra::Slice {
                input,
                offset,
                limit,
            } => Algebra::Slice {
                input: Box::new(self.algebra(input)),
                offset: *offset,
                limit: *limit,
            },
            Algebra::Group {
                input,
                by,
                aggregates,
            } => {
                let input = Box::new(self.algebra(input));
                Algebra::Group {
                    input,
                    by: by.iter().map(|v| self.rename(v)).collect(),
                    aggregates: aggregates
                        .iter()
                        .map(|(v, agg)| (self.rename(v), agg.clone()))
                        .collect(),
                }
            }
        }
    }
}
