//! The query algebra consumed from the SPARQL parser seam
//!
//! The textual parser is an external collaborator; this module defines
//! the tree it hands over. Leaves are triple patterns whose slots are
//! either terms or named variables; the operators are the standard
//! SPARQL algebra set. Everything is a plain tagged enum — the engine
//! dispatches by variant match, never by reflection.

use serde::{Deserialize, Serialize};
use triad_core::Term;

/// A pattern slot: a constant term or a named variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TermOrVar {
    /// A constant term
    Term(Term),
    /// A named variable
    Var(String),
}

impl TermOrVar {
    /// The variable name, if this slot is a variable.
    pub fn var(&self) -> Option<&str> {
        match self {
            TermOrVar::Var(name) => Some(name),
            TermOrVar::Term(_) => None,
        }
    }
}

/// A triple pattern over terms and variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pattern {
    /// Subject slot
    pub s: TermOrVar,
    /// Predicate slot
    pub p: TermOrVar,
    /// Object slot
    pub o: TermOrVar,
}

impl Pattern {
    /// Construct a pattern.
    pub fn new(s: TermOrVar, p: TermOrVar, o: TermOrVar) -> Pattern {
        Pattern { s, p, o }
    }

    /// The variable names mentioned, in slot order with duplicates.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        [&self.s, &self.p, &self.o].into_iter().filter_map(|t| t.var())
    }
}

/// Built-in functions. The three non-deterministic ones make a query
/// uncacheable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Function {
    /// Current instant; non-deterministic
    Now,
    /// Random number; non-deterministic
    Rand,
    /// Fresh UUID; non-deterministic
    Uuid,
    /// Lexical form of a term
    Str,
    /// Language tag of a literal
    Lang,
    /// Datatype IRI of a literal
    Datatype,
    /// Absolute value
    Abs,
    /// Round towards positive infinity
    Ceil,
    /// Round towards negative infinity
    Floor,
    /// Round half away from zero
    Round,
    /// Length of the lexical form in characters
    StrLen,
    /// Concatenation of string arguments
    Concat,
}

impl Function {
    /// True when repeated evaluation can differ.
    pub fn is_non_deterministic(self) -> bool {
        matches!(self, Function::Now | Function::Rand | Function::Uuid)
    }
}

/// A filter / bind expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// A variable reference
    Var(String),
    /// A constant term
    Const(Term),
    /// Logical and
    And(Box<Expression>, Box<Expression>),
    /// Logical or
    Or(Box<Expression>, Box<Expression>),
    /// Logical not
    Not(Box<Expression>),
    /// Equality
    Eq(Box<Expression>, Box<Expression>),
    /// Inequality
    Ne(Box<Expression>, Box<Expression>),
    /// Less-than
    Lt(Box<Expression>, Box<Expression>),
    /// Less-or-equal
    Le(Box<Expression>, Box<Expression>),
    /// Greater-than
    Gt(Box<Expression>, Box<Expression>),
    /// Greater-or-equal
    Ge(Box<Expression>, Box<Expression>),
    /// Addition
    Add(Box<Expression>, Box<Expression>),
    /// Subtraction
    Sub(Box<Expression>, Box<Expression>),
    /// Multiplication
    Mul(Box<Expression>, Box<Expression>),
    /// Division
    Div(Box<Expression>, Box<Expression>),
    /// BOUND(?v)
    Bound(String),
    /// A function call
    Call(Function, Vec<Expression>),
}

impl Expression {
    /// True when the expression contains no non-deterministic function.
    pub fn is_deterministic(&self) -> bool {
        match self {
            Expression::Var(_) | Expression::Const(_) | Expression::Bound(_) => true,
            Expression::Not(e) => e.is_deterministic(),
            Expression::And(a, b)
            | Expression::Or(a, b)
            | Expression::Eq(a, b)
            | Expression::Ne(a, b)
            | Expression::Lt(a, b)
            | Expression::Le(a, b)
            | Expression::Gt(a, b)
            | Expression::Ge(a, b)
            | Expression::Add(a, b)
            | Expression::Sub(a, b)
            | Expression::Mul(a, b)
            | Expression::Div(a, b) => a.is_deterministic() && b.is_deterministic(),
            Expression::Call(f, args) => {
                !f.is_non_deterministic() && args.iter().all(|a| a.is_deterministic())
            }
        }
    }

    /// Variable names referenced, in first-occurrence order.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expression::Var(name) | Expression::Bound(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expression::Const(_) => {}
            Expression::Not(e) => e.collect_variables(out),
            Expression::And(a, b)
            | Expression::Or(a, b)
            | Expression::Eq(a, b)
            | Expression::Ne(a, b)
            | Expression::Lt(a, b)
            | Expression::Le(a, b)
            | Expression::Gt(a, b)
            | Expression::Ge(a, b)
            | Expression::Add(a, b)
            | Expression::Sub(a, b)
            | Expression::Mul(a, b)
            | Expression::Div(a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            Expression::Call(_, args) => {
                for a in args {
                    a.collect_variables(out);
                }
            }
        }
    }
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderKey {
    /// Sort expression (usually a variable)
    pub expr: Expression,
    /// Descending order when true
    pub descending: bool,
}

impl OrderKey {
    /// Ascending key on a variable.
    pub fn asc(var: impl Into<String>) -> OrderKey {
        OrderKey {
            expr: Expression::Var(var.into()),
            descending: false,
        }
    }

    /// Descending key on a variable.
    pub fn desc(var: impl Into<String>) -> OrderKey {
        OrderKey {
            expr: Expression::Var(var.into()),
            descending: true,
        }
    }
}

/// An aggregate over a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregate {
    /// COUNT(*) or COUNT(?v)
    Count(Option<String>),
    /// SUM(?v)
    Sum(String),
    /// MIN(?v)
    Min(String),
    /// MAX(?v)
    Max(String),
    /// AVG(?v)
    Avg(String),
}

/// The algebra tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Algebra {
    /// A basic graph pattern: a conjunction of triple patterns
    Bgp(Vec<Pattern>),
    /// Inner join
    Join(Box<Algebra>, Box<Algebra>),
    /// Left outer join with optional join condition
    LeftJoin {
        /// Required side
        left: Box<Algebra>,
        /// Optional side
        right: Box<Algebra>,
        /// Join condition evaluated over the combined row
        filter: Option<Expression>,
    },
    /// Union of two streams
    Union(Box<Algebra>, Box<Algebra>),
    /// Rows of the left with no compatible row on the right
    Minus(Box<Algebra>, Box<Algebra>),
    /// Keep rows satisfying the expression
    Filter {
        /// The condition
        expr: Expression,
        /// Input
        input: Box<Algebra>,
    },
    /// Bind a new variable to an expression (BIND)
    Extend {
        /// Input
        input: Box<Algebra>,
        /// The new variable
        var: String,
        /// Its definition
        expr: Expression,
    },
    /// Keep only the named variables in results
    Project {
        /// Input
        input: Box<Algebra>,
        /// Visible variables
        vars: Vec<String>,
    },
    /// Drop duplicate rows
    Distinct(Box<Algebra>),
    /// Sort rows
    OrderBy {
        /// Input
        input: Box<Algebra>,
        /// Sort keys, most significant first
        keys: Vec<OrderKey>,
    },
    /// LIMIT/OFFSET
    Slice {
        /// Input
        input: Box<Algebra>,
        /// Rows to skip
        offset: usize,
        /// Maximum rows to emit
        limit: Option<usize>,
    },
    /// GROUP BY with aggregates
    Group {
        /// Input
        input: Box<Algebra>,
        /// Grouping variables
        by: Vec<String>,
        /// `(output variable, aggregate)` pairs
        aggregates: Vec<(String, Aggregate)>,
    },
}

impl Algebra {
    /// All variable names, in first-occurrence order.
    pub fn variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn push_var(out: &mut Vec<String>, name: &str) {
        if !out.iter().any(|v| v == name) {
            out.push(name.to_string());
        }
    }

    fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            Algebra::Bgp(patterns) => {
                for p in patterns {
                    for v in p.variables() {
                        Self::push_var(out, v);
                    }
                }
            }
            Algebra::Join(a, b) | Algebra::Union(a, b) | Algebra::Minus(a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            Algebra::LeftJoin { left, right, filter } => {
                left.collect_variables(out);
                right.collect_variables(out);
                if let Some(f) = filter {
                    for v in f.variables() {
                        Self::push_var(out, v);
                    }
                }
            }
            Algebra::Filter { expr, input } => {
                input.collect_variables(out);
                for v in expr.variables() {
                    Self::push_var(out, v);
                }
            }
            Algebra::Extend { input, var, expr } => {
                input.collect_variables(out);
                for v in expr.variables() {
                    Self::push_var(out, v);
                }
                Self::push_var(out, var);
            }
            Algebra::Project { input, vars } => {
                input.collect_variables(out);
                for v in vars {
                    Self::push_var(out, v);
                }
            }
            Algebra::Distinct(input) => input.collect_variables(out),
            Algebra::OrderBy { input, keys } => {
                input.collect_variables(out);
                for k in keys {
                    for v in k.expr.variables() {
                        Self::push_var(out, v);
                    }
                }
            }
            Algebra::Slice { input, .. } => input.collect_variables(out),
            Algebra::Group {
                input,
                by,
                aggregates,
            } => {
                input.collect_variables(out);
                for v in by {
                    Self::push_var(out, v);
                }
                for (v, _) in aggregates {
                    Self::push_var(out, v);
                }
            }
        }
    }

    /// Constant predicate terms mentioned anywhere, for the result-cache
    /// reverse index.
    pub fn constant_predicates(&self) -> Vec<&Term> {
        let mut out = Vec::new();
        self.collect_predicates(&mut out);
        out
    }

    fn collect_predicates<'a>(&'a self, out: &mut Vec<&'a Term>) {
        match self {
            Algebra::Bgp(patterns) => {
                for p in patterns {
                    if let TermOrVar::Term(t) = &p.p {
                        if !out.contains(&t) {
                            out.push(t);
                        }
                    }
                }
            }
            Algebra::Join(a, b) | Algebra::Union(a, b) | Algebra::Minus(a, b) => {
                a.collect_predicates(out);
                b.collect_predicates(out);
            }
            Algebra::LeftJoin { left, right, .. } => {
                left.collect_predicates(out);
                right.collect_predicates(out);
            }
            Algebra::Filter { input, .. }
            | Algebra::Extend { input, .. }
            | Algebra::Project { input, .. }
            | Algebra::Distinct(input)
            | Algebra::OrderBy { input, .. }
            | Algebra::Slice { input, .. }
            | Algebra::Group { input, .. } => input.collect_predicates(out),
        }
    }

    /// True when no non-deterministic function appears anywhere.
    pub fn is_deterministic(&self) -> bool {
        match self {
            Algebra::Bgp(_) => true,
            Algebra::Join(a, b) | Algebra::Union(a, b) | Algebra::Minus(a, b) => {
                a.is_deterministic() && b.is_deterministic()
            }
            Algebra::LeftJoin { left, right, filter } => {
                left.is_deterministic()
                    && right.is_deterministic()
                    && filter.as_ref().map_or(true, |f| f.is_deterministic())
            }
            Algebra::Filter { expr, input } => expr.is_deterministic() && input.is_deterministic(),
            Algebra::Extend { input, expr, .. } => {
                expr.is_deterministic() && input.is_deterministic()
            }
            Algebra::Project { input, .. }
            | Algebra::Distinct(input)
            | Algebra::Slice { input, .. }
            | Algebra::Group { input, .. } => input.is_deterministic(),
            Algebra::OrderBy { input, keys } => {
                input.is_deterministic() && keys.iter().all(|k| k.expr.is_deterministic())
            }
        }
    }
}

/// The query form, determining the result shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryForm {
    /// Bindings
    Select(Algebra),
    /// Boolean: does any solution exist
    Ask(Algebra),
    /// A graph instantiated from a template per solution
    Construct {
        /// The triple template
        template: Vec<Pattern>,
        /// The where clause
        algebra: Algebra,
    },
}

impl QueryForm {
    /// The algebra inside any form.
    pub fn algebra(&self) -> &Algebra {
        match self {
            QueryForm::Select(a) | QueryForm::Ask(a) => a,
            QueryForm::Construct { algebra, .. } => algebra,
        }
    }
}

/// Shorthand constructors used across the tests.
pub mod build {
    use super::*;

    /// Variable slot.
    pub fn v(name: &str) -> TermOrVar {
        TermOrVar::Var(name.to_string())
    }

    /// Constant slot.
    pub fn t(term: Term) -> TermOrVar {
        TermOrVar::Term(term)
    }

    /// Triple pattern.
    pub fn pat(s: TermOrVar, p: TermOrVar, o: TermOrVar) -> Pattern {
        Pattern::new(s, p, o)
    }

    /// Variable expression.
    pub fn var(name: &str) -> Expression {
        Expression::Var(name.to_string())
    }

    /// Constant expression.
    pub fn lit(term: Term) -> Expression {
        Expression::Const(term)
    }
}
