//! SPARQL query planning and execution for Triad
//!
//! The crate takes a parsed algebra tree (the textual parser is an
//! external collaborator) and turns it into results:
//!
//! - [`algebra`]: the algebra consumed from the parser seam
//! - [`normalize`]: query normalisation and cache keys
//! - [`cost`] + [`optimizer`]: selectivity estimation, join reordering,
//!   filter push-down, range-index rewrites, leapfrog-vs-hash
//! - [`leapfrog`]: trie iterators, multiway intersection, the variable
//!   elimination order, and the multi-level backtracking executor
//! - [`exec`]: binding streams and the stream-transform operators
//! - [`cache`]: the LRU + TTL + predicate-reverse-index result cache

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algebra;
pub mod cache;
pub mod cost;
pub mod exec;
pub mod leapfrog;
pub mod normalize;
pub mod optimizer;
pub mod plan;

pub use algebra::{
    Aggregate, Algebra, Expression, Function, OrderKey, Pattern, QueryForm, TermOrVar,
};
pub use cache::{CacheConfig, CacheStats, CachedValue, ResultCache};
pub use cost::{CostModel, CostWeights};
pub use exec::{execute, ExecParams, Row, RowIter};
pub use leapfrog::{elimination_order, LeapfrogExecutor, LeapfrogJoin, TrieIterator};
pub use normalize::{cache_key, is_cacheable, normalise, CacheKey};
pub use optimizer::{Planned, Planner};
pub use plan::{EncodedPattern, PatSlot, PlanNode, QueryGuard, VarTable};
