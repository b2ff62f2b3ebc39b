//! # Triad
//!
//! An embedded, persistent RDF triple store with a SPARQL query engine
//! and forward-chaining rule materialisation.
//!
//! Data lives in a dictionary-encoded storage engine over RocksDB:
//! three redundant triple indices (SPO, POS, OSP) plus a numeric-range
//! index. Queries arrive as parsed algebra trees and run through a
//! cost-based planner with a Leapfrog-Triejoin executor; results can be
//! served from a predicate-aware LRU cache.
//!
//! # Quick Start
//!
//! ```no_run
//! use triad::{Store, StoreOptions, QueryOptions, QueryForm, Algebra, Term};
//! use triad::algebra::build::{pat, t, v};
//!
//! fn main() -> triad::Result<()> {
//!     let store = Store::open("./my-graph".as_ref(), StoreOptions::default())?;
//!
//!     let knows = Term::iri("http://xmlns.com/foaf/0.1/knows");
//!     store.insert(&[
//!         (Term::iri("http://example.org/alice"), knows.clone(),
//!          Term::iri("http://example.org/bob")),
//!     ])?;
//!
//!     // { ?a foaf:knows ?b }
//!     let query = QueryForm::Select(Algebra::Bgp(vec![
//!         pat(v("a"), t(knows), v("b")),
//!     ]));
//!     let results = store.query(&query, &QueryOptions::default())?;
//!     for row in results.decoded_rows()? {
//!         println!("{row:?}");
//!     }
//!     store.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Layering
//!
//! | crate | responsibility |
//! |-------|----------------|
//! | `triad-core` | terms, ids, inline literals, errors, limits |
//! | `triad-storage` | RocksDB backend, dictionary, triple indices, snapshots |
//! | `triad-stats` | statistics collection and the statistics server |
//! | `triad-query` | algebra, planner, leapfrog executor, result cache |
//! | `triad-reason` | semi-naïve rule materialisation |
//! | `triad-engine` | the [`Store`] facade |
//!
//! Only the surface re-exported here is stable.

pub use triad_core::{Error, ErrorKind, Limits, Result, Term, TermId, TermKind, Triple};
pub use triad_engine::{
    Manifest, QueryOptions, QueryResults, Store, StoreOptions, StoreStats,
};
pub use triad_query::algebra;
pub use triad_query::{
    Aggregate, Algebra, CacheStats, CostWeights, Expression, Function, OrderKey, Pattern,
    QueryForm, TermOrVar,
};
pub use triad_reason::{MaterializeOutcome, RuleProfile};
pub use triad_storage::{SnapshotHandle, WriteOpts};
