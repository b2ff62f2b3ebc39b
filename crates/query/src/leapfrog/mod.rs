//! Leapfrog Triejoin: worst-case-optimal multiway join
//!
//! Three pieces, composed bottom-up:
//!
//! - [`TrieIterator`]: one triple index viewed as a trie, exposing the
//!   u64 values at a fixed level under a fixed prefix with `seek`
//! - [`LeapfrogJoin`]: the multi-way sorted intersection of trie
//!   iterators sharing one join variable
//! - [`LeapfrogExecutor`]: the multi-level state machine that binds
//!   variables in elimination order, backtracking across levels
//!
//! Every seek is counted against the query's iteration budget and every
//! state transition checks the deadline.

pub mod executor;
pub mod join;
pub mod trie;
pub mod veo;

pub use executor::LeapfrogExecutor;
pub use join::LeapfrogJoin;
pub use trie::TrieIterator;
pub use veo::elimination_order;
