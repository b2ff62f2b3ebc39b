//! The Triad store engine
//!
//! This crate assembles the storage, statistics, query and reasoning
//! layers into the [`Store`] facade — the stable programmatic contract
//! of the system. See the root `triad` crate for the public surface.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backup;
pub mod store;

pub use backup::{Manifest, BACKUP_SCHEMA_VERSION};
pub use store::{
    QueryOptions, QueryResults, Store, StoreOptions, StoreStats, DEFAULT_MATERIALIZE_ROUNDS,
};
