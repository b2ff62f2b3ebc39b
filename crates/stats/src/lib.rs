//! Statistics for the Triad query optimizer
//!
//! The collector streams over the triple indices and produces
//! cardinalities, per-predicate occurrence counts and equi-width numeric
//! histograms. A [`StatsServer`] owns the cached snapshot: callers invoke
//! it synchronously with a timeout, a modification counter schedules
//! background rebuilds, and a periodic tick refreshes stale data.
//!
//! The snapshot persists as a single versioned bincode record in the
//! `meta` column family; malformed or unknown records are treated as
//! absent on load.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collector;
pub mod model;
pub mod selectivity;
pub mod server;

pub use collector::collect;
pub use model::{NumericHistogram, Statistics};
pub use selectivity::{predicate_selectivity, range_selectivity};
pub use server::{StatsConfig, StatsServer};
