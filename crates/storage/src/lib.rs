//! Storage layer for Triad
//!
//! This crate implements the dictionary-encoded storage engine over an
//! ordered key-value store (RocksDB):
//!
//! - **Backend**: a column-family wrapper with point ops, atomic write
//!   batches, bounded prefix iterators and snapshots
//! - **Dictionary**: the bidirectional term⇄id mapping, sharded for
//!   parallel writes, with crash-safe id allocation
//! - **TripleIndexes**: the three redundant triple indices (SPO, POS,
//!   OSP) plus the numeric-range index
//! - **SnapshotRegistry**: TTL-tracked snapshot handles with a background
//!   sweeper
//!
//! Key layouts are defined in [`keys`]; all keys are big-endian so that
//! lexicographic order is scan order.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod dictionary;
pub mod index;
pub mod keys;
pub mod snapshots;

pub use backend::{Backend, BatchOp, Cf, OwnedSnapshot, PrefixIter, FIXED_PREFIX_LEN};
pub use dictionary::Dictionary;
pub use index::{
    IndexKind, RangeBound, RangeStream, ReadView, TripleIndexes, TripleSlot, TripleStream,
    WriteOpts,
};
pub use keys::{pack3, unpack3};
pub use snapshots::{SnapshotHandle, SnapshotRegistry};
