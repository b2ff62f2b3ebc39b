//! Core types for the Triad triple store
//!
//! This crate defines the data model shared by every other layer:
//!
//! - [`Term`]: an RDF term (IRI, blank node, typed or language-tagged
//!   literal) with a canonical byte form used as the dictionary key
//! - [`TermId`]: the 64-bit encoded form of a term — either a dictionary
//!   id or an inline id whose bits carry a small literal value
//! - [`Triple`] and [`TriplePattern`]: encoded triples and lookup patterns
//! - sortable double encoding for the numeric-range index
//! - the error taxonomy and [`Limits`] shared across the workspace
//!
//! Nothing in this crate touches storage; it is pure data and codecs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod limits;
pub mod sortable;
pub mod term;
pub mod triple;

pub use error::{Error, ErrorKind, Result};
pub use id::{InlineTag, TermId};
pub use limits::Limits;
pub use sortable::{f64_from_sortable, f64_to_sortable, sortable_bytes};
pub use term::{Term, TermKind};
pub use triple::{Slot, Triple, TriplePattern};
