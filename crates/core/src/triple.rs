//! Encoded triples and lookup patterns

use crate::id::TermId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An encoded triple in the default graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    /// Subject id
    pub s: TermId,
    /// Predicate id
    pub p: TermId,
    /// Object id
    pub o: TermId,
}

impl Triple {
    /// Construct a triple.
    pub const fn new(s: TermId, p: TermId, o: TermId) -> Triple {
        Triple { s, p, o }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.s, self.p, self.o)
    }
}

/// One slot of a lookup pattern: a wildcard or a bound id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Matches any id
    Any,
    /// Matches exactly this id
    Bound(TermId),
}

impl Slot {
    /// The bound id, if any.
    pub fn bound(self) -> Option<TermId> {
        match self {
            Slot::Any => None,
            Slot::Bound(id) => Some(id),
        }
    }

    /// True when the slot is bound.
    pub fn is_bound(self) -> bool {
        matches!(self, Slot::Bound(_))
    }
}

impl From<Option<TermId>> for Slot {
    fn from(v: Option<TermId>) -> Slot {
        match v {
            Some(id) => Slot::Bound(id),
            None => Slot::Any,
        }
    }
}

/// A triple lookup pattern over the three slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriplePattern {
    /// Subject slot
    pub s: Slot,
    /// Predicate slot
    pub p: Slot,
    /// Object slot
    pub o: Slot,
}

impl TriplePattern {
    /// Construct a pattern from three slots.
    pub const fn new(s: Slot, p: Slot, o: Slot) -> TriplePattern {
        TriplePattern { s, p, o }
    }

    /// The fully-wildcard pattern.
    pub const fn any() -> TriplePattern {
        TriplePattern {
            s: Slot::Any,
            p: Slot::Any,
            o: Slot::Any,
        }
    }

    /// Number of bound slots.
    pub fn bound_count(&self) -> usize {
        [self.s, self.p, self.o]
            .iter()
            .filter(|slot| slot.is_bound())
            .count()
    }

    /// True when all three slots are bound.
    pub fn is_ground(&self) -> bool {
        self.bound_count() == 3
    }

    /// Whether the given triple matches this pattern.
    pub fn matches(&self, triple: &Triple) -> bool {
        let slot_ok = |slot: Slot, id: TermId| match slot {
            Slot::Any => true,
            Slot::Bound(b) => b == id,
        };
        slot_ok(self.s, triple.s) && slot_ok(self.p, triple.p) && slot_ok(self.o, triple.o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> TermId {
        TermId::from_u64(n)
    }

    #[test]
    fn test_pattern_matches() {
        let t = Triple::new(id(1), id(2), id(3));
        assert!(TriplePattern::any().matches(&t));
        assert!(TriplePattern::new(Slot::Bound(id(1)), Slot::Any, Slot::Any).matches(&t));
        assert!(TriplePattern::new(Slot::Bound(id(1)), Slot::Bound(id(2)), Slot::Bound(id(3))).matches(&t));
        assert!(!TriplePattern::new(Slot::Bound(id(9)), Slot::Any, Slot::Any).matches(&t));
        assert!(!TriplePattern::new(Slot::Any, Slot::Any, Slot::Bound(id(9))).matches(&t));
    }

    #[test]
    fn test_bound_count() {
        assert_eq!(TriplePattern::any().bound_count(), 0);
        let p = TriplePattern::new(Slot::Bound(id(1)), Slot::Any, Slot::Bound(id(3)));
        assert_eq!(p.bound_count(), 2);
        assert!(!p.is_ground());
        let g = TriplePattern::new(Slot::Bound(id(1)), Slot::Bound(id(2)), Slot::Bound(id(3)));
        assert!(g.is_ground());
    }

    #[test]
    fn test_slot_from_option() {
        assert_eq!(Slot::from(Some(id(5))), Slot::Bound(id(5)));
        assert_eq!(Slot::from(None), Slot::Any);
    }
}
