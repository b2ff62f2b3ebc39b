//! Forward-chaining rule materialisation
//!
//! A semi-naïve fixpoint over encoded triples: each round joins the
//! facts derived in the previous round (the delta) against the full
//! fact set, and only genuinely new conclusions survive into the next
//! delta. Derived triples feed back through the same insert path as
//! asserted ones, so every index stays consistent.
//!
//! The built-in profile covers the RDFS-plus subset of OWL 2 RL:
//! subclass and subproperty closure, domain and range typing,
//! inverse-of, symmetric and transitive properties.

#![warn(missing_docs)]
#![warn(clippy::all)]

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};
use triad_core::{Error, Result, Term, TermId, Triple, TriplePattern};
use triad_storage::{Dictionary, TripleIndexes, WriteOpts};

/// RDF/RDFS/OWL vocabulary used by the built-in rules.
pub mod vocab {
    /// rdf:type
    pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
    /// rdfs:subClassOf
    pub const RDFS_SUB_CLASS_OF: &str = "http://www.w3.org/2000/01/rdf-schema#subClassOf";
    /// rdfs:subPropertyOf
    pub const RDFS_SUB_PROPERTY_OF: &str = "http://www.w3.org/2000/01/rdf-schema#subPropertyOf";
    /// rdfs:domain
    pub const RDFS_DOMAIN: &str = "http://www.w3.org/2000/01/rdf-schema#domain";
    /// rdfs:range
    pub const RDFS_RANGE: &str = "http://www.w3.org/2000/01/rdf-schema#range";
    /// owl:inverseOf
    pub const OWL_INVERSE_OF: &str = "http://www.w3.org/2002/07/owl#inverseOf";
    /// owl:SymmetricProperty
    pub const OWL_SYMMETRIC: &str = "http://www.w3.org/2002/07/owl#SymmetricProperty";
    /// owl:TransitiveProperty
    pub const OWL_TRANSITIVE: &str = "http://www.w3.org/2002/07/owl#TransitiveProperty";
}

/// Which rule set to materialise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleProfile {
    /// Subclass/subproperty closure, domain/range typing, inverse,
    /// symmetric and transitive properties
    RdfsPlus,
}

/// Outcome of a materialisation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterializeOutcome {
    /// Fixpoint rounds executed
    pub iterations: u32,
    /// Triples derived and inserted
    pub derived: usize,
}

/// One slot of a rule atom.
#[derive(Debug, Clone, Copy)]
enum RSlot {
    Var(u8),
    Const(TermId),
}

#[derive(Debug, Clone, Copy)]
struct Atom {
    s: RSlot,
    p: RSlot,
    o: RSlot,
}

#[derive(Debug, Clone)]
struct Rule {
    premises: Vec<Atom>,
    conclusion: Atom,
}

type Bindings = [Option<TermId>; 4];

impl Atom {
    fn matches(&self, t: &Triple, bindings: &Bindings) -> Option<Bindings> {
        let mut next = *bindings;
        for (slot, value) in [(self.s, t.s), (self.p, t.p), (self.o, t.o)] {
            match slot {
                RSlot::Const(id) => {
                    if id != value {
                        return None;
                    }
                }
                RSlot::Var(v) => match next[v as usize] {
                    Some(existing) if existing != value => return None,
                    _ => next[v as usize] = Some(value),
                },
            }
        }
        Some(next)
    }

    fn instantiate(&self, bindings: &Bindings) -> Option<Triple> {
        let resolve = |slot: RSlot| match slot {
            RSlot::Const(id) => Some(id),
            RSlot::Var(v) => bindings[v as usize],
        };
        Some(Triple::new(
            resolve(self.s)?,
            resolve(self.p)?,
            resolve(self.o)?,
        ))
    }

    fn predicate(&self) -> Option<TermId> {
        match self.p {
            RSlot::Const(id) => Some(id),
            RSlot::Var(_) => None,
        }
    }
}

/// Run the fixpoint over the store, feeding derived triples back
/// through the normal insert path.
pub fn materialize(
    dict: &Dictionary,
    indexes: &TripleIndexes,
    profile: RuleProfile,
    max_iterations: u32,
    write_opts: &WriteOpts,
) -> Result<MaterializeOutcome> {
    let rules = build_rules(dict, profile)?;

    // The closure works over an in-memory fact set grouped by
    // predicate; derived facts also go straight back into the store.
    let mut by_predicate: FxHashMap<TermId, Vec<Triple>> = FxHashMap::default();
    let mut all: FxHashSet<Triple> = FxHashSet::default();
    for triple in indexes.lookup(TriplePattern::any())? {
        let triple = triple?;
        by_predicate.entry(triple.p).or_default().push(triple);
        all.insert(triple);
    }

    let mut delta: Vec<Triple> = all.iter().copied().collect();
    let mut iterations = 0u32;
    let mut derived_total = 0usize;

    while !delta.is_empty() {
        if iterations >= max_iterations {
            return Err(Error::max_iterations(max_iterations as u64));
        }
        iterations += 1;

        let mut fresh: FxHashSet<Triple> = FxHashSet::default();
        for rule in &rules {
            derive(rule, &delta, &by_predicate, &all, &mut fresh);
        }
        fresh.retain(|t| all.insert(*t));

        if fresh.is_empty() {
            break;
        }
        let batch: Vec<Triple> = fresh.iter().copied().collect();
        let inserted = indexes.insert_batch(&batch, write_opts)?;
        derived_total += inserted;
        for t in &batch {
            by_predicate.entry(t.p).or_default().push(*t);
        }
        debug!(round = iterations, fresh = batch.len(), "materialisation round");
        delta = batch;
    }

    info!(iterations, derived = derived_total, "materialisation complete");
    Ok(MaterializeOutcome {
        iterations,
        derived: derived_total,
    })
}

/// Evaluate one rule semi-naïvely: each premise in turn is constrained
/// to the delta, the rest join against the full fact set.
fn derive(
    rule: &Rule,
    delta: &[Triple],
    by_predicate: &FxHashMap<TermId, Vec<Triple>>,
    all: &FxHashSet<Triple>,
    out: &mut FxHashSet<Triple>,
) {
    for delta_ix in 0..rule.premises.len() {
        for t in delta {
            let Some(bindings) = rule.premises[delta_ix].matches(t, &[None; 4]) else {
                continue;
            };
            join_rest(rule, delta_ix, 0, bindings, by_predicate, all, out);
        }
    }
}

fn join_rest(
    rule: &Rule,
    delta_ix: usize,
    premise_ix: usize,
    bindings: Bindings,
    by_predicate: &FxHashMap<TermId, Vec<Triple>>,
    all: &FxHashSet<Triple>,
    out: &mut FxHashSet<Triple>,
) {
    if premise_ix == rule.premises.len() {
        if let Some(conclusion) = rule.conclusion.instantiate(&bindings) {
            if !all.contains(&conclusion) {
                out.insert(conclusion);
            }
        }
        return;
    }
    if premise_ix == delta_ix {
        // Already matched against the delta fact.
        return join_rest(rule, delta_ix, premise_ix + 1, bindings, by_predicate, all, out);
    }
    let atom = rule.premises[premise_ix];
    // Candidate facts: grouped by predicate when one is pinned, either
    // by a constant or by an already-bound variable.
    let pinned = atom.predicate().or_else(|| match atom.p {
        RSlot::Var(v) => bindings[v as usize],
        RSlot::Const(_) => None,
    });
    let scan: Box<dyn Iterator<Item = &Triple>> = match pinned {
        Some(p) => match by_predicate.get(&p) {
            Some(list) => Box::new(list.iter()),
            None => return,
        },
        None => Box::new(by_predicate.values().flatten()),
    };
    for t in scan {
        if let Some(next) = atom.matches(t, &bindings) {
            join_rest(rule, delta_ix, premise_ix + 1, next, by_predicate, all, out);
        }
    }
}

fn build_rules(dict: &Dictionary, profile: RuleProfile) -> Result<Vec<Rule>> {
    match profile {
        RuleProfile::RdfsPlus => {}
    }
    let id = |iri: &str| dict.encode(&Term::iri(iri));
    let rdf_type = id(vocab::RDF_TYPE)?;
    let sub_class = id(vocab::RDFS_SUB_CLASS_OF)?;
    let sub_prop = id(vocab::RDFS_SUB_PROPERTY_OF)?;
    let domain = id(vocab::RDFS_DOMAIN)?;
    let range = id(vocab::RDFS_RANGE)?;
    let inverse = id(vocab::OWL_INVERSE_OF)?;
    let symmetric = id(vocab::OWL_SYMMETRIC)?;
    let transitive = id(vocab::OWL_TRANSITIVE)?;

    let v = RSlot::Var;
    let c = RSlot::Const;
    let atom = |s: RSlot, p: RSlot, o: RSlot| Atom { s, p, o };

    Ok(vec![
        // subClassOf transitivity
        Rule {
            premises: vec![
                atom(v(0), c(sub_class), v(1)),
                atom(v(1), c(sub_class), v(2)),
            ],
            conclusion: atom(v(0), c(sub_class), v(2)),
        },
        // type inheritance along subClassOf
        Rule {
            premises: vec![atom(v(0), c(rdf_type), v(1)), atom(v(1), c(sub_class), v(2))],
            conclusion: atom(v(0), c(rdf_type), v(2)),
        },
        // subPropertyOf transitivity
        Rule {
            premises: vec![atom(v(0), c(sub_prop), v(1)), atom(v(1), c(sub_prop), v(2))],
            conclusion: atom(v(0), c(sub_prop), v(2)),
        },
        // property inheritance along subPropertyOf
        Rule {
            premises: vec![atom(v(1), c(sub_prop), v(2)), atom(v(0), v(1), v(3))],
            conclusion: atom(v(0), v(2), v(3)),
        },
        // domain typing
        Rule {
            premises: vec![atom(v(1), c(domain), v(2)), atom(v(0), v(1), v(3))],
            conclusion: atom(v(0), c(rdf_type), v(2)),
        },
        // range typing
        Rule {
            premises: vec![atom(v(1), c(range), v(2)), atom(v(0), v(1), v(3))],
            conclusion: atom(v(3), c(rdf_type), v(2)),
        },
        // inverseOf, both directions
        Rule {
            premises: vec![atom(v(1), c(inverse), v(2)), atom(v(0), v(1), v(3))],
            conclusion: atom(v(3), v(2), v(0)),
        },
        Rule {
            premises: vec![atom(v(1), c(inverse), v(2)), atom(v(0), v(2), v(3))],
            conclusion: atom(v(3), v(1), v(0)),
        },
        // symmetric properties
        Rule {
            premises: vec![
                atom(v(1), c(rdf_type), c(symmetric)),
                atom(v(0), v(1), v(2)),
            ],
            conclusion: atom(v(2), v(1), v(0)),
        },
        // transitive properties
        Rule {
            premises: vec![
                atom(v(1), c(rdf_type), c(transitive)),
                atom(v(0), v(1), v(2)),
                atom(v(2), v(1), v(3)),
            ],
            conclusion: atom(v(0), v(1), v(3)),
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use triad_storage::Backend;

    struct Fixture {
        _dir: TempDir,
        dict: Dictionary,
        indexes: TripleIndexes,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(Backend::open(dir.path(), true).unwrap());
        let dict = Dictionary::open(Arc::clone(&backend), 2, 100, 100).unwrap();
        let indexes = TripleIndexes::open(backend).unwrap();
        Fixture {
            _dir: dir,
            dict,
            indexes,
        }
    }

    fn iri(name: &str) -> Term {
        Term::iri(format!("http://example.org/{name}"))
    }

    fn insert(f: &Fixture, triples: &[(Term, Term, Term)]) {
        let encoded: Vec<Triple> = triples
            .iter()
            .map(|(s, p, o)| {
                let ids = f
                    .dict
                    .encode_many(&[s.clone(), p.clone(), o.clone()])
                    .unwrap();
                Triple::new(ids[0], ids[1], ids[2])
            })
            .collect();
        f.indexes
            .insert_batch(&encoded, &WriteOpts::default())
            .unwrap();
    }

    fn holds(f: &Fixture, s: &Term, p: &Term, o: &Term) -> bool {
        let ids = f
            .dict
            .encode_many(&[s.clone(), p.clone(), o.clone()])
            .unwrap();
        f.indexes
            .contains(&Triple::new(ids[0], ids[1], ids[2]))
            .unwrap()
    }

    #[test]
    fn test_subclass_closure_and_type_inheritance() {
        let f = fixture();
        let sub = Term::iri(vocab::RDFS_SUB_CLASS_OF);
        let ty = Term::iri(vocab::RDF_TYPE);
        insert(
            &f,
            &[
                (iri("Cat"), sub.clone(), iri("Mammal")),
                (iri("Mammal"), sub.clone(), iri("Animal")),
                (iri("felix"), ty.clone(), iri("Cat")),
            ],
        );
        let outcome = materialize(
            &f.dict,
            &f.indexes,
            RuleProfile::RdfsPlus,
            100,
            &WriteOpts::default(),
        )
        .unwrap();
        assert!(outcome.derived >= 3);
        assert!(holds(&f, &iri("Cat"), &sub, &iri("Animal")));
        assert!(holds(&f, &iri("felix"), &ty, &iri("Mammal")));
        assert!(holds(&f, &iri("felix"), &ty, &iri("Animal")));
    }

    #[test]
    fn test_domain_range_and_inverse() {
        let f = fixture();
        let ty = Term::iri(vocab::RDF_TYPE);
        insert(
            &f,
            &[
                (iri("owns"), Term::iri(vocab::RDFS_DOMAIN), iri("Person")),
                (iri("owns"), Term::iri(vocab::RDFS_RANGE), iri("Thing")),
                (iri("owns"), Term::iri(vocab::OWL_INVERSE_OF), iri("ownedBy")),
                (iri("ada"), iri("owns"), iri("lovelace-engine")),
            ],
        );
        materialize(
            &f.dict,
            &f.indexes,
            RuleProfile::RdfsPlus,
            100,
            &WriteOpts::default(),
        )
        .unwrap();
        assert!(holds(&f, &iri("ada"), &ty, &iri("Person")));
        assert!(holds(&f, &iri("lovelace-engine"), &ty, &iri("Thing")));
        assert!(holds(&f, &iri("lovelace-engine"), &iri("ownedBy"), &iri("ada")));
    }

    #[test]
    fn test_transitive_property() {
        let f = fixture();
        insert(
            &f,
            &[
                (
                    iri("partOf"),
                    Term::iri(vocab::RDF_TYPE),
                    Term::iri(vocab::OWL_TRANSITIVE),
                ),
                (iri("finger"), iri("partOf"), iri("hand")),
                (iri("hand"), iri("partOf"), iri("arm")),
                (iri("arm"), iri("partOf"), iri("body")),
            ],
        );
        materialize(
            &f.dict,
            &f.indexes,
            RuleProfile::RdfsPlus,
            100,
            &WriteOpts::default(),
        )
        .unwrap();
        assert!(holds(&f, &iri("finger"), &iri("partOf"), &iri("body")));
        assert!(holds(&f, &iri("finger"), &iri("partOf"), &iri("arm")));
    }

    #[test]
    fn test_fixpoint_terminates_and_is_idempotent() {
        let f = fixture();
        let sym = Term::iri(vocab::OWL_SYMMETRIC);
        insert(
            &f,
            &[
                (iri("nextTo"), Term::iri(vocab::RDF_TYPE), sym),
                (iri("a"), iri("nextTo"), iri("b")),
            ],
        );
        let first = materialize(
            &f.dict,
            &f.indexes,
            RuleProfile::RdfsPlus,
            100,
            &WriteOpts::default(),
        )
        .unwrap();
        assert!(holds(&f, &iri("b"), &iri("nextTo"), &iri("a")));
        let second = materialize(
            &f.dict,
            &f.indexes,
            RuleProfile::RdfsPlus,
            100,
            &WriteOpts::default(),
        )
        .unwrap();
        assert_eq!(second.derived, 0, "second run must derive nothing; {first:?}");
    }

    #[test]
    fn test_iteration_cap() {
        let f = fixture();
        // A long subclass chain needs several rounds to close
        let sub = Term::iri(vocab::RDFS_SUB_CLASS_OF);
        let chain: Vec<(Term, Term, Term)> = (0..20)
            .map(|i| (iri(&format!("c{i}")), sub.clone(), iri(&format!("c{}", i + 1))))
            .collect();
        insert(&f, &chain);
        let err = materialize(
            &f.dict,
            &f.indexes,
            RuleProfile::RdfsPlus,
            1,
            &WriteOpts::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "max_iterations_exceeded");
    }
}
