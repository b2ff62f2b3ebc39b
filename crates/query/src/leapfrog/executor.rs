//! The multi-level leapfrog executor
//!
//! An explicit `{descend | advance | backtrack}` state machine over a
//! stack of levels, one per variable of the elimination order. Each
//! level owns the leapfrog join for its variable; levels are held by
//! value and replaced wholesale on backtrack, so no iterator outlives
//! its level.
//!
//! Index and prefix for each `(pattern, position)` pair follow the
//! longest-contiguous-bound-prefix rule: among SPO, POS and OSP, pick
//! the index where the target position sits deepest with every earlier
//! key component bound (constant or already-eliminated variable), ties
//! broken in SPO → POS → OSP order. A pattern whose subject is the only
//! binding for an object target therefore degenerates to a level-0 scan
//! that the leapfrog filters — deliberately suboptimal but correct.

use crate::leapfrog::join::LeapfrogJoin;
use crate::leapfrog::trie::TrieIterator;
use crate::plan::{EncodedPattern, PatSlot, QueryGuard};
use std::rc::Rc;
use triad_core::{Result, TermId, Triple};
use triad_storage::{IndexKind, ReadView, TripleIndexes, TripleSlot};

struct Level<'v> {
    var: usize,
    join: LeapfrogJoin<'v>,
}

enum Step {
    Descend(usize),
    Advance(usize),
    Backtrack(isize),
}

/// The multi-level executor for one BGP.
pub struct LeapfrogExecutor<'v> {
    view: ReadView<'v>,
    indexes: &'v TripleIndexes,
    guard: Rc<QueryGuard>,
    patterns: Vec<EncodedPattern>,
    veo: Vec<usize>,
    levels: Vec<Level<'v>>,
    bindings: Vec<Option<TermId>>,
    initialized: bool,
    exhausted: bool,
}

impl<'v> LeapfrogExecutor<'v> {
    /// Build an executor. `var_count` sizes the binding vector; `veo`
    /// must cover exactly the variables the patterns mention.
    pub fn new(
        view: ReadView<'v>,
        indexes: &'v TripleIndexes,
        guard: Rc<QueryGuard>,
        patterns: Vec<EncodedPattern>,
        veo: Vec<usize>,
        var_count: usize,
    ) -> LeapfrogExecutor<'v> {
        LeapfrogExecutor {
            view,
            indexes,
            guard,
            patterns,
            veo,
            levels: Vec::new(),
            bindings: vec![None; var_count],
            initialized: false,
            exhausted: false,
        }
    }

    /// Release every iterator in the stack.
    pub fn close(&mut self) {
        self.levels.clear();
        self.exhausted = true;
    }

    /// Drive the state machine to the next full binding.
    pub fn next_binding(&mut self) -> Result<Option<Vec<Option<TermId>>>> {
        if self.exhausted {
            return Ok(None);
        }
        let mut step = if !self.initialized {
            self.initialized = true;
            if !self.ground_patterns_hold()? {
                self.exhausted = true;
                return Ok(None);
            }
            Step::Descend(0)
        } else if self.levels.is_empty() {
            // No pattern variables: the single empty solution was yielded
            self.exhausted = true;
            return Ok(None);
        } else {
            Step::Advance(self.levels.len() - 1)
        };

        loop {
            self.guard.check_deadline()?;
            step = match step {
                Step::Descend(i) if i == self.veo.len() => {
                    return Ok(Some(self.bindings.clone()));
                }
                Step::Descend(i) => {
                    let var = self.veo[i];
                    let mut join = self.build_join(var)?;
                    match join.search(&self.guard)? {
                        Some(value) => {
                            self.bindings[var] = Some(TermId::from_u64(value));
                            self.levels.push(Level { var, join });
                            Step::Descend(i + 1)
                        }
                        None => Step::Backtrack(i as isize - 1),
                    }
                }
                Step::Advance(i) => {
                    // Discard all deeper levels and their bindings first.
                    while self.levels.len() > i + 1 {
                        let level = self.levels.pop().expect("level stack underflow");
                        self.bindings[level.var] = None;
                    }
                    let guard = Rc::clone(&self.guard);
                    match self.levels[i].join.next(&guard)? {
                        Some(value) => {
                            let var = self.levels[i].var;
                            self.bindings[var] = Some(TermId::from_u64(value));
                            Step::Descend(i + 1)
                        }
                        None => {
                            let level = self.levels.pop().expect("level stack underflow");
                            self.bindings[level.var] = None;
                            Step::Backtrack(i as isize - 1)
                        }
                    }
                }
                Step::Backtrack(i) if i < 0 => {
                    self.exhausted = true;
                    return Ok(None);
                }
                Step::Backtrack(i) => Step::Advance(i as usize),
            };
        }
    }

    /// Check fully-constant patterns once, before any level is built.
    fn ground_patterns_hold(&self) -> Result<bool> {
        for pattern in self.patterns.iter().filter(|p| p.is_ground()) {
            let triple = match (pattern.s, pattern.p, pattern.o) {
                (PatSlot::Const(s), PatSlot::Const(p), PatSlot::Const(o)) => Triple::new(s, p, o),
                _ => unreachable!("is_ground"),
            };
            if !self.indexes.contains_at(self.view, &triple)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// One trie iterator per (pattern, position) pair mentioning `var`.
    fn build_join(&self, var: usize) -> Result<LeapfrogJoin<'v>> {
        let mut iters = Vec::new();
        for pattern in &self.patterns {
            for pos in pattern.positions_of(var) {
                let (index, prefix, level) = choose_access(pattern, pos, &self.bindings);
                iters.push(TrieIterator::new(self.view, index, prefix, level)?);
            }
        }
        Ok(LeapfrogJoin::new(iters))
    }
}

impl Drop for LeapfrogExecutor<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

fn resolved(slot: PatSlot, bindings: &[Option<TermId>]) -> Option<TermId> {
    match slot {
        PatSlot::Const(id) => Some(id),
        PatSlot::Var(v) => bindings.get(v).copied().flatten(),
    }
}

/// The access path for iterating `pos` of `pattern` given what is bound.
fn choose_access(
    pattern: &EncodedPattern,
    pos: TripleSlot,
    bindings: &[Option<TermId>],
) -> (IndexKind, Vec<u8>, usize) {
    let mut best: Option<(IndexKind, Vec<u8>, usize)> = None;
    for index in [IndexKind::Spo, IndexKind::Pos, IndexKind::Osp] {
        let order = index.slot_order();
        let target_level = order
            .iter()
            .position(|&slot| slot == pos)
            .expect("every position appears in every index");
        let mut prefix = Vec::with_capacity(target_level * 8);
        let mut viable = true;
        for &earlier in &order[..target_level] {
            match resolved(pattern.slot_at(earlier), bindings) {
                Some(id) => prefix.extend_from_slice(&id.to_be_bytes()),
                None => {
                    viable = false;
                    break;
                }
            }
        }
        if !viable {
            continue;
        }
        let better = match &best {
            None => true,
            Some((_, _, level)) => target_level > *level,
        };
        if better {
            best = Some((index, prefix, target_level));
        }
    }
    best.expect("a level-0 access path always exists")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use triad_core::{Error, Term, TermKind};
    use triad_storage::{Backend, TripleIndexes, WriteOpts};

    fn id(n: u64) -> TermId {
        TermId::from_dict(TermKind::Iri, n)
    }

    fn num(v: i64) -> TermId {
        TermId::try_inline(&Term::integer(v)).unwrap()
    }

    const KNOWS: u64 = 1;
    const AGE: u64 = 2;

    fn setup() -> (TempDir, Arc<Backend>, TripleIndexes) {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(Backend::open(dir.path(), true).unwrap());
        let ix = TripleIndexes::open(Arc::clone(&backend)).unwrap();
        let mut triples = Vec::new();
        // knows edges i → j for i < j < 12; ages cycle through 20..25
        for i in 0..12u64 {
            for j in (i + 1)..12u64 {
                triples.push(Triple::new(id(100 + i), id(KNOWS), id(100 + j)));
            }
            triples.push(Triple::new(id(100 + i), id(AGE), num(20 + (i % 5) as i64)));
        }
        ix.insert_batch(&triples, &WriteOpts::default()).unwrap();
        (dir, backend, ix)
    }

    fn guard() -> Rc<QueryGuard> {
        Rc::new(QueryGuard::new(
            Instant::now() + Duration::from_secs(30),
            1_000_000,
        ))
    }

    fn run(exec: &mut LeapfrogExecutor<'_>) -> Vec<Vec<Option<TermId>>> {
        let mut out = Vec::new();
        while let Some(row) = exec.next_binding().unwrap() {
            out.push(row);
        }
        out
    }

    #[test]
    fn test_three_way_join() {
        let (_dir, backend, ix) = setup();
        // ?x knows ?y . ?y knows ?z . ?y age 22  — vars x=0 y=1 z=2
        let patterns = vec![
            EncodedPattern {
                s: PatSlot::Var(0),
                p: PatSlot::Const(id(KNOWS)),
                o: PatSlot::Var(1),
            },
            EncodedPattern {
                s: PatSlot::Var(1),
                p: PatSlot::Const(id(KNOWS)),
                o: PatSlot::Var(2),
            },
            EncodedPattern {
                s: PatSlot::Var(1),
                p: PatSlot::Const(id(AGE)),
                o: PatSlot::Const(num(22)),
            },
        ];
        let veo = vec![1, 0, 2];
        let mut exec = LeapfrogExecutor::new(
            ReadView::Live(&backend),
            &ix,
            guard(),
            patterns,
            veo,
            3,
        );
        let rows = run(&mut exec);
        // Expected: y ∈ {102, 107} (ages 22), x < y < z < 112
        let mut expected = Vec::new();
        for y in [2u64, 7] {
            for x in 0..y {
                for z in (y + 1)..12 {
                    expected.push((id(100 + x), id(100 + y), id(100 + z)));
                }
            }
        }
        assert_eq!(rows.len(), expected.len());
        for row in &rows {
            let triple = (row[0].unwrap(), row[1].unwrap(), row[2].unwrap());
            assert!(expected.contains(&triple), "unexpected {triple:?}");
        }
    }

    #[test]
    fn test_single_pattern_enumeration() {
        let (_dir, backend, ix) = setup();
        // ?x age 22
        let patterns = vec![EncodedPattern {
            s: PatSlot::Var(0),
            p: PatSlot::Const(id(AGE)),
            o: PatSlot::Const(num(22)),
        }];
        let mut exec = LeapfrogExecutor::new(
            ReadView::Live(&backend),
            &ix,
            guard(),
            patterns,
            vec![0],
            1,
        );
        let rows = run(&mut exec);
        let got: Vec<TermId> = rows.iter().map(|r| r[0].unwrap()).collect();
        assert_eq!(got, vec![id(102), id(107)]);
    }

    #[test]
    fn test_ground_pattern_gates_execution() {
        let (_dir, backend, ix) = setup();
        // ?x age 22 . <100> knows <199>  (the ground pattern is absent)
        let patterns = vec![
            EncodedPattern {
                s: PatSlot::Var(0),
                p: PatSlot::Const(id(AGE)),
                o: PatSlot::Const(num(22)),
            },
            EncodedPattern {
                s: PatSlot::Const(id(100)),
                p: PatSlot::Const(id(KNOWS)),
                o: PatSlot::Const(id(199)),
            },
        ];
        let mut exec = LeapfrogExecutor::new(
            ReadView::Live(&backend),
            &ix,
            guard(),
            patterns,
            vec![0],
            1,
        );
        assert!(run(&mut exec).is_empty());
    }

    #[test]
    fn test_no_variables_yields_once() {
        let (_dir, backend, ix) = setup();
        let patterns = vec![EncodedPattern {
            s: PatSlot::Const(id(100)),
            p: PatSlot::Const(id(KNOWS)),
            o: PatSlot::Const(id(101)),
        }];
        let mut exec =
            LeapfrogExecutor::new(ReadView::Live(&backend), &ix, guard(), patterns, vec![], 0);
        assert!(exec.next_binding().unwrap().is_some());
        assert!(exec.next_binding().unwrap().is_none());
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let (_dir, backend, ix) = setup();
        let patterns = vec![EncodedPattern {
            s: PatSlot::Var(0),
            p: PatSlot::Const(id(KNOWS)),
            o: PatSlot::Var(1),
        }];
        let expired = Rc::new(QueryGuard::new(
            Instant::now() - Duration::from_millis(1),
            1_000_000,
        ));
        let mut exec = LeapfrogExecutor::new(
            ReadView::Live(&backend),
            &ix,
            expired,
            patterns,
            vec![0, 1],
            2,
        );
        let err = exec.next_binding().unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn test_access_path_selection() {
        let bindings: Vec<Option<TermId>> = vec![None, None];
        // target S with only P constant: SPO, empty prefix, level 0
        let p_only = EncodedPattern {
            s: PatSlot::Var(0),
            p: PatSlot::Const(id(5)),
            o: PatSlot::Var(1),
        };
        let (index, prefix, level) = choose_access(&p_only, TripleSlot::S, &bindings);
        assert_eq!((index, prefix.len(), level), (IndexKind::Spo, 0, 0));

        // target S with P and O bound: POS, p∥o, level 2
        let po = EncodedPattern {
            s: PatSlot::Var(0),
            p: PatSlot::Const(id(5)),
            o: PatSlot::Const(id(6)),
        };
        let (index, prefix, level) = choose_access(&po, TripleSlot::S, &bindings);
        assert_eq!((index, prefix.len(), level), (IndexKind::Pos, 16, 2));

        // target O with S bound via bindings: OSP would need O first; SPO
        // needs S,P; only S is bound → OSP level 0
        let with_s = EncodedPattern {
            s: PatSlot::Var(0),
            p: PatSlot::Var(1),
            o: PatSlot::Var(2),
        };
        let bound_s: Vec<Option<TermId>> = vec![Some(id(9)), None, None];
        let (index, _prefix, level) = choose_access(&with_s, TripleSlot::O, &bound_s);
        assert_eq!((index, level), (IndexKind::Osp, 0));

        // target O with S and P bound: SPO s∥p level 2
        let (index, prefix, level) = choose_access(
            &with_s,
            TripleSlot::O,
            &[Some(id(9)), Some(id(5)), None],
        );
        assert_eq!((index, prefix.len(), level), (IndexKind::Spo, 16, 2));
    }
}
