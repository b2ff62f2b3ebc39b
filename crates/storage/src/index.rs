//! The three triple indices and the numeric-range index
//!
//! Every indexed triple has an entry in SPO, POS and OSP; the three
//! permutations make any single- or double-bound pattern a prefix scan.
//! When the predicate is registered for range indexing and the object is
//! an inline numeric, a fourth entry `p ∥ sort(value) ∥ s → o` lands in
//! `numeric_range`. Insertion and deletion are symmetric and each batch
//! is one atomic KV write.
//!
//! Index selection:
//!
//! | bound | index | prefix |
//! |-------|-------|--------|
//! | S,P,O | SPO | 24 B point check |
//! | S,P | SPO | s ∥ p |
//! | P,O | POS | p ∥ o |
//! | S,O | OSP | o ∥ s |
//! | S | SPO | s |
//! | P | POS | p |
//! | O | OSP | o |
//! | — | SPO | ∅ |

use crate::backend::{Backend, BatchOp, Cf, OwnedSnapshot, PrefixIter};
use crate::keys::{self, meta, TRIPLE_KEY_LEN};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::debug;
use triad_core::{
    f64_to_sortable, Error, Result, Slot, TermId, Triple, TriplePattern,
};

/// One of the three triple index permutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// subject ∥ predicate ∥ object
    Spo,
    /// predicate ∥ object ∥ subject
    Pos,
    /// object ∥ subject ∥ predicate
    Osp,
}

impl IndexKind {
    /// The column family backing this index.
    pub const fn cf(self) -> Cf {
        match self {
            IndexKind::Spo => Cf::Spo,
            IndexKind::Pos => Cf::Pos,
            IndexKind::Osp => Cf::Osp,
        }
    }

    /// The key of a triple in this index.
    pub fn key(self, t: &Triple) -> [u8; TRIPLE_KEY_LEN] {
        match self {
            IndexKind::Spo => keys::spo_key(t),
            IndexKind::Pos => keys::pos_key(t),
            IndexKind::Osp => keys::osp_key(t),
        }
    }

    /// Reassemble a triple from one of this index's keys.
    pub fn triple_from_key(self, key: &[u8]) -> Result<Triple> {
        let (a, b, c) = keys::unpack3(key)?;
        Ok(match self {
            IndexKind::Spo => Triple::new(a, b, c),
            IndexKind::Pos => Triple::new(c, a, b),
            IndexKind::Osp => Triple::new(b, c, a),
        })
    }

    /// The (s, p, o) slot stored at each key position of this index.
    pub const fn slot_order(self) -> [TripleSlot; 3] {
        match self {
            IndexKind::Spo => [TripleSlot::S, TripleSlot::P, TripleSlot::O],
            IndexKind::Pos => [TripleSlot::P, TripleSlot::O, TripleSlot::S],
            IndexKind::Osp => [TripleSlot::O, TripleSlot::S, TripleSlot::P],
        }
    }
}

/// A position within a triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TripleSlot {
    /// Subject
    S,
    /// Predicate
    P,
    /// Object
    O,
}

/// Write options for batch mutations.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOpts {
    /// fsync the WAL on commit
    pub sync: bool,
    /// Bulk mode: commit unsynced; the caller issues one final sync
    pub bulk: bool,
}

impl WriteOpts {
    fn effective_sync(&self) -> bool {
        self.sync && !self.bulk
    }
}

/// A read source: the live backend or a pinned snapshot.
#[derive(Clone, Copy)]
pub enum ReadView<'a> {
    /// Read current state
    Live(&'a Backend),
    /// Read through a snapshot
    Snapshot(&'a OwnedSnapshot),
}

impl<'a> ReadView<'a> {
    /// Point read.
    pub fn get(&self, cf: Cf, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self {
            ReadView::Live(b) => b.get(cf, key),
            ReadView::Snapshot(s) => s.get(cf, key),
        }
    }

    /// Prefix-bounded iterator.
    pub fn prefix_iter(&self, cf: Cf, prefix: &[u8]) -> Result<PrefixIter<'a>> {
        match self {
            ReadView::Live(b) => b.prefix_iter(cf, prefix),
            ReadView::Snapshot(s) => s.prefix_iter(cf, prefix),
        }
    }
}

/// One inclusive/exclusive/unbounded end of a numeric range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeBound {
    /// No bound on this end
    Unbounded,
    /// Bound included
    Inclusive(f64),
    /// Bound excluded
    Exclusive(f64),
}

/// The triple indices over a backend.
pub struct TripleIndexes {
    backend: Arc<Backend>,
    range_predicates: RwLock<FxHashSet<TermId>>,
}

impl TripleIndexes {
    /// Open the indices, loading range-predicate registrations from `meta`.
    pub fn open(backend: Arc<Backend>) -> Result<TripleIndexes> {
        let mut registered = FxHashSet::default();
        let mut iter = backend.prefix_iter(Cf::Meta, meta::RANGE_PRED_PREFIX)?;
        while let Some(key) = iter.key() {
            let id_bytes = &key[meta::RANGE_PRED_PREFIX.len()..];
            let arr: [u8; 8] = id_bytes
                .try_into()
                .map_err(|_| Error::corrupted("malformed range predicate registration"))?;
            registered.insert(TermId::from_be_bytes(arr));
            iter.next()?;
        }
        Ok(TripleIndexes {
            backend,
            range_predicates: RwLock::new(registered),
        })
    }

    /// The backend the indices write through.
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// True when `p` is registered for range indexing.
    pub fn is_range_indexed(&self, p: TermId) -> bool {
        self.range_predicates.read().contains(&p)
    }

    /// The registered range predicates.
    pub fn range_predicates(&self) -> Vec<TermId> {
        self.range_predicates.read().iter().copied().collect()
    }

    /// Register a predicate for range indexing and backfill entries for
    /// already-stored triples with inline-numeric objects.
    pub fn register_range_predicate(&self, p: TermId) -> Result<()> {
        {
            let mut set = self.range_predicates.write();
            if !set.insert(p) {
                return Ok(());
            }
        }
        self.backend.put(Cf::Meta, &meta::range_predicate(p), &[])?;

        // Backfill from POS: every triple with this predicate is under one
        // 8-byte prefix.
        let mut ops = Vec::new();
        let mut iter = self.backend.prefix_iter(Cf::Pos, &p.to_be_bytes())?;
        let mut backfilled = 0usize;
        while let Some(key) = iter.key() {
            let triple = IndexKind::Pos.triple_from_key(key)?;
            if let Some(value) = triple.o.inline_numeric() {
                ops.push(BatchOp::Put {
                    cf: Cf::NumericRange,
                    key: keys::range_key(p, value, triple.s).to_vec(),
                    value: triple.o.to_be_bytes().to_vec(),
                });
                backfilled += 1;
            }
            iter.next()?;
        }
        if !ops.is_empty() {
            self.backend.write_batch(ops, false)?;
        }
        debug!(%p, backfilled, "registered range predicate");
        Ok(())
    }

    /// Insert a batch of triples as one atomic KV write. Returns the
    /// number of triples that were not already present.
    pub fn insert_batch(&self, triples: &[Triple], opts: &WriteOpts) -> Result<usize> {
        let mut ops = Vec::new();
        let mut inserted = 0usize;
        let mut seen: FxHashSet<Triple> = FxHashSet::default();
        for t in triples {
            if !seen.insert(*t) || self.contains(t)? {
                continue;
            }
            inserted += 1;
            for kind in [IndexKind::Spo, IndexKind::Pos, IndexKind::Osp] {
                ops.push(BatchOp::Put {
                    cf: kind.cf(),
                    key: kind.key(t).to_vec(),
                    value: Vec::new(),
                });
            }
            if self.is_range_indexed(t.p) {
                if let Some(value) = t.o.inline_numeric() {
                    ops.push(BatchOp::Put {
                        cf: Cf::NumericRange,
                        key: keys::range_key(t.p, value, t.s).to_vec(),
                        value: t.o.to_be_bytes().to_vec(),
                    });
                }
            }
        }
        if !ops.is_empty() {
            self.backend.write_batch(ops, opts.effective_sync())?;
        }
        Ok(inserted)
    }

    /// Delete a batch of triples symmetrically. Returns how many existed.
    pub fn delete_batch(&self, triples: &[Triple], opts: &WriteOpts) -> Result<usize> {
        let mut ops = Vec::new();
        let mut deleted = 0usize;
        let mut seen: FxHashSet<Triple> = FxHashSet::default();
        for t in triples {
            if !seen.insert(*t) || !self.contains(t)? {
                continue;
            }
            deleted += 1;
            for kind in [IndexKind::Spo, IndexKind::Pos, IndexKind::Osp] {
                ops.push(BatchOp::Delete {
                    cf: kind.cf(),
                    key: kind.key(t).to_vec(),
                });
            }
            // Range entries are keyed by (p, value, s) alone, so deletion
            // needs nothing beyond the triple itself.
            if self.is_range_indexed(t.p) {
                if let Some(value) = t.o.inline_numeric() {
                    ops.push(BatchOp::Delete {
                        cf: Cf::NumericRange,
                        key: keys::range_key(t.p, value, t.s).to_vec(),
                    });
                }
            }
        }
        if !ops.is_empty() {
            self.backend.write_batch(ops, opts.effective_sync())?;
        }
        Ok(deleted)
    }

    /// Whether the exact triple exists (point check on SPO).
    pub fn contains(&self, t: &Triple) -> Result<bool> {
        self.contains_at(ReadView::Live(&self.backend), t)
    }

    /// Existence check through a read view.
    pub fn contains_at(&self, view: ReadView<'_>, t: &Triple) -> Result<bool> {
        Ok(view.get(Cf::Spo, &keys::spo_key(t))?.is_some())
    }

    /// Stream every triple matching the pattern.
    pub fn lookup(&self, pattern: TriplePattern) -> Result<TripleStream<'_>> {
        self.lookup_at(ReadView::Live(&self.backend), pattern)
    }

    /// Stream matches through a read view.
    pub fn lookup_at<'v>(
        &self,
        view: ReadView<'v>,
        pattern: TriplePattern,
    ) -> Result<TripleStream<'v>> {
        if pattern.is_ground() {
            let t = Triple::new(
                pattern.s.bound().expect("ground"),
                pattern.p.bound().expect("ground"),
                pattern.o.bound().expect("ground"),
            );
            let exists = self.contains_at(view, &t)?;
            return Ok(TripleStream::Ground {
                triple: t,
                remaining: exists,
            });
        }
        let (kind, prefix) = Self::access_path(&pattern);
        let iter = view.prefix_iter(kind.cf(), &prefix)?;
        Ok(TripleStream::Scan { iter, kind })
    }

    /// Low-level prefix scan over one index, for the trie iterators.
    pub fn scan_prefix_at<'v>(
        &self,
        view: ReadView<'v>,
        kind: IndexKind,
        prefix: &[u8],
    ) -> Result<PrefixIter<'v>> {
        view.prefix_iter(kind.cf(), prefix)
    }

    /// Stream triples with predicate `p` whose numeric object lies in the
    /// given bounds, in ascending value order.
    pub fn range_at<'v>(
        &self,
        view: ReadView<'v>,
        p: TermId,
        lo: RangeBound,
        hi: RangeBound,
    ) -> Result<RangeStream<'v>> {
        let prefix = p.to_be_bytes().to_vec();
        let mut iter = view.prefix_iter(Cf::NumericRange, &prefix)?;
        if let RangeBound::Inclusive(v) | RangeBound::Exclusive(v) = lo {
            // Jump straight to the first candidate value.
            let mut target = Vec::with_capacity(16);
            target.extend_from_slice(&prefix);
            target.extend_from_slice(&f64_to_sortable(v).to_be_bytes());
            iter.seek(&target)?;
        }
        Ok(RangeStream { iter, p, lo, hi })
    }

    /// Range scan against current state.
    pub fn range(&self, p: TermId, lo: RangeBound, hi: RangeBound) -> Result<RangeStream<'_>> {
        self.range_at(ReadView::Live(&self.backend), p, lo, hi)
    }

    /// The (index, prefix) a pattern scans, per the selection table.
    fn access_path(pattern: &TriplePattern) -> (IndexKind, Vec<u8>) {
        let mut prefix = Vec::with_capacity(16);
        match (pattern.s, pattern.p, pattern.o) {
            (Slot::Bound(s), Slot::Bound(p), _) => {
                prefix.extend_from_slice(&s.to_be_bytes());
                prefix.extend_from_slice(&p.to_be_bytes());
                (IndexKind::Spo, prefix)
            }
            (_, Slot::Bound(p), Slot::Bound(o)) => {
                prefix.extend_from_slice(&p.to_be_bytes());
                prefix.extend_from_slice(&o.to_be_bytes());
                (IndexKind::Pos, prefix)
            }
            (Slot::Bound(s), _, Slot::Bound(o)) => {
                prefix.extend_from_slice(&o.to_be_bytes());
                prefix.extend_from_slice(&s.to_be_bytes());
                (IndexKind::Osp, prefix)
            }
            (Slot::Bound(s), _, _) => {
                prefix.extend_from_slice(&s.to_be_bytes());
                (IndexKind::Spo, prefix)
            }
            (_, Slot::Bound(p), _) => {
                prefix.extend_from_slice(&p.to_be_bytes());
                (IndexKind::Pos, prefix)
            }
            (_, _, Slot::Bound(o)) => {
                prefix.extend_from_slice(&o.to_be_bytes());
                (IndexKind::Osp, prefix)
            }
            _ => (IndexKind::Spo, prefix),
        }
    }
}

impl std::fmt::Debug for TripleIndexes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TripleIndexes")
            .field("range_predicates", &self.range_predicates.read().len())
            .finish()
    }
}

/// A stream of triples matching a pattern.
pub enum TripleStream<'a> {
    /// Prefix scan over one index
    Scan {
        /// Underlying cursor
        iter: PrefixIter<'a>,
        /// Which permutation the keys come from
        kind: IndexKind,
    },
    /// A ground pattern: at most one result
    Ground {
        /// The checked triple
        triple: Triple,
        /// Whether it is still to be yielded
        remaining: bool,
    },
}

impl Iterator for TripleStream<'_> {
    type Item = Result<Triple>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            TripleStream::Ground { triple, remaining } => {
                if *remaining {
                    *remaining = false;
                    Some(Ok(*triple))
                } else {
                    None
                }
            }
            TripleStream::Scan { iter, kind } => {
                let key = iter.key()?;
                let triple = kind.triple_from_key(key);
                if let Err(e) = iter.next() {
                    return Some(Err(e));
                }
                Some(triple)
            }
        }
    }
}

/// A stream over the numeric-range index, ascending by value.
pub struct RangeStream<'a> {
    iter: PrefixIter<'a>,
    p: TermId,
    lo: RangeBound,
    hi: RangeBound,
}

impl RangeStream<'_> {
    fn admits(&self, sortable: u64) -> RangeCheck {
        match self.lo {
            RangeBound::Inclusive(v) if sortable < f64_to_sortable(v) => return RangeCheck::Skip,
            RangeBound::Exclusive(v) if sortable <= f64_to_sortable(v) => return RangeCheck::Skip,
            _ => {}
        }
        match self.hi {
            RangeBound::Inclusive(v) if sortable > f64_to_sortable(v) => RangeCheck::Stop,
            RangeBound::Exclusive(v) if sortable >= f64_to_sortable(v) => RangeCheck::Stop,
            _ => RangeCheck::Yield,
        }
    }
}

enum RangeCheck {
    Yield,
    Skip,
    Stop,
}

impl Iterator for RangeStream<'_> {
    type Item = Result<Triple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.iter.key()?;
            if key.len() != TRIPLE_KEY_LEN {
                return Some(Err(Error::corrupted("malformed range index key")));
            }
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&key[8..16]);
            let sortable = u64::from_be_bytes(buf);
            buf.copy_from_slice(&key[16..24]);
            let s = TermId::from_be_bytes(buf);
            match self.admits(sortable) {
                RangeCheck::Stop => return None,
                RangeCheck::Skip => {
                    if let Err(e) = self.iter.next() {
                        return Some(Err(e));
                    }
                    continue;
                }
                RangeCheck::Yield => {
                    let o = match self.iter.value() {
                        Some(v) if v.len() == 8 => {
                            buf.copy_from_slice(v);
                            TermId::from_be_bytes(buf)
                        }
                        _ => return Some(Err(Error::corrupted("malformed range index value"))),
                    };
                    let triple = Triple::new(s, self.p, o);
                    if let Err(e) = self.iter.next() {
                        return Some(Err(e));
                    }
                    return Some(Ok(triple));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use triad_core::{Term, TermKind};

    fn id(n: u64) -> TermId {
        TermId::from_dict(TermKind::Iri, n)
    }

    fn num(v: i64) -> TermId {
        TermId::try_inline(&Term::integer(v)).unwrap()
    }

    fn open_indexes(dir: &TempDir) -> TripleIndexes {
        let backend = Arc::new(Backend::open(dir.path(), true).unwrap());
        TripleIndexes::open(backend).unwrap()
    }

    fn collect(stream: TripleStream<'_>) -> Vec<Triple> {
        stream.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_lookup_every_specialisation_exactly_once() {
        let dir = TempDir::new().unwrap();
        let ix = open_indexes(&dir);
        let t = Triple::new(id(1), id(2), id(3));
        let noise = [
            Triple::new(id(1), id(2), id(4)),
            Triple::new(id(5), id(2), id(3)),
            Triple::new(id(1), id(6), id(3)),
        ];
        let mut all = vec![t];
        all.extend_from_slice(&noise);
        ix.insert_batch(&all, &WriteOpts::default()).unwrap();

        let b = |x: TermId| Slot::Bound(x);
        let patterns = [
            TriplePattern::new(b(t.s), b(t.p), b(t.o)),
            TriplePattern::new(b(t.s), b(t.p), Slot::Any),
            TriplePattern::new(Slot::Any, b(t.p), b(t.o)),
            TriplePattern::new(b(t.s), Slot::Any, b(t.o)),
            TriplePattern::new(b(t.s), Slot::Any, Slot::Any),
            TriplePattern::new(Slot::Any, b(t.p), Slot::Any),
            TriplePattern::new(Slot::Any, Slot::Any, b(t.o)),
            TriplePattern::any(),
        ];
        for pattern in patterns {
            let found = collect(ix.lookup(pattern).unwrap());
            let hits = found.iter().filter(|x| **x == t).count();
            assert_eq!(hits, 1, "pattern {pattern:?}");
            for other in &found {
                assert!(pattern.matches(other), "stray result for {pattern:?}");
            }
        }
    }

    #[test]
    fn test_insert_delete_symmetric() {
        let dir = TempDir::new().unwrap();
        let ix = open_indexes(&dir);
        let p = id(2);
        ix.register_range_predicate(p).unwrap();
        let t = Triple::new(id(1), p, num(42));
        assert_eq!(ix.insert_batch(&[t], &WriteOpts::default()).unwrap(), 1);
        assert!(ix.contains(&t).unwrap());
        assert_eq!(
            collect(ix.lookup(TriplePattern::any()).unwrap()).len(),
            1
        );
        let in_range: Vec<_> = ix
            .range(p, RangeBound::Unbounded, RangeBound::Unbounded)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(in_range, vec![t]);

        assert_eq!(ix.delete_batch(&[t], &WriteOpts::default()).unwrap(), 1);
        assert!(!ix.contains(&t).unwrap());
        assert!(collect(ix.lookup(TriplePattern::any()).unwrap()).is_empty());
        assert_eq!(
            ix.range(p, RangeBound::Unbounded, RangeBound::Unbounded)
                .unwrap()
                .count(),
            0
        );
    }

    #[test]
    fn test_insert_counts_only_new() {
        let dir = TempDir::new().unwrap();
        let ix = open_indexes(&dir);
        let t = Triple::new(id(1), id(2), id(3));
        assert_eq!(ix.insert_batch(&[t, t], &WriteOpts::default()).unwrap(), 1);
        assert_eq!(ix.insert_batch(&[t], &WriteOpts::default()).unwrap(), 0);
        assert_eq!(ix.delete_batch(&[t], &WriteOpts::default()).unwrap(), 1);
        assert_eq!(ix.delete_batch(&[t], &WriteOpts::default()).unwrap(), 0);
    }

    #[test]
    fn test_range_scan_bounds_and_order() {
        let dir = TempDir::new().unwrap();
        let ix = open_indexes(&dir);
        let p = id(2);
        ix.register_range_predicate(p).unwrap();
        let triples: Vec<Triple> = (0..20)
            .map(|i| Triple::new(id(100 + i), p, num(i as i64 * 10)))
            .collect();
        ix.insert_batch(&triples, &WriteOpts::default()).unwrap();

        let values: Vec<f64> = ix
            .range(p, RangeBound::Inclusive(50.0), RangeBound::Inclusive(120.0))
            .unwrap()
            .map(|r| r.unwrap().o.inline_numeric().unwrap())
            .collect();
        assert_eq!(values, vec![50.0, 60.0, 70.0, 80.0, 90.0, 100.0, 110.0, 120.0]);

        let exclusive: Vec<f64> = ix
            .range(p, RangeBound::Exclusive(50.0), RangeBound::Exclusive(80.0))
            .unwrap()
            .map(|r| r.unwrap().o.inline_numeric().unwrap())
            .collect();
        assert_eq!(exclusive, vec![60.0, 70.0]);

        let open_low: Vec<f64> = ix
            .range(p, RangeBound::Unbounded, RangeBound::Inclusive(20.0))
            .unwrap()
            .map(|r| r.unwrap().o.inline_numeric().unwrap())
            .collect();
        assert_eq!(open_low, vec![0.0, 10.0, 20.0]);
    }

    #[test]
    fn test_unregistered_predicate_gets_no_range_entries() {
        let dir = TempDir::new().unwrap();
        let ix = open_indexes(&dir);
        let p = id(2);
        let t = Triple::new(id(1), p, num(7));
        ix.insert_batch(&[t], &WriteOpts::default()).unwrap();
        assert_eq!(
            ix.range(p, RangeBound::Unbounded, RangeBound::Unbounded)
                .unwrap()
                .count(),
            0
        );
    }

    #[test]
    fn test_register_backfills_existing_triples() {
        let dir = TempDir::new().unwrap();
        let ix = open_indexes(&dir);
        let p = id(2);
        let triples = [
            Triple::new(id(1), p, num(5)),
            Triple::new(id(3), p, id(4)), // non-numeric object, skipped
        ];
        ix.insert_batch(&triples, &WriteOpts::default()).unwrap();
        ix.register_range_predicate(p).unwrap();
        let found: Vec<_> = ix
            .range(p, RangeBound::Unbounded, RangeBound::Unbounded)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(found, vec![triples[0]]);
    }

    #[test]
    fn test_registration_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let p = id(2);
        {
            let ix = open_indexes(&dir);
            ix.register_range_predicate(p).unwrap();
        }
        let ix = open_indexes(&dir);
        assert!(ix.is_range_indexed(p));
    }

    #[test]
    fn test_scan_prefix_low_level() {
        let dir = TempDir::new().unwrap();
        let ix = open_indexes(&dir);
        let triples = [
            Triple::new(id(1), id(2), id(3)),
            Triple::new(id(1), id(2), id(4)),
            Triple::new(id(9), id(2), id(3)),
        ];
        ix.insert_batch(&triples, &WriteOpts::default()).unwrap();
        let backend = Arc::clone(ix.backend());
        let mut prefix = id(1).to_be_bytes().to_vec();
        prefix.extend_from_slice(&id(2).to_be_bytes());
        let mut iter = ix
            .scan_prefix_at(ReadView::Live(&backend), IndexKind::Spo, &prefix)
            .unwrap();
        let mut count = 0;
        while iter.key().is_some() {
            count += 1;
            iter.next().unwrap();
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_lookup_through_snapshot() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(Backend::open(dir.path(), true).unwrap());
        let ix = TripleIndexes::open(Arc::clone(&backend)).unwrap();
        let t1 = Triple::new(id(1), id(2), id(3));
        let t2 = Triple::new(id(4), id(2), id(3));
        ix.insert_batch(&[t1], &WriteOpts::default()).unwrap();
        let snap = OwnedSnapshot::new(Arc::clone(&backend));
        ix.insert_batch(&[t2], &WriteOpts::default()).unwrap();

        let live = collect(ix.lookup(TriplePattern::any()).unwrap());
        assert_eq!(live.len(), 2);
        let pinned: Vec<Triple> = ix
            .lookup_at(ReadView::Snapshot(&snap), TriplePattern::any())
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(pinned, vec![t1]);
    }
}
