//! The bidirectional term ⇄ id dictionary
//!
//! Encoding goes through three tiers, cheapest first:
//!
//! 1. **Inline**: small numeric, temporal and boolean literals encode into
//!    the id bits by pure computation and never touch storage.
//! 2. **Read cache**: a process-wide lock-free map from canonical term
//!    bytes to ids, populated write-through after allocation.
//! 3. **Shard writer**: unseen terms route to a shard chosen by a stable
//!    hash of the canonical bytes. Each shard is a serialised writer that
//!    hands out ids from pre-allocated blocks and commits both dictionary
//!    mappings in one batch.
//!
//! ## Crash safety
//!
//! Each kind subspace (IRI / blank / literal) has a global counter whose
//! ceiling is persisted in `meta` a safety margin ahead of the high-water
//! mark, and the persist happens *before* any id under the new ceiling is
//! handed out. On open the counter resumes at
//! `max(persisted ceiling, scanned high-water + 1) + margin`, so a crash
//! between allocation and commit can waste ids but never reuse one.

use crate::backend::{Backend, BatchOp, Cf};
use crate::keys::meta;
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::Hasher;
use std::sync::Arc;
use tracing::debug;
use triad_core::{Error, Result, Term, TermId, TermKind};

const KINDS: [TermKind; 3] = [TermKind::Iri, TermKind::Blank, TermKind::Literal];

fn kind_index(kind: TermKind) -> usize {
    match kind {
        TermKind::Iri => 0,
        TermKind::Blank => 1,
        TermKind::Literal => 2,
    }
}

/// An id block handed to a shard: `next..end` within one kind subspace.
#[derive(Debug, Clone, Copy, Default)]
struct IdBlock {
    next: u64,
    end: u64,
}

impl IdBlock {
    fn take(&mut self) -> Option<u64> {
        if self.next < self.end {
            let id = self.next;
            self.next += 1;
            Some(id)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct ShardState {
    blocks: [IdBlock; 3],
}

#[derive(Debug)]
struct KindCounter {
    next: u64,
    persisted_ceiling: u64,
}

/// The term dictionary.
pub struct Dictionary {
    backend: Arc<Backend>,
    cache: DashMap<Vec<u8>, TermId>,
    shards: Vec<Mutex<ShardState>>,
    counters: [Mutex<KindCounter>; 3],
    block_size: u64,
    safety_margin: u64,
}

impl Dictionary {
    /// Open the dictionary over a backend, recovering counters.
    ///
    /// `shard_count` defaults to the number of hardware threads when zero.
    pub fn open(
        backend: Arc<Backend>,
        shard_count: usize,
        block_size: u64,
        safety_margin: u64,
    ) -> Result<Dictionary> {
        let shard_count = if shard_count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            shard_count
        };

        let mut counters = Vec::with_capacity(3);
        for kind in KINDS {
            let persisted = match backend.get(Cf::Meta, meta::dict_counter(kind))? {
                Some(bytes) => decode_counter(&bytes)?,
                None => 0,
            };
            let scanned = scan_high_water(&backend, kind)?;
            let resume = persisted.max(scanned.map_or(0, |hw| hw + 1));
            // Margin covers ids that may have been handed out but whose
            // mappings never committed before the crash.
            let next = resume.saturating_add(safety_margin);
            debug!(?kind, persisted, ?scanned, next, "dictionary counter recovered");
            counters.push(Mutex::new(KindCounter {
                next,
                persisted_ceiling: persisted.max(next),
            }));
        }
        let counters: [Mutex<KindCounter>; 3] = counters
            .try_into()
            .map_err(|_| Error::internal("counter initialisation"))?;

        Ok(Dictionary {
            backend,
            cache: DashMap::new(),
            shards: (0..shard_count)
                .map(|_| Mutex::new(ShardState::default()))
                .collect(),
            counters,
            block_size,
            safety_margin,
        })
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Encode every term, allocating ids for unseen ones. Output order
    /// matches input order. Fails without leaking ids beyond the safety
    /// margin when the backend errors.
    pub fn encode_many(&self, terms: &[Term]) -> Result<Vec<TermId>> {
        let mut out = vec![TermId::default(); terms.len()];
        let mut misses: Vec<Vec<(usize, Vec<u8>, TermKind)>> =
            (0..self.shards.len()).map(|_| Vec::new()).collect();

        for (i, term) in terms.iter().enumerate() {
            term.validate()?;
            if let Some(id) = TermId::try_inline(term) {
                out[i] = id;
                continue;
            }
            let bytes = term.canonical_bytes();
            if let Some(hit) = self.cache.get(&bytes) {
                out[i] = *hit;
                continue;
            }
            let shard = self.shard_for(&bytes);
            misses[shard].push((i, bytes, term.kind()));
        }

        let pending: Vec<(usize, Vec<(usize, Vec<u8>, TermKind)>)> = misses
            .into_iter()
            .enumerate()
            .filter(|(_, items)| !items.is_empty())
            .collect();

        if pending.is_empty() {
            return Ok(out);
        }

        // Fan out one task per shard, gather, and surface the first error.
        let results: Vec<Result<Vec<(usize, TermId)>>> = if pending.len() == 1 {
            let (shard, items) = pending.into_iter().next().expect("non-empty");
            vec![self.encode_shard(shard, items)]
        } else {
            std::thread::scope(|scope| {
                let handles: Vec<_> = pending
                    .into_iter()
                    .map(|(shard, items)| scope.spawn(move || self.encode_shard(shard, items)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join()
                            .unwrap_or_else(|_| Err(Error::internal("dictionary shard panicked")))
                    })
                    .collect()
            })
        };

        for result in results {
            for (i, id) in result? {
                out[i] = id;
            }
        }
        Ok(out)
    }

    /// Encode a single term.
    pub fn encode(&self, term: &Term) -> Result<TermId> {
        Ok(self.encode_many(std::slice::from_ref(term))?[0])
    }

    /// Decode an id back into its term. `not_found` for unknown ids.
    pub fn decode(&self, id: TermId) -> Result<Term> {
        if id.is_inline() {
            return id
                .decode_inline()
                .ok_or_else(|| Error::corrupted(format!("undecodable inline id {id}")));
        }
        match self.backend.get(Cf::Id2Str, &id.to_be_bytes())? {
            Some(bytes) => Term::from_canonical_bytes(&bytes),
            None => Err(Error::not_found(format!("term id {id}"))),
        }
    }

    /// Look up a term's id without ever allocating.
    pub fn get_if_present(&self, term: &Term) -> Result<Option<TermId>> {
        if let Some(id) = TermId::try_inline(term) {
            return Ok(Some(id));
        }
        let bytes = term.canonical_bytes();
        if let Some(hit) = self.cache.get(&bytes) {
            return Ok(Some(*hit));
        }
        match self.backend.get(Cf::Str2Id, &bytes)? {
            Some(raw) => {
                let id = decode_id(&raw)?;
                self.cache.insert(bytes, id);
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Flush pending backend state. The counters are already durable —
    /// they are persisted ahead of use.
    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }

    fn shard_for(&self, bytes: &[u8]) -> usize {
        let mut hasher = FxHasher::default();
        hasher.write(bytes);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Serialised writer for one shard. The shard mutex is held for the
    /// whole batch; readers never take it.
    fn encode_shard(
        &self,
        shard: usize,
        items: Vec<(usize, Vec<u8>, TermKind)>,
    ) -> Result<Vec<(usize, TermId)>> {
        let mut state = self.shards[shard].lock();
        let mut resolved = Vec::with_capacity(items.len());
        let mut ops: Vec<BatchOp> = Vec::new();
        let mut fresh: Vec<(Vec<u8>, TermId)> = Vec::new();
        // Terms repeated within this call allocate once.
        let mut local: FxHashMap<Vec<u8>, TermId> = FxHashMap::default();

        for (i, bytes, kind) in items {
            // The cache may have been populated by a concurrent call
            // between routing and locking.
            if let Some(hit) = self.cache.get(&bytes) {
                resolved.push((i, *hit));
                continue;
            }
            if let Some(&id) = local.get(&bytes) {
                resolved.push((i, id));
                continue;
            }
            if let Some(raw) = self.backend.get(Cf::Str2Id, &bytes)? {
                let id = decode_id(&raw)?;
                local.insert(bytes.clone(), id);
                self.cache.insert(bytes, id);
                resolved.push((i, id));
                continue;
            }

            let seq = self.take_id(&mut state, kind)?;
            let id = TermId::from_dict(kind, seq);
            ops.push(BatchOp::Put {
                cf: Cf::Str2Id,
                key: bytes.clone(),
                value: id.to_be_bytes().to_vec(),
            });
            ops.push(BatchOp::Put {
                cf: Cf::Id2Str,
                key: id.to_be_bytes().to_vec(),
                value: bytes.clone(),
            });
            local.insert(bytes.clone(), id);
            fresh.push((bytes, id));
            resolved.push((i, id));
        }

        if !ops.is_empty() {
            self.backend.write_batch(ops, false)?;
            // Write-through only after the batch committed; ids allocated
            // for a failed batch are wasted, never reused.
            for (bytes, id) in fresh {
                self.cache.insert(bytes, id);
            }
        }
        Ok(resolved)
    }

    fn take_id(&self, state: &mut ShardState, kind: TermKind) -> Result<u64> {
        let block = &mut state.blocks[kind_index(kind)];
        if let Some(id) = block.take() {
            return Ok(id);
        }
        *block = self.alloc_block(kind)?;
        block
            .take()
            .ok_or_else(|| Error::internal("freshly allocated id block is empty"))
    }

    /// Reserve a block from the kind counter, persisting a new ceiling
    /// first whenever the block would cross the persisted one.
    fn alloc_block(&self, kind: TermKind) -> Result<IdBlock> {
        let mut counter = self.counters[kind_index(kind)].lock();
        let start = counter.next;
        let end = start
            .checked_add(self.block_size)
            .ok_or_else(|| Error::internal("dictionary counter overflow"))?;
        if end.saturating_add(self.safety_margin) > counter.persisted_ceiling {
            let new_ceiling = end + self.safety_margin;
            self.backend
                .put_sync(Cf::Meta, meta::dict_counter(kind), &new_ceiling.to_be_bytes())?;
            counter.persisted_ceiling = new_ceiling;
        }
        counter.next = end;
        Ok(IdBlock { next: start, end })
    }
}

impl std::fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dictionary")
            .field("shards", &self.shards.len())
            .field("cached", &self.cache.len())
            .finish()
    }
}

fn decode_counter(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::corrupted("dictionary counter record has wrong length"))?;
    Ok(u64::from_be_bytes(arr))
}

fn decode_id(bytes: &[u8]) -> Result<TermId> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::corrupted("dictionary id record has wrong length"))?;
    Ok(TermId::from_be_bytes(arr))
}

/// The highest allocated sequence in a kind subspace, from `id2str`.
fn scan_high_water(backend: &Backend, kind: TermKind) -> Result<Option<u64>> {
    let lower = TermId::from_dict(kind, 0).to_be_bytes();
    let upper = TermId::from_dict(kind, TermId::MAX_DICT_SEQ).to_be_bytes();
    match backend.last_in_range(Cf::Id2Str, &lower, &upper)? {
        Some(key) => {
            let id = decode_id(&key)?;
            Ok(id.dict_seq())
        }
        None => Ok(None),
    }
}
