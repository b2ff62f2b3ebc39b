//! Column-family wrapper over RocksDB
//!
//! The backend exposes exactly what the upper layers need: point gets and
//! puts, atomic write batches, prefix-bounded iterators with `seek`, and
//! snapshots. Column families are tuned per access pattern:
//!
//! | group | access | bloom | block | compression |
//! |-------|--------|-------|-------|-------------|
//! | `str2id`, `id2str` | point | full-key, 14 bits | 2 KB | LZ4 |
//! | `spo`, `pos`, `osp` | prefix scan | prefix, 12 bits | 8 KB | LZ4, none at L0 |
//! | `numeric_range` | prefix scan | prefix, 12 bits | 8 KB | LZ4, none at L0 |
//! | `meta` | sequential | disabled | 32 KB | LZ4 |
//!
//! Iterator contract: iteration stops as soon as the cursor leaves the
//! prefix. Both the lexicographic upper bound and a `starts_with` check on
//! every step enforce this; the prefix bloom is a performance aid only.
//! Prefixes shorter than the fixed prefix length fall back to total-order
//! seek.

use rocksdb::{
    BlockBasedOptions, ColumnFamilyDescriptor, DBCompressionType, DBRawIterator, Options,
    ReadOptions, SliceTransform, Snapshot, WriteBatch, WriteOptions, DB,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use triad_core::{Error, Result};

/// Fixed prefix length used by the prefix extractor on scan-heavy CFs.
pub const FIXED_PREFIX_LEN: usize = 8;

/// The column families of a Triad database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cf {
    /// canonical term bytes → 8-byte id
    Str2Id,
    /// 8-byte id → canonical term bytes
    Id2Str,
    /// s ∥ p ∥ o
    Spo,
    /// p ∥ o ∥ s
    Pos,
    /// o ∥ s ∥ p
    Osp,
    /// p ∥ sort(value) ∥ s
    NumericRange,
    /// reserved-prefix keys → versioned blobs
    Meta,
}

impl Cf {
    /// All column families, in creation order.
    pub const ALL: [Cf; 7] = [
        Cf::Str2Id,
        Cf::Id2Str,
        Cf::Spo,
        Cf::Pos,
        Cf::Osp,
        Cf::NumericRange,
        Cf::Meta,
    ];

    /// The on-disk column family name.
    pub const fn name(self) -> &'static str {
        match self {
            Cf::Str2Id => "str2id",
            Cf::Id2Str => "id2str",
            Cf::Spo => "spo",
            Cf::Pos => "pos",
            Cf::Osp => "osp",
            Cf::NumericRange => "numeric_range",
            Cf::Meta => "meta",
        }
    }

    fn is_prefix_scanned(self) -> bool {
        matches!(self, Cf::Spo | Cf::Pos | Cf::Osp | Cf::NumericRange)
    }

    fn options(self) -> Options {
        let mut opts = Options::default();
        let mut table = BlockBasedOptions::default();
        match self {
            Cf::Str2Id | Cf::Id2Str => {
                table.set_block_size(2 * 1024);
                table.set_bloom_filter(14.0, false);
                opts.set_compression_type(DBCompressionType::Lz4);
            }
            Cf::Spo | Cf::Pos | Cf::Osp | Cf::NumericRange => {
                table.set_block_size(8 * 1024);
                table.set_bloom_filter(12.0, false);
                opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(FIXED_PREFIX_LEN));
                opts.set_memtable_prefix_bloom_ratio(0.02);
                // No compression at L0: these files turn over too fast
                // to be worth the cycles.
                opts.set_compression_per_level(&[
                    DBCompressionType::None,
                    DBCompressionType::Lz4,
                    DBCompressionType::Lz4,
                    DBCompressionType::Lz4,
                    DBCompressionType::Lz4,
                    DBCompressionType::Lz4,
                    DBCompressionType::Lz4,
                ]);
            }
            Cf::Meta => {
                table.set_block_size(32 * 1024);
                opts.set_compression_type(DBCompressionType::Lz4);
            }
        }
        opts.set_block_based_table_factory(&table);
        opts
    }
}

/// One operation inside an atomic write batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Put `key → value` into a column family
    Put {
        /// Target column family
        cf: Cf,
        /// Key bytes
        key: Vec<u8>,
        /// Value bytes (may be empty)
        value: Vec<u8>,
    },
    /// Delete `key` from a column family
    Delete {
        /// Target column family
        cf: Cf,
        /// Key bytes
        key: Vec<u8>,
    },
}

/// An open RocksDB database with the Triad column families.
pub struct Backend {
    db: DB,
    path: PathBuf,
}

impl Backend {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, create_if_missing: bool) -> Result<Backend> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(create_if_missing);
        db_opts.create_missing_column_families(true);

        let descriptors: Vec<ColumnFamilyDescriptor> = Cf::ALL
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.name(), cf.options()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, descriptors).map_err(map_rocks)?;
        debug!(path = %path.display(), "opened backend");
        Ok(Backend {
            db,
            path: path.to_path_buf(),
        })
    }

    /// The directory this database lives in.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cf(&self, cf: Cf) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf.name())
            .ok_or_else(|| Error::internal(format!("missing column family {}", cf.name())))
    }

    /// Point read. `Ok(None)` is an explicit miss, distinct from `io`.
    pub fn get(&self, cf: Cf, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db.get_cf(self.cf(cf)?, key).map_err(map_rocks)
    }

    /// Point read through a snapshot.
    pub fn get_at(
        &self,
        cf: Cf,
        key: &[u8],
        snapshot: &Snapshot<'_>,
    ) -> Result<Option<Vec<u8>>> {
        let mut ro = ReadOptions::default();
        ro.set_snapshot(snapshot);
        self.db
            .get_cf_opt(self.cf(cf)?, key, &ro)
            .map_err(map_rocks)
    }

    /// Single put outside a batch.
    pub fn put(&self, cf: Cf, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put_cf(self.cf(cf)?, key, value).map_err(map_rocks)
    }

    /// Single synced put, for metadata whose loss would break invariants.
    pub fn put_sync(&self, cf: Cf, key: &[u8], value: &[u8]) -> Result<()> {
        let mut wo = WriteOptions::default();
        wo.set_sync(true);
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(cf)?, key, value);
        self.db.write_opt(batch, &wo).map_err(map_rocks)
    }

    /// Single delete outside a batch.
    pub fn delete(&self, cf: Cf, key: &[u8]) -> Result<()> {
        self.db.delete_cf(self.cf(cf)?, key).map_err(map_rocks)
    }

    /// Apply a mixed batch atomically. All ops commit or none do.
    pub fn write_batch(&self, ops: Vec<BatchOp>, sync: bool) -> Result<()> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                BatchOp::Put { cf, key, value } => batch.put_cf(self.cf(cf)?, key, value),
                BatchOp::Delete { cf, key } => batch.delete_cf(self.cf(cf)?, key),
            }
        }
        let mut wo = WriteOptions::default();
        wo.set_sync(sync);
        self.db.write_opt(batch, &wo).map_err(map_rocks)
    }

    /// Open a prefix-bounded iterator positioned at the start of `prefix`.
    pub fn prefix_iter(&self, cf: Cf, prefix: &[u8]) -> Result<PrefixIter<'_>> {
        self.prefix_iter_opt(cf, prefix, None)
    }

    /// Open a prefix-bounded iterator reading through a snapshot.
    pub fn prefix_iter_at<'a>(
        &'a self,
        cf: Cf,
        prefix: &[u8],
        snapshot: &Snapshot<'_>,
    ) -> Result<PrefixIter<'a>> {
        self.prefix_iter_opt(cf, prefix, Some(snapshot))
    }

    fn prefix_iter_opt<'a>(
        &'a self,
        cf: Cf,
        prefix: &[u8],
        snapshot: Option<&Snapshot<'_>>,
    ) -> Result<PrefixIter<'a>> {
        let mut ro = ReadOptions::default();
        if let Some(snap) = snapshot {
            ro.set_snapshot(snap);
        }
        if let Some(upper) = prefix_successor(prefix) {
            ro.set_iterate_upper_bound(upper);
        }
        // A prefix shorter than the extractor's fixed length cannot use
        // the prefix bloom; fall back to a total-order seek.
        if !cf.is_prefix_scanned() || prefix.len() < FIXED_PREFIX_LEN {
            ro.set_total_order_seek(true);
        } else {
            ro.set_prefix_same_as_start(true);
        }
        let mut raw = self.db.raw_iterator_cf_opt(self.cf(cf)?, ro);
        raw.seek(prefix);
        let mut iter = PrefixIter {
            raw,
            prefix: prefix.to_vec(),
            exhausted: false,
        };
        iter.check_position()?;
        Ok(iter)
    }

    /// The largest key in `lower ..= upper` of a column family, if any.
    ///
    /// Used by the dictionary to recover the allocation high-water mark
    /// of an id subspace after a crash.
    pub fn last_in_range(&self, cf: Cf, lower: &[u8], upper: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut ro = ReadOptions::default();
        ro.set_total_order_seek(true);
        let mut raw = self.db.raw_iterator_cf_opt(self.cf(cf)?, ro);
        raw.seek_for_prev(upper);
        if !raw.valid() {
            raw.status().map_err(map_rocks)?;
            return Ok(None);
        }
        match raw.key() {
            Some(k) if k >= lower => Ok(Some(k.to_vec())),
            _ => Ok(None),
        }
    }

    /// Take a snapshot of the current state.
    pub fn snapshot(&self) -> Snapshot<'_> {
        self.db.snapshot()
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(map_rocks)
    }

    /// Sync the write-ahead log. Used to close out a bulk load that
    /// committed its batches unsynced.
    pub fn sync_wal(&self) -> Result<()> {
        self.db.flush_wal(true).map_err(map_rocks)
    }

    /// Write a consistent checkpoint (hard-linked file copy) to `dir`.
    pub fn checkpoint(&self, dir: &Path) -> Result<()> {
        let cp = rocksdb::checkpoint::Checkpoint::new(&self.db).map_err(map_rocks)?;
        cp.create_checkpoint(dir).map_err(map_rocks)
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("path", &self.path).finish()
    }
}

/// A cursor over one column family that never leaves its prefix.
pub struct PrefixIter<'a> {
    raw: DBRawIterator<'a>,
    prefix: Vec<u8>,
    exhausted: bool,
}

impl<'a> PrefixIter<'a> {
    /// Reposition at the smallest key ≥ `target` still inside the prefix.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.raw.seek(target);
        self.exhausted = false;
        self.check_position()
    }

    /// Advance to the next key inside the prefix.
    pub fn next(&mut self) -> Result<()> {
        if self.exhausted {
            return Ok(());
        }
        self.raw.next();
        self.check_position()
    }

    /// The current key, or `None` once the cursor left the prefix.
    pub fn key(&self) -> Option<&[u8]> {
        if self.exhausted {
            None
        } else {
            self.raw.key()
        }
    }

    /// The current value, or `None` once exhausted.
    pub fn value(&self) -> Option<&[u8]> {
        if self.exhausted {
            None
        } else {
            self.raw.value()
        }
    }

    /// True once the cursor has left the prefix.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn check_position(&mut self) -> Result<()> {
        if !self.raw.valid() {
            self.exhausted = true;
            // An invalid cursor is either exhaustion or an error; only the
            // status distinguishes them.
            return self.raw.status().map_err(map_rocks);
        }
        match self.raw.key() {
            Some(k) if k.starts_with(&self.prefix) => Ok(()),
            _ => {
                self.exhausted = true;
                Ok(())
            }
        }
    }
}

/// An owned snapshot: keeps the backend alive for as long as the snapshot
/// exists, so the handle can be stored in registries and moved across
/// threads.
pub struct OwnedSnapshot {
    // Field order matters: the snapshot must drop before the backend it
    // borrows from.
    snapshot: Snapshot<'static>,
    backend: Arc<Backend>,
}

// SAFETY: a RocksDB snapshot is an immutable sequence-number pin; the C++
// side allows acquiring and releasing it from any thread as long as the DB
// outlives it, which `backend` guarantees.
unsafe impl Send for OwnedSnapshot {}
unsafe impl Sync for OwnedSnapshot {}

impl OwnedSnapshot {
    /// Take a snapshot that co-owns its backend.
    pub fn new(backend: Arc<Backend>) -> OwnedSnapshot {
        let snapshot = backend.snapshot();
        // SAFETY: the snapshot borrows the DB boxed inside `backend`. We
        // hold an Arc to that backend for the life of this value and the
        // field order drops the snapshot first, so the borrow never
        // dangles; the DB itself is heap-allocated and does not move.
        let snapshot: Snapshot<'static> = unsafe { std::mem::transmute(snapshot) };
        OwnedSnapshot { snapshot, backend }
    }

    /// Point read through this snapshot.
    pub fn get(&self, cf: Cf, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.backend.get_at(cf, key, &self.snapshot)
    }

    /// Prefix iterator reading through this snapshot.
    pub fn prefix_iter(&self, cf: Cf, prefix: &[u8]) -> Result<PrefixIter<'_>> {
        self.backend.prefix_iter_at(cf, prefix, &self.snapshot)
    }

    /// The backend this snapshot pins.
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

/// The smallest byte string strictly greater than every key starting with
/// `prefix`. `None` when no finite successor exists.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut s = prefix.to_vec();
    for i in (0..s.len()).rev() {
        if s[i] < u8::MAX {
            s[i] += 1;
            s.truncate(i + 1);
            return Some(s);
        }
    }
    None
}

fn map_rocks(e: rocksdb::Error) -> Error {
    use rocksdb::ErrorKind;
    match e.kind() {
        ErrorKind::Corruption => Error::corrupted(e.to_string()),
        ErrorKind::NotFound => Error::not_found(e.to_string()),
        _ => Error::io_with_source(e.to_string(), e),
    }
}
