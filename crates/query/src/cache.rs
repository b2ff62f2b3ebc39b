//! The query result cache
//!
//! A content-addressed LRU over normalised-query keys, backed by three
//! maps: the entries, an access-ordered index for eviction, and a
//! reverse index from predicate id to the keys whose query touches that
//! predicate — so write-path invalidation is O(affected entries), not
//! O(cache size).
//!
//! Entries expire on a TTL, checked lazily on read and proactively by a
//! background sweeper. Results larger than `max_result_size` rows are
//! never cached; a memory budget evicts least-recently-used entries and
//! counts the inserts it had to skip.
//!
//! Optional persistence writes a versioned bincode record under a
//! validated root directory; bincode is data-only, so reloading can
//! never materialise code from the stream. Reloaded entries restart
//! their TTL.

use crate::normalize::CacheKey;
use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use triad_core::{Error, Result, TermId, Triple};

/// On-disk schema version of the persisted cache.
const CACHE_SCHEMA_VERSION: u16 = 1;

/// A cached query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CachedValue {
    /// SELECT solutions: variable names and rows of optional ids
    Solutions {
        /// Variable names, defining row width
        vars: Vec<String>,
        /// Binding rows
        rows: Vec<Vec<Option<TermId>>>,
    },
    /// ASK result
    Boolean(bool),
    /// CONSTRUCT result as encoded triples
    Graph(Vec<Triple>),
}

impl CachedValue {
    /// Number of result rows (1 for booleans).
    pub fn row_count(&self) -> usize {
        match self {
            CachedValue::Solutions { rows, .. } => rows.len(),
            CachedValue::Boolean(_) => 1,
            CachedValue::Graph(triples) => triples.len(),
        }
    }

    fn approx_bytes(&self) -> usize {
        const ROW_OVERHEAD: usize = 16;
        match self {
            CachedValue::Solutions { vars, rows } => {
                let width = vars.len();
                vars.iter().map(|v| v.len() + 24).sum::<usize>()
                    + rows.len() * (width * 9 + ROW_OVERHEAD)
            }
            CachedValue::Boolean(_) => 1,
            CachedValue::Graph(triples) => triples.len() * 24 + ROW_OVERHEAD,
        }
    }
}

struct Entry {
    value: CachedValue,
    approx_bytes: usize,
    created_at: Instant,
    access_tick: u64,
    predicates: Vec<TermId>,
}

/// Configuration for the result cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub capacity: usize,
    /// Optional memory budget over the approximate entry sizes
    pub max_memory_bytes: Option<usize>,
    /// Entry TTL
    pub ttl: Duration,
    /// Results with more rows than this are never cached
    pub max_result_size: usize,
    /// Proactive expiry sweep interval
    pub sweep_interval: Duration,
    /// Optional persistence target, validated against `persist_root`
    pub persist_path: Option<PathBuf>,
    /// Root directory every persistence path must stay inside
    pub persist_root: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: 1_000,
            max_memory_bytes: None,
            ttl: Duration::from_secs(300),
            max_result_size: 10_000,
            sweep_interval: Duration::from_secs(60),
            persist_path: None,
            persist_root: None,
        }
    }
}

/// Hit/miss/eviction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that found a live entry
    pub hits: u64,
    /// Reads that found nothing (or an expired entry)
    pub misses: u64,
    /// Entries evicted by LRU pressure
    pub evicted: u64,
    /// Entries dropped by TTL
    pub expired: u64,
    /// Inserts skipped because the result exceeded `max_result_size`
    pub skipped_size: u64,
    /// Inserts skipped because the memory budget could not fit them
    pub skipped_memory: u64,
}

#[derive(Default)]
struct Inner {
    entries: FxHashMap<CacheKey, Entry>,
    // access tick → key; ticks are unique, so eviction pops the front
    access: BTreeMap<u64, CacheKey>,
    reverse: FxHashMap<TermId, FxHashSet<CacheKey>>,
    tick: u64,
    mem_used: usize,
    stats: CacheStats,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove_entry(&mut self, key: &CacheKey) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.access.remove(&entry.access_tick);
        self.mem_used = self.mem_used.saturating_sub(entry.approx_bytes);
        for p in &entry.predicates {
            if let Some(keys) = self.reverse.get_mut(p) {
                keys.remove(key);
                if keys.is_empty() {
                    self.reverse.remove(p);
                }
            }
        }
        Some(entry)
    }

    fn evict_lru(&mut self) -> bool {
        let Some((_, key)) = self.access.iter().next().map(|(t, k)| (*t, *k)) else {
            return false;
        };
        self.remove_entry(&key);
        self.stats.evicted += 1;
        true
    }
}

struct Shared {
    inner: Mutex<Inner>,
    shutdown: Mutex<bool>,
    shutdown_cv: Condvar,
    ttl: Duration,
}

impl Shared {
    fn sweep(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.created_at) >= self.ttl)
            .map(|(k, _)| *k)
            .collect();
        let n = expired.len();
        for key in expired {
            inner.remove_entry(&key);
            inner.stats.expired += 1;
        }
        if n > 0 {
            debug!(expired = n, "cache sweep removed expired entries");
        }
    }
}

/// The result cache.
pub struct ResultCache {
    shared: Arc<Shared>,
    config: CacheConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ResultCache {
    /// Start a cache (and its sweeper thread) with the given config.
    /// When persistence is configured and a valid file exists, entries
    /// are reloaded with a fresh TTL.
    pub fn start(config: CacheConfig) -> Result<ResultCache> {
        if let Some(path) = &config.persist_path {
            validate_persist_path(path, config.persist_root.as_deref())?;
        }
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner::default()),
            shutdown: Mutex::new(false),
            shutdown_cv: Condvar::new(),
            ttl: config.ttl,
        });

        let sweeper_shared = Arc::clone(&shared);
        let interval = config.sweep_interval;
        let sweeper = std::thread::Builder::new()
            .name("triad-cache-sweeper".to_string())
            .spawn(move || loop {
                {
                    let mut stop = sweeper_shared.shutdown.lock();
                    if !*stop {
                        sweeper_shared.shutdown_cv.wait_for(&mut stop, interval);
                    }
                    if *stop {
                        return;
                    }
                }
                sweeper_shared.sweep();
            })
            .map_err(|e| Error::internal(format!("failed to spawn cache sweeper: {e}")))?;

        let cache = ResultCache {
            shared,
            config,
            sweeper: Mutex::new(Some(sweeper)),
        };
        if let Some(path) = cache.config.persist_path.clone() {
            if path.exists() {
                if let Err(e) = cache.load_from(&path) {
                    warn!(error = %e, "ignoring unreadable cache persistence file");
                }
            }
        }
        Ok(cache)
    }

    /// Look up a key, refreshing its LRU position. Expired entries are
    /// removed on the spot.
    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        let mut inner = self.shared.inner.lock();
        let now = Instant::now();
        match inner.entries.get(key) {
            None => {
                inner.stats.misses += 1;
                None
            }
            Some(entry) if now.duration_since(entry.created_at) >= self.config.ttl => {
                inner.remove_entry(key);
                inner.stats.expired += 1;
                inner.stats.misses += 1;
                None
            }
            Some(_) => {
                let tick = inner.next_tick();
                let entry = inner.entries.get_mut(key).expect("present");
                let old_tick = entry.access_tick;
                entry.access_tick = tick;
                let value = entry.value.clone();
                inner.access.remove(&old_tick);
                inner.access.insert(tick, *key);
                inner.stats.hits += 1;
                Some(value)
            }
        }
    }

    /// Insert a result with the predicates its query touches.
    pub fn insert(&self, key: CacheKey, value: CachedValue, predicates: Vec<TermId>) {
        if value.row_count() > self.config.max_result_size {
            self.shared.inner.lock().stats.skipped_size += 1;
            return;
        }
        let approx_bytes = value.approx_bytes();
        let mut inner = self.shared.inner.lock();

        if let Some(budget) = self.config.max_memory_bytes {
            if approx_bytes > budget {
                inner.stats.skipped_memory += 1;
                return;
            }
            while inner.mem_used + approx_bytes > budget {
                if !inner.evict_lru() {
                    inner.stats.skipped_memory += 1;
                    return;
                }
            }
        }
        while inner.entries.len() >= self.config.capacity {
            if !inner.evict_lru() {
                return;
            }
        }

        inner.remove_entry(&key);
        let tick = inner.next_tick();
        for p in &predicates {
            inner.reverse.entry(*p).or_default().insert(key);
        }
        inner.mem_used += approx_bytes;
        inner.access.insert(tick, key);
        inner.entries.insert(
            key,
            Entry {
                value,
                approx_bytes,
                created_at: Instant::now(),
                access_tick: tick,
                predicates,
            },
        );
    }

    /// Drop everything. Called after bulk loads.
    pub fn invalidate_all(&self) {
        let mut inner = self.shared.inner.lock();
        inner.entries.clear();
        inner.access.clear();
        inner.reverse.clear();
        inner.mem_used = 0;
    }

    /// Drop every entry whose query touches any of the predicates.
    pub fn invalidate_by_predicates(&self, predicates: &[TermId]) {
        let mut inner = self.shared.inner.lock();
        let mut keys: FxHashSet<CacheKey> = FxHashSet::default();
        for p in predicates {
            if let Some(set) = inner.reverse.get(p) {
                keys.extend(set.iter().copied());
            }
        }
        let n = keys.len();
        for key in keys {
            inner.remove_entry(&key);
        }
        if n > 0 {
            debug!(removed = n, "cache invalidated by predicates");
        }
    }

    /// Drop one entry.
    pub fn invalidate_by_key(&self, key: &CacheKey) {
        self.shared.inner.lock().remove_entry(key);
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.shared.inner.lock().entries.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        self.shared.inner.lock().stats
    }

    /// Run one expiry sweep immediately. Exposed for tests.
    pub fn sweep_now(&self) {
        self.shared.sweep();
    }

    /// Predicates currently present in the reverse index. For tests and
    /// diagnostics.
    pub fn indexed_predicates(&self) -> Vec<TermId> {
        self.shared.inner.lock().reverse.keys().copied().collect()
    }

    /// Write the cache to its configured persistence path.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.config.persist_path else {
            return Ok(());
        };
        validate_persist_path(path, self.config.persist_root.as_deref())?;
        let inner = self.shared.inner.lock();
        let record = PersistedCache {
            version: CACHE_SCHEMA_VERSION,
            entries: inner
                .entries
                .iter()
                .map(|(k, e)| (k.0, e.value.clone(), e.predicates.clone()))
                .collect(),
        };
        drop(inner);
        let bytes = bincode::serialize(&record)
            .map_err(|e| Error::internal(format!("cache encode: {e}")))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn load_from(&self, path: &Path) -> Result<()> {
        validate_persist_path(path, self.config.persist_root.as_deref())?;
        let bytes = std::fs::read(path)?;
        let record: PersistedCache = bincode::deserialize(&bytes)
            .map_err(|e| Error::corrupted(format!("cache persistence file malformed: {e}")))?;
        if record.version != CACHE_SCHEMA_VERSION {
            return Err(Error::corrupted(format!(
                "cache persistence version {} unsupported",
                record.version
            )));
        }
        for (key, value, predicates) in record.entries {
            self.insert(CacheKey(key), value, predicates);
        }
        Ok(())
    }

    /// Stop the sweeper, persisting first when configured.
    pub fn shutdown(&self) {
        if let Err(e) = self.persist() {
            warn!(error = %e, "failed to persist result cache");
        }
        {
            let mut stop = self.shared.shutdown.lock();
            if *stop {
                return;
            }
            *stop = true;
            self.shared.shutdown_cv.notify_all();
        }
        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ResultCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.len())
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedCache {
    version: u16,
    entries: Vec<([u8; 32], CachedValue, Vec<TermId>)>,
}

/// Reject paths with `..` components or outside the configured root.
fn validate_persist_path(path: &Path, root: Option<&Path>) -> Result<()> {
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::traversal(path.display().to_string()));
    }
    match root {
        Some(root) => {
            if path.starts_with(root) {
                Ok(())
            } else {
                Err(Error::traversal(path.display().to_string()))
            }
        }
        // Persistence without a root directory is not allowed.
        None => Err(Error::invalid_input(
            "cache persistence requires a configured root directory",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(n: u8) -> CacheKey {
        CacheKey([n; 32])
    }

    fn pid(n: u64) -> TermId {
        TermId::from_u64(n)
    }

    fn solutions(rows: usize) -> CachedValue {
        CachedValue::Solutions {
            vars: vec!["x".into()],
            rows: (0..rows).map(|i| vec![Some(pid(i as u64))]).collect(),
        }
    }

    fn cache(config: CacheConfig) -> ResultCache {
        ResultCache::start(config).unwrap()
    }

    fn quick_config() -> CacheConfig {
        CacheConfig {
            sweep_interval: Duration::from_secs(3600),
            ..CacheConfig::default()
        }
    }

    #[test]
    fn test_insert_get_round_trip() {
        let c = cache(quick_config());
        c.insert(key(1), solutions(3), vec![pid(10)]);
        assert_eq!(c.get(&key(1)), Some(solutions(3)));
        assert_eq!(c.get(&key(2)), None);
        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_predicate_invalidation_is_targeted() {
        let c = cache(quick_config());
        c.insert(key(1), solutions(1), vec![pid(10)]);
        c.insert(key(2), solutions(1), vec![pid(20)]);
        c.insert(key(3), solutions(1), vec![pid(10), pid(20)]);

        c.invalidate_by_predicates(&[pid(10)]);
        assert_eq!(c.get(&key(1)), None);
        assert!(c.get(&key(2)).is_some());
        assert_eq!(c.get(&key(3)), None);
        // No remaining entry touches predicate 10
        assert!(!c.indexed_predicates().contains(&pid(10)));
    }

    #[test]
    fn test_oversized_results_skipped() {
        let c = cache(CacheConfig {
            max_result_size: 5,
            ..quick_config()
        });
        c.insert(key(1), solutions(6), vec![]);
        assert_eq!(c.len(), 0);
        assert_eq!(c.stats().skipped_size, 1);
    }

    #[test]
    fn test_lru_eviction_by_capacity() {
        let c = cache(CacheConfig {
            capacity: 2,
            ..quick_config()
        });
        c.insert(key(1), solutions(1), vec![]);
        c.insert(key(2), solutions(1), vec![]);
        // Touch key 1 so key 2 becomes the LRU
        assert!(c.get(&key(1)).is_some());
        c.insert(key(3), solutions(1), vec![]);
        assert!(c.get(&key(1)).is_some());
        assert_eq!(c.get(&key(2)), None);
        assert!(c.get(&key(3)).is_some());
        assert_eq!(c.stats().evicted, 1);
    }

    #[test]
    fn test_memory_budget() {
        let one_row = solutions(1).approx_bytes();
        let c = cache(CacheConfig {
            max_memory_bytes: Some(one_row * 2 + 1),
            ..quick_config()
        });
        c.insert(key(1), solutions(1), vec![]);
        c.insert(key(2), solutions(1), vec![]);
        c.insert(key(3), solutions(1), vec![]);
        // The third insert evicted the LRU
        assert_eq!(c.len(), 2);
        assert_eq!(c.stats().evicted, 1);

        // A value larger than the whole budget is skipped outright
        c.insert(key(4), solutions(100), vec![]);
        assert_eq!(c.stats().skipped_memory, 1);
    }

    #[test]
    fn test_ttl_expiry_on_read_and_sweep() {
        let c = cache(CacheConfig {
            ttl: Duration::from_millis(30),
            ..quick_config()
        });
        c.insert(key(1), solutions(1), vec![]);
        c.insert(key(2), solutions(1), vec![]);
        std::thread::sleep(Duration::from_millis(60));
        // Lazy expiry on read
        assert_eq!(c.get(&key(1)), None);
        assert_eq!(c.stats().expired, 1);
        // Proactive expiry by sweep
        c.sweep_now();
        assert_eq!(c.len(), 0);
        assert_eq!(c.stats().expired, 2);
    }

    #[test]
    fn test_invalidate_all() {
        let c = cache(quick_config());
        c.insert(key(1), solutions(1), vec![pid(1)]);
        c.insert(key(2), solutions(1), vec![pid(2)]);
        c.invalidate_all();
        assert!(c.is_empty());
        assert!(c.indexed_predicates().is_empty());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.bin");
        let config = CacheConfig {
            persist_path: Some(path.clone()),
            persist_root: Some(dir.path().to_path_buf()),
            ..quick_config()
        };
        {
            let c = cache(config.clone());
            c.insert(key(1), solutions(2), vec![pid(10)]);
            c.persist().unwrap();
        }
        let c = cache(config);
        assert_eq!(c.get(&key(1)), Some(solutions(2)));
        // The reverse index was rebuilt from the persisted predicates
        c.invalidate_by_predicates(&[pid(10)]);
        assert_eq!(c.get(&key(1)), None);
    }

    #[test]
    fn test_persist_path_validation() {
        let dir = TempDir::new().unwrap();
        // Escaping the root is rejected
        let err = ResultCache::start(CacheConfig {
            persist_path: Some(PathBuf::from("/tmp/elsewhere/cache.bin")),
            persist_root: Some(dir.path().to_path_buf()),
            ..quick_config()
        })
        .unwrap_err();
        assert_eq!(err.code(), "traversal");

        // `..` components are rejected even under the root
        let sneaky = dir.path().join("..").join("cache.bin");
        let err = ResultCache::start(CacheConfig {
            persist_path: Some(sneaky),
            persist_root: Some(dir.path().to_path_buf()),
            ..quick_config()
        })
        .unwrap_err();
        assert_eq!(err.code(), "traversal");

        // Persistence without a root is rejected
        let err = ResultCache::start(CacheConfig {
            persist_path: Some(dir.path().join("cache.bin")),
            persist_root: None,
            ..quick_config()
        })
        .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn test_malformed_persistence_ignored_on_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.bin");
        std::fs::write(&path, b"garbage").unwrap();
        let c = cache(CacheConfig {
            persist_path: Some(path),
            persist_root: Some(dir.path().to_path_buf()),
            ..quick_config()
        });
        assert!(c.is_empty());
    }
}
