//! TTL-tracked snapshot registry
//!
//! A snapshot pins old state in the backend; a leaked long-lived snapshot
//! blocks compaction indefinitely. The registry enforces discipline: every
//! snapshot has a TTL (default 5 minutes), a background sweeper releases
//! expired ones (warning at 80 % of TTL first), and reads through a
//! released handle fail `closed`.
//!
//! `with_snapshot` is the preferred entry point: the handle is released on
//! every exit path, including panic, because release rides on `Drop`.

use crate::backend::{Backend, Cf, OwnedSnapshot, PrefixIter};
use crate::index::ReadView;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use triad_core::{Error, Result};
use uuid::Uuid;

/// Fraction of TTL after which the sweeper emits a soft warning.
const WARN_FRACTION: f64 = 0.8;

struct SnapshotEntry {
    id: Uuid,
    created_at: Instant,
    ttl: Duration,
    warned: AtomicBool,
    released: AtomicBool,
    snapshot: OwnedSnapshot,
}

impl SnapshotEntry {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }

    fn near_expiry(&self, now: Instant) -> bool {
        now.duration_since(self.created_at).as_secs_f64() >= self.ttl.as_secs_f64() * WARN_FRACTION
    }
}

struct RegistryInner {
    entries: Mutex<FxHashMap<Uuid, Arc<SnapshotEntry>>>,
    shutdown: Mutex<bool>,
    shutdown_cv: Condvar,
}

impl RegistryInner {
    fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<Uuid> = entries
            .values()
            .filter(|e| e.expired(now))
            .map(|e| e.id)
            .collect();
        for id in expired {
            if let Some(entry) = entries.remove(&id) {
                entry.released.store(true, Ordering::Release);
                warn!(%id, ttl_secs = entry.ttl.as_secs(), "snapshot expired, auto-released");
            }
        }
        for entry in entries.values() {
            if entry.near_expiry(now) && !entry.warned.swap(true, Ordering::AcqRel) {
                warn!(id = %entry.id, "snapshot at 80% of its TTL");
            }
        }
    }

    fn release(&self, id: Uuid) {
        if let Some(entry) = self.entries.lock().remove(&id) {
            entry.released.store(true, Ordering::Release);
            debug!(%id, "snapshot released");
        }
    }
}

/// Registry of live snapshots with a background TTL sweeper.
pub struct SnapshotRegistry {
    backend: Arc<Backend>,
    inner: Arc<RegistryInner>,
    default_ttl: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotRegistry {
    /// Start a registry whose sweeper runs every `sweep_interval`.
    pub fn start(
        backend: Arc<Backend>,
        default_ttl: Duration,
        sweep_interval: Duration,
    ) -> SnapshotRegistry {
        let inner = Arc::new(RegistryInner {
            entries: Mutex::new(FxHashMap::default()),
            shutdown: Mutex::new(false),
            shutdown_cv: Condvar::new(),
        });
        let sweeper_inner = Arc::clone(&inner);
        let sweeper = std::thread::Builder::new()
            .name("triad-snapshot-sweeper".to_string())
            .spawn(move || loop {
                {
                    let mut stop = sweeper_inner.shutdown.lock();
                    if !*stop {
                        sweeper_inner
                            .shutdown_cv
                            .wait_for(&mut stop, sweep_interval);
                    }
                    if *stop {
                        return;
                    }
                }
                sweeper_inner.sweep();
            })
            .expect("failed to spawn snapshot sweeper");

        SnapshotRegistry {
            backend,
            inner,
            default_ttl,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Take and register a snapshot. `ttl = None` uses the default.
    pub fn create(&self, ttl: Option<Duration>) -> Result<SnapshotHandle> {
        if *self.inner.shutdown.lock() {
            return Err(Error::Closed);
        }
        let entry = Arc::new(SnapshotEntry {
            id: Uuid::new_v4(),
            created_at: Instant::now(),
            ttl: ttl.unwrap_or(self.default_ttl),
            warned: AtomicBool::new(false),
            released: AtomicBool::new(false),
            snapshot: OwnedSnapshot::new(Arc::clone(&self.backend)),
        });
        self.inner
            .entries
            .lock()
            .insert(entry.id, Arc::clone(&entry));
        debug!(id = %entry.id, "snapshot created");
        Ok(SnapshotHandle {
            entry,
            registry: Arc::downgrade(&self.inner),
        })
    }

    /// Explicitly release a handle.
    pub fn release(&self, handle: SnapshotHandle) {
        drop(handle);
    }

    /// Scoped acquisition: the snapshot is released on every exit path.
    pub fn with_snapshot<T>(
        &self,
        ttl: Option<Duration>,
        f: impl FnOnce(&SnapshotHandle) -> Result<T>,
    ) -> Result<T> {
        let handle = self.create(ttl)?;
        // `handle` drops on return and on unwind alike.
        f(&handle)
    }

    /// Number of snapshots currently registered.
    pub fn active_count(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Run one sweep immediately. Exposed for deterministic tests.
    pub fn sweep_now(&self) {
        self.inner.sweep();
    }

    /// Stop the sweeper and release every registered snapshot.
    pub fn shutdown(&self) {
        {
            let mut stop = self.inner.shutdown.lock();
            if *stop {
                return;
            }
            *stop = true;
            self.inner.shutdown_cv.notify_all();
        }
        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
        let mut entries = self.inner.entries.lock();
        for (_, entry) in entries.drain() {
            entry.released.store(true, Ordering::Release);
        }
    }
}

impl Drop for SnapshotRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SnapshotRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotRegistry")
            .field("active", &self.active_count())
            .finish()
    }
}

/// A registered snapshot. Dropping the handle releases the registration.
pub struct SnapshotHandle {
    entry: Arc<SnapshotEntry>,
    registry: Weak<RegistryInner>,
}

impl SnapshotHandle {
    /// The registration id.
    pub fn id(&self) -> Uuid {
        self.entry.id
    }

    /// True once the registry has released this snapshot.
    pub fn is_released(&self) -> bool {
        self.entry.released.load(Ordering::Acquire)
    }

    /// Point read through the snapshot; `closed` once released.
    pub fn get(&self, cf: Cf, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.view()?.get(cf, key)
    }

    /// Prefix iterator through the snapshot; `closed` once released.
    pub fn prefix_iter(&self, cf: Cf, prefix: &[u8]) -> Result<PrefixIter<'_>> {
        self.view()?.prefix_iter(cf, prefix)
    }

    /// A read view for index-level access; `closed` once released.
    pub fn view(&self) -> Result<ReadView<'_>> {
        if self.is_released() {
            return Err(Error::Closed);
        }
        Ok(ReadView::Snapshot(&self.entry.snapshot))
    }
}

impl Drop for SnapshotHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.release(self.entry.id);
        }
    }
}

impl std::fmt::Debug for SnapshotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotHandle")
            .field("id", &self.entry.id)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(dir: &TempDir, ttl: Duration) -> (Arc<Backend>, SnapshotRegistry) {
        let backend = Arc::new(Backend::open(dir.path(), true).unwrap());
        let reg = SnapshotRegistry::start(Arc::clone(&backend), ttl, Duration::from_millis(50));
        (backend, reg)
    }

    #[test]
    fn test_snapshot_pins_state() {
        let dir = TempDir::new().unwrap();
        let (backend, reg) = registry(&dir, Duration::from_secs(60));
        backend.put(Cf::Meta, b"k", b"v1").unwrap();
        let snap = reg.create(None).unwrap();
        backend.put(Cf::Meta, b"k", b"v2").unwrap();
        assert_eq!(snap.get(Cf::Meta, b"k").unwrap(), Some(b"v1".to_vec()));
        reg.release(snap);
        assert_eq!(reg.active_count(), 0);
    }

    #[test]
    fn test_ttl_expiry_auto_releases() {
        let dir = TempDir::new().unwrap();
        let (backend, reg) = registry(&dir, Duration::from_secs(60));
        backend.put(Cf::Meta, b"k", b"v").unwrap();
        let snap = reg.create(Some(Duration::from_millis(80))).unwrap();
        assert!(snap.get(Cf::Meta, b"k").unwrap().is_some());

        std::thread::sleep(Duration::from_millis(300));
        // Sweeper runs every 50ms; the entry must be gone by now
        assert_eq!(reg.active_count(), 0);
        assert!(snap.is_released());
        let err = snap.get(Cf::Meta, b"k").unwrap_err();
        assert!(matches!(err, Error::Closed));
    }

    #[test]
    fn test_with_snapshot_releases_on_success_and_panic() {
        let dir = TempDir::new().unwrap();
        let (_backend, reg) = registry(&dir, Duration::from_secs(60));

        reg.with_snapshot(None, |snap| {
            assert!(!snap.is_released());
            Ok(())
        })
        .unwrap();
        assert_eq!(reg.active_count(), 0);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = reg.with_snapshot(None, |_snap| -> Result<()> { panic!("boom") });
        }));
        assert!(result.is_err());
        assert_eq!(reg.active_count(), 0);
    }

    #[test]
    fn test_drop_releases_registration() {
        let dir = TempDir::new().unwrap();
        let (_backend, reg) = registry(&dir, Duration::from_secs(60));
        {
            let _snap = reg.create(None).unwrap();
            assert_eq!(reg.active_count(), 1);
        }
        assert_eq!(reg.active_count(), 0);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let dir = TempDir::new().unwrap();
        let (_backend, reg) = registry(&dir, Duration::from_secs(60));
        let snap = reg.create(None).unwrap();
        reg.shutdown();
        assert!(snap.is_released());
        assert!(matches!(snap.get(Cf::Meta, b"k"), Err(Error::Closed)));
        assert!(reg.create(None).is_err());
    }
}
