//! The statistics server
//!
//! A dedicated thread owns the cached snapshot and is the only writer.
//! Callers interact synchronously with a timeout — an unbounded wait is
//! not representable in this API. Rebuild triggers:
//!
//! - explicit [`StatsServer::refresh`] under the caller's timeout,
//! - the modification counter crossing its threshold (one rebuild is
//!   scheduled; further notifications are swallowed until it finishes),
//! - a periodic tick that rebuilds only when the counter is non-zero.
//!
//! On [`StatsServer::terminate`] the last snapshot is persisted. A
//! persistence failure that reports corruption panics the server thread:
//! statistics corruption on the write path is invariant-level.

use crate::collector;
use crate::model::{self, Statistics};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};
use triad_core::{Error, ErrorKind, Result};
use triad_storage::{Backend, ReadView};

/// Configuration for the statistics server.
#[derive(Debug, Clone)]
pub struct StatsConfig {
    /// Modification count that schedules a background rebuild
    pub modification_threshold: u64,
    /// Periodic tick interval
    pub tick_interval: Duration,
    /// Numeric histogram bucket count
    pub bucket_count: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            modification_threshold: 10_000,
            tick_interval: Duration::from_secs(3_600),
            bucket_count: 100,
        }
    }
}

enum Command {
    Refresh { reply: SyncSender<Result<()>> },
    Notify { count: u64 },
    Terminate,
}

/// Handle to the statistics server thread.
pub struct StatsServer {
    tx: Sender<Command>,
    cached: Arc<RwLock<Arc<Statistics>>>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StatsServer {
    /// Start the server, seeding the cache from the persisted record
    /// when a valid one exists.
    pub fn start(backend: Arc<Backend>, config: StatsConfig) -> Result<StatsServer> {
        let seeded = model::load(&backend)?.unwrap_or_default();
        let cached = Arc::new(RwLock::new(Arc::new(seeded)));
        let (tx, rx) = mpsc::channel();

        let worker_cache = Arc::clone(&cached);
        let worker = std::thread::Builder::new()
            .name("triad-stats".to_string())
            .spawn(move || server_loop(backend, config, worker_cache, rx))
            .map_err(|e| Error::internal(format!("failed to spawn stats server: {e}")))?;

        Ok(StatsServer {
            tx,
            cached,
            worker: parking_lot::Mutex::new(Some(worker)),
        })
    }

    /// The cached snapshot. Never blocks on a rebuild.
    pub fn snapshot(&self) -> Arc<Statistics> {
        Arc::clone(&self.cached.read())
    }

    /// Rebuild synchronously under the caller's timeout and return the
    /// fresh snapshot.
    pub fn refresh(&self, timeout: Duration) -> Result<Arc<Statistics>> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.tx
            .send(Command::Refresh { reply: reply_tx })
            .map_err(|_| Error::Closed)?;
        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result.map(|()| self.snapshot()),
            Err(RecvTimeoutError::Timeout) => Err(Error::timeout(timeout.as_millis() as u64)),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Closed),
        }
    }

    /// Report `count` data modifications (loads, inserts, deletes).
    pub fn notify_modifications(&self, count: u64) {
        // After terminate this is a no-op by design.
        let _ = self.tx.send(Command::Notify { count });
    }

    /// Stop the server, persisting the last snapshot.
    pub fn terminate(&self) {
        let _ = self.tx.send(Command::Terminate);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl std::fmt::Debug for StatsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsServer").finish()
    }
}

fn server_loop(
    backend: Arc<Backend>,
    config: StatsConfig,
    cached: Arc<RwLock<Arc<Statistics>>>,
    rx: Receiver<Command>,
) {
    let mut modifications: u64 = 0;
    // Guards against scheduling a second rebuild for the same burst of
    // notifications while one is already running on this thread.
    let mut rebuild_scheduled = false;

    loop {
        match rx.recv_timeout(config.tick_interval) {
            Ok(Command::Refresh { reply }) => {
                let result = rebuild(&backend, &config, &cached);
                if result.is_ok() {
                    modifications = 0;
                    rebuild_scheduled = false;
                }
                let _ = reply.send(result);
            }
            Ok(Command::Notify { count }) => {
                modifications = modifications.saturating_add(count);
                if modifications >= config.modification_threshold && !rebuild_scheduled {
                    rebuild_scheduled = true;
                    debug!(modifications, "modification threshold crossed, rebuilding");
                    if rebuild(&backend, &config, &cached).is_ok() {
                        modifications = 0;
                    }
                    rebuild_scheduled = false;
                }
            }
            Ok(Command::Terminate) => {
                persist(&backend, &cached.read());
                info!("statistics server terminated");
                return;
            }
            Err(RecvTimeoutError::Timeout) => {
                if modifications > 0 {
                    debug!(modifications, "periodic statistics tick");
                    if rebuild(&backend, &config, &cached).is_ok() {
                        modifications = 0;
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                persist(&backend, &cached.read());
                return;
            }
        }
    }
}

fn rebuild(
    backend: &Arc<Backend>,
    config: &StatsConfig,
    cached: &Arc<RwLock<Arc<Statistics>>>,
) -> Result<()> {
    match collector::collect(ReadView::Live(backend), config.bucket_count) {
        Ok(stats) => {
            let stats = Arc::new(stats);
            persist(backend, &stats);
            *cached.write() = stats;
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "statistics rebuild failed");
            Err(e)
        }
    }
}

fn persist(backend: &Backend, stats: &Statistics) {
    if let Err(e) = model::save(backend, stats) {
        if e.kind() == ErrorKind::Corrupted {
            // Invariant-level: a corrupt statistics write must not be
            // silently survived.
            panic!("statistics corruption on write path: {e}");
        }
        error!(error = %e, "failed to persist statistics");
    }
}
