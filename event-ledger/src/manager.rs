//! Cross-ledger coordination
//!
//! The manager owns one ledger per declared category, constructed eagerly
//! with a shared notification pool. It holds no per-event logic of its
//! own: every read/write/subscribe call is a direct dispatch to the
//! addressed category's ledger.

use crate::{
    clock::{Clock, SystemClock},
    config::Config,
    ledger::{BulkModeGuard, EventStream, EventStreamRev, Ledger, LedgerHealth},
    metrics::Metrics,
    notify::{NotificationPool, Subscriber},
    types::{Category, Event, Payload},
    Result,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Bounded wait for each ledger during shutdown
const STOP_WAIT_PER_LEDGER: Duration = Duration::from_secs(10);

struct BufferedWrite {
    category: Category,
    payload: Payload,
    timestamp: DateTime<Utc>,
}

/// Coordinates the fixed set of per-category ledgers.
pub struct LedgerManager {
    config: Config,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    pool: Arc<NotificationPool>,
    ledgers: HashMap<Category, Arc<Ledger>>,
    running: AtomicBool,
    ready: AtomicBool,
    hydrated: AtomicBool,
    buffered: Mutex<Vec<BufferedWrite>>,
}

impl LedgerManager {
    /// Create a manager with the system clock
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a manager with an injected clock.
    ///
    /// Every declared category gets its ledger eagerly, sharing one
    /// notification pool whose shutdown belongs to the manager alone.
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let metrics = Arc::new(Metrics::new()?);
        let pool = Arc::new(NotificationPool::new(
            "ledger",
            config.notification.shared_workers,
            config.notification.queue_capacity,
        )?);

        let mut ledgers = HashMap::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let path = config.data_dir.join(category.file_name());
            let ledger = Ledger::new(
                category,
                path,
                &config,
                Arc::clone(&clock),
                Some(Arc::clone(&pool)),
                Arc::clone(&metrics),
            )?;
            ledgers.insert(category, Arc::new(ledger));
        }
        info!(
            count = ledgers.len(),
            data_dir = %config.data_dir.display(),
            "ledger manager initialized"
        );

        Ok(Self {
            config,
            clock,
            metrics,
            pool,
            ledgers,
            running: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            hydrated: AtomicBool::new(false),
            buffered: Mutex::new(Vec::new()),
        })
    }

    /// The ledger owning a category
    pub fn ledger(&self, category: Category) -> &Arc<Ledger> {
        self.ledgers
            .get(&category)
            .expect("a ledger exists for every declared category")
    }

    /// Path of a category's record file
    pub fn ledger_file(&self, category: Category) -> &Path {
        self.ledger(category).path()
    }

    /// Open every ledger's append handle and mark the system ready,
    /// draining any writes buffered before startup completed.
    pub fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        for category in Category::ALL {
            self.ledger(category).start()?;
        }
        self.set_system_ready();
        info!("ledger manager running");
        Ok(())
    }

    /// Mark the system ready and replay buffered writes, in arrival
    /// order, through the normal write path.
    pub fn set_system_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        let buffered = std::mem::take(&mut *self.buffered.lock());
        if !buffered.is_empty() {
            info!(count = buffered.len(), "draining buffered writes");
        }
        for write in buffered {
            self.ledger(write.category)
                .write_event(write.payload, Some(write.timestamp));
        }
    }

    /// Whether the readiness gate is open
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Route a write to its category's ledger.
    ///
    /// Before the system is ready the write is buffered (and the sentinel
    /// returned); after `stop()` writes are rejected outright.
    pub fn write_event(
        &self,
        category: Category,
        payload: Payload,
        timestamp: Option<DateTime<Utc>>,
    ) -> Option<u64> {
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }
        if !self.ready.load(Ordering::SeqCst) {
            let timestamp = timestamp.unwrap_or_else(|| self.clock.now());
            self.buffered.lock().push(BufferedWrite {
                category,
                payload,
                timestamp,
            });
            return None;
        }
        self.ledger(category).write_event(payload, timestamp)
    }

    /// Read up to `limit` events of a category
    pub fn read_events(&self, category: Category, limit: Option<usize>) -> Vec<Event> {
        self.ledger(category).read_events(limit)
    }

    /// Stream a category's events oldest-first
    pub fn stream_events(&self, category: Category) -> EventStream {
        self.ledger(category).stream_events()
    }

    /// Stream a category's events newest-first
    pub fn stream_events_rev(&self, category: Category) -> EventStreamRev {
        self.ledger(category).stream_events_rev()
    }

    /// Stream a category's events, filtered
    pub fn stream_events_filtered<F>(
        &self,
        category: Category,
        filter: F,
    ) -> impl Iterator<Item = Event>
    where
        F: Fn(&Event) -> bool,
    {
        self.ledger(category).stream_events_filtered(filter)
    }

    /// Most recent event of a category
    pub fn latest_event(&self, category: Category) -> Option<Event> {
        self.ledger(category).latest_event()
    }

    /// Subscribe to a category's events
    pub fn subscribe(
        &self,
        category: Category,
        name: impl Into<String>,
        callback: Arc<dyn Subscriber>,
    ) {
        self.ledger(category).subscribe(name, callback);
    }

    /// Enter bulk write mode on every ledger.
    ///
    /// Dropping the guard clears every bulk flag and forces a flush on
    /// every ledger, on any exit path.
    pub fn bulk_write_mode(&self) -> BulkWriteGuard<'_> {
        info!("entering bulk write mode");
        BulkWriteGuard {
            _guards: Category::ALL
                .iter()
                .map(|category| self.ledger(*category).bulk_write_mode())
                .collect(),
        }
    }

    /// Flush every ledger with pending dirty writes; returns the count
    /// flushed (housekeeping contract).
    pub fn flush_all(&self) -> usize {
        Category::ALL
            .iter()
            .filter(|category| self.ledger(**category).force_flush())
            .count()
    }

    /// Hydrate the configured transactional categories into memory with
    /// the look-back window. Idempotent: runs at most once.
    ///
    /// Returns the number of records hydrated.
    pub fn load_historical_data(&self) -> usize {
        if self.hydrated.swap(true, Ordering::SeqCst) {
            debug!("historical data already loaded");
            return 0;
        }
        let cutoff =
            self.clock.now() - ChronoDuration::hours(self.config.hydration.lookback_hours);
        let mut total = 0;
        for &category in &self.config.hydration.categories {
            let count = self.ledger(category).hydrate(cutoff);
            if count > 0 {
                info!(category = %category, count, "hydrated ledger into memory");
            }
            total += count;
        }
        info!(total, "historical data loading completed");
        total
    }

    /// Prune every mirror with the given look-back window; returns the
    /// total number of records removed.
    pub fn cleanup_memory_ledgers(&self, hours_to_keep: i64) -> usize {
        let cutoff = self.clock.now() - ChronoDuration::hours(hours_to_keep);
        let mut total = 0;
        for category in Category::ALL {
            let removed = self.ledger(category).cleanup_memory(cutoff);
            if removed > 0 {
                info!(category = %category, removed, "pruned memory mirror");
            }
            total += removed;
        }
        total
    }

    /// Enable mirror-backed reads for a category, loading its existing
    /// records from disk. Returns the number of records loaded.
    pub fn enable_memory_ledger(&self, category: Category) -> usize {
        let ledger = self.ledger(category);
        let count = ledger.hydrate(DateTime::<Utc>::MIN_UTC);
        // Keep the mirror authoritative even for an empty file
        ledger.enable_memory_cache();
        count
    }

    /// Disable mirror-backed reads for a category
    pub fn disable_memory_ledger(&self, category: Category) {
        self.ledger(category).disable_memory_cache();
    }

    /// Whether a category currently serves reads from its mirror
    pub fn is_memory_enabled(&self, category: Category) -> bool {
        self.ledger(category).is_memory_enabled()
    }

    /// Snapshot of a category's mirror contents
    pub fn memory_events(&self, category: Category) -> Vec<Event> {
        self.ledger(category).memory_events()
    }

    /// Per-category record counts, from the record files
    pub fn event_counts(&self) -> HashMap<Category, u64> {
        use std::io::BufRead;
        let mut counts = HashMap::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let count = match std::fs::File::open(self.ledger_file(category)) {
                Ok(file) => std::io::BufReader::new(file)
                    .lines()
                    .map_while(|line| line.ok())
                    .filter(|line| !line.trim().is_empty())
                    .count() as u64,
                Err(_) => 0,
            };
            counts.insert(category, count);
        }
        counts
    }

    /// Stop every ledger concurrently, waiting a bounded interval per
    /// ledger, then shut the shared notification pool down exactly once.
    ///
    /// A ledger that misses its window is abandoned (logged) so shutdown
    /// never blocks process exit.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(count = self.ledgers.len(), "stopping ledgers");

        let (done_tx, done_rx) = crossbeam::channel::unbounded::<Category>();
        let mut expected = 0;
        for (category, ledger) in &self.ledgers {
            let category = *category;
            let for_thread = Arc::clone(ledger);
            let done_tx = done_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("stop-{}", category.wire_name()))
                .spawn(move || {
                    for_thread.stop();
                    let _ = done_tx.send(category);
                });
            match spawned {
                Ok(_) => expected += 1,
                Err(err) => {
                    warn!(
                        category = %category,
                        error = %err,
                        "stop thread spawn failed, stopping inline"
                    );
                    ledger.stop();
                }
            }
        }
        drop(done_tx);

        for _ in 0..expected {
            match done_rx.recv_timeout(STOP_WAIT_PER_LEDGER) {
                Ok(category) => debug!(category = %category, "ledger stopped"),
                Err(_) => {
                    error!("timed out waiting for a ledger to stop, abandoning it");
                }
            }
        }

        self.pool.shutdown();
        info!("ledger manager stopped");
    }

    /// Aggregated health snapshot
    pub fn health(&self) -> ManagerHealth {
        let ledgers: Vec<LedgerHealth> = Category::ALL
            .iter()
            .map(|category| self.ledger(*category).health())
            .collect();
        let memory_categories: Vec<Category> = Category::ALL
            .iter()
            .copied()
            .filter(|category| self.ledger(*category).is_memory_enabled())
            .collect();

        ManagerHealth {
            status: if self.running.load(Ordering::SeqCst) {
                ManagerStatus::Running
            } else {
                ManagerStatus::Stopped
            },
            data_dir: self.config.data_dir.clone(),
            system_ready: self.ready.load(Ordering::SeqCst),
            historical_data_loaded: self.hydrated.load(Ordering::SeqCst),
            memory_categories,
            ledgers,
        }
    }

    /// Metrics collector shared by all ledgers
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl std::fmt::Debug for LedgerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerManager")
            .field("data_dir", &self.config.data_dir)
            .field("ready", &self.ready.load(Ordering::SeqCst))
            .finish()
    }
}

/// RAII guard for cross-ledger bulk write mode
pub struct BulkWriteGuard<'a> {
    _guards: Vec<BulkModeGuard<'a>>,
}

impl Drop for BulkWriteGuard<'_> {
    fn drop(&mut self) {
        info!("exiting bulk write mode");
        // per-ledger guards flush as they drop
    }
}

/// Manager status in health snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerStatus {
    /// Accepting writes
    Running,
    /// Stopped
    Stopped,
}

/// Aggregated manager health snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ManagerHealth {
    /// Running/stopped status
    pub status: ManagerStatus,
    /// Storage directory
    pub data_dir: PathBuf,
    /// Whether the readiness gate is open
    pub system_ready: bool,
    /// Whether bulk historical hydration has run
    pub historical_data_loaded: bool,
    /// Categories currently serving reads from memory
    pub memory_categories: Vec<Category>,
    /// Per-ledger snapshots, in declaration order
    pub ledgers: Vec<LedgerHealth>,
}
