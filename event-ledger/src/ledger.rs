//! Single-category ledger engine
//!
//! Owns one append-only record file. Sequence-id assignment, the file
//! append, mirror maintenance, and flush accounting all happen under one
//! writer mutex, so ids are gapless and file order matches id order even
//! under concurrent writers. Lock order is writer → mirror; neither lock
//! is held across a subscriber callback.
//!
//! # Flush regimes
//!
//! - *Auto*: flush + fsync after every write
//! - *Periodic*: flush after N writes or T elapsed, whichever first
//! - *Bulk*: periodic checks suspended while the bulk depth is non-zero;
//!   the outermost [`BulkModeGuard`] flushes on exit

use crate::{
    clock::Clock,
    config::Config,
    metrics::Metrics,
    notify::{deliver, NotificationPool, Subscriber, Subscription},
    reader::{ForwardReader, ReverseReader},
    types::{Category, Event, Payload},
    Error, Result,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Bytes read from the end of the file during startup recovery
const TAIL_SCAN_BYTES: u64 = 4096;

#[derive(Debug, Clone, Copy)]
struct FlushPolicy {
    auto_flush: bool,
    interval_writes: u64,
    interval: Duration,
    flush_before_read: bool,
}

impl FlushPolicy {
    fn from_config(config: &Config) -> Self {
        Self {
            auto_flush: config.flush.auto_flush,
            interval_writes: config.flush.interval_writes,
            interval: Duration::from_secs_f64(config.flush.interval_secs),
            flush_before_read: config.flush.flush_before_read,
        }
    }
}

/// State guarded by the writer mutex
struct Writer {
    handle: Option<BufWriter<File>>,
    sequence: u64,
    dirty: bool,
    writes_since_flush: u64,
    last_flush: Instant,
    bulk_depth: u32,
}

/// State guarded by the mirror mutex
struct MirrorState {
    enabled: bool,
    events: Vec<Event>,
}

/// Append-only, single-category durable log with an optional in-memory
/// mirror and asynchronous subscriber notification.
pub struct Ledger {
    category: Category,
    path: PathBuf,
    policy: FlushPolicy,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    writer: Mutex<Writer>,
    mirror: Mutex<MirrorState>,
    subscribers: Mutex<Vec<Arc<Subscription>>>,
    pool: Arc<NotificationPool>,
    owns_pool: bool,
    accepting: AtomicBool,
}

impl Ledger {
    /// Construct a ledger for one category, recovering the sequence
    /// counter from the existing record file.
    ///
    /// When `pool` is `None` the ledger spawns (and later shuts down) its
    /// own worker pool sized by the category table; an injected pool is
    /// borrowed and its shutdown stays with whoever created it.
    pub fn new(
        category: Category,
        path: PathBuf,
        config: &Config,
        clock: Arc<dyn Clock>,
        pool: Option<Arc<NotificationPool>>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let (pool, owns_pool) = match pool {
            Some(pool) => (pool, false),
            None => {
                let workers = config.notification.pool_size_for(category);
                let pool = NotificationPool::new(
                    category.wire_name(),
                    workers,
                    config.notification.queue_capacity,
                )?;
                (Arc::new(pool), true)
            }
        };

        let sequence = recover_sequence(category, &path);
        info!(category = %category, sequence, "ledger initialized");

        Ok(Self {
            category,
            path,
            policy: FlushPolicy::from_config(config),
            clock,
            metrics,
            writer: Mutex::new(Writer {
                handle: None,
                sequence,
                dirty: false,
                writes_since_flush: 0,
                last_flush: Instant::now(),
                bulk_depth: 0,
            }),
            mirror: Mutex::new(MirrorState {
                enabled: false,
                events: Vec::new(),
            }),
            subscribers: Mutex::new(Vec::new()),
            pool,
            owns_pool,
            accepting: AtomicBool::new(false),
        })
    }

    /// Owning category
    pub fn category(&self) -> Category {
        self.category
    }

    /// Path of the record file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the append handle and start accepting writes
    pub fn start(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if writer.handle.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            writer.handle = Some(BufWriter::new(file));
            writer.last_flush = Instant::now();
        }
        self.accepting.store(true, Ordering::SeqCst);
        info!(
            category = %self.category,
            path = %self.path.display(),
            auto_flush = self.policy.auto_flush,
            "ledger started"
        );
        Ok(())
    }

    /// Stop accepting writes, flush and close the append handle.
    ///
    /// Best-effort: close failures are logged, never propagated.
    pub fn stop(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        {
            let mut writer = self.writer.lock();
            let pending = writer.writes_since_flush;
            if let Some(mut handle) = writer.handle.take() {
                let closed = handle.flush().and_then(|_| handle.get_ref().sync_all());
                match closed {
                    Ok(()) => {
                        if pending > 0 {
                            debug!(category = %self.category, pending, "final flush on stop");
                        }
                    }
                    Err(err) => {
                        error!(category = %self.category, error = %err, "error closing record file");
                    }
                }
            }
            writer.dirty = false;
            writer.writes_since_flush = 0;
        }
        if self.owns_pool {
            self.pool.shutdown();
        }
        info!(category = %self.category, "ledger stopped");
    }

    /// Append one event.
    ///
    /// The effective timestamp is the explicit argument, else a
    /// `timestamp` string field embedded in the payload, else the clock.
    /// Returns the assigned sequence id, or `None` when the ledger is not
    /// accepting writes or the write failed (logged, never a panic).
    pub fn write_event(
        &self,
        payload: Payload,
        timestamp: Option<DateTime<Utc>>,
    ) -> Option<u64> {
        if !self.accepting.load(Ordering::SeqCst) {
            debug!(category = %self.category, "write rejected, ledger not accepting");
            return None;
        }

        let started = Instant::now();
        match self.append(payload, timestamp) {
            Ok(event) => {
                let sequence_id = event.sequence_id;
                self.metrics.events_total.inc();
                self.metrics
                    .append_duration
                    .observe(started.elapsed().as_secs_f64());
                self.notify(event);
                sequence_id
            }
            Err(err) => {
                self.metrics.write_errors_total.inc();
                error!(category = %self.category, error = %err, "failed to write event");
                None
            }
        }
    }

    fn append(&self, payload: Payload, timestamp: Option<DateTime<Utc>>) -> Result<Event> {
        let timestamp = self.effective_timestamp(&payload, timestamp);

        let mut writer = self.writer.lock();
        let sequence = writer.sequence + 1;

        let event = Event {
            category: self.category,
            timestamp,
            data: payload,
            sequence_id: Some(sequence),
        };
        let line = serde_json::to_string(&event)?;

        let handle = writer
            .handle
            .as_mut()
            .ok_or(Error::NotAccepting(self.category))?;
        handle.write_all(line.as_bytes())?;
        handle.write_all(b"\n")?;

        writer.sequence = sequence;
        writer.dirty = true;
        writer.writes_since_flush += 1;
        self.apply_flush_policy(&mut writer)?;

        // Mirror append stays inside the writer critical section so mirror
        // order always matches file order
        {
            let mut mirror = self.mirror.lock();
            if mirror.enabled {
                mirror.events.push(event.clone());
            }
        }

        Ok(event)
    }

    fn effective_timestamp(
        &self,
        payload: &Payload,
        explicit: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        if let Some(timestamp) = explicit {
            return timestamp;
        }
        if let Some(text) = payload.get("timestamp").and_then(|value| value.as_str()) {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return parsed.with_timezone(&Utc);
            }
        }
        self.clock.now()
    }

    fn apply_flush_policy(&self, writer: &mut Writer) -> Result<()> {
        if self.policy.auto_flush {
            return self.flush_locked(writer);
        }
        if writer.bulk_depth > 0 {
            // Bulk mode: flush only on explicit request or bulk exit
            return Ok(());
        }
        if writer.writes_since_flush >= self.policy.interval_writes
            || writer.last_flush.elapsed() >= self.policy.interval
        {
            if let Err(err) = self.flush_locked(writer) {
                warn!(category = %self.category, error = %err, "periodic flush failed");
            }
        }
        Ok(())
    }

    fn flush_locked(&self, writer: &mut Writer) -> Result<()> {
        if let Some(handle) = writer.handle.as_mut() {
            handle.flush()?;
            handle.get_ref().sync_data()?;
        }
        let pending = writer.writes_since_flush;
        writer.dirty = false;
        writer.writes_since_flush = 0;
        writer.last_flush = Instant::now();
        self.metrics.flushes_total.inc();
        if pending > 0 {
            debug!(category = %self.category, pending, "flushed");
        }
        Ok(())
    }

    /// Force a flush of pending writes.
    ///
    /// Returns `true` iff a flush actually happened; a clean ledger is a
    /// no-op returning `false`.
    pub fn force_flush(&self) -> bool {
        let mut writer = self.writer.lock();
        if writer.handle.is_none() || !writer.dirty {
            return false;
        }
        match self.flush_locked(&mut writer) {
            Ok(()) => true,
            Err(err) => {
                error!(category = %self.category, error = %err, "failed to force flush");
                false
            }
        }
    }

    fn ensure_flushed(&self) {
        if self.policy.flush_before_read && self.is_dirty() {
            self.force_flush();
        }
    }

    /// Whether unflushed writes exist
    pub fn is_dirty(&self) -> bool {
        self.writer.lock().dirty
    }

    /// Current sequence counter (highest assigned id)
    pub fn sequence(&self) -> u64 {
        self.writer.lock().sequence
    }

    /// Enter bulk write mode; periodic flush checks are suspended until
    /// the outermost guard drops, which then forces a flush.
    ///
    /// Re-entrant: nested guards only bump a depth counter.
    pub fn bulk_write_mode(&self) -> BulkModeGuard<'_> {
        self.writer.lock().bulk_depth += 1;
        BulkModeGuard { ledger: self }
    }

    /// Enable mirror-backed reads. The mirror starts from whatever it
    /// already contains; use [`Ledger::hydrate`] to rebuild it from disk.
    pub fn enable_memory_cache(&self) {
        self.mirror.lock().enabled = true;
        debug!(category = %self.category, "memory mirror enabled");
    }

    /// Disable mirror-backed reads and clear the mirror
    pub fn disable_memory_cache(&self) {
        let mut mirror = self.mirror.lock();
        mirror.enabled = false;
        mirror.events.clear();
        debug!(category = %self.category, "memory mirror disabled");
    }

    /// Whether reads are currently served from the mirror
    pub fn is_memory_enabled(&self) -> bool {
        self.mirror.lock().enabled
    }

    /// Snapshot of the mirror contents
    pub fn memory_events(&self) -> Vec<Event> {
        self.mirror.lock().events.clone()
    }

    /// Rebuild the mirror from disk, keeping records with
    /// `timestamp >= cutoff`.
    ///
    /// The existing mirror is cleared first so peak memory stays bounded;
    /// reads flip to memory-backed only once at least one record loaded.
    pub fn hydrate(&self, cutoff: DateTime<Utc>) -> usize {
        if !self.path.exists() {
            return 0;
        }

        {
            let mut mirror = self.mirror.lock();
            mirror.events.clear();
            mirror.enabled = false;
        }

        self.ensure_flushed();
        let stream = match ForwardReader::open(&self.path) {
            Ok(stream) => stream,
            Err(err) => {
                error!(category = %self.category, error = %err, "failed to hydrate");
                return 0;
            }
        };

        let mut count = 0;
        for event in stream {
            if event.timestamp >= cutoff {
                self.mirror.lock().events.push(event);
                count += 1;
            }
        }

        if count > 0 {
            self.mirror.lock().enabled = true;
        }
        debug!(category = %self.category, count, "hydrated memory mirror");
        count
    }

    /// Prune mirror records with `timestamp < cutoff` in place.
    ///
    /// Returns the removed count; a disabled mirror is a no-op.
    pub fn cleanup_memory(&self, cutoff: DateTime<Utc>) -> usize {
        let mut mirror = self.mirror.lock();
        if !mirror.enabled {
            return 0;
        }
        let before = mirror.events.len();
        mirror.events.retain(|event| event.timestamp >= cutoff);
        before - mirror.events.len()
    }

    /// Read up to `limit` events from the front of the log
    pub fn read_events(&self, limit: Option<usize>) -> Vec<Event> {
        let stream = self.stream_events();
        match limit {
            Some(limit) => stream.take(limit).collect(),
            None => stream.collect(),
        }
    }

    /// Stream events oldest-first.
    ///
    /// Memory-backed when the mirror is enabled, otherwise streamed from
    /// disk; either way pending writes are flushed first for consistency.
    pub fn stream_events(&self) -> EventStream {
        self.ensure_flushed();
        {
            let mirror = self.mirror.lock();
            if mirror.enabled {
                return EventStream::Memory(mirror.events.clone().into_iter());
            }
        }
        if !self.path.exists() {
            return EventStream::Empty;
        }
        match ForwardReader::open(&self.path) {
            Ok(reader) => EventStream::Disk(reader),
            Err(err) => {
                error!(category = %self.category, error = %err, "failed to open record file");
                EventStream::Empty
            }
        }
    }

    /// Stream events newest-first
    pub fn stream_events_rev(&self) -> EventStreamRev {
        self.ensure_flushed();
        {
            let mirror = self.mirror.lock();
            if mirror.enabled {
                return EventStreamRev::Memory(mirror.events.clone().into_iter().rev());
            }
        }
        if !self.path.exists() {
            return EventStreamRev::Empty;
        }
        match ReverseReader::open(&self.path) {
            Ok(reader) => EventStreamRev::Disk(reader),
            Err(err) => {
                error!(category = %self.category, error = %err, "failed to open record file");
                EventStreamRev::Empty
            }
        }
    }

    /// Stream events oldest-first, keeping those matching `filter`
    pub fn stream_events_filtered<F>(&self, filter: F) -> impl Iterator<Item = Event>
    where
        F: Fn(&Event) -> bool,
    {
        self.stream_events().filter(move |event| filter(event))
    }

    /// Most recent event, if any
    pub fn latest_event(&self) -> Option<Event> {
        self.stream_events_rev().next()
    }

    /// Register a subscriber.
    ///
    /// The cursor starts at the current sequence counter, so only events
    /// written strictly after the subscription are delivered.
    pub fn subscribe(&self, name: impl Into<String>, callback: Arc<dyn Subscriber>) {
        let name = name.into();
        let cursor = self.sequence();
        let subscription = Arc::new(Subscription {
            name: name.clone(),
            cursor: AtomicU64::new(cursor),
            callback,
        });
        self.subscribers.lock().push(subscription);
        info!(
            category = %self.category,
            subscriber = %name,
            starting_after = cursor,
            "subscriber registered"
        );
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn notify(&self, event: Event) {
        let subscriptions: Vec<Arc<Subscription>> = self.subscribers.lock().clone();
        if subscriptions.is_empty() {
            return;
        }
        let category = self.category;
        let metrics = Arc::clone(&self.metrics);
        let job = Box::new(move || deliver(category, &subscriptions, &event, &metrics));
        if let Err(job) = self.pool.submit(job) {
            // Pool saturated or shut down: deliver on the writer thread
            job();
        }
    }

    /// Health snapshot
    pub fn health(&self) -> LedgerHealth {
        let writer = self.writer.lock();
        let status = if writer.handle.is_some() && self.accepting.load(Ordering::SeqCst) {
            LedgerStatus::Open
        } else {
            LedgerStatus::Closed
        };
        LedgerHealth {
            category: self.category,
            status,
            sequence: writer.sequence,
            dirty: writer.dirty,
            subscriber_count: self.subscriber_count(),
            notification_queue_depth: self.pool.queue_depth(),
        }
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("category", &self.category)
            .field("path", &self.path)
            .finish()
    }
}

/// RAII guard for bulk write mode
pub struct BulkModeGuard<'a> {
    ledger: &'a Ledger,
}

impl Drop for BulkModeGuard<'_> {
    fn drop(&mut self) {
        let mut writer = self.ledger.writer.lock();
        writer.bulk_depth = writer.bulk_depth.saturating_sub(1);
        if writer.bulk_depth == 0 && writer.dirty {
            if let Err(err) = self.ledger.flush_locked(&mut writer) {
                error!(
                    category = %self.ledger.category,
                    error = %err,
                    "failed to flush on bulk-mode exit"
                );
            }
        }
    }
}

/// Forward event stream, memory- or disk-backed
pub enum EventStream {
    /// Snapshot of the memory mirror
    Memory(std::vec::IntoIter<Event>),
    /// Streamed from the record file
    Disk(ForwardReader),
    /// No record file yet
    Empty,
}

impl Iterator for EventStream {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        match self {
            EventStream::Memory(events) => events.next(),
            EventStream::Disk(reader) => reader.next(),
            EventStream::Empty => None,
        }
    }
}

/// Reverse event stream, memory- or disk-backed
pub enum EventStreamRev {
    /// Snapshot of the memory mirror, walked backward
    Memory(std::iter::Rev<std::vec::IntoIter<Event>>),
    /// Chunked backward reads of the record file
    Disk(ReverseReader),
    /// No record file yet
    Empty,
}

impl Iterator for EventStreamRev {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        match self {
            EventStreamRev::Memory(events) => events.next(),
            EventStreamRev::Disk(reader) => reader.next(),
            EventStreamRev::Empty => None,
        }
    }
}

/// Ledger status in health snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    /// Append handle open, accepting writes
    Open,
    /// Stopped or never started
    Closed,
}

/// Per-ledger health snapshot
#[derive(Debug, Clone, Serialize)]
pub struct LedgerHealth {
    /// Owning category
    pub category: Category,
    /// Open/closed status
    pub status: LedgerStatus,
    /// Highest assigned sequence id
    pub sequence: u64,
    /// Whether unflushed writes exist
    pub dirty: bool,
    /// Registered subscriber count
    pub subscriber_count: usize,
    /// Queued notification jobs
    pub notification_queue_depth: usize,
}

/// Recover the sequence counter from the record file.
///
/// Tail scan first; full scan as fallback; an unrecoverable file starts
/// at zero with a warning rather than failing startup.
fn recover_sequence(category: Category, path: &Path) -> u64 {
    let length = match std::fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(_) => return 0,
    };
    if length == 0 {
        return 0;
    }

    match tail_scan(path, length) {
        Ok(Some(sequence)) => {
            debug!(category = %category, sequence, "recovered sequence counter from tail scan");
            return sequence;
        }
        Ok(None) => {
            warn!(category = %category, "tail scan found no sequence id, falling back to full scan");
        }
        Err(err) => {
            warn!(category = %category, error = %err, "tail scan failed, falling back to full scan");
        }
    }

    match full_scan(path) {
        Ok(Some(sequence)) => {
            info!(category = %category, sequence, "recovered sequence counter from full scan");
            sequence
        }
        Ok(None) => {
            warn!(
                category = %category,
                "no sequence id recovered from non-empty record file, starting at zero"
            );
            0
        }
        Err(err) => {
            warn!(category = %category, error = %err, "recovery scan failed, starting at zero");
            0
        }
    }
}

fn tail_scan(path: &Path, length: u64) -> std::io::Result<Option<u64>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(length.saturating_sub(TAIL_SCAN_BYTES)))?;
    let mut tail = Vec::with_capacity(TAIL_SCAN_BYTES as usize);
    file.read_to_end(&mut tail)?;

    let text = String::from_utf8_lossy(&tail);
    for line in text.lines().rev() {
        if let Some(sequence) = line_sequence_id(line) {
            return Ok(Some(sequence));
        }
    }
    Ok(None)
}

fn full_scan(path: &Path) -> std::io::Result<Option<u64>> {
    let file = File::open(path)?;
    let mut highest: Option<u64> = None;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Some(sequence) = line_sequence_id(&line) {
            highest = Some(highest.map_or(sequence, |current| current.max(sequence)));
        }
    }
    Ok(highest)
}

fn line_sequence_id(line: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    value.get("sequence_id")?.as_u64()
}
