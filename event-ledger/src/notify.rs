//! Subscriber notification
//!
//! Delivery runs on a bounded worker pool. Submission never blocks the
//! writer: when the queue is full or the pool is shut down, delivery
//! degrades to synchronous execution on the writer thread.
//!
//! Each subscription carries a cursor of the last delivered sequence id;
//! a subscriber only ever sees ids strictly greater than its cursor, so
//! joining mid-stream never replays history and pool reordering never
//! delivers out of order.

use crate::metrics::Metrics;
use crate::types::{Category, Event};
use crate::Result;
use crossbeam::channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Callback interface for ledger subscribers.
///
/// Failures are isolated per invocation: an `Err` is counted and logged,
/// and delivery continues for other subscribers and future events.
pub trait Subscriber: Send + Sync {
    /// Handle one persisted event
    fn on_event(&self, event: &Event) -> Result<()>;
}

/// One registered subscriber with its delivery cursor
pub(crate) struct Subscription {
    pub(crate) name: String,
    /// Last delivered sequence id
    pub(crate) cursor: AtomicU64,
    pub(crate) callback: Arc<dyn Subscriber>,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Bounded worker pool for subscriber delivery.
///
/// May be shared across ledgers by injection; whoever constructed it is
/// responsible for calling [`NotificationPool::shutdown`] exactly once.
pub struct NotificationPool {
    tx: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl NotificationPool {
    /// Spawn a pool with the given worker count and queue capacity
    pub fn new(name: &str, workers: usize, queue_capacity: usize) -> Result<Self> {
        let (tx, rx) = bounded::<Job>(queue_capacity);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-notify-{}", name, index))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })?;
            handles.push(handle);
        }
        info!(pool = name, workers, "notification pool started");
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Submit a delivery job.
    ///
    /// Returns the job back to the caller when the pool cannot accept it
    /// (queue full or shut down) so it can run inline instead.
    pub(crate) fn submit(&self, job: Job) -> std::result::Result<(), Job> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(job);
        }
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => tx.try_send(job).map_err(|err| match err {
                TrySendError::Full(job) | TrySendError::Disconnected(job) => job,
            }),
            None => Err(job),
        }
    }

    /// Number of queued, not-yet-executed delivery jobs
    pub fn queue_depth(&self) -> usize {
        self.tx.lock().as_ref().map(|tx| tx.len()).unwrap_or(0)
    }

    /// Whether shutdown has begun
    pub fn is_shutdown(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Drain queued jobs and join the workers. Idempotent.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender lets workers drain the queue and exit
        self.tx.lock().take();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                warn!("notification worker panicked during shutdown");
            }
        }
        info!("notification pool shut down");
    }
}

impl std::fmt::Debug for NotificationPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationPool")
            .field("queue_depth", &self.queue_depth())
            .field("shutting_down", &self.is_shutdown())
            .finish()
    }
}

/// Deliver one event to every subscriber whose cursor is behind it.
///
/// Runs on a pool worker, or inline on the writer when the pool refused
/// the job.
pub(crate) fn deliver(
    category: Category,
    subscriptions: &[Arc<Subscription>],
    event: &Event,
    metrics: &Metrics,
) {
    let Some(sequence_id) = event.sequence_id else {
        return;
    };
    for subscription in subscriptions {
        if sequence_id <= subscription.cursor.load(Ordering::Acquire) {
            continue;
        }
        match subscription.callback.on_event(event) {
            Ok(()) => {
                subscription.cursor.fetch_max(sequence_id, Ordering::AcqRel);
                metrics.notifications_total.inc();
            }
            Err(err) => {
                metrics.subscriber_errors_total.inc();
                error!(
                    category = %category,
                    subscriber = %subscription.name,
                    error = %err,
                    "subscriber callback failed"
                );
            }
        }
    }
}
