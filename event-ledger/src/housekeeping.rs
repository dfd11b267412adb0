//! Background housekeeping
//!
//! A thin client of the manager's public contract: periodically flushes
//! dirty ledgers and prunes memory mirrors. Knows nothing about ledger
//! internals.

use crate::manager::LedgerManager;
use crate::Result;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Housekeeping cadence
#[derive(Debug, Clone)]
pub struct HousekeepingConfig {
    /// How often dirty ledgers are flushed
    pub flush_interval: Duration,

    /// How often memory mirrors are pruned
    pub cleanup_interval: Duration,

    /// Look-back window (hours) passed to cleanup
    pub hours_to_keep: i64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30 * 60),
            hours_to_keep: 25,
        }
    }
}

/// Handle to the background housekeeping thread
pub struct Housekeeping {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Housekeeping {
    /// Spawn the housekeeping thread
    pub fn spawn(manager: Arc<LedgerManager>, config: HousekeepingConfig) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let tick = config.flush_interval.min(config.cleanup_interval);
        let flush_interval_secs = config.flush_interval.as_secs_f64();
        let cleanup_interval_secs = config.cleanup_interval.as_secs_f64();

        let handle = std::thread::Builder::new()
            .name("ledger-housekeeping".to_string())
            .spawn(move || {
                let mut last_flush = Instant::now();
                let mut last_cleanup = Instant::now();
                loop {
                    match stop_rx.recv_timeout(tick) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }

                    if last_flush.elapsed() >= config.flush_interval {
                        let flushed = manager.flush_all();
                        if flushed > 0 {
                            debug!(flushed, "housekeeping flushed ledgers with pending writes");
                        }
                        last_flush = Instant::now();
                    }

                    if last_cleanup.elapsed() >= config.cleanup_interval {
                        let removed = manager.cleanup_memory_ledgers(config.hours_to_keep);
                        if removed > 0 {
                            info!(removed, "housekeeping pruned memory mirrors");
                        }
                        last_cleanup = Instant::now();
                    }
                }
                debug!("housekeeping thread exiting");
            })?;

        info!(
            flush_interval_secs,
            cleanup_interval_secs, "housekeeping started"
        );
        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("housekeeping thread panicked");
            }
        }
    }
}

impl Drop for Housekeeping {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Housekeeping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Housekeeping")
            .field("running", &self.handle.is_some())
            .finish()
    }
}
