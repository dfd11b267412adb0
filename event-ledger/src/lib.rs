//! Meridian Event Ledger
//!
//! Durable, per-category event log: the system of record for the trading
//! platform. Every price tick, order, fill, and portfolio change is
//! appended as an immutable record and later replayed or tailed.
//!
//! # Architecture
//!
//! - **Event Sourcing**: all state is derived from immutable records
//! - **One ledger per category**: each owns a single append-only JSONL file
//! - **Serialized writes**: sequence-id assignment and the file append
//!   share one per-ledger lock, so ids are gapless and ordered
//! - **Hybrid reads**: disk-streamed, or served from an in-memory mirror
//! - **Flush regimes**: auto, periodic (count/time), and scoped bulk mode
//!
//! # Invariants
//!
//! - Sequence ids are gapless-increasing per category starting at 1 and
//!   survive process restarts
//! - A reader in the same process never misses its ledger's most recent
//!   completed write (flush-before-read)
//! - Records are never modified or deleted in place

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod clock;
pub mod config;
pub mod error;
pub mod housekeeping;
pub mod ledger;
pub mod manager;
pub mod metrics;
pub mod notify;
pub mod reader;
pub mod tail;
pub mod types;

// Re-exports
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::{BulkModeGuard, EventStream, EventStreamRev, Ledger, LedgerHealth, LedgerStatus};
pub use manager::{BulkWriteGuard, LedgerManager, ManagerHealth, ManagerStatus};
pub use metrics::Metrics;
pub use notify::{NotificationPool, Subscriber};
pub use tail::{TailHandle, TailReader};
pub use types::{Category, Event, Payload};
