//! Live-tail file follower
//!
//! A thin client of the record-file format: replays existing lines, then
//! polls for newly appended ones. Opens its own read-only handle and
//! needs nothing else from the core.

use crate::reader::parse_line;
use crate::types::Event;
use crate::Result;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Polling reader over one category's record file
pub struct TailReader {
    path: PathBuf,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
}

/// Stop handle for a running [`TailReader::follow`] loop
#[derive(Debug, Clone)]
pub struct TailHandle {
    stop: Arc<AtomicBool>,
}

impl TailHandle {
    /// Ask the follow loop to exit at its next poll
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl TailReader {
    /// Create a tail reader over a record file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_millis(200),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the poll interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Handle for stopping a follow loop from another thread
    pub fn stop_handle(&self) -> TailHandle {
        TailHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Replay the records currently in the file
    pub fn replay(&self) -> Result<Vec<Event>> {
        let file = File::open(&self.path)?;
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            if let Some(event) = parse_line(&line?) {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Replay existing records, then poll for newly appended ones until
    /// stopped. Invokes `on_event` for every decoded record.
    pub fn follow<F>(&self, mut on_event: F) -> Result<()>
    where
        F: FnMut(Event),
    {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();

        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                std::thread::sleep(self.poll_interval);
                continue;
            }
            if let Some(event) = parse_line(&line) {
                on_event(event);
            }
        }
    }
}

impl std::fmt::Debug for TailReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailReader").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Payload};
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::io::Write;

    fn record_line(sequence_id: u64) -> String {
        let mut event = Event::new(Category::PriceUpdate, Utc::now(), Payload::new());
        event.sequence_id = Some(sequence_id);
        serde_json::to_string(&event).unwrap()
    }

    #[test]
    fn test_replay_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("market_data.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "{}", record_line(1)).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, "{}", record_line(2)).unwrap();

        let reader = TailReader::new(&path);
        let events = reader.replay().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].sequence_id, Some(2));
    }

    #[test]
    fn test_follow_sees_appended_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("market_data.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "{}", record_line(1)).unwrap();
        file.flush().unwrap();

        let reader = TailReader::new(&path).with_poll_interval(Duration::from_millis(10));
        let handle = reader.stop_handle();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_in_thread = Arc::clone(&seen);
        let follower = std::thread::spawn(move || {
            reader
                .follow(|event| seen_in_thread.lock().push(event.sequence_id.unwrap()))
                .unwrap();
        });

        // Append a record after the follower started
        let mut appender = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(appender, "{}", record_line(2)).unwrap();
        appender.flush().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while seen.lock().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        handle.stop();
        follower.join().unwrap();

        assert_eq!(*seen.lock(), vec![1, 2]);
    }
}
