//! Record-file readers
//!
//! Both readers are lenient: a line that fails to parse is skipped and
//! logged, never fatal. The reverse reader walks the file back-to-front in
//! fixed-size chunks so "most recent N" queries do not load the whole file.

use crate::types::Event;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Lines, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, warn};

/// Chunk size for backward reads
const REVERSE_CHUNK: usize = 64 * 1024;

/// Parse one record line, returning `None` for blank or malformed input.
pub(crate) fn parse_line(line: &str) -> Option<Event> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Event>(trimmed) {
        Ok(event) => Some(event),
        Err(err) => {
            debug!(error = %err, "skipping malformed record line");
            None
        }
    }
}

/// Forward line-by-line reader over a record file
pub struct ForwardReader {
    lines: Lines<BufReader<File>>,
}

impl ForwardReader {
    /// Open a record file for forward streaming
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
        })
    }
}

impl Iterator for ForwardReader {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        loop {
            match self.lines.next() {
                None => return None,
                Some(Err(err)) => {
                    warn!(error = %err, "read error while streaming record file");
                    return None;
                }
                Some(Ok(line)) => {
                    if let Some(event) = parse_line(&line) {
                        return Some(event);
                    }
                }
            }
        }
    }
}

/// Backward chunked reader yielding records newest-first.
///
/// Reads fixed-size chunks from the end of the file, carrying partial
/// lines across chunk boundaries.
pub struct ReverseReader {
    file: File,
    pos: u64,
    carry: Vec<u8>,
    pending: Vec<String>,
    chunk: usize,
    exhausted: bool,
}

impl ReverseReader {
    /// Open a record file for reverse streaming
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::with_chunk_size(path, REVERSE_CHUNK)
    }

    fn with_chunk_size(path: &Path, chunk: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        let pos = file.metadata()?.len();
        Ok(Self {
            file,
            pos,
            carry: Vec::new(),
            pending: Vec::new(),
            chunk,
            exhausted: false,
        })
    }

    /// Read the chunk preceding `pos` and split it into pending lines.
    fn fill_pending(&mut self) -> io::Result<()> {
        let to_read = self.chunk.min(self.pos as usize);
        self.pos -= to_read as u64;
        self.file.seek(SeekFrom::Start(self.pos))?;

        let mut buffer = vec![0u8; to_read];
        self.file.read_exact(&mut buffer)?;
        buffer.extend_from_slice(&self.carry);

        let mut segments: Vec<&[u8]> = buffer.split(|&byte| byte == b'\n').collect();
        let head = segments.remove(0);
        // pending is popped from the back, so file order here means
        // newest-first on the way out
        for segment in segments {
            self.pending
                .push(String::from_utf8_lossy(segment).into_owned());
        }
        self.carry = head.to_vec();
        Ok(())
    }
}

impl Iterator for ReverseReader {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        loop {
            if let Some(line) = self.pending.pop() {
                if let Some(event) = parse_line(&line) {
                    return Some(event);
                }
                continue;
            }

            if self.pos == 0 {
                if self.exhausted {
                    return None;
                }
                self.exhausted = true;
                let carry = std::mem::take(&mut self.carry);
                if let Some(event) = parse_line(&String::from_utf8_lossy(&carry)) {
                    return Some(event);
                }
                continue;
            }

            if let Err(err) = self.fill_pending() {
                warn!(error = %err, "read error while reverse-streaming record file");
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Payload};
    use chrono::Utc;
    use serde_json::Value;
    use std::io::Write;

    fn write_records(path: &Path, count: u64) {
        let mut file = File::create(path).unwrap();
        for sequence in 1..=count {
            let mut data = Payload::new();
            data.insert("n".to_string(), Value::from(sequence));
            let mut event = Event::new(Category::SystemEvent, Utc::now(), data);
            event.sequence_id = Some(sequence);
            writeln!(file, "{}", serde_json::to_string(&event).unwrap()).unwrap();
        }
    }

    fn sequence_ids(events: impl Iterator<Item = Event>) -> Vec<u64> {
        events.map(|e| e.sequence_id.unwrap()).collect()
    }

    #[test]
    fn test_forward_reader_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        write_records(&path, 5);

        let ids = sequence_ids(ForwardReader::open(&path).unwrap());
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_forward_reader_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        write_records(&path, 2);
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file).unwrap();

        let ids = sequence_ids(ForwardReader::open(&path).unwrap());
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_reverse_reader_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        write_records(&path, 3);

        let ids = sequence_ids(ReverseReader::open(&path).unwrap());
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_reverse_reader_crosses_chunk_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        write_records(&path, 40);

        // Chunk far smaller than a line forces carries across every boundary
        let reader = ReverseReader::with_chunk_size(&path, 16).unwrap();
        let ids = sequence_ids(reader);
        assert_eq!(ids, (1..=40).rev().collect::<Vec<u64>>());
    }

    #[test]
    fn test_reverse_reader_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        write_records(&path, 2);
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "garbage line").unwrap();

        let ids = sequence_ids(ReverseReader::with_chunk_size(&path, 32).unwrap());
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_reverse_reader_handles_missing_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        write_records(&path, 1);
        let mut event = Event::new(Category::SystemEvent, Utc::now(), Payload::new());
        event.sequence_id = Some(2);
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        // no trailing newline
        write!(file, "{}", serde_json::to_string(&event).unwrap()).unwrap();

        let ids = sequence_ids(ReverseReader::with_chunk_size(&path, 32).unwrap());
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_reverse_reader_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        File::create(&path).unwrap();
        assert_eq!(ReverseReader::open(&path).unwrap().count(), 0);
    }
}
