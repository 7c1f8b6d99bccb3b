/*
 * file.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gancio, an event-driven network server toolkit.
 *
 * Gancio is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Gancio is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Gancio.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Sorted-table files. Entries are length-prefixed records:
//! little-endian `u32 key_len`, `u32 value_len`, then the raw key and
//! value bytes. The format is prefix-readable: a reader stops cleanly at
//! a torn trailing record, so the portion up to the writer's last
//! checkpoint is always recoverable.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Entries between durable checkpoints.
const CHECKPOINT_INTERVAL: usize = 64;

/// Outcome of feeding one entry to a [`TableFileWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedResult {
    /// Entry buffered; not yet at a durable point.
    WantMore,
    /// Entry written through a checkpoint: readers of the file prefix
    /// will see everything up to and including this entry.
    Success,
}

/// Append-only entry writer.
pub struct TableFileWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    since_checkpoint: usize,
    entries: u64,
}

impl TableFileWriter {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let file = File::create(&path)
            .map_err(|e| Error::resource(format!("creating {}: {}", path.display(), e)))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            since_checkpoint: 0,
            entries: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn feed_entry(&mut self, key: &[u8], value: &[u8]) -> Result<FeedResult, Error> {
        let io_err =
            |e: std::io::Error| Error::io(format!("writing {}: {}", self.path.display(), e));
        self.writer
            .write_all(&(key.len() as u32).to_le_bytes())
            .map_err(io_err)?;
        self.writer
            .write_all(&(value.len() as u32).to_le_bytes())
            .map_err(io_err)?;
        self.writer.write_all(key).map_err(io_err)?;
        self.writer.write_all(value).map_err(io_err)?;
        self.entries += 1;
        self.since_checkpoint += 1;
        if self.since_checkpoint >= CHECKPOINT_INTERVAL {
            self.checkpoint()?;
            Ok(FeedResult::Success)
        } else {
            Ok(FeedResult::WantMore)
        }
    }

    /// Flush buffered entries to a durable point.
    pub fn checkpoint(&mut self) -> Result<(), Error> {
        self.writer
            .flush()
            .map_err(|e| Error::io(format!("flushing {}: {}", self.path.display(), e)))?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(|e| Error::io(format!("syncing {}: {}", self.path.display(), e)))?;
        self.since_checkpoint = 0;
        Ok(())
    }

    /// Final flush and sync.
    pub fn finish(mut self) -> Result<(), Error> {
        self.checkpoint()
    }
}

/// Cursor over a table file: `key`/`value` hold the current entry until
/// `eof`. A torn trailing record reads as EOF (prefix recovery).
pub struct TableFileReader {
    path: PathBuf,
    reader: BufReader<File>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub eof: bool,
    pub error: Option<Error>,
}

impl TableFileReader {
    /// Open and position on the first entry.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let file = File::open(&path)
            .map_err(|e| Error::resource(format!("opening {}: {}", path.display(), e)))?;
        let mut reader = Self {
            path,
            reader: BufReader::new(file),
            key: Vec::new(),
            value: Vec::new(),
            eof: false,
            error: None,
        };
        reader.advance();
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move to the next entry, setting `eof` at (or after) the last
    /// complete record.
    pub fn advance(&mut self) {
        if self.eof || self.error.is_some() {
            return;
        }
        let mut lengths = [0u8; 8];
        match read_exact_or_eof(&mut self.reader, &mut lengths) {
            Ok(ReadOutcome::Eof) => {
                self.eof = true;
                return;
            }
            Ok(ReadOutcome::Partial) => {
                // Torn record: the prefix before it is still valid.
                self.eof = true;
                return;
            }
            Ok(ReadOutcome::Full) => {}
            Err(e) => {
                self.error = Some(Error::io(format!(
                    "reading {}: {}",
                    self.path.display(),
                    e
                )));
                return;
            }
        }
        let key_len = u32::from_le_bytes(lengths[0..4].try_into().expect("4 bytes")) as usize;
        let value_len = u32::from_le_bytes(lengths[4..8].try_into().expect("4 bytes")) as usize;
        let mut key = vec![0u8; key_len];
        let mut value = vec![0u8; value_len];
        let body = read_exact_or_eof(&mut self.reader, &mut key).and_then(|outcome| {
            match outcome {
                ReadOutcome::Full => read_exact_or_eof(&mut self.reader, &mut value),
                other => Ok(other),
            }
        });
        match body {
            Ok(ReadOutcome::Full) => {
                self.key = key;
                self.value = value;
            }
            Ok(_) => self.eof = true,
            Err(e) => {
                self.error = Some(Error::io(format!(
                    "reading {}: {}",
                    self.path.display(),
                    e
                )));
            }
        }
    }
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<ReadOutcome> {
    let mut got = 0;
    while got < buf.len() {
        let n = reader.read(&mut buf[got..])?;
        if n == 0 {
            return Ok(if got == 0 {
                ReadOutcome::Eof
            } else {
                ReadOutcome::Partial
            });
        }
        got += n;
    }
    Ok(ReadOutcome::Full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.tbl");
        let mut writer = TableFileWriter::create(&path).unwrap();
        for i in 0u32..10 {
            let key = format!("key{:03}", i);
            let value = format!("value{}", i);
            writer.feed_entry(key.as_bytes(), value.as_bytes()).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = TableFileReader::open(&path).unwrap();
        let mut seen = 0;
        while !reader.eof {
            assert!(reader.error.is_none());
            assert_eq!(reader.key, format!("key{:03}", seen).into_bytes());
            assert_eq!(reader.value, format!("value{}", seen).into_bytes());
            seen += 1;
            reader.advance();
        }
        assert_eq!(seen, 10);
    }

    #[test]
    fn torn_trailing_record_reads_as_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.tbl");
        let mut writer = TableFileWriter::create(&path).unwrap();
        writer.feed_entry(b"alpha", b"1").unwrap();
        writer.feed_entry(b"beta", b"2").unwrap();
        writer.finish().unwrap();
        // Append half a record.
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .unwrap();
            f.write_all(&(100u32).to_le_bytes()).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }
        let mut reader = TableFileReader::open(&path).unwrap();
        assert_eq!(reader.key, b"alpha");
        reader.advance();
        assert_eq!(reader.key, b"beta");
        reader.advance();
        assert!(reader.eof);
        assert!(reader.error.is_none());
    }

    #[test]
    fn checkpoint_interval_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.tbl");
        let mut writer = TableFileWriter::create(&path).unwrap();
        let mut successes = 0;
        for i in 0..200u32 {
            let key = i.to_be_bytes();
            if writer.feed_entry(&key, b"v").unwrap() == FeedResult::Success {
                successes += 1;
            }
        }
        assert_eq!(successes, 200 / CHECKPOINT_INTERVAL);
        writer.finish().unwrap();
    }
}
