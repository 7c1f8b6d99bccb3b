/*
 * mod.rs
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

//! LSM table engine: sorted key-value files under one directory, merged
//! pairwise by a bounded-work loop driven between I/O slices. The user
//! supplies the comparator/merge/simplify hooks; output files are
//! checkpointable while a merge is still running.

pub mod file;
pub mod merge;

pub use file::{FeedResult, TableFileReader, TableFileWriter};
pub use merge::{
    run_merge_task, CompareFn, MergeFn, MergeOutcome, MergeTask, SimplifyFn, SimplifyOutcome,
    TableHooks,
};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::Error;
use crate::mainloop::{LoopHandle, SourceId};

/// A table: its directory, its hooks, and the run-list of merge tasks.
pub struct Table {
    dir: PathBuf,
    hooks: TableHooks,
    run_list: VecDeque<MergeTask>,
    /// Files produced by completed merges, oldest first.
    finished_outputs: Vec<PathBuf>,
    next_file_id: u64,
}

impl Table {
    /// Open (or create) a table rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>, hooks: TableHooks) -> Result<Self, Error> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::resource(format!("creating {}: {}", dir.display(), e)))?;
        Ok(Self {
            dir,
            hooks,
            run_list: VecDeque::new(),
            finished_outputs: Vec::new(),
            next_file_id: 1,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_output_path(&mut self) -> PathBuf {
        let id = self.next_file_id;
        self.next_file_id += 1;
        self.dir.join(format!("merge-{:06}.tbl", id))
    }

    /// Write a sorted input file from entries (test and load path).
    pub fn write_input(
        &mut self,
        entries: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    ) -> Result<PathBuf, Error> {
        let path = self.dir.join(format!("input-{:06}.tbl", self.next_file_id));
        self.next_file_id += 1;
        let mut writer = TableFileWriter::create(&path)?;
        for (key, value) in entries {
            writer.feed_entry(&key, &value)?;
        }
        writer.finish()?;
        Ok(path)
    }

    /// Queue a merge of two sorted files onto the run-list.
    pub fn add_merge_task(
        &mut self,
        input_a: impl Into<PathBuf>,
        input_b: impl Into<PathBuf>,
    ) -> Result<(), Error> {
        let output_path = self.next_output_path();
        let task = MergeTask::new(
            TableFileReader::open(input_a.into())?,
            TableFileReader::open(input_b.into())?,
            TableFileWriter::create(output_path)?,
        );
        self.run_list.push_back(task);
        Ok(())
    }

    pub fn has_work(&self) -> bool {
        !self.run_list.is_empty()
    }

    /// The front task's checkpoint watermark, when one is running.
    pub fn last_queryable_key(&self) -> Option<&[u8]> {
        self.run_list
            .front()
            .and_then(|t| t.last_queryable_key.as_deref())
    }

    /// Files produced by completed merges.
    pub fn finished_outputs(&self) -> &[PathBuf] {
        &self.finished_outputs
    }

    /// Run one bounded slice of the front merge task. Returns true when
    /// the whole run-list is drained.
    pub fn run(&mut self, iterations: usize, flush_mode: bool) -> Result<bool, Error> {
        let Some(task) = self.run_list.front_mut() else {
            return Ok(true);
        };
        match run_merge_task(&self.hooks, task, iterations, flush_mode) {
            Ok(true) => {
                self.merge_task_done()?;
                Ok(self.run_list.is_empty())
            }
            Ok(false) => Ok(false),
            Err(e) => {
                // A failed task is dropped from the run-list; its output
                // is abandoned.
                self.run_list.pop_front();
                Err(e)
            }
        }
    }

    /// Front task finished: finalize its output and advance the
    /// run-list.
    fn merge_task_done(&mut self) -> Result<(), Error> {
        let task = self.run_list.pop_front().expect("front task");
        let output_path = task.output.path().to_path_buf();
        task.output.finish()?;
        log::debug!("merge finished: {}", output_path.display());
        self.finished_outputs.push(output_path);
        Ok(())
    }
}

/// Drive a table from the event loop: an idle source runs one bounded
/// slice per iteration until the run-list drains, then removes itself.
pub fn attach_table_to_loop(
    handle: &LoopHandle,
    table: Rc<RefCell<Table>>,
    iterations_per_slice: usize,
) -> SourceId {
    handle.add_idle(move || {
        let mut table = table.borrow_mut();
        match table.run(iterations_per_slice, false) {
            Ok(done) => !done,
            Err(e) => {
                log::warn!("table merge failed: {}", e);
                table.has_work()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> Vec<(Vec<u8>, Vec<u8>)> {
        pairs
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    fn read_all(path: &Path) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut reader = TableFileReader::open(path).unwrap();
        let mut out = Vec::new();
        while !reader.eof {
            assert!(reader.error.is_none());
            out.push((reader.key.clone(), reader.value.clone()));
            reader.advance();
        }
        out
    }

    #[test]
    fn merge_without_hooks_interleaves_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = Table::new(dir.path(), TableHooks::default()).unwrap();
        let a = table
            .write_input(entries(&[("a", "1"), ("c", "3"), ("e", "5")]))
            .unwrap();
        let b = table
            .write_input(entries(&[("b", "2"), ("c", "3b"), ("d", "4")]))
            .unwrap();
        table.add_merge_task(a, b).unwrap();
        while !table.run(2, false).unwrap() {}
        let out = read_all(&table.finished_outputs()[0]);
        // Equal keys without a merge hook produce both entries, A first.
        let keys: Vec<&[u8]> = out.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(
            keys,
            vec![
                b"a".as_slice(),
                b"b".as_slice(),
                b"c".as_slice(),
                b"c".as_slice(),
                b"d".as_slice(),
                b"e".as_slice()
            ]
        );
        assert_eq!(out[2].1, b"3");
        assert_eq!(out[3].1, b"3b");
    }

    #[test]
    fn merge_hook_fuses_equal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = TableHooks {
            compare: None,
            merge: Some(Box::new(|_key, a, b| {
                let mut v = a.to_vec();
                v.extend_from_slice(b"+");
                v.extend_from_slice(b);
                MergeOutcome::Replace(v)
            })),
            simplify: None,
        };
        let mut table = Table::new(dir.path(), hooks).unwrap();
        let a = table
            .write_input(entries(&[("k1", "a"), ("k2", "a")]))
            .unwrap();
        let b = table
            .write_input(entries(&[("k2", "b"), ("k3", "b")]))
            .unwrap();
        table.add_merge_task(a, b).unwrap();
        while !table.run(10, false).unwrap() {}
        let out = read_all(&table.finished_outputs()[0]);
        assert_eq!(
            out,
            entries(&[("k1", "a"), ("k2", "a+b"), ("k3", "b")])
        );
    }

    #[test]
    fn simplify_can_drop_entries() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = TableHooks {
            compare: None,
            merge: None,
            simplify: Some(Box::new(|_key, value| {
                if value == b"drop" {
                    SimplifyOutcome::Delete
                } else {
                    SimplifyOutcome::Identity
                }
            })),
        };
        let mut table = Table::new(dir.path(), hooks).unwrap();
        let a = table
            .write_input(entries(&[("a", "keep"), ("b", "drop")]))
            .unwrap();
        let b = table
            .write_input(entries(&[("c", "drop"), ("d", "keep")]))
            .unwrap();
        table.add_merge_task(a, b).unwrap();
        while !table.run(10, false).unwrap() {}
        let out = read_all(&table.finished_outputs()[0]);
        assert_eq!(out, entries(&[("a", "keep"), ("d", "keep")]));
    }

    #[test]
    fn user_comparator_orders_output() {
        // Reverse comparator: inputs sorted descending, output likewise.
        let hooks = TableHooks {
            compare: Some(Box::new(|a: &[u8], b: &[u8]| b.cmp(a))),
            merge: None,
            simplify: None,
        };
        let dir = tempfile::tempdir().unwrap();
        let mut table = Table::new(dir.path(), hooks).unwrap();
        let a = table
            .write_input(entries(&[("z", "1"), ("m", "2")]))
            .unwrap();
        let b = table
            .write_input(entries(&[("y", "3"), ("a", "4")]))
            .unwrap();
        table.add_merge_task(a, b).unwrap();
        while !table.run(10, false).unwrap() {}
        let out = read_all(&table.finished_outputs()[0]);
        let keys: Vec<&[u8]> = out.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(
            keys,
            vec![b"z".as_slice(), b"y".as_slice(), b"m".as_slice(), b"a".as_slice()]
        );
    }

    #[test]
    fn bounded_slices_make_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = Table::new(dir.path(), TableHooks::default()).unwrap();
        let many_a: Vec<_> = (0..500u32)
            .map(|i| (format!("a{:04}", i).into_bytes(), vec![b'x']))
            .collect();
        let many_b: Vec<_> = (0..500u32)
            .map(|i| (format!("b{:04}", i).into_bytes(), vec![b'y']))
            .collect();
        let a = table.write_input(many_a).unwrap();
        let b = table.write_input(many_b).unwrap();
        table.add_merge_task(a, b).unwrap();
        let mut slices = 0;
        while !table.run(10, false).unwrap() {
            slices += 1;
            assert!(slices < 1000, "merge must terminate");
        }
        assert!(slices >= 50, "work must be bounded per slice");
        let out = read_all(&table.finished_outputs()[0]);
        assert_eq!(out.len(), 1000);
        // Output is sorted.
        for pair in out.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
    }

    #[test]
    fn watermark_advances_and_prefix_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = Table::new(dir.path(), TableHooks::default()).unwrap();
        let many_a: Vec<_> = (0..300u32)
            .map(|i| (format!("k{:06}", i * 2).into_bytes(), vec![b'a']))
            .collect();
        let many_b: Vec<_> = (0..300u32)
            .map(|i| (format!("k{:06}", i * 2 + 1).into_bytes(), vec![b'b']))
            .collect();
        let a = table.write_input(many_a).unwrap();
        let b = table.write_input(many_b).unwrap();
        table.add_merge_task(a, b).unwrap();
        // Run until the first checkpoint watermark appears.
        let mut output_path = None;
        while table.last_queryable_key().is_none() {
            let done = table.run(50, true).unwrap();
            assert!(!done, "600 entries cannot finish before a checkpoint");
        }
        let watermark = table.last_queryable_key().unwrap().to_vec();
        if let Some(task) = table.run_list.front() {
            output_path = Some(task.output.path().to_path_buf());
        }
        // The partially built output is readable up to the watermark.
        let partial = read_all(output_path.as_ref().unwrap());
        assert!(!partial.is_empty());
        let last = &partial.last().unwrap().0;
        assert!(last >= &watermark);
        // Finish the merge.
        while !table.run(100, false).unwrap() {}
        assert_eq!(read_all(&table.finished_outputs()[0]).len(), 600);
    }
}
