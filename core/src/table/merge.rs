/*
 * merge.rs
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

//! The two-input merge loop. The hot loop is monomorphized over three
//! const axes (memcmp vs user comparator, merge hook, simplify hook),
//! giving eight concrete loops; the orchestrating dispatch picks one per
//! slice from the hooks actually installed. Work is bounded: the loop
//! returns once at least `iterations` entries have been emitted so the
//! event loop can reclaim time.

use std::cmp::Ordering;

use crate::error::Error;
use crate::table::file::{FeedResult, TableFileReader, TableFileWriter};

/// User comparator.
pub type CompareFn = Box<dyn Fn(&[u8], &[u8]) -> Ordering>;

/// What the merge hook did with two values sharing one key.
pub enum MergeOutcome {
    ReturnA,
    ReturnB,
    Replace(Vec<u8>),
    Drop,
}

/// User merge hook: key, value from A, value from B.
pub type MergeFn = Box<dyn Fn(&[u8], &[u8], &[u8]) -> MergeOutcome>;

/// What the simplify hook did with one entry.
pub enum SimplifyOutcome {
    Identity,
    Replace(Vec<u8>),
    Delete,
}

/// User simplify hook: key, value.
pub type SimplifyFn = Box<dyn Fn(&[u8], &[u8]) -> SimplifyOutcome>;

/// The hooks a table is configured with.
#[derive(Default)]
pub struct TableHooks {
    pub compare: Option<CompareFn>,
    pub merge: Option<MergeFn>,
    pub simplify: Option<SimplifyFn>,
}

/// One two-input merge in progress.
pub struct MergeTask {
    pub is_started: bool,
    pub inputs: [TableFileReader; 2],
    pub output: TableFileWriter,
    /// Highest key committed to the output; readers of the partially
    /// built file may query up to here.
    pub last_queryable_key: Option<Vec<u8>>,
}

impl MergeTask {
    pub fn new(
        input_a: TableFileReader,
        input_b: TableFileReader,
        output: TableFileWriter,
    ) -> Self {
        Self {
            is_started: true,
            inputs: [input_a, input_b],
            output,
            last_queryable_key: None,
        }
    }
}

/// Run one bounded slice of `task`. Returns `Ok(true)` when the merge
/// has consumed both inputs completely.
///
/// With `flush_mode`, the slice only yields at durable output points,
/// so a caller that stops midway can still hand the file prefix to
/// readers; otherwise the slice yields as soon as the work budget is
/// spent.
pub fn run_merge_task(
    hooks: &TableHooks,
    task: &mut MergeTask,
    iterations: usize,
    flush_mode: bool,
) -> Result<bool, Error> {
    match (
        hooks.compare.is_some(),
        hooks.merge.is_some(),
        hooks.simplify.is_some(),
    ) {
        (false, false, false) => run_slice::<true, false, false>(hooks, task, iterations, flush_mode),
        (false, false, true) => run_slice::<true, false, true>(hooks, task, iterations, flush_mode),
        (false, true, false) => run_slice::<true, true, false>(hooks, task, iterations, flush_mode),
        (false, true, true) => run_slice::<true, true, true>(hooks, task, iterations, flush_mode),
        (true, false, false) => run_slice::<false, false, false>(hooks, task, iterations, flush_mode),
        (true, false, true) => run_slice::<false, false, true>(hooks, task, iterations, flush_mode),
        (true, true, false) => run_slice::<false, true, false>(hooks, task, iterations, flush_mode),
        (true, true, true) => run_slice::<false, true, true>(hooks, task, iterations, flush_mode),
    }
}

fn reader_error(reader: &TableFileReader) -> Option<Error> {
    reader.error.clone()
}

/// Copy the remaining entries of one input (the other hit EOF).
fn copy_reader<const DO_SIMPLIFY: bool>(
    hooks: &TableHooks,
    task: &mut MergeTask,
    which: usize,
    n_written: &mut usize,
    iterations: usize,
    flush_mode: bool,
) -> Result<bool, Error> {
    loop {
        let (emit, key): (Option<Vec<u8>>, Vec<u8>) = {
            let reader = &task.inputs[which];
            if let Some(e) = reader_error(reader) {
                return Err(e);
            }
            if reader.eof {
                return Ok(true);
            }
            let key = reader.key.clone();
            let value = if DO_SIMPLIFY {
                let simplify = hooks.simplify.as_ref().expect("simplify hook");
                match simplify(&reader.key, &reader.value) {
                    SimplifyOutcome::Identity => Some(reader.value.clone()),
                    SimplifyOutcome::Replace(v) => Some(v),
                    SimplifyOutcome::Delete => None,
                }
            } else {
                Some(reader.value.clone())
            };
            (value, key)
        };
        let mut at_checkpoint = false;
        if let Some(value) = emit {
            *n_written += 1;
            match task.output.feed_entry(&key, &value)? {
                FeedResult::Success => {
                    task.last_queryable_key = Some(key);
                    at_checkpoint = true;
                }
                FeedResult::WantMore => {}
            }
        }
        task.inputs[which].advance();
        if *n_written >= iterations && (!flush_mode || at_checkpoint) {
            let reader = &task.inputs[which];
            if let Some(e) = reader_error(reader) {
                return Err(e);
            }
            return Ok(reader.eof);
        }
    }
}

fn run_slice<const USE_MEMCMP: bool, const HAS_MERGE: bool, const DO_SIMPLIFY: bool>(
    hooks: &TableHooks,
    task: &mut MergeTask,
    iterations: usize,
    flush_mode: bool,
) -> Result<bool, Error> {
    debug_assert!(task.is_started);
    let mut n_written = 0usize;

    loop {
        for reader in &task.inputs {
            if let Some(e) = reader_error(reader) {
                return Err(e);
            }
        }
        match (task.inputs[0].eof, task.inputs[1].eof) {
            (true, true) => return Ok(true),
            (true, false) => {
                return copy_reader::<DO_SIMPLIFY>(
                    hooks,
                    task,
                    1,
                    &mut n_written,
                    iterations,
                    flush_mode,
                );
            }
            (false, true) => {
                return copy_reader::<DO_SIMPLIFY>(
                    hooks,
                    task,
                    0,
                    &mut n_written,
                    iterations,
                    flush_mode,
                );
            }
            (false, false) => {}
        }

        let ordering = if USE_MEMCMP {
            task.inputs[0].key.cmp(&task.inputs[1].key)
        } else {
            let compare = hooks.compare.as_ref().expect("comparator hook");
            compare(&task.inputs[0].key, &task.inputs[1].key)
        };

        // Without a merge hook, equal keys emit both entries (A first).
        let take_a_only = if HAS_MERGE {
            ordering == Ordering::Less
        } else {
            ordering != Ordering::Greater
        };

        let mut at_checkpoint = false;
        if take_a_only || ordering == Ordering::Greater {
            // Single-sided step: the lesser reader's entry goes out.
            let which = if take_a_only { 0 } else { 1 };
            let key = task.inputs[which].key.clone();
            let value = if DO_SIMPLIFY {
                let simplify = hooks.simplify.as_ref().expect("simplify hook");
                match simplify(&task.inputs[which].key, &task.inputs[which].value) {
                    SimplifyOutcome::Identity => Some(task.inputs[which].value.clone()),
                    SimplifyOutcome::Replace(v) => Some(v),
                    SimplifyOutcome::Delete => None,
                }
            } else {
                Some(task.inputs[which].value.clone())
            };
            if let Some(value) = value {
                n_written += 1;
                match task.output.feed_entry(&key, &value)? {
                    FeedResult::Success => {
                        task.last_queryable_key = Some(key);
                        at_checkpoint = true;
                    }
                    FeedResult::WantMore => {}
                }
            }
            task.inputs[which].advance();
        } else {
            // Equal keys with a merge hook: one merged entry, both
            // readers advance.
            debug_assert!(HAS_MERGE && ordering == Ordering::Equal);
            let merge = hooks.merge.as_ref().expect("merge hook");
            let key = task.inputs[0].key.clone();
            let merged = match merge(&key, &task.inputs[0].value, &task.inputs[1].value) {
                MergeOutcome::ReturnA => Some(task.inputs[0].value.clone()),
                MergeOutcome::ReturnB => Some(task.inputs[1].value.clone()),
                MergeOutcome::Replace(v) => Some(v),
                MergeOutcome::Drop => None,
            };
            let value = match merged {
                None => None,
                Some(v) if DO_SIMPLIFY => {
                    let simplify = hooks.simplify.as_ref().expect("simplify hook");
                    match simplify(&key, &v) {
                        SimplifyOutcome::Identity => Some(v),
                        SimplifyOutcome::Replace(r) => Some(r),
                        SimplifyOutcome::Delete => None,
                    }
                }
                Some(v) => Some(v),
            };
            if let Some(value) = value {
                n_written += 1;
                match task.output.feed_entry(&key, &value)? {
                    FeedResult::Success => {
                        task.last_queryable_key = Some(key);
                        at_checkpoint = true;
                    }
                    FeedResult::WantMore => {}
                }
            }
            task.inputs[0].advance();
            task.inputs[1].advance();
        }

        if n_written >= iterations && (!flush_mode || at_checkpoint) {
            let finished = task.inputs[0].eof && task.inputs[1].eof;
            return Ok(finished);
        }
    }
}
