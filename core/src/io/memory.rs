/*
 * memory.rs
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

//! Memory-backed streams: sources reading out of a buffer, a byte slab,
//! or a formatted string, and a sink collecting writes into a buffer that
//! is handed to a callback at write-shutdown.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;

use crate::buffer::Buffer;
use crate::error::Error;
use crate::io::{IoCore, Stream};

fn not_writable() -> Error {
    Error::io("stream is not writable")
}

fn not_readable() -> Error {
    Error::io("stream is not readable")
}

/// Read-only stream draining a buffer supplied at construction. EOF once
/// the buffer empties.
pub struct BufferSource {
    core: IoCore,
    data: RefCell<Buffer>,
}

impl BufferSource {
    pub fn new(mut initial: Buffer) -> Rc<Self> {
        let source = Rc::new(Self {
            core: IoCore::new(true, false),
            data: RefCell::new(Buffer::new()),
        });
        source.core.set_never_blocks_read(true);
        source.data.borrow_mut().drain_from(&mut initial);
        source
    }

    fn check_eof(&self) {
        if self.data.borrow().is_empty() {
            self.core.notify_read_shutdown();
        }
    }
}

impl Stream for BufferSource {
    fn core(&self) -> &IoCore {
        &self.core
    }

    fn raw_read(&self, dst: &mut [u8]) -> Result<usize, Error> {
        let n = self.data.borrow_mut().read(dst);
        self.check_eof();
        Ok(n)
    }

    fn raw_read_buffer(&self, dst: &mut Buffer) -> Result<usize, Error> {
        let mut data = self.data.borrow_mut();
        let n = data.size();
        dst.drain_from(&mut data);
        drop(data);
        self.check_eof();
        Ok(n)
    }

    fn raw_write(&self, _src: &[u8]) -> Result<usize, Error> {
        Err(not_writable())
    }
}

/// Read-only stream over a byte region not owned by the stream. Plain
/// reads copy out; buffer reads hand the region over by reference. The
/// release callback runs once the region can no longer be referenced.
pub struct SlabSource {
    core: IoCore,
    data: RefCell<Bytes>,
    release: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl SlabSource {
    pub fn new(data: Bytes, release: Option<Box<dyn FnOnce()>>) -> Rc<Self> {
        let source = Rc::new(Self {
            core: IoCore::new(true, false),
            data: RefCell::new(data),
            release: RefCell::new(release),
        });
        source.core.set_never_blocks_read(true);
        source
    }

    /// Source over an owned formatted string (the printf-source).
    pub fn from_format(args: fmt::Arguments<'_>) -> Rc<Self> {
        Self::new(Bytes::from(fmt::format(args).into_bytes()), None)
    }

    pub fn from_string(s: String) -> Rc<Self> {
        Self::new(Bytes::from(s.into_bytes()), None)
    }

    fn finish_if_drained(&self) {
        if self.data.borrow().is_empty() {
            if let Some(release) = self.release.borrow_mut().take() {
                release();
            }
            self.core.notify_read_shutdown();
        }
    }
}

impl Stream for SlabSource {
    fn core(&self) -> &IoCore {
        &self.core
    }

    fn raw_read(&self, dst: &mut [u8]) -> Result<usize, Error> {
        let mut data = self.data.borrow_mut();
        let n = data.len().min(dst.len());
        dst[..n].copy_from_slice(&data[..n]);
        let _ = data.split_to(n);
        drop(data);
        self.finish_if_drained();
        Ok(n)
    }

    fn raw_read_buffer(&self, dst: &mut Buffer) -> Result<usize, Error> {
        let remaining = {
            let mut data = self.data.borrow_mut();
            let len = data.len();
            data.split_to(len)
        };
        let n = remaining.len();
        if n > 0 {
            let release = self.release.borrow_mut().take();
            dst.append_foreign(remaining, release);
        }
        self.finish_if_drained();
        Ok(n)
    }

    fn raw_write(&self, _src: &[u8]) -> Result<usize, Error> {
        Err(not_writable())
    }
}

/// Write-only stream accumulating into a buffer. At write-shutdown the
/// callback receives the final buffer; the buffer is drained right after.
pub struct BufferSink {
    core: IoCore,
    data: RefCell<Buffer>,
    on_done: RefCell<Option<Box<dyn FnOnce(&mut Buffer)>>>,
}

impl BufferSink {
    pub fn new(on_done: impl FnOnce(&mut Buffer) + 'static) -> Rc<Self> {
        let sink = Rc::new(Self {
            core: IoCore::new(false, true),
            data: RefCell::new(Buffer::new()),
            on_done: RefCell::new(Some(Box::new(on_done))),
        });
        sink.core.set_never_blocks_write(true);
        sink.core.set_never_partial_writes(true);
        sink
    }
}

impl Stream for BufferSink {
    fn core(&self) -> &IoCore {
        &self.core
    }

    fn raw_read(&self, _dst: &mut [u8]) -> Result<usize, Error> {
        Err(not_readable())
    }

    fn raw_write(&self, src: &[u8]) -> Result<usize, Error> {
        if !self.core.is_writable() {
            return Err(not_writable());
        }
        self.data.borrow_mut().append(src);
        Ok(src.len())
    }

    fn raw_write_buffer(&self, src: &mut Buffer) -> Result<usize, Error> {
        if !self.core.is_writable() {
            return Err(not_writable());
        }
        let n = src.size();
        self.data.borrow_mut().drain_from(src);
        Ok(n)
    }

    fn on_shutdown_write(&self) {
        if let Some(on_done) = self.on_done.borrow_mut().take() {
            let mut data = self.data.borrow_mut();
            on_done(&mut data);
            data.clear();
        }
    }
}
