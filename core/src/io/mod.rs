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

//! Stream base: a polymorphic byte endpoint with independent read and
//! write halves, per-half readiness hooks, and buffer-interchange read and
//! write primitives. EOF is signalled by the stream itself transitioning
//! its read half; cancellation is `shutdown_read`/`shutdown_write`, both
//! idempotent and safe on an errored stream.

mod attach;
pub mod memory;
pub mod pipe;

pub use attach::{attach, attach_pair, Attachment};

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::buffer::Buffer;
use crate::error::Error;
use crate::hook::Hook;

/// State of one direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfState {
    /// This direction does not exist on the endpoint (e.g. the write half
    /// of a read-only source).
    NotAvailable,
    /// Open. Reads/writes may still return 0 when no progress is
    /// currently possible.
    Ready,
    /// Terminally closed.
    ShutDown,
    /// A sticky error ended this direction; see [`IoCore::error`].
    Errored,
}

/// Shared per-stream state: half states, capability flags, sticky error,
/// and the two readiness hooks. Every concrete stream embeds one.
pub struct IoCore {
    read: Cell<HalfState>,
    write: Cell<HalfState>,
    never_blocks_read: Cell<bool>,
    never_blocks_write: Cell<bool>,
    never_partial_writes: Cell<bool>,
    error: RefCell<Option<Error>>,
    read_hook: Hook,
    write_hook: Hook,
}

impl IoCore {
    pub fn new(readable: bool, writable: bool) -> Self {
        Self {
            read: Cell::new(if readable {
                HalfState::Ready
            } else {
                HalfState::NotAvailable
            }),
            write: Cell::new(if writable {
                HalfState::Ready
            } else {
                HalfState::NotAvailable
            }),
            never_blocks_read: Cell::new(false),
            never_blocks_write: Cell::new(false),
            never_partial_writes: Cell::new(false),
            error: RefCell::new(None),
            read_hook: Hook::new(),
            write_hook: Hook::new(),
        }
    }

    pub fn read_state(&self) -> HalfState {
        self.read.get()
    }

    pub fn write_state(&self) -> HalfState {
        self.write.get()
    }

    pub fn is_readable(&self) -> bool {
        self.read.get() == HalfState::Ready
    }

    pub fn is_writable(&self) -> bool {
        self.write.get() == HalfState::Ready
    }

    /// Both directions are finished (shut down, errored, or absent).
    pub fn is_finished(&self) -> bool {
        !matches!(self.read.get(), HalfState::Ready)
            && !matches!(self.write.get(), HalfState::Ready)
    }

    pub fn read_hook(&self) -> &Hook {
        &self.read_hook
    }

    pub fn write_hook(&self) -> &Hook {
        &self.write_hook
    }

    pub fn never_blocks_read(&self) -> bool {
        self.never_blocks_read.get()
    }

    pub fn never_blocks_write(&self) -> bool {
        self.never_blocks_write.get()
    }

    pub fn never_partial_writes(&self) -> bool {
        self.never_partial_writes.get()
    }

    pub fn set_never_blocks_read(&self, v: bool) {
        self.never_blocks_read.set(v);
    }

    pub fn set_never_blocks_write(&self, v: bool) {
        self.never_blocks_write.set(v);
    }

    pub fn set_never_partial_writes(&self, v: bool) {
        self.never_partial_writes.set(v);
    }

    /// The sticky error, if any. Inspectable until the stream is dropped.
    pub fn error(&self) -> Option<Error> {
        self.error.borrow().clone()
    }

    fn store_error(&self, error: Error) {
        let mut slot = self.error.borrow_mut();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// Record an error affecting both halves. Open halves become
    /// `Errored`; both hooks receive their terminal notification.
    pub fn set_error(&self, error: Error) {
        self.store_error(error);
        if self.read.get() == HalfState::Ready {
            self.read.set(HalfState::Errored);
        }
        if self.write.get() == HalfState::Ready {
            self.write.set(HalfState::Errored);
        }
        self.read_hook.notify_shutdown();
        self.write_hook.notify_shutdown();
    }

    pub fn set_read_error(&self, error: Error) {
        self.store_error(error);
        if self.read.get() == HalfState::Ready {
            self.read.set(HalfState::Errored);
        }
        self.read_hook.notify_shutdown();
    }

    pub fn set_write_error(&self, error: Error) {
        self.store_error(error);
        if self.write.get() == HalfState::Ready {
            self.write.set(HalfState::Errored);
        }
        self.write_hook.notify_shutdown();
    }

    /// Unconditionally transition the read half to `ShutDown` (the EOF
    /// signal) and deliver the read hook's terminal notification.
    /// Idempotent.
    pub fn notify_read_shutdown(&self) {
        if self.read.get() == HalfState::Ready {
            self.read.set(HalfState::ShutDown);
        }
        self.read_hook.notify_shutdown();
    }

    /// Write-side counterpart of [`IoCore::notify_read_shutdown`].
    pub fn notify_write_shutdown(&self) {
        if self.write.get() == HalfState::Ready {
            self.write.set(HalfState::ShutDown);
        }
        self.write_hook.notify_shutdown();
    }
}

/// A byte-stream endpoint. Concrete streams embed an [`IoCore`] and
/// implement the raw read/write primitives; the buffer variants default to
/// copying through a bounce buffer and should be overridden where a
/// zero-copy path exists.
///
/// Reads and writes return `Ok(0)` when no progress is currently possible;
/// EOF is reported out of band via the read half transitioning to
/// `ShutDown`. Partial writes are permitted unless `never_partial_writes`
/// is set, in which case the implementation buffers internally.
pub trait Stream {
    fn core(&self) -> &IoCore;

    fn raw_read(&self, dst: &mut [u8]) -> Result<usize, Error>;

    fn raw_write(&self, src: &[u8]) -> Result<usize, Error>;

    fn raw_read_buffer(&self, dst: &mut Buffer) -> Result<usize, Error> {
        let mut tmp = [0u8; 4096];
        let mut total = 0;
        loop {
            let n = self.raw_read(&mut tmp)?;
            if n == 0 {
                break;
            }
            dst.append(&tmp[..n]);
            total += n;
            if n < tmp.len() {
                break;
            }
        }
        Ok(total)
    }

    fn raw_write_buffer(&self, src: &mut Buffer) -> Result<usize, Error> {
        let mut tmp = [0u8; 4096];
        let mut total = 0;
        while !src.is_empty() {
            let got = src.peek(&mut tmp);
            let n = self.raw_write(&tmp[..got])?;
            src.discard(n);
            total += n;
            if n < got {
                break;
            }
        }
        Ok(total)
    }

    /// Stream-specific reaction to a read-side cancellation (close an fd,
    /// release a peer). State transitions and hook notification are done
    /// by [`shutdown_read`].
    fn on_shutdown_read(&self) {}

    /// Stream-specific reaction to a write-side cancellation.
    fn on_shutdown_write(&self) {}
}

/// Shared handle to a stream endpoint.
pub type StreamRef = Rc<dyn Stream>;

/// Cancel the read direction: transition, virtual cleanup, terminal hook
/// notification. Idempotent and safe on an errored stream.
pub fn shutdown_read(stream: &dyn Stream) {
    let core = stream.core();
    if matches!(
        core.read_state(),
        HalfState::ShutDown | HalfState::NotAvailable
    ) {
        return;
    }
    core.read.set(HalfState::ShutDown);
    stream.on_shutdown_read();
    core.read_hook.notify_shutdown();
}

/// Cancel the write direction. Idempotent and safe on an errored stream.
pub fn shutdown_write(stream: &dyn Stream) {
    let core = stream.core();
    if matches!(
        core.write_state(),
        HalfState::ShutDown | HalfState::NotAvailable
    ) {
        return;
    }
    core.write.set(HalfState::ShutDown);
    stream.on_shutdown_write();
    core.write_hook.notify_shutdown();
}
