/*
 * body.rs
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

//! Decoded-body stream: the read-only endpoint handed to protocol users
//! for a response body or a request POST body. The protocol engine feeds
//! decoded bytes in; the consumer reads them out. Draining wakes the
//! feeder so transport backpressure can be released.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::buffer::Buffer;
use crate::error::Error;
use crate::io::{HalfState, IoCore, Stream};

/// Read side of a decoded HTTP body.
pub struct BodyStream {
    core: IoCore,
    data: RefCell<Buffer>,
    finished: Cell<bool>,
    /// Called after a read drains buffered bytes (backpressure release).
    on_drain: RefCell<Option<Box<dyn Fn()>>>,
}

impl BodyStream {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            core: IoCore::new(true, false),
            data: RefCell::new(Buffer::new()),
            finished: Cell::new(false),
            on_drain: RefCell::new(None),
        })
    }

    /// An already-complete empty body.
    pub(crate) fn empty() -> Rc<Self> {
        let body = Self::new();
        body.finished.set(true);
        body.core.notify_read_shutdown();
        body
    }

    pub(crate) fn set_on_drain(&self, callback: impl Fn() + 'static) {
        *self.on_drain.borrow_mut() = Some(Box::new(callback));
    }

    /// Bytes fed but not yet consumed.
    pub(crate) fn buffered(&self) -> usize {
        self.data.borrow().size()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.core.read_state() != HalfState::Ready
    }

    /// Feed decoded bytes; wakes any reader trapped on the read hook.
    pub(crate) fn feed(&self, src: &mut Buffer, n: usize) {
        if n == 0 {
            return;
        }
        self.data.borrow_mut().transfer_from(src, n);
        self.core.read_hook().notify();
    }

    /// The body is complete; EOF once buffered bytes drain.
    pub(crate) fn finish(&self) {
        self.finished.set(true);
        if self.data.borrow().is_empty() {
            self.core.notify_read_shutdown();
        } else {
            self.core.read_hook().notify();
        }
    }

    /// The body ended abnormally.
    pub(crate) fn fail(&self, error: Error) {
        self.core.set_read_error(error);
    }

    fn after_read(&self, consumed: usize) {
        if consumed > 0 {
            if let Some(on_drain) = &*self.on_drain.borrow() {
                on_drain();
            }
        }
        // finish() may have run while bytes were still buffered.
        if self.finished.get() && self.data.borrow().is_empty() {
            self.core.notify_read_shutdown();
        }
    }
}

impl Stream for BodyStream {
    fn core(&self) -> &IoCore {
        &self.core
    }

    fn raw_read(&self, dst: &mut [u8]) -> Result<usize, Error> {
        if self.core.read_state() == HalfState::Errored {
            return Err(self
                .core
                .error()
                .unwrap_or_else(|| Error::io("body stream error")));
        }
        let n = self.data.borrow_mut().read(dst);
        self.after_read(n);
        Ok(n)
    }

    fn raw_read_buffer(&self, dst: &mut Buffer) -> Result<usize, Error> {
        if self.core.read_state() == HalfState::Errored {
            return Err(self
                .core
                .error()
                .unwrap_or_else(|| Error::io("body stream error")));
        }
        let mut data = self.data.borrow_mut();
        let n = data.size();
        dst.drain_from(&mut data);
        drop(data);
        self.after_read(n);
        Ok(n)
    }

    fn raw_write(&self, _src: &[u8]) -> Result<usize, Error> {
        Err(Error::io("body stream is not writable"))
    }
}
