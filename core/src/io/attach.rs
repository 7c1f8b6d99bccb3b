/*
 * attach.rs
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

//! Attach: install a pump between two streams so bytes flow from the
//! source's read side into the destination's write side until either side
//! shuts down its half, at which point the opposite half of the other
//! stream is shut down to match. Byte order is preserved.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::buffer::Buffer;
use crate::error::Error;
use crate::io::{shutdown_read, shutdown_write, HalfState, StreamRef};

/// In-flight bytes the pump will hold before it stops reading ahead of a
/// slow destination.
const ATTACH_MAX_BUFFERED: usize = 8192;

/// A live src→dst pump. Dropping the handle does not detach; the pump
/// stops when either side finishes.
pub struct Attachment {
    src: StreamRef,
    dst: StreamRef,
    scratch: RefCell<Buffer>,
    pumping: Cell<bool>,
    repump: Cell<bool>,
    done: Cell<bool>,
}

/// Train `src`'s output into `dst`'s input. Traps the source's read hook
/// and the destination's write hook; fails if either is already trapped.
pub fn attach(src: StreamRef, dst: StreamRef) -> Result<Rc<Attachment>, Error> {
    let attachment = Rc::new(Attachment {
        src: src.clone(),
        dst: dst.clone(),
        scratch: RefCell::new(Buffer::new()),
        pumping: Cell::new(false),
        repump: Cell::new(false),
        done: Cell::new(false),
    });

    // A hook that has already shut down needs no trap: the half is
    // terminal and the first pump observes it.
    if !src.core().read_hook().is_shut_down() {
        let a = attachment.clone();
        let s = attachment.clone();
        src.core().read_hook().trap(
            Box::new(move || {
                a.pump();
                !a.done.get()
            }),
            Some(Box::new(move || s.pump())),
        )?;
    }
    if !dst.core().write_hook().is_shut_down() {
        let a = attachment.clone();
        let s = attachment.clone();
        if let Err(e) = dst.core().write_hook().trap(
            Box::new(move || {
                a.pump();
                !a.done.get()
            }),
            Some(Box::new(move || s.pump())),
        ) {
            src.core().read_hook().untrap();
            return Err(e);
        }
    }

    attachment.pump();
    Ok(attachment)
}

/// Attach in both directions: a's output feeds b and b's output feeds a.
pub fn attach_pair(a: StreamRef, b: StreamRef) -> Result<(Rc<Attachment>, Rc<Attachment>), Error> {
    let ab = attach(a.clone(), b.clone())?;
    let ba = attach(b, a)?;
    Ok((ab, ba))
}

impl Attachment {
    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    /// Move as many bytes as currently possible. Re-entrant calls (hook
    /// notifications raised by our own reads and writes) coalesce into one
    /// more outer pass.
    pub fn pump(&self) {
        if self.done.get() {
            return;
        }
        if self.pumping.get() {
            self.repump.set(true);
            return;
        }
        self.pumping.set(true);
        loop {
            loop {
                let mut progress = false;
                if self.flush_scratch() {
                    progress = true;
                }
                if self.fill_scratch() {
                    progress = true;
                }
                if !progress {
                    break;
                }
            }
            if !self.repump.take() {
                break;
            }
        }
        self.pumping.set(false);
        self.check_termination();
    }

    fn flush_scratch(&self) -> bool {
        if !self.dst.core().is_writable() {
            return false;
        }
        let mut scratch = self.scratch.borrow_mut();
        if scratch.is_empty() {
            return false;
        }
        match self.dst.raw_write_buffer(&mut scratch) {
            Ok(n) => n > 0,
            Err(_) => false, // destination half state reflects the error
        }
    }

    fn fill_scratch(&self) -> bool {
        if !self.src.core().is_readable() {
            return false;
        }
        let mut scratch = self.scratch.borrow_mut();
        if scratch.size() >= ATTACH_MAX_BUFFERED {
            return false;
        }
        match self.src.raw_read_buffer(&mut scratch) {
            Ok(n) => n > 0,
            Err(_) => false,
        }
    }

    fn check_termination(&self) {
        if self.done.get() {
            return;
        }
        let src_read = self.src.core().read_state();
        let dst_write = self.dst.core().write_state();
        if matches!(dst_write, HalfState::ShutDown | HalfState::Errored)
            || dst_write == HalfState::NotAvailable
        {
            self.finish(true);
        } else if matches!(src_read, HalfState::ShutDown | HalfState::Errored)
            && self.scratch.borrow().is_empty()
        {
            self.finish(false);
        }
    }

    fn finish(&self, destination_gone: bool) {
        self.done.set(true);
        self.src.core().read_hook().untrap();
        self.dst.core().write_hook().untrap();
        if destination_gone {
            shutdown_read(&*self.src);
        } else {
            shutdown_write(&*self.dst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory::{BufferSink, BufferSource};
    use crate::io::Stream;

    #[test]
    fn attach_preserves_byte_order() {
        let mut input = Buffer::new();
        input.append(b"the quick brown fox");
        let src = BufferSource::new(input);

        let received: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let r = received.clone();
        let dst = BufferSink::new(move |buf: &mut Buffer| {
            *r.borrow_mut() = buf.to_vec();
        });

        let att = attach(src, dst).unwrap();
        assert!(att.is_done());
        assert_eq!(&*received.borrow(), b"the quick brown fox");
    }

    #[test]
    fn attach_propagates_source_eof_as_write_shutdown() {
        let src = BufferSource::new(Buffer::new());
        let done = Rc::new(Cell::new(false));
        let d = done.clone();
        let dst = BufferSink::new(move |buf: &mut Buffer| {
            assert!(buf.is_empty());
            d.set(true);
        });
        attach(src, dst.clone()).unwrap();
        assert!(done.get());
        assert_eq!(dst.core().write_state(), HalfState::ShutDown);
    }
}
