/*
 * pipe.rs
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

//! In-memory duplex pipe: two connected endpoints, each readable from its
//! own inbox and writable into the peer's, with a bounded in-flight window
//! and half-shutdown semantics matching a socket pair.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::buffer::Buffer;
use crate::error::Error;
use crate::io::{HalfState, IoCore, Stream};

/// One endpoint of a [`pipe_pair`].
pub struct PipeEnd {
    core: IoCore,
    inbox: Rc<RefCell<Buffer>>,
    outbox: Rc<RefCell<Buffer>>,
    peer: RefCell<Weak<PipeEnd>>,
    window: usize,
}

/// Create a connected endpoint pair. `window` bounds the bytes in flight
/// in each direction (ignored for an endpoint with `never_partial_writes`
/// set).
pub fn pipe_pair(window: usize) -> (Rc<PipeEnd>, Rc<PipeEnd>) {
    let ab: Rc<RefCell<Buffer>> = Rc::new(RefCell::new(Buffer::new()));
    let ba: Rc<RefCell<Buffer>> = Rc::new(RefCell::new(Buffer::new()));
    let a = Rc::new(PipeEnd {
        core: IoCore::new(true, true),
        inbox: ba.clone(),
        outbox: ab.clone(),
        peer: RefCell::new(Weak::new()),
        window,
    });
    let b = Rc::new(PipeEnd {
        core: IoCore::new(true, true),
        inbox: ab,
        outbox: ba,
        peer: RefCell::new(Weak::new()),
        window,
    });
    *a.peer.borrow_mut() = Rc::downgrade(&b);
    *b.peer.borrow_mut() = Rc::downgrade(&a);
    (a, b)
}

impl PipeEnd {
    fn peer(&self) -> Option<Rc<PipeEnd>> {
        self.peer.borrow().upgrade()
    }

    fn peer_write_finished(&self) -> bool {
        match self.peer() {
            Some(peer) => !matches!(peer.core.write_state(), HalfState::Ready),
            None => true,
        }
    }

    /// Bytes the peer has not yet consumed in our outgoing direction.
    fn outbox_room(&self) -> usize {
        if self.core.never_partial_writes() {
            usize::MAX
        } else {
            self.window.saturating_sub(self.outbox.borrow().size())
        }
    }

    fn after_read(&self, drained: usize) {
        if drained > 0 {
            if let Some(peer) = self.peer() {
                peer.core.write_hook().notify();
            }
        }
        if self.inbox.borrow().is_empty() && self.peer_write_finished() {
            self.core.notify_read_shutdown();
        }
    }

    fn after_write(&self, appended: usize) {
        if appended > 0 {
            if let Some(peer) = self.peer() {
                peer.core.read_hook().notify();
            }
        }
    }
}

impl Stream for PipeEnd {
    fn core(&self) -> &IoCore {
        &self.core
    }

    fn raw_read(&self, dst: &mut [u8]) -> Result<usize, Error> {
        if self.core.read_state() == HalfState::Errored {
            return Err(self.core.error().unwrap_or_else(|| Error::io("pipe error")));
        }
        let n = self.inbox.borrow_mut().read(dst);
        self.after_read(n);
        Ok(n)
    }

    fn raw_read_buffer(&self, dst: &mut Buffer) -> Result<usize, Error> {
        if self.core.read_state() == HalfState::Errored {
            return Err(self.core.error().unwrap_or_else(|| Error::io("pipe error")));
        }
        let mut inbox = self.inbox.borrow_mut();
        let n = inbox.size();
        dst.drain_from(&mut inbox);
        drop(inbox);
        self.after_read(n);
        Ok(n)
    }

    fn raw_write(&self, src: &[u8]) -> Result<usize, Error> {
        if !self.core.is_writable() {
            return Err(self
                .core
                .error()
                .unwrap_or_else(|| Error::io("pipe is not writable")));
        }
        if self.peer().is_none() {
            return Err(Error::io("pipe peer has gone away"));
        }
        let n = src.len().min(self.outbox_room());
        self.outbox.borrow_mut().append(&src[..n]);
        self.after_write(n);
        Ok(n)
    }

    fn raw_write_buffer(&self, src: &mut Buffer) -> Result<usize, Error> {
        if !self.core.is_writable() {
            return Err(self
                .core
                .error()
                .unwrap_or_else(|| Error::io("pipe is not writable")));
        }
        if self.peer().is_none() {
            return Err(Error::io("pipe peer has gone away"));
        }
        let room = self.outbox_room();
        let n = self.outbox.borrow_mut().transfer_from(src, room.min(src.size()));
        self.after_write(n);
        Ok(n)
    }

    fn on_shutdown_write(&self) {
        // Our write shutdown is the peer's EOF once it drains the inbox.
        if let Some(peer) = self.peer() {
            if peer.inbox.borrow().is_empty() {
                peer.core.notify_read_shutdown();
            } else {
                peer.core.read_hook().notify();
            }
        }
    }

    fn on_shutdown_read(&self) {
        // Discard anything undelivered and stop accepting from the peer.
        self.inbox.borrow_mut().clear();
        if let Some(peer) = self.peer() {
            peer.core.notify_write_shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{attach, shutdown_write};
    use crate::io::memory::{BufferSink, BufferSource};
    use std::cell::Cell;

    #[test]
    fn write_is_read_by_peer() {
        let (a, b) = pipe_pair(64);
        assert_eq!(a.raw_write(b"hello").unwrap(), 5);
        let mut out = [0u8; 8];
        assert_eq!(b.raw_read(&mut out).unwrap(), 5);
        assert_eq!(&out[..5], b"hello");
        assert_eq!(b.raw_read(&mut out).unwrap(), 0);
        assert_eq!(b.core().read_state(), HalfState::Ready);
    }

    #[test]
    fn window_limits_in_flight_bytes() {
        let (a, b) = pipe_pair(4);
        assert_eq!(a.raw_write(b"abcdef").unwrap(), 4);
        let mut out = [0u8; 2];
        assert_eq!(b.raw_read(&mut out).unwrap(), 2);
        assert_eq!(a.raw_write(b"ef").unwrap(), 2);
    }

    #[test]
    fn write_shutdown_becomes_peer_eof_after_drain() {
        let (a, b) = pipe_pair(64);
        a.raw_write(b"tail").unwrap();
        shutdown_write(&*a);
        let mut out = [0u8; 8];
        assert_eq!(b.raw_read(&mut out).unwrap(), 4);
        assert_eq!(b.core().read_state(), HalfState::ShutDown);
    }

    #[test]
    fn read_shutdown_stops_peer_writes() {
        let (a, b) = pipe_pair(64);
        crate::io::shutdown_read(&*b);
        assert_eq!(a.core().write_state(), HalfState::ShutDown);
        assert!(a.raw_write(b"x").is_err());
    }

    #[test]
    fn attach_through_pipe_preserves_bytes() {
        let mut input = Buffer::new();
        input.append(b"0123456789".repeat(100).as_slice());
        let src = BufferSource::new(input);
        let (a, b) = pipe_pair(16); // force many windowed hops
        let got: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let g = got.clone();
        let done = Rc::new(Cell::new(false));
        let d = done.clone();
        let dst = BufferSink::new(move |buf: &mut Buffer| {
            *g.borrow_mut() = buf.to_vec();
            d.set(true);
        });
        attach(src, a).unwrap();
        attach(b, dst).unwrap();
        assert!(done.get());
        assert_eq!(got.borrow().len(), 1000);
        assert_eq!(&got.borrow()[..10], b"0123456789");
    }
}
