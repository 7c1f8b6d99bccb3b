/*
 * buffer.rs
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

//! Chunked byte queue: an ordered rope of fragments (bytes crate storage).
//! Draining one buffer into another moves whole fragments without copying
//! their bodies. A fragment may reference foreign memory; its release
//! callback runs exactly once, when the last byte of the fragment (and of
//! every piece split from it) has been drained.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use bytes::{Buf, Bytes, BytesMut};

/// Cap on an owned tail fragment before appends start a new one, so the
/// rope keeps fragment bodies at a size that is cheap to move and split.
const OWNED_FRAGMENT_LIMIT: usize = 16 * 1024;
const OWNED_FRAGMENT_MIN: usize = 4 * 1024;

/// Runs the wrapped callback when the last clone drops, i.e. when every
/// piece of the originating foreign fragment has been drained.
struct ReleaseGuard {
    callback: Cell<Option<Box<dyn FnOnce()>>>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(f) = self.callback.take() {
            f();
        }
    }
}

enum FragmentData {
    Owned(BytesMut),
    Foreign(Bytes),
}

impl FragmentData {
    fn as_slice(&self) -> &[u8] {
        match self {
            FragmentData::Owned(b) => b,
            FragmentData::Foreign(b) => b,
        }
    }

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn advance(&mut self, n: usize) {
        match self {
            FragmentData::Owned(b) => b.advance(n),
            FragmentData::Foreign(b) => b.advance(n),
        }
    }

    fn split_to(&mut self, n: usize) -> FragmentData {
        match self {
            FragmentData::Owned(b) => FragmentData::Owned(b.split_to(n)),
            FragmentData::Foreign(b) => FragmentData::Foreign(b.split_to(n)),
        }
    }
}

struct Fragment {
    data: FragmentData,
    release: Option<Rc<ReleaseGuard>>,
}

/// Byte queue assembled from owned and foreign fragments.
///
/// `size()` always equals the sum of the fragment bodies. Offsets reported
/// by [`Buffer::index_of`] and [`BufferIter`] are positions in the logical
/// byte stream, not within any one fragment.
#[derive(Default)]
pub struct Buffer {
    fragments: VecDeque<Fragment>,
    size: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self {
            fragments: VecDeque::new(),
            size: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Append by copy into the owned tail fragment.
    pub fn append(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.size += data.len();
        if let Some(tail) = self.fragments.back_mut() {
            if tail.release.is_none() {
                if let FragmentData::Owned(b) = &mut tail.data {
                    if b.len() < OWNED_FRAGMENT_LIMIT {
                        b.extend_from_slice(data);
                        return;
                    }
                }
            }
        }
        let mut b = BytesMut::with_capacity(data.len().max(OWNED_FRAGMENT_MIN));
        b.extend_from_slice(data);
        self.fragments.push_back(Fragment {
            data: FragmentData::Owned(b),
            release: None,
        });
    }

    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    pub fn append_byte(&mut self, b: u8) {
        self.append(&[b]);
    }

    /// Append a foreign region by reference. The body is never copied; the
    /// release callback fires exactly once when the last byte of the region
    /// has been drained (wherever it ends up after drains and transfers).
    pub fn append_foreign(&mut self, data: Bytes, release: Option<Box<dyn FnOnce()>>) {
        let release = release.map(|f| {
            Rc::new(ReleaseGuard {
                callback: Cell::new(Some(f)),
            })
        });
        if data.is_empty() {
            // Nothing to drain; guard drops here and the release runs now.
            return;
        }
        self.size += data.len();
        self.fragments.push_back(Fragment {
            data: FragmentData::Foreign(data),
            release,
        });
    }

    /// Append a shared byte region without a release callback.
    pub fn append_bytes(&mut self, data: Bytes) {
        self.append_foreign(data, None);
    }

    /// Append formatted text (the printf of this buffer).
    pub fn append_fmt(&mut self, args: fmt::Arguments<'_>) {
        // Writing into a Buffer cannot fail.
        let _ = fmt::Write::write_fmt(self, args);
    }

    /// Copy up to `out.len()` bytes out of the front of the buffer,
    /// consuming them. Returns the number of bytes read.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let mut done = 0;
        while done < out.len() {
            let Some(front) = self.fragments.front_mut() else {
                break;
            };
            let take = front.data.len().min(out.len() - done);
            out[done..done + take].copy_from_slice(&front.data.as_slice()[..take]);
            front.data.advance(take);
            done += take;
            if front.data.len() == 0 {
                self.fragments.pop_front();
            }
        }
        self.size -= done;
        done
    }

    /// Copy up to `out.len()` bytes out of the front without consuming.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let mut done = 0;
        for frag in &self.fragments {
            if done == out.len() {
                break;
            }
            let take = frag.data.len().min(out.len() - done);
            out[done..done + take].copy_from_slice(&frag.data.as_slice()[..take]);
            done += take;
        }
        done
    }

    /// Drop up to `n` bytes from the front. Returns the number discarded.
    pub fn discard(&mut self, n: usize) -> usize {
        let mut done = 0;
        while done < n {
            let Some(front) = self.fragments.front_mut() else {
                break;
            };
            let take = front.data.len().min(n - done);
            front.data.advance(take);
            done += take;
            if front.data.len() == 0 {
                self.fragments.pop_front();
            }
        }
        self.size -= done;
        done
    }

    /// Move all bytes of `src` to the end of `self` without copying
    /// fragment bodies.
    pub fn drain_from(&mut self, src: &mut Buffer) {
        self.size += src.size;
        src.size = 0;
        self.fragments.append(&mut src.fragments);
    }

    /// Move up to `n` bytes from the front of `src` to the end of `self`.
    /// Fragment bodies are split, not copied; a split foreign fragment's
    /// release callback still fires only after both pieces drain.
    pub fn transfer_from(&mut self, src: &mut Buffer, n: usize) -> usize {
        let mut done = 0;
        while done < n {
            let Some(front) = src.fragments.front_mut() else {
                break;
            };
            let avail = front.data.len();
            if avail <= n - done {
                let frag = src.fragments.pop_front().expect("front exists");
                done += avail;
                self.fragments.push_back(frag);
            } else {
                let take = n - done;
                let head = front.data.split_to(take);
                self.fragments.push_back(Fragment {
                    data: head,
                    release: front.release.clone(),
                });
                done += take;
            }
        }
        src.size -= done;
        self.size += done;
        done
    }

    /// Remove and drop everything, running pending release callbacks.
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.size = 0;
    }

    /// Offset of the first occurrence of `byte` in the logical stream.
    pub fn index_of(&self, byte: u8) -> Option<usize> {
        let mut base = 0;
        for frag in &self.fragments {
            if let Some(i) = frag.data.as_slice().iter().position(|&b| b == byte) {
                return Some(base + i);
            }
            base += frag.data.len();
        }
        None
    }

    /// Consume one newline-terminated line, returning it without the
    /// terminator (CRLF or LF). Returns None when no full line is buffered.
    pub fn read_line(&mut self) -> Option<Vec<u8>> {
        let nl = self.index_of(b'\n')?;
        let mut line = vec![0u8; nl + 1];
        let got = self.read(&mut line);
        debug_assert_eq!(got, nl + 1);
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Copy the whole contents out (diagnostics and tests).
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.size];
        let got = self.peek(&mut out);
        debug_assert_eq!(got, self.size);
        out
    }

    pub fn iter(&self) -> BufferIter<'_> {
        BufferIter {
            buffer: self,
            fragment: 0,
            within: 0,
            offset: 0,
        }
    }
}

impl fmt::Write for Buffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.append_str(s);
        Ok(())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Buffer {{ size: {}, fragments: {} }}",
            self.size,
            self.fragments.len()
        )
    }
}

/// Cursor over the logical byte stream of a [`Buffer`].
pub struct BufferIter<'a> {
    buffer: &'a Buffer,
    fragment: usize,
    within: usize,
    offset: usize,
}

impl<'a> BufferIter<'a> {
    /// Position in the logical stream.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Copy up to `out.len()` bytes at the cursor without moving it.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let mut done = 0;
        let mut fragment = self.fragment;
        let mut within = self.within;
        while done < out.len() {
            let Some(frag) = self.buffer.fragments.get(fragment) else {
                break;
            };
            let body = frag.data.as_slice();
            let take = (body.len() - within).min(out.len() - done);
            out[done..done + take].copy_from_slice(&body[within..within + take]);
            done += take;
            fragment += 1;
            within = 0;
        }
        done
    }

    /// Advance by up to `n` bytes. Returns the number skipped.
    pub fn skip(&mut self, n: usize) -> usize {
        let mut done = 0;
        while done < n {
            let Some(frag) = self.buffer.fragments.get(self.fragment) else {
                break;
            };
            let body = frag.data.len();
            let take = (body - self.within).min(n - done);
            self.within += take;
            done += take;
            if self.within == body {
                self.fragment += 1;
                self.within = 0;
            }
        }
        self.offset += done;
        done
    }

    /// Absolute offset of the next occurrence of `byte` at or after the
    /// cursor, without moving it.
    pub fn find_char(&self, byte: u8) -> Option<usize> {
        let mut base = self.offset;
        let mut fragment = self.fragment;
        let mut within = self.within;
        while let Some(frag) = self.buffer.fragments.get(fragment) {
            let body = &frag.data.as_slice()[within..];
            if let Some(i) = body.iter().position(|&b| b == byte) {
                return Some(base + i);
            }
            base += body.len();
            fragment += 1;
            within = 0;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn append_read_roundtrip() {
        let mut b = Buffer::new();
        b.append(b"hello ");
        b.append_str("world");
        assert_eq!(b.size(), 11);
        let mut out = [0u8; 11];
        assert_eq!(b.read(&mut out), 11);
        assert_eq!(&out, b"hello world");
        assert!(b.is_empty());
    }

    #[test]
    fn drain_preserves_bytes_across_partitions() {
        // Any partition of the input into appends must drain back intact.
        let input: Vec<u8> = (0u8..=255).cycle().take(10_000).collect();
        for chunk in [1usize, 7, 256, 4096, 9999] {
            let mut b = Buffer::new();
            for part in input.chunks(chunk) {
                b.append(part);
            }
            assert_eq!(b.size(), input.len());
            assert_eq!(b.to_vec(), input);
        }
    }

    #[test]
    fn drain_moves_everything() {
        let mut a = Buffer::new();
        let mut b = Buffer::new();
        a.append(b"abc");
        b.append(b"defg");
        a.drain_from(&mut b);
        assert_eq!(a.size(), 7);
        assert!(b.is_empty());
        assert_eq!(a.to_vec(), b"abcdefg");
    }

    #[test]
    fn transfer_splits_without_losing_release() {
        let released = Rc::new(Cell::new(false));
        let flag = released.clone();
        let mut src = Buffer::new();
        src.append_foreign(
            Bytes::from_static(b"0123456789"),
            Some(Box::new(move || flag.set(true))),
        );
        let mut dst = Buffer::new();
        assert_eq!(dst.transfer_from(&mut src, 4), 4);
        assert_eq!(dst.to_vec(), b"0123");
        assert_eq!(src.size(), 6);
        // Drain the transferred half; the source half still pins the region.
        dst.clear();
        assert!(!released.get());
        src.clear();
        assert!(released.get());
    }

    #[test]
    fn release_fires_once_on_last_byte() {
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        let mut b = Buffer::new();
        b.append_foreign(
            Bytes::from_static(b"xyz"),
            Some(Box::new(move || *c.borrow_mut() += 1)),
        );
        let mut out = [0u8; 2];
        b.read(&mut out);
        assert_eq!(*count.borrow(), 0);
        b.read(&mut out);
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn index_of_spans_fragments() {
        let mut b = Buffer::new();
        b.append_foreign(Bytes::from_static(b"abc"), None);
        b.append_foreign(Bytes::from_static(b"def\ngh"), None);
        assert_eq!(b.index_of(b'\n'), Some(6));
        assert_eq!(b.index_of(b'z'), None);
        assert_eq!(b.read_line().unwrap(), b"abcdef");
        assert_eq!(b.to_vec(), b"gh");
    }

    #[test]
    fn read_line_strips_crlf() {
        let mut b = Buffer::new();
        b.append(b"GET / HTTP/1.0\r\nrest");
        assert_eq!(b.read_line().unwrap(), b"GET / HTTP/1.0");
        assert_eq!(b.to_vec(), b"rest");
        assert!(b.read_line().is_none());
    }

    #[test]
    fn iterator_peek_skip_find() {
        let mut b = Buffer::new();
        b.append_foreign(Bytes::from_static(b"one"), None);
        b.append_foreign(Bytes::from_static(b"two:three"), None);
        let mut it = b.iter();
        assert_eq!(it.find_char(b':'), Some(6));
        assert_eq!(it.skip(6), 6);
        assert_eq!(it.offset(), 6);
        let mut out = [0u8; 3];
        assert_eq!(it.peek(&mut out), 3);
        assert_eq!(&out, b":th");
        assert_eq!(it.find_char(b':'), Some(6));
    }

    #[test]
    fn append_fmt_formats() {
        let mut b = Buffer::new();
        b.append_fmt(format_args!("{} {}\r\n", "HTTP/1.1", 200));
        assert_eq!(b.to_vec(), b"HTTP/1.1 200\r\n");
    }

    #[test]
    fn clear_runs_releases() {
        let released = Rc::new(Cell::new(0));
        let mut b = Buffer::new();
        for _ in 0..3 {
            let r = released.clone();
            b.append_foreign(
                Bytes::from_static(b"data"),
                Some(Box::new(move || r.set(r.get() + 1))),
            );
        }
        b.clear();
        assert_eq!(released.get(), 3);
    }
}
