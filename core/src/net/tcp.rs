/*
 * tcp.rs
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

//! TCP transport: a socket (plain or TLS) bridged onto the stream model.
//! A pump task owns the socket and shuttles bytes between it and the
//! transport's in/out buffers, firing the readiness hooks as data arrives
//! and as the outgoing buffer drains.

use std::cell::{Cell, RefCell};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;

use crate::buffer::Buffer;
use crate::error::Error;
use crate::io::{HalfState, IoCore, Stream};
use crate::mainloop::LoopHandle;

const INBOX_LIMIT: usize = 64 * 1024;
const OUTBOX_LIMIT: usize = 64 * 1024;
const CHUNK: usize = 4096;

/// Unified socket: plain TCP or a TLS client session over TCP.
pub enum NetStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for NetStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            NetStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            NetStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            NetStream::Plain(s) => Pin::new(s).poll_flush(cx),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            NetStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Socket-backed stream endpoint.
pub struct Transport {
    core: IoCore,
    inbox: RefCell<Buffer>,
    outbox: RefCell<Buffer>,
    kick: Rc<Notify>,
    stop_reading: Cell<bool>,
    flush_and_close: Cell<bool>,
}

impl Transport {
    /// Bridge an already-connected socket. Must be called from within a
    /// main-loop task (the pump is spawned onto the current LocalSet).
    pub fn from_net(stream: NetStream) -> Rc<Self> {
        let transport = Rc::new(Self {
            core: IoCore::new(true, true),
            inbox: RefCell::new(Buffer::new()),
            outbox: RefCell::new(Buffer::new()),
            kick: Rc::new(Notify::new()),
            stop_reading: Cell::new(false),
            flush_and_close: Cell::new(false),
        });
        let t = transport.clone();
        tokio::task::spawn_local(async move {
            run_pump(t, stream).await;
        });
        transport
    }

    pub async fn connect(addr: SocketAddr) -> Result<Rc<Self>, Error> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::io(format!("connect to {}: {}", addr, e)))?;
        let _ = stream.set_nodelay(true);
        Ok(Self::from_net(NetStream::Plain(stream)))
    }
}

impl Stream for Transport {
    fn core(&self) -> &IoCore {
        &self.core
    }

    fn raw_read(&self, dst: &mut [u8]) -> Result<usize, Error> {
        if self.core.read_state() == HalfState::Errored {
            return Err(self
                .core
                .error()
                .unwrap_or_else(|| Error::io("transport error")));
        }
        let n = self.inbox.borrow_mut().read(dst);
        if n > 0 {
            self.kick.notify_one();
        }
        Ok(n)
    }

    fn raw_read_buffer(&self, dst: &mut Buffer) -> Result<usize, Error> {
        if self.core.read_state() == HalfState::Errored {
            return Err(self
                .core
                .error()
                .unwrap_or_else(|| Error::io("transport error")));
        }
        let mut inbox = self.inbox.borrow_mut();
        let n = inbox.size();
        dst.drain_from(&mut inbox);
        drop(inbox);
        if n > 0 {
            self.kick.notify_one();
        }
        Ok(n)
    }

    fn raw_write(&self, src: &[u8]) -> Result<usize, Error> {
        if !self.core.is_writable() {
            return Err(self
                .core
                .error()
                .unwrap_or_else(|| Error::io("transport is not writable")));
        }
        let room = if self.core.never_partial_writes() {
            usize::MAX
        } else {
            OUTBOX_LIMIT.saturating_sub(self.outbox.borrow().size())
        };
        let n = src.len().min(room);
        self.outbox.borrow_mut().append(&src[..n]);
        if n > 0 {
            self.kick.notify_one();
        }
        Ok(n)
    }

    fn raw_write_buffer(&self, src: &mut Buffer) -> Result<usize, Error> {
        if !self.core.is_writable() {
            return Err(self
                .core
                .error()
                .unwrap_or_else(|| Error::io("transport is not writable")));
        }
        let room = if self.core.never_partial_writes() {
            usize::MAX
        } else {
            OUTBOX_LIMIT.saturating_sub(self.outbox.borrow().size())
        };
        let n = self
            .outbox
            .borrow_mut()
            .transfer_from(src, room.min(src.size()));
        if n > 0 {
            self.kick.notify_one();
        }
        Ok(n)
    }

    fn on_shutdown_read(&self) {
        self.stop_reading.set(true);
        self.inbox.borrow_mut().clear();
        self.kick.notify_one();
    }

    fn on_shutdown_write(&self) {
        self.flush_and_close.set(true);
        self.kick.notify_one();
    }
}

async fn run_pump(transport: Rc<Transport>, stream: NetStream) {
    let (mut rd, mut wr) = tokio::io::split(stream);
    let mut chunk = vec![0u8; CHUNK];
    let mut read_done = false;
    let mut write_done = false;

    loop {
        if transport.stop_reading.get() {
            read_done = true;
        }
        if !write_done
            && transport.flush_and_close.get()
            && transport.outbox.borrow().is_empty()
        {
            let _ = wr.shutdown().await;
            write_done = true;
        }
        if read_done && write_done {
            break;
        }

        let want_read = !read_done && transport.inbox.borrow().size() < INBOX_LIMIT;
        let to_write: Option<Vec<u8>> = {
            let outbox = transport.outbox.borrow();
            if write_done || outbox.is_empty() {
                None
            } else {
                let mut v = vec![0u8; outbox.size().min(CHUNK)];
                outbox.peek(&mut v);
                Some(v)
            }
        };

        let read_fut = async { rd.read(&mut chunk).await };
        let write_fut = async {
            match &to_write {
                Some(data) => wr.write(data).await,
                None => unreachable!("write branch disabled when empty"),
            }
        };

        tokio::select! {
            res = read_fut, if want_read => match res {
                Ok(0) => {
                    read_done = true;
                    transport.core.notify_read_shutdown();
                }
                Ok(n) => {
                    transport.inbox.borrow_mut().append(&chunk[..n]);
                    transport.core.read_hook().notify();
                }
                Err(e) => {
                    read_done = true;
                    log::debug!("transport read error: {}", e);
                    transport.core.set_read_error(e.into());
                }
            },
            res = write_fut, if to_write.is_some() => match res {
                Ok(n) => {
                    transport.outbox.borrow_mut().discard(n);
                    transport.core.write_hook().notify();
                }
                Err(e) => {
                    write_done = true;
                    log::debug!("transport write error: {}", e);
                    transport.outbox.borrow_mut().clear();
                    transport.core.set_write_error(e.into());
                }
            },
            _ = transport.kick.notified() => {}
        }
    }
    // Socket halves drop here; anything not yet shut down is now dead.
    transport.core.notify_read_shutdown();
    transport.core.notify_write_shutdown();
}

/// Listening socket; accepted connections are bridged to [`Transport`]s
/// and handed to the callback.
pub struct TcpListenerSource {
    listener: TcpListener,
}

impl TcpListenerSource {
    pub async fn bind(addr: SocketAddr) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::io(format!("bind {}: {}", addr, e)))?;
        Ok(Self { listener })
    }

    /// Adopt an already-bound std listener. Must run within the loop's
    /// runtime; the socket is switched to non-blocking mode.
    pub fn from_std(listener: std::net::TcpListener) -> Result<Self, Error> {
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::io(format!("set_nonblocking: {}", e)))?;
        let listener = TcpListener::from_std(listener)
            .map_err(|e| Error::io(format!("adopting listener: {}", e)))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.listener.local_addr().map_err(Error::from)
    }

    /// Run the accept loop on the main loop. The returned handle aborts
    /// the loop when dropped via [`JoinHandle::abort`].
    pub fn start(
        self,
        handle: &LoopHandle,
        mut on_accept: impl FnMut(Rc<Transport>, SocketAddr) + 'static,
    ) -> JoinHandle<()> {
        handle.spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let transport = Transport::from_net(NetStream::Plain(stream));
                        on_accept(transport, peer);
                    }
                    Err(e) => {
                        log::warn!("accept failed: {}", e);
                    }
                }
            }
        })
    }
}
