/*
 * client.rs
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

//! Persistent-connection HTTP client. The client is itself a stream:
//! reading it yields outgoing request bytes, writing it feeds incoming
//! response bytes, so `attach_pair(client, transport)` wires it to any
//! transport. Requests queue and pipeline; responses dispatch FIFO.
//! A connection close fails every request still in flight.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::buffer::Buffer;
use crate::error::Error;
use crate::hook::Hook;
use crate::http::body::BodyStream;
use crate::http::header::{ConnectionType, ParseFlags, TransferEncoding, Verb};
use crate::http::input::response_from_buffer;
use crate::http::output::request_to_buffer;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::io::{HalfState, IoCore, Stream, StreamRef};

const OUTGOING_LIMIT: usize = 16 * 1024;

/// Callback invoked with the response header and its decoded body
/// stream, or the error that ended the request.
pub type ResponseCallback = Box<dyn FnOnce(Result<(Response, StreamRef), Error>)>;

struct QueuedRequest {
    request: Request,
    upload: Option<StreamRef>,
    callback: ResponseCallback,
}

struct PendingResponse {
    verb: Verb,
    callback: Option<ResponseCallback>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Awaiting (or mid-way through) a response header.
    Headers,
    /// Exact byte count remaining.
    Body { remaining: i64 },
    ChunkSize,
    ChunkData { remaining: i64 },
    /// CRLF after a chunk's data.
    ChunkDataEnd,
    ChunkTrailer,
    /// Body delimited by connection close.
    Eof,
}

/// Pipelining HTTP/1.x client endpoint.
pub struct HttpClient {
    weak: Weak<HttpClient>,
    core: IoCore,
    outgoing: RefCell<Buffer>,
    incoming: RefCell<Buffer>,
    unsent: RefCell<VecDeque<QueuedRequest>>,
    awaiting: RefCell<VecDeque<PendingResponse>>,
    current_upload: RefCell<Option<(StreamRef, bool /* chunked */)>>,
    read_state: Cell<ReadState>,
    current_body: RefCell<Option<Rc<BodyStream>>>,
    requestable: Hook,
    shutdown_when_done: Cell<bool>,
    /// Sticky after a fatal protocol or transport failure.
    dead: Cell<bool>,
    /// The current response mandates close once its body completes.
    closing_after_body: Cell<bool>,
    processing: Cell<bool>,
    reprocess: Cell<bool>,
}

impl HttpClient {
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            core: IoCore::new(true, true),
            outgoing: RefCell::new(Buffer::new()),
            incoming: RefCell::new(Buffer::new()),
            unsent: RefCell::new(VecDeque::new()),
            awaiting: RefCell::new(VecDeque::new()),
            current_upload: RefCell::new(None),
            read_state: Cell::new(ReadState::Headers),
            current_body: RefCell::new(None),
            requestable: Hook::new(),
            shutdown_when_done: Cell::new(false),
            dead: Cell::new(false),
            closing_after_body: Cell::new(false),
            processing: Cell::new(false),
            reprocess: Cell::new(false),
        })
    }

    /// Fires when the client is accepting more requests.
    pub fn requestable_hook(&self) -> &Hook {
        &self.requestable
    }

    pub fn is_requestable(&self) -> bool {
        !self.dead.get() && !self.shutdown_when_done.get()
    }

    /// Requests queued or awaiting their response.
    pub fn n_pending(&self) -> usize {
        self.unsent.borrow().len() + self.awaiting.borrow().len()
    }

    /// Queue a request. The optional upload stream supplies the body
    /// (POST/PUT); it is pumped after the header, framed per the
    /// request's transfer encoding. The callback fires exactly once.
    pub fn request(
        &self,
        request: Request,
        upload: Option<StreamRef>,
        callback: impl FnOnce(Result<(Response, StreamRef), Error>) + 'static,
    ) -> Result<(), Error> {
        if self.dead.get() {
            return Err(Error::io("http client connection has failed"));
        }
        if self.shutdown_when_done.get() {
            return Err(Error::io("http client is shutting down"));
        }
        self.unsent.borrow_mut().push_back(QueuedRequest {
            request,
            upload,
            callback: Box::new(callback),
        });
        self.process();
        Ok(())
    }

    /// Close the transport once every queued request has its response.
    pub fn shutdown_when_done(&self) {
        self.shutdown_when_done.set(true);
        self.process();
        self.maybe_finish_sending();
    }

    /* --- the engine --- */

    fn process(&self) {
        if self.processing.get() {
            self.reprocess.set(true);
            return;
        }
        self.processing.set(true);
        loop {
            self.fill_outgoing();
            self.drain_incoming();
            if !self.reprocess.take() {
                break;
            }
        }
        self.processing.set(false);
        self.maybe_finish_sending();
    }

    /// Move queued requests (headers, then body) into the outgoing
    /// buffer, up to the buffering limit.
    fn fill_outgoing(&self) {
        loop {
            if self.outgoing.borrow().size() >= OUTGOING_LIMIT {
                break;
            }
            // An upload in progress must finish before the next header.
            let upload = self.current_upload.borrow().clone();
            if let Some((stream, chunked)) = upload {
                if !self.pump_upload(&stream, chunked) {
                    break;
                }
                continue;
            }
            let Some(next) = self.unsent.borrow_mut().pop_front() else {
                break;
            };
            let QueuedRequest {
                request,
                upload,
                callback,
            } = next;
            {
                let mut outgoing = self.outgoing.borrow_mut();
                request_to_buffer(&request, &mut outgoing);
            }
            self.awaiting.borrow_mut().push_back(PendingResponse {
                verb: request.verb,
                callback: Some(callback),
            });
            if let Some(upload) = upload {
                let chunked = request.common.transfer_encoding == TransferEncoding::Chunked;
                *self.current_upload.borrow_mut() = Some((upload.clone(), chunked));
                let on_event: crate::hook::HookFn = {
                    let weak = self.weak.clone();
                    Box::new(move || match weak.upgrade() {
                        Some(client) => {
                            client.process();
                            true
                        }
                        None => false,
                    })
                };
                let on_shutdown: crate::hook::HookShutdownFn = {
                    let weak = self.weak.clone();
                    Box::new(move || {
                        if let Some(client) = weak.upgrade() {
                            client.process();
                        }
                    })
                };
                if let Err(e) = upload
                    .core()
                    .read_hook()
                    .trap(on_event, Some(on_shutdown))
                {
                    log::warn!("upload stream busy: {}", e);
                }
            }
            self.notify_read_ready();
        }
    }

    /// Returns true when the upload finished and sending may continue.
    fn pump_upload(&self, upload: &StreamRef, chunked: bool) -> bool {
        let mut scratch = Buffer::new();
        loop {
            if self.outgoing.borrow().size() >= OUTGOING_LIMIT {
                return false;
            }
            match upload.raw_read_buffer(&mut scratch) {
                Ok(0) => break,
                Ok(_) => {
                    let mut outgoing = self.outgoing.borrow_mut();
                    if chunked {
                        outgoing.append_fmt(format_args!("{:x}\r\n", scratch.size()));
                        outgoing.drain_from(&mut scratch);
                        outgoing.append_str("\r\n");
                    } else {
                        outgoing.drain_from(&mut scratch);
                    }
                    drop(outgoing);
                    self.notify_read_ready();
                }
                Err(e) => {
                    log::warn!("upload stream failed: {}", e);
                    self.fail_all(Error::io(format!("upload stream failed: {}", e)));
                    return false;
                }
            }
        }
        if upload.core().read_state() == HalfState::Ready {
            // Not at EOF yet; wait for the upload's read hook.
            return false;
        }
        if chunked {
            self.outgoing.borrow_mut().append_str("0\r\n\r\n");
        }
        upload.core().read_hook().untrap();
        *self.current_upload.borrow_mut() = None;
        self.notify_read_ready();
        true
    }

    /// Parse buffered response bytes, dispatching completed responses.
    fn drain_incoming(&self) {
        loop {
            if self.dead.get() {
                self.incoming.borrow_mut().clear();
                break;
            }
            match self.read_state.get() {
                ReadState::Headers => {
                    if self.incoming.borrow().is_empty() {
                        break;
                    }
                    if self.awaiting.borrow().is_empty() {
                        // Bytes with nothing outstanding: wait; if this
                        // persists the peer is broken.
                        break;
                    }
                    let parsed = {
                        let mut incoming = self.incoming.borrow_mut();
                        response_from_buffer(&mut incoming, ParseFlags::default())
                    };
                    match parsed {
                        Ok(Some(response)) => self.begin_response(response),
                        Ok(None) => break,
                        Err(e) => {
                            self.fail_all(e);
                            break;
                        }
                    }
                }
                ReadState::Body { remaining } => {
                    let body = self.current_body.borrow().clone();
                    let Some(body) = body else { break };
                    // Detach the bytes before feeding: the feed wakes
                    // consumers that may re-enter this endpoint.
                    let mut chunk = Buffer::new();
                    let n = {
                        let mut incoming = self.incoming.borrow_mut();
                        let n = incoming.size().min(remaining as usize);
                        chunk.transfer_from(&mut incoming, n);
                        n
                    };
                    body.feed(&mut chunk, n);
                    let left = remaining - n as i64;
                    if left == 0 {
                        self.finish_body();
                    } else {
                        self.read_state.set(ReadState::Body { remaining: left });
                        break;
                    }
                }
                ReadState::ChunkSize => {
                    let line = self.incoming.borrow_mut().read_line();
                    let Some(line) = line else { break };
                    let text = String::from_utf8_lossy(&line);
                    let hex = text.split(';').next().unwrap_or("").trim();
                    if hex.is_empty() {
                        continue; // tolerate a stray blank line
                    }
                    match i64::from_str_radix(hex, 16) {
                        Ok(0) => self.read_state.set(ReadState::ChunkTrailer),
                        Ok(n) => self.read_state.set(ReadState::ChunkData { remaining: n }),
                        Err(_) => {
                            self.fail_all(Error::parse(format!("bad chunk size {:?}", hex)));
                            break;
                        }
                    }
                }
                ReadState::ChunkData { remaining } => {
                    let body = self.current_body.borrow().clone();
                    let Some(body) = body else { break };
                    let mut chunk = Buffer::new();
                    let n = {
                        let mut incoming = self.incoming.borrow_mut();
                        let n = incoming.size().min(remaining as usize);
                        chunk.transfer_from(&mut incoming, n);
                        n
                    };
                    body.feed(&mut chunk, n);
                    let left = remaining - n as i64;
                    if left == 0 {
                        self.read_state.set(ReadState::ChunkDataEnd);
                    } else {
                        self.read_state.set(ReadState::ChunkData { remaining: left });
                        break;
                    }
                }
                ReadState::ChunkDataEnd => {
                    let mut incoming = self.incoming.borrow_mut();
                    if incoming.size() < 2 {
                        break;
                    }
                    incoming.discard(2);
                    drop(incoming);
                    self.read_state.set(ReadState::ChunkSize);
                }
                ReadState::ChunkTrailer => {
                    let line = self.incoming.borrow_mut().read_line();
                    let Some(line) = line else { break };
                    if line.is_empty() {
                        self.finish_body();
                    }
                    // Trailer headers are read and dropped.
                }
                ReadState::Eof => {
                    let body = self.current_body.borrow().clone();
                    let Some(body) = body else { break };
                    let mut chunk = Buffer::new();
                    let n = {
                        let mut incoming = self.incoming.borrow_mut();
                        let n = incoming.size();
                        chunk.transfer_from(&mut incoming, n);
                        n
                    };
                    body.feed(&mut chunk, n);
                    break;
                }
            }
        }
    }

    fn begin_response(&self, response: Response) {
        let pending = self.awaiting.borrow_mut().pop_front();
        let Some(mut pending) = pending else {
            self.fail_all(Error::protocol("response without a matched request"));
            return;
        };
        if response.common.connection() == ConnectionType::Close {
            self.closing_after_body.set(true);
        }
        let has_body = response.has_content_body(pending.verb);
        let body = if has_body {
            let body = BodyStream::new();
            if response.common.transfer_encoding == TransferEncoding::Chunked {
                self.read_state.set(ReadState::ChunkSize);
            } else if response.common.content_length >= 0 {
                if response.common.content_length == 0 {
                    body.finish();
                    self.read_state.set(ReadState::Headers);
                } else {
                    self.read_state.set(ReadState::Body {
                        remaining: response.common.content_length,
                    });
                }
            } else {
                self.read_state.set(ReadState::Eof);
            }
            body
        } else {
            self.read_state.set(ReadState::Headers);
            BodyStream::empty()
        };
        let finished_now = body.is_finished();
        if !finished_now {
            *self.current_body.borrow_mut() = Some(body.clone());
        }
        let stream: StreamRef = body;
        if let Some(callback) = pending.callback.take() {
            callback(Ok((response, stream)));
        }
        self.requestable.notify();
        if finished_now && self.closing_after_body.get() {
            self.close_out();
        }
    }

    fn finish_body(&self) {
        if let Some(body) = self.current_body.borrow_mut().take() {
            body.finish();
        }
        self.read_state.set(ReadState::Headers);
        if self.closing_after_body.get() {
            self.close_out();
        }
    }

    /// A `Connection: close` response (or HTTP/1.0 default) ends the
    /// exchange: everything still queued fails.
    fn close_out(&self) {
        self.fail_all(Error::io("connection closed by server"));
    }

    fn fail_all(&self, error: Error) {
        if self.dead.get() {
            return;
        }
        self.dead.set(true);
        if let Some(body) = self.current_body.borrow_mut().take() {
            body.fail(error.clone());
        }
        let mut failed: Vec<ResponseCallback> = Vec::new();
        for mut pending in self.awaiting.borrow_mut().drain(..) {
            if let Some(cb) = pending.callback.take() {
                failed.push(cb);
            }
        }
        for queued in self.unsent.borrow_mut().drain(..) {
            failed.push(queued.callback);
        }
        if let Some((upload, _)) = self.current_upload.borrow_mut().take() {
            upload.core().read_hook().untrap();
        }
        for callback in failed {
            callback(Err(error.clone()));
        }
        self.requestable.notify_shutdown();
        self.core.notify_read_shutdown();
    }

    /// EOF the request side once nothing more will ever be sent.
    fn maybe_finish_sending(&self) {
        if self.dead.get() {
            return;
        }
        if !self.shutdown_when_done.get() {
            return;
        }
        if self.unsent.borrow().is_empty()
            && self.current_upload.borrow().is_none()
            && self.outgoing.borrow().is_empty()
        {
            self.core.notify_read_shutdown();
        }
    }

    fn notify_read_ready(&self) {
        self.core.read_hook().notify();
    }
}

impl Stream for HttpClient {
    fn core(&self) -> &IoCore {
        &self.core
    }

    /// Outgoing request bytes (read by the transport).
    fn raw_read(&self, dst: &mut [u8]) -> Result<usize, Error> {
        let n = self.outgoing.borrow_mut().read(dst);
        if n > 0 {
            // Freed buffer space: top up from the queue and any upload.
            self.process();
        }
        self.maybe_finish_sending();
        Ok(n)
    }

    fn raw_read_buffer(&self, dst: &mut Buffer) -> Result<usize, Error> {
        let n = {
            let mut outgoing = self.outgoing.borrow_mut();
            let n = outgoing.size();
            dst.drain_from(&mut outgoing);
            n
        };
        if n > 0 {
            self.process();
        }
        self.maybe_finish_sending();
        Ok(n)
    }

    /// Incoming response bytes (written by the transport).
    fn raw_write(&self, src: &[u8]) -> Result<usize, Error> {
        if self.dead.get() {
            return Ok(src.len()); // swallow: the failure already reported
        }
        self.incoming.borrow_mut().append(src);
        self.process();
        Ok(src.len())
    }

    fn raw_write_buffer(&self, src: &mut Buffer) -> Result<usize, Error> {
        let n = src.size();
        if self.dead.get() {
            src.clear();
            return Ok(n);
        }
        self.incoming.borrow_mut().drain_from(src);
        self.process();
        Ok(n)
    }

    /// Transport hit EOF (its read side shut, so the attach shut our
    /// write half): conclude or fail whatever was in flight.
    fn on_shutdown_write(&self) {
        if self.read_state.get() == ReadState::Eof {
            if let Some(body) = self.current_body.borrow_mut().take() {
                body.finish();
            }
            self.read_state.set(ReadState::Headers);
        }
        if !self.awaiting.borrow().is_empty() || !self.unsent.borrow().is_empty() {
            self.fail_all(Error::io("connection closed before response"));
        } else if !self.dead.get() {
            self.requestable.notify_shutdown();
            self.core.notify_read_shutdown();
        }
    }
}
