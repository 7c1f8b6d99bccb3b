/*
 * server.rs
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

//! HTTP server endpoint, the mirror of the client: writing it feeds
//! request bytes, reading it yields response bytes. Decoded requests are
//! queued (pipelining) and exposed through the `has_request` hook; each
//! is answered exactly once via [`HttpServer::respond`], and responses go
//! out in arrival order. POST bodies are exposed as streams with bounded
//! buffering driving write-backpressure on the transport.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::buffer::Buffer;
use crate::error::Error;
use crate::hook::Hook;
use crate::http::body::BodyStream;
use crate::http::header::{ConnectionType, ParseFlags, TransferEncoding, Verb};
use crate::http::input::request_from_buffer;
use crate::http::output::response_to_buffer;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::io::{IoCore, Stream, StreamRef};
use crate::mainloop::{LoopHandle, SourceId};

/// POST bytes buffered before the server stops consuming the transport.
const POST_BUFFER_LIMIT: usize = 8 * 1024;
const OUTGOING_LIMIT: usize = 16 * 1024;

/// Progress of request parsing on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Init,
    ReadingPost { remaining: i64 },
    ReadingChunkSize,
    ReadingChunkData { remaining: i64 },
    ReadingChunkDataEnd,
    ReadingChunkTrailer,
}

/// A request as handed to the application: the parsed header plus the
/// POST body stream when the request carries one.
pub struct ServerRequest {
    id: u64,
    pub request: Request,
    pub post_stream: Option<StreamRef>,
}

struct ResponseRecord {
    id: u64,
    verb: Verb,
    simple_http09: bool,
    /// Close the connection after this response.
    close_after: bool,
    responded: bool,
    headers_written: bool,
    chunked: bool,
    response: Option<Response>,
    content: Option<StreamRef>,
    content_trapped: bool,
    done: bool,
}

/// HTTP/1.x server endpoint for one connection.
pub struct HttpServer {
    weak: Weak<HttpServer>,
    core: IoCore,
    incoming: RefCell<Buffer>,
    outgoing: RefCell<Buffer>,
    read_state: Cell<ReadState>,
    current_post: RefCell<Option<Rc<BodyStream>>>,
    /// Parsed requests not yet taken by the application.
    ready: RefCell<VecDeque<ServerRequest>>,
    has_request: Hook,
    /// Per-response records in arrival order; the front is being (or
    /// waiting to be) written.
    records: RefCell<VecDeque<ResponseRecord>>,
    next_id: Cell<u64>,
    dead: Cell<bool>,
    /// Stop accepting further requests (fatal parse error or close).
    no_more_requests: Cell<bool>,
    keepalive: RefCell<Option<(LoopHandle, Duration)>>,
    keepalive_source: Cell<Option<SourceId>>,
    processing: Cell<bool>,
    reprocess: Cell<bool>,
}

impl HttpServer {
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            core: IoCore::new(true, true),
            incoming: RefCell::new(Buffer::new()),
            outgoing: RefCell::new(Buffer::new()),
            read_state: Cell::new(ReadState::Init),
            current_post: RefCell::new(None),
            ready: RefCell::new(VecDeque::new()),
            has_request: Hook::new(),
            records: RefCell::new(VecDeque::new()),
            next_id: Cell::new(1),
            dead: Cell::new(false),
            no_more_requests: Cell::new(false),
            keepalive: RefCell::new(None),
            keepalive_source: Cell::new(None),
            processing: Cell::new(false),
            reprocess: Cell::new(false),
        })
    }

    /// Fires whenever a parsed request becomes available.
    pub fn has_request_hook(&self) -> &Hook {
        &self.has_request
    }

    /// Dequeue the next parsed request, if any.
    pub fn get_request(&self) -> Option<ServerRequest> {
        self.ready.borrow_mut().pop_front()
    }

    /// Convenience: trap the request hook with a callback receiving each
    /// request as it arrives (including any already queued).
    pub fn trap_requests(
        self: &Rc<Self>,
        mut callback: impl FnMut(ServerRequest) + 'static,
    ) -> Result<(), Error> {
        let weak = self.weak.clone();
        self.has_request.trap(
            Box::new(move || {
                if let Some(server) = weak.upgrade() {
                    while let Some(request) = server.get_request() {
                        callback(request);
                    }
                    true
                } else {
                    false
                }
            }),
            None,
        )?;
        // Deliver anything parsed before the trap was installed.
        if !self.ready.borrow().is_empty() {
            self.has_request.notify();
        }
        Ok(())
    }

    /// Enable the keepalive idle timer: when no request is pending and
    /// the connection is quiet for `timeout`, shut it down cleanly.
    pub fn set_keepalive_idle(&self, handle: LoopHandle, timeout: Duration) {
        *self.keepalive.borrow_mut() = Some((handle, timeout));
        self.update_keepalive_timer();
    }

    /// Supply the response (and optional content stream) for `request`.
    /// Exactly one respond per request: a second call warns and is
    /// ignored.
    pub fn respond(
        &self,
        request: &ServerRequest,
        mut response: Response,
        content: Option<StreamRef>,
    ) {
        let mut records = self.records.borrow_mut();
        let Some(record) = records.iter_mut().find(|r| r.id == request.id) else {
            log::warn!("respond() for an unknown request");
            return;
        };
        if record.responded {
            log::warn!("duplicate respond() for one request; ignored");
            return;
        }
        record.responded = true;
        if record.close_after {
            response.common.connection_type = ConnectionType::Close;
        }
        // HTTP/1.0 peers cannot parse chunked framing.
        if response.common.http_minor_version == 0
            && response.common.transfer_encoding == TransferEncoding::Chunked
        {
            response.common.downgrade_to_1_0();
            record.close_after = true;
            response.common.connection_type = ConnectionType::Close;
        }
        if response.common.connection() == ConnectionType::Close {
            record.close_after = true;
        }
        record.chunked =
            response.common.transfer_encoding == TransferEncoding::Chunked;
        record.response = Some(response);
        record.content = content;
        drop(records);
        self.process();
    }

    /* --- the engine --- */

    fn process(&self) {
        if self.processing.get() {
            self.reprocess.set(true);
            return;
        }
        self.processing.set(true);
        loop {
            self.drain_incoming();
            self.fill_outgoing();
            if !self.reprocess.take() {
                break;
            }
        }
        self.processing.set(false);
        self.update_keepalive_timer();
    }

    fn drain_incoming(&self) {
        loop {
            if self.dead.get() {
                self.incoming.borrow_mut().clear();
                break;
            }
            match self.read_state.get() {
                ReadState::Init => {
                    if self.no_more_requests.get() {
                        self.incoming.borrow_mut().clear();
                        break;
                    }
                    if self.incoming.borrow().is_empty() {
                        break;
                    }
                    let parsed = {
                        let mut incoming = self.incoming.borrow_mut();
                        request_from_buffer(
                            &mut incoming,
                            ParseFlags {
                                strict: false,
                                save_errors: true,
                            },
                        )
                    };
                    match parsed {
                        Ok(Some(request)) => self.begin_request(request),
                        Ok(None) => break,
                        Err(e) => {
                            log::debug!("malformed request: {}", e);
                            self.reject_bad_request();
                            break;
                        }
                    }
                }
                ReadState::ReadingPost { remaining } => {
                    let post = self.current_post.borrow().clone();
                    let Some(post) = post else { break };
                    if post.buffered() >= POST_BUFFER_LIMIT {
                        break; // backpressure: stop consuming
                    }
                    let room = POST_BUFFER_LIMIT - post.buffered();
                    // Detach the bytes before feeding: the feed wakes
                    // consumers that may re-enter this endpoint.
                    let mut chunk = Buffer::new();
                    let n = {
                        let mut incoming = self.incoming.borrow_mut();
                        let n = incoming
                            .size()
                            .min(remaining as usize)
                            .min(room);
                        chunk.transfer_from(&mut incoming, n);
                        n
                    };
                    post.feed(&mut chunk, n);
                    if n == 0 {
                        break;
                    }
                    let left = remaining - n as i64;
                    if left == 0 {
                        post.finish();
                        *self.current_post.borrow_mut() = None;
                        self.read_state.set(ReadState::Init);
                    } else {
                        self.read_state
                            .set(ReadState::ReadingPost { remaining: left });
                    }
                }
                ReadState::ReadingChunkSize => {
                    let line = self.incoming.borrow_mut().read_line();
                    let Some(line) = line else { break };
                    let text = String::from_utf8_lossy(&line);
                    let hex = text.split(';').next().unwrap_or("").trim();
                    if hex.is_empty() {
                        continue;
                    }
                    match i64::from_str_radix(hex, 16) {
                        Ok(0) => self.read_state.set(ReadState::ReadingChunkTrailer),
                        Ok(n) => self
                            .read_state
                            .set(ReadState::ReadingChunkData { remaining: n }),
                        Err(_) => {
                            log::debug!("bad chunk size {:?}", hex);
                            self.reject_bad_request();
                            break;
                        }
                    }
                }
                ReadState::ReadingChunkData { remaining } => {
                    let post = self.current_post.borrow().clone();
                    let Some(post) = post else { break };
                    if post.buffered() >= POST_BUFFER_LIMIT {
                        break;
                    }
                    let room = POST_BUFFER_LIMIT - post.buffered();
                    let mut chunk = Buffer::new();
                    let n = {
                        let mut incoming = self.incoming.borrow_mut();
                        let n = incoming
                            .size()
                            .min(remaining as usize)
                            .min(room);
                        chunk.transfer_from(&mut incoming, n);
                        n
                    };
                    post.feed(&mut chunk, n);
                    if n == 0 {
                        break;
                    }
                    let left = remaining - n as i64;
                    if left == 0 {
                        self.read_state.set(ReadState::ReadingChunkDataEnd);
                    } else {
                        self.read_state
                            .set(ReadState::ReadingChunkData { remaining: left });
                    }
                }
                ReadState::ReadingChunkDataEnd => {
                    let mut incoming = self.incoming.borrow_mut();
                    if incoming.size() < 2 {
                        break;
                    }
                    incoming.discard(2);
                    drop(incoming);
                    self.read_state.set(ReadState::ReadingChunkSize);
                }
                ReadState::ReadingChunkTrailer => {
                    let line = self.incoming.borrow_mut().read_line();
                    let Some(line) = line else { break };
                    if line.is_empty() {
                        if let Some(post) = self.current_post.borrow_mut().take() {
                            post.finish();
                        }
                        self.read_state.set(ReadState::Init);
                    }
                }
            }
        }
    }

    fn begin_request(&self, request: Request) {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let simple_http09 = request.simple_first_line;
        let close_after = request.common.connection() == ConnectionType::Close
            || simple_http09;

        let post_stream: Option<StreamRef> = if request.has_content_body() {
            let post = BodyStream::new();
            {
                let weak = self.weak.clone();
                post.set_on_drain(move || {
                    if let Some(server) = weak.upgrade() {
                        // Backpressure released: consume buffered bytes
                        // and let the transport write again.
                        server.process();
                        server.core.write_hook().notify();
                    }
                });
            }
            if request.common.transfer_encoding == TransferEncoding::Chunked {
                self.read_state.set(ReadState::ReadingChunkSize);
                *self.current_post.borrow_mut() = Some(post.clone());
            } else if request.common.content_length > 0 {
                self.read_state.set(ReadState::ReadingPost {
                    remaining: request.common.content_length,
                });
                *self.current_post.borrow_mut() = Some(post.clone());
            } else {
                // No framing given: treat as an empty body.
                post.finish();
            }
            Some(post as StreamRef)
        } else {
            None
        };

        self.records.borrow_mut().push_back(ResponseRecord {
            id,
            verb: request.verb,
            simple_http09,
            close_after,
            responded: false,
            headers_written: false,
            chunked: false,
            response: None,
            content: None,
            content_trapped: false,
            done: false,
        });
        if close_after {
            self.no_more_requests.set(true);
        }
        self.ready.borrow_mut().push_back(ServerRequest {
            id,
            request,
            post_stream,
        });
        self.has_request.notify();
    }

    /// Malformed request: 400 with a short HTML body, then close.
    fn reject_bad_request(&self) {
        self.no_more_requests.set(true);
        self.incoming.borrow_mut().clear();
        let mut response = Response::new(400);
        response.common.connection_type = ConnectionType::Close;
        let body = b"<html><body>400 Bad Request</body></html>\n";
        response.common.content_length = body.len() as i64;
        response.set_content_type("text", "html");
        let mut outgoing = self.outgoing.borrow_mut();
        response_to_buffer(&response, &mut outgoing);
        outgoing.append(body);
        drop(outgoing);
        self.notify_read_ready();
        // No further responses: end the response stream once drained.
        self.records.borrow_mut().clear();
        self.dead.set(true);
        self.core.read_hook().notify();
        self.finish_if_drained();
    }

    /// Write queued responses, in arrival order, as far as possible.
    fn fill_outgoing(&self) {
        loop {
            if self.outgoing.borrow().size() >= OUTGOING_LIMIT {
                break;
            }
            let front_state = {
                let records = self.records.borrow();
                match records.front() {
                    None => break,
                    Some(r) if !r.responded => break,
                    Some(r) => (r.headers_written, r.done),
                }
            };
            let (headers_written, done) = front_state;
            if done {
                self.complete_front();
                continue;
            }
            if !headers_written {
                self.write_front_headers();
                continue;
            }
            if !self.pump_front_content() {
                break;
            }
        }
    }

    fn write_front_headers(&self) {
        enum After {
            Nothing,
            DropContent(StreamRef),
            TrapContent(StreamRef),
        }
        let after = {
            let mut records = self.records.borrow_mut();
            let Some(record) = records.front_mut() else {
                return;
            };
            record.headers_written = true;
            let response = record.response.take().expect("responded record");
            if record.simple_http09 {
                record.chunked = false;
            }
            let is_head = record.verb == Verb::Head;
            let has_body = response.has_content_body(record.verb);
            if !record.simple_http09 {
                let mut outgoing = self.outgoing.borrow_mut();
                response_to_buffer(&response, &mut outgoing);
            }
            if is_head || !has_body {
                record.done = true;
                match record.content.take() {
                    Some(content) => After::DropContent(content),
                    None => After::Nothing,
                }
            } else if record.content.is_none() {
                // Responded without content: an empty body.
                if record.chunked {
                    self.outgoing.borrow_mut().append_str("0\r\n\r\n");
                }
                record.done = true;
                After::Nothing
            } else {
                record.content_trapped = true;
                After::TrapContent(record.content.as_ref().expect("checked").clone())
            }
        };
        match after {
            After::Nothing => {}
            After::DropContent(content) => crate::io::shutdown_read(&*content),
            After::TrapContent(content) => {
                let weak = self.weak.clone();
                let on_event: crate::hook::HookFn = Box::new(move || match weak.upgrade() {
                    Some(server) => {
                        server.process();
                        true
                    }
                    None => false,
                });
                let weak = self.weak.clone();
                let on_shutdown: crate::hook::HookShutdownFn = Box::new(move || {
                    if let Some(server) = weak.upgrade() {
                        server.process();
                    }
                });
                if let Err(e) = content.core().read_hook().trap(on_event, Some(on_shutdown)) {
                    log::warn!("content stream busy: {}", e);
                }
            }
        }
        self.notify_read_ready();
    }

    /// Move content bytes to the outgoing buffer. Returns false when no
    /// further progress is possible now.
    fn pump_front_content(&self) -> bool {
        let (content, chunked) = {
            let records = self.records.borrow();
            let Some(record) = records.front() else {
                return false;
            };
            match &record.content {
                Some(c) => (c.clone(), record.chunked),
                None => return false,
            }
        };
        let mut scratch = Buffer::new();
        let mut progressed = false;
        loop {
            if self.outgoing.borrow().size() >= OUTGOING_LIMIT {
                break;
            }
            match content.raw_read_buffer(&mut scratch) {
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
                    progressed = true;
                }
                Err(e) => {
                    log::warn!("content stream failed: {}", e);
                    self.finish_front_content(chunked, true);
                    return true;
                }
            }
        }
        if progressed {
            self.notify_read_ready();
        }
        if content.core().read_state() != crate::io::HalfState::Ready {
            self.finish_front_content(chunked, false);
            return true;
        }
        progressed
    }

    fn finish_front_content(&self, chunked: bool, errored: bool) {
        if chunked && !errored {
            self.outgoing.borrow_mut().append_str("0\r\n\r\n");
        }
        let mut records = self.records.borrow_mut();
        if let Some(record) = records.front_mut() {
            if let Some(content) = record.content.take() {
                content.core().read_hook().untrap();
            }
            record.done = true;
            if errored {
                record.close_after = true;
            }
        }
        drop(records);
        self.notify_read_ready();
    }

    fn complete_front(&self) {
        let close_after = {
            let mut records = self.records.borrow_mut();
            let Some(record) = records.pop_front() else {
                return;
            };
            record.close_after
        };
        if close_after {
            self.no_more_requests.set(true);
            self.dead.set(true);
            self.records.borrow_mut().clear();
            self.finish_if_drained();
        }
        self.notify_read_ready();
    }

    /// After a closing response: EOF the read side once the outgoing
    /// buffer drains.
    fn finish_if_drained(&self) {
        if self.outgoing.borrow().is_empty() {
            self.core.notify_read_shutdown();
        }
    }

    fn notify_read_ready(&self) {
        self.core.read_hook().notify();
    }

    /* --- keepalive idle timer --- */

    fn idle(&self) -> bool {
        self.records.borrow().is_empty()
            && self.ready.borrow().is_empty()
            && self.incoming.borrow().is_empty()
            && !self.dead.get()
    }

    fn update_keepalive_timer(&self) {
        let Some((handle, timeout)) = self.keepalive.borrow().clone() else {
            return;
        };
        if self.idle() {
            if self.keepalive_source.get().is_none() {
                let weak = self.weak.clone();
                let id = handle.add_timer(timeout, None, move || {
                    if let Some(server) = weak.upgrade() {
                        server.keepalive_source.set(None);
                        if server.idle() {
                            log::debug!("keepalive idle timeout; closing connection");
                            server.dead.set(true);
                            server.core.notify_read_shutdown();
                            server.core.notify_write_shutdown();
                        }
                    }
                    false
                });
                self.keepalive_source.set(Some(id));
            }
        } else if let Some(id) = self.keepalive_source.take() {
            // Null the stored handle before removal so the callback can
            // never observe a stale id.
            handle.remove_source(id);
        }
    }
}

impl Stream for HttpServer {
    fn core(&self) -> &IoCore {
        &self.core
    }

    /// Outgoing response bytes (read by the transport).
    fn raw_read(&self, dst: &mut [u8]) -> Result<usize, Error> {
        let n = self.outgoing.borrow_mut().read(dst);
        if self.dead.get() {
            self.finish_if_drained();
        } else if n > 0 {
            self.process();
        }
        Ok(n)
    }

    fn raw_read_buffer(&self, dst: &mut Buffer) -> Result<usize, Error> {
        let n = {
            let mut outgoing = self.outgoing.borrow_mut();
            let n = outgoing.size();
            dst.drain_from(&mut outgoing);
            n
        };
        if self.dead.get() {
            self.finish_if_drained();
        } else if n > 0 {
            self.process();
        }
        Ok(n)
    }

    /// Incoming request bytes (written by the transport).
    fn raw_write(&self, src: &[u8]) -> Result<usize, Error> {
        // A final request's POST body may still be inbound after
        // no_more_requests is set; only a dead connection discards.
        if self.dead.get() {
            return Ok(src.len());
        }
        // POST backpressure: accept nothing while the body buffer is
        // over its threshold.
        if let Some(post) = &*self.current_post.borrow() {
            if post.buffered() >= POST_BUFFER_LIMIT {
                return Ok(0);
            }
        }
        self.incoming.borrow_mut().append(src);
        self.process();
        Ok(src.len())
    }

    fn raw_write_buffer(&self, src: &mut Buffer) -> Result<usize, Error> {
        if self.dead.get() {
            let n = src.size();
            src.clear();
            return Ok(n);
        }
        if let Some(post) = &*self.current_post.borrow() {
            if post.buffered() >= POST_BUFFER_LIMIT {
                return Ok(0);
            }
        }
        let n = src.size();
        self.incoming.borrow_mut().drain_from(src);
        self.process();
        Ok(n)
    }

    /// Transport EOF: no more requests will arrive.
    fn on_shutdown_write(&self) {
        self.no_more_requests.set(true);
        if let Some(post) = self.current_post.borrow_mut().take() {
            post.fail(Error::io("connection closed mid-body"));
        }
        // If nothing is pending, the response side is finished too.
        if self.records.borrow().is_empty() {
            self.dead.set(true);
            self.finish_if_drained();
        }
    }

    fn on_shutdown_read(&self) {
        // Response side cancelled (transport gone): drop everything.
        self.dead.set(true);
        if let Some(id) = self.keepalive_source.take() {
            if let Some((handle, _)) = &*self.keepalive.borrow() {
                handle.remove_source(id);
            }
        }
    }
}
