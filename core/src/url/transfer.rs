/*
 * transfer.rs
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

//! URL transfer driver: the unit of URL-scoped work. A transfer resolves
//! a name, opens a transport, runs its scheme's protocol, optionally
//! follows redirects, and reports exactly one result through its done
//! callback, whatever path it took to get there.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::Bytes;

use crate::error::Error;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::io::memory::SlabSource;
use crate::io::{shutdown_read, shutdown_write, StreamRef};
use crate::mainloop::{LoopHandle, SourceId};
use crate::net::ResolverTask;
use crate::url::{Scheme, Url};

/// Transfer outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferResult {
    BadRequest,
    BadName,
    NoServer,
    NotFound,
    ServerError,
    Unsupported,
    TimedOut,
    RedirectLoop,
    /// A redirect arrived and `follow_redirects` was off.
    Redirect,
    Cancelled,
    Success,
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Constructing,
    Started,
    Done,
    Error,
}

/// One followed redirect hop.
#[derive(Debug, Clone)]
pub struct RedirectHop {
    pub is_permanent: bool,
    pub url: Url,
}

/// Produces the upload stream and its size (-1 unknown), once per
/// protocol attempt (redirects retry the factory).
pub type UploadFactory = Box<dyn FnMut() -> Result<(StreamRef, i64), Error>>;

/// Mutates the outgoing request just before dispatch.
pub type RequestModifier = Box<dyn Fn(&mut Request)>;

pub type DoneCallback = Box<dyn FnOnce(&UrlTransfer)>;

/// Per-scheme transfer backend.
pub trait TransferBackend {
    fn scheme_name(&self) -> &'static str;

    /// Begin (or, after a redirect, re-begin) the protocol for
    /// `transfer`. Resolution, transport setup, and completion all go
    /// through the transfer's helpers.
    fn start(&self, transfer: &Rc<UrlTransfer>);

    /// Scheme-specific cancellation beyond aborting the resolver and
    /// shutting the transport down.
    fn cancel(&self, _transfer: &Rc<UrlTransfer>) {}
}

thread_local! {
    static REGISTRY: RefCell<HashMap<String, Rc<dyn TransferBackend>>> =
        RefCell::new(HashMap::new());
}

/// Register a backend for a scheme, replacing any previous one.
pub fn register_backend(scheme: &str, backend: Rc<dyn TransferBackend>) {
    REGISTRY.with(|registry| {
        registry
            .borrow_mut()
            .insert(scheme.to_ascii_lowercase(), backend);
    });
}

fn lookup_backend(scheme: &Scheme) -> Option<Rc<dyn TransferBackend>> {
    ensure_builtin_backends();
    REGISTRY.with(|registry| registry.borrow().get(scheme.as_str()).cloned())
}

fn ensure_builtin_backends() {
    thread_local! {
        static DONE: Cell<bool> = const { Cell::new(false) };
    }
    if DONE.with(|d| d.replace(true)) {
        return;
    }
    register_backend(
        "http",
        Rc::new(crate::url::http_backend::HttpBackend::new(false)),
    );
    register_backend(
        "https",
        Rc::new(crate::url::http_backend::HttpBackend::new(true)),
    );
    register_backend("file", Rc::new(crate::url::file_backend::FileBackend));
}

/// A transfer in progress (or finished). Construct with
/// [`UrlTransfer::new`], configure, then [`UrlTransfer::start`].
pub struct UrlTransfer {
    weak: Weak<UrlTransfer>,
    handle: LoopHandle,
    url: RefCell<Url>,
    original_url: Url,
    redirects: RefCell<Vec<RedirectHop>>,
    state: Cell<TransferState>,
    result: Cell<Option<TransferResult>>,
    follow_redirects: Cell<bool>,
    timeout: Cell<Option<Duration>>,
    timeout_source: Cell<Option<SourceId>>,
    address_hint: Cell<Option<SocketAddr>>,
    resolved_address: Cell<Option<SocketAddr>>,
    upload_factory: RefCell<Option<UploadFactory>>,
    modifiers: RefCell<Vec<RequestModifier>>,
    request: RefCell<Option<Request>>,
    response: RefCell<Option<Response>>,
    download: RefCell<Option<StreamRef>>,
    error: RefCell<Option<Error>>,
    done_callback: RefCell<Option<DoneCallback>>,
    backend: RefCell<Option<Rc<dyn TransferBackend>>>,
    resolver: RefCell<Option<ResolverTask>>,
    transport: RefCell<Option<StreamRef>>,
}

impl UrlTransfer {
    pub fn new(handle: LoopHandle, url: Url) -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            handle,
            original_url: url.clone(),
            url: RefCell::new(url),
            redirects: RefCell::new(Vec::new()),
            state: Cell::new(TransferState::Constructing),
            result: Cell::new(None),
            follow_redirects: Cell::new(true),
            timeout: Cell::new(None),
            timeout_source: Cell::new(None),
            address_hint: Cell::new(None),
            resolved_address: Cell::new(None),
            upload_factory: RefCell::new(None),
            modifiers: RefCell::new(Vec::new()),
            request: RefCell::new(None),
            response: RefCell::new(None),
            download: RefCell::new(None),
            error: RefCell::new(None),
            done_callback: RefCell::new(None),
            backend: RefCell::new(None),
            resolver: RefCell::new(None),
            transport: RefCell::new(None),
        })
    }

    /* --- configuration (Constructing state) --- */

    pub fn set_follow_redirects(&self, follow: bool) {
        self.follow_redirects.set(follow);
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects.get()
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout.set(Some(timeout));
    }

    /// Skip name resolution and connect straight to `addr`.
    pub fn set_address_hint(&self, addr: SocketAddr) {
        self.address_hint.set(Some(addr));
    }

    /// Install the upload factory. It must tolerate being called once
    /// per redirect hop.
    pub fn set_upload(&self, factory: UploadFactory) {
        *self.upload_factory.borrow_mut() = Some(factory);
    }

    /// Wrap a single stream as an upload: the second invocation (a
    /// redirect retry) errors instead of re-reading a consumed stream.
    pub fn set_oneshot_upload(&self, stream: StreamRef, size: i64) {
        let mut slot = Some(stream);
        self.set_upload(Box::new(move || match slot.take() {
            Some(stream) => Ok((stream, size)),
            None => Err(Error::io(
                "upload stream already consumed (redirected POST?)",
            )),
        }));
    }

    /// Build a repeatable upload factory from an immutable packet.
    pub fn set_upload_packet(&self, data: Vec<u8>) {
        let data = Bytes::from(data);
        self.set_upload(Box::new(move || {
            let size = data.len() as i64;
            Ok((SlabSource::new(data.clone(), None) as StreamRef, size))
        }));
    }

    /// Add a request modifier, applied in order just before dispatch.
    pub fn add_request_modifier(&self, modifier: RequestModifier) {
        self.modifiers.borrow_mut().push(modifier);
    }

    /// Convenience modifier: a fixed header line on every request.
    pub fn add_http_header(&self, key: &str, value: &str) {
        let key = key.to_string();
        let value = value.to_string();
        self.add_request_modifier(Box::new(move |request| {
            request.common.add_misc(key.clone(), value.clone());
        }));
    }

    pub fn set_user_agent(&self, user_agent: &str) {
        let ua = user_agent.to_string();
        self.add_request_modifier(Box::new(move |request| {
            request.user_agent = Some(ua.clone());
        }));
    }

    pub fn set_done_callback(&self, callback: impl FnOnce(&UrlTransfer) + 'static) {
        *self.done_callback.borrow_mut() = Some(Box::new(callback));
    }

    /* --- lifecycle --- */

    /// Start the transfer. The done callback fires exactly once per
    /// start, on whatever path ends the transfer.
    pub fn start(self: &Rc<Self>) {
        if self.state.get() != TransferState::Constructing {
            log::warn!("transfer started twice");
            return;
        }
        self.state.set(TransferState::Started);
        let Some(backend) = lookup_backend(&self.url.borrow().scheme) else {
            self.fail(
                TransferResult::Unsupported,
                Error::protocol(format!(
                    "no backend for scheme {:?}",
                    self.url.borrow().scheme.as_str()
                )),
            );
            return;
        };
        *self.backend.borrow_mut() = Some(backend.clone());
        if let Some(timeout) = self.timeout.get() {
            let weak = self.weak.clone();
            let id = self.handle.add_timer(timeout, None, move || {
                if let Some(transfer) = weak.upgrade() {
                    // Null the stored source before acting on it.
                    transfer.timeout_source.set(None);
                    transfer.timed_out();
                }
                false
            });
            self.timeout_source.set(Some(id));
        }
        backend.start(self);
    }

    /// Abort: stops resolution or shuts the transport down, then
    /// reports `Cancelled` unless already done.
    pub fn cancel(self: &Rc<Self>) {
        let backend = self.backend.borrow().clone();
        if let Some(backend) = backend {
            backend.cancel(self);
        }
        self.abort_work();
        self.fail(TransferResult::Cancelled, Error::cancelled("transfer cancelled"));
    }

    fn timed_out(self: &Rc<Self>) {
        self.abort_work();
        self.fail(
            TransferResult::TimedOut,
            Error::timeout(format!("transfer of {} timed out", self.url.borrow())),
        );
    }

    fn abort_work(&self) {
        if let Some(resolver) = self.resolver.borrow_mut().take() {
            resolver.cancel();
        }
        if let Some(transport) = self.transport.borrow_mut().take() {
            shutdown_read(&*transport);
            shutdown_write(&*transport);
        }
    }

    /* --- accessors --- */

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn url(&self) -> Url {
        self.url.borrow().clone()
    }

    pub fn state(&self) -> TransferState {
        self.state.get()
    }

    pub fn result(&self) -> Option<TransferResult> {
        self.result.get()
    }

    pub fn error(&self) -> Option<Error> {
        self.error.borrow().clone()
    }

    pub fn redirects(&self) -> Vec<RedirectHop> {
        self.redirects.borrow().clone()
    }

    pub fn request(&self) -> Option<Request> {
        self.request.borrow().clone()
    }

    pub fn response(&self) -> Option<Response> {
        self.response.borrow().clone()
    }

    /// The download stream (Success only).
    pub fn download(&self) -> Option<StreamRef> {
        self.download.borrow().clone()
    }

    pub fn address_hint(&self) -> Option<SocketAddr> {
        self.address_hint.get()
    }

    pub fn resolved_address(&self) -> Option<SocketAddr> {
        self.resolved_address.get()
    }

    pub fn is_done(&self) -> bool {
        self.result.get().is_some()
    }

    /* --- helpers for backends --- */

    /// Resolve the current URL's host (or use the address hint), then
    /// call `on_address`.
    pub fn resolve_address(
        self: &Rc<Self>,
        on_address: impl FnOnce(&Rc<UrlTransfer>, SocketAddr) + 'static,
    ) {
        if let Some(hint) = self.address_hint.get() {
            self.resolved_address.set(Some(hint));
            on_address(self, hint);
            return;
        }
        let url = self.url.borrow().clone();
        let Some(host) = url.host.clone() else {
            self.fail(
                TransferResult::BadRequest,
                Error::parse(format!("URL {} has no host", url)),
            );
            return;
        };
        let port = url.get_port();
        let weak = self.weak.clone();
        let task = ResolverTask::start(&self.handle, host, port, move |result| {
            let Some(transfer) = weak.upgrade() else {
                return;
            };
            *transfer.resolver.borrow_mut() = None;
            match result {
                Ok(addrs) => {
                    let addr = addrs[0];
                    transfer.resolved_address.set(Some(addr));
                    on_address(&transfer, addr);
                }
                Err(e) => transfer.fail(TransferResult::BadName, e),
            }
        });
        *self.resolver.borrow_mut() = Some(task);
    }

    /// Build the protocol request for the current URL: verb and body
    /// from the upload factory, then the modifier chain.
    pub fn build_request(&self) -> Result<(Request, Option<StreamRef>), Error> {
        use crate::http::header::{TransferEncoding, Verb};
        let url = self.url.borrow().clone();
        let mut upload: Option<(StreamRef, i64)> = None;
        if let Some(factory) = self.upload_factory.borrow_mut().as_mut() {
            upload = Some(factory()?);
        }
        let verb = if upload.is_some() { Verb::Post } else { Verb::Get };
        let mut request = Request::new(verb, url.path_and_query());
        request.host = url.host.clone();
        match &upload {
            Some((_, size)) if *size >= 0 => request.common.content_length = *size,
            Some(_) => request.common.transfer_encoding = TransferEncoding::Chunked,
            None => {}
        }
        for modifier in self.modifiers.borrow().iter() {
            modifier(&mut request);
        }
        *self.request.borrow_mut() = Some(request.clone());
        Ok((request, upload.map(|(stream, _)| stream)))
    }

    pub fn set_transport(&self, transport: StreamRef) {
        *self.transport.borrow_mut() = Some(transport);
    }

    /// Record a redirect. Follows it (re-resolving with the new URL)
    /// when enabled; circular chains end with `RedirectLoop`.
    pub fn handle_redirect(self: &Rc<Self>, target: Url, is_permanent: bool) {
        if self.is_done() {
            return;
        }
        let circular = target.equals_up_to_fragment(&self.original_url)
            || self
                .redirects
                .borrow()
                .iter()
                .any(|hop| hop.url.equals_up_to_fragment(&target));
        self.redirects.borrow_mut().push(RedirectHop {
            is_permanent,
            url: target.clone(),
        });
        if circular {
            self.fail(
                TransferResult::RedirectLoop,
                Error::protocol(format!("circular redirect via {}", target)),
            );
            return;
        }
        if !self.follow_redirects.get() {
            *self.url.borrow_mut() = target;
            self.fail(TransferResult::Redirect, Error::protocol("redirect"));
            return;
        }
        log::debug!("following redirect to {}", target);
        *self.url.borrow_mut() = target;
        // Old transport is done; the backend builds a fresh one.
        if let Some(transport) = self.transport.borrow_mut().take() {
            shutdown_read(&*transport);
            shutdown_write(&*transport);
        }
        let backend = self.backend.borrow().clone();
        if let Some(backend) = backend {
            backend.start(self);
        }
    }

    /// Success: record the response/download and notify.
    pub fn succeed(&self, response: Option<Response>, download: StreamRef) {
        *self.response.borrow_mut() = response;
        *self.download.borrow_mut() = Some(download);
        self.finish(TransferResult::Success, None);
    }

    /// Failure of any kind: record and notify.
    pub fn fail(&self, result: TransferResult, error: Error) {
        self.finish(result, Some(error));
    }

    fn finish(&self, result: TransferResult, error: Option<Error>) {
        if self.result.get().is_some() {
            return; // done callback fires exactly once
        }
        self.result.set(Some(result));
        self.state.set(if result == TransferResult::Success {
            TransferState::Done
        } else {
            TransferState::Error
        });
        if let Some(error) = error {
            log::debug!("transfer of {} failed: {}", self.url.borrow(), error);
            *self.error.borrow_mut() = Some(error);
        }
        // Timer teardown: null the stored source before removing it.
        if let Some(id) = self.timeout_source.take() {
            self.handle.remove_source(id);
        }
        if let Some(resolver) = self.resolver.borrow_mut().take() {
            resolver.cancel();
        }
        // Upload factory and callback captures are released in order.
        *self.upload_factory.borrow_mut() = None;
        let callback = self.done_callback.borrow_mut().take();
        if let Some(callback) = callback {
            callback(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::mainloop::MainLoop;

    struct StubBackend;
    impl TransferBackend for StubBackend {
        fn scheme_name(&self) -> &'static str {
            "stub"
        }
        fn start(&self, transfer: &Rc<UrlTransfer>) {
            // Immediately redirect to a fixed location.
            let target = Url::parse("stub://host/next").unwrap();
            transfer.handle_redirect(target, false);
        }
    }

    #[test]
    fn unsupported_scheme_reports_unsupported() {
        let lp = MainLoop::new().unwrap();
        let url = Url::parse("ftp://example.com/file").unwrap();
        let transfer = UrlTransfer::new(lp.handle(), url);
        let result = Rc::new(Cell::new(None));
        let r = result.clone();
        transfer.set_done_callback(move |t| r.set(t.result()));
        transfer.start();
        assert_eq!(result.get(), Some(TransferResult::Unsupported));
    }

    #[test]
    fn circular_redirect_is_detected() {
        register_backend("stub", Rc::new(StubBackend));
        let lp = MainLoop::new().unwrap();
        let url = Url::parse("stub://host/start").unwrap();
        let transfer = UrlTransfer::new(lp.handle(), url);
        let result = Rc::new(Cell::new(None));
        let message = Rc::new(RefCell::new(String::new()));
        let r = result.clone();
        let m = message.clone();
        transfer.set_done_callback(move |t| {
            r.set(t.result());
            if let Some(e) = t.error() {
                *m.borrow_mut() = e.message().to_string();
            }
        });
        transfer.start();
        // First hop goes to /next, second hop targets /next again.
        assert_eq!(result.get(), Some(TransferResult::RedirectLoop));
        assert!(message.borrow().contains("circular"));
        assert_eq!(transfer.redirects().len(), 2);
    }

    #[test]
    fn redirect_without_follow_reports_redirect() {
        register_backend("stub2", Rc::new(StubBackend));
        let lp = MainLoop::new().unwrap();
        let url = Url::parse("stub2://host/start").unwrap();
        let transfer = UrlTransfer::new(lp.handle(), url);
        transfer.set_follow_redirects(false);
        let result = Rc::new(Cell::new(None));
        let r = result.clone();
        transfer.set_done_callback(move |t| r.set(t.result()));
        transfer.start();
        assert_eq!(result.get(), Some(TransferResult::Redirect));
        assert_eq!(transfer.redirects().len(), 1);
    }

    #[test]
    fn oneshot_upload_errors_on_second_call() {
        let lp = MainLoop::new().unwrap();
        let url = Url::parse("http://example.com/upload").unwrap();
        let transfer = UrlTransfer::new(lp.handle(), url);
        let mut buffer = Buffer::new();
        buffer.append(b"data");
        let source = crate::io::memory::BufferSource::new(buffer);
        transfer.set_oneshot_upload(source, 4);
        let mut factory = transfer.upload_factory.borrow_mut();
        let factory = factory.as_mut().unwrap();
        assert!(factory().is_ok());
        assert!(factory().is_err());
    }

    #[test]
    fn done_callback_fires_exactly_once() {
        let lp = MainLoop::new().unwrap();
        let url = Url::parse("http://example.com/").unwrap();
        let transfer = UrlTransfer::new(lp.handle(), url);
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        transfer.set_done_callback(move |_| c.set(c.get() + 1));
        transfer.fail(TransferResult::ServerError, Error::io("one"));
        transfer.fail(TransferResult::NotFound, Error::io("two"));
        assert_eq!(count.get(), 1);
        assert_eq!(transfer.result(), Some(TransferResult::ServerError));
    }
}
