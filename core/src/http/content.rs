/*
 * content.rs
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

//! Content router: handlers registered against host/user-agent/path
//! patterns, tried in a fixed specificity order; MIME-type resolution;
//! static data and filesystem serving.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use bytes::Bytes;

use crate::http::header::{ContentType, Verb};
use crate::http::request::{parse_cgi_query_string, Request};
use crate::http::response::Response;
use crate::http::server::{HttpServer, ServerRequest};
use crate::io::memory::SlabSource;
use crate::io::StreamRef;

/// What a handler did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    /// The handler responded.
    Accept,
    /// Fall through to the next matching handler.
    Chain,
}

/// Pattern a handler is registered against. Unset fields match
/// anything; `path` is exact, the others are prefix/suffix tests.
#[derive(Debug, Clone, Default)]
pub struct ContentId {
    pub host: Option<String>,
    pub user_agent_prefix: Option<String>,
    pub path: Option<String>,
    pub path_prefix: Option<String>,
    pub path_suffix: Option<String>,
}

impl ContentId {
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn for_path_prefix(prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    fn has_path(&self) -> bool {
        self.path.is_some() || self.path_prefix.is_some() || self.path_suffix.is_some()
    }

    /// Registration slot in the match order (1 = most specific).
    fn tier(&self) -> u8 {
        match (
            self.user_agent_prefix.is_some(),
            self.has_path(),
            self.host.is_some(),
        ) {
            (true, true, true) => 1,
            (true, false, true) => 2,
            (true, true, false) => 3,
            (true, false, false) => 4,
            (false, true, true) => 5,
            (false, false, true) => 6,
            (false, true, false) => 7,
            (false, false, false) => 8,
        }
    }

    fn matches(&self, request: &Request) -> bool {
        if let Some(host) = &self.host {
            match &request.host {
                Some(h) if h.eq_ignore_ascii_case(host) => {}
                _ => return false,
            }
        }
        if let Some(prefix) = &self.user_agent_prefix {
            match &request.user_agent {
                Some(ua) if ua.starts_with(prefix.as_str()) => {}
                _ => return false,
            }
        }
        let path = request.path.split('?').next().unwrap_or("");
        if let Some(exact) = &self.path {
            if path != exact {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(suffix) = &self.path_suffix {
            if !path.ends_with(suffix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Sends the response for one request; usable at most once.
pub struct Responder<'a> {
    server: &'a Rc<HttpServer>,
    request: &'a ServerRequest,
}

impl Responder<'_> {
    pub fn respond(&self, response: Response, content: Option<StreamRef>) {
        self.server.respond(self.request, response, content);
    }

    /// Respond with in-memory data and a content type.
    pub fn respond_data(&self, data: Vec<u8>, type_: &str, subtype: &str) {
        let mut response =
            Response::from_request(&self.request.request, 200, data.len() as i64);
        response.set_content_type(type_, subtype);
        let source = SlabSource::new(Bytes::from(data), None);
        self.respond(response, Some(source));
    }
}

type RawHandlerFn = Box<dyn Fn(&ServerRequest, &Responder<'_>) -> HandlerResult>;
type CgiHandlerFn =
    Box<dyn Fn(&ServerRequest, &HashMap<String, String>, &Responder<'_>) -> HandlerResult>;

/// A registered handler: raw (request plus POST stream) or CGI
/// (pre-parsed query variables).
pub enum ContentHandler {
    Raw(RawHandlerFn),
    Cgi(CgiHandlerFn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A single file served at an exact path.
    File,
    /// Files directly inside one directory.
    Dir,
    /// A whole directory tree.
    DirTree,
}

struct MimeMapping {
    prefix: Option<String>,
    suffix: Option<String>,
    type_: String,
    subtype: String,
}

/// The router. Bind one to each server connection with
/// [`HttpContent::serve`].
pub struct HttpContent {
    handlers: RefCell<Vec<(ContentId, Rc<ContentHandler>)>>,
    mime_types: RefCell<Vec<MimeMapping>>,
    default_mime: RefCell<Option<(String, String)>>,
    error_handler: RefCell<Rc<dyn Fn(u16, &Request) -> (Response, Vec<u8>)>>,
}

fn default_error_page(status: u16, request: &Request) -> (Response, Vec<u8>) {
    let body = format!(
        "<html><head><title>Error {status}</title></head>\
         <body><h1>Error {status}</h1>\
         <p>Path: {}</p></body></html>\n",
        request.path
    );
    let mut response = Response::from_request(request, status, body.len() as i64);
    response.set_content_type("text", "html");
    (response, body.into_bytes())
}

impl Default for HttpContent {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpContent {
    pub fn new() -> Self {
        Self {
            handlers: RefCell::new(Vec::new()),
            mime_types: RefCell::new(Vec::new()),
            default_mime: RefCell::new(None),
            error_handler: RefCell::new(Rc::new(default_error_page)),
        }
    }

    pub fn add_handler(&self, id: ContentId, handler: ContentHandler) {
        self.handlers.borrow_mut().push((id, Rc::new(handler)));
    }

    /// Replace the error-page generator (404, 500, ...).
    pub fn set_error_handler(
        &self,
        handler: impl Fn(u16, &Request) -> (Response, Vec<u8>) + 'static,
    ) {
        *self.error_handler.borrow_mut() = Rc::new(handler);
    }

    /// Register a MIME mapping by path prefix and/or suffix.
    pub fn set_mime_type(
        &self,
        prefix: Option<&str>,
        suffix: Option<&str>,
        type_: &str,
        subtype: &str,
    ) {
        self.mime_types.borrow_mut().push(MimeMapping {
            prefix: prefix.map(str::to_string),
            suffix: suffix.map(str::to_string),
            type_: type_.to_string(),
            subtype: subtype.to_string(),
        });
    }

    pub fn set_default_mime_type(&self, type_: &str, subtype: &str) {
        *self.default_mime.borrow_mut() = Some((type_.to_string(), subtype.to_string()));
    }

    /// Resolve the MIME type for a path: first matching mapping, else
    /// the default.
    pub fn mime_type_for(&self, path: &str) -> Option<(String, String)> {
        for mapping in self.mime_types.borrow().iter() {
            if let Some(prefix) = &mapping.prefix {
                if !path.starts_with(prefix.as_str()) {
                    continue;
                }
            }
            if let Some(suffix) = &mapping.suffix {
                if !path.ends_with(suffix.as_str()) {
                    continue;
                }
            }
            return Some((mapping.type_.clone(), mapping.subtype.clone()));
        }
        self.default_mime.borrow().clone()
    }

    /// Serve fixed data at a path.
    pub fn add_data(&self, id: ContentId, data: Vec<u8>, type_: &str, subtype: &str) {
        let data = Bytes::from(data);
        let type_ = type_.to_string();
        let subtype = subtype.to_string();
        self.add_handler(
            id,
            ContentHandler::Raw(Box::new(move |server_request, responder| {
                let mut response = Response::from_request(
                    &server_request.request,
                    200,
                    data.len() as i64,
                );
                response.common.content_type =
                    Some(ContentType::new(type_.clone(), subtype.clone()));
                let source = SlabSource::new(data.clone(), None);
                responder.respond(response, Some(source));
                HandlerResult::Accept
            })),
        );
    }

    /// Serve from the filesystem: one file, one directory, or a tree.
    pub fn add_file(&self, url_path: &str, fs_path: impl Into<PathBuf>, kind: FileKind) {
        let fs_path = fs_path.into();
        let url_path = url_path.to_string();
        let id = match kind {
            FileKind::File => ContentId::for_path(url_path.clone()),
            FileKind::Dir | FileKind::DirTree => ContentId::for_path_prefix(url_path.clone()),
        };
        let handler = FileHandler {
            url_path,
            fs_path,
            kind,
        };
        self.add_handler(
            id,
            ContentHandler::Raw(Box::new(move |server_request, responder| {
                handler.handle(server_request, responder)
            })),
        );
    }

    /// Dispatch one request through the tier table. Returns false when
    /// no handler accepted (the caller gets the error page).
    fn dispatch(&self, server_request: &ServerRequest, responder: &Responder<'_>) -> bool {
        let handlers = self.handlers.borrow();
        for tier in 1..=8 {
            for (id, handler) in handlers.iter() {
                if id.tier() != tier || !id.matches(&server_request.request) {
                    continue;
                }
                let result = match &**handler {
                    ContentHandler::Raw(f) => f(server_request, responder),
                    ContentHandler::Cgi(f) => {
                        let vars = server_request
                            .request
                            .query_string()
                            .map(parse_cgi_query_string)
                            .unwrap_or_default();
                        f(server_request, &vars, responder)
                    }
                };
                match result {
                    HandlerResult::Accept => return true,
                    HandlerResult::Chain => continue,
                }
            }
        }
        false
    }

    fn respond_error(&self, status: u16, responder: &Responder<'_>) {
        let handler = self.error_handler.borrow().clone();
        let (response, body) = handler(status, &responder.request.request);
        let source = SlabSource::new(Bytes::from(body), None);
        responder.respond(response, Some(source));
    }

    /// Route one request on `server`.
    pub fn handle_request(&self, server: &Rc<HttpServer>, server_request: ServerRequest) {
        let responder = Responder {
            server,
            request: &server_request,
        };
        if !self.dispatch(&server_request, &responder) {
            self.respond_error(404, &responder);
        }
    }

    /// Bind this router to a server connection: every request that
    /// arrives is dispatched through the handler table.
    pub fn serve(self: &Rc<Self>, server: &Rc<HttpServer>) -> Result<(), crate::error::Error> {
        let content = self.clone();
        let server_rc = server.clone();
        server.trap_requests(move |server_request| {
            content.handle_request(&server_rc, server_request);
        })
    }
}

struct FileHandler {
    url_path: String,
    fs_path: PathBuf,
    kind: FileKind,
}

impl FileHandler {
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        match self.kind {
            FileKind::File => {
                if request_path == self.url_path {
                    Some(self.fs_path.clone())
                } else {
                    None
                }
            }
            FileKind::Dir | FileKind::DirTree => {
                let rest = request_path.strip_prefix(self.url_path.as_str())?;
                let rest = rest.trim_start_matches('/');
                if rest.is_empty() {
                    return None;
                }
                // Never step outside the configured root.
                if rest.split('/').any(|seg| seg == "..") {
                    return None;
                }
                if self.kind == FileKind::Dir && rest.contains('/') {
                    return None;
                }
                Some(self.fs_path.join(rest))
            }
        }
    }

    fn handle(
        &self,
        server_request: &ServerRequest,
        responder: &Responder<'_>,
    ) -> HandlerResult {
        if server_request.request.verb != Verb::Get
            && server_request.request.verb != Verb::Head
        {
            return HandlerResult::Chain;
        }
        let path = server_request
            .request
            .path
            .split('?')
            .next()
            .unwrap_or("");
        let Some(fs_path) = self.resolve(path) else {
            return HandlerResult::Chain;
        };
        match std::fs::read(&fs_path) {
            Ok(data) => {
                let (type_, subtype) = guess_mime(&fs_path);
                responder.respond_data(data, &type_, &subtype);
                HandlerResult::Accept
            }
            Err(e) => {
                log::debug!("cannot serve {}: {}", fs_path.display(), e);
                HandlerResult::Chain
            }
        }
    }
}

fn guess_mime(path: &Path) -> (String, String) {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let (t, s) = match ext.as_str() {
        "html" | "htm" => ("text", "html"),
        "txt" => ("text", "plain"),
        "css" => ("text", "css"),
        "js" => ("application", "javascript"),
        "xml" => ("text", "xml"),
        "png" => ("image", "png"),
        "jpg" | "jpeg" => ("image", "jpeg"),
        "gif" => ("image", "gif"),
        _ => ("application", "octet-stream"),
    };
    (t.to_string(), s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(
        path: &str,
        host: Option<&str>,
        user_agent: Option<&str>,
    ) -> Request {
        let mut r = Request::new(Verb::Get, path);
        r.host = host.map(str::to_string);
        r.user_agent = user_agent.map(str::to_string);
        r
    }

    #[test]
    fn tier_order_matches_documented_table() {
        let ua_path_host = ContentId {
            user_agent_prefix: Some("UA".into()),
            path: Some("/p".into()),
            host: Some("h".into()),
            ..Default::default()
        };
        assert_eq!(ua_path_host.tier(), 1);
        let ua_host = ContentId {
            user_agent_prefix: Some("UA".into()),
            host: Some("h".into()),
            ..Default::default()
        };
        assert_eq!(ua_host.tier(), 2);
        let ua_path = ContentId {
            user_agent_prefix: Some("UA".into()),
            path: Some("/p".into()),
            ..Default::default()
        };
        assert_eq!(ua_path.tier(), 3);
        let ua_only = ContentId {
            user_agent_prefix: Some("UA".into()),
            ..Default::default()
        };
        assert_eq!(ua_only.tier(), 4);
        let path_host = ContentId {
            path: Some("/p".into()),
            host: Some("h".into()),
            ..Default::default()
        };
        assert_eq!(path_host.tier(), 5);
        let host_only = ContentId {
            host: Some("h".into()),
            ..Default::default()
        };
        assert_eq!(host_only.tier(), 6);
        let path_only = ContentId::for_path("/p");
        assert_eq!(path_only.tier(), 7);
        assert_eq!(ContentId::default().tier(), 8);
    }

    #[test]
    fn id_matching_rules() {
        let id = ContentId {
            host: Some("example.com".into()),
            path_prefix: Some("/static/".into()),
            ..Default::default()
        };
        assert!(id.matches(&request_with(
            "/static/a.png",
            Some("EXAMPLE.com"),
            None
        )));
        assert!(!id.matches(&request_with("/static/a.png", Some("other"), None)));
        assert!(!id.matches(&request_with("/other", Some("example.com"), None)));

        let suffix = ContentId {
            path_suffix: Some(".html".into()),
            ..Default::default()
        };
        assert!(suffix.matches(&request_with("/a/b.html", None, None)));
        assert!(suffix.matches(&request_with("/a/b.html?q=1", None, None)));
        assert!(!suffix.matches(&request_with("/a/b.png", None, None)));
    }

    #[test]
    fn mime_resolution_prefers_mappings_over_default() {
        let content = HttpContent::new();
        content.set_default_mime_type("application", "octet-stream");
        content.set_mime_type(None, Some(".html"), "text", "html");
        content.set_mime_type(Some("/raw/"), None, "text", "plain");
        assert_eq!(
            content.mime_type_for("/x/y.html"),
            Some(("text".into(), "html".into()))
        );
        assert_eq!(
            content.mime_type_for("/raw/data"),
            Some(("text".into(), "plain".into()))
        );
        assert_eq!(
            content.mime_type_for("/other"),
            Some(("application".into(), "octet-stream".into()))
        );
    }

    #[test]
    fn file_handler_refuses_traversal() {
        let handler = FileHandler {
            url_path: "/files".into(),
            fs_path: "/srv/files".into(),
            kind: FileKind::DirTree,
        };
        assert!(handler.resolve("/files/ok/a.txt").is_some());
        assert!(handler.resolve("/files/../etc/passwd").is_none());
        assert!(handler.resolve("/files/x/../../etc").is_none());
        let dir = FileHandler {
            url_path: "/files".into(),
            fs_path: "/srv/files".into(),
            kind: FileKind::Dir,
        };
        assert!(dir.resolve("/files/a.txt").is_some());
        assert!(dir.resolve("/files/sub/a.txt").is_none());
    }
}
