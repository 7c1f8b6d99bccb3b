/*
 * response.rs
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

//! HTTP response header.

use crate::http::header::{
    AuthenticateRef, ConnectionType, ContentType, Cookie, HeaderCommon, ResponseCacheDirective,
    TransferEncoding, Verb, VerbSet,
};
use crate::http::request::Request;

/// A response header: status code and the response-specific fields
/// layered over [`HeaderCommon`].
#[derive(Debug, Clone)]
pub struct Response {
    pub common: HeaderCommon,
    /// 100..=599.
    pub status_code: u16,
    /// `Age` in seconds; -1 when unset.
    pub age: i64,
    pub allowed_verbs: VerbSet,
    pub cache_control: Option<ResponseCacheDirective>,
    /// `Content-MD5`.
    pub md5sum: Option<[u8; 16]>,
    pub set_cookies: Vec<Cookie>,
    pub location: Option<String>,
    /// Unix time of `Expires`, -1 when unset; unparsable values are kept
    /// verbatim in `expires_str`.
    pub expires: i64,
    pub expires_str: Option<String>,
    pub etag: Option<String>,
    pub authenticate: Option<AuthenticateRef>,
    pub proxy_authenticate: Option<AuthenticateRef>,
    pub has_retry_after: bool,
    /// With `retry_after_relative`, seconds to wait; otherwise unix time.
    pub retry_after_relative: bool,
    pub retry_after: i64,
    /// Unix time, -1 when unset.
    pub last_modified: i64,
    pub server: Option<String>,
}

impl Response {
    pub fn new(status_code: u16) -> Self {
        Self {
            common: HeaderCommon::new(),
            status_code,
            age: -1,
            allowed_verbs: VerbSet::empty(),
            cache_control: None,
            md5sum: None,
            set_cookies: Vec::new(),
            location: None,
            expires: -1,
            expires_str: None,
            etag: None,
            authenticate: None,
            proxy_authenticate: None,
            has_retry_after: false,
            retry_after_relative: false,
            retry_after: -1,
            last_modified: -1,
            server: None,
        }
    }

    /// A redirect response; callers should accompany it with a short
    /// HTML body naming the URL.
    pub fn new_redirect(location: impl Into<String>) -> Self {
        let mut response = Self::new(302);
        response.location = Some(location.into());
        response
    }

    /// Build a response suited to `request`: protocol version copied,
    /// connection matched, `length` as Content-Length (-1 selects
    /// chunked framing on HTTP/1.1).
    pub fn from_request(request: &Request, status_code: u16, length: i64) -> Self {
        let mut response = Self::new(status_code);
        response.common.http_major_version = request.common.http_major_version;
        response.common.http_minor_version = request.common.http_minor_version;
        response.common.content_length = length;
        if request.common.connection() == ConnectionType::Close {
            response.common.connection_type = ConnectionType::Close;
        } else {
            response.common.connection_type = ConnectionType::KeepAlive;
        }
        if length < 0 && request.common.http_minor_version >= 1 {
            response.common.transfer_encoding = TransferEncoding::Chunked;
        }
        response
    }

    pub fn add_set_cookie(&mut self, cookie: Cookie) {
        self.set_cookies.push(cookie);
    }

    pub fn set_content_type(&mut self, type_: &str, subtype: &str) {
        self.common.content_type = Some(ContentType::new(type_, subtype));
    }

    pub fn set_retry_after_relative(&mut self, seconds: i64) {
        self.has_retry_after = true;
        self.retry_after_relative = true;
        self.retry_after = seconds;
    }

    pub fn set_retry_after_absolute(&mut self, unix: i64) {
        self.has_retry_after = true;
        self.retry_after_relative = false;
        self.retry_after = unix;
    }

    /// Whether this response carries a body, as a pure function of the
    /// request verb and the status code (RFC 2616 §4.3): HEAD never has
    /// one, nor do 1xx, 204, 205 and 304.
    pub fn has_content_body(&self, request_verb: Verb) -> bool {
        if request_verb == Verb::Head {
            return false;
        }
        match self.status_code {
            100..=199 | 204 | 205 | 304 => false,
            _ => true,
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status_code, 301 | 302 | 303 | 307)
    }
}

/// Canonical reason phrase for a status code.
pub fn status_reason(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Large",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        417 => "Expectation Failed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}
