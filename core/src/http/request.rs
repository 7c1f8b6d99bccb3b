/*
 * request.rs
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

//! HTTP request header.

use std::collections::HashMap;

use crate::http::header::{
    AuthorizationRef, CharSetEntry, ContentEncodingEntry, Cookie, HeaderCommon, LanguageEntry,
    MediaTypeEntry, RequestCacheDirective, TransferEncodingEntry, Verb,
};

/// A request header: verb, path, and the request-specific fields layered
/// over [`HeaderCommon`].
#[derive(Debug, Clone)]
pub struct Request {
    pub common: HeaderCommon,
    pub verb: Verb,
    /// HTTP/1.1 servers must accept a full URL here, not only a path.
    pub path: String,
    /// Parsed from the HTTP/0.9 simple form (`GET path`, no version):
    /// no headers were read and the response goes out bare.
    pub simple_first_line: bool,
    pub accept_charsets: Vec<CharSetEntry>,
    pub accept_content_encodings: Vec<ContentEncodingEntry>,
    pub accept_transfer_encodings: Vec<TransferEncodingEntry>,
    pub accept_media_types: Vec<MediaTypeEntry>,
    pub accept_languages: Vec<LanguageEntry>,
    pub authorization: Option<AuthorizationRef>,
    pub proxy_authorization: Option<AuthorizationRef>,
    pub host: Option<String>,
    pub had_if_match: bool,
    pub if_match: Vec<String>,
    /// Unix time, -1 when unset.
    pub if_modified_since: i64,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub from: Option<String>,
    pub cookies: Vec<Cookie>,
    /// `Keep-Alive` seconds; -1 when unused.
    pub keep_alive_seconds: i64,
    /// -1 when unused.
    pub max_forwards: i64,
    /// Nonstandard UA hints; 0 means not supplied.
    pub ua_width: u32,
    pub ua_height: u32,
    pub ua_color: Option<String>,
    pub ua_os: Option<String>,
    pub ua_cpu: Option<String>,
    pub ua_language: Option<String>,
    pub cache_control: Option<RequestCacheDirective>,
}

impl Request {
    pub fn new(verb: Verb, path: impl Into<String>) -> Self {
        Self {
            common: HeaderCommon::new(),
            verb,
            path: path.into(),
            simple_first_line: false,
            accept_charsets: Vec::new(),
            accept_content_encodings: Vec::new(),
            accept_transfer_encodings: Vec::new(),
            accept_media_types: Vec::new(),
            accept_languages: Vec::new(),
            authorization: None,
            proxy_authorization: None,
            host: None,
            had_if_match: false,
            if_match: Vec::new(),
            if_modified_since: -1,
            user_agent: None,
            referrer: None,
            from: None,
            cookies: Vec::new(),
            keep_alive_seconds: -1,
            max_forwards: -1,
            ua_width: 0,
            ua_height: 0,
            ua_color: None,
            ua_os: None,
            ua_cpu: None,
            ua_language: None,
            cache_control: None,
        }
    }

    pub fn add_cookie(&mut self, cookie: Cookie) {
        self.cookies.push(cookie);
    }

    pub fn find_cookie(&self, key: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.key == key)
    }

    pub fn remove_cookie(&mut self, key: &str) {
        self.cookies.retain(|c| c.key != key);
    }

    /// A request carries a body exactly for POST and PUT (RFC 2616 §4.3
    /// as applied here).
    pub fn has_content_body(&self) -> bool {
        matches!(self.verb, Verb::Post | Verb::Put)
    }

    /// The query-string part of the path, if any.
    pub fn query_string(&self) -> Option<&str> {
        self.path.split_once('?').map(|(_, q)| q)
    }
}

/// Parse a CGI query string (`a=1&b=42&c`) into its variables. A name
/// without `=` maps to the empty string. `+` and percent escapes decode.
pub fn parse_cgi_query_string(query: &str) -> HashMap<String, String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    let query = match query.split_once('?') {
        Some((_, q)) => q,
        None => query,
    };
    let mut vars = HashMap::new();
    for piece in query.split('&') {
        if piece.is_empty() {
            continue;
        }
        let (name, value) = match piece.split_once('=') {
            Some((n, v)) => (n, v),
            None => (piece, ""),
        };
        vars.insert(decode_form_component(name), decode_form_component(value));
    }
    vars
}

fn decode_form_component(s: &str) -> String {
    let plus_decoded = s.replace('+', " ");
    percent_encoding::percent_decode_str(&plus_decoded)
        .decode_utf8_lossy()
        .into_owned()
}
