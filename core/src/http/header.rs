/*
 * header.rs
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

//! Typed HTTP header model: the fields shared by requests and responses,
//! plus the boxed sub-structures (cookies, authentication, cache
//! directives, quality-annotated accept lists).

use std::rc::Rc;

/// Request verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Head,
    Options,
    Delete,
    Trace,
    Connect,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Head => "HEAD",
            Verb::Options => "OPTIONS",
            Verb::Delete => "DELETE",
            Verb::Trace => "TRACE",
            Verb::Connect => "CONNECT",
        }
    }

    pub fn from_str(s: &str) -> Option<Verb> {
        match s {
            "GET" => Some(Verb::Get),
            "POST" => Some(Verb::Post),
            "PUT" => Some(Verb::Put),
            "HEAD" => Some(Verb::Head),
            "OPTIONS" => Some(Verb::Options),
            "DELETE" => Some(Verb::Delete),
            "TRACE" => Some(Verb::Trace),
            "CONNECT" => Some(Verb::Connect),
            _ => None,
        }
    }

    const ALL: [Verb; 8] = [
        Verb::Get,
        Verb::Post,
        Verb::Put,
        Verb::Head,
        Verb::Options,
        Verb::Delete,
        Verb::Trace,
        Verb::Connect,
    ];

    fn bit(&self) -> u8 {
        match self {
            Verb::Get => 1 << 0,
            Verb::Post => 1 << 1,
            Verb::Put => 1 << 2,
            Verb::Head => 1 << 3,
            Verb::Options => 1 << 4,
            Verb::Delete => 1 << 5,
            Verb::Trace => 1 << 6,
            Verb::Connect => 1 << 7,
        }
    }
}

/// Bitset of verbs (the `Allow` header). Empty means the header is
/// absent; allowing no verbs at all is meaningless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerbSet(u8);

impl VerbSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, verb: Verb) {
        self.0 |= verb.bit();
    }

    pub fn contains(&self, verb: Verb) -> bool {
        self.0 & verb.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Verb> + '_ {
        Verb::ALL.into_iter().filter(|v| self.contains(*v))
    }
}

/// The `Connection` header. For HTTP/1.0 `None` means Close; for
/// HTTP/1.1 it means KeepAlive. [`HeaderCommon::connection`] resolves
/// this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    #[default]
    None,
    Close,
    KeepAlive,
}

/// The `Transfer-Encoding` header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    #[default]
    None,
    Chunked,
    Unrecognized(String),
}

/// The `Content-Encoding` header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    #[default]
    Identity,
    Gzip,
    Compress,
    Unrecognized(String),
}

/// The `Content-Type` triple plus any additional parameters. `*` is
/// legal in either the type or subtype slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub type_: String,
    pub subtype: String,
    pub charset: Option<String>,
    /// Additional `key=value` parameters, verbatim.
    pub additional: Vec<String>,
}

impl ContentType {
    pub fn new(type_: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            subtype: subtype.into(),
            charset: None,
            additional: Vec::new(),
        }
    }
}

/// One `Cookie`/`Set-Cookie` entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cookie {
    pub key: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    /// The Expires attribute, kept verbatim.
    pub expire_date: Option<String>,
    pub comment: Option<String>,
    /// -1 when unspecified.
    pub max_age: i64,
    pub secure: bool,
    /// 0 when unspecified.
    pub version: u32,
}

impl Cookie {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            max_age: -1,
            ..Default::default()
        }
    }
}

/// A `WWW-Authenticate`/`Proxy-Authenticate` challenge. Reference
/// counted: challenges are shared between the response object and any
/// authorization derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authenticate {
    Basic {
        realm: String,
    },
    Digest {
        realm: String,
        domain: Option<String>,
        nonce: Option<String>,
        opaque: Option<String>,
        is_stale: bool,
        algorithm: Option<String>,
    },
    Unknown {
        scheme: String,
        realm: Option<String>,
        options: Option<String>,
    },
}

impl Authenticate {
    pub fn scheme_name(&self) -> &str {
        match self {
            Authenticate::Basic { .. } => "Basic",
            Authenticate::Digest { .. } => "Digest",
            Authenticate::Unknown { scheme, .. } => scheme,
        }
    }

    pub fn realm(&self) -> Option<&str> {
        match self {
            Authenticate::Basic { realm } => Some(realm),
            Authenticate::Digest { realm, .. } => Some(realm),
            Authenticate::Unknown { realm, .. } => realm.as_deref(),
        }
    }
}

/// An `Authorization`/`Proxy-Authorization` credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Basic {
        user: String,
        password: String,
    },
    Digest {
        realm: Option<String>,
        domain: Option<String>,
        nonce: Option<String>,
        opaque: Option<String>,
        algorithm: Option<String>,
        user: Option<String>,
        password: Option<String>,
        response_digest: Option<String>,
        entity_digest: Option<String>,
    },
    Unknown {
        scheme: String,
        response: String,
    },
}

impl Authorization {
    pub fn scheme_name(&self) -> &str {
        match self {
            Authorization::Basic { .. } => "Basic",
            Authorization::Digest { .. } => "Digest",
            Authorization::Unknown { scheme, .. } => scheme,
        }
    }

    /// Answer a Digest challenge with a username and password. The
    /// response digest is MD5(HA1:nonce:HA2) per RFC 2617 §3.2.2 with
    /// `qop` unspecified.
    pub fn respond_digest(
        challenge: &Authenticate,
        user: &str,
        password: &str,
        verb: &str,
        uri: &str,
    ) -> Option<Authorization> {
        let Authenticate::Digest {
            realm,
            domain,
            nonce,
            opaque,
            algorithm,
            ..
        } = challenge
        else {
            return None;
        };
        let nonce_str = nonce.as_deref().unwrap_or("");
        let ha1 = md5_hex(format!("{}:{}:{}", user, realm, password).as_bytes());
        let ha2 = md5_hex(format!("{}:{}", verb, uri).as_bytes());
        let response = md5_hex(format!("{}:{}:{}", ha1, nonce_str, ha2).as_bytes());
        Some(Authorization::Digest {
            realm: Some(realm.clone()),
            domain: domain.clone(),
            nonce: nonce.clone(),
            opaque: opaque.clone(),
            algorithm: algorithm.clone(),
            user: Some(user.to_string()),
            password: Some(password.to_string()),
            response_digest: Some(response),
            entity_digest: None,
        })
    }
}

fn md5_hex(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    let mut h = Md5::new();
    h.update(data);
    let digest = h.finalize();
    let mut out = String::with_capacity(32);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// `Cache-Control` directives legal on a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseCacheDirective {
    pub is_public: bool,
    pub is_private: bool,
    pub no_cache: bool,
    pub no_store: bool,
    pub no_transform: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    /// 0 when unspecified.
    pub max_age: u32,
    pub s_max_age: u32,
    pub private_name: Option<String>,
    pub no_cache_name: Option<String>,
}

/// `Cache-Control` directives legal on a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCacheDirective {
    pub no_cache: bool,
    pub no_store: bool,
    pub no_transform: bool,
    pub only_if_cached: bool,
    /// 0 when unspecified.
    pub max_age: u32,
    pub min_fresh: u32,
    /// 0 not set; -1 set without argument; >0 set with argument.
    pub max_stale: i64,
}

/// Entry of `Accept-Charset`. Quality -1.0 when not present.
#[derive(Debug, Clone, PartialEq)]
pub struct CharSetEntry {
    pub name: String,
    pub quality: f32,
}

/// Entry of `Accept-Language`.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageEntry {
    pub language: String,
    pub quality: f32,
}

/// Entry of `Accept`.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaTypeEntry {
    pub type_: String,
    pub subtype: String,
    pub quality: f32,
}

/// Entry of `Accept-Encoding`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentEncodingEntry {
    pub encoding: ContentEncoding,
    pub quality: f32,
}

/// Entry of `TE`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEncodingEntry {
    pub encoding: TransferEncoding,
    pub quality: f32,
}

/// Range units a server accepts (`Accept-Ranges`); only bytes exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeUnit {
    Bytes,
}

/// Flags controlling header parsing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseFlags {
    /// Reject unknown header keys instead of storing them as misc.
    pub strict: bool,
    /// Record malformed lines on the header instead of failing.
    pub save_errors: bool,
}

/// Fields common to requests and responses.
#[derive(Debug, Clone)]
pub struct HeaderCommon {
    /// Always 1.
    pub http_major_version: u16,
    pub http_minor_version: u16,
    pub connection_type: ConnectionType,
    pub transfer_encoding: TransferEncoding,
    pub content_encoding: ContentEncoding,
    pub accepted_range_units: Vec<RangeUnit>,
    pub content_type: Option<ContentType>,
    /// Language tags from `Content-Language`, in order.
    pub content_languages: Vec<String>,
    /// Byte range; both -1 when there is no Range header. Either bound
    /// alone may be -1 for a half-open range.
    pub range_start: i64,
    pub range_end: i64,
    /// Unix time of the `Date` header, -1 when unset.
    pub date: i64,
    /// `Content-Length`; -1 when unspecified.
    pub content_length: i64,
    pub pragmas: Vec<String>,
    /// Unrecognized headers, in arrival order; lookup is
    /// case-insensitive.
    misc: Vec<(String, String)>,
    /// Messages accumulated under `ParseFlags::save_errors`.
    pub errors: Vec<String>,
}

impl Default for HeaderCommon {
    fn default() -> Self {
        Self {
            http_major_version: 1,
            http_minor_version: 1,
            connection_type: ConnectionType::None,
            transfer_encoding: TransferEncoding::None,
            content_encoding: ContentEncoding::Identity,
            accepted_range_units: Vec::new(),
            content_type: None,
            content_languages: Vec::new(),
            range_start: -1,
            range_end: -1,
            date: -1,
            content_length: -1,
            pragmas: Vec::new(),
            misc: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl HeaderCommon {
    pub fn new() -> Self {
        Self::default()
    }

    /// The effective connection semantics: `None` resolves to Close for
    /// HTTP/1.0 and KeepAlive for HTTP/1.1 (RFC 2616 §14.10).
    pub fn connection(&self) -> ConnectionType {
        match self.connection_type {
            ConnectionType::None => {
                if self.http_minor_version == 0 {
                    ConnectionType::Close
                } else {
                    ConnectionType::KeepAlive
                }
            }
            other => other,
        }
    }

    /// Force HTTP/1.0: chunking off, keepalive off.
    pub fn downgrade_to_1_0(&mut self) {
        self.http_minor_version = 0;
        self.transfer_encoding = TransferEncoding::None;
        if self.connection_type == ConnectionType::KeepAlive {
            self.connection_type = ConnectionType::None;
        }
    }

    pub fn add_misc(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.misc.push((key.into(), value.into()));
    }

    pub fn lookup_misc(&self, key: &str) -> Option<&str> {
        self.misc
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn remove_misc(&mut self, key: &str) {
        self.misc.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    pub fn misc_headers(&self) -> &[(String, String)] {
        &self.misc
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// Shared handle types for the boxed structures with several
/// asynchronous owners.
pub type AuthenticateRef = Rc<Authenticate>;
pub type AuthorizationRef = Rc<Authorization>;
