/*
 * mod.rs
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

//! URL model: parse/compose per RFC 3986, relative resolution (§5),
//! default ports per scheme, and the process-wide scheme→backend
//! registry consulted by the transfer driver.

pub mod file_backend;
pub mod http_backend;
pub mod transfer;

pub use transfer::{TransferBackend, TransferResult, UrlTransfer};

use std::fmt;

use crate::error::Error;

/// URL scheme. Unknown schemes are carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    Ftp,
    File,
    Other(String),
}

impl Scheme {
    pub fn from_name(name: &str) -> Scheme {
        match name.to_ascii_lowercase().as_str() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            "ftp" => Scheme::Ftp,
            "file" => Scheme::File,
            other => Scheme::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Ftp => "ftp",
            Scheme::File => "file",
            Scheme::Other(name) => name,
        }
    }

    /// Default port (http=80, https=443, ftp=21).
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Scheme::Http => Some(80),
            Scheme::Https => Some(443),
            Scheme::Ftp => Some(21),
            _ => None,
        }
    }
}

/// A parsed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Always begins with `/` when a host is present and a path exists.
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

impl Url {
    pub fn new(scheme: Scheme) -> Self {
        Self {
            scheme,
            user: None,
            password: None,
            host: None,
            port: None,
            path: String::new(),
            query: None,
            fragment: None,
        }
    }

    /// Parse an absolute URL.
    pub fn parse(input: &str) -> Result<Url, Error> {
        let input = input.trim();
        let colon = input
            .find(':')
            .ok_or_else(|| Error::parse(format!("URL without scheme: {:?}", input)))?;
        let scheme_name = &input[..colon];
        if scheme_name.is_empty()
            || !scheme_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
            || !scheme_name.chars().next().unwrap().is_ascii_alphabetic()
        {
            return Err(Error::parse(format!("bad URL scheme in {:?}", input)));
        }
        let mut url = Url::new(Scheme::from_name(scheme_name));
        let mut rest = &input[colon + 1..];

        if let Some(after) = rest.strip_prefix("//") {
            let authority_end = after
                .find(|c| c == '/' || c == '?' || c == '#')
                .unwrap_or(after.len());
            let authority = &after[..authority_end];
            rest = &after[authority_end..];
            let (userinfo, hostport) = match authority.rsplit_once('@') {
                Some((u, h)) => (Some(u), h),
                None => (None, authority),
            };
            if let Some(userinfo) = userinfo {
                match userinfo.split_once(':') {
                    Some((user, password)) => {
                        url.user = Some(user.to_string());
                        url.password = Some(password.to_string());
                    }
                    None => url.user = Some(userinfo.to_string()),
                }
            }
            let (host, port) = match hostport.rsplit_once(':') {
                Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
                    let port: u16 = p
                        .parse()
                        .map_err(|_| Error::parse(format!("bad port in {:?}", input)))?;
                    (h, Some(port))
                }
                _ => (hostport, None),
            };
            if !host.is_empty() {
                url.host = Some(host.to_string());
            }
            url.port = port;
        }

        let fragment_at = rest.find('#');
        if let Some(at) = fragment_at {
            url.fragment = Some(rest[at + 1..].to_string());
            rest = &rest[..at];
        }
        if let Some(at) = rest.find('?') {
            url.query = Some(rest[at + 1..].to_string());
            rest = &rest[..at];
        }
        url.path = rest.to_string();
        Ok(url)
    }

    /// The explicit port, or the scheme default, or 0.
    pub fn get_port(&self) -> u16 {
        self.port
            .or_else(|| self.scheme.default_port())
            .unwrap_or(0)
    }

    /// Path plus query, as sent on an HTTP request line.
    pub fn path_and_query(&self) -> String {
        let path = if self.path.is_empty() {
            "/"
        } else {
            self.path.as_str()
        };
        match &self.query {
            Some(q) => format!("{}?{}", path, q),
            None => path.to_string(),
        }
    }

    /// Equality ignoring the fragment (redirect-loop comparison).
    pub fn equals_up_to_fragment(&self, other: &Url) -> bool {
        self.scheme == other.scheme
            && self.user == other.user
            && self.password == other.password
            && self.host == other.host
            && self.get_port() == other.get_port()
            && self.path == other.path
            && self.query == other.query
    }

    /// Resolve `reference` against `base` per RFC 3986 §5.
    pub fn new_relative(base: &Url, reference: &str) -> Result<Url, Error> {
        let reference = reference.trim();
        // An absolute reference stands alone.
        if let Some(colon) = reference.find(':') {
            let scheme = &reference[..colon];
            if !scheme.is_empty()
                && scheme.chars().next().unwrap().is_ascii_alphabetic()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
            {
                return Url::parse(reference);
            }
        }
        let mut target = base.clone();
        target.fragment = None;
        if reference.is_empty() {
            return Ok(target);
        }
        if let Some(rest) = reference.strip_prefix("//") {
            // Network-path reference: keep only the scheme.
            return Url::parse(&format!("{}://{}", base.scheme.as_str(), rest));
        }
        if let Some(fragment) = reference.strip_prefix('#') {
            target.fragment = Some(fragment.to_string());
            return Ok(target);
        }
        let (body, fragment) = match reference.split_once('#') {
            Some((b, f)) => (b, Some(f.to_string())),
            None => (reference, None),
        };
        target.fragment = fragment;
        if let Some(query) = body.strip_prefix('?') {
            target.query = Some(query.to_string());
            return Ok(target);
        }
        let (path_part, query) = match body.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (body, None),
        };
        target.query = query;
        if path_part.starts_with('/') {
            target.path = remove_dot_segments(path_part);
        } else {
            let merged = merge_paths(&base.path, path_part, base.host.is_some());
            target.path = remove_dot_segments(&merged);
        }
        Ok(target)
    }
}

fn merge_paths(base_path: &str, reference: &str, base_has_authority: bool) -> String {
    if base_has_authority && base_path.is_empty() {
        return format!("/{}", reference);
    }
    match base_path.rfind('/') {
        Some(at) => format!("{}{}", &base_path[..=at], reference),
        None => reference.to_string(),
    }
}

/// RFC 3986 §5.2.4.
fn remove_dot_segments(path: &str) -> String {
    let mut input = path.to_string();
    let mut output = String::new();
    while !input.is_empty() {
        if input.starts_with("../") {
            input.drain(..3);
        } else if input.starts_with("./") {
            input.drain(..2);
        } else if input.starts_with("/./") {
            input.replace_range(..3, "/");
        } else if input == "/." {
            input = "/".to_string();
        } else if input.starts_with("/../") {
            input.replace_range(..4, "/");
            pop_segment(&mut output);
        } else if input == "/.." {
            input = "/".to_string();
            pop_segment(&mut output);
        } else if input == "." || input == ".." {
            input.clear();
        } else {
            let next = match input[1..].find('/') {
                Some(at) => at + 1,
                None => input.len(),
            };
            output.push_str(&input[..next]);
            input.drain(..next);
        }
    }
    output
}

fn pop_segment(output: &mut String) {
    match output.rfind('/') {
        Some(at) => output.truncate(at),
        None => output.clear(),
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme.as_str())?;
        if let Some(host) = &self.host {
            write!(f, "//")?;
            if let Some(user) = &self.user {
                write!(f, "{}", user)?;
                if let Some(password) = &self.password {
                    write!(f, ":{}", password)?;
                }
                write!(f, "@")?;
            }
            write!(f, "{}", host)?;
            if let Some(port) = self.port {
                if Some(port) != self.scheme.default_port() {
                    write!(f, ":{}", port)?;
                }
            }
        } else if self.scheme == Scheme::File {
            write!(f, "//")?;
        }
        write!(f, "{}", self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{}", fragment)?;
        }
        Ok(())
    }
}
