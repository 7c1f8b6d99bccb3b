/*
 * error.rs
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

//! Library-wide error type. Every failure carries a kind from the fixed
//! taxonomy plus a message; stream halves keep the error sticky so later
//! operations observe it.

use std::fmt;

/// Failure category. Parsers produce `Parse`, transports `Io`, the
/// resolver `Name`, and so on. `Logic` marks internal invariant
/// violations and aborts in debug builds (see [`Error::logic`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed header, URL, XMLRPC document, or chunk encoding.
    Parse,
    /// Underlying transport failure (refused, reset, EOF mid-stream).
    Io,
    /// Name resolution failure.
    Name,
    /// Status outside the handled range, or a required header missing.
    Protocol,
    /// Deadline exceeded.
    Timeout,
    /// User-initiated abort.
    Cancelled,
    /// Out of memory, file not found, permission denied.
    Resource,
    /// Internal invariant violation.
    Logic,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Parse => "parse error",
            ErrorKind::Io => "i/o error",
            ErrorKind::Name => "name resolution error",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::Timeout => "timed out",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Resource => "resource error",
            ErrorKind::Logic => "internal error",
        }
    }
}

/// An error with a kind and a human-readable message. Cloneable so a
/// sticky stream error can be handed to several observers.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn name(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Name, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, message)
    }

    /// Internal invariant violation. Aborts in debug builds so the broken
    /// invariant is caught at the point of detection.
    pub fn logic(message: impl Into<String>) -> Self {
        let message = message.into();
        debug_assert!(false, "invariant violated: {}", message);
        Self::new(ErrorKind::Logic, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ErrorKind::Resource
            }
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::Io,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<std::fmt::Error> for Error {
    fn from(e: std::fmt::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}
