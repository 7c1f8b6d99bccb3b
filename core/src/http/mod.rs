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

//! HTTP/1.x protocol engine: typed request/response headers with a
//! wire-exact parser and printer, a pipelining client, a server, and the
//! content router.

pub mod body;
pub mod client;
pub mod content;
pub mod header;
pub mod input;
pub mod output;
pub mod request;
pub mod response;
pub mod server;

pub use body::BodyStream;
pub use client::HttpClient;
pub use content::{ContentHandler, ContentId, FileKind, HandlerResult, HttpContent, Responder};
pub use header::{
    Authenticate, Authorization, ConnectionType, ContentEncoding, ContentType, Cookie,
    HeaderCommon, ParseFlags, RequestCacheDirective, ResponseCacheDirective, TransferEncoding,
    Verb, VerbSet,
};
pub use request::Request;
pub use response::{status_reason, Response};
pub use server::{HttpServer, ServerRequest};
