/*
 * lib.rs
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

//! Gancio: a toolkit for event-driven network servers and clients on a
//! single-threaded cooperative core. Streams with hook-based readiness,
//! an HTTP/1.x protocol engine, a URL transfer driver with pluggable
//! scheme backends, an LSM table merge engine, and an XMLRPC codec.

pub mod buffer;
pub mod codec;
pub mod error;
pub mod hook;
pub mod http;
pub mod io;
pub mod mainloop;
pub mod net;
pub mod table;
pub mod url;
pub mod xmlrpc;

pub use buffer::Buffer;
pub use error::{Error, ErrorKind};
pub use hook::{Hook, HookState};
pub use mainloop::{LoopHandle, MainLoop, SourceId};
