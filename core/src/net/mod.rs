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

//! Network layer: TCP transports and listeners bridged onto the stream
//! model, the TLS client decorator, and the asynchronous resolver. All
//! tasks run on the main loop's LocalSet.

pub mod resolver;
pub mod tcp;
pub mod tls;

pub use resolver::ResolverTask;
pub use tcp::{NetStream, TcpListenerSource, Transport};
