/*
 * resolver.rs
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

//! Asynchronous name resolution as a cancellable main-loop task. The core
//! never blocks on the resolver; the callback runs on the loop when the
//! lookup completes.

use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;

use tokio::task::JoinHandle;

use crate::error::Error;
use crate::mainloop::LoopHandle;

/// Handle to an in-flight lookup. Abort with [`ResolverTask::cancel`];
/// after cancellation the callback never runs.
pub struct ResolverTask {
    task: JoinHandle<()>,
    finished: Rc<Cell<bool>>,
}

impl ResolverTask {
    /// Resolve `host:port`, invoking `on_done` on the loop with all
    /// addresses found (never an empty list on success).
    pub fn start(
        handle: &LoopHandle,
        host: String,
        port: u16,
        on_done: impl FnOnce(Result<Vec<SocketAddr>, Error>) + 'static,
    ) -> Self {
        let finished = Rc::new(Cell::new(false));
        let fin = finished.clone();
        let task = handle.spawn(async move {
            let result = match tokio::net::lookup_host((host.as_str(), port)).await {
                Ok(addrs) => {
                    let addrs: Vec<SocketAddr> = addrs.collect();
                    if addrs.is_empty() {
                        Err(Error::name(format!("no addresses for {}", host)))
                    } else {
                        Ok(addrs)
                    }
                }
                Err(e) => Err(Error::name(format!("resolving {}: {}", host, e))),
            };
            fin.set(true);
            on_done(result);
        });
        Self { task, finished }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.get()
    }

    /// Abort the lookup. Idempotent; a completed task is unaffected.
    pub fn cancel(&self) {
        if !self.finished.get() {
            self.task.abort();
        }
    }
}
