/*
 * hook.rs
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

//! Event subscription handle. A hook multiplexes event delivery and
//! shutdown notification for one event source (e.g. one readiness
//! direction of a stream). At most one trap is active at a time; the
//! trapped callbacks' captures play the role of per-trap user data and
//! are dropped when the trap is removed, whichever side removes it.
//! Untrap and shutdown are both legal from within the trapped callback.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::Error;

/// Event callback. Return `true` to stay trapped, `false` to untrap.
pub type HookFn = Box<dyn FnMut() -> bool>;

/// Shutdown callback; runs at most once.
pub type HookShutdownFn = Box<dyn FnOnce()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    Untrapped,
    Trapped,
    ShuttingDown,
    ShutDown,
}

struct HookInner {
    state: Cell<HookState>,
    is_available: Cell<bool>,
    will_not_happen_again: Cell<bool>,
    poll: Cell<bool>,
    notifying: Cell<bool>,
    untrap_deferred: Cell<bool>,
    on_event: RefCell<Option<HookFn>>,
    on_shutdown: RefCell<Option<HookShutdownFn>>,
}

/// Cheaply cloneable handle to one event subscription slot.
#[derive(Clone)]
pub struct Hook {
    inner: Rc<HookInner>,
}

impl Default for Hook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(HookInner {
                state: Cell::new(HookState::Untrapped),
                is_available: Cell::new(true),
                will_not_happen_again: Cell::new(false),
                poll: Cell::new(true),
                notifying: Cell::new(false),
                untrap_deferred: Cell::new(false),
                on_event: RefCell::new(None),
                on_shutdown: RefCell::new(None),
            }),
        }
    }

    pub fn state(&self) -> HookState {
        self.inner.state.get()
    }

    pub fn is_trapped(&self) -> bool {
        self.inner.state.get() == HookState::Trapped
    }

    pub fn is_shut_down(&self) -> bool {
        matches!(
            self.inner.state.get(),
            HookState::ShuttingDown | HookState::ShutDown
        )
    }

    pub fn is_available(&self) -> bool {
        self.inner.is_available.get()
    }

    pub fn set_available(&self, available: bool) {
        self.inner.is_available.set(available);
    }

    /// The event can never fire again; the next notify_shutdown (or this
    /// call, if already requested) is final.
    pub fn mark_never_happens_again(&self) {
        self.inner.will_not_happen_again.set(true);
    }

    pub fn will_never_happen_again(&self) -> bool {
        self.inner.will_not_happen_again.get()
    }

    /// Whether the owner should actively watch for this event.
    pub fn wants_poll(&self) -> bool {
        self.inner.poll.get() && self.is_trapped()
    }

    pub fn set_poll(&self, poll: bool) {
        self.inner.poll.set(poll);
    }

    /// Install the event and shutdown callbacks. Exclusive: fails if a
    /// trap is already installed or the hook has shut down.
    pub fn trap(
        &self,
        on_event: HookFn,
        on_shutdown: Option<HookShutdownFn>,
    ) -> Result<(), Error> {
        if self.is_shut_down() {
            return Err(Error::protocol("cannot trap a hook that has shut down"));
        }
        if self.inner.state.get() == HookState::Trapped {
            return Err(Error::protocol("hook is already trapped"));
        }
        *self.inner.on_event.borrow_mut() = Some(on_event);
        *self.inner.on_shutdown.borrow_mut() = on_shutdown;
        self.inner.state.set(HookState::Trapped);
        Ok(())
    }

    /// Remove the current trap, dropping its callbacks (and with them the
    /// captured per-trap state). Safe to call when untrapped, and from
    /// within the trapped callback itself.
    pub fn untrap(&self) {
        if self.inner.notifying.get() {
            self.inner.untrap_deferred.set(true);
            return;
        }
        let event = self.inner.on_event.borrow_mut().take();
        let shutdown = self.inner.on_shutdown.borrow_mut().take();
        if self.inner.state.get() == HookState::Trapped {
            self.inner.state.set(HookState::Untrapped);
        }
        drop(event);
        drop(shutdown);
    }

    /// Deliver one event to the trapped callback. No-op when untrapped,
    /// shut down, or re-entered while already notifying.
    pub fn notify(&self) {
        if self.inner.state.get() != HookState::Trapped {
            return;
        }
        if self.inner.notifying.get() {
            return;
        }
        // Detach the callback for the duration of the call so the
        // callback may untrap or shut the hook down without re-borrowing.
        let Some(mut on_event) = self.inner.on_event.borrow_mut().take() else {
            return;
        };
        self.inner.notifying.set(true);
        let keep = on_event();
        self.inner.notifying.set(false);

        let deferred = self.inner.untrap_deferred.take();
        if keep && !deferred && self.inner.state.get() == HookState::Trapped {
            *self.inner.on_event.borrow_mut() = Some(on_event);
        } else {
            drop(on_event);
            let shutdown = self.inner.on_shutdown.borrow_mut().take();
            drop(shutdown);
            if self.inner.state.get() == HookState::Trapped {
                self.inner.state.set(HookState::Untrapped);
            }
        }
    }

    /// Terminal notification: the event source is gone. The shutdown
    /// callback fires at most once, even when this is raised from inside
    /// the trapped callback; the trap is dropped afterwards. Idempotent.
    pub fn notify_shutdown(&self) {
        if self.is_shut_down() {
            return;
        }
        self.inner.state.set(HookState::ShuttingDown);
        self.inner.is_available.set(false);
        self.inner.will_not_happen_again.set(true);
        let shutdown = self.inner.on_shutdown.borrow_mut().take();
        if let Some(on_shutdown) = shutdown {
            on_shutdown();
        }
        self.inner.state.set(HookState::ShutDown);
        if !self.inner.notifying.get() {
            let event = self.inner.on_event.borrow_mut().take();
            drop(event);
        }
        // When raised mid-notify, the event callback is dropped by the
        // notify() epilogue once it returns.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_is_exclusive() {
        let h = Hook::new();
        h.trap(Box::new(|| true), None).unwrap();
        assert!(h.trap(Box::new(|| true), None).is_err());
        h.untrap();
        assert!(h.trap(Box::new(|| true), None).is_ok());
    }

    #[test]
    fn notify_delivers_until_untrap() {
        let count = Rc::new(Cell::new(0));
        let h = Hook::new();
        let c = count.clone();
        h.trap(
            Box::new(move || {
                c.set(c.get() + 1);
                c.get() < 2
            }),
            None,
        )
        .unwrap();
        h.notify();
        assert!(h.is_trapped());
        h.notify();
        assert_eq!(count.get(), 2);
        // Second callback returned false: trap removed.
        assert!(!h.is_trapped());
        h.notify();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn untrap_runs_capture_destructor() {
        struct DropFlag(Rc<Cell<bool>>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }
        let dropped = Rc::new(Cell::new(false));
        let h = Hook::new();
        let flag = DropFlag(dropped.clone());
        h.trap(
            Box::new(move || {
                let _ = &flag;
                true
            }),
            None,
        )
        .unwrap();
        assert!(!dropped.get());
        h.untrap();
        assert!(dropped.get());
    }

    #[test]
    fn shutdown_fires_once_and_is_terminal() {
        let shut = Rc::new(Cell::new(0));
        let notified = Rc::new(Cell::new(0));
        let h = Hook::new();
        let n = notified.clone();
        let s = shut.clone();
        h.trap(
            Box::new(move || {
                n.set(n.get() + 1);
                true
            }),
            Some(Box::new(move || s.set(s.get() + 1))),
        )
        .unwrap();
        h.notify();
        h.notify_shutdown();
        h.notify_shutdown();
        assert_eq!(shut.get(), 1);
        assert_eq!(h.state(), HookState::ShutDown);
        // No further notify after shutdown.
        h.notify();
        assert_eq!(notified.get(), 1);
        assert!(h.trap(Box::new(|| true), None).is_err());
    }

    #[test]
    fn untrap_during_notify_is_deferred() {
        let h = Hook::new();
        let h2 = h.clone();
        h.trap(
            Box::new(move || {
                h2.untrap();
                true
            }),
            None,
        )
        .unwrap();
        h.notify();
        assert!(!h.is_trapped());
    }

    #[test]
    fn shutdown_during_notify_still_runs_shutdown_callback() {
        let shut = Rc::new(Cell::new(false));
        let h = Hook::new();
        let h2 = h.clone();
        let s = shut.clone();
        h.trap(
            Box::new(move || {
                h2.notify_shutdown();
                true
            }),
            Some(Box::new(move || s.set(true))),
        )
        .unwrap();
        h.notify();
        assert!(shut.get());
        assert_eq!(h.state(), HookState::ShutDown);
    }
}
