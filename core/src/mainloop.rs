/*
 * mainloop.rs
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

//! Single-threaded cooperative event loop: a current-thread tokio runtime
//! with a LocalSet for I/O tasks, plus removable timer and idle sources
//! dispatched between polls. All callbacks execute serially; the only
//! suspension points are `run(...)` entries. The loop clock is monotonic
//! and updated once per iteration.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::{JoinHandle, LocalSet};

/// Opaque identifier for a timer or idle source. Removal is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

/// Timer callback. For an interval timer, return `true` to rearm; a
/// one-shot timer is removed regardless of the return value.
pub type TimerFn = Box<dyn FnMut() -> bool>;

/// Idle callback, run once per loop iteration. Return `false` to remove.
pub type IdleFn = Box<dyn FnMut() -> bool>;

struct TimerEntry {
    id: u64,
    fire_at: Instant,
    interval: Option<Duration>,
    callback: TimerFn,
}

struct LoopState {
    quit: Cell<bool>,
    now: Cell<Instant>,
    next_id: Cell<u64>,
    timers: RefCell<Vec<TimerEntry>>,
    idles: RefCell<Vec<(u64, Option<IdleFn>)>>,
    /// Sources removed while their callback was detached from the lists.
    dead: RefCell<Vec<u64>>,
    wake: Notify,
}

impl LoopState {
    fn alloc_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn is_dead(&self, id: u64) -> bool {
        let mut dead = self.dead.borrow_mut();
        if let Some(i) = dead.iter().position(|&d| d == id) {
            dead.swap_remove(i);
            true
        } else {
            false
        }
    }
}

/// The loop itself. Owns the runtime; not cloneable. Hand out
/// [`LoopHandle`]s to code that needs to schedule work.
pub struct MainLoop {
    rt: tokio::runtime::Runtime,
    local: Rc<LocalSet>,
    state: Rc<LoopState>,
}

/// Cheap handle for scheduling timers, idles, and local tasks on the loop.
#[derive(Clone)]
pub struct LoopHandle {
    state: Rc<LoopState>,
    local: Weak<LocalSet>,
}

impl MainLoop {
    pub fn new() -> std::io::Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            rt,
            local: Rc::new(LocalSet::new()),
            state: Rc::new(LoopState {
                quit: Cell::new(false),
                now: Cell::new(Instant::now()),
                next_id: Cell::new(1),
                timers: RefCell::new(Vec::new()),
                idles: RefCell::new(Vec::new()),
                dead: RefCell::new(Vec::new()),
                wake: Notify::new(),
            }),
        })
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            state: self.state.clone(),
            local: Rc::downgrade(&self.local),
        }
    }

    /// Run the loop until `quit()` or until `timeout` elapses (forever
    /// when `None`). Spawned local tasks make progress while the loop is
    /// parked between source dispatches.
    pub fn run(&self, timeout: Option<Duration>) {
        let state = self.state.clone();
        let deadline = timeout.map(|t| Instant::now() + t);
        let local = self.local.clone();
        self.rt.block_on(local.run_until(async move {
            loop {
                state.now.set(Instant::now());
                if state.quit.take() {
                    break;
                }
                run_due_timers(&state);
                run_idles(&state);
                if state.quit.take() {
                    break;
                }

                let now = Instant::now();
                if let Some(d) = deadline {
                    if now >= d {
                        break;
                    }
                }
                if !state.idles.borrow().is_empty() {
                    // Idle work pending: give tasks one scheduling turn,
                    // then come straight back.
                    tokio::task::yield_now().await;
                    continue;
                }
                let mut wake_at = deadline;
                if let Some(t) = next_timer_deadline(&state) {
                    wake_at = Some(wake_at.map_or(t, |d| d.min(t)));
                }
                let park = wake_at
                    .map(|w| w.saturating_duration_since(now))
                    .unwrap_or(Duration::from_millis(50));
                tokio::select! {
                    _ = tokio::time::sleep(park) => {}
                    _ = state.wake.notified() => {}
                }
            }
        }));
    }

    pub fn quit(&self) {
        self.handle().quit();
    }

    pub fn current_time(&self) -> Instant {
        self.state.now.get()
    }

    pub fn add_timer(
        &self,
        delay: Duration,
        interval: Option<Duration>,
        callback: impl FnMut() -> bool + 'static,
    ) -> SourceId {
        self.handle().add_timer(delay, interval, callback)
    }

    pub fn add_idle(&self, callback: impl FnMut() -> bool + 'static) -> SourceId {
        self.handle().add_idle(callback)
    }

    pub fn remove_source(&self, id: SourceId) {
        self.handle().remove_source(id)
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.local.spawn_local(future)
    }
}

impl LoopHandle {
    pub fn quit(&self) {
        self.state.quit.set(true);
        self.state.wake.notify_one();
    }

    /// The loop clock: monotonic, updated once per loop iteration.
    pub fn current_time(&self) -> Instant {
        self.state.now.get()
    }

    /// Schedule a timer firing after `delay`. With `interval`, the timer
    /// rearms every `interval` for as long as the callback returns `true`.
    pub fn add_timer(
        &self,
        delay: Duration,
        interval: Option<Duration>,
        callback: impl FnMut() -> bool + 'static,
    ) -> SourceId {
        let id = self.state.alloc_id();
        self.state.timers.borrow_mut().push(TimerEntry {
            id,
            fire_at: Instant::now() + delay,
            interval,
            callback: Box::new(callback),
        });
        self.state.wake.notify_one();
        SourceId(id)
    }

    /// Schedule an idle callback, run once per loop iteration until it
    /// returns `false` or is removed.
    pub fn add_idle(&self, callback: impl FnMut() -> bool + 'static) -> SourceId {
        let id = self.state.alloc_id();
        self.state
            .idles
            .borrow_mut()
            .push((id, Some(Box::new(callback))));
        self.state.wake.notify_one();
        SourceId(id)
    }

    /// Remove a timer or idle source. Idempotent: unknown or already
    /// removed ids are ignored.
    pub fn remove_source(&self, id: SourceId) {
        let SourceId(id) = id;
        {
            let mut timers = self.state.timers.borrow_mut();
            if let Some(i) = timers.iter().position(|t| t.id == id) {
                timers.swap_remove(i);
                return;
            }
        }
        {
            let mut idles = self.state.idles.borrow_mut();
            if let Some(i) = idles.iter().position(|(iid, _)| *iid == id) {
                idles.remove(i);
                return;
            }
        }
        // The source may be mid-dispatch; make sure it is not reinstated.
        self.state.dead.borrow_mut().push(id);
    }

    /// Spawn a task onto the loop's LocalSet. Panics if the loop has been
    /// dropped.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let local = self
            .local
            .upgrade()
            .expect("main loop dropped while handle still in use");
        local.spawn_local(future)
    }

    /// Wake the loop early (e.g. after making a task runnable).
    pub fn wakeup(&self) {
        self.state.wake.notify_one();
    }
}

fn next_timer_deadline(state: &LoopState) -> Option<Instant> {
    state.timers.borrow().iter().map(|t| t.fire_at).min()
}

fn run_due_timers(state: &LoopState) {
    let now = state.now.get();
    let mut due = Vec::new();
    {
        let mut timers = state.timers.borrow_mut();
        let mut i = 0;
        while i < timers.len() {
            if timers[i].fire_at <= now {
                due.push(timers.swap_remove(i));
            } else {
                i += 1;
            }
        }
    }
    for mut entry in due {
        let rearm = (entry.callback)();
        if state.is_dead(entry.id) {
            continue;
        }
        if rearm {
            if let Some(interval) = entry.interval {
                entry.fire_at = now + interval;
                state.timers.borrow_mut().push(entry);
            }
        }
    }
}

fn run_idles(state: &LoopState) {
    let ids: Vec<u64> = state.idles.borrow().iter().map(|(id, _)| *id).collect();
    for id in ids {
        // Detach the callback so it may add or remove sources freely.
        let callback = {
            let mut idles = state.idles.borrow_mut();
            match idles.iter_mut().find(|(iid, _)| *iid == id) {
                Some((_, slot)) => slot.take(),
                None => None,
            }
        };
        let Some(mut callback) = callback else {
            continue;
        };
        let keep = callback();
        let removed_meanwhile = state.is_dead(id);
        let mut idles = state.idles.borrow_mut();
        if let Some(i) = idles.iter().position(|(iid, _)| *iid == id) {
            if keep && !removed_meanwhile {
                idles[i].1 = Some(callback);
            } else {
                idles.remove(i);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_fires_and_quits() {
        let lp = MainLoop::new().unwrap();
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        let handle = lp.handle();
        let h2 = handle.clone();
        handle.add_timer(Duration::from_millis(5), None, move || {
            f.set(true);
            h2.quit();
            false
        });
        lp.run(Some(Duration::from_secs(2)));
        assert!(fired.get());
    }

    #[test]
    fn interval_timer_rearms_until_false() {
        let lp = MainLoop::new().unwrap();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let handle = lp.handle();
        let h2 = handle.clone();
        handle.add_timer(
            Duration::from_millis(1),
            Some(Duration::from_millis(1)),
            move || {
                c.set(c.get() + 1);
                if c.get() == 3 {
                    h2.quit();
                    false
                } else {
                    true
                }
            },
        );
        lp.run(Some(Duration::from_secs(2)));
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn remove_source_is_idempotent() {
        let lp = MainLoop::new().unwrap();
        let id = lp.add_timer(Duration::from_secs(60), None, || false);
        lp.remove_source(id);
        lp.remove_source(id);
        // Run a bounded slice; nothing fires.
        lp.run(Some(Duration::from_millis(10)));
    }

    #[test]
    fn idle_runs_until_removed() {
        let lp = MainLoop::new().unwrap();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let handle = lp.handle();
        let h2 = handle.clone();
        handle.add_idle(move || {
            c.set(c.get() + 1);
            if c.get() >= 5 {
                h2.quit();
                false
            } else {
                true
            }
        });
        lp.run(Some(Duration::from_secs(2)));
        assert_eq!(count.get(), 5);
    }

    #[test]
    fn run_timeout_returns() {
        let lp = MainLoop::new().unwrap();
        let start = Instant::now();
        lp.run(Some(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
