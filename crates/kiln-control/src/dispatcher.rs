// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The coalescing set of pending control events and its dispatch pass.

use kiln_core::event::{ControlEvent, DispatchMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

/// Handles one control event taken from the pending set.
pub trait EventHandler {
    /// Called once per consumed event, with its pending flag already cleared.
    fn handle_event(&self, event: ControlEvent);
}

/// One flag per [`ControlEvent`], drained by a single dispatcher.
///
/// Repeated notifications of the same kind before it is consumed collapse
/// into one pending flag: delivery is at-least-once, not exactly-N.
///
/// [`notify`](PendingEvents::notify) never blocks. It raises the flag and
/// then signals the dispatcher only if the dispatch lock is free; while a
/// pass is in flight the lock is held and the signal is skipped, since the
/// dispatcher re-scans the flags before sleeping again. The dispatcher's
/// sleep is additionally bounded by a recheck interval, which covers a flag
/// raised between its last scan and the start of its wait.
#[derive(Debug)]
pub struct PendingEvents {
    flags: [AtomicBool; ControlEvent::COUNT],
    dispatch: Mutex<()>,
    wakeup: Condvar,
}

impl PendingEvents {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            flags: std::array::from_fn(|_| AtomicBool::new(false)),
            dispatch: Mutex::new(()),
            wakeup: Condvar::new(),
        }
    }

    /// Marks `event` as pending and wakes the dispatcher if it is idle.
    pub fn notify(&self, event: ControlEvent) {
        self.flags[event.index()].store(true, Ordering::SeqCst);
        match self.dispatch.try_lock() {
            Ok(_idle) => self.wakeup.notify_one(),
            Err(TryLockError::Poisoned(_idle)) => self.wakeup.notify_one(),
            Err(TryLockError::WouldBlock) => {
                log::trace!("RM: dispatch in flight, {} left for re-scan", event);
            }
        }
    }

    /// Wakes the dispatcher without raising any flag.
    pub fn wake(&self) {
        self.wakeup.notify_all();
    }

    /// Whether `event` is pending.
    pub fn is_pending(&self, event: ControlEvent) -> bool {
        self.flags[event.index()].load(Ordering::SeqCst)
    }

    /// Whether any event is pending.
    pub fn any_pending(&self) -> bool {
        self.flags.iter().any(|f| f.load(Ordering::SeqCst))
    }

    /// The pending events, highest priority first.
    pub fn pending(&self) -> Vec<ControlEvent> {
        ControlEvent::ALL
            .iter()
            .rev()
            .copied()
            .filter(|e| self.is_pending(*e))
            .collect()
    }

    /// Consumes the pending flag of `event`, returning whether it was set.
    pub fn take(&self, event: ControlEvent) -> bool {
        self.flags[event.index()].swap(false, Ordering::SeqCst)
    }

    /// Acquires the dispatch lock. Hold it for the whole pass.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps, releasing the dispatch lock, until an event is pending,
    /// `stop` returns true, or `recheck` elapses.
    pub fn wait<'a>(
        &self,
        guard: MutexGuard<'a, ()>,
        recheck: Duration,
        stop: impl Fn() -> bool,
    ) -> MutexGuard<'a, ()> {
        if self.any_pending() || stop() {
            return guard;
        }
        self.wakeup
            .wait_timeout_while(guard, recheck, |_| !self.any_pending() && !stop())
            .unwrap_or_else(PoisonError::into_inner)
            .0
    }

    /// Runs one dispatch pass, returning the events handled in order.
    ///
    /// Pending events are scanned from the highest priority (abort) down to
    /// the lowest (execution start). Each flag is cleared before its handler
    /// runs, so a re-occurrence during handling is kept for the next pass.
    /// After a user-signal or exit handler the pass yields, leaving the
    /// lower-priority events to the next wake-up.
    ///
    /// Within a pass events are handled in non-increasing priority order.
    /// Across passes there is no fairness bound: a high-priority event that
    /// keeps being re-armed can starve the lower-priority ones.
    pub fn run_pass(&self, handler: &dyn EventHandler) -> Vec<ControlEvent> {
        let mut handled = Vec::new();
        for event in ControlEvent::ALL.iter().rev().copied() {
            if !self.take(event) {
                continue;
            }
            log::debug!("RM: dispatching {}", event);
            handler.handle_event(event);
            handled.push(event);
            match event.dispatch_mode() {
                DispatchMode::Continue => {}
                DispatchMode::Yield | DispatchMode::Fatal => break,
            }
        }
        handled
    }
}

impl Default for PendingEvents {
    fn default() -> Self {
        Self::new()
    }
}
