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

//! A debounced trigger running one bound action on its own thread.

use crate::workers::WorkerRegistry;
use kiln_core::worker::Worker;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// The action bound to a [`Deferrable`].
pub type DeferredAction = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Default)]
struct DeferState {
    deadline: Option<Instant>,
    period: Option<Duration>,
    stopped: bool,
}

struct Shared {
    name: String,
    state: Mutex<DeferState>,
    wakeup: Condvar,
    executions: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DeferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arms the trigger for `deadline`; the soonest pending deadline wins.
    fn arm(&self, deadline: Instant) -> bool {
        let mut state = self.lock();
        if state.stopped {
            return false;
        }
        match state.deadline {
            Some(pending) if pending <= deadline => {
                log::trace!("Deferrable[{}]: absorbed by pending deadline", self.name);
                false
            }
            _ => {
                state.deadline = Some(deadline);
                self.wakeup.notify_one();
                true
            }
        }
    }

    fn stop(&self) {
        let mut state = self.lock();
        state.stopped = true;
        state.deadline = None;
        self.wakeup.notify_all();
    }

    /// Blocks until the pending deadline expires, returning `false` once stopped.
    fn wait_deadline(&self) -> bool {
        let mut state = self.lock();
        loop {
            if state.stopped {
                return false;
            }
            match state.deadline {
                None => {
                    state = self
                        .wakeup
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.deadline = None;
                        return true;
                    }
                    state = self
                        .wakeup
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

impl Worker for Shared {
    fn terminate(&self) {
        log::debug!("Deferrable[{}]: terminate requested", self.name);
        self.stop();
    }
}

/// Collapses bursts of requests into one delayed execution of its action.
///
/// Every [`schedule`](Deferrable::schedule) or
/// [`schedule_in`](Deferrable::schedule_in) call arms a single pending
/// deadline. When several requests with different delays overlap, the
/// soonest deadline wins: an earlier request replaces the pending deadline,
/// a later one is absorbed by it. Either way the action runs exactly once
/// when the deadline expires, then the trigger goes back to idle (or re-arms
/// itself when periodic).
///
/// Requests arriving while the action is running arm the next execution.
pub struct Deferrable {
    shared: Arc<Shared>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Deferrable {
    /// Spawns the trigger thread, registering it as a worker under `name`.
    pub fn spawn(
        name: impl Into<String>,
        workers: Arc<WorkerRegistry>,
        action: DeferredAction,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            state: Mutex::new(DeferState::default()),
            wakeup: Condvar::new(),
            executions: AtomicU64::new(0),
        });

        if !workers.register(name.clone(), shared.clone()) {
            log::warn!("Deferrable[{}]: running unregistered", name);
        }

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("kiln-{}", name))
            .spawn(move || {
                let shared = thread_shared;
                log::debug!("Deferrable[{}]: thread started", shared.name);
                while shared.wait_deadline() {
                    log::trace!("Deferrable[{}]: executing", shared.name);
                    // A panicking action must not take the trigger down with it.
                    match panic::catch_unwind(AssertUnwindSafe(|| action())) {
                        Ok(()) => {
                            shared.executions.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(payload) => {
                            log::error!(
                                "Deferrable[{}]: action panicked: {}",
                                shared.name,
                                panic_message(payload.as_ref())
                            );
                        }
                    }

                    let period = shared.lock().period;
                    if let Some(period) = period {
                        shared.arm(Instant::now() + period);
                    }
                }
                log::debug!("Deferrable[{}]: thread stopped", shared.name);
                workers.unregister(&shared.name);
            });

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                shared.stop();
                return Err(e);
            }
        };

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Name under which the trigger is registered.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Arms the trigger for an immediate execution.
    pub fn schedule(&self) {
        self.shared.arm(Instant::now());
    }

    /// Arms the trigger to fire after `delay`.
    ///
    /// Returns `false` if the request was absorbed by an earlier pending
    /// deadline (or the trigger is stopped).
    pub fn schedule_in(&self, delay: Duration) -> bool {
        self.shared.arm(Instant::now() + delay)
    }

    /// Makes the action also run every `interval`, independently of
    /// requests. A zero interval disables the periodic execution.
    pub fn set_periodic(&self, interval: Duration) {
        if interval.is_zero() {
            self.shared.lock().period = None;
            return;
        }
        self.shared.lock().period = Some(interval);
        self.shared.arm(Instant::now() + interval);
    }

    /// Whether an execution is pending.
    pub fn is_armed(&self) -> bool {
        self.shared.lock().deadline.is_some()
    }

    /// Number of completed executions of the action.
    pub fn executions(&self) -> u64 {
        self.shared.executions.load(Ordering::SeqCst)
    }

    /// Stops the trigger and joins its thread. Pending requests are dropped.
    pub fn stop(&self) {
        self.shared.stop();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("Deferrable[{}]: thread panicked", self.shared.name);
            }
        }
    }
}

impl Drop for Deferrable {
    fn drop(&mut self) {
        self.stop();
    }
}
