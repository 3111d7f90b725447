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

//! The readiness gate: "is an optimization cycle in progress".

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Flag plus condition variable tracking whether the system is quiescent.
///
/// The gate is *ready* when no optimization cycle is running. A cycle enters
/// through [`ReadinessGate::begin`], which waits for the gate to be ready and
/// flips it to busy atomically, so at most one cycle holds it at any instant.
#[derive(Debug)]
pub struct ReadinessGate {
    ready: Mutex<bool>,
    changed: Condvar,
}

impl ReadinessGate {
    /// Creates a gate in the ready state.
    pub fn new() -> Self {
        Self {
            ready: Mutex::new(true),
            changed: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, bool> {
        self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forces the gate state, waking every waiter.
    pub fn set_ready(&self, value: bool) {
        let mut ready = self.state();
        *ready = value;
        self.changed.notify_all();
    }

    /// Whether no cycle is currently running.
    pub fn is_ready(&self) -> bool {
        *self.state()
    }

    /// Blocks until the gate is ready.
    pub fn wait_for_ready(&self) {
        let ready = self.state();
        let _ready = self
            .changed
            .wait_while(ready, |ready| !*ready)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Blocks until the gate is ready or `timeout` elapses.
    ///
    /// Returns `true` if the gate was observed ready.
    pub fn wait_for_ready_timeout(&self, timeout: Duration) -> bool {
        let ready = self.state();
        let (ready, _) = self
            .changed
            .wait_timeout_while(ready, timeout, |ready| !*ready)
            .unwrap_or_else(PoisonError::into_inner);
        *ready
    }

    /// Waits for the gate to be ready, then marks it busy.
    ///
    /// The returned guard marks the gate ready again when dropped, on every
    /// exit path of the caller.
    pub fn begin(&self) -> BusyGuard<'_> {
        let ready = self.state();
        let mut ready = self
            .changed
            .wait_while(ready, |ready| !*ready)
            .unwrap_or_else(PoisonError::into_inner);
        *ready = false;
        BusyGuard { gate: self }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the gate busy for the duration of one optimization cycle.
#[derive(Debug)]
pub struct BusyGuard<'a> {
    gate: &'a ReadinessGate,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.gate.set_ready(true);
    }
}
