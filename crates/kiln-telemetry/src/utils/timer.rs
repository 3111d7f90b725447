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

//! RAII timers that record the duration of a scope into a sample metric.

use crate::metrics::registry::SampleHandle;
use kiln_core::utils::timer::Stopwatch;

/// Times the enclosing scope and records the result, in milliseconds, in a
/// sample metric when dropped.
///
/// The measurement is recorded on every exit path, early returns included.
pub struct ScopedMetricTimer<'a> {
    stopwatch: Stopwatch,
    sample: &'a SampleHandle,
}

impl<'a> ScopedMetricTimer<'a> {
    /// Creates a new timer for the given sample and starts it immediately.
    pub fn new(sample: &'a SampleHandle) -> Self {
        Self {
            stopwatch: Stopwatch::new(),
            sample,
        }
    }

    /// Milliseconds elapsed so far.
    pub fn elapsed_ms(&self) -> f64 {
        self.stopwatch.elapsed_ms()
    }
}

impl Drop for ScopedMetricTimer<'_> {
    fn drop(&mut self) {
        if let Some(elapsed_secs) = self.stopwatch.elapsed_secs_f64() {
            if let Err(e) = self.sample.observe(elapsed_secs * 1000.0) {
                log::warn!("[ScopedMetricTimer] Failed to record metric: {:?}", e);
            }
        }
    }
}
