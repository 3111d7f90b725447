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

//! One schedule-then-synchronize optimization pass.

use crate::metrics::{count, tick, CycleMetrics};
use crate::readiness::ReadinessGate;
use kiln_core::control::{ScheduleOutcome, Scheduler, SyncOutcome, Synchronizer};
use kiln_core::schedulable::{ApplicationRegistry, SchedulableState};
use kiln_core::telemetry::MetricsResult;
use kiln_telemetry::{MetricsRegistry, ScopedMetricTimer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What one optimization cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleOutcome {
    /// Result of the schedule phase, `None` when it was skipped.
    pub schedule: Option<ScheduleOutcome>,
    /// Result of the synchronize phase, `None` when it was not run.
    pub sync: Option<SyncOutcome>,
}

impl CycleOutcome {
    /// Whether the cycle ran to its end without a failure.
    pub fn is_success(&self) -> bool {
        matches!(self.schedule, None | Some(ScheduleOutcome::Done))
            && self.sync != Some(SyncOutcome::Failed)
    }
}

/// Runs the optimization cycle against its collaborators.
///
/// Every run holds the [`ReadinessGate`] busy from start to end, so runs
/// triggered concurrently execute one after the other.
pub struct OptimizationCycle {
    gate: Arc<ReadinessGate>,
    applications: Arc<dyn ApplicationRegistry>,
    scheduler: Arc<dyn Scheduler>,
    synchronizer: Arc<dyn Synchronizer>,
    platform_event: AtomicBool,
    metrics: CycleMetrics,
}

impl OptimizationCycle {
    /// Creates a cycle, registering its metrics.
    pub fn new(
        gate: Arc<ReadinessGate>,
        applications: Arc<dyn ApplicationRegistry>,
        scheduler: Arc<dyn Scheduler>,
        synchronizer: Arc<dyn Synchronizer>,
        registry: &MetricsRegistry,
    ) -> MetricsResult<Self> {
        Ok(Self {
            gate,
            applications,
            scheduler,
            synchronizer,
            platform_event: AtomicBool::new(false),
            metrics: CycleMetrics::register(registry)?,
        })
    }

    /// Marks the next run as triggered by a platform event, which forces the
    /// schedule phase even without active schedulables.
    pub fn mark_platform_event(&self) {
        self.platform_event.store(true, Ordering::SeqCst);
    }

    /// Runs one cycle, blocking first until no other cycle is running.
    pub fn run(&self) -> CycleOutcome {
        let _busy = self.gate.begin();
        let _timer = ScopedMetricTimer::new(&self.metrics.opt_time);
        let mut outcome = CycleOutcome::default();

        let platform_event = self.platform_event.swap(false, Ordering::SeqCst);
        let active = self.applications.has_in_state(SchedulableState::Ready)
            || self.applications.has_in_state(SchedulableState::Running);

        // ── 1. Schedule ─────────────────────────────────────────────
        if !platform_event && !active {
            log::info!("RM: no active schedulables, skipping schedule");
            count(&self.metrics.sch_empty);
        } else {
            log::info!("RM: running schedule (platform event: {})", platform_event);
            count(&self.metrics.sch_total);
            tick(&self.metrics.sch_period);

            let result = self.scheduler.schedule();
            outcome.schedule = Some(result);
            match result {
                ScheduleOutcome::MissingPolicy | ScheduleOutcome::Failed => {
                    log::warn!("RM: schedule FAILED (Error: {})", result);
                    count(&self.metrics.sch_failed);
                    return outcome;
                }
                ScheduleOutcome::Delayed => {
                    log::info!("RM: schedule DELAYED");
                    count(&self.metrics.sch_delayed);
                    return outcome;
                }
                ScheduleOutcome::Done => {}
            }
        }

        // ── 2. Synchronize ──────────────────────────────────────────
        if !self.applications.has_in_state(SchedulableState::Sync) {
            log::info!("RM: nothing to synchronize");
            if outcome.schedule.is_some() {
                count(&self.metrics.sch_empty);
            }
            return outcome;
        }

        count(&self.metrics.syn_total);
        tick(&self.metrics.syn_period);
        let result = self.synchronizer.sync_schedule();
        outcome.sync = Some(result);
        if result == SyncOutcome::Failed {
            // Bindings already committed by the schedule phase are kept.
            log::warn!("RM: synchronization FAILED");
            count(&self.metrics.syn_failed);
        }

        outcome
    }
}
