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

//! Drives the loaded scheduling policy and applies its assignments.

use kiln_core::control::{
    PolicyError, PolicyRegistration, PolicyStats, ScheduleOutcome, Scheduler, SchedulingPolicy,
    SystemView,
};
use kiln_core::resource::ResourceLedger;
use kiln_core::schedulable::{ApplicationRegistry, SchedulableState};
use kiln_telemetry::MetricsRegistry;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Owns the active scheduling policy.
///
/// Policies are looked up by name among those registered at link time
/// through [`PolicyRegistration`]. Without a loaded policy every
/// activation reports [`ScheduleOutcome::MissingPolicy`].
pub struct SchedulerManager {
    ledger: Arc<dyn ResourceLedger>,
    applications: Arc<dyn ApplicationRegistry>,
    policy: Mutex<Option<Box<dyn SchedulingPolicy>>>,
    metrics: MetricsRegistry,
}

impl SchedulerManager {
    /// Creates a manager with no policy loaded.
    pub fn new(
        ledger: Arc<dyn ResourceLedger>,
        applications: Arc<dyn ApplicationRegistry>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            ledger,
            applications,
            policy: Mutex::new(None),
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn SchedulingPolicy>>> {
        self.policy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Names of every registered policy.
    pub fn available_policies() -> Vec<&'static str> {
        let mut names: Vec<_> = PolicyRegistration::iter().map(|r| r.name).collect();
        names.sort_unstable();
        names
    }

    /// Loads the registered policy called `name`, replacing the current one.
    ///
    /// Returns `false`, keeping the current policy, if no such policy exists.
    pub fn load_policy(&self, name: &str) -> bool {
        match PolicyRegistration::instantiate(name) {
            Some(policy) => {
                log::info!("RM: scheduling policy [{}] loaded", name);
                *self.lock() = Some(policy);
                true
            }
            None => {
                log::error!(
                    "RM: scheduling policy [{}] not found, available: {:?}",
                    name,
                    Self::available_policies()
                );
                false
            }
        }
    }

    /// Installs a policy instance directly.
    pub fn set_policy(&self, policy: Box<dyn SchedulingPolicy>) {
        log::info!("RM: scheduling policy [{}] installed", policy.name());
        *self.lock() = Some(policy);
    }

    /// Name of the loaded policy.
    pub fn policy_name(&self) -> Option<&'static str> {
        self.lock().as_ref().map(|p| p.name())
    }

    fn record_stats(&self, policy: &str, stats: &PolicyStats) {
        let record = || -> kiln_core::telemetry::MetricsResult<()> {
            self.metrics
                .register_gauge(policy, "schedmap.size", "Size of the scheduling map", "count")?
                .set(stats.map_size as f64)?;
            self.metrics
                .register_gauge(policy, "entities", "Number of scheduling entities", "count")?
                .set(stats.entities as f64)?;
            self.metrics
                .register_sample(policy, "order.time", "Time to order entities t[ms]", "ms")?
                .observe_duration(stats.ordering)?;
            self.metrics
                .register_sample(policy, "metcomp.time", "Time to compute metrics t[ms]", "ms")?
                .observe_duration(stats.metrics)?;
            self.metrics
                .register_sample(policy, "select.time", "Time to select entities t[ms]", "ms")?
                .observe_duration(stats.selection)?;
            Ok(())
        };
        if let Err(e) = record() {
            log::warn!("RM: failed to record [{}] metrics: {}", policy, e);
        }
    }
}

impl Scheduler for SchedulerManager {
    fn schedule(&self) -> ScheduleOutcome {
        let mut policy = self.lock();
        let Some(policy) = policy.as_mut() else {
            log::error!("RM: no scheduling policy loaded");
            return ScheduleOutcome::MissingPolicy;
        };

        let name = policy.name();
        let system = SystemView {
            ledger: self.ledger.as_ref(),
            applications: self.applications.as_ref(),
        };

        let run = match policy.schedule(system) {
            Ok(run) => run,
            Err(PolicyError::Delayed(reason)) => {
                log::info!("RM: policy [{}] delayed: {}", name, reason);
                return ScheduleOutcome::Delayed;
            }
            Err(e) => {
                log::error!("RM: policy [{}] failed: {}", name, e);
                return ScheduleOutcome::Failed;
            }
        };

        self.record_stats(name, &run.stats);

        // The committed view holds only this run's bookings.
        let assigned: BTreeSet<_> = run.assignments.iter().map(|a| a.schedulable).collect();
        for s in self.applications.all() {
            if s.state != SchedulableState::Running || assigned.contains(&s.id) {
                continue;
            }
            log::info!("RM: {} left without resources", s.str_id());
            if let Err(e) = self.applications.unschedule(s.id) {
                log::warn!("RM: unscheduling {} failed: {}", s.str_id(), e);
            }
        }

        for assignment in &run.assignments {
            if let Err(e) = self.applications.schedule_request(
                assignment.schedulable,
                assignment.mode,
                assignment.cluster,
            ) {
                log::warn!(
                    "RM: schedule request for {} rejected: {}",
                    assignment.schedulable,
                    e
                );
            }
        }

        log::info!(
            "RM: policy [{}] done, {} assignment(s)",
            name,
            run.assignments.len()
        );
        ScheduleOutcome::Done
    }
}
