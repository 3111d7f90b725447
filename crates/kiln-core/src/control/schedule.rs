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

//! Scheduling and synchronization outcomes, and the pluggable policy interface.

use crate::resource::{LedgerError, ResourceLedger};
use crate::schedulable::{ApplicationRegistry, SchedulableId};
use std::fmt;
use std::time::Duration;

/// Result of one scheduling activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// No scheduling policy is loaded.
    MissingPolicy,
    /// The policy failed or no feasible assignment exists.
    Failed,
    /// The policy asks to be run again later.
    Delayed,
    /// An assignment, possibly partial, has been produced and committed.
    Done,
}

impl fmt::Display for ScheduleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleOutcome::MissingPolicy => "MISSING_POLICY",
            ScheduleOutcome::Failed => "FAILED",
            ScheduleOutcome::Delayed => "DELAYED",
            ScheduleOutcome::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Result of one synchronization activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every pending schedulable has been synchronized.
    Ok,
    /// At least one schedulable could not be synchronized.
    Failed,
}

/// The scheduling collaborator driven by the optimization cycle.
pub trait Scheduler: Send + Sync {
    /// Runs the loaded policy and commits its result.
    fn schedule(&self) -> ScheduleOutcome;
}

/// The synchronization collaborator driven by the optimization cycle.
pub trait Synchronizer: Send + Sync {
    /// Applies the scheduled assignments to the pending schedulables.
    fn sync_schedule(&self) -> SyncOutcome;
}

/// The system interfaces a policy works against.
#[derive(Clone, Copy)]
pub struct SystemView<'a> {
    /// The resource ledger.
    pub ledger: &'a dyn ResourceLedger,
    /// The schedulable registry.
    pub applications: &'a dyn ApplicationRegistry,
}

/// One working-mode choice produced by a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// The schedulable being assigned.
    pub schedulable: SchedulableId,
    /// The working mode selected.
    pub mode: u8,
    /// The cluster the working mode has been bound to.
    pub cluster: u32,
}

/// Figures reported by a policy about one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyStats {
    /// Largest number of entries held by the ordering map.
    pub map_size: usize,
    /// Number of scheduling entities evaluated.
    pub entities: usize,
    /// Time spent ordering entities.
    pub ordering: Duration,
    /// Time spent computing suitability metrics.
    pub metrics: Duration,
    /// Time spent selecting entities.
    pub selection: Duration,
}

/// What a successful policy run produced.
#[derive(Debug, Clone, Default)]
pub struct PolicyRun {
    /// The committed assignments.
    pub assignments: Vec<Assignment>,
    /// Run statistics.
    pub stats: PolicyStats,
}

/// Why a policy run did not produce an assignment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// A transient precondition is not met; the run should be retried later.
    #[error("scheduling delayed: {0}")]
    Delayed(String),
    /// The policy failed.
    #[error("scheduling failed: {0}")]
    Failed(String),
    /// The ledger rejected an operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// A specialized `Result` type for policy runs.
pub type PolicyResult = Result<PolicyRun, PolicyError>;

/// A pluggable resource allocation heuristic.
pub trait SchedulingPolicy: Send {
    /// The name the policy is registered under.
    fn name(&self) -> &'static str;

    /// Computes and commits a new resource assignment.
    ///
    /// Implementations own exactly one resource view for the whole run and
    /// must release it before returning, whatever the outcome.
    fn schedule(&mut self, system: SystemView<'_>) -> PolicyResult;
}

/// Static registration of a scheduling policy, collected with `inventory`.
pub struct PolicyRegistration {
    /// The policy name.
    pub name: &'static str,
    /// Builds a fresh policy instance.
    pub create: fn() -> Box<dyn SchedulingPolicy>,
}

inventory::collect!(PolicyRegistration);

impl PolicyRegistration {
    /// Iterates over every linked policy registration.
    pub fn iter() -> impl Iterator<Item = &'static PolicyRegistration> {
        inventory::iter::<PolicyRegistration>.into_iter()
    }

    /// Instantiates the policy registered under `name`.
    pub fn instantiate(name: &str) -> Option<Box<dyn SchedulingPolicy>> {
        Self::iter().find(|r| r.name == name).map(|r| (r.create)())
    }
}
