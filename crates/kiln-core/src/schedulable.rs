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

//! The schedulable model: applications and processes competing for resources.

use crate::resource::ResourceKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a schedulable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchedulableId(pub u32);

impl fmt::Display for SchedulableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:05}", self.0)
    }
}

/// Whether a schedulable is an adaptive application or a plain process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulableKind {
    /// An adaptive application exposing working modes.
    Application,
    /// A managed process with a single resource profile.
    Process,
}

/// Lifecycle state of a schedulable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulableState {
    /// Registered but not willing to run.
    Disabled,
    /// Waiting for a first resource assignment.
    Ready,
    /// Running with its current assignment.
    Running,
    /// An assignment has been scheduled and waits for synchronization.
    Sync,
    /// Exited; kept only until it is destroyed.
    Finished,
}

impl fmt::Display for SchedulableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulableState::Disabled => "DIS",
            SchedulableState::Ready => "RDY",
            SchedulableState::Running => "RUN",
            SchedulableState::Sync => "SYN",
            SchedulableState::Finished => "FIN",
        };
        f.write_str(name)
    }
}

/// Priority class of a schedulable. `0` is the highest priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(pub u8);

/// Amount of one resource kind requested by a working mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// The kind of resource.
    pub kind: ResourceKind,
    /// The requested amount (percent of a core for PEs, bytes for memory).
    pub amount: u64,
}

/// A discrete resource request profile a schedulable can run under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingMode {
    /// Identifier, unique within its schedulable.
    pub id: u8,
    /// Human readable name.
    pub name: String,
    /// Relative quality of service delivered in this mode, in `(0, 1]`.
    pub value: f32,
    /// Resources needed to run in this mode.
    pub requests: Vec<ResourceRequest>,
}

/// A snapshot of one registered schedulable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedulable {
    /// Unique identifier.
    pub id: SchedulableId,
    /// Human readable name.
    pub name: String,
    /// Application or process.
    pub kind: SchedulableKind,
    /// Priority class.
    pub priority: Priority,
    /// Lifecycle state.
    pub state: SchedulableState,
    /// The working modes this schedulable can run under.
    pub working_modes: Vec<WorkingMode>,
    /// The working mode currently applied, if any.
    pub current_mode: Option<u8>,
    /// The working mode scheduled for the next synchronization, if any.
    pub next_mode: Option<u8>,
    /// The cluster the next working mode has been bound to, if any.
    pub next_cluster: Option<u32>,
}

impl Schedulable {
    /// Returns `true` if the scheduler may consider this schedulable.
    pub fn is_schedulable(&self) -> bool {
        matches!(
            self.state,
            SchedulableState::Ready | SchedulableState::Running
        )
    }

    /// Looks up a working mode by identifier.
    pub fn working_mode(&self, id: u8) -> Option<&WorkingMode> {
        self.working_modes.iter().find(|wm| wm.id == id)
    }

    /// Short identifier used in logs, e.g. `#00012:video`.
    pub fn str_id(&self) -> String {
        format!("{}:{}", self.id, self.name)
    }
}

/// A specialized `Result` type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// An error raised by the schedulable registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No schedulable with this identifier is registered.
    #[error("unknown schedulable {0}")]
    Unknown(SchedulableId),
    /// The working mode does not belong to the schedulable.
    #[error("schedulable {0} has no working mode {1}")]
    UnknownWorkingMode(SchedulableId, u8),
    /// The requested state transition is not allowed.
    #[error("schedulable {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        /// The schedulable.
        id: SchedulableId,
        /// Current state.
        from: SchedulableState,
        /// Requested state.
        to: SchedulableState,
    },
}

/// Enumeration and state management of the registered schedulables.
pub trait ApplicationRegistry: Send + Sync {
    /// Returns `true` if at least one schedulable is in `state`.
    fn has_in_state(&self, state: SchedulableState) -> bool;

    /// The highest-priority schedulable in `state`, if any.
    fn highest_priority(&self, state: SchedulableState) -> Option<Schedulable>;

    /// Snapshots of every registered schedulable, ordered by identifier.
    fn all(&self) -> Vec<Schedulable>;

    /// Snapshots of the schedulables in one priority class.
    fn by_priority(&self, priority: Priority) -> Vec<Schedulable> {
        self.all()
            .into_iter()
            .filter(|s| s.priority == priority)
            .collect()
    }

    /// The lowest priority class in use (the numerically largest).
    fn lowest_priority(&self) -> Priority {
        self.all()
            .iter()
            .map(|s| s.priority)
            .max()
            .unwrap_or(Priority(0))
    }

    /// Records the working mode chosen by the scheduler and moves the
    /// schedulable to [`SchedulableState::Sync`].
    fn schedule_request(&self, id: SchedulableId, mode: u8, cluster: u32) -> RegistryResult<()>;

    /// Applies the scheduled working mode and moves the schedulable to
    /// [`SchedulableState::Running`].
    fn sync_commit(&self, id: SchedulableId) -> RegistryResult<()>;

    /// Moves a running schedulable left without resources back to
    /// [`SchedulableState::Ready`].
    fn unschedule(&self, id: SchedulableId) -> RegistryResult<()>;

    /// Disables and removes a schedulable.
    fn destroy(&self, id: SchedulableId) -> RegistryResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(state: SchedulableState) -> Schedulable {
        Schedulable {
            id: SchedulableId(12),
            name: "video".into(),
            kind: SchedulableKind::Application,
            priority: Priority(1),
            state,
            working_modes: vec![WorkingMode {
                id: 0,
                name: "low".into(),
                value: 0.3,
                requests: vec![ResourceRequest {
                    kind: ResourceKind::ProcessingElement,
                    amount: 50,
                }],
            }],
            current_mode: None,
            next_mode: None,
            next_cluster: None,
        }
    }

    #[test]
    fn test_schedulable_states() {
        assert!(sample(SchedulableState::Ready).is_schedulable());
        assert!(sample(SchedulableState::Running).is_schedulable());
        assert!(!sample(SchedulableState::Sync).is_schedulable());
        assert!(!sample(SchedulableState::Disabled).is_schedulable());
        assert!(!sample(SchedulableState::Finished).is_schedulable());
    }

    #[test]
    fn test_working_mode_lookup_and_str_id() {
        let s = sample(SchedulableState::Ready);
        assert_eq!(s.working_mode(0).map(|wm| wm.name.as_str()), Some("low"));
        assert!(s.working_mode(3).is_none());
        assert_eq!(s.str_id(), "#00012:video");
    }
}
