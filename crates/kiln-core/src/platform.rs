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

//! The platform integration contract.
//!
//! A platform proxy discovers the resources of one backend (host CPUs,
//! accelerators, container groups, ...), registers them into the ledger and
//! enforces resource bindings on the running schedulables.

use crate::resource::{ResourceKind, ResourceLedger, ResourceUsage};
use crate::schedulable::Schedulable;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status returned by every platform operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformStatus {
    /// The operation succeeded.
    Ok,
    /// Resource discovery failed.
    EnumerationFailed,
    /// Per-schedulable setup failed.
    SetupFailed,
    /// Resource binding could not be enforced.
    MappingFailed,
    /// Any other backend error.
    Error,
}

impl PlatformStatus {
    /// Returns `true` for [`PlatformStatus::Ok`].
    pub fn is_ok(self) -> bool {
        self == PlatformStatus::Ok
    }
}

impl fmt::Display for PlatformStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A platform backend.
pub trait PlatformProxy: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &str;

    /// Discovers the backend resources and registers them into the ledger.
    fn load_platform_data(&self, ledger: &dyn ResourceLedger) -> PlatformStatus;

    /// Prepares the backend to host a new schedulable.
    fn setup(&self, _schedulable: &Schedulable) -> PlatformStatus {
        PlatformStatus::Ok
    }

    /// Releases the backend state of an exiting schedulable.
    fn release(&self, _schedulable: &Schedulable) -> PlatformStatus {
        PlatformStatus::Ok
    }

    /// Takes back every resource currently bound to a schedulable.
    fn reclaim_resources(&self, _schedulable: &Schedulable) -> PlatformStatus {
        PlatformStatus::Ok
    }

    /// Enforces a resource assignment on a schedulable.
    fn map_resources(
        &self,
        schedulable: &Schedulable,
        usages: &[ResourceUsage],
        exclusive: bool,
    ) -> PlatformStatus;

    /// Shuts the backend down.
    fn exit(&self) -> PlatformStatus {
        PlatformStatus::Ok
    }
}

/// One resource of a statically described platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticResource {
    /// Hierarchical resource path, e.g. `sys0.cpu0.pe3`.
    pub path: String,
    /// What the resource is.
    pub kind: ResourceKind,
    /// Total capacity (percent of a core, bytes, ...).
    pub capacity: u64,
    /// Locality cluster.
    #[serde(default)]
    pub cluster: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_ok() {
        assert!(PlatformStatus::Ok.is_ok());
        assert!(!PlatformStatus::MappingFailed.is_ok());
        assert_eq!(PlatformStatus::SetupFailed.to_string(), "SetupFailed");
    }
}
