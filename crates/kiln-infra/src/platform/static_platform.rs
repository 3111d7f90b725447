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

//! A platform described by configuration instead of discovered.

use kiln_core::platform::{PlatformProxy, PlatformStatus, StaticResource};
use kiln_core::resource::{LedgerError, ResourceAttributes, ResourceLedger, ResourcePath, ResourceUsage};
use kiln_core::schedulable::{Schedulable, SchedulableId};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Registers a fixed list of resources and records the bindings it is
/// asked to enforce.
#[derive(Debug)]
pub struct StaticPlatform {
    resources: Vec<StaticResource>,
    mapped: Mutex<BTreeMap<SchedulableId, Vec<ResourceUsage>>>,
}

impl StaticPlatform {
    /// Creates a platform providing `resources`.
    pub fn new(resources: Vec<StaticResource>) -> Self {
        Self {
            resources,
            mapped: Mutex::new(BTreeMap::new()),
        }
    }

    fn mapped(&self) -> MutexGuard<'_, BTreeMap<SchedulableId, Vec<ResourceUsage>>> {
        self.mapped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The binding currently enforced for `id`.
    pub fn mapping(&self, id: SchedulableId) -> Option<Vec<ResourceUsage>> {
        self.mapped().get(&id).cloned()
    }

    /// Number of schedulables currently mapped.
    pub fn mapped_count(&self) -> usize {
        self.mapped().len()
    }

    fn provides(&self, usage: &ResourceUsage) -> bool {
        self.resources
            .iter()
            .any(|r| r.kind == usage.kind && r.cluster == usage.cluster)
    }
}

impl PlatformProxy for StaticPlatform {
    fn name(&self) -> &str {
        "static"
    }

    fn load_platform_data(&self, ledger: &dyn ResourceLedger) -> PlatformStatus {
        if self.resources.is_empty() {
            log::error!("Platform[static]: no resources described");
            return PlatformStatus::EnumerationFailed;
        }
        for r in &self.resources {
            let attributes = ResourceAttributes {
                kind: r.kind,
                cluster: r.cluster,
            };
            match ledger.register_resource(ResourcePath::new(r.path.as_str()), attributes, r.capacity) {
                Ok(()) => {}
                Err(LedgerError::Duplicate(path)) => {
                    log::debug!("Platform[static]: {} already registered", path);
                }
                Err(e) => {
                    log::error!("Platform[static]: {}", e);
                    return PlatformStatus::EnumerationFailed;
                }
            }
        }
        log::info!("Platform[static]: {} resource(s) registered", self.resources.len());
        PlatformStatus::Ok
    }

    fn release(&self, schedulable: &Schedulable) -> PlatformStatus {
        self.mapped().remove(&schedulable.id);
        PlatformStatus::Ok
    }

    fn reclaim_resources(&self, schedulable: &Schedulable) -> PlatformStatus {
        self.mapped().remove(&schedulable.id);
        PlatformStatus::Ok
    }

    fn map_resources(
        &self,
        schedulable: &Schedulable,
        usages: &[ResourceUsage],
        _exclusive: bool,
    ) -> PlatformStatus {
        if let Some(missing) = usages.iter().find(|u| !self.provides(u)) {
            log::error!(
                "Platform[static]: {} requests {:?} in cluster {}, not provided",
                schedulable.str_id(),
                missing.kind,
                missing.cluster
            );
            return PlatformStatus::MappingFailed;
        }
        self.mapped().insert(schedulable.id, usages.to_vec());
        PlatformStatus::Ok
    }

    fn exit(&self) -> PlatformStatus {
        self.mapped().clear();
        PlatformStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryLedger;
    use kiln_core::resource::ResourceKind;
    use kiln_core::schedulable::{Priority, SchedulableKind, SchedulableState};

    fn platform() -> StaticPlatform {
        StaticPlatform::new(vec![
            StaticResource {
                path: "sys0.cpu0.pe0".into(),
                kind: ResourceKind::ProcessingElement,
                capacity: 100,
                cluster: 0,
            },
            StaticResource {
                path: "sys0.mem0".into(),
                kind: ResourceKind::Memory,
                capacity: 1024,
                cluster: 0,
            },
        ])
    }

    fn schedulable() -> Schedulable {
        Schedulable {
            id: SchedulableId(5),
            name: "worker".into(),
            kind: SchedulableKind::Process,
            priority: Priority(0),
            state: SchedulableState::Sync,
            working_modes: Vec::new(),
            current_mode: None,
            next_mode: None,
            next_cluster: None,
        }
    }

    #[test]
    fn test_load_registers_resources_once() {
        let ledger = InMemoryLedger::new();
        let platform = platform();
        assert_eq!(platform.load_platform_data(&ledger), PlatformStatus::Ok);
        assert_eq!(platform.load_platform_data(&ledger), PlatformStatus::Ok);
        assert_eq!(ledger.resource_count(), 2);
    }

    #[test]
    fn test_empty_description_fails() {
        let ledger = InMemoryLedger::new();
        assert_eq!(
            StaticPlatform::new(Vec::new()).load_platform_data(&ledger),
            PlatformStatus::EnumerationFailed
        );
    }

    #[test]
    fn test_mapping_and_release() {
        let platform = platform();
        let s = schedulable();
        let usages = vec![ResourceUsage {
            kind: ResourceKind::ProcessingElement,
            cluster: 0,
            amount: 50,
        }];
        assert_eq!(platform.map_resources(&s, &usages, true), PlatformStatus::Ok);
        assert_eq!(platform.mapping(s.id), Some(usages));

        let foreign = vec![ResourceUsage {
            kind: ResourceKind::Accelerator,
            cluster: 0,
            amount: 1,
        }];
        assert_eq!(
            platform.map_resources(&s, &foreign, true),
            PlatformStatus::MappingFailed
        );
        // The previous binding is kept.
        assert_eq!(platform.mapped_count(), 1);

        assert_eq!(platform.release(&s), PlatformStatus::Ok);
        assert_eq!(platform.mapped_count(), 0);
    }
}
