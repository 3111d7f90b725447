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

//! Host resource discovery based on `sysinfo`.

use kiln_core::platform::{PlatformProxy, PlatformStatus};
use kiln_core::resource::{
    LedgerError, ResourceAttributes, ResourceKind, ResourceLedger, ResourcePath, ResourceUsage,
};
use kiln_core::schedulable::Schedulable;
use sysinfo::System;

/// Capacity of one processing element, in percent of a core.
pub const PE_CAPACITY: u64 = 100;

const MIB: u64 = 1024 * 1024;

/// Discovers the CPU cores and memory of the local host.
///
/// Each logical CPU becomes a processing element `sys0.cpu0.pe<N>` with a
/// capacity of 100; the physical memory becomes `sys0.mem0`, in MiB. Every
/// resource belongs to cluster 0. Bindings are accepted but not enforced.
#[derive(Debug, Default)]
pub struct HostPlatform;

impl HostPlatform {
    /// Creates the host platform proxy.
    pub fn new() -> Self {
        Self
    }

    fn register(
        ledger: &dyn ResourceLedger,
        path: String,
        kind: ResourceKind,
        capacity: u64,
    ) -> Result<(), LedgerError> {
        let attributes = ResourceAttributes { kind, cluster: 0 };
        match ledger.register_resource(ResourcePath::new(path), attributes, capacity) {
            Ok(()) | Err(LedgerError::Duplicate(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl PlatformProxy for HostPlatform {
    fn name(&self) -> &str {
        "host"
    }

    fn load_platform_data(&self, ledger: &dyn ResourceLedger) -> PlatformStatus {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();

        let cpus = system.cpus().len();
        if cpus == 0 {
            log::error!("Platform[host]: no CPU found");
            return PlatformStatus::EnumerationFailed;
        }

        for pe in 0..cpus {
            let path = format!("sys0.cpu0.pe{}", pe);
            if let Err(e) = Self::register(ledger, path, ResourceKind::ProcessingElement, PE_CAPACITY)
            {
                log::error!("Platform[host]: {}", e);
                return PlatformStatus::EnumerationFailed;
            }
        }

        let memory = system.total_memory() / MIB;
        if memory > 0 {
            if let Err(e) = Self::register(ledger, "sys0.mem0".to_string(), ResourceKind::Memory, memory)
            {
                log::error!("Platform[host]: {}", e);
                return PlatformStatus::EnumerationFailed;
            }
        }

        log::info!(
            "Platform[host]: {} processing element(s), {} MiB memory",
            cpus,
            memory
        );
        PlatformStatus::Ok
    }

    fn map_resources(
        &self,
        schedulable: &Schedulable,
        usages: &[ResourceUsage],
        exclusive: bool,
    ) -> PlatformStatus {
        log::debug!(
            "Platform[host]: {} mapped on {:?} (exclusive: {})",
            schedulable.str_id(),
            usages,
            exclusive
        );
        PlatformStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryLedger;

    #[test]
    fn test_host_discovery_registers_processing_elements() {
        let ledger = InMemoryLedger::new();
        let host = HostPlatform::new();
        assert_eq!(host.load_platform_data(&ledger), PlatformStatus::Ok);

        let resources = ledger.snapshot(None).unwrap();
        let pes = resources
            .iter()
            .filter(|r| r.attributes.kind == ResourceKind::ProcessingElement)
            .count();
        assert!(pes >= 1);
        assert!(resources
            .iter()
            .any(|r| r.path.as_str() == "sys0.cpu0.pe0" && r.capacity == PE_CAPACITY));

        // Loading twice is harmless.
        assert_eq!(host.load_platform_data(&ledger), PlatformStatus::Ok);
        assert_eq!(ledger.snapshot(None).unwrap().len(), resources.len());
    }
}
