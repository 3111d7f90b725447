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

//! Enforces the committed schedule on the platform.

use kiln_core::control::{SyncOutcome, Synchronizer};
use kiln_core::platform::PlatformProxy;
use kiln_core::resource::ResourceLedger;
use kiln_core::schedulable::{ApplicationRegistry, SchedulableState};
use std::sync::Arc;

/// Maps the assignment of every schedulable pending synchronization
/// through the platform, then marks it running.
///
/// The first mapping failure fails the whole pass. Schedulables mapped
/// before it stay mapped: there is no rollback.
pub struct SyncManager {
    ledger: Arc<dyn ResourceLedger>,
    applications: Arc<dyn ApplicationRegistry>,
    platform: Arc<dyn PlatformProxy>,
}

impl SyncManager {
    /// Creates a synchronization manager.
    pub fn new(
        ledger: Arc<dyn ResourceLedger>,
        applications: Arc<dyn ApplicationRegistry>,
        platform: Arc<dyn PlatformProxy>,
    ) -> Self {
        Self {
            ledger,
            applications,
            platform,
        }
    }
}

impl Synchronizer for SyncManager {
    fn sync_schedule(&self) -> SyncOutcome {
        let mut pending: Vec<_> = self
            .applications
            .all()
            .into_iter()
            .filter(|s| s.state == SchedulableState::Sync)
            .collect();
        pending.sort_by_key(|s| (s.priority, s.id));

        for schedulable in &pending {
            let usages = self.ledger.assignment(schedulable.id).unwrap_or_default();
            let status = self.platform.map_resources(schedulable, &usages, true);
            if !status.is_ok() {
                log::error!(
                    "RM: mapping {} on [{}] failed: {}",
                    schedulable.str_id(),
                    self.platform.name(),
                    status
                );
                return SyncOutcome::Failed;
            }
            if let Err(e) = self.applications.sync_commit(schedulable.id) {
                log::error!("RM: sync commit of {} failed: {}", schedulable.str_id(), e);
                return SyncOutcome::Failed;
            }
            log::debug!("RM: {} synchronized", schedulable.str_id());
        }

        log::info!("RM: {} schedulable(s) synchronized", pending.len());
        SyncOutcome::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::platform::StaticResource;
    use kiln_core::resource::{ResourceAttributes, ResourceKind, ResourcePath, ResourceUsage};
    use kiln_core::schedulable::{Priority, Schedulable, SchedulableId, SchedulableKind};
    use kiln_infra::{InMemoryApplicationRegistry, InMemoryLedger, StaticPlatform};

    fn pending(id: u32, priority: u8) -> Schedulable {
        Schedulable {
            id: SchedulableId(id),
            name: format!("app{}", id),
            kind: SchedulableKind::Process,
            priority: Priority(priority),
            state: SchedulableState::Sync,
            working_modes: Vec::new(),
            current_mode: None,
            next_mode: Some(0),
            next_cluster: Some(0),
        }
    }

    fn usage(kind: ResourceKind, amount: u64) -> ResourceUsage {
        ResourceUsage {
            kind,
            cluster: 0,
            amount,
        }
    }

    struct Fixture {
        ledger: Arc<InMemoryLedger>,
        apps: Arc<InMemoryApplicationRegistry>,
        platform: Arc<StaticPlatform>,
        sync: SyncManager,
    }

    /// The ledger knows an accelerator the platform cannot bind.
    fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryLedger::new());
        for (path, kind) in [
            ("sys0.cpu0.pe0", ResourceKind::ProcessingElement),
            ("sys0.acc0", ResourceKind::Accelerator),
        ] {
            ledger
                .register_resource(ResourcePath::new(path), ResourceAttributes { kind, cluster: 0 }, 100)
                .unwrap();
        }
        let platform = Arc::new(StaticPlatform::new(vec![StaticResource {
            path: "sys0.cpu0.pe0".into(),
            kind: ResourceKind::ProcessingElement,
            capacity: 100,
            cluster: 0,
        }]));
        let apps = Arc::new(InMemoryApplicationRegistry::new());
        let sync = SyncManager::new(ledger.clone(), apps.clone(), platform.clone());
        Fixture {
            ledger,
            apps,
            platform,
            sync,
        }
    }

    fn commit(ledger: &InMemoryLedger, bookings: &[(u32, ResourceUsage)]) {
        let token = ledger.acquire_view().unwrap();
        for (id, u) in bookings {
            ledger
                .book(SchedulableId(*id), std::slice::from_ref(u), token)
                .unwrap();
        }
        ledger.commit_view(token).unwrap();
        ledger.release_view(token).unwrap();
    }

    #[test]
    fn test_all_pending_schedulables_are_synchronized() {
        let f = fixture();
        commit(
            &f.ledger,
            &[
                (1, usage(ResourceKind::ProcessingElement, 30)),
                (2, usage(ResourceKind::ProcessingElement, 50)),
            ],
        );
        f.apps.insert(pending(1, 1));
        f.apps.insert(pending(2, 0));

        assert_eq!(f.sync.sync_schedule(), SyncOutcome::Ok);
        for id in [1, 2] {
            let s = f.apps.get(SchedulableId(id)).unwrap();
            assert_eq!(s.state, SchedulableState::Running);
            assert_eq!(s.current_mode, Some(0));
        }
        assert_eq!(
            f.platform.mapping(SchedulableId(2)),
            Some(vec![usage(ResourceKind::ProcessingElement, 50)])
        );
    }

    #[test]
    fn test_mapping_failure_keeps_earlier_bindings() {
        let f = fixture();
        commit(
            &f.ledger,
            &[
                (1, usage(ResourceKind::ProcessingElement, 30)),
                (2, usage(ResourceKind::Accelerator, 10)),
            ],
        );
        f.apps.insert(pending(1, 0));
        f.apps.insert(pending(2, 1));

        assert_eq!(f.sync.sync_schedule(), SyncOutcome::Failed);

        // No rollback of the schedulable mapped first.
        assert_eq!(
            f.apps.get(SchedulableId(1)).map(|s| s.state),
            Some(SchedulableState::Running)
        );
        assert_eq!(f.platform.mapped_count(), 1);
        assert_eq!(
            f.apps.get(SchedulableId(2)).map(|s| s.state),
            Some(SchedulableState::Sync)
        );
    }

    #[test]
    fn test_nothing_pending() {
        let f = fixture();
        assert_eq!(f.sync.sync_schedule(), SyncOutcome::Ok);
        assert_eq!(f.platform.mapped_count(), 0);
    }
}
