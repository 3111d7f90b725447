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

//! In-memory registry of the managed applications and processes.

use kiln_core::schedulable::{
    ApplicationRegistry, RegistryError, RegistryResult, Schedulable, SchedulableId,
    SchedulableState,
};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Schedulables indexed by id.
#[derive(Debug, Default)]
pub struct InMemoryApplicationRegistry {
    entries: RwLock<BTreeMap<SchedulableId, Schedulable>>,
}

impl InMemoryApplicationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<SchedulableId, Schedulable>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<SchedulableId, Schedulable>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces a schedulable.
    pub fn insert(&self, schedulable: Schedulable) {
        log::debug!(
            "Registry: {} added [{}]",
            schedulable.str_id(),
            schedulable.state
        );
        self.write().insert(schedulable.id, schedulable);
    }

    /// A copy of the schedulable `id`.
    pub fn get(&self, id: SchedulableId) -> Option<Schedulable> {
        self.read().get(&id).cloned()
    }

    /// Number of registered schedulables.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Moves a disabled schedulable to READY.
    pub fn enable(&self, id: SchedulableId) -> RegistryResult<()> {
        self.transition(id, &[SchedulableState::Disabled], SchedulableState::Ready, |_| {})
    }

    /// Moves a ready or running schedulable to DISABLED.
    pub fn disable(&self, id: SchedulableId) -> RegistryResult<()> {
        self.transition(
            id,
            &[SchedulableState::Ready, SchedulableState::Running],
            SchedulableState::Disabled,
            |s| s.next_mode = None,
        )
    }

    fn transition(
        &self,
        id: SchedulableId,
        from: &[SchedulableState],
        to: SchedulableState,
        update: impl FnOnce(&mut Schedulable),
    ) -> RegistryResult<()> {
        let mut entries = self.write();
        let entry = entries.get_mut(&id).ok_or(RegistryError::Unknown(id))?;
        if !from.contains(&entry.state) {
            return Err(RegistryError::InvalidTransition {
                id,
                from: entry.state,
                to,
            });
        }
        log::debug!("Registry: {} {} -> {}", entry.str_id(), entry.state, to);
        entry.state = to;
        update(entry);
        Ok(())
    }
}

impl ApplicationRegistry for InMemoryApplicationRegistry {
    fn has_in_state(&self, state: SchedulableState) -> bool {
        self.read().values().any(|s| s.state == state)
    }

    fn highest_priority(&self, state: SchedulableState) -> Option<Schedulable> {
        self.read()
            .values()
            .filter(|s| s.state == state)
            .min_by_key(|s| (s.priority, s.id))
            .cloned()
    }

    fn all(&self) -> Vec<Schedulable> {
        self.read().values().cloned().collect()
    }

    fn schedule_request(&self, id: SchedulableId, mode: u8, cluster: u32) -> RegistryResult<()> {
        if let Some(s) = self.read().get(&id) {
            if s.working_mode(mode).is_none() {
                return Err(RegistryError::UnknownWorkingMode(id, mode));
            }
        }
        self.transition(
            id,
            &[SchedulableState::Ready, SchedulableState::Running],
            SchedulableState::Sync,
            |s| {
                s.next_mode = Some(mode);
                s.next_cluster = Some(cluster);
            },
        )
    }

    fn sync_commit(&self, id: SchedulableId) -> RegistryResult<()> {
        self.transition(id, &[SchedulableState::Sync], SchedulableState::Running, |s| {
            s.current_mode = s.next_mode.take();
        })
    }

    fn unschedule(&self, id: SchedulableId) -> RegistryResult<()> {
        self.transition(id, &[SchedulableState::Running], SchedulableState::Ready, |s| {
            s.current_mode = None;
            s.next_cluster = None;
        })
    }

    fn destroy(&self, id: SchedulableId) -> RegistryResult<()> {
        let mut entries = self.write();
        let entry = entries.get_mut(&id).ok_or(RegistryError::Unknown(id))?;
        log::debug!("Registry: {} destroyed", entry.str_id());
        entry.state = SchedulableState::Finished;
        entry.current_mode = None;
        entry.next_mode = None;
        entry.next_cluster = None;
        Ok(())
    }
}
