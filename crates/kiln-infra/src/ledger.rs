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

//! In-memory, versioned resource ledger.

use kiln_core::resource::{
    LedgerError, LedgerResult, ResourceAttributes, ResourceKind, ResourceLedger, ResourcePath,
    ResourceSnapshot, ResourceUsage, ViewToken,
};
use kiln_core::schedulable::SchedulableId;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct Entry {
    path: ResourcePath,
    attributes: ResourceAttributes,
    capacity: u64,
}

#[derive(Debug, Clone)]
struct Booking {
    usages: Vec<ResourceUsage>,
    /// (resource index, amount) actually taken.
    allocations: Vec<(usize, u64)>,
}

/// Usage of every resource plus the bookings producing it.
#[derive(Debug, Clone, Default)]
struct LedgerState {
    used: Vec<u64>,
    bookings: BTreeMap<SchedulableId, Booking>,
}

impl LedgerState {
    fn free(&mut self, owner: SchedulableId) {
        if let Some(booking) = self.bookings.remove(&owner) {
            for (index, amount) in booking.allocations {
                self.used[index] = self.used[index].saturating_sub(amount);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    resources: Vec<Entry>,
    index: HashMap<ResourcePath, usize>,
    system: LedgerState,
    views: HashMap<ViewToken, LedgerState>,
    next_token: u64,
    released: u64,
}

impl Inner {
    fn view(&self, token: ViewToken) -> LedgerResult<&LedgerState> {
        self.views.get(&token).ok_or(LedgerError::UnknownView(token))
    }

    fn snapshot_of(&self, state: &LedgerState) -> Vec<ResourceSnapshot> {
        self.resources
            .iter()
            .zip(&state.used)
            .map(|(entry, used)| ResourceSnapshot {
                path: entry.path.clone(),
                attributes: entry.attributes,
                capacity: entry.capacity,
                used: *used,
            })
            .collect()
    }
}

/// Resource ledger keeping the system state and the open views in memory.
///
/// A view starts clean, with every resource free and no booking. Bookings
/// made through a view stay private until it is committed, which replaces
/// the whole system state. Tokens are issued from a monotonically increasing counter
/// and never reused.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: Mutex<Inner>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of views acquired and not yet released.
    pub fn open_views(&self) -> usize {
        self.lock().views.len()
    }

    /// Number of views issued so far.
    pub fn issued_views(&self) -> u64 {
        self.lock().next_token
    }

    /// Number of views released so far.
    pub fn released_views(&self) -> u64 {
        self.lock().released
    }

    /// Number of registered resources.
    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }
}

impl ResourceLedger for InMemoryLedger {
    fn register_resource(
        &self,
        path: ResourcePath,
        attributes: ResourceAttributes,
        capacity: u64,
    ) -> LedgerResult<()> {
        let mut inner = self.lock();
        if inner.index.contains_key(&path) {
            return Err(LedgerError::Duplicate(path));
        }
        let index = inner.resources.len();
        log::debug!("Ledger: registered {} [{}]", path, capacity);
        inner.index.insert(path.clone(), index);
        inner.resources.push(Entry {
            path,
            attributes,
            capacity,
        });
        inner.system.used.push(0);
        for view in inner.views.values_mut() {
            view.used.push(0);
        }
        Ok(())
    }

    fn acquire_view(&self) -> LedgerResult<ViewToken> {
        let mut inner = self.lock();
        inner.next_token += 1;
        let token = ViewToken::from_raw(inner.next_token);
        let state = LedgerState {
            used: vec![0; inner.resources.len()],
            bookings: BTreeMap::new(),
        };
        inner.views.insert(token, state);
        Ok(token)
    }

    fn release_view(&self, token: ViewToken) -> LedgerResult<()> {
        let mut inner = self.lock();
        inner
            .views
            .remove(&token)
            .ok_or(LedgerError::UnknownView(token))?;
        inner.released += 1;
        Ok(())
    }

    fn commit_view(&self, token: ViewToken) -> LedgerResult<()> {
        let mut inner = self.lock();
        let state = inner.view(token)?.clone();
        inner.system = state;
        log::debug!("Ledger: {} committed", token);
        Ok(())
    }

    fn available(&self, path: &ResourcePath, token: ViewToken) -> LedgerResult<u64> {
        let inner = self.lock();
        let index = *inner
            .index
            .get(path)
            .ok_or_else(|| LedgerError::UnknownResource(path.clone()))?;
        let used = inner.view(token)?.used[index];
        Ok(inner.resources[index].capacity.saturating_sub(used))
    }

    fn book(
        &self,
        owner: SchedulableId,
        usages: &[ResourceUsage],
        token: ViewToken,
    ) -> LedgerResult<()> {
        let mut inner = self.lock();
        let mut state = inner.view(token)?.clone();
        state.free(owner);

        let mut allocations = Vec::new();
        for usage in usages {
            let mut remaining = usage.amount;
            for (index, entry) in inner.resources.iter().enumerate() {
                if remaining == 0 {
                    break;
                }
                if entry.attributes.kind != usage.kind || entry.attributes.cluster != usage.cluster
                {
                    continue;
                }
                let free = entry.capacity.saturating_sub(state.used[index]);
                let take = free.min(remaining);
                if take > 0 {
                    state.used[index] += take;
                    allocations.push((index, take));
                    remaining -= take;
                }
            }
            if remaining > 0 {
                return Err(LedgerError::Insufficient {
                    kind: usage.kind,
                    cluster: usage.cluster,
                    requested: usage.amount,
                    available: usage.amount - remaining,
                });
            }
        }

        state.bookings.insert(
            owner,
            Booking {
                usages: usages.to_vec(),
                allocations,
            },
        );
        inner.views.insert(token, state);
        Ok(())
    }

    fn assignment(&self, owner: SchedulableId) -> Option<Vec<ResourceUsage>> {
        self.lock()
            .system
            .bookings
            .get(&owner)
            .map(|b| b.usages.clone())
    }

    fn reclaim(&self, owner: SchedulableId) {
        self.lock().system.free(owner);
    }

    fn snapshot(&self, token: Option<ViewToken>) -> LedgerResult<Vec<ResourceSnapshot>> {
        let inner = self.lock();
        let state = match token {
            Some(token) => inner.view(token)?,
            None => &inner.system,
        };
        Ok(inner.snapshot_of(state))
    }

    fn available_in(&self, kind: ResourceKind, cluster: u32, token: ViewToken) -> LedgerResult<u64> {
        let inner = self.lock();
        let state = inner.view(token)?;
        Ok(inner
            .resources
            .iter()
            .zip(&state.used)
            .filter(|(e, _)| e.attributes.kind == kind && e.attributes.cluster == cluster)
            .map(|(e, used)| e.capacity.saturating_sub(*used))
            .sum())
    }
}
