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

//! Contracts of the resource ledger.
//!
//! The ledger accounts every managed resource (processing elements, memory,
//! accelerators) and lets a scheduling run stage tentative bindings into a
//! private, versioned *view* before committing them as the new system state.

use crate::schedulable::SchedulableId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hierarchical resource identifier, e.g. `sys0.cpu0.pe3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourcePath(String);

impl ResourcePath {
    /// Creates a path from its textual form.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns the textual form of the path.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of a managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A CPU core; capacity is expressed as a percentage of one core.
    ProcessingElement,
    /// Memory, in bytes.
    Memory,
    /// An accelerator device (GPU, FPGA, ...).
    Accelerator,
}

/// Static attributes attached to a resource when it is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAttributes {
    /// The kind of the resource.
    pub kind: ResourceKind,
    /// The cluster the resource belongs to, for locality-aware binding.
    pub cluster: u32,
}

/// An amount of a resource kind bound inside one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// The kind of resource requested.
    pub kind: ResourceKind,
    /// The cluster the amount is bound to.
    pub cluster: u32,
    /// The requested amount.
    pub amount: u64,
}

/// Opaque handle identifying one resource view.
///
/// Tokens are issued in strictly increasing order and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewToken(u64);

impl ViewToken {
    /// Wraps a raw token value. Only ledgers should mint tokens.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw token value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ViewToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

/// A point-in-time description of one registered resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    /// The resource identifier.
    pub path: ResourcePath,
    /// Static attributes.
    pub attributes: ResourceAttributes,
    /// Total registered capacity.
    pub capacity: u64,
    /// Amount currently booked in the inspected view.
    pub used: u64,
}

impl ResourceSnapshot {
    /// Residual availability of the resource.
    pub fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }
}

/// A specialized `Result` type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// An error raised by the resource ledger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The token does not identify a live view.
    #[error("unknown resource view {0}")]
    UnknownView(ViewToken),
    /// A resource with the same path is already registered.
    #[error("resource {0} already registered")]
    Duplicate(ResourcePath),
    /// The resource path is not registered.
    #[error("unknown resource {0}")]
    UnknownResource(ResourcePath),
    /// Not enough residual availability to satisfy a booking.
    #[error("insufficient {kind:?} in cluster {cluster}: requested {requested}, available {available}")]
    Insufficient {
        /// Kind of the exhausted resource.
        kind: ResourceKind,
        /// Cluster where the booking was attempted.
        cluster: u32,
        /// Requested amount.
        requested: u64,
        /// Residual availability.
        available: u64,
    },
}

/// The resource accounting ledger.
///
/// Mutations are staged into views identified by a [`ViewToken`]. A caller
/// holding a token must release it exactly once, after committing or
/// discarding its content.
pub trait ResourceLedger: Send + Sync {
    /// Registers a new resource with its total capacity.
    fn register_resource(
        &self,
        path: ResourcePath,
        attributes: ResourceAttributes,
        capacity: u64,
    ) -> LedgerResult<()>;

    /// Opens a new clean view: every resource free and nothing booked.
    fn acquire_view(&self) -> LedgerResult<ViewToken>;

    /// Drops a view. Committed content survives, staged content is discarded.
    fn release_view(&self, token: ViewToken) -> LedgerResult<()>;

    /// Promotes the content of a view to the committed system state.
    fn commit_view(&self, token: ViewToken) -> LedgerResult<()>;

    /// Residual availability of one resource in the given view.
    fn available(&self, path: &ResourcePath, token: ViewToken) -> LedgerResult<u64>;

    /// Books usages for a schedulable into the given view, replacing any
    /// previous booking of the same owner in that view.
    fn book(
        &self,
        owner: SchedulableId,
        usages: &[ResourceUsage],
        token: ViewToken,
    ) -> LedgerResult<()>;

    /// Returns the usages booked by a schedulable in the committed state.
    fn assignment(&self, owner: SchedulableId) -> Option<Vec<ResourceUsage>>;

    /// Removes every booking of a schedulable from the committed state.
    fn reclaim(&self, owner: SchedulableId);

    /// Snapshot of all registered resources as seen from the given view,
    /// or from the committed state when `token` is `None`.
    fn snapshot(&self, token: Option<ViewToken>) -> LedgerResult<Vec<ResourceSnapshot>>;

    /// Sorted identifiers of the clusters holding at least one resource.
    fn clusters(&self) -> Vec<u32> {
        let mut clusters: Vec<u32> = self
            .snapshot(None)
            .unwrap_or_default()
            .iter()
            .map(|s| s.attributes.cluster)
            .collect();
        clusters.sort_unstable();
        clusters.dedup();
        clusters
    }

    /// Residual availability of a resource kind within one cluster.
    fn available_in(&self, kind: ResourceKind, cluster: u32, token: ViewToken) -> LedgerResult<u64> {
        Ok(self
            .snapshot(Some(token))?
            .iter()
            .filter(|s| s.attributes.kind == kind && s.attributes.cluster == cluster)
            .map(ResourceSnapshot::available)
            .sum())
    }
}

/// Scoped ownership of one resource view.
///
/// The view is acquired on construction and released exactly once when the
/// guard is dropped, on success and error paths alike.
pub struct ViewGuard<'a> {
    ledger: &'a dyn ResourceLedger,
    token: ViewToken,
}

impl<'a> ViewGuard<'a> {
    /// Acquires a fresh view from the ledger.
    pub fn acquire(ledger: &'a dyn ResourceLedger) -> LedgerResult<Self> {
        let token = ledger.acquire_view()?;
        log::debug!("Ledger: acquired {}", token);
        Ok(Self { ledger, token })
    }

    /// The token of the owned view.
    pub fn token(&self) -> ViewToken {
        self.token
    }

    /// Promotes the staged content to the committed system state.
    pub fn commit(&self) -> LedgerResult<()> {
        self.ledger.commit_view(self.token)
    }
}

impl Drop for ViewGuard<'_> {
    fn drop(&mut self) {
        match self.ledger.release_view(self.token) {
            Ok(()) => log::debug!("Ledger: released {}", self.token),
            Err(e) => log::error!("Ledger: failed to release {}: {}", self.token, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_available_saturates() {
        let snapshot = ResourceSnapshot {
            path: ResourcePath::new("sys0.cpu0.pe0"),
            attributes: ResourceAttributes {
                kind: ResourceKind::ProcessingElement,
                cluster: 0,
            },
            capacity: 100,
            used: 120,
        };
        assert_eq!(snapshot.available(), 0);
    }

    #[test]
    fn test_view_token_ordering() {
        let a = ViewToken::from_raw(1);
        let b = ViewToken::from_raw(2);
        assert!(a < b);
        assert_eq!(b.raw(), 2);
        assert_eq!(a.to_string(), "view#1");
    }

    #[test]
    fn test_insufficient_error_message() {
        let err = LedgerError::Insufficient {
            kind: ResourceKind::Memory,
            cluster: 1,
            requested: 10,
            available: 4,
        };
        assert!(err.to_string().contains("requested 10"));
    }
}
