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

//! Fans every platform operation out to a set of proxies.

use kiln_core::platform::{PlatformProxy, PlatformStatus};
use kiln_core::resource::{ResourceLedger, ResourceUsage};
use kiln_core::schedulable::Schedulable;
use std::sync::Arc;

/// Aggregates several platform proxies behind one.
///
/// Operations run on the proxies in registration order. Loading, setup and
/// mapping stop at the first failure; release, reclaim and exit visit every
/// proxy. In both cases the first non-OK status is returned.
#[derive(Default)]
pub struct PlatformManager {
    proxies: Vec<Arc<dyn PlatformProxy>>,
}

impl PlatformManager {
    /// Creates a manager with no proxy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a proxy.
    pub fn with_proxy(mut self, proxy: Arc<dyn PlatformProxy>) -> Self {
        self.proxies.push(proxy);
        self
    }

    /// Names of the proxies, in order.
    pub fn proxy_names(&self) -> Vec<String> {
        self.proxies.iter().map(|p| p.name().to_string()).collect()
    }

    fn until_failure(&self, op: impl Fn(&dyn PlatformProxy) -> PlatformStatus) -> PlatformStatus {
        for proxy in &self.proxies {
            let status = op(proxy.as_ref());
            if !status.is_ok() {
                log::warn!("Platform[{}]: {}", proxy.name(), status);
                return status;
            }
        }
        PlatformStatus::Ok
    }

    fn all(&self, op: impl Fn(&dyn PlatformProxy) -> PlatformStatus) -> PlatformStatus {
        let mut first = PlatformStatus::Ok;
        for proxy in &self.proxies {
            let status = op(proxy.as_ref());
            if !status.is_ok() {
                log::warn!("Platform[{}]: {}", proxy.name(), status);
                if first.is_ok() {
                    first = status;
                }
            }
        }
        first
    }
}

impl PlatformProxy for PlatformManager {
    fn name(&self) -> &str {
        "platforms"
    }

    fn load_platform_data(&self, ledger: &dyn ResourceLedger) -> PlatformStatus {
        if self.proxies.is_empty() {
            log::error!("Platform: no proxy registered");
            return PlatformStatus::EnumerationFailed;
        }
        self.until_failure(|p| p.load_platform_data(ledger))
    }

    fn setup(&self, schedulable: &Schedulable) -> PlatformStatus {
        self.until_failure(|p| p.setup(schedulable))
    }

    fn release(&self, schedulable: &Schedulable) -> PlatformStatus {
        self.all(|p| p.release(schedulable))
    }

    fn reclaim_resources(&self, schedulable: &Schedulable) -> PlatformStatus {
        self.all(|p| p.reclaim_resources(schedulable))
    }

    fn map_resources(
        &self,
        schedulable: &Schedulable,
        usages: &[ResourceUsage],
        exclusive: bool,
    ) -> PlatformStatus {
        self.until_failure(|p| p.map_resources(schedulable, usages, exclusive))
    }

    fn exit(&self) -> PlatformStatus {
        self.all(|p| p.exit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        status: PlatformStatus,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, status: PlatformStatus) -> Arc<Self> {
            Arc::new(Self {
                name,
                status,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl PlatformProxy for Scripted {
        fn name(&self) -> &str {
            self.name
        }
        fn load_platform_data(&self, _: &dyn ResourceLedger) -> PlatformStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.status
        }
        fn map_resources(&self, _: &Schedulable, _: &[ResourceUsage], _: bool) -> PlatformStatus {
            self.status
        }
        fn exit(&self) -> PlatformStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.status
        }
    }

    #[test]
    fn test_empty_manager_fails_to_load() {
        let ledger = crate::InMemoryLedger::new();
        assert_eq!(
            PlatformManager::new().load_platform_data(&ledger),
            PlatformStatus::EnumerationFailed
        );
    }

    #[test]
    fn test_load_stops_at_first_failure() {
        let ledger = crate::InMemoryLedger::new();
        let a = Scripted::new("a", PlatformStatus::Ok);
        let b = Scripted::new("b", PlatformStatus::EnumerationFailed);
        let c = Scripted::new("c", PlatformStatus::Ok);
        let manager = PlatformManager::new()
            .with_proxy(a.clone())
            .with_proxy(b.clone())
            .with_proxy(c.clone());

        assert_eq!(
            manager.load_platform_data(&ledger),
            PlatformStatus::EnumerationFailed
        );
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.proxy_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_exit_visits_every_proxy() {
        let a = Scripted::new("a", PlatformStatus::Error);
        let b = Scripted::new("b", PlatformStatus::SetupFailed);
        let manager = PlatformManager::new()
            .with_proxy(a.clone())
            .with_proxy(b.clone());

        assert_eq!(manager.exit(), PlatformStatus::Error);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }
}
