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

//! The explicitly constructed set of collaborators shared by the manager.

use crate::workers::WorkerRegistry;
use kiln_core::platform::PlatformProxy;
use kiln_core::resource::ResourceLedger;
use kiln_core::schedulable::ApplicationRegistry;
use kiln_telemetry::MetricsRegistry;
use std::sync::Arc;

/// One instance of every collaborator of the resource manager.
///
/// Built once at startup and handed to the components that need it.
#[derive(Clone)]
pub struct SystemContext {
    /// The versioned resource ledger.
    pub ledger: Arc<dyn ResourceLedger>,
    /// Managed applications and processes.
    pub applications: Arc<dyn ApplicationRegistry>,
    /// The platform integration.
    pub platform: Arc<dyn PlatformProxy>,
    /// Metrics shared by every component.
    pub metrics: MetricsRegistry,
    /// Background workers to terminate on exit.
    pub workers: Arc<WorkerRegistry>,
}

impl SystemContext {
    /// Bundles the collaborators with a fresh metrics and worker registry.
    pub fn new(
        ledger: Arc<dyn ResourceLedger>,
        applications: Arc<dyn ApplicationRegistry>,
        platform: Arc<dyn PlatformProxy>,
    ) -> Self {
        Self {
            ledger,
            applications,
            platform,
            metrics: MetricsRegistry::new(),
            workers: Arc::new(WorkerRegistry::new()),
        }
    }

    /// Replaces the worker registry.
    pub fn with_workers(mut self, workers: Arc<WorkerRegistry>) -> Self {
        self.workers = workers;
        self
    }

    /// Replaces the metrics registry.
    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }
}
