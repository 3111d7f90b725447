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

//! Registry for managing metrics.

use crate::storage::{backend::MetricsBackend, memory_backend::InMemoryBackend};
use kiln_core::telemetry::{
    Metric, MetricId, MetricType, MetricsError, MetricsResult, SampleStats,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Central registry for the resource manager metrics
///
/// Modules register their metrics once at construction time and keep the
/// returned typed handles; the registry itself is used for queries and
/// dumps. Registering an already known ID returns a handle to the existing
/// metric without resetting it.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    backend: Arc<dyn MetricsBackend>,
}

impl MetricsRegistry {
    /// Create a new metrics registry with the default in-memory backend
    pub fn new() -> Self {
        Self {
            backend: Arc::new(InMemoryBackend::new()),
        }
    }

    /// Create a new metrics registry with a custom backend
    pub fn with_backend(backend: Arc<dyn MetricsBackend>) -> Self {
        Self { backend }
    }

    fn ensure(&self, metric: Metric) -> MetricsResult<MetricId> {
        let id = metric.metadata.id.clone();
        if !self.backend.contains_metric(&id) {
            self.backend.put_metric(metric)?;
        }
        Ok(id)
    }

    /// Register a new counter metric
    pub fn register_counter(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> MetricsResult<CounterHandle> {
        let id = MetricId::new(namespace, name);
        let id = self.ensure(Metric::new_counter(id, description, 0))?;
        Ok(CounterHandle::new(id, self.backend.clone()))
    }

    /// Register a new gauge metric
    pub fn register_gauge(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> MetricsResult<GaugeHandle> {
        let id = MetricId::new(namespace, name);
        let id = self.ensure(Metric::new_gauge(id, description, unit, 0.0))?;
        Ok(GaugeHandle::new(id, self.backend.clone()))
    }

    /// Register a new sample metric
    pub fn register_sample(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> MetricsResult<SampleHandle> {
        let id = MetricId::new(namespace, name);
        let id = self.ensure(Metric::new_sample(id, description, unit))?;
        Ok(SampleHandle::new(id, self.backend.clone()))
    }

    /// Register a new period metric
    pub fn register_period(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> MetricsResult<PeriodHandle> {
        let id = MetricId::new(namespace, name);
        let id = self.ensure(Metric::new_period(id, description))?;
        Ok(PeriodHandle::new(id, self.backend.clone()))
    }

    /// Get a metric by ID
    pub fn get_metric(&self, id: &MetricId) -> MetricsResult<Metric> {
        self.backend.get_metric(id)
    }

    /// Check if a metric exists
    pub fn contains_metric(&self, id: &MetricId) -> bool {
        self.backend.contains_metric(id)
    }

    /// Current value of a counter, `None` if unknown or not a counter
    pub fn counter_value(&self, namespace: &str, name: &str) -> Option<u64> {
        self.backend
            .get_metric(&MetricId::new(namespace, name))
            .ok()
            .and_then(|m| m.value.as_counter())
    }

    /// Get all metrics in a namespace, sorted by ID
    pub fn get_namespace_metrics(&self, namespace: &str) -> Vec<Metric> {
        let mut metrics: Vec<Metric> = self
            .backend
            .list_all_metrics()
            .into_iter()
            .filter(|m| m.metadata.id.namespace == namespace)
            .collect();
        metrics.sort_by(|a, b| a.metadata.id.cmp(&b.metadata.id));
        metrics
    }

    /// Renders every metric, one per line, sorted by ID
    pub fn dump(&self) -> String {
        let mut metrics = self.backend.list_all_metrics();
        metrics.sort_by(|a, b| a.metadata.id.cmp(&b.metadata.id));
        metrics
            .iter()
            .map(Metric::summary)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Get the total number of metrics
    pub fn metric_count(&self) -> usize {
        self.backend.metric_count()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for efficient counter operations
#[derive(Debug, Clone)]
pub struct CounterHandle {
    id: MetricId,
    backend: Arc<dyn MetricsBackend>,
}

impl CounterHandle {
    fn new(id: MetricId, backend: Arc<dyn MetricsBackend>) -> Self {
        Self { id, backend }
    }

    /// Increment the counter by 1
    pub fn increment(&self) -> MetricsResult<u64> {
        self.backend.increment_counter(&self.id, 1)
    }

    /// Increment the counter by a specific amount
    pub fn increment_by(&self, amount: u64) -> MetricsResult<u64> {
        self.backend.increment_counter(&self.id, amount)
    }

    /// Get the current counter value
    pub fn get(&self) -> MetricsResult<u64> {
        let metric = self.backend.get_metric(&self.id)?;
        metric
            .value
            .as_counter()
            .ok_or_else(|| MetricsError::TypeMismatch {
                expected: MetricType::Counter,
                found: metric.value.metric_type(),
            })
    }

    /// Get the metric ID
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}

/// Handle for efficient gauge operations
#[derive(Debug, Clone)]
pub struct GaugeHandle {
    id: MetricId,
    backend: Arc<dyn MetricsBackend>,
}

impl GaugeHandle {
    fn new(id: MetricId, backend: Arc<dyn MetricsBackend>) -> Self {
        Self { id, backend }
    }

    /// Set the gauge to a specific value
    pub fn set(&self, value: f64) -> MetricsResult<()> {
        self.backend.set_gauge(&self.id, value)
    }

    /// Get the current gauge value
    pub fn get(&self) -> MetricsResult<f64> {
        let metric = self.backend.get_metric(&self.id)?;
        metric
            .value
            .as_gauge()
            .ok_or_else(|| MetricsError::TypeMismatch {
                expected: MetricType::Gauge,
                found: metric.value.metric_type(),
            })
    }

    /// Get the metric ID
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}

/// Handle for sample metrics
#[derive(Debug, Clone)]
pub struct SampleHandle {
    id: MetricId,
    backend: Arc<dyn MetricsBackend>,
}

impl SampleHandle {
    fn new(id: MetricId, backend: Arc<dyn MetricsBackend>) -> Self {
        Self { id, backend }
    }

    /// Record a sample
    pub fn observe(&self, value: f64) -> MetricsResult<()> {
        self.backend.record_sample(&self.id, value)
    }

    /// Record a duration, in milliseconds
    pub fn observe_duration(&self, duration: Duration) -> MetricsResult<()> {
        self.observe(duration.as_secs_f64() * 1000.0)
    }

    /// Statistics of the recorded samples
    pub fn stats(&self) -> MetricsResult<SampleStats> {
        let metric = self.backend.get_metric(&self.id)?;
        metric
            .value
            .as_stats()
            .copied()
            .ok_or_else(|| MetricsError::TypeMismatch {
                expected: MetricType::Sample,
                found: metric.value.metric_type(),
            })
    }

    /// Get the metric ID
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}

/// Handle for period metrics
#[derive(Debug, Clone)]
pub struct PeriodHandle {
    id: MetricId,
    backend: Arc<dyn MetricsBackend>,
}

impl PeriodHandle {
    fn new(id: MetricId, backend: Arc<dyn MetricsBackend>) -> Self {
        Self { id, backend }
    }

    /// Mark an occurrence now, returning the time elapsed since the
    /// previous one (`None` on the first occurrence)
    pub fn tick(&self) -> MetricsResult<Option<Duration>> {
        self.backend.tick_period(&self.id, Instant::now())
    }

    /// Statistics of the observed periods, in milliseconds
    pub fn stats(&self) -> MetricsResult<SampleStats> {
        let metric = self.backend.get_metric(&self.id)?;
        metric
            .value
            .as_stats()
            .copied()
            .ok_or_else(|| MetricsError::TypeMismatch {
                expected: MetricType::Period,
                found: metric.value.metric_type(),
            })
    }

    /// Get the metric ID
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}
