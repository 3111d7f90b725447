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

//! The storage contract behind the metrics registry.

use kiln_core::telemetry::{
    Metric, MetricId, MetricType, MetricValue, MetricsError, MetricsResult,
};
use std::fmt::Debug;
use std::time::{Duration, Instant};

/// Trait defining the interface for metrics storage backends
pub trait MetricsBackend: Send + Sync + Debug + 'static {
    /// Store or replace a metric
    fn put_metric(&self, metric: Metric) -> MetricsResult<()>;

    /// Retrieve a copy of a metric by ID
    fn get_metric(&self, id: &MetricId) -> MetricsResult<Metric>;

    /// Check if a metric exists
    fn contains_metric(&self, id: &MetricId) -> bool;

    /// Apply an in-place update to a metric value.
    ///
    /// The update runs under the backend's write lock, so concurrent updates
    /// of the same metric are never lost.
    fn modify(
        &self,
        id: &MetricId,
        update: &mut dyn FnMut(&mut MetricValue) -> MetricsResult<()>,
    ) -> MetricsResult<()>;

    /// Get all metrics (potentially expensive operation)
    fn list_all_metrics(&self) -> Vec<Metric>;

    /// Clear all metrics
    fn clear_all(&self) -> MetricsResult<()>;

    /// Get the number of metrics stored
    fn metric_count(&self) -> usize;

    // Convenience methods for common operations

    /// Increment a counter by the given amount
    fn increment_counter(&self, id: &MetricId, delta: u64) -> MetricsResult<u64> {
        let mut result = 0;
        self.modify(id, &mut |value| match value {
            MetricValue::Counter(v) => {
                *v = v.saturating_add(delta);
                result = *v;
                Ok(())
            }
            other => Err(MetricsError::TypeMismatch {
                expected: MetricType::Counter,
                found: other.metric_type(),
            }),
        })?;
        Ok(result)
    }

    /// Set a gauge value
    fn set_gauge(&self, id: &MetricId, new_value: f64) -> MetricsResult<()> {
        self.modify(id, &mut |value| match value {
            MetricValue::Gauge(v) => {
                *v = new_value;
                Ok(())
            }
            other => Err(MetricsError::TypeMismatch {
                expected: MetricType::Gauge,
                found: other.metric_type(),
            }),
        })
    }

    /// Add a sample to a sample metric
    fn record_sample(&self, id: &MetricId, sample: f64) -> MetricsResult<()> {
        self.modify(id, &mut |value| match value {
            MetricValue::Sample(stats) => {
                stats.push(sample);
                Ok(())
            }
            other => Err(MetricsError::TypeMismatch {
                expected: MetricType::Sample,
                found: other.metric_type(),
            }),
        })
    }

    /// Tick a period metric, returning the period elapsed since the previous tick
    fn tick_period(&self, id: &MetricId, now: Instant) -> MetricsResult<Option<Duration>> {
        let mut period = None;
        self.modify(id, &mut |value| match value {
            MetricValue::Period { .. } => {
                period = value.tick(now);
                Ok(())
            }
            other => Err(MetricsError::TypeMismatch {
                expected: MetricType::Period,
                found: other.metric_type(),
            }),
        })?;
        Ok(period)
    }
}
