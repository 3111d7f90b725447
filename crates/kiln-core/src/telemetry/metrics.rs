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

//! Abstract definitions for resource manager metrics.

use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A unique, structured identifier for a metric.
///
/// A `MetricId` is composed of a namespace (the owning module, e.g. `rm`)
/// and a dotted name (e.g. `evt.per.start`), plus optional labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId {
    /// The owning module (e.g., "rm", "yamca").
    pub namespace: String,
    /// The specific name of the metric (e.g., "sch.failed").
    pub name: String,
    /// Optional, sorted key-value pairs for dimensional filtering.
    pub labels: Vec<(String, String)>,
}

impl MetricId {
    /// Creates a new `MetricId` with a namespace and a name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            labels: Vec::new(),
        }
    }

    /// Adds a dimensional label to the metric ID, returning a new `MetricId`.
    /// Labels are kept sorted by key for consistent hashing and display.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self.labels.sort_by(|a, b| a.0.cmp(&b.0));
        self
    }

    /// Returns a formatted string representation of the ID (e.g., "rm.sch.tot[k=v]").
    pub fn to_string_formatted(&self) -> String {
        if self.labels.is_empty() {
            format!("{}.{}", self.namespace, self.name)
        } else {
            let labels_str = self
                .labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",");
            format!("{}.{}[{}]", self.namespace, self.name, labels_str)
        }
    }
}

impl Display for MetricId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_formatted())
    }
}

/// The fundamental type of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    /// A value that only ever increases (e.g., number of scheduling runs).
    Counter,
    /// A value that can go up or down (e.g., size of the ordering map).
    Gauge,
    /// Running statistics over a stream of samples (e.g., handler time).
    Sample,
    /// Running statistics over the time elapsed between successive ticks.
    Period,
}

/// Running statistics over a stream of samples.
///
/// Mean and variance are updated incrementally (Welford), so no sample is
/// retained.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleStats {
    /// Number of samples recorded.
    pub count: u64,
    /// Arithmetic mean of the samples.
    pub mean: f64,
    /// Smallest sample, `0.0` when empty.
    pub min: f64,
    /// Largest sample, `0.0` when empty.
    pub max: f64,
    m2: f64,
}

impl SampleStats {
    /// Adds a sample.
    pub fn push(&mut self, sample: f64) {
        if self.count == 0 {
            self.min = sample;
            self.max = sample;
        } else {
            self.min = self.min.min(sample);
            self.max = self.max.max(sample);
        }
        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample - self.mean);
    }

    /// Population variance of the samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        self.m2 / self.count as f64
    }
}

/// An enumeration of possible metric values.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// A 64-bit unsigned integer for counters.
    Counter(u64),
    /// A 64-bit float for gauges.
    Gauge(f64),
    /// Statistics over recorded samples.
    Sample(SampleStats),
    /// Statistics over inter-tick periods, in milliseconds.
    Period {
        /// Instant of the previous tick, if any.
        last: Option<Instant>,
        /// Statistics of the observed periods.
        stats: SampleStats,
    },
}

impl MetricValue {
    /// Returns the [`MetricType`] corresponding to this value.
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricValue::Counter(_) => MetricType::Counter,
            MetricValue::Gauge(_) => MetricType::Gauge,
            MetricValue::Sample(_) => MetricType::Sample,
            MetricValue::Period { .. } => MetricType::Period,
        }
    }

    /// Returns the value as a `u64` if it is a `Counter`.
    pub fn as_counter(&self) -> Option<u64> {
        match self {
            MetricValue::Counter(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as an `f64` if it is a `Gauge`.
    pub fn as_gauge(&self) -> Option<f64> {
        match self {
            MetricValue::Gauge(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the statistics of a `Sample` or `Period` metric.
    pub fn as_stats(&self) -> Option<&SampleStats> {
        match self {
            MetricValue::Sample(stats) | MetricValue::Period { stats, .. } => Some(stats),
            _ => None,
        }
    }

    /// Records a tick on a `Period` value and returns the elapsed period.
    ///
    /// The first tick only arms the period and returns `None`.
    pub fn tick(&mut self, now: Instant) -> Option<Duration> {
        match self {
            MetricValue::Period { last, stats } => {
                let period = last.map(|prev| now.saturating_duration_since(prev));
                if let Some(period) = period {
                    stats.push(period.as_secs_f64() * 1000.0);
                }
                *last = Some(now);
                period
            }
            _ => None,
        }
    }
}

/// Descriptive, static metadata about a metric.
#[derive(Debug, Clone)]
pub struct MetricMetadata {
    /// The metric's unique identifier.
    pub id: MetricId,
    /// The type of the metric.
    pub metric_type: MetricType,
    /// A human-readable description of what the metric measures.
    pub description: String,
    /// The unit of measurement (e.g., "ms", "count").
    pub unit: String,
    /// The timestamp when this metric was last updated.
    pub last_updated: Instant,
}

impl MetricMetadata {
    /// Creates new metadata for a metric.
    pub fn new(
        id: MetricId,
        metric_type: MetricType,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            id,
            metric_type,
            description: description.into(),
            unit: unit.into(),
            last_updated: Instant::now(),
        }
    }

    /// Updates the `last_updated` timestamp to the current time.
    pub fn update_timestamp(&mut self) {
        self.last_updated = Instant::now();
    }
}

/// A complete metric entry, combining its value with its descriptive metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The static, descriptive metadata for the metric.
    pub metadata: MetricMetadata,
    /// The current, dynamic value of the metric.
    pub value: MetricValue,
}

impl Metric {
    /// A convenience constructor for creating a new `Counter` metric.
    pub fn new_counter(id: MetricId, description: impl Into<String>, initial_value: u64) -> Self {
        Self {
            metadata: MetricMetadata::new(id, MetricType::Counter, description, "count"),
            value: MetricValue::Counter(initial_value),
        }
    }

    /// A convenience constructor for creating a new `Gauge` metric.
    pub fn new_gauge(
        id: MetricId,
        description: impl Into<String>,
        unit: impl Into<String>,
        initial_value: f64,
    ) -> Self {
        Self {
            metadata: MetricMetadata::new(id, MetricType::Gauge, description, unit),
            value: MetricValue::Gauge(initial_value),
        }
    }

    /// A convenience constructor for creating a new `Sample` metric.
    pub fn new_sample(id: MetricId, description: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            metadata: MetricMetadata::new(id, MetricType::Sample, description, unit),
            value: MetricValue::Sample(SampleStats::default()),
        }
    }

    /// A convenience constructor for creating a new `Period` metric.
    pub fn new_period(id: MetricId, description: impl Into<String>) -> Self {
        Self {
            metadata: MetricMetadata::new(id, MetricType::Period, description, "ms"),
            value: MetricValue::Period {
                last: None,
                stats: SampleStats::default(),
            },
        }
    }

    /// Renders the metric as one line of a metrics dump.
    pub fn summary(&self) -> String {
        let id = &self.metadata.id;
        let desc = &self.metadata.description;
        match &self.value {
            MetricValue::Counter(v) => format!("{id:<24} {v:>12}  {desc}"),
            MetricValue::Gauge(v) => format!("{id:<24} {v:>12.3}  {desc}"),
            MetricValue::Sample(s) | MetricValue::Period { stats: s, .. } => format!(
                "{id:<24} {:>12.3}  (n={}, min={:.3}, max={:.3}, var={:.3}) {desc}",
                s.mean,
                s.count,
                s.min,
                s.max,
                s.variance()
            ),
        }
    }
}

/// A specialized `Result` type for metric-related operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// An error that can occur within the metrics system.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MetricsError {
    /// The requested metric was not found in the registry.
    #[error("Metric not found: {0}")]
    MetricNotFound(MetricId),
    /// An operation was attempted on a metric of the wrong type
    /// (e.g., trying to tick a counter).
    #[error("Type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        /// The expected metric type for the operation.
        expected: MetricType,
        /// The actual metric type that was found.
        found: MetricType,
    },
    /// An error originating from the backend storage layer.
    #[error("Storage error: {0}")]
    StorageError(String),
}
