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

//! In-memory metrics storage.

use crate::storage::backend::MetricsBackend;
use kiln_core::telemetry::{Metric, MetricId, MetricValue, MetricsError, MetricsResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory metrics backend using RwLock<HashMap>
///
/// Reads (dumps, queries) share the lock; updates take it exclusively, which
/// makes every read-modify-write atomic.
#[derive(Debug)]
pub struct InMemoryBackend {
    storage: RwLock<HashMap<MetricId, Metric>>,
}

impl InMemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self {
            storage: RwLock::new(HashMap::new()),
        }
    }

    /// Create a new in-memory backend with initial capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsBackend for InMemoryBackend {
    fn put_metric(&self, metric: Metric) -> MetricsResult<()> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| MetricsError::StorageError("Failed to acquire write lock".to_string()))?;

        storage.insert(metric.metadata.id.clone(), metric);
        Ok(())
    }

    fn get_metric(&self, id: &MetricId) -> MetricsResult<Metric> {
        let storage = self
            .storage
            .read()
            .map_err(|_| MetricsError::StorageError("Failed to acquire read lock".to_string()))?;

        storage
            .get(id)
            .cloned()
            .ok_or_else(|| MetricsError::MetricNotFound(id.clone()))
    }

    fn contains_metric(&self, id: &MetricId) -> bool {
        if let Ok(storage) = self.storage.read() {
            storage.contains_key(id)
        } else {
            false
        }
    }

    fn modify(
        &self,
        id: &MetricId,
        update: &mut dyn FnMut(&mut MetricValue) -> MetricsResult<()>,
    ) -> MetricsResult<()> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| MetricsError::StorageError("Failed to acquire write lock".to_string()))?;

        let metric = storage
            .get_mut(id)
            .ok_or_else(|| MetricsError::MetricNotFound(id.clone()))?;
        update(&mut metric.value)?;
        metric.metadata.update_timestamp();
        Ok(())
    }

    fn list_all_metrics(&self) -> Vec<Metric> {
        if let Ok(storage) = self.storage.read() {
            storage.values().cloned().collect()
        } else {
            Vec::new()
        }
    }

    fn clear_all(&self) -> MetricsResult<()> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| MetricsError::StorageError("Failed to acquire write lock".to_string()))?;

        storage.clear();
        Ok(())
    }

    fn metric_count(&self) -> usize {
        if let Ok(storage) = self.storage.read() {
            storage.len()
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_in_memory_backend_basic_operations() {
        let backend = InMemoryBackend::new();
        let id = MetricId::new("test", "counter");
        let metric = Metric::new_counter(id.clone(), "Test counter", 42);

        assert!(backend.put_metric(metric).is_ok());
        assert!(backend.contains_metric(&id));

        let retrieved = backend.get_metric(&id).unwrap();
        assert_eq!(retrieved.value.as_counter(), Some(42));
        assert_eq!(backend.metric_count(), 1);

        backend.clear_all().unwrap();
        assert!(!backend.contains_metric(&id));
        assert_eq!(backend.metric_count(), 0);
    }

    #[test]
    fn test_counter_increment() {
        let backend = InMemoryBackend::new();
        let id = MetricId::new("test", "counter");
        backend
            .put_metric(Metric::new_counter(id.clone(), "Test counter", 0))
            .unwrap();

        assert_eq!(backend.increment_counter(&id, 5).unwrap(), 5);
        assert_eq!(backend.increment_counter(&id, 3).unwrap(), 8);
    }

    #[test]
    fn test_type_mismatch() {
        let backend = InMemoryBackend::new();
        let id = MetricId::new("test", "gauge");
        backend
            .put_metric(Metric::new_gauge(id.clone(), "Test gauge", "ms", 0.0))
            .unwrap();

        assert!(matches!(
            backend.increment_counter(&id, 1),
            Err(MetricsError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let backend = Arc::new(InMemoryBackend::new());
        let id = MetricId::new("test", "concurrent");
        backend
            .put_metric(Metric::new_counter(id.clone(), "Concurrent counter", 0))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let backend = Arc::clone(&backend);
                let id = id.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        backend.increment_counter(&id, 1).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let metric = backend.get_metric(&id).unwrap();
        assert_eq!(metric.value.as_counter(), Some(2000));
    }
}
