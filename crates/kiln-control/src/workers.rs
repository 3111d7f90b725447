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

//! Registry of the long-lived background workers.

use kiln_core::worker::Worker;
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default number of terminate-and-wait rounds.
pub const DEFAULT_TERMINATION_ROUNDS: u32 = 3;
/// Default wait for the registry to drain, per round.
pub const DEFAULT_TERMINATION_TIMEOUT: Duration = Duration::from_millis(300);

/// Outcome of [`WorkerRegistry::terminate_workers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationReport {
    /// Number of terminate-and-wait rounds that were run.
    pub rounds: u32,
    /// Workers still registered when termination gave up.
    pub remaining: Vec<String>,
    /// Total time spent terminating.
    pub elapsed: Duration,
}

impl TerminationReport {
    /// Whether every worker unregistered in time.
    pub fn is_clean(&self) -> bool {
        self.remaining.is_empty()
    }
}

enum TerminationState {
    Draining { round: u32 },
    Waiting { round: u32 },
    Done { rounds: u32 },
}

/// Named background workers with a bounded, best-effort termination.
///
/// Workers register under a unique name and unregister themselves when
/// their thread is about to exit.
pub struct WorkerRegistry {
    workers: Mutex<BTreeMap<String, Arc<dyn Worker>>>,
    drained: Condvar,
    rounds: u32,
    round_timeout: Duration,
}

impl WorkerRegistry {
    /// Creates a registry with the default termination budget.
    pub fn new() -> Self {
        Self::with_budget(DEFAULT_TERMINATION_ROUNDS, DEFAULT_TERMINATION_TIMEOUT)
    }

    /// Creates a registry with a custom termination budget.
    pub fn with_budget(rounds: u32, round_timeout: Duration) -> Self {
        Self {
            workers: Mutex::new(BTreeMap::new()),
            drained: Condvar::new(),
            rounds: rounds.max(1),
            round_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<dyn Worker>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a worker under `name`.
    ///
    /// Returns `false`, leaving the registry untouched, if the name is taken.
    pub fn register(&self, name: impl Into<String>, worker: Arc<dyn Worker>) -> bool {
        let name = name.into();
        let mut workers = self.lock();
        if workers.contains_key(&name) {
            log::warn!("Workers: '{}' already registered", name);
            return false;
        }
        log::debug!("Workers: registered '{}'", name);
        workers.insert(name, worker);
        true
    }

    /// Removes the worker registered under `name`, waking any termination
    /// in progress.
    pub fn unregister(&self, name: &str) -> bool {
        let mut workers = self.lock();
        let removed = workers.remove(name).is_some();
        if removed {
            log::debug!("Workers: unregistered '{}'", name);
        }
        self.drained.notify_all();
        removed
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no worker is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Names of the registered workers, sorted.
    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Asks every worker to terminate and waits for the registry to drain.
    ///
    /// Runs up to the configured number of rounds, each broadcasting a
    /// terminate request to the workers still registered and then waiting
    /// at most the round timeout. Workers left over after the last round are
    /// logged and abandoned: shutdown never blocks indefinitely.
    pub fn terminate_workers(&self) -> TerminationReport {
        let started = Instant::now();
        let mut state = TerminationState::Draining { round: 1 };

        let rounds = loop {
            state = match state {
                TerminationState::Draining { round } => {
                    // Terminate outside the lock: workers may unregister synchronously.
                    let pending: Vec<(String, Arc<dyn Worker>)> = self
                        .lock()
                        .iter()
                        .map(|(name, worker)| (name.clone(), Arc::clone(worker)))
                        .collect();
                    log::debug!(
                        "Workers: round {}/{}, terminating {} worker(s)",
                        round,
                        self.rounds,
                        pending.len()
                    );
                    for (name, worker) in &pending {
                        log::debug!("Workers: terminating '{}'", name);
                        worker.terminate();
                    }
                    TerminationState::Waiting { round }
                }
                TerminationState::Waiting { round } => {
                    let workers = self.lock();
                    let (workers, _) = self
                        .drained
                        .wait_timeout_while(workers, self.round_timeout, |w| !w.is_empty())
                        .unwrap_or_else(PoisonError::into_inner);
                    if workers.is_empty() || round >= self.rounds {
                        TerminationState::Done { rounds: round }
                    } else {
                        TerminationState::Draining { round: round + 1 }
                    }
                }
                TerminationState::Done { rounds } => break rounds,
            };
        };

        let remaining = self.names();
        if remaining.is_empty() {
            log::info!("Workers: all terminated after {} round(s)", rounds);
        } else {
            log::warn!(
                "Workers: {} worker(s) still running after {} round(s): {:?}",
                remaining.len(),
                rounds,
                remaining
            );
        }

        TerminationReport {
            rounds,
            remaining,
            elapsed: started.elapsed(),
        }
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingWorker {
        calls: AtomicUsize,
    }

    impl Worker for CountingWorker {
        fn terminate(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Unregisters itself as soon as it is asked to terminate.
    struct CooperativeWorker {
        name: String,
        registry: Arc<WorkerRegistry>,
    }

    impl Worker for CooperativeWorker {
        fn terminate(&self) {
            self.registry.unregister(&self.name);
        }
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = WorkerRegistry::new();
        let worker = Arc::new(CountingWorker {
            calls: AtomicUsize::new(0),
        });
        assert!(registry.register("monitor", worker.clone()));
        assert!(!registry.register("monitor", worker));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister("monitor"));
        assert!(!registry.unregister("monitor"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_terminate_empty_registry() {
        let registry = WorkerRegistry::new();
        let report = registry.terminate_workers();
        assert_eq!(report.rounds, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn test_synchronous_unregister_does_not_deadlock() {
        let registry = Arc::new(WorkerRegistry::new());
        for name in ["a", "b"] {
            let worker = Arc::new(CooperativeWorker {
                name: name.to_string(),
                registry: Arc::clone(&registry),
            });
            registry.register(name, worker);
        }
        let report = registry.terminate_workers();
        assert_eq!(report.rounds, 1);
        assert!(report.is_clean());
    }

    /// Unregisters from a background thread shortly after the request.
    struct LateWorker {
        name: String,
        registry: Arc<WorkerRegistry>,
        delay: Duration,
    }

    impl Worker for LateWorker {
        fn terminate(&self) {
            let name = self.name.clone();
            let registry = Arc::clone(&self.registry);
            let delay = self.delay;
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                registry.unregister(&name);
            });
        }
    }

    #[test]
    fn test_workers_exiting_within_the_round_take_one_round() {
        let registry = Arc::new(WorkerRegistry::with_budget(3, Duration::from_millis(300)));
        for (name, delay) in [("early", 20), ("late", 80)] {
            let worker = Arc::new(LateWorker {
                name: name.to_string(),
                registry: Arc::clone(&registry),
                delay: Duration::from_millis(delay),
            });
            registry.register(name, worker);
        }

        let report = registry.terminate_workers();
        assert_eq!(report.rounds, 1);
        assert!(report.is_clean());
        assert!(report.elapsed < Duration::from_millis(300));
    }

    #[test]
    fn test_stuck_worker_exhausts_rounds() {
        let registry = WorkerRegistry::with_budget(3, Duration::from_millis(20));
        let worker = Arc::new(CountingWorker {
            calls: AtomicUsize::new(0),
        });
        registry.register("stuck", worker.clone());

        let report = registry.terminate_workers();
        assert_eq!(report.rounds, 3);
        assert_eq!(report.remaining, vec!["stuck".to_string()]);
        assert_eq!(worker.calls.load(Ordering::SeqCst), 3);
        assert!(report.elapsed >= Duration::from_millis(60));
    }
}
