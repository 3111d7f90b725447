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

//! YaMCA: a metric-ordered greedy scheduling policy.
//!
//! For every priority class, from the highest down, each candidate working
//! mode of each schedulable is evaluated on each resource cluster. The
//! resulting (schedulable, working mode, cluster) entities are ordered by a
//! suitability metric, lowest first, and greedily booked into one resource
//! view until the schedulable gets an assignment or the cluster is full.
//!
//! Every run books into a clean view, so each priority class competes for
//! the whole platform, including what lower classes held before.
//!
//! The metric is the contention level of the working mode on the cluster
//! (sum over its requests of requested / residual amount) divided by the
//! working mode value, so that busy clusters and low-value modes rank last.

use kiln_core::control::{
    Assignment, PolicyError, PolicyRegistration, PolicyResult, PolicyRun, PolicyStats,
    SchedulingPolicy, SystemView,
};
use kiln_core::resource::{
    LedgerError, LedgerResult, ResourceLedger, ResourceUsage, ViewGuard, ViewToken,
};
use kiln_core::schedulable::{Priority, Schedulable, SchedulableId, SchedulableState, WorkingMode};
use kiln_core::Stopwatch;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Registered policy name.
pub const NAME: &str = "yamca";

/// Floor applied to working mode values in the metric.
const MIN_VALUE: f32 = 0.01;

fn create() -> Box<dyn SchedulingPolicy> {
    Box::new(YamcaPolicy::new())
}

inventory::submit! {
    PolicyRegistration { name: NAME, create }
}

/// Total order on metrics, so they can key an ordered map.
#[derive(Debug, Clone, Copy)]
struct MetricKey(f32);

impl PartialEq for MetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MetricKey {}

impl PartialOrd for MetricKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetricKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// One candidate binding: a working mode of a schedulable on a cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedEntity {
    /// The schedulable.
    pub schedulable: SchedulableId,
    /// Candidate working mode.
    pub mode: u8,
    /// Candidate cluster.
    pub cluster: u32,
    /// Suitability, lower is better.
    pub metric: f32,
    /// What the binding books.
    pub usages: Vec<ResourceUsage>,
}

/// Entities ordered by metric, lowest first.
///
/// Equal metrics are visited in insertion order. The tie-break only makes
/// runs reproducible; it carries no meaning.
#[derive(Debug, Default)]
pub struct SchedulingMap {
    entries: BTreeMap<(MetricKey, u64), SchedEntity>,
    next_seq: u64,
}

impl SchedulingMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entity, keeping duplicates.
    pub fn insert(&mut self, entity: SchedEntity) {
        let key = (MetricKey(entity.metric), self.next_seq);
        self.next_seq += 1;
        self.entries.insert(key, entity);
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entities from best to worst.
    pub fn iter(&self) -> impl Iterator<Item = &SchedEntity> {
        self.entries.values()
    }
}

/// Contention level of `mode` on `cluster` in the view `token`.
///
/// Each request contributes requested / residual. Returns `None` when a
/// request cannot fit at all.
pub fn contention_level(
    ledger: &dyn ResourceLedger,
    token: ViewToken,
    mode: &WorkingMode,
    cluster: u32,
) -> LedgerResult<Option<f32>> {
    let mut level = 0.0_f32;
    for request in mode.requests.iter().filter(|r| r.amount > 0) {
        let residual = ledger.available_in(request.kind, cluster, token)?;
        if residual < request.amount {
            return Ok(None);
        }
        level += request.amount as f32 / residual as f32;
    }
    Ok(Some(level))
}

/// Suitability metric of a working mode given its contention level.
pub fn suitability(contention: f32, value: f32) -> f32 {
    contention / value.max(MIN_VALUE)
}

fn skip(schedulable: &Schedulable, assigned: &BTreeSet<SchedulableId>) -> bool {
    match schedulable.state {
        SchedulableState::Disabled | SchedulableState::Finished | SchedulableState::Sync => true,
        SchedulableState::Ready | SchedulableState::Running => assigned.contains(&schedulable.id),
    }
}

#[derive(Debug, Default)]
struct YamcaState {
    clusters_full: BTreeMap<u32, bool>,
    tok_counter: u32,
}

/// The YaMCA scheduling policy.
#[derive(Debug, Default)]
pub struct YamcaPolicy {
    state: Mutex<YamcaState>,
}

struct Run<'a> {
    ledger: &'a dyn ResourceLedger,
    token: ViewToken,
    assigned: BTreeSet<SchedulableId>,
    assignments: Vec<Assignment>,
    stats: PolicyStats,
}

impl YamcaPolicy {
    /// Creates the policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs started so far.
    pub fn runs(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tok_counter
    }

    fn order(
        run: &mut Run<'_>,
        clusters_full: &BTreeMap<u32, bool>,
        class: &[&Schedulable],
    ) -> LedgerResult<SchedulingMap> {
        let ordering = Stopwatch::new();
        let mut metrics = Duration::ZERO;
        let mut map = SchedulingMap::new();

        for (&cluster, &full) in clusters_full {
            if full {
                continue;
            }
            for schedulable in class.iter().filter(|s| !skip(s, &run.assigned)) {
                for mode in &schedulable.working_modes {
                    let timer = Stopwatch::new();
                    let contention =
                        contention_level(run.ledger, run.token, mode, cluster)?;
                    metrics += timer.elapsed();

                    let Some(contention) = contention else {
                        log::trace!(
                            "YAMCA: {} awm {} does not fit cluster {}",
                            schedulable.str_id(),
                            mode.id,
                            cluster
                        );
                        continue;
                    };
                    let metric = suitability(contention, mode.value);
                    log::trace!(
                        "YAMCA: {} awm {} cluster {} metric {:.4}",
                        schedulable.str_id(),
                        mode.id,
                        cluster,
                        metric
                    );
                    map.insert(SchedEntity {
                        schedulable: schedulable.id,
                        mode: mode.id,
                        cluster,
                        metric,
                        usages: mode
                            .requests
                            .iter()
                            .map(|r| ResourceUsage {
                                kind: r.kind,
                                cluster,
                                amount: r.amount,
                            })
                            .collect(),
                    });
                }
            }
        }

        run.stats.metrics += metrics;
        run.stats.ordering += ordering.elapsed().saturating_sub(metrics);
        run.stats.map_size = run.stats.map_size.max(map.len());
        run.stats.entities += map.len();
        Ok(map)
    }

    fn cluster_exhausted(ledger: &dyn ResourceLedger, token: ViewToken, cluster: u32) -> LedgerResult<bool> {
        Ok(ledger
            .snapshot(Some(token))?
            .iter()
            .filter(|r| r.attributes.cluster == cluster)
            .all(|r| r.available() == 0))
    }

    fn select(
        run: &mut Run<'_>,
        clusters_full: &mut BTreeMap<u32, bool>,
        map: &SchedulingMap,
    ) -> LedgerResult<()> {
        let selection = Stopwatch::new();
        for entity in map.iter() {
            if run.assigned.contains(&entity.schedulable) {
                continue;
            }
            if clusters_full.get(&entity.cluster).copied().unwrap_or(true) {
                continue;
            }
            match run.ledger.book(entity.schedulable, &entity.usages, run.token) {
                Ok(()) => {
                    log::debug!(
                        "YAMCA: {} -> awm {} on cluster {} (metric {:.4})",
                        entity.schedulable,
                        entity.mode,
                        entity.cluster,
                        entity.metric
                    );
                    run.assigned.insert(entity.schedulable);
                    run.assignments.push(Assignment {
                        schedulable: entity.schedulable,
                        mode: entity.mode,
                        cluster: entity.cluster,
                    });
                }
                Err(LedgerError::Insufficient { .. }) => {
                    log::trace!(
                        "YAMCA: {} awm {} no longer fits cluster {}",
                        entity.schedulable,
                        entity.mode,
                        entity.cluster
                    );
                }
                Err(e) => return Err(e),
            }
            if Self::cluster_exhausted(run.ledger, run.token, entity.cluster)? {
                log::debug!("YAMCA: cluster {} full", entity.cluster);
                clusters_full.insert(entity.cluster, true);
            }
        }
        run.stats.selection += selection.elapsed();
        Ok(())
    }
}

impl SchedulingPolicy for YamcaPolicy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schedule(&mut self, system: SystemView<'_>) -> PolicyResult {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let ledger = system.ledger;

        let clusters = ledger.clusters();
        if clusters.is_empty() {
            return Err(PolicyError::Delayed("no resources registered".into()));
        }

        let view = ViewGuard::acquire(ledger)?;
        state.tok_counter += 1;
        state.clusters_full = clusters.iter().map(|c| (*c, false)).collect();
        log::debug!(
            "YAMCA: run #{} on {}, {} cluster(s)",
            state.tok_counter,
            view.token(),
            clusters.len()
        );

        let candidates: Vec<Schedulable> = system
            .applications
            .all()
            .into_iter()
            .filter(Schedulable::is_schedulable)
            .collect();
        let lowest = system.applications.lowest_priority();

        let mut run = Run {
            ledger,
            token: view.token(),
            assigned: BTreeSet::new(),
            assignments: Vec::new(),
            stats: PolicyStats::default(),
        };

        for prio in 0..=lowest.0 {
            let class: Vec<&Schedulable> = candidates
                .iter()
                .filter(|s| s.priority == Priority(prio))
                .collect();
            if class.is_empty() {
                continue;
            }
            log::debug!("YAMCA: priority class {} ({} schedulable(s))", prio, class.len());
            let map = Self::order(&mut run, &state.clusters_full, &class)?;
            Self::select(&mut run, &mut state.clusters_full, &map)?;
        }

        if run.assignments.is_empty() && !candidates.is_empty() {
            return Err(PolicyError::Failed("no feasible assignment".into()));
        }

        // The view started clean: committing it also drops the bookings of
        // schedulables that are no longer candidates.
        view.commit()?;
        log::info!(
            "YAMCA: {} of {} schedulable(s) assigned",
            run.assignments.len(),
            candidates.len()
        );

        Ok(PolicyRun {
            assignments: run.assignments,
            stats: run.stats,
        })
    }
}
