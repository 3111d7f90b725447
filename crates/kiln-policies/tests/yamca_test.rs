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

use kiln_core::control::{PolicyError, PolicyRegistration, SchedulingPolicy, SystemView};
use kiln_core::resource::{ResourceAttributes, ResourceKind, ResourceLedger, ResourcePath, ResourceUsage};
use kiln_core::schedulable::{
    Priority, ResourceRequest, Schedulable, SchedulableId, SchedulableKind, SchedulableState,
    WorkingMode,
};
use kiln_infra::{InMemoryApplicationRegistry, InMemoryLedger};
use kiln_policies::YamcaPolicy;

// --- Helpers ---

fn ledger(clusters: &[u32]) -> InMemoryLedger {
    let ledger = InMemoryLedger::new();
    for &cluster in clusters {
        ledger
            .register_resource(
                ResourcePath::new(format!("sys0.cpu{}.pe0", cluster)),
                ResourceAttributes {
                    kind: ResourceKind::ProcessingElement,
                    cluster,
                },
                100,
            )
            .unwrap();
    }
    ledger
}

fn mode(id: u8, pe: u64, value: f32) -> WorkingMode {
    WorkingMode {
        id,
        name: format!("awm{}", id),
        value,
        requests: vec![ResourceRequest {
            kind: ResourceKind::ProcessingElement,
            amount: pe,
        }],
    }
}

fn app(id: u32, priority: u8, state: SchedulableState, modes: Vec<WorkingMode>) -> Schedulable {
    Schedulable {
        id: SchedulableId(id),
        name: format!("app{}", id),
        kind: SchedulableKind::Application,
        priority: Priority(priority),
        state,
        working_modes: modes,
        current_mode: None,
        next_mode: None,
        next_cluster: None,
    }
}

fn ready(id: u32, priority: u8, pe: u64) -> Schedulable {
    app(id, priority, SchedulableState::Ready, vec![mode(0, pe, 1.0)])
}

fn run(
    ledger: &InMemoryLedger,
    apps: &InMemoryApplicationRegistry,
) -> Result<Vec<(u32, u8, u32)>, PolicyError> {
    let mut policy = YamcaPolicy::new();
    let outcome = policy.schedule(SystemView {
        ledger,
        applications: apps,
    })?;
    Ok(outcome
        .assignments
        .iter()
        .map(|a| (a.schedulable.0, a.mode, a.cluster))
        .collect())
}

fn committed_pe(ledger: &InMemoryLedger, id: u32) -> u64 {
    ledger
        .assignment(SchedulableId(id))
        .unwrap_or_default()
        .iter()
        .map(|u| u.amount)
        .sum()
}

fn hold(ledger: &InMemoryLedger, id: u32, pe: u64) {
    let token = ledger.acquire_view().unwrap();
    ledger
        .book(
            SchedulableId(id),
            &[ResourceUsage {
                kind: ResourceKind::ProcessingElement,
                cluster: 0,
                amount: pe,
            }],
            token,
        )
        .unwrap();
    ledger.commit_view(token).unwrap();
    ledger.release_view(token).unwrap();
}

// --- Tests ---

#[test]
fn test_single_application_is_committed() {
    let ledger = ledger(&[0]);
    let apps = InMemoryApplicationRegistry::new();
    apps.insert(ready(1, 0, 60));

    assert_eq!(run(&ledger, &apps).unwrap(), vec![(1, 0, 0)]);
    assert_eq!(committed_pe(&ledger, 1), 60);

    assert_eq!(ledger.open_views(), 0);
    assert_eq!(ledger.issued_views(), 1);
    assert_eq!(ledger.released_views(), 1);
}

#[test]
fn test_every_run_uses_a_fresh_view() {
    let ledger = ledger(&[0]);
    let apps = InMemoryApplicationRegistry::new();
    apps.insert(ready(1, 0, 60));

    let mut policy = YamcaPolicy::new();
    for _ in 0..3 {
        policy
            .schedule(SystemView {
                ledger: &ledger,
                applications: &apps,
            })
            .unwrap();
    }
    assert_eq!(policy.runs(), 3);
    assert_eq!(ledger.issued_views(), 3);
    assert_eq!(ledger.released_views(), 3);
    assert_eq!(ledger.open_views(), 0);
    // Re-booking replaces the previous booking.
    assert_eq!(committed_pe(&ledger, 1), 60);
}

#[test]
fn test_higher_priority_class_is_served_first() {
    let ledger = ledger(&[0]);
    let apps = InMemoryApplicationRegistry::new();
    apps.insert(ready(1, 0, 80));
    apps.insert(ready(2, 1, 40));

    assert_eq!(run(&ledger, &apps).unwrap(), vec![(1, 0, 0)]);
    assert_eq!(committed_pe(&ledger, 2), 0);
}

#[test]
fn test_lower_metric_wins_within_a_class() {
    let ledger = ledger(&[0]);
    let apps = InMemoryApplicationRegistry::new();
    apps.insert(ready(1, 0, 80));
    apps.insert(ready(2, 0, 60));

    assert_eq!(run(&ledger, &apps).unwrap(), vec![(2, 0, 0)]);
}

#[test]
fn test_working_mode_value_weighs_in() {
    let ledger = ledger(&[0]);
    let apps = InMemoryApplicationRegistry::new();
    apps.insert(app(
        1,
        0,
        SchedulableState::Ready,
        vec![mode(0, 50, 0.2), mode(1, 100, 1.0)],
    ));

    assert_eq!(run(&ledger, &apps).unwrap(), vec![(1, 1, 0)]);
}

#[test]
fn test_competing_applications_spread_over_clusters() {
    let ledger = ledger(&[0, 1]);
    let apps = InMemoryApplicationRegistry::new();
    apps.insert(ready(1, 0, 80));
    apps.insert(ready(2, 0, 80));

    assert_eq!(run(&ledger, &apps).unwrap(), vec![(1, 0, 0), (2, 0, 1)]);
}

#[test]
fn test_running_application_keeps_its_resources() {
    let ledger = ledger(&[0]);
    let apps = InMemoryApplicationRegistry::new();

    hold(&ledger, 1, 100);

    apps.insert(app(1, 0, SchedulableState::Running, vec![mode(0, 100, 1.0)]));
    assert_eq!(run(&ledger, &apps).unwrap(), vec![(1, 0, 0)]);
    assert_eq!(committed_pe(&ledger, 1), 100);
}

#[test]
fn test_no_feasible_assignment_fails_and_releases_the_view() {
    let ledger = ledger(&[0]);
    let apps = InMemoryApplicationRegistry::new();
    apps.insert(ready(1, 0, 150));

    assert!(matches!(run(&ledger, &apps), Err(PolicyError::Failed(_))));
    assert_eq!(ledger.open_views(), 0);
    assert_eq!(ledger.issued_views(), ledger.released_views());
    assert_eq!(committed_pe(&ledger, 1), 0);
}

#[test]
fn test_no_resources_delays() {
    let ledger = InMemoryLedger::new();
    let apps = InMemoryApplicationRegistry::new();
    apps.insert(ready(1, 0, 10));

    assert!(matches!(run(&ledger, &apps), Err(PolicyError::Delayed(_))));
    assert_eq!(ledger.issued_views(), 0);
}

#[test]
fn test_unschedulable_states_are_ignored() {
    let ledger = ledger(&[0]);
    let apps = InMemoryApplicationRegistry::new();
    apps.insert(app(1, 0, SchedulableState::Disabled, vec![mode(0, 10, 1.0)]));
    apps.insert(app(2, 0, SchedulableState::Finished, vec![mode(0, 10, 1.0)]));

    assert_eq!(run(&ledger, &apps).unwrap(), Vec::new());
    assert_eq!(ledger.open_views(), 0);
}

#[test]
fn test_policy_is_registered() {
    assert!(kiln_policies::policy_names().contains(&"yamca"));
    let policy = PolicyRegistration::instantiate("yamca").expect("yamca is linked");
    assert_eq!(policy.name(), "yamca");
    assert!(PolicyRegistration::instantiate("nope").is_none());
}

#[test]
fn test_run_statistics() {
    let ledger = ledger(&[0, 1]);
    let apps = InMemoryApplicationRegistry::new();
    apps.insert(ready(1, 0, 80));
    apps.insert(ready(2, 0, 80));
    apps.insert(ready(3, 1, 10));

    let mut policy = YamcaPolicy::new();
    let outcome = policy
        .schedule(SystemView {
            ledger: &ledger,
            applications: &apps,
        })
        .unwrap();

    // Class 0: 2 schedulables x 2 clusters. Class 1: 1 schedulable on the
    // 2 clusters, both still open with 20 left.
    assert_eq!(outcome.stats.map_size, 4);
    assert_eq!(outcome.stats.entities, 6);
    assert_eq!(outcome.assignments.len(), 3);
}

#[test]
fn test_higher_priority_arrival_preempts_running_application() {
    let ledger = ledger(&[0]);
    let apps = InMemoryApplicationRegistry::new();
    hold(&ledger, 1, 100);
    apps.insert(app(
        1,
        5,
        SchedulableState::Running,
        vec![mode(0, 100, 1.0), mode(1, 40, 0.5)],
    ));
    apps.insert(ready(2, 0, 60));

    // The new class-0 app is served first, the running one shrinks to fit.
    assert_eq!(run(&ledger, &apps).unwrap(), vec![(2, 0, 0), (1, 1, 0)]);
    assert_eq!(committed_pe(&ledger, 2), 60);
    assert_eq!(committed_pe(&ledger, 1), 40);
}

#[test]
fn test_disabled_application_releases_its_cluster() {
    let ledger = ledger(&[0]);
    let apps = InMemoryApplicationRegistry::new();
    hold(&ledger, 1, 100);
    apps.insert(app(1, 0, SchedulableState::Running, vec![mode(0, 100, 1.0)]));
    apps.disable(SchedulableId(1)).unwrap();
    apps.insert(ready(2, 0, 50));

    assert_eq!(run(&ledger, &apps).unwrap(), vec![(2, 0, 0)]);
    assert_eq!(committed_pe(&ledger, 1), 0);
    assert_eq!(committed_pe(&ledger, 2), 50);
}

#[test]
fn test_run_without_candidates_drops_stale_bookings() {
    let ledger = ledger(&[0]);
    let apps = InMemoryApplicationRegistry::new();
    hold(&ledger, 1, 100);
    apps.insert(app(1, 0, SchedulableState::Finished, vec![mode(0, 100, 1.0)]));

    assert_eq!(run(&ledger, &apps).unwrap(), Vec::new());
    assert!(ledger.assignment(SchedulableId(1)).is_none());
}
