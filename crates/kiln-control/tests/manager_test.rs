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

use crossbeam_channel::{bounded, Receiver};
use kiln_control::{run_command, ResourceManager, RtrmConfig, SystemContext};
use kiln_core::control::{ScheduleOutcome, Scheduler, SyncOutcome, Synchronizer};
use kiln_core::event::ControlEvent;
use kiln_core::platform::StaticResource;
use kiln_core::resource::{ResourceKind, ResourceLedger};
use kiln_core::schedulable::{
    ApplicationRegistry, Priority, ResourceRequest, Schedulable, SchedulableId, SchedulableKind,
    SchedulableState, WorkingMode,
};
use kiln_infra::{InMemoryApplicationRegistry, InMemoryLedger, StaticPlatform};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// --- Test doubles ---

/// Returns a fixed outcome and tracks how many calls overlap.
struct RecordingScheduler {
    outcome: ScheduleOutcome,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    hold: Duration,
}

impl RecordingScheduler {
    fn new(outcome: ScheduleOutcome, hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            hold,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule(&self) -> ScheduleOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.hold);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.outcome
    }
}

struct CountingSync {
    calls: AtomicUsize,
}

impl Synchronizer for CountingSync {
    fn sync_schedule(&self) -> SyncOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        SyncOutcome::Ok
    }
}

// --- Helpers ---

struct Harness {
    rm: Arc<ResourceManager>,
    ledger: Arc<InMemoryLedger>,
    apps: Arc<InMemoryApplicationRegistry>,
    scheduler: Arc<RecordingScheduler>,
    sync: Arc<CountingSync>,
    control: Option<JoinHandle<()>>,
}

impl Harness {
    fn counter(&self, name: &str) -> u64 {
        self.rm
            .context()
            .metrics
            .counter_value("rm", name)
            .unwrap_or_default()
    }

    fn sync_calls(&self) -> usize {
        self.sync.calls.load(Ordering::SeqCst)
    }

    fn shutdown(&mut self) {
        self.rm.notify_event(ControlEvent::Exit);
        if let Some(control) = self.control.take() {
            control.join().expect("control loop panicked");
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if self.control.is_some() {
            self.shutdown();
        }
    }
}

fn config() -> RtrmConfig {
    RtrmConfig {
        exc_start_defer_ms: 50,
        exc_stop_defer_ms: 50,
        opt_request_defer_ms: 20,
        dispatch_recheck_ms: 20,
        worker_termination_timeout_ms: 200,
        ..RtrmConfig::default()
    }
}

fn platform() -> Arc<StaticPlatform> {
    Arc::new(StaticPlatform::new(vec![StaticResource {
        path: "sys0.cpu0.pe0".into(),
        kind: ResourceKind::ProcessingElement,
        capacity: 100,
        cluster: 0,
    }]))
}

fn ready_app(id: u32) -> Schedulable {
    Schedulable {
        id: SchedulableId(id),
        name: format!("app{}", id),
        kind: SchedulableKind::Application,
        priority: Priority(0),
        state: SchedulableState::Ready,
        working_modes: vec![WorkingMode {
            id: 0,
            name: "base".into(),
            value: 1.0,
            requests: vec![ResourceRequest {
                kind: ResourceKind::ProcessingElement,
                amount: 50,
            }],
        }],
        current_mode: None,
        next_mode: None,
        next_cluster: None,
    }
}

fn start(outcome: ScheduleOutcome, hold: Duration) -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    let apps = Arc::new(InMemoryApplicationRegistry::new());
    let context = SystemContext::new(ledger.clone(), apps.clone(), platform());
    let scheduler = RecordingScheduler::new(outcome, hold);
    let sync = Arc::new(CountingSync {
        calls: AtomicUsize::new(0),
    });
    let rm = Arc::new(
        ResourceManager::with_collaborators(context, config(), scheduler.clone(), sync.clone())
            .expect("manager"),
    );

    let runner = Arc::clone(&rm);
    let control = thread::spawn(move || runner.go().expect("control loop"));

    Harness {
        rm,
        ledger,
        apps,
        scheduler,
        sync,
        control: Some(control),
    }
}

fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

const PATIENCE: Duration = Duration::from_secs(2);

// --- Tests ---

#[test]
fn test_optimize_request_without_schedulables_is_empty() {
    let h = start(ScheduleOutcome::Done, Duration::ZERO);

    h.rm.notify_event(ControlEvent::OptimizeRequest);
    assert!(eventually(PATIENCE, || h.counter("sch.empty") == 1));

    assert_eq!(h.scheduler.calls(), 0);
    assert_eq!(h.counter("sch.tot"), 0);
    assert!(h.rm.wait_for_ready_timeout(PATIENCE));
}

#[test]
fn test_start_burst_runs_one_cycle() {
    let h = start(ScheduleOutcome::Done, Duration::ZERO);
    h.apps.insert(ready_app(1));

    // Both events are handled within the 50 ms deferral of the first one.
    h.rm.notify_event(ControlEvent::ExcStart);
    assert!(eventually(PATIENCE, || h.counter("evt.start") == 1));
    h.rm.notify_event(ControlEvent::ExcStart);
    assert!(eventually(PATIENCE, || h.counter("evt.start") == 2));

    assert!(eventually(PATIENCE, || h.rm.optimizer().executions() == 1));
    thread::sleep(Duration::from_millis(150));
    assert_eq!(h.rm.optimizer().executions(), 1);
    assert_eq!(h.scheduler.calls(), 1);
}

#[test]
fn test_delayed_schedule_releases_the_gate() {
    let h = start(ScheduleOutcome::Delayed, Duration::ZERO);
    h.apps.insert(ready_app(1));

    h.rm.notify_event(ControlEvent::PlatformChange);
    assert!(eventually(PATIENCE, || h.counter("sch.delayed") == 1));
    assert!(h.rm.wait_for_ready_timeout(PATIENCE));

    assert_eq!(h.sync_calls(), 0);
    assert_eq!(h.counter("syn.failed"), 0);
    assert_eq!(h.counter("sch.failed"), 0);
}

#[test]
fn test_platform_change_forces_schedule_without_schedulables() {
    let h = start(ScheduleOutcome::Done, Duration::ZERO);

    h.rm.notify_event(ControlEvent::PlatformChange);
    assert!(eventually(PATIENCE, || h.scheduler.calls() == 1));
    assert!(eventually(PATIENCE, || h.counter("sch.empty") == 1));
}

#[test]
fn test_cycles_never_overlap_under_bursts() {
    let h = start(ScheduleOutcome::Done, Duration::from_millis(2));
    h.apps.insert(ready_app(1));

    let notifiers: Vec<_> = (0..4)
        .map(|i| {
            let rm = Arc::clone(&h.rm);
            thread::spawn(move || {
                for n in 0..25 {
                    let event = match (i + n) % 3 {
                        0 => ControlEvent::ExcStart,
                        1 => ControlEvent::OptimizeRequest,
                        _ => ControlEvent::PlatformChange,
                    };
                    rm.notify_event(event);
                    if n % 5 == 0 {
                        rm.cycle().run();
                    }
                }
            })
        })
        .collect();
    for notifier in notifiers {
        notifier.join().expect("notifier panicked");
    }

    assert!(h.rm.wait_for_ready_timeout(PATIENCE));
    assert!(h.scheduler.calls() >= 20);
    assert_eq!(h.scheduler.max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn test_abort_runs_the_hook() {
    let h = start(ScheduleOutcome::Done, Duration::ZERO);
    let (tx, rx): (_, Receiver<()>) = bounded(1);
    h.rm.set_abort_hook(Box::new(move || {
        let _ = tx.try_send(());
    }));

    h.rm.notify_event(ControlEvent::Abort);
    assert!(rx.recv_timeout(PATIENCE).is_ok());
    assert!(!h.rm.is_done());
}

#[test]
fn test_exit_stops_loop_and_releases_everything() {
    let mut h = start(ScheduleOutcome::Done, Duration::ZERO);
    h.apps.insert(ready_app(1));
    h.apps.insert(ready_app(2));

    h.shutdown();

    assert!(h.rm.is_done());
    for id in [1, 2] {
        assert_eq!(
            h.apps.get(SchedulableId(id)).map(|s| s.state),
            Some(SchedulableState::Finished)
        );
        assert!(h.ledger.assignment(SchedulableId(id)).is_none());
    }
    // The optimizer worker has been drained.
    assert!(h.rm.context().workers.is_empty());
    assert!(!h.apps.has_in_state(SchedulableState::Ready));
}

#[test]
fn test_status_commands() {
    let h = start(ScheduleOutcome::Done, Duration::ZERO);
    h.apps.insert(ready_app(7));

    let queues = run_command(&h.rm, "rm.que_status").unwrap();
    assert!(queues.contains("RDY:   1"));

    let schedulables = run_command(&h.rm, "rm.exc_status").unwrap();
    assert!(schedulables.contains("#00007:app7"));

    assert!(eventually(PATIENCE, || {
        run_command(&h.rm, "rm.res_status")
            .map(|s| s.contains("sys0.cpu0.pe0"))
            .unwrap_or(false)
    }));

    assert!(run_command(&h.rm, "rm.reboot").is_err());

    run_command(&h.rm, "rm.opt_force").unwrap();
    assert!(eventually(PATIENCE, || h.scheduler.calls() == 1));
}
