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

//! The resource manager: control loop, event handlers and shutdown.

use crate::config::RtrmConfig;
use crate::context::SystemContext;
use crate::cycle::OptimizationCycle;
use crate::deferrable::Deferrable;
use crate::dispatcher::{EventHandler, PendingEvents};
use crate::metrics::EventMetrics;
use crate::readiness::ReadinessGate;
use crate::scheduler::SchedulerManager;
use crate::sync::SyncManager;
use kiln_core::control::{Scheduler, Synchronizer};
use kiln_core::event::ControlEvent;
use kiln_core::platform::PlatformStatus;
use kiln_core::schedulable::SchedulableState;
use kiln_core::telemetry::MetricsError;
use kiln_core::Stopwatch;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Called by the abort handler; the default terminates the process.
pub type AbortHook = Box<dyn Fn() + Send + Sync>;

/// Errors preventing the resource manager from starting.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Metric registration failed.
    #[error("metrics setup failed: {0}")]
    Metrics(#[from] MetricsError),
    /// The optimizer thread could not be spawned.
    #[error("cannot spawn optimizer: {0}")]
    Spawn(#[from] std::io::Error),
    /// The platform could not be loaded.
    #[error("platform [{platform}] load failed: {status}")]
    PlatformLoad {
        /// Name of the platform proxy.
        platform: String,
        /// Status it reported.
        status: PlatformStatus,
    },
}

fn exit_process() {
    std::process::exit(1);
}

/// Serializes control events and turns them into optimization cycles.
///
/// Events are raised from any thread with
/// [`notify_event`](ResourceManager::notify_event) and handled one at a
/// time by the thread running [`go`](ResourceManager::go). Optimization
/// cycles run on a dedicated debounced trigger thread.
pub struct ResourceManager {
    config: RtrmConfig,
    context: SystemContext,
    pending: PendingEvents,
    done: AtomicBool,
    gate: Arc<ReadinessGate>,
    cycle: Arc<OptimizationCycle>,
    optimizer: Deferrable,
    metrics: EventMetrics,
    abort_hook: Mutex<AbortHook>,
}

impl ResourceManager {
    /// Creates a manager with the scheduler and synchronization managers,
    /// loading the configured scheduling policy.
    pub fn new(context: SystemContext, config: RtrmConfig) -> Result<Self, ManagerError> {
        let scheduler = SchedulerManager::new(
            Arc::clone(&context.ledger),
            Arc::clone(&context.applications),
            context.metrics.clone(),
        );
        scheduler.load_policy(&config.scheduling_policy);
        let synchronizer = SyncManager::new(
            Arc::clone(&context.ledger),
            Arc::clone(&context.applications),
            Arc::clone(&context.platform),
        );
        Self::with_collaborators(context, config, Arc::new(scheduler), Arc::new(synchronizer))
    }

    /// Creates a manager driving the given scheduler and synchronizer.
    pub fn with_collaborators(
        context: SystemContext,
        config: RtrmConfig,
        scheduler: Arc<dyn Scheduler>,
        synchronizer: Arc<dyn Synchronizer>,
    ) -> Result<Self, ManagerError> {
        let gate = Arc::new(ReadinessGate::new());
        let cycle = Arc::new(OptimizationCycle::new(
            Arc::clone(&gate),
            Arc::clone(&context.applications),
            scheduler,
            synchronizer,
            &context.metrics,
        )?);

        let optimize = Arc::clone(&cycle);
        let optimizer = Deferrable::spawn(
            "optimizer",
            Arc::clone(&context.workers),
            Box::new(move || {
                let outcome = optimize.run();
                log::debug!("RM: optimization cycle ended: {:?}", outcome);
            }),
        )?;

        Ok(Self {
            metrics: EventMetrics::register(&context.metrics)?,
            config,
            context,
            pending: PendingEvents::new(),
            done: AtomicBool::new(false),
            gate,
            cycle,
            optimizer,
            abort_hook: Mutex::new(Box::new(exit_process)),
        })
    }

    /// Replaces the action run on abort.
    pub fn set_abort_hook(&self, hook: AbortHook) {
        *self.abort_hook.lock().unwrap_or_else(PoisonError::into_inner) = hook;
    }

    /// Loads the platform and arms the background optimization.
    pub fn setup(&self) -> Result<(), ManagerError> {
        let platform = &self.context.platform;
        log::info!("RM: loading platform [{}]", platform.name());
        let status = platform.load_platform_data(self.context.ledger.as_ref());
        if !status.is_ok() {
            log::error!("RM: platform [{}] load FAILED: {}", platform.name(), status);
            return Err(ManagerError::PlatformLoad {
                platform: platform.name().to_string(),
                status,
            });
        }

        log::info!(
            "RM: scheduling policies available: {:?}",
            SchedulerManager::available_policies()
        );

        if let Some(interval) = self.config.opt_interval() {
            log::info!("RM: periodic optimization every {:?}", interval);
            self.optimizer.set_periodic(interval);
        }
        Ok(())
    }

    /// Sets up the manager and runs the control loop until exit.
    pub fn go(&self) -> Result<(), ManagerError> {
        self.setup()?;
        self.control_loop();
        log::info!("RM: control loop terminated");
        Ok(())
    }

    fn control_loop(&self) {
        let recheck = self.config.dispatch_recheck();
        let mut guard = self.pending.lock();
        log::info!("RM: control loop started");
        while !self.is_done() {
            guard = self.pending.wait(guard, recheck, || self.is_done());
            if self.is_done() {
                break;
            }
            if self.pending.any_pending() {
                self.pending.run_pass(self);
            }
        }
    }

    /// Raises a control event. Never blocks.
    pub fn notify_event(&self, event: ControlEvent) {
        log::debug!("RM: event [{}] notified", event);
        self.pending.notify(event);
    }

    /// Blocks until no optimization cycle is running.
    pub fn wait_for_ready(&self) {
        self.gate.wait_for_ready();
    }

    /// Same as [`wait_for_ready`](Self::wait_for_ready), bounded by `timeout`.
    pub fn wait_for_ready_timeout(&self, timeout: Duration) -> bool {
        self.gate.wait_for_ready_timeout(timeout)
    }

    /// Whether the exit event has been handled.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// The collaborators.
    pub fn context(&self) -> &SystemContext {
        &self.context
    }

    /// The active configuration.
    pub fn config(&self) -> &RtrmConfig {
        &self.config
    }

    /// The readiness gate.
    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// The optimization cycle.
    pub fn cycle(&self) -> &OptimizationCycle {
        &self.cycle
    }

    /// The debounced trigger running the optimization cycle.
    pub fn optimizer(&self) -> &Deferrable {
        &self.optimizer
    }

    // ── Status dumps ────────────────────────────────────────────────

    /// One line per schedulable.
    pub fn exc_status(&self) -> String {
        let mut out = String::from("RM: schedulables\n");
        let mut all = self.context.applications.all();
        all.sort_by_key(|s| (s.priority, s.id));
        for s in &all {
            let _ = writeln!(
                out,
                "  {:<20} {} prio {:>2}  awm {:>4} -> {:>4}",
                s.str_id(),
                s.state,
                s.priority.0,
                s.current_mode.map_or_else(|| "-".to_string(), |m| m.to_string()),
                s.next_mode.map_or_else(|| "-".to_string(), |m| m.to_string()),
            );
        }
        out
    }

    /// Number of schedulables per state.
    pub fn que_status(&self) -> String {
        let all = self.context.applications.all();
        let mut out = String::from("RM: queues");
        for state in [
            SchedulableState::Disabled,
            SchedulableState::Ready,
            SchedulableState::Sync,
            SchedulableState::Running,
            SchedulableState::Finished,
        ] {
            let n = all.iter().filter(|s| s.state == state).count();
            let _ = write!(out, "  {}: {:>3}", state, n);
        }
        out
    }

    /// Usage of every registered resource.
    pub fn res_status(&self) -> String {
        let mut out = String::from("RM: resources\n");
        match self.context.ledger.snapshot(None) {
            Ok(resources) => {
                for r in &resources {
                    let _ = writeln!(
                        out,
                        "  {:<24} cluster {:>2}  {:>10} / {:<10}",
                        r.path.as_str(),
                        r.attributes.cluster,
                        r.used,
                        r.capacity
                    );
                }
            }
            Err(e) => {
                let _ = writeln!(out, "  unavailable: {}", e);
            }
        }
        out
    }

    /// Schedulables pending synchronization.
    pub fn syn_status(&self) -> String {
        let mut out = String::from("RM: synchronization queue\n");
        for s in self
            .context
            .applications
            .all()
            .iter()
            .filter(|s| s.state == SchedulableState::Sync)
        {
            let _ = writeln!(
                out,
                "  {:<20} awm {:>4} cluster {:>3}",
                s.str_id(),
                s.next_mode.map_or_else(|| "-".to_string(), |m| m.to_string()),
                s.next_cluster.map_or_else(|| "-".to_string(), |c| c.to_string()),
            );
        }
        out
    }

    // ── Event handlers ──────────────────────────────────────────────

    fn on_exc_start(&self) {
        match self
            .context
            .applications
            .highest_priority(SchedulableState::Ready)
        {
            None => log::info!("RM: overdue START event, nothing ready"),
            Some(s) => {
                log::info!("RM: START of {}, optimization deferred", s.str_id());
                self.optimizer.schedule_in(self.config.exc_start_defer());
            }
        }
    }

    fn on_exc_stop(&self) {
        log::info!("RM: STOP, optimization deferred");
        self.optimizer.schedule_in(self.config.exc_stop_defer());
    }

    fn on_platform_change(&self) {
        log::info!("RM: platform changed, optimizing now");
        self.cycle.mark_platform_event();
        self.optimizer.schedule();
    }

    fn on_optimize_request(&self) {
        log::info!("RM: optimization requested");
        self.optimizer.schedule_in(self.config.opt_request_defer());
    }

    fn on_usr1(&self) {
        log::info!("{}", self.que_status());
        log::info!("{}", self.syn_status());
        log::info!("{}", self.res_status());
        log::info!("{}", self.exc_status());
    }

    fn on_usr2(&self) {
        log::info!("RM: metrics\n{}", self.context.metrics.dump());
    }

    fn on_exit(&self) {
        log::info!("RM: EXIT, shutting down");
        self.done.store(true, Ordering::SeqCst);
        self.pending.wake();

        self.on_usr1();
        self.on_usr2();

        let platform = &self.context.platform;
        for s in self.context.applications.all() {
            if s.state == SchedulableState::Finished {
                continue;
            }
            log::info!("RM: stopping {}", s.str_id());
            let status = platform.reclaim_resources(&s);
            if !status.is_ok() {
                log::warn!("RM: reclaiming {} failed: {}", s.str_id(), status);
            }
            let status = platform.release(&s);
            if !status.is_ok() {
                log::warn!("RM: releasing {} failed: {}", s.str_id(), status);
            }
            self.context.ledger.reclaim(s.id);
            if let Err(e) = self.context.applications.destroy(s.id) {
                log::warn!("RM: destroying {} failed: {}", s.str_id(), e);
            }
        }

        let status = platform.exit();
        if !status.is_ok() {
            log::warn!("RM: platform [{}] exit: {}", platform.name(), status);
        }

        self.context.workers.terminate_workers();
    }

    fn on_abort(&self) {
        log::error!("RM: ABORT, terminating");
        let hook = self.abort_hook.lock().unwrap_or_else(PoisonError::into_inner);
        hook();
    }
}

impl EventHandler for ResourceManager {
    fn handle_event(&self, event: ControlEvent) {
        self.metrics.on_dispatch(event);
        let stopwatch = Stopwatch::new();

        match event {
            ControlEvent::ExcStart => self.on_exc_start(),
            ControlEvent::ExcStop => self.on_exc_stop(),
            ControlEvent::PlatformChange => self.on_platform_change(),
            ControlEvent::OptimizeRequest => self.on_optimize_request(),
            ControlEvent::User1 => self.on_usr1(),
            ControlEvent::User2 => self.on_usr2(),
            ControlEvent::Exit => self.on_exit(),
            ControlEvent::Abort => self.on_abort(),
        }

        self.metrics.on_handled(event, stopwatch.elapsed());
    }
}
