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

//! The kiln run-time resource manager daemon.
//!
//! Loads its configuration from `$KILN_CONFIG` (default `kiln.ron`), wires
//! the ledger, the application registry and the platform proxies, then runs
//! the control loop on the main thread. Commands typed on stdin are handled
//! by a console thread until the manager exits.

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use kiln_control::{run_command, Command, ResourceManager, RtrmConfig, SystemContext, WorkerRegistry};
use kiln_core::event::ControlEvent;
use kiln_infra::{HostPlatform, InMemoryApplicationRegistry, InMemoryLedger, PlatformManager, StaticPlatform};
use kiln_telemetry::storage::memory_backend::InMemoryBackend;
use kiln_telemetry::MetricsRegistry;
use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const DEFAULT_CONFIG: &str = "kiln.ron";
const CONSOLE_POLL: Duration = Duration::from_millis(200);
// Roughly the rm event, cycle and policy metrics.
const METRICS_CAPACITY: usize = 64;

fn build_platform(config: &RtrmConfig) -> PlatformManager {
    match &config.platform {
        Some(resources) => {
            PlatformManager::new().with_proxy(Arc::new(StaticPlatform::new(resources.clone())))
        }
        None => PlatformManager::new().with_proxy(Arc::new(HostPlatform::new())),
    }
}

fn print_help() {
    println!("Commands:");
    for command in Command::ALL {
        println!("  {:<16} {}", command.name(), command.help());
    }
    println!("  {:<16} Raise an execution start event", "start");
    println!("  {:<16} Raise an execution stop event", "stop");
    println!("  {:<16} Raise a platform change event", "plat");
    println!("  {:<16} Dump the manager status", "usr1");
    println!("  {:<16} Dump the metrics", "usr2");
    println!("  {:<16} Shut the manager down", "exit");
}

/// Handles one console line; returns `false` once the console should stop.
fn handle_line(rm: &ResourceManager, line: &str) -> bool {
    let event = match line.trim() {
        "" => return true,
        "help" => {
            print_help();
            return true;
        }
        "exit" | "quit" => {
            rm.notify_event(ControlEvent::Exit);
            return false;
        }
        "start" => ControlEvent::ExcStart,
        "stop" => ControlEvent::ExcStop,
        "plat" => ControlEvent::PlatformChange,
        "usr1" => ControlEvent::User1,
        "usr2" => ControlEvent::User2,
        other => {
            match run_command(rm, other) {
                Ok(output) => println!("{}", output),
                Err(e) => println!("{} (type 'help')", e),
            }
            return true;
        }
    };
    rm.notify_event(event);
    true
}

fn read_stdin(lines: Sender<String>) {
    for line in std::io::stdin().lock().lines() {
        match line {
            Ok(line) => {
                if lines.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                log::warn!("kiln: stdin read failed: {}", e);
                break;
            }
        }
    }
    log::debug!("kiln: stdin closed");
}

fn console(rm: Arc<ResourceManager>, lines: Receiver<String>) {
    while !rm.is_done() {
        match lines.recv_timeout(CONSOLE_POLL) {
            Ok(line) => {
                if !handle_line(&rm, &line) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            // Keep serving events without a console.
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn main() -> Result<()> {
    let path = std::env::var("KILN_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let config =
        RtrmConfig::load(&path).with_context(|| format!("failed to load configuration {}", path))?;
    kiln_telemetry::logging::init(&config.log_filter);

    log::info!("kiln: configuration {}", path);
    log::info!("kiln: scheduling policies linked: {:?}", kiln_policies::policy_names());

    let workers = Arc::new(WorkerRegistry::with_budget(
        config.worker_termination_rounds,
        config.worker_termination_timeout(),
    ));
    let context = SystemContext::new(
        Arc::new(InMemoryLedger::new()),
        Arc::new(InMemoryApplicationRegistry::new()),
        Arc::new(build_platform(&config)),
    )
    .with_workers(workers)
    .with_metrics(MetricsRegistry::with_backend(Arc::new(
        InMemoryBackend::with_capacity(METRICS_CAPACITY),
    )));

    let rm = Arc::new(
        ResourceManager::new(context, config).context("failed to create the resource manager")?,
    );

    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("kiln-stdin".into())
        .spawn(move || read_stdin(tx))
        .context("failed to spawn the stdin reader")?;
    let console_rm = Arc::clone(&rm);
    thread::Builder::new()
        .name("kiln-console".into())
        .spawn(move || console(console_rm, rx))
        .context("failed to spawn the console")?;

    rm.go().context("resource manager failed")?;
    log::info!("kiln: terminated");
    Ok(())
}
