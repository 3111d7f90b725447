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

//! # Kiln Control
//!
//! The orchestration core of the resource manager: a priority-ordered event
//! dispatcher, a debounced optimization trigger, the readiness gate that
//! keeps at most one optimization cycle running, the worker registry used
//! for a bounded shutdown, and the schedule-then-synchronize cycle itself.

#![warn(missing_docs)]

pub mod commands;
pub mod config;
pub mod context;
pub mod cycle;
pub mod deferrable;
pub mod dispatcher;
pub mod manager;
mod metrics;
pub mod readiness;
pub mod scheduler;
pub mod sync;
pub mod workers;

pub use commands::{run_command, Command, CommandError, CommandResult};
pub use config::{ConfigError, ConfigResult, RtrmConfig};
pub use context::SystemContext;
pub use cycle::{CycleOutcome, OptimizationCycle};
pub use deferrable::Deferrable;
pub use dispatcher::{EventHandler, PendingEvents};
pub use manager::{ManagerError, ResourceManager};
pub use readiness::ReadinessGate;
pub use scheduler::SchedulerManager;
pub use sync::SyncManager;
pub use workers::{TerminationReport, WorkerRegistry};
