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

//! Textual command surface of the resource manager.

use crate::manager::ResourceManager;
use kiln_core::event::ControlEvent;
use std::fmt;
use std::str::FromStr;

/// Errors raised while parsing a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Blank input.
    #[error("empty command")]
    Empty,
    /// Not a known command name.
    #[error("unsupported command '{0}'")]
    Unsupported(String),
}

/// Result alias for command handling.
pub type CommandResult<T> = Result<T, CommandError>;

/// The commands understood by the resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Dump the status of every schedulable.
    ExcStatus,
    /// Dump the number of schedulables per state.
    QueStatus,
    /// Dump the resource usage.
    ResStatus,
    /// Dump the synchronization queue.
    SynStatus,
    /// Request an optimization.
    OptForce,
}

impl Command {
    /// Every command, in help order.
    pub const ALL: [Command; 5] = [
        Command::ExcStatus,
        Command::QueStatus,
        Command::ResStatus,
        Command::SynStatus,
        Command::OptForce,
    ];

    /// Registered name.
    pub fn name(self) -> &'static str {
        match self {
            Command::ExcStatus => "rm.exc_status",
            Command::QueStatus => "rm.que_status",
            Command::ResStatus => "rm.res_status",
            Command::SynStatus => "rm.syn_status",
            Command::OptForce => "rm.opt_force",
        }
    }

    /// One-line description.
    pub fn help(self) -> &'static str {
        match self {
            Command::ExcStatus => "Dump the status of each registered schedulable",
            Command::QueStatus => "Show the status of the scheduling queues",
            Command::ResStatus => "Dump the status of the registered resources",
            Command::SynStatus => "Show the status of the synchronization queue",
            Command::OptForce => "Force a new scheduling event",
        }
    }

    /// Runs the command, returning its textual output.
    pub fn execute(self, manager: &ResourceManager) -> String {
        match self {
            Command::ExcStatus => manager.exc_status(),
            Command::QueStatus => manager.que_status(),
            Command::ResStatus => manager.res_status(),
            Command::SynStatus => manager.syn_status(),
            Command::OptForce => {
                manager.notify_event(ControlEvent::OptimizeRequest);
                "RM: optimization requested".to_string()
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.split_whitespace().next().ok_or(CommandError::Empty)?;
        Command::ALL
            .iter()
            .copied()
            .find(|c| c.name() == name)
            .ok_or_else(|| CommandError::Unsupported(name.to_string()))
    }
}

/// Parses and runs one command line.
pub fn run_command(manager: &ResourceManager, line: &str) -> CommandResult<String> {
    let command: Command = line.parse()?;
    log::debug!("RM: command [{}]", command);
    Ok(command.execute(manager))
}
