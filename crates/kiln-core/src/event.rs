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

//! The closed set of control events understood by the resource manager.

use std::fmt;

/// An event notified to the resource manager control loop.
///
/// The discriminant is the event priority: the dispatcher scans pending
/// events from the highest ordinal ([`ControlEvent::Abort`]) down to the
/// lowest ([`ControlEvent::ExcStart`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ControlEvent {
    /// An execution context has been enabled and asks for resources.
    ExcStart = 0,
    /// An execution context has been disabled or has exited.
    ExcStop,
    /// The platform changed (resources added/removed, thermal warnings, ...).
    PlatformChange,
    /// An explicit optimization request coming from an application.
    OptimizeRequest,
    /// First user signal: dump queues and status.
    User1,
    /// Second user signal: dump collected metrics.
    User2,
    /// Orderly shutdown of the resource manager.
    Exit,
    /// Unrecoverable condition: terminate the process immediately.
    Abort,
}

/// How the dispatcher proceeds after the handler of an event returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Keep scanning lower-priority pending events in the same pass.
    Continue,
    /// End the current pass; remaining events wait for the next wake-up.
    Yield,
    /// The handler never returns control to the dispatcher.
    Fatal,
}

impl ControlEvent {
    /// Number of distinct control events.
    pub const COUNT: usize = 8;

    /// All events, in ascending priority order.
    pub const ALL: [ControlEvent; Self::COUNT] = [
        ControlEvent::ExcStart,
        ControlEvent::ExcStop,
        ControlEvent::PlatformChange,
        ControlEvent::OptimizeRequest,
        ControlEvent::User1,
        ControlEvent::User2,
        ControlEvent::Exit,
        ControlEvent::Abort,
    ];

    /// The position of this event in the pending set.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The dispatch priority; higher values are serviced first.
    pub fn priority(self) -> u8 {
        self as u8
    }

    /// Returns the event at the given pending-set position.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Short tag used in metric names and logs.
    pub fn tag(self) -> &'static str {
        match self {
            ControlEvent::ExcStart => "start",
            ControlEvent::ExcStop => "stop",
            ControlEvent::PlatformChange => "plat",
            ControlEvent::OptimizeRequest => "opts",
            ControlEvent::User1 => "usr1",
            ControlEvent::User2 => "usr2",
            ControlEvent::Exit => "exit",
            ControlEvent::Abort => "abort",
        }
    }

    /// What the dispatcher does once this event has been handled.
    pub fn dispatch_mode(self) -> DispatchMode {
        match self {
            ControlEvent::User1 | ControlEvent::User2 | ControlEvent::Exit => DispatchMode::Yield,
            ControlEvent::Abort => DispatchMode::Fatal,
            _ => DispatchMode::Continue,
        }
    }
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlEvent::ExcStart => "EXC_START",
            ControlEvent::ExcStop => "EXC_STOP",
            ControlEvent::PlatformChange => "PLAT",
            ControlEvent::OptimizeRequest => "OPTS",
            ControlEvent::User1 => "USR1",
            ControlEvent::User2 => "USR2",
            ControlEvent::Exit => "EXIT",
            ControlEvent::Abort => "ABORT",
        };
        f.write_str(name)
    }
}
