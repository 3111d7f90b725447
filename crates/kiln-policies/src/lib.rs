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

//! # Kiln Policies
//!
//! Scheduling policies, registered at link time with `inventory` so that
//! the scheduler manager can load them by name.

#![warn(missing_docs)]

pub mod yamca;

pub use yamca::YamcaPolicy;

use kiln_core::control::PolicyRegistration;

/// Names of every policy linked into the binary.
pub fn policy_names() -> Vec<&'static str> {
    let mut names: Vec<_> = PolicyRegistration::iter().map(|r| r.name).collect();
    names.sort_unstable();
    names
}
