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

//! Long-lived background workers tracked by the resource manager.

/// A background worker that can be asked to terminate.
///
/// `terminate` only *requests* termination; the worker acknowledges by
/// unregistering itself once its thread is about to exit.
pub trait Worker: Send + Sync {
    /// Requests the worker to stop as soon as possible.
    fn terminate(&self);
}
