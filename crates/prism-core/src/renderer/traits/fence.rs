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

use crate::renderer::api::WaitStatus;
use crate::renderer::error::GpuError;
use std::any::Any;
use std::time::Duration;

/// A monotonically increasing GPU counter the CPU can wait on.
///
/// Work signaled with value `v` is complete iff `completed_value() >= v`.
pub trait Fence: Send + Sync + std::fmt::Debug {
    /// The last value the GPU reached.
    fn completed_value(&self) -> u64;

    /// Blocks until the fence reaches `value` or `timeout` elapses.
    ///
    /// ## Returns
    /// `WaitStatus::TimedOut` on timeout, `DeviceRemoved` if the device is lost while waiting.
    fn wait(&self, value: u64, timeout: Duration) -> Result<WaitStatus, GpuError>;

    /// Returns a reference to the underlying trait object as `Any`.
    fn as_any(&self) -> &dyn Any;
}
