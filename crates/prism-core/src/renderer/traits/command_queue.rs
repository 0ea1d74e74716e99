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

use crate::renderer::error::GpuError;
use crate::renderer::traits::{CommandList, Fence};
use std::any::Any;

/// A FIFO submission channel bound to one device.
pub trait CommandQueue: Send + Sync + std::fmt::Debug {
    /// Submits closed command lists. Their work becomes visible to the GPU in
    /// submission order. The lists stay `Closed` until they are reset.
    fn execute_command_lists(&self, lists: &[&dyn CommandList]) -> Result<(), GpuError>;

    /// Sets `fence` to `value` once all previously submitted work has completed.
    fn signal(&self, fence: &dyn Fence, value: u64) -> Result<(), GpuError>;

    /// Returns a reference to the underlying trait object as `Any`.
    fn as_any(&self) -> &dyn Any;
}
