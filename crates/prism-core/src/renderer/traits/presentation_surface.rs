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

use crate::renderer::api::ResourceId;
use crate::renderer::error::GpuError;

/// A swapchain: a ring of back buffers handed to the presentation engine.
///
/// Back buffers are textures in the `Present` state between frames.
pub trait PresentationSurface: Send + std::fmt::Debug {
    /// Number of back buffers in the ring.
    fn back_buffer_count(&self) -> u32;

    /// Index of the back buffer the next frame must render into.
    fn current_back_buffer_index(&self) -> u32;

    /// Returns the back buffer at `index`.
    fn back_buffer(&self, index: u32) -> Result<ResourceId, GpuError>;

    /// Queues the current back buffer for presentation and advances the ring.
    fn present(&mut self, sync_interval: u32) -> Result<(), GpuError>;
}
