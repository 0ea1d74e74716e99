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
use crate::renderer::traits::{CommandQueue, GraphicsDevice, PresentationSurface};
use std::sync::Arc;

/// Describes the swapchain to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDescriptor {
    /// Width of each back buffer.
    pub width: u32,
    /// Height of each back buffer.
    pub height: u32,
    /// Number of back buffers.
    pub back_buffer_count: u32,
}

/// Entry point of a concrete backend.
///
/// It performs adapter selection and device creation, and hands out the
/// presentation surface, which is owned by the platform layer rather than
/// by the raytracing lane.
pub trait GraphicsBackend: Send + Sync + std::fmt::Debug {
    /// Selects an adapter and creates the device on it.
    ///
    /// ## Errors
    /// * `GpuError::NoCapableAdapter` - If no adapter supports raytracing.
    fn create_device(&self) -> Result<Arc<dyn GraphicsDevice>, GpuError>;

    /// Creates a swapchain presenting through `queue`.
    fn create_surface(
        &self,
        device: &Arc<dyn GraphicsDevice>,
        queue: &dyn CommandQueue,
        descriptor: &SurfaceDescriptor,
    ) -> Result<Box<dyn PresentationSurface>, GpuError>;
}
