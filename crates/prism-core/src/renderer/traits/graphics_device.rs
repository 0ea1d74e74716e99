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

use crate::renderer::api::*;
use crate::renderer::error::{DeviceRemovedReason, GpuError};
use crate::renderer::traits::{CommandList, CommandQueue, Fence};
use std::fmt::Debug;

/// The device: creates and owns every other GPU object.
///
/// The device is destroyed last. Once it has been removed, every method that
/// talks to the GPU returns [`GpuError::DeviceRemoved`].
pub trait GraphicsDevice: Send + Sync + Debug + 'static {
    /// Get the adapter information of the device.
    fn adapter_info(&self) -> AdapterInfo;

    /// Get the hard limits pipelines and dispatches must respect.
    fn limits(&self) -> DeviceLimits;

    /// Creates the command queue. Work submitted to it executes in submission order.
    /// ## Returns
    /// The queue, or `DeviceRemoved` if the device is gone.
    fn create_command_queue(&self) -> Result<Box<dyn CommandQueue>, GpuError>;

    /// Creates a command allocator, initially reset.
    fn create_command_allocator(&self) -> Result<CommandAllocatorId, GpuError>;

    /// Resets an allocator so a command list may record from it again.
    /// ## Errors
    /// * `CommandError::AllocatorInFlight` - If the GPU has not finished the last submission that used it.
    /// * `CommandError::AllocatorBusy` - If a command list is still recording from it.
    fn reset_command_allocator(&self, allocator: CommandAllocatorId) -> Result<(), GpuError>;

    /// Creates a command list in the `Idle` state, bound to `allocator`.
    fn create_command_list(&self, allocator: CommandAllocatorId)
        -> Result<Box<dyn CommandList>, GpuError>;

    /// Creates a fence whose completed value starts at `initial_value`.
    fn create_fence(&self, initial_value: u64) -> Result<Box<dyn Fence>, GpuError>;

    /// Creates a new buffer.
    /// ## Arguments
    /// * `descriptor` - Size, heap, initial state and access flags.
    /// ## Errors
    /// * `ResourceError::AllocationFailure` - If the adapter budget is exhausted.
    /// * `ResourceError::InvalidDescriptor` - If the options are inconsistent (e.g. an upload buffer not in `GenericRead`).
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<ResourceId, GpuError>;

    /// Creates a new 2D texture in the default heap.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<ResourceId, GpuError>;

    /// Releases a resource. The caller guarantees the GPU no longer uses it.
    fn destroy_resource(&self, id: ResourceId) -> Result<(), GpuError>;

    /// Writes CPU data into an upload-heap buffer.
    /// ## Arguments
    /// * `id` - The buffer to write to.
    /// * `offset` - Byte offset into the buffer.
    /// * `data` - The bytes to write.
    fn write_buffer(&self, id: ResourceId, offset: u64, data: &[u8]) -> Result<(), GpuError>;

    /// Reads back the whole content of an upload or readback resource.
    fn read_buffer(&self, id: ResourceId) -> Result<Vec<u8>, GpuError>;

    /// Returns the GPU virtual address of a buffer.
    fn gpu_virtual_address(&self, id: ResourceId) -> Result<GpuVirtualAddress, GpuError>;

    /// Returns the shape of a resource.
    fn resource_dimension(&self, id: ResourceId) -> Result<ResourceDimension, GpuError>;

    /// Queries the result and scratch sizes a build with `inputs` needs.
    fn acceleration_structure_prebuild_info(
        &self,
        inputs: &AccelerationStructureInputs,
    ) -> Result<PrebuildInfo, GpuError>;

    /// Creates a root signature.
    fn create_root_signature(&self, descriptor: &RootSignatureDesc)
        -> Result<RootSignatureId, GpuError>;

    /// Links a raytracing pipeline.
    /// ## Errors
    /// * `PipelineError::ShaderCompileFailure` - If a library blob is rejected.
    /// * `PipelineError::MissingExport` - If a hit group imports an unknown export.
    /// * `PipelineError::RecursionDepthExceeded` / `ShaderConfigExceeded` - If a device limit is exceeded.
    fn create_raytracing_pipeline(
        &self,
        descriptor: &RaytracingPipelineDesc,
    ) -> Result<PipelineId, GpuError>;

    /// Returns the identifier of an export or hit group of `pipeline`.
    /// ## Errors
    /// * `PipelineError::ExportNotFound` - If the pipeline has no such export.
    fn shader_identifier(&self, pipeline: PipelineId, export: &str)
        -> Result<ShaderIdentifier, GpuError>;

    /// Releases a pipeline.
    fn destroy_pipeline(&self, id: PipelineId) -> Result<(), GpuError>;

    /// Releases a root signature.
    fn destroy_root_signature(&self, id: RootSignatureId) -> Result<(), GpuError>;

    /// Returns why the device was removed, or `None` while it is healthy.
    fn device_removed_reason(&self) -> Option<DeviceRemovedReason>;

    /// Takes every pending validation message out of the device's queue.
    fn drain_validation_messages(&self) -> Vec<ValidationMessage>;
}
