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
use crate::renderer::error::GpuError;
use std::any::Any;

/// A reusable recording target for GPU commands.
///
/// A list is created `Idle`, moves to `Recording` on [`reset`](Self::reset)
/// and to `Closed` on [`close`](Self::close). Only closed lists can be
/// submitted; a closed list can be reset again. Every recording method fails
/// with `CommandError::InvalidState` outside `Recording`.
pub trait CommandList: Send + std::fmt::Debug {
    /// The current recording state.
    fn state(&self) -> CommandListState;

    /// Starts a new recording backed by `allocator`.
    ///
    /// Fails if the list is recording, or if the allocator was used since its
    /// last reset.
    fn reset(&mut self, allocator: CommandAllocatorId) -> Result<(), GpuError>;

    /// Records resource barriers, executed in order.
    fn resource_barrier(&mut self, barriers: &[ResourceBarrier]) -> Result<(), GpuError>;

    /// Records an acceleration-structure build.
    fn build_acceleration_structure(
        &mut self,
        desc: &BuildAccelerationStructureDesc,
    ) -> Result<(), GpuError>;

    /// Binds the raytracing pipeline used by later dispatches.
    fn set_pipeline_state(&mut self, pipeline: PipelineId) -> Result<(), GpuError>;

    /// Binds the global root signature used by later dispatches.
    fn set_compute_root_signature(&mut self, root_signature: RootSignatureId)
        -> Result<(), GpuError>;

    /// Binds the descriptor table at `parameter_index` to a single view of `resource`.
    fn set_compute_root_descriptor_table(
        &mut self,
        parameter_index: u32,
        resource: ResourceId,
    ) -> Result<(), GpuError>;

    /// Binds a root shader resource view by GPU address.
    fn set_compute_root_shader_resource_view(
        &mut self,
        parameter_index: u32,
        address: GpuVirtualAddress,
    ) -> Result<(), GpuError>;

    /// Binds a root constant buffer view by GPU address.
    fn set_compute_root_constant_buffer_view(
        &mut self,
        parameter_index: u32,
        address: GpuVirtualAddress,
    ) -> Result<(), GpuError>;

    /// Records a ray dispatch.
    fn dispatch_rays(&mut self, desc: &DispatchRaysDesc) -> Result<(), GpuError>;

    /// Records a full-resource copy. Source must be `CopySource`, destination `CopyDest`.
    fn copy_resource(&mut self, dst: ResourceId, src: ResourceId) -> Result<(), GpuError>;

    /// Ends the recording.
    fn close(&mut self) -> Result<(), GpuError>;

    /// Returns a reference to the underlying trait object as `Any`.
    fn as_any(&self) -> &dyn Any;

    /// Returns a mutable reference to the underlying trait object as `Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
