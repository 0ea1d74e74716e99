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

use super::acceleration;
use super::device::{lock, AllocatorState, SoftwareDeviceInternal};
use prism_core::renderer::api::*;
use prism_core::renderer::{BuildError, CommandError, CommandList, GpuError, ResourceError};
use std::any::Any;
use std::sync::Arc;

/// A command as stored in a closed list, replayed by the queue worker.
#[derive(Debug, Clone)]
pub(crate) enum RecordedCommand {
    Barrier(ResourceBarrier),
    BuildAccelerationStructure(BuildAccelerationStructureDesc),
    SetPipelineState(PipelineId),
    SetRootSignature(RootSignatureId),
    SetRootDescriptorTable { index: u32, resource: ResourceId },
    SetRootShaderResourceView { index: u32, address: GpuVirtualAddress },
    SetRootConstantBufferView { index: u32, address: GpuVirtualAddress },
    DispatchRays(DispatchRaysDesc),
    CopyResource { dst: ResourceId, src: ResourceId },
}

/// A command list that records into memory.
///
/// Misuse that the D3D12 debug layer reports at record time (wrong list
/// state, undersized build buffers) is rejected here. Misuse that only shows
/// on the GPU timeline (wrong resource state) is caught when the queue
/// executes the list.
#[derive(Debug)]
pub struct SoftwareCommandList {
    device: Arc<SoftwareDeviceInternal>,
    allocator: CommandAllocatorId,
    state: CommandListState,
    pending: Vec<RecordedCommand>,
    recorded: Arc<Vec<RecordedCommand>>,
}

impl SoftwareCommandList {
    pub(crate) fn new(device: Arc<SoftwareDeviceInternal>, allocator: CommandAllocatorId) -> Self {
        Self {
            device,
            allocator,
            state: CommandListState::Idle,
            pending: Vec::new(),
            recorded: Arc::new(Vec::new()),
        }
    }

    pub(crate) fn allocator(&self) -> CommandAllocatorId {
        self.allocator
    }

    /// The commands of the last closed recording.
    pub(crate) fn recorded(&self) -> Arc<Vec<RecordedCommand>> {
        Arc::clone(&self.recorded)
    }

    fn record(&mut self, command: RecordedCommand) -> Result<(), GpuError> {
        if self.state != CommandListState::Recording {
            return Err(CommandError::InvalidState {
                expected: CommandListState::Recording,
                actual: self.state,
            }
            .into());
        }
        self.pending.push(command);
        Ok(())
    }

    fn check_build(&self, desc: &BuildAccelerationStructureDesc) -> Result<(), GpuError> {
        let count = acceleration::input_primitive_count(&desc.inputs)?;
        let info = acceleration::prebuild_info(desc.inputs.kind(), count);

        if desc.dest.0 % ACCELERATION_STRUCTURE_BYTE_ALIGNMENT != 0 {
            return Err(ResourceError::InvalidDescriptor(format!(
                "acceleration structure destination {} is not {}-byte aligned",
                desc.dest, ACCELERATION_STRUCTURE_BYTE_ALIGNMENT
            ))
            .into());
        }
        let dest = self.device.resolve(desc.dest)?;
        if dest.remaining() < info.result_data_max_size {
            return Err(BuildError::BufferTooSmall {
                what: "destination",
                required: info.result_data_max_size,
                actual: dest.remaining(),
            }
            .into());
        }
        let scratch = self.device.resolve(desc.scratch)?;
        if scratch.remaining() < info.scratch_data_size {
            return Err(BuildError::BufferTooSmall {
                what: "scratch",
                required: info.scratch_data_size,
                actual: scratch.remaining(),
            }
            .into());
        }
        Ok(())
    }
}

impl CommandList for SoftwareCommandList {
    fn state(&self) -> CommandListState {
        self.state
    }

    fn reset(&mut self, allocator: CommandAllocatorId) -> Result<(), GpuError> {
        self.device.check_alive()?;
        if self.state == CommandListState::Recording {
            return Err(CommandError::InvalidState {
                expected: CommandListState::Closed,
                actual: self.state,
            }
            .into());
        }

        {
            let mut allocators = lock(&self.device.allocators)?;
            let entry = allocators
                .get_mut(&allocator)
                .ok_or(CommandError::InvalidAllocator(allocator))?;
            match entry.state {
                AllocatorState::Ready => entry.state = AllocatorState::Recording,
                AllocatorState::Recording => {
                    return Err(CommandError::AllocatorBusy(allocator).into())
                }
                AllocatorState::Used => {
                    return Err(CommandError::AllocatorNotReset(allocator).into())
                }
            }
        }

        self.allocator = allocator;
        self.pending.clear();
        self.state = CommandListState::Recording;
        Ok(())
    }

    fn resource_barrier(&mut self, barriers: &[ResourceBarrier]) -> Result<(), GpuError> {
        for barrier in barriers {
            self.record(RecordedCommand::Barrier(*barrier))?;
        }
        Ok(())
    }

    fn build_acceleration_structure(
        &mut self,
        desc: &BuildAccelerationStructureDesc,
    ) -> Result<(), GpuError> {
        if self.state == CommandListState::Recording {
            self.check_build(desc)?;
        }
        self.record(RecordedCommand::BuildAccelerationStructure(desc.clone()))
    }

    fn set_pipeline_state(&mut self, pipeline: PipelineId) -> Result<(), GpuError> {
        self.record(RecordedCommand::SetPipelineState(pipeline))
    }

    fn set_compute_root_signature(
        &mut self,
        root_signature: RootSignatureId,
    ) -> Result<(), GpuError> {
        self.record(RecordedCommand::SetRootSignature(root_signature))
    }

    fn set_compute_root_descriptor_table(
        &mut self,
        parameter_index: u32,
        resource: ResourceId,
    ) -> Result<(), GpuError> {
        self.record(RecordedCommand::SetRootDescriptorTable {
            index: parameter_index,
            resource,
        })
    }

    fn set_compute_root_shader_resource_view(
        &mut self,
        parameter_index: u32,
        address: GpuVirtualAddress,
    ) -> Result<(), GpuError> {
        self.record(RecordedCommand::SetRootShaderResourceView {
            index: parameter_index,
            address,
        })
    }

    fn set_compute_root_constant_buffer_view(
        &mut self,
        parameter_index: u32,
        address: GpuVirtualAddress,
    ) -> Result<(), GpuError> {
        self.record(RecordedCommand::SetRootConstantBufferView {
            index: parameter_index,
            address,
        })
    }

    fn dispatch_rays(&mut self, desc: &DispatchRaysDesc) -> Result<(), GpuError> {
        self.record(RecordedCommand::DispatchRays(*desc))
    }

    fn copy_resource(&mut self, dst: ResourceId, src: ResourceId) -> Result<(), GpuError> {
        self.record(RecordedCommand::CopyResource { dst, src })
    }

    fn close(&mut self) -> Result<(), GpuError> {
        if self.state != CommandListState::Recording {
            return Err(CommandError::InvalidState {
                expected: CommandListState::Recording,
                actual: self.state,
            }
            .into());
        }
        if let Some(entry) = lock(&self.device.allocators)?.get_mut(&self.allocator) {
            entry.state = AllocatorState::Used;
        }
        self.recorded = Arc::new(std::mem::take(&mut self.pending));
        self.state = CommandListState::Closed;
        log::trace!(
            "SoftwareCommandList: Closed with {} commands",
            self.recorded.len()
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for SoftwareCommandList {
    fn drop(&mut self) {
        // An abandoned recording must not leave its allocator locked.
        if self.state == CommandListState::Recording {
            if let Ok(mut allocators) = self.device.allocators.lock() {
                if let Some(entry) = allocators.get_mut(&self.allocator) {
                    entry.state = AllocatorState::Used;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::software::device::test_device;
    use crate::graphics::software::SoftwareDevice;
    use prism_core::renderer::GraphicsDevice;

    fn device() -> SoftwareDevice {
        test_device()
    }

    #[test]
    fn recording_requires_reset() {
        let device = device();
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(allocator).unwrap();
        assert_eq!(list.state(), CommandListState::Idle);

        let err = list.dispatch_rays(&DispatchRaysDesc::default()).unwrap_err();
        assert_eq!(
            err,
            GpuError::Command(CommandError::InvalidState {
                expected: CommandListState::Recording,
                actual: CommandListState::Idle,
            })
        );
        assert!(list.close().is_err());
    }

    #[test]
    fn closed_list_rejects_commands_until_reset() {
        let device = device();
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(allocator).unwrap();
        list.reset(allocator).unwrap();
        list.copy_resource(ResourceId(0), ResourceId(1)).unwrap();
        list.close().unwrap();
        assert_eq!(list.state(), CommandListState::Closed);
        assert!(list.copy_resource(ResourceId(0), ResourceId(1)).is_err());

        // Recording again needs the allocator reset first.
        assert_eq!(
            list.reset(allocator).unwrap_err(),
            GpuError::Command(CommandError::AllocatorNotReset(allocator))
        );
        device.reset_command_allocator(allocator).unwrap();
        list.reset(allocator).unwrap();
        assert_eq!(list.state(), CommandListState::Recording);
    }

    #[test]
    fn close_keeps_recorded_commands() {
        let device = device();
        let allocator = device.create_command_allocator().unwrap();
        let mut list = SoftwareCommandList::new(Arc::clone(device.internal()), allocator);
        list.reset(allocator).unwrap();
        list.resource_barrier(&[
            ResourceBarrier::Uav { resource: None },
            ResourceBarrier::uav(ResourceId(3)),
        ])
        .unwrap();
        list.close().unwrap();
        assert_eq!(list.recorded().len(), 2);
    }

    #[test]
    fn undersized_build_destination_is_rejected() {
        let device = device();
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(allocator).unwrap();
        list.reset(allocator).unwrap();

        let dest = device
            .create_buffer(&BufferDescriptor::acceleration_structure("tlas", 256))
            .unwrap();
        let scratch = device
            .create_buffer(&BufferDescriptor::scratch("scratch", 4096))
            .unwrap();
        let desc = BuildAccelerationStructureDesc {
            dest: device.gpu_virtual_address(dest).unwrap(),
            inputs: AccelerationStructureInputs {
                geometry: AccelerationStructureGeometry::Instances {
                    descs: GpuVirtualAddress(0x1_0000_0000),
                    count: 64,
                },
                preference: BuildPreference::default(),
            },
            scratch: device.gpu_virtual_address(scratch).unwrap(),
        };
        let err = list.build_acceleration_structure(&desc).unwrap_err();
        assert!(matches!(
            err,
            GpuError::Build(BuildError::BufferTooSmall { what: "destination", actual: 256, .. })
        ));
    }
}
