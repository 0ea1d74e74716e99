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
use super::command::SoftwareCommandList;
use super::fence::{FenceShared, SoftwareFence};
use super::memory::{AddressTarget, ResourceTable};
use super::queue::{QueueTimeline, SoftwareQueue};
use super::shader::{self, PipelineEntry};
use prism_core::renderer::api::*;
use prism_core::renderer::{
    CommandError, CommandList, CommandQueue, DeviceRemovedReason, Fence, GpuError,
    GraphicsDevice, PipelineError, ResourceError,
};
use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

const MESSAGE_QUEUE_CAPACITY: usize = 1024;
const TRANSITION_HISTORY_CAPACITY: usize = 4096;

/// Locks a device table. A poisoned lock means a queue worker panicked, which
/// the device reports as an internal driver error.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, GpuError> {
    mutex.lock().map_err(|_| {
        log::error!("SoftwareDevice: A device mutex was poisoned.");
        GpuError::DeviceRemoved(DeviceRemovedReason::DriverInternalError)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AllocatorState {
    Ready,
    Recording,
    Used,
}

#[derive(Debug)]
pub(crate) struct AllocatorEntry {
    pub state: AllocatorState,
    /// The queue and submission serial that last executed lists recorded from it.
    pub last_submission: Option<(Arc<QueueTimeline>, u64)>,
}

/// One executed acceleration-structure build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRecord {
    pub kind: AccelerationStructureKind,
    pub dest: GpuVirtualAddress,
    pub submission: u64,
    pub primitive_count: u32,
    /// The build read a structure written earlier in the same submission
    /// without an intervening UAV barrier.
    pub read_unflushed_input: bool,
}

/// One executed transition barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRecord {
    pub resource: ResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
    pub submission: u64,
}

#[derive(Debug, Default)]
struct Diagnostics {
    hazard_count: u64,
    unresolved_records: u64,
    rays_traced: u64,
    builds: Vec<BuildRecord>,
    transitions: VecDeque<TransitionRecord>,
}

/// The state shared between the device, its queues, lists, fences and swapchains.
#[derive(Debug)]
pub(crate) struct SoftwareDeviceInternal {
    pub adapter: AdapterInfo,
    pub limits: DeviceLimits,
    pub resources: Mutex<ResourceTable>,
    pub allocators: Mutex<HashMap<CommandAllocatorId, AllocatorEntry>>,
    pub root_signatures: Mutex<HashMap<RootSignatureId, Arc<RootSignatureDesc<'static>>>>,
    pub pipelines: Mutex<HashMap<PipelineId, Arc<PipelineEntry>>>,

    next_resource_id: AtomicUsize,
    next_allocator_id: AtomicUsize,
    next_root_signature_id: AtomicUsize,
    next_pipeline_id: AtomicUsize,
    next_queue_id: AtomicU64,

    removed: Mutex<Option<DeviceRemovedReason>>,
    fences: Mutex<Vec<Weak<FenceShared>>>,
    messages: Mutex<VecDeque<ValidationMessage>>,
    diagnostics: Mutex<Diagnostics>,
}

impl SoftwareDeviceInternal {
    pub fn removed_reason(&self) -> Option<DeviceRemovedReason> {
        match self.removed.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => Some(DeviceRemovedReason::DriverInternalError),
        }
    }

    pub fn check_alive(&self) -> Result<(), GpuError> {
        match self.removed_reason() {
            Some(reason) => Err(GpuError::DeviceRemoved(reason)),
            None => Ok(()),
        }
    }

    /// Marks the device as removed. The first reason wins.
    pub fn remove_device(&self, reason: DeviceRemovedReason) {
        {
            let Ok(mut removed) = self.removed.lock() else {
                return;
            };
            if removed.is_some() {
                return;
            }
            *removed = Some(reason.clone());
        }
        log::error!("SoftwareDevice: Device removed: {reason}");
        self.push_message(MessageSeverity::Corruption, format!("Device removed: {reason}"));

        // Waiters blocked on fences must observe the removal.
        if let Ok(mut fences) = self.fences.lock() {
            fences.retain(|weak| match weak.upgrade() {
                Some(fence) => {
                    fence.wake();
                    true
                }
                None => false,
            });
        }
    }

    pub fn push_message(&self, severity: MessageSeverity, text: impl Into<String>) {
        let text = text.into();
        match severity {
            MessageSeverity::Info => log::debug!("SoftwareDevice: {text}"),
            MessageSeverity::Warning => log::warn!("SoftwareDevice: {text}"),
            MessageSeverity::Error | MessageSeverity::Corruption => {
                log::error!("SoftwareDevice: {text}")
            }
        }
        if let Ok(mut messages) = self.messages.lock() {
            if messages.len() == MESSAGE_QUEUE_CAPACITY {
                messages.pop_front();
            }
            messages.push_back(ValidationMessage { severity, text });
        }
    }

    pub fn register_fence(&self, fence: &Arc<FenceShared>) {
        if let Ok(mut fences) = self.fences.lock() {
            fences.push(Arc::downgrade(fence));
        }
    }

    pub fn next_queue_id(&self) -> u64 {
        self.next_queue_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn resolve(&self, address: GpuVirtualAddress) -> Result<AddressTarget, GpuError> {
        Ok(lock(&self.resources)?.resolve(address)?)
    }

    pub fn report_hazard(&self, text: String) {
        if let Ok(mut diagnostics) = self.diagnostics.lock() {
            diagnostics.hazard_count += 1;
        }
        self.push_message(MessageSeverity::Warning, text);
    }

    pub fn record_build(&self, record: BuildRecord) {
        if let Ok(mut diagnostics) = self.diagnostics.lock() {
            diagnostics.builds.push(record);
        }
    }

    pub fn record_transition(&self, record: TransitionRecord) {
        if let Ok(mut diagnostics) = self.diagnostics.lock() {
            if diagnostics.transitions.len() == TRANSITION_HISTORY_CAPACITY {
                diagnostics.transitions.pop_front();
            }
            diagnostics.transitions.push_back(record);
        }
    }

    pub fn record_dispatch(&self, rays: u64, unresolved_records: u64) {
        if let Ok(mut diagnostics) = self.diagnostics.lock() {
            diagnostics.rays_traced += rays;
            diagnostics.unresolved_records += unresolved_records;
        }
    }
}

/// A device that executes raytracing work on the CPU.
///
/// Cloning yields another handle to the same device.
#[derive(Clone, Debug)]
pub struct SoftwareDevice {
    internal: Arc<SoftwareDeviceInternal>,
}

impl SoftwareDevice {
    pub fn new(adapter: AdapterInfo, limits: DeviceLimits) -> Self {
        log::info!(
            "SoftwareDevice: Creating device on '{}' (raytracing {}, budget {} MiB)",
            adapter.name,
            adapter.raytracing_tier,
            adapter.memory_budget_bytes / (1024 * 1024)
        );
        Self {
            internal: Arc::new(SoftwareDeviceInternal {
                resources: Mutex::new(ResourceTable::new(adapter.memory_budget_bytes)),
                adapter,
                limits,
                allocators: Mutex::new(HashMap::new()),
                root_signatures: Mutex::new(HashMap::new()),
                pipelines: Mutex::new(HashMap::new()),
                next_resource_id: AtomicUsize::new(0),
                next_allocator_id: AtomicUsize::new(0),
                next_root_signature_id: AtomicUsize::new(0),
                next_pipeline_id: AtomicUsize::new(0),
                next_queue_id: AtomicU64::new(0),
                removed: Mutex::new(None),
                fences: Mutex::new(Vec::new()),
                messages: Mutex::new(VecDeque::new()),
                diagnostics: Mutex::new(Diagnostics::default()),
            }),
        }
    }

    pub(crate) fn from_internal(internal: Arc<SoftwareDeviceInternal>) -> Self {
        Self { internal }
    }

    pub(crate) fn internal(&self) -> &Arc<SoftwareDeviceInternal> {
        &self.internal
    }

    // --- ID Generation Helpers ---

    fn generate_resource_id(&self) -> ResourceId {
        ResourceId(self.internal.next_resource_id.fetch_add(1, Ordering::Relaxed))
    }

    fn generate_allocator_id(&self) -> CommandAllocatorId {
        CommandAllocatorId(
            self.internal
                .next_allocator_id
                .fetch_add(1, Ordering::Relaxed),
        )
    }

    fn generate_root_signature_id(&self) -> RootSignatureId {
        RootSignatureId(
            self.internal
                .next_root_signature_id
                .fetch_add(1, Ordering::Relaxed),
        )
    }

    fn generate_pipeline_id(&self) -> PipelineId {
        PipelineId(
            self.internal
                .next_pipeline_id
                .fetch_add(1, Ordering::Relaxed),
        )
    }

    // --- Inspection ---

    /// Number of builds that read a structure still being written.
    pub fn hazard_count(&self) -> u64 {
        lock(&self.internal.diagnostics)
            .map(|d| d.hazard_count)
            .unwrap_or_default()
    }

    /// Shader-table lookups that fell outside their table.
    pub fn unresolved_record_count(&self) -> u64 {
        lock(&self.internal.diagnostics)
            .map(|d| d.unresolved_records)
            .unwrap_or_default()
    }

    pub fn rays_traced(&self) -> u64 {
        lock(&self.internal.diagnostics)
            .map(|d| d.rays_traced)
            .unwrap_or_default()
    }

    /// Every acceleration-structure build the queue executed, in order.
    pub fn build_log(&self) -> Vec<BuildRecord> {
        lock(&self.internal.diagnostics)
            .map(|d| d.builds.clone())
            .unwrap_or_default()
    }

    /// The recent transitions of one resource, oldest first.
    pub fn transition_history(&self, resource: ResourceId) -> Vec<TransitionRecord> {
        lock(&self.internal.diagnostics)
            .map(|d| {
                d.transitions
                    .iter()
                    .filter(|t| t.resource == resource)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The state of a resource on the GPU timeline.
    pub fn resource_state(&self, id: ResourceId) -> Result<ResourceState, GpuError> {
        Ok(lock(&self.internal.resources)?.get(id)?.state)
    }

    /// Bytes committed by live resources.
    pub fn allocated_bytes(&self) -> u64 {
        lock(&self.internal.resources)
            .map(|t| t.allocated_bytes())
            .unwrap_or_default()
    }

    /// Reads any resource, regardless of heap. Call only once the GPU is idle.
    pub fn debug_read_resource(&self, id: ResourceId) -> Result<Vec<u8>, GpuError> {
        let data = Arc::clone(&lock(&self.internal.resources)?.get(id)?.data);
        let bytes = data
            .read()
            .map_err(|_| GpuError::DeviceRemoved(DeviceRemovedReason::DriverInternalError))?;
        Ok(bytes.clone())
    }

    /// Simulates a removal, as a TDR or driver update would cause.
    pub fn inject_device_removed(&self, reason: DeviceRemovedReason) {
        self.internal.remove_device(reason);
    }

    fn validate_buffer(descriptor: &BufferDescriptor) -> Result<(), ResourceError> {
        let invalid = |msg: &str| Err(ResourceError::InvalidDescriptor(msg.to_string()));
        if descriptor.size == 0 {
            return invalid("buffers must not be empty");
        }
        match descriptor.heap {
            HeapType::Upload => {
                if descriptor.initial_state != ResourceState::GenericRead {
                    return invalid("upload heap buffers must start in GenericRead");
                }
                if descriptor.allow_unordered_access {
                    return invalid("upload heap buffers cannot allow unordered access");
                }
            }
            HeapType::Readback => {
                if descriptor.initial_state != ResourceState::CopyDest {
                    return invalid("readback heap buffers must start in CopyDest");
                }
            }
            HeapType::Default => {}
        }
        if descriptor.initial_state == ResourceState::RaytracingAccelerationStructure
            && (descriptor.heap != HeapType::Default || !descriptor.allow_unordered_access)
        {
            return invalid(
                "acceleration structure buffers live in the default heap and allow unordered access",
            );
        }
        if descriptor.initial_state == ResourceState::UnorderedAccess
            && !descriptor.allow_unordered_access
        {
            return invalid("UnorderedAccess requires allow_unordered_access");
        }
        Ok(())
    }
}

fn owned_label(label: &Option<Cow<'_, str>>, fallback: &str) -> String {
    label.as_deref().unwrap_or(fallback).to_string()
}

impl GraphicsDevice for SoftwareDevice {
    fn adapter_info(&self) -> AdapterInfo {
        self.internal.adapter.clone()
    }

    fn limits(&self) -> DeviceLimits {
        self.internal.limits
    }

    fn create_command_queue(&self) -> Result<Box<dyn CommandQueue>, GpuError> {
        self.internal.check_alive()?;
        let queue = SoftwareQueue::new(Arc::clone(&self.internal))?;
        Ok(Box::new(queue))
    }

    fn create_command_allocator(&self) -> Result<CommandAllocatorId, GpuError> {
        self.internal.check_alive()?;
        let id = self.generate_allocator_id();
        lock(&self.internal.allocators)?.insert(
            id,
            AllocatorEntry {
                state: AllocatorState::Ready,
                last_submission: None,
            },
        );
        log::debug!("SoftwareDevice: Created command allocator with ID: {id:?}");
        Ok(id)
    }

    fn reset_command_allocator(&self, allocator: CommandAllocatorId) -> Result<(), GpuError> {
        self.internal.check_alive()?;
        let mut allocators = lock(&self.internal.allocators)?;
        let entry = allocators
            .get_mut(&allocator)
            .ok_or(CommandError::InvalidAllocator(allocator))?;
        if entry.state == AllocatorState::Recording {
            return Err(CommandError::AllocatorBusy(allocator).into());
        }
        if let Some((timeline, pending)) = &entry.last_submission {
            let completed = timeline.completed();
            if completed < *pending {
                return Err(CommandError::AllocatorInFlight {
                    allocator,
                    pending: *pending,
                    completed,
                }
                .into());
            }
        }
        entry.state = AllocatorState::Ready;
        entry.last_submission = None;
        Ok(())
    }

    fn create_command_list(
        &self,
        allocator: CommandAllocatorId,
    ) -> Result<Box<dyn CommandList>, GpuError> {
        self.internal.check_alive()?;
        if !lock(&self.internal.allocators)?.contains_key(&allocator) {
            return Err(CommandError::InvalidAllocator(allocator).into());
        }
        Ok(Box::new(SoftwareCommandList::new(
            Arc::clone(&self.internal),
            allocator,
        )))
    }

    fn create_fence(&self, initial_value: u64) -> Result<Box<dyn Fence>, GpuError> {
        self.internal.check_alive()?;
        Ok(Box::new(SoftwareFence::new(
            Arc::clone(&self.internal),
            initial_value,
        )))
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<ResourceId, GpuError> {
        self.internal.check_alive()?;
        Self::validate_buffer(descriptor)?;

        let id = self.generate_resource_id();
        let label = owned_label(&descriptor.label, "unnamed buffer");
        lock(&self.internal.resources)?.insert(
            id,
            label.clone(),
            ResourceDimension::Buffer {
                size: descriptor.size,
            },
            descriptor.heap,
            descriptor.initial_state,
            descriptor.allow_unordered_access,
        )?;

        log::debug!(
            "SoftwareDevice: Created buffer '{}' with ID: {:?}, size: {} bytes, heap: {:?}",
            label,
            id,
            descriptor.size,
            descriptor.heap
        );
        Ok(id)
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<ResourceId, GpuError> {
        self.internal.check_alive()?;
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(ResourceError::InvalidDescriptor(
                "textures must have a non-zero size".to_string(),
            )
            .into());
        }
        if descriptor.initial_state == ResourceState::UnorderedAccess
            && !descriptor.allow_unordered_access
        {
            return Err(ResourceError::InvalidDescriptor(
                "UnorderedAccess requires allow_unordered_access".to_string(),
            )
            .into());
        }

        let id = self.generate_resource_id();
        let label = owned_label(&descriptor.label, "unnamed texture");
        lock(&self.internal.resources)?.insert(
            id,
            label.clone(),
            ResourceDimension::Texture2D {
                width: descriptor.width,
                height: descriptor.height,
                format: descriptor.format,
            },
            HeapType::Default,
            descriptor.initial_state,
            descriptor.allow_unordered_access,
        )?;

        log::debug!(
            "SoftwareDevice: Created texture '{}' with ID: {:?}, {}x{} {:?}",
            label,
            id,
            descriptor.width,
            descriptor.height,
            descriptor.format
        );
        Ok(id)
    }

    fn destroy_resource(&self, id: ResourceId) -> Result<(), GpuError> {
        let entry = lock(&self.internal.resources)?.remove(id)?;
        log::debug!("SoftwareDevice: Destroyed resource '{}' ({id:?})", entry.label);
        Ok(())
    }

    fn write_buffer(&self, id: ResourceId, offset: u64, data: &[u8]) -> Result<(), GpuError> {
        self.internal.check_alive()?;
        let storage = {
            let resources = lock(&self.internal.resources)?;
            let entry = resources.get(id)?;
            if !entry.heap.is_cpu_writable() {
                return Err(ResourceError::NotCpuAccessible(id).into());
            }
            let size = entry.size();
            let len = data.len() as u64;
            if offset.checked_add(len).map_or(true, |end| end > size) {
                return Err(ResourceError::OutOfBounds {
                    resource: id,
                    offset,
                    len,
                    size,
                }
                .into());
            }
            Arc::clone(&entry.data)
        };

        let mut bytes = storage
            .write()
            .map_err(|_| GpuError::DeviceRemoved(DeviceRemovedReason::DriverInternalError))?;
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        log::trace!(
            "SoftwareDevice: Wrote {} bytes to {:?} at offset {}",
            data.len(),
            id,
            offset
        );
        Ok(())
    }

    fn read_buffer(&self, id: ResourceId) -> Result<Vec<u8>, GpuError> {
        let storage = {
            let resources = lock(&self.internal.resources)?;
            let entry = resources.get(id)?;
            if !entry.heap.is_cpu_readable() {
                return Err(ResourceError::NotCpuAccessible(id).into());
            }
            Arc::clone(&entry.data)
        };
        let bytes = storage
            .read()
            .map_err(|_| GpuError::DeviceRemoved(DeviceRemovedReason::DriverInternalError))?;
        Ok(bytes.clone())
    }

    fn gpu_virtual_address(&self, id: ResourceId) -> Result<GpuVirtualAddress, GpuError> {
        let resources = lock(&self.internal.resources)?;
        let entry = resources.get(id)?;
        entry.address.ok_or_else(|| {
            GpuError::Resource(ResourceError::InvalidDescriptor(format!(
                "'{}' is a texture and has no GPU virtual address",
                entry.label
            )))
        })
    }

    fn resource_dimension(&self, id: ResourceId) -> Result<ResourceDimension, GpuError> {
        Ok(lock(&self.internal.resources)?.get(id)?.dimension)
    }

    fn acceleration_structure_prebuild_info(
        &self,
        inputs: &AccelerationStructureInputs,
    ) -> Result<PrebuildInfo, GpuError> {
        let count = acceleration::input_primitive_count(inputs)?;
        Ok(acceleration::prebuild_info(inputs.kind(), count))
    }

    fn create_root_signature(
        &self,
        descriptor: &RootSignatureDesc,
    ) -> Result<RootSignatureId, GpuError> {
        self.internal.check_alive()?;
        let owned = RootSignatureDesc {
            label: descriptor
                .label
                .as_ref()
                .map(|l| Cow::Owned(l.to_string())),
            parameters: descriptor.parameters.clone(),
        };
        let id = self.generate_root_signature_id();
        lock(&self.internal.root_signatures)?.insert(id, Arc::new(owned));
        log::debug!(
            "SoftwareDevice: Created root signature '{}' with ID: {:?} ({} parameters)",
            owned_label(&descriptor.label, "root signature"),
            id,
            descriptor.parameters.len()
        );
        Ok(id)
    }

    fn create_raytracing_pipeline(
        &self,
        descriptor: &RaytracingPipelineDesc,
    ) -> Result<PipelineId, GpuError> {
        self.internal.check_alive()?;
        let limits = self.internal.limits;
        let id = self.generate_pipeline_id();

        let result = (|| -> Result<PipelineEntry, PipelineError> {
            if !lock(&self.internal.root_signatures)
                .map_err(|_| PipelineError::InvalidRootSignature(descriptor.global_root_signature))?
                .contains_key(&descriptor.global_root_signature)
            {
                return Err(PipelineError::InvalidRootSignature(
                    descriptor.global_root_signature,
                ));
            }
            if descriptor.max_recursion_depth > limits.max_recursion_depth {
                return Err(PipelineError::RecursionDepthExceeded {
                    requested: descriptor.max_recursion_depth,
                    limit: limits.max_recursion_depth,
                });
            }
            let config = descriptor.shader_config;
            if config.max_payload_size_in_bytes > limits.max_payload_size_in_bytes {
                return Err(PipelineError::ShaderConfigExceeded {
                    what: "payload",
                    requested: config.max_payload_size_in_bytes,
                    limit: limits.max_payload_size_in_bytes,
                });
            }
            if config.max_attribute_size_in_bytes > limits.max_attribute_size_in_bytes {
                return Err(PipelineError::ShaderConfigExceeded {
                    what: "attributes",
                    requested: config.max_attribute_size_in_bytes,
                    limit: limits.max_attribute_size_in_bytes,
                });
            }

            let mut libraries = Vec::with_capacity(descriptor.libraries.len());
            for (index, library) in descriptor.libraries.iter().enumerate() {
                let label = library
                    .label
                    .as_deref()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("library {index}"));
                let parsed = shader::parse_library(&label, &library.bytecode)?;
                libraries.push((label, parsed));
            }
            // Identifiers are salted with the pipeline id so they differ between pipelines.
            shader::link_pipeline(id.0 as u64 + 1, descriptor, libraries)
        })();

        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                self.internal.push_message(
                    MessageSeverity::Error,
                    format!("CreateStateObject failed: {err}"),
                );
                return Err(err.into());
            }
        };

        log::info!(
            "SoftwareDevice: Created raytracing pipeline '{}' with ID: {:?}",
            entry.label,
            id
        );
        lock(&self.internal.pipelines)?.insert(id, Arc::new(entry));
        Ok(id)
    }

    fn shader_identifier(
        &self,
        pipeline: PipelineId,
        export: &str,
    ) -> Result<ShaderIdentifier, GpuError> {
        let pipelines = lock(&self.internal.pipelines)?;
        let entry = pipelines
            .get(&pipeline)
            .ok_or(PipelineError::InvalidPipeline(pipeline))?;
        entry
            .export(export)
            .map(|e| e.identifier)
            .ok_or_else(|| PipelineError::ExportNotFound(export.to_string()).into())
    }

    fn destroy_pipeline(&self, id: PipelineId) -> Result<(), GpuError> {
        lock(&self.internal.pipelines)?
            .remove(&id)
            .ok_or(PipelineError::InvalidPipeline(id))?;
        log::debug!("SoftwareDevice: Destroyed raytracing pipeline with ID: {id:?}");
        Ok(())
    }

    fn destroy_root_signature(&self, id: RootSignatureId) -> Result<(), GpuError> {
        lock(&self.internal.root_signatures)?
            .remove(&id)
            .ok_or(PipelineError::InvalidRootSignature(id))?;
        log::debug!("SoftwareDevice: Destroyed root signature with ID: {id:?}");
        Ok(())
    }

    fn device_removed_reason(&self) -> Option<DeviceRemovedReason> {
        self.internal.removed_reason()
    }

    fn drain_validation_messages(&self) -> Vec<ValidationMessage> {
        match self.internal.messages.lock() {
            Ok(mut messages) => messages.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// A software device with a 1 MiB budget for unit tests.
#[cfg(test)]
pub(crate) fn test_device() -> SoftwareDevice {
    SoftwareDevice::new(
        AdapterInfo {
            name: "test adapter".to_string(),
            vendor_id: 0,
            device_id: 0,
            kind: AdapterKind::Software,
            raytracing_tier: RaytracingTier::Tier1_1,
            memory_budget_bytes: 1 << 20,
        },
        DeviceLimits::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> SoftwareDevice {
        test_device()
    }

    #[test]
    fn upload_buffer_round_trips_cpu_data() {
        let device = device();
        let id = device
            .create_buffer(&BufferDescriptor::upload("vertices", 36))
            .unwrap();
        device.write_buffer(id, 4, &[1, 2, 3]).unwrap();
        let bytes = device.read_buffer(id).unwrap();
        assert_eq!(&bytes[..8], &[0, 0, 0, 0, 1, 2, 3, 0]);
    }

    #[test]
    fn write_past_the_end_is_rejected() {
        let device = device();
        let id = device
            .create_buffer(&BufferDescriptor::upload("small", 4))
            .unwrap();
        let err = device.write_buffer(id, 2, &[0; 4]).unwrap_err();
        assert!(matches!(
            err,
            GpuError::Resource(ResourceError::OutOfBounds { offset: 2, len: 4, size: 4, .. })
        ));
    }

    #[test]
    fn default_heap_is_not_cpu_accessible() {
        let device = device();
        let id = device
            .create_buffer(&BufferDescriptor::acceleration_structure("blas", 256))
            .unwrap();
        assert_eq!(
            device.write_buffer(id, 0, &[0]).unwrap_err(),
            GpuError::Resource(ResourceError::NotCpuAccessible(id))
        );
        assert!(device.debug_read_resource(id).is_ok());
    }

    #[test]
    fn upload_buffer_must_start_in_generic_read() {
        let device = device();
        let mut desc = BufferDescriptor::upload("bad", 16);
        desc.initial_state = ResourceState::Common;
        assert!(matches!(
            device.create_buffer(&desc),
            Err(GpuError::Resource(ResourceError::InvalidDescriptor(_)))
        ));
    }

    #[test]
    fn budget_exhaustion_is_an_allocation_failure() {
        let device = device();
        let err = device
            .create_buffer(&BufferDescriptor::upload("huge", 2 << 20))
            .unwrap_err();
        assert!(matches!(
            err,
            GpuError::Resource(ResourceError::AllocationFailure { .. })
        ));
    }

    #[test]
    fn removal_fails_later_calls_and_queues_a_message() {
        let device = device();
        device.inject_device_removed(DeviceRemovedReason::Hung);
        device.inject_device_removed(DeviceRemovedReason::Reset);

        assert_eq!(device.device_removed_reason(), Some(DeviceRemovedReason::Hung));
        assert!(device
            .create_buffer(&BufferDescriptor::upload("late", 16))
            .unwrap_err()
            .is_device_removed());
        let messages = device.drain_validation_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].severity, MessageSeverity::Corruption);
        assert!(device.drain_validation_messages().is_empty());
    }

    #[test]
    fn allocator_cannot_be_reset_while_recording() {
        let device = device();
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(allocator).unwrap();
        list.reset(allocator).unwrap();
        assert_eq!(
            device.reset_command_allocator(allocator).unwrap_err(),
            GpuError::Command(CommandError::AllocatorBusy(allocator))
        );
        list.close().unwrap();
        device.reset_command_allocator(allocator).unwrap();
    }

    #[test]
    fn prebuild_rejects_partial_triangles() {
        let device = device();
        let inputs = AccelerationStructureInputs {
            geometry: AccelerationStructureGeometry::Triangles(vec![TrianglesGeometryDesc {
                vertex_buffer: GpuVirtualAddress(0x1_0000_0000),
                vertex_stride: 12,
                vertex_count: 4,
                vertex_format: VertexFormat::Float32x3,
                index_buffer: None,
                flags: GeometryFlags::Opaque,
            }]),
            preference: BuildPreference::default(),
        };
        assert!(matches!(
            device.acceleration_structure_prebuild_info(&inputs),
            Err(GpuError::Build(prism_core::renderer::BuildError::MalformedGeometry(_)))
        ));
    }
}
