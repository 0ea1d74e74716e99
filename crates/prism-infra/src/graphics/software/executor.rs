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

//! Replays closed command lists on the queue worker.
//!
//! Everything here runs on the GPU timeline: resource states are the ones
//! the previous submissions left behind, and any misuse removes the device
//! with [`DeviceRemovedReason::InvalidCommand`], like a real GPU page fault.

use super::acceleration::{self, DecodedStructure, PackedInstance, PackedTriangle};
use super::command::RecordedCommand;
use super::device::{BuildRecord, SoftwareDeviceInternal, TransitionRecord};
use super::memory::AddressTarget;
use super::shader::{ExportKind, PipelineEntry, Program};
use super::tracer::{self, RayGenParams, Scene, SceneInstance, ShaderRecord, ShaderTable};
use prism_core::renderer::api::*;
use prism_core::renderer::{DeviceRemovedReason, GpuError};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

type ExecResult<T> = Result<T, DeviceRemovedReason>;

fn invalid(message: impl Into<String>) -> DeviceRemovedReason {
    DeviceRemovedReason::InvalidCommand(message.into())
}

fn from_gpu(err: GpuError) -> DeviceRemovedReason {
    match err {
        GpuError::DeviceRemoved(reason) => reason,
        other => invalid(other.to_string()),
    }
}

/// Bytes of camera constants the pinhole program reads: two 4x4 matrices.
const CAMERA_CONSTANTS_READ: u64 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableKind {
    Miss,
    HitGroup,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Miss => write!(f, "miss"),
            TableKind::HitGroup => write!(f, "hit group"),
        }
    }
}

/// Root arguments bound in one command list.
#[derive(Default)]
struct Bindings {
    pipeline: Option<Arc<PipelineEntry>>,
    root_signature: Option<(RootSignatureId, Arc<RootSignatureDesc<'static>>)>,
    tables: HashMap<u32, ResourceId>,
    shader_resource_views: HashMap<u32, GpuVirtualAddress>,
    constant_buffer_views: HashMap<u32, GpuVirtualAddress>,
}

pub(crate) struct Executor {
    device: Arc<SoftwareDeviceInternal>,
}

impl Executor {
    pub fn new(device: Arc<SoftwareDeviceInternal>) -> Self {
        Self { device }
    }

    /// Executes one submission. Acceleration-structure writes stay unflushed
    /// until a UAV barrier, across every list of the submission.
    pub fn execute(&self, serial: u64, lists: &[Arc<Vec<RecordedCommand>>]) -> ExecResult<()> {
        let mut unflushed: HashSet<ResourceId> = HashSet::new();
        for list in lists {
            let mut bindings = Bindings::default();
            for command in list.iter() {
                self.execute_command(serial, command, &mut bindings, &mut unflushed)?;
            }
        }
        Ok(())
    }

    fn execute_command(
        &self,
        serial: u64,
        command: &RecordedCommand,
        bindings: &mut Bindings,
        unflushed: &mut HashSet<ResourceId>,
    ) -> ExecResult<()> {
        match command {
            RecordedCommand::Barrier(ResourceBarrier::Transition {
                resource,
                before,
                after,
            }) => self.transition(serial, *resource, *before, *after),
            RecordedCommand::Barrier(ResourceBarrier::Uav { resource }) => {
                match resource {
                    Some(id) => {
                        unflushed.remove(id);
                    }
                    None => unflushed.clear(),
                }
                Ok(())
            }
            RecordedCommand::BuildAccelerationStructure(desc) => {
                self.build(serial, desc, unflushed)
            }
            RecordedCommand::SetPipelineState(id) => {
                let pipelines = super::device::lock(&self.device.pipelines).map_err(from_gpu)?;
                let pipeline = pipelines.get(id).ok_or_else(|| {
                    invalid(format!("SetPipelineState1 references destroyed pipeline {id:?}"))
                })?;
                bindings.pipeline = Some(Arc::clone(pipeline));
                Ok(())
            }
            RecordedCommand::SetRootSignature(id) => {
                let signatures =
                    super::device::lock(&self.device.root_signatures).map_err(from_gpu)?;
                let signature = signatures.get(id).ok_or_else(|| {
                    invalid(format!(
                        "SetComputeRootSignature references destroyed root signature {id:?}"
                    ))
                })?;
                // Changing the root signature invalidates every root argument.
                bindings.tables.clear();
                bindings.shader_resource_views.clear();
                bindings.constant_buffer_views.clear();
                bindings.root_signature = Some((*id, Arc::clone(signature)));
                Ok(())
            }
            RecordedCommand::SetRootDescriptorTable { index, resource } => {
                self.expect_parameter(bindings, *index, "descriptor table", |p| {
                    matches!(p, RootParameter::DescriptorTable { .. })
                })?;
                bindings.tables.insert(*index, *resource);
                Ok(())
            }
            RecordedCommand::SetRootShaderResourceView { index, address } => {
                self.expect_parameter(bindings, *index, "shader resource view", |p| {
                    matches!(p, RootParameter::ShaderResourceView { .. })
                })?;
                bindings.shader_resource_views.insert(*index, *address);
                Ok(())
            }
            RecordedCommand::SetRootConstantBufferView { index, address } => {
                self.expect_parameter(bindings, *index, "constant buffer view", |p| {
                    matches!(p, RootParameter::ConstantBufferView { .. })
                })?;
                bindings.constant_buffer_views.insert(*index, *address);
                Ok(())
            }
            RecordedCommand::DispatchRays(desc) => self.dispatch(desc, bindings),
            RecordedCommand::CopyResource { dst, src } => self.copy(*dst, *src),
        }
    }

    fn expect_parameter(
        &self,
        bindings: &Bindings,
        index: u32,
        what: &str,
        is_expected: impl Fn(&RootParameter) -> bool,
    ) -> ExecResult<()> {
        let (_, signature) = bindings.root_signature.as_ref().ok_or_else(|| {
            invalid(format!("root {what} set before a compute root signature"))
        })?;
        match signature.parameters.get(index as usize) {
            Some(parameter) if is_expected(parameter) => Ok(()),
            Some(parameter) => Err(invalid(format!(
                "root parameter {index} is {parameter:?}, not a {what}"
            ))),
            None => Err(invalid(format!(
                "root parameter {index} is out of range ({} parameters)",
                signature.parameters.len()
            ))),
        }
    }

    // --- Memory access ---

    fn resolve(&self, address: GpuVirtualAddress, what: &str) -> ExecResult<AddressTarget> {
        self.device.resolve(address).map_err(|err| match err {
            GpuError::Resource(e) => invalid(format!("{what}: {e}")),
            other => from_gpu(other),
        })
    }

    /// Copies `len` readable bytes starting at `address`.
    fn read_region(&self, address: GpuVirtualAddress, len: u64, what: &str) -> ExecResult<Vec<u8>> {
        let target = self.resolve(address, what)?;
        if !target.state.allows_read() {
            return Err(invalid(format!(
                "{what} at {address} is in the {:?} state and cannot be read",
                target.state
            )));
        }
        if len > target.remaining() {
            return Err(invalid(format!(
                "{what} reads {len} bytes at {address}, past the end of its buffer"
            )));
        }
        let data = target
            .data
            .read()
            .map_err(|_| DeviceRemovedReason::DriverInternalError)?;
        let start = target.offset as usize;
        Ok(data[start..start + len as usize].to_vec())
    }

    fn write_region(target: &AddressTarget, bytes: &[u8]) -> ExecResult<()> {
        let mut data = target
            .data
            .write()
            .map_err(|_| DeviceRemovedReason::DriverInternalError)?;
        let start = target.offset as usize;
        let len = bytes.len().min(target.remaining() as usize);
        data[start..start + len].copy_from_slice(&bytes[..len]);
        Ok(())
    }

    // --- Barriers and copies ---

    fn transition(
        &self,
        serial: u64,
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    ) -> ExecResult<()> {
        {
            let mut resources = super::device::lock(&self.device.resources).map_err(from_gpu)?;
            let entry = resources
                .get_mut(resource)
                .map_err(|e| invalid(format!("ResourceBarrier: {e}")))?;
            if entry.heap != HeapType::Default {
                return Err(invalid(format!(
                    "ResourceBarrier: '{}' lives in the {:?} heap and cannot transition",
                    entry.label, entry.heap
                )));
            }
            let structure = ResourceState::RaytracingAccelerationStructure;
            if entry.state == structure || before == structure || after == structure {
                return Err(invalid(format!(
                    "ResourceBarrier: acceleration structure storage '{}' cannot transition",
                    entry.label
                )));
            }
            if !entry.state.is_compatible_with(before) {
                return Err(invalid(format!(
                    "ResourceBarrier: '{}' is in {:?}, but the barrier expects {:?}",
                    entry.label, entry.state, before
                )));
            }
            if after == ResourceState::UnorderedAccess && !entry.allow_unordered_access {
                return Err(invalid(format!(
                    "ResourceBarrier: '{}' does not allow unordered access",
                    entry.label
                )));
            }
            entry.state = after;
        }
        self.device.record_transition(TransitionRecord {
            resource,
            before,
            after,
            submission: serial,
        });
        Ok(())
    }

    fn copy(&self, dst: ResourceId, src: ResourceId) -> ExecResult<()> {
        if dst == src {
            return Err(invalid("CopyResource: source and destination are the same resource"));
        }
        let (src_data, dst_data) = {
            let resources = super::device::lock(&self.device.resources).map_err(from_gpu)?;
            let source = resources
                .get(src)
                .map_err(|e| invalid(format!("CopyResource source: {e}")))?;
            let dest = resources
                .get(dst)
                .map_err(|e| invalid(format!("CopyResource destination: {e}")))?;
            if source.state != ResourceState::CopySource {
                return Err(invalid(format!(
                    "CopyResource: source '{}' is in {:?}, expected CopySource",
                    source.label, source.state
                )));
            }
            if dest.state != ResourceState::CopyDest {
                return Err(invalid(format!(
                    "CopyResource: destination '{}' is in {:?}, expected CopyDest",
                    dest.label, dest.state
                )));
            }
            if source.dimension != dest.dimension {
                return Err(invalid(format!(
                    "CopyResource: '{}' ({:?}) and '{}' ({:?}) differ in shape",
                    source.label, source.dimension, dest.label, dest.dimension
                )));
            }
            (Arc::clone(&source.data), Arc::clone(&dest.data))
        };

        let bytes = src_data
            .read()
            .map_err(|_| DeviceRemovedReason::DriverInternalError)?
            .clone();
        dst_data
            .write()
            .map_err(|_| DeviceRemovedReason::DriverInternalError)?
            .copy_from_slice(&bytes);
        Ok(())
    }

    // --- Acceleration structures ---

    fn build(
        &self,
        serial: u64,
        desc: &BuildAccelerationStructureDesc,
        unflushed: &mut HashSet<ResourceId>,
    ) -> ExecResult<()> {
        let structure = ResourceState::RaytracingAccelerationStructure;
        let dest = self.resolve(desc.dest, "acceleration structure destination")?;
        if dest.state != structure {
            return Err(invalid(format!(
                "acceleration structure destination {} is in {:?}",
                desc.dest, dest.state
            )));
        }
        let scratch = self.resolve(desc.scratch, "acceleration structure scratch")?;
        if scratch.state != ResourceState::UnorderedAccess {
            return Err(invalid(format!(
                "acceleration structure scratch {} is in {:?}, expected UnorderedAccess",
                desc.scratch, scratch.state
            )));
        }

        let mut read_unflushed_input = false;
        let (output, primitive_count) = match &desc.inputs.geometry {
            AccelerationStructureGeometry::Triangles(geometries) => {
                let triangles = self.fetch_triangles(geometries)?;
                (acceleration::build_bottom_level(&triangles), triangles.len())
            }
            AccelerationStructureGeometry::Instances { descs, count } => {
                let bytes = self.read_region(
                    *descs,
                    u64::from(*count) * INSTANCE_DESC_SIZE,
                    "instance descriptors",
                )?;
                let instances: Vec<InstanceDesc> = bytemuck::pod_collect_to_vec(&bytes);
                let mut bounds = Vec::with_capacity(instances.len());
                for (index, instance) in instances.iter().enumerate() {
                    let blas = self.resolve(instance.blas_address(), "instance bottom-level structure")?;
                    if blas.state != structure {
                        return Err(invalid(format!(
                            "instance {index} references {} which is not acceleration structure storage",
                            instance.blas_address()
                        )));
                    }
                    if unflushed.contains(&blas.id) {
                        read_unflushed_input = true;
                        self.device.report_hazard(format!(
                            "Top-level build reads bottom-level structure {} (instance {index}) before a UAV barrier ordered its build",
                            instance.blas_address()
                        ));
                    }
                    let header = {
                        let data = blas
                            .data
                            .read()
                            .map_err(|_| DeviceRemovedReason::DriverInternalError)?;
                        acceleration::read_header(&data[blas.offset as usize..])
                    }
                    .map_err(|e| invalid(format!("instance {index}: {e}")))?;
                    if header.kind() != Some(AccelerationStructureKind::BottomLevel) {
                        return Err(invalid(format!(
                            "instance {index} references a top-level structure"
                        )));
                    }
                    bounds.push(header.bounds());
                }
                (
                    acceleration::build_top_level(&instances, &bounds),
                    instances.len(),
                )
            }
        };

        if output.result.len() as u64 > dest.remaining() {
            return Err(invalid(format!(
                "acceleration structure of {} bytes overflows its destination",
                output.result.len()
            )));
        }
        Self::write_region(&dest, &output.result)?;
        Self::write_region(&scratch, &output.scratch)?;
        unflushed.insert(dest.id);

        self.device.record_build(BuildRecord {
            kind: desc.inputs.kind(),
            dest: desc.dest,
            submission: serial,
            primitive_count: primitive_count as u32,
            read_unflushed_input,
        });
        Ok(())
    }

    fn fetch_triangles(&self, geometries: &[TrianglesGeometryDesc]) -> ExecResult<Vec<PackedTriangle>> {
        let mut triangles = Vec::new();
        for (geometry_index, geometry) in geometries.iter().enumerate() {
            let indices: Vec<u32> = match geometry.index_buffer {
                Some(view) => {
                    let bytes = self.read_region(
                        view.address,
                        u64::from(view.count) * view.format.size(),
                        "index buffer",
                    )?;
                    match view.format {
                        IndexFormat::Uint16 => bytes
                            .chunks_exact(2)
                            .map(|c| u32::from(u16::from_le_bytes([c[0], c[1]])))
                            .collect(),
                        IndexFormat::Uint32 => bytes
                            .chunks_exact(4)
                            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                            .collect(),
                    }
                }
                None => (0..geometry.vertex_count).collect(),
            };
            if indices.is_empty() {
                continue;
            }
            if geometry.vertex_count == 0 {
                return Err(invalid(format!(
                    "geometry {geometry_index} indexes into an empty vertex buffer"
                )));
            }

            let stride = geometry.vertex_stride;
            let vertex_size = geometry.vertex_format.size();
            let span = u64::from(geometry.vertex_count - 1) * stride + vertex_size;
            let vertices = self.read_region(geometry.vertex_buffer, span, "vertex buffer")?;
            let vertex = |index: u32| -> ExecResult<[f32; 3]> {
                if index >= geometry.vertex_count {
                    return Err(invalid(format!(
                        "geometry {geometry_index} index {index} is out of range ({} vertices)",
                        geometry.vertex_count
                    )));
                }
                let start = (u64::from(index) * stride) as usize;
                Ok(bytemuck::pod_read_unaligned(
                    &vertices[start..start + vertex_size as usize],
                ))
            };

            for (primitive_index, corners) in indices.chunks_exact(3).enumerate() {
                let v0 = vertex(corners[0])?;
                let v1 = vertex(corners[1])?;
                let v2 = vertex(corners[2])?;
                // A NaN vertex makes the triangle inactive.
                if [v0, v1, v2].iter().flatten().any(|c| c.is_nan()) {
                    continue;
                }
                triangles.push(PackedTriangle {
                    v0,
                    geometry_index: geometry_index as u32,
                    v1,
                    primitive_index: primitive_index as u32,
                    v2,
                    _pad: 0,
                });
            }
        }
        Ok(triangles)
    }

    fn load_bottom_level(&self, address: GpuVirtualAddress) -> ExecResult<DecodedStructure<PackedTriangle>> {
        let target = self.resolve(address, "bottom-level structure")?;
        if target.state != ResourceState::RaytracingAccelerationStructure {
            return Err(invalid(format!(
                "bottom-level structure {address} is in {:?}",
                target.state
            )));
        }
        let data = target
            .data
            .read()
            .map_err(|_| DeviceRemovedReason::DriverInternalError)?;
        acceleration::decode(&data[target.offset as usize..], AccelerationStructureKind::BottomLevel)
            .map_err(|e| invalid(format!("bottom-level structure {address}: {e}")))
    }

    fn load_scene(&self, address: GpuVirtualAddress) -> ExecResult<Scene> {
        let target = self.resolve(address, "top-level structure")?;
        if target.state != ResourceState::RaytracingAccelerationStructure {
            return Err(invalid(format!(
                "top-level structure {address} is in {:?}",
                target.state
            )));
        }
        let decoded: DecodedStructure<PackedInstance> = {
            let data = target
                .data
                .read()
                .map_err(|_| DeviceRemovedReason::DriverInternalError)?;
            acceleration::decode(&data[target.offset as usize..], AccelerationStructureKind::TopLevel)
                .map_err(|e| invalid(format!("top-level structure {address}: {e}")))?
        };

        let mut cache: HashMap<GpuVirtualAddress, Arc<DecodedStructure<PackedTriangle>>> =
            HashMap::new();
        let mut instances = Vec::with_capacity(decoded.primitives.len());
        for instance in decoded.primitives {
            let blas_address = instance.desc.blas_address();
            let blas = match cache.get(&blas_address) {
                Some(blas) => Arc::clone(blas),
                None => {
                    let blas = Arc::new(self.load_bottom_level(blas_address)?);
                    cache.insert(blas_address, Arc::clone(&blas));
                    blas
                }
            };
            instances.push(SceneInstance { instance, blas });
        }
        Ok(Scene {
            nodes: decoded.nodes,
            instances,
        })
    }

    // --- Dispatch ---

    fn shader_table(
        &self,
        pipeline: &PipelineEntry,
        range: &GpuAddressRangeAndStride,
        kind: TableKind,
    ) -> ExecResult<ShaderTable> {
        if range.size == 0 {
            return Ok(ShaderTable::default());
        }
        if range.start.0 % SHADER_TABLE_ALIGNMENT != 0 {
            return Err(invalid(format!(
                "{kind} table at {} is not {SHADER_TABLE_ALIGNMENT}-byte aligned",
                range.start
            )));
        }
        if range.stride % SHADER_RECORD_ALIGNMENT != 0
            || (range.stride != 0 && range.stride < SHADER_IDENTIFIER_SIZE as u64)
        {
            return Err(invalid(format!(
                "{kind} table stride {} is not a valid record stride",
                range.stride
            )));
        }

        let bytes = self.read_region(range.start, range.size, &format!("{kind} table"))?;
        let record_size = if range.stride == 0 { range.size } else { range.stride } as usize;
        let mut records = Vec::with_capacity(bytes.len() / record_size);
        for (index, record) in bytes.chunks_exact(record_size).enumerate() {
            let identifier = ShaderIdentifier::from_slice(record).ok_or_else(|| {
                invalid(format!("{kind} record {index} is smaller than a shader identifier"))
            })?;
            let program = if identifier.is_null() {
                None
            } else {
                let export = pipeline.resolve(&identifier).ok_or_else(|| {
                    invalid(format!(
                        "{kind} record {index} holds an identifier unknown to pipeline '{}'",
                        pipeline.label
                    ))
                })?;
                match (kind, &export.kind) {
                    (TableKind::Miss, ExportKind::Miss(program)) => Some(program.clone()),
                    (TableKind::HitGroup, ExportKind::HitGroup { closest_hit, .. }) => {
                        closest_hit.clone()
                    }
                    _ => {
                        return Err(invalid(format!(
                            "{kind} record {index} refers to '{}', which is not a {kind} export",
                            export.name
                        )))
                    }
                }
            };
            records.push(ShaderRecord {
                program,
                local_arguments: record[SHADER_IDENTIFIER_SIZE..].to_vec(),
            });
        }
        Ok(ShaderTable {
            records,
            repeat_first: range.stride == 0,
        })
    }

    fn output_image(&self, id: ResourceId) -> ExecResult<(u32, u32, Arc<RwLock<Vec<u8>>>)> {
        let resources = super::device::lock(&self.device.resources).map_err(from_gpu)?;
        let entry = resources
            .get(id)
            .map_err(|e| invalid(format!("raytracing output: {e}")))?;
        let ResourceDimension::Texture2D {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
        } = entry.dimension
        else {
            return Err(invalid(format!(
                "raytracing output '{}' is not an RGBA8 texture",
                entry.label
            )));
        };
        if entry.state != ResourceState::UnorderedAccess {
            return Err(invalid(format!(
                "raytracing output '{}' is in {:?}, expected UnorderedAccess",
                entry.label, entry.state
            )));
        }
        Ok((width, height, Arc::clone(&entry.data)))
    }

    fn dispatch(&self, desc: &DispatchRaysDesc, bindings: &Bindings) -> ExecResult<()> {
        let pipeline = bindings
            .pipeline
            .as_ref()
            .ok_or_else(|| invalid("DispatchRays without a raytracing pipeline"))?;
        let (signature_id, signature) = bindings
            .root_signature
            .as_ref()
            .ok_or_else(|| invalid("DispatchRays without a compute root signature"))?;
        if pipeline.root_signature != *signature_id {
            return Err(invalid(format!(
                "pipeline '{}' expects root signature {:?}, but {:?} is bound",
                pipeline.label, pipeline.root_signature, signature_id
            )));
        }
        let invocations = desc.invocation_count();
        if invocations > self.device.limits.max_dispatch_invocations {
            return Err(invalid(format!(
                "DispatchRays of {invocations} invocations exceeds the device limit"
            )));
        }
        if invocations == 0 {
            return Ok(());
        }

        if desc.ray_generation.start.0 % SHADER_TABLE_ALIGNMENT != 0 {
            return Err(invalid(format!(
                "ray generation record at {} is not {SHADER_TABLE_ALIGNMENT}-byte aligned",
                desc.ray_generation.start
            )));
        }
        let raygen = self.read_region(
            desc.ray_generation.start,
            desc.ray_generation.size,
            "ray generation record",
        )?;
        let identifier = ShaderIdentifier::from_slice(&raygen)
            .ok_or_else(|| invalid("ray generation record is smaller than a shader identifier"))?;
        let program = match pipeline.resolve(&identifier).map(|e| &e.kind) {
            Some(ExportKind::RayGeneration(program)) => program.clone(),
            Some(_) => return Err(invalid("ray generation record does not name a ray generation shader")),
            None => {
                return Err(invalid(format!(
                    "ray generation record holds an identifier unknown to pipeline '{}'",
                    pipeline.label
                )))
            }
        };
        let miss_table = self.shader_table(pipeline, &desc.miss, TableKind::Miss)?;
        let hit_table = self.shader_table(pipeline, &desc.hit_group, TableKind::HitGroup)?;

        let Program::PinholeCamera {
            output,
            scene,
            camera,
            t_min,
            t_max,
            instance_mask,
            ray_contribution,
            geometry_multiplier,
            miss_index,
        } = program
        else {
            return Err(invalid(format!("{program:?} cannot run as ray generation")));
        };

        let output_parameter = signature
            .uav_table_index(output)
            .ok_or_else(|| invalid(format!("root signature has no table for u{output}")))?;
        let output_id = *bindings.tables.get(&output_parameter).ok_or_else(|| {
            invalid(format!("root parameter {output_parameter} (u{output}) is not bound"))
        })?;
        let scene_parameter = signature
            .srv_index(scene)
            .ok_or_else(|| invalid(format!("root signature has no view for t{scene}")))?;
        let scene_address = *bindings
            .shader_resource_views
            .get(&scene_parameter)
            .ok_or_else(|| {
                invalid(format!("root parameter {scene_parameter} (t{scene}) is not bound"))
            })?;
        let camera_parameter = signature
            .cbv_index(camera)
            .ok_or_else(|| invalid(format!("root signature has no view for b{camera}")))?;
        let camera_address = *bindings
            .constant_buffer_views
            .get(&camera_parameter)
            .ok_or_else(|| {
                invalid(format!("root parameter {camera_parameter} (b{camera}) is not bound"))
            })?;

        let (out_width, out_height, image) = self.output_image(output_id)?;
        let camera_bytes = self.read_region(camera_address, CAMERA_CONSTANTS_READ, "camera constants")?;
        let camera = CameraConstants::from_inverses(
            bytemuck::pod_read_unaligned(&camera_bytes[..64]),
            bytemuck::pod_read_unaligned(&camera_bytes[64..128]),
        );
        let scene = self.load_scene(scene_address)?;

        let params = RayGenParams {
            t_min,
            t_max,
            instance_mask,
            ray_contribution,
            geometry_multiplier,
            miss_index,
        };
        let rendered = tracer::render(
            &scene,
            &camera,
            &params,
            &miss_table,
            &hit_table,
            desc.width,
            desc.height,
        );

        // Writes outside the output image are dropped.
        {
            let mut data = image
                .write()
                .map_err(|_| DeviceRemovedReason::DriverInternalError)?;
            let src_row = rendered.width as usize * 4;
            let dst_row = out_width as usize * 4;
            let copy = src_row.min(dst_row);
            let rows = rendered.height.min(out_height) as usize;
            for y in 0..rows {
                data[y * dst_row..y * dst_row + copy]
                    .copy_from_slice(&rendered.pixels[y * src_row..y * src_row + copy]);
            }
        }

        if rendered.unresolved_records > 0 {
            self.device.push_message(
                MessageSeverity::Warning,
                format!(
                    "DispatchRays: {} rays indexed past the end of a shader table",
                    rendered.unresolved_records
                ),
            );
        }
        self.device
            .record_dispatch(invocations, rendered.unresolved_records);
        Ok(())
    }
}
