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

//! Bottom- and top-level acceleration-structure builds.
//!
//! Each build queries the device for its prebuild sizes, allocates the result
//! buffer in the `RaytracingAccelerationStructure` state and a scratch buffer
//! in `UnorderedAccess`, uploads its inputs and records exactly one build
//! command.
//!
//! A top-level build reads the bottom-level structures its instances point
//! at. The caller must order those bottom-level builds first, either with a
//! UAV barrier on their result buffers in the same command list, or by
//! waiting on a fence that completes after them.

use prism_core::math::{align_up, Transform3x4};
use prism_core::renderer::api::*;
use prism_core::renderer::{BuildError, CommandList, GpuError, GraphicsDevice};

/// Bytes of one vertex position.
const VERTEX_STRIDE: u64 = 12;

/// Triangle-list geometry for one bottom-level structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleGeometry {
    pub vertices: Vec<[f32; 3]>,
    /// Three indices per triangle. Without indices every three vertices form a triangle.
    pub indices: Option<Vec<u32>>,
}

impl TriangleGeometry {
    pub fn triangle_count(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.len() / 3,
            None => self.vertices.len() / 3,
        }
    }

    /// Rejects geometry the device would build into an empty or undefined structure.
    pub fn validate(&self) -> Result<(), BuildError> {
        let corners = self
            .indices
            .as_ref()
            .map_or(self.vertices.len(), |indices| indices.len());
        if corners == 0 || self.vertices.is_empty() {
            return Err(BuildError::EmptyGeometry);
        }
        if corners % 3 != 0 {
            return Err(BuildError::MalformedGeometry(format!(
                "{corners} corners do not form whole triangles"
            )));
        }
        if let Some(position) = self
            .vertices
            .iter()
            .position(|v| v.iter().any(|c| !c.is_finite()))
        {
            return Err(BuildError::MalformedGeometry(format!(
                "vertex {position} has a non-finite position"
            )));
        }
        if let Some(indices) = &self.indices {
            let vertex_count = self.vertices.len();
            if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
                return Err(BuildError::MalformedGeometry(format!(
                    "index {bad} is out of range ({vertex_count} vertices)"
                )));
            }
        }
        Ok(())
    }
}

/// A built (or recorded) acceleration structure and the buffers behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccelerationStructure {
    pub kind: AccelerationStructureKind,
    /// The result buffer, permanently in `RaytracingAccelerationStructure`.
    pub result: ResourceId,
    pub scratch: ResourceId,
    /// Upload buffers holding the build inputs.
    pub inputs: Vec<ResourceId>,
    /// GPU address of the structure, bound as a root SRV or referenced by instances.
    pub address: GpuVirtualAddress,
    pub prebuild: PrebuildInfo,
    /// Instances the input buffer can hold. Zero for bottom-level structures.
    pub instance_capacity: u32,
}

impl AccelerationStructure {
    /// Destroys every buffer of the structure. The GPU must be done with it.
    pub fn release(self, device: &dyn GraphicsDevice) -> Result<(), GpuError> {
        device.destroy_resource(self.result)?;
        device.destroy_resource(self.scratch)?;
        for input in self.inputs {
            device.destroy_resource(input)?;
        }
        Ok(())
    }

    fn discard(self, device: &dyn GraphicsDevice) {
        discard_buffers(device, &[self.result, self.scratch]);
        discard_buffers(device, &self.inputs);
    }
}

/// One placement of a bottom-level structure in a top-level structure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    pub blas: GpuVirtualAddress,
    pub transform: Transform3x4,
    pub instance_id: u32,
    pub mask: u8,
    pub hit_group_contribution: u32,
}

impl Instance {
    /// A fully visible instance using hit group 0.
    pub fn new(blas: &AccelerationStructure, transform: Transform3x4) -> Self {
        Self {
            blas: blas.address,
            transform,
            instance_id: 0,
            mask: 0xFF,
            hit_group_contribution: 0,
        }
    }

    fn to_desc(self) -> InstanceDesc {
        InstanceDesc::new(
            self.transform,
            self.instance_id,
            self.mask,
            self.hit_group_contribution,
            instance_flags::NONE,
            self.blas,
        )
    }
}

fn allocate_buffers(
    device: &dyn GraphicsDevice,
    label: &str,
    prebuild: &PrebuildInfo,
) -> Result<(ResourceId, ResourceId), GpuError> {
    let result_size = align_up(
        prebuild.result_data_max_size,
        ACCELERATION_STRUCTURE_BYTE_ALIGNMENT,
    );
    // Scratch may be zero-sized, but a buffer may not.
    let scratch_size = align_up(
        prebuild.scratch_data_size.max(1),
        ACCELERATION_STRUCTURE_BYTE_ALIGNMENT,
    );
    let result = device.create_buffer(&BufferDescriptor::acceleration_structure(label, result_size))?;
    let scratch_label = format!("{label} scratch");
    let scratch = match device.create_buffer(&BufferDescriptor::scratch(&scratch_label, scratch_size)) {
        Ok(id) => id,
        Err(e) => {
            device.destroy_resource(result)?;
            return Err(e);
        }
    };
    Ok((result, scratch))
}

fn upload(device: &dyn GraphicsDevice, label: &str, bytes: &[u8]) -> Result<ResourceId, GpuError> {
    let buffer = device.create_buffer(&BufferDescriptor::upload(label, bytes.len() as u64))?;
    if let Err(e) = device.write_buffer(buffer, 0, bytes) {
        discard_buffers(device, &[buffer]);
        return Err(e);
    }
    Ok(buffer)
}

/// Destroys buffers on an error path, keeping the original error.
fn discard_buffers(device: &dyn GraphicsDevice, buffers: &[ResourceId]) {
    for &id in buffers {
        if let Err(e) = device.destroy_resource(id) {
            log::warn!("Failed to release build buffer {id:?}: {e}");
        }
    }
}

/// Allocates the result and scratch buffers for `build_inputs` and takes
/// ownership of the uploaded `inputs`. Every buffer is destroyed on failure.
fn allocate_structure(
    device: &dyn GraphicsDevice,
    kind: AccelerationStructureKind,
    label: &str,
    build_inputs: &AccelerationStructureInputs,
    inputs: Vec<ResourceId>,
    instance_capacity: u32,
) -> Result<AccelerationStructure, GpuError> {
    let allocated = device
        .acceleration_structure_prebuild_info(build_inputs)
        .and_then(|prebuild| {
            allocate_buffers(device, label, &prebuild).map(|buffers| (prebuild, buffers))
        });
    let (prebuild, (result, scratch)) = match allocated {
        Ok(allocated) => allocated,
        Err(e) => {
            discard_buffers(device, &inputs);
            return Err(e);
        }
    };

    let mut structure = AccelerationStructure {
        kind,
        result,
        scratch,
        inputs,
        address: GpuVirtualAddress::default(),
        prebuild,
        instance_capacity,
    };
    match device.gpu_virtual_address(result) {
        Ok(address) => structure.address = address,
        Err(e) => {
            structure.discard(device);
            return Err(e);
        }
    }
    Ok(structure)
}

/// Records the build of `structure`, destroying it if recording fails.
fn record_build(
    device: &dyn GraphicsDevice,
    list: &mut dyn CommandList,
    structure: AccelerationStructure,
    build_inputs: AccelerationStructureInputs,
) -> Result<AccelerationStructure, GpuError> {
    let recorded = device.gpu_virtual_address(structure.scratch).and_then(|scratch| {
        list.build_acceleration_structure(&BuildAccelerationStructureDesc {
            dest: structure.address,
            inputs: build_inputs,
            scratch,
        })
    });
    match recorded {
        Ok(()) => Ok(structure),
        Err(e) => {
            structure.discard(device);
            Err(e)
        }
    }
}

fn upload_geometry(
    device: &dyn GraphicsDevice,
    geometry: &TriangleGeometry,
    label: &str,
    inputs: &mut Vec<ResourceId>,
) -> Result<AccelerationStructureInputs, GpuError> {
    let vertex_bytes: &[u8] = bytemuck::cast_slice(&geometry.vertices);
    let vertex_buffer = upload(device, &format!("{label} vertices"), vertex_bytes)?;
    inputs.push(vertex_buffer);
    let index_buffer = match &geometry.indices {
        Some(indices) => {
            let buffer = upload(
                device,
                &format!("{label} indices"),
                bytemuck::cast_slice(indices),
            )?;
            inputs.push(buffer);
            Some(IndexBufferView {
                address: device.gpu_virtual_address(buffer)?,
                count: indices.len() as u32,
                format: IndexFormat::Uint32,
            })
        }
        None => None,
    };

    Ok(AccelerationStructureInputs {
        geometry: AccelerationStructureGeometry::Triangles(vec![TrianglesGeometryDesc {
            vertex_buffer: device.gpu_virtual_address(vertex_buffer)?,
            vertex_stride: VERTEX_STRIDE,
            vertex_count: geometry.vertices.len() as u32,
            vertex_format: VertexFormat::Float32x3,
            index_buffer,
            flags: GeometryFlags::Opaque,
        }]),
        preference: BuildPreference::PreferFastTrace,
    })
}

/// Uploads `geometry` and records the build of a bottom-level structure.
///
/// On failure every buffer created for the build is destroyed again.
pub fn build_bottom_level(
    device: &dyn GraphicsDevice,
    list: &mut dyn CommandList,
    geometry: &TriangleGeometry,
    label: &str,
) -> Result<AccelerationStructure, GpuError> {
    geometry.validate()?;

    let mut inputs = Vec::with_capacity(2);
    let build_inputs = match upload_geometry(device, geometry, label, &mut inputs) {
        Ok(build_inputs) => build_inputs,
        Err(e) => {
            discard_buffers(device, &inputs);
            return Err(e);
        }
    };
    let structure = allocate_structure(
        device,
        AccelerationStructureKind::BottomLevel,
        label,
        &build_inputs,
        inputs,
        0,
    )?;
    let structure = record_build(device, list, structure, build_inputs)?;

    log::debug!(
        "Recorded bottom-level build '{}': {} triangles, result {} bytes, scratch {} bytes",
        label,
        geometry.triangle_count(),
        structure.prebuild.result_data_max_size,
        structure.prebuild.scratch_data_size
    );
    Ok(structure)
}

fn instance_inputs(
    device: &dyn GraphicsDevice,
    instance_buffer: ResourceId,
    count: u32,
) -> Result<AccelerationStructureInputs, GpuError> {
    Ok(AccelerationStructureInputs {
        geometry: AccelerationStructureGeometry::Instances {
            descs: device.gpu_virtual_address(instance_buffer)?,
            count,
        },
        preference: BuildPreference::PreferFastTrace,
    })
}

fn instance_bytes(instances: &[Instance]) -> Result<Vec<u8>, BuildError> {
    if instances.is_empty() {
        return Err(BuildError::EmptyGeometry);
    }
    let mut descs = Vec::with_capacity(instances.len());
    for (index, instance) in instances.iter().enumerate() {
        if instance.blas.is_null() {
            return Err(BuildError::MalformedInstances(format!(
                "instance {index} references no bottom-level structure"
            )));
        }
        if !instance.transform.is_finite() {
            return Err(BuildError::MalformedInstances(format!(
                "instance {index} has a non-finite transform"
            )));
        }
        descs.push(instance.to_desc());
    }
    Ok(bytemuck::cast_slice(&descs).to_vec())
}

/// Uploads instance descriptors and records the build of a top-level structure.
pub fn build_top_level(
    device: &dyn GraphicsDevice,
    list: &mut dyn CommandList,
    instances: &[Instance],
    label: &str,
) -> Result<AccelerationStructure, GpuError> {
    let bytes = instance_bytes(instances)?;
    let count = instances.len() as u32;
    let instance_buffer = upload(device, &format!("{label} instances"), &bytes)?;

    let build_inputs = match instance_inputs(device, instance_buffer, count) {
        Ok(build_inputs) => build_inputs,
        Err(e) => {
            discard_buffers(device, &[instance_buffer]);
            return Err(e);
        }
    };
    let structure = allocate_structure(
        device,
        AccelerationStructureKind::TopLevel,
        label,
        &build_inputs,
        vec![instance_buffer],
        count,
    )?;
    let structure = record_build(device, list, structure, build_inputs)?;

    log::debug!(
        "Recorded top-level build '{}': {} instances, result {} bytes",
        label,
        count,
        structure.prebuild.result_data_max_size
    );
    Ok(structure)
}

/// Records a new build of `tlas` from `instances`, reusing its buffers when they are large enough.
///
/// The GPU must have finished every earlier use of `tlas`: its instance buffer
/// is rewritten from the CPU right away.
pub fn rebuild_top_level(
    device: &dyn GraphicsDevice,
    list: &mut dyn CommandList,
    tlas: &mut AccelerationStructure,
    instances: &[Instance],
    label: &str,
) -> Result<(), GpuError> {
    if tlas.kind != AccelerationStructureKind::TopLevel {
        return Err(BuildError::MalformedInstances(
            "only top-level structures can be rebuilt from instances".to_string(),
        )
        .into());
    }
    let bytes = instance_bytes(instances)?;
    let count = instances.len() as u32;

    let fits = count <= tlas.instance_capacity && {
        let inputs = instance_inputs(device, tlas.inputs[0], count)?;
        let prebuild = device.acceleration_structure_prebuild_info(&inputs)?;
        prebuild.result_data_max_size <= tlas.prebuild.result_data_max_size
            && prebuild.scratch_data_size <= tlas.prebuild.scratch_data_size
    };
    if !fits {
        log::debug!(
            "Top-level structure '{}' outgrew its buffers ({} -> {} instances), reallocating",
            label,
            tlas.instance_capacity,
            count
        );
        let rebuilt = build_top_level(device, list, instances, label)?;
        let old = std::mem::replace(tlas, rebuilt);
        return old.release(device);
    }

    device.write_buffer(tlas.inputs[0], 0, &bytes)?;
    list.build_acceleration_structure(&BuildAccelerationStructureDesc {
        dest: tlas.address,
        inputs: instance_inputs(device, tlas.inputs[0], count)?,
        scratch: device.gpu_virtual_address(tlas.scratch)?,
    })?;
    log::trace!("Recorded top-level rebuild '{label}' with {count} instances in place");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> TriangleGeometry {
        TriangleGeometry {
            vertices: vec![[0.0, 0.5, 0.0], [0.5, -0.5, 0.0], [-0.5, -0.5, 0.0]],
            indices: None,
        }
    }

    #[test]
    fn triangle_is_valid() {
        assert!(triangle().validate().is_ok());
        assert_eq!(triangle().triangle_count(), 1);
    }

    #[test]
    fn empty_geometry_is_rejected() {
        assert_eq!(
            TriangleGeometry::default().validate(),
            Err(BuildError::EmptyGeometry)
        );
    }

    #[test]
    fn partial_and_non_finite_triangles_are_rejected() {
        let mut partial = triangle();
        partial.vertices.pop();
        assert!(matches!(partial.validate(), Err(BuildError::MalformedGeometry(_))));

        let mut nan = triangle();
        nan.vertices[1][2] = f32::NAN;
        assert!(matches!(nan.validate(), Err(BuildError::MalformedGeometry(_))));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut indexed = triangle();
        indexed.indices = Some(vec![0, 1, 3]);
        assert!(matches!(indexed.validate(), Err(BuildError::MalformedGeometry(_))));
    }

    #[test]
    fn instances_need_a_blas() {
        let instance = Instance {
            blas: GpuVirtualAddress::NULL,
            transform: Transform3x4::IDENTITY,
            instance_id: 0,
            mask: 0xFF,
            hit_group_contribution: 0,
        };
        assert!(matches!(
            instance_bytes(&[instance]),
            Err(BuildError::MalformedInstances(_))
        ));
        assert_eq!(instance_bytes(&[]), Err(BuildError::EmptyGeometry));
    }
}
