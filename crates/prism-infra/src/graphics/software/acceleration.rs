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

//! On-GPU layout of software acceleration structures.
//!
//! A built structure is a header, its BVH nodes and its primitive records,
//! written back to back into the result buffer:
//!
//! ```text
//! [AsHeader][BvhNode; node_count][PackedTriangle | PackedInstance; primitive_count]
//! ```
//!
//! Prebuild sizes are upper bounds derived from the primitive count, so a
//! result buffer sized from them always fits the build.

use super::bvh::{build_bvh, max_node_count, Aabb, BvhNode};
use prism_core::math::{align_up, Transform3x4, Vec3};
use prism_core::renderer::api::{
    AccelerationStructureGeometry, AccelerationStructureInputs, AccelerationStructureKind,
    InstanceDesc, PrebuildInfo, ACCELERATION_STRUCTURE_BYTE_ALIGNMENT,
};
use prism_core::renderer::BuildError;
use std::mem::size_of;

/// "PRAS" in little endian.
pub const AS_MAGIC: u32 = 0x5341_5250;

const KIND_BOTTOM: u32 = 0;
const KIND_TOP: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AsHeader {
    pub magic: u32,
    pub kind: u32,
    pub node_count: u32,
    pub primitive_count: u32,
    pub bounds_min: [f32; 4],
    pub bounds_max: [f32; 4],
}

impl AsHeader {
    pub fn kind(&self) -> Option<AccelerationStructureKind> {
        match (self.magic, self.kind) {
            (AS_MAGIC, KIND_BOTTOM) => Some(AccelerationStructureKind::BottomLevel),
            (AS_MAGIC, KIND_TOP) => Some(AccelerationStructureKind::TopLevel),
            _ => None,
        }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb {
            min: Vec3::new(self.bounds_min[0], self.bounds_min[1], self.bounds_min[2]),
            max: Vec3::new(self.bounds_max[0], self.bounds_max[1], self.bounds_max[2]),
        }
    }
}

/// A triangle as stored in a bottom-level structure.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PackedTriangle {
    pub v0: [f32; 3],
    pub geometry_index: u32,
    pub v1: [f32; 3],
    pub primitive_index: u32,
    pub v2: [f32; 3],
    pub _pad: u32,
}

impl PackedTriangle {
    pub fn positions(&self) -> [Vec3; 3] {
        [
            Vec3::from_array(self.v0),
            Vec3::from_array(self.v1),
            Vec3::from_array(self.v2),
        ]
    }
}

/// An instance as stored in a top-level structure, with its inverse transform baked in.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PackedInstance {
    pub desc: InstanceDesc,
    pub world_to_object: Transform3x4,
}

/// One entry of the build scratch area.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ScratchPrimitive {
    pub centroid: [f32; 3],
    pub index: u32,
}

fn result_size(primitive_count: usize, primitive_size: usize) -> u64 {
    let bytes = size_of::<AsHeader>()
        + max_node_count(primitive_count) * size_of::<BvhNode>()
        + primitive_count * primitive_size;
    align_up(bytes as u64, ACCELERATION_STRUCTURE_BYTE_ALIGNMENT)
}

fn scratch_size(primitive_count: usize) -> u64 {
    let bytes = (primitive_count.max(1) * size_of::<ScratchPrimitive>()) as u64;
    align_up(bytes, ACCELERATION_STRUCTURE_BYTE_ALIGNMENT)
}

/// Prebuild sizes for `primitive_count` triangles or instances.
pub fn prebuild_info(kind: AccelerationStructureKind, primitive_count: usize) -> PrebuildInfo {
    let primitive_size = match kind {
        AccelerationStructureKind::BottomLevel => size_of::<PackedTriangle>(),
        AccelerationStructureKind::TopLevel => size_of::<PackedInstance>(),
    };
    PrebuildInfo {
        result_data_max_size: result_size(primitive_count, primitive_size),
        scratch_data_size: scratch_size(primitive_count),
    }
}

/// The bytes written to the result and scratch buffers by one build.
pub struct BuildOutput {
    pub result: Vec<u8>,
    pub scratch: Vec<u8>,
}

fn serialize<P: bytemuck::Pod>(
    kind: u32,
    bounds: &[Aabb],
    primitives: &[P],
) -> BuildOutput {
    let bvh = build_bvh(bounds);

    let mut total = Aabb::empty();
    for b in bounds {
        total.grow_with(b);
    }
    let header = AsHeader {
        magic: AS_MAGIC,
        kind,
        node_count: bvh.nodes.len() as u32,
        primitive_count: primitives.len() as u32,
        bounds_min: [total.min.x, total.min.y, total.min.z, 0.0],
        bounds_max: [total.max.x, total.max.y, total.max.z, 0.0],
    };

    let mut result = Vec::with_capacity(
        size_of::<AsHeader>() + bvh.nodes.len() * size_of::<BvhNode>() + std::mem::size_of_val(primitives),
    );
    result.extend_from_slice(bytemuck::bytes_of(&header));
    result.extend_from_slice(bytemuck::cast_slice(&bvh.nodes));
    // Leaves index primitives in BVH order, so store them in that order.
    for &index in &bvh.primitive_indices {
        result.extend_from_slice(bytemuck::bytes_of(&primitives[index as usize]));
    }

    let scratch: Vec<ScratchPrimitive> = bvh
        .primitive_indices
        .iter()
        .map(|&index| {
            let c = bounds[index as usize].centroid();
            ScratchPrimitive {
                centroid: c.to_array(),
                index,
            }
        })
        .collect();

    BuildOutput {
        result,
        scratch: bytemuck::cast_slice(&scratch).to_vec(),
    }
}

/// Builds a bottom-level structure over already fetched triangles.
pub fn build_bottom_level(triangles: &[PackedTriangle]) -> BuildOutput {
    let bounds: Vec<Aabb> = triangles
        .iter()
        .map(|t| Aabb::from_points(&t.positions()))
        .collect();
    serialize(KIND_BOTTOM, &bounds, triangles)
}

/// Builds a top-level structure. `blas_bounds[i]` is the object-space bounds
/// of the bottom-level structure instance `i` refers to.
pub fn build_top_level(instances: &[InstanceDesc], blas_bounds: &[Aabb]) -> BuildOutput {
    let mut packed = Vec::with_capacity(instances.len());
    let mut bounds = Vec::with_capacity(instances.len());
    for (desc, local) in instances.iter().zip(blas_bounds) {
        let world = if local.is_empty() {
            Aabb::empty()
        } else {
            let corners = local.corners().map(|c| desc.transform.transform_point(c));
            Aabb::from_points(&corners)
        };
        bounds.push(world);
        packed.push(PackedInstance {
            desc: *desc,
            world_to_object: desc.transform.inverse().unwrap_or(Transform3x4::IDENTITY),
        });
    }
    serialize(KIND_TOP, &bounds, &packed)
}

/// A decoded view of a built structure.
#[derive(Debug, Clone)]
pub struct DecodedStructure<P> {
    pub header: AsHeader,
    pub nodes: Vec<BvhNode>,
    pub primitives: Vec<P>,
}

/// Reasons a result buffer cannot be read back as a structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Truncated,
    NotAnAccelerationStructure,
    WrongKind(AccelerationStructureKind),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "acceleration structure data is truncated"),
            DecodeError::NotAnAccelerationStructure => {
                write!(f, "address does not hold a built acceleration structure")
            }
            DecodeError::WrongKind(kind) => write!(f, "expected a {kind:?} structure"),
        }
    }
}

pub fn read_header(bytes: &[u8]) -> Result<AsHeader, DecodeError> {
    let head = bytes
        .get(..size_of::<AsHeader>())
        .ok_or(DecodeError::Truncated)?;
    let header: AsHeader = bytemuck::pod_read_unaligned(head);
    if header.kind().is_none() {
        return Err(DecodeError::NotAnAccelerationStructure);
    }
    Ok(header)
}

pub fn decode<P: bytemuck::Pod>(
    bytes: &[u8],
    expected: AccelerationStructureKind,
) -> Result<DecodedStructure<P>, DecodeError> {
    let header = read_header(bytes)?;
    match header.kind() {
        Some(kind) if kind == expected => {}
        Some(kind) => return Err(DecodeError::WrongKind(kind)),
        None => return Err(DecodeError::NotAnAccelerationStructure),
    }

    let nodes_start = size_of::<AsHeader>();
    let nodes_end = nodes_start + header.node_count as usize * size_of::<BvhNode>();
    let prims_end = nodes_end + header.primitive_count as usize * size_of::<P>();
    let node_bytes = bytes.get(nodes_start..nodes_end).ok_or(DecodeError::Truncated)?;
    let prim_bytes = bytes.get(nodes_end..prims_end).ok_or(DecodeError::Truncated)?;

    Ok(DecodedStructure {
        header,
        nodes: bytemuck::pod_collect_to_vec(node_bytes),
        primitives: bytemuck::pod_collect_to_vec(prim_bytes),
    })
}

/// Counts the triangles or instances a build consumes, rejecting unusable inputs.
pub fn input_primitive_count(inputs: &AccelerationStructureInputs) -> Result<usize, BuildError> {
    match &inputs.geometry {
        AccelerationStructureGeometry::Triangles(geometries) => {
            let mut total = 0usize;
            for (index, geometry) in geometries.iter().enumerate() {
                if geometry.vertex_stride < geometry.vertex_format.size() {
                    return Err(BuildError::MalformedGeometry(format!(
                        "geometry {index} has a vertex stride of {} bytes, smaller than one vertex",
                        geometry.vertex_stride
                    )));
                }
                let count = geometry.triangle_count().ok_or_else(|| {
                    BuildError::MalformedGeometry(format!(
                        "geometry {index} does not describe whole triangles"
                    ))
                })?;
                total += count as usize;
            }
            if total == 0 {
                return Err(BuildError::EmptyGeometry);
            }
            Ok(total)
        }
        AccelerationStructureGeometry::Instances { count, .. } => {
            if *count == 0 {
                return Err(BuildError::EmptyGeometry);
            }
            Ok(*count as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::renderer::api::GpuVirtualAddress;

    fn triangle(offset: f32) -> PackedTriangle {
        PackedTriangle {
            v0: [offset, 0.5, 0.0],
            geometry_index: 0,
            v1: [offset + 0.5, -0.5, 0.0],
            primitive_index: 0,
            v2: [offset - 0.5, -0.5, 0.0],
            _pad: 0,
        }
    }

    #[test]
    fn bottom_level_fits_in_prebuild_size() {
        let tris: Vec<PackedTriangle> = (0..9).map(|i| triangle(i as f32)).collect();
        let info = prebuild_info(AccelerationStructureKind::BottomLevel, tris.len());
        let out = build_bottom_level(&tris);
        assert!(out.result.len() as u64 <= info.result_data_max_size);
        assert!(out.scratch.len() as u64 <= info.scratch_data_size);
        assert_eq!(info.result_data_max_size % ACCELERATION_STRUCTURE_BYTE_ALIGNMENT, 0);
    }

    #[test]
    fn bottom_level_decodes_back() {
        let out = build_bottom_level(&[triangle(0.0)]);
        let decoded: DecodedStructure<PackedTriangle> =
            decode(&out.result, AccelerationStructureKind::BottomLevel).unwrap();
        assert_eq!(decoded.primitives, vec![triangle(0.0)]);
        assert_eq!(decoded.header.bounds_min[1], -0.5);
        assert_eq!(
            decode::<PackedInstance>(&out.result, AccelerationStructureKind::TopLevel).unwrap_err(),
            DecodeError::WrongKind(AccelerationStructureKind::BottomLevel)
        );
    }

    #[test]
    fn top_level_bounds_follow_instance_transform() {
        let blas = Aabb {
            min: Vec3::new(-0.5, -0.5, 0.0),
            max: Vec3::new(0.5, 0.5, 0.0),
        };
        let desc = InstanceDesc::new(
            Transform3x4::from_translation(Vec3::new(10.0, 0.0, 0.0)),
            0,
            0xFF,
            0,
            0,
            GpuVirtualAddress(0x1_0000_0000),
        );
        let out = build_top_level(&[desc], &[blas]);
        let decoded: DecodedStructure<PackedInstance> =
            decode(&out.result, AccelerationStructureKind::TopLevel).unwrap();
        assert_eq!(decoded.header.bounds_min[0], 9.5);
        assert_eq!(decoded.primitives[0].world_to_object.rows[0][3], -10.0);
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(read_header(&[0u8; 8]).unwrap_err(), DecodeError::Truncated);
        assert_eq!(
            read_header(&[0u8; 64]).unwrap_err(),
            DecodeError::NotAnAccelerationStructure
        );
    }
}
