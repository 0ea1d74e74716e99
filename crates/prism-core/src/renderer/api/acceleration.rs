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

//! Acceleration-structure build inputs, prebuild sizes and the GPU instance record.

use super::resource::GpuVirtualAddress;
use crate::math::Transform3x4;

/// Acceleration-structure buffers and addresses must be aligned to this many bytes.
pub const ACCELERATION_STRUCTURE_BYTE_ALIGNMENT: u64 = 256;

/// The size in bytes of one [`InstanceDesc`].
pub const INSTANCE_DESC_SIZE: u64 = 64;

/// Which level of the two-level hierarchy a structure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelerationStructureKind {
    /// Holds geometry (triangles).
    BottomLevel,
    /// Holds instances of bottom-level structures.
    TopLevel,
}

/// The format of vertex positions in a triangle geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    /// Three 32-bit floats.
    Float32x3,
}

impl VertexFormat {
    /// Size of one position in bytes.
    pub fn size(self) -> u64 {
        match self {
            VertexFormat::Float32x3 => 12,
        }
    }
}

/// The format of an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    /// 16-bit unsigned indices.
    Uint16,
    /// 32-bit unsigned indices.
    Uint32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub fn size(self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// Per-geometry flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeometryFlags {
    /// No special handling.
    #[default]
    None,
    /// The geometry never invokes any-hit shaders.
    Opaque,
}

/// Optional index data of a triangle geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferView {
    /// Address of the first index.
    pub address: GpuVirtualAddress,
    /// Number of indices (a multiple of three).
    pub count: u32,
    /// Index width.
    pub format: IndexFormat,
}

/// One triangle geometry of a bottom-level structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrianglesGeometryDesc {
    /// Address of the first vertex position.
    pub vertex_buffer: GpuVirtualAddress,
    /// Distance in bytes between two consecutive positions.
    pub vertex_stride: u64,
    /// Number of vertices.
    pub vertex_count: u32,
    /// Format of the positions.
    pub vertex_format: VertexFormat,
    /// Index data, or `None` for a non-indexed triangle list.
    pub index_buffer: Option<IndexBufferView>,
    /// Geometry flags.
    pub flags: GeometryFlags,
}

impl TrianglesGeometryDesc {
    /// Returns the number of triangles this geometry describes, or `None` if
    /// the vertex/index counts do not form whole triangles.
    pub fn triangle_count(&self) -> Option<u32> {
        let count = match self.index_buffer {
            Some(ib) => ib.count,
            None => self.vertex_count,
        };
        (count % 3 == 0).then_some(count / 3)
    }
}

/// Tuning hints for a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildPreference {
    /// Spend more build time for faster traversal.
    #[default]
    PreferFastTrace,
    /// Build as quickly as possible.
    PreferFastBuild,
}

/// The geometric payload of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccelerationStructureGeometry {
    /// Bottom-level: one or more triangle geometries.
    Triangles(Vec<TrianglesGeometryDesc>),
    /// Top-level: an array of [`InstanceDesc`] records in GPU memory.
    Instances {
        /// Address of the first instance record (16-byte aligned).
        descs: GpuVirtualAddress,
        /// Number of records.
        count: u32,
    },
}

/// The inputs shared by the prebuild query and the build itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccelerationStructureInputs {
    /// What is being built.
    pub geometry: AccelerationStructureGeometry,
    /// Build tuning.
    pub preference: BuildPreference,
}

impl AccelerationStructureInputs {
    /// Returns the level these inputs build.
    pub fn kind(&self) -> AccelerationStructureKind {
        match self.geometry {
            AccelerationStructureGeometry::Triangles(_) => AccelerationStructureKind::BottomLevel,
            AccelerationStructureGeometry::Instances { .. } => AccelerationStructureKind::TopLevel,
        }
    }
}

/// Memory requirements reported by the device for a given set of inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrebuildInfo {
    /// Upper bound on the size of the built structure.
    pub result_data_max_size: u64,
    /// Scratch memory needed during the build.
    pub scratch_data_size: u64,
}

/// A complete build command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildAccelerationStructureDesc {
    /// Where the built structure is written. Must be in the
    /// `RaytracingAccelerationStructure` state and 256-byte aligned.
    pub dest: GpuVirtualAddress,
    /// The build inputs.
    pub inputs: AccelerationStructureInputs,
    /// Scratch memory. Must be in the `UnorderedAccess` state.
    pub scratch: GpuVirtualAddress,
}

/// Per-instance flags stored in the top 8 bits of an instance record.
pub mod instance_flags {
    /// No flags.
    pub const NONE: u8 = 0;
    /// Disable back-face culling for this instance.
    pub const TRIANGLE_CULL_DISABLE: u8 = 0x1;
    /// Treat counter-clockwise triangles as front-facing.
    pub const TRIANGLE_FRONT_COUNTERCLOCKWISE: u8 = 0x2;
    /// Force all geometry of the instance to be opaque.
    pub const FORCE_OPAQUE: u8 = 0x4;
}

/// The 64-byte GPU instance record consumed by top-level builds.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct InstanceDesc {
    /// Object-to-world transform.
    pub transform: Transform3x4,
    /// Low 24 bits: instance id. High 8 bits: visibility mask.
    pub instance_id_and_mask: u32,
    /// Low 24 bits: hit-group contribution. High 8 bits: instance flags.
    pub contribution_and_flags: u32,
    /// Address of the referenced bottom-level structure.
    pub acceleration_structure: u64,
}

impl InstanceDesc {
    /// Packs a new instance record. Ids and contributions are truncated to 24 bits.
    pub fn new(
        transform: Transform3x4,
        instance_id: u32,
        mask: u8,
        hit_group_contribution: u32,
        flags: u8,
        blas: GpuVirtualAddress,
    ) -> Self {
        Self {
            transform,
            instance_id_and_mask: (instance_id & 0x00FF_FFFF) | ((mask as u32) << 24),
            contribution_and_flags: (hit_group_contribution & 0x00FF_FFFF) | ((flags as u32) << 24),
            acceleration_structure: blas.0,
        }
    }

    /// The 24-bit user instance id.
    pub fn instance_id(&self) -> u32 {
        self.instance_id_and_mask & 0x00FF_FFFF
    }

    /// The 8-bit visibility mask.
    pub fn mask(&self) -> u8 {
        (self.instance_id_and_mask >> 24) as u8
    }

    /// The 24-bit offset added to the hit-group index of every hit on this instance.
    pub fn hit_group_contribution(&self) -> u32 {
        self.contribution_and_flags & 0x00FF_FFFF
    }

    /// The instance flags.
    pub fn flags(&self) -> u8 {
        (self.contribution_and_flags >> 24) as u8
    }

    /// The referenced bottom-level structure.
    pub fn blas_address(&self) -> GpuVirtualAddress {
        GpuVirtualAddress(self.acceleration_structure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_desc_is_64_bytes() {
        assert_eq!(std::mem::size_of::<InstanceDesc>() as u64, INSTANCE_DESC_SIZE);
    }

    #[test]
    fn instance_desc_packs_fields() {
        let desc = InstanceDesc::new(
            Transform3x4::IDENTITY,
            0x0123_4567,
            0xFF,
            2,
            instance_flags::FORCE_OPAQUE,
            GpuVirtualAddress(0x1_0000_0000),
        );
        assert_eq!(desc.instance_id(), 0x23_4567);
        assert_eq!(desc.mask(), 0xFF);
        assert_eq!(desc.hit_group_contribution(), 2);
        assert_eq!(desc.flags(), instance_flags::FORCE_OPAQUE);
        assert_eq!(desc.blas_address(), GpuVirtualAddress(0x1_0000_0000));
    }

    #[test]
    fn triangle_count_requires_whole_triangles() {
        let mut geo = TrianglesGeometryDesc {
            vertex_buffer: GpuVirtualAddress(0x1000),
            vertex_stride: 12,
            vertex_count: 3,
            vertex_format: VertexFormat::Float32x3,
            index_buffer: None,
            flags: GeometryFlags::Opaque,
        };
        assert_eq!(geo.triangle_count(), Some(1));
        geo.vertex_count = 4;
        assert_eq!(geo.triangle_count(), None);
        geo.index_buffer = Some(IndexBufferView {
            address: GpuVirtualAddress(0x2000),
            count: 6,
            format: IndexFormat::Uint16,
        });
        assert_eq!(geo.triangle_count(), Some(2));
    }
}
