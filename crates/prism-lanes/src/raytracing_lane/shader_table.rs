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

//! GPU-resident shader records consumed by `DispatchRays`.
//!
//! A record is a 32-byte shader identifier followed by its local root
//! arguments. Every record of a table shares one stride, so record `k` lives
//! at `k * stride`.

use prism_core::math::align_up;
use prism_core::renderer::api::*;
use prism_core::renderer::{GpuError, GraphicsDevice, ResourceError};

/// One record: which shader runs, and the inline arguments it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderRecord {
    pub identifier: ShaderIdentifier,
    pub local_arguments: Vec<u8>,
}

impl ShaderRecord {
    pub fn new(identifier: ShaderIdentifier) -> Self {
        Self {
            identifier,
            local_arguments: Vec::new(),
        }
    }

    pub fn with_arguments(identifier: ShaderIdentifier, local_arguments: &[u8]) -> Self {
        Self {
            identifier,
            local_arguments: local_arguments.to_vec(),
        }
    }
}

/// The stride that fits `local_argument_bytes` behind an identifier.
///
/// Strides are rounded to the table alignment rather than the record
/// alignment, so a single table can hold several sections that each start
/// on a valid table boundary.
pub fn record_stride(local_argument_bytes: usize) -> u64 {
    let record = align_up(
        (SHADER_IDENTIFIER_SIZE + local_argument_bytes) as u64,
        SHADER_RECORD_ALIGNMENT,
    );
    align_up(record, SHADER_TABLE_ALIGNMENT)
}

/// An upload buffer holding fixed-stride records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderTable {
    pub buffer: ResourceId,
    pub address: GpuVirtualAddress,
    pub stride: u64,
    pub record_count: u32,
}

impl ShaderTable {
    /// Writes `records` at `index * stride` into a new upload buffer.
    pub fn build(
        device: &dyn GraphicsDevice,
        label: &str,
        records: &[ShaderRecord],
    ) -> Result<Self, GpuError> {
        if records.is_empty() {
            return Err(ResourceError::InvalidDescriptor(format!(
                "shader table '{label}' has no records"
            ))
            .into());
        }
        let widest = records
            .iter()
            .map(|r| r.local_arguments.len())
            .max()
            .unwrap_or_default();
        let stride = record_stride(widest);

        let mut bytes = vec![0u8; stride as usize * records.len()];
        for (index, record) in records.iter().enumerate() {
            let start = index * stride as usize;
            let args = start + SHADER_IDENTIFIER_SIZE;
            bytes[start..args].copy_from_slice(record.identifier.as_bytes());
            bytes[args..args + record.local_arguments.len()]
                .copy_from_slice(&record.local_arguments);
        }

        let buffer = device.create_buffer(&BufferDescriptor::upload(label, bytes.len() as u64))?;
        device.write_buffer(buffer, 0, &bytes)?;
        let table = Self {
            buffer,
            address: device.gpu_virtual_address(buffer)?,
            stride,
            record_count: records.len() as u32,
        };
        log::debug!(
            "Built shader table '{}': {} records of {} bytes at {}",
            label,
            table.record_count,
            stride,
            table.address
        );
        Ok(table)
    }

    /// The address of record `index`.
    pub fn record_address(&self, index: u32) -> Option<GpuVirtualAddress> {
        (index < self.record_count).then(|| self.address.offset(u64::from(index) * self.stride))
    }

    /// The single record `index`, as a ray-generation range.
    pub fn record_range(&self, index: u32) -> GpuAddressRange {
        match self.record_address(index) {
            Some(start) => GpuAddressRange {
                start,
                size: self.stride,
            },
            None => GpuAddressRange::default(),
        }
    }

    /// `count` records starting at `first`, as a miss or hit-group range.
    pub fn section(&self, first: u32, count: u32) -> GpuAddressRangeAndStride {
        let count = count.min(self.record_count.saturating_sub(first));
        match self.record_address(first) {
            Some(start) if count > 0 => GpuAddressRangeAndStride {
                start,
                size: u64::from(count) * self.stride,
                stride: self.stride,
            },
            _ => GpuAddressRangeAndStride::default(),
        }
    }

    pub fn release(self, device: &dyn GraphicsDevice) -> Result<(), GpuError> {
        device.destroy_resource(self.buffer)
    }
}

/// The `[RayGen][Miss][HitGroup]` table of the triangle sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleShaderTable {
    pub table: ShaderTable,
}

impl SampleShaderTable {
    pub const RAY_GEN_RECORD: u32 = 0;
    pub const MISS_RECORD: u32 = 1;
    pub const HIT_GROUP_RECORD: u32 = 2;

    pub fn build(
        device: &dyn GraphicsDevice,
        ray_gen: ShaderRecord,
        miss: ShaderRecord,
        hit_group: ShaderRecord,
    ) -> Result<Self, GpuError> {
        let table = ShaderTable::build(device, "shader table", &[ray_gen, miss, hit_group])?;
        Ok(Self { table })
    }

    /// The dispatch descriptor for a `width x height` launch over this table.
    pub fn dispatch_desc(&self, width: u32, height: u32) -> DispatchRaysDesc {
        DispatchRaysDesc {
            ray_generation: self.table.record_range(Self::RAY_GEN_RECORD),
            miss: self.table.section(Self::MISS_RECORD, 1),
            hit_group: self.table.section(Self::HIT_GROUP_RECORD, 1),
            callable: GpuAddressRangeAndStride::default(),
            width,
            height,
            depth: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_covers_identifier_and_arguments() {
        assert_eq!(record_stride(0), 64);
        assert_eq!(record_stride(16), 64);
        assert_eq!(record_stride(33), 128);
        assert_eq!(record_stride(16) % SHADER_RECORD_ALIGNMENT, 0);
    }

    #[test]
    fn sections_are_clamped_to_the_table() {
        let table = ShaderTable {
            buffer: ResourceId(0),
            address: GpuVirtualAddress(0x1_0000_0000),
            stride: 64,
            record_count: 3,
        };
        let miss = table.section(1, 4);
        assert_eq!(miss.start, GpuVirtualAddress(0x1_0000_0040));
        assert_eq!(miss.size, 128);
        assert_eq!(table.section(3, 1), GpuAddressRangeAndStride::default());
        assert_eq!(table.record_range(0).size, 64);
        assert!(table.record_address(3).is_none());
    }
}
