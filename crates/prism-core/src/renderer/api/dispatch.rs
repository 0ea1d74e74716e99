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

//! The dispatch-rays descriptor.

use super::resource::GpuVirtualAddress;

/// A contiguous GPU address range.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GpuAddressRange {
    /// First byte of the range.
    pub start: GpuVirtualAddress,
    /// Size in bytes.
    pub size: u64,
}

/// A GPU address range split into fixed-stride records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GpuAddressRangeAndStride {
    /// First byte of the range.
    pub start: GpuVirtualAddress,
    /// Size in bytes.
    pub size: u64,
    /// Distance between two records.
    pub stride: u64,
}

impl GpuAddressRangeAndStride {
    /// Number of whole records in the range.
    pub fn record_count(&self) -> u64 {
        if self.stride == 0 {
            u64::from(self.size > 0)
        } else {
            self.size / self.stride
        }
    }

    /// Address of record `index`, or `None` if it lies outside the range.
    pub fn record_address(&self, index: u64) -> Option<GpuVirtualAddress> {
        let offset = index.checked_mul(self.stride)?;
        (offset < self.size).then(|| self.start.offset(offset))
    }
}

/// Launches a grid of ray-generation invocations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRaysDesc {
    /// The single ray-generation record.
    pub ray_generation: GpuAddressRange,
    /// The miss shader table.
    pub miss: GpuAddressRangeAndStride,
    /// The hit-group table.
    pub hit_group: GpuAddressRangeAndStride,
    /// The callable shader table (may be empty).
    pub callable: GpuAddressRangeAndStride,
    /// Grid width.
    pub width: u32,
    /// Grid height.
    pub height: u32,
    /// Grid depth.
    pub depth: u32,
}

impl DispatchRaysDesc {
    /// Total number of ray-generation invocations.
    pub fn invocation_count(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_addresses_stay_inside_the_range() {
        let table = GpuAddressRangeAndStride {
            start: GpuVirtualAddress(0x1000),
            size: 128,
            stride: 64,
        };
        assert_eq!(table.record_count(), 2);
        assert_eq!(table.record_address(1), Some(GpuVirtualAddress(0x1040)));
        assert_eq!(table.record_address(2), None);
    }

    #[test]
    fn zero_stride_repeats_first_record() {
        let table = GpuAddressRangeAndStride {
            start: GpuVirtualAddress(0x1000),
            size: 64,
            stride: 0,
        };
        assert_eq!(table.record_address(7), Some(GpuVirtualAddress(0x1000)));
    }
}
