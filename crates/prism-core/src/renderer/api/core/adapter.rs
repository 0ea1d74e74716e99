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

//! Adapter and device information.

use std::fmt;

/// The raytracing capability level of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum RaytracingTier {
    /// No hardware or emulated raytracing.
    #[default]
    NotSupported,
    /// DXR 1.0 style dispatch-rays raytracing.
    Tier1_0,
    /// Adds inline raytracing and indirect dispatch.
    Tier1_1,
}

impl fmt::Display for RaytracingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaytracingTier::NotSupported => f.write_str("not supported"),
            RaytracingTier::Tier1_0 => f.write_str("1.0"),
            RaytracingTier::Tier1_1 => f.write_str("1.1"),
        }
    }
}

/// The physical kind of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdapterKind {
    /// A real GPU.
    #[default]
    Hardware,
    /// A CPU rasterizer or reference device.
    Software,
}

/// Provides standardized, backend-agnostic information about a graphics adapter.
#[derive(Debug, Clone, Default)]
pub struct AdapterInfo {
    /// The name of the adapter.
    pub name: String,
    /// PCI vendor id, if any.
    pub vendor_id: u32,
    /// PCI device id, if any.
    pub device_id: u32,
    /// Hardware or software.
    pub kind: AdapterKind,
    /// Supported raytracing tier.
    pub raytracing_tier: RaytracingTier,
    /// Memory available for resource allocations, in bytes.
    pub memory_budget_bytes: u64,
}

/// Hard limits a pipeline or dispatch must stay within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Deepest allowed `TraceRay` recursion.
    pub max_recursion_depth: u32,
    /// Largest ray payload in bytes.
    pub max_payload_size_in_bytes: u32,
    /// Largest hit attribute block in bytes.
    pub max_attribute_size_in_bytes: u32,
    /// Largest `width * height * depth` of a single dispatch.
    pub max_dispatch_invocations: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_recursion_depth: 31,
            max_payload_size_in_bytes: 4096,
            max_attribute_size_in_bytes: 32,
            max_dispatch_invocations: 1 << 30,
        }
    }
}
