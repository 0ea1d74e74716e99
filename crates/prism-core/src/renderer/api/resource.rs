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

//! Defines GPU resources (buffers and textures), the heaps they live in and
//! the state tags that govern how commands may access them.

use std::borrow::Cow;
use std::fmt;

/// An opaque handle to a committed GPU resource (buffer or texture).
///
/// This ID is returned by [`GraphicsDevice::create_buffer`] and
/// [`GraphicsDevice::create_texture`] and is used to reference the resource in
/// barriers, copies and root bindings.
///
/// [`GraphicsDevice::create_buffer`]: crate::renderer::traits::GraphicsDevice::create_buffer
/// [`GraphicsDevice::create_texture`]: crate::renderer::traits::GraphicsDevice::create_texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub usize);

/// A GPU virtual address. Buffers are addressable; `0` is the null address.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuVirtualAddress(pub u64);

impl GpuVirtualAddress {
    /// The null GPU address.
    pub const NULL: Self = Self(0);

    /// Returns `true` for the null address.
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the address `bytes` past this one.
    #[inline]
    pub fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Display for GpuVirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#014x}", self.0)
    }
}

/// The memory heap a resource is committed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// GPU-local memory, not CPU accessible.
    Default,
    /// CPU-writable memory the GPU reads from. Resources here stay in
    /// [`ResourceState::GenericRead`] for their whole life.
    Upload,
    /// CPU-readable memory the GPU writes to.
    Readback,
}

impl HeapType {
    /// Returns `true` if the CPU may map this heap for writing.
    pub fn is_cpu_writable(self) -> bool {
        matches!(self, HeapType::Upload)
    }

    /// Returns `true` if the CPU may map this heap for reading.
    pub fn is_cpu_readable(self) -> bool {
        matches!(self, HeapType::Upload | HeapType::Readback)
    }
}

/// The access state a resource is in on the GPU timeline.
///
/// Every command that touches a resource requires a specific state. Moving
/// between states is only done with explicit transition barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Initial state for most resources; usable for simple copies.
    Common,
    /// Ready to be handed to the presentation engine. Shares its value with `Common`.
    Present,
    /// Read by shaders, copies and as root arguments. Required for upload heaps.
    GenericRead,
    /// Read and written through unordered access views.
    UnorderedAccess,
    /// Source of a copy.
    CopySource,
    /// Destination of a copy.
    CopyDest,
    /// Holds acceleration-structure data. Resources in this state never transition.
    RaytracingAccelerationStructure,
    /// Read by non-pixel shader stages.
    NonPixelShaderResource,
}

impl ResourceState {
    /// Returns `true` if the two states are interchangeable for validation purposes.
    pub fn is_compatible_with(self, other: ResourceState) -> bool {
        use ResourceState::*;
        self == other || matches!((self, other), (Common, Present) | (Present, Common))
    }

    /// Returns `true` if a resource in this state may be read as a copy source or root argument.
    pub fn allows_read(self) -> bool {
        use ResourceState::*;
        matches!(self, GenericRead | CopySource | NonPixelShaderResource | Common)
    }
}

/// Pixel formats understood by the raytracing output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// Four 8-bit normalized channels.
    Rgba8Unorm,
}

impl TextureFormat {
    /// Returns the number of bytes per texel.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm => 4,
        }
    }
}

/// A descriptor used to create a buffer resource.
#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    /// An optional debug label for the buffer.
    pub label: Option<Cow<'a, str>>,
    /// The total size of the buffer in bytes.
    pub size: u64,
    /// The heap the buffer is committed into.
    pub heap: HeapType,
    /// The state the buffer starts in.
    pub initial_state: ResourceState,
    /// If `true`, the buffer may be written through unordered access (scratch memory).
    pub allow_unordered_access: bool,
}

impl<'a> BufferDescriptor<'a> {
    /// A CPU-writable buffer in the upload heap, permanently in `GenericRead`.
    pub fn upload(label: &'a str, size: u64) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            size,
            heap: HeapType::Upload,
            initial_state: ResourceState::GenericRead,
            allow_unordered_access: false,
        }
    }

    /// A GPU-local buffer that holds acceleration-structure data.
    pub fn acceleration_structure(label: &'a str, size: u64) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            size,
            heap: HeapType::Default,
            initial_state: ResourceState::RaytracingAccelerationStructure,
            allow_unordered_access: true,
        }
    }

    /// A GPU-local scratch buffer, written through unordered access during builds.
    pub fn scratch(label: &'a str, size: u64) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            size,
            heap: HeapType::Default,
            initial_state: ResourceState::UnorderedAccess,
            allow_unordered_access: true,
        }
    }
}

/// A descriptor used to create a 2D texture resource.
#[derive(Debug, Clone)]
pub struct TextureDescriptor<'a> {
    /// An optional debug label for the texture.
    pub label: Option<Cow<'a, str>>,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// The texel format.
    pub format: TextureFormat,
    /// The state the texture starts in.
    pub initial_state: ResourceState,
    /// If `true`, the texture may be bound as an unordered access view.
    pub allow_unordered_access: bool,
}

impl TextureDescriptor<'_> {
    /// Returns the size in bytes of a tightly packed texture with this descriptor.
    pub fn size_in_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_pixel() as u64
    }
}

/// Describes what kind of resource an ID refers to, as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDimension {
    /// A linear buffer of the given byte size.
    Buffer {
        /// Size in bytes.
        size: u64,
    },
    /// A 2D texture.
    Texture2D {
        /// Width in texels.
        width: u32,
        /// Height in texels.
        height: u32,
        /// The texel format.
        format: TextureFormat,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_and_present_are_interchangeable() {
        assert!(ResourceState::Common.is_compatible_with(ResourceState::Present));
        assert!(ResourceState::Present.is_compatible_with(ResourceState::Common));
        assert!(!ResourceState::CopySource.is_compatible_with(ResourceState::CopyDest));
    }

    #[test]
    fn upload_descriptor_is_generic_read() {
        let desc = BufferDescriptor::upload("vertices", 36);
        assert_eq!(desc.heap, HeapType::Upload);
        assert_eq!(desc.initial_state, ResourceState::GenericRead);
        assert!(desc.heap.is_cpu_writable());
        assert!(!HeapType::Default.is_cpu_readable());
    }

    #[test]
    fn rgba8_texture_size() {
        let desc = TextureDescriptor {
            label: None,
            width: 800,
            height: 600,
            format: TextureFormat::Rgba8Unorm,
            initial_state: ResourceState::UnorderedAccess,
            allow_unordered_access: true,
        };
        assert_eq!(desc.size_in_bytes(), 800 * 600 * 4);
    }

    #[test]
    fn null_address() {
        assert!(GpuVirtualAddress::NULL.is_null());
        assert_eq!(GpuVirtualAddress(0x1000).offset(64), GpuVirtualAddress(0x1040));
    }
}
