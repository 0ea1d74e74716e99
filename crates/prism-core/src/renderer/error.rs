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

//! Defines the hierarchy of error types for the raytracing subsystem.
//!
//! Leaf errors (`ResourceError`, `BuildError`, `PipelineError`, `CommandError`)
//! convert into [`GpuError`], which every device-level trait method returns.
//! The renderer surfaces `GpuError` through [`InitError`] and [`FrameError`].

use crate::renderer::api::{
    CommandAllocatorId, CommandListState, GpuVirtualAddress, PipelineId, ResourceId,
    RootSignatureId,
};
use std::fmt;

/// Why the device stopped accepting work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRemovedReason {
    /// The GPU took too long to execute its commands.
    Hung,
    /// The device was reset by the driver or the OS.
    Reset,
    /// A command was malformed (wrong resource state, bad address, ...).
    InvalidCommand(String),
    /// The driver hit an internal error.
    DriverInternalError,
}

impl DeviceRemovedReason {
    /// The DXGI-style HRESULT code associated with this reason.
    pub fn code(&self) -> u32 {
        match self {
            DeviceRemovedReason::Hung => 0x887A_0006,
            DeviceRemovedReason::Reset => 0x887A_0007,
            DeviceRemovedReason::InvalidCommand(_) => 0x887A_0001,
            DeviceRemovedReason::DriverInternalError => 0x887A_0020,
        }
    }
}

impl fmt::Display for DeviceRemovedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRemovedReason::Hung => write!(f, "device hung ({:#010x})", self.code()),
            DeviceRemovedReason::Reset => write!(f, "device reset ({:#010x})", self.code()),
            DeviceRemovedReason::InvalidCommand(msg) => {
                write!(f, "invalid command ({:#010x}): {msg}", self.code())
            }
            DeviceRemovedReason::DriverInternalError => {
                write!(f, "driver internal error ({:#010x})", self.code())
            }
        }
    }
}

/// An error related to the creation or use of a GPU resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The device could not commit memory for the resource.
    AllocationFailure {
        /// The resource label, if any.
        label: String,
        /// Requested size in bytes.
        size: u64,
        /// Bytes still available in the adapter budget.
        available: u64,
    },
    /// The handle does not refer to a live resource.
    InvalidHandle(ResourceId),
    /// No live buffer contains this GPU address.
    InvalidAddress(GpuVirtualAddress),
    /// CPU access was attempted on a heap that does not allow it.
    NotCpuAccessible(ResourceId),
    /// An access fell outside the resource.
    OutOfBounds {
        /// The resource accessed.
        resource: ResourceId,
        /// Byte offset of the access.
        offset: u64,
        /// Length of the access.
        len: u64,
        /// Size of the resource.
        size: u64,
    },
    /// A descriptor combined incompatible options.
    InvalidDescriptor(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::AllocationFailure {
                label,
                size,
                available,
            } => write!(
                f,
                "Failed to allocate {size} bytes for '{label}' ({available} bytes available)"
            ),
            ResourceError::InvalidHandle(id) => write!(f, "Invalid resource handle: {id:?}"),
            ResourceError::InvalidAddress(addr) => {
                write!(f, "No resource contains GPU address {addr}")
            }
            ResourceError::NotCpuAccessible(id) => {
                write!(f, "Resource {id:?} is not CPU accessible")
            }
            ResourceError::OutOfBounds {
                resource,
                offset,
                len,
                size,
            } => write!(
                f,
                "Access of {len} bytes at offset {offset} is out of bounds for {resource:?} ({size} bytes)"
            ),
            ResourceError::InvalidDescriptor(msg) => write!(f, "Invalid resource descriptor: {msg}"),
        }
    }
}

impl std::error::Error for ResourceError {}

/// An error reported while validating or preparing an acceleration-structure build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The build has no triangles or no instances.
    EmptyGeometry,
    /// Geometry data is unusable (partial triangle, non-finite position, index out of range).
    MalformedGeometry(String),
    /// Instance data is unusable.
    MalformedInstances(String),
    /// A destination or scratch buffer is smaller than the prebuild info requires.
    BufferTooSmall {
        /// Which buffer.
        what: &'static str,
        /// Bytes required.
        required: u64,
        /// Bytes provided.
        actual: u64,
    },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::EmptyGeometry => write!(f, "Acceleration structure build has no primitives"),
            BuildError::MalformedGeometry(msg) => write!(f, "Malformed geometry: {msg}"),
            BuildError::MalformedInstances(msg) => write!(f, "Malformed instances: {msg}"),
            BuildError::BufferTooSmall {
                what,
                required,
                actual,
            } => write!(
                f,
                "{what} buffer too small: {actual} bytes provided, {required} required"
            ),
        }
    }
}

impl std::error::Error for BuildError {}

/// An error related to the creation or use of a raytracing pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The shader library bytecode was rejected.
    ShaderCompileFailure {
        /// The library label.
        label: String,
        /// What the loader reported.
        details: String,
    },
    /// A hit group imports an export no library provides.
    MissingExport {
        /// The hit group name.
        hit_group: String,
        /// The missing export.
        export: String,
    },
    /// Two libraries or hit groups declare the same export name.
    DuplicateExport(String),
    /// An identifier was requested for a name the pipeline does not export.
    ExportNotFound(String),
    /// The requested recursion depth exceeds the device limit.
    RecursionDepthExceeded {
        /// Requested depth.
        requested: u32,
        /// Device limit.
        limit: u32,
    },
    /// The shader configuration exceeds a device limit, or a shader needs more than it allows.
    ShaderConfigExceeded {
        /// What was exceeded (`payload`, `attributes`).
        what: &'static str,
        /// Bytes requested.
        requested: u32,
        /// Bytes allowed.
        limit: u32,
    },
    /// The root signature handle is not valid.
    InvalidRootSignature(RootSignatureId),
    /// The pipeline handle is not valid.
    InvalidPipeline(PipelineId),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::ShaderCompileFailure { label, details } => {
                write!(f, "Shader library '{label}' was rejected: {details}")
            }
            PipelineError::MissingExport { hit_group, export } => write!(
                f,
                "Hit group '{hit_group}' imports unknown export '{export}'"
            ),
            PipelineError::DuplicateExport(name) => write!(f, "Export '{name}' is declared twice"),
            PipelineError::ExportNotFound(name) => {
                write!(f, "Pipeline has no export named '{name}'")
            }
            PipelineError::RecursionDepthExceeded { requested, limit } => write!(
                f,
                "Requested recursion depth {requested} exceeds device limit {limit}"
            ),
            PipelineError::ShaderConfigExceeded {
                what,
                requested,
                limit,
            } => write!(f, "Shader {what} size {requested} exceeds limit {limit}"),
            PipelineError::InvalidRootSignature(id) => write!(f, "Invalid root signature: {id:?}"),
            PipelineError::InvalidPipeline(id) => write!(f, "Invalid pipeline: {id:?}"),
        }
    }
}

impl std::error::Error for PipelineError {}

/// An error caused by driving a command list or allocator out of order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command list is not in the state the call requires.
    InvalidState {
        /// The required state.
        expected: CommandListState,
        /// The actual state.
        actual: CommandListState,
    },
    /// Recording was started from an allocator that was not reset since its last use.
    AllocatorNotReset(CommandAllocatorId),
    /// The allocator is still backing a list that is recording.
    AllocatorBusy(CommandAllocatorId),
    /// The allocator was reset while the GPU still executes work recorded from it.
    AllocatorInFlight {
        /// The allocator.
        allocator: CommandAllocatorId,
        /// Submission serial the allocator was last used in.
        pending: u64,
        /// Last completed submission serial.
        completed: u64,
    },
    /// The allocator handle is not valid.
    InvalidAllocator(CommandAllocatorId),
    /// A command list, queue or fence from another backend was passed in.
    ForeignObject(&'static str),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::InvalidState { expected, actual } => write!(
                f,
                "Command list is {actual}, but the operation requires it to be {expected}"
            ),
            CommandError::AllocatorNotReset(id) => {
                write!(f, "Command allocator {id:?} must be reset before reuse")
            }
            CommandError::AllocatorBusy(id) => {
                write!(f, "Command allocator {id:?} is bound to a recording command list")
            }
            CommandError::AllocatorInFlight {
                allocator,
                pending,
                completed,
            } => write!(
                f,
                "Command allocator {allocator:?} is still in flight (submission {pending}, completed {completed})"
            ),
            CommandError::InvalidAllocator(id) => write!(f, "Invalid command allocator: {id:?}"),
            CommandError::ForeignObject(what) => {
                write!(f, "The {what} does not belong to this backend")
            }
        }
    }
}

impl std::error::Error for CommandError {}

/// The error type returned by every device-level operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// A resource operation failed.
    Resource(ResourceError),
    /// An acceleration-structure build was rejected.
    Build(BuildError),
    /// Pipeline creation or lookup failed.
    Pipeline(PipelineError),
    /// A command list or allocator was misused.
    Command(CommandError),
    /// The device was removed and must be recreated.
    DeviceRemoved(DeviceRemovedReason),
    /// A bounded wait expired before the fence reached the requested value.
    SyncTimeout {
        /// The value waited for.
        value: u64,
        /// The fence value when the wait gave up.
        completed: u64,
        /// The timeout in milliseconds.
        timeout_ms: u64,
    },
    /// The presentation surface refused to present.
    PresentFailure(String),
    /// No adapter supports raytracing.
    NoCapableAdapter,
}

impl GpuError {
    /// Returns `true` if the device is gone and every later call will fail too.
    pub fn is_device_removed(&self) -> bool {
        matches!(self, GpuError::DeviceRemoved(_))
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::Resource(err) => write!(f, "Resource error: {err}"),
            GpuError::Build(err) => write!(f, "Acceleration structure build failed: {err}"),
            GpuError::Pipeline(err) => write!(f, "Pipeline error: {err}"),
            GpuError::Command(err) => write!(f, "Command error: {err}"),
            GpuError::DeviceRemoved(reason) => write!(f, "Device removed: {reason}"),
            GpuError::SyncTimeout {
                value,
                completed,
                timeout_ms,
            } => write!(
                f,
                "Timed out after {timeout_ms} ms waiting for fence value {value} (completed {completed})"
            ),
            GpuError::PresentFailure(msg) => write!(f, "Present failed: {msg}"),
            GpuError::NoCapableAdapter => {
                write!(f, "No adapter supports raytracing tier 1.0 or above")
            }
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::Resource(err) => Some(err),
            GpuError::Build(err) => Some(err),
            GpuError::Pipeline(err) => Some(err),
            GpuError::Command(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResourceError> for GpuError {
    fn from(err: ResourceError) -> Self {
        GpuError::Resource(err)
    }
}

impl From<BuildError> for GpuError {
    fn from(err: BuildError) -> Self {
        GpuError::Build(err)
    }
}

impl From<PipelineError> for GpuError {
    fn from(err: PipelineError) -> Self {
        GpuError::Pipeline(err)
    }
}

impl From<CommandError> for GpuError {
    fn from(err: CommandError) -> Self {
        GpuError::Command(err)
    }
}

/// An error returned by the renderer's setup sequence.
#[derive(Debug)]
pub enum InitError {
    /// `initialize` was called on a renderer that is already running.
    AlreadyInitialized,
    /// The settings are unusable.
    InvalidSettings(String),
    /// A GPU operation in the setup sequence failed.
    Gpu(GpuError),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::AlreadyInitialized => write!(f, "The renderer is already initialized."),
            InitError::InvalidSettings(msg) => write!(f, "Invalid renderer settings: {msg}"),
            InitError::Gpu(err) => write!(f, "Raytracing setup failed: {err}"),
        }
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InitError::Gpu(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GpuError> for InitError {
    fn from(err: GpuError) -> Self {
        InitError::Gpu(err)
    }
}

/// An error returned by `render_frame`.
#[derive(Debug)]
pub enum FrameError {
    /// `render_frame` was called before `initialize` succeeded or after `shutdown`.
    NotInitialized,
    /// A previous frame lost the device; the renderer must be recreated.
    Faulted(DeviceRemovedReason),
    /// A GPU operation of this frame failed.
    Gpu(GpuError),
}

impl FrameError {
    /// Returns `true` if this error means the device is gone.
    pub fn is_device_removed(&self) -> bool {
        match self {
            FrameError::Faulted(_) => true,
            FrameError::Gpu(err) => err.is_device_removed(),
            FrameError::NotInitialized => false,
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::NotInitialized => write!(f, "The renderer is not initialized."),
            FrameError::Faulted(reason) => {
                write!(f, "The renderer faulted after device removal: {reason}")
            }
            FrameError::Gpu(err) => write!(f, "Frame failed: {err}"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Gpu(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GpuError> for FrameError {
    fn from(err: GpuError) -> Self {
        FrameError::Gpu(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn device_removed_reason_codes() {
        assert_eq!(DeviceRemovedReason::Hung.code(), 0x887A0006);
        assert_eq!(
            DeviceRemovedReason::InvalidCommand("x".into()).to_string(),
            "invalid command (0x887a0001): x"
        );
    }

    #[test]
    fn pipeline_error_chains_into_frame_error() {
        let pipeline_err = PipelineError::ExportNotFound("Miss2".to_string());
        let gpu_err: GpuError = pipeline_err.into();
        let frame_err: FrameError = gpu_err.into();
        assert_eq!(
            frame_err.to_string(),
            "Frame failed: Pipeline error: Pipeline has no export named 'Miss2'"
        );
        assert!(frame_err.source().is_some());
        assert!(frame_err.source().unwrap().source().is_some());
    }

    #[test]
    fn device_removed_is_detected_through_frame_error() {
        let err = FrameError::Gpu(GpuError::DeviceRemoved(DeviceRemovedReason::Reset));
        assert!(err.is_device_removed());
        assert!(FrameError::Faulted(DeviceRemovedReason::Hung).is_device_removed());
        assert!(!FrameError::NotInitialized.is_device_removed());
    }

    #[test]
    fn command_state_error_display() {
        let err = CommandError::InvalidState {
            expected: CommandListState::Recording,
            actual: CommandListState::Closed,
        };
        assert_eq!(
            err.to_string(),
            "Command list is closed, but the operation requires it to be recording"
        );
    }
}
