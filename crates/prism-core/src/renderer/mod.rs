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

//! Provides the public, backend-agnostic raytracing contracts.
//!
//! This module contains the abstract `traits` (like [`GraphicsDevice`]), the
//! descriptors and state tags they exchange, and the error taxonomy. A
//! concrete backend in `prism-infra` implements the traits; the raytracing
//! lane in `prism-lanes` only ever talks to them.

pub mod api;
pub mod error;
pub mod traits;

pub use self::api::*;
pub use self::error::{
    BuildError, CommandError, DeviceRemovedReason, FrameError, GpuError, InitError,
    PipelineError, ResourceError,
};
pub use self::traits::{
    AdapterSelector, CommandList, CommandQueue, Fence, GraphicsBackend, GraphicsDevice,
    PresentationSurface, SurfaceDescriptor,
};
