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

//! Defines the capability traits of the raytracing subsystem, one per GPU object.
//!
//! - [`GraphicsDevice`]: Creates and owns every GPU object.
//! - [`CommandQueue`]: Executes submitted command lists in order and signals fences.
//! - [`CommandList`]: Records barriers, builds, bindings, dispatches and copies.
//! - [`Fence`]: The waitable completion counter.
//! - [`PresentationSurface`]: The swapchain.
//! - [`AdapterSelector`]: Adapter discovery.
//! - [`GraphicsBackend`]: Entry point tying a concrete backend together.

mod adapter_selector;
mod command_list;
mod command_queue;
mod fence;
mod graphics_backend;
mod graphics_device;
mod presentation_surface;

pub use self::adapter_selector::AdapterSelector;
pub use self::command_list::CommandList;
pub use self::command_queue::CommandQueue;
pub use self::fence::Fence;
pub use self::graphics_backend::{GraphicsBackend, SurfaceDescriptor};
pub use self::graphics_device::GraphicsDevice;
pub use self::presentation_surface::PresentationSurface;
