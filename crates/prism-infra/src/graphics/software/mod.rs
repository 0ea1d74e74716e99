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

//! A CPU implementation of the raytracing device.
//!
//! [`SoftwareDevice`] keeps every resource in host memory and executes closed
//! command lists on one worker thread per [`SoftwareQueue`], in submission
//! order. Acceleration structures are serialized BVHs written into their
//! destination buffers, shader tables are decoded at dispatch time, and
//! [`SoftwareSwapchain`] keeps the last presented image instead of showing it.

pub mod acceleration;
mod backend;
pub mod bvh;
mod command;
mod device;
mod executor;
mod fence;
mod memory;
mod queue;
pub mod shader;
mod surface;
mod tracer;

pub use self::backend::{SoftwareAdapterDesc, SoftwareAdapterSelector, SoftwareBackend};
pub use self::command::SoftwareCommandList;
pub use self::device::{BuildRecord, SoftwareDevice, TransitionRecord};
pub use self::fence::SoftwareFence;
pub use self::queue::SoftwareQueue;
pub use self::surface::{PresentMonitor, PresentedFrame, SoftwareSwapchain};
