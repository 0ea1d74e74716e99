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

//! Backend-agnostic raytracing API.
//!
//! Organized into several logical sub-modules:
//!
//! - **[`core`]**: Adapter information, settings and statistics.
//! - **[`resource`]**: Resource handles, heaps, states and descriptors.
//! - **[`barrier`]**: Transition and UAV barriers.
//! - **[`camera`]**: The ray-generation constant buffer.
//! - **[`acceleration`]**: Acceleration-structure inputs and instance records.
//! - **[`pipeline`]**: Shader libraries, hit groups, root signatures and identifiers.
//! - **[`dispatch`]**: The dispatch-rays descriptor.
//! - **[`command`]**: Command allocators and the command list state machine.

pub mod acceleration;
pub mod barrier;
pub mod camera;
pub mod command;
pub mod core;
pub mod dispatch;
pub mod pipeline;
pub mod resource;

pub use self::acceleration::*;
pub use self::barrier::*;
pub use self::camera::*;
pub use self::command::*;
pub use self::core::*;
pub use self::dispatch::*;
pub use self::pipeline::*;
pub use self::resource::*;
