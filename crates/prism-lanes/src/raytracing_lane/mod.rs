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

//! Raytracing lane - builds the scene on the GPU and drives the frame loop.
//!
//! The lane only talks to the device through the traits of
//! `prism_core::renderer`, so it runs unchanged on any backend.

mod acceleration;
mod context;
mod frame_loop;
mod frame_sync;
mod pipeline;
pub mod scene;
mod shader_table;

pub use acceleration::*;
pub use context::*;
pub use frame_loop::*;
pub use frame_sync::*;
pub use pipeline::*;
pub use shader_table::*;
