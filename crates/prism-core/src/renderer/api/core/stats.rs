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

//! Per-frame statistics.

/// A collection of statistics for a single rendered frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// A sequential counter for rendered frames, starting at 1.
    pub frame_number: u64,
    /// The fence value signaled for this frame.
    pub fence_value: u64,
    /// The back buffer this frame was copied into.
    pub back_buffer_index: u32,
    /// CPU time spent waiting for the previous frame.
    pub cpu_wait_time_ms: f32,
    /// CPU time spent resetting and recording the command list.
    pub cpu_record_time_ms: f32,
    /// CPU time spent in submission and present.
    pub cpu_submit_time_ms: f32,
    /// Number of rays launched by the dispatch.
    pub rays_dispatched: u64,
}
