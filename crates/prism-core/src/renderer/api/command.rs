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

//! Command allocator handles and the command list state machine.

use std::fmt;

/// An opaque handle to a command allocator, the backing memory of command lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandAllocatorId(pub usize);

/// The recording state of a command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandListState {
    /// Created or submitted; may be reset.
    Idle,
    /// Accepting commands.
    Recording,
    /// Closed; may be submitted.
    Closed,
}

impl fmt::Display for CommandListState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandListState::Idle => "idle",
            CommandListState::Recording => "recording",
            CommandListState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// The result of a bounded wait on a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The fence reached the requested value.
    Completed,
    /// The timeout expired first.
    TimedOut,
}
