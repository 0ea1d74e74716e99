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

//! Resource barriers recorded into command lists.

use super::resource::{ResourceId, ResourceState};

/// A synchronization point recorded between GPU commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceBarrier {
    /// Moves a resource from one access state to another.
    Transition {
        /// The resource being transitioned.
        resource: ResourceId,
        /// The state the resource is expected to be in.
        before: ResourceState,
        /// The state the resource will be in after the barrier.
        after: ResourceState,
    },
    /// Orders all unordered-access writes to `resource` before any later access.
    /// `None` orders writes to every resource.
    Uav {
        /// The resource whose writes must complete, or `None` for all of them.
        resource: Option<ResourceId>,
    },
}

impl ResourceBarrier {
    /// Creates a transition barrier.
    pub fn transition(resource: ResourceId, before: ResourceState, after: ResourceState) -> Self {
        Self::Transition {
            resource,
            before,
            after,
        }
    }

    /// Creates a UAV barrier on a single resource.
    pub fn uav(resource: ResourceId) -> Self {
        Self::Uav {
            resource: Some(resource),
        }
    }

    /// Returns the barrier that undoes this one. UAV barriers are their own reverse.
    pub fn reversed(&self) -> Self {
        match *self {
            Self::Transition {
                resource,
                before,
                after,
            } => Self::Transition {
                resource,
                before: after,
                after: before,
            },
            uav @ Self::Uav { .. } => uav,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversed_transition_swaps_states() {
        let b = ResourceBarrier::transition(
            ResourceId(3),
            ResourceState::UnorderedAccess,
            ResourceState::CopySource,
        );
        assert_eq!(
            b.reversed(),
            ResourceBarrier::transition(
                ResourceId(3),
                ResourceState::CopySource,
                ResourceState::UnorderedAccess
            )
        );
        assert_eq!(ResourceBarrier::uav(ResourceId(1)).reversed(), ResourceBarrier::uav(ResourceId(1)));
    }
}
