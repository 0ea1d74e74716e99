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

//! CPU/GPU frame pacing built on one monotonically increasing fence.

use prism_core::renderer::api::WaitStatus;
use prism_core::renderer::{CommandQueue, Fence, GpuError, GraphicsDevice};
use std::fmt;
use std::time::{Duration, Instant};

/// The fence value a frame's GPU work signals on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameTicket {
    pub value: u64,
}

/// Where the frame loop is in its cycle.
///
/// `Idle -> Recording -> Submitted -> Presented -> Waiting -> Idle`, with
/// `Faulted` reachable from every state and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameState {
    #[default]
    Idle,
    Recording,
    Submitted,
    Presented,
    Waiting,
    Faulted,
}

impl FrameState {
    /// The state following this one in a successful frame.
    pub fn next(self) -> FrameState {
        match self {
            FrameState::Idle => FrameState::Recording,
            FrameState::Recording => FrameState::Submitted,
            FrameState::Submitted => FrameState::Presented,
            FrameState::Presented => FrameState::Waiting,
            FrameState::Waiting => FrameState::Idle,
            FrameState::Faulted => FrameState::Faulted,
        }
    }

    /// Returns `true` if the loop may move from `self` to `to`.
    pub fn can_transition_to(self, to: FrameState) -> bool {
        match (self, to) {
            (FrameState::Faulted, _) => false,
            (_, FrameState::Faulted) => true,
            (from, to) => from.next() == to,
        }
    }
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameState::Idle => "idle",
            FrameState::Recording => "recording",
            FrameState::Submitted => "submitted",
            FrameState::Presented => "presented",
            FrameState::Waiting => "waiting",
            FrameState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Owns the frame fence and the last value signaled on it.
#[derive(Debug)]
pub struct FrameSynchronizer {
    fence: Box<dyn Fence>,
    signaled_value: u64,
    timeout: Duration,
}

impl FrameSynchronizer {
    /// Creates the fence at value 0. `timeout` bounds every blocking wait.
    pub fn new(device: &dyn GraphicsDevice, timeout: Duration) -> Result<Self, GpuError> {
        let fence = device.create_fence(0)?;
        log::debug!(
            "FrameSynchronizer: Created frame fence (timeout {} ms)",
            timeout.as_millis()
        );
        Ok(Self {
            fence,
            signaled_value: 0,
            timeout,
        })
    }

    /// The last value handed to the queue.
    pub fn signaled_value(&self) -> u64 {
        self.signaled_value
    }

    /// The last value the GPU reached.
    pub fn completed_value(&self) -> u64 {
        self.fence.completed_value()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns `true` once every piece of work behind `ticket` has finished.
    pub fn is_complete(&self, ticket: FrameTicket) -> bool {
        self.fence.completed_value() >= ticket.value
    }

    /// Increments the counter and asks `queue` to signal it after all prior work.
    ///
    /// The counter only moves if the signal was accepted.
    pub fn advance_and_signal(&mut self, queue: &dyn CommandQueue) -> Result<FrameTicket, GpuError> {
        let value = self.signaled_value + 1;
        queue.signal(self.fence.as_ref(), value)?;
        self.signaled_value = value;
        Ok(FrameTicket { value })
    }

    /// Blocks until `ticket` completes or `timeout` expires.
    pub fn wait(&self, ticket: FrameTicket, timeout: Duration) -> Result<WaitStatus, GpuError> {
        if self.is_complete(ticket) {
            return Ok(WaitStatus::Completed);
        }
        self.fence.wait(ticket.value, timeout)
    }

    /// Waits with the configured timeout, turning a timeout into [`GpuError::SyncTimeout`].
    pub fn wait_for(&self, ticket: FrameTicket) -> Result<Duration, GpuError> {
        let start = Instant::now();
        match self.wait(ticket, self.timeout)? {
            WaitStatus::Completed => Ok(start.elapsed()),
            WaitStatus::TimedOut => Err(GpuError::SyncTimeout {
                value: ticket.value,
                completed: self.fence.completed_value(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Signals a new value and waits for it: the GPU is idle on return.
    pub fn flush(&mut self, queue: &dyn CommandQueue) -> Result<(), GpuError> {
        let ticket = self.advance_and_signal(queue)?;
        let waited = self.wait_for(ticket)?;
        log::trace!(
            "FrameSynchronizer: Flushed to fence value {} in {:.3} ms",
            ticket.value,
            waited.as_secs_f64() * 1000.0
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_frame_cycles_back_to_idle() {
        let mut state = FrameState::Idle;
        for _ in 0..5 {
            let next = state.next();
            assert!(state.can_transition_to(next));
            state = next;
        }
        assert_eq!(state, FrameState::Idle);
    }

    #[test]
    fn faulted_is_terminal() {
        assert!(FrameState::Submitted.can_transition_to(FrameState::Faulted));
        assert!(!FrameState::Faulted.can_transition_to(FrameState::Idle));
        assert_eq!(FrameState::Faulted.next(), FrameState::Faulted);
        assert!(!FrameState::Idle.can_transition_to(FrameState::Presented));
    }

    #[test]
    fn tickets_order_by_value() {
        assert!(FrameTicket { value: 2 } > FrameTicket { value: 1 });
    }
}
