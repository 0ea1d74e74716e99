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

use super::command::{RecordedCommand, SoftwareCommandList};
use super::device::{lock, SoftwareDeviceInternal};
use super::executor::Executor;
use super::fence::{FenceShared, SoftwareFence};
use super::surface::{self, PresentJob};
use prism_core::renderer::api::CommandListState;
use prism_core::renderer::{
    CommandError, CommandList, CommandQueue, DeviceRemovedReason, Fence, GpuError,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Submission serials of one queue. Both counters only grow.
#[derive(Debug, Default)]
pub(crate) struct QueueTimeline {
    submitted: AtomicU64,
    completed: AtomicU64,
}

impl QueueTimeline {
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    fn next_serial(&self) -> u64 {
        self.submitted.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn complete(&self, serial: u64) {
        self.completed.fetch_max(serial, Ordering::AcqRel);
    }
}

pub(crate) enum QueueJob {
    Execute {
        serial: u64,
        lists: Vec<Arc<Vec<RecordedCommand>>>,
    },
    Signal {
        fence: Arc<FenceShared>,
        value: u64,
    },
    Present(PresentJob),
    Shutdown,
}

/// The direct command queue. Jobs run in submission order on a dedicated worker thread.
#[derive(Debug)]
pub struct SoftwareQueue {
    id: u64,
    device: Arc<SoftwareDeviceInternal>,
    timeline: Arc<QueueTimeline>,
    sender: flume::Sender<QueueJob>,
    worker: Option<JoinHandle<()>>,
}

impl SoftwareQueue {
    pub(crate) fn new(device: Arc<SoftwareDeviceInternal>) -> Result<Self, GpuError> {
        let id = device.next_queue_id();
        let timeline = Arc::new(QueueTimeline::default());
        let (sender, receiver) = flume::unbounded();

        let worker_device = Arc::clone(&device);
        let worker_timeline = Arc::clone(&timeline);
        let worker = thread::Builder::new()
            .name(format!("prism-queue-{id}"))
            .spawn(move || run_worker(worker_device, worker_timeline, receiver))
            .map_err(|e| {
                log::error!("SoftwareQueue: Failed to spawn the queue worker: {e}");
                GpuError::DeviceRemoved(DeviceRemovedReason::DriverInternalError)
            })?;

        log::debug!("SoftwareQueue: Created direct queue {id}");
        Ok(Self {
            id,
            device,
            timeline,
            sender,
            worker: Some(worker),
        })
    }

    pub(crate) fn device(&self) -> &Arc<SoftwareDeviceInternal> {
        &self.device
    }

    pub(crate) fn sender(&self) -> flume::Sender<QueueJob> {
        self.sender.clone()
    }

    pub(crate) fn send(&self, job: QueueJob) -> Result<(), GpuError> {
        self.sender.send(job).map_err(|_| {
            let reason = DeviceRemovedReason::DriverInternalError;
            self.device.remove_device(reason.clone());
            GpuError::DeviceRemoved(reason)
        })
    }
}

impl CommandQueue for SoftwareQueue {
    fn execute_command_lists(&self, lists: &[&dyn CommandList]) -> Result<(), GpuError> {
        self.device.check_alive()?;

        let mut recorded = Vec::with_capacity(lists.len());
        let mut allocators = Vec::with_capacity(lists.len());
        for list in lists {
            let list = list
                .as_any()
                .downcast_ref::<SoftwareCommandList>()
                .ok_or(CommandError::ForeignObject("command list"))?;
            if list.state() != CommandListState::Closed {
                return Err(CommandError::InvalidState {
                    expected: CommandListState::Closed,
                    actual: list.state(),
                }
                .into());
            }
            recorded.push(list.recorded());
            allocators.push(list.allocator());
        }

        let serial = self.timeline.next_serial();
        {
            let mut table = lock(&self.device.allocators)?;
            for allocator in allocators {
                if let Some(entry) = table.get_mut(&allocator) {
                    entry.last_submission = Some((Arc::clone(&self.timeline), serial));
                }
            }
        }

        log::trace!(
            "SoftwareQueue: Queue {} submitting {} lists as serial {serial}",
            self.id,
            recorded.len()
        );
        self.send(QueueJob::Execute {
            serial,
            lists: recorded,
        })
    }

    fn signal(&self, fence: &dyn Fence, value: u64) -> Result<(), GpuError> {
        self.device.check_alive()?;
        let fence = fence
            .as_any()
            .downcast_ref::<SoftwareFence>()
            .ok_or(CommandError::ForeignObject("fence"))?;
        self.send(QueueJob::Signal {
            fence: Arc::clone(&fence.shared),
            value,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for SoftwareQueue {
    fn drop(&mut self) {
        let _ = self.sender.send(QueueJob::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("SoftwareQueue: Queue {} worker panicked", self.id);
            }
        }
        log::debug!("SoftwareQueue: Destroyed direct queue {}", self.id);
    }
}

fn run_worker(
    device: Arc<SoftwareDeviceInternal>,
    timeline: Arc<QueueTimeline>,
    receiver: flume::Receiver<QueueJob>,
) {
    let executor = Executor::new(Arc::clone(&device));
    while let Ok(job) = receiver.recv() {
        match job {
            QueueJob::Execute { serial, lists } => {
                // A removed device drops work but still retires it.
                if device.removed_reason().is_none() {
                    let started = Instant::now();
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| executor.execute(serial, &lists)));
                    match outcome {
                        Ok(Ok(())) => log::trace!(
                            "SoftwareQueue: Serial {serial} executed in {:.3} ms",
                            started.elapsed().as_secs_f64() * 1000.0
                        ),
                        Ok(Err(reason)) => device.remove_device(reason),
                        Err(_) => device.remove_device(DeviceRemovedReason::DriverInternalError),
                    }
                }
                timeline.complete(serial);
            }
            QueueJob::Signal { fence, value } => {
                if device.removed_reason().is_none() {
                    fence.signal(value);
                }
            }
            QueueJob::Present(job) => {
                if device.removed_reason().is_none() {
                    surface::complete_present(&device, job);
                }
            }
            QueueJob::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::software::device::test_device;
    use crate::graphics::software::SoftwareDevice;
    use prism_core::renderer::api::WaitStatus;
    use prism_core::renderer::GraphicsDevice;
    use std::time::Duration;

    fn device() -> SoftwareDevice {
        test_device()
    }

    #[test]
    fn signal_completes_after_earlier_work() {
        let device = device();
        let queue = device.create_command_queue().unwrap();
        let fence = device.create_fence(0).unwrap();
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(allocator).unwrap();
        list.reset(allocator).unwrap();
        list.close().unwrap();

        queue.execute_command_lists(&[list.as_ref()]).unwrap();
        queue.signal(fence.as_ref(), 1).unwrap();
        assert_eq!(
            fence.wait(1, Duration::from_secs(5)).unwrap(),
            WaitStatus::Completed
        );
        // The list stays closed and can be submitted again.
        assert_eq!(list.state(), CommandListState::Closed);
        queue.execute_command_lists(&[list.as_ref()]).unwrap();
    }

    #[test]
    fn recording_list_cannot_be_submitted() {
        let device = device();
        let queue = device.create_command_queue().unwrap();
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(allocator).unwrap();
        list.reset(allocator).unwrap();
        assert_eq!(
            queue.execute_command_lists(&[list.as_ref()]).unwrap_err(),
            GpuError::Command(CommandError::InvalidState {
                expected: CommandListState::Closed,
                actual: CommandListState::Recording,
            })
        );
    }

    #[test]
    fn removed_device_rejects_submissions_and_signals() {
        let device = device();
        let queue = device.create_command_queue().unwrap();
        let fence = device.create_fence(0).unwrap();
        device.inject_device_removed(DeviceRemovedReason::Reset);
        assert!(queue.signal(fence.as_ref(), 1).unwrap_err().is_device_removed());
        assert_eq!(fence.completed_value(), 0);
    }

    #[test]
    fn allocator_reset_waits_for_its_submission() {
        let device = device();
        let allocator = device.create_command_allocator().unwrap();
        let timeline = Arc::new(QueueTimeline::default());
        let serial = timeline.next_serial();
        lock(&device.internal().allocators)
            .unwrap()
            .get_mut(&allocator)
            .unwrap()
            .last_submission = Some((Arc::clone(&timeline), serial));

        assert_eq!(
            device.reset_command_allocator(allocator).unwrap_err(),
            GpuError::Command(CommandError::AllocatorInFlight {
                allocator,
                pending: 1,
                completed: 0,
            })
        );
        timeline.complete(serial);
        device.reset_command_allocator(allocator).unwrap();
    }

    #[test]
    fn timeline_serials_grow() {
        let timeline = QueueTimeline::default();
        assert_eq!(timeline.next_serial(), 1);
        assert_eq!(timeline.next_serial(), 2);
        timeline.complete(2);
        timeline.complete(1);
        assert_eq!(timeline.completed(), 2);
    }
}
