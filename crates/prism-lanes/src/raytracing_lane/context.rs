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

//! The device, queue and recording objects shared by every raytracing step.

use super::frame_sync::{FrameSynchronizer, FrameTicket};
use prism_core::renderer::api::{CommandAllocatorId, MessageSeverity};
use prism_core::renderer::{CommandList, CommandQueue, GpuError, GraphicsDevice};
use std::sync::Arc;
use std::time::Duration;

/// Owns one direct queue, one allocator/command-list pair and the frame fence.
///
/// The same allocator and list are reset and re-recorded for every batch of
/// work, so a new recording must wait until the previous submission completed.
#[derive(Debug)]
pub struct RaytracingContext {
    device: Arc<dyn GraphicsDevice>,
    queue: Box<dyn CommandQueue>,
    allocator: CommandAllocatorId,
    command_list: Box<dyn CommandList>,
    sync: FrameSynchronizer,
}

impl RaytracingContext {
    pub fn new(device: Arc<dyn GraphicsDevice>, fence_timeout: Duration) -> Result<Self, GpuError> {
        let queue = device.create_command_queue()?;
        let allocator = device.create_command_allocator()?;
        let command_list = device.create_command_list(allocator)?;
        let sync = FrameSynchronizer::new(device.as_ref(), fence_timeout)?;
        log::debug!("RaytracingContext: Created queue, allocator {allocator:?} and command list");
        Ok(Self {
            device,
            queue,
            allocator,
            command_list,
            sync,
        })
    }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }

    pub fn queue(&self) -> &dyn CommandQueue {
        self.queue.as_ref()
    }

    pub fn command_list(&mut self) -> &mut dyn CommandList {
        self.command_list.as_mut()
    }

    pub fn sync(&self) -> &FrameSynchronizer {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut FrameSynchronizer {
        &mut self.sync
    }

    /// Resets the allocator and opens the command list for recording.
    pub fn begin_recording(&mut self) -> Result<&mut dyn CommandList, GpuError> {
        self.device.reset_command_allocator(self.allocator)?;
        self.command_list.reset(self.allocator)?;
        Ok(self.command_list.as_mut())
    }

    /// Closes the command list and hands it to the queue.
    pub fn submit(&mut self) -> Result<(), GpuError> {
        self.command_list.close()?;
        self.queue.execute_command_lists(&[self.command_list.as_ref()])
    }

    /// Submits the recording and blocks until the GPU has executed it.
    pub fn submit_and_flush(&mut self) -> Result<(), GpuError> {
        self.submit()?;
        self.sync.flush(self.queue.as_ref())
    }

    /// Signals the next fence value on the queue.
    pub fn signal_frame(&mut self) -> Result<FrameTicket, GpuError> {
        self.sync.advance_and_signal(self.queue.as_ref())
    }

    /// Waits for all submitted work.
    pub fn flush(&mut self) -> Result<(), GpuError> {
        self.sync.flush(self.queue.as_ref())
    }

    /// Logs and discards the device's pending validation messages.
    pub fn log_validation_messages(&self) {
        for message in self.device.drain_validation_messages() {
            match message.severity {
                MessageSeverity::Info => log::debug!("Device message: {}", message.text),
                MessageSeverity::Warning => log::warn!("Device message: {}", message.text),
                MessageSeverity::Error | MessageSeverity::Corruption => {
                    log::error!("Device message: {}", message.text)
                }
            }
        }
    }
}
