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

use super::device::SoftwareDeviceInternal;
use prism_core::renderer::api::WaitStatus;
use prism_core::renderer::{DeviceRemovedReason, Fence, GpuError};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// The monotonically increasing value the queue worker signals.
#[derive(Debug)]
pub(crate) struct FenceShared {
    value: Mutex<u64>,
    reached: Condvar,
}

impl FenceShared {
    fn new(initial_value: u64) -> Self {
        Self {
            value: Mutex::new(initial_value),
            reached: Condvar::new(),
        }
    }

    pub fn value(&self) -> u64 {
        self.value.lock().map(|v| *v).unwrap_or(u64::MAX)
    }

    /// Sets the completed value. Values never go backwards.
    pub fn signal(&self, value: u64) {
        if let Ok(mut current) = self.value.lock() {
            if value > *current {
                *current = value;
            }
        }
        self.reached.notify_all();
    }

    /// Wakes every waiter without changing the value.
    pub fn wake(&self) {
        // Taking the lock orders the wakeup after any waiter's removal check.
        let _guard = self.value.lock();
        self.reached.notify_all();
    }
}

#[derive(Debug)]
pub struct SoftwareFence {
    device: Arc<SoftwareDeviceInternal>,
    pub(crate) shared: Arc<FenceShared>,
}

impl SoftwareFence {
    pub(crate) fn new(device: Arc<SoftwareDeviceInternal>, initial_value: u64) -> Self {
        let shared = Arc::new(FenceShared::new(initial_value));
        device.register_fence(&shared);
        Self { device, shared }
    }
}

impl Fence for SoftwareFence {
    fn completed_value(&self) -> u64 {
        self.shared.value()
    }

    fn wait(&self, value: u64, timeout: Duration) -> Result<WaitStatus, GpuError> {
        let deadline = Instant::now() + timeout;
        let mut current = self
            .shared
            .value
            .lock()
            .map_err(|_| GpuError::DeviceRemoved(DeviceRemovedReason::DriverInternalError))?;

        loop {
            if *current >= value {
                return Ok(WaitStatus::Completed);
            }
            if let Some(reason) = self.device.removed_reason() {
                return Err(GpuError::DeviceRemoved(reason));
            }
            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "SoftwareFence: Wait for value {value} timed out after {} ms (completed {})",
                    timeout.as_millis(),
                    *current
                );
                return Ok(WaitStatus::TimedOut);
            }
            current = self
                .shared
                .reached
                .wait_timeout(current, deadline - now)
                .map_err(|_| GpuError::DeviceRemoved(DeviceRemovedReason::DriverInternalError))?
                .0;
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::software::device::test_device;
    use std::thread;

    fn internal() -> Arc<SoftwareDeviceInternal> {
        Arc::clone(test_device().internal())
    }

    #[test]
    fn wait_returns_immediately_when_reached() {
        let fence = SoftwareFence::new(internal(), 3);
        assert_eq!(
            fence.wait(2, Duration::from_millis(1)).unwrap(),
            WaitStatus::Completed
        );
    }

    #[test]
    fn wait_times_out() {
        let fence = SoftwareFence::new(internal(), 0);
        let start = Instant::now();
        assert_eq!(
            fence.wait(1, Duration::from_millis(20)).unwrap(),
            WaitStatus::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn signal_from_another_thread_wakes_waiter() {
        let fence = SoftwareFence::new(internal(), 0);
        let shared = Arc::clone(&fence.shared);
        let signaller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            shared.signal(5);
        });
        assert_eq!(
            fence.wait(5, Duration::from_secs(5)).unwrap(),
            WaitStatus::Completed
        );
        signaller.join().unwrap();
        // Lower values never rewind the fence.
        fence.shared.signal(2);
        assert_eq!(fence.completed_value(), 5);
    }

    #[test]
    fn removal_wakes_waiter_with_error() {
        let device = internal();
        let fence = SoftwareFence::new(Arc::clone(&device), 0);
        let remover = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            device.remove_device(DeviceRemovedReason::Hung);
        });
        assert_eq!(
            fence.wait(1, Duration::from_secs(5)).unwrap_err(),
            GpuError::DeviceRemoved(DeviceRemovedReason::Hung)
        );
        remover.join().unwrap();
    }
}
