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

//! A headless swapchain. Presenting snapshots the back buffer on the queue
//! timeline instead of handing it to a compositor.

use super::device::{lock, SoftwareDevice, SoftwareDeviceInternal};
use super::queue::{QueueJob, SoftwareQueue};
use prism_core::renderer::api::*;
use prism_core::renderer::{
    DeviceRemovedReason, GpuError, GraphicsDevice, PresentationSurface, SurfaceDescriptor,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Highest sync interval DXGI accepts.
const MAX_SYNC_INTERVAL: u32 = 4;

/// The image the presentation engine last received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedFrame {
    pub buffer_index: u32,
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 rows.
    pub pixels: Vec<u8>,
    /// How many presents completed, this one included.
    pub present_count: u64,
}

#[derive(Default)]
pub(crate) struct SwapchainShared {
    last: Mutex<Option<PresentedFrame>>,
    presents: AtomicU64,
    invalid: AtomicBool,
}

pub(crate) struct PresentJob {
    pub swapchain: Arc<SwapchainShared>,
    pub buffer: ResourceId,
    pub index: u32,
}

/// Runs on the queue worker once every earlier submission has executed.
pub(crate) fn complete_present(device: &SoftwareDeviceInternal, job: PresentJob) {
    let snapshot = lock(&device.resources).and_then(|resources| {
        let entry = resources.get(job.buffer)?;
        Ok((entry.state, entry.dimension, Arc::clone(&entry.data)))
    });
    let (state, dimension, data) = match snapshot {
        Ok(snapshot) => snapshot,
        Err(e) => {
            device.push_message(
                MessageSeverity::Error,
                format!("Present: back buffer {:?} is gone: {e}", job.buffer),
            );
            return;
        }
    };

    if !state.is_compatible_with(ResourceState::Present) {
        device.push_message(
            MessageSeverity::Error,
            format!(
                "Present: back buffer {} is in the {state:?} state, expected Present",
                job.index
            ),
        );
        return;
    }
    let ResourceDimension::Texture2D { width, height, .. } = dimension else {
        return;
    };
    let Ok(pixels) = data.read().map(|bytes| bytes.clone()) else {
        return;
    };

    let present_count = job.swapchain.presents.fetch_add(1, Ordering::AcqRel) + 1;
    if let Ok(mut last) = job.swapchain.last.lock() {
        *last = Some(PresentedFrame {
            buffer_index: job.index,
            width,
            height,
            pixels,
            present_count,
        });
    }
    log::trace!("SoftwareSwapchain: Presented back buffer {} (#{present_count})", job.index);
}

/// Observes what a swapchain presented, from outside the render loop.
#[derive(Debug, Clone)]
pub struct PresentMonitor {
    shared: Arc<SwapchainShared>,
}

impl PresentMonitor {
    pub fn last_frame(&self) -> Option<PresentedFrame> {
        self.shared.last.lock().ok().and_then(|last| last.clone())
    }

    pub fn present_count(&self) -> u64 {
        self.shared.presents.load(Ordering::Acquire)
    }

    /// Makes every later present fail, as a lost window would.
    pub fn invalidate(&self) {
        self.shared.invalid.store(true, Ordering::Release);
    }
}

/// A ring of RGBA8 back buffers presented through a [`SoftwareQueue`].
#[derive(Debug)]
pub struct SoftwareSwapchain {
    device: Arc<SoftwareDeviceInternal>,
    sender: flume::Sender<QueueJob>,
    buffers: Vec<ResourceId>,
    current: u32,
    shared: Arc<SwapchainShared>,
}

impl std::fmt::Debug for SwapchainShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapchainShared")
            .field("presents", &self.presents.load(Ordering::Relaxed))
            .field("invalid", &self.invalid.load(Ordering::Relaxed))
            .finish()
    }
}

impl SoftwareSwapchain {
    pub fn new(queue: &SoftwareQueue, descriptor: &SurfaceDescriptor) -> Result<Self, GpuError> {
        let device = SoftwareDevice::from_internal(Arc::clone(queue.device()));
        if descriptor.back_buffer_count < 2 {
            return Err(GpuError::PresentFailure(format!(
                "a flip swapchain needs at least 2 back buffers, got {}",
                descriptor.back_buffer_count
            )));
        }

        let mut buffers = Vec::with_capacity(descriptor.back_buffer_count as usize);
        for index in 0..descriptor.back_buffer_count {
            let label = format!("back buffer {index}");
            let created = device.create_texture(&TextureDescriptor {
                label: Some(label.as_str().into()),
                width: descriptor.width,
                height: descriptor.height,
                format: TextureFormat::Rgba8Unorm,
                initial_state: ResourceState::Present,
                allow_unordered_access: false,
            });
            match created {
                Ok(id) => buffers.push(id),
                Err(e) => {
                    for id in buffers {
                        let _ = device.destroy_resource(id);
                    }
                    return Err(e);
                }
            }
        }

        log::info!(
            "SoftwareSwapchain: Created {} back buffers of {}x{}",
            descriptor.back_buffer_count,
            descriptor.width,
            descriptor.height
        );
        Ok(Self {
            device: Arc::clone(queue.device()),
            sender: queue.sender(),
            buffers,
            current: 0,
            shared: Arc::new(SwapchainShared::default()),
        })
    }

    pub fn monitor(&self) -> PresentMonitor {
        PresentMonitor {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl PresentationSurface for SoftwareSwapchain {
    fn back_buffer_count(&self) -> u32 {
        self.buffers.len() as u32
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.current
    }

    fn back_buffer(&self, index: u32) -> Result<ResourceId, GpuError> {
        self.buffers.get(index as usize).copied().ok_or_else(|| {
            GpuError::PresentFailure(format!(
                "back buffer {index} does not exist ({} in the ring)",
                self.buffers.len()
            ))
        })
    }

    fn present(&mut self, sync_interval: u32) -> Result<(), GpuError> {
        self.device.check_alive()?;
        if self.shared.invalid.load(Ordering::Acquire) {
            return Err(GpuError::PresentFailure("the surface was lost".to_string()));
        }
        if sync_interval > MAX_SYNC_INTERVAL {
            return Err(GpuError::PresentFailure(format!(
                "sync interval {sync_interval} is above {MAX_SYNC_INTERVAL}"
            )));
        }

        let index = self.current;
        let job = PresentJob {
            swapchain: Arc::clone(&self.shared),
            buffer: self.back_buffer(index)?,
            index,
        };
        self.sender.send(QueueJob::Present(job)).map_err(|_| {
            let reason = DeviceRemovedReason::DriverInternalError;
            self.device.remove_device(reason.clone());
            GpuError::DeviceRemoved(reason)
        })?;
        self.current = (index + 1) % self.buffers.len() as u32;
        Ok(())
    }
}

impl Drop for SoftwareSwapchain {
    fn drop(&mut self) {
        let device = SoftwareDevice::from_internal(Arc::clone(&self.device));
        for id in self.buffers.drain(..) {
            if let Err(e) = device.destroy_resource(id) {
                log::warn!("SoftwareSwapchain: Failed to release back buffer {id:?}: {e}");
            }
        }
        log::debug!("SoftwareSwapchain: Destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::software::device::test_device;
    use prism_core::renderer::{CommandQueue, Fence};
    use std::time::Duration;

    fn setup() -> (SoftwareDevice, SoftwareQueue) {
        let device = test_device();
        let queue = SoftwareQueue::new(Arc::clone(device.internal())).unwrap();
        (device, queue)
    }

    fn descriptor() -> SurfaceDescriptor {
        SurfaceDescriptor {
            width: 4,
            height: 2,
            back_buffer_count: 2,
        }
    }

    fn flush(device: &SoftwareDevice, queue: &SoftwareQueue) {
        let fence = device.create_fence(0).unwrap();
        queue.signal(fence.as_ref(), 1).unwrap();
        fence.wait(1, Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn present_advances_the_ring_and_snapshots() {
        let (device, queue) = setup();
        let mut swapchain = SoftwareSwapchain::new(&queue, &descriptor()).unwrap();
        let monitor = swapchain.monitor();
        let first = swapchain.back_buffer(0).unwrap();
        assert_eq!(device.resource_state(first).unwrap(), ResourceState::Present);

        swapchain.present(1).unwrap();
        assert_eq!(swapchain.current_back_buffer_index(), 1);
        swapchain.present(0).unwrap();
        assert_eq!(swapchain.current_back_buffer_index(), 0);
        flush(&device, &queue);

        assert_eq!(monitor.present_count(), 2);
        let frame = monitor.last_frame().unwrap();
        assert_eq!((frame.buffer_index, frame.width, frame.height), (1, 4, 2));
        assert_eq!(frame.pixels.len(), 4 * 2 * 4);
    }

    #[test]
    fn invalid_sync_interval_and_lost_surface_fail() {
        let (_device, queue) = setup();
        let mut swapchain = SoftwareSwapchain::new(&queue, &descriptor()).unwrap();
        assert!(matches!(swapchain.present(5), Err(GpuError::PresentFailure(_))));
        swapchain.monitor().invalidate();
        assert!(matches!(swapchain.present(1), Err(GpuError::PresentFailure(_))));
        assert_eq!(swapchain.current_back_buffer_index(), 0);
    }

    #[test]
    fn single_buffer_swapchain_is_rejected() {
        let (_device, queue) = setup();
        let desc = SurfaceDescriptor {
            back_buffer_count: 1,
            ..descriptor()
        };
        assert!(SoftwareSwapchain::new(&queue, &desc).is_err());
    }

    #[test]
    fn dropping_releases_back_buffers() {
        let (device, queue) = setup();
        let before = device.allocated_bytes();
        let swapchain = SoftwareSwapchain::new(&queue, &descriptor()).unwrap();
        assert!(device.allocated_bytes() > before);
        drop(swapchain);
        assert_eq!(device.allocated_bytes(), before);
    }
}
