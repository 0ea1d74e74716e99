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

//! Adapter selection and device creation for the software backend.
//!
//! The selector enumerates a configurable list of adapters so that the
//! hardware-first, software-fallback policy can be exercised without real GPUs.
//! Only the reference adapter is ever backed by an actual implementation: a
//! "hardware" adapter yields the same CPU device under a different name.

use super::device::SoftwareDevice;
use super::queue::SoftwareQueue;
use super::surface::{PresentMonitor, SoftwareSwapchain};
use anyhow::{anyhow, Result};
use prism_core::renderer::api::*;
use prism_core::renderer::{
    AdapterSelector, CommandError, CommandQueue, GpuError, GraphicsBackend, GraphicsDevice,
    PresentationSurface, SurfaceDescriptor,
};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Memory budget of the reference adapter.
const REFERENCE_MEMORY_BUDGET: u64 = 2 * 1024 * 1024 * 1024;

/// One adapter the selector can enumerate.
#[derive(Debug, Clone)]
pub struct SoftwareAdapterDesc {
    pub name: String,
    pub kind: AdapterKind,
    pub raytracing_tier: RaytracingTier,
    pub memory_budget_bytes: u64,
    pub limits: DeviceLimits,
}

impl SoftwareAdapterDesc {
    /// The WARP-like CPU adapter.
    pub fn reference() -> Self {
        Self {
            name: "Prism Software Reference Adapter".to_string(),
            kind: AdapterKind::Software,
            raytracing_tier: RaytracingTier::Tier1_1,
            memory_budget_bytes: REFERENCE_MEMORY_BUDGET,
            limits: DeviceLimits::default(),
        }
    }

    /// A hardware adapter with the given name and raytracing tier.
    pub fn hardware(name: impl Into<String>, raytracing_tier: RaytracingTier) -> Self {
        Self {
            name: name.into(),
            kind: AdapterKind::Hardware,
            raytracing_tier,
            ..Self::reference()
        }
    }

    pub fn info(&self) -> AdapterInfo {
        AdapterInfo {
            name: self.name.clone(),
            vendor_id: 0,
            device_id: 0,
            kind: self.kind,
            raytracing_tier: self.raytracing_tier,
            memory_budget_bytes: self.memory_budget_bytes,
        }
    }
}

/// Picks the first capable hardware adapter, then falls back to software.
#[derive(Debug, Clone)]
pub struct SoftwareAdapterSelector {
    adapters: Vec<SoftwareAdapterDesc>,
}

impl SoftwareAdapterSelector {
    pub fn new(adapters: Vec<SoftwareAdapterDesc>) -> Self {
        Self { adapters }
    }
}

impl Default for SoftwareAdapterSelector {
    fn default() -> Self {
        Self::new(vec![SoftwareAdapterDesc::reference()])
    }
}

impl AdapterSelector<SoftwareAdapterDesc> for SoftwareAdapterSelector {
    type Error = anyhow::Error;

    fn list_adapters(&self) -> Vec<AdapterInfo> {
        self.adapters.iter().map(SoftwareAdapterDesc::info).collect()
    }

    fn select_adapter(&self, min_tier: RaytracingTier) -> Result<SoftwareAdapterDesc> {
        let start_time = Instant::now();
        log::info!(
            "Starting adapter selection among {} adapters (raytracing tier {min_tier} or above)...",
            self.adapters.len()
        );

        for adapter in &self.adapters {
            if adapter.kind == AdapterKind::Software {
                continue;
            }
            if adapter.raytracing_tier >= min_tier {
                log::info!(
                    "Selected hardware adapter \"{}\" (raytracing {}) in {} ms",
                    adapter.name,
                    adapter.raytracing_tier,
                    start_time.elapsed().as_millis()
                );
                return Ok(adapter.clone());
            }
            log::warn!(
                "Skipping adapter \"{}\": raytracing tier {} is too low.",
                adapter.name,
                adapter.raytracing_tier
            );
        }

        let fallback = self
            .adapters
            .iter()
            .find(|a| a.kind == AdapterKind::Software && a.raytracing_tier >= min_tier)
            .ok_or_else(|| {
                anyhow!(
                    "No adapter supports raytracing tier {min_tier}. Attempted: {:?}",
                    self.adapters.iter().map(|a| &a.name).collect::<Vec<_>>()
                )
            })?;
        log::warn!(
            "No capable hardware adapter, falling back to software adapter \"{}\".",
            fallback.name
        );
        Ok(fallback.clone())
    }
}

/// The software implementation of [`GraphicsBackend`].
#[derive(Debug)]
pub struct SoftwareBackend {
    selector: SoftwareAdapterSelector,
    device: Mutex<Option<SoftwareDevice>>,
    monitor: Mutex<Option<PresentMonitor>>,
}

impl SoftwareBackend {
    /// A backend exposing only the reference adapter.
    pub fn new() -> Self {
        Self::with_adapters(vec![SoftwareAdapterDesc::reference()])
    }

    pub fn with_adapters(adapters: Vec<SoftwareAdapterDesc>) -> Self {
        Self {
            selector: SoftwareAdapterSelector::new(adapters),
            device: Mutex::new(None),
            monitor: Mutex::new(None),
        }
    }

    /// The last device created, for inspection.
    pub fn device(&self) -> Option<SoftwareDevice> {
        self.device.lock().ok().and_then(|d| d.clone())
    }

    /// Observes the last surface created.
    pub fn present_monitor(&self) -> Option<PresentMonitor> {
        self.monitor.lock().ok().and_then(|m| m.clone())
    }

    /// The shader library of the triangle sample, compiled for the software ISA.
    pub fn hello_triangle_library() -> &'static [u8] {
        include_bytes!("../../../shaders/hello_triangle.json")
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn create_device(&self) -> Result<Arc<dyn GraphicsDevice>, GpuError> {
        let adapter = self
            .selector
            .select_adapter(RaytracingTier::Tier1_0)
            .map_err(|e| {
                log::error!("Adapter selection failed: {e}");
                GpuError::NoCapableAdapter
            })?;

        let device = SoftwareDevice::new(adapter.info(), adapter.limits);
        if let Ok(mut slot) = self.device.lock() {
            *slot = Some(device.clone());
        }
        Ok(Arc::new(device))
    }

    fn create_surface(
        &self,
        device: &Arc<dyn GraphicsDevice>,
        queue: &dyn CommandQueue,
        descriptor: &SurfaceDescriptor,
    ) -> Result<Box<dyn PresentationSurface>, GpuError> {
        if let Some(reason) = device.device_removed_reason() {
            return Err(GpuError::DeviceRemoved(reason));
        }
        let queue = queue
            .as_any()
            .downcast_ref::<SoftwareQueue>()
            .ok_or(CommandError::ForeignObject("command queue"))?;

        let swapchain = SoftwareSwapchain::new(queue, descriptor)?;
        if let Ok(mut slot) = self.monitor.lock() {
            *slot = Some(swapchain.monitor());
        }
        Ok(Box::new(swapchain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_adapter_is_preferred() {
        let selector = SoftwareAdapterSelector::new(vec![
            SoftwareAdapterDesc::reference(),
            SoftwareAdapterDesc::hardware("Old GPU", RaytracingTier::NotSupported),
            SoftwareAdapterDesc::hardware("RT GPU", RaytracingTier::Tier1_0),
        ]);
        let chosen = selector.select_adapter(RaytracingTier::Tier1_0).unwrap();
        assert_eq!(chosen.name, "RT GPU");
        assert_eq!(selector.list_adapters().len(), 3);
    }

    #[test]
    fn falls_back_to_software() {
        let selector = SoftwareAdapterSelector::new(vec![
            SoftwareAdapterDesc::hardware("Old GPU", RaytracingTier::NotSupported),
            SoftwareAdapterDesc::reference(),
        ]);
        let chosen = selector.select_adapter(RaytracingTier::Tier1_0).unwrap();
        assert_eq!(chosen.kind, AdapterKind::Software);
    }

    #[test]
    fn no_capable_adapter_fails_device_creation() {
        let backend = SoftwareBackend::with_adapters(vec![SoftwareAdapterDesc::hardware(
            "Old GPU",
            RaytracingTier::NotSupported,
        )]);
        assert_eq!(
            backend.create_device().err(),
            Some(GpuError::NoCapableAdapter)
        );
        assert!(backend.device().is_none());
    }

    #[test]
    fn surface_is_created_on_the_software_queue() {
        let backend = SoftwareBackend::new();
        let device = backend.create_device().unwrap();
        let queue = device.create_command_queue().unwrap();
        let surface = backend
            .create_surface(
                &device,
                queue.as_ref(),
                &SurfaceDescriptor {
                    width: 8,
                    height: 8,
                    back_buffer_count: 3,
                },
            )
            .unwrap();
        assert_eq!(surface.back_buffer_count(), 3);
        assert!(backend.present_monitor().is_some());
        assert_eq!(device.adapter_info().kind, AdapterKind::Software);
    }

    #[test]
    fn bundled_library_parses() {
        let library = super::super::shader::parse_library(
            "hello_triangle",
            SoftwareBackend::hello_triangle_library(),
        )
        .unwrap();
        assert_eq!(library.exports.len(), 3);
    }
}
