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

//! The renderer: one-time setup followed by a fence-paced frame loop.
//!
//! Every frame waits for the previous frame's fence value, re-records the
//! single command list (dispatch into the output texture, copy into the
//! current back buffer), submits it, presents and signals the next value.

use super::acceleration::{
    build_bottom_level, build_top_level, rebuild_top_level, AccelerationStructure, Instance,
};
use super::context::RaytracingContext;
use super::frame_sync::{FrameState, FrameTicket};
use super::pipeline::{
    PipelineConfig, RaytracingPipeline, CAMERA_CBV_PARAMETER, HIT_GROUP_EXPORT, MISS_EXPORT,
    OUTPUT_TABLE_PARAMETER, RAY_GEN_EXPORT, SCENE_SRV_PARAMETER,
};
use super::scene;
use super::shader_table::{SampleShaderTable, ShaderRecord};
use prism_core::math::Transform3x4;
use prism_core::renderer::api::*;
use prism_core::renderer::{
    BuildError, DeviceRemovedReason, FrameError, GpuError, GraphicsBackend, GraphicsDevice,
    InitError, PresentationSurface, SurfaceDescriptor,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TLAS_LABEL: &str = "scene TLAS";

/// Everything `initialize` creates, dropped in reverse order by `shutdown`.
#[derive(Debug)]
struct FrameResources {
    surface: Box<dyn PresentationSurface>,
    context: RaytracingContext,
    blas: AccelerationStructure,
    tlas: AccelerationStructure,
    instances: Vec<Instance>,
    instances_dirty: bool,
    pipeline: RaytracingPipeline,
    output: ResourceId,
    camera_buffer: ResourceId,
    camera_address: GpuVirtualAddress,
    shader_table: SampleShaderTable,
}

impl FrameResources {
    fn device(&self) -> Arc<dyn GraphicsDevice> {
        Arc::clone(self.context.device())
    }

    /// Destroys everything in reverse creation order.
    fn release(self) -> Result<(), GpuError> {
        let device = self.device();
        let device = device.as_ref();
        self.shader_table.table.release(device)?;
        device.destroy_resource(self.camera_buffer)?;
        device.destroy_resource(self.output)?;
        self.pipeline.release(device)?;
        self.tlas.release(device)?;
        self.blas.release(device)
    }
}

fn removal_reason(err: &FrameError) -> Option<DeviceRemovedReason> {
    match err {
        FrameError::Gpu(GpuError::DeviceRemoved(reason)) | FrameError::Faulted(reason) => {
            Some(reason.clone())
        }
        _ => None,
    }
}

fn advance(state: &mut FrameState, to: FrameState) {
    debug_assert!(
        state.can_transition_to(to),
        "invalid frame state transition {state} -> {to}"
    );
    log::trace!("Frame state: {state} -> {to}");
    *state = to;
}

fn millis(duration: Duration) -> f32 {
    duration.as_secs_f32() * 1000.0
}

/// Renders the triangle sample through any [`GraphicsBackend`].
#[derive(Debug)]
pub struct RaytracingRenderer {
    backend: Arc<dyn GraphicsBackend>,
    settings: RaytracingSettings,
    shader_library: Vec<u8>,
    resources: Option<FrameResources>,
    state: FrameState,
    fault: Option<DeviceRemovedReason>,
    frame_number: u64,
    last_ticket: Option<FrameTicket>,
    last_stats: FrameStats,
}

impl RaytracingRenderer {
    /// Creates an uninitialized renderer. `shader_library` is the compiled
    /// library exporting `RayGen`, `Miss` and `ClosestHit`.
    pub fn new(
        backend: Arc<dyn GraphicsBackend>,
        settings: RaytracingSettings,
        shader_library: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            backend,
            settings,
            shader_library: shader_library.into(),
            resources: None,
            state: FrameState::Idle,
            fault: None,
            frame_number: 0,
            last_ticket: None,
            last_stats: FrameStats::default(),
        }
    }

    pub fn settings(&self) -> &RaytracingSettings {
        &self.settings
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    /// The reason the device was lost, once the renderer faulted.
    pub fn fault(&self) -> Option<&DeviceRemovedReason> {
        self.fault.as_ref()
    }

    pub fn last_stats(&self) -> &FrameStats {
        &self.last_stats
    }

    pub fn last_ticket(&self) -> Option<FrameTicket> {
        self.last_ticket
    }

    /// The last fence value handed to the queue.
    pub fn signaled_value(&self) -> u64 {
        self.resources
            .as_ref()
            .map_or(0, |r| r.context.sync().signaled_value())
    }

    pub fn completed_value(&self) -> u64 {
        self.resources
            .as_ref()
            .map_or(0, |r| r.context.sync().completed_value())
    }

    pub fn device(&self) -> Option<Arc<dyn GraphicsDevice>> {
        self.resources.as_ref().map(FrameResources::device)
    }

    /// The texture the dispatch writes.
    pub fn output_texture(&self) -> Option<ResourceId> {
        self.resources.as_ref().map(|r| r.output)
    }

    pub fn pipeline(&self) -> Option<RaytracingPipeline> {
        self.resources.as_ref().map(|r| r.pipeline)
    }

    pub fn shader_table(&self) -> Option<SampleShaderTable> {
        self.resources.as_ref().map(|r| r.shader_table)
    }

    pub fn bottom_level(&self) -> Option<&AccelerationStructure> {
        self.resources.as_ref().map(|r| &r.blas)
    }

    pub fn top_level(&self) -> Option<&AccelerationStructure> {
        self.resources.as_ref().map(|r| &r.tlas)
    }

    /// Runs the full setup sequence: device, queue, fence, geometry, both
    /// acceleration structures, pipeline, output texture, camera constants and
    /// shader table. The GPU is idle when this returns.
    pub fn initialize(&mut self) -> Result<(), InitError> {
        if self.resources.is_some() {
            return Err(InitError::AlreadyInitialized);
        }
        if let Some(reason) = &self.fault {
            return Err(InitError::Gpu(GpuError::DeviceRemoved(reason.clone())));
        }
        self.settings
            .validate()
            .map_err(|e| InitError::InvalidSettings(e.to_string()))?;

        let start = Instant::now();
        log::info!(
            "Initializing raytracing renderer ({}x{}, {} back buffers)...",
            self.settings.width,
            self.settings.height,
            self.settings.back_buffer_count
        );
        let resources = self.create_resources()?;
        log::info!(
            "Raytracing renderer initialized in {:.2} ms",
            millis(start.elapsed())
        );

        self.resources = Some(resources);
        self.state = FrameState::Idle;
        self.frame_number = 0;
        self.last_ticket = None;
        Ok(())
    }

    fn create_resources(&self) -> Result<FrameResources, InitError> {
        let settings = &self.settings;
        let device = self.backend.create_device()?;
        let adapter = device.adapter_info();
        log::info!(
            "Using adapter \"{}\" ({:?}, raytracing tier {})",
            adapter.name,
            adapter.kind,
            adapter.raytracing_tier
        );

        let mut context = RaytracingContext::new(Arc::clone(&device), settings.fence_timeout())?;
        let surface = self.backend.create_surface(
            &device,
            context.queue(),
            &SurfaceDescriptor {
                width: settings.width,
                height: settings.height,
                back_buffer_count: settings.back_buffer_count,
            },
        )?;

        // Geometry, then both levels in one submission ordered by a UAV barrier.
        let list = context.begin_recording()?;
        let blas = build_bottom_level(
            device.as_ref(),
            list,
            &scene::triangle_geometry(),
            "triangle BLAS",
        )?;
        list.resource_barrier(&[ResourceBarrier::uav(blas.result)])?;
        let instances = vec![Instance::new(&blas, Transform3x4::IDENTITY)];
        let tlas = build_top_level(device.as_ref(), list, &instances, TLAS_LABEL)?;
        if let Err(e) = context.submit_and_flush() {
            context.log_validation_messages();
            return Err(e.into());
        }
        log::debug!(
            "Acceleration structures ready: BLAS at {}, TLAS at {}",
            blas.address,
            tlas.address
        );

        let pipeline = match RaytracingPipeline::create(
            device.as_ref(),
            &PipelineConfig::hello_triangle(&self.shader_library, settings.max_recursion_depth),
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                context.log_validation_messages();
                return Err(e.into());
            }
        };

        let output = device.create_texture(&TextureDescriptor {
            label: Some("raytracing output".into()),
            width: settings.width,
            height: settings.height,
            format: TextureFormat::Rgba8Unorm,
            initial_state: ResourceState::UnorderedAccess,
            allow_unordered_access: true,
        })?;

        let camera = scene::camera_constants(settings.aspect_ratio()).ok_or_else(|| {
            InitError::InvalidSettings("the camera matrices are not invertible".to_string())
        })?;
        let camera_buffer = device.create_buffer(&BufferDescriptor::upload(
            "camera constants",
            CONSTANT_BUFFER_ALIGNMENT,
        ))?;
        device.write_buffer(camera_buffer, 0, bytemuck::bytes_of(&camera))?;
        let camera_address = device.gpu_virtual_address(camera_buffer)?;

        let shader_table = SampleShaderTable::build(
            device.as_ref(),
            ShaderRecord::new(pipeline.shader_identifier(device.as_ref(), RAY_GEN_EXPORT)?),
            ShaderRecord::with_arguments(
                pipeline.shader_identifier(device.as_ref(), MISS_EXPORT)?,
                &scene::background_arguments(settings.background),
            ),
            ShaderRecord::new(pipeline.shader_identifier(device.as_ref(), HIT_GROUP_EXPORT)?),
        )?;

        Ok(FrameResources {
            surface,
            context,
            blas,
            tlas,
            instances,
            instances_dirty: false,
            pipeline,
            output,
            camera_buffer,
            camera_address,
            shader_table,
        })
    }

    /// Records, submits and presents one frame.
    ///
    /// Returns the ticket that completes once the frame's GPU work is done.
    pub fn render_frame(&mut self) -> Result<FrameTicket, FrameError> {
        if let Some(reason) = &self.fault {
            return Err(FrameError::Faulted(reason.clone()));
        }

        match self.run_frame() {
            Ok(ticket) => Ok(ticket),
            Err(FrameError::NotInitialized) => Err(FrameError::NotInitialized),
            Err(err) => Err(self.handle_failure(err)),
        }
    }

    fn run_frame(&mut self) -> Result<FrameTicket, FrameError> {
        let resources = self.resources.as_mut().ok_or(FrameError::NotInitialized)?;
        let frame_number = self.frame_number + 1;
        let verbose = frame_number == 1;
        let device = resources.device();

        // --- Wait for the previous frame ---
        let wait_start = Instant::now();
        if let Some(previous) = self.last_ticket {
            if self.state == FrameState::Presented {
                advance(&mut self.state, FrameState::Waiting);
            }
            resources.context.sync().wait_for(previous)?;
            self.state = FrameState::Idle;
        }
        let cpu_wait_time_ms = millis(wait_start.elapsed());

        // --- Record ---
        let record_start = Instant::now();
        advance(&mut self.state, FrameState::Recording);
        let back_buffer_index = resources.surface.current_back_buffer_index();
        let back_buffer = resources.surface.back_buffer(back_buffer_index)?;
        let (width, height) = (self.settings.width, self.settings.height);

        let list = resources.context.begin_recording()?;
        if resources.instances_dirty {
            rebuild_top_level(
                device.as_ref(),
                list,
                &mut resources.tlas,
                &resources.instances,
                TLAS_LABEL,
            )?;
            list.resource_barrier(&[ResourceBarrier::uav(resources.tlas.result)])?;
            resources.instances_dirty = false;
        }

        list.set_compute_root_signature(resources.pipeline.root_signature)?;
        list.set_compute_root_descriptor_table(OUTPUT_TABLE_PARAMETER, resources.output)?;
        list.set_compute_root_shader_resource_view(SCENE_SRV_PARAMETER, resources.tlas.address)?;
        list.set_compute_root_constant_buffer_view(CAMERA_CBV_PARAMETER, resources.camera_address)?;
        list.set_pipeline_state(resources.pipeline.pipeline)?;
        let dispatch = resources.shader_table.dispatch_desc(width, height);
        list.dispatch_rays(&dispatch)?;
        if verbose {
            log::debug!("First frame: recorded DispatchRays {width}x{height} over {dispatch:?}");
        }

        let copy_barriers = [
            ResourceBarrier::transition(
                resources.output,
                ResourceState::UnorderedAccess,
                ResourceState::CopySource,
            ),
            ResourceBarrier::transition(
                back_buffer,
                ResourceState::Present,
                ResourceState::CopyDest,
            ),
        ];
        list.resource_barrier(&copy_barriers)?;
        list.copy_resource(back_buffer, resources.output)?;
        let restore: Vec<ResourceBarrier> =
            copy_barriers.iter().map(ResourceBarrier::reversed).collect();
        list.resource_barrier(&restore)?;
        let cpu_record_time_ms = millis(record_start.elapsed());

        // --- Submit, present, signal ---
        let submit_start = Instant::now();
        resources.context.submit()?;
        advance(&mut self.state, FrameState::Submitted);
        if verbose {
            log::debug!("First frame: submitted, presenting back buffer {back_buffer_index}");
        }
        // Submitted work is fenced even when the present fails.
        let presented = resources.surface.present(self.settings.sync_interval);
        let ticket = resources.context.signal_frame()?;
        self.last_ticket = Some(ticket);
        presented?;
        advance(&mut self.state, FrameState::Presented);
        let cpu_submit_time_ms = millis(submit_start.elapsed());
        if verbose {
            log::debug!("First frame: signaled fence value {}", ticket.value);
        }

        self.frame_number = frame_number;
        self.last_stats = FrameStats {
            frame_number,
            fence_value: ticket.value,
            back_buffer_index,
            cpu_wait_time_ms,
            cpu_record_time_ms,
            cpu_submit_time_ms,
            rays_dispatched: dispatch.invocation_count(),
        };
        log::trace!("Frame {frame_number} stats: {:?}", self.last_stats);
        Ok(ticket)
    }

    fn handle_failure(&mut self, err: FrameError) -> FrameError {
        if let Some(resources) = self.resources.as_mut() {
            resources.context.log_validation_messages();
            // An abandoned recording would keep the allocator busy.
            let list = resources.context.command_list();
            if list.state() == CommandListState::Recording {
                if let Err(e) = list.close() {
                    log::warn!("Failed to close the abandoned command list: {e}");
                }
            }
        }

        match removal_reason(&err) {
            Some(reason) => {
                log::error!("Device removed during frame {}: {reason}", self.frame_number + 1);
                advance(&mut self.state, FrameState::Faulted);
                self.fault = Some(reason);
            }
            None => {
                log::error!("Frame {} failed: {err}", self.frame_number + 1);
                self.state = FrameState::Idle;
            }
        }
        err
    }

    /// Blocks until the last frame's GPU work finished.
    pub fn wait_for_gpu(&mut self) -> Result<(), FrameError> {
        if let Some(reason) = &self.fault {
            return Err(FrameError::Faulted(reason.clone()));
        }
        let resources = self.resources.as_ref().ok_or(FrameError::NotInitialized)?;
        let Some(ticket) = self.last_ticket else {
            return Ok(());
        };
        if self.state == FrameState::Presented {
            advance(&mut self.state, FrameState::Waiting);
        }
        match resources.context.sync().wait_for(ticket) {
            Ok(_) => {
                if self.state == FrameState::Waiting {
                    advance(&mut self.state, FrameState::Idle);
                }
                Ok(())
            }
            Err(err) => Err(self.handle_failure(err.into())),
        }
    }

    /// Waits on an arbitrary ticket with an explicit timeout.
    pub fn wait(&self, ticket: FrameTicket, timeout: Duration) -> Result<WaitStatus, FrameError> {
        let resources = self.resources.as_ref().ok_or(FrameError::NotInitialized)?;
        Ok(resources.context.sync().wait(ticket, timeout)?)
    }

    /// Moves instance `index` of the scene. The top-level structure is rebuilt
    /// at the start of the next frame.
    pub fn set_instance_transform(
        &mut self,
        index: usize,
        transform: Transform3x4,
    ) -> Result<(), FrameError> {
        let resources = self.resources.as_mut().ok_or(FrameError::NotInitialized)?;
        let count = resources.instances.len();
        let instance = resources.instances.get_mut(index).ok_or_else(|| {
            FrameError::Gpu(
                BuildError::MalformedInstances(format!(
                    "instance {index} does not exist ({count} instances)"
                ))
                .into(),
            )
        })?;
        instance.transform = transform;
        resources.instances_dirty = true;
        Ok(())
    }

    /// Waits for the GPU, then releases every resource in reverse creation order.
    pub fn shutdown(&mut self) -> Result<(), GpuError> {
        let Some(mut resources) = self.resources.take() else {
            return Ok(());
        };
        log::info!("Shutting down raytracing renderer after {} frames", self.frame_number);

        let flushed = match self.fault {
            Some(_) => Ok(()),
            None => resources.context.flush(),
        };
        if let Err(e) = &flushed {
            log::error!("Failed to flush the GPU before shutdown: {e}");
        }
        let released = resources.release();
        if let Err(e) = &released {
            log::warn!("Failed to release renderer resources: {e}");
        }
        let result = flushed.and(released);

        if self.fault.is_none() {
            self.state = FrameState::Idle;
        }
        self.last_ticket = None;
        result
    }
}

impl Drop for RaytracingRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Raytracing renderer shutdown failed: {e}");
        }
    }
}
