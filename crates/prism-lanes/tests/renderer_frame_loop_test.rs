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

//! Integration tests for the raytracing renderer's frame loop.
//!
//! These tests run the full setup sequence and the fence-paced frame loop on
//! the software backend and inspect the device afterwards.

use prism_core::math::{LinearRgba, Transform3x4, Vec3};
use prism_core::renderer::api::{RaytracingSettings, RaytracingTier, ResourceState, WaitStatus};
use prism_core::renderer::{DeviceRemovedReason, FrameError, GpuError, InitError, PipelineError};
use prism_infra::graphics::software::{SoftwareAdapterDesc, SoftwareBackend};
use prism_lanes::{
    scene, FrameState, FrameTicket, RaytracingRenderer, SampleShaderTable, HIT_GROUP_EXPORT,
    MISS_EXPORT, RAY_GEN_EXPORT,
};
use std::sync::Arc;
use std::time::Duration;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

/// Helper: small settings that keep the software tracer fast.
fn small_settings() -> RaytracingSettings {
    RaytracingSettings {
        width: WIDTH,
        height: HEIGHT,
        sync_interval: 0,
        ..RaytracingSettings::default()
    }
}

/// Helper: an initialized renderer plus the backend it runs on.
fn initialized_renderer() -> (Arc<SoftwareBackend>, RaytracingRenderer) {
    let backend = Arc::new(SoftwareBackend::new());
    let mut renderer = RaytracingRenderer::new(
        backend.clone(),
        small_settings(),
        SoftwareBackend::hello_triangle_library(),
    );
    renderer.initialize().expect("initialization should succeed");
    (backend, renderer)
}

fn pixel(pixels: &[u8], x: u32, y: u32) -> [u8; 4] {
    let offset = ((y * WIDTH + x) * 4) as usize;
    [
        pixels[offset],
        pixels[offset + 1],
        pixels[offset + 2],
        pixels[offset + 3],
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Setup
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_initialize_leaves_the_gpu_idle() {
    let (backend, renderer) = initialized_renderer();

    assert!(renderer.is_initialized());
    assert_eq!(renderer.state(), FrameState::Idle);
    assert_eq!(renderer.completed_value(), renderer.signaled_value());

    let device = backend.device().expect("device should exist");
    assert_eq!(device.hazard_count(), 0, "BLAS and TLAS are separated by a UAV barrier");
    assert_eq!(device.build_log().len(), 2);
}

#[test]
fn test_initialize_twice_is_rejected() {
    let (_backend, mut renderer) = initialized_renderer();
    assert!(matches!(
        renderer.initialize(),
        Err(InitError::AlreadyInitialized)
    ));
}

#[test]
fn test_invalid_settings_are_rejected_before_touching_the_device() {
    let backend = Arc::new(SoftwareBackend::new());
    let settings = RaytracingSettings {
        back_buffer_count: 1,
        ..small_settings()
    };
    let mut renderer =
        RaytracingRenderer::new(backend.clone(), settings, SoftwareBackend::hello_triangle_library());

    assert!(matches!(
        renderer.initialize(),
        Err(InitError::InvalidSettings(_))
    ));
    assert!(backend.device().is_none());
}

#[test]
fn test_no_capable_adapter_fails_initialization() {
    let backend = Arc::new(SoftwareBackend::with_adapters(vec![
        SoftwareAdapterDesc::hardware("Legacy GPU", RaytracingTier::NotSupported),
    ]));
    let mut renderer =
        RaytracingRenderer::new(backend, small_settings(), SoftwareBackend::hello_triangle_library());

    assert!(matches!(
        renderer.initialize(),
        Err(InitError::Gpu(GpuError::NoCapableAdapter))
    ));
    assert!(!renderer.is_initialized());
}

#[test]
fn test_library_without_closest_hit_fails_pipeline_creation() {
    let library = br#"{
        "format": "prism-software-isa",
        "version": 1,
        "exports": [
            { "name": "RayGen", "stage": "ray_generation", "payload_bytes": 16, "trace_depth": 1,
              "program": { "op": "pinhole_camera" } },
            { "name": "Miss", "stage": "miss", "payload_bytes": 16,
              "program": { "op": "record_color" } }
        ]
    }"#;
    let backend = Arc::new(SoftwareBackend::new());
    let mut renderer = RaytracingRenderer::new(backend, small_settings(), library.to_vec());

    let result = renderer.initialize();
    assert!(
        matches!(
            result,
            Err(InitError::Gpu(GpuError::Pipeline(
                PipelineError::ShaderCompileFailure { .. }
            )))
        ),
        "unexpected result: {result:?}"
    );
}

#[test]
fn test_shader_table_records_hold_the_pipeline_identifiers() {
    // --- 1. ARRANGE ---
    let (_backend, renderer) = initialized_renderer();
    let device = renderer.device().expect("device");
    let pipeline = renderer.pipeline().expect("pipeline");
    let table = renderer.shader_table().expect("shader table").table;

    // --- 2. ACT ---
    let bytes = device.read_buffer(table.buffer).expect("upload heap is readable");

    // --- 3. ASSERT ---
    assert_eq!(table.stride, 64);
    assert_eq!(table.record_count, 3);
    let expected = [
        (SampleShaderTable::RAY_GEN_RECORD, RAY_GEN_EXPORT),
        (SampleShaderTable::MISS_RECORD, MISS_EXPORT),
        (SampleShaderTable::HIT_GROUP_RECORD, HIT_GROUP_EXPORT),
    ];
    for (record, export) in expected {
        let identifier = pipeline
            .shader_identifier(device.as_ref(), export)
            .expect("export exists");
        let start = record as usize * table.stride as usize;
        assert_eq!(
            &bytes[start..start + 32],
            identifier.as_bytes(),
            "record {record} should start with the '{export}' identifier"
        );
    }

    let miss_args = table.stride as usize + 32;
    assert_eq!(
        bytes[miss_args..miss_args + 16],
        scene::background_arguments(LinearRgba::CORNFLOWER_BLUE)
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame loop
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_each_frame_signals_the_next_fence_value() {
    let (_backend, mut renderer) = initialized_renderer();
    let base = renderer.signaled_value();

    for frame in 1..=3u64 {
        let ticket = renderer.render_frame().expect("frame should render");
        assert_eq!(ticket.value, base + frame);
        assert_eq!(renderer.signaled_value(), base + frame);
        assert_eq!(renderer.last_stats().frame_number, frame);
        assert_eq!(renderer.last_stats().fence_value, ticket.value);
    }

    renderer.wait_for_gpu().expect("wait should succeed");
    assert_eq!(renderer.completed_value(), base + 3);
}

#[test]
fn test_frame_state_cycles_through_presented_and_idle() {
    let (_backend, mut renderer) = initialized_renderer();

    renderer.render_frame().expect("frame should render");
    assert_eq!(renderer.state(), FrameState::Presented);

    renderer.wait_for_gpu().expect("wait should succeed");
    assert_eq!(renderer.state(), FrameState::Idle);

    renderer.render_frame().expect("frame should render");
    assert_eq!(renderer.state(), FrameState::Presented);
}

#[test]
fn test_back_buffers_alternate_between_frames() {
    let (backend, mut renderer) = initialized_renderer();

    renderer.render_frame().expect("frame 1");
    let first = renderer.last_stats().back_buffer_index;
    renderer.render_frame().expect("frame 2");
    let second = renderer.last_stats().back_buffer_index;
    renderer.wait_for_gpu().expect("wait");

    assert_ne!(first, second);
    let monitor = backend.present_monitor().expect("surface exists");
    assert_eq!(monitor.present_count(), 2);
    assert_eq!(
        renderer.last_stats().rays_dispatched,
        u64::from(WIDTH * HEIGHT)
    );
}

#[test]
fn test_output_moves_to_copy_source_and_back() {
    // --- 1. ARRANGE ---
    let (backend, mut renderer) = initialized_renderer();
    let device = backend.device().expect("device");
    let output = renderer.output_texture().expect("output texture");

    // --- 2. ACT ---
    renderer.render_frame().expect("frame should render");
    renderer.wait_for_gpu().expect("wait");

    // --- 3. ASSERT ---
    let history: Vec<(ResourceState, ResourceState)> = device
        .transition_history(output)
        .iter()
        .map(|t| (t.before, t.after))
        .collect();
    assert_eq!(
        history,
        vec![
            (ResourceState::UnorderedAccess, ResourceState::CopySource),
            (ResourceState::CopySource, ResourceState::UnorderedAccess),
        ]
    );
    assert_eq!(
        device.resource_state(output).expect("output exists"),
        ResourceState::UnorderedAccess
    );
}

#[test]
fn test_presented_image_shows_triangle_over_background() {
    // --- 1. ARRANGE ---
    let (backend, mut renderer) = initialized_renderer();

    // --- 2. ACT ---
    renderer.render_frame().expect("frame should render");
    renderer.wait_for_gpu().expect("wait");
    let frame = backend
        .present_monitor()
        .and_then(|m| m.last_frame())
        .expect("a frame was presented");

    // --- 3. ASSERT ---
    assert_eq!((frame.width, frame.height), (WIDTH, HEIGHT));
    let background = LinearRgba::CORNFLOWER_BLUE.to_rgba8();
    assert_eq!(pixel(&frame.pixels, 0, 0), background);
    assert_eq!(pixel(&frame.pixels, WIDTH - 1, HEIGHT - 1), background);

    // Near the centroid the barycentric shading is roughly (0.5, 0.25, 0.25).
    let center = pixel(&frame.pixels, WIDTH / 2, HEIGHT / 2);
    assert_ne!(center, background);
    assert_eq!(center[3], 255);
    assert!(center[0] > center[1] && center[0] > center[2], "center was {center:?}");
}

#[test]
fn test_default_resolution_shades_the_center_and_misses_the_corners() {
    let backend = Arc::new(SoftwareBackend::new());
    let settings = RaytracingSettings {
        sync_interval: 0,
        ..RaytracingSettings::default()
    };
    let mut renderer =
        RaytracingRenderer::new(backend.clone(), settings, SoftwareBackend::hello_triangle_library());
    renderer.initialize().expect("initialization should succeed");

    renderer.render_frame().expect("frame should render");
    renderer.wait_for_gpu().expect("wait");

    let output = renderer.output_texture().expect("output");
    let pixels = backend
        .device()
        .expect("device")
        .debug_read_resource(output)
        .expect("output is readable");
    let at = |x: usize, y: usize| {
        let offset = (y * 800 + x) * 4;
        [pixels[offset], pixels[offset + 1], pixels[offset + 2], pixels[offset + 3]]
    };
    let background = LinearRgba::CORNFLOWER_BLUE.to_rgba8();
    assert_eq!(pixels.len(), 800 * 600 * 4);
    assert_eq!(at(0, 0), background);
    assert_eq!(at(799, 599), background);
    assert_ne!(at(400, 300), background);
    assert_eq!(renderer.last_stats().rays_dispatched, 800 * 600);
}

#[test]
fn test_rendering_is_deterministic() {
    let render_once = || {
        let (backend, mut renderer) = initialized_renderer();
        renderer.render_frame().expect("frame should render");
        renderer.wait_for_gpu().expect("wait");
        let output = renderer.output_texture().expect("output");
        backend
            .device()
            .expect("device")
            .debug_read_resource(output)
            .expect("output is readable")
    };

    let first = render_once();
    let second = render_once();
    assert_eq!(first.len(), (WIDTH * HEIGHT * 4) as usize);
    assert!(first == second, "two runs produced different images");
}

#[test]
fn test_moving_the_instance_rebuilds_the_top_level() {
    // --- 1. ARRANGE ---
    let (backend, mut renderer) = initialized_renderer();
    let device = backend.device().expect("device");
    renderer.render_frame().expect("frame 1");
    let builds_before = device.build_log().len();

    // --- 2. ACT ---
    renderer
        .set_instance_transform(0, Transform3x4::from_translation(Vec3::new(5.0, 0.0, 0.0)))
        .expect("instance 0 exists");
    renderer.render_frame().expect("frame 2");
    renderer.wait_for_gpu().expect("wait");

    // --- 3. ASSERT ---
    assert_eq!(device.build_log().len(), builds_before + 1);
    assert_eq!(device.hazard_count(), 0);
    let frame = backend
        .present_monitor()
        .and_then(|m| m.last_frame())
        .expect("presented");
    let background = LinearRgba::CORNFLOWER_BLUE.to_rgba8();
    assert_eq!(
        pixel(&frame.pixels, WIDTH / 2, HEIGHT / 2),
        background,
        "the triangle moved out of the center"
    );
    assert!(renderer.set_instance_transform(1, Transform3x4::IDENTITY).is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Waits and faults
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_waiting_on_an_unsignaled_value_times_out() {
    let (_backend, renderer) = initialized_renderer();

    let status = renderer
        .wait(FrameTicket { value: 99 }, Duration::from_millis(10))
        .expect("wait itself should not fail");

    assert_eq!(status, WaitStatus::TimedOut);
}

#[test]
fn test_render_before_initialize_is_rejected() {
    let backend = Arc::new(SoftwareBackend::new());
    let mut renderer =
        RaytracingRenderer::new(backend, small_settings(), SoftwareBackend::hello_triangle_library());

    assert!(matches!(
        renderer.render_frame(),
        Err(FrameError::NotInitialized)
    ));
}

#[test]
fn test_device_removal_faults_the_renderer() {
    // --- 1. ARRANGE ---
    let (backend, mut renderer) = initialized_renderer();
    renderer.render_frame().expect("frame 1");
    let device = backend.device().expect("device");

    // --- 2. ACT ---
    device.inject_device_removed(DeviceRemovedReason::Reset);
    let failed = renderer.render_frame();
    let after = renderer.render_frame();

    // --- 3. ASSERT ---
    let err = failed.expect_err("the frame after removal must fail");
    assert!(err.is_device_removed(), "unexpected error: {err}");
    assert_eq!(renderer.state(), FrameState::Faulted);
    assert_eq!(renderer.fault(), Some(&DeviceRemovedReason::Reset));
    assert!(matches!(
        after,
        Err(FrameError::Faulted(DeviceRemovedReason::Reset))
    ));
    assert!(matches!(
        renderer.initialize(),
        Err(InitError::AlreadyInitialized)
    ));
}

#[test]
fn test_failed_present_still_fences_the_submitted_frame() {
    // --- 1. ARRANGE ---
    let (backend, mut renderer) = initialized_renderer();
    renderer.render_frame().expect("frame 1");
    renderer.wait_for_gpu().expect("wait");
    let signaled_before = renderer.signaled_value();
    backend
        .present_monitor()
        .expect("the surface exists")
        .invalidate();

    // --- 2. ACT ---
    let failed = renderer.render_frame();
    renderer.wait_for_gpu().expect("the submitted frame can be waited on");
    let completed_after_wait = renderer.completed_value();
    let next = renderer.render_frame();

    // --- 3. ASSERT ---
    assert!(matches!(failed, Err(FrameError::Gpu(GpuError::PresentFailure(_)))));
    assert_eq!(completed_after_wait, signaled_before + 1);
    assert_eq!(renderer.signaled_value(), signaled_before + 2);
    assert!(
        matches!(next, Err(FrameError::Gpu(GpuError::PresentFailure(_)))),
        "the next frame must fail on present again, got {next:?}"
    );
    assert_eq!(renderer.state(), FrameState::Idle);
    assert!(renderer.fault().is_none());
}

#[test]
fn test_shutdown_releases_every_resource() {
    let (backend, mut renderer) = initialized_renderer();
    renderer.render_frame().expect("frame");
    let device = backend.device().expect("device");

    renderer.shutdown().expect("shutdown should succeed");

    assert!(!renderer.is_initialized());
    assert_eq!(device.allocated_bytes(), 0);
    assert!(matches!(
        renderer.render_frame(),
        Err(FrameError::NotInitialized)
    ));
}

#[test]
fn test_shutdown_after_unobserved_removal_still_releases_resources() {
    // --- 1. ARRANGE ---
    let (backend, mut renderer) = initialized_renderer();
    let device = backend.device().expect("device");
    device.inject_device_removed(DeviceRemovedReason::Hung);

    // --- 2. ACT ---
    let result = renderer.shutdown();

    // --- 3. ASSERT ---
    assert!(matches!(
        result,
        Err(GpuError::DeviceRemoved(DeviceRemovedReason::Hung))
    ));
    assert!(!renderer.is_initialized());
    assert_eq!(device.allocated_bytes(), 0);
}
