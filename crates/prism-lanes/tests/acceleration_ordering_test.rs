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

//! Integration tests for acceleration-structure builds and their ordering.
//!
//! A top-level build reads the bottom-level structures it instances. Inside a
//! single submission that read is only ordered by a UAV barrier; across
//! submissions the fence wait orders it.

use prism_core::math::Transform3x4;
use prism_core::renderer::api::{AccelerationStructureKind, ResourceBarrier};
use prism_core::renderer::{BuildError, CommandList, GpuError, GraphicsBackend, GraphicsDevice};
use prism_infra::graphics::software::{SoftwareBackend, SoftwareDevice};
use prism_lanes::{
    build_bottom_level, build_top_level, rebuild_top_level, scene, Instance, RaytracingContext,
    TriangleGeometry,
};
use std::sync::Arc;
use std::time::Duration;

/// Helper: a context on a fresh software device.
fn context() -> (SoftwareDevice, Arc<dyn GraphicsDevice>, RaytracingContext) {
    let backend = SoftwareBackend::new();
    let device = backend.create_device().expect("reference adapter is capable");
    let software = backend.device().expect("device was created");
    let context = RaytracingContext::new(Arc::clone(&device), Duration::from_secs(5))
        .expect("context should be created");
    (software, device, context)
}

#[test]
fn test_tlas_without_uav_barrier_reports_a_hazard() {
    // --- 1. ARRANGE ---
    let (software, device, mut context) = context();
    let list = context.begin_recording().expect("recording");

    // --- 2. ACT ---
    let blas = build_bottom_level(device.as_ref(), list, &scene::triangle_geometry(), "blas")
        .expect("blas");
    let instances = [Instance::new(&blas, Transform3x4::IDENTITY)];
    build_top_level(device.as_ref(), list, &instances, "tlas").expect("tlas");
    context.submit_and_flush().expect("submission");

    // --- 3. ASSERT ---
    assert_eq!(software.hazard_count(), 1);
    let log = software.build_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].kind, AccelerationStructureKind::TopLevel);
    assert!(log[1].read_unflushed_input);
}

#[test]
fn test_uav_barrier_orders_the_tlas_build() {
    let (software, device, mut context) = context();
    let list = context.begin_recording().expect("recording");

    let blas = build_bottom_level(device.as_ref(), list, &scene::triangle_geometry(), "blas")
        .expect("blas");
    list.resource_barrier(&[ResourceBarrier::uav(blas.result)])
        .expect("barrier");
    let instances = [Instance::new(&blas, Transform3x4::IDENTITY)];
    build_top_level(device.as_ref(), list, &instances, "tlas").expect("tlas");
    context.submit_and_flush().expect("submission");

    assert_eq!(software.hazard_count(), 0);
    assert!(software.build_log().iter().all(|b| !b.read_unflushed_input));
}

#[test]
fn test_fence_wait_between_submissions_orders_the_tlas_build() {
    let (software, device, mut context) = context();

    let list = context.begin_recording().expect("recording");
    let blas = build_bottom_level(device.as_ref(), list, &scene::triangle_geometry(), "blas")
        .expect("blas");
    context.submit_and_flush().expect("first submission");

    let list = context.begin_recording().expect("second recording");
    let instances = [Instance::new(&blas, Transform3x4::IDENTITY)];
    build_top_level(device.as_ref(), list, &instances, "tlas").expect("tlas");
    context.submit_and_flush().expect("second submission");

    assert_eq!(software.hazard_count(), 0);
    assert_eq!(context.sync().signaled_value(), 2);
}

#[test]
fn test_rebuild_reuses_buffers_that_fit() {
    // --- 1. ARRANGE ---
    let (_software, device, mut context) = context();
    let list = context.begin_recording().expect("recording");
    let blas = build_bottom_level(device.as_ref(), list, &scene::triangle_geometry(), "blas")
        .expect("blas");
    list.resource_barrier(&[ResourceBarrier::uav(blas.result)])
        .expect("barrier");
    let mut tlas = build_top_level(
        device.as_ref(),
        list,
        &[Instance::new(&blas, Transform3x4::IDENTITY)],
        "tlas",
    )
    .expect("tlas");
    context.submit_and_flush().expect("submission");
    let original = tlas.clone();

    // --- 2. ACT ---
    let list = context.begin_recording().expect("second recording");
    let moved = [Instance::new(&blas, Transform3x4::from_rotation_y(0.5))];
    rebuild_top_level(device.as_ref(), list, &mut tlas, &moved, "tlas").expect("rebuild");
    context.submit_and_flush().expect("second submission");

    // --- 3. ASSERT ---
    assert_eq!(tlas.result, original.result);
    assert_eq!(tlas.address, original.address);
}

#[test]
fn test_empty_geometry_is_rejected_before_recording_a_build() {
    let (software, device, mut context) = context();
    let list = context.begin_recording().expect("recording");

    let result = build_bottom_level(
        device.as_ref(),
        list,
        &TriangleGeometry::default(),
        "empty",
    );

    assert!(matches!(
        result,
        Err(GpuError::Build(BuildError::EmptyGeometry))
    ));
    context.submit_and_flush().expect("an empty submission still executes");
    assert!(software.build_log().is_empty());
}

#[test]
fn test_failed_recording_releases_the_build_buffers() {
    // --- 1. ARRANGE ---
    let (software, device, mut context) = context();
    let list = context.begin_recording().expect("recording");
    list.close().expect("close");

    // --- 2. ACT ---
    let blas = build_bottom_level(device.as_ref(), list, &scene::triangle_geometry(), "blas");

    // --- 3. ASSERT ---
    assert!(blas.is_err(), "a closed list cannot record a build");
    assert_eq!(software.allocated_bytes(), 0);
}
