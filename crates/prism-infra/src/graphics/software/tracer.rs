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

//! CPU ray traversal and the shader programs of the software ISA.

use super::acceleration::{DecodedStructure, PackedInstance, PackedTriangle};
use super::bvh::{self, BvhNode};
use super::shader::Program;
use prism_core::math::{LinearRgba, Vec3, Vec4};
use prism_core::renderer::api::CameraConstants;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Parallel-determinant threshold below which a triangle is treated as edge-on.
const DETERMINANT_EPSILON: f32 = 1e-8;

#[derive(Debug)]
pub(crate) struct SceneInstance {
    pub instance: PackedInstance,
    pub blas: Arc<DecodedStructure<PackedTriangle>>,
}

/// A decoded top-level structure together with the bottom levels it references.
#[derive(Debug, Default)]
pub(crate) struct Scene {
    pub nodes: Vec<BvhNode>,
    /// In the order the top-level leaves refer to.
    pub instances: Vec<SceneInstance>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub t_min: f32,
    pub t_max: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Hit {
    pub t: f32,
    pub barycentrics: (f32, f32),
    pub instance: usize,
    pub geometry_index: u32,
    pub primitive_index: u32,
}

/// Moller-Trumbore, without back-face culling. Returns `(t, u, v)`.
fn intersect_triangle(ray_origin: Vec3, ray_direction: Vec3, triangle: &[Vec3; 3]) -> Option<(f32, f32, f32)> {
    let [v0, v1, v2] = *triangle;
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let p = ray_direction.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < DETERMINANT_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray_origin - v0;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = ray_direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    Some((edge2.dot(q) * inv_det, u, v))
}

impl Scene {
    /// Finds the closest hit among instances whose mask overlaps `instance_mask`.
    pub fn trace(&self, ray: &Ray, instance_mask: u8) -> Option<Hit> {
        let mut closest: Option<Hit> = None;
        bvh::traverse(&self.nodes, ray.origin, ray.direction, ray.t_min, ray.t_max, |leaf, t_max| {
            let mut t_max = t_max;
            for slot in leaf {
                let Some(scene_instance) = self.instances.get(slot) else {
                    continue;
                };
                if scene_instance.instance.desc.mask() & instance_mask == 0 {
                    continue;
                }
                // The object-space direction is not renormalized, so `t` stays a world-space distance.
                let to_object = &scene_instance.instance.world_to_object;
                let origin = to_object.transform_point(ray.origin);
                let direction = to_object.transform_vector(ray.direction);
                let blas = &scene_instance.blas;
                bvh::traverse(&blas.nodes, origin, direction, ray.t_min, t_max, |tris, blas_t_max| {
                    let mut blas_t_max = blas_t_max;
                    for index in tris {
                        let Some(triangle) = blas.primitives.get(index) else {
                            continue;
                        };
                        if let Some((t, u, v)) = intersect_triangle(origin, direction, &triangle.positions()) {
                            if t >= ray.t_min && t <= blas_t_max {
                                blas_t_max = t;
                                closest = Some(Hit {
                                    t,
                                    barycentrics: (u, v),
                                    instance: slot,
                                    geometry_index: triangle.geometry_index,
                                    primitive_index: triangle.primitive_index,
                                });
                            }
                        }
                    }
                    blas_t_max
                });
                if let Some(hit) = closest {
                    t_max = t_max.min(hit.t);
                }
            }
            t_max
        });
        closest
    }

    fn hit_group_contribution(&self, hit: &Hit) -> u32 {
        self.instances
            .get(hit.instance)
            .map(|i| i.instance.desc.hit_group_contribution())
            .unwrap_or_default()
    }
}

/// One resolved shader record: the program its identifier names and its local root arguments.
#[derive(Debug, Clone, Default)]
pub(crate) struct ShaderRecord {
    /// `None` for a null identifier or a hit group without a closest-hit shader.
    pub program: Option<Program>,
    pub local_arguments: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ShaderTable {
    pub records: Vec<ShaderRecord>,
    /// A zero stride makes every index read the first record.
    pub repeat_first: bool,
}

impl ShaderTable {
    pub fn get(&self, index: u32) -> Option<&ShaderRecord> {
        if self.repeat_first {
            self.records.first()
        } else {
            self.records.get(index as usize)
        }
    }
}

/// The `TraceRay` arguments of the ray-generation program.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RayGenParams {
    pub t_min: f32,
    pub t_max: f32,
    pub instance_mask: u8,
    pub ray_contribution: u32,
    pub geometry_multiplier: u32,
    pub miss_index: u32,
}

#[derive(Debug)]
pub(crate) struct RenderedImage {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 rows.
    pub pixels: Vec<u8>,
    /// Hit-group or miss lookups that fell outside their table.
    pub unresolved_records: u64,
}

/// Builds the primary ray of pixel `(x, y)` by unprojecting through the inverse matrices.
pub(crate) fn primary_ray(camera: &CameraConstants, x: u32, y: u32, width: u32, height: u32, params: &RayGenParams) -> Ray {
    let nx = (x as f32 + 0.5) / width as f32 * 2.0 - 1.0;
    let ny = (y as f32 + 0.5) / height as f32 * 2.0 - 1.0;

    let origin = (camera.view_inverse * Vec4::new(0.0, 0.0, 0.0, 1.0)).truncate();
    let target = camera.proj_inverse * Vec4::new(nx, -ny, 1.0, 1.0);
    let target = target.truncate() / target.w;
    let direction = (camera.view_inverse * target.normalize().extend(0.0)).truncate();

    Ray {
        origin,
        direction,
        t_min: params.t_min,
        t_max: params.t_max,
    }
}

fn run_program(record: &ShaderRecord, hit: Option<&Hit>, payload: &mut LinearRgba) {
    match &record.program {
        Some(Program::SolidColor { color }) => {
            *payload = LinearRgba::new(color[0], color[1], color[2], color[3]);
        }
        Some(Program::RecordColor) => {
            if let Some(bytes) = record.local_arguments.get(..16) {
                let c: [f32; 4] = bytemuck::pod_read_unaligned(bytes);
                *payload = LinearRgba::new(c[0], c[1], c[2], c[3]);
            }
        }
        Some(Program::BarycentricColor) => {
            if let Some(hit) = hit {
                let (u, v) = hit.barycentrics;
                *payload = LinearRgba::new(1.0 - u - v, u, v, 1.0);
            }
        }
        Some(Program::PinholeCamera { .. }) | None => {}
    }
}

/// Traces one primary ray per pixel and shades it through the shader tables.
pub(crate) fn render(
    scene: &Scene,
    camera: &CameraConstants,
    params: &RayGenParams,
    miss_table: &ShaderTable,
    hit_table: &ShaderTable,
    width: u32,
    height: u32,
) -> RenderedImage {
    let unresolved = AtomicU64::new(0);
    let row_bytes = width as usize * 4;
    let mut pixels = vec![0u8; row_bytes * height as usize];

    if row_bytes > 0 {
        pixels
            .par_chunks_mut(row_bytes)
            .enumerate()
            .for_each(|(y, row)| {
                for x in 0..width {
                    let ray = primary_ray(camera, x, y as u32, width, height, params);
                    let mut payload = LinearRgba::TRANSPARENT;

                    let hit = scene.trace(&ray, params.instance_mask);
                    let record = match &hit {
                        Some(hit) => {
                            let index = params.ray_contribution
                                + params.geometry_multiplier * hit.geometry_index
                                + scene.hit_group_contribution(hit);
                            hit_table.get(index)
                        }
                        None => miss_table.get(params.miss_index),
                    };
                    match record {
                        Some(record) => run_program(record, hit.as_ref(), &mut payload),
                        None => {
                            unresolved.fetch_add(1, Ordering::Relaxed);
                        }
                    }

                    let offset = x as usize * 4;
                    row[offset..offset + 4].copy_from_slice(&payload.to_rgba8());
                }
            });
    }

    RenderedImage {
        width,
        height,
        pixels,
        unresolved_records: unresolved.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::software::acceleration::{self, decode};
    use approx::assert_relative_eq;
    use prism_core::math::{Mat4, Transform3x4};
    use prism_core::renderer::api::{AccelerationStructureKind, GpuVirtualAddress, InstanceDesc};

    fn hello_triangle() -> PackedTriangle {
        PackedTriangle {
            v0: [0.0, 0.25, 0.0],
            geometry_index: 0,
            v1: [0.25, -0.25, 0.0],
            primitive_index: 0,
            v2: [-0.25, -0.25, 0.0],
            _pad: 0,
        }
    }

    fn scene_with(transform: Transform3x4, mask: u8) -> Scene {
        let blas_out = acceleration::build_bottom_level(&[hello_triangle()]);
        let blas: DecodedStructure<PackedTriangle> =
            decode(&blas_out.result, AccelerationStructureKind::BottomLevel).unwrap();
        let desc = InstanceDesc::new(transform, 0, mask, 0, 0, GpuVirtualAddress(0x1_0000_0000));
        let tlas_out = acceleration::build_top_level(&[desc], &[blas.header.bounds()]);
        let tlas: DecodedStructure<PackedInstance> =
            decode(&tlas_out.result, AccelerationStructureKind::TopLevel).unwrap();
        let blas = Arc::new(blas);
        Scene {
            nodes: tlas.nodes,
            instances: tlas
                .primitives
                .into_iter()
                .map(|instance| SceneInstance {
                    instance,
                    blas: Arc::clone(&blas),
                })
                .collect(),
        }
    }

    fn forward_ray(x: f32, y: f32) -> Ray {
        Ray {
            origin: Vec3::new(x, y, -2.5),
            direction: Vec3::Z,
            t_min: 0.001,
            t_max: 10000.0,
        }
    }

    #[test]
    fn ray_through_triangle_hits_with_barycentrics() {
        let scene = scene_with(Transform3x4::IDENTITY, 0xFF);
        let hit = scene.trace(&forward_ray(0.0, 0.0), 0xFF).unwrap();
        assert_relative_eq!(hit.t, 2.5, epsilon = 1e-5);
        let (u, v) = hit.barycentrics;
        assert!(u > 0.0 && v > 0.0 && u + v < 1.0);
    }

    #[test]
    fn ray_beside_triangle_misses() {
        let scene = scene_with(Transform3x4::IDENTITY, 0xFF);
        assert!(scene.trace(&forward_ray(0.5, 0.5), 0xFF).is_none());
    }

    #[test]
    fn back_faces_are_not_culled() {
        let scene = scene_with(Transform3x4::IDENTITY, 0xFF);
        let ray = Ray {
            origin: Vec3::new(0.0, 0.0, 2.5),
            direction: Vec3::new(0.0, 0.0, -1.0),
            t_min: 0.001,
            t_max: 10000.0,
        };
        assert!(scene.trace(&ray, 0xFF).is_some());
    }

    #[test]
    fn instance_mask_filters_instances() {
        let scene = scene_with(Transform3x4::IDENTITY, 0x01);
        assert!(scene.trace(&forward_ray(0.0, 0.0), 0x02).is_none());
        assert!(scene.trace(&forward_ray(0.0, 0.0), 0x01).is_some());
    }

    #[test]
    fn instance_transform_moves_the_triangle() {
        let scene = scene_with(Transform3x4::from_translation(Vec3::new(3.0, 0.0, 0.0)), 0xFF);
        assert!(scene.trace(&forward_ray(0.0, 0.0), 0xFF).is_none());
        assert!(scene.trace(&forward_ray(3.0, 0.0), 0xFF).is_some());
    }

    #[test]
    fn t_max_excludes_far_hits() {
        let scene = scene_with(Transform3x4::IDENTITY, 0xFF);
        let mut ray = forward_ray(0.0, 0.0);
        ray.t_max = 2.0;
        assert!(scene.trace(&ray, 0xFF).is_none());
    }

    #[test]
    fn center_pixel_ray_points_down_the_view_axis() {
        let camera = CameraConstants::from_inverses(
            Mat4::from_translation(Vec3::new(0.0, 0.0, -2.5)),
            Mat4::IDENTITY,
        );
        let params = RayGenParams {
            t_min: 0.001,
            t_max: 10000.0,
            instance_mask: 0xFF,
            ray_contribution: 0,
            geometry_multiplier: 0,
            miss_index: 0,
        };
        let ray = primary_ray(&camera, 1, 1, 3, 3, &params);
        assert_relative_eq!(ray.origin.z, -2.5, epsilon = 1e-6);
        assert_relative_eq!(ray.direction.z, 1.0, epsilon = 1e-6);
        assert_relative_eq!(ray.direction.x, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn missing_records_leave_payload_and_are_counted() {
        let scene = Scene::default();
        let camera = CameraConstants::from_inverses(Mat4::IDENTITY, Mat4::IDENTITY);
        let params = RayGenParams {
            t_min: 0.001,
            t_max: 10.0,
            instance_mask: 0xFF,
            ray_contribution: 0,
            geometry_multiplier: 0,
            miss_index: 3,
        };
        let miss = ShaderTable {
            records: vec![ShaderRecord {
                program: Some(Program::SolidColor { color: [1.0, 0.0, 0.0, 1.0] }),
                local_arguments: Vec::new(),
            }],
            repeat_first: false,
        };
        let image = render(&scene, &camera, &params, &miss, &ShaderTable::default(), 2, 2);
        assert_eq!(image.unresolved_records, 4);
        assert!(image.pixels.iter().all(|b| *b == 0));

        let repeated = ShaderTable {
            repeat_first: true,
            ..miss
        };
        let image = render(&scene, &camera, &params, &repeated, &ShaderTable::default(), 2, 2);
        assert_eq!(image.unresolved_records, 0);
        assert_eq!(&image.pixels[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn record_color_reads_local_arguments() {
        let mut local_arguments = Vec::new();
        for c in [0.0f32, 1.0, 0.0, 1.0] {
            local_arguments.extend_from_slice(&c.to_le_bytes());
        }
        let record = ShaderRecord {
            program: Some(Program::RecordColor),
            local_arguments,
        };
        let mut payload = LinearRgba::TRANSPARENT;
        run_program(&record, None, &mut payload);
        assert_eq!(payload.to_rgba8(), [0, 255, 0, 255]);
    }
}
