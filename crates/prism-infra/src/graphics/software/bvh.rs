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

//! Bounding volume hierarchy used by both acceleration-structure levels.
//!
//! Bottom-level structures build it over triangles, top-level structures over
//! the world-space bounds of their instances. Nodes are `Pod` so they can be
//! stored verbatim in the result buffer of a build.

use prism_core::math::Vec3;
use std::cmp::Ordering;

/// Maximum number of primitives stored in a leaf.
pub const BVH_LEAF_SIZE: usize = 4;

/// Index stored in both child slots of a leaf.
const NO_CHILD: u32 = u32::MAX;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BvhNode {
    pub bounds_min: [f32; 4],
    pub bounds_max: [f32; 4],
    pub left_child: u32,
    pub right_child: u32,
    pub first_primitive: u32,
    pub primitive_count: u32,
}

impl BvhNode {
    fn new_leaf(bounds: Aabb, first_primitive: u32, primitive_count: usize) -> Self {
        Self {
            bounds_min: padded(bounds.min),
            bounds_max: padded(bounds.max),
            left_child: NO_CHILD,
            right_child: NO_CHILD,
            first_primitive,
            primitive_count: primitive_count as u32,
        }
    }

    fn new_interior(bounds: Aabb, left_child: u32, right_child: u32) -> Self {
        Self {
            bounds_min: padded(bounds.min),
            bounds_max: padded(bounds.max),
            left_child,
            right_child,
            first_primitive: 0,
            primitive_count: 0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left_child == NO_CHILD && self.right_child == NO_CHILD
    }

    pub fn bounds(&self) -> Aabb {
        Aabb {
            min: Vec3::new(self.bounds_min[0], self.bounds_min[1], self.bounds_min[2]),
            max: Vec3::new(self.bounds_max[0], self.bounds_max[1], self.bounds_max[2]),
        }
    }
}

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn from_points(points: &[Vec3]) -> Self {
        let mut out = Self::empty();
        for p in points {
            out.grow_point(*p);
        }
        out
    }

    pub fn grow_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn grow_with(&mut self, bounds: &Aabb) {
        self.min = self.min.min(bounds.min);
        self.max = self.max.max(bounds.max);
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn centroid(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// The eight corners, used to bound a transformed box.
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Slab test. Returns the entry distance if the ray overlaps `[t_min, t_max]`.
    pub fn intersect(&self, origin: Vec3, inv_dir: Vec3, t_min: f32, t_max: f32) -> Option<f32> {
        let mut t0 = t_min;
        let mut t1 = t_max;
        for axis in 0..3 {
            let o = origin.get(axis);
            let inv = inv_dir.get(axis);
            let mut near = (self.min.get(axis) - o) * inv;
            let mut far = (self.max.get(axis) - o) * inv;
            if near > far {
                std::mem::swap(&mut near, &mut far);
            }
            // NaN from 0 * inf keeps the current interval.
            if near > t0 {
                t0 = near;
            }
            if far < t1 {
                t1 = far;
            }
            if t0 > t1 {
                return None;
            }
        }
        Some(t0)
    }
}

/// A built hierarchy: nodes in depth-first order and the primitive order leaves refer to.
#[derive(Debug, Default)]
pub struct Bvh {
    pub nodes: Vec<BvhNode>,
    pub primitive_indices: Vec<u32>,
}

/// Worst-case node count for `primitive_count` primitives.
pub fn max_node_count(primitive_count: usize) -> usize {
    if primitive_count == 0 {
        0
    } else {
        primitive_count * 2 - 1
    }
}

struct BvhPrimitive {
    index: u32,
    bounds: Aabb,
    centroid: Vec3,
}

/// Builds a hierarchy over `bounds` with a median split on the longest axis.
pub fn build_bvh(bounds: &[Aabb]) -> Bvh {
    if bounds.is_empty() {
        return Bvh::default();
    }

    let mut primitives: Vec<BvhPrimitive> = bounds
        .iter()
        .enumerate()
        .map(|(index, b)| BvhPrimitive {
            index: index as u32,
            bounds: *b,
            centroid: b.centroid(),
        })
        .collect();

    let mut nodes = Vec::with_capacity(max_node_count(bounds.len()));
    let mut primitive_indices = Vec::with_capacity(bounds.len());
    build_recursive(&mut primitives, &mut nodes, &mut primitive_indices);

    Bvh {
        nodes,
        primitive_indices,
    }
}

fn build_recursive(
    primitives: &mut [BvhPrimitive],
    nodes: &mut Vec<BvhNode>,
    primitive_indices: &mut Vec<u32>,
) -> u32 {
    let node_index = nodes.len() as u32;
    nodes.push(BvhNode::default());

    let mut bounds = Aabb::empty();
    for primitive in primitives.iter() {
        bounds.grow_with(&primitive.bounds);
    }

    if primitives.len() <= BVH_LEAF_SIZE {
        nodes[node_index as usize] = make_leaf(bounds, primitives, primitive_indices);
        return node_index;
    }

    let extent = bounds.max - bounds.min;
    let mut axis = 0;
    if extent.y > extent.x {
        axis = 1;
    }
    if extent.z > extent.get(axis) {
        axis = 2;
    }

    let mid = primitives.len() / 2;
    primitives.select_nth_unstable_by(mid, |a, b| {
        a.centroid
            .get(axis)
            .partial_cmp(&b.centroid.get(axis))
            .unwrap_or(Ordering::Equal)
            .then(a.index.cmp(&b.index))
    });

    let (left, right) = primitives.split_at_mut(mid);
    let left_child = build_recursive(left, nodes, primitive_indices);
    let right_child = build_recursive(right, nodes, primitive_indices);

    nodes[node_index as usize] = BvhNode::new_interior(bounds, left_child, right_child);
    node_index
}

fn make_leaf(bounds: Aabb, primitives: &[BvhPrimitive], primitive_indices: &mut Vec<u32>) -> BvhNode {
    let first_primitive = primitive_indices.len() as u32;
    primitive_indices.extend(primitives.iter().map(|p| p.index));
    BvhNode::new_leaf(bounds, first_primitive, primitives.len())
}

/// Visits, nearest-first where cheap, every leaf whose bounds the ray overlaps.
///
/// `visit_leaf` receives the leaf's primitive range and returns the new
/// closest hit distance, which is used to prune the rest of the traversal.
pub fn traverse<F>(nodes: &[BvhNode], origin: Vec3, direction: Vec3, t_min: f32, mut t_max: f32, mut visit_leaf: F)
where
    F: FnMut(std::ops::Range<usize>, f32) -> f32,
{
    if nodes.is_empty() {
        return;
    }
    let inv_dir = Vec3::new(1.0 / direction.x, 1.0 / direction.y, 1.0 / direction.z);

    let mut stack = Vec::with_capacity(64);
    stack.push(0u32);
    while let Some(index) = stack.pop() {
        let Some(node) = nodes.get(index as usize) else {
            continue;
        };
        if node.bounds().intersect(origin, inv_dir, t_min, t_max).is_none() {
            continue;
        }
        if node.is_leaf() {
            let first = node.first_primitive as usize;
            t_max = visit_leaf(first..first + node.primitive_count as usize, t_max);
            continue;
        }

        let near_first = match (nodes.get(node.left_child as usize), nodes.get(node.right_child as usize)) {
            (Some(l), Some(r)) => {
                let tl = l.bounds().intersect(origin, inv_dir, t_min, t_max);
                let tr = r.bounds().intersect(origin, inv_dir, t_min, t_max);
                !matches!((tl, tr), (Some(a), Some(b)) if b < a)
            }
            _ => true,
        };
        // Push the far child first so the near one is popped next.
        if near_first {
            stack.push(node.right_child);
            stack.push(node.left_child);
        } else {
            stack.push(node.left_child);
            stack.push(node.right_child);
        }
    }
}

fn padded(vec: Vec3) -> [f32; 4] {
    [vec.x, vec.y, vec.z, 0.0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box_at(x: f32) -> Aabb {
        Aabb {
            min: Vec3::new(x, 0.0, 0.0),
            max: Vec3::new(x + 1.0, 1.0, 1.0),
        }
    }

    #[test]
    fn small_input_is_a_single_leaf() {
        let bvh = build_bvh(&[unit_box_at(0.0), unit_box_at(2.0)]);
        assert_eq!(bvh.nodes.len(), 1);
        assert!(bvh.nodes[0].is_leaf());
        assert_eq!(bvh.nodes[0].primitive_count, 2);
        assert_eq!(bvh.nodes[0].bounds_max[0], 3.0);
    }

    #[test]
    fn large_input_splits_and_covers_every_primitive() {
        let boxes: Vec<Aabb> = (0..37).map(|i| unit_box_at(i as f32 * 2.0)).collect();
        let bvh = build_bvh(&boxes);
        assert!(bvh.nodes.len() > 1);
        assert!(bvh.nodes.len() <= max_node_count(boxes.len()));
        let mut seen = bvh.primitive_indices.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..37).collect::<Vec<u32>>());
    }

    #[test]
    fn build_is_deterministic() {
        let boxes: Vec<Aabb> = (0..50).map(|i| unit_box_at(((i * 7) % 13) as f32)).collect();
        let a = build_bvh(&boxes);
        let b = build_bvh(&boxes);
        assert_eq!(a.nodes, b.nodes);
        assert_eq!(a.primitive_indices, b.primitive_indices);
    }

    #[test]
    fn traversal_only_visits_overlapped_leaves() {
        let boxes: Vec<Aabb> = (0..20).map(|i| unit_box_at(i as f32 * 2.0)).collect();
        let bvh = build_bvh(&boxes);
        let mut visited = Vec::new();
        // A ray along +Y through x = 4.5 only crosses box 2.
        traverse(
            &bvh.nodes,
            Vec3::new(4.5, -1.0, 0.5),
            Vec3::Y,
            0.0,
            100.0,
            |range, t_max| {
                visited.extend(range.map(|i| bvh.primitive_indices[i]));
                t_max
            },
        );
        assert!(visited.contains(&2));
        assert!(visited.len() <= BVH_LEAF_SIZE);
    }

    #[test]
    fn slab_test_misses_box_behind_ray() {
        let b = unit_box_at(0.0);
        let dir = Vec3::X;
        let inv = Vec3::new(1.0 / dir.x, 1.0 / dir.y, 1.0 / dir.z);
        assert!(b.intersect(Vec3::new(-1.0, 0.5, 0.5), inv, 0.0, 10.0).is_some());
        assert!(b.intersect(Vec3::new(2.0, 0.5, 0.5), inv, 0.0, 10.0).is_none());
    }
}
