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

//! Defines the `Mat4` camera matrix and the row-major `Transform3x4` used by
//! acceleration-structure instances.

use super::{Vec3, Vec4, EPSILON};
use std::ops::Mul;

// --- Mat4 ---

/// A 4x4 column-major matrix.
///
/// The raytracing core only needs it for camera work: building the view and
/// projection of the sample camera and inverting them so ray generation can
/// unproject pixel coordinates. Vectors are treated as columns (`M * v`).
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Mat4 {
    /// The columns of the matrix. `cols[0]` is the first column, and so on.
    pub cols: [Vec4; 4],
}

impl Mat4 {
    /// The 4x4 identity matrix.
    pub const IDENTITY: Self = Self {
        cols: [
            Vec4::new(1.0, 0.0, 0.0, 0.0),
            Vec4::new(0.0, 1.0, 0.0, 0.0),
            Vec4::new(0.0, 0.0, 1.0, 0.0),
            Vec4::new(0.0, 0.0, 0.0, 1.0),
        ],
    };

    /// Creates a new matrix from four column vectors.
    #[inline]
    pub fn from_cols(c0: Vec4, c1: Vec4, c2: Vec4, c3: Vec4) -> Self {
        Self {
            cols: [c0, c1, c2, c3],
        }
    }

    /// Returns a row of the matrix as a `Vec4`.
    #[inline]
    pub fn row(&self, index: usize) -> Vec4 {
        Vec4::new(
            self.cols[0].get(index),
            self.cols[1].get(index),
            self.cols[2].get(index),
            self.cols[3].get(index),
        )
    }

    /// Creates a translation matrix.
    #[inline]
    pub fn from_translation(v: Vec3) -> Self {
        let mut m = Self::IDENTITY;
        m.cols[3] = v.extend(1.0);
        m
    }

    /// Creates a left-handed view matrix for a camera at `eye` looking at `target`.
    ///
    /// The camera looks down its local +Z axis.
    ///
    /// # Returns
    ///
    /// `None` if `eye` and `target` coincide or `up` is parallel to the view direction.
    pub fn look_at_lh(eye: Vec3, target: Vec3, up: Vec3) -> Option<Self> {
        let forward = target - eye;
        if forward.length_squared() < EPSILON * EPSILON {
            return None;
        }
        let z_axis = forward.normalize();
        let x_axis = up.cross(z_axis);
        if x_axis.length_squared() < EPSILON * EPSILON {
            return None;
        }
        let x_axis = x_axis.normalize();
        let y_axis = z_axis.cross(x_axis);

        Some(Self::from_cols(
            Vec4::new(x_axis.x, y_axis.x, z_axis.x, 0.0),
            Vec4::new(x_axis.y, y_axis.y, z_axis.y, 0.0),
            Vec4::new(x_axis.z, y_axis.z, z_axis.z, 0.0),
            Vec4::new(-x_axis.dot(eye), -y_axis.dot(eye), -z_axis.dot(eye), 1.0),
        ))
    }

    /// Creates a left-handed perspective projection with a [0, 1] depth range.
    ///
    /// # Arguments
    ///
    /// * `fov_y_radians`: Vertical field of view in radians.
    /// * `aspect_ratio`: Width divided by height of the viewport.
    /// * `z_near`: Distance to the near clipping plane (must be positive).
    /// * `z_far`: Distance to the far clipping plane (must be greater than `z_near`).
    pub fn perspective_lh_zo(fov_y_radians: f32, aspect_ratio: f32, z_near: f32, z_far: f32) -> Self {
        let h = 1.0 / (fov_y_radians * 0.5).tan();
        let w = h / aspect_ratio;
        let range = z_far / (z_far - z_near);

        Self::from_cols(
            Vec4::new(w, 0.0, 0.0, 0.0),
            Vec4::new(0.0, h, 0.0, 0.0),
            Vec4::new(0.0, 0.0, range, 1.0),
            Vec4::new(0.0, 0.0, -range * z_near, 0.0),
        )
    }

    /// Returns the transpose of the matrix.
    pub fn transpose(&self) -> Self {
        Self::from_cols(self.row(0), self.row(1), self.row(2), self.row(3))
    }

    /// Computes the inverse with Gauss-Jordan elimination and partial pivoting.
    /// Returns `None` if the matrix is singular.
    pub fn inverse(&self) -> Option<Self> {
        // Work on rows of [M | I].
        let mut m = [[0.0f32; 4]; 4];
        let mut inv = [[0.0f32; 4]; 4];
        for (r, row) in m.iter_mut().enumerate() {
            *row = self.row(r).to_array();
            inv[r][r] = 1.0;
        }

        for col in 0..4 {
            let pivot = (col..4)
                .max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))
                .unwrap_or(col);
            if m[pivot][col].abs() < EPSILON * EPSILON {
                return None;
            }
            m.swap(col, pivot);
            inv.swap(col, pivot);

            let scale = 1.0 / m[col][col];
            for k in 0..4 {
                m[col][k] *= scale;
                inv[col][k] *= scale;
            }

            for r in 0..4 {
                if r == col {
                    continue;
                }
                let factor = m[r][col];
                if factor == 0.0 {
                    continue;
                }
                for k in 0..4 {
                    m[r][k] -= factor * m[col][k];
                    inv[r][k] -= factor * inv[col][k];
                }
            }
        }

        let rows = inv.map(|r| Vec4::new(r[0], r[1], r[2], r[3]));
        Some(Self::from_cols(rows[0], rows[1], rows[2], rows[3]).transpose())
    }
}

impl Default for Mat4 {
    /// Returns the 4x4 identity matrix.
    #[inline]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul<Mat4> for Mat4 {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Mat4) -> Self::Output {
        Self::from_cols(
            self * rhs.cols[0],
            self * rhs.cols[1],
            self * rhs.cols[2],
            self * rhs.cols[3],
        )
    }
}

impl Mul<Vec4> for Mat4 {
    type Output = Vec4;
    /// Transforms a `Vec4` by this matrix.
    #[inline]
    fn mul(self, rhs: Vec4) -> Self::Output {
        self.cols[0] * rhs.x + self.cols[1] * rhs.y + self.cols[2] * rhs.z + self.cols[3] * rhs.w
    }
}

// --- Transform3x4 ---

/// A 3x4 row-major affine transform, the layout GPU instance descriptors use.
///
/// Row `i` holds `[m_i0, m_i1, m_i2, t_i]`; the implicit fourth row is `[0, 0, 0, 1]`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    bytemuck::Pod,
    bytemuck::Zeroable,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(C)]
pub struct Transform3x4 {
    /// The three stored rows.
    pub rows: [[f32; 4]; 3],
}

impl Transform3x4 {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        rows: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
    };

    /// Creates a pure translation.
    pub fn from_translation(t: Vec3) -> Self {
        let mut out = Self::IDENTITY;
        out.rows[0][3] = t.x;
        out.rows[1][3] = t.y;
        out.rows[2][3] = t.z;
        out
    }

    /// Creates a rotation of `angle` radians around the Y axis.
    pub fn from_rotation_y(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self {
            rows: [[c, 0.0, s, 0.0], [0.0, 1.0, 0.0, 0.0], [-s, 0.0, c, 0.0]],
        }
    }

    /// Extracts the affine part of a column-major `Mat4`.
    pub fn from_mat4(m: &Mat4) -> Self {
        Self {
            rows: [m.row(0).to_array(), m.row(1).to_array(), m.row(2).to_array()],
        }
    }

    /// Expands back into a column-major `Mat4`.
    fn to_mat4(&self) -> Mat4 {
        let [r0, r1, r2] = self.rows;
        Mat4::from_cols(
            Vec4::new(r0[0], r1[0], r2[0], 0.0),
            Vec4::new(r0[1], r1[1], r2[1], 0.0),
            Vec4::new(r0[2], r1[2], r2[2], 0.0),
            Vec4::new(r0[3], r1[3], r2[3], 1.0),
        )
    }

    /// Applies the full affine transform to a point.
    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let [r0, r1, r2] = self.rows;
        Vec3::new(
            r0[0] * p.x + r0[1] * p.y + r0[2] * p.z + r0[3],
            r1[0] * p.x + r1[1] * p.y + r1[2] * p.z + r1[3],
            r2[0] * p.x + r2[1] * p.y + r2[2] * p.z + r2[3],
        )
    }

    /// Applies only the linear part to a direction.
    #[inline]
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        let [r0, r1, r2] = self.rows;
        Vec3::new(
            r0[0] * v.x + r0[1] * v.y + r0[2] * v.z,
            r1[0] * v.x + r1[1] * v.y + r1[2] * v.z,
            r2[0] * v.x + r2[1] * v.y + r2[2] * v.z,
        )
    }

    /// Inverts the transform. Returns `None` if the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        self.to_mat4().inverse().map(|m| Self::from_mat4(&m))
    }

    /// Returns `true` if every stored component is finite.
    pub fn is_finite(&self) -> bool {
        self.rows.iter().flatten().all(|v| v.is_finite())
    }
}

impl Default for Transform3x4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{degrees_to_radians, Vec3};
    use approx::assert_relative_eq;

    fn assert_vec4_eq(a: Vec4, b: Vec4) {
        assert_relative_eq!(a.x, b.x, epsilon = 1e-4);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-4);
        assert_relative_eq!(a.z, b.z, epsilon = 1e-4);
        assert_relative_eq!(a.w, b.w, epsilon = 1e-4);
    }

    #[test]
    fn look_at_lh_maps_eye_to_origin_and_target_to_positive_z() {
        let eye = Vec3::new(0.0, 0.0, -2.5);
        let view = Mat4::look_at_lh(eye, Vec3::ZERO, Vec3::Y).unwrap();
        assert_vec4_eq(view * eye.extend(1.0), Vec4::new(0.0, 0.0, 0.0, 1.0));
        assert_vec4_eq(view * Vec3::ZERO.extend(1.0), Vec4::new(0.0, 0.0, 2.5, 1.0));
    }

    #[test]
    fn look_at_rejects_degenerate_input() {
        assert!(Mat4::look_at_lh(Vec3::ZERO, Vec3::ZERO, Vec3::Y).is_none());
        assert!(Mat4::look_at_lh(Vec3::ZERO, Vec3::Y, Vec3::Y).is_none());
    }

    #[test]
    fn perspective_maps_near_and_far_to_unit_depth() {
        let proj = Mat4::perspective_lh_zo(degrees_to_radians(60.0), 4.0 / 3.0, 0.1, 1000.0);
        let near = proj * Vec3::new(0.0, 0.0, 0.1).extend(1.0);
        let far = proj * Vec3::new(0.0, 0.0, 1000.0).extend(1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn inverse_round_trips_camera_matrices() {
        let view =
            Mat4::look_at_lh(Vec3::new(1.0, 2.0, -3.0), Vec3::ZERO, Vec3::Y).unwrap();
        let proj = Mat4::perspective_lh_zo(degrees_to_radians(60.0), 800.0 / 600.0, 0.1, 1000.0);
        for m in [view, proj, proj * view] {
            let product = m * m.inverse().unwrap();
            for c in 0..4 {
                assert_vec4_eq(product.cols[c], Mat4::IDENTITY.cols[c]);
            }
        }
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        let mut m = Mat4::IDENTITY;
        m.cols[1] = m.cols[0];
        assert!(m.inverse().is_none());
    }

    #[test]
    fn transform3x4_round_trips_through_mat4() {
        let t = Transform3x4::from_translation(Vec3::new(1.0, -2.0, 3.0));
        assert_eq!(Transform3x4::from_mat4(&t.to_mat4()), t);
        assert_eq!(t.transform_point(Vec3::ZERO), Vec3::new(1.0, -2.0, 3.0));
        assert_eq!(t.transform_vector(Vec3::X), Vec3::X);

        let back = t.inverse().unwrap().transform_point(Vec3::new(1.0, -2.0, 3.0));
        assert_relative_eq!(back.length(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn transform3x4_is_48_bytes() {
        assert_eq!(std::mem::size_of::<Transform3x4>(), 48);
    }
}
