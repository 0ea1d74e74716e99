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

//! The constant buffer read by the sample's ray-generation shader.

use crate::math::{degrees_to_radians, Mat4, Vec3};

/// Size of a constant buffer view must be a multiple of this.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Inverse camera matrices, padded to one 256-byte constant buffer.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct CameraConstants {
    /// Inverse of the view matrix (view space to world space).
    pub view_inverse: Mat4,
    /// Inverse of the projection matrix (clip space to view space).
    pub proj_inverse: Mat4,
    _padding: [f32; 32],
}

impl CameraConstants {
    /// Builds the constants for a left-handed camera at `eye` looking at `target`.
    ///
    /// Returns `None` if the view or projection cannot be inverted.
    pub fn look_at(
        eye: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y_degrees: f32,
        aspect_ratio: f32,
        z_near: f32,
        z_far: f32,
    ) -> Option<Self> {
        let view = Mat4::look_at_lh(eye, target, up)?;
        let proj =
            Mat4::perspective_lh_zo(degrees_to_radians(fov_y_degrees), aspect_ratio, z_near, z_far);
        Some(Self::from_inverses(view.inverse()?, proj.inverse()?))
    }

    /// Wraps already inverted matrices.
    pub fn from_inverses(view_inverse: Mat4, proj_inverse: Mat4) -> Self {
        Self {
            view_inverse,
            proj_inverse,
            _padding: [0.0; 32],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fills_one_constant_buffer() {
        assert_eq!(std::mem::size_of::<CameraConstants>() as u64, CONSTANT_BUFFER_ALIGNMENT);
    }

    #[test]
    fn view_inverse_places_origin_at_eye() {
        let eye = Vec3::new(0.0, 0.0, -2.5);
        let c = CameraConstants::look_at(eye, Vec3::ZERO, Vec3::Y, 60.0, 800.0 / 600.0, 0.1, 1000.0)
            .unwrap();
        let origin = c.view_inverse * crate::math::Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(origin.z, -2.5, epsilon = 1e-5);
        assert_relative_eq!(origin.x, 0.0, epsilon = 1e-5);
    }
}
