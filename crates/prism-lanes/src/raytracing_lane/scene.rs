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

//! The static scene of the triangle sample.

use super::acceleration::TriangleGeometry;
use prism_core::math::{LinearRgba, Vec3};
use prism_core::renderer::api::CameraConstants;

/// One triangle facing the camera, in world units.
pub const TRIANGLE_VERTICES: [[f32; 3]; 3] = [[0.0, 0.5, 0.0], [0.5, -0.5, 0.0], [-0.5, -0.5, 0.0]];

pub const CAMERA_EYE: Vec3 = Vec3::new(0.0, 0.0, -2.5);
pub const CAMERA_FOV_Y_DEGREES: f32 = 60.0;
pub const CAMERA_Z_NEAR: f32 = 0.1;
pub const CAMERA_Z_FAR: f32 = 1000.0;

pub fn triangle_geometry() -> TriangleGeometry {
    TriangleGeometry {
        vertices: TRIANGLE_VERTICES.to_vec(),
        indices: None,
    }
}

/// Camera looking at the origin down +Z.
pub fn camera_constants(aspect_ratio: f32) -> Option<CameraConstants> {
    CameraConstants::look_at(
        CAMERA_EYE,
        Vec3::ZERO,
        Vec3::Y,
        CAMERA_FOV_Y_DEGREES,
        aspect_ratio,
        CAMERA_Z_NEAR,
        CAMERA_Z_FAR,
    )
}

/// The miss record's local arguments: the background color as four floats.
pub fn background_arguments(color: LinearRgba) -> [u8; 16] {
    bytemuck::cast([color.r, color.g, color.b, color.a])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn background_round_trips_as_floats() {
        let bytes = background_arguments(LinearRgba::CORNFLOWER_BLUE);
        let floats: [f32; 4] = bytemuck::cast(bytes);
        assert_relative_eq!(floats[2], 0.929);
        assert_relative_eq!(floats[3], 1.0);
    }

    #[test]
    fn camera_is_invertible_for_the_sample_aspect() {
        assert!(camera_constants(800.0 / 600.0).is_some());
        assert_eq!(triangle_geometry().triangle_count(), 1);
    }
}
