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

//! Defines the `LinearRgba` color type written by raytracing shaders.

use super::saturate;
use serde::{Deserialize, Serialize};

/// A color in linear RGBA space using `f32` components.
///
/// Shaders produce colors in this form; the output texture stores them as
/// `Rgba8Unorm` through [`LinearRgba::to_rgba8`].
#[derive(
    Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable, Serialize, Deserialize,
)]
#[repr(C)]
pub struct LinearRgba {
    /// The red component.
    pub r: f32,
    /// The green component.
    pub g: f32,
    /// The blue component.
    pub b: f32,
    /// The alpha component.
    pub a: f32,
}

impl LinearRgba {
    /// Opaque black.
    pub const BLACK: Self = Self::rgb(0.0, 0.0, 0.0);
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);
    /// The classic "cornflower blue" clear color used as the miss color of the sample.
    pub const CORNFLOWER_BLUE: Self = Self::rgb(0.392, 0.584, 0.929);

    /// Creates a new `LinearRgba` with explicit RGBA values.
    #[inline]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Creates a new opaque `LinearRgba` (alpha = 1.0).
    #[inline]
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Converts to four normalized bytes, clamping each channel to `[0, 1]`
    /// and rounding to the nearest representable value.
    #[inline]
    pub fn to_rgba8(self) -> [u8; 4] {
        #[inline]
        fn unorm8(c: f32) -> u8 {
            if c.is_nan() {
                return 0;
            }
            (saturate(c) * 255.0 + 0.5) as u8
        }
        [unorm8(self.r), unorm8(self.g), unorm8(self.b), unorm8(self.a)]
    }
}

impl Default for LinearRgba {
    fn default() -> Self {
        Self::BLACK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_rgba8_clamps_and_rounds() {
        assert_eq!(LinearRgba::new(1.5, -0.2, 0.5, 1.0).to_rgba8(), [255, 0, 128, 255]);
        assert_eq!(LinearRgba::CORNFLOWER_BLUE.to_rgba8(), [100, 149, 237, 255]);
    }

    #[test]
    fn nan_channels_become_zero() {
        assert_eq!(LinearRgba::new(f32::NAN, 0.0, 0.0, 1.0).to_rgba8()[0], 0);
    }
}
