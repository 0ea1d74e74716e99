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

//! Settings for the raytracing sample.

use crate::math::LinearRgba;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration consumed by the raytracing renderer.
///
/// Defaults reproduce the classic triangle sample: an 800x600 output, a
/// double-buffered swapchain presented with vsync and a single level of
/// `TraceRay` recursion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaytracingSettings {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Number of swapchain back buffers.
    pub back_buffer_count: u32,
    /// Present sync interval (0 = immediate, 1 = vsync).
    pub sync_interval: u32,
    /// Upper bound on any single CPU wait for the GPU, in milliseconds.
    pub fence_timeout_ms: u64,
    /// Maximum `TraceRay` recursion depth requested from the pipeline.
    pub max_recursion_depth: u32,
    /// Color written by the miss shader.
    pub background: LinearRgba,
}

impl Default for RaytracingSettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            back_buffer_count: 2,
            sync_interval: 1,
            fence_timeout_ms: 5_000,
            max_recursion_depth: 1,
            background: LinearRgba::CORNFLOWER_BLUE,
        }
    }
}

/// Errors produced while loading settings from disk.
#[derive(Debug)]
pub enum SettingsError {
    /// The file could not be read.
    Io(std::io::Error),
    /// The file is not valid settings JSON.
    Parse(serde_json::Error),
    /// A field holds a value the renderer cannot use.
    Invalid(String),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "Failed to read settings: {e}"),
            SettingsError::Parse(e) => write!(f, "Failed to parse settings: {e}"),
            SettingsError::Invalid(msg) => write!(f, "Invalid settings: {msg}"),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Io(e) => Some(e),
            SettingsError::Parse(e) => Some(e),
            SettingsError::Invalid(_) => None,
        }
    }
}

impl RaytracingSettings {
    /// Parses settings from a JSON string. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json).map_err(SettingsError::Parse)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(SettingsError::Io)?;
        let settings = Self::from_json(&text)?;
        log::debug!("Loaded raytracing settings from {}: {settings:?}", path.display());
        Ok(settings)
    }

    /// Checks that every field is usable.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.width == 0 || self.height == 0 {
            return Err(SettingsError::Invalid(format!(
                "output size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.back_buffer_count < 2 {
            return Err(SettingsError::Invalid(format!(
                "at least 2 back buffers are required, got {}",
                self.back_buffer_count
            )));
        }
        if self.max_recursion_depth == 0 {
            return Err(SettingsError::Invalid(
                "max_recursion_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The fence timeout as a `Duration`.
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_triangle_sample() {
        let s = RaytracingSettings::default();
        assert_eq!((s.width, s.height), (800, 600));
        assert_eq!(s.back_buffer_count, 2);
        assert_eq!(s.max_recursion_depth, 1);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s = RaytracingSettings::from_json(r#"{ "width": 320, "height": 240 }"#).unwrap();
        assert_eq!((s.width, s.height), (320, 240));
        assert_eq!(s.sync_interval, 1);
        assert_eq!(s.background, LinearRgba::CORNFLOWER_BLUE);
    }

    #[test]
    fn zero_size_is_rejected() {
        let err = RaytracingSettings::from_json(r#"{ "width": 0 }"#).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = RaytracingSettings::from_json("{ width: }").unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }
}
