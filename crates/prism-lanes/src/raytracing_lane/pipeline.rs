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

//! The global root signature and the raytracing pipeline state object.

use prism_core::renderer::api::*;
use prism_core::renderer::{GpuError, GraphicsDevice};

pub const RAY_GEN_EXPORT: &str = "RayGen";
pub const MISS_EXPORT: &str = "Miss";
pub const CLOSEST_HIT_EXPORT: &str = "ClosestHit";
pub const HIT_GROUP_EXPORT: &str = "HitGroup";

/// Root parameter index of the output UAV table (`u0`).
pub const OUTPUT_TABLE_PARAMETER: u32 = 0;
/// Root parameter index of the scene SRV (`t0`).
pub const SCENE_SRV_PARAMETER: u32 = 1;
/// Root parameter index of the camera CBV (`b0`).
pub const CAMERA_CBV_PARAMETER: u32 = 2;

/// How the pipeline is linked.
#[derive(Debug, Clone)]
pub struct PipelineConfig<'a> {
    /// The compiled shader library exporting the ray-generation, miss and closest-hit shaders.
    pub library: &'a [u8],
    pub max_payload_size_in_bytes: u32,
    pub max_attribute_size_in_bytes: u32,
    pub max_recursion_depth: u32,
}

impl<'a> PipelineConfig<'a> {
    /// The triangle sample: a color payload, barycentric attributes, primary rays only.
    pub fn hello_triangle(library: &'a [u8], max_recursion_depth: u32) -> Self {
        Self {
            library,
            max_payload_size_in_bytes: 16,
            max_attribute_size_in_bytes: 8,
            max_recursion_depth,
        }
    }
}

/// The layout every shader of the pipeline shares.
pub fn global_root_signature() -> RootSignatureDesc<'static> {
    RootSignatureDesc {
        label: Some("global root signature".into()),
        parameters: vec![
            RootParameter::DescriptorTable {
                range_type: DescriptorRangeType::Uav,
                base_register: 0,
                count: 1,
            },
            RootParameter::ShaderResourceView { register: 0 },
            RootParameter::ConstantBufferView { register: 0 },
        ],
    }
}

/// A linked pipeline and its root signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaytracingPipeline {
    pub root_signature: RootSignatureId,
    pub pipeline: PipelineId,
}

impl RaytracingPipeline {
    pub fn create(device: &dyn GraphicsDevice, config: &PipelineConfig) -> Result<Self, GpuError> {
        let root_signature = device.create_root_signature(&global_root_signature())?;

        let desc = RaytracingPipelineDesc {
            label: Some("raytracing pipeline".into()),
            libraries: vec![ShaderLibraryDesc {
                label: Some("raytracing shaders".into()),
                bytecode: config.library.into(),
                exports: vec![
                    RAY_GEN_EXPORT.into(),
                    MISS_EXPORT.into(),
                    CLOSEST_HIT_EXPORT.into(),
                ],
            }],
            hit_groups: vec![HitGroupDesc {
                name: HIT_GROUP_EXPORT.into(),
                ty: HitGroupType::Triangles,
                closest_hit: Some(CLOSEST_HIT_EXPORT.into()),
                any_hit: None,
                intersection: None,
            }],
            shader_config: ShaderConfig {
                max_payload_size_in_bytes: config.max_payload_size_in_bytes,
                max_attribute_size_in_bytes: config.max_attribute_size_in_bytes,
            },
            global_root_signature: root_signature,
            max_recursion_depth: config.max_recursion_depth,
        };
        let pipeline = match device.create_raytracing_pipeline(&desc) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                if let Err(release) = device.destroy_root_signature(root_signature) {
                    log::warn!("Failed to release root signature after pipeline failure: {release}");
                }
                return Err(e);
            }
        };

        log::info!(
            "Created raytracing pipeline {:?} (payload {} B, attributes {} B, recursion {})",
            pipeline,
            config.max_payload_size_in_bytes,
            config.max_attribute_size_in_bytes,
            config.max_recursion_depth
        );
        Ok(Self {
            root_signature,
            pipeline,
        })
    }

    pub fn shader_identifier(
        &self,
        device: &dyn GraphicsDevice,
        export: &str,
    ) -> Result<ShaderIdentifier, GpuError> {
        device.shader_identifier(self.pipeline, export)
    }

    pub fn release(self, device: &dyn GraphicsDevice) -> Result<(), GpuError> {
        device.destroy_pipeline(self.pipeline)?;
        device.destroy_root_signature(self.root_signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_parameters_follow_register_layout() {
        let signature = global_root_signature();
        assert_eq!(signature.uav_table_index(0), Some(OUTPUT_TABLE_PARAMETER));
        assert_eq!(signature.srv_index(0), Some(SCENE_SRV_PARAMETER));
        assert_eq!(signature.cbv_index(0), Some(CAMERA_CBV_PARAMETER));
    }
}
