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

//! Raytracing pipeline descriptors: shader libraries, hit groups, the shader
//! configuration, the global root signature and shader identifiers.

use std::borrow::Cow;
use std::fmt;

/// Size in bytes of an opaque shader identifier.
pub const SHADER_IDENTIFIER_SIZE: usize = 32;

/// Every shader record stride must be a multiple of this.
pub const SHADER_RECORD_ALIGNMENT: u64 = 32;

/// Every shader table range must start on a multiple of this.
pub const SHADER_TABLE_ALIGNMENT: u64 = 64;

/// An opaque handle to a compiled raytracing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(pub usize);

/// An opaque handle to a root signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootSignatureId(pub usize);

/// A fixed-size opaque token naming one shader export or hit group of a pipeline.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderIdentifier(pub [u8; SHADER_IDENTIFIER_SIZE]);

impl ShaderIdentifier {
    /// The all-zero identifier. A record holding it invokes no shader.
    pub const NULL: Self = Self([0; SHADER_IDENTIFIER_SIZE]);

    /// Returns `true` for the all-zero identifier.
    pub fn is_null(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; SHADER_IDENTIFIER_SIZE] {
        &self.0
    }

    /// Reads an identifier from the first 32 bytes of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let head = bytes.get(..SHADER_IDENTIFIER_SIZE)?;
        let mut id = [0u8; SHADER_IDENTIFIER_SIZE];
        id.copy_from_slice(head);
        Some(Self(id))
    }
}

impl fmt::Debug for ShaderIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShaderIdentifier(")?;
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

/// A compiled shader library handed over by the shader toolchain.
#[derive(Debug, Clone)]
pub struct ShaderLibraryDesc<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// The opaque bytecode blob.
    pub bytecode: Cow<'a, [u8]>,
    /// Exports to take from the library. Empty means all of them.
    pub exports: Vec<Cow<'a, str>>,
}

/// The primitive type a hit group intersects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HitGroupType {
    /// Built-in triangle intersection.
    #[default]
    Triangles,
    /// Custom intersection shader.
    ProceduralPrimitive,
}

/// Bundles the shaders run when a ray hits geometry.
#[derive(Debug, Clone)]
pub struct HitGroupDesc<'a> {
    /// The export name of the hit group itself.
    pub name: Cow<'a, str>,
    /// The primitive type.
    pub ty: HitGroupType,
    /// The closest-hit export, if any.
    pub closest_hit: Option<Cow<'a, str>>,
    /// The any-hit export, if any.
    pub any_hit: Option<Cow<'a, str>>,
    /// The intersection export. Required for procedural hit groups.
    pub intersection: Option<Cow<'a, str>>,
}

impl HitGroupDesc<'_> {
    /// Iterates over every export this hit group imports.
    pub fn imports(&self) -> impl Iterator<Item = &str> {
        [&self.closest_hit, &self.any_hit, &self.intersection]
            .into_iter()
            .filter_map(|e| e.as_deref())
    }
}

/// Payload and attribute sizes shared by every shader of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderConfig {
    /// Largest ray payload in bytes.
    pub max_payload_size_in_bytes: u32,
    /// Largest hit attribute block in bytes.
    pub max_attribute_size_in_bytes: u32,
}

/// The kind of view a descriptor table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorRangeType {
    /// Shader resource views (`t` registers).
    Srv,
    /// Unordered access views (`u` registers).
    Uav,
    /// Constant buffer views (`b` registers).
    Cbv,
}

/// One parameter of a root signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootParameter {
    /// A table of views starting at `base_register`.
    DescriptorTable {
        /// The view kind.
        range_type: DescriptorRangeType,
        /// First shader register covered.
        base_register: u32,
        /// Number of registers covered.
        count: u32,
    },
    /// A root shader resource view bound by GPU address.
    ShaderResourceView {
        /// The `t` register.
        register: u32,
    },
    /// A root constant buffer view bound by GPU address.
    ConstantBufferView {
        /// The `b` register.
        register: u32,
    },
}

/// Describes a global root signature.
#[derive(Debug, Clone)]
pub struct RootSignatureDesc<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Parameters, in root index order.
    pub parameters: Vec<RootParameter>,
}

impl RootSignatureDesc<'_> {
    /// Returns the root index of the descriptor table covering `u{register}`.
    pub fn uav_table_index(&self, register: u32) -> Option<u32> {
        self.parameters.iter().position(|p| matches!(p,
            RootParameter::DescriptorTable { range_type: DescriptorRangeType::Uav, base_register, count }
                if (*base_register..base_register + count).contains(&register)
        )).map(|i| i as u32)
    }

    /// Returns the root index of the SRV bound at `t{register}`.
    pub fn srv_index(&self, register: u32) -> Option<u32> {
        self.parameters
            .iter()
            .position(|p| *p == RootParameter::ShaderResourceView { register })
            .map(|i| i as u32)
    }

    /// Returns the root index of the CBV bound at `b{register}`.
    pub fn cbv_index(&self, register: u32) -> Option<u32> {
        self.parameters
            .iter()
            .position(|p| *p == RootParameter::ConstantBufferView { register })
            .map(|i| i as u32)
    }
}

/// Everything needed to link a raytracing pipeline state object.
#[derive(Debug, Clone)]
pub struct RaytracingPipelineDesc<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Shader libraries to link.
    pub libraries: Vec<ShaderLibraryDesc<'a>>,
    /// Hit groups built from library exports.
    pub hit_groups: Vec<HitGroupDesc<'a>>,
    /// Payload and attribute sizes.
    pub shader_config: ShaderConfig,
    /// The global root signature shared by every shader.
    pub global_root_signature: RootSignatureId,
    /// Maximum `TraceRay` nesting depth.
    pub max_recursion_depth: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_root_signature() -> RootSignatureDesc<'static> {
        RootSignatureDesc {
            label: None,
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

    #[test]
    fn root_signature_register_lookup() {
        let rs = sample_root_signature();
        assert_eq!(rs.uav_table_index(0), Some(0));
        assert_eq!(rs.srv_index(0), Some(1));
        assert_eq!(rs.cbv_index(0), Some(2));
        assert_eq!(rs.cbv_index(1), None);
        assert_eq!(rs.uav_table_index(1), None);
    }

    #[test]
    fn null_identifier() {
        assert!(ShaderIdentifier::NULL.is_null());
        let mut bytes = [0u8; 40];
        bytes[5] = 1;
        let id = ShaderIdentifier::from_slice(&bytes).unwrap();
        assert!(!id.is_null());
        assert!(ShaderIdentifier::from_slice(&bytes[..31]).is_none());
    }

    #[test]
    fn hit_group_imports_skip_missing_stages() {
        let hg = HitGroupDesc {
            name: "HitGroup".into(),
            ty: HitGroupType::Triangles,
            closest_hit: Some("ClosestHit".into()),
            any_hit: None,
            intersection: None,
        };
        assert_eq!(hg.imports().collect::<Vec<_>>(), vec!["ClosestHit"]);
    }
}
