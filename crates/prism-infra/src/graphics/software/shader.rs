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

//! The software shader ISA and linked pipeline objects.
//!
//! A shader library blob is a JSON document listing exports. Each export
//! names its stage and a small fixed-function program the tracer knows how
//! to run:
//!
//! ```json
//! {
//!   "format": "prism-software-isa",
//!   "version": 1,
//!   "exports": [
//!     { "name": "Miss", "stage": "miss", "payload_bytes": 16,
//!       "program": { "op": "solid_color", "color": [0.0, 0.0, 0.0, 1.0] } }
//!   ]
//! }
//! ```

use prism_core::renderer::api::{
    HitGroupType, RaytracingPipelineDesc, RootSignatureId, ShaderConfig, ShaderIdentifier,
    SHADER_IDENTIFIER_SIZE,
};
use prism_core::renderer::PipelineError;
use serde::Deserialize;
use std::collections::HashMap;

/// The `format` tag every library blob must carry.
pub const ISA_FORMAT: &str = "prism-software-isa";
/// The only supported ISA version.
pub const ISA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderStage {
    RayGeneration,
    Miss,
    ClosestHit,
    AnyHit,
    Intersection,
    Callable,
}

fn default_mask() -> u8 {
    0xFF
}

/// A program the software tracer can execute.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Program {
    /// Unprojects each pixel through the camera constants and traces one ray.
    PinholeCamera {
        /// `u` register of the output image.
        output: u32,
        /// `t` register of the top-level structure.
        scene: u32,
        /// `b` register of the camera constants.
        camera: u32,
        t_min: f32,
        t_max: f32,
        #[serde(default = "default_mask")]
        instance_mask: u8,
        #[serde(default)]
        ray_contribution: u32,
        #[serde(default)]
        geometry_multiplier: u32,
        #[serde(default)]
        miss_index: u32,
    },
    /// Writes a constant color into the payload.
    SolidColor { color: [f32; 4] },
    /// Writes the first 16 bytes of the shader record's inline arguments, read
    /// as four floats, into the payload.
    RecordColor,
    /// Writes `(1 - u - v, u, v, 1)` from the hit barycentrics.
    BarycentricColor,
}

impl Program {
    fn allowed_in(&self, stage: ShaderStage) -> bool {
        match self {
            Program::PinholeCamera { .. } => stage == ShaderStage::RayGeneration,
            Program::BarycentricColor => stage == ShaderStage::ClosestHit,
            Program::SolidColor { .. } | Program::RecordColor => {
                matches!(stage, ShaderStage::Miss | ShaderStage::ClosestHit | ShaderStage::Callable)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShaderExport {
    pub name: String,
    pub stage: ShaderStage,
    #[serde(default)]
    pub payload_bytes: u32,
    #[serde(default)]
    pub attribute_bytes: u32,
    /// `TraceRay` nesting this shader performs.
    #[serde(default)]
    pub trace_depth: u32,
    pub program: Program,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShaderLibrary {
    pub format: String,
    pub version: u32,
    pub exports: Vec<ShaderExport>,
}

/// Parses and checks a library blob.
pub fn parse_library(label: &str, bytecode: &[u8]) -> Result<ShaderLibrary, PipelineError> {
    let reject = |details: String| PipelineError::ShaderCompileFailure {
        label: label.to_string(),
        details,
    };

    let library: ShaderLibrary =
        serde_json::from_slice(bytecode).map_err(|e| reject(e.to_string()))?;
    if library.format != ISA_FORMAT {
        return Err(reject(format!("unknown format '{}'", library.format)));
    }
    if library.version != ISA_VERSION {
        return Err(reject(format!("unsupported ISA version {}", library.version)));
    }
    for export in &library.exports {
        if !export.program.allowed_in(export.stage) {
            return Err(reject(format!(
                "export '{}' runs {:?} in a {:?} shader",
                export.name, export.program, export.stage
            )));
        }
    }
    Ok(library)
}

/// What an identifier resolves to inside a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportKind {
    RayGeneration(Program),
    Miss(Program),
    Callable(Program),
    HitGroup {
        ty: HitGroupType,
        closest_hit: Option<Program>,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineExport {
    pub name: String,
    pub identifier: ShaderIdentifier,
    pub kind: ExportKind,
}

/// A linked pipeline state object.
#[derive(Debug)]
pub struct PipelineEntry {
    pub label: String,
    pub root_signature: RootSignatureId,
    pub shader_config: ShaderConfig,
    pub max_recursion_depth: u32,
    exports: Vec<PipelineExport>,
    by_name: HashMap<String, usize>,
    by_identifier: HashMap<ShaderIdentifier, usize>,
}

impl PipelineEntry {
    pub fn export(&self, name: &str) -> Option<&PipelineExport> {
        self.by_name.get(name).map(|&i| &self.exports[i])
    }

    pub fn resolve(&self, identifier: &ShaderIdentifier) -> Option<&PipelineExport> {
        self.by_identifier.get(identifier).map(|&i| &self.exports[i])
    }
}

/// FNV-1a, seeded so the four words of an identifier differ.
fn fnv1a(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64 ^ seed;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Derives a stable identifier from the pipeline serial, export index and name.
pub fn make_identifier(pipeline_serial: u64, export_index: usize, name: &str) -> ShaderIdentifier {
    let mut key = Vec::with_capacity(16 + name.len());
    key.extend_from_slice(&pipeline_serial.to_le_bytes());
    key.extend_from_slice(&(export_index as u64).to_le_bytes());
    key.extend_from_slice(name.as_bytes());

    let mut id = [0u8; SHADER_IDENTIFIER_SIZE];
    for (word, chunk) in id.chunks_exact_mut(8).enumerate() {
        chunk.copy_from_slice(&fnv1a(word as u64, &key).to_le_bytes());
    }
    if id.iter().all(|b| *b == 0) {
        id[0] = 1;
    }
    ShaderIdentifier(id)
}

/// Links a pipeline out of parsed libraries. Device limits are checked by the caller.
pub fn link_pipeline(
    serial: u64,
    desc: &RaytracingPipelineDesc,
    libraries: Vec<(String, ShaderLibrary)>,
) -> Result<PipelineEntry, PipelineError> {
    let label = desc.label.as_deref().unwrap_or("raytracing pipeline").to_string();

    // Collect the exports each library contributes.
    let mut shaders: HashMap<String, ShaderExport> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for ((lib_label, library), lib_desc) in libraries.into_iter().zip(&desc.libraries) {
        for export in library.exports {
            if !lib_desc.exports.is_empty() && !lib_desc.exports.iter().any(|e| **e == *export.name) {
                continue;
            }
            if shaders.contains_key(&export.name) {
                return Err(PipelineError::DuplicateExport(export.name));
            }
            log::trace!("Linking export '{}' from '{}'", export.name, lib_label);
            order.push(export.name.clone());
            shaders.insert(export.name.clone(), export);
        }
        for wanted in &lib_desc.exports {
            if !order.iter().any(|n| n.as_str() == &**wanted) {
                return Err(PipelineError::ShaderCompileFailure {
                    label: lib_label.clone(),
                    details: format!("library has no export named '{wanted}'"),
                });
            }
        }
    }

    let config = desc.shader_config;
    for export in shaders.values() {
        if export.payload_bytes > config.max_payload_size_in_bytes {
            return Err(PipelineError::ShaderConfigExceeded {
                what: "payload",
                requested: export.payload_bytes,
                limit: config.max_payload_size_in_bytes,
            });
        }
        if export.attribute_bytes > config.max_attribute_size_in_bytes {
            return Err(PipelineError::ShaderConfigExceeded {
                what: "attributes",
                requested: export.attribute_bytes,
                limit: config.max_attribute_size_in_bytes,
            });
        }
        if export.trace_depth > desc.max_recursion_depth {
            return Err(PipelineError::RecursionDepthExceeded {
                requested: export.trace_depth,
                limit: desc.max_recursion_depth,
            });
        }
    }

    let mut exports = Vec::new();
    let mut hit_group_members = Vec::new();
    for hit_group in &desc.hit_groups {
        for import in hit_group.imports() {
            if !shaders.contains_key(import) {
                return Err(PipelineError::MissingExport {
                    hit_group: hit_group.name.to_string(),
                    export: import.to_string(),
                });
            }
            hit_group_members.push(import.to_string());
        }
        if hit_group.ty == HitGroupType::ProceduralPrimitive && hit_group.intersection.is_none() {
            return Err(PipelineError::MissingExport {
                hit_group: hit_group.name.to_string(),
                export: "<intersection>".to_string(),
            });
        }
        if shaders.contains_key(&*hit_group.name) {
            return Err(PipelineError::DuplicateExport(hit_group.name.to_string()));
        }
        let closest_hit = hit_group
            .closest_hit
            .as_deref()
            .and_then(|name| shaders.get(name))
            .map(|s| s.program.clone());
        exports.push((
            hit_group.name.to_string(),
            ExportKind::HitGroup {
                ty: hit_group.ty,
                closest_hit,
            },
        ));
    }

    // Shaders that live inside hit groups are only reachable through them.
    let mut standalone = Vec::new();
    for name in &order {
        let shader = &shaders[name];
        let kind = match shader.stage {
            ShaderStage::RayGeneration => ExportKind::RayGeneration(shader.program.clone()),
            ShaderStage::Miss => ExportKind::Miss(shader.program.clone()),
            ShaderStage::Callable => ExportKind::Callable(shader.program.clone()),
            ShaderStage::ClosestHit | ShaderStage::AnyHit | ShaderStage::Intersection => {
                if !hit_group_members.contains(name) {
                    log::debug!("Export '{name}' of pipeline '{label}' is not used by any hit group");
                }
                continue;
            }
        };
        standalone.push((name.clone(), kind));
    }
    standalone.extend(exports);

    let mut entry = PipelineEntry {
        label,
        root_signature: desc.global_root_signature,
        shader_config: config,
        max_recursion_depth: desc.max_recursion_depth,
        exports: Vec::with_capacity(standalone.len()),
        by_name: HashMap::new(),
        by_identifier: HashMap::new(),
    };
    for (index, (name, kind)) in standalone.into_iter().enumerate() {
        let identifier = make_identifier(serial, index, &name);
        entry.by_name.insert(name.clone(), index);
        entry.by_identifier.insert(identifier, index);
        entry.exports.push(PipelineExport {
            name,
            identifier,
            kind,
        });
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::renderer::api::{HitGroupDesc, ShaderLibraryDesc};

    const LIBRARY: &str = r#"{
        "format": "prism-software-isa",
        "version": 1,
        "exports": [
            { "name": "RayGen", "stage": "ray_generation", "payload_bytes": 16, "trace_depth": 1,
              "program": { "op": "pinhole_camera", "output": 0, "scene": 0, "camera": 0,
                           "t_min": 0.001, "t_max": 10000.0 } },
            { "name": "Miss", "stage": "miss", "payload_bytes": 16,
              "program": { "op": "solid_color", "color": [0.0, 0.0, 1.0, 1.0] } },
            { "name": "ClosestHit", "stage": "closest_hit", "payload_bytes": 16, "attribute_bytes": 8,
              "program": { "op": "barycentric_color" } }
        ]
    }"#;

    fn desc<'a>(hit_group_import: &'a str, recursion: u32) -> RaytracingPipelineDesc<'a> {
        RaytracingPipelineDesc {
            label: Some("test".into()),
            libraries: vec![ShaderLibraryDesc {
                label: Some("lib".into()),
                bytecode: LIBRARY.as_bytes().into(),
                exports: vec![],
            }],
            hit_groups: vec![HitGroupDesc {
                name: "HitGroup".into(),
                ty: HitGroupType::Triangles,
                closest_hit: Some(hit_group_import.into()),
                any_hit: None,
                intersection: None,
            }],
            shader_config: ShaderConfig {
                max_payload_size_in_bytes: 16,
                max_attribute_size_in_bytes: 8,
            },
            global_root_signature: RootSignatureId(0),
            max_recursion_depth: recursion,
        }
    }

    fn link(desc: &RaytracingPipelineDesc) -> Result<PipelineEntry, PipelineError> {
        let lib = parse_library("lib", LIBRARY.as_bytes())?;
        link_pipeline(1, desc, vec![("lib".to_string(), lib)])
    }

    #[test]
    fn links_sample_library() {
        let entry = link(&desc("ClosestHit", 1)).unwrap();
        for name in ["RayGen", "Miss", "HitGroup"] {
            let export = entry.export(name).unwrap();
            assert!(!export.identifier.is_null());
            assert_eq!(entry.resolve(&export.identifier).unwrap().name, name);
        }
        assert!(entry.export("ClosestHit").is_none());
        assert!(matches!(
            entry.export("HitGroup").unwrap().kind,
            ExportKind::HitGroup { closest_hit: Some(Program::BarycentricColor), .. }
        ));
    }

    #[test]
    fn identifiers_are_stable_and_distinct() {
        let a = make_identifier(3, 0, "RayGen");
        assert_eq!(a, make_identifier(3, 0, "RayGen"));
        assert_ne!(a, make_identifier(3, 1, "RayGen"));
        assert_ne!(a, make_identifier(4, 0, "RayGen"));
    }

    #[test]
    fn unknown_hit_group_import_is_missing_export() {
        let err = link(&desc("ClosestHit2", 1)).unwrap_err();
        assert_eq!(
            err,
            PipelineError::MissingExport {
                hit_group: "HitGroup".into(),
                export: "ClosestHit2".into()
            }
        );
    }

    #[test]
    fn trace_depth_beyond_pipeline_recursion_is_rejected() {
        let err = link(&desc("ClosestHit", 0)).unwrap_err();
        assert!(matches!(err, PipelineError::RecursionDepthExceeded { requested: 1, limit: 0 }));
    }

    #[test]
    fn malformed_blob_is_a_compile_failure() {
        let err = parse_library("broken", b"DXBC\x00\x01").unwrap_err();
        assert!(matches!(err, PipelineError::ShaderCompileFailure { .. }));

        let wrong_stage = r#"{ "format": "prism-software-isa", "version": 1, "exports": [
            { "name": "Miss", "stage": "miss", "program": { "op": "barycentric_color" } } ] }"#;
        assert!(parse_library("lib", wrong_stage.as_bytes()).is_err());
    }
}
