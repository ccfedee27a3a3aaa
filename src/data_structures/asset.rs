//! The result of a load: a scene graph plus what the pipeline learned on the way.

use std::fmt;

use crate::{
    data_structures::{bounds::Bounds, scene_graph::SceneNode},
    format::{AssetFormat, SidecarRole},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetKind {
    Mesh,
    PointCloud,
}

/// Layout chosen by the container heuristic for its binary section.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointLayout {
    Float64Triples,
    Float32Triples,
    ScaledInt32Triples,
}

impl fmt::Display for PointLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PointLayout::Float64Triples => "3 x f64 (24 bytes)",
            PointLayout::Float32Triples => "3 x f32 (12 bytes)",
            PointLayout::ScaledInt32Triples => "3 x scaled i32 (12 bytes)",
        })
    }
}

/// What the normalizer did to the root transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Normalization {
    /// Bounding-box center before centering.
    pub center: [f64; 3],
    /// Largest extent before scaling.
    pub max_dimension: f64,
    /// Uniform factor applied; `1.0` when the asset was left unscaled.
    pub scale: f64,
}

#[derive(Clone, Debug, Default)]
pub struct AssetMetadata {
    pub vertex_count: usize,
    pub triangle_count: usize,
    /// Points materialized into the scene graph.
    pub point_count: usize,
    /// Points the source claims to hold, before sampling.
    pub source_point_count: Option<u64>,
    /// Every `sample_stride`-th record was kept.
    pub sample_stride: Option<u64>,
    /// Bounds in source units, before centering and axis conversion.
    pub source_bounds: Option<Bounds>,
    /// Source coordinates look like longitude/latitude degrees.
    pub is_geographic: bool,
    pub normalization: Option<Normalization>,
    pub animations: Vec<String>,
    pub bone_count: usize,
    pub layout: Option<PointLayout>,
    /// Non-fatal problems, e.g. unresolved texture references.
    pub warnings: Vec<String>,
}

impl AssetMetadata {
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.warnings.push(message);
    }
}

/// A decoded, normalized asset.
///
/// Owned by the caller until it is replaced; replacing it in an
/// [`AssetSlot`](crate::loader::AssetSlot) disposes of it first.
pub struct DecodedAsset {
    pub kind: AssetKind,
    pub root: Box<dyn SceneNode>,
    pub format: AssetFormat,
    pub metadata: AssetMetadata,
}

impl fmt::Debug for DecodedAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedAsset")
            .field("kind", &self.kind)
            .field("root", &self.root.name())
            .field("format", &self.format)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// An auxiliary file supplied next to the primary one (MTL, textures, .bin buffers).
#[derive(Clone, Debug)]
pub struct SidecarFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub role: SidecarRole,
}

impl SidecarFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let role = SidecarRole::infer(&name);
        Self { name, bytes, role }
    }
}
