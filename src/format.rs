//! Format detection from file names and URLs.
//!
//! Detection is a pure function of the name: no bytes are inspected and no
//! I/O happens. URLs may carry a `?query` (signed URLs) and a synthetic
//! `#name.ext` fragment that only exists to hint the extension of resources
//! whose path is meaningless (blob handles, object-store ids).

use std::fmt;

/// Canonical tag for every format the pipeline can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetFormat {
    /// glTF with a JSON document (`.gltf`).
    MeshInterchangeJson,
    /// Binary glTF container (`.glb`).
    MeshInterchangeBinary,
    /// Wavefront OBJ with optional MTL and textures.
    TextMesh,
    /// Binary FBX with embedded skeleton and animation stacks.
    AnimatedMesh,
    /// Stanford PLY, points or indexed faces.
    PointCloudGeneric,
    /// ASPRS LAS survey point cloud.
    PointCloudSurvey,
    /// ASTM E57 container.
    PointCloudContainer,
}

impl AssetFormat {
    pub const ALL: [AssetFormat; 7] = [
        AssetFormat::MeshInterchangeJson,
        AssetFormat::MeshInterchangeBinary,
        AssetFormat::TextMesh,
        AssetFormat::AnimatedMesh,
        AssetFormat::PointCloudGeneric,
        AssetFormat::PointCloudSurvey,
        AssetFormat::PointCloudContainer,
    ];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "gltf" => Some(Self::MeshInterchangeJson),
            "glb" => Some(Self::MeshInterchangeBinary),
            "obj" => Some(Self::TextMesh),
            "fbx" => Some(Self::AnimatedMesh),
            "ply" => Some(Self::PointCloudGeneric),
            "las" | "laz" => Some(Self::PointCloudSurvey),
            "e57" => Some(Self::PointCloudContainer),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::MeshInterchangeJson => "gltf",
            Self::MeshInterchangeBinary => "glb",
            Self::TextMesh => "obj",
            Self::AnimatedMesh => "fbx",
            Self::PointCloudGeneric => "ply",
            Self::PointCloudSurvey => "las",
            Self::PointCloudContainer => "e57",
        }
    }
}

impl fmt::Display for AssetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MeshInterchangeJson => "glTF",
            Self::MeshInterchangeBinary => "GLB",
            Self::TextMesh => "OBJ",
            Self::AnimatedMesh => "FBX",
            Self::PointCloudGeneric => "PLY",
            Self::PointCloudSurvey => "LAS",
            Self::PointCloudContainer => "E57",
        };
        f.write_str(name)
    }
}

/// Conversion job of the external conversion service that makes an
/// undecodable upload loadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionTarget {
    /// E57 scans whose binary sections cannot be recovered in place.
    E57ToPly,
}

impl ConversionTarget {
    /// Job name understood by the conversion service.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E57ToPly => "e57_to_ply",
        }
    }
}

impl fmt::Display for ConversionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infers the format of a file name or URL.
///
/// ```
/// use flow_spatial::format::{detect, AssetFormat};
/// assert_eq!(detect("Model.OBJ"), Some(AssetFormat::TextMesh));
/// assert_eq!(detect("https://x/y.glb?token=abc"), Some(AssetFormat::MeshInterchangeBinary));
/// assert_eq!(detect("blob://abc#file.ply"), Some(AssetFormat::PointCloudGeneric));
/// ```
pub fn detect(input: &str) -> Option<AssetFormat> {
    extension_of(input).and_then(|ext| AssetFormat::from_extension(&ext))
}

/// Isolates the lower-cased extension used for detection.
///
/// A fragment hint wins over the path when it carries an extension.
pub fn extension_of(input: &str) -> Option<String> {
    let (before_fragment, fragment) = match input.split_once('#') {
        Some((before, fragment)) => (before, Some(fragment)),
        None => (input, None),
    };
    if let Some(ext) = fragment.and_then(|f| last_extension(strip_query(f))) {
        return Some(ext);
    }
    last_extension(strip_query(before_fragment))
}

/// Removes the `#name.ext` hint so it is never sent over the network.
pub fn strip_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(before, _)| before)
}

fn strip_query(input: &str) -> &str {
    input.split_once('?').map_or(input, |(before, _)| before)
}

fn last_extension(path: &str) -> Option<String> {
    let segment = path.rsplit(['/', '\\']).next()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Final path segment of a name or URL (no query, no fragment).
pub fn file_name_of(input: &str) -> &str {
    let path = strip_query(strip_fragment(input));
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// What a sidecar file contributes to a text-mesh load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SidecarRole {
    Material,
    Texture,
    Other,
}

impl SidecarRole {
    pub fn infer(name: &str) -> Self {
        match extension_of(name).as_deref() {
            Some("mtl") => Self::Material,
            Some(
                "png" | "jpg" | "jpeg" | "bmp" | "tga" | "gif" | "webp" | "tif" | "tiff" | "ico"
                | "hdr" | "exr" | "qoi",
            ) => Self::Texture,
            _ => Self::Other,
        }
    }
}
