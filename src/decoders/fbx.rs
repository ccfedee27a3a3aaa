//! Binary FBX meshes with skeleton and animation stacks.
//!
//! The node-record tree is walked completely; geometry is taken from
//! `Objects/Geometry` (`Vertices`, `PolygonVertexIndex`). Bones and animation
//! stacks are only counted and named, skinning is not evaluated.

use std::io::Read;

use futures::future::BoxFuture;

use crate::{
    cancellation::CancellationToken,
    config::LoaderConfig,
    data_structures::{
        asset::{AssetKind, AssetMetadata, DecodedAsset},
        geometry::Geometry,
        instance::Instance,
        material::Material,
        scene_graph::{ContainerNode, MeshNode, SceneNode},
    },
    decoders::{
        DecodeContext, DecodeInput, Decoder,
        bytes::{Endian, ByteReader},
    },
    error::LoadError,
    format::AssetFormat,
    progress::ProgressReporter,
};

const FORMAT: AssetFormat = AssetFormat::AnimatedMesh;
const MAGIC: &[u8] = b"Kaydara FBX Binary  \0";
const ASCII_MAGIC: &[u8] = b"; FBX";
/// Magic, two reserved bytes and the version.
const HEADER_LEN: usize = 27;
/// First version with 64-bit node record headers.
const WIDE_HEADER_VERSION: u32 = 7500;
/// Separator between object name and class in binary FBX strings.
const NAME_CLASS_SEPARATOR: &str = "\u{0}\u{1}";

#[derive(Clone, Debug, PartialEq)]
pub enum FbxProperty {
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Raw(Vec<u8>),
    BoolArray(Vec<bool>),
    I32Array(Vec<i32>),
    I64Array(Vec<i64>),
    F32Array(Vec<f32>),
    F64Array(Vec<f64>),
}

impl FbxProperty {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FbxProperty::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FbxProperty::Bool(v) => Some(i64::from(*v)),
            FbxProperty::I16(v) => Some(i64::from(*v)),
            FbxProperty::I32(v) => Some(i64::from(*v)),
            FbxProperty::I64(v) => Some(*v),
            FbxProperty::F32(v) => Some(*v as i64),
            FbxProperty::F64(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64_array(&self) -> Option<Vec<f64>> {
        match self {
            FbxProperty::F64Array(v) => Some(v.clone()),
            FbxProperty::F32Array(v) => Some(v.iter().map(|x| f64::from(*x)).collect()),
            _ => None,
        }
    }

    pub fn as_i32_array(&self) -> Option<Vec<i32>> {
        match self {
            FbxProperty::I32Array(v) => Some(v.clone()),
            FbxProperty::I64Array(v) => Some(v.iter().map(|x| *x as i32).collect()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FbxNode {
    pub name: String,
    pub properties: Vec<FbxProperty>,
    pub children: Vec<FbxNode>,
}

impl FbxNode {
    pub fn child(&self, name: &str) -> Option<&FbxNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FbxNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// String property `idx` without the binary `\0\x01Class` suffix.
    pub fn object_name(&self, idx: usize) -> Option<&str> {
        let raw = self.properties.get(idx)?.as_str()?;
        Some(raw.split(NAME_CLASS_SEPARATOR).next().unwrap_or(raw))
    }
}

/// Parsed binary FBX document.
#[derive(Clone, Debug, PartialEq)]
pub struct FbxDocument {
    pub version: u32,
    pub nodes: Vec<FbxNode>,
}

impl FbxDocument {
    pub fn parse(data: &[u8]) -> Result<Self, LoadError> {
        if data.starts_with(ASCII_MAGIC) {
            return Err(LoadError::decode(
                FORMAT,
                "ASCII FBX is not supported, export binary FBX instead",
            ));
        }
        if data.len() < MAGIC.len() {
            return Err(LoadError::truncated(FORMAT, MAGIC.len(), data.len()));
        }
        if !data.starts_with(MAGIC) {
            return Err(LoadError::MalformedSignature {
                format: FORMAT,
                expected: "Kaydara FBX Binary",
            });
        }
        if data.len() < HEADER_LEN {
            return Err(LoadError::truncated(FORMAT, HEADER_LEN, data.len()));
        }
        let mut reader = ByteReader::new(data, Endian::Little, FORMAT);
        reader.seek(23)?;
        let version = reader.read_u32()?;
        let wide = version >= WIDE_HEADER_VERSION;
        let mut nodes = Vec::new();
        while reader.remaining() > 0 {
            match read_node(&mut reader, wide, 0)? {
                Some(node) => nodes.push(node),
                None => break,
            }
        }
        Ok(Self { version, nodes })
    }

    pub fn node(&self, name: &str) -> Option<&FbxNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// `UpAxis` from `GlobalSettings/Properties70`, if present.
    pub fn up_axis(&self) -> Option<i64> {
        self.node("GlobalSettings")?
            .child("Properties70")?
            .children_named("P")
            .find(|p| p.properties.first().and_then(FbxProperty::as_str) == Some("UpAxis"))?
            .properties
            .last()?
            .as_i64()
    }
}

/// Nesting deeper than this is treated as corruption.
const MAX_DEPTH: usize = 64;

fn read_node(reader: &mut ByteReader, wide: bool, depth: usize) -> Result<Option<FbxNode>, LoadError> {
    if depth > MAX_DEPTH {
        return Err(LoadError::decode(FORMAT, "node records nest too deeply"));
    }
    let (end_offset, num_properties, _property_list_len) = if wide {
        (reader.read_u64()?, reader.read_u64()?, reader.read_u64()?)
    } else {
        (
            u64::from(reader.read_u32()?),
            u64::from(reader.read_u32()?),
            u64::from(reader.read_u32()?),
        )
    };
    let name_len = reader.read_u8()?;
    if end_offset == 0 {
        // Null record terminating a node list
        return Ok(None);
    }
    let end_offset = end_offset as usize;
    if end_offset <= reader.position() {
        return Err(LoadError::decode(FORMAT, "node record ends before it starts"));
    }
    let name = String::from_utf8_lossy(reader.take(usize::from(name_len))?).into_owned();
    let mut properties = Vec::with_capacity(num_properties.min(1024) as usize);
    for _ in 0..num_properties {
        properties.push(read_property(reader)?);
    }
    let mut children = Vec::new();
    while reader.position() < end_offset {
        match read_node(reader, wide, depth + 1)? {
            Some(child) => children.push(child),
            None => break,
        }
    }
    reader.seek(end_offset)?;
    Ok(Some(FbxNode {
        name,
        properties,
        children,
    }))
}

fn read_property(reader: &mut ByteReader) -> Result<FbxProperty, LoadError> {
    let type_code = reader.read_u8()?;
    Ok(match type_code {
        b'Y' => FbxProperty::I16(reader.read_i16()?),
        b'C' => FbxProperty::Bool(reader.read_u8()? != 0),
        b'I' => FbxProperty::I32(reader.read_i32()?),
        b'F' => FbxProperty::F32(reader.read_f32()?),
        b'D' => FbxProperty::F64(reader.read_f64()?),
        b'L' => FbxProperty::I64(reader.read_i64()?),
        b'S' => {
            let len = reader.read_u32()? as usize;
            FbxProperty::String(String::from_utf8_lossy(reader.take(len)?).into_owned())
        }
        b'R' => {
            let len = reader.read_u32()? as usize;
            FbxProperty::Raw(reader.take(len)?.to_vec())
        }
        b'f' | b'd' | b'l' | b'i' | b'b' => read_array(reader, type_code)?,
        other => {
            return Err(LoadError::decode(
                FORMAT,
                format!("unknown property type {:?}", char::from(other)),
            ));
        }
    })
}

fn read_array(reader: &mut ByteReader, type_code: u8) -> Result<FbxProperty, LoadError> {
    let len = reader.read_u32()? as usize;
    let encoding = reader.read_u32()?;
    let compressed_len = reader.read_u32()? as usize;
    let element_size = match type_code {
        b'd' | b'l' => 8,
        b'f' | b'i' => 4,
        _ => 1,
    };
    let stored = reader.take(compressed_len)?;
    let raw = match encoding {
        0 => stored.to_vec(),
        1 => {
            let mut out = Vec::with_capacity(len.saturating_mul(element_size).min(1 << 28));
            flate2::read::ZlibDecoder::new(stored)
                .read_to_end(&mut out)
                .map_err(|e| LoadError::decode(FORMAT, format!("corrupt compressed array: {e}")))?;
            out
        }
        other => {
            return Err(LoadError::decode(FORMAT, format!("unknown array encoding {other}")));
        }
    };
    let needed = len.saturating_mul(element_size);
    if raw.len() < needed {
        return Err(LoadError::truncated(FORMAT, needed, raw.len()));
    }
    let mut values = ByteReader::new(&raw[..needed], Endian::Little, FORMAT);
    Ok(match type_code {
        b'f' => FbxProperty::F32Array((0..len).map(|_| values.read_f32()).collect::<Result<_, _>>()?),
        b'd' => FbxProperty::F64Array((0..len).map(|_| values.read_f64()).collect::<Result<_, _>>()?),
        b'l' => FbxProperty::I64Array((0..len).map(|_| values.read_i64()).collect::<Result<_, _>>()?),
        b'i' => FbxProperty::I32Array((0..len).map(|_| values.read_i32()).collect::<Result<_, _>>()?),
        _ => FbxProperty::BoolArray(
            (0..len)
                .map(|_| values.read_u8().map(|b| b != 0))
                .collect::<Result<_, _>>()?,
        ),
    })
}

/// Fan-triangulates FBX polygons; a negative index (`!i`) closes a polygon.
pub fn triangulate_polygons(polygon_vertex_index: &[i32]) -> Vec<u32> {
    let mut indices = Vec::with_capacity(polygon_vertex_index.len());
    let mut polygon: Vec<u32> = Vec::new();
    for &index in polygon_vertex_index {
        let last = index < 0;
        polygon.push((if last { !index } else { index }) as u32);
        if last {
            for k in 1..polygon.len().saturating_sub(1) {
                indices.extend([polygon[0], polygon[k], polygon[k + 1]]);
            }
            polygon.clear();
        }
    }
    indices
}

pub struct FbxDecoder;

impl Decoder for FbxDecoder {
    fn format(&self) -> AssetFormat {
        FORMAT
    }

    fn decode<'a>(
        &'a self,
        input: DecodeInput,
        ctx: DecodeContext<'a>,
    ) -> BoxFuture<'a, Result<DecodedAsset, LoadError>> {
        Box::pin(async move {
            decode_fbx(&input.bytes, &input.name, ctx.config, ctx.progress, ctx.cancel)
        })
    }
}

pub fn decode_fbx(
    data: &[u8],
    name: &str,
    config: &LoaderConfig,
    progress: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> Result<DecodedAsset, LoadError> {
    progress.set_stage(0.0, 0.5);
    let document = FbxDocument::parse(data)?;
    progress.complete_stage();
    cancel.checkpoint()?;
    log::info!("Decoding FBX {name}: version {}, {} top-level nodes", document.version, document.nodes.len());

    let objects = document
        .node("Objects")
        .ok_or_else(|| LoadError::decode(FORMAT, "file has no Objects section"))?;
    let mut metadata = AssetMetadata {
        bone_count: objects
            .children_named("Model")
            .filter(|m| m.properties.get(2).and_then(FbxProperty::as_str) == Some("LimbNode"))
            .count(),
        animations: objects
            .children_named("AnimationStack")
            .filter_map(|s| s.object_name(1))
            .map(str::to_string)
            .collect(),
        ..Default::default()
    };

    progress.set_stage(0.5, 1.0);
    let geometries: Vec<&FbxNode> = objects
        .children_named("Geometry")
        .filter(|g| g.properties.get(2).and_then(FbxProperty::as_str).is_none_or(|class| class == "Mesh"))
        .collect();
    let mut root = ContainerNode::new(name, vec![]);
    for (i, node) in geometries.iter().enumerate() {
        cancel.checkpoint()?;
        let mesh_name = node.object_name(1).filter(|n| !n.is_empty()).unwrap_or(name);
        let vertices = node
            .child("Vertices")
            .and_then(|v| v.properties.first())
            .and_then(FbxProperty::as_f64_array);
        let polygons = node
            .child("PolygonVertexIndex")
            .and_then(|p| p.properties.first())
            .and_then(FbxProperty::as_i32_array);
        let (Some(vertices), Some(polygons)) = (vertices, polygons) else {
            metadata.warn(format!("{name}: geometry {mesh_name} has no vertices or polygons"));
            continue;
        };
        let mut geometry = Geometry {
            positions: vertices
                .chunks_exact(3)
                .map(|c| [c[0] as f32, c[1] as f32, c[2] as f32])
                .collect(),
            indices: Some(triangulate_polygons(&polygons)),
            ..Default::default()
        };
        let dropped = geometry.sanitize_indices();
        if dropped > 0 {
            metadata.warn(format!("{name}: geometry {mesh_name} references missing vertices"));
        }
        geometry.compute_normals();
        metadata.vertex_count += geometry.vertex_count();
        metadata.triangle_count += geometry.indices.as_ref().map_or(0, |i| i.len() / 3);
        root.add_child(Box::new(MeshNode::new(
            mesh_name,
            geometry,
            Material::neutral(config.mesh_color),
        )));
        progress.update(i as u64 + 1, geometries.len() as u64);
    }
    if root.get_children().is_empty() {
        return Err(LoadError::decode(FORMAT, "file contains no mesh geometry"));
    }
    if document.up_axis() == Some(2) {
        root.set_local_transform(Instance::z_up_to_y_up());
    }
    log::info!(
        "{name}: {} meshes, {} vertices, {} bones, animations {:?}",
        root.get_children().len(),
        metadata.vertex_count,
        metadata.bone_count,
        metadata.animations
    );
    Ok(DecodedAsset {
        kind: AssetKind::Mesh,
        root: Box::new(root),
        format: FORMAT,
        metadata,
    })
}
