//! glTF 2.0, both the JSON (`.gltf`) and the binary container (`.glb`) form.
//!
//! Buffers come from the GLB blob, from base64 `data:` URIs or from sidecar
//! files matched by name. Every image is decoded once and shared by all
//! material slots referencing it.

use std::{collections::HashMap, sync::Arc};

use ::gltf::mesh::Mode;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use futures::future::BoxFuture;

use crate::{
    cancellation::CancellationToken,
    config::LoaderConfig,
    data_structures::{
        asset::{AssetKind, AssetMetadata, DecodedAsset, SidecarFile},
        geometry::Geometry,
        instance::Instance,
        material::{Material, TextureSlot},
        scene_graph::{AnimationClip, ContainerNode, MeshNode, PointsNode, SceneNode, merge},
        texture::Texture,
    },
    decoders::{DecodeContext, DecodeInput, Decoder},
    error::LoadError,
    format::{AssetFormat, extension_of},
    progress::ProgressReporter,
    resources::{animation::Keyframes, textures::NameIndex},
};

/// Deeper node hierarchies are assumed to be cyclic and cut off.
const MAX_NODE_DEPTH: usize = 64;

pub struct GltfDecoder {
    format: AssetFormat,
}

impl GltfDecoder {
    pub fn new(format: AssetFormat) -> Self {
        Self { format }
    }
}

impl Decoder for GltfDecoder {
    fn format(&self) -> AssetFormat {
        self.format
    }

    fn decode<'a>(
        &'a self,
        input: DecodeInput,
        ctx: DecodeContext<'a>,
    ) -> BoxFuture<'a, Result<DecodedAsset, LoadError>> {
        Box::pin(async move {
            decode_gltf(self.format, &input, ctx.config, ctx.progress, ctx.cancel)
        })
    }
}

/// Payload of a base64 `data:` URI, `None` for any other URI.
fn parse_data_uri(uri: &str) -> Option<Result<Vec<u8>, base64::DecodeError>> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    Some(BASE64.decode(payload.as_bytes()))
}

/// Relative URIs are percent-encoded; sidecar names are not.
fn unescape_uri(uri: &str) -> String {
    uri.replace("%20", " ")
}

/// `image/png` -> `png`
fn mime_extension(mime: &str) -> Option<String> {
    mime.rsplit('/')
        .next()
        .filter(|ext| !ext.is_empty())
        .map(str::to_string)
}

struct Resolver<'a> {
    format: AssetFormat,
    sidecars: NameIndex<&'a SidecarFile>,
}

impl<'a> Resolver<'a> {
    fn new(format: AssetFormat, sidecars: &'a [SidecarFile]) -> Self {
        let mut index = NameIndex::new();
        for sidecar in sidecars {
            index.insert(&sidecar.name, sidecar);
        }
        Self {
            format,
            sidecars: index,
        }
    }

    fn fetch(&self, uri: &str) -> Result<Vec<u8>, LoadError> {
        if let Some(decoded) = parse_data_uri(uri) {
            return decoded
                .map_err(|e| LoadError::decode(self.format, format!("invalid data URI: {e}")));
        }
        let name = unescape_uri(uri);
        self.sidecars
            .resolve(&name)
            .map(|sidecar| sidecar.bytes.clone())
            .ok_or_else(|| LoadError::SidecarResolution(name))
    }
}

fn resolve_buffers(
    gltf: &::gltf::Gltf,
    resolver: &Resolver,
    metadata: &mut AssetMetadata,
) -> Result<Vec<Vec<u8>>, LoadError> {
    let mut buffers = Vec::new();
    for buffer in gltf.buffers() {
        let data = match buffer.source() {
            ::gltf::buffer::Source::Bin => gltf.blob.clone().ok_or_else(|| {
                LoadError::decode(resolver.format, "buffer refers to a missing binary chunk")
            })?,
            ::gltf::buffer::Source::Uri(uri) => match resolver.fetch(uri) {
                Ok(data) => data,
                Err(LoadError::SidecarResolution(name)) => {
                    metadata.warn(format!("buffer {} not supplied: {name}", buffer.index()));
                    Vec::new()
                }
                Err(e) => return Err(e),
            },
        };
        if data.len() < buffer.length() {
            metadata.warn(format!(
                "buffer {} holds {} bytes, {} declared",
                buffer.index(),
                data.len(),
                buffer.length()
            ));
        }
        buffers.push(data);
    }
    Ok(buffers)
}

fn decode_images(
    gltf: &::gltf::Gltf,
    buffers: &[Vec<u8>],
    resolver: &Resolver,
    metadata: &mut AssetMetadata,
    progress: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> Result<Vec<Option<Arc<Texture>>>, LoadError> {
    let total = gltf.images().len() as u64;
    let mut images = Vec::new();
    for (done, image) in gltf.images().enumerate() {
        cancel.checkpoint()?;
        let label = image
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("image{}", image.index()));
        let (bytes, extension) = match image.source() {
            ::gltf::image::Source::View { view, mime_type } => {
                let start = view.offset();
                let end = start + view.length();
                let bytes = buffers
                    .get(view.buffer().index())
                    .and_then(|buffer| buffer.get(start..end))
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| format!("image {label} points outside its buffer"));
                (bytes, mime_extension(mime_type))
            }
            ::gltf::image::Source::Uri { uri, mime_type } => {
                let bytes = resolver.fetch(uri).map_err(|e| e.to_string());
                let extension = mime_type
                    .and_then(mime_extension)
                    .or_else(|| extension_of(uri));
                (bytes, extension)
            }
        };
        let texture = bytes.and_then(|bytes| {
            Texture::from_bytes(&bytes, &label, extension.as_deref()).map_err(|e| format!("{e:#}"))
        });
        match texture {
            Ok(texture) => images.push(Some(Arc::new(texture))),
            Err(message) => {
                metadata.warn(message);
                images.push(None);
            }
        }
        progress.update(done as u64 + 1, total);
    }
    Ok(images)
}

fn build_materials(gltf: &::gltf::Gltf, images: &[Option<Arc<Texture>>]) -> Vec<Material> {
    let image_of = |texture: ::gltf::Texture| images.get(texture.source().index()).cloned().flatten();
    gltf.materials()
        .map(|material| {
            let pbr = material.pbr_metallic_roughness();
            let name = material
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("material{}", material.index().unwrap_or_default()));
            let mut result = Material::new(&name, pbr.base_color_factor());
            let mut bind = |slot, texture: Option<Arc<Texture>>| {
                if let Some(texture) = texture {
                    result.set_map(slot, texture);
                }
            };
            bind(
                TextureSlot::Diffuse,
                pbr.base_color_texture().and_then(|info| image_of(info.texture())),
            );
            bind(
                TextureSlot::Normal,
                material.normal_texture().and_then(|t| image_of(t.texture())),
            );
            // Roughness and metalness share one texture (green and blue channels)
            let metallic_roughness = pbr
                .metallic_roughness_texture()
                .and_then(|info| image_of(info.texture()));
            bind(TextureSlot::Roughness, metallic_roughness.clone());
            bind(TextureSlot::Metalness, metallic_roughness);
            bind(
                TextureSlot::AmbientOcclusion,
                material.occlusion_texture().and_then(|t| image_of(t.texture())),
            );
            bind(
                TextureSlot::Emissive,
                material.emissive_texture().and_then(|info| image_of(info.texture())),
            );
            result
        })
        .collect()
}

/// Keyframe clips per node index.
fn read_animations(
    gltf: &::gltf::Gltf,
    buffers: &[Vec<u8>],
    metadata: &mut AssetMetadata,
) -> HashMap<usize, Vec<AnimationClip>> {
    let mut animations: HashMap<usize, Vec<AnimationClip>> = HashMap::new();
    for animation in gltf.animations() {
        let name = animation
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("animation{}", animation.index()));
        if !metadata.animations.contains(&name) {
            metadata.animations.push(name.clone());
        }
        for channel in animation.channels() {
            let reader = channel.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
            let timestamps: Vec<f32> = reader
                .read_inputs()
                .map(|inputs| inputs.collect())
                .unwrap_or_default();
            let keyframes = match reader.read_outputs() {
                Some(::gltf::animation::util::ReadOutputs::Translations(translations)) => {
                    Keyframes::Translation(translations.map(Into::into).collect())
                }
                Some(::gltf::animation::util::ReadOutputs::Rotations(rotations)) => {
                    Keyframes::Rotation(
                        rotations
                            .into_f32()
                            .map(|[x, y, z, w]| cgmath::Quaternion::new(w, x, y, z))
                            .collect(),
                    )
                }
                Some(::gltf::animation::util::ReadOutputs::Scales(scales)) => {
                    Keyframes::Scale(scales.map(Into::into).collect())
                }
                Some(::gltf::animation::util::ReadOutputs::MorphTargetWeights(_)) => {
                    Keyframes::Other
                }
                None => {
                    log::warn!("No keyframes found in channel {} of {name}", channel.index());
                    Keyframes::Other
                }
            };
            animations
                .entry(channel.target().node().index())
                .or_default()
                .push(AnimationClip {
                    name: name.clone(),
                    keyframes,
                    timestamps,
                });
        }
    }
    animations
}

fn strip_to_list(count: u32) -> Vec<u32> {
    (0..count.saturating_sub(2))
        .flat_map(|i| {
            if i % 2 == 0 {
                [i, i + 1, i + 2]
            } else {
                [i + 1, i, i + 2]
            }
        })
        .collect()
}

fn fan_to_list(count: u32) -> Vec<u32> {
    (1..count.saturating_sub(1)).flat_map(|i| [0, i, i + 1]).collect()
}

/// Walks the node hierarchy and turns it into scene nodes.
struct SceneBuilder<'a> {
    buffers: &'a [Vec<u8>],
    materials: &'a [Material],
    animations: &'a HashMap<usize, Vec<AnimationClip>>,
    config: &'a LoaderConfig,
    metadata: AssetMetadata,
    mesh_primitives: usize,
    point_primitives: usize,
}

impl SceneBuilder<'_> {
    fn to_scene_node(&mut self, node: ::gltf::Node, depth: usize) -> Box<dyn SceneNode> {
        let name = node
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("node{}", node.index()));
        let animations = self
            .animations
            .get(&node.index())
            .map(|clips| merge(clips))
            .unwrap_or_default();
        let (translation, rotation, scale) = node.transform().decomposed();
        let mut container = ContainerNode::new(&name, animations)
            .with_transform(Instance::from_decomposed(translation, rotation, scale));

        if let Some(mesh) = node.mesh() {
            for primitive in mesh.primitives() {
                if let Some(child) = self.primitive_node(&name, &primitive) {
                    container.children.push(child);
                }
            }
        }
        if depth >= MAX_NODE_DEPTH {
            self.metadata
                .warn(format!("node hierarchy deeper than {MAX_NODE_DEPTH} cut at {name}"));
            return Box::new(container);
        }
        for child in node.children() {
            let child = self.to_scene_node(child, depth + 1);
            container.children.push(child);
        }
        Box::new(container)
    }

    fn primitive_node(
        &mut self,
        node_name: &str,
        primitive: &::gltf::Primitive,
    ) -> Option<Box<dyn SceneNode>> {
        let label = format!("{node_name}#{}", primitive.index());
        let buffers = self.buffers;
        let reader = primitive.reader(move |buffer| {
            buffers
                .get(buffer.index())
                .map(Vec::as_slice)
                .filter(|data| !data.is_empty())
        });
        let Some(positions) = reader.read_positions() else {
            self.metadata
                .warn(format!("{label}: primitive has no readable positions"));
            return None;
        };
        let mut geometry = Geometry {
            positions: positions.collect(),
            ..Default::default()
        };
        let count = geometry.positions.len();
        if let Some(normals) = reader.read_normals() {
            geometry.normals = normals.collect();
        }
        if let Some(tex_coords) = reader.read_tex_coords(0) {
            geometry.tex_coords = tex_coords.into_f32().collect();
        }
        if let Some(colors) = reader.read_colors(0) {
            geometry.colors = colors.into_rgb_f32().collect();
        }
        if !geometry.normals.is_empty() && geometry.normals.len() != count {
            geometry.normals.clear();
        }
        if !geometry.tex_coords.is_empty() && geometry.tex_coords.len() != count {
            geometry.tex_coords.clear();
        }
        if !geometry.colors.is_empty() && geometry.colors.len() != count {
            geometry.colors.clear();
        }
        let has_colors = geometry.has_colors();
        let material = primitive
            .material()
            .index()
            .and_then(|i| self.materials.get(i))
            .cloned();

        let mode = primitive.mode();
        if mode == Mode::Points {
            self.point_primitives += 1;
            self.metadata.point_count += count;
            self.metadata.vertex_count += count;
            let color = material
                .as_ref()
                .map(|m| [m.base_color[0], m.base_color[1], m.base_color[2]])
                .unwrap_or(self.config.point_color);
            let material = Material::points(self.config.point_size, color, has_colors);
            return Some(Box::new(PointsNode::new(&label, geometry, material)));
        }

        let vertex_count = count as u32;
        let indices: Vec<u32> = reader
            .read_indices()
            .map(|indices| indices.into_u32().collect())
            .unwrap_or_else(|| (0..vertex_count).collect());
        let indices = match mode {
            Mode::Triangles => indices,
            Mode::TriangleStrip => strip_to_list(indices.len() as u32)
                .into_iter()
                .map(|i| indices[i as usize])
                .collect(),
            Mode::TriangleFan => fan_to_list(indices.len() as u32)
                .into_iter()
                .map(|i| indices[i as usize])
                .collect(),
            other => {
                self.metadata
                    .warn(format!("{label}: skipped primitive with mode {other:?}"));
                return None;
            }
        };
        geometry.indices = Some(indices);
        let dropped = geometry.sanitize_indices();
        if dropped > 0 {
            self.metadata
                .warn(format!("{label}: dropped {dropped} out-of-range indices"));
        }
        if geometry.normals.is_empty() {
            geometry.compute_normals();
        }
        self.mesh_primitives += 1;
        self.metadata.vertex_count += count;
        self.metadata.triangle_count += geometry.indices.as_ref().map_or(0, |i| i.len() / 3);
        let material = material
            .unwrap_or_else(|| Material::neutral(self.config.mesh_color))
            .with_vertex_colors(has_colors);
        Some(Box::new(MeshNode::new(&label, geometry, material)))
    }
}

pub fn decode_gltf(
    format: AssetFormat,
    input: &DecodeInput,
    config: &LoaderConfig,
    progress: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> Result<DecodedAsset, LoadError> {
    let gltf = ::gltf::Gltf::from_slice(&input.bytes).map_err(|e| LoadError::decode(format, e))?;
    let resolver = Resolver::new(format, &input.sidecars);
    let mut metadata = AssetMetadata::default();

    progress.set_stage(0.0, 0.2);
    let buffers = resolve_buffers(&gltf, &resolver, &mut metadata)?;
    progress.complete_stage();
    cancel.checkpoint()?;

    progress.set_stage(0.2, 0.7);
    let images = decode_images(&gltf, &buffers, &resolver, &mut metadata, progress, cancel)?;
    progress.complete_stage();

    progress.set_stage(0.7, 1.0);
    let materials = build_materials(&gltf, &images);
    let animations = read_animations(&gltf, &buffers, &mut metadata);
    let scene = gltf
        .default_scene()
        .or_else(|| gltf.scenes().next())
        .ok_or_else(|| LoadError::decode(format, "document contains no scene"))?;
    log::info!(
        "Decoding glTF {}: {} nodes, {} materials, {} images, {} animations",
        input.name,
        gltf.nodes().len(),
        materials.len(),
        images.len(),
        metadata.animations.len()
    );

    let mut builder = SceneBuilder {
        buffers: &buffers,
        materials: &materials,
        animations: &animations,
        config,
        metadata,
        mesh_primitives: 0,
        point_primitives: 0,
    };
    let mut root = ContainerNode::new(&input.name, Vec::new());
    for node in scene.nodes() {
        cancel.checkpoint()?;
        let node = builder.to_scene_node(node, 0);
        root.children.push(node);
    }
    progress.complete_stage();

    if builder.mesh_primitives + builder.point_primitives == 0 {
        return Err(LoadError::decode(format, "scene contains no drawable primitives"));
    }
    let kind = if builder.mesh_primitives == 0 {
        AssetKind::PointCloud
    } else {
        AssetKind::Mesh
    };
    Ok(DecodedAsset {
        kind,
        root: Box::new(root),
        format,
        metadata: builder.metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::scene_graph::world_bounds;

    /// Three positions followed by three u16 indices.
    fn triangle_buffer() -> Vec<u8> {
        let mut data = Vec::new();
        for v in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            for c in v {
                data.extend_from_slice(&c.to_le_bytes());
            }
        }
        for i in [0u16, 1, 2] {
            data.extend_from_slice(&i.to_le_bytes());
        }
        data
    }

    fn document(buffer: &str, mode: u32) -> String {
        format!(
            r#"{{
                "asset": {{"version": "2.0"}},
                "scene": 0,
                "scenes": [{{"nodes": [0]}}],
                "nodes": [{{"name": "tri", "mesh": 0, "translation": [1.0, 0.0, 0.0]}}],
                "meshes": [{{"primitives": [{{"attributes": {{"POSITION": 0}}, "indices": 1, "mode": {mode}}}]}}],
                "buffers": [{buffer}],
                "bufferViews": [
                    {{"buffer": 0, "byteOffset": 0, "byteLength": 36}},
                    {{"buffer": 0, "byteOffset": 36, "byteLength": 6}}
                ],
                "accessors": [
                    {{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                      "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]}},
                    {{"bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR"}}
                ]
            }}"#
        )
    }

    fn glb(json: &str, bin: &[u8]) -> Vec<u8> {
        let mut json = json.as_bytes().to_vec();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }
        let mut bin = bin.to_vec();
        while bin.len() % 4 != 0 {
            bin.push(0);
        }
        let total = 12 + 8 + json.len() + 8 + bin.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(b"JSON");
        out.extend_from_slice(&json);
        out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        out.extend_from_slice(b"BIN\0");
        out.extend_from_slice(&bin);
        out
    }

    fn decode(format: AssetFormat, input: DecodeInput) -> Result<DecodedAsset, LoadError> {
        decode_gltf(
            format,
            &input,
            &LoaderConfig::default(),
            &mut ProgressReporter::silent(),
            &CancellationToken::new(),
        )
    }

    #[test]
    fn decodes_binary_triangle_with_node_transform() {
        let bin = triangle_buffer();
        let json = document(r#"{"byteLength": 42}"#, 4);
        let input = DecodeInput::new("tri.glb", glb(&json, &bin));
        let asset = decode(AssetFormat::MeshInterchangeBinary, input).unwrap();

        assert_eq!(asset.kind, AssetKind::Mesh);
        assert_eq!(asset.metadata.vertex_count, 3);
        assert_eq!(asset.metadata.triangle_count, 1);
        let bounds = world_bounds(asset.root.as_ref());
        assert_eq!(bounds.min, [1.0, 0.0, 0.0]);
        assert_eq!(bounds.max, [2.0, 1.0, 0.0]);

        let node = &asset.root.get_children()[0];
        let mesh = node.get_children()[0].as_geometry().unwrap().geometry();
        assert_eq!(mesh.normals.len(), 3);
        assert!((mesh.normals[0][2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn reads_base64_buffers_and_point_primitives() {
        let uri = format!(
            "data:application/octet-stream;base64,{}",
            BASE64.encode(triangle_buffer())
        );
        let json = document(&format!(r#"{{"byteLength": 42, "uri": "{uri}"}}"#), 0);
        let input = DecodeInput::new("points.gltf", json.into_bytes());
        let asset = decode(AssetFormat::MeshInterchangeJson, input).unwrap();

        assert_eq!(asset.kind, AssetKind::PointCloud);
        assert_eq!(asset.metadata.point_count, 3);
        let node = &asset.root.get_children()[0].get_children()[0];
        assert!(node.as_material().unwrap().material().point_size.is_some());
    }

    #[test]
    fn external_buffers_come_from_sidecars() {
        let json = document(r#"{"byteLength": 42, "uri": "mesh%20data.bin"}"#, 4);
        let input = DecodeInput::new("scene.gltf", json.clone().into_bytes());
        let err = decode(AssetFormat::MeshInterchangeJson, input).unwrap_err();
        assert!(matches!(err, LoadError::Decode { .. }), "{err}");

        let input = DecodeInput::new("scene.gltf", json.into_bytes())
            .with_sidecars(vec![SidecarFile::new("Mesh Data.BIN", triangle_buffer())]);
        let asset = decode(AssetFormat::MeshInterchangeJson, input).unwrap();
        assert_eq!(asset.metadata.triangle_count, 1);
        assert!(asset.metadata.warnings.is_empty());
    }

    #[test]
    fn rejects_unparseable_documents() {
        let input = DecodeInput::new("broken.glb", b"glTF\x02\0\0\0garbage".to_vec());
        let err = decode(AssetFormat::MeshInterchangeBinary, input).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Decode {
                format: AssetFormat::MeshInterchangeBinary,
                ..
            }
        ));
    }

    #[test]
    fn strips_and_fans_become_triangle_lists() {
        assert_eq!(strip_to_list(4), vec![0, 1, 2, 2, 1, 3]);
        assert_eq!(fan_to_list(4), vec![0, 1, 2, 0, 2, 3]);
        assert!(strip_to_list(2).is_empty());
    }
}
