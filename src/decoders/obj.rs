//! Wavefront OBJ with its MTL material library and texture sidecars.
//!
//! Textures are decoded up front by the preloader, then bound to material
//! slots by fuzzy name. The MTL parser never reads anything itself: `mtllib`
//! references are answered from the supplied sidecars.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{
    cancellation::CancellationToken,
    config::LoaderConfig,
    data_structures::{
        asset::{AssetKind, AssetMetadata, DecodedAsset, SidecarFile},
        geometry::Geometry,
        instance::Instance,
        material::{Material, TextureSlot},
        scene_graph::{ContainerNode, MeshNode},
    },
    decoders::{DecodeContext, DecodeInput, Decoder},
    error::LoadError,
    format::{AssetFormat, SidecarRole},
    progress::ProgressReporter,
    resources::textures::{NameIndex, TextureLibrary, preload_textures},
};

const FORMAT: AssetFormat = AssetFormat::TextMesh;

pub struct ObjDecoder;

impl Decoder for ObjDecoder {
    fn format(&self) -> AssetFormat {
        FORMAT
    }

    fn decode<'a>(
        &'a self,
        input: DecodeInput,
        ctx: DecodeContext<'a>,
    ) -> BoxFuture<'a, Result<DecodedAsset, LoadError>> {
        Box::pin(decode_obj(input, ctx.config, ctx.progress, ctx.cancel))
    }
}

/// The file name of a texture directive; option flags such as `-s 1 1 1` come first.
fn texture_reference(value: &str) -> Option<&str> {
    value.split_whitespace().last()
}

/// Texture directives in the order they are bound.
fn texture_directives<'m>(material: &'m tobj::Material) -> Vec<(TextureSlot, &'static str, &'m str)> {
    let mut directives = Vec::new();
    let mut push = |slot: TextureSlot, directive: &'static str, value: Option<&'m String>| {
        if let Some(reference) = value.and_then(|v| texture_reference(v.as_str())) {
            directives.push((slot, directive, reference));
        }
    };
    push(TextureSlot::Diffuse, "map_Kd", material.diffuse_texture.as_ref());
    push(TextureSlot::Bump, "map_Bump", material.normal_texture.as_ref());
    push(TextureSlot::Specular, "map_Ks", material.specular_texture.as_ref());
    for (slot, directive) in [
        (TextureSlot::Normal, "norm"),
        (TextureSlot::Emissive, "map_Ke"),
        (TextureSlot::Roughness, "map_Pr"),
        (TextureSlot::Metalness, "map_Pm"),
    ] {
        push(slot, directive, material.unknown_param.get(directive));
    }
    directives
}

fn build_material(
    source: &tobj::Material,
    textures: &TextureLibrary,
    config: &LoaderConfig,
    metadata: &mut AssetMetadata,
) -> Material {
    let [r, g, b] = source.diffuse.unwrap_or(config.mesh_color);
    let alpha = source.dissolve.unwrap_or(1.0);
    let mut material = Material::new(&source.name, [r, g, b, alpha]);
    for (slot, directive, reference) in texture_directives(source) {
        match textures.resolve(reference) {
            Some(texture) => {
                log::debug!("{}: {directive} {reference} -> {}", source.name, texture.name);
                material.set_map(slot, Arc::clone(texture));
            }
            None => metadata.warn(format!(
                "{}: {directive}: {}",
                source.name,
                LoadError::SidecarResolution(reference.to_string())
            )),
        }
    }
    material
}

fn to_geometry(mesh: &tobj::Mesh) -> Geometry {
    let positions: Vec<[f32; 3]> = mesh
        .positions
        .chunks_exact(3)
        .map(|p| [p[0], p[1], p[2]])
        .collect();
    let count = positions.len();
    let normals: Vec<[f32; 3]> = mesh
        .normals
        .chunks_exact(3)
        .map(|n| [n[0], n[1], n[2]])
        .collect();
    // OBJ puts the texture origin at the bottom left
    let tex_coords: Vec<[f32; 2]> = mesh
        .texcoords
        .chunks_exact(2)
        .map(|t| [t[0], 1.0 - t[1]])
        .collect();
    let colors: Vec<[f32; 3]> = mesh
        .vertex_color
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect();
    let keep_if_complete = |len: usize| len == count;
    let mut geometry = Geometry {
        normals: if keep_if_complete(normals.len()) { normals } else { Vec::new() },
        tex_coords: if keep_if_complete(tex_coords.len()) { tex_coords } else { Vec::new() },
        colors: if keep_if_complete(colors.len()) { colors } else { Vec::new() },
        positions,
        indices: Some(mesh.indices.clone()),
        ..Default::default()
    };
    if geometry.normals.is_empty() {
        geometry.compute_normals();
    }
    geometry
}

pub async fn decode_obj(
    input: DecodeInput,
    config: &LoaderConfig,
    progress: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> Result<DecodedAsset, LoadError> {
    let name = input.name;
    let mut metadata = AssetMetadata::default();
    let (material_files, textures): (Vec<SidecarFile>, Vec<SidecarFile>) = input
        .sidecars
        .into_iter()
        .filter(|sidecar| sidecar.role != SidecarRole::Other)
        .partition(|sidecar| sidecar.role == SidecarRole::Material);

    progress.set_stage(0.0, 0.5);
    let preloaded = preload_textures(
        textures.into_iter().map(|t| (t.name, t.bytes)).collect(),
        progress,
        cancel,
    )
    .await?;
    for failure in preloaded.failures {
        metadata.warn(failure);
    }
    progress.complete_stage();
    cancel.checkpoint()?;

    progress.set_stage(0.5, 1.0);
    let mut libraries = NameIndex::new();
    for file in &material_files {
        libraries.insert(&file.name, file);
    }
    let fallback = material_files.first();
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let mut body = input.bytes.as_slice();
    let (models, materials) = tobj::load_obj_buf_async(&mut body, &options, |path| {
        let loaded = match libraries.resolve(&path).copied().or(fallback) {
            Some(file) => tobj::load_mtl_buf(&mut file.bytes.as_slice()),
            None => {
                log::warn!("{name}: material library {path} was not supplied");
                Err(tobj::LoadError::OpenFileFailed)
            }
        };
        async move { loaded }
    })
    .await
    .map_err(|e| LoadError::decode(FORMAT, format!("{name}: {e}")))?;

    let materials: Vec<Material> = match materials {
        Ok(materials) => materials
            .iter()
            .map(|m| build_material(m, &preloaded.library, config, &mut metadata))
            .collect(),
        Err(e) => {
            metadata.warn(format!("{name}: materials unavailable, using defaults: {e}"));
            Vec::new()
        }
    };
    if models.is_empty() {
        return Err(LoadError::decode(FORMAT, format!("{name}: file contains no faces")));
    }
    log::info!(
        "Decoding OBJ {name}: {} meshes, {} materials, {} textures",
        models.len(),
        materials.len(),
        preloaded.library.len()
    );

    let mut root = ContainerNode::new(&name, Vec::new()).with_transform(Instance::z_up_to_y_up());
    let total = models.len() as u64;
    for (done, model) in models.iter().enumerate() {
        cancel.checkpoint()?;
        let mut geometry = to_geometry(&model.mesh);
        let dropped = geometry.sanitize_indices();
        if dropped > 0 {
            metadata.warn(format!("{}: dropped {dropped} out-of-range indices", model.name));
        }
        metadata.vertex_count += geometry.vertex_count();
        metadata.triangle_count += geometry.indices.as_ref().map_or(0, |i| i.len() / 3);
        let has_colors = geometry.has_colors();
        let material = model
            .mesh
            .material_id
            .and_then(|id| materials.get(id))
            .cloned()
            .unwrap_or_else(|| Material::neutral(config.mesh_color))
            .with_vertex_colors(has_colors);
        root.children
            .push(Box::new(MeshNode::new(&model.name, geometry, material)));
        progress.update(done as u64 + 1, total);
    }
    progress.complete_stage();

    Ok(DecodedAsset {
        kind: AssetKind::Mesh,
        root: Box::new(root),
        format: FORMAT,
        metadata,
    })
}
