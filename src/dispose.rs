//! Releasing a decoded asset before its successor is installed.
//!
//! Disposal only relies on the [`HasGeometry`](crate::data_structures::scene_graph::HasGeometry)
//! and [`HasMaterial`](crate::data_structures::scene_graph::HasMaterial) capabilities, so it
//! works for every node type the decoders produce.

use crate::data_structures::{asset::DecodedAsset, scene_graph::visit_mut};

/// What a disposal pass released.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisposalReport {
    pub nodes: usize,
    pub geometries: usize,
    /// Occupied texture slots, counted per material.
    pub textures: usize,
}

/// Frees vertex data, GPU buffers and every texture slot of `asset`.
///
/// The asset stays a valid (empty) scene graph; releasing twice is harmless.
pub fn dispose(asset: &mut DecodedAsset) -> DisposalReport {
    let mut report = DisposalReport::default();
    visit_mut(asset.root.as_mut(), &mut |node| {
        report.nodes += 1;
        if let Some(node) = node.as_geometry_mut() {
            if node.geometry_mut().release() {
                report.geometries += 1;
            }
        }
        if let Some(node) = node.as_material_mut() {
            report.textures += node.material_mut().release_maps();
        }
    });
    log::debug!(
        "Disposed {}: {} nodes, {} geometries, {} texture slots",
        asset.root.name(),
        report.nodes,
        report.geometries,
        report.textures
    );
    report
}

/// Disposes of `asset` and drops it.
pub fn dispose_owned(mut asset: DecodedAsset) -> DisposalReport {
    dispose(&mut asset)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        data_structures::{
            asset::{AssetKind, AssetMetadata},
            geometry::Geometry,
            material::{Material, TextureSlot},
            scene_graph::{ContainerNode, MeshNode, PointsNode, visit},
            texture::Texture,
        },
        format::AssetFormat,
    };

    fn textured_scene(texture: &Arc<Texture>) -> DecodedAsset {
        let mut material = Material::neutral([0.5; 3]);
        for slot in [
            TextureSlot::Diffuse,
            TextureSlot::Normal,
            TextureSlot::Roughness,
            TextureSlot::Metalness,
            TextureSlot::AmbientOcclusion,
            TextureSlot::Emissive,
        ] {
            material.set_map(slot, texture.clone());
        }
        let mesh = Geometry {
            positions: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            indices: Some(vec![0, 1, 2]),
            ..Default::default()
        };
        let mut group = ContainerNode::new("group", Vec::new());
        group
            .children
            .push(Box::new(MeshNode::new("mesh", mesh, material)));
        group.children.push(Box::new(PointsNode::new(
            "points",
            Geometry::points(vec![[0.0; 3]], Vec::new()),
            Material::points(0.1, [1.0; 3], false),
        )));
        let mut root = ContainerNode::new("root", Vec::new());
        root.children.push(Box::new(group));
        DecodedAsset {
            kind: AssetKind::Mesh,
            root: Box::new(root),
            format: AssetFormat::MeshInterchangeBinary,
            metadata: AssetMetadata::default(),
        }
    }

    #[test]
    fn releases_geometry_and_every_texture_slot() {
        let texture = Arc::new(Texture::solid("white", [255; 4]));
        let mut asset = textured_scene(&texture);

        let report = dispose(&mut asset);
        assert_eq!(
            report,
            DisposalReport {
                nodes: 4,
                geometries: 2,
                textures: 6,
            }
        );
        assert_eq!(Arc::strong_count(&texture), 1);
        visit(asset.root.as_ref(), &mut |node| {
            if let Some(node) = node.as_geometry() {
                assert!(node.geometry().is_released());
            }
        });
    }

    #[test]
    fn disposing_twice_releases_nothing_more() {
        let texture = Arc::new(Texture::solid("white", [255; 4]));
        let mut asset = textured_scene(&texture);
        dispose(&mut asset);
        let again = dispose(&mut asset);
        assert_eq!(again.geometries, 0);
        assert_eq!(again.textures, 0);
        assert_eq!(again.nodes, 4);
    }
}
