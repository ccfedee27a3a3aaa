//! The shared centering and auto-scale policy.
//!
//! Applied once to every decoded asset, after any axis conversion the decoder
//! put on the root. Vertex data is never touched: the root's instance is
//! pre-multiplied with a uniform scale and a translation so the world-space
//! bounding box ends up centered on the origin.

use crate::{
    config::{LoaderConfig, ScalePolicy},
    data_structures::{
        asset::{DecodedAsset, Normalization},
        instance::Instance,
        scene_graph::world_bounds,
    },
};

/// Centers `asset` on the origin and rescales it into the visual range.
///
/// Returns `None` for an asset without any geometry. Degenerate assets (a
/// single point, all points equal) are centered but never scaled.
pub fn normalize(asset: &mut DecodedAsset, config: &LoaderConfig) -> Option<Normalization> {
    let bounds = world_bounds(asset.root.as_ref());
    if bounds.is_empty() {
        asset
            .metadata
            .warn(format!("{}: nothing to normalize, asset has no geometry", asset.root.name()));
        return None;
    }
    let center = bounds.center();
    let max_dimension = bounds.max_dimension();
    let policy = ScalePolicy::for_format(asset.format, config);
    let scale = match policy.scale_for(max_dimension) {
        Some(scale) => scale,
        None if max_dimension <= 0.0 || !max_dimension.is_finite() => {
            asset.metadata.warn(format!(
                "{}: degenerate bounding box (largest extent {max_dimension}), not rescaling",
                asset.root.name()
            ));
            1.0
        }
        None => 1.0,
    };

    let offset = cgmath::Vector3::new(
        (-center[0] * scale) as f32,
        (-center[1] * scale) as f32,
        (-center[2] * scale) as f32,
    );
    let local = asset.root.get_local_transform();
    asset
        .root
        .set_local_transform(Instance::uniform(offset, scale as f32) * local);

    let normalization = Normalization {
        center,
        max_dimension,
        scale,
    };
    log::info!(
        "Normalized {} ({}): center {:?}, largest extent {:.4}, scale {:.6}",
        asset.root.name(),
        asset.format,
        center,
        max_dimension,
        scale
    );
    asset.metadata.normalization = Some(normalization);
    Some(normalization)
}
