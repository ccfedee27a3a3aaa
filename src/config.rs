//! Loader configuration.
//!
//! Everything a decoder may need to know about presentation policy is passed
//! in through [`LoaderConfig`]; nothing is read from ambient global state.

use crate::format::AssetFormat;

#[derive(Clone, Debug)]
pub struct LoaderConfig {
    /// Largest extent an auto-scaled asset ends up with.
    pub target_size: f64,
    /// Assets smaller than this (degree-scale geometry) are scaled up.
    pub min_visual_extent: f64,
    /// Assets larger than this (survey meters) are scaled down.
    pub max_visual_extent: f64,
    /// Upper threshold for formats that commonly ship at a large native scale.
    pub large_native_extent: f64,
    /// Cap on the number of points materialized from a single cloud.
    pub max_points: u64,
    /// Below this many plausible points the container heuristic gives up.
    pub min_container_points: usize,
    pub point_size: f32,
    /// Used for point clouds that carry no color attribute.
    pub point_color: [f32; 3],
    /// Used for meshes without a material or vertex colors.
    pub mesh_color: [f32; 3],
    /// Rotate survey/container clouds from Z-up to Y-up.
    pub points_z_up: bool,
    /// Prefer RGB stored in LAS records over the synthetic height ramp.
    pub use_embedded_point_color: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            target_size: 5.0,
            min_visual_extent: 0.1,
            max_visual_extent: 100.0,
            large_native_extent: 10.0,
            max_points: 1_000_000,
            min_container_points: 100,
            point_size: 0.02,
            point_color: [0.0, 0.667, 1.0],
            mesh_color: [0.8, 0.8, 0.8],
            points_z_up: true,
            use_embedded_point_color: true,
        }
    }
}

/// Thresholds of the shared auto-scale policy for one load.
///
/// There is exactly one policy. Formats that commonly ship at a large native
/// scale are only ever scaled down: their lower threshold is zero.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalePolicy {
    pub lower: f64,
    pub upper: f64,
    pub target: f64,
}

impl ScalePolicy {
    pub fn for_format(format: AssetFormat, config: &LoaderConfig) -> Self {
        let (lower, upper) = match format {
            AssetFormat::AnimatedMesh
            | AssetFormat::PointCloudSurvey
            | AssetFormat::PointCloudContainer => (0.0, config.large_native_extent),
            _ => (config.min_visual_extent, config.max_visual_extent),
        };
        Self {
            lower,
            upper,
            target: config.target_size,
        }
    }

    /// Uniform factor to apply for an asset whose largest extent is `max_dim`.
    ///
    /// `None` means "leave the scale alone", which includes degenerate assets.
    pub fn scale_for(&self, max_dim: f64) -> Option<f64> {
        if !max_dim.is_finite() || max_dim <= 0.0 {
            return None;
        }
        if max_dim < self.lower || max_dim > self.upper {
            Some(self.target / max_dim)
        } else {
            None
        }
    }
}
