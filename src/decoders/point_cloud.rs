//! Shared assembly of point clouds for the survey and container decoders.
//!
//! Survey coordinates easily reach millions of meters, far beyond what f32
//! can hold with centimeter precision. Points are therefore collected in f64,
//! centered in f64 and only then narrowed to f32 for the scene graph.

use crate::{
    config::LoaderConfig,
    data_structures::{
        asset::{AssetKind, AssetMetadata, DecodedAsset},
        bounds::Bounds,
        geometry::Geometry,
        instance::Instance,
        material::Material,
        scene_graph::{ContainerNode, PointsNode, SceneNode},
    },
    format::AssetFormat,
};

/// Every `stride`-th record is kept so at most `cap` points are materialized.
pub fn sample_stride(total: u64, cap: u64) -> u64 {
    if cap == 0 || total <= cap {
        return 1;
    }
    total.div_ceil(cap)
}

/// Visualization ramp over normalized height: blue, green, yellow, red.
pub fn height_to_color(normalized: f32) -> [f32; 3] {
    let t = if normalized.is_finite() {
        normalized.clamp(0.0, 1.0)
    } else {
        0.5
    };
    if t < 1.0 / 3.0 {
        let s = t * 3.0;
        [0.0, s, 1.0 - s]
    } else if t < 2.0 / 3.0 {
        let s = (t - 1.0 / 3.0) * 3.0;
        [s, 1.0, 0.0]
    } else {
        let s = (t - 2.0 / 3.0) * 3.0;
        [1.0, 1.0 - s, 0.0]
    }
}

pub struct PointCloudBuilder {
    points: Vec<[f64; 3]>,
    colors: Vec<[f32; 3]>,
    bounds: Bounds,
    missing_color: bool,
}

impl PointCloudBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
            colors: Vec::with_capacity(capacity),
            bounds: Bounds::new(),
            missing_color: false,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn push(&mut self, point: [f64; 3], color: Option<[f32; 3]>) {
        self.bounds.update(point[0], point[1], point[2]);
        self.points.push(point);
        match color {
            Some(color) => self.colors.push(color),
            None => {
                self.missing_color = true;
                self.colors.push([0.0; 3]);
            }
        }
    }

    /// Centers the points in f64 and wraps them into a points node.
    ///
    /// Points without an embedded color get the height ramp over the source
    /// Z axis. With `points_z_up` the root rotates Z-up data into Y-up.
    pub fn build(
        self,
        name: &str,
        format: AssetFormat,
        config: &LoaderConfig,
        mut metadata: AssetMetadata,
    ) -> DecodedAsset {
        let center = self.bounds.center();
        let use_ramp = self.missing_color || self.colors.len() != self.points.len();
        let colors = if use_ramp {
            self.points
                .iter()
                .map(|p| height_to_color(self.bounds.normalize(2, p[2])))
                .collect()
        } else {
            self.colors
        };
        let positions = self
            .points
            .iter()
            .map(|p| {
                [
                    (p[0] - center[0]) as f32,
                    (p[1] - center[1]) as f32,
                    (p[2] - center[2]) as f32,
                ]
            })
            .collect();

        metadata.point_count = self.points.len();
        metadata.vertex_count = self.points.len();
        metadata.is_geographic = self.bounds.looks_geographic();
        metadata.source_bounds = Some(self.bounds);
        if metadata.is_geographic {
            log::info!("{name}: coordinates look like longitude/latitude degrees");
        }
        log::debug!(
            "{name}: {} points centered at [{:.3}, {:.3}, {:.3}], height ramp: {use_ramp}",
            self.points.len(),
            center[0],
            center[1],
            center[2]
        );

        let geometry = Geometry::points(positions, colors);
        let material = Material::points(config.point_size, config.point_color, true);
        let points = PointsNode::new(name, geometry, material);
        let mut root = ContainerNode::new(name, vec![]);
        if config.points_z_up {
            root.set_local_transform(Instance::z_up_to_y_up());
        }
        root.add_child(Box::new(points));

        DecodedAsset {
            kind: AssetKind::PointCloud,
            root: Box::new(root),
            format,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::data_structures::scene_graph::world_bounds;

    #[test]
    fn stride_bounds_the_materialized_count() {
        assert_eq!(sample_stride(5, 1_000_000), 1);
        assert_eq!(sample_stride(1_000_000, 1_000_000), 1);
        assert_eq!(sample_stride(1_000_001, 1_000_000), 2);
        assert_eq!(sample_stride(10_000_000, 1_000_000), 10);
        let total = 2_500_001u64;
        let stride = sample_stride(total, 1_000_000);
        assert!(total.div_ceil(stride) <= 1_000_000);
    }

    #[test]
    fn ramp_runs_blue_to_red() {
        assert_eq!(height_to_color(0.0), [0.0, 0.0, 1.0]);
        assert_eq!(height_to_color(1.0), [1.0, 0.0, 0.0]);
        let mid = height_to_color(0.5);
        assert_relative_eq!(mid[0], 0.5, epsilon = 1e-5);
        assert_relative_eq!(mid[1], 1.0);
        assert_eq!(height_to_color(f32::NAN), height_to_color(0.5));
    }

    #[test]
    fn centers_large_coordinates_without_losing_precision() {
        let mut builder = PointCloudBuilder::with_capacity(2);
        builder.push([4_150_000.25, 312_000.5, 10.0], None);
        builder.push([4_150_002.25, 312_001.5, 12.0], Some([1.0, 0.0, 0.0]));
        let config = LoaderConfig {
            points_z_up: false,
            ..Default::default()
        };
        let asset = builder.build("cloud", AssetFormat::PointCloudSurvey, &config, AssetMetadata::default());
        assert_eq!(asset.kind, AssetKind::PointCloud);
        assert_eq!(asset.metadata.point_count, 2);
        assert!(!asset.metadata.is_geographic);

        let bounds = world_bounds(asset.root.as_ref());
        assert_eq!(bounds.min, [-1.0, -0.5, -1.0]);
        assert_eq!(bounds.max, [1.0, 0.5, 1.0]);

        // One point lacked a color, so the whole cloud uses the ramp
        let node = &asset.root.get_children()[0];
        let geometry = node.as_geometry().unwrap().geometry();
        assert_eq!(geometry.colors[0], [0.0, 0.0, 1.0]);
        assert_eq!(geometry.colors[1], [1.0, 0.0, 0.0]);
    }
}
