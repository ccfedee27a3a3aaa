use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use flow_spatial::{
    AssetFormat, AssetKind, AssetLoader, AssetSlot, AssetSource, CancellationToken, ConversionTarget,
    InstallOutcome, LoadError, LoadProgress, LoadRequest, LoaderConfig, ProgressCallback,
    SidecarFile,
    data_structures::{
        asset::PointLayout,
        material::TextureSlot,
        scene_graph::{SceneNode, world_bounds},
    },
};

use crate::common::fixtures;

mod common;

fn loader() -> AssetLoader {
    flow_spatial::init_logging();
    AssetLoader::new(LoaderConfig::default())
}

fn assert_centered(root: &dyn SceneNode, expected_max: f64) {
    let bounds = world_bounds(root);
    for c in bounds.center() {
        assert_relative_eq!(c, 0.0, epsilon = 1e-4);
    }
    assert_relative_eq!(bounds.max_dimension(), expected_max, epsilon = 1e-3);
}

#[tokio::test]
async fn survey_points_are_centered_without_rescaling() {
    let data = fixtures::las(&[
        [-100, -100, -100],
        [100, 100, 100],
        [0, 0, 0],
        [50, -50, 20],
        [-20, 30, -100],
    ]);
    let request = LoadRequest::new(AssetSource::bytes("site.las", data));
    let asset = loader()
        .load(request, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(asset.kind, AssetKind::PointCloud);
    assert_eq!(asset.format, AssetFormat::PointCloudSurvey);
    assert_eq!(asset.metadata.point_count, 5);
    assert_eq!(asset.metadata.normalization.unwrap().scale, 1.0);
    assert_centered(asset.root.as_ref(), 2.0);
}

#[tokio::test]
async fn tiny_survey_clouds_keep_their_native_scale() {
    let data = fixtures::las(&[[-4, -4, -4], [4, 4, 4], [0, 0, 0], [2, -2, 1], [-1, 3, -4]]);
    let request = LoadRequest::new(AssetSource::bytes("bench.las", data));
    let asset = loader()
        .load(request, None, &CancellationToken::new())
        .await
        .unwrap();

    let normalization = asset.metadata.normalization.unwrap();
    assert_eq!(normalization.scale, 1.0);
    assert_relative_eq!(normalization.max_dimension, 0.08, epsilon = 1e-6);
    assert_centered(asset.root.as_ref(), 0.08);
}

#[tokio::test]
async fn cancelling_from_the_progress_callback_stops_a_survey_scan() {
    let points: Vec<[i32; 3]> = (0..70_000).map(|i| [i % 1000, i / 1000, i % 7]).collect();
    let data = fixtures::las(&points);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let on_progress: ProgressCallback = Box::new(move |p: LoadProgress| {
        sink.lock().unwrap().push(p.percent);
        trigger.cancel();
    });

    let err = loader()
        .load(
            LoadRequest::new(AssetSource::bytes("block.las", data)),
            Some(on_progress),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Cancelled), "{err}");
    // The scan stopped at its next checkpoint, before finishing the stage
    assert_eq!(*seen.lock().unwrap(), vec![0]);
}

#[tokio::test]
async fn textured_obj_binds_sidecars_and_reports_progress() {
    let obj = "mtllib house.mtl\nv 0 0 0\nv 2 0 0\nv 0 0 2\nvt 0 0\nvt 1 0\nvt 0 1\nusemtl wood\nf 1/1 2/2 3/3\n";
    let mtl = "newmtl wood\nKd 1 1 1\nmap_Kd textures/wood_diffuse.png\n";
    let request = LoadRequest::new(AssetSource::bytes("house.obj", obj.as_bytes().to_vec()))
        .with_sidecars(vec![
            SidecarFile::new("house.mtl", mtl.as_bytes().to_vec()),
            SidecarFile::new("Wood_Diffuse.PNG", fixtures::png(4, 2)),
        ]);
    let (seen, sink) = fixtures::progress_recorder();
    let asset = loader()
        .load(request, Some(sink), &CancellationToken::new())
        .await
        .unwrap();

    assert!(asset.metadata.warnings.is_empty(), "{:?}", asset.metadata.warnings);
    let mesh = &asset.root.get_children()[0];
    let diffuse = mesh
        .as_material()
        .unwrap()
        .material()
        .map(TextureSlot::Diffuse)
        .unwrap();
    assert_eq!((diffuse.width, diffuse.height), (4, 2));
    assert_centered(asset.root.as_ref(), 2.0);

    let percents = fixtures::percents(&seen);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);
    assert_eq!(percents.last(), Some(&100));
}

#[tokio::test]
async fn tiny_gltf_scenes_are_scaled_up() {
    let request = LoadRequest::new(AssetSource::bytes("tiny.glb", fixtures::glb_triangle(0.01)));
    let asset = loader()
        .load(request, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(asset.kind, AssetKind::Mesh);
    assert_eq!(asset.metadata.triangle_count, 1);
    assert_relative_eq!(asset.metadata.normalization.unwrap().scale, 500.0, epsilon = 0.1);
    assert_centered(asset.root.as_ref(), 5.0);
}

#[tokio::test]
async fn empty_e57_regions_ask_for_conversion() {
    let data = fixtures::e57(&[0u8; 12 * 400], "<e57Root/>");
    let request = LoadRequest::new(AssetSource::bytes("scan.e57", data));
    let (seen, sink) = fixtures::progress_recorder();
    let err = loader()
        .load(request, Some(sink), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.requires_conversion());
    assert_eq!(err.conversion_target(), Some(ConversionTarget::E57ToPly));
    assert!(matches!(err, LoadError::InsufficientPoints { found: 0, .. }));
    assert!(fixtures::percents(&seen).iter().all(|p| *p < 100));
}

#[tokio::test]
async fn float_e57_regions_are_recovered() {
    let mut region = Vec::new();
    for i in 0..200 {
        for v in [1.0 + i as f32 * 0.1, 2.0, 3.0] {
            region.extend_from_slice(&v.to_le_bytes());
        }
    }
    let request = LoadRequest::new(AssetSource::bytes("scan.e57", fixtures::e57(&region, "<e57Root/>")));
    let asset = loader()
        .load(request, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(asset.metadata.layout, Some(PointLayout::Float32Triples));
    assert_eq!(asset.metadata.point_count, 200);
    let bounds = world_bounds(asset.root.as_ref());
    for c in bounds.center() {
        assert_relative_eq!(c, 0.0, epsilon = 1e-4);
    }
}

#[tokio::test]
async fn unknown_files_are_rejected() {
    let request = LoadRequest::new(AssetSource::bytes("archive.zip", vec![0u8; 64]));
    let err = loader()
        .load(request, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::UnsupportedFormat(_)));
    assert!(!err.requires_conversion());
}

#[tokio::test]
async fn superseded_loads_never_replace_newer_ones() {
    let loader = loader();
    let slot = AssetSlot::new();
    let slow = slot.begin();
    let fast = slot.begin();
    assert!(slow.token().is_cancelled());

    let fast_asset = loader
        .load(
            LoadRequest::new(AssetSource::bytes("fast.glb", fixtures::glb_triangle(1.0))),
            None,
            fast.token(),
        )
        .await
        .unwrap();
    assert_eq!(
        slot.install(&fast, fast_asset),
        InstallOutcome::Installed { disposed: None }
    );

    // The slow load was already running when it got cancelled; its result is still dropped.
    let slow_asset = loader
        .load(
            LoadRequest::new(AssetSource::bytes("slow.las", fixtures::las(&[[0, 0, 0], [100, 0, 0]]))),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let outcome = slot.install(&slow, slow_asset);
    assert!(matches!(outcome, InstallOutcome::Discarded { disposed } if disposed.geometries == 1));
    slot.with_current(|asset| assert_eq!(asset.unwrap().format, AssetFormat::MeshInterchangeBinary));

    let next = loader
        .load_into(
            &slot,
            LoadRequest::new(AssetSource::bytes("next.las", fixtures::las(&[[0, 0, 0], [100, 0, 0]]))),
            None,
        )
        .await
        .unwrap();
    let InstallOutcome::Installed { disposed: Some(report) } = next else {
        panic!("expected the previous asset to be disposed, got {next:?}");
    };
    assert_eq!(report.geometries, 1);
    slot.with_current(|asset| assert_eq!(asset.unwrap().format, AssetFormat::PointCloudSurvey));
}
