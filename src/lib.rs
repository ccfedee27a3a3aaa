//! flow-spatial
//!
//! Turns user-supplied 3D and spatial files into normalized, renderer-agnostic
//! scene graphs. The crate detects the format of a file, decodes it with the
//! matching decoder, resolves sidecar files (materials, textures, external
//! buffers) by fuzzy name, centers and rescales the result and hands it back
//! as a [`DecodedAsset`]. It runs natively and on WASM.
//!
//! High-level modules
//! - `format`: format detection from names, paths and URLs
//! - `decoders`: one decoder per format (glTF/GLB, OBJ, FBX, PLY, LAS, E57)
//! - `resources`: fetching bytes and preloading texture sidecars
//! - `data_structures`: scene graph, geometry, materials and metadata
//! - `normalize`: the shared centering and auto-scale policy
//! - `dispose`: releasing an asset before its successor is installed
//! - `loader`: the orchestrator with progress reporting and stale-result suppression
//! - `exif`: GPS and camera metadata from JPEG/TIFF photos
//! - `gpu`: optional upload of decoded assets through wgpu (feature `gpu`)
//!

pub mod cancellation;
pub mod config;
pub mod data_structures;
pub mod decoders;
pub mod dispose;
pub mod error;
pub mod exif;
pub mod format;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod loader;
pub mod normalize;
pub mod progress;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use cancellation::CancellationToken;
pub use config::LoaderConfig;
pub use data_structures::asset::{AssetKind, AssetMetadata, DecodedAsset, SidecarFile};
pub use error::LoadError;
pub use format::{AssetFormat, ConversionTarget, detect};
pub use loader::{AssetLoader, AssetSlot, InstallOutcome, LoadRequest, init_logging};
pub use progress::{LoadProgress, ProgressCallback};
pub use resources::AssetSource;
