//! Data structures produced by the decoders.
//!
//! - `instance` holds per-node transformation data
//! - `bounds` tracks axis-aligned extents in f64
//! - `geometry` holds vertex attributes and indices
//! - `material` and `texture` describe surface appearance
//! - `scene_graph` enables hierarchical scene organization
//! - `asset` wraps a scene graph into the result of a load

pub mod asset;
pub mod bounds;
pub mod geometry;
pub mod instance;
pub mod material;
pub mod scene_graph;
pub mod texture;
