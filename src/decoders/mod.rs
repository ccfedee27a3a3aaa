//! Per-format decoders.
//!
//! Every decoder implements [`Decoder`] and declares exactly one
//! [`AssetFormat`]. The [`DecoderRegistry`] maps formats to decoders so the
//! orchestrator never matches on formats itself. Decoders return raw,
//! un-normalized scene graphs; centering and scaling happen afterwards in
//! [`crate::normalize`].

use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;

use crate::{
    cancellation::CancellationToken,
    config::LoaderConfig,
    data_structures::asset::{DecodedAsset, SidecarFile},
    error::LoadError,
    format::AssetFormat,
    progress::ProgressReporter,
};

pub mod bytes;
pub mod e57;
pub mod fbx;
pub mod gltf;
pub mod las;
pub mod obj;
pub mod ply;
pub mod point_cloud;

pub use self::{
    e57::E57Decoder, fbx::FbxDecoder, gltf::GltfDecoder, las::LasDecoder, obj::ObjDecoder,
    ply::PlyDecoder,
};

/// The primary file of a load and the sidecars supplied with it.
#[derive(Clone, Debug)]
pub struct DecodeInput {
    pub name: String,
    pub bytes: Vec<u8>,
    pub sidecars: Vec<SidecarFile>,
}

impl DecodeInput {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            sidecars: Vec::new(),
        }
    }

    pub fn with_sidecars(mut self, sidecars: Vec<SidecarFile>) -> Self {
        self.sidecars = sidecars;
        self
    }
}

/// Everything a decoder may consult besides its input.
pub struct DecodeContext<'a> {
    pub config: &'a LoaderConfig,
    pub progress: &'a mut ProgressReporter,
    pub cancel: &'a CancellationToken,
}

pub trait Decoder: Send + Sync {
    fn format(&self) -> AssetFormat;

    fn decode<'a>(
        &'a self,
        input: DecodeInput,
        ctx: DecodeContext<'a>,
    ) -> BoxFuture<'a, Result<DecodedAsset, LoadError>>;
}

/// Lookup table from format to decoder.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<AssetFormat, Arc<dyn Decoder>>,
}

impl DecoderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with one decoder for every [`AssetFormat`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GltfDecoder::new(AssetFormat::MeshInterchangeJson)));
        registry.register(Arc::new(GltfDecoder::new(AssetFormat::MeshInterchangeBinary)));
        registry.register(Arc::new(ObjDecoder));
        registry.register(Arc::new(FbxDecoder));
        registry.register(Arc::new(PlyDecoder));
        registry.register(Arc::new(LasDecoder));
        registry.register(Arc::new(E57Decoder));
        registry
    }

    /// Installs `decoder` for its format, returning the one it replaces.
    pub fn register(&mut self, decoder: Arc<dyn Decoder>) -> Option<Arc<dyn Decoder>> {
        self.decoders.insert(decoder.format(), decoder)
    }

    pub fn get(&self, format: AssetFormat) -> Option<Arc<dyn Decoder>> {
        self.decoders.get(&format).cloned()
    }

    pub fn formats(&self) -> impl Iterator<Item = AssetFormat> + '_ {
        self.decoders.keys().copied()
    }
}
