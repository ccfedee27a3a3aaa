//! The load orchestrator.
//!
//! [`AssetLoader`] turns a [`LoadRequest`] into a normalized [`DecodedAsset`]:
//! it detects the format, fetches the bytes, dispatches to the registered
//! decoder and runs the normalizer. [`AssetSlot`] holds the one "current"
//! asset of a viewer and makes sure a superseded load never replaces a newer
//! one, and that the previous asset is disposed before its successor is
//! installed.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::{
    cancellation::CancellationToken,
    config::LoaderConfig,
    data_structures::asset::{DecodedAsset, SidecarFile},
    decoders::{DecodeContext, DecodeInput, DecoderRegistry},
    dispose::{DisposalReport, dispose, dispose_owned},
    error::LoadError,
    format::{AssetFormat, detect},
    normalize::normalize,
    progress::{ProgressCallback, ProgressReporter},
    resources::{AssetSource, load_binary},
};

/// Share of the percent range spent fetching when the bytes are not in memory yet.
const FETCH_WINDOW_END: u8 = 30;

/// Installs the `log` backend of the current target.
///
/// Safe to call more than once; later calls only print a warning.
pub fn init_logging() {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        if let Err(e) = console_log::init_with_level(log::Level::Info) {
            log::warn!("Could not initialize logger: {e}");
        }
    }
}

/// One asset to load, with the sidecar files supplied alongside it.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub source: AssetSource,
    pub sidecars: Vec<SidecarFile>,
    /// Overrides extension-based detection.
    pub format_hint: Option<AssetFormat>,
}

impl LoadRequest {
    pub fn new(source: AssetSource) -> Self {
        Self {
            source,
            sidecars: Vec::new(),
            format_hint: None,
        }
    }

    pub fn with_sidecars(mut self, sidecars: Vec<SidecarFile>) -> Self {
        self.sidecars = sidecars;
        self
    }

    pub fn with_format(mut self, format: AssetFormat) -> Self {
        self.format_hint = Some(format);
        self
    }
}

pub struct AssetLoader {
    config: LoaderConfig,
    registry: DecoderRegistry,
}

impl AssetLoader {
    /// A loader with a decoder for every supported format.
    pub fn new(config: LoaderConfig) -> Self {
        Self::with_registry(config, DecoderRegistry::with_defaults())
    }

    pub fn with_registry(config: LoaderConfig, registry: DecoderRegistry) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Loads, decodes and normalizes one asset.
    ///
    /// `on_progress` sees a non-decreasing percent sequence that ends with a
    /// single `100` if and only if the load succeeds.
    pub async fn load(
        &self,
        request: LoadRequest,
        on_progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<DecodedAsset, LoadError> {
        let start = instant::Instant::now();
        let LoadRequest {
            source,
            sidecars,
            format_hint,
        } = request;
        let name = source.display_name();
        let format = format_hint
            .or_else(|| detect(&source.detection_name()))
            .ok_or_else(|| LoadError::UnsupportedFormat(name.clone()))?;
        let decoder = self
            .registry
            .get(format)
            .ok_or_else(|| LoadError::UnsupportedFormat(format!("{name} ({format})")))?;
        log::info!("Loading {name} as {format} with {} sidecars", sidecars.len());

        let mut progress = ProgressReporter::new(on_progress);
        let bytes = match source {
            AssetSource::Bytes { bytes, .. } => {
                cancel.checkpoint()?;
                bytes
            }
            source => {
                progress.set_window(0, FETCH_WINDOW_END);
                let bytes = load_binary(source, &mut progress, cancel).await?;
                progress.set_window(FETCH_WINDOW_END, 100);
                bytes
            }
        };

        let size = bytes.len() as u64;
        log::debug!("Decoding {name}: {size} bytes");
        let input = DecodeInput::new(name.clone(), bytes).with_sidecars(sidecars);
        let ctx = DecodeContext {
            config: &self.config,
            progress: &mut progress,
            cancel,
        };
        let mut asset = decoder.decode(input, ctx).await?;
        cancel.checkpoint()?;
        if asset.format != format {
            log::warn!("Decoder for {format} reported {}", asset.format);
            asset.format = format;
        }
        normalize(&mut asset, &self.config);
        progress.finish(size);
        log::info!(
            "Loaded {name} ({format}, {:?}) in {:?}: {} vertices, {} points, {} warnings",
            asset.kind,
            start.elapsed(),
            asset.metadata.vertex_count,
            asset.metadata.point_count,
            asset.metadata.warnings.len()
        );
        Ok(asset)
    }

    /// Loads into `slot`, superseding whatever load the slot was waiting for.
    pub async fn load_into(
        &self,
        slot: &AssetSlot,
        request: LoadRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<InstallOutcome, LoadError> {
        let ticket = slot.begin();
        let asset = self.load(request, on_progress, ticket.token()).await?;
        Ok(slot.install(&ticket, asset))
    }
}

/// Identifies one load started on an [`AssetSlot`].
#[derive(Clone, Debug)]
pub struct LoadTicket {
    generation: u64,
    cancel: CancellationToken,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Fires once a newer load is started on the same slot.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The asset is now current; the previous one (if any) was disposed first.
    Installed { disposed: Option<DisposalReport> },
    /// A newer load was started meanwhile; the asset was disposed instead.
    Discarded { disposed: DisposalReport },
}

#[derive(Default)]
struct SlotState {
    asset: Option<DecodedAsset>,
    cancel: Option<CancellationToken>,
}

/// The single "current asset" of a viewer.
///
/// Dispose-before-install and the staleness check run under one lock, so
/// loads finishing concurrently for the same slot are serialized.
#[derive(Default)]
pub struct AssetSlot {
    generation: AtomicU64,
    state: Mutex<SlotState>,
}

impl AssetSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new load, cancelling the one in flight.
    pub fn begin(&self) -> LoadTicket {
        let mut state = self.state.lock();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(previous) = state.cancel.take() {
            previous.cancel();
        }
        let cancel = CancellationToken::new();
        state.cancel = Some(cancel.clone());
        LoadTicket { generation, cancel }
    }

    /// Whether `ticket` belongs to the most recently started load.
    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.generation.load(Ordering::Acquire) == ticket.generation
    }

    /// Installs `asset` unless a newer load was started after `ticket`.
    pub fn install(&self, ticket: &LoadTicket, mut asset: DecodedAsset) -> InstallOutcome {
        let mut state = self.state.lock();
        if !self.is_current(ticket) {
            log::info!(
                "Discarding stale result of load {} ({})",
                ticket.generation,
                asset.root.name()
            );
            return InstallOutcome::Discarded {
                disposed: dispose(&mut asset),
            };
        }
        let disposed = state.asset.take().map(dispose_owned);
        state.asset = Some(asset);
        state.cancel = None;
        InstallOutcome::Installed { disposed }
    }

    /// Runs `f` with the current asset.
    pub fn with_current<R>(&self, f: impl FnOnce(Option<&DecodedAsset>) -> R) -> R {
        let state = self.state.lock();
        f(state.asset.as_ref())
    }

    /// Removes the current asset without disposing of it.
    pub fn take(&self) -> Option<DecodedAsset> {
        self.state.lock().asset.take()
    }

    /// Disposes of the current asset and leaves the slot empty.
    pub fn clear(&self) -> Option<DisposalReport> {
        let mut state = self.state.lock();
        state.asset.take().map(dispose_owned)
    }
}
