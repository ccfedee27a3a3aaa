//! Error taxonomy of the loading pipeline.
//!
//! Header, signature and network failures abort a load and surface as a
//! [`LoadError`]. Sidecar resolution problems never abort a load: they are
//! logged and recorded in [`AssetMetadata::warnings`](crate::data_structures::asset::AssetMetadata).

use thiserror::Error;

use crate::format::{AssetFormat, ConversionTarget};

/// Everything that can make a load fail.
///
/// The `Display` output is meant to be shown to the user verbatim (or mapped
/// to a localized equivalent by the caller).
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file name or URL carries no extension this pipeline can decode.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// The magic bytes at the start of the buffer are absent or wrong.
    #[error("{format} file has an invalid signature (expected {expected})")]
    MalformedSignature {
        format: AssetFormat,
        expected: &'static str,
    },

    /// The buffer is too small to hold the structure the decoder needs.
    #[error("{format} data is truncated: needed {needed} bytes but only {actual} are available")]
    TruncatedBuffer {
        format: AssetFormat,
        needed: usize,
        actual: usize,
    },

    /// The container heuristic recovered too few plausible points.
    #[error(
        "only {found} plausible points could be recovered (at least {required} needed); \
         convert the file with the conversion service ({target}) and load the result instead"
    )]
    InsufficientPoints {
        found: usize,
        required: usize,
        target: ConversionTarget,
    },

    /// A fetch returned a non-success status or failed in transit.
    #[error("failed to fetch {url}: {message}")]
    NetworkFailure {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// A referenced material or texture could not be matched to a supplied file.
    ///
    /// Never returned from a load; the message ends up in the asset's warnings.
    #[error("sidecar reference could not be resolved: {0}")]
    SidecarResolution(String),

    /// The format is only supported through the external conversion service.
    #[error("{format} cannot be displayed directly ({reason}); request a {target} conversion and load its output URL")]
    ConversionRequired {
        format: AssetFormat,
        target: ConversionTarget,
        reason: String,
    },

    /// The underlying parser rejected the data.
    #[error("failed to decode {format}: {message}")]
    Decode { format: AssetFormat, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The load was superseded and stopped at a cancellation checkpoint.
    #[error("load cancelled")]
    Cancelled,
}

impl LoadError {
    pub(crate) fn decode(format: AssetFormat, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            format,
            message: message.to_string(),
        }
    }

    pub(crate) fn truncated(format: AssetFormat, needed: usize, actual: usize) -> Self {
        Self::TruncatedBuffer {
            format,
            needed,
            actual,
        }
    }

    /// Whether the caller should route the upload through the conversion service.
    pub fn requires_conversion(&self) -> bool {
        matches!(
            self,
            Self::ConversionRequired { .. } | Self::InsufficientPoints { .. }
        )
    }

    /// The conversion job that would make this asset loadable, if any.
    pub fn conversion_target(&self) -> Option<ConversionTarget> {
        match self {
            Self::ConversionRequired { target, .. } | Self::InsufficientPoints { target, .. } => {
                Some(*target)
            }
            _ => None,
        }
    }
}
