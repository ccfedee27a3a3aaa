//! Fetching raw bytes and preparing the resources decoders depend on.
//!
//! - `textures` decodes texture sidecars concurrently and resolves fuzzy references
//! - `animation` holds keyframe data read from animated formats

use std::path::PathBuf;

use crate::{
    cancellation::CancellationToken,
    error::LoadError,
    format::{file_name_of, strip_fragment},
    progress::ProgressReporter,
};

pub mod animation;
pub mod textures;

/// Largest buffer reserved up front from an announced `Content-Length`.
#[cfg(not(target_arch = "wasm32"))]
const MAX_PREALLOCATION: u64 = 64 << 20;

/// Capacity to reserve for a download; the header is not trusted beyond [`MAX_PREALLOCATION`].
#[cfg(not(target_arch = "wasm32"))]
fn initial_capacity(content_length: Option<u64>) -> usize {
    content_length.unwrap_or(0).min(MAX_PREALLOCATION) as usize
}

/// Where the primary file of a load comes from.
#[derive(Clone, Debug)]
pub enum AssetSource {
    /// Bytes already in memory, e.g. a file picked by the user.
    Bytes { name: String, bytes: Vec<u8> },
    /// A local file (native targets only).
    Path(PathBuf),
    /// A URL, possibly signed (`?token=`) or hinted (`#name.ext`).
    Url(String),
}

impl AssetSource {
    pub fn bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::Bytes {
            name: name.into(),
            bytes,
        }
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    /// The name used for format detection.
    pub fn detection_name(&self) -> String {
        match self {
            Self::Bytes { name, .. } => name.clone(),
            Self::Path(path) => path.to_string_lossy().into_owned(),
            Self::Url(url) => url.clone(),
        }
    }

    /// Short name for logs and labels.
    pub fn display_name(&self) -> String {
        match self {
            Self::Url(url) => {
                // Prefer the hint: object-store handles have no useful path
                match url.split_once('#') {
                    Some((_, hint)) if !hint.is_empty() => hint.to_string(),
                    _ => file_name_of(url).to_string(),
                }
            }
            other => file_name_of(&other.detection_name()).to_string(),
        }
    }
}

/// Loads the bytes of `source`, reporting download progress.
pub async fn load_binary(
    source: AssetSource,
    progress: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, LoadError> {
    cancel.checkpoint()?;
    let data = match source {
        AssetSource::Bytes { bytes, .. } => bytes,
        AssetSource::Path(path) => read_file(path).await?,
        AssetSource::Url(url) => fetch_url(&url, progress, cancel).await?,
    };
    progress.complete_stage();
    Ok(data)
}

#[cfg(not(target_arch = "wasm32"))]
async fn read_file(path: PathBuf) -> Result<Vec<u8>, LoadError> {
    log::debug!("Reading {}", path.display());
    Ok(tokio::fs::read(path).await?)
}

#[cfg(target_arch = "wasm32")]
async fn read_file(path: PathBuf) -> Result<Vec<u8>, LoadError> {
    Err(LoadError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("cannot read {} from the browser, pass the bytes instead", path.display()),
    )))
}

async fn fetch_url(
    url: &str,
    progress: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, LoadError> {
    // The fragment only hints the extension and must stay local
    let request_url = strip_fragment(url);
    let network_failure = |status: Option<u16>, message: String| LoadError::NetworkFailure {
        url: request_url.to_string(),
        status,
        message,
    };
    log::info!("Fetching {request_url}");
    let response = reqwest::get(request_url)
        .await
        .map_err(|e| network_failure(e.status().map(|s| s.as_u16()), e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(network_failure(
            Some(status.as_u16()),
            format!("server responded with {status}"),
        ));
    }
    let announced = response.content_length();
    let total = announced.unwrap_or(0);

    #[cfg(not(target_arch = "wasm32"))]
    let data = {
        let mut response = response;
        let mut data = Vec::with_capacity(initial_capacity(announced));
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| network_failure(None, e.to_string()))?
        {
            cancel.checkpoint()?;
            data.extend_from_slice(&chunk);
            progress.update(data.len() as u64, total);
        }
        data
    };
    #[cfg(target_arch = "wasm32")]
    let data = {
        let data = response
            .bytes()
            .await
            .map_err(|e| network_failure(None, e.to_string()))?
            .to_vec();
        cancel.checkpoint()?;
        progress.update(data.len() as u64, total);
        data
    };

    log::debug!("Fetched {} bytes from {request_url}", data.len());
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_come_from_the_hint_or_the_path() {
        let source = AssetSource::url("https://store.example.com/objects/8c1f?sig=1#scan.e57");
        assert_eq!(source.display_name(), "scan.e57");
        assert_eq!(source.detection_name(), "https://store.example.com/objects/8c1f?sig=1#scan.e57");

        let source = AssetSource::url("https://x/y/model.glb?token=abc");
        assert_eq!(source.display_name(), "model.glb");

        let source = AssetSource::bytes("cloud.las", vec![1, 2, 3]);
        assert_eq!(source.display_name(), "cloud.las");
    }

    #[test]
    fn announced_lengths_only_reserve_a_bounded_buffer() {
        assert_eq!(initial_capacity(None), 0);
        assert_eq!(initial_capacity(Some(1024)), 1024);
        assert_eq!(initial_capacity(Some(u64::MAX)), 64 << 20);
    }

    #[tokio::test]
    async fn in_memory_bytes_pass_through() {
        let mut progress = ProgressReporter::silent();
        let bytes = load_binary(
            AssetSource::bytes("a.ply", vec![7; 4]),
            &mut progress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(bytes, vec![7; 4]);
    }

    #[tokio::test]
    async fn missing_files_are_io_errors() {
        let mut progress = ProgressReporter::silent();
        let err = load_binary(
            AssetSource::path("/definitely/not/here.las"),
            &mut progress,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[tokio::test]
    async fn cancelled_loads_stop_before_reading() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = load_binary(
            AssetSource::bytes("a.ply", vec![]),
            &mut ProgressReporter::silent(),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LoadError::Cancelled));
    }
}
