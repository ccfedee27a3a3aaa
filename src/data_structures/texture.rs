//! Decoded textures.
//!
//! This module provides [`Texture`], RGBA8 pixel data decoded from image file
//! bytes. Textures are shared between materials through `Arc`; the optional
//! GPU copy (feature `gpu`) is created by [`crate::gpu`] and destroyed by the
//! disposal manager.

use anyhow::*;
use image::{GenericImageView, ImageFormat, load_from_memory_with_format};

/// A decoded image ready to be bound to a material slot.
#[derive(Debug)]
pub struct Texture {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    #[cfg(feature = "gpu")]
    pub(crate) gpu: parking_lot::Mutex<Option<wgpu::Texture>>,
}

impl Texture {
    /// Load a texture from raw byte data (image file contents).
    ///
    /// # Arguments
    ///
    /// * `bytes` represent raw image file data (PNG, JPEG, etc.)
    /// * `label` is the name the texture is registered under
    /// * `format`  is an optional file extension hint (e.g., "png"). If None, auto-detect.
    pub fn from_bytes(bytes: &[u8], label: &str, format: Option<&str>) -> Result<Self> {
        let img = match format.and_then(ImageFormat::from_extension) {
            None => image::load_from_memory(bytes)
                .with_context(|| format!("could not decode image {label}"))?,
            Some(fmt) => load_from_memory_with_format(bytes, fmt)
                .or_else(|_| image::load_from_memory(bytes))
                .with_context(|| format!("could not decode image {label}"))?,
        };
        Ok(Self::from_image(&img, label))
    }

    pub fn from_image(img: &image::DynamicImage, label: &str) -> Self {
        let dimensions = img.dimensions();
        Self::from_rgba(label, dimensions.0, dimensions.1, img.to_rgba8().into_raw())
    }

    pub fn from_rgba(label: &str, width: u32, height: u32, rgba: Vec<u8>) -> Self {
        Self {
            name: label.to_string(),
            width,
            height,
            rgba,
            #[cfg(feature = "gpu")]
            gpu: parking_lot::Mutex::new(None),
        }
    }

    /// A 1x1 texture of a single colour.
    pub fn solid(label: &str, rgba: [u8; 4]) -> Self {
        Self::from_rgba(label, 1, 1, rgba.to_vec())
    }

    /// Destroys the GPU copy, if one was uploaded.
    pub fn release_gpu(&self) -> bool {
        #[cfg(feature = "gpu")]
        if let Some(texture) = self.gpu.lock().take() {
            texture.destroy();
            return true;
        }
        false
    }
}
