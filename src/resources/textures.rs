//! Texture preloading and fuzzy name resolution.
//!
//! Material files reference textures by whatever path the exporting tool
//! happened to use (`C:\Users\x\textures\Wood_Diffuse.PNG`, `./wood_diffuse.png`,
//! `wood_diffuse`). Uploaded sidecars carry the names the user's file system
//! or an object store gave them. [`NameIndex`] bridges the two: every entry is
//! registered under several keys and looked up with decreasing strictness.

use std::{cmp::Reverse, collections::HashMap, sync::Arc};

use futures::stream::{FuturesUnordered, StreamExt};

use crate::{
    cancellation::CancellationToken, data_structures::texture::Texture, error::LoadError,
    format::extension_of, progress::ProgressReporter,
};

/// Separator the upload store puts between its timestamp and the original name.
const STORAGE_PREFIX_SEPARATOR: &str = "________";
/// Shorter stems never take part in the containment fallback.
const MIN_CONTAINED_STEM: usize = 3;

/// Name lookup with case-insensitive, basename, extension-less and substring fallbacks.
#[derive(Clone, Debug)]
pub struct NameIndex<T> {
    keys: HashMap<String, usize>,
    /// Lower-cased stem of each entry, for the containment fallback.
    entries: Vec<(String, T)>,
}

pub type TextureLibrary = NameIndex<Arc<Texture>>;

fn basename(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

fn stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

fn without_storage_prefix(name: &str) -> Option<&str> {
    name.rsplit_once(STORAGE_PREFIX_SEPARATOR)
        .map(|(_, original)| original)
        .filter(|original| !original.is_empty())
}

impl<T> NameIndex<T> {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, value)| value)
    }

    /// Registers `value` under the original name, the lower-cased name, the
    /// basename and the extension-less basename.
    ///
    /// Earlier entries keep keys they share with later ones.
    pub fn insert(&mut self, name: &str, value: T) {
        let idx = self.entries.len();
        let base = basename(name);
        let original = without_storage_prefix(base).unwrap_or(base);
        let lower_base = original.to_lowercase();
        let lower_stem = stem(&lower_base).to_string();

        let mut keys = vec![
            name.to_string(),
            name.to_lowercase(),
            base.to_lowercase(),
            lower_base.clone(),
            lower_stem.clone(),
        ];
        if original != base {
            keys.push(original.to_string());
        }
        for key in keys {
            self.keys.entry(key).or_insert(idx);
        }
        self.entries.push((lower_stem, value));
    }

    /// Finds the entry a reference most likely means.
    ///
    /// Tried in order: exact name, case-insensitive name, basename,
    /// extension-less basename, then substring containment of the stems.
    /// Among containment matches the longest shared stem wins, then the
    /// earliest entry.
    pub fn resolve(&self, reference: &str) -> Option<&T> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        let lower = reference.to_lowercase();
        let lower_base = basename(&lower);
        let lower_stem = stem(lower_base);
        let idx = [reference, lower.as_str(), lower_base, lower_stem]
            .into_iter()
            .find_map(|key| self.keys.get(key).copied())
            .or_else(|| self.contained(lower_stem))?;
        self.entries.get(idx).map(|(_, value)| value)
    }

    fn contained(&self, stem: &str) -> Option<usize> {
        if stem.chars().count() < MIN_CONTAINED_STEM {
            return None;
        }
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, (entry_stem, _))| entry_stem.chars().count() >= MIN_CONTAINED_STEM)
            .filter_map(|(idx, (entry_stem, _))| {
                let overlap = if entry_stem.contains(stem) {
                    stem.len()
                } else if stem.contains(entry_stem.as_str()) {
                    entry_stem.len()
                } else {
                    return None;
                };
                Some((overlap, Reverse(idx)))
            })
            .max()
            .map(|(_, Reverse(idx))| idx)
    }
}

impl<T> Default for NameIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Textures decoded from sidecars plus the problems met on the way.
#[derive(Debug, Default)]
pub struct PreloadedTextures {
    pub library: TextureLibrary,
    /// One message per texture that failed to decode.
    pub failures: Vec<String>,
}

/// Decodes all `files` concurrently.
///
/// A texture that fails to decode is logged and skipped; it does not abort the
/// batch. Progress is reported as completed/total over the current stage.
pub async fn preload_textures(
    files: Vec<(String, Vec<u8>)>,
    progress: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> Result<PreloadedTextures, LoadError> {
    let total = files.len() as u64;
    let mut preloaded = PreloadedTextures::default();
    if total == 0 {
        progress.complete_stage();
        return Ok(preloaded);
    }
    let start = instant::Instant::now();

    let mut pending: FuturesUnordered<_> = files
        .into_iter()
        .map(|(name, bytes)| decode_texture(name, bytes))
        .collect();

    let mut completed = 0;
    while let Some((name, result)) = pending.next().await {
        cancel.checkpoint()?;
        completed += 1;
        match result {
            Ok(texture) => {
                log::debug!("Decoded texture {name} ({}x{})", texture.width, texture.height);
                preloaded.library.insert(&name, Arc::new(texture));
            }
            Err(e) => {
                log::warn!("Skipping texture {name}: {e:#}");
                preloaded.failures.push(format!("texture {name} could not be decoded: {e:#}"));
            }
        }
        progress.update(completed, total);
    }
    log::info!(
        "Preloaded {}/{} textures in {:?}",
        preloaded.library.len(),
        total,
        start.elapsed()
    );
    Ok(preloaded)
}

async fn decode_texture(name: String, bytes: Vec<u8>) -> (String, anyhow::Result<Texture>) {
    let hint = extension_of(&name);

    #[cfg(not(target_arch = "wasm32"))]
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        let label = name.clone();
        let joined = handle
            .spawn_blocking(move || Texture::from_bytes(&bytes, &label, hint.as_deref()))
            .await;
        let result = joined.unwrap_or_else(|e| Err(anyhow::anyhow!("decode task failed: {e}")));
        return (name, result);
    }

    let result = Texture::from_bytes(&bytes, &name, hint.as_deref());
    (name, result)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn png(rgba: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(1, 1, image::Rgba(rgba));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn resolves_with_decreasing_strictness() {
        let mut index = NameIndex::new();
        index.insert("Wood_Diffuse.PNG", 1);
        index.insert("metal_normal.jpg", 2);
        index.insert("1712345678________Brick Albedo.png", 3);

        assert_eq!(index.resolve("Wood_Diffuse.PNG"), Some(&1));
        assert_eq!(index.resolve("textures/wood_diffuse.png"), Some(&1));
        assert_eq!(index.resolve("C:\\export\\WOOD_DIFFUSE.tga"), Some(&1));
        assert_eq!(index.resolve("metal_normal"), Some(&2));
        assert_eq!(index.resolve("maps/metal_normal_4k.jpg"), Some(&2));
        assert_eq!(index.resolve("Brick Albedo.png"), Some(&3));
        assert_eq!(index.resolve("stone.png"), None);
        assert_eq!(index.resolve(""), None);
    }

    #[test]
    fn short_stems_do_not_match_by_containment() {
        let mut index = NameIndex::new();
        index.insert("a.png", 1);
        index.insert("textures_x_diffuse.png", 2);
        assert_eq!(index.resolve("board.png"), None);
        assert_eq!(index.resolve("x.png"), None);
        assert_eq!(index.resolve("a.png"), Some(&1));
    }

    #[test]
    fn containment_prefers_the_longest_stem() {
        let mut index = NameIndex::new();
        index.insert("wood.png", 1);
        index.insert("wood_diffuse.png", 2);
        index.insert("wood_dif.png", 3);
        assert_eq!(index.resolve("old_wood_diffuse_2k.png"), Some(&2));
        assert_eq!(index.resolve("oak_wood_dark.jpg"), Some(&1));
    }

    #[test]
    fn first_registration_keeps_shared_keys() {
        let mut index = NameIndex::new();
        index.insert("a/wall.png", "first");
        index.insert("b/wall.png", "second");
        assert_eq!(index.resolve("wall.png"), Some(&"first"));
        assert_eq!(index.resolve("b/wall.png"), Some(&"second"));
    }

    #[tokio::test]
    async fn preload_skips_broken_textures() {
        let files = vec![
            ("red.png".to_string(), png([255, 0, 0, 255])),
            ("broken.png".to_string(), b"nope".to_vec()),
            ("blue.png".to_string(), png([0, 0, 255, 255])),
        ];
        let preloaded = preload_textures(files, &mut ProgressReporter::silent(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(preloaded.library.len(), 2);
        assert_eq!(preloaded.failures.len(), 1);
        let red = preloaded.library.resolve("RED.PNG").unwrap();
        assert_eq!(red.rgba, vec![255, 0, 0, 255]);
    }

    #[tokio::test]
    async fn preload_reports_completed_over_total() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut progress = ProgressReporter::new(Some(Box::new(move |p: crate::progress::LoadProgress| {
            sink.lock().unwrap().push((p.loaded, p.total, p.percent))
        })));
        progress.set_window(20, 60);
        let files = vec![
            ("a.png".to_string(), png([1, 0, 0, 255])),
            ("b.png".to_string(), png([2, 0, 0, 255])),
            ("broken.png".to_string(), b"nope".to_vec()),
            ("d.png".to_string(), png([4, 0, 0, 255])),
        ];
        preload_textures(files, &mut progress, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, 4, 30), (2, 4, 40), (3, 4, 50), (4, 4, 60)]
        );
    }

    #[test]
    fn preload_works_without_a_runtime() {
        let preloaded = futures::executor::block_on(preload_textures(
            vec![("only.png".to_string(), png([1, 2, 3, 4]))],
            &mut ProgressReporter::silent(),
            &CancellationToken::new(),
        ))
        .unwrap();
        assert_eq!(preloaded.library.len(), 1);
    }
}
