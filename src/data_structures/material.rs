//! Materials and their texture slots.

use std::{collections::BTreeMap, sync::Arc};

use crate::data_structures::texture::Texture;

/// Every texture slot a material may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureSlot {
    Diffuse,
    Normal,
    Bump,
    Specular,
    Roughness,
    Metalness,
    AmbientOcclusion,
    Emissive,
}

#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,
    /// Linear RGBA multiplied with the diffuse map and vertex colors.
    pub base_color: [f32; 4],
    /// Use per-vertex colors from the geometry.
    pub vertex_colors: bool,
    /// Rendered size of points; `None` for surface materials.
    pub point_size: Option<f32>,
    maps: BTreeMap<TextureSlot, Arc<Texture>>,
}

impl Material {
    pub fn new(name: &str, base_color: [f32; 4]) -> Self {
        Self {
            name: name.to_string(),
            base_color,
            vertex_colors: false,
            point_size: None,
            maps: BTreeMap::new(),
        }
    }

    /// Neutral surface material for meshes that came without one.
    pub fn neutral(color: [f32; 3]) -> Self {
        Self::new("default", [color[0], color[1], color[2], 1.0])
    }

    pub fn points(size: f32, color: [f32; 3], vertex_colors: bool) -> Self {
        Self {
            vertex_colors,
            point_size: Some(size),
            ..Self::new("points", [color[0], color[1], color[2], 1.0])
        }
    }

    pub fn with_vertex_colors(mut self, vertex_colors: bool) -> Self {
        self.vertex_colors = vertex_colors;
        self
    }

    pub fn set_map(&mut self, slot: TextureSlot, texture: Arc<Texture>) {
        self.maps.insert(slot, texture);
    }

    pub fn map(&self, slot: TextureSlot) -> Option<&Arc<Texture>> {
        self.maps.get(&slot)
    }

    pub fn maps(&self) -> impl Iterator<Item = (TextureSlot, &Arc<Texture>)> {
        self.maps.iter().map(|(slot, texture)| (*slot, texture))
    }

    /// Empties every texture slot, destroying GPU copies on the way.
    ///
    /// Returns how many slots were occupied.
    pub fn release_maps(&mut self) -> usize {
        let released = self.maps.len();
        for texture in self.maps.values() {
            texture.release_gpu();
        }
        self.maps.clear();
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_clears_all_slots() {
        let texture = Arc::new(Texture::solid("white", [255; 4]));
        let mut material = Material::neutral([0.5; 3]);
        material.set_map(TextureSlot::Diffuse, texture.clone());
        material.set_map(TextureSlot::Emissive, texture.clone());
        assert_eq!(Arc::strong_count(&texture), 3);

        assert_eq!(material.release_maps(), 2);
        assert!(material.map(TextureSlot::Diffuse).is_none());
        assert_eq!(Arc::strong_count(&texture), 1);
    }
}
