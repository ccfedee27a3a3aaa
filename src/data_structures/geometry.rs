//! CPU-side vertex data produced by the decoders.

use crate::data_structures::bounds::Bounds;

/// Interleaved vertex layout handed to renderers.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coords: [f32; 2],
    pub color: [f32; 3],
}

/// Vertex attributes of one mesh or point set.
///
/// Optional attributes are either empty or exactly as long as `positions`.
#[derive(Debug, Default)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tex_coords: Vec<[f32; 2]>,
    pub colors: Vec<[f32; 3]>,
    /// Triangle list; `None` for point sets and non-indexed meshes.
    pub indices: Option<Vec<u32>>,
    #[cfg(feature = "gpu")]
    pub(crate) gpu: Option<crate::gpu::GpuGeometry>,
}

impl Geometry {
    pub fn points(positions: Vec<[f32; 3]>, colors: Vec<[f32; 3]>) -> Self {
        Self {
            positions,
            colors,
            ..Default::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_colors(&self) -> bool {
        !self.colors.is_empty() && self.colors.len() == self.positions.len()
    }

    pub fn is_released(&self) -> bool {
        self.positions.is_empty() && self.indices.is_none()
    }

    /// Bounds of the raw positions, without any node transform.
    pub fn local_bounds(&self) -> Bounds {
        Bounds::from_points(
            self.positions
                .iter()
                .map(|p| [f64::from(p[0]), f64::from(p[1]), f64::from(p[2])]),
        )
    }

    /// Drops indices that point past the vertex array and incomplete triangles.
    pub fn sanitize_indices(&mut self) -> usize {
        let count = self.positions.len() as u32;
        let Some(indices) = self.indices.as_mut() else {
            return 0;
        };
        let before = indices.len();
        let kept: Vec<u32> = indices
            .chunks_exact(3)
            .filter(|tri| tri.iter().all(|i| *i < count))
            .flatten()
            .copied()
            .collect();
        *indices = kept;
        before - indices.len()
    }

    /**
     * Many source files come without normals so they have to be calculated for
     * lighting to work. Face normals are accumulated per vertex and averaged.
     */
    pub fn compute_normals(&mut self) {
        let mut normals = vec![cgmath::Vector3::new(0.0f32, 0.0, 0.0); self.positions.len()];
        if let Some(indices) = &self.indices {
            for c in indices.chunks_exact(3) {
                let (i0, i1, i2) = (c[0] as usize, c[1] as usize, c[2] as usize);
                if i0 >= normals.len() || i1 >= normals.len() || i2 >= normals.len() {
                    continue;
                }
                let pos0: cgmath::Vector3<_> = self.positions[i0].into();
                let pos1: cgmath::Vector3<_> = self.positions[i1].into();
                let pos2: cgmath::Vector3<_> = self.positions[i2].into();

                // Unnormalized, so larger triangles weigh more
                let face = (pos1 - pos0).cross(pos2 - pos0);
                normals[i0] += face;
                normals[i1] += face;
                normals[i2] += face;
            }
        }
        self.normals = normals
            .into_iter()
            .map(|n| {
                let len = (n.x * n.x + n.y * n.y + n.z * n.z).sqrt();
                if len > f32::EPSILON {
                    [n.x / len, n.y / len, n.z / len]
                } else {
                    [0.0, 1.0, 0.0]
                }
            })
            .collect();
    }

    pub fn to_vertices(&self) -> Vec<ModelVertex> {
        (0..self.positions.len())
            .map(|i| ModelVertex {
                position: self.positions[i],
                normal: self.normals.get(i).copied().unwrap_or_default(),
                tex_coords: self.tex_coords.get(i).copied().unwrap_or_default(),
                color: self.colors.get(i).copied().unwrap_or([1.0; 3]),
            })
            .collect()
    }

    /// Frees the vertex data (and GPU buffers, if uploaded).
    ///
    /// Returns whether anything was held.
    pub fn release(&mut self) -> bool {
        #[allow(unused_mut)]
        let mut held = !self.is_released();
        #[cfg(feature = "gpu")]
        if let Some(gpu) = self.gpu.take() {
            gpu.destroy();
            held = true;
        }
        self.positions = Vec::new();
        self.normals = Vec::new();
        self.tex_coords = Vec::new();
        self.colors = Vec::new();
        self.indices = None;
        held
    }
}
