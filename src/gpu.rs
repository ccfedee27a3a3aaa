//! Uploading decoded assets to the GPU (feature `gpu`).
//!
//! Buffers and textures created here are owned by the asset's geometries and
//! textures, so [`crate::dispose`] destroys them together with the CPU data.

use wgpu::util::DeviceExt;

use crate::data_structures::{
    asset::DecodedAsset, geometry::Geometry, material::TextureSlot, scene_graph::visit_mut,
    texture::Texture,
};

/// Vertex and index buffers of one geometry.
#[derive(Debug)]
pub struct GpuGeometry {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: Option<wgpu::Buffer>,
    /// Indices to draw, or vertices for non-indexed geometry.
    pub num_elements: u32,
}

impl GpuGeometry {
    pub fn new(device: &wgpu::Device, geometry: &Geometry, label: &str) -> Self {
        let vertices = geometry.to_vertices();
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Vertex Buffer", label)),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = geometry.indices.as_ref().map(|indices| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{} Index Buffer", label)),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            })
        });
        let num_elements = geometry
            .indices
            .as_ref()
            .map_or(vertices.len(), Vec::len) as u32;
        Self {
            vertex_buffer,
            index_buffer,
            num_elements,
        }
    }

    pub fn destroy(self) {
        self.vertex_buffer.destroy();
        if let Some(buffer) = self.index_buffer {
            buffer.destroy();
        }
    }
}

/// Creates the GPU copy of `texture` unless it already has one.
pub fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &Texture,
    is_normal_map: bool,
) -> bool {
    let mut slot = texture.gpu.lock();
    if slot.is_some() || texture.width == 0 || texture.height == 0 {
        return false;
    }
    let size = wgpu::Extent3d {
        width: texture.width,
        height: texture.height,
        depth_or_array_layers: 1,
    };
    let format = if is_normal_map {
        wgpu::TextureFormat::Rgba8Unorm
    } else {
        wgpu::TextureFormat::Rgba8UnormSrgb
    };
    let gpu_texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(&texture.name),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture: &gpu_texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
        },
        &texture.rgba,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * texture.width),
            rows_per_image: Some(texture.height),
        },
        size,
    );
    *slot = Some(gpu_texture);
    true
}

/// What [`upload`] created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub geometries: usize,
    pub textures: usize,
}

/// Uploads every geometry and texture of `asset` that is not on the GPU yet.
pub fn upload(asset: &mut DecodedAsset, device: &wgpu::Device, queue: &wgpu::Queue) -> UploadReport {
    let mut report = UploadReport::default();
    visit_mut(asset.root.as_mut(), &mut |node| {
        let name = node.name().to_string();
        if let Some(node) = node.as_geometry_mut() {
            let geometry = node.geometry_mut();
            if geometry.gpu.is_none() && !geometry.is_released() {
                let uploaded = GpuGeometry::new(device, geometry, &name);
                geometry.gpu = Some(uploaded);
                report.geometries += 1;
            }
        }
        if let Some(node) = node.as_material() {
            for (slot, texture) in node.material().maps() {
                let is_normal_map = matches!(slot, TextureSlot::Normal | TextureSlot::Bump);
                if upload_texture(device, queue, texture, is_normal_map) {
                    report.textures += 1;
                }
            }
        }
    });
    log::debug!(
        "Uploaded {}: {} geometries, {} textures",
        asset.root.name(),
        report.geometries,
        report.textures
    );
    report
}
