//! Uploaded mesh geometry and its surfaces.

use std::sync::Arc;

use ember_rhi::buffer::AllocatedBuffer;
use ember_rhi::vk;

use crate::bounds::Bounds;
use crate::material::MaterialInstance;

/// GPU buffers for one mesh. Vertices are read in the shader through
/// `vertex_buffer_address`; indices are `u32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshBuffers {
    pub index_buffer: AllocatedBuffer,
    pub vertex_buffer: AllocatedBuffer,
    pub vertex_buffer_address: vk::DeviceAddress,
}

/// A range of the index buffer drawn with one material.
#[derive(Clone, Debug)]
pub struct GeoSurface {
    pub start_index: u32,
    pub count: u32,
    pub bounds: Bounds,
    pub material: Arc<MaterialInstance>,
}

#[derive(Clone, Debug)]
pub struct MeshAsset {
    pub name: String,
    pub surfaces: Vec<GeoSurface>,
    pub buffers: MeshBuffers,
}

impl MeshAsset {
    pub fn triangle_count(&self) -> u32 {
        self.surfaces.iter().map(|s| s.count / 3).sum()
    }
}
