//! Vertex and per-draw push constant layouts.
//!
//! Geometry is not fed through vertex input bindings. Vertices live in a
//! storage buffer that the vertex shader reads through a buffer device
//! address, which arrives in [`DrawPushConstants`] together with the world
//! matrix of the draw.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

/// Mesh vertex as laid out in the vertex storage buffer.
///
/// The UV coordinates are split across the padding slots of the two `vec3`
/// fields so the struct packs into 48 bytes with std430 alignment:
///
/// - Offset 0: position (12 bytes), uv_x (4 bytes)
/// - Offset 16: normal (12 bytes), uv_y (4 bytes)
/// - Offset 32: color (16 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub uv_x: f32,
    pub normal: Vec3,
    pub uv_y: f32,
    pub color: Vec4,
}

impl Vertex {
    #[inline]
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2, color: Vec4) -> Self {
        Self {
            position,
            uv_x: uv.x,
            normal,
            uv_y: uv.y,
            color,
        }
    }

    #[inline]
    pub fn uv(&self) -> Vec2 {
        Vec2::new(self.uv_x, self.uv_y)
    }

    #[inline]
    pub const fn size() -> usize {
        std::mem::size_of::<Self>()
    }
}

/// Per-draw push constants: world transform plus vertex buffer address.
///
/// The matrix is stored column-major as plain arrays so the struct has no
/// trailing padding and matches the 72-byte shader block exactly.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DrawPushConstants {
    pub world_matrix: [[f32; 4]; 4],
    pub vertex_buffer: vk::DeviceAddress,
}

impl DrawPushConstants {
    pub fn new(world_matrix: Mat4, vertex_buffer: vk::DeviceAddress) -> Self {
        Self {
            world_matrix: world_matrix.to_cols_array_2d(),
            vertex_buffer,
        }
    }

    #[inline]
    pub fn world_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.world_matrix)
    }

    /// Size in bytes of the push constant range the graphics pipelines declare.
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_size() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
        assert_eq!(Vertex::size(), 48);
    }

    #[test]
    fn test_vertex_offsets() {
        use std::mem::offset_of;

        assert_eq!(offset_of!(Vertex, position), 0);
        assert_eq!(offset_of!(Vertex, uv_x), 12);
        assert_eq!(offset_of!(Vertex, normal), 16);
        assert_eq!(offset_of!(Vertex, uv_y), 28);
        assert_eq!(offset_of!(Vertex, color), 32);
    }

    #[test]
    fn test_vertex_new_splits_uv() {
        let vertex = Vertex::new(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::Y,
            Vec2::new(0.25, 0.75),
            Vec4::ONE,
        );
        assert_eq!(vertex.uv_x, 0.25);
        assert_eq!(vertex.uv_y, 0.75);
        assert_eq!(vertex.uv(), Vec2::new(0.25, 0.75));

        let bytes: &[u8] = bytemuck::bytes_of(&vertex);
        let back: &Vertex = bytemuck::from_bytes(bytes);
        assert_eq!(*back, vertex);
    }

    #[test]
    fn test_push_constants_layout() {
        assert_eq!(DrawPushConstants::SIZE, 72);

        let world = Mat4::from_translation(Vec3::new(4.0, 5.0, 6.0));
        let push = DrawPushConstants::new(world, 0xdead_beef);
        assert_eq!(push.world_matrix(), world);

        let bytes = bytemuck::bytes_of(&push);
        assert_eq!(&bytes[64..72], &0xdead_beefu64.to_ne_bytes());
    }
}
