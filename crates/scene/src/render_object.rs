//! Per-frame draw records and the visibility test.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use ember_rhi::vk;
use glam::{Mat4, Vec3, Vec4};

use crate::bounds::Bounds;
use crate::material::MaterialInstance;

/// Everything needed to issue one indexed draw.
///
/// Built fresh from the scene graph every frame and consumed by the draw
/// batcher within that frame.
#[derive(Clone, Debug)]
pub struct RenderObject {
    pub index_count: u32,
    pub first_index: u32,
    pub index_buffer: vk::Buffer,
    pub material: Arc<MaterialInstance>,
    pub bounds: Bounds,
    pub transform: Mat4,
    pub vertex_buffer_address: vk::DeviceAddress,
}

/// Render objects collected for one frame, split by material pass.
#[derive(Debug, Default)]
pub struct DrawContext {
    pub opaque_surfaces: Vec<RenderObject>,
    pub transparent_surfaces: Vec<RenderObject>,
}

impl DrawContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `object` by its material's pass.
    pub fn push(&mut self, object: RenderObject) {
        if object.material.is_transparent() {
            self.transparent_surfaces.push(object);
        } else {
            self.opaque_surfaces.push(object);
        }
    }

    pub fn clear(&mut self) {
        self.opaque_surfaces.clear();
        self.transparent_surfaces.clear();
    }

    pub fn len(&self) -> usize {
        self.opaque_surfaces.len() + self.transparent_surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether any part of `object`'s bounding box may land inside the view volume.
///
/// The box corners are projected to normalized device coordinates and their
/// extent is tested against x and y in [-1, 1] and depth in [0, 1]. This is
/// conservative: boxes whose projected extent overlaps the volume pass even
/// when no corner is inside.
pub fn is_visible(object: &RenderObject, viewproj: Mat4) -> bool {
    let matrix = viewproj * object.transform;

    let mut min = Vec3::splat(1.5);
    let mut max = Vec3::splat(-1.5);
    for corner in object.bounds.corners() {
        let clip = matrix * corner.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        min = min.min(ndc);
        max = max.max(ndc);
    }

    !(min.z > 1.0 || max.z < 0.0 || min.x > 1.0 || max.x < -1.0 || min.y > 1.0 || max.y < -1.0)
}

/// Uniform block at set 0, binding 0 of every geometry pipeline.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SceneData {
    pub view: Mat4,
    pub proj: Mat4,
    pub viewproj: Mat4,
    pub ambient_color: Vec4,
    /// Direction in xyz, sun power in w.
    pub sunlight_direction: Vec4,
    pub sunlight_color: Vec4,
}

impl SceneData {
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self {
            view,
            proj,
            viewproj: proj * view,
            ..Self::default()
        }
    }
}

impl Default for SceneData {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
            viewproj: Mat4::IDENTITY,
            ambient_color: Vec4::splat(0.1),
            sunlight_direction: Vec4::new(0.0, 1.0, 0.5, 1.0),
            sunlight_color: Vec4::ONE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{MaterialPass, MaterialPipeline};

    fn object(pass: MaterialPass, transform: Mat4) -> RenderObject {
        RenderObject {
            index_count: 3,
            first_index: 0,
            index_buffer: vk::Buffer::null(),
            material: Arc::new(MaterialInstance {
                pipeline: MaterialPipeline {
                    pipeline: vk::Pipeline::null(),
                    layout: vk::PipelineLayout::null(),
                },
                material_set: vk::DescriptorSet::null(),
                pass,
            }),
            bounds: Bounds::from_min_max(Vec3::splat(-0.5), Vec3::splat(0.5)),
            transform,
            vertex_buffer_address: 0,
        }
    }

    /// Reversed-depth perspective camera at the origin looking down -Z.
    fn viewproj() -> Mat4 {
        let proj = Mat4::perspective_rh(70f32.to_radians(), 1.0, 10_000.0, 0.1);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        proj * view
    }

    #[test]
    fn test_object_in_front_is_visible() {
        let obj = object(MaterialPass::Opaque, Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)));
        assert!(is_visible(&obj, viewproj()));
    }

    #[test]
    fn test_object_off_to_the_side_is_culled() {
        let obj = object(MaterialPass::Opaque, Mat4::from_translation(Vec3::new(50.0, 0.0, -5.0)));
        assert!(!is_visible(&obj, viewproj()));
    }

    #[test]
    fn test_object_partially_inside_is_visible() {
        // Box straddles the right edge of the frustum.
        let edge = 5.0 * (35f32.to_radians()).tan();
        let obj = object(MaterialPass::Opaque, Mat4::from_translation(Vec3::new(edge, 0.0, -5.0)));
        assert!(is_visible(&obj, viewproj()));
    }

    #[test]
    fn test_draw_context_routes_by_pass() {
        let mut ctx = DrawContext::new();
        ctx.push(object(MaterialPass::Opaque, Mat4::IDENTITY));
        ctx.push(object(MaterialPass::Transparent, Mat4::IDENTITY));
        ctx.push(object(MaterialPass::Opaque, Mat4::IDENTITY));
        assert_eq!(ctx.opaque_surfaces.len(), 2);
        assert_eq!(ctx.transparent_surfaces.len(), 1);

        ctx.clear();
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_scene_data_layout() {
        assert_eq!(std::mem::size_of::<SceneData>(), 3 * 64 + 3 * 16);
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0));
        let proj = Mat4::from_scale(Vec3::splat(2.0));
        assert_eq!(SceneData::new(view, proj).viewproj, proj * view);
    }
}
