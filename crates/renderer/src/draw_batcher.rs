//! Draw recording with redundant state elided.
//!
//! [`DrawBatcher::record`] walks the frame's render objects once, opaque
//! first and transparent after, in the order the scene produced them. It
//! remembers the last pipeline, material and index buffer it bound and only
//! emits a bind when an object needs something different:
//!
//! | change         | emitted                                                   |
//! |----------------|-----------------------------------------------------------|
//! | pipeline       | pipeline bind, global set (set 0), viewport, scissor      |
//! | material       | material set (set 1)                                      |
//! | index buffer   | index buffer bind (`u32` indices)                         |
//! | every object   | push constants (world matrix, vertex address), draw call  |
//!
//! Objects are not sorted by depth and not culled here; callers that want
//! culling filter with [`ember_scene::is_visible`] before recording.

use std::ptr;

use ember_rhi::GpuDevice;
use ember_rhi::command::CommandBuffer;
use ember_rhi::vertex::DrawPushConstants;
use ember_rhi::vk;
use ember_scene::{DrawContext, MaterialInstance, MaterialPipeline, RenderObject};

/// Counters for one recorded pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub draw_calls: u32,
    pub triangles: u32,
}

/// State last bound on the command buffer during one `record` call.
#[derive(Default)]
struct BindState<'a> {
    pipeline: Option<MaterialPipeline>,
    material: Option<&'a MaterialInstance>,
    index_buffer: Option<vk::Buffer>,
}

/// Records a [`DrawContext`] into a command buffer.
pub struct DrawBatcher;

impl DrawBatcher {
    /// Records every object in `ctx`, opaque surfaces first.
    ///
    /// Must be called inside a dynamic rendering scope. `global_set` is bound
    /// at set 0 with each newly bound pipeline's layout.
    pub fn record<D: GpuDevice + ?Sized>(
        cmd: &CommandBuffer<'_, D>,
        ctx: &DrawContext,
        global_set: vk::DescriptorSet,
        extent: vk::Extent2D,
    ) -> DrawStats {
        let mut state = BindState::default();
        let mut stats = DrawStats::default();

        for object in ctx.opaque_surfaces.iter().chain(&ctx.transparent_surfaces) {
            Self::draw(cmd, object, &mut state, global_set, extent);
            stats.draw_calls += 1;
            stats.triangles += object.index_count / 3;
        }

        stats
    }

    fn draw<'a, D: GpuDevice + ?Sized>(
        cmd: &CommandBuffer<'_, D>,
        object: &'a RenderObject,
        state: &mut BindState<'a>,
        global_set: vk::DescriptorSet,
        extent: vk::Extent2D,
    ) {
        let material: &'a MaterialInstance = &object.material;
        let pipeline = material.pipeline;

        if state.pipeline != Some(pipeline) {
            cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
            cmd.bind_descriptor_sets(
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout,
                0,
                &[global_set],
            );
            cmd.set_viewport(vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            });
            cmd.set_scissor(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            });
            state.pipeline = Some(pipeline);
        }

        if !state.material.is_some_and(|bound| ptr::eq(bound, material)) {
            cmd.bind_descriptor_sets(
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout,
                1,
                &[material.material_set],
            );
            state.material = Some(material);
        }

        if state.index_buffer != Some(object.index_buffer) {
            cmd.bind_index_buffer(object.index_buffer, 0, vk::IndexType::UINT32);
            state.index_buffer = Some(object.index_buffer);
        }

        let push = DrawPushConstants::new(object.transform, object.vertex_buffer_address);
        cmd.push_constants(pipeline.layout, vk::ShaderStageFlags::VERTEX, 0, &push);
        cmd.draw_indexed(object.index_count, 1, object.first_index, 0, 0);
    }
}
