//! Metallic-roughness material descriptor sets.
//!
//! Every material set uses the same layout:
//!
//! | binding | contents                                   |
//! |---------|--------------------------------------------|
//! | 0       | [`MaterialConstants`] uniform block        |
//! | 1       | base color texture + sampler               |
//! | 2       | metallic-roughness texture + sampler       |
//!
//! Sets are allocated from the renderer's global allocator, so they live until
//! scene unload rather than for a single frame.
//!
//! Mesh pipelines share one layout: set 0 is the per-frame scene data, set 1
//! the material, and the vertex stage receives [`DrawPushConstants`]. Both
//! variants come from the same shaders:
//!
//! - opaque: no blending, depth test and write
//! - transparent: additive blending, depth test without write

use std::sync::Arc;

use ember_rhi::descriptor::{DescriptorLayoutBuilder, DescriptorWriter};
use ember_rhi::image::AllocatedImage;
use ember_rhi::pipeline::{BlendMode, DepthMode, GraphicsPipelineBuilder};
use ember_rhi::vertex::DrawPushConstants;
use ember_rhi::{GpuDevice, vk};
use tracing::debug;
use ember_scene::{MaterialConstants, MaterialInstance, MaterialPass, MaterialPipeline};

use crate::descriptor_allocator::GrowableDescriptorAllocator;
use crate::error::RenderResult;
use crate::resources::DefaultResources;

/// Textures and uniform range one material reads.
#[derive(Clone, Copy, Debug)]
pub struct MaterialResources {
    pub color_image: AllocatedImage,
    pub color_sampler: vk::Sampler,
    pub metal_rough_image: AllocatedImage,
    pub metal_rough_sampler: vk::Sampler,
    /// Buffer holding this material's [`MaterialConstants`].
    pub data_buffer: vk::Buffer,
    pub data_offset: vk::DeviceSize,
}

impl MaterialResources {
    /// White textures with linear filtering, reading constants from `data_buffer`.
    pub fn with_defaults(
        defaults: &DefaultResources,
        data_buffer: vk::Buffer,
        data_offset: vk::DeviceSize,
    ) -> Self {
        Self {
            color_image: defaults.white,
            color_sampler: defaults.linear_sampler,
            metal_rough_image: defaults.white,
            metal_rough_sampler: defaults.linear_sampler,
            data_buffer,
            data_offset,
        }
    }
}

/// Creates the material set layout (set 1), visible to vertex and fragment stages.
pub fn create_material_layout<D: GpuDevice + ?Sized>(
    device: &D,
) -> RenderResult<vk::DescriptorSetLayout> {
    Ok(DescriptorLayoutBuilder::new()
        .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
        .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .add_binding(2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .build(
            device,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        )?)
}

/// Depth test for geometry. Depth is reversed, so nearer means greater.
pub const MESH_DEPTH_COMPARE: vk::CompareOp = vk::CompareOp::GREATER_OR_EQUAL;

/// Opaque and transparent variants built over the shared mesh layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshPipelines {
    pub opaque: MaterialPipeline,
    pub transparent: MaterialPipeline,
}

impl MeshPipelines {
    pub fn for_pass(&self, pass: MaterialPass) -> MaterialPipeline {
        match pass {
            MaterialPass::Opaque => self.opaque,
            MaterialPass::Transparent => self.transparent,
        }
    }
}

/// Creates the mesh pipeline layout: `[scene_data, material]` plus a vertex
/// push-constant range holding [`DrawPushConstants`].
pub fn create_mesh_layout<D: GpuDevice + ?Sized>(
    device: &D,
    scene_data_layout: vk::DescriptorSetLayout,
    material_layout: vk::DescriptorSetLayout,
) -> RenderResult<vk::PipelineLayout> {
    let push_range = vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::VERTEX)
        .offset(0)
        .size(DrawPushConstants::SIZE);
    Ok(device.create_pipeline_layout(&[scene_data_layout, material_layout], &[push_range])?)
}

/// Builds both mesh pipeline variants from one pair of shader modules.
///
/// The modules are only read during creation; the caller keeps ownership.
/// If the transparent variant fails, the opaque one is destroyed before the
/// error is returned.
pub fn build_mesh_pipelines<D: GpuDevice + ?Sized>(
    device: &D,
    layout: vk::PipelineLayout,
    vertex_shader: vk::ShaderModule,
    fragment_shader: vk::ShaderModule,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> RenderResult<MeshPipelines> {
    let builder = GraphicsPipelineBuilder::new(layout)
        .shaders(vertex_shader, fragment_shader)
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::BACK, vk::FrontFace::COUNTER_CLOCKWISE)
        .color_attachment_format(color_format)
        .depth_attachment_format(depth_format);

    let opaque = builder
        .blend(BlendMode::Disabled)
        .depth(DepthMode::ReadWrite(MESH_DEPTH_COMPARE))
        .build(device)?;
    let transparent = match builder
        .blend(BlendMode::Additive)
        .depth(DepthMode::ReadOnly(MESH_DEPTH_COMPARE))
        .build(device)
    {
        Ok(pipeline) => pipeline,
        Err(e) => {
            device.destroy_pipeline(opaque);
            return Err(e.into());
        }
    };
    debug!("Built mesh pipelines (opaque {:?}, transparent {:?})", opaque, transparent);

    Ok(MeshPipelines {
        opaque: MaterialPipeline {
            pipeline: opaque,
            layout,
        },
        transparent: MaterialPipeline {
            pipeline: transparent,
            layout,
        },
    })
}

/// Allocates and fills a material set, returning the shared instance.
pub fn write_material<D: GpuDevice>(
    allocator: &mut GrowableDescriptorAllocator<D>,
    layout: vk::DescriptorSetLayout,
    pipeline: MaterialPipeline,
    pass: MaterialPass,
    resources: &MaterialResources,
    device: &D,
) -> RenderResult<Arc<MaterialInstance>> {
    let material_set = allocator.allocate(layout)?;

    let mut writer = DescriptorWriter::new();
    writer
        .write_buffer(
            0,
            resources.data_buffer,
            std::mem::size_of::<MaterialConstants>() as vk::DeviceSize,
            resources.data_offset,
            vk::DescriptorType::UNIFORM_BUFFER,
        )
        .write_image(
            1,
            resources.color_image.view,
            resources.color_sampler,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        )
        .write_image(
            2,
            resources.metal_rough_image.view,
            resources.metal_rough_sampler,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        );
    writer.update_set(device, material_set);

    Ok(Arc::new(MaterialInstance {
        pipeline,
        material_set,
        pass,
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ember_rhi::descriptor::{DescriptorWrite, PoolSizeRatio};
    use ember_rhi::dummy::DummyDevice;
    use ember_rhi::pipeline::GraphicsPipelineDesc;
    use ember_rhi::vk::Handle;

    use super::*;
    use crate::deletion_queue::DeletionQueue;
    use crate::resources::GpuResources;

    #[test]
    fn test_write_material_fills_all_three_bindings() {
        let device = Arc::new(DummyDevice::new());
        let mut resources = GpuResources::new(Arc::clone(&device), Duration::from_secs(1)).unwrap();
        let mut queue = DeletionQueue::new();
        let defaults = DefaultResources::new(&mut resources, &mut queue).unwrap();
        let mut allocator = GrowableDescriptorAllocator::new(
            Arc::clone(&device),
            4,
            &[
                PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0),
                PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2.0),
            ],
            64,
        )
        .unwrap();
        let layout = create_material_layout(&*device).unwrap();
        let pipeline = MaterialPipeline {
            pipeline: vk::Pipeline::from_raw(1),
            layout: vk::PipelineLayout::from_raw(2),
        };
        let data = vk::Buffer::from_raw(99);

        let material = write_material(
            &mut allocator,
            layout,
            pipeline,
            MaterialPass::Transparent,
            &MaterialResources::with_defaults(&defaults, data, 256),
            &*device,
        )
        .unwrap();

        assert!(material.is_transparent());
        let writes = device.descriptor_writes(material.material_set);
        assert_eq!(writes.len(), 3);
        assert_eq!(
            writes[0],
            DescriptorWrite::Buffer {
                binding: 0,
                kind: vk::DescriptorType::UNIFORM_BUFFER,
                buffer: data,
                offset: 256,
                range: 256,
            }
        );
        assert!(writes[1..].iter().all(|w| matches!(
            w,
            DescriptorWrite::Image { view, .. } if *view == defaults.white.view
        )));

        allocator.destroy_pools();
        device.destroy_descriptor_set_layout(layout);
        queue.flush();
    }

    fn mesh_layout(device: &DummyDevice) -> vk::PipelineLayout {
        let scene_data = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .build(device, vk::ShaderStageFlags::VERTEX)
            .unwrap();
        let material = create_material_layout(device).unwrap();
        create_mesh_layout(device, scene_data, material).unwrap()
    }

    #[test]
    fn test_mesh_layout_has_both_sets_and_vertex_push_range() {
        let device = DummyDevice::new();
        let layout = mesh_layout(&device);

        let info = device.pipeline_layout_info(layout).unwrap();
        assert_eq!(info.set_layouts.len(), 2);
        assert_eq!(info.push_constant_ranges.len(), 1);
        let range = info.push_constant_ranges[0];
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, DrawPushConstants::SIZE);
    }

    #[test]
    fn test_mesh_pipelines_differ_only_in_blend_and_depth_write() {
        let device = DummyDevice::new();
        let layout = mesh_layout(&device);
        let vertex = device.create_shader_module(&[0x0723_0203]).unwrap();
        let fragment = device.create_shader_module(&[0x0723_0203]).unwrap();

        let pipelines = build_mesh_pipelines(
            &device,
            layout,
            vertex,
            fragment,
            vk::Format::R16G16B16A16_SFLOAT,
            vk::Format::D32_SFLOAT,
        )
        .unwrap();

        assert_eq!(pipelines.opaque.layout, layout);
        assert_eq!(pipelines.transparent.layout, layout);
        assert_eq!(pipelines.for_pass(MaterialPass::Opaque), pipelines.opaque);

        let opaque = device.pipeline_desc(pipelines.opaque.pipeline).unwrap();
        let transparent = device.pipeline_desc(pipelines.transparent.pipeline).unwrap();
        assert_eq!(opaque.blend, BlendMode::Disabled);
        assert_eq!(opaque.depth, DepthMode::ReadWrite(MESH_DEPTH_COMPARE));
        assert_eq!(transparent.blend, BlendMode::Additive);
        assert_eq!(transparent.depth, DepthMode::ReadOnly(MESH_DEPTH_COMPARE));
        assert!(transparent.depth.tests_depth());
        assert!(!transparent.depth.writes_depth());
        let aligned = GraphicsPipelineDesc {
            blend: opaque.blend,
            depth: opaque.depth,
            ..transparent
        };
        assert_eq!(aligned, opaque);
        assert_eq!(opaque.depth_format, Some(vk::Format::D32_SFLOAT));
    }
}
