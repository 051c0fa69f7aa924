//! Graphics pipeline state for dynamic rendering.
//!
//! - [`BlendMode`] and [`DepthMode`] name the fixed-function variants the
//!   mesh passes need
//! - [`GraphicsPipelineDesc`] is the plain-data description handed to
//!   [`GpuDevice::create_graphics_pipeline`]
//! - [`GraphicsPipelineBuilder`] fills a description step by step and can be
//!   rebuilt after a tweak to produce a sibling variant
//!
//! Shader modules are opaque handles here. Where the SPIR-V comes from is up
//! to the caller; [`spirv_words`] only checks and repacks the bytes.
//!
//! # Example
//!
//! ```no_run
//! use ember_rhi::GpuDevice;
//! use ember_rhi::pipeline::{BlendMode, DepthMode, GraphicsPipelineBuilder};
//! use ember_rhi::vk;
//!
//! # fn example<D: GpuDevice>(
//! #     device: &D,
//! #     layout: vk::PipelineLayout,
//! #     vertex: vk::ShaderModule,
//! #     fragment: vk::ShaderModule,
//! # ) -> Result<(), ember_rhi::RhiError> {
//! let mut builder = GraphicsPipelineBuilder::new(layout)
//!     .shaders(vertex, fragment)
//!     .color_attachment_format(vk::Format::R16G16B16A16_SFLOAT)
//!     .depth_attachment_format(vk::Format::D32_SFLOAT)
//!     .depth(DepthMode::ReadWrite(vk::CompareOp::GREATER_OR_EQUAL));
//! let opaque = builder.build(device)?;
//!
//! builder = builder
//!     .blend(BlendMode::Additive)
//!     .depth(DepthMode::ReadOnly(vk::CompareOp::GREATER_OR_EQUAL));
//! let transparent = builder.build(device)?;
//! # Ok(())
//! # }
//! ```

use std::io::Cursor;

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::gpu::GpuDevice;

/// Color blending applied to the single color attachment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    /// Source replaces destination.
    #[default]
    Disabled,
    /// `src * src_alpha + dst`.
    Additive,
    /// `src * src_alpha + dst * (1 - src_alpha)`.
    AlphaBlend,
}

impl BlendMode {
    pub fn to_vk(self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        let dst_color = match self {
            BlendMode::Disabled => return state.blend_enable(false),
            BlendMode::Additive => vk::BlendFactor::ONE,
            BlendMode::AlphaBlend => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        };
        state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(dst_color)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    }
}

/// Depth test and write configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DepthMode {
    #[default]
    Disabled,
    /// Test with the given op and write passing fragments.
    ReadWrite(vk::CompareOp),
    /// Test with the given op, never write.
    ReadOnly(vk::CompareOp),
}

impl DepthMode {
    pub fn tests_depth(self) -> bool {
        !matches!(self, DepthMode::Disabled)
    }

    pub fn writes_depth(self) -> bool {
        matches!(self, DepthMode::ReadWrite(_))
    }

    pub fn compare_op(self) -> vk::CompareOp {
        match self {
            DepthMode::Disabled => vk::CompareOp::NEVER,
            DepthMode::ReadWrite(op) | DepthMode::ReadOnly(op) => op,
        }
    }

    pub fn to_vk(self) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.tests_depth())
            .depth_write_enable(self.writes_depth())
            .depth_compare_op(self.compare_op())
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
    }
}

/// Everything needed to create a graphics pipeline for dynamic rendering.
///
/// Vertex input is always empty: vertices are pulled from a buffer device
/// address. Viewport and scissor are dynamic state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphicsPipelineDesc {
    pub layout: vk::PipelineLayout,
    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: vk::ShaderModule,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub blend: BlendMode,
    pub depth: DepthMode,
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
}

impl GraphicsPipelineDesc {
    /// A triangle-list, fill, no-cull description with no blending and no
    /// depth. Shaders and the color format still need to be set.
    pub fn new(layout: vk::PipelineLayout) -> Self {
        Self {
            layout,
            vertex_shader: vk::ShaderModule::null(),
            fragment_shader: vk::ShaderModule::null(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            blend: BlendMode::Disabled,
            depth: DepthMode::Disabled,
            color_format: vk::Format::UNDEFINED,
            depth_format: None,
        }
    }

    /// Checks the fields a pipeline cannot be created without.
    pub fn validate(&self) -> RhiResult<()> {
        if self.layout == vk::PipelineLayout::null() {
            return Err(RhiError::PipelineError("pipeline layout is required".into()));
        }
        if self.vertex_shader == vk::ShaderModule::null() {
            return Err(RhiError::PipelineError("vertex shader is required".into()));
        }
        if self.fragment_shader == vk::ShaderModule::null() {
            return Err(RhiError::PipelineError("fragment shader is required".into()));
        }
        if self.color_format == vk::Format::UNDEFINED {
            return Err(RhiError::PipelineError(
                "color attachment format is required".into(),
            ));
        }
        if self.depth.tests_depth() && self.depth_format.is_none() {
            return Err(RhiError::PipelineError(
                "depth testing needs a depth attachment format".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`GraphicsPipelineDesc`].
///
/// [`build`](Self::build) borrows the builder, so one builder can produce
/// several pipelines that differ only in what was changed between builds.
#[derive(Clone, Copy, Debug)]
pub struct GraphicsPipelineBuilder {
    desc: GraphicsPipelineDesc,
}

impl GraphicsPipelineBuilder {
    pub fn new(layout: vk::PipelineLayout) -> Self {
        Self {
            desc: GraphicsPipelineDesc::new(layout),
        }
    }

    pub fn shaders(mut self, vertex: vk::ShaderModule, fragment: vk::ShaderModule) -> Self {
        self.desc.vertex_shader = vertex;
        self.desc.fragment_shader = fragment;
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.desc.topology = topology;
        self
    }

    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.desc.polygon_mode = mode;
        self
    }

    pub fn cull_mode(mut self, cull_mode: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.desc.cull_mode = cull_mode;
        self.desc.front_face = front_face;
        self
    }

    pub fn blend(mut self, blend: BlendMode) -> Self {
        self.desc.blend = blend;
        self
    }

    pub fn depth(mut self, depth: DepthMode) -> Self {
        self.desc.depth = depth;
        self
    }

    pub fn color_attachment_format(mut self, format: vk::Format) -> Self {
        self.desc.color_format = format;
        self
    }

    pub fn depth_attachment_format(mut self, format: vk::Format) -> Self {
        self.desc.depth_format = Some(format);
        self
    }

    pub fn desc(&self) -> &GraphicsPipelineDesc {
        &self.desc
    }

    /// Creates a pipeline from the current description.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] if a required field is missing, or
    /// the device error if creation fails.
    pub fn build<D: GpuDevice + ?Sized>(&self, device: &D) -> RhiResult<vk::Pipeline> {
        self.desc.validate()?;
        let pipeline = device.create_graphics_pipeline(&self.desc)?;
        debug!(
            "Created graphics pipeline {:?} (blend {:?}, depth {:?})",
            pipeline, self.desc.blend, self.desc.depth
        );
        Ok(pipeline)
    }
}

/// Repacks SPIR-V bytes into the words `create_shader_module` expects.
///
/// # Errors
///
/// Returns [`RhiError::ShaderError`] if the length is not a multiple of four
/// or the magic number is wrong.
pub fn spirv_words(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| RhiError::ShaderError(format!("invalid SPIR-V: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_modes() {
        assert_eq!(BlendMode::Disabled.to_vk().blend_enable, vk::FALSE);

        let additive = BlendMode::Additive.to_vk();
        assert_eq!(additive.blend_enable, vk::TRUE);
        assert_eq!(additive.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(additive.dst_color_blend_factor, vk::BlendFactor::ONE);

        let alpha = BlendMode::AlphaBlend.to_vk();
        assert_eq!(
            alpha.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
        assert_eq!(alpha.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_depth_modes() {
        let op = vk::CompareOp::GREATER_OR_EQUAL;
        let read_write = DepthMode::ReadWrite(op).to_vk();
        assert_eq!(read_write.depth_test_enable, vk::TRUE);
        assert_eq!(read_write.depth_write_enable, vk::TRUE);
        assert_eq!(read_write.depth_compare_op, op);

        let read_only = DepthMode::ReadOnly(op).to_vk();
        assert_eq!(read_only.depth_test_enable, vk::TRUE);
        assert_eq!(read_only.depth_write_enable, vk::FALSE);

        assert!(!DepthMode::Disabled.tests_depth());
    }

    #[test]
    fn test_validate_requires_shaders_and_formats() {
        use ash::vk::Handle;

        let layout = vk::PipelineLayout::from_raw(1);
        let vertex = vk::ShaderModule::from_raw(2);
        let fragment = vk::ShaderModule::from_raw(3);

        let builder = GraphicsPipelineBuilder::new(layout);
        assert!(matches!(
            builder.desc().validate(),
            Err(RhiError::PipelineError(_))
        ));

        let builder = builder
            .shaders(vertex, fragment)
            .color_attachment_format(vk::Format::R16G16B16A16_SFLOAT);
        assert!(builder.desc().validate().is_ok());

        let builder = builder.depth(DepthMode::ReadWrite(vk::CompareOp::LESS));
        assert!(builder.desc().validate().is_err());
        let builder = builder.depth_attachment_format(vk::Format::D32_SFLOAT);
        assert!(builder.desc().validate().is_ok());
    }

    #[test]
    fn test_spirv_words_checks_magic_and_length() {
        let mut bytes = 0x0723_0203u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0, 0, 1, 0]);
        assert_eq!(spirv_words(&bytes).unwrap(), vec![0x0723_0203, 0x0001_0000]);

        assert!(spirv_words(&bytes[..6]).is_err());
        assert!(spirv_words(&[0u8; 8]).is_err());
    }
}
