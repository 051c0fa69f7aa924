//! Material instances as seen by the draw path.
//!
//! A material is a pipeline plus a descriptor set (set 1) holding its
//! constants and textures. Instances are created by whoever loads assets and
//! shared with render objects through `Arc`; the renderer only reads them.

use bytemuck::{Pod, Zeroable};
use ember_rhi::vk;

/// Which group a surface is drawn in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MaterialPass {
    #[default]
    Opaque,
    Transparent,
}

/// A graphics pipeline and the layout its descriptor sets and push constants use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialInstance {
    pub pipeline: MaterialPipeline,
    pub material_set: vk::DescriptorSet,
    pub pass: MaterialPass,
}

impl MaterialInstance {
    #[inline]
    pub fn is_transparent(&self) -> bool {
        self.pass == MaterialPass::Transparent
    }
}

/// Uniform block at binding 0 of a metallic-roughness material set.
///
/// Padded to 256 bytes so consecutive materials can share one buffer at
/// aligned offsets.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub color_factors: [f32; 4],
    pub metal_rough_factors: [f32; 4],
    pub extra: [[f32; 4]; 14],
}

impl MaterialConstants {
    pub fn new(color_factors: [f32; 4], metallic: f32, roughness: f32) -> Self {
        Self {
            color_factors,
            metal_rough_factors: [metallic, roughness, 0.0, 0.0],
            extra: [[0.0; 4]; 14],
        }
    }
}

impl Default for MaterialConstants {
    fn default() -> Self {
        Self::new([1.0; 4], 1.0, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_constants_fill_a_uniform_slot() {
        assert_eq!(std::mem::size_of::<MaterialConstants>(), 256);
        let constants = MaterialConstants::new([0.5, 0.5, 0.5, 1.0], 0.2, 0.8);
        let bytes = bytemuck::bytes_of(&constants);
        assert_eq!(&bytes[16..20], &0.2f32.to_ne_bytes());
    }

    #[test]
    fn test_pass_classification() {
        let pipeline = MaterialPipeline {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
        };
        let opaque = MaterialInstance {
            pipeline,
            material_set: vk::DescriptorSet::null(),
            pass: MaterialPass::default(),
        };
        assert!(!opaque.is_transparent());
        let glass = MaterialInstance {
            pass: MaterialPass::Transparent,
            ..opaque
        };
        assert!(glass.is_transparent());
    }
}
