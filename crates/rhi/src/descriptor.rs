//! Descriptor layout construction, pool sizing and set updates.
//!
//! - [`PoolSizeRatio`] scales a per-kind descriptor budget by a set count
//! - [`DescriptorLayoutBuilder`] collects bindings into a set layout
//! - [`DescriptorWriter`] batches buffer/image writes into one update
//!
//! # Example
//!
//! ```no_run
//! use ember_rhi::GpuDevice;
//! use ember_rhi::descriptor::{DescriptorLayoutBuilder, DescriptorWriter};
//! use ember_rhi::vk;
//!
//! # fn example<D: GpuDevice>(device: &D, set: vk::DescriptorSet, uniform: vk::Buffer)
//! # -> Result<(), ember_rhi::RhiError> {
//! let layout = DescriptorLayoutBuilder::new()
//!     .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
//!     .build(device, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)?;
//!
//! let mut writer = DescriptorWriter::new();
//! writer.write_buffer(0, uniform, 256, 0, vk::DescriptorType::UNIFORM_BUFFER);
//! writer.update_set(device, set);
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;
use crate::gpu::GpuDevice;

/// One entry of a pool recipe: `multiplier` descriptors of `kind` per set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolSizeRatio {
    pub kind: vk::DescriptorType,
    pub multiplier: f32,
}

impl PoolSizeRatio {
    pub const fn new(kind: vk::DescriptorType, multiplier: f32) -> Self {
        Self { kind, multiplier }
    }
}

/// Scale a recipe to `set_count` sets. Each kind gets `floor(multiplier * set_count)`.
pub fn pool_sizes(ratios: &[PoolSizeRatio], set_count: u32) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|ratio| vk::DescriptorPoolSize {
            ty: ratio.kind,
            descriptor_count: (ratio.multiplier * set_count as f32) as u32,
        })
        .collect()
}

/// Collects single-descriptor bindings and builds a set layout.
#[derive(Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binding(mut self, binding: u32, kind: vk::DescriptorType) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(kind)
                .descriptor_count(1),
        );
        self
    }

    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'static>] {
        &self.bindings
    }

    /// Create the layout with every binding visible to `stages`.
    pub fn build<D: GpuDevice + ?Sized>(
        mut self,
        device: &D,
        stages: vk::ShaderStageFlags,
    ) -> RhiResult<vk::DescriptorSetLayout> {
        for binding in &mut self.bindings {
            binding.stage_flags |= stages;
        }
        let layout = device.create_descriptor_set_layout(&self.bindings)?;
        debug!(
            "Created descriptor set layout with {} binding(s)",
            self.bindings.len()
        );
        Ok(layout)
    }
}

/// A single pending descriptor write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorWrite {
    Buffer {
        binding: u32,
        kind: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Image {
        binding: u32,
        kind: vk::DescriptorType,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

impl DescriptorWrite {
    pub fn binding(&self) -> u32 {
        match *self {
            DescriptorWrite::Buffer { binding, .. } | DescriptorWrite::Image { binding, .. } => {
                binding
            }
        }
    }
}

/// Accumulates descriptor writes and applies them to a set in one call.
#[derive(Debug, Default)]
pub struct DescriptorWriter {
    writes: Vec<DescriptorWrite>,
}

impl DescriptorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        kind: vk::DescriptorType,
    ) -> &mut Self {
        self.writes.push(DescriptorWrite::Buffer {
            binding,
            kind,
            buffer,
            offset,
            range: size,
        });
        self
    }

    pub fn write_image(
        &mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        kind: vk::DescriptorType,
    ) -> &mut Self {
        self.writes.push(DescriptorWrite::Image {
            binding,
            kind,
            view,
            sampler,
            layout,
        });
        self
    }

    pub fn writes(&self) -> &[DescriptorWrite] {
        &self.writes
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }

    /// Apply every pending write to `set`. Pending writes are kept, so the
    /// same writer can fill several sets.
    pub fn update_set<D: GpuDevice + ?Sized>(&self, device: &D, set: vk::DescriptorSet) {
        device.update_descriptor_set(set, &self.writes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sizes_scale_and_floor() {
        let ratios = [
            PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 3.0),
            PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1.5),
        ];
        let sizes = pool_sizes(&ratios, 15);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(sizes[0].descriptor_count, 45);
        assert_eq!(sizes[1].descriptor_count, 22);
    }

    #[test]
    fn test_layout_builder_collects_bindings() {
        let builder = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);

        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[1].descriptor_count, 1);
        assert!(bindings[1].stage_flags.is_empty());
    }

    #[test]
    fn test_writer_accumulates_and_clears() {
        let mut writer = DescriptorWriter::new();
        writer
            .write_buffer(
                0,
                vk::Buffer::null(),
                128,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
            )
            .write_image(
                1,
                vk::ImageView::null(),
                vk::Sampler::null(),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            );

        assert_eq!(writer.writes().len(), 2);
        assert_eq!(writer.writes()[1].binding(), 1);
        assert!(matches!(
            writer.writes()[0],
            DescriptorWrite::Buffer { range: 128, .. }
        ));

        writer.clear();
        assert!(writer.writes().is_empty());
    }
}
