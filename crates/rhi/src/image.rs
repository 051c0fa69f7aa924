//! GPU image descriptions and layout transitions.

use ash::vk;

/// Parameters for [`GpuDevice::allocate_image`](crate::GpuDevice::allocate_image).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
}

impl ImageDesc {
    /// A 2D image description, with a full mip chain when `mipmapped` is set.
    pub fn new_2d(
        format: vk::Format,
        extent: vk::Extent3D,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
    ) -> Self {
        let mip_levels = if mipmapped {
            mip_levels_for(extent.width, extent.height)
        } else {
            1
        };
        Self {
            format,
            extent,
            usage,
            mip_levels,
        }
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        aspect_for_format(self.format)
    }
}

/// An image and its default view, created by a [`GpuDevice`](crate::GpuDevice).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AllocatedImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
}

impl AllocatedImage {
    #[inline]
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }
}

/// Number of levels in a full mip chain down to 1x1.
pub fn mip_levels_for(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Depth formats get a depth view; everything else is treated as color.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// A layout transition over a range of mip levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
}

impl ImageBarrier {
    /// Transition every mip level. The aspect follows the target layout.
    pub fn whole(
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Self {
        let aspect = if new_layout == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        Self {
            image,
            old_layout,
            new_layout,
            aspect,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
        }
    }

    /// Restrict the transition to one mip level.
    pub fn mip(mut self, level: u32) -> Self {
        self.base_mip_level = level;
        self.level_count = 1;
        self
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: self.base_mip_level,
            level_count: self.level_count,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        }
    }
}

/// A scaled copy between two color images (or two mips of one image).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBlit {
    pub src: vk::Image,
    pub src_layout: vk::ImageLayout,
    pub src_extent: vk::Extent2D,
    pub src_mip: u32,
    pub dst: vk::Image,
    pub dst_layout: vk::ImageLayout,
    pub dst_extent: vk::Extent2D,
    pub dst_mip: u32,
}

impl ImageBlit {
    /// Copy mip 0 of `src` over mip 0 of `dst`, scaling to fit.
    pub fn full(
        src: vk::Image,
        src_extent: vk::Extent2D,
        dst: vk::Image,
        dst_extent: vk::Extent2D,
    ) -> Self {
        Self {
            src,
            src_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            src_extent,
            src_mip: 0,
            dst,
            dst_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            dst_extent,
            dst_mip: 0,
        }
    }
}
