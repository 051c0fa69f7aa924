//! Dynamic rendering attachment descriptions.
//!
//! [`RenderingConfig`] describes one `vkCmdBeginRendering` scope. It is plain
//! data so backends other than Vulkan can inspect it; the Vulkan backend turns
//! it into a [`RenderingInfoBundle`] that owns the attachment infos for the
//! duration of the call.

use ash::vk;

/// A color target. `clear` selects `CLEAR` over `LOAD` at pass start.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorAttachment {
    pub image_view: vk::ImageView,
    pub layout: vk::ImageLayout,
    pub clear: Option<[f32; 4]>,
}

impl ColorAttachment {
    /// Load existing contents, which is what the geometry pass wants after the
    /// background pass has written the image.
    pub fn load(image_view: vk::ImageView) -> Self {
        Self {
            image_view,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            clear: None,
        }
    }

    pub fn cleared(image_view: vk::ImageView, color: [f32; 4]) -> Self {
        Self {
            image_view,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            clear: Some(color),
        }
    }

    fn to_rendering_attachment_info(self) -> vk::RenderingAttachmentInfo<'static> {
        let (load_op, color) = match self.clear {
            Some(color) => (vk::AttachmentLoadOp::CLEAR, color),
            None => (vk::AttachmentLoadOp::LOAD, [0.0; 4]),
        };
        vk::RenderingAttachmentInfo::default()
            .image_view(self.image_view)
            .image_layout(self.layout)
            .load_op(load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            })
    }
}

/// A depth target, always cleared at pass start.
///
/// The default clear depth is `0.0`: the geometry pass uses a reversed depth
/// range where near is 1 and far is 0.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthAttachment {
    pub image_view: vk::ImageView,
    pub layout: vk::ImageLayout,
    pub clear_depth: f32,
}

impl DepthAttachment {
    pub fn new(image_view: vk::ImageView) -> Self {
        Self {
            image_view,
            layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            clear_depth: 0.0,
        }
    }

    fn to_rendering_attachment_info(self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.image_view)
            .image_layout(self.layout)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.clear_depth,
                    stencil: 0,
                },
            })
    }
}

/// Attachments and render area for one dynamic rendering scope.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderingConfig {
    pub extent: vk::Extent2D,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_attachment: Option<DepthAttachment>,
}

impl RenderingConfig {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            color_attachments: Vec::new(),
            depth_attachment: None,
        }
    }

    pub fn with_color_attachment(mut self, attachment: ColorAttachment) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    pub fn with_depth_attachment(mut self, attachment: DepthAttachment) -> Self {
        self.depth_attachment = Some(attachment);
        self
    }

    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }

    pub fn build(&self) -> RenderingInfoBundle {
        RenderingInfoBundle::new(self)
    }
}

/// Owns the attachment infos referenced by a `vk::RenderingInfo`.
pub struct RenderingInfoBundle {
    color_attachments: Vec<vk::RenderingAttachmentInfo<'static>>,
    depth_attachment: Option<vk::RenderingAttachmentInfo<'static>>,
    render_area: vk::Rect2D,
}

impl RenderingInfoBundle {
    fn new(config: &RenderingConfig) -> Self {
        Self {
            color_attachments: config
                .color_attachments
                .iter()
                .map(|a| a.to_rendering_attachment_info())
                .collect(),
            depth_attachment: config
                .depth_attachment
                .map(|a| a.to_rendering_attachment_info()),
            render_area: config.render_area(),
        }
    }

    /// The `vk::RenderingInfo` borrowing this bundle's attachment infos.
    pub fn info(&self) -> vk::RenderingInfo<'_> {
        let info = vk::RenderingInfo::default()
            .render_area(self.render_area)
            .layer_count(1)
            .color_attachments(&self.color_attachments);

        match &self.depth_attachment {
            Some(depth) => info.depth_attachment(depth),
            None => info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_attachment_load_op_follows_clear() {
        let load = ColorAttachment::load(vk::ImageView::null()).to_rendering_attachment_info();
        assert_eq!(load.load_op, vk::AttachmentLoadOp::LOAD);

        let clear = ColorAttachment::cleared(vk::ImageView::null(), [1.0, 0.0, 0.0, 1.0])
            .to_rendering_attachment_info();
        assert_eq!(clear.load_op, vk::AttachmentLoadOp::CLEAR);
        let color = unsafe { clear.clear_value.color.float32 };
        assert_eq!(color, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_depth_attachment_clears_to_zero() {
        let info = DepthAttachment::new(vk::ImageView::null()).to_rendering_attachment_info();
        assert_eq!(info.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(info.image_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        let depth = unsafe { info.clear_value.depth_stencil.depth };
        assert_eq!(depth, 0.0);
    }

    #[test]
    fn test_bundle_info_counts_attachments() {
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let config = RenderingConfig::new(extent)
            .with_color_attachment(ColorAttachment::load(vk::ImageView::null()))
            .with_depth_attachment(DepthAttachment::new(vk::ImageView::null()));
        let bundle = config.build();
        let info = bundle.info();

        assert_eq!(info.color_attachment_count, 1);
        assert!(!info.p_depth_attachment.is_null());
        assert_eq!(info.render_area.extent, extent);
    }
}
