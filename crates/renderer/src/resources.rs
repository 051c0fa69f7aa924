//! Buffer, image and mesh creation on top of the device.
//!
//! [`GpuResources`] is what asset loading talks to. Uploads to device-local
//! memory go through a host-visible staging buffer and an
//! [`ImmediateSubmitExecutor`], so every call here returns only after the
//! GPU has finished the copy and the staging memory is gone.
//!
//! Nothing here defers destruction: callers that release resources the GPU
//! may still read push the release into a [`DeletionQueue`] instead.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ember_resources::TextureData;
use ember_resources::texture::BYTES_PER_PIXEL;
use ember_rhi::buffer::{AllocatedBuffer, MemoryDomain};
use ember_rhi::command::CommandBuffer;
use ember_rhi::image::{AllocatedImage, ImageBarrier, ImageBlit, ImageDesc};
use ember_rhi::vertex::Vertex;
use ember_rhi::{GpuDevice, vk};
use ember_scene::MeshBuffers;
use tracing::{debug, warn};

use crate::deletion_queue::DeletionQueue;
use crate::error::{RenderError, RenderResult};
use crate::immediate::ImmediateSubmitExecutor;

/// Format used for every texture decoded from an image file.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Creates and destroys GPU resources, uploading through staging buffers.
pub struct GpuResources<D: GpuDevice> {
    device: Arc<D>,
    immediate: ImmediateSubmitExecutor<D>,
}

impl<D: GpuDevice> GpuResources<D> {
    /// `upload_timeout` bounds each staging upload.
    ///
    /// # Errors
    ///
    /// Returns an error if the immediate submit resources cannot be created.
    pub fn new(device: Arc<D>, upload_timeout: Duration) -> RenderResult<Self> {
        let immediate = ImmediateSubmitExecutor::new(Arc::clone(&device), upload_timeout)?;
        Ok(Self { device, immediate })
    }

    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Executor for one-off command submissions outside the frame loop.
    #[inline]
    pub fn immediate(&mut self) -> &mut ImmediateSubmitExecutor<D> {
        &mut self.immediate
    }

    // =========================================================================
    // Buffers
    // =========================================================================

    /// Allocates a buffer. Host-visible domains come back mapped.
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        domain: MemoryDomain,
    ) -> RenderResult<AllocatedBuffer> {
        if size == 0 {
            return Err(RenderError::InvalidArgument(
                "buffer size must be non-zero".into(),
            ));
        }
        Ok(self.device.allocate_buffer(size, usage, domain)?)
    }

    pub fn destroy_buffer(&self, buffer: AllocatedBuffer) {
        self.device.free_buffer(buffer);
    }

    /// Copies `data` into a host-visible buffer at `offset`.
    pub fn write_buffer(
        &self,
        buffer: &AllocatedBuffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> RenderResult<()> {
        Ok(self.device.write_buffer(buffer, offset, data)?)
    }

    // =========================================================================
    // Images
    // =========================================================================

    /// Allocates an image and its default view.
    ///
    /// A mipmapped image gets `floor(log2(max(w, h))) + 1` levels.
    pub fn create_image(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
    ) -> RenderResult<AllocatedImage> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::InvalidArgument(format!(
                "image extent {}x{} is empty",
                extent.width, extent.height
            )));
        }
        let desc = ImageDesc::new_2d(format, extent_3d(extent), usage, mipmapped);
        Ok(self.device.allocate_image(&desc)?)
    }

    /// Creates an image and fills mip 0 with tightly packed RGBA8 `pixels`.
    ///
    /// The image ends in `SHADER_READ_ONLY_OPTIMAL`. When `mipmapped` is set
    /// the remaining levels are generated by successive blits.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidArgument`] if `pixels` does not match the
    /// extent, or the device error if allocation or the upload fails.
    pub fn create_image_with_data(
        &mut self,
        pixels: &[u8],
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
    ) -> RenderResult<AllocatedImage> {
        let expected = extent.width as usize * extent.height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(RenderError::InvalidArgument(format!(
                "{}x{} image needs {} bytes, got {}",
                extent.width,
                extent.height,
                expected,
                pixels.len()
            )));
        }

        let staging = self.create_buffer(
            pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryDomain::CpuToGpu,
        )?;
        let image = match self.upload_image(&staging, pixels, extent, format, usage, mipmapped) {
            Ok(image) => image,
            Err(e) => {
                self.device.free_buffer(staging);
                return Err(e);
            }
        };
        self.device.free_buffer(staging);

        debug!(
            "Uploaded {}x{} image ({} mip level(s))",
            extent.width, extent.height, image.mip_levels
        );
        Ok(image)
    }

    fn upload_image(
        &mut self,
        staging: &AllocatedBuffer,
        pixels: &[u8],
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
    ) -> RenderResult<AllocatedImage> {
        self.device.write_buffer(staging, 0, pixels)?;

        let mut usage = usage | vk::ImageUsageFlags::TRANSFER_DST;
        if mipmapped {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let image = self.create_image(extent, format, usage, mipmapped)?;

        let staging = staging.buffer;
        let submitted = self.immediate.submit(|cmd| {
            cmd.transition_image(
                image.image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            let region = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(extent_3d(extent));
            cmd.copy_buffer_to_image(
                staging,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            if mipmapped {
                generate_mipmaps(cmd, image.image, extent, image.mip_levels);
            } else {
                cmd.transition_image(
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            }
        });

        match submitted {
            Ok(()) => Ok(image),
            Err(e) => {
                self.device.free_image(image);
                Err(e)
            }
        }
    }

    pub fn destroy_image(&self, image: AllocatedImage) {
        self.device.free_image(image);
    }

    // =========================================================================
    // Meshes
    // =========================================================================

    /// Uploads a mesh into device-local vertex and index buffers.
    ///
    /// The vertex buffer is read in shaders through its device address, which
    /// is returned alongside the two buffers.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidArgument`] for empty input, or the device
    /// error if allocation or the upload fails.
    pub fn upload_mesh(
        &mut self,
        indices: &[u32],
        vertices: &[Vertex],
    ) -> RenderResult<MeshBuffers> {
        if indices.is_empty() || vertices.is_empty() {
            return Err(RenderError::InvalidArgument(format!(
                "mesh needs indices and vertices, got {} and {}",
                indices.len(),
                vertices.len()
            )));
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let vertex_size = vertex_bytes.len() as vk::DeviceSize;
        let index_size = index_bytes.len() as vk::DeviceSize;

        let vertex_buffer = self.create_buffer(
            vertex_size,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryDomain::GpuOnly,
        )?;
        let vertex_buffer_address = self.device.buffer_device_address(vertex_buffer.buffer);

        let index_buffer = match self.create_buffer(
            index_size,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryDomain::GpuOnly,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.device.free_buffer(vertex_buffer);
                return Err(e);
            }
        };

        let buffers = MeshBuffers {
            index_buffer,
            vertex_buffer,
            vertex_buffer_address,
        };
        if let Err(e) = self.stage_mesh(&buffers, vertex_bytes, index_bytes) {
            self.device.free_buffer(vertex_buffer);
            self.device.free_buffer(index_buffer);
            return Err(e);
        }

        debug!(
            "Uploaded mesh: {} vertices, {} indices",
            vertices.len(),
            indices.len()
        );
        Ok(buffers)
    }

    /// Fills one staging buffer with vertices then indices and copies each
    /// range to its destination.
    fn stage_mesh(
        &mut self,
        buffers: &MeshBuffers,
        vertex_bytes: &[u8],
        index_bytes: &[u8],
    ) -> RenderResult<()> {
        let vertex_size = vertex_bytes.len() as vk::DeviceSize;
        let index_size = index_bytes.len() as vk::DeviceSize;

        let staging = self.create_buffer(
            vertex_size + index_size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryDomain::CpuOnly,
        )?;

        let result = self
            .device
            .write_buffer(&staging, 0, vertex_bytes)
            .and_then(|()| self.device.write_buffer(&staging, vertex_size, index_bytes))
            .map_err(RenderError::from)
            .and_then(|()| {
                self.immediate.submit(|cmd| {
                    cmd.copy_buffer(
                        staging.buffer,
                        buffers.vertex_buffer.buffer,
                        &[vk::BufferCopy {
                            src_offset: 0,
                            dst_offset: 0,
                            size: vertex_size,
                        }],
                    );
                    cmd.copy_buffer(
                        staging.buffer,
                        buffers.index_buffer.buffer,
                        &[vk::BufferCopy {
                            src_offset: vertex_size,
                            dst_offset: 0,
                            size: index_size,
                        }],
                    );
                })
            });

        self.device.free_buffer(staging);
        result
    }

    /// Frees both buffers of an uploaded mesh.
    pub fn destroy_mesh(&self, buffers: MeshBuffers) {
        self.device.free_buffer(buffers.index_buffer);
        self.device.free_buffer(buffers.vertex_buffer);
    }

    // =========================================================================
    // Textures
    // =========================================================================

    /// Decodes an encoded image and uploads it with a full mip chain.
    ///
    /// Undecodable data is replaced by the error checkerboard so loading can
    /// continue; only device failures are returned.
    pub fn load_texture(&mut self, bytes: &[u8], name: &str) -> RenderResult<AllocatedImage> {
        let texture = TextureData::from_bytes(bytes, name).unwrap_or_else(|e| {
            warn!("{}; using the error checkerboard", e);
            TextureData::error_checkerboard()
        });
        self.upload_texture(&texture, true)
    }

    /// Like [`load_texture`](Self::load_texture), reading from a file.
    pub fn load_texture_file<P: AsRef<Path>>(&mut self, path: P) -> RenderResult<AllocatedImage> {
        let texture = TextureData::from_file(path).unwrap_or_else(|e| {
            warn!("{}; using the error checkerboard", e);
            TextureData::error_checkerboard()
        });
        self.upload_texture(&texture, true)
    }

    /// Uploads decoded RGBA8 texture data as a sampled image.
    pub fn upload_texture(
        &mut self,
        texture: &TextureData,
        mipmapped: bool,
    ) -> RenderResult<AllocatedImage> {
        self.create_image_with_data(
            &texture.pixels,
            vk::Extent2D {
                width: texture.width,
                height: texture.height,
            },
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::SAMPLED,
            mipmapped,
        )
    }
}

/// Records blits that fill mips `1..mip_levels` from mip 0.
///
/// Expects every level in `TRANSFER_DST_OPTIMAL` and leaves the whole image
/// in `SHADER_READ_ONLY_OPTIMAL`.
pub fn generate_mipmaps<D: GpuDevice + ?Sized>(
    cmd: &CommandBuffer<'_, D>,
    image: vk::Image,
    extent: vk::Extent2D,
    mip_levels: u32,
) {
    let mut size = extent;
    for mip in 0..mip_levels {
        let half = vk::Extent2D {
            width: (size.width / 2).max(1),
            height: (size.height / 2).max(1),
        };

        cmd.image_barrier(
            &ImageBarrier::whole(
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            )
            .mip(mip),
        );

        if mip + 1 < mip_levels {
            cmd.blit_image(&ImageBlit {
                src: image,
                src_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                src_extent: size,
                src_mip: mip,
                dst: image,
                dst_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                dst_extent: half,
                dst_mip: mip + 1,
            });
        }
        size = half;
    }

    cmd.transition_image(
        image,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );
}

fn extent_3d(extent: vk::Extent2D) -> vk::Extent3D {
    vk::Extent3D {
        width: extent.width,
        height: extent.height,
        depth: 1,
    }
}

/// Placeholder textures and shared samplers created at startup.
#[derive(Clone, Copy, Debug)]
pub struct DefaultResources {
    pub white: AllocatedImage,
    pub grey: AllocatedImage,
    /// Transparent black.
    pub black: AllocatedImage,
    /// 16x16 magenta and black, substituted for textures that fail to load.
    pub error_checkerboard: AllocatedImage,
    pub nearest_sampler: vk::Sampler,
    pub linear_sampler: vk::Sampler,
}

impl DefaultResources {
    /// Uploads the placeholders and registers their release in `deletion_queue`.
    ///
    /// # Errors
    ///
    /// Returns an error if any upload or sampler creation fails. Anything
    /// created before the failure is already registered for release.
    pub fn new<D: GpuDevice>(
        resources: &mut GpuResources<D>,
        deletion_queue: &mut DeletionQueue,
    ) -> RenderResult<Self> {
        let mut image = |texture: TextureData| -> RenderResult<AllocatedImage> {
            let image = resources.upload_texture(&texture, false)?;
            let device = Arc::clone(resources.device());
            deletion_queue.push(move || device.free_image(image));
            Ok(image)
        };

        let white = image(TextureData::white())?;
        let grey = image(TextureData::grey())?;
        let black = image(TextureData::black())?;
        let error_checkerboard = image(TextureData::error_checkerboard())?;

        let device = resources.device();
        let nearest_sampler = device.create_sampler(vk::Filter::NEAREST)?;
        let linear_sampler = match device.create_sampler(vk::Filter::LINEAR) {
            Ok(sampler) => sampler,
            Err(e) => {
                device.destroy_sampler(nearest_sampler);
                return Err(e.into());
            }
        };
        let samplers_device = Arc::clone(device);
        deletion_queue.push(move || {
            samplers_device.destroy_sampler(nearest_sampler);
            samplers_device.destroy_sampler(linear_sampler);
        });

        debug!("Default textures and samplers created");
        Ok(Self {
            white,
            grey,
            black,
            error_checkerboard,
            nearest_sampler,
            linear_sampler,
        })
    }
}

#[cfg(test)]
mod tests {
    use ember_rhi::dummy::{Command, DummyDevice};
    use glam::{Vec2, Vec3, Vec4};

    use super::*;

    fn resources(device: &Arc<DummyDevice>) -> GpuResources<DummyDevice> {
        GpuResources::new(Arc::clone(device), Duration::from_secs(1)).unwrap()
    }

    fn triangle() -> (Vec<u32>, Vec<Vertex>) {
        let vertices = [Vec3::X, Vec3::Y, Vec3::Z]
            .into_iter()
            .map(|p| Vertex::new(p, Vec3::Z, Vec2::ZERO, Vec4::ONE))
            .collect();
        (vec![0, 1, 2], vertices)
    }

    #[test]
    fn test_upload_mesh_routes_through_staging() {
        let device = Arc::new(DummyDevice::new());
        let mut resources = resources(&device);
        let (indices, vertices) = triangle();

        let mesh = resources.upload_mesh(&indices, &vertices).unwrap();

        // Only the two destination buffers survive; the staging buffer is gone.
        assert_eq!(device.live_buffers(), 2);
        assert_eq!(
            device.buffer_contents(mesh.vertex_buffer.buffer).unwrap(),
            bytemuck::cast_slice::<Vertex, u8>(&vertices)
        );
        assert_eq!(
            device.buffer_contents(mesh.index_buffer.buffer).unwrap(),
            bytemuck::cast_slice::<u32, u8>(&indices)
        );
        assert_eq!(mesh.vertex_buffer.domain, MemoryDomain::GpuOnly);
        assert!(
            mesh.vertex_buffer
                .usage
                .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
        );
        assert_eq!(
            mesh.vertex_buffer_address,
            device.buffer_device_address(mesh.vertex_buffer.buffer)
        );

        let submissions = device.submissions();
        assert_eq!(submissions.len(), 1);
        let copies: Vec<_> = submissions[0]
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::CopyBuffer { regions, .. } => Some(regions[0]),
                _ => None,
            })
            .collect();
        assert_eq!(copies, vec![(0, 0, 144), (144, 0, 12)]);

        resources.destroy_mesh(mesh);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.double_frees(), 0);
    }

    #[test]
    fn test_upload_mesh_rejects_empty_input() {
        let device = Arc::new(DummyDevice::new());
        let mut resources = resources(&device);
        let (_, vertices) = triangle();

        let err = resources.upload_mesh(&[], &vertices).unwrap_err();

        assert!(matches!(err, RenderError::InvalidArgument(_)));
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.submit_count(), 0);
    }

    #[test]
    fn test_image_upload_without_mips_ends_shader_readable() {
        let device = Arc::new(DummyDevice::new());
        let mut resources = resources(&device);

        let image = resources
            .upload_texture(&TextureData::white(), false)
            .unwrap();

        assert_eq!(image.mip_levels, 1);
        assert_eq!(device.live_buffers(), 0);
        let commands = &device.submissions()[0].commands;
        assert!(matches!(commands[1], Command::CopyBufferToImage { .. }));
        assert!(matches!(
            commands.last(),
            Some(Command::ImageBarrier {
                new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                ..
            })
        ));
    }

    #[test]
    fn test_mipmapped_upload_blits_each_level() {
        let device = Arc::new(DummyDevice::new());
        let mut resources = resources(&device);
        let texture = TextureData::checkerboard(16, [255; 4], [0, 0, 0, 255]);

        let image = resources.upload_texture(&texture, true).unwrap();

        assert_eq!(image.mip_levels, 5);
        let blits: Vec<_> = device.submissions()[0]
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::BlitImage { src_mip, dst_mip, .. } => Some((*src_mip, *dst_mip)),
                _ => None,
            })
            .collect();
        assert_eq!(blits, vec![(0, 1), (1, 2), (2, 3), (3, 4)]);
    }

    #[test]
    fn test_pixel_size_mismatch_is_rejected() {
        let device = Arc::new(DummyDevice::new());
        let mut resources = resources(&device);

        let err = resources
            .create_image_with_data(
                &[0; 12],
                vk::Extent2D {
                    width: 2,
                    height: 2,
                },
                TEXTURE_FORMAT,
                vk::ImageUsageFlags::SAMPLED,
                false,
            )
            .unwrap_err();

        assert!(matches!(err, RenderError::InvalidArgument(_)));
        assert_eq!(device.live_images(), 0);
    }

    #[test]
    fn test_corrupt_texture_falls_back_to_checkerboard() {
        let device = Arc::new(DummyDevice::new());
        let mut resources = resources(&device);

        let image = resources.load_texture(b"not an image", "broken.png").unwrap();

        assert_eq!(image.extent_2d(), vk::Extent2D { width: 16, height: 16 });
        assert_eq!(device.live_images(), 1);
    }

    #[test]
    fn test_default_resources_release_through_queue() {
        let device = Arc::new(DummyDevice::new());
        let mut resources = resources(&device);
        let mut queue = DeletionQueue::new();

        let defaults = DefaultResources::new(&mut resources, &mut queue).unwrap();

        assert_eq!(device.live_images(), 4);
        assert_eq!(device.live_samplers(), 2);
        assert_eq!(defaults.error_checkerboard.extent.width, 16);
        assert_eq!(defaults.white.extent.width, 1);

        queue.flush();
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_samplers(), 0);
        assert_eq!(device.double_frees(), 0);
    }
}
