//! Resource lifetimes across frames, scene rendering and texture loading.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use ember_core::RendererConfig;
use ember_renderer::{
    DrawOutcome, FrameBegin, FrameScheduler, GpuResources, MaterialResources, Renderer,
};
use ember_rhi::buffer::{AllocatedBuffer, MemoryDomain};
use ember_rhi::descriptor::DescriptorLayoutBuilder;
use ember_rhi::dummy::{Command, DummyDevice};
use ember_rhi::vertex::Vertex;
use ember_rhi::vk::{self, Handle};
use ember_rhi::GpuDevice;
use ember_scene::{
    Bounds, GeoSurface, MaterialConstants, MaterialPass, MaterialPipeline, MeshAsset, NodeKind,
    SceneGraph, Transform,
};
use glam::{Mat4, Vec2, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn config(frames_in_flight: usize) -> RendererConfig {
    RendererConfig {
        frames_in_flight,
        frame_descriptor_sets: 8,
        global_descriptor_sets: 8,
        ..RendererConfig::default()
    }
}

#[test]
fn test_random_create_destroy_interleavings_release_everything_once() {
    const OPS: usize = 10_000;
    const FRAMES_IN_FLIGHT: usize = 3;

    let device = Arc::new(DummyDevice::new());
    let mut scheduler =
        FrameScheduler::new(Arc::clone(&device), &config(FRAMES_IN_FLIGHT)).unwrap();
    let resources = GpuResources::new(Arc::clone(&device), Duration::from_secs(1)).unwrap();
    let baseline = device.live_buffers();

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut live: Vec<AllocatedBuffer> = Vec::new();
    let mut deferred = [0usize; FRAMES_IN_FLIGHT];
    let mut ops = 0;

    while ops < OPS {
        let frame = match scheduler.begin_frame().unwrap() {
            FrameBegin::Ready(frame) => frame,
            FrameBegin::Abandoned => panic!("frame unexpectedly abandoned"),
        };
        deferred[frame.slot()] = 0;
        assert_eq!(
            device.live_buffers(),
            baseline + live.len() + deferred.iter().sum::<usize>()
        );

        for _ in 0..rng.gen_range(0..40) {
            ops += 1;
            match rng.gen_range(0..3) {
                0 => {
                    let size = rng.gen_range(1..4096);
                    let domain = if rng.gen_bool(0.5) {
                        MemoryDomain::GpuOnly
                    } else {
                        MemoryDomain::CpuToGpu
                    };
                    let buffer = resources
                        .create_buffer(size, vk::BufferUsageFlags::STORAGE_BUFFER, domain)
                        .unwrap();
                    live.push(buffer);
                }
                1 if !live.is_empty() => {
                    // Never used by a submitted frame, so it can go right away.
                    let buffer = live.swap_remove(rng.gen_range(0..live.len()));
                    resources.destroy_buffer(buffer);
                }
                _ if !live.is_empty() => {
                    let buffer = live.swap_remove(rng.gen_range(0..live.len()));
                    let device = Arc::clone(&device);
                    scheduler
                        .slot_mut(&frame)
                        .deletion_queue()
                        .push(move || device.free_buffer(buffer));
                    deferred[frame.slot()] += 1;
                }
                _ => {}
            }
        }

        scheduler.end_frame(frame).unwrap();
    }

    for buffer in live.drain(..) {
        resources.destroy_buffer(buffer);
    }
    drop(scheduler);

    assert_eq!(device.live_buffers(), baseline);
    assert_eq!(device.double_frees(), 0);
}

#[test]
fn test_frame_descriptor_sets_expire_with_their_slot() {
    let device = Arc::new(DummyDevice::new());
    let mut scheduler = FrameScheduler::new(Arc::clone(&device), &config(2)).unwrap();
    let layout = DescriptorLayoutBuilder::new()
        .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
        .build(&*device, vk::ShaderStageFlags::VERTEX)
        .unwrap();

    let FrameBegin::Ready(frame) = scheduler.begin_frame().unwrap() else {
        panic!("frame unexpectedly abandoned");
    };
    let set = scheduler.slot_mut(&frame).descriptors().allocate(layout).unwrap();
    scheduler.end_frame(frame).unwrap();

    let FrameBegin::Ready(frame) = scheduler.begin_frame().unwrap() else {
        panic!("frame unexpectedly abandoned");
    };
    assert!(device.is_set_live(set));
    scheduler.end_frame(frame).unwrap();

    let FrameBegin::Ready(frame) = scheduler.begin_frame().unwrap() else {
        panic!("frame unexpectedly abandoned");
    };
    assert_eq!(frame.slot(), 0);
    assert!(!device.is_set_live(set));
    let reused = scheduler.slot_mut(&frame).descriptors();
    assert_eq!(reused.pools_created(), 1);
    scheduler.end_frame(frame).unwrap();

    drop(scheduler);
    device.destroy_descriptor_set_layout(layout);
}

fn quad(z: f32) -> (Vec<u32>, Vec<Vertex>) {
    let corners = [
        Vec3::new(-0.5, -0.5, z),
        Vec3::new(0.5, -0.5, z),
        Vec3::new(0.5, 0.5, z),
        Vec3::new(-0.5, 0.5, z),
    ];
    let vertices = corners
        .iter()
        .map(|&p| Vertex::new(p, Vec3::Z, Vec2::ZERO, Vec4::ONE))
        .collect();
    (vec![0, 1, 2, 2, 3, 0], vertices)
}

fn pipeline(raw: u64) -> MaterialPipeline {
    MaterialPipeline {
        pipeline: vk::Pipeline::from_raw(raw),
        layout: vk::PipelineLayout::from_raw(raw + 1),
    }
}

#[test]
fn test_scene_with_mixed_passes_renders_opaque_first() {
    let device = Arc::new(DummyDevice::new());
    let mut renderer = Renderer::new(Arc::clone(&device), &config(2)).unwrap();

    let constants = renderer
        .create_material_constants(&[
            MaterialConstants::new([1.0, 1.0, 1.0, 1.0], 0.0, 1.0),
            MaterialConstants::new([0.2, 0.4, 1.0, 0.5], 0.0, 0.5),
        ])
        .unwrap();
    let defaults = *renderer.defaults();
    let opaque = renderer
        .create_material(
            pipeline(100),
            MaterialPass::Opaque,
            &MaterialResources::with_defaults(&defaults, constants.buffer, 0),
        )
        .unwrap();
    let glass = renderer
        .create_material(
            pipeline(200),
            MaterialPass::Transparent,
            &MaterialResources::with_defaults(&defaults, constants.buffer, 256),
        )
        .unwrap();

    let mut mesh = |name: &str, material| {
        let (indices, vertices) = quad(0.5);
        let buffers = renderer.resources().upload_mesh(&indices, &vertices).unwrap();
        let device = Arc::clone(&device);
        renderer.defer_release(move || {
            device.free_buffer(buffers.index_buffer);
            device.free_buffer(buffers.vertex_buffer);
        });
        Arc::new(MeshAsset {
            name: name.to_string(),
            surfaces: vec![GeoSurface {
                start_index: 0,
                count: indices.len() as u32,
                bounds: Bounds::from_points(vertices.iter().map(|v| v.position)),
                material,
            }],
            buffers,
        })
    };
    // Transparent mesh first in the graph; it must still draw last.
    let window = mesh("window", Arc::clone(&glass));
    let wall = mesh("wall", Arc::clone(&opaque));

    let mut scene = SceneGraph::new();
    let house = scene
        .add_node(SceneGraph::ROOT, "house", NodeKind::Group, Mat4::IDENTITY)
        .unwrap();
    scene
        .add_node(house, "window", NodeKind::Mesh(Arc::clone(&window)), Mat4::IDENTITY)
        .unwrap();
    scene
        .add_node(house, "north wall", NodeKind::Mesh(Arc::clone(&wall)), Mat4::IDENTITY)
        .unwrap();
    scene
        .add_node(
            house,
            "south wall",
            NodeKind::Mesh(Arc::clone(&wall)),
            Transform::new().with_translation(Vec3::new(0.1, 0.0, 0.0)).into(),
        )
        .unwrap();

    let before = device.submit_count();
    assert_eq!(renderer.draw(&scene).unwrap(), DrawOutcome::Rendered);
    assert_eq!(device.submit_count(), before + 1);

    assert_eq!(renderer.stats().drawcall_count, 3);
    assert_eq!(renderer.stats().triangle_count, 6);
    assert_eq!(renderer.draw_context().opaque_surfaces.len(), 2);
    assert_eq!(renderer.draw_context().transparent_surfaces.len(), 1);

    let commands = &device.submissions()[before].commands;
    let pipelines: Vec<vk::Pipeline> = commands
        .iter()
        .filter_map(|c| match c {
            Command::BindPipeline { pipeline } => Some(*pipeline),
            _ => None,
        })
        .collect();
    assert_eq!(pipelines, vec![opaque.pipeline.pipeline, glass.pipeline.pipeline]);

    let index_buffers: Vec<vk::Buffer> = commands
        .iter()
        .filter_map(|c| match c {
            Command::BindIndexBuffer { buffer, .. } => Some(*buffer),
            _ => None,
        })
        .collect();
    assert_eq!(
        index_buffers,
        vec![
            wall.buffers.index_buffer.buffer,
            window.buffers.index_buffer.buffer
        ]
    );

    drop(scene);
    drop(renderer);
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(device.live_images(), 0);
    assert_eq!(device.live_samplers(), 0);
    assert_eq!(device.double_frees(), 0);
}

fn encode_png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 30, 30, 255]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

#[test]
fn test_texture_load_decodes_png_and_falls_back_on_garbage() {
    let device = Arc::new(DummyDevice::new());
    let mut resources = GpuResources::new(Arc::clone(&device), Duration::from_secs(1)).unwrap();

    let brick = resources.load_texture(&encode_png(8, 4), "brick.png").unwrap();
    assert_eq!(brick.extent_2d(), vk::Extent2D { width: 8, height: 4 });
    assert_eq!(brick.mip_levels, 4);

    let broken = resources.load_texture(b"definitely not a png", "broken.png").unwrap();
    assert_eq!(broken.extent_2d(), vk::Extent2D { width: 16, height: 16 });

    let missing = resources.load_texture_file("does/not/exist.png").unwrap();
    assert_eq!(missing.extent_2d(), vk::Extent2D { width: 16, height: 16 });

    for image in [brick, broken, missing] {
        resources.destroy_image(image);
    }
    assert_eq!(device.live_images(), 0);
    assert_eq!(device.live_buffers(), 0);
}
