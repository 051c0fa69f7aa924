//! Frame pacing and swapchain invalidation, driven through the dummy device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use ember_core::RendererConfig;
use ember_renderer::{DrawOutcome, FrameBegin, FrameScheduler, RenderError, Renderer};
use ember_rhi::dummy::{DummyDevice, Event};
use ember_rhi::{AcquireOutcome, PresentOutcome};
use ember_scene::SceneGraph;

fn config(frames_in_flight: usize) -> RendererConfig {
    RendererConfig {
        frames_in_flight,
        frame_descriptor_sets: 8,
        global_descriptor_sets: 8,
        ..RendererConfig::default()
    }
}

fn run_frame(scheduler: &mut FrameScheduler<DummyDevice>) {
    match scheduler.begin_frame().unwrap() {
        FrameBegin::Ready(frame) => {
            scheduler.end_frame(frame).unwrap();
        }
        FrameBegin::Abandoned => panic!("frame unexpectedly abandoned"),
    }
}

#[test]
fn test_begin_frame_blocks_until_slot_fence_signals() {
    let device = Arc::new(DummyDevice::new());
    device.set_hold_submissions(true);
    let mut scheduler = FrameScheduler::new(Arc::clone(&device), &config(2)).unwrap();

    run_frame(&mut scheduler);
    run_frame(&mut scheduler);
    assert_eq!(device.pending_submissions(), 2);

    let released = Arc::new(AtomicBool::new(false));
    let gpu = {
        let device = Arc::clone(&device);
        let released = Arc::clone(&released);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            released.store(true, Ordering::SeqCst);
            device.complete_oldest();
        })
    };

    let start = Instant::now();
    let begin = scheduler.begin_frame().unwrap();
    let waited = start.elapsed();
    gpu.join().unwrap();

    assert!(released.load(Ordering::SeqCst));
    assert!(waited >= Duration::from_millis(40), "returned after {waited:?}");
    match begin {
        FrameBegin::Ready(frame) => assert_eq!(frame.slot(), 0),
        FrameBegin::Abandoned => panic!("frame unexpectedly abandoned"),
    }
    // Frame 1 is still on the GPU; only slot 0 was reclaimed.
    assert_eq!(device.pending_submissions(), 1);
}

#[test]
fn test_cpu_never_runs_more_than_n_frames_ahead() {
    let device = Arc::new(DummyDevice::new());
    device.set_hold_submissions(true);
    let mut config = config(3);
    config.frame_timeout_ms = 20;
    let mut scheduler = FrameScheduler::new(Arc::clone(&device), &config).unwrap();

    for _ in 0..3 {
        run_frame(&mut scheduler);
    }
    let err = scheduler.begin_frame().unwrap_err();
    assert!(matches!(err, RenderError::Hang { what: "frame fence", .. }));
    assert!(err.is_fatal());

    device.complete_oldest();
    run_frame(&mut scheduler);
    assert_eq!(scheduler.frame_number(), 4);
}

#[test]
fn test_out_of_date_acquire_skips_the_frame() {
    let device = Arc::new(DummyDevice::new());
    let mut renderer = Renderer::new(Arc::clone(&device), &config(2)).unwrap();
    let scene = SceneGraph::new();
    let submits = device.submit_count();
    device.clear_events();
    device.script_acquire(AcquireOutcome::OutOfDate);

    assert_eq!(renderer.draw(&scene).unwrap(), DrawOutcome::Skipped);

    assert_eq!(device.submit_count(), submits);
    assert!(renderer.resize_requested());
    let events = device.events();
    assert!(!events.iter().any(|e| matches!(e, Event::ResetFence(_))));
    assert!(!events.iter().any(|e| matches!(e, Event::Present(_))));

    // Still pending: nothing is drawn until the caller resizes.
    assert_eq!(renderer.draw(&scene).unwrap(), DrawOutcome::Skipped);
    assert_eq!(device.submit_count(), submits);

    renderer.resize(800, 600).unwrap();
    assert!(!renderer.resize_requested());
    assert_eq!(renderer.draw(&scene).unwrap(), DrawOutcome::Rendered);
    assert_eq!(device.submit_count(), submits + 1);
}

#[test]
fn test_out_of_date_present_requests_resize_after_submitting() {
    let device = Arc::new(DummyDevice::new());
    let mut renderer = Renderer::new(Arc::clone(&device), &config(2)).unwrap();
    let scene = SceneGraph::new();
    device.script_present(PresentOutcome::OutOfDate);

    assert_eq!(renderer.draw(&scene).unwrap(), DrawOutcome::Rendered);
    assert!(renderer.resize_requested());
    assert_eq!(renderer.frame_number(), 1);

    renderer.resize(640, 480).unwrap();
    assert_eq!(device.recreate_count(), 1);
    assert_eq!(renderer.draw(&scene).unwrap(), DrawOutcome::Rendered);
}

#[test]
fn test_frames_rotate_through_swapchain_images() {
    let device = Arc::new(DummyDevice::new());
    let mut renderer = Renderer::new(Arc::clone(&device), &config(2)).unwrap();
    let scene = SceneGraph::new();
    device.clear_events();

    for _ in 0..4 {
        renderer.draw(&scene).unwrap();
    }

    let presented: Vec<u32> = device
        .events()
        .iter()
        .filter_map(|e| match e {
            Event::Present(index) => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(presented, vec![0, 1, 2, 0]);
}
