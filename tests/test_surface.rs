// tests/test_surface.rs: surface lifecycle against presents, and the full
// per-frame path through the coordinator.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use edgeview::capture::FramePool;
use edgeview::display::{RenderSurface, SurfaceState};
use edgeview::pipeline::{
    FrameOutcome, ModeControl, NullSink, PipelineCoordinator, ProcessedBuffer, ProcessingMode,
    ProcessingPipeline,
};
use edgeview::pipeline::edge::EdgeConfig;
use edgeview::testing::{nv21_frame, ContextEvent, RecordingContextFactory};
use edgeview::FrameError;

fn buffer(w: u32, h: u32) -> ProcessedBuffer {
    ProcessedBuffer {
        width: w,
        height: h,
        data: vec![0; (w * h * 4) as usize],
    }
}

#[test]
fn present_after_destroy_touches_nothing() {
    let factory = RecordingContextFactory::new();
    let surface = RenderSurface::new(factory.clone());
    surface.on_surface_available(4, 4).unwrap();
    surface.on_surface_destroyed();

    let err = surface.present(4, 4, buffer(4, 4)).unwrap_err();
    assert!(matches!(err, FrameError::SurfaceUnavailable));
    assert!(factory.presents().is_empty());
    assert_eq!(surface.stats().discarded, 1);
    assert_eq!(surface.state(), SurfaceState::Uninitialized);
}

#[test]
fn present_before_any_surface_is_discarded() {
    let surface = RenderSurface::new(RecordingContextFactory::new());
    assert!(matches!(
        surface.present(2, 2, buffer(2, 2)),
        Err(FrameError::SurfaceUnavailable)
    ));
    assert!(surface.current_frame().is_none());
}

#[test]
fn teardown_waits_for_the_in_flight_draw() {
    let factory = RecordingContextFactory::new();
    factory.set_draw_delay(Duration::from_millis(80));
    let surface = Arc::new(RenderSurface::new(factory.clone()));
    surface.on_surface_available(4, 4).unwrap();

    let presenter = {
        let surface = Arc::clone(&surface);
        thread::spawn(move || surface.present(4, 4, buffer(4, 4)))
    };

    // Wait until the draw has the context.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !factory.events().contains(&ContextEvent::DrawStarted(0)) {
        assert!(Instant::now() < deadline, "draw never started");
        thread::sleep(Duration::from_millis(1));
    }

    surface.on_surface_destroyed();
    assert!(presenter.join().unwrap().is_ok());

    let events = factory.events();
    let finished = events.iter().position(|e| *e == ContextEvent::DrawFinished(0));
    let dropped = events.iter().position(|e| *e == ContextEvent::Dropped(0));
    assert!(finished.unwrap() < dropped.unwrap(), "{events:?}");
    assert_eq!(factory.live_contexts(), 0);
}

#[test]
fn vga_grayscale_frame_presents_once_and_releases_once() {
    let factory = RecordingContextFactory::new();
    let surface = Arc::new(RenderSurface::new(factory.clone()));
    surface.on_surface_available(640, 480).unwrap();

    let pipeline = ProcessingPipeline::new(
        ModeControl::new(ProcessingMode::Grayscale),
        EdgeConfig::default().build(),
    );
    let mut coordinator = PipelineCoordinator::new(pipeline, Arc::clone(&surface), NullSink);
    let pool = FramePool::new(2);

    let outcome = coordinator.handle_frame(nv21_frame(&pool, 1, 640, 480, 90));
    assert_eq!(
        outcome,
        FrameOutcome::Presented {
            mode: ProcessingMode::Grayscale
        }
    );

    let presents = factory.presents();
    assert_eq!(presents.len(), 1);
    assert_eq!((presents[0].width, presents[0].height), (640, 480));
    assert!(presents[0].pixels().all(|px| px == [90u8, 90, 90, 255]));

    assert_eq!(pool.acquired(), 1);
    assert_eq!(pool.released(), 1);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(surface.current_frame().as_deref(), Some(&presents[0]));
}

#[test]
fn mode_change_applies_from_the_next_frame() {
    let factory = RecordingContextFactory::new();
    let surface = Arc::new(RenderSurface::new(factory.clone()));
    surface.on_surface_available(8, 8).unwrap();
    let mut coordinator =
        PipelineCoordinator::new(ProcessingPipeline::default(), surface, NullSink);
    let control = coordinator.mode_control();
    let pool = FramePool::new(1);

    let mut modes = Vec::new();
    for seq in 1..=6 {
        if seq == 4 {
            control.set(ProcessingMode::EdgeDetect);
        }
        match coordinator.handle_frame(nv21_frame(&pool, seq, 8, 8, 60)) {
            FrameOutcome::Presented { mode } => modes.push(mode),
            other => panic!("frame {seq}: {other:?}"),
        }
    }

    use ProcessingMode::*;
    assert_eq!(
        modes,
        vec![Original, Original, Original, EdgeDetect, EdgeDetect, EdgeDetect]
    );
    // Flat input: the edge frames are all background.
    let presents = factory.presents();
    assert!(presents[3].pixels().all(|px| px == [0u8, 0, 0, 255]));
    assert_eq!(coordinator.stats().presented, 6);
}

#[test]
fn surface_loss_mid_stream_discards_until_it_returns() {
    let factory = RecordingContextFactory::new();
    let surface = Arc::new(RenderSurface::new(factory.clone()));
    surface.on_surface_available(8, 8).unwrap();
    let mut coordinator =
        PipelineCoordinator::new(ProcessingPipeline::default(), Arc::clone(&surface), NullSink);
    let pool = FramePool::new(1);

    assert!(matches!(
        coordinator.handle_frame(nv21_frame(&pool, 1, 8, 8, 10)),
        FrameOutcome::Presented { .. }
    ));
    surface.on_surface_destroyed();
    assert!(matches!(
        coordinator.handle_frame(nv21_frame(&pool, 2, 8, 8, 10)),
        FrameOutcome::Discarded { .. }
    ));
    surface.on_surface_available(8, 8).unwrap();
    assert!(matches!(
        coordinator.handle_frame(nv21_frame(&pool, 3, 8, 8, 10)),
        FrameOutcome::Presented { .. }
    ));

    assert_eq!(factory.presents().len(), 2);
    assert_eq!(pool.released(), 3);
    assert_eq!(coordinator.stats().discarded, 1);
}
