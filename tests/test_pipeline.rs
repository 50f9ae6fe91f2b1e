// tests/test_pipeline.rs: ProcessingPipeline modes over normalized frames.

use edgeview::capture::{FormatNormalizer, FramePool, PixelBuffer, Plane, SensorEncoding};
use edgeview::pipeline::edge::{EdgeConfig, EdgeKind};
use edgeview::pipeline::transform::{BACKGROUND_COLOR, EDGE_COLOR};
use edgeview::pipeline::{ModeControl, ProcessingMode, ProcessingPipeline};
use edgeview::testing::frame_with;

/// A dark left half and a bright right half, as NV21 with a tinted chroma.
fn step_frame(w: u32, h: u32) -> PixelBuffer {
    let pool = FramePool::new(1);
    let (wu, hu) = (w as usize, h as usize);
    let mut data = Vec::with_capacity(wu * hu * 3 / 2);
    for _ in 0..hu {
        for x in 0..wu {
            data.push(if x < wu / 2 { 30 } else { 220 });
        }
    }
    for _ in 0..hu / 2 {
        for _ in 0..wu / 2 {
            data.extend_from_slice(&[150, 100]);
        }
    }
    let frame = frame_with(
        &pool,
        1,
        SensorEncoding::Nv21,
        w,
        h,
        vec![Plane::packed(data, wu)],
    );
    FormatNormalizer::new().normalize(&frame).unwrap()
}

#[test]
fn every_mode_is_deterministic() {
    let input = step_frame(32, 24);
    let pipeline = ProcessingPipeline::default();
    for mode in ProcessingMode::ALL {
        let a = pipeline.apply(&input, mode).unwrap();
        let b = pipeline.apply(&input, mode).unwrap();
        assert_eq!(a, b, "{mode}");
        assert_eq!((a.width, a.height), (32, 24));
        assert_eq!(a.data.len(), 32 * 24 * 4);
    }
}

#[test]
fn grayscale_has_equal_channels() {
    let input = step_frame(32, 24);
    let out = ProcessingPipeline::default()
        .apply(&input, ProcessingMode::Grayscale)
        .unwrap();
    for px in out.pixels() {
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
        assert_eq!(px[3], 255);
    }
    // The bright half stays brighter.
    assert!(out.pixel(28, 10)[0] > out.pixel(3, 10)[0]);
}

#[test]
fn original_keeps_colour() {
    let input = step_frame(32, 24);
    let out = ProcessingPipeline::default()
        .apply(&input, ProcessingMode::Original)
        .unwrap();
    let [r, g, b] = input.pixel(5, 5);
    assert_eq!(out.pixel(5, 5), [r, g, b, 255]);
    // Tinted chroma: not a gray pixel.
    assert!(r != g || g != b);
}

#[test]
fn edge_output_is_binary_and_follows_the_step() {
    let input = step_frame(32, 24);
    for kind in [EdgeKind::Canny, EdgeKind::Sobel] {
        let config = EdgeConfig {
            operator: kind,
            ..EdgeConfig::default()
        };
        let pipeline = ProcessingPipeline::new(ModeControl::default(), config.build());
        let out = pipeline.apply(&input, ProcessingMode::EdgeDetect).unwrap();

        for px in out.pixels() {
            assert!(px == EDGE_COLOR || px == BACKGROUND_COLOR, "{kind:?}: {px:?}");
        }

        let row = 12;
        let near_step = (14..18).any(|x| out.pixel(x, row) == EDGE_COLOR);
        assert!(near_step, "{kind:?} found no edge at the step");
        assert_eq!(out.pixel(5, row), BACKGROUND_COLOR, "{kind:?}");
        assert_eq!(out.pixel(26, row), BACKGROUND_COLOR, "{kind:?}");
    }
}

#[test]
fn uniform_frame_has_no_edges() {
    let input = PixelBuffer {
        width: 16,
        height: 16,
        data: vec![77; 16 * 16 * 3],
    };
    let out = ProcessingPipeline::default()
        .apply(&input, ProcessingMode::EdgeDetect)
        .unwrap();
    assert!(out.pixels().all(|px| px == BACKGROUND_COLOR));
}

#[test]
fn mode_control_is_shared_and_tolerates_garbage() {
    let control = ModeControl::default();
    let pipeline = ProcessingPipeline::new(control.clone(), EdgeConfig::default().build());

    control.set(ProcessingMode::EdgeDetect);
    assert_eq!(pipeline.current_mode(), ProcessingMode::EdgeDetect);

    control.set_raw(42);
    assert_eq!(pipeline.current_mode(), ProcessingMode::Original);

    assert_eq!(control.cycle(), ProcessingMode::Grayscale);
    assert_eq!(pipeline.current_mode(), ProcessingMode::Grayscale);
}
