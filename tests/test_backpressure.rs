// tests/test_backpressure.rs: keep-only-latest handoff and the threaded session.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use edgeview::display::RenderSurface;
use edgeview::pipeline::{
    latest, MetricsTracker, NullSink, PipelineCoordinator, PipelineSession, ProcessingPipeline,
};
use edgeview::testing::{init_test_tracing, CollectingSink, RecordingContextFactory, ScriptedSource};

#[test]
fn consumer_sees_an_ordered_subsequence_ending_with_the_newest() {
    let (tx, rx) = latest::<u32>();

    let producer = thread::spawn(move || {
        for i in 0..2000 {
            tx.send(i).unwrap();
            if i % 64 == 0 {
                thread::yield_now();
            }
        }
        tx.stats()
    });

    let mut seen = Vec::new();
    while let Some(i) = rx.recv() {
        seen.push(i);
        if seen.len() % 8 == 0 {
            thread::sleep(Duration::from_micros(200));
        }
    }
    let sent = producer.join().unwrap();

    assert!(seen.windows(2).all(|w| w[0] < w[1]), "out of order");
    assert_eq!(seen.last(), Some(&1999));
    assert_eq!(sent.delivered, 2000);

    let stats = rx.stats();
    assert_eq!(stats.taken, seen.len() as u64);
    assert_eq!(stats.taken + stats.superseded, 2000);
}

#[test]
fn slow_consumer_releases_every_superseded_frame() {
    init_test_tracing();
    let factory = RecordingContextFactory::new();
    factory.set_draw_delay(Duration::from_millis(5));
    let surface = Arc::new(RenderSurface::new(factory.clone()));
    surface.on_surface_available(16, 16).unwrap();

    let source = ScriptedSource::new(16, 16, (0..60).map(|i| i as u8 * 4));
    let pool = source.pool().clone();
    let coordinator = PipelineCoordinator::new(ProcessingPipeline::default(), surface, NullSink);

    let session = PipelineSession::start(source, coordinator).unwrap();
    while !session.is_finished() {
        thread::sleep(Duration::from_millis(5));
    }
    let report = session.stop();

    assert_eq!(report.capture.delivered, 60);
    assert!(report.channel.superseded > 0, "{report:?}");
    assert_eq!(
        report.coordinator.received + report.channel.superseded,
        60,
        "{report:?}"
    );
    assert_eq!(factory.presents().len() as u64, report.coordinator.presented);
    assert_eq!(pool.acquired(), 60);
    assert_eq!(pool.released(), 60);
    assert_eq!(pool.outstanding(), 0);

    // Presented frames keep source order: luma rises with sequence.
    let lumas: Vec<u8> = factory.presents().iter().map(|f| f.pixel(0, 0)[0]).collect();
    assert!(lumas.windows(2).all(|w| w[0] < w[1]), "{lumas:?}");
}

#[test]
fn reports_arrive_on_the_configured_cadence() {
    let surface = Arc::new(RenderSurface::new(RecordingContextFactory::new()));
    surface.on_surface_available(8, 8).unwrap();

    let sink = CollectingSink::default();
    let tracker = MetricsTracker::with_interval(
        sink.clone(),
        std::time::Instant::now(),
        Duration::from_millis(20),
    );
    let coordinator =
        PipelineCoordinator::with_tracker(ProcessingPipeline::default(), surface, tracker);
    let source =
        ScriptedSource::new(8, 8, std::iter::repeat(100).take(40)).with_interval(Duration::from_millis(3));

    let session = PipelineSession::start(source, coordinator).unwrap();
    while !session.is_finished() {
        thread::sleep(Duration::from_millis(5));
    }
    session.stop();

    let reports = sink.reports();
    assert!(!reports.is_empty());
    for report in reports {
        assert!(report.fps > 0.0);
        assert!(report.avg_latency_ms >= 0.0);
        assert!(report.p99_latency_ms >= 0.0);
        assert_eq!(report.failed_frames, 0);
    }
}
