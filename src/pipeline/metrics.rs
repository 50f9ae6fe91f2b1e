//! Frame rate and latency reporting.

use std::time::{Duration, Instant};

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use tracing::trace;

use super::mode::ProcessingMode;

/// Default reporting cadence
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Latency samples kept per window; older samples are overwritten.
const LATENCY_WINDOW: usize = 256;

/// One reporting window's worth of numbers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsReport {
    pub fps: f64,
    pub mode: ProcessingMode,
    pub avg_latency_ms: f64,
    pub p99_latency_ms: f64,
    /// Frames evicted by newer arrivals before processing (cumulative)
    pub superseded_frames: u64,
    /// Frames lost to transform or render failures (cumulative)
    pub failed_frames: u64,
}

/// Receives reports from the capture context. Must not block.
pub trait MetricsSink: Send {
    fn report(&self, report: FpsReport);
}

impl MetricsSink for flume::Sender<FpsReport> {
    fn report(&self, report: FpsReport) {
        // A full or closed sink loses the report, never the frame.
        if self.try_send(report).is_err() {
            trace!("metrics sink busy, report dropped");
        }
    }
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn report(&self, _report: FpsReport) {}
}

pub struct MetricsTracker<S> {
    sink: S,
    interval: Duration,
    window_start: Instant,
    frames: u32,
    latencies: HeapRb<Duration>,
    superseded: u64,
    failed: u64,
}

impl<S: MetricsSink> MetricsTracker<S> {
    pub fn new(sink: S, window_start: Instant) -> Self {
        Self::with_interval(sink, window_start, REPORT_INTERVAL)
    }

    pub fn with_interval(sink: S, window_start: Instant, interval: Duration) -> Self {
        Self {
            sink,
            interval,
            window_start,
            frames: 0,
            latencies: HeapRb::new(LATENCY_WINDOW),
            superseded: 0,
            failed: 0,
        }
    }

    /// Count one processed frame; emits and returns a report once the window closes.
    pub fn record(
        &mut self,
        now: Instant,
        latency: Duration,
        mode: ProcessingMode,
    ) -> Option<FpsReport> {
        self.frames += 1;
        self.latencies.push_overwrite(latency);
        metrics::histogram!("processing_time_us").record(latency.as_micros() as f64);

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let (avg_latency_ms, p99_latency_ms) = self.latency_summary();
        let report = FpsReport {
            fps: self.frames as f64 * 1000.0 / elapsed_ms,
            mode,
            avg_latency_ms,
            p99_latency_ms,
            superseded_frames: self.superseded,
            failed_frames: self.failed,
        };

        metrics::gauge!("pipeline_fps").set(report.fps);
        self.sink.report(report);

        self.frames = 0;
        self.latencies.clear();
        self.window_start = now;
        Some(report)
    }

    /// A frame that was accepted but lost before reaching the screen.
    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Running total of frames evicted by the latest-only handoff.
    pub fn set_superseded(&mut self, total: u64) {
        self.superseded = total;
    }

    pub fn frames_in_window(&self) -> u32 {
        self.frames
    }

    fn latency_summary(&self) -> (f64, f64) {
        if self.latencies.is_empty() {
            return (0.0, 0.0);
        }
        let mut samples: Vec<f64> = self
            .latencies
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        samples.sort_by(f64::total_cmp);

        let avg = samples.iter().sum::<f64>() / samples.len() as f64;
        let rank = ((samples.len() as f64 * 0.99).ceil() as usize).clamp(1, samples.len());
        (avg, samples[rank - 1])
    }
}
