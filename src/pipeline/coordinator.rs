//! Per-frame orchestration: normalize, transform, present, measure, release.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use super::latest::LatestReceiver;
use super::metrics::{MetricsSink, MetricsTracker};
use super::mode::{ModeControl, ProcessingMode};
use super::transform::ProcessingPipeline;
use crate::capture::frame::RawFrame;
use crate::capture::normalize::FormatNormalizer;
use crate::display::surface::RenderSurface;
use crate::error::FrameError;

/// Why a frame never reached the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnsupportedFormat,
    TransformFailure,
    RenderFailure,
    Panicked,
}

/// What happened to one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { mode: ProcessingMode },
    /// Processed, but no surface was live to show it
    Discarded { mode: ProcessingMode },
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub received: u64,
    pub presented: u64,
    pub discarded: u64,
    pub unsupported: u64,
    pub failed: u64,
}

impl CoordinatorStats {
    fn count(&mut self, outcome: FrameOutcome) {
        self.received += 1;
        match outcome {
            FrameOutcome::Presented { .. } => self.presented += 1,
            FrameOutcome::Discarded { .. } => self.discarded += 1,
            FrameOutcome::Dropped(DropReason::UnsupportedFormat) => self.unsupported += 1,
            FrameOutcome::Dropped(_) => self.failed += 1,
        }
    }
}

pub struct PipelineCoordinator<S> {
    normalizer: FormatNormalizer,
    pipeline: ProcessingPipeline,
    surface: Arc<RenderSurface>,
    tracker: MetricsTracker<S>,
    stats: CoordinatorStats,
}

impl<S: MetricsSink> PipelineCoordinator<S> {
    pub fn new(pipeline: ProcessingPipeline, surface: Arc<RenderSurface>, sink: S) -> Self {
        Self::with_tracker(pipeline, surface, MetricsTracker::new(sink, Instant::now()))
    }

    pub fn with_tracker(
        pipeline: ProcessingPipeline,
        surface: Arc<RenderSurface>,
        tracker: MetricsTracker<S>,
    ) -> Self {
        Self {
            normalizer: FormatNormalizer::new(),
            pipeline,
            surface,
            tracker,
            stats: CoordinatorStats::default(),
        }
    }

    pub fn mode_control(&self) -> ModeControl {
        self.pipeline.mode_control()
    }

    pub fn surface(&self) -> &Arc<RenderSurface> {
        &self.surface
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    /// Run one frame through the pipeline. The frame is released exactly once
    /// on every path, including a panicking transform.
    pub fn handle_frame(&mut self, frame: RawFrame) -> FrameOutcome {
        let start = Instant::now();
        let sequence = frame.sequence();

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.process(&frame)));

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(FrameError::UnsupportedFormat(reason))) => {
                debug!(sequence, "skipping frame: {}", reason);
                metrics::counter!("frames_unsupported").increment(1);
                FrameOutcome::Dropped(DropReason::UnsupportedFormat)
            }
            Ok(Err(e @ FrameError::TransformFailure { .. })) => {
                warn!(sequence, "dropping frame: {}", e);
                FrameOutcome::Dropped(DropReason::TransformFailure)
            }
            Ok(Err(e)) => {
                warn!(sequence, "dropping frame: {}", e);
                FrameOutcome::Dropped(DropReason::RenderFailure)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                error!(sequence, "frame processing panicked: {}", message);
                FrameOutcome::Dropped(DropReason::Panicked)
            }
        };

        match outcome {
            FrameOutcome::Presented { mode } | FrameOutcome::Discarded { mode } => {
                self.tracker.record(Instant::now(), start.elapsed(), mode);
            }
            FrameOutcome::Dropped(DropReason::UnsupportedFormat) => {}
            FrameOutcome::Dropped(_) => {
                metrics::counter!("frames_dropped").increment(1);
                self.tracker.record_failure();
            }
        }
        self.stats.count(outcome);

        frame.release();
        outcome
    }

    fn process(&self, frame: &RawFrame) -> Result<FrameOutcome, FrameError> {
        let buffer = self.normalizer.normalize(frame)?;

        // Read once; a concurrent change applies from the next frame on.
        let mode = self.pipeline.current_mode();
        let processed = self.pipeline.apply(&buffer, mode)?;
        drop(buffer);

        match self
            .surface
            .present(frame.width(), frame.height(), processed)
        {
            Ok(()) => Ok(FrameOutcome::Presented { mode }),
            Err(FrameError::SurfaceUnavailable) => {
                trace!(sequence = frame.sequence(), "surface unavailable");
                Ok(FrameOutcome::Discarded { mode })
            }
            Err(e) => Err(e),
        }
    }

    /// Process frames until the capture side closes the channel.
    pub fn run(mut self, frames: &LatestReceiver<RawFrame>) -> CoordinatorStats {
        info!(edge = self.pipeline.edge_operator(), "coordinator started");
        while let Some(frame) = frames.recv() {
            self.tracker.set_superseded(frames.stats().superseded);
            self.handle_frame(frame);
        }

        let channel = frames.stats();
        info!(
            received = self.stats.received,
            presented = self.stats.presented,
            discarded = self.stats.discarded,
            unsupported = self.stats.unsupported,
            failed = self.stats.failed,
            superseded = channel.superseded,
            "coordinator finished"
        );
        self.stats
    }
}
