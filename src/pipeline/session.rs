//! Capture and processing threads wired through the latest-only handoff

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use color_eyre::Result;
use tracing::{error, info};

use super::coordinator::{CoordinatorStats, PipelineCoordinator};
use super::latest::{latest, LatestStats};
use super::metrics::MetricsSink;
use super::mode::ModeControl;
use crate::capture::source::{run_source, FrameSource, SourceStats};
use crate::display::surface::RenderSurface;

/// Totals gathered when a session shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub capture: SourceStats,
    pub coordinator: CoordinatorStats,
    pub channel: LatestStats,
}

/// A running pipeline: one thread pulls frames from the source, one
/// processes whatever is newest.
pub struct PipelineSession {
    stop: Arc<AtomicBool>,
    capture: Option<JoinHandle<SourceStats>>,
    processing: Option<JoinHandle<(CoordinatorStats, LatestStats)>>,
    mode: ModeControl,
    surface: Arc<RenderSurface>,
}

impl PipelineSession {
    pub fn start<F, S>(source: F, coordinator: PipelineCoordinator<S>) -> Result<Self>
    where
        F: FrameSource + 'static,
        S: MetricsSink + 'static,
    {
        let (tx, rx) = latest();
        let stop = Arc::new(AtomicBool::new(false));
        let mode = coordinator.mode_control();
        let surface = Arc::clone(coordinator.surface());

        let processing = thread::Builder::new()
            .name("frame-processing".into())
            .spawn(move || {
                let stats = coordinator.run(&rx);
                (stats, rx.stats())
            })?;

        let capture_stop = Arc::clone(&stop);
        let capture = match thread::Builder::new()
            .name("frame-capture".into())
            .spawn(move || run_source(source, tx, capture_stop))
        {
            Ok(handle) => handle,
            Err(e) => {
                // The sender died with the closure; processing drains and exits.
                let _ = processing.join();
                return Err(e.into());
            }
        };

        info!("pipeline session started");
        Ok(Self {
            stop,
            capture: Some(capture),
            processing: Some(processing),
            mode,
            surface,
        })
    }

    pub fn mode_control(&self) -> ModeControl {
        self.mode.clone()
    }

    pub fn surface(&self) -> &Arc<RenderSurface> {
        &self.surface
    }

    /// Whether the capture side has ended on its own.
    pub fn is_finished(&self) -> bool {
        self.capture.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop capturing, let the in-flight frame finish, and join both threads.
    pub fn stop(mut self) -> SessionReport {
        self.shutdown()
    }

    fn shutdown(&mut self) -> SessionReport {
        self.stop.store(true, Ordering::Release);
        let mut report = SessionReport::default();

        // Capture exits first; dropping its sender ends the processing loop.
        if let Some(handle) = self.capture.take() {
            match handle.join() {
                Ok(stats) => report.capture = stats,
                Err(_) => error!("capture thread panicked"),
            }
        }
        if let Some(handle) = self.processing.take() {
            match handle.join() {
                Ok((coordinator, channel)) => {
                    report.coordinator = coordinator;
                    report.channel = channel;
                }
                Err(_) => error!("processing thread panicked"),
            }
        }

        info!(
            delivered = report.capture.delivered,
            presented = report.coordinator.presented,
            superseded = report.channel.superseded,
            "pipeline session stopped"
        );
        report
    }
}

impl Drop for PipelineSession {
    fn drop(&mut self) {
        if self.capture.is_some() || self.processing.is_some() {
            self.shutdown();
        }
    }
}
