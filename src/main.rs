//! Edgeview: live camera feed with switchable grayscale and edge detection

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::Result;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use edgeview::capture::TestPatternSource;
use edgeview::display::snapshot::{configured_snapshot_path, save_png};
use edgeview::display::{RenderSurface, WgpuContextFactory};
use edgeview::pipeline::mode::UnknownMode;
use edgeview::pipeline::{
    FpsReport, MetricsSink, MetricsTracker, ModeControl, PipelineCoordinator, PipelineSession,
    ProcessingMode, ProcessingPipeline,
};
use edgeview::{CaptureConfig, Config, SourceKind};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgeview=debug".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Edgeview launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    edgeview::CONFIG.store(Arc::new(config.clone()));

    let surface = Arc::new(RenderSurface::new(WgpuContextFactory::new(
        config.display.backend,
    )));
    if let Err(e) = surface.on_surface_available(config.display.width, config.display.height) {
        warn!("Running without a render context: {}", e);
    }

    let mode = ModeControl::new(config.pipeline.initial_mode);
    let pipeline = ProcessingPipeline::new(mode, config.pipeline.edge.build());
    info!(
        "Mode: {} | edge operator: {}",
        pipeline.current_mode(),
        pipeline.edge_operator()
    );

    // Reports flow to a logging task
    let (report_tx, report_rx) = flume::bounded::<FpsReport>(8);
    let tracker = MetricsTracker::with_interval(
        report_tx,
        Instant::now(),
        config.pipeline.report_interval(),
    );
    let coordinator = PipelineCoordinator::with_tracker(pipeline, Arc::clone(&surface), tracker);

    let session = match config.capture.source {
        SourceKind::Pattern => {
            PipelineSession::start(TestPatternSource::new((&config.capture).into()), coordinator)?
        }
        SourceKind::V4l2 => start_device(&config.capture, coordinator)?,
    };

    tokio::spawn(async move {
        while let Ok(report) = report_rx.recv_async().await {
            info!(
                "FPS: {:.1} | Mode: {} | latency avg {:.2}ms p99 {:.2}ms | superseded {} | failed {}",
                report.fps,
                report.mode,
                report.avg_latency_ms,
                report.p99_latency_ms,
                report.superseded_frames,
                report.failed_frames
            );
        }
    });

    let (quit_tx, quit_rx) = oneshot::channel();
    let lines = forward_lines(std::io::BufReader::new(std::io::stdin()))?;
    tokio::spawn(control_loop(
        session.mode_control(),
        Arc::clone(&surface),
        lines,
        quit_tx,
    ));

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Failed to listen for ctrl-c: {}", e);
            }
            info!("Interrupted");
        }
        Ok(()) = quit_rx => info!("Quit requested"),
        _ = wait_for_end(&session) => info!("Capture ended"),
    }

    let report = tokio::task::spawn_blocking(move || session.stop()).await?;
    surface.on_surface_destroyed();

    info!(
        "Edgeview shutting down: {} delivered, {} presented, {} superseded, {} failed",
        report.capture.delivered,
        report.coordinator.presented,
        report.channel.superseded,
        report.coordinator.failed
    );
    Ok(())
}

async fn wait_for_end(session: &PipelineSession) {
    let mut tick = tokio::time::interval(Duration::from_millis(200));
    loop {
        tick.tick().await;
        if session.is_finished() {
            return;
        }
    }
}

#[cfg(feature = "v4l2")]
fn start_device<S: MetricsSink + 'static>(
    capture: &CaptureConfig,
    coordinator: PipelineCoordinator<S>,
) -> Result<PipelineSession> {
    use edgeview::capture::V4l2Source;

    let mut capture = capture.clone();
    if capture.device.is_empty() {
        let found = edgeview::utils::auto_detect_device()?;
        capture.device = found.path;
        capture.encoding = found.encoding;
    }
    info!("Using capture device: {}", capture.device);

    let source = V4l2Source::open(&capture)?;
    PipelineSession::start(source, coordinator)
}

#[cfg(not(feature = "v4l2"))]
fn start_device<S: MetricsSink + 'static>(
    _capture: &CaptureConfig,
    _coordinator: PipelineCoordinator<S>,
) -> Result<PipelineSession> {
    Err(color_eyre::eyre::eyre!("v4l2 capture requested but edgeview was built without the `v4l2` feature"))
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Mode(ProcessingMode),
    Next,
    Snap(Option<PathBuf>),
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>, UnknownMode> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let command = match head.to_ascii_lowercase().as_str() {
        "next" | "n" => Command::Next,
        "snap" | "s" => Command::Snap(words.next().map(PathBuf::from)),
        "quit" | "q" | "exit" => Command::Quit,
        other => Command::Mode(other.parse()?),
    };
    Ok(Some(command))
}

/// Forward `reader` line by line from a dedicated thread.
///
/// Stdin reads block and cannot be cancelled, so they stay off the runtime.
fn forward_lines<R: BufRead + Send + 'static>(reader: R) -> Result<flume::Receiver<String>> {
    let (tx, rx) = flume::unbounded();
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        error!("stdin read failed: {}", e);
                        return;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// Apply control commands until `quit` or end of input.
async fn control_loop(
    mode: ModeControl,
    surface: Arc<RenderSurface>,
    lines: flume::Receiver<String>,
    quit: oneshot::Sender<()>,
) {
    info!("Commands: original | grayscale | edge | next | snap [path] | quit");
    let mut snapshots = 0u64;

    while let Ok(line) = lines.recv_async().await {
        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(Command::Mode(m))) => {
                mode.set(m);
                info!("Mode: {}", m);
            }
            Ok(Some(Command::Next)) => info!("Mode: {}", mode.cycle()),
            Ok(Some(Command::Snap(path))) => {
                let Some(frame) = surface.current_frame() else {
                    warn!("Nothing presented yet");
                    continue;
                };
                snapshots += 1;
                let path = path.unwrap_or_else(|| configured_snapshot_path(snapshots));
                if let Err(e) = save_png(&frame, &path) {
                    error!("Snapshot failed: {}", e);
                }
            }
            Ok(Some(Command::Quit)) => {
                let _ = quit.send(());
                return;
            }
            Err(e) => warn!("{}", e),
        }
    }
}
