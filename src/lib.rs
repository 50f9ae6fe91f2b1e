pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
#[cfg(feature = "v4l2")]
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use arc_swap::ArcSwap;
use color_eyre::Result;
use serde::{Deserialize, Serialize};

use capture::frame::SensorEncoding;
use capture::source::PatternConfig;
use pipeline::edge::EdgeConfig;
use pipeline::mode::ProcessingMode;

pub use error::{CaptureError, FrameError, RenderError};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Environment overrides look like `EDGEVIEW__CAPTURE__WIDTH=1280`.
pub const ENV_PREFIX: &str = "EDGEVIEW";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Synthetic moving pattern
    Pattern,
    /// V4L2 device; needs the `v4l2` feature
    V4l2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// Device node; empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub encoding: SensorEncoding,
    /// Frames that may be held downstream at once
    pub buffer_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub backend: GpuBackend,
    pub snapshot_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuBackend {
    Vulkan,
    Metal,
    Dx12,
    OpenGl,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub initial_mode: ProcessingMode,
    pub edge: EdgeConfig,
    pub report_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Pattern,
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            fps: 30,
            encoding: SensorEncoding::Nv21,
            buffer_count: 4,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            backend: GpuBackend::Auto,
            snapshot_dir: PathBuf::from("snapshots"),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            initial_mode: ProcessingMode::Original,
            edge: EdgeConfig::default(),
            report_interval_ms: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms.max(1))
    }
}

impl From<&CaptureConfig> for PatternConfig {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps,
            encoding: config.encoding,
            buffer_count: config.buffer_count,
            frame_limit: None,
        }
    }
}

impl Config {
    /// Defaults, then `path` if given, then `EDGEVIEW__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
