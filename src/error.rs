//! Error taxonomy for the frame pipeline.
//!
//! Every [`FrameError`] is local to one frame: the coordinator logs it, drops
//! the frame and carries on with the next delivery.

use thiserror::Error;

use crate::pipeline::mode::ProcessingMode;

/// Why a single frame did not make it to the screen.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The sensor encoding cannot be interpreted, or its planes are malformed.
    #[error("unsupported sensor format: {0}")]
    UnsupportedFormat(String),

    /// Present was attempted with no live render context.
    #[error("no live render context")]
    SurfaceUnavailable,

    /// A processing mode could not complete its transform.
    #[error("{mode} transform failed: {reason}")]
    TransformFailure {
        mode: ProcessingMode,
        reason: String,
    },

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Failures of the GPU-backed render context.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to create render context: {0}")]
    ContextCreation(String),

    #[error("draw failed: {0}")]
    Draw(String),
}

/// Failures reported by a [`FrameSource`](crate::capture::FrameSource).
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Every pooled buffer is still held downstream.
    #[error("frame pool exhausted ({0} buffers outstanding)")]
    PoolExhausted(usize),

    #[error("capture device error: {0}")]
    Device(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
