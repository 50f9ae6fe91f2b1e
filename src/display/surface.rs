//! Display surface lifecycle and frame presentation.
//!
//! The live context sits behind one mutex: `present` draws while holding it
//! and teardown takes it before dropping the context, so a surface is never
//! freed under an in-flight draw and a draw never sees a freed surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use arc_swap::ArcSwapOption;
use tracing::{debug, error, info, instrument, trace};

use crate::error::{FrameError, RenderError};
use crate::pipeline::transform::ProcessedBuffer;

/// A live drawing target.
///
/// Dropping the context releases its GPU resources.
pub trait RenderContext: Send {
    /// The host surface changed size; the next draw fills the new extent.
    fn resize(&mut self, width: u32, height: u32);

    /// Upload and show one RGBA frame.
    fn draw(&mut self, frame: &ProcessedBuffer) -> Result<(), RenderError>;
}

/// Builds a context for a surface that just became available.
pub trait ContextFactory: Send + Sync {
    fn create(&self, width: u32, height: u32) -> Result<Box<dyn RenderContext>, RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Uninitialized,
    Ready,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfaceStats {
    pub presented: u64,
    /// Frames that arrived with no live context
    pub discarded: u64,
    pub contexts_created: u64,
}

pub struct RenderSurface {
    factory: Box<dyn ContextFactory>,
    context: Mutex<Option<Box<dyn RenderContext>>>,
    last_frame: ArcSwapOption<ProcessedBuffer>,
    presented: AtomicU64,
    discarded: AtomicU64,
    created: AtomicU64,
}

impl RenderSurface {
    pub fn new(factory: impl ContextFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            context: Mutex::new(None),
            last_frame: ArcSwapOption::empty(),
            presented: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            created: AtomicU64::new(0),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Box<dyn RenderContext>>> {
        // A draw that panicked leaves the slot itself intact.
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Host surface appeared: build its context.
    ///
    /// A context left over from a previous surface is torn down first. On
    /// failure the surface stays uninitialized until the next call.
    ///
    /// Creation runs without the context lock held; presents arriving in the
    /// meantime are discarded instead of waiting on device setup.
    #[instrument(skip(self))]
    pub fn on_surface_available(&self, width: u32, height: u32) -> Result<(), RenderError> {
        let previous = self.slot().take();
        if previous.is_some() {
            debug!("replacing render context of previous surface");
        }
        drop(previous);

        match self.factory.create(width, height) {
            Ok(context) => {
                // A racing call may have installed one meanwhile; newest wins.
                let stale = self.slot().replace(context);
                drop(stale);
                self.created.fetch_add(1, Ordering::Relaxed);
                info!(width, height, "render context ready");
                Ok(())
            }
            Err(e) => {
                error!("render context creation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Host surface went away. Safe to call any number of times.
    #[instrument(skip(self))]
    pub fn on_surface_destroyed(&self) {
        if self.slot().take().is_some() {
            info!("render context destroyed");
        }
    }

    pub fn on_surface_resized(&self, width: u32, height: u32) {
        if let Some(context) = self.slot().as_mut() {
            debug!(width, height, "surface resized");
            context.resize(width, height);
        }
    }

    /// Draw one frame on the live context.
    ///
    /// With no live context the frame is discarded and `SurfaceUnavailable`
    /// returned; that is expected around teardown and not worth more than a
    /// trace line.
    pub fn present(
        &self,
        width: u32,
        height: u32,
        buffer: ProcessedBuffer,
    ) -> Result<(), FrameError> {
        if buffer.width != width
            || buffer.height != height
            || buffer.data.len() != width as usize * height as usize * ProcessedBuffer::BYTES_PER_PIXEL
        {
            return Err(RenderError::Draw(format!(
                "{}x{} buffer of {} bytes presented as {width}x{height}",
                buffer.width,
                buffer.height,
                buffer.data.len()
            ))
            .into());
        }

        let mut slot = self.slot();
        let Some(context) = slot.as_mut() else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            trace!("no live render context, frame discarded");
            return Err(FrameError::SurfaceUnavailable);
        };

        let render_start = Instant::now();
        context.draw(&buffer)?;
        drop(slot);

        metrics::histogram!("render_time_us").record(render_start.elapsed().as_micros() as f64);
        self.presented.fetch_add(1, Ordering::Relaxed);
        self.last_frame.store(Some(Arc::new(buffer)));
        Ok(())
    }

    pub fn state(&self) -> SurfaceState {
        if self.slot().is_some() {
            SurfaceState::Ready
        } else {
            SurfaceState::Uninitialized
        }
    }

    /// The most recently presented frame, readable from any thread.
    pub fn current_frame(&self) -> Option<Arc<ProcessedBuffer>> {
        self.last_frame.load_full()
    }

    pub fn stats(&self) -> SurfaceStats {
        SurfaceStats {
            presented: self.presented.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            contexts_created: self.created.load(Ordering::Relaxed),
        }
    }
}

impl Drop for RenderSurface {
    fn drop(&mut self) {
        self.on_surface_destroyed();
    }
}
