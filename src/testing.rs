//! Shared fakes for unit and integration tests.
//!
//! Available behind the `test-util` feature or in `#[cfg(test)]`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::capture::decoder::chroma_dims;
use crate::capture::frame::{FrameMetadata, FramePool, Plane, RawFrame, SensorEncoding};
use crate::capture::source::FrameSource;
use crate::display::surface::{ContextFactory, RenderContext};
use crate::error::{CaptureError, RenderError};
use crate::pipeline::metrics::{FpsReport, MetricsSink};
use crate::pipeline::transform::ProcessedBuffer;

/// Initialise a tracing subscriber for tests.
///
/// Call at the start of any test that needs log output. Respects `RUST_LOG`;
/// defaults to `debug` level. Safe to call more than once.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Something a recording context saw, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextEvent {
    Created(usize),
    DrawStarted(usize),
    DrawFinished(usize),
    Dropped(usize),
}

#[derive(Default)]
struct Recorder {
    next_id: AtomicUsize,
    live: AtomicUsize,
    fail_next_creation: AtomicBool,
    fail_draws: AtomicBool,
    draw_delay: Mutex<Duration>,
    create_delay: Mutex<Duration>,
    events: Mutex<Vec<ContextEvent>>,
    presents: Mutex<Vec<ProcessedBuffer>>,
    resizes: Mutex<Vec<(u32, u32)>>,
}

impl Recorder {
    fn log(&self, event: ContextEvent) {
        lock(&self.events).push(event);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Context factory that records every call instead of touching a GPU.
#[derive(Clone, Default)]
pub struct RecordingContextFactory {
    recorder: Arc<Recorder>,
}

impl RecordingContextFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `create` fails with `ContextCreation`.
    pub fn fail_next_creation(&self) {
        self.recorder.fail_next_creation.store(true, Ordering::SeqCst);
    }

    pub fn fail_draws(&self, fail: bool) {
        self.recorder.fail_draws.store(fail, Ordering::SeqCst);
    }

    /// Hold every draw for `delay` before it completes.
    pub fn set_draw_delay(&self, delay: Duration) {
        *lock(&self.recorder.draw_delay) = delay;
    }

    /// Hold every `create` for `delay`, like a slow device setup.
    pub fn set_create_delay(&self, delay: Duration) {
        *lock(&self.recorder.create_delay) = delay;
    }

    pub fn live_contexts(&self) -> usize {
        self.recorder.live.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<ContextEvent> {
        lock(&self.recorder.events).clone()
    }

    /// Frames drawn successfully, oldest first.
    pub fn presents(&self) -> Vec<ProcessedBuffer> {
        lock(&self.recorder.presents).clone()
    }

    pub fn resizes(&self) -> Vec<(u32, u32)> {
        lock(&self.recorder.resizes).clone()
    }
}

impl ContextFactory for RecordingContextFactory {
    fn create(&self, _width: u32, _height: u32) -> Result<Box<dyn RenderContext>, RenderError> {
        let delay = *lock(&self.recorder.create_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.recorder.fail_next_creation.swap(false, Ordering::SeqCst) {
            return Err(RenderError::ContextCreation("scripted failure".into()));
        }
        let id = self.recorder.next_id.fetch_add(1, Ordering::SeqCst);
        self.recorder.live.fetch_add(1, Ordering::SeqCst);
        self.recorder.log(ContextEvent::Created(id));
        Ok(Box::new(RecordingContext {
            id,
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

struct RecordingContext {
    id: usize,
    recorder: Arc<Recorder>,
}

impl RenderContext for RecordingContext {
    fn resize(&mut self, width: u32, height: u32) {
        lock(&self.recorder.resizes).push((width, height));
    }

    fn draw(&mut self, frame: &ProcessedBuffer) -> Result<(), RenderError> {
        self.recorder.log(ContextEvent::DrawStarted(self.id));
        let delay = *lock(&self.recorder.draw_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.recorder.log(ContextEvent::DrawFinished(self.id));

        if self.recorder.fail_draws.load(Ordering::SeqCst) {
            return Err(RenderError::Draw("scripted failure".into()));
        }
        lock(&self.recorder.presents).push(frame.clone());
        Ok(())
    }
}

impl Drop for RecordingContext {
    fn drop(&mut self) {
        self.recorder.live.fetch_sub(1, Ordering::SeqCst);
        self.recorder.log(ContextEvent::Dropped(self.id));
    }
}

/// Sink that keeps every report.
#[derive(Clone, Default)]
pub struct CollectingSink {
    reports: Arc<Mutex<Vec<FpsReport>>>,
}

impl CollectingSink {
    pub fn reports(&self) -> Vec<FpsReport> {
        lock(&self.reports).clone()
    }
}

impl MetricsSink for CollectingSink {
    fn report(&self, report: FpsReport) {
        lock(&self.reports).push(report);
    }
}

/// Build a frame from explicit planes.
///
/// Panics if `pool` has no free slot.
pub fn frame_with(
    pool: &FramePool,
    sequence: u64,
    encoding: SensorEncoding,
    width: u32,
    height: u32,
    planes: Vec<Plane>,
) -> RawFrame {
    let lease = pool.try_acquire().expect("frame pool exhausted in test");
    let meta = FrameMetadata {
        sequence,
        width,
        height,
        encoding,
        device_timestamp: None,
    };
    RawFrame::new(lease, meta, planes)
}

/// Uniform NV21 frame: every luma sample `luma`, neutral chroma.
pub fn nv21_frame(pool: &FramePool, sequence: u64, width: u32, height: u32, luma: u8) -> RawFrame {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = chroma_dims(w, h);
    let stride = w.max(2 * cw);
    let mut data = vec![luma; stride * h];
    data.extend(std::iter::repeat(128u8).take(stride * ch));
    frame_with(
        pool,
        sequence,
        SensorEncoding::Nv21,
        width,
        height,
        vec![Plane::packed(data, stride)],
    )
}

/// Uniform three-plane YUV 4:2:0 frame with neutral chroma.
pub fn planar_frame(pool: &FramePool, sequence: u64, width: u32, height: u32, luma: u8) -> RawFrame {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = chroma_dims(w, h);
    frame_with(
        pool,
        sequence,
        SensorEncoding::Yuv420Planar,
        width,
        height,
        vec![
            Plane::packed(vec![luma; w * h], w),
            Plane::packed(vec![128u8; cw * ch], cw),
            Plane::packed(vec![128u8; cw * ch], cw),
        ],
    )
}

/// Source that plays back a fixed list of uniform NV21 frames, one luma value
/// each, then ends.
pub struct ScriptedSource {
    pool: FramePool,
    width: u32,
    height: u32,
    script: VecDeque<u8>,
    sequence: u64,
    interval: Duration,
}

impl ScriptedSource {
    pub fn new(width: u32, height: u32, lumas: impl IntoIterator<Item = u8>) -> Self {
        Self {
            pool: FramePool::new(4),
            width,
            height,
            script: lumas.into_iter().collect(),
            sequence: 0,
            interval: Duration::ZERO,
        }
    }

    /// Sleep this long before each delivery.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        let Some(&luma) = self.script.front() else {
            return Ok(None);
        };
        if self.pool.outstanding() >= self.pool.capacity() {
            return Err(CaptureError::PoolExhausted(self.pool.outstanding()));
        }
        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }
        self.script.pop_front();
        self.sequence += 1;
        Ok(Some(nv21_frame(
            &self.pool,
            self.sequence,
            self.width,
            self.height,
            luma,
        )))
    }
}
