//! Frame sources and the capture-side delivery loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use super::decoder::{chroma_dims, nv21_len};
use super::frame::{FrameMetadata, FramePool, Plane, RawFrame, SensorEncoding};
use crate::error::CaptureError;
use crate::pipeline::latest::LatestSender;

/// A camera-like feed.
pub trait FrameSource: Send {
    /// Block until the device delivers the next frame; `Ok(None)` ends the stream.
    fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        (**self).next_frame()
    }
}

/// Counters from one run of [`run_source`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub delivered: u64,
    pub stalls: u64,
    pub errors: u64,
}

/// Drive `source` until it ends, `stop` is raised, or the consumer goes away.
pub fn run_source<S: FrameSource>(
    mut source: S,
    frames: LatestSender<RawFrame>,
    stop: Arc<AtomicBool>,
) -> SourceStats {
    let mut stats = SourceStats::default();
    info!("capture loop started");

    while !stop.load(Ordering::Acquire) {
        match source.next_frame() {
            Ok(Some(frame)) => {
                if frames.send(frame).is_err() {
                    debug!("consumer gone, stopping capture");
                    break;
                }
                stats.delivered += 1;
            }
            Ok(None) => {
                info!("source reached end of stream");
                break;
            }
            Err(CaptureError::PoolExhausted(held)) => {
                // Buffers are still downstream; wait for one to come back.
                stats.stalls += 1;
                if stats.stalls.is_power_of_two() {
                    warn!(held, stalls = stats.stalls, "capture stalled on frame pool");
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => {
                stats.errors += 1;
                error!("Capture error: {}", e);
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    info!(
        delivered = stats.delivered,
        stalls = stats.stalls,
        errors = stats.errors,
        "capture loop finished"
    );
    stats
}

/// Settings for [`TestPatternSource`]
#[derive(Debug, Clone)]
pub struct PatternConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub encoding: SensorEncoding,
    pub buffer_count: usize,
    /// Stop after this many frames
    pub frame_limit: Option<u64>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            encoding: SensorEncoding::Nv21,
            buffer_count: 4,
            frame_limit: None,
        }
    }
}

/// Synthetic feed: a diagonal luma ramp with a bright bar sweeping across,
/// paced at the configured frame rate.
pub struct TestPatternSource {
    config: PatternConfig,
    pool: FramePool,
    sequence: u64,
    interval: Duration,
    next_due: Option<Instant>,
}

impl TestPatternSource {
    pub fn new(config: PatternConfig) -> Self {
        let interval = if config.fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / config.fps
        };
        Self {
            pool: FramePool::new(config.buffer_count),
            config,
            sequence: 0,
            interval,
            next_due: None,
        }
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    fn luma(&self) -> Vec<u8> {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let bar_width = (w / 16).max(1);
        let bar = (self.sequence as usize * 4) % w.max(1);
        let mut luma = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                let v = if x >= bar && x < bar + bar_width {
                    235
                } else {
                    (16 + (x + y) * 200 / (w + h).max(1)) as u8
                };
                luma.push(v);
            }
        }
        luma
    }

    fn planes(&self) -> Vec<Plane> {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let (cw, ch) = chroma_dims(w, h);
        let luma = self.luma();
        // Constant tint: V above neutral, U below.
        let (v, u) = (150u8, 110u8);

        match self.config.encoding {
            SensorEncoding::Nv21 if w % 2 == 0 => {
                let mut data = Vec::with_capacity(nv21_len(w, h));
                data.extend_from_slice(&luma);
                for _ in 0..cw * ch {
                    data.extend_from_slice(&[v, u]);
                }
                vec![Plane::packed(data, w)]
            }
            SensorEncoding::Nv21 => {
                // Odd width: pad luma rows to the chroma row length.
                let stride = 2 * cw;
                let mut data = Vec::with_capacity(stride * (h + ch));
                for row in luma.chunks_exact(w) {
                    data.extend_from_slice(row);
                    data.push(0);
                }
                for _ in 0..cw * ch {
                    data.extend_from_slice(&[v, u]);
                }
                vec![Plane::packed(data, stride)]
            }
            SensorEncoding::Yuv420Planar => vec![
                Plane::packed(luma, w),
                Plane::packed(vec![u; cw * ch], cw),
                Plane::packed(vec![v; cw * ch], cw),
            ],
            SensorEncoding::Unsupported(_) => vec![Plane::packed(Bytes::from(luma), w)],
        }
    }

    fn pace(&mut self) {
        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        // Fall behind rather than burst to catch up.
        self.next_due = Some(due.max(now) + self.interval);
    }
}

impl FrameSource for TestPatternSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        if self
            .config
            .frame_limit
            .is_some_and(|limit| self.sequence >= limit)
        {
            return Ok(None);
        }

        let lease = self
            .pool
            .try_acquire()
            .ok_or(CaptureError::PoolExhausted(self.pool.outstanding()))?;

        self.pace();
        self.sequence += 1;

        let meta = FrameMetadata {
            sequence: self.sequence,
            width: self.config.width,
            height: self.config.height,
            encoding: self.config.encoding,
            device_timestamp: None,
        };
        Ok(Some(RawFrame::new(lease, meta, self.planes())))
    }
}
