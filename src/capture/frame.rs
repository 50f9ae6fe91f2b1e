use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Raw pixel encodings a sensor can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorEncoding {
    /// YUV 4:2:0 with separate chroma planes (Y, U, V) or Y plus one VU plane
    Yuv420Planar,
    /// YUV 4:2:0 semi-planar, Y followed by interleaved V/U
    Nv21,
    /// Anything else the device hands us, tagged with its raw code
    Unsupported(u32),
}

/// One contiguous region of a frame
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    /// Bytes between the starts of consecutive rows
    pub row_stride: usize,
    /// Bytes between consecutive samples within a row
    pub pixel_stride: usize,
}

impl Plane {
    pub fn packed(data: impl Into<Bytes>, row_stride: usize) -> Self {
        Self {
            data: data.into(),
            row_stride,
            pixel_stride: 1,
        }
    }

    pub fn with_pixel_stride(mut self, pixel_stride: usize) -> Self {
        self.pixel_stride = pixel_stride;
        self
    }

    /// Sample at column `x` of row `y`, `offset` bytes past the sample start.
    pub(crate) fn sample(&self, x: usize, y: usize, offset: usize) -> Option<u8> {
        self.data
            .get(y * self.row_stride + x * self.pixel_stride + offset)
            .copied()
    }

    /// The first `len` bytes of row `y`.
    pub(crate) fn row(&self, y: usize, len: usize) -> Option<&[u8]> {
        let start = y * self.row_stride;
        self.data.get(start..start + len)
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub encoding: SensorEncoding,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// A captured frame on loan from a [`FramePool`].
///
/// The pool slot comes back when the frame is released or dropped, whichever
/// happens first; `release` consumes the frame so it cannot be touched again.
pub struct RawFrame {
    meta: FrameMetadata,
    planes: Vec<Plane>,
    /// Capture timestamp for latency tracking
    timestamp: Instant,
    _lease: FrameLease,
}

impl RawFrame {
    pub fn new(lease: FrameLease, meta: FrameMetadata, planes: Vec<Plane>) -> Self {
        Self {
            meta,
            planes,
            timestamp: Instant::now(),
            _lease: lease,
        }
    }

    pub fn meta(&self) -> &FrameMetadata {
        &self.meta
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn encoding(&self) -> SensorEncoding {
        self.meta.encoding
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Hand the buffer back to the source.
    pub fn release(self) {
        trace!(sequence = self.meta.sequence, "frame released");
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("meta", &self.meta)
            .field("planes", &self.planes.len())
            .finish()
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    capacity: usize,
    outstanding: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Bounded set of capture buffers shared between a source and its consumers
#[derive(Debug, Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity: capacity.max(1),
                ..Default::default()
            }),
        }
    }

    /// Take a free slot, or `None` while every slot is still held downstream.
    pub fn try_acquire(&self) -> Option<FrameLease> {
        let capacity = self.inner.capacity;
        self.inner
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < capacity).then_some(held + 1)
            })
            .ok()?;
        self.inner.acquired.fetch_add(1, Ordering::Relaxed);
        Some(FrameLease {
            pool: Arc::clone(&self.inner),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    pub fn acquired(&self) -> u64 {
        self.inner.acquired.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.inner.released.load(Ordering::Relaxed)
    }
}

/// One pool slot; returned to the pool on drop
#[derive(Debug)]
pub struct FrameLease {
    pool: Arc<PoolInner>,
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        self.pool.released.fetch_add(1, Ordering::Relaxed);
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(sequence: u64) -> FrameMetadata {
        FrameMetadata {
            sequence,
            width: 2,
            height: 2,
            encoding: SensorEncoding::Nv21,
            device_timestamp: None,
        }
    }

    #[test]
    fn pool_refuses_beyond_capacity() {
        let pool = FramePool::new(2);
        let a = pool.try_acquire().unwrap();
        let _b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.outstanding(), 2);

        drop(a);
        assert_eq!(pool.outstanding(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn release_returns_the_lease_once() {
        let pool = FramePool::new(1);
        let frame = RawFrame::new(
            pool.try_acquire().unwrap(),
            meta(7),
            vec![Plane::packed(vec![0u8; 6], 2)],
        );
        assert_eq!(frame.sequence(), 7);
        assert_eq!(pool.outstanding(), 1);

        frame.release();
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.released(), 1);
        assert_eq!(pool.acquired(), 1);
    }

    #[test]
    fn plane_sampling_honours_strides() {
        // Two rows of four bytes, samples two bytes apart.
        let plane = Plane::packed(vec![1u8, 2, 3, 4, 5, 6, 7, 8], 4).with_pixel_stride(2);
        assert_eq!(plane.sample(0, 0, 0), Some(1));
        assert_eq!(plane.sample(1, 0, 1), Some(4));
        assert_eq!(plane.sample(1, 1, 0), Some(7));
        assert_eq!(plane.sample(2, 1, 0), None);
        assert_eq!(plane.row(1, 4), Some(&[5u8, 6, 7, 8][..]));
        assert_eq!(plane.row(1, 5), None);
    }
}
