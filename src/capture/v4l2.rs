//! V4L2 device source delivering NV21 or planar YU12 frames

use std::time::Duration;

use bytes::Bytes;
use tracing::{info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::decoder::chroma_dims;
use super::frame::{FrameMetadata, FramePool, Plane, RawFrame, SensorEncoding};
use super::source::FrameSource;
use crate::error::CaptureError;
use crate::CaptureConfig;

pub const NV21: FourCC = FourCC { repr: *b"NV21" };
pub const YU12: FourCC = FourCC { repr: *b"YU12" };

pub fn encoding_for(fourcc: FourCC) -> SensorEncoding {
    if fourcc == NV21 {
        SensorEncoding::Nv21
    } else if fourcc == YU12 {
        SensorEncoding::Yuv420Planar
    } else {
        SensorEncoding::Unsupported(u32::from_le_bytes(fourcc.repr))
    }
}

fn device_error(e: impl std::fmt::Display) -> CaptureError {
    CaptureError::Device(e.to_string())
}

pub struct V4l2Source {
    _device: Box<Device>,
    stream: MmapStream<'static>,
    pool: FramePool,
    width: u32,
    height: u32,
    stride: usize,
    encoding: SensorEncoding,
    sequence: u64,
}

impl V4l2Source {
    /// Open the device, negotiate the format and start streaming
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(device_error("device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.encoding {
            SensorEncoding::Nv21 => NV21,
            SensorEncoding::Yuv420Planar => YU12,
            SensorEncoding::Unsupported(code) => {
                return Err(device_error(format!("cannot request encoding {code:#x}")))
            }
        };
        let fmt = device.set_format(&fmt)?;
        info!(
            "Negotiated {}x{} {} (stride {})",
            fmt.width, fmt.height, fmt.fourcc, fmt.stride
        );

        let buffer_count = config.buffer_count.max(2) as u32;
        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, buffer_count)?;
        info!("Capture stream started with {} buffers", buffer_count);

        Ok(Self {
            _device: Box::new(device),
            stream,
            pool: FramePool::new(config.buffer_count),
            width: fmt.width,
            height: fmt.height,
            stride: (fmt.stride as usize).max(fmt.width as usize),
            encoding: encoding_for(fmt.fourcc),
            sequence: 0,
        })
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    /// Split one driver buffer into the planes its encoding describes.
    fn planes(&self, data: Bytes) -> Vec<Plane> {
        match self.encoding {
            SensorEncoding::Yuv420Planar => {
                let (w, h) = (self.width as usize, self.height as usize);
                let luma_len = (self.stride * h).min(data.len());
                let chroma_stride = self.stride.div_ceil(2);
                let chroma_len = chroma_stride * chroma_dims(w, h).1;
                let u_end = (luma_len + chroma_len).min(data.len());
                let v_end = (u_end + chroma_len).min(data.len());
                vec![
                    Plane::packed(data.slice(..luma_len), self.stride),
                    Plane::packed(data.slice(luma_len..u_end), chroma_stride),
                    Plane::packed(data.slice(u_end..v_end), chroma_stride),
                ]
            }
            _ => vec![Plane::packed(data, self.stride)],
        }
    }
}

impl FrameSource for V4l2Source {
    #[instrument(level = "trace", skip(self))]
    fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        let lease = self
            .pool
            .try_acquire()
            .ok_or(CaptureError::PoolExhausted(self.pool.outstanding()))?;

        let (buf, meta) = self.stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        let data = Bytes::copy_from_slice(&buf[..used]);

        self.sequence += 1;
        let frame_meta = FrameMetadata {
            sequence: self.sequence,
            width: self.width,
            height: self.height,
            encoding: self.encoding,
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            ),
        };

        let planes = self.planes(data);
        Ok(Some(RawFrame::new(lease, frame_meta, planes)))
    }
}
