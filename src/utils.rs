use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing::info;
use v4l::{capability::Flags, video::Capture, Device};

use crate::capture::frame::SensorEncoding;
use crate::capture::v4l2::{NV21, YU12};

// Detected capture device info
#[derive(Debug, Clone)]
pub struct FoundDevice {
    pub path: String,
    pub encoding: SensorEncoding,
}

/// Auto-detect the first capture device offering NV21 or YU12
pub fn auto_detect_device() -> Result<FoundDevice> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        // Prefer the interleaved layout, it needs no plane assembly
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };
        let encoding = if formats.iter().any(|f| f.fourcc == NV21) {
            SensorEncoding::Nv21
        } else if formats.iter().any(|f| f.fourcc == YU12) {
            SensorEncoding::Yuv420Planar
        } else {
            continue;
        };

        info!("Found {:?} device: {} - {}", encoding, path, caps.card);
        return Ok(FoundDevice { path, encoding });
    }

    Err(eyre!("No suitable capture device found"))
}
