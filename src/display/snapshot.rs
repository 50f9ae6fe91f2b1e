use std::path::{Path, PathBuf};

use color_eyre::{eyre::eyre, Result};
use image::RgbaImage;
use tracing::info;

use crate::pipeline::transform::ProcessedBuffer;
use crate::CONFIG;

/// Write a presented frame to `path` as PNG.
pub fn save_png(frame: &ProcessedBuffer, path: &Path) -> Result<()> {
    let image = RgbaImage::from_raw(frame.width, frame.height, frame.data.clone())
        .ok_or_else(|| eyre!("{}x{} frame has {} bytes", frame.width, frame.height, frame.data.len()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    image.save_with_format(path, image::ImageFormat::Png)?;
    info!("Snapshot saved to {}", path.display());
    Ok(())
}

/// `dir/frame-<sequence>.png`
pub fn snapshot_path(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(format!("frame-{sequence:06}.png"))
}

/// Default snapshot location under the configured `display.snapshot_dir`.
pub fn configured_snapshot_path(sequence: u64) -> PathBuf {
    snapshot_path(&CONFIG.load().display.snapshot_dir, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_png() {
        let dir = std::env::temp_dir().join(format!("edgeview-snap-{}", std::process::id()));
        let path = snapshot_path(&dir, 3);
        let frame = ProcessedBuffer {
            width: 2,
            height: 1,
            data: vec![255, 0, 0, 255, 0, 0, 0, 255],
        };

        save_png(&frame, &path).unwrap();
        let back = image::open(&path).unwrap().to_rgba8();
        assert_eq!(back.dimensions(), (2, 1));
        assert_eq!(back.into_raw(), frame.data);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn default_path_follows_the_live_config() {
        let mut config = (**CONFIG.load()).clone();
        config.display.snapshot_dir = PathBuf::from("/tmp/edgeview-shots");
        CONFIG.store(std::sync::Arc::new(config));

        assert_eq!(
            configured_snapshot_path(12),
            PathBuf::from("/tmp/edgeview-shots/frame-000012.png")
        );
    }

    #[test]
    fn short_buffer_is_an_error() {
        let frame = ProcessedBuffer {
            width: 4,
            height: 4,
            data: vec![0; 3],
        };
        assert!(save_png(&frame, Path::new("never-written.png")).is_err());
    }
}
