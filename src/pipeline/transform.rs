use image::GrayImage;
use tracing::instrument;

use super::edge::{EdgeConfig, EdgeOperator};
use super::mode::{ModeControl, ProcessingMode};
use crate::capture::normalize::PixelBuffer;
use crate::error::FrameError;

pub const EDGE_COLOR: [u8; 4] = [255, 255, 255, 255];
pub const BACKGROUND_COLOR: [u8; 4] = [0, 0, 0, 255];

/// Renderer-ready image, packed RGBA with 4 bytes per pixel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ProcessedBuffer {
    pub const BYTES_PER_PIXEL: usize = 4;

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * Self::BYTES_PER_PIXEL;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    pub fn pixels(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(Self::BYTES_PER_PIXEL)
    }
}

/// The active mode plus the transforms it selects between.
///
/// `apply` keeps nothing between calls, so skipping frames never changes the
/// output of the ones that do get processed.
pub struct ProcessingPipeline {
    mode: ModeControl,
    edge: Box<dyn EdgeOperator>,
}

impl Default for ProcessingPipeline {
    fn default() -> Self {
        Self::new(ModeControl::default(), EdgeConfig::default().build())
    }
}

impl ProcessingPipeline {
    pub fn new(mode: ModeControl, edge: Box<dyn EdgeOperator>) -> Self {
        Self { mode, edge }
    }

    /// Handle for control surfaces; clones share the same slot.
    pub fn mode_control(&self) -> ModeControl {
        self.mode.clone()
    }

    pub fn current_mode(&self) -> ProcessingMode {
        self.mode.get()
    }

    pub fn edge_operator(&self) -> &str {
        self.edge.name()
    }

    #[instrument(level = "trace", skip(self, buffer), fields(width = buffer.width, height = buffer.height))]
    pub fn apply(
        &self,
        buffer: &PixelBuffer,
        mode: ProcessingMode,
    ) -> Result<ProcessedBuffer, FrameError> {
        let pixels = buffer.width as usize * buffer.height as usize;
        if buffer.data.len() != pixels * PixelBuffer::BYTES_PER_PIXEL {
            return Err(FrameError::TransformFailure {
                mode,
                reason: format!(
                    "{} bytes for a {}x{} raster",
                    buffer.data.len(),
                    buffer.width,
                    buffer.height
                ),
            });
        }

        let data = match mode {
            ProcessingMode::Original => original(&buffer.data),
            ProcessingMode::Grayscale => grayscale(&buffer.data),
            ProcessingMode::EdgeDetect => self.edges(buffer, mode)?,
        };

        Ok(ProcessedBuffer {
            width: buffer.width,
            height: buffer.height,
            data,
        })
    }

    fn edges(&self, buffer: &PixelBuffer, mode: ProcessingMode) -> Result<Vec<u8>, FrameError> {
        let samples: Vec<u8> = buffer
            .data
            .chunks_exact(PixelBuffer::BYTES_PER_PIXEL)
            .map(|px| luma(px[0], px[1], px[2]))
            .collect();
        let gray = GrayImage::from_raw(buffer.width, buffer.height, samples).ok_or_else(|| {
            FrameError::TransformFailure {
                mode,
                reason: "luma plane size mismatch".into(),
            }
        })?;

        let mask = self.edge.detect(&gray);
        if mask.len() != gray.len() {
            return Err(FrameError::TransformFailure {
                mode,
                reason: format!(
                    "{} returned {} flags for {} pixels",
                    self.edge.name(),
                    mask.len(),
                    gray.len()
                ),
            });
        }

        let mut out = Vec::with_capacity(mask.len() * ProcessedBuffer::BYTES_PER_PIXEL);
        for edge in mask {
            out.extend_from_slice(if edge { &EDGE_COLOR } else { &BACKGROUND_COLOR });
        }
        Ok(out)
    }
}

/// BT.601 luma in integer arithmetic.
#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32 + 128) >> 8) as u8
}

fn original(rgb: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
    for chunk in rgb.chunks_exact(3) {
        rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
    }
    rgba
}

fn grayscale(rgb: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
    for chunk in rgb.chunks_exact(3) {
        let y = luma(chunk[0], chunk[1], chunk[2]);
        rgba.extend_from_slice(&[y, y, y, 255]);
    }
    rgba
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> PixelBuffer {
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                data.extend_from_slice(&[(x * 8) as u8, (y * 16) as u8, 200]);
            }
        }
        PixelBuffer {
            width: w,
            height: h,
            data,
        }
    }

    #[test]
    fn original_copies_rgb_and_adds_alpha() {
        let input = gradient(4, 3);
        let out = ProcessingPipeline::default()
            .apply(&input, ProcessingMode::Original)
            .unwrap();
        assert_eq!((out.width, out.height), (4, 3));
        for y in 0..3 {
            for x in 0..4 {
                let [r, g, b] = input.pixel(x, y);
                assert_eq!(out.pixel(x, y), [r, g, b, 255]);
            }
        }
    }

    #[test]
    fn luma_of_white_and_black() {
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(0, 0, 0), 0);
        assert!(luma(0, 255, 0) > luma(255, 0, 0));
        assert!(luma(255, 0, 0) > luma(0, 0, 255));
    }

    #[test]
    fn size_mismatch_is_a_transform_failure() {
        let bad = PixelBuffer {
            width: 4,
            height: 4,
            data: vec![0; 10],
        };
        let err = ProcessingPipeline::default()
            .apply(&bad, ProcessingMode::Grayscale)
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::TransformFailure {
                mode: ProcessingMode::Grayscale,
                ..
            }
        ));
    }

    struct Truncating;

    impl EdgeOperator for Truncating {
        fn name(&self) -> &'static str {
            "truncating"
        }

        fn detect(&self, _luma: &GrayImage) -> Vec<bool> {
            vec![true; 3]
        }
    }

    #[test]
    fn short_edge_mask_is_rejected() {
        let pipeline = ProcessingPipeline::new(ModeControl::default(), Box::new(Truncating));
        let err = pipeline
            .apply(&gradient(4, 4), ProcessingMode::EdgeDetect)
            .unwrap_err();
        assert!(matches!(err, FrameError::TransformFailure { .. }));
    }
}
