//! Sensor encoding → canonical RGB raster.
//!
//! Both supported encodings are first brought into one contiguous NV21 image,
//! then decoded. Nothing is returned unless the whole frame converted.

use std::ops::Range;

use tracing::instrument;

use super::decoder::{self, chroma_dims, nv21_len};
use super::frame::{Plane, RawFrame, SensorEncoding};
use crate::error::FrameError;

/// Decoded image, packed RGB with 3 bytes per pixel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub const BYTES_PER_PIXEL: usize = 3;

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * Self::BYTES_PER_PIXEL;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FormatNormalizer;

impl FormatNormalizer {
    pub fn new() -> Self {
        Self
    }

    #[instrument(level = "trace", skip_all, fields(sequence = frame.sequence()))]
    pub fn normalize(&self, frame: &RawFrame) -> Result<PixelBuffer, FrameError> {
        let nv21 = self.assemble_nv21(frame)?;
        let data = decoder::decode_nv21(&nv21, frame.width(), frame.height())?;
        Ok(PixelBuffer {
            width: frame.width(),
            height: frame.height(),
            data,
        })
    }

    /// Collect the frame's planes into a single NV21 image.
    pub fn assemble_nv21(&self, frame: &RawFrame) -> Result<Vec<u8>, FrameError> {
        let (w, h) = (frame.width() as usize, frame.height() as usize);
        if w == 0 || h == 0 {
            return Err(unsupported(format!("empty frame {w}x{h}")));
        }

        match (frame.encoding(), frame.planes()) {
            (SensorEncoding::Nv21, [plane]) => pack_nv21(plane, w, h),
            (SensorEncoding::Yuv420Planar, [luma, vu]) => pack_planar(luma, vu, vu, (0, 1), w, h),
            (SensorEncoding::Yuv420Planar, [luma, u, v]) => pack_planar(luma, v, u, (0, 0), w, h),
            (SensorEncoding::Unsupported(code), _) => {
                Err(unsupported(format!("sensor encoding {code:#x}")))
            }
            (encoding, planes) => Err(unsupported(format!(
                "{encoding:?} with {} planes",
                planes.len()
            ))),
        }
    }
}

fn unsupported(reason: String) -> FrameError {
    FrameError::UnsupportedFormat(reason)
}

fn copy_rows(
    plane: &Plane,
    rows: Range<usize>,
    row_len: usize,
    out: &mut Vec<u8>,
) -> Result<(), FrameError> {
    for y in rows {
        let row = plane
            .row(y, row_len)
            .ok_or_else(|| unsupported(format!("plane too short at row {y}")))?;
        out.extend_from_slice(row);
    }
    Ok(())
}

/// Interleaved input is already NV21; only row padding is stripped.
fn pack_nv21(plane: &Plane, w: usize, h: usize) -> Result<Vec<u8>, FrameError> {
    let (cw, ch) = chroma_dims(w, h);
    let len = nv21_len(w, h);
    let row_len = w.max(2 * cw);
    if plane.row_stride < row_len {
        return Err(unsupported(format!(
            "NV21 row stride {} below row length {row_len}",
            plane.row_stride
        )));
    }
    if plane.row_stride == w && w == 2 * cw {
        return plane
            .data
            .get(..len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| unsupported(format!("NV21 plane holds {} of {len} bytes", plane.data.len())));
    }

    let mut out = Vec::with_capacity(len);
    copy_rows(plane, 0..h, w, &mut out)?;
    copy_rows(plane, h..h + ch, 2 * cw, &mut out)?;
    Ok(out)
}

/// Luma rows first, then V/U pairs sampled from the chroma plane(s).
fn pack_planar(
    luma: &Plane,
    v_plane: &Plane,
    u_plane: &Plane,
    (v_offset, u_offset): (usize, usize),
    w: usize,
    h: usize,
) -> Result<Vec<u8>, FrameError> {
    let (cw, ch) = chroma_dims(w, h);
    let mut out = Vec::with_capacity(nv21_len(w, h));

    if luma.pixel_stride != 1 {
        return Err(unsupported(format!(
            "luma pixel stride {}",
            luma.pixel_stride
        )));
    }
    if luma.row_stride < w {
        return Err(unsupported(format!(
            "luma row stride {} below width {w}",
            luma.row_stride
        )));
    }
    for plane in [v_plane, u_plane] {
        if plane.pixel_stride == 0 || plane.row_stride < cw * plane.pixel_stride {
            return Err(unsupported(format!(
                "chroma row stride {} with pixel stride {} cannot hold {cw} samples",
                plane.row_stride, plane.pixel_stride
            )));
        }
    }
    copy_rows(luma, 0..h, w, &mut out)?;

    for y in 0..ch {
        for x in 0..cw {
            let v = v_plane.sample(x, y, v_offset);
            let u = u_plane.sample(x, y, u_offset);
            match (v, u) {
                (Some(v), Some(u)) => out.extend_from_slice(&[v, u]),
                _ => return Err(unsupported(format!("chroma too short at ({x}, {y})"))),
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameMetadata, FramePool};

    fn frame(pool: &FramePool, encoding: SensorEncoding, w: u32, h: u32, planes: Vec<Plane>) -> RawFrame {
        RawFrame::new(
            pool.try_acquire().unwrap(),
            FrameMetadata {
                sequence: 0,
                width: w,
                height: h,
                encoding,
                device_timestamp: None,
            },
            planes,
        )
    }

    #[test]
    fn three_planes_interleave_v_before_u() {
        let pool = FramePool::new(1);
        let f = frame(
            &pool,
            SensorEncoding::Yuv420Planar,
            4,
            2,
            vec![
                Plane::packed(vec![10u8; 8], 4),
                Plane::packed(vec![1u8, 2], 2),
                Plane::packed(vec![3u8, 4], 2),
            ],
        );
        let nv21 = FormatNormalizer.assemble_nv21(&f).unwrap();
        assert_eq!(nv21.len(), 8 + 4);
        assert_eq!(&nv21[..8], &[10u8; 8]);
        assert_eq!(&nv21[8..], &[3, 1, 4, 2]);
    }

    #[test]
    fn two_plane_form_reads_vu_pairs() {
        let pool = FramePool::new(1);
        let f = frame(
            &pool,
            SensorEncoding::Yuv420Planar,
            4,
            2,
            vec![
                Plane::packed(vec![0u8; 8], 4),
                Plane::packed(vec![9u8, 8, 7, 6], 4).with_pixel_stride(2),
            ],
        );
        let nv21 = FormatNormalizer.assemble_nv21(&f).unwrap();
        assert_eq!(&nv21[8..], &[9, 8, 7, 6]);
    }

    #[test]
    fn padded_rows_are_stripped() {
        let pool = FramePool::new(1);
        // 2x2 NV21 with rows padded to 4 bytes: 2 luma rows + 1 chroma row.
        let data = vec![1u8, 2, 0, 0, 3, 4, 0, 0, 128, 128, 0, 0];
        let f = frame(&pool, SensorEncoding::Nv21, 2, 2, vec![Plane::packed(data, 4)]);
        let nv21 = FormatNormalizer.assemble_nv21(&f).unwrap();
        assert_eq!(nv21, vec![1, 2, 3, 4, 128, 128]);
    }

    #[test]
    fn overlapping_rows_are_rejected() {
        let pool = FramePool::new(3);

        // 4x2 NV21 claiming rows 3 bytes apart.
        let nv21 = frame(&pool, SensorEncoding::Nv21, 4, 2, vec![Plane::packed(vec![0u8; 12], 3)]);
        assert!(matches!(
            FormatNormalizer.assemble_nv21(&nv21),
            Err(FrameError::UnsupportedFormat(_))
        ));

        let short_luma = frame(
            &pool,
            SensorEncoding::Yuv420Planar,
            4,
            2,
            vec![
                Plane::packed(vec![0u8; 8], 2),
                Plane::packed(vec![128u8; 2], 2),
                Plane::packed(vec![128u8; 2], 2),
            ],
        );
        assert!(matches!(
            FormatNormalizer.assemble_nv21(&short_luma),
            Err(FrameError::UnsupportedFormat(_))
        ));

        // Interleaved VU samples two bytes apart need four bytes per row.
        let short_chroma = frame(
            &pool,
            SensorEncoding::Yuv420Planar,
            4,
            2,
            vec![
                Plane::packed(vec![0u8; 8], 4),
                Plane::packed(vec![128u8; 4], 2).with_pixel_stride(2),
            ],
        );
        assert!(matches!(
            FormatNormalizer.assemble_nv21(&short_chroma),
            Err(FrameError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn odd_width_interleaved_keeps_full_chroma_rows() {
        let pool = FramePool::new(1);
        // 3x2: luma rows of 3, one chroma row of 4, packed at stride 4.
        let data = vec![1u8, 2, 3, 0, 4, 5, 6, 0, 128, 128, 128, 128];
        let f = frame(&pool, SensorEncoding::Nv21, 3, 2, vec![Plane::packed(data, 4)]);
        let nv21 = FormatNormalizer.assemble_nv21(&f).unwrap();
        assert_eq!(nv21, vec![1, 2, 3, 4, 5, 6, 128, 128, 128, 128]);
    }
}
