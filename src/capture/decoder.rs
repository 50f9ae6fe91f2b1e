use crate::error::FrameError;

/// Chroma plane dimensions for 4:2:0 subsampling, rounding odd sizes up.
pub fn chroma_dims(width: usize, height: usize) -> (usize, usize) {
    (width.div_ceil(2), height.div_ceil(2))
}

/// Size of an NV21 image: full-resolution luma plus one V/U pair per 2x2 block.
pub fn nv21_len(width: usize, height: usize) -> usize {
    let (cw, ch) = chroma_dims(width, height);
    width * height + 2 * cw * ch
}

/// Decode NV21 into packed RGB24 (BT.601, full range).
pub fn decode_nv21(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return Err(FrameError::UnsupportedFormat(format!(
            "empty image {width}x{height}"
        )));
    }

    let expected = nv21_len(w, h);
    if data.len() < expected {
        return Err(FrameError::UnsupportedFormat(format!(
            "NV21 buffer holds {} bytes, {width}x{height} needs {expected}",
            data.len()
        )));
    }

    let (luma, chroma) = data[..expected].split_at(w * h);
    let chroma_row = 2 * chroma_dims(w, h).0;
    let mut rgb = vec![0u8; w * h * 3];

    for (y, (luma_row, out_row)) in luma
        .chunks_exact(w)
        .zip(rgb.chunks_exact_mut(w * 3))
        .enumerate()
    {
        let vu = &chroma[(y / 2) * chroma_row..][..chroma_row];
        for (x, (&luma, px)) in luma_row.iter().zip(out_row.chunks_exact_mut(3)).enumerate() {
            let v = vu[(x / 2) * 2] as f32 - 128.0;
            let u = vu[(x / 2) * 2 + 1] as f32 - 128.0;
            let y_val = luma as f32;

            px[0] = (y_val + 1.402 * v).clamp(0.0, 255.0) as u8;
            px[1] = (y_val - 0.344_136 * u - 0.714_136 * v).clamp(0.0, 255.0) as u8;
            px[2] = (y_val + 1.772 * u).clamp(0.0, 255.0) as u8;
        }
    }

    Ok(rgb)
}
