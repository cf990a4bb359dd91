use crate::error::{DetectError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }
}

impl PixelFormat {
    fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Yuyv => 2,
        }
    }
}

/// Convert one captured buffer to packed RGB8.
///
/// `stride` is the driver's bytes per line; rows padded past
/// `width * bytes_per_pixel` are repacked. A stride of 0 means packed rows.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let packed = unpad_rows(pixels, width, height, stride, format)?;
    match format {
        PixelFormat::Rgb24 => Ok(packed),
        PixelFormat::Yuyv => yuyv_to_rgb(&packed, width, height),
    }
}

fn unpad_rows(
    pixels: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let row = width as usize * format.bytes_per_pixel();
    let stride = (stride as usize).max(row);
    let rows = height as usize;
    let needed = match rows {
        0 => 0,
        n => stride * (n - 1) + row,
    };
    if pixels.len() < needed {
        return Err(DetectError::StreamEnded(format!(
            "short {:?} frame: expected {} bytes, got {}",
            format,
            needed,
            pixels.len()
        )));
    }

    if stride == row {
        return Ok(pixels[..row * rows].to_vec());
    }
    let mut packed = Vec::with_capacity(row * rows);
    for line in pixels.chunks(stride).take(rows) {
        packed.extend_from_slice(&line[..row]);
    }
    Ok(packed)
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let expected = w * h * 2;
    if w % 2 != 0 || pixels.len() < expected {
        return Err(DetectError::StreamEnded(format!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        )));
    }

    let mut rgb = Vec::with_capacity(w * h * 3);
    for chunk in pixels[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }

    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
