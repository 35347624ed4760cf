//! JPEG compression through the `image` crate.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use omv_hal::{EncodeError, FrameEncoder, ImageRef, PixFormat};

/// Baseline JPEG encoder. Keeps its conversion and output buffers between
/// frames.
#[derive(Debug, Default)]
pub struct ImageJpegEncoder {
    pixels: Vec<u8>,
    output: Vec<u8>,
}

impl ImageJpegEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand `src` to 8-bit samples in `self.pixels`.
    fn convert(&mut self, src: &ImageRef<'_>) -> Result<ExtendedColorType, EncodeError> {
        let (w, h) = (src.width as usize, src.height as usize);
        if src.data.len() < src.format.image_size(src.width, src.height) {
            return Err(EncodeError::Unsupported);
        }
        self.pixels.clear();
        match src.format {
            PixFormat::Rgb565 => {
                self.pixels.reserve(w * h * 3);
                for px in src.data[..w * h * 2].chunks_exact(2) {
                    self.pixels.extend_from_slice(&rgb565_to_rgb888(u16::from_le_bytes([px[0], px[1]])));
                }
                Ok(ExtendedColorType::Rgb8)
            }
            PixFormat::Grayscale => {
                self.pixels.extend_from_slice(&src.data[..w * h]);
                Ok(ExtendedColorType::L8)
            }
            PixFormat::Yuv422 => {
                // Luma only.
                self.pixels.extend(src.data[..w * h * 2].iter().step_by(2));
                Ok(ExtendedColorType::L8)
            }
            PixFormat::Binary => {
                let stride = w.div_ceil(32) * 4;
                for row in src.data.chunks_exact(stride).take(h) {
                    self.pixels
                        .extend((0..w).map(|x| if row[x / 8] & (1 << (x % 8)) != 0 { 0xFF } else { 0x00 }));
                }
                Ok(ExtendedColorType::L8)
            }
            PixFormat::Bayer | PixFormat::Jpeg | PixFormat::Png | PixFormat::Invalid => Err(EncodeError::Unsupported),
        }
    }
}

/// Widen one RGB565 pixel, replicating high bits into the low ones.
pub fn rgb565_to_rgb888(px: u16) -> [u8; 3] {
    let r = ((px >> 11) & 0x1F) as u8;
    let g = ((px >> 5) & 0x3F) as u8;
    let b = (px & 0x1F) as u8;
    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]
}

impl FrameEncoder for ImageJpegEncoder {
    fn compress(&mut self, src: &ImageRef<'_>, dst: &mut [u8], quality: u8) -> Result<usize, EncodeError> {
        let color = self.convert(src)?;
        self.output.clear();
        let encoded = {
            let mut jpeg = JpegEncoder::new_with_quality(&mut self.output, quality.clamp(1, 100));
            jpeg.encode(&self.pixels, src.width, src.height, color)
        };
        if let Err(e) = encoded {
            log::warn!("jpeg encode of {}x{} failed: {}", src.width, src.height, e);
            return Err(EncodeError::Unsupported);
        }
        let out = dst.get_mut(..self.output.len()).ok_or(EncodeError::Overflow)?;
        out.copy_from_slice(&self.output);
        Ok(self.output.len())
    }
}
