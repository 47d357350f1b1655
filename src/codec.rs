use crate::error::CodecError;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use tracing::trace;

/// JPEG quality used for on-demand snapshots
pub const JPEG_QUALITY: u8 = 95;

/// Raw frame to JPEG conversion.
///
/// Input is NV12: a full-resolution luma plane followed by one interleaved
/// UV plane at quarter resolution. Trailing bytes beyond the NV12 size are
/// ignored.
pub struct ImageCodec;

impl ImageCodec {
    /// Bytes in one NV12/NV21 frame
    pub fn frame_size(width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize;
        luma + luma / 2
    }

    fn validate(data: &[u8], width: u32, height: u32) -> Result<usize, CodecError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(CodecError::InvalidDimensions { width, height });
        }

        let expected = Self::frame_size(width, height);
        if data.len() < expected {
            return Err(CodecError::InvalidSize {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(expected)
    }

    /// Swap each interleaved chroma pair (UV -> VU).
    pub fn nv12_to_nv21(nv12: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CodecError> {
        let size = Self::validate(nv12, width, height)?;
        let luma = width as usize * height as usize;

        let mut nv21 = nv12[..size].to_vec();
        for pair in nv21[luma..].chunks_exact_mut(2) {
            pair.swap(0, 1);
        }
        Ok(nv21)
    }

    /// Convert NV21 to packed RGB8 with full-range BT.601 (JFIF) coefficients.
    pub fn nv21_to_rgb(nv21: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CodecError> {
        Self::validate(nv21, width, height)?;
        let (w, h) = (width as usize, height as usize);
        let (luma, chroma) = nv21.split_at(w * h);

        let mut rgb = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            let chroma_row = &chroma[(y / 2) * w..(y / 2) * w + w];
            for x in 0..w {
                let c = (x / 2) * 2;
                let v = chroma_row[c] as i32 - 128;
                let u = chroma_row[c + 1] as i32 - 128;
                let l = luma[y * w + x] as i32;

                rgb.push(clamp(l + ((91_881 * v) >> 16)));
                rgb.push(clamp(l - ((22_554 * u + 46_802 * v) >> 16)));
                rgb.push(clamp(l + ((116_130 * u) >> 16)));
            }
        }
        Ok(rgb)
    }

    /// NV12 -> NV21 -> RGB -> JPEG at [`JPEG_QUALITY`].
    pub fn encode_jpeg(nv12: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CodecError> {
        let nv21 = Self::nv12_to_nv21(nv12, width, height)?;
        let rgb = Self::nv21_to_rgb(&nv21, width, height)?;

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode(&rgb, width, height, ColorType::Rgb8)
            .map_err(|e| CodecError::JpegEncoding {
                details: e.to_string(),
            })?;

        trace!(
            "Encoded {}x{} frame to {} byte JPEG",
            width,
            height,
            jpeg.len()
        );
        Ok(jpeg)
    }
}

fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_nv12(width: u32, height: u32, y: u8, u: u8, v: u8) -> Vec<u8> {
        let luma = (width * height) as usize;
        let mut data = vec![y; luma];
        for _ in 0..luma / 4 {
            data.push(u);
            data.push(v);
        }
        data
    }

    #[test]
    fn test_nv12_to_nv21_swaps_chroma() {
        let nv12 = vec![1, 2, 3, 4, 10, 20];
        let nv21 = ImageCodec::nv12_to_nv21(&nv12, 2, 2).unwrap();
        assert_eq!(nv21, vec![1, 2, 3, 4, 20, 10]);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut nv12 = vec![1, 2, 3, 4, 10, 20];
        nv12.extend_from_slice(&[99, 99]);
        assert_eq!(ImageCodec::nv12_to_nv21(&nv12, 2, 2).unwrap().len(), 6);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(
            ImageCodec::nv12_to_nv21(&[0; 6], 3, 2),
            Err(CodecError::InvalidDimensions { width: 3, height: 2 })
        );
        assert_eq!(
            ImageCodec::nv12_to_nv21(&[], 0, 0),
            Err(CodecError::InvalidDimensions { width: 0, height: 0 })
        );
        assert_eq!(
            ImageCodec::encode_jpeg(&[0; 5], 2, 2),
            Err(CodecError::InvalidSize {
                width: 2,
                height: 2,
                expected: 6,
                actual: 5
            })
        );
    }

    #[test]
    fn test_neutral_chroma_is_gray() {
        let nv21 = solid_nv12(2, 2, 77, 128, 128);
        let rgb = ImageCodec::nv21_to_rgb(&nv21, 2, 2).unwrap();
        assert_eq!(rgb.len(), 12);
        assert!(rgb.iter().all(|&c| c == 77));
    }

    #[test]
    fn test_primary_colors() {
        // Full-range BT.601 red: Y=76, Cb=85, Cr=255 (NV21 stores V first).
        let red = ImageCodec::nv21_to_rgb(&solid_nv12(2, 2, 76, 255, 85), 2, 2).unwrap();
        assert!(red[0] >= 250, "r = {}", red[0]);
        assert!(red[1] <= 5, "g = {}", red[1]);
        assert!(red[2] <= 5, "b = {}", red[2]);

        // Blue: Y=29, Cb=255, Cr=107.
        let blue = ImageCodec::nv21_to_rgb(&solid_nv12(2, 2, 29, 107, 255), 2, 2).unwrap();
        assert!(blue[0] <= 5, "r = {}", blue[0]);
        assert!(blue[1] <= 5, "g = {}", blue[1]);
        assert!(blue[2] >= 250, "b = {}", blue[2]);
    }

    #[test]
    fn test_encode_jpeg_decodes_to_same_size() {
        let (width, height) = (16, 8);
        let nv12 = solid_nv12(width, height, 128, 128, 128);

        let jpeg = ImageCodec::encode_jpeg(&nv12, width, height).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), width);
        assert_eq!(decoded.height(), height);

        let rgb = decoded.to_rgb8();
        let pixel = rgb.get_pixel(4, 4);
        assert!((pixel[0] as i32 - 128).abs() <= 3);
    }
}
