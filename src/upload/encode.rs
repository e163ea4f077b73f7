//! JPEG encoding

use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;

use crate::Result;

/// Encode an RGB image as JPEG at `quality` (1..=100)
///
/// # Errors
///
/// Returns error if the encoder rejects the image
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode_image(image)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_decodable_jpeg() {
        let image = RgbImage::from_pixel(32, 24, image::Rgb([200, 40, 40]));
        let jpeg = encode_jpeg(&image, 85).unwrap();

        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn lower_quality_is_smaller() {
        let image = RgbImage::from_fn(64, 64, |x, y| {
            image::Rgb([(x * 3) as u8, (y * 3) as u8, ((x + y) % 255) as u8])
        });
        let high = encode_jpeg(&image, 95).unwrap();
        let low = encode_jpeg(&image, 10).unwrap();
        assert!(low.len() < high.len());
    }
}
