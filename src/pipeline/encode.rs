//! Image encoding: `DynamicImage` → base64 JPEG wrapped in `ImageData`.
//!
//! Bill scans and photos are large; JPEG keeps request bodies well under
//! provider upload limits while leaving printed text legible at the default
//! quality. Alpha channels are flattened first since JPEG has none.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;

/// Encode a page image as a base64 JPEG ready for the provider.
///
/// Deterministic for a given image and `quality`.
pub fn encode_page(img: &DynamicImage, quality: u8) -> Result<ImageData, image::ImageError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} page → {} bytes base64",
        rgb.width(),
        rgb.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/jpeg").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red_square() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn encode_small_image() {
        let data = encode_page(&red_square(), 85).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/jpeg");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        // JPEG SOI marker
        assert_eq!(&decoded[..2], &[0xFF, 0xD8]);
        let back = image::load_from_memory(&decoded).expect("decodable jpeg");
        assert_eq!((back.width(), back.height()), (16, 16));
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = encode_page(&red_square(), 85).unwrap();
        let b = encode_page(&red_square(), 85).unwrap();
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn base64_is_printable_ascii() {
        let data = encode_page(&red_square(), 50).unwrap();
        assert!(data.data.bytes().all(|b| b.is_ascii_graphic()));
    }
}
