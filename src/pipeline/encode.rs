//! Image encoding: `DynamicImage` → PNG bytes, blobs → `data:` URIs.
//!
//! Page surfaces are handed to the recognition engine as PNG because it is
//! lossless; JPEG ringing around rendered glyphs measurably hurts Tesseract
//! on small fonts. Previews are plain base64 data URIs that any renderer can
//! put straight into an `<img src>`.

use crate::pipeline::input::FileBlob;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page or decoded image as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} surface → {} bytes PNG", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Thumbnail reference for a file message.
pub fn preview_data_uri(blob: &FileBlob) -> String {
    format!("data:{};base64,{}", blob.media_type, STANDARD.encode(&blob.data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let png = encode_png(&img).expect("encode should succeed");
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn preview_uses_blob_mime() {
        let blob = FileBlob::new("a.gif", "image/gif", b"GIF89a".to_vec());
        let uri = preview_data_uri(&blob);
        assert!(uri.starts_with("data:image/gif;base64,"));
        let payload = uri.split(',').nth(1).unwrap();
        assert_eq!(STANDARD.decode(payload).unwrap(), b"GIF89a");
    }
}
