use anyhow::Context;

use crate::{PixelBuffer, PixfxResult};

/// Decode an encoded image (PNG, JPEG, ...) into a straight-alpha RGBA8
/// buffer ready for filtering.
pub fn decode_image(bytes: &[u8]) -> PixfxResult<PixelBuffer> {
    let dyn_img = image::load_from_memory(bytes).context("decode image from memory")?;
    let rgba = dyn_img.to_rgba8();
    let (width, height) = rgba.dimensions();
    PixelBuffer::from_rgba8(width, height, rgba.into_raw())
}

/// Read and decode an image file.
pub fn load_image(path: impl AsRef<std::path::Path>) -> PixfxResult<PixelBuffer> {
    let path = path.as_ref();
    let bytes =
        std::fs::read(path).with_context(|| format!("read image file {}", path.display()))?;
    decode_image(&bytes)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn decode_image_keeps_straight_alpha() {
        let src_rgba = vec![100u8, 50u8, 200u8, 128u8];
        let img = image::RgbaImage::from_raw(1, 1, src_rgba.clone()).unwrap();

        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();

        let decoded = decode_image(&buf).unwrap();
        assert_eq!(decoded.width, 1);
        assert_eq!(decoded.height, 1);
        assert_eq!(decoded.data, src_rgba);
    }

    #[test]
    fn load_image_missing_file_is_error() {
        assert!(load_image("/nonexistent/pixfx-missing.png").is_err());
    }
}
