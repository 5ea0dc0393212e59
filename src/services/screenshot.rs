//! 截图尺寸处理
//!
//! 整页截图可能非常长，超过模型接口允许的尺寸时等比缩小

use std::io::Cursor;

use image::imageops::FilterType;
use image::{ImageError, ImageFormat};
use tracing::debug;

/// 宽或高超过 `max_dim` 时等比缩小，返回 PNG 字节；不超过时原样返回
pub fn fit_screenshot(png: Vec<u8>, max_dim: u32) -> Result<Vec<u8>, ImageError> {
    let img = image::load_from_memory_with_format(&png, ImageFormat::Png)?;
    let (width, height) = (img.width(), img.height());
    if width <= max_dim && height <= max_dim {
        return Ok(png);
    }

    let resized = img.resize(max_dim, max_dim, FilterType::Lanczos3);
    debug!(
        "截图 {}x{} 超过上限 {}，缩小为 {}x{}",
        width,
        height,
        max_dim,
        resized.width(),
        resized.height()
    );

    let mut out = Cursor::new(Vec::new());
    resized.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_small_screenshot_is_untouched() {
        let original = png(40, 30);
        let fitted = fit_screenshot(original.clone(), 100).unwrap();
        assert_eq!(fitted, original);
    }

    #[test]
    fn test_tall_screenshot_keeps_aspect_ratio() {
        let fitted = fit_screenshot(png(50, 400), 100).unwrap();
        let img = image::load_from_memory(&fitted).unwrap();
        assert_eq!(img.height(), 100);
        assert!((12..=13).contains(&img.width()));
    }

    #[test]
    fn test_invalid_bytes_are_rejected() {
        assert!(fit_screenshot(b"not a png".to_vec(), 100).is_err());
    }
}
