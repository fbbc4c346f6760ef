//! Thumbnail decode and downscale, run on the blocking pool.

use image::imageops::FilterType;
use image::GenericImageView;
use thiserror::Error;

/// How an element is displayed; determines the pixel box a thumbnail needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThumbnailSpec {
    pub display_width: f64,
    pub display_height: f64,
    pub device_pixel_ratio: f64,
    /// Album covers fill their box instead of fitting inside it.
    pub album_mode: bool,
    pub limit_ratio: bool,
}

/// Decoded RGBA8 pixels ready for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has no pixels")]
    Empty,
}

/// Largest box the resized thumbnail may occupy, in physical pixels.
pub fn target_box(spec: &ThumbnailSpec, src_width: u32, src_height: u32) -> (u32, u32) {
    let dpr = if spec.device_pixel_ratio > 0.0 {
        spec.device_pixel_ratio
    } else {
        1.0
    };
    let src_w = f64::from(src_width.max(1));
    let src_h = f64::from(src_height.max(1));
    let src_ratio = src_w / src_h;
    let w = (spec.display_width * dpr).ceil().max(1.0);
    let h = (spec.display_height * dpr).ceil().max(1.0);

    let (w, h) = if spec.album_mode {
        let scale = (spec.display_width / src_w).max(spec.display_height / src_h) * dpr;
        ((src_w * scale).ceil(), (src_h * scale).ceil())
    } else if spec.limit_ratio && spec.display_width == spec.display_height * 2.0 {
        ((h * src_ratio).ceil(), h)
    } else if spec.limit_ratio && spec.display_height == spec.display_width * 2.0 {
        (w, (w / src_ratio).ceil())
    } else {
        (w, h)
    };
    (w.max(1.0) as u32, h.max(1.0) as u32)
}

/// Fit `src` inside `bounds` preserving aspect ratio; never upscales.
pub fn fit_within(src: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = src;
    let (max_w, max_h) = bounds;
    if src_w <= max_w && src_h <= max_h {
        return src;
    }
    let scale = (f64::from(max_w) / f64::from(src_w)).min(f64::from(max_h) / f64::from(src_h));
    let w = (f64::from(src_w) * scale).round().max(1.0) as u32;
    let h = (f64::from(src_h) * scale).round().max(1.0) as u32;
    (w, h)
}

pub fn decode_thumbnail(bytes: &[u8], spec: &ThumbnailSpec) -> Result<Thumbnail, ThumbnailError> {
    let image = image::load_from_memory(bytes)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ThumbnailError::Empty);
    }
    let bounds = target_box(spec, image.width(), image.height());
    let (width, height) = fit_within((image.width(), image.height()), bounds);
    let rgba = if (width, height) == (image.width(), image.height()) {
        image.into_rgba8()
    } else {
        image.resize_exact(width, height, FilterType::Triangle).into_rgba8()
    };
    Ok(Thumbnail {
        width: rgba.width(),
        height: rgba.height(),
        pixels: rgba.into_raw(),
    })
}

#[cfg(test)]
pub(crate) fn encode_png(width: u32, height: u32) -> Vec<u8> {
    use image::codecs::png::PngEncoder;
    use image::{ColorType, ImageBuffer, ImageEncoder, Rgba};

    let buffer = ImageBuffer::from_pixel(width, height, Rgba([200u8, 40, 40, 255]));
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(&buffer, width, height, ColorType::Rgba8)
        .expect("encode png");
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(w: f64, h: f64) -> ThumbnailSpec {
        ThumbnailSpec {
            display_width: w,
            display_height: h,
            device_pixel_ratio: 1.0,
            album_mode: false,
            limit_ratio: false,
        }
    }

    #[test]
    fn box_scales_with_device_pixel_ratio() {
        let mut s = spec(150.4, 100.0);
        s.device_pixel_ratio = 2.0;
        assert_eq!(target_box(&s, 4000, 3000), (301, 200));
    }

    #[test]
    fn album_covers_fill_their_box() {
        let mut s = spec(200.0, 200.0);
        s.album_mode = true;
        // Landscape cover: height is the binding axis.
        assert_eq!(target_box(&s, 400, 200), (400, 200));
    }

    #[test]
    fn clamped_wide_element_scales_by_height() {
        let mut s = spec(200.0, 100.0);
        s.limit_ratio = true;
        assert_eq!(target_box(&s, 800, 100), (800, 100));

        let mut tall = spec(100.0, 200.0);
        tall.limit_ratio = true;
        assert_eq!(target_box(&tall, 100, 800), (100, 800));
    }

    #[test]
    fn fitting_never_upscales() {
        assert_eq!(fit_within((100, 50), (400, 400)), (100, 50));
        assert_eq!(fit_within((400, 200), (100, 100)), (100, 50));
        assert_eq!(fit_within((10, 4000), (100, 100)), (1, 100));
    }

    #[test]
    fn decodes_and_downscales_png() {
        let bytes = encode_png(400, 200);
        let thumb = decode_thumbnail(&bytes, &spec(100.0, 100.0)).expect("decodes");
        assert_eq!((thumb.width, thumb.height), (100, 50));
        assert_eq!(thumb.pixels.len(), 100 * 50 * 4);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode_thumbnail(b"not an image", &spec(10.0, 10.0)).unwrap_err();
        assert!(matches!(err, ThumbnailError::Decode(_)));
    }
}
