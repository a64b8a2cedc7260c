//! Channel artwork normalisation.
//!
//! Podcast directories want square-ish JPEG artwork of at least 1400 px a
//! side.  Whatever the channel avatar (or a configured custom image) is, it
//! is decoded, scaled up if needed and re-encoded as JPEG.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageResult};

/// Minimum length of the shorter side.
pub const MIN_SIDE: u32 = 1400;

const JPEG_QUALITY: u8 = 90;

/// Decode a JPEG or PNG image and return it as JPEG whose shorter side is at
/// least [`MIN_SIDE`].  Larger images keep their size.
pub fn to_podcast_jpeg(bytes: &[u8]) -> ImageResult<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)?;
    let scaled = scale_up(decoded);

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(scaled.to_rgb8())
        .write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))?;
    Ok(out.into_inner())
}

fn scale_up(img: DynamicImage) -> DynamicImage {
    let (width, height) = img.dimensions();
    let shorter = width.min(height);
    if shorter == 0 || shorter >= MIN_SIDE {
        return img;
    }
    let grow = |side: u32| (u64::from(side) * u64::from(MIN_SIDE)).div_ceil(u64::from(shorter));
    let (new_width, new_height) = (grow(width), grow(height));
    match (u32::try_from(new_width), u32::try_from(new_height)) {
        (Ok(w), Ok(h)) => img.resize_exact(w, h, FilterType::CatmullRom),
        _ => img,
    }
}
