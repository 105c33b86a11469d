//! Raster surface primitives
//!
//! Surface allocation, sampling and the three compositing operators the stage
//! needs: source-over, multiply and destination-out. All operators work on
//! straight (non-premultiplied) RGBA8.

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, DynamicImage, ImageEncoder, ImageError, Rgba, RgbaImage};
use rayon::prelude::*;
use thiserror::Error;

use crate::domain::CropRect;

/// Default ceiling on a single surface, in pixels
pub const DEFAULT_MAX_SURFACE_PIXELS: u64 = 64_000_000;

/// Raster surface errors
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Cannot allocate a {width}x{height} raster surface")]
    Context { width: u32, height: u32 },
}

/// Allocate a transparent surface, refusing empty or oversized requests
pub fn allocate_surface(width: u32, height: u32, max_pixels: u64) -> Result<RgbaImage, SurfaceError> {
    let pixels = width as u64 * height as u64;
    if pixels == 0 || pixels > max_pixels {
        return Err(SurfaceError::Context { width, height });
    }
    Ok(RgbaImage::new(width, height))
}

/// Flatten an image over opaque white
pub fn composite_over_white(image: &DynamicImage) -> RgbaImage {
    let mut rgba = image.to_rgba8();
    let width = rgba.width() as usize;
    if width == 0 || rgba.height() == 0 {
        return rgba;
    }

    rgba.par_chunks_mut(width * 4).for_each(|row| {
        for px in row.chunks_exact_mut(4) {
            let alpha = px[3] as u32;
            for c in px.iter_mut().take(3) {
                *c = ((*c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
            }
            px[3] = 255;
        }
    });

    rgba
}

/// Bilinear interpolation for smooth pixel sampling
///
/// Coordinates are in pixel-center space: `(0.5, 0.5)` is the center of the
/// top-left pixel.
pub fn bilinear_sample(image: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let (width, height) = image.dimensions();

    let fx = (x - 0.5).clamp(0.0, (width - 1) as f64);
    let fy = (y - 0.5).clamp(0.0, (height - 1) as f64);

    let x0 = fx.floor() as u32;
    let y0 = fy.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let dx = fx - x0 as f64;
    let dy = fy - y0 as f64;

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);

    let mut result = [0u8; 4];
    for i in 0..4 {
        let v00 = p00.0[i] as f64;
        let v10 = p10.0[i] as f64;
        let v01 = p01.0[i] as f64;
        let v11 = p11.0[i] as f64;

        let value = v00 * (1.0 - dx) * (1.0 - dy)
            + v10 * dx * (1.0 - dy)
            + v01 * (1.0 - dx) * dy
            + v11 * dx * dy;

        result[i] = value.round().clamp(0.0, 255.0) as u8;
    }

    Rgba(result)
}

/// Scale an opacity factor into a pixel's alpha
pub fn apply_opacity(pixel: Rgba<u8>, opacity: f64) -> Rgba<u8> {
    let alpha = (pixel.0[3] as f64 * opacity.clamp(0.0, 1.0)).round() as u8;
    Rgba([pixel.0[0], pixel.0[1], pixel.0[2], alpha])
}

/// Source-over: draw `src` on top of `dst`
pub fn blend_normal(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let sa = src.0[3] as f64 / 255.0;
    if sa <= 0.0 {
        return dst;
    }
    let da = dst.0[3] as f64 / 255.0;
    let out_a = sa + da * (1.0 - sa);

    let mut result = [0u8; 4];
    for i in 0..3 {
        let c = (src.0[i] as f64 * sa + dst.0[i] as f64 * da * (1.0 - sa)) / out_a;
        result[i] = c.round().clamp(0.0, 255.0) as u8;
    }
    result[3] = (out_a * 255.0).round() as u8;

    Rgba(result)
}

/// Multiply blend mode
///
/// Darkens the backdrop by the source color, weighted by source alpha.
pub fn blend_multiply(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let da = dst.0[3] as f64 / 255.0;

    // Mix the multiplied color with the raw source by backdrop coverage,
    // then place it with ordinary source-over.
    let mut mixed = [0u8; 4];
    for i in 0..3 {
        let multiplied = (src.0[i] as f64 * dst.0[i] as f64) / 255.0;
        let c = (1.0 - da) * src.0[i] as f64 + da * multiplied;
        mixed[i] = c.round().clamp(0.0, 255.0) as u8;
    }
    mixed[3] = src.0[3];

    blend_normal(dst, Rgba(mixed))
}

/// Destination-out: erase `dst` wherever `src` is opaque
pub fn blend_destination_out(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let keep = 255 - src.0[3] as u32;
    let alpha = ((dst.0[3] as u32 * keep + 127) / 255) as u8;
    if alpha == 0 {
        return Rgba([0, 0, 0, 0]);
    }
    Rgba([dst.0[0], dst.0[1], dst.0[2], alpha])
}

/// Apply a same-sized source image onto `dst` with the given operator
pub fn composite_with<F>(dst: &mut RgbaImage, src: &RgbaImage, op: F)
where
    F: Fn(Rgba<u8>, Rgba<u8>) -> Rgba<u8> + Sync,
{
    debug_assert_eq!(dst.dimensions(), src.dimensions());
    let row_len = dst.width() as usize * 4;
    if row_len == 0 {
        return;
    }

    dst.par_chunks_mut(row_len)
        .zip(src.par_chunks(row_len))
        .for_each(|(dst_row, src_row)| {
            for (d, s) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
                let out = op(Rgba([d[0], d[1], d[2], d[3]]), Rgba([s[0], s[1], s[2], s[3]]));
                d.copy_from_slice(&out.0);
            }
        });
}

/// Resample a template-space region of `source` to an exact output size
///
/// Nearest-neighbor keeps the hard edges of classification rasters intact.
pub fn resample_region(source: &RgbaImage, crop: CropRect, width: u32, height: u32) -> RgbaImage {
    let (src_w, src_h) = source.dimensions();
    let sx = crop.width as f64 / width as f64;
    let sy = crop.height as f64 / height as f64;

    RgbaImage::from_fn(width, height, |ox, oy| {
        let tx = crop.x as f64 + (ox as f64 + 0.5) * sx;
        let ty = crop.y as f64 + (oy as f64 + 0.5) * sy;
        let x = tx.floor() as i64;
        let y = ty.floor() as i64;
        if x < 0 || y < 0 || x >= src_w as i64 || y >= src_h as i64 {
            Rgba([0, 0, 0, 0])
        } else {
            *source.get_pixel(x as u32, y as u32)
        }
    })
}

/// Encode a raster as PNG
///
/// PNG is lossless, so `quality` only trades encode time for size: full
/// quality uses the default adaptive encoder, anything lower asks for the
/// smallest output.
pub fn encode_png(image: &RgbaImage, quality: f32) -> Result<Vec<u8>, ImageError> {
    let compression = if quality >= 1.0 {
        CompressionType::Default
    } else {
        CompressionType::Best
    };

    let mut buffer = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buffer, compression, FilterType::Adaptive);
    encoder.write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bilinear_sample_center() {
        let mut img = RgbaImage::new(2, 2);
        img.put_pixel(0, 0, Rgba([100, 100, 100, 255]));
        img.put_pixel(1, 0, Rgba([200, 200, 200, 255]));
        img.put_pixel(0, 1, Rgba([100, 100, 100, 255]));
        img.put_pixel(1, 1, Rgba([200, 200, 200, 255]));

        let result = bilinear_sample(&img, 1.0, 1.0);
        // Should be average of all 4 pixels = 150
        assert!((result.0[0] as i32 - 150).abs() < 5);
    }

    #[test]
    fn test_allocate_surface_limits() {
        assert!(allocate_surface(0, 10, DEFAULT_MAX_SURFACE_PIXELS).is_err());
        assert!(allocate_surface(100, 100, 9_999).is_err());
        assert_eq!(allocate_surface(100, 100, 10_000).unwrap().dimensions(), (100, 100));
    }

    #[test]
    fn test_transparent_pixels_flatten_to_white() {
        let mut img = RgbaImage::new(1, 1);
        img.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        let flat = composite_over_white(&DynamicImage::ImageRgba8(img));
        assert_eq!(*flat.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_empty_image_flattens_without_panic() {
        let flat = composite_over_white(&DynamicImage::new_rgba8(0, 5));
        assert_eq!(flat.dimensions(), (0, 5));
    }

    #[test]
    fn test_multiply_over_white_keeps_source() {
        let out = blend_multiply(Rgba([255, 255, 255, 255]), Rgba([211, 211, 211, 255]));
        assert_eq!(out, Rgba([211, 211, 211, 255]));
    }

    #[test]
    fn test_destination_out_erases_under_opaque() {
        let dst = Rgba([10, 20, 30, 255]);
        assert_eq!(blend_destination_out(dst, Rgba([0, 0, 255, 255])).0[3], 0);
        assert_eq!(blend_destination_out(dst, Rgba([0, 0, 0, 0])), dst);
    }

    #[test]
    fn test_encode_png_decodes_back() {
        let img = RgbaImage::from_pixel(3, 3, Rgba([1, 2, 3, 4]));
        let bytes = encode_png(&img, 0.5).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded, img);
    }

    #[test]
    fn test_resample_region_doubles() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(1, 0, Rgba([255, 0, 0, 255]));
        let out = resample_region(&img, CropRect::full(2, 1), 4, 2);
        assert_eq!(out.get_pixel(1, 1).0[3], 0);
        assert_eq!(*out.get_pixel(2, 0), Rgba([255, 0, 0, 255]));
    }
}
