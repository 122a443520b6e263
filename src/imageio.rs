//! Shared raster decode/encode helpers
//!
//! All pixel IO in the optimiser goes through these two functions so that
//! decoding stays free of premultiplication and colour-space conversion and
//! every emitted blob is PNG with alpha preserved.

use std::io::Cursor;

use image::{ImageError, ImageOutputFormat, RgbaImage};

/// Decodes a PNG/JPG/JPEG/WEBP blob into straight RGBA bytes.
pub fn decode_rgba(blob: &[u8]) -> Result<RgbaImage, ImageError> {
    Ok(image::load_from_memory(blob)?.to_rgba8())
}

/// Encodes an RGBA image to an in-memory PNG.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ImageError> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageOutputFormat::Png)?;
    Ok(out.into_inner())
}

/// Reads the pixel dimensions of a blob without keeping the decode around.
pub fn measure(blob: &[u8]) -> Result<(u32, u32), ImageError> {
    let img = image::load_from_memory(blob)?;
    Ok((img.width(), img.height()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn png_round_trip_preserves_pixels() {
        let mut img = RgbaImage::new(3, 2);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img.put_pixel(2, 1, Rgba([0, 128, 0, 64]));

        let blob = encode_png(&img).unwrap();
        let back = decode_rgba(&blob).unwrap();
        assert_eq!(back.dimensions(), (3, 2));
        assert_eq!(back.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(back.get_pixel(2, 1), &Rgba([0, 128, 0, 64]));
    }

    #[test]
    fn measure_reports_dimensions() {
        let img = RgbaImage::new(7, 5);
        let blob = encode_png(&img).unwrap();
        assert_eq!(measure(&blob).unwrap(), (7, 5));
    }
}
