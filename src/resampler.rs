//! Image downscaling
//!
//! The resample pipeline: decode to float RGBA, detect the real alpha mode,
//! reduce by 2x2 averaging while the source is more than twice the target,
//! then a separable Lanczos-3 pass, alpha-aware clamping, and triangular
//! dither before quantising back to 8-bit PNG.

use std::{f32::consts::PI, fmt};

use image::{ImageError, RgbaImage};
use rand::Rng;

use crate::imageio::{decode_rgba, encode_png};

/// Error type for resample operations
#[derive(Debug)]
pub enum ResampleError {
    Image(ImageError),
    InvalidTarget(String),
}

impl From<ImageError> for ResampleError {
    fn from(err: ImageError) -> Self {
        ResampleError::Image(err)
    }
}

impl fmt::Display for ResampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResampleError::Image(err) => write!(f, "Image error: {}", err),
            ResampleError::InvalidTarget(msg) => write!(f, "Invalid target: {}", msg),
        }
    }
}

/// How alpha relates to the colour channels during resampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    Premultiplied,
    Straight,
}

/// Channel values exceeding alpha by more than this are taken as evidence of
/// straight alpha (tolerates compression noise).
const STRAIGHT_ALPHA_TOLERANCE: f32 = 2.0;

/// Float RGBA buffer in 0-255 range.
struct FloatImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl FloatImage {
    fn from_rgba(image: &RgbaImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            data: image.as_raw().iter().map(|&b| b as f32).collect(),
        }
    }
}

/// Scans every 4th pixel for straight-alpha evidence. Only meaningful when
/// the caller believes the source is premultiplied.
fn detect_alpha_mode(image: &FloatImage, source_premultiplied: bool) -> AlphaMode {
    if !source_premultiplied {
        return AlphaMode::Straight;
    }
    let pixels = image.width * image.height;
    let mut i = 0;
    while i < pixels {
        let p = i * 4;
        let a = image.data[p + 3];
        if image.data[p] > a + STRAIGHT_ALPHA_TOLERANCE
            || image.data[p + 1] > a + STRAIGHT_ALPHA_TOLERANCE
            || image.data[p + 2] > a + STRAIGHT_ALPHA_TOLERANCE
        {
            return AlphaMode::Straight;
        }
        i += 4;
    }
    AlphaMode::Premultiplied
}

/// One 2x2 box-reduction step. Channels reduce independently, which is safe
/// in both alpha modes.
fn halve(image: &FloatImage) -> FloatImage {
    let out_w = (image.width / 2).max(1);
    let out_h = (image.height / 2).max(1);
    let mut data = vec![0.0f32; out_w * out_h * 4];

    for y in 0..out_h {
        let y0 = (y * 2).min(image.height - 1);
        let y1 = (y * 2 + 1).min(image.height - 1);
        for x in 0..out_w {
            let x0 = (x * 2).min(image.width - 1);
            let x1 = (x * 2 + 1).min(image.width - 1);
            let out = (y * out_w + x) * 4;
            for c in 0..4 {
                let sum = image.data[(y0 * image.width + x0) * 4 + c]
                    + image.data[(y0 * image.width + x1) * 4 + c]
                    + image.data[(y1 * image.width + x0) * 4 + c]
                    + image.data[(y1 * image.width + x1) * 4 + c];
                data[out + c] = sum * 0.25;
            }
        }
    }
    FloatImage {
        width: out_w,
        height: out_h,
        data,
    }
}

/// The Lanczos window of radius 3.
fn lanczos3(x: f32) -> f32 {
    let ax = x.abs();
    if ax < 1e-8 {
        return 1.0;
    }
    if ax >= 3.0 {
        return 0.0;
    }
    let px = PI * x;
    3.0 * px.sin() * (px / 3.0).sin() / (px * px)
}

/// One separable Lanczos pass along the given axis. Tap indices clamp to the
/// source extent and weights renormalise to sum to 1.
fn resample_axis(image: &FloatImage, target: usize, horizontal: bool) -> FloatImage {
    let (src_len, lines) = if horizontal {
        (image.width, image.height)
    } else {
        (image.height, image.width)
    };
    let ratio = src_len as f32 / target as f32;

    let (out_w, out_h) = if horizontal {
        (target, image.height)
    } else {
        (image.width, target)
    };
    let mut data = vec![0.0f32; out_w * out_h * 4];

    let mut taps = [0usize; 6];
    let mut weights = [0.0f32; 6];

    for c_out in 0..target {
        let center = (c_out as f32 + 0.5) * ratio - 0.5;
        let start = center.floor() as i64 - 2;
        let mut weight_sum = 0.0f32;
        for (k, (tap, weight)) in taps.iter_mut().zip(weights.iter_mut()).enumerate() {
            let i = start + k as i64;
            *weight = lanczos3(i as f32 - center);
            *tap = i.clamp(0, src_len as i64 - 1) as usize;
            weight_sum += *weight;
        }
        if weight_sum != 0.0 {
            for weight in &mut weights {
                *weight /= weight_sum;
            }
        }

        for line in 0..lines {
            let mut acc = [0.0f32; 4];
            for (tap, weight) in taps.iter().zip(weights.iter()) {
                let p = if horizontal {
                    (line * image.width + tap) * 4
                } else {
                    (tap * image.width + line) * 4
                };
                for c in 0..4 {
                    acc[c] += image.data[p + c] * weight;
                }
            }
            let out = if horizontal {
                (line * out_w + c_out) * 4
            } else {
                (c_out * out_w + line) * 4
            };
            data[out..out + 4].copy_from_slice(&acc);
        }
    }

    FloatImage {
        width: out_w,
        height: out_h,
        data,
    }
}

/// Quantises the float buffer to 8-bit with triangular-distribution dither.
fn quantise(image: &FloatImage, mode: AlphaMode) -> RgbaImage {
    let mut rng = rand::thread_rng();
    let mut raw = Vec::with_capacity(image.data.len());

    for chunk in image.data.chunks_exact(4) {
        let a = chunk[3];
        for (c, &value) in chunk.iter().enumerate() {
            let mut v = value;
            // Premultiplied colour can never exceed alpha; clamping kills
            // ringing halos past the mask. Straight alpha keeps additive
            // glow pixels untouched.
            if mode == AlphaMode::Premultiplied && c < 3 {
                v = v.min(a);
            }
            let noise = rng.gen::<f32>() + rng.gen::<f32>() - 1.0;
            raw.push((v + noise).round().clamp(0.0, 255.0) as u8);
        }
    }

    RgbaImage::from_raw(image.width as u32, image.height as u32, raw)
        .expect("buffer length matches dimensions")
}

/// Downscales `blob` to exactly `(target_w, target_h)` and re-encodes as PNG.
pub fn resample(
    blob: &[u8],
    target_w: u32,
    target_h: u32,
    source_premultiplied: bool,
) -> Result<Vec<u8>, ResampleError> {
    if target_w == 0 || target_h == 0 {
        return Err(ResampleError::InvalidTarget(format!(
            "{}x{}",
            target_w, target_h
        )));
    }

    let decoded = decode_rgba(blob)?;
    let mut image = FloatImage::from_rgba(&decoded);
    let mode = detect_alpha_mode(&image, source_premultiplied);

    let (tw, th) = (target_w as usize, target_h as usize);
    while image.width > tw * 2 && image.height > th * 2 {
        image = halve(&image);
    }
    if image.width != tw {
        image = resample_axis(&image, tw, true);
    }
    if image.height != th {
        image = resample_axis(&image, th, false);
    }

    let out = quantise(&image, mode);
    Ok(encode_png(&out)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checkerboard(size: u32) -> RgbaImage {
        let mut img = RgbaImage::new(size, size);
        for y in 0..size {
            for x in 0..size {
                let v = if (x + y) % 2 == 0 { 255 } else { 0 };
                img.put_pixel(x, y, Rgba([v, v, v, 255]));
            }
        }
        img
    }

    #[test]
    fn identity_resample_is_within_one_step() {
        let src = checkerboard(16);
        let blob = encode_png(&src).unwrap();
        let out = resample(&blob, 16, 16, false).unwrap();
        let decoded = decode_rgba(&out).unwrap();

        for (a, b) in src.pixels().zip(decoded.pixels()) {
            for c in 0..4 {
                let delta = (a[c] as i32 - b[c] as i32).abs();
                assert!(delta <= 1, "channel moved by {}", delta);
            }
        }
    }

    #[test]
    fn downscale_hits_exact_target_dimensions() {
        let src = checkerboard(100);
        let blob = encode_png(&src).unwrap();
        let out = resample(&blob, 23, 17, false).unwrap();
        assert_eq!(crate::imageio::measure(&out).unwrap(), (23, 17));
    }

    #[test]
    fn uniform_image_stays_uniform_through_pyramid() {
        // 512 -> 64 exercises several pyramid levels plus the Lanczos pass.
        let mut src = RgbaImage::new(512, 512);
        for p in src.pixels_mut() {
            *p = Rgba([40, 90, 160, 255]);
        }
        let blob = encode_png(&src).unwrap();
        let out = resample(&blob, 64, 64, false).unwrap();
        let decoded = decode_rgba(&out).unwrap();
        assert_eq!(decoded.dimensions(), (64, 64));
        for p in decoded.pixels() {
            assert!((p[0] as i32 - 40).abs() <= 1);
            assert!((p[1] as i32 - 90).abs() <= 1);
            assert!((p[2] as i32 - 160).abs() <= 1);
            assert_eq!(p[3], 255);
        }
    }

    #[test]
    fn premultiplied_hint_is_overridden_by_glow_pixels() {
        let mut img = FloatImage {
            width: 2,
            height: 2,
            data: vec![0.0; 16],
        };
        // Additive pixel: colour far above alpha.
        img.data[0] = 200.0;
        img.data[3] = 10.0;
        assert_eq!(detect_alpha_mode(&img, true), AlphaMode::Straight);

        // A clean premultiplied buffer keeps the hint.
        img.data[0] = 10.0;
        assert_eq!(detect_alpha_mode(&img, true), AlphaMode::Premultiplied);
        assert_eq!(detect_alpha_mode(&img, false), AlphaMode::Straight);
    }

    #[test]
    fn premultiplied_clamps_colour_to_alpha() {
        let img = FloatImage {
            width: 1,
            height: 1,
            data: vec![120.0, 80.0, 10.0, 50.0],
        };
        let out = quantise(&img, AlphaMode::Premultiplied);
        let p = out.get_pixel(0, 0);
        assert!(p[0] <= 51); // clamped to alpha, plus at most one dither step
        assert!(p[1] <= 51);

        let straight = quantise(&img, AlphaMode::Straight);
        let p = straight.get_pixel(0, 0);
        assert!(p[0] >= 119); // glow preserved
    }

    #[test]
    fn lanczos_kernel_shape() {
        assert!((lanczos3(0.0) - 1.0).abs() < 1e-6);
        assert_eq!(lanczos3(3.0), 0.0);
        assert_eq!(lanczos3(-3.5), 0.0);
        // Zero crossings at the integers inside the window.
        for x in [1.0f32, 2.0, -1.0, -2.0] {
            assert!(lanczos3(x).abs() < 1e-6);
        }
        // Negative lobe between 1 and 2.
        assert!(lanczos3(1.5) < 0.0);
    }

    #[test]
    fn zero_target_is_rejected() {
        let blob = encode_png(&checkerboard(4)).unwrap();
        assert!(matches!(
            resample(&blob, 0, 4, false),
            Err(ResampleError::InvalidTarget(_))
        ));
    }
}
