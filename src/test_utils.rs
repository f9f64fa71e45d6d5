//! Synthetic frames for tests. Targets are rendered analytically so shifted
//! and scaled versions of a scene are exact.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::geometry::BoundingBox;
use crate::image::Image;

const BACKGROUND: f64 = 128.;
const BLOBS: usize = 14;

struct Blob {
    dx: f64,
    dy: f64,
    sigma: f64,
    amplitude: f64,
}

fn blobs(seed: u64) -> Vec<Blob> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    (0..BLOBS)
        .map(|_| {
            let sign = if rng.gen_bool(0.5) { 1. } else { -1. };
            Blob {
                dx: rng.gen_range(-16.0..16.0),
                dy: rng.gen_range(-16.0..16.0),
                sigma: rng.gen_range(2.5..6.0),
                amplitude: sign * rng.gen_range(40.0..90.0),
            }
        })
        .collect()
}

/// Gray frame with a textured target made of Gaussian blobs around
/// `(cx, cy)` on a flat background. The same `seed` gives the same target.
pub fn blob_frame(width: usize, height: usize, cx: f64, cy: f64, seed: u64) -> Image {
    scaled_blob_frame(width, height, cx, cy, seed, 1.)
}

/// Like `blob_frame` with the target magnified by `scale` about its center.
pub fn scaled_blob_frame(
    width: usize,
    height: usize,
    cx: f64,
    cy: f64,
    seed: u64,
    scale: f64,
) -> Image {
    let blobs = blobs(seed);
    let mut data = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut v = BACKGROUND;
            for b in &blobs {
                let dx = x as f64 - (cx + b.dx * scale);
                let dy = y as f64 - (cy + b.dy * scale);
                let s = b.sigma * scale;
                v += b.amplitude * (-(dx * dx + dy * dy) / (2. * s * s)).exp();
            }
            data[y * width + x] = v.round().clamp(0., 255.) as u8;
        }
    }
    Image::gray(width, height, data)
}

/// Copy of `frame` with the pixels inside `region` replaced by uniform noise.
pub fn with_noise(frame: &Image, region: &BoundingBox, seed: u64) -> Image {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut out = frame.clone();
    let x0 = region.x.max(0.) as usize;
    let y0 = region.y.max(0.) as usize;
    let x1 = ((region.x + region.width) as usize).min(frame.width);
    let y1 = ((region.y + region.height) as usize).min(frame.height);
    for y in y0..y1 {
        for x in x0..x1 {
            for c in 0..frame.channels {
                out.set_value(x, y, c, rng.gen());
            }
        }
    }
    out
}

/// Replicate a gray frame into three identical color channels.
pub fn to_rgb(frame: &Image) -> Image {
    let data = frame.data.iter().flat_map(|&v| [v, v, v]).collect();
    Image::new(frame.width, frame.height, 3, data)
}
