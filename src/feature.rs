//! Gradient-histogram appearance features.
//!
//! The descriptor follows the Felzenszwalb HOG variant: signed gradient
//! orientations are soft-binned into 18 bins per cell, every cell is
//! normalized against the energy of its four surrounding 2x2 blocks, and
//! the normalized histograms yield 18 contrast-sensitive and 9
//! contrast-insensitive channels. A gray intensity channel is appended
//! for the translation filter.
//!
//! ref Felzenszwalb et al., "Object Detection with Discriminatively Trained
//! Part Based Models", PAMI 2010

use std::f64::consts::PI;

use crate::config::Interpolation;
use crate::error::TrackError;
use crate::image::*;
use crate::my_types::*;

pub const SIGNED_BINS: usize = 18;
pub const UNSIGNED_BINS: usize = 9;
pub const GRADIENT_CHANNELS: usize = SIGNED_BINS + UNSIGNED_BINS;
pub const FEATURE_CHANNELS: usize = GRADIENT_CHANNELS + 1;

/// Normalized histogram values are clipped at this level.
const TRUNCATION: f64 = 0.2;
const NORM_EPS: f64 = 1e-4;

/// Names the channels of a `FeatureMap`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureChannel {
    /// Signed orientation bin, `0..18`.
    Sensitive(usize),
    /// Unsigned orientation bin, `0..9`.
    Insensitive(usize),
    Intensity,
}

impl FeatureChannel {
    pub fn index(self) -> usize {
        match self {
            FeatureChannel::Sensitive(bin) => bin,
            FeatureChannel::Insensitive(bin) => SIGNED_BINS + bin,
            FeatureChannel::Intensity => GRADIENT_CHANNELS,
        }
    }
}

/// Fixed set of `FEATURE_CHANNELS` equally sized planes.
#[derive(Clone, Debug)]
pub struct FeatureMap {
    channels: Vec<Matrixd>,
}

impl FeatureMap {
    pub fn new(channels: Vec<Matrixd>) -> Self {
        assert_eq!(channels.len(), FEATURE_CHANNELS);
        Self { channels }
    }

    pub fn channel(&self, channel: FeatureChannel) -> &Matrixd {
        &self.channels[channel.index()]
    }

    pub fn channels(&self) -> &[Matrixd] {
        &self.channels
    }

    /// `(rows, cols)` of every plane, in cells.
    pub fn shape(&self) -> (usize, usize) {
        self.channels[0].shape()
    }

    pub fn apply_window(&mut self, window: &Matrixd) {
        for channel in self.channels.iter_mut() {
            channel.component_mul_assign(window);
        }
    }
}

/// Hann window without the zero end points, so a length of 1 gives `[1]`.
pub fn hann(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 * (1. - (2. * PI * (i + 1) as f64 / (n + 1) as f64).cos()))
        .collect()
}

/// Separable 2D Hann window.
pub fn hann_2d(rows: usize, cols: usize) -> Matrixd {
    let wy = hann(rows);
    let wx = hann(cols);
    Matrixd::from_fn(rows, cols, |r, c| wy[r] * wx[c])
}

/// Centered difference inside, one-sided at the borders.
#[inline(always)]
fn derivative(prev: f64, next: f64, at_border: bool) -> f64 {
    if at_border {
        next - prev
    } else {
        (next - prev) / 2.
    }
}

/// Per-pixel gradient magnitude and orientation in `[0, 2pi)`. For multi
/// channel patches the channel with the strongest gradient wins.
fn gradients(planes: &[Matrixd]) -> (Matrixd, Matrixd) {
    let (rows, cols) = planes[0].shape();
    let mut magnitude = Matrixd::zeros(rows, cols);
    let mut orientation = Matrixd::zeros(rows, cols);
    for y in 0..rows {
        let (y0, y1) = (y.saturating_sub(1), (y + 1).min(rows - 1));
        for x in 0..cols {
            let (x0, x1) = (x.saturating_sub(1), (x + 1).min(cols - 1));
            let mut best = (0., 0., 0.);
            for plane in planes {
                let gx = if cols > 1 {
                    derivative(plane[(y, x0)], plane[(y, x1)], x1 - x0 == 1)
                } else {
                    0.
                };
                let gy = if rows > 1 {
                    derivative(plane[(y0, x)], plane[(y1, x)], y1 - y0 == 1)
                } else {
                    0.
                };
                let m2 = gx * gx + gy * gy;
                if m2 > best.0 {
                    best = (m2, gx, gy);
                }
            }
            magnitude[(y, x)] = best.0.sqrt();
            let mut theta = f64::atan2(best.2, best.1);
            if theta < 0. {
                theta += 2. * PI;
            }
            orientation[(y, x)] = theta;
        }
    }
    (magnitude, orientation)
}

/// Soft-binned orientation histograms per cell, `SIGNED_BINS` planes.
fn cell_histograms(magnitude: &Matrixd, orientation: &Matrixd, cell_size: usize) -> Vec<Matrixd> {
    let (rows, cols) = magnitude.shape();
    let (cell_rows, cell_cols) = (rows / cell_size, cols / cell_size);
    let mut hist = vec![Matrixd::zeros(cell_rows, cell_cols); SIGNED_BINS];
    let cell = cell_size as f64;
    let norm = 1. / (cell * cell);

    for y in 0..cell_rows * cell_size {
        let yc = (y as f64 + 0.5) / cell - 0.5;
        let cy0 = yc.floor();
        let fy = yc - cy0;
        let cy0 = cy0 as i64;
        for x in 0..cell_cols * cell_size {
            let m = magnitude[(y, x)] * norm;
            if m == 0. {
                continue;
            }
            let o = orientation[(y, x)] / (2. * PI) * SIGNED_BINS as f64;
            let o0 = o.floor();
            let fo = o - o0;
            let o0 = o0 as usize % SIGNED_BINS;
            let o1 = (o0 + 1) % SIGNED_BINS;

            let xc = (x as f64 + 0.5) / cell - 0.5;
            let cx0 = xc.floor();
            let fx = xc - cx0;
            let cx0 = cx0 as i64;

            for (cy, wy) in [(cy0, 1. - fy), (cy0 + 1, fy)] {
                if cy < 0 || cy >= cell_rows as i64 || wy == 0. {
                    continue;
                }
                for (cx, wx) in [(cx0, 1. - fx), (cx0 + 1, fx)] {
                    if cx < 0 || cx >= cell_cols as i64 || wx == 0. {
                        continue;
                    }
                    let w = m * wy * wx;
                    let idx = (cy as usize, cx as usize);
                    hist[o0][idx] += w * (1. - fo);
                    hist[o1][idx] += w * fo;
                }
            }
        }
    }
    hist
}

/// Block-normalized descriptor from cell histograms, `GRADIENT_CHANNELS` planes.
fn normalize_histograms(hist: &[Matrixd]) -> Vec<Matrixd> {
    let (rows, cols) = hist[0].shape();
    let energy = Matrixd::from_fn(rows, cols, |r, c| {
        (0..UNSIGNED_BINS)
            .map(|o| (hist[o][(r, c)] + hist[o + UNSIGNED_BINS][(r, c)]).powi(2))
            .sum()
    });
    let at = |r: i64, c: i64| {
        energy[(
            r.clamp(0, rows as i64 - 1) as usize,
            c.clamp(0, cols as i64 - 1) as usize,
        )]
    };
    // energy of the 2x2 block whose top-left cell is (r, c)
    let block = |r: i64, c: i64| at(r, c) + at(r + 1, c) + at(r, c + 1) + at(r + 1, c + 1);

    let mut out = vec![Matrixd::zeros(rows, cols); GRADIENT_CHANNELS];
    for r in 0..rows {
        for c in 0..cols {
            let (ri, ci) = (r as i64, c as i64);
            let norms = [
                block(ri - 1, ci - 1),
                block(ri - 1, ci),
                block(ri, ci - 1),
                block(ri, ci),
            ]
            .map(|e| 1. / (e + NORM_EPS).sqrt());
            let feature = |h: f64| {
                norms.iter().map(|n| (h * n).min(TRUNCATION)).sum::<f64>() * 0.5
            };
            for o in 0..SIGNED_BINS {
                out[o][(r, c)] = feature(hist[o][(r, c)]);
            }
            for o in 0..UNSIGNED_BINS {
                let h = hist[o][(r, c)] + hist[o + UNSIGNED_BINS][(r, c)];
                out[SIGNED_BINS + o][(r, c)] = feature(h);
            }
        }
    }
    out
}

/// Gradient-histogram channels of a patch with pixel values in [0, 255].
/// Output planes have `rows / cell_size` by `cols / cell_size` cells.
/// With `transposed` the descriptor is computed on the transposed patch and
/// transposed back.
pub fn gradient_features(patch: &Patch, cell_size: usize, transposed: bool) -> Vec<Matrixd> {
    let planes: Vec<Matrixd> = patch
        .iter()
        .map(|p| {
            let p = p / 255.;
            if transposed {
                p.transpose()
            } else {
                p
            }
        })
        .collect();
    let (magnitude, orientation) = gradients(&planes);
    let hist = cell_histograms(&magnitude, &orientation, cell_size);
    let features = normalize_histograms(&hist);
    if transposed {
        features.into_iter().map(|f| f.transpose()).collect()
    } else {
        features
    }
}

/// Crops the search region, resamples it to the canonical template and
/// computes the windowed translation features.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    /// `[width, height]` in pixels, a whole number of cells.
    template_size: [usize; 2],
    cell_size: usize,
    interpolation: Interpolation,
    transposed: bool,
    window: Matrixd,
}

impl FeatureExtractor {
    pub fn new(
        template_size: [usize; 2],
        cell_size: usize,
        interpolation: Interpolation,
        transposed: bool,
    ) -> Self {
        let window = hann_2d(template_size[1] / cell_size, template_size[0] / cell_size);
        Self {
            template_size,
            cell_size,
            interpolation,
            transposed,
            window,
        }
    }

    pub fn template_size(&self) -> [usize; 2] {
        self.template_size
    }

    /// `(rows, cols)` of the feature planes.
    pub fn cells(&self) -> (usize, usize) {
        self.window.shape()
    }

    /// Features of the `patch_size` (`[width, height]`) region around `center`.
    pub fn extract(
        &self,
        frame: &Image,
        center: Vector2d,
        patch_size: [f64; 2],
    ) -> Result<FeatureMap, TrackError> {
        let patch = frame.sample_patch(center, patch_size, self.template_size, self.interpolation)?;
        let mut channels = gradient_features(&patch, self.cell_size, self.transposed);

        let (rows, cols) = self.cells();
        let gray = resize_plane(&to_gray(&patch), rows, cols, self.interpolation);
        channels.push(gray.map(|v| v / 255. - 0.5));

        let mut features = FeatureMap::new(channels);
        features.apply_window(&self.window);
        Ok(features)
    }
}
