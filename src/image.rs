use crate::config::Interpolation;
use crate::error::TrackError;
use crate::my_types::*;

/// Most samples taken per axis when averaging a source footprint.
const MAX_AREA_SAMPLES: usize = 8;

/// Row-major image storage with interleaved channels.
/// 1 channel is grayscale, 3 is RGB, 4 is RGBA with the alpha ignored.
#[derive(Clone, Debug)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

/// Resampled crop, one plane per color channel with values in [0, 255].
pub type Patch = Vec<Matrixd>;

impl Image {
    /// Create an empty image
    pub fn empty() -> Image {
        Image {
            data: vec![],
            width: 0,
            height: 0,
            channels: 1,
        }
    }

    pub fn new(width: usize, height: usize, channels: usize, data: Vec<u8>) -> Image {
        assert_eq!(data.len(), width * height * channels);
        Image {
            data,
            width,
            height,
            channels,
        }
    }

    pub fn gray(width: usize, height: usize, data: Vec<u8>) -> Image {
        Image::new(width, height, 1, data)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Number of channels carrying color, alpha is skipped.
    pub fn color_channels(&self) -> usize {
        self.channels.min(3)
    }

    pub fn area(&self) -> f64 {
        (self.width * self.height) as f64
    }

    #[inline(always)]
    pub fn value(&self, x: usize, y: usize, c: usize) -> u8 {
        self.data[(y * self.width + x) * self.channels + c]
    }

    #[inline(always)]
    fn value_clamped(&self, x: i64, y: i64, c: usize) -> f64 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.value(x, y, c) as f64
    }

    #[inline(always)]
    #[cfg(test)]
    pub fn set_value(&mut self, x: usize, y: usize, c: usize, value: u8) {
        self.data[(y * self.width + x) * self.channels + c] = value;
    }

    /// Sample channel `c` at a sub-pixel position. Pixel centers sit on integer
    /// coordinates, positions outside the image replicate the border.
    pub fn bilinear(&self, x: f64, y: f64, c: usize) -> f64 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);
        let v00 = self.value_clamped(x0, y0, c);
        let v10 = self.value_clamped(x0 + 1, y0, c);
        let v01 = self.value_clamped(x0, y0 + 1, c);
        let v11 = self.value_clamped(x0 + 1, y0 + 1, c);
        (1. - fy) * ((1. - fx) * v00 + fx * v10) + fy * ((1. - fx) * v01 + fx * v11)
    }

    fn nearest(&self, x: f64, y: f64, c: usize) -> f64 {
        self.value_clamped(x.round() as i64, y.round() as i64, c)
    }

    /// Crop a `patch_size` region centered on `center` and resample it to
    /// `out_size`. Both sizes are `[width, height]`. Fails when the region is
    /// degenerate or lies completely outside the image.
    pub fn sample_patch(
        &self,
        center: Vector2d,
        patch_size: [f64; 2],
        out_size: [usize; 2],
        interpolation: Interpolation,
    ) -> Result<Patch, TrackError> {
        if self.is_empty() {
            return Err(TrackError::InvalidInput("empty frame".into()));
        }
        let [patch_w, patch_h] = patch_size;
        let [out_w, out_h] = out_size;
        if !(patch_w >= 1. && patch_h >= 1.) || out_w == 0 || out_h == 0 {
            return Err(TrackError::InvalidInput(format!(
                "degenerate patch {patch_w:.1} x {patch_h:.1}"
            )));
        }
        // Image extent in the pixel-center coordinate system.
        let left = center.x - patch_w / 2.;
        let top = center.y - patch_h / 2.;
        let overlaps = left < self.width as f64 - 0.5
            && left + patch_w > -0.5
            && top < self.height as f64 - 0.5
            && top + patch_h > -0.5;
        if !overlaps {
            return Err(TrackError::InvalidInput(format!(
                "patch around ({:.1}, {:.1}) does not overlap the frame",
                center.x, center.y
            )));
        }

        let step_x = patch_w / out_w as f64;
        let step_y = patch_h / out_h as f64;
        let samples = match interpolation {
            Interpolation::Area => [
                (step_x.ceil() as usize).clamp(1, MAX_AREA_SAMPLES),
                (step_y.ceil() as usize).clamp(1, MAX_AREA_SAMPLES),
            ],
            _ => [1, 1],
        };

        let mut planes = vec![Matrixd::zeros(out_h, out_w); self.color_channels()];
        for (c, plane) in planes.iter_mut().enumerate() {
            for row in 0..out_h {
                let sy = top + (row as f64 + 0.5) * step_y;
                for col in 0..out_w {
                    let sx = left + (col as f64 + 0.5) * step_x;
                    plane[(row, col)] = match interpolation {
                        Interpolation::Nearest => self.nearest(sx, sy, c),
                        Interpolation::Linear => self.bilinear(sx, sy, c),
                        Interpolation::Area => {
                            self.footprint_mean(sx, sy, step_x, step_y, samples, c)
                        }
                    };
                }
            }
        }
        Ok(planes)
    }

    fn footprint_mean(
        &self,
        x: f64,
        y: f64,
        step_x: f64,
        step_y: f64,
        samples: [usize; 2],
        c: usize,
    ) -> f64 {
        if samples == [1, 1] {
            return self.bilinear(x, y, c);
        }
        let mut sum = 0.;
        for j in 0..samples[1] {
            let dy = ((j as f64 + 0.5) / samples[1] as f64 - 0.5) * step_y;
            for i in 0..samples[0] {
                let dx = ((i as f64 + 0.5) / samples[0] as f64 - 0.5) * step_x;
                sum += self.bilinear(x + dx, y + dy, c);
            }
        }
        sum / (samples[0] * samples[1]) as f64
    }
}

/// Luma of a patch, single channel patches are returned unchanged.
pub fn to_gray(patch: &Patch) -> Matrixd {
    if patch.len() < 3 {
        return patch[0].clone();
    }
    &patch[0] * 0.299 + &patch[1] * 0.587 + &patch[2] * 0.114
}

/// Resample a plane to `rows x cols`. Sample positions follow the same
/// pixel-center convention as `Image::sample_patch`.
pub fn resize_plane(
    plane: &Matrixd,
    rows: usize,
    cols: usize,
    interpolation: Interpolation,
) -> Matrixd {
    if plane.nrows() == rows && plane.ncols() == cols {
        return plane.clone();
    }
    let src_rows = plane.nrows() as i64;
    let src_cols = plane.ncols() as i64;
    let at = |r: i64, c: i64| plane[(r.clamp(0, src_rows - 1) as usize, c.clamp(0, src_cols - 1) as usize)];
    let bilinear = |y: f64, x: f64| {
        let x0 = x.floor();
        let y0 = y.floor();
        let (fx, fy) = (x - x0, y - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);
        (1. - fy) * ((1. - fx) * at(y0, x0) + fx * at(y0, x0 + 1))
            + fy * ((1. - fx) * at(y0 + 1, x0) + fx * at(y0 + 1, x0 + 1))
    };

    let step_y = plane.nrows() as f64 / rows as f64;
    let step_x = plane.ncols() as f64 / cols as f64;
    Matrixd::from_fn(rows, cols, |r, c| {
        let y = (r as f64 + 0.5) * step_y - 0.5;
        let x = (c as f64 + 0.5) * step_x - 0.5;
        match interpolation {
            Interpolation::Nearest => at(y.round() as i64, x.round() as i64),
            Interpolation::Linear => bilinear(y, x),
            Interpolation::Area => {
                let ny = (step_y.ceil() as usize).clamp(1, MAX_AREA_SAMPLES);
                let nx = (step_x.ceil() as usize).clamp(1, MAX_AREA_SAMPLES);
                let mut sum = 0.;
                for j in 0..ny {
                    let dy = ((j as f64 + 0.5) / ny as f64 - 0.5) * step_y;
                    for i in 0..nx {
                        let dx = ((i as f64 + 0.5) / nx as f64 - 0.5) * step_x;
                        sum += bilinear(y + dy, x + dx);
                    }
                }
                sum / (nx * ny) as f64
            }
        }
    })
}
