use tracing::trace;

use crate::config::{Interpolation, TrackerConfig};
use crate::error::TrackError;
use crate::feature::{gradient_features, hann};
use crate::image::Image;
use crate::my_types::*;
use crate::spectral::*;
use crate::translation::arg_max;

/// Scale samples are resized so their area does not exceed this many pixels.
const SCALE_MODEL_MAX_AREA: f64 = 512.;
/// Smallest target side in pixels the estimator may shrink to.
const MIN_TARGET_SIDE: f64 = 5.;

/// 1D Gaussian peaked at `n / 2`.
pub fn gaussian_labels_1d(sigma: f64, n: usize) -> Vec<f64> {
    let center = (n / 2) as f64;
    (0..n)
        .map(|i| {
            let d = i as f64 - center;
            (-0.5 * d * d / (sigma * sigma)).exp()
        })
        .collect()
}

/// Estimates the target size change with a 1D correlation filter over a
/// log-spaced set of scales.
///
/// Each candidate scale contributes one column of a `features x scales`
/// sample matrix. Every feature row is transformed along the scale axis.
///
/// Scales are relative to the target size given at construction.
pub struct ScaleEstimator {
    ops: Box<dyn SpectralOps>,
    /// `step^(i - center)`, increasing with `i`.
    scale_factors: Vec<f64>,
    scale_step: f64,
    window: Vec<f64>,
    label_spectrum: Spectrum,
    numerator: Option<Spectrum>,
    denominator: Option<Spectrum>,
    target_size: [f64; 2],
    /// `[width, height]` every scale sample is resized to.
    model_size: [usize; 2],
    min_scale: f64,
    max_scale: f64,
    cell_size: usize,
    interpolation: Interpolation,
    transposed: bool,
    lambda: f64,
    learning_rate: f64,
}

impl ScaleEstimator {
    pub fn new(config: &TrackerConfig, target_size: [f64; 2], frame_size: [usize; 2]) -> Self {
        let n = config.number_of_scales;
        let center = (n / 2) as i32;
        let step = config.scale_step;
        let scale_factors: Vec<f64> = (0..n as i32).map(|i| step.powi(i - center)).collect();

        let sigma = (n as f64).sqrt() * config.scale_sigma_factor;
        let labels = gaussian_labels_1d(sigma, n);

        let [w, h] = target_size;
        let model_factor = if w * h > SCALE_MODEL_MAX_AREA {
            (SCALE_MODEL_MAX_AREA / (w * h)).sqrt()
        } else {
            1.
        };
        let cell = config.scale_cell_size;
        let model_size = [
            ((w * model_factor).floor() as usize).max(cell),
            ((h * model_factor).floor() as usize).max(cell),
        ];
        let feature_len = crate::feature::GRADIENT_CHANNELS
            * (model_size[0] / cell)
            * (model_size[1] / cell);

        let mut ops = spectral_ops(config.spectrum_layout);
        // one label row per feature row
        let label_rows = Matrixd::from_fn(feature_len, n, |_, i| labels[i]);
        let label_spectrum = ops.forward_rows(&label_rows);

        let log_step = step.ln();
        let min_scale = step.powf(
            ((MIN_TARGET_SIDE / w).max(MIN_TARGET_SIDE / h).ln() / log_step).ceil(),
        );
        let max_scale = step.powf(
            ((frame_size[0] as f64 / w)
                .min(frame_size[1] as f64 / h)
                .ln()
                / log_step)
                .floor(),
        )
        .max(min_scale);

        Self {
            ops,
            scale_factors,
            scale_step: step,
            window: hann(n),
            label_spectrum,
            numerator: None,
            denominator: None,
            target_size,
            model_size,
            min_scale,
            max_scale,
            cell_size: cell,
            interpolation: config.resize_interpolation,
            transposed: config.use_transposed_feature_layout,
            lambda: config.lambda,
            learning_rate: config.learning_rate,
        }
    }

    pub fn scale_factors(&self) -> &[f64] {
        &self.scale_factors
    }

    pub fn scale_range(&self) -> (f64, f64) {
        (self.min_scale, self.max_scale)
    }

    pub fn is_trained(&self) -> bool {
        self.denominator.is_some()
    }

    pub fn numerator(&self) -> Option<&Spectrum> {
        self.numerator.as_ref()
    }

    pub fn denominator(&self) -> Option<&Spectrum> {
        self.denominator.as_ref()
    }

    /// Windowed `features x scales` sample matrix around `center`.
    fn samples(&self, frame: &Image, center: Vector2d, scale: f64) -> Result<Matrixd, TrackError> {
        let n = self.scale_factors.len();
        let mut columns = Vec::with_capacity(n);
        for (factor, weight) in self.scale_factors.iter().zip(self.window.iter()) {
            let patch_size = [
                (self.target_size[0] * scale * factor).floor().max(1.),
                (self.target_size[1] * scale * factor).floor().max(1.),
            ];
            let patch = frame.sample_patch(center, patch_size, self.model_size, self.interpolation)?;
            let features = gradient_features(&patch, self.cell_size, self.transposed);
            let column: Vec<f64> = features
                .iter()
                .flat_map(|f| f.iter().map(|v| v * weight))
                .collect();
            columns.push(column);
        }
        let rows = columns[0].len();
        Ok(Matrixd::from_fn(rows, n, |r, c| columns[c][r]))
    }

    fn training_data(
        &mut self,
        frame: &Image,
        center: Vector2d,
        scale: f64,
    ) -> Result<(Spectrum, Spectrum), TrackError> {
        let samples = self.samples(frame, center, scale)?;
        let xsf = self.ops.forward_rows(&samples);
        let numerator = self.ops.multiply(&self.label_spectrum, &xsf, true);
        let denominator = self.ops.multiply(&xsf, &xsf, true).sum_rows();
        Ok((numerator, denominator))
    }

    pub fn train(&mut self, frame: &Image, center: Vector2d, scale: f64) -> Result<(), TrackError> {
        let (numerator, denominator) = self.training_data(frame, center, scale)?;
        self.numerator = Some(numerator);
        self.denominator = Some(denominator);
        Ok(())
    }

    pub fn update(&mut self, frame: &Image, center: Vector2d, scale: f64) -> Result<(), TrackError> {
        let (numerator, denominator) = self.training_data(frame, center, scale)?;
        if let (Some(num), Some(den)) = (self.numerator.as_mut(), self.denominator.as_mut()) {
            num.ema(&numerator, self.learning_rate);
            den.ema(&denominator, self.learning_rate);
            return Ok(());
        }
        self.numerator = Some(numerator);
        self.denominator = Some(denominator);
        Ok(())
    }

    /// Best scale around `scale`, clamped to the allowed range.
    pub fn detect(&mut self, frame: &Image, center: Vector2d, scale: f64) -> Result<f64, TrackError> {
        let (Some(numerator), Some(denominator)) = (self.numerator.as_ref(), self.denominator.as_ref())
        else {
            return Err(TrackError::NotInitialized);
        };
        let samples = self.samples(frame, center, scale)?;
        let zsf = self.ops.forward_rows(&samples);
        let correlation = self.ops.multiply(numerator, &zsf, true).sum_rows();
        let response = self
            .ops
            .inverse_rows(&correlation.divide_regularized(denominator, self.lambda));

        let ((_, index), peak) = arg_max(&response);
        let center_index = (self.scale_factors.len() / 2) as i32;
        let new_scale = scale * self.scale_step.powi(index as i32 - center_index);
        trace!(index, peak, new_scale, "scale response");
        Ok(new_scale.max(self.min_scale).min(self.max_scale))
    }
}
