use tracing::trace;

use crate::config::SpectrumLayout;
use crate::error::TrackError;
use crate::feature::FeatureExtractor;
use crate::image::Image;
use crate::my_types::*;
use crate::spectral::*;

/// 2D Gaussian peaked at cell `(rows / 2, cols / 2)`.
pub fn gaussian_labels_2d(sigma: f64, rows: usize, cols: usize) -> Matrixd {
    let (cr, cc) = ((rows / 2) as f64, (cols / 2) as f64);
    let inv = -0.5 / (sigma * sigma);
    Matrixd::from_fn(rows, cols, |r, c| {
        let dr = r as f64 - cr;
        let dc = c as f64 - cc;
        (inv * (dr * dr + dc * dc)).exp()
    })
}

/// Vertex offset of the parabola through three samples, in `[-0.5, 0.5]`
/// when `center` is the largest of them.
pub fn parabola_peak(left: f64, center: f64, right: f64) -> f64 {
    let divisor = 2. * center - right - left;
    if divisor == 0. {
        return 0.;
    }
    0.5 * (right - left) / divisor
}

/// Result of correlating the stored filter against a new patch.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Spatial response, one value per cell.
    pub response: Matrixd,
    /// `(row, col)` of the maximum.
    pub peak: (usize, usize),
    pub peak_value: f64,
    /// Displacement of the target from the patch center, in cells.
    pub delta: Vector2d,
}

/// Location of the largest value.
pub fn arg_max(response: &Matrixd) -> ((usize, usize), f64) {
    let mut best = ((0, 0), f64::NEG_INFINITY);
    for c in 0..response.ncols() {
        for r in 0..response.nrows() {
            let v = response[(r, c)];
            if v > best.1 {
                best = ((r, c), v);
            }
        }
    }
    best
}

/// Correlation filter estimating the target displacement.
///
/// Keeps one numerator spectrum per feature channel and a shared
/// denominator, both blended by EMA on every accepted frame.
pub struct TranslationFilter {
    ops: Box<dyn SpectralOps>,
    extractor: FeatureExtractor,
    label_spectrum: Spectrum,
    numerator: Vec<Spectrum>,
    denominator: Option<Spectrum>,
    lambda: f64,
    learning_rate: f64,
    sub_cell: bool,
}

impl TranslationFilter {
    pub fn new(
        extractor: FeatureExtractor,
        output_sigma: f64,
        lambda: f64,
        learning_rate: f64,
        cell_size: usize,
        layout: SpectrumLayout,
    ) -> Self {
        let mut ops = spectral_ops(layout);
        let (rows, cols) = extractor.cells();
        let labels = gaussian_labels_2d(output_sigma, rows, cols);
        let label_spectrum = ops.forward(&labels);
        Self {
            ops,
            extractor,
            label_spectrum,
            numerator: vec![],
            denominator: None,
            lambda,
            learning_rate,
            sub_cell: cell_size != 1,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.denominator.is_some()
    }

    pub fn numerator(&self) -> &[Spectrum] {
        &self.numerator
    }

    pub fn denominator(&self) -> Option<&Spectrum> {
        self.denominator.as_ref()
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    fn training_data(
        &mut self,
        frame: &Image,
        center: Vector2d,
        patch_size: [f64; 2],
    ) -> Result<(Vec<Spectrum>, Spectrum), TrackError> {
        let features = self.extractor.extract(frame, center, patch_size)?;
        let spectra: Vec<Spectrum> = features
            .channels()
            .iter()
            .map(|channel| self.ops.forward(channel))
            .collect();
        let numerator: Vec<Spectrum> = spectra
            .iter()
            .map(|x| self.ops.multiply(&self.label_spectrum, x, true))
            .collect();
        let energies: Vec<Spectrum> = spectra
            .iter()
            .map(|x| self.ops.multiply(x, x, true))
            .collect();
        let denominator = Spectrum::sum(&energies)
            .ok_or_else(|| TrackError::InvalidInput("feature map without channels".into()))?;
        Ok((numerator, denominator))
    }

    /// Replace the model with one trained on a single patch.
    pub fn train(
        &mut self,
        frame: &Image,
        center: Vector2d,
        patch_size: [f64; 2],
    ) -> Result<(), TrackError> {
        let (numerator, denominator) = self.training_data(frame, center, patch_size)?;
        self.numerator = numerator;
        self.denominator = Some(denominator);
        Ok(())
    }

    /// Blend a new patch into the model. Trains from scratch when untrained.
    pub fn update(
        &mut self,
        frame: &Image,
        center: Vector2d,
        patch_size: [f64; 2],
    ) -> Result<(), TrackError> {
        let (numerator, denominator) = self.training_data(frame, center, patch_size)?;
        let Some(current) = self.denominator.as_mut() else {
            self.numerator = numerator;
            self.denominator = Some(denominator);
            return Ok(());
        };
        current.ema(&denominator, self.learning_rate);
        for (current, new) in self.numerator.iter_mut().zip(numerator.iter()) {
            current.ema(new, self.learning_rate);
        }
        Ok(())
    }

    pub fn detect(
        &mut self,
        frame: &Image,
        center: Vector2d,
        patch_size: [f64; 2],
    ) -> Result<Detection, TrackError> {
        let denominator = self.denominator.as_ref().ok_or(TrackError::NotInitialized)?;
        let features = self.extractor.extract(frame, center, patch_size)?;

        let mut correlation: Option<Spectrum> = None;
        for (num, channel) in self.numerator.iter().zip(features.channels()) {
            let z = self.ops.forward(channel);
            let term = self.ops.multiply(num, &z, true);
            match correlation.as_mut() {
                Some(sum) => sum.add_assign(&term),
                None => correlation = Some(term),
            }
        }
        let correlation = correlation.ok_or(TrackError::NotInitialized)?;
        let response = self
            .ops
            .inverse(&correlation.divide_regularized(denominator, self.lambda));

        let (peak, peak_value) = arg_max(&response);
        let (rows, cols) = response.shape();
        let mut sub = Vector2d::new(peak.1 as f64, peak.0 as f64);
        if self.sub_cell {
            if cols > 2 {
                let left = response[(peak.0, (peak.1 + cols - 1) % cols)];
                let right = response[(peak.0, (peak.1 + 1) % cols)];
                sub.x += parabola_peak(left, peak_value, right);
            }
            if rows > 2 {
                let up = response[((peak.0 + rows - 1) % rows, peak.1)];
                let down = response[((peak.0 + 1) % rows, peak.1)];
                sub.y += parabola_peak(up, peak_value, down);
            }
        }
        let delta = sub - Vector2d::new((cols / 2) as f64, (rows / 2) as f64);
        trace!(?peak, peak_value, dx = delta.x, dy = delta.y, "translation response");

        Ok(Detection {
            response,
            peak,
            peak_value,
            delta,
        })
    }
}
