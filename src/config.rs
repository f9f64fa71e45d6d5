use serde::Deserialize;

use crate::error::ConfigError;

/// Resampling kernel used when patches are scaled to the template size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Nearest,
    Linear,
    /// Box average over the source footprint, falls back to linear when upsampling.
    Area,
}

/// Storage layout of frequency-domain buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectrumLayout {
    /// Hermitian half spectrum of a real signal, `width / 2 + 1` columns.
    Packed,
    /// Full complex spectrum.
    Full,
}

/// Tracker parameters. Fixed once the tracker is constructed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Extra area around the target, as a fraction of its size.
    pub padding: f64,
    pub output_sigma_factor: f64,
    pub lambda: f64,
    pub learning_rate: f64,
    /// Side length of the canonical template in pixels.
    pub template_size: usize,
    pub cell_size: usize,

    pub enable_tracking_loss_detection: bool,
    pub psr_threshold: f64,
    /// Half width of the window around the peak excluded from the sidelobe.
    pub psr_peak_del: usize,
    pub min_area: f64,
    pub max_area_factor: f64,

    pub enable_scale_estimator: bool,
    pub scale_sigma_factor: f64,
    pub scale_step: f64,
    pub scale_cell_size: usize,
    pub number_of_scales: usize,

    pub resize_interpolation: Interpolation,
    pub use_transposed_feature_layout: bool,
    pub spectrum_layout: SpectrumLayout,
    /// Skip normalizing the template to `template_size`.
    pub keep_native_template_size: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            padding: 1.6,
            output_sigma_factor: 0.05,
            lambda: 0.01,
            learning_rate: 0.012,
            template_size: 100,
            cell_size: 2,
            enable_tracking_loss_detection: false,
            psr_threshold: 13.5,
            psr_peak_del: 1,
            min_area: 10.,
            max_area_factor: 0.8,
            enable_scale_estimator: true,
            scale_sigma_factor: 0.25,
            scale_step: 1.02,
            scale_cell_size: 4,
            number_of_scales: 33,
            resize_interpolation: Interpolation::Linear,
            use_transposed_feature_layout: false,
            spectrum_layout: SpectrumLayout::Packed,
            keep_native_template_size: false,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0. ..1.).contains(&self.learning_rate) {
            return Err(ConfigError::LearningRate(self.learning_rate));
        }
        let positive = [
            ("padding", self.padding),
            ("output_sigma_factor", self.output_sigma_factor),
            ("lambda", self.lambda),
            ("scale_sigma_factor", self.scale_sigma_factor),
            ("max_area_factor", self.max_area_factor),
        ];
        for (name, value) in positive {
            if !(value > 0.) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        if self.cell_size == 0 {
            return Err(ConfigError::ZeroSize("cell_size"));
        }
        if self.scale_cell_size == 0 {
            return Err(ConfigError::ZeroSize("scale_cell_size"));
        }
        if self.number_of_scales == 0 {
            return Err(ConfigError::ZeroSize("number_of_scales"));
        }
        if !(self.scale_step > 1.) {
            return Err(ConfigError::ScaleStep(self.scale_step));
        }
        if self.template_size < self.cell_size {
            return Err(ConfigError::TemplateTooSmall {
                template_size: self.template_size,
                cell_size: self.cell_size,
            });
        }
        Ok(())
    }
}

/// Command line options of the sequence runner.
#[derive(Debug, Default)]
#[derive(clap::Parser)]
pub struct RunConfig {
    /// JSON file with `TrackerConfig` fields, missing fields keep their defaults.
    #[clap(long)]
    pub config: Option<String>,

    #[clap(long)]
    pub psr_threshold: Option<f64>,

    /// Turn on tracking loss detection.
    #[clap(long)]
    pub loss_detection: bool,
}

impl RunConfig {
    /// Apply command line overrides on top of a loaded tracker config.
    pub fn apply(&self, config: &mut TrackerConfig) {
        if let Some(psr_threshold) = self.psr_threshold {
            config.psr_threshold = psr_threshold;
        }
        if self.loss_detection {
            config.enable_tracking_loss_detection = true;
        }
    }
}
