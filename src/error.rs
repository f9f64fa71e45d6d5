use thiserror::Error;

/// Reasons a tracking cycle can fail. All of them are recoverable by calling
/// `Tracker::reinit` again.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("tracker is not initialized")]
    NotInitialized,

    #[error("tracking lost: {0}")]
    TrackingLost(LossReason),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LossReason {
    LowPsr { psr: f64, threshold: f64 },
    AreaOutOfRange { area: f64, min: f64, max: f64 },
    OutsideFrame { deficit: f64 },
}

impl std::fmt::Display for LossReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LossReason::LowPsr { psr, threshold } => {
                write!(f, "psr {psr:.2} below threshold {threshold:.2}")
            }
            LossReason::AreaOutOfRange { area, min, max } => {
                write!(f, "box area {area:.1} outside [{min:.1}, {max:.1}]")
            }
            LossReason::OutsideFrame { deficit } => {
                write!(f, "box leaves the frame by {deficit:.2} px^2")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("learning rate must lie in [0, 1), got {0}")]
    LearningRate(f64),

    #[error("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("{0} must be at least 1")]
    ZeroSize(&'static str),

    #[error("scale step must be greater than 1, got {0}")]
    ScaleStep(f64),

    #[error("template size {template_size} is smaller than cell size {cell_size}")]
    TemplateTooSmall { template_size: usize, cell_size: usize },
}
