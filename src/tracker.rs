use tracing::{debug, instrument, warn};

use crate::config::TrackerConfig;
use crate::error::{ConfigError, TrackError};
use crate::failure::FailureDetector;
use crate::feature::FeatureExtractor;
use crate::geometry::BoundingBox;
use crate::image::Image;
use crate::my_types::*;
use crate::scale::ScaleEstimator;
use crate::translation::TranslationFilter;

/// Outcome of one tracking cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackResult {
    /// New estimate on success, otherwise the last accepted box.
    pub bounding_box: BoundingBox,
    pub success: bool,
    pub error: Option<TrackError>,
}

impl TrackResult {
    fn accepted(bounding_box: BoundingBox) -> Self {
        Self {
            bounding_box,
            success: true,
            error: None,
        }
    }

    fn failed(bounding_box: BoundingBox, error: TrackError) -> Self {
        Self {
            bounding_box,
            success: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone)]
struct TrackerState {
    center: Vector2d,
    /// Frame pixels per template pixel.
    scale: f64,
    /// Converts `scale` to the scale estimator's factor, which starts at 1.
    template_scale_factor: f64,
    /// Target size at `scale == 1`.
    base_target_size: [f64; 2],
    template_size: [usize; 2],
    bounding_box: BoundingBox,
}

impl TrackerState {
    fn patch_size(&self, scale: f64) -> [f64; 2] {
        [
            self.template_size[0] as f64 * scale,
            self.template_size[1] as f64 * scale,
        ]
    }
}

/// Single target tracker. Every instance owns its filters and FFT plans.
pub struct Tracker {
    config: TrackerConfig,
    failure: FailureDetector,
    state: Option<TrackerState>,
    translation: Option<TranslationFilter>,
    scale_estimator: Option<ScaleEstimator>,
    last_psr: Option<f64>,
}

/// Largest multiple of `cell_size` not above `length`.
fn whole_cells(length: f64, cell_size: usize) -> usize {
    let length = (length + 1e-9).floor().max(0.) as usize;
    length / cell_size * cell_size
}

fn check_input(frame: &Image, bounding_box: &BoundingBox) -> Result<(), TrackError> {
    if frame.is_empty() {
        return Err(TrackError::InvalidInput("empty frame".into()));
    }
    if bounding_box.is_degenerate() {
        return Err(TrackError::InvalidInput(format!(
            "degenerate bounding box {bounding_box:?}"
        )));
    }
    let frame_box = BoundingBox::new(0., 0., frame.width as f64, frame.height as f64);
    if bounding_box.intersection(&frame_box).area() <= 0. {
        return Err(TrackError::InvalidInput(format!(
            "bounding box {bounding_box:?} is outside the frame"
        )));
    }
    Ok(())
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            failure: FailureDetector::new(&config),
            config,
            state: None,
            translation: None,
            scale_estimator: None,
            last_psr: None,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Last accepted box.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.state.as_ref().map(|s| s.bounding_box)
    }

    pub fn center(&self) -> Option<Vector2d> {
        self.state.as_ref().map(|s| s.center)
    }

    /// Peak-to-sidelobe ratio of the latest detection, accepted or not.
    pub fn last_psr(&self) -> Option<f64> {
        self.last_psr
    }

    pub fn translation_filter(&self) -> Option<&TranslationFilter> {
        self.translation.as_ref()
    }

    pub fn scale_estimator(&self) -> Option<&ScaleEstimator> {
        self.scale_estimator.as_ref()
    }

    /// Start tracking the target inside `bounding_box`, replacing any previous
    /// model. On error the tracker is left as it was.
    #[instrument(skip_all)]
    pub fn reinit(&mut self, frame: &Image, bounding_box: &BoundingBox) -> Result<(), TrackError> {
        check_input(frame, bounding_box)?;

        let config = &self.config;
        let [w, h] = [bounding_box.width, bounding_box.height];
        let center = Vector2d::new(
            bounding_box.x.floor() + (w / 2.).floor(),
            bounding_box.y.floor() + (h / 2.).floor(),
        );
        let padded = [
            (w * (1. + config.padding)).floor(),
            (h * (1. + config.padding)).floor(),
        ];
        let scale = if config.keep_native_template_size {
            1.
        } else {
            padded[0].max(padded[1]) / config.template_size as f64
        };
        if !(scale > 0.) {
            return Err(TrackError::InvalidInput(format!(
                "bounding box {bounding_box:?} is too small"
            )));
        }
        let cell_size = config.cell_size;
        let template_size = [
            whole_cells(padded[0] / scale, cell_size),
            whole_cells(padded[1] / scale, cell_size),
        ];
        if template_size[0] == 0 || template_size[1] == 0 {
            return Err(TrackError::InvalidInput(format!(
                "bounding box {bounding_box:?} is smaller than a cell"
            )));
        }

        let template_area = (template_size[0] * template_size[1]) as f64;
        let output_sigma = (template_area / (1. + config.padding).powi(2)).sqrt()
            * config.output_sigma_factor
            / cell_size as f64;
        let extractor = FeatureExtractor::new(
            template_size,
            cell_size,
            config.resize_interpolation,
            config.use_transposed_feature_layout,
        );
        let mut translation = TranslationFilter::new(
            extractor,
            output_sigma,
            config.lambda,
            config.learning_rate,
            cell_size,
            config.spectrum_layout,
        );
        let state = TrackerState {
            center,
            scale,
            template_scale_factor: 1. / scale,
            base_target_size: [w / scale, h / scale],
            template_size,
            bounding_box: *bounding_box,
        };
        translation.train(frame, center, state.patch_size(scale))?;

        let scale_estimator = if config.enable_scale_estimator {
            let mut estimator = ScaleEstimator::new(config, [w, h], [frame.width, frame.height]);
            estimator.train(frame, center, 1.)?;
            Some(estimator)
        } else {
            None
        };

        debug!(
            x = center.x,
            y = center.y,
            scale,
            template_w = template_size[0],
            template_h = template_size[1],
            "tracker initialized"
        );
        self.translation = Some(translation);
        self.scale_estimator = scale_estimator;
        self.state = Some(state);
        self.last_psr = None;
        Ok(())
    }

    /// Track the target from its last accepted position.
    #[instrument(skip_all)]
    pub fn update(&mut self, frame: &Image) -> TrackResult {
        let Some(state) = self.state.as_ref() else {
            return TrackResult::failed(BoundingBox::default(), TrackError::NotInitialized);
        };
        let (center, scale) = (state.center, state.scale);
        self.track_from(frame, center, scale)
    }

    /// Track the target searching around an externally supplied box. The
    /// learned model is kept, the search scale follows the larger side of
    /// `hint`.
    #[instrument(skip_all)]
    pub fn update_at(&mut self, frame: &Image, hint: &BoundingBox) -> TrackResult {
        let Some(state) = self.state.as_ref() else {
            return TrackResult::failed(BoundingBox::default(), TrackError::NotInitialized);
        };
        if let Err(err) = check_input(frame, hint) {
            return TrackResult::failed(state.bounding_box, err);
        }
        let [base_w, base_h] = state.base_target_size;
        let scale = if hint.width >= hint.height {
            hint.width / base_w
        } else {
            hint.height / base_h
        };
        self.track_from(frame, hint.center(), scale)
    }

    fn track_from(&mut self, frame: &Image, center: Vector2d, scale: f64) -> TrackResult {
        match self.cycle(frame, center, scale) {
            Ok(bounding_box) => TrackResult::accepted(bounding_box),
            Err(err) => {
                debug!(%err, "update rejected");
                let last = self.bounding_box().unwrap_or_default();
                TrackResult::failed(last, err)
            }
        }
    }

    /// Detect, validate and, when accepted, train. State is only touched on
    /// acceptance.
    fn cycle(&mut self, frame: &Image, center: Vector2d, scale: f64) -> Result<BoundingBox, TrackError> {
        let state = self.state.as_mut().ok_or(TrackError::NotInitialized)?;
        let translation = self.translation.as_mut().ok_or(TrackError::NotInitialized)?;
        if frame.is_empty() {
            return Err(TrackError::InvalidInput("empty frame".into()));
        }

        let detection = translation.detect(frame, center, state.patch_size(scale))?;
        let offset = detection.delta * (self.config.cell_size as f64 * scale);
        let new_center = center + offset.map(f64::round);

        let mut new_scale = scale;
        if let Some(estimator) = self.scale_estimator.as_mut() {
            let factor = state.template_scale_factor;
            new_scale = estimator.detect(frame, new_center, scale * factor)? / factor;
        }
        let [base_w, base_h] = state.base_target_size;
        let bounding_box = BoundingBox::from_center(new_center, base_w * new_scale, base_h * new_scale);

        let psr = self.failure.psr(&detection.response, detection.peak);
        self.last_psr = Some(psr);
        if self.config.enable_tracking_loss_detection {
            self.failure
                .evaluate(frame, &detection.response, detection.peak, &bounding_box)
                .map_err(TrackError::TrackingLost)?;
        }

        state.center = new_center;
        state.scale = new_scale;
        state.bounding_box = bounding_box;
        debug!(
            psr,
            scale = new_scale,
            x = new_center.x,
            y = new_center.y,
            "update accepted"
        );

        if let Err(err) = translation.update(frame, new_center, state.patch_size(new_scale)) {
            warn!(%err, "translation model not updated");
        }
        if let Some(estimator) = self.scale_estimator.as_mut() {
            let factor = state.template_scale_factor;
            if let Err(err) = estimator.update(frame, new_center, new_scale * factor) {
                warn!(%err, "scale model not updated");
            }
        }
        Ok(bounding_box)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpectrumLayout;
    use crate::error::LossReason;
    use crate::test_utils::*;

    fn assert_box_near(a: &BoundingBox, b: &BoundingBox, tol: f64) {
        let d = [a.x - b.x, a.y - b.y, a.width - b.width, a.height - b.height];
        assert!(d.iter().all(|v| v.abs() <= tol), "{a:?} vs {b:?}");
    }

    fn translation_only() -> TrackerConfig {
        TrackerConfig {
            enable_scale_estimator: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_tracker_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Tracker>();
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = TrackerConfig {
            learning_rate: 1.5,
            ..Default::default()
        };
        assert!(matches!(Tracker::new(config), Err(ConfigError::LearningRate(_))));
    }

    #[test]
    fn test_reinit_keeps_input_box() {
        let frame = blob_frame(200, 200, 80., 80., 10);
        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        assert!(!tracker.is_initialized());
        assert_eq!(tracker.bounding_box(), None);

        let bb = BoundingBox::new(60.3, 59.7, 41.2, 38.9);
        tracker.reinit(&frame, &bb).unwrap();
        assert!(tracker.is_initialized());
        assert_eq!(tracker.bounding_box(), Some(bb));
        assert_eq!(tracker.center(), Some(Vector2d::new(80., 78.)));
        assert!(tracker.translation_filter().unwrap().is_trained());
        assert!(tracker.scale_estimator().unwrap().is_trained());
    }

    #[test]
    fn test_template_sizing() {
        let frame = blob_frame(200, 200, 80., 80., 10);
        let bb = BoundingBox::new(60., 60., 40., 40.);

        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        tracker.reinit(&frame, &bb).unwrap();
        let extractor = tracker.translation_filter().unwrap().extractor();
        assert_eq!(extractor.template_size(), [100, 100]);
        assert_eq!(extractor.cells(), (50, 50));

        let config = TrackerConfig {
            keep_native_template_size: true,
            ..Default::default()
        };
        let mut tracker = Tracker::new(config).unwrap();
        tracker.reinit(&frame, &bb).unwrap();
        assert_eq!(
            tracker.translation_filter().unwrap().extractor().template_size(),
            [104, 104]
        );
    }

    #[test]
    fn test_reinit_rejects_invalid_input() {
        let frame = blob_frame(200, 200, 80., 80., 10);
        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        let invalid = [
            BoundingBox::new(10., 10., 0., 20.),
            BoundingBox::new(10., 10., -5., 20.),
            BoundingBox::new(f64::NAN, 10., 20., 20.),
            BoundingBox::new(500., 10., 20., 20.),
            // thinner than a cell once normalized
            BoundingBox::new(10., 10., 150., 1.),
        ];
        for bb in &invalid {
            let err = tracker.reinit(&frame, bb).unwrap_err();
            assert!(matches!(err, TrackError::InvalidInput(_)), "{bb:?}: {err}");
            assert!(!tracker.is_initialized());
            assert!(tracker.translation_filter().is_none());
        }
        let err = tracker
            .reinit(&Image::empty(), &BoundingBox::new(0., 0., 10., 10.))
            .unwrap_err();
        assert!(matches!(err, TrackError::InvalidInput(_)));
    }

    #[test]
    fn test_failed_reinit_keeps_model() {
        let frame = blob_frame(200, 200, 80., 80., 10);
        let good = BoundingBox::new(60., 60., 40., 40.);
        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        tracker.reinit(&frame, &good).unwrap();
        let denominator = tracker.translation_filter().unwrap().denominator().cloned();
        let scale_denominator = tracker.scale_estimator().unwrap().denominator().cloned();

        for bb in [
            BoundingBox::new(10., 10., 0., 20.),
            BoundingBox::new(500., 10., 20., 20.),
            BoundingBox::new(10., 10., 150., 1.),
        ] {
            assert!(matches!(
                tracker.reinit(&frame, &bb),
                Err(TrackError::InvalidInput(_))
            ));
            assert!(tracker.is_initialized());
            assert_eq!(tracker.bounding_box(), Some(good));
            assert_eq!(
                tracker.translation_filter().unwrap().denominator().cloned(),
                denominator
            );
            assert_eq!(
                tracker.scale_estimator().unwrap().denominator().cloned(),
                scale_denominator
            );
        }
        let result = tracker.update(&frame);
        assert!(result.success);
        assert_box_near(&result.bounding_box, &good, 1e-9);
    }

    #[test]
    fn test_thin_box_crossing_frame_does_not_panic() {
        let frame = blob_frame(200, 100, 52., 50., 18);
        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        tracker.reinit(&frame, &BoundingBox::new(50., -25., 4., 150.)).unwrap();
        let (min, max) = tracker.scale_estimator().unwrap().scale_range();
        assert!(min <= max);
        let result = tracker.update(&frame);
        assert!(result.success, "{:?}", result.error);
        let bb = result.bounding_box;
        assert!(bb.width.is_finite() && bb.height.is_finite());
        // the estimator cannot shrink the 4 px side any further
        assert!(bb.width >= 4. - 1e-9, "{bb:?}");
    }

    #[test]
    fn test_update_requires_init() {
        let frame = blob_frame(100, 100, 50., 50., 10);
        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        let result = tracker.update(&frame);
        assert!(!result.success);
        assert_eq!(result.error, Some(TrackError::NotInitialized));
        let result = tracker.update_at(&frame, &BoundingBox::new(30., 30., 40., 40.));
        assert_eq!(result.error, Some(TrackError::NotInitialized));
        assert_eq!(tracker.bounding_box(), None);
    }

    #[test]
    fn test_static_frame_is_stable() {
        let frame = blob_frame(200, 200, 80., 80., 11);
        let bb = BoundingBox::new(60., 60., 40., 40.);
        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        tracker.reinit(&frame, &bb).unwrap();
        for _ in 0..5 {
            let result = tracker.update(&frame);
            assert!(result.success);
            assert_box_near(&result.bounding_box, &bb, 1e-9);
        }
        assert!(tracker.last_psr().unwrap() > 8.);
    }

    #[test]
    fn test_color_frame() {
        let frame = to_rgb(&blob_frame(200, 200, 80., 80., 11));
        let bb = BoundingBox::new(60., 60., 40., 40.);
        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        tracker.reinit(&frame, &bb).unwrap();
        let result = tracker.update(&frame);
        assert!(result.success);
        assert_box_near(&result.bounding_box, &bb, 1e-9);
    }

    #[test]
    fn test_translation_equivariance() {
        let frame0 = blob_frame(200, 200, 80., 80., 12);
        let frame1 = blob_frame(200, 200, 84., 74., 12);
        let bb = BoundingBox::new(60., 60., 40., 40.);
        let mut tracker = Tracker::new(translation_only()).unwrap();
        tracker.reinit(&frame0, &bb).unwrap();
        let result = tracker.update(&frame1);
        assert!(result.success);
        // half a cell in frame pixels
        let tol = 0.5 * 2. * 1.04;
        assert_box_near(&result.bounding_box, &BoundingBox::new(64., 54., 40., 40.), tol);
        assert_eq!(tracker.bounding_box(), Some(result.bounding_box));
    }

    #[test]
    fn test_transposed_layout_tracks() {
        let frame0 = blob_frame(200, 200, 80., 80., 12);
        let frame1 = blob_frame(200, 200, 84., 74., 12);
        let config = TrackerConfig {
            use_transposed_feature_layout: true,
            ..translation_only()
        };
        let mut tracker = Tracker::new(config).unwrap();
        tracker.reinit(&frame0, &BoundingBox::new(60., 60., 40., 40.)).unwrap();
        let result = tracker.update(&frame1);
        assert!(result.success);
        assert_box_near(&result.bounding_box, &BoundingBox::new(64., 54., 40., 40.), 1.04);
    }

    #[test]
    fn test_scale_equivariance() {
        let s = 1.02f64.powi(5);
        let frame0 = blob_frame(240, 240, 120., 120., 13);
        let frame1 = scaled_blob_frame(240, 240, 120., 120., 13, s);
        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        tracker.reinit(&frame0, &BoundingBox::new(90., 90., 60., 60.)).unwrap();
        let result = tracker.update(&frame1);
        assert!(result.success);
        let bb = result.bounding_box;
        let steps = (bb.width / 60.).ln() / 1.02f64.ln();
        assert!((steps - 5.).abs() <= 2., "detected {steps} steps");
        assert!((bb.width - bb.height).abs() < 1e-9);
        assert!((bb.center() - Vector2d::new(120., 120.)).norm() < 2.);
    }

    #[test]
    fn test_loss_detection_freezes_model() {
        let clean = blob_frame(200, 200, 80., 80., 14);
        let noisy = with_noise(&clean, &BoundingBox::new(40., 40., 80., 80.), 99);
        let config = TrackerConfig {
            enable_tracking_loss_detection: true,
            psr_threshold: 8.,
            ..translation_only()
        };
        let mut tracker = Tracker::new(config).unwrap();
        tracker.reinit(&clean, &BoundingBox::new(60., 60., 40., 40.)).unwrap();

        let first = tracker.update(&clean);
        assert!(first.success, "{:?}", first.error);
        let filter = tracker.translation_filter().unwrap();
        let numerator = filter.numerator().to_vec();
        let denominator = filter.denominator().cloned();

        let lost = tracker.update(&noisy);
        assert!(!lost.success);
        assert!(matches!(
            lost.error,
            Some(TrackError::TrackingLost(LossReason::LowPsr { .. }))
        ));
        assert_eq!(lost.bounding_box, first.bounding_box);
        assert_eq!(tracker.bounding_box(), Some(first.bounding_box));
        let filter = tracker.translation_filter().unwrap();
        assert_eq!(filter.numerator(), &numerator[..]);
        assert_eq!(filter.denominator().cloned(), denominator);

        let recovered = tracker.update(&clean);
        assert!(recovered.success);
        assert_box_near(&recovered.bounding_box, &first.bounding_box, 1.);
    }

    #[test]
    fn test_loss_detection_freezes_scale_model() {
        let clean = blob_frame(200, 200, 80., 80., 14);
        let noisy = with_noise(&clean, &BoundingBox::new(40., 40., 80., 80.), 99);
        let config = TrackerConfig {
            enable_tracking_loss_detection: true,
            psr_threshold: 8.,
            ..Default::default()
        };
        let mut tracker = Tracker::new(config).unwrap();
        tracker.reinit(&clean, &BoundingBox::new(60., 60., 40., 40.)).unwrap();

        let first = tracker.update(&clean);
        assert!(first.success, "{:?}", first.error);
        let estimator = tracker.scale_estimator().unwrap();
        let numerator = estimator.numerator().cloned();
        let denominator = estimator.denominator().cloned();
        let translation_denominator = tracker.translation_filter().unwrap().denominator().cloned();

        let lost = tracker.update(&noisy);
        assert!(!lost.success);
        assert!(matches!(lost.error, Some(TrackError::TrackingLost(_))));
        assert_eq!(lost.bounding_box, first.bounding_box);
        let estimator = tracker.scale_estimator().unwrap();
        assert_eq!(estimator.numerator().cloned(), numerator);
        assert_eq!(estimator.denominator().cloned(), denominator);
        assert_eq!(
            tracker.translation_filter().unwrap().denominator().cloned(),
            translation_denominator
        );

        let recovered = tracker.update(&clean);
        assert!(recovered.success, "{:?}", recovered.error);
        assert_box_near(&recovered.bounding_box, &first.bounding_box, 1.);
    }

    #[test]
    fn test_loss_detection_geometry() {
        let frame = blob_frame(200, 200, 80., 80., 15);
        let config = TrackerConfig {
            enable_tracking_loss_detection: true,
            psr_threshold: 0.,
            max_area_factor: 0.01,
            ..translation_only()
        };
        let mut tracker = Tracker::new(config).unwrap();
        tracker.reinit(&frame, &BoundingBox::new(60., 60., 40., 40.)).unwrap();
        let result = tracker.update(&frame);
        assert!(matches!(
            result.error,
            Some(TrackError::TrackingLost(LossReason::AreaOutOfRange { .. }))
        ));
    }

    #[test]
    fn test_layouts_track_identically() {
        let frame0 = blob_frame(200, 200, 80., 80., 16);
        let frame1 = blob_frame(200, 200, 83., 78., 16);
        let bb = BoundingBox::new(60., 60., 40., 40.);
        let mut results = vec![];
        for layout in [SpectrumLayout::Packed, SpectrumLayout::Full] {
            let config = TrackerConfig {
                spectrum_layout: layout,
                ..Default::default()
            };
            let mut tracker = Tracker::new(config).unwrap();
            tracker.reinit(&frame0, &bb).unwrap();
            let result = tracker.update(&frame1);
            assert!(result.success);
            results.push((result.bounding_box, tracker.last_psr().unwrap()));
        }
        assert_box_near(&results[0].0, &results[1].0, 1e-9);
        assert!((results[0].1 - results[1].1).abs() < 1e-6 * results[0].1.abs());
    }

    #[test]
    fn test_update_at_reanchors_search() {
        let frame0 = blob_frame(240, 240, 80., 80., 17);
        let frame1 = blob_frame(240, 240, 150., 140., 17);
        let mut tracker = Tracker::new(translation_only()).unwrap();
        tracker.reinit(&frame0, &BoundingBox::new(60., 60., 40., 40.)).unwrap();

        let result = tracker.update_at(&frame1, &BoundingBox::new(127., 117., 40., 40.));
        assert!(result.success);
        assert_box_near(&result.bounding_box, &BoundingBox::new(130., 120., 40., 40.), 1.04);

        let before = tracker.bounding_box();
        let result = tracker.update_at(&frame1, &BoundingBox::new(127., 117., 0., 40.));
        assert!(matches!(result.error, Some(TrackError::InvalidInput(_))));
        assert_eq!(Some(result.bounding_box), before);
        assert_eq!(tracker.bounding_box(), before);
    }
}
