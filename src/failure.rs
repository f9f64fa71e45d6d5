use crate::config::TrackerConfig;
use crate::error::LossReason;
use crate::geometry::BoundingBox;
use crate::image::Image;
use crate::my_types::*;

/// Largest tolerated difference between the box area and the part of it
/// inside the frame, in square pixels.
const CONTAINMENT_TOLERANCE: f64 = 0.01;

/// Peak-to-sidelobe ratio of a response map. The sidelobe is everything
/// outside the `(2 * peak_del + 1)` square centered on `peak`, clipped to the
/// map. Returns 0 when the sidelobe is empty or flat.
pub fn peak_to_sidelobe_ratio(response: &Matrixd, peak: (usize, usize), peak_del: usize) -> f64 {
    let (rows, cols) = response.shape();
    let row_range = peak.0.saturating_sub(peak_del)..=(peak.0 + peak_del).min(rows - 1);
    let col_range = peak.1.saturating_sub(peak_del)..=(peak.1 + peak_del).min(cols - 1);

    let mut count = 0usize;
    let mut sum = 0.;
    let mut sum_sq = 0.;
    for c in 0..cols {
        for r in 0..rows {
            if row_range.contains(&r) && col_range.contains(&c) {
                continue;
            }
            let v = response[(r, c)];
            count += 1;
            sum += v;
            sum_sq += v * v;
        }
    }
    if count == 0 {
        return 0.;
    }
    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.);
    let std = variance.sqrt();
    if std <= f64::EPSILON {
        return 0.;
    }
    (response[peak] - mean) / std
}

/// Decides whether a tracking estimate can be trusted.
#[derive(Debug, Clone)]
pub struct FailureDetector {
    psr_threshold: f64,
    psr_peak_del: usize,
    min_area: f64,
    max_area_factor: f64,
}

impl FailureDetector {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            psr_threshold: config.psr_threshold,
            psr_peak_del: config.psr_peak_del,
            min_area: config.min_area,
            max_area_factor: config.max_area_factor,
        }
    }

    pub fn psr(&self, response: &Matrixd, peak: (usize, usize)) -> f64 {
        peak_to_sidelobe_ratio(response, peak, self.psr_peak_del)
    }

    /// Ok with the PSR when the estimate is trustworthy.
    pub fn evaluate(
        &self,
        frame: &Image,
        response: &Matrixd,
        peak: (usize, usize),
        bounding_box: &BoundingBox,
    ) -> Result<f64, LossReason> {
        let psr = self.psr(response, peak);
        if psr < self.psr_threshold {
            return Err(LossReason::LowPsr {
                psr,
                threshold: self.psr_threshold,
            });
        }
        self.check_geometry(frame, bounding_box)?;
        Ok(psr)
    }

    /// Area bounds and containment in the frame.
    pub fn check_geometry(&self, frame: &Image, bounding_box: &BoundingBox) -> Result<(), LossReason> {
        let frame_box = BoundingBox::new(0., 0., frame.width as f64, frame.height as f64);
        let area = bounding_box.area();
        let max = self.max_area_factor * frame_box.area();
        if area < self.min_area || area > max {
            return Err(LossReason::AreaOutOfRange {
                area,
                min: self.min_area,
                max,
            });
        }
        let deficit = (area - bounding_box.intersection(&frame_box).area()).abs();
        if deficit > CONTAINMENT_TOLERANCE {
            return Err(LossReason::OutsideFrame { deficit });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Checkerboard of +-1 with a peak of 5 in the middle. Outside the 3x3
    /// exclusion window the background has mean 0 and standard deviation 1.
    fn checkerboard_response() -> Matrixd {
        let mut response = Matrixd::from_fn(11, 11, |r, c| if (r + c) % 2 == 0 { 1. } else { -1. });
        response[(5, 5)] = 5.;
        response
    }

    #[test]
    fn test_psr_closed_form() {
        let response = checkerboard_response();
        let psr = peak_to_sidelobe_ratio(&response, (5, 5), 1);
        assert!((psr - 5.).abs() < 1e-12, "psr {psr}");
    }

    #[test]
    fn test_psr_gaussian_peak() {
        // unit-height Gaussian bump scaled to 5 over the checkerboard background
        let mut response = checkerboard_response();
        for r in 4..=6 {
            for c in 4..=6 {
                let d2 = ((r as f64 - 5.).powi(2) + (c as f64 - 5.).powi(2)) / 0.5;
                response[(r, c)] = 5. * (-d2).exp();
            }
        }
        let psr = peak_to_sidelobe_ratio(&response, (5, 5), 1);
        assert!((psr - 5.).abs() < 1e-12, "psr {psr}");
    }

    #[test]
    fn test_psr_degenerate() {
        let flat = Matrixd::repeat(5, 5, 2.);
        assert_eq!(peak_to_sidelobe_ratio(&flat, (2, 2), 1), 0.);
        let tiny = Matrixd::repeat(3, 3, 1.);
        assert_eq!(peak_to_sidelobe_ratio(&tiny, (1, 1), 1), 0.);
        // window clipped at the corner
        let mut corner = checkerboard_response();
        corner[(5, 5)] = 1.;
        corner[(0, 0)] = 9.;
        assert!(peak_to_sidelobe_ratio(&corner, (0, 0), 1) > 5.);
    }

    #[test]
    fn test_geometry() {
        let mut config = TrackerConfig::default();
        config.min_area = 10.;
        config.max_area_factor = 0.5;
        let detector = FailureDetector::new(&config);
        let frame = Image::gray(100, 50, vec![0; 5000]);

        assert_eq!(detector.check_geometry(&frame, &BoundingBox::new(10., 10., 20., 20.)), Ok(()));
        assert!(matches!(
            detector.check_geometry(&frame, &BoundingBox::new(10., 10., 3., 3.)),
            Err(LossReason::AreaOutOfRange { .. })
        ));
        assert!(matches!(
            detector.check_geometry(&frame, &BoundingBox::new(0., 0., 80., 40.)),
            Err(LossReason::AreaOutOfRange { .. })
        ));
        assert!(matches!(
            detector.check_geometry(&frame, &BoundingBox::new(90., 10., 20., 20.)),
            Err(LossReason::OutsideFrame { .. })
        ));
        // touching the border is still inside
        assert_eq!(detector.check_geometry(&frame, &BoundingBox::new(80., 30., 20., 20.)), Ok(()));
    }

    #[test]
    fn test_evaluate_psr_threshold() {
        let mut config = TrackerConfig::default();
        config.psr_threshold = 6.;
        let detector = FailureDetector::new(&config);
        let frame = Image::gray(100, 100, vec![0; 10000]);
        let bb = BoundingBox::new(10., 10., 20., 20.);
        let response = checkerboard_response();
        assert!(matches!(
            detector.evaluate(&frame, &response, (5, 5), &bb),
            Err(LossReason::LowPsr { .. })
        ));
        config.psr_threshold = 4.;
        let detector = FailureDetector::new(&config);
        let psr = detector.evaluate(&frame, &response, (5, 5), &bb).unwrap();
        assert!((psr - 5.).abs() < 1e-12);
    }
}
