use serde::{Deserialize, Serialize};

use crate::my_types::*;

/// Axis aligned box in pixel coordinates, `(x, y)` is the top-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_center(center: Vector2d, width: f64, height: f64) -> Self {
        Self {
            x: center.x - width / 2.,
            y: center.y - height / 2.,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn center(&self) -> Vector2d {
        Vector2d::new(self.x + self.width / 2., self.y + self.height / 2.)
    }

    /// Zero width or height, or non-finite coordinates.
    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0. && self.height > 0.)
            || !self.x.is_finite()
            || !self.y.is_finite()
            || !self.width.is_finite()
            || !self.height.is_finite()
    }

    /// Overlapping region, empty boxes have zero size.
    pub fn intersection(&self, other: &BoundingBox) -> BoundingBox {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        if x1 <= x0 || y1 <= y0 {
            return BoundingBox::new(x0, y0, 0., 0.);
        }
        BoundingBox::new(x0, y0, x1 - x0, y1 - y0)
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(v: [f64; 4]) -> Self {
        BoundingBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection() {
        let a = BoundingBox::new(0., 0., 10., 10.);
        let b = BoundingBox::new(5., -5., 10., 10.);
        assert_eq!(a.intersection(&b), BoundingBox::new(5., 0., 5., 5.));
        let c = BoundingBox::new(20., 20., 1., 1.);
        assert_eq!(a.intersection(&c).area(), 0.);
    }

    #[test]
    fn test_center_roundtrip() {
        let b = BoundingBox::new(3., 4., 10., 6.);
        assert_eq!(b.center(), Vector2d::new(8., 7.));
        assert_eq!(BoundingBox::from_center(b.center(), 10., 6.), b);
        assert!(BoundingBox::new(0., 0., 0., 5.).is_degenerate());
        assert!(BoundingBox::new(f64::NAN, 0., 1., 5.).is_degenerate());
    }
}
