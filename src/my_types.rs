use nalgebra as na;
use rustfft::num_complex::Complex;

pub type Vector2d = na::Vector2<f64>;

pub type Matrixd = na::DMatrix<f64>;

pub type Complexd = Complex<f64>;
pub type ComplexMatrixd = na::DMatrix<Complexd>;
