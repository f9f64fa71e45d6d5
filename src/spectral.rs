//! Frequency-domain transforms and spectrum arithmetic.
//!
//! Two storage layouts share one interface: the Hermitian half spectrum of a
//! real signal (`Packed`) and the full complex spectrum (`Full`). Every
//! element-wise operation here keeps the Hermitian symmetry of real-signal
//! spectra, so filters can be written once against `SpectralOps` and produce
//! the same responses in either layout.

use std::sync::Arc;

use num_traits::Zero;
use rustfft::{Fft, FftPlanner};

use crate::config::SpectrumLayout;
use crate::my_types::*;

#[derive(Clone, Debug, PartialEq)]
pub struct Spectrum {
    pub data: ComplexMatrixd,
    /// Number of columns of the spatial signal.
    pub width: usize,
}

impl Spectrum {
    pub fn zeros(rows: usize, stored_cols: usize, width: usize) -> Self {
        Self {
            data: ComplexMatrixd::zeros(rows, stored_cols),
            width,
        }
    }

    pub fn zeros_like(other: &Spectrum) -> Self {
        Self::zeros(other.data.nrows(), other.data.ncols(), other.width)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.shape()
    }

    pub fn add_assign(&mut self, other: &Spectrum) {
        debug_assert_eq!(self.shape(), other.shape());
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += *b;
        }
    }

    /// Blend towards `other`: `self = (1 - rate) * self + rate * other`.
    pub fn ema(&mut self, other: &Spectrum, rate: f64) {
        debug_assert_eq!(self.shape(), other.shape());
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a = *a * (1. - rate) + *b * rate;
        }
    }

    /// `self / (denominator + lambda)`, element-wise.
    pub fn divide_regularized(&self, denominator: &Spectrum, lambda: f64) -> Spectrum {
        debug_assert_eq!(self.shape(), denominator.shape());
        Spectrum {
            data: self
                .data
                .zip_map(&denominator.data, |n, d| n / (d + Complexd::new(lambda, 0.))),
            width: self.width,
        }
    }

    /// Collapse row-wise spectra into a single row by summing them.
    pub fn sum_rows(&self) -> Spectrum {
        let cols = self.data.ncols();
        let mut total = Spectrum::zeros(1, cols, self.width);
        for c in 0..cols {
            total.data[(0, c)] = self.data.column(c).iter().sum();
        }
        total
    }

    /// Element-wise sum of equally shaped spectra.
    pub fn sum(spectra: &[Spectrum]) -> Option<Spectrum> {
        let (first, rest) = spectra.split_first()?;
        let mut total = first.clone();
        for s in rest {
            total.add_assign(s);
        }
        Some(total)
    }
}

/// `conj(a) * b` when `conjugate_a`, otherwise `a * b`, element-wise.
pub fn multiply_spectra(a: &Spectrum, b: &Spectrum, conjugate_a: bool) -> Spectrum {
    debug_assert_eq!(a.shape(), b.shape());
    let data = if conjugate_a {
        a.data.zip_map(&b.data, |x, y| x.conj() * y)
    } else {
        a.data.zip_map(&b.data, |x, y| x * y)
    };
    Spectrum {
        data,
        width: a.width,
    }
}

/// Forward and inverse transforms in one fixed layout.
///
/// `forward`/`inverse` are 2D transforms over the whole matrix,
/// `forward_rows`/`inverse_rows` transform every row independently.
/// Inverse transforms are scaled so that `inverse(forward(x)) == x`.
pub trait SpectralOps: Send {
    fn layout(&self) -> SpectrumLayout;

    fn forward(&mut self, signal: &Matrixd) -> Spectrum;

    fn inverse(&mut self, spectrum: &Spectrum) -> Matrixd;

    fn forward_rows(&mut self, signal: &Matrixd) -> Spectrum;

    fn inverse_rows(&mut self, spectrum: &Spectrum) -> Matrixd;

    fn multiply(&self, a: &Spectrum, b: &Spectrum, conjugate_a: bool) -> Spectrum {
        multiply_spectra(a, b, conjugate_a)
    }
}

pub fn spectral_ops(layout: SpectrumLayout) -> Box<dyn SpectralOps> {
    match layout {
        SpectrumLayout::Packed => Box::new(PackedSpectralOps::default()),
        SpectrumLayout::Full => Box::new(FullSpectralOps::default()),
    }
}

/// Shared planner, it caches the plans it hands out.
struct FftBank {
    planner: FftPlanner<f64>,
    line: Vec<Complexd>,
}

impl Default for FftBank {
    fn default() -> Self {
        Self {
            planner: FftPlanner::new(),
            line: vec![],
        }
    }
}

impl FftBank {
    fn plan(&mut self, len: usize, inverse: bool) -> Arc<dyn Fft<f64>> {
        if inverse {
            self.planner.plan_fft_inverse(len)
        } else {
            self.planner.plan_fft_forward(len)
        }
    }

    /// Transform every column in place.
    fn columns(&mut self, data: &mut ComplexMatrixd, inverse: bool) {
        let rows = data.nrows();
        if rows <= 1 || data.ncols() == 0 {
            return;
        }
        // column-major storage, so each column is one contiguous chunk
        self.plan(rows, inverse).process(data.as_mut_slice());
    }

    /// Transform every row in place.
    fn rows(&mut self, data: &mut ComplexMatrixd, inverse: bool) {
        let cols = data.ncols();
        if cols <= 1 {
            return;
        }
        let fft = self.plan(cols, inverse);
        self.line.resize(cols, Complexd::zero());
        for r in 0..data.nrows() {
            for c in 0..cols {
                self.line[c] = data[(r, c)];
            }
            fft.process(&mut self.line);
            for c in 0..cols {
                data[(r, c)] = self.line[c];
            }
        }
    }
}

fn to_complex(signal: &Matrixd) -> ComplexMatrixd {
    signal.map(|v| Complexd::new(v, 0.))
}

fn real_part(data: &ComplexMatrixd, scale: f64) -> Matrixd {
    data.map(|v| v.re * scale)
}

/// Rebuild full rows from Hermitian half rows, `X[k] = conj(X[width - k])`.
fn unpack_rows(half: &ComplexMatrixd, width: usize) -> ComplexMatrixd {
    let stored = half.ncols();
    ComplexMatrixd::from_fn(half.nrows(), width, |r, c| {
        if c < stored {
            half[(r, c)]
        } else {
            half[(r, width - c)].conj()
        }
    })
}

#[derive(Default)]
pub struct FullSpectralOps {
    bank: FftBank,
}

impl SpectralOps for FullSpectralOps {
    fn layout(&self) -> SpectrumLayout {
        SpectrumLayout::Full
    }

    fn forward(&mut self, signal: &Matrixd) -> Spectrum {
        let mut data = to_complex(signal);
        self.bank.rows(&mut data, false);
        self.bank.columns(&mut data, false);
        Spectrum {
            data,
            width: signal.ncols(),
        }
    }

    fn inverse(&mut self, spectrum: &Spectrum) -> Matrixd {
        let mut data = spectrum.data.clone();
        self.bank.columns(&mut data, true);
        self.bank.rows(&mut data, true);
        real_part(&data, 1. / data.len().max(1) as f64)
    }

    fn forward_rows(&mut self, signal: &Matrixd) -> Spectrum {
        let mut data = to_complex(signal);
        self.bank.rows(&mut data, false);
        Spectrum {
            data,
            width: signal.ncols(),
        }
    }

    fn inverse_rows(&mut self, spectrum: &Spectrum) -> Matrixd {
        let mut data = spectrum.data.clone();
        self.bank.rows(&mut data, true);
        real_part(&data, 1. / spectrum.width.max(1) as f64)
    }
}

#[derive(Default)]
pub struct PackedSpectralOps {
    bank: FftBank,
}

impl PackedSpectralOps {
    fn forward_half_rows(&mut self, signal: &Matrixd) -> Spectrum {
        let width = signal.ncols();
        let mut data = to_complex(signal);
        self.bank.rows(&mut data, false);
        let stored = width / 2 + 1;
        Spectrum {
            data: data.columns(0, stored.min(width)).into_owned(),
            width,
        }
    }
}

impl SpectralOps for PackedSpectralOps {
    fn layout(&self) -> SpectrumLayout {
        SpectrumLayout::Packed
    }

    fn forward(&mut self, signal: &Matrixd) -> Spectrum {
        let mut spectrum = self.forward_half_rows(signal);
        self.bank.columns(&mut spectrum.data, false);
        spectrum
    }

    fn inverse(&mut self, spectrum: &Spectrum) -> Matrixd {
        let mut half = spectrum.data.clone();
        self.bank.columns(&mut half, true);
        let mut full = unpack_rows(&half, spectrum.width);
        self.bank.rows(&mut full, true);
        real_part(&full, 1. / full.len().max(1) as f64)
    }

    fn forward_rows(&mut self, signal: &Matrixd) -> Spectrum {
        self.forward_half_rows(signal)
    }

    fn inverse_rows(&mut self, spectrum: &Spectrum) -> Matrixd {
        let mut full = unpack_rows(&spectrum.data, spectrum.width);
        self.bank.rows(&mut full, true);
        real_part(&full, 1. / spectrum.width.max(1) as f64)
    }
}
