// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f32::consts::PI;
use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::spectrum::WindowKind;

/// Hann-windowed sinc low-pass taps, normalised to unity DC gain.
///
/// `cutoff_norm` is `cutoff_hz / sample_rate` (0.0–0.5).
pub fn windowed_sinc_coeffs(cutoff_norm: f32, taps: usize) -> Vec<f32> {
    let window = WindowKind::Hann.coefficients(taps.max(1));
    let centre = (window.len() - 1) as f32 / 2.0;
    let mut coeffs: Vec<f32> = window
        .iter()
        .enumerate()
        .map(|(i, &w)| w * ideal_lowpass(cutoff_norm, i as f32 - centre))
        .collect();

    let sum: f32 = coeffs.iter().sum();
    if sum.abs() > 1e-12 {
        coeffs.iter_mut().for_each(|c| *c /= sum);
    }
    coeffs
}

/// Impulse response of the ideal low-pass at offset `x` from the centre tap.
fn ideal_lowpass(cutoff_norm: f32, x: f32) -> f32 {
    if x == 0.0 {
        2.0 * cutoff_norm
    } else {
        (2.0 * PI * cutoff_norm * x).sin() / (PI * x)
    }
}

/// Frequency response of `coeffs` for blocks of up to `block_size` samples,
/// with the forward and inverse plans sized to match.
struct Kernel {
    h_freq: Vec<Complex<f32>>,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
}

impl Kernel {
    fn plan(coeffs: &[f32], block_size: usize) -> Self {
        let fft_size = (block_size.max(1) + coeffs.len() - 1).next_power_of_two();
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);

        let mut h_freq: Vec<Complex<f32>> =
            coeffs.iter().map(|&coeff| Complex::new(coeff, 0.0)).collect();
        h_freq.resize(fft_size, Complex::new(0.0, 0.0));
        fft.process(&mut h_freq);

        Self {
            h_freq,
            fft_size,
            fft,
            ifft,
        }
    }
}

/// FFT overlap-save FIR low-pass for real blocks.
///
/// History of the last `taps - 1` inputs is carried between calls, so a
/// stream filtered in pieces matches the same stream filtered whole.
pub struct BlockFirFilter {
    coeffs: Vec<f32>,
    kernel: Kernel,
    overlap: Vec<f32>,
    scratch_freq: Vec<Complex<f32>>,
}

impl BlockFirFilter {
    pub fn new(cutoff_norm: f32, taps: usize, block_size: usize) -> Self {
        let coeffs = windowed_sinc_coeffs(cutoff_norm, taps);
        let kernel = Kernel::plan(&coeffs, block_size);
        Self {
            overlap: vec![0.0; coeffs.len() - 1],
            scratch_freq: Vec::with_capacity(kernel.fft_size),
            coeffs,
            kernel,
        }
    }

    /// Filter `buf` in place.
    pub fn filter_in_place(&mut self, buf: &mut [f32]) {
        let n_new = buf.len();
        if n_new == 0 {
            return;
        }
        let n_overlap = self.overlap.len();
        if n_new + n_overlap > self.kernel.fft_size {
            self.kernel = Kernel::plan(&self.coeffs, n_new);
        }
        let kernel = &self.kernel;

        let freq = &mut self.scratch_freq;
        freq.clear();
        freq.extend(self.overlap.iter().map(|&s| Complex::new(s, 0.0)));
        freq.extend(buf.iter().map(|&s| Complex::new(s, 0.0)));
        freq.resize(kernel.fft_size, Complex::new(0.0, 0.0));

        kernel.fft.process(freq);
        let scale = 1.0 / kernel.fft_size as f32;
        for (x, &h) in freq.iter_mut().zip(&kernel.h_freq) {
            *x = *x * h * scale;
        }
        kernel.ifft.process(freq);

        if n_overlap > 0 {
            if n_new >= n_overlap {
                self.overlap.copy_from_slice(&buf[n_new - n_overlap..]);
            } else {
                let keep_old = n_overlap - n_new;
                self.overlap.copy_within(n_new..n_overlap, 0);
                self.overlap[keep_old..].copy_from_slice(buf);
            }
        }

        for (dst, src) in buf.iter_mut().zip(&freq[n_overlap..n_overlap + n_new]) {
            *dst = src.re;
        }
    }
}
