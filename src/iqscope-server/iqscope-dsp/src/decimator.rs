// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Integer-factor decimation with a windowed-sinc anti-alias FIR.

use std::ops::{Add, Mul};

use iqscope_core::{PipelineError, PipelineResult};

use crate::filter::windowed_sinc_coeffs;

/// Sample types the decimator can filter: real `f32` and complex I/Q.
pub trait DecimatorSample: Copy + Default + Add<Output = Self> + Mul<f32, Output = Self> {}

impl<T> DecimatorSample for T where T: Copy + Default + Add<Output = T> + Mul<f32, Output = T> {}

/// Anti-alias cutoff as a fraction of the input rate, scaled by `1/D`.
const CUTOFF_FRACTION: f32 = 0.4;

/// Taps per unit of decimation factor.
const TAPS_PER_FACTOR: usize = 16;

/// Streaming decimator. The FIR is evaluated only at output instants; filter
/// history and output phase carry over between calls so block boundaries
/// are invisible in the output.
pub struct Decimator<T: DecimatorSample> {
    factor: usize,
    input_rate: u32,
    coeffs: Vec<f32>,
    /// Last `taps - 1` inputs, oldest first.
    history: Vec<T>,
    /// Inputs left to consume before the next output; 0 emits on the next one.
    countdown: usize,
    work: Vec<T>,
}

impl<T: DecimatorSample> Decimator<T> {
    pub fn new(input_rate: u32, factor: usize) -> PipelineResult<Self> {
        if factor == 0 {
            return Err(PipelineError::config("decimation factor must be at least 1"));
        }
        if input_rate == 0 {
            return Err(PipelineError::config("decimator input rate must be non-zero"));
        }
        let coeffs = if factor == 1 {
            vec![1.0]
        } else {
            windowed_sinc_coeffs(
                CUTOFF_FRACTION / factor as f32,
                TAPS_PER_FACTOR * factor + 1,
            )
        };
        let history = vec![T::default(); coeffs.len() - 1];
        Ok(Self {
            factor,
            input_rate,
            coeffs,
            history,
            countdown: 0,
            work: Vec::new(),
        })
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.input_rate / self.factor as u32
    }

    pub fn taps(&self) -> usize {
        self.coeffs.len()
    }

    /// Number of outputs the next `input_len` inputs will produce.
    pub fn output_len(&self, input_len: usize) -> usize {
        if input_len > self.countdown {
            (input_len - self.countdown - 1) / self.factor + 1
        } else {
            0
        }
    }

    /// Decimate `input` into the front of `out`, returning the output count.
    ///
    /// `out` must hold at least [`output_len`](Self::output_len) samples.
    pub fn process_into(&mut self, input: &[T], out: &mut [T]) -> PipelineResult<usize> {
        let needed = self.output_len(input.len());
        if out.len() < needed {
            return Err(PipelineError::config(format!(
                "decimator output holds {} samples, {} needed",
                out.len(),
                needed
            )));
        }
        self.work.clear();
        self.work.extend_from_slice(&self.history);
        self.work.extend_from_slice(input);
        Ok(self.run(input.len(), out))
    }

    /// Decimate `buf` in place; the outputs occupy `buf[..returned]`.
    pub fn process_in_place(&mut self, buf: &mut [T]) -> usize {
        self.work.clear();
        self.work.extend_from_slice(&self.history);
        self.work.extend_from_slice(buf);
        self.run(buf.len(), buf)
    }

    /// Filter over `self.work` (history followed by `n_new` fresh inputs).
    fn run(&mut self, n_new: usize, out: &mut [T]) -> usize {
        let n_hist = self.history.len();
        let mut written = 0;
        for i in 0..n_new {
            if self.countdown > 0 {
                self.countdown -= 1;
                continue;
            }
            // Newest sample sits at work[i + n_hist].
            let window = &self.work[i..=i + n_hist];
            let mut acc = T::default();
            for (&sample, &coeff) in window.iter().rev().zip(&self.coeffs) {
                acc = acc + sample * coeff;
            }
            out[written] = acc;
            written += 1;
            self.countdown = self.factor - 1;
        }
        if n_hist > 0 {
            let tail = self.work.len() - n_hist;
            self.history.copy_from_slice(&self.work[tail..]);
        }
        written
    }
}
