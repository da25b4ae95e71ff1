// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f32::consts::{FRAC_1_PI, FRAC_PI_2, FRAC_PI_4, PI};

use iqscope_core::{Iq, PipelineError, PipelineResult};

/// Polynomial `atan2`, accurate to about 0.004 rad.
///
/// The angle is folded into the first octant, approximated there and
/// unfolded by the signs and ordering of `|x|` and `|y|`.
#[inline]
fn fast_atan2(y: f32, x: f32) -> f32 {
    let (ax, ay) = (x.abs(), y.abs());
    let hi = ax.max(ay);
    if hi == 0.0 {
        return 0.0;
    }
    let z = ax.min(ay) / hi;
    let mut angle = z * (FRAC_PI_4 + 0.273 * (1.0 - z));
    if ay > ax {
        angle = FRAC_PI_2 - angle;
    }
    if x < 0.0 {
        angle = PI - angle;
    }
    if y < 0.0 {
        -angle
    } else {
        angle
    }
}

/// Quadrature FM discriminator.
///
/// Output is instantaneous frequency in radians/sample scaled by `1/π`, so a
/// carrier offset of `f` (normalised to the sample rate) demodulates to `2f`.
/// The last input sample is remembered so consecutive blocks join without a
/// glitch; the very first sample after construction or [`reset`](Self::reset)
/// demodulates to zero.
#[derive(Debug, Default)]
pub struct FmDemodulator {
    prev: Option<Iq>,
}

impl FmDemodulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }

    /// Demodulate `input` into `out[..input.len()]`.
    pub fn demodulate(&mut self, input: &[Iq], out: &mut [f32]) -> PipelineResult<usize> {
        if out.len() < input.len() {
            return Err(PipelineError::config(format!(
                "demodulator output holds {} samples, {} needed",
                out.len(),
                input.len()
            )));
        }
        let mut prev = self.prev;
        for (dst, &sample) in out.iter_mut().zip(input) {
            *dst = match prev {
                Some(p) => {
                    let product = sample * p.conj();
                    fast_atan2(product.im, product.re) * FRAC_1_PI
                }
                None => 0.0,
            };
            prev = Some(sample);
        }
        self.prev = prev;
        Ok(input.len())
    }
}

/// Single-pole FM de-emphasis low-pass.
#[derive(Debug, Clone)]
pub struct Deemphasis {
    alpha: f32,
    y: f32,
}

impl Deemphasis {
    /// `None` when `tau_us` is 0 (de-emphasis disabled).
    pub fn new(sample_rate: u32, tau_us: u32) -> Option<Self> {
        if tau_us == 0 {
            return None;
        }
        let sr = sample_rate.max(1) as f32;
        let tau = tau_us as f32 * 1e-6;
        let alpha = 1.0 - (-1.0 / (sr * tau)).exp();
        Some(Self { alpha, y: 0.0 })
    }

    pub fn process_in_place(&mut self, buf: &mut [f32]) {
        for sample in buf {
            self.y += self.alpha * (*sample - self.y);
            *sample = self.y;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn complex_tone(freq_norm: f32, len: usize) -> Vec<Iq> {
        (0..len)
            .map(|n| Iq::from_polar(1.0, TAU * freq_norm * n as f32))
            .collect()
    }

    fn assert_approx_eq(a: f32, b: f32, tol: f32, label: &str) {
        assert!(
            (a - b).abs() <= tol,
            "{}: expected {} ≈ {} (tol {})",
            label,
            a,
            b,
            tol
        );
    }

    #[test]
    fn tone_offset_maps_to_constant_output() {
        let input = complex_tone(0.25, 16);
        let mut out = vec![0.0; 16];
        let mut demod = FmDemodulator::new();
        assert_eq!(demod.demodulate(&input, &mut out).unwrap(), 16);
        assert_approx_eq(out[0], 0.0, 1e-6, "first sample");
        for (idx, &sample) in out.iter().enumerate().skip(1) {
            assert_approx_eq(sample, 0.5, 0.01, &format!("sample {idx}"));
        }
    }

    #[test]
    fn negative_offset_is_negative() {
        let input = complex_tone(-0.1, 32);
        let mut out = vec![0.0; 32];
        FmDemodulator::new().demodulate(&input, &mut out).unwrap();
        for &sample in &out[1..] {
            assert_approx_eq(sample, -0.2, 0.01, "negative tone");
        }
    }

    #[test]
    fn history_spans_blocks() {
        let input = complex_tone(0.05, 64);
        let mut demod = FmDemodulator::new();
        let mut first = vec![0.0; 32];
        let mut second = vec![0.0; 32];
        demod.demodulate(&input[..32], &mut first).unwrap();
        demod.demodulate(&input[32..], &mut second).unwrap();
        assert_approx_eq(second[0], 0.1, 0.01, "block boundary");

        demod.reset();
        demod.demodulate(&input[..32], &mut first).unwrap();
        assert_eq!(first[0], 0.0);
    }

    #[test]
    fn unmodulated_carrier_is_silent() {
        let input = vec![Iq::new(0.7, 0.0); 8];
        let mut out = vec![1.0; 8];
        FmDemodulator::new().demodulate(&input, &mut out).unwrap();
        assert!(out.iter().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn short_output_is_rejected() {
        let mut out = vec![0.0; 2];
        assert!(FmDemodulator::new()
            .demodulate(&complex_tone(0.1, 4), &mut out)
            .is_err());
    }

    #[test]
    fn atan2_tracks_std() {
        for step in 0..64 {
            let angle = -PI + 0.01 + step as f32 * (TAU - 0.02) / 63.0;
            let (y, x) = angle.sin_cos();
            assert_approx_eq(fast_atan2(y, x), angle, 0.005, "atan2");
        }
        assert_eq!(fast_atan2(0.0, 0.0), 0.0);
        assert_eq!(fast_atan2(2.0, 0.0), FRAC_PI_2);
        assert_eq!(fast_atan2(-2.0, 0.0), -FRAC_PI_2);
        assert_eq!(fast_atan2(0.0, -1.0), PI);
    }

    #[test]
    fn deemphasis_settles_to_dc_and_can_be_disabled() {
        assert!(Deemphasis::new(32_000, 0).is_none());
        let mut de = Deemphasis::new(32_000, 50).unwrap();
        let mut buf = vec![1.0; 256];
        de.process_in_place(&mut buf);
        assert!(buf[0] < 1.0);
        assert_approx_eq(buf[255], 1.0, 1e-3, "dc");
    }
}
