// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Windowing, forward transform and dB power conversion, plus the shared
//! store the DSP worker publishes into and snapshot readers copy out of.
//!
//! Bins are kept in natural transform order: bin `k` covers `k·Fs/N` for
//! `k < N/2` and wraps to negative offsets above that.

use std::f32::consts::PI;
use std::sync::{Arc, Mutex, PoisonError};

use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use iqscope_core::{DisplaySettings, Iq, PipelineError, PipelineResult};

pub const MIN_FFT_SIZE: usize = 64;
pub const MAX_FFT_SIZE: usize = 65536;

/// Keeps `log10` finite for empty bins.
const POWER_EPSILON: f32 = 1e-20;

/// Reference level of the calibration constant, in dB.
const CALIBRATION_REF_DB: f64 = 24.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    #[default]
    Hamming,
    Hann,
    Blackman,
}

impl WindowKind {
    pub fn coefficients(self, len: usize) -> Vec<f32> {
        if len <= 1 {
            return vec![1.0; len];
        }
        let m = (len - 1) as f32;
        (0..len)
            .map(|i| {
                let phase = 2.0 * PI * i as f32 / m;
                match self {
                    WindowKind::Hamming => 0.54 - 0.46 * phase.cos(),
                    WindowKind::Hann => 0.5 * (1.0 - phase.cos()),
                    WindowKind::Blackman => {
                        0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
                    }
                }
            })
            .collect()
    }
}

pub fn is_supported_fft_size(len: usize) -> bool {
    len.is_power_of_two() && (MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&len)
}

pub fn apply_window(samples: &mut [Iq], window: &[f32]) -> PipelineResult<()> {
    if samples.len() != window.len() {
        return Err(PipelineError::config(format!(
            "window length {} does not match block length {}",
            window.len(),
            samples.len()
        )));
    }
    for (sample, &w) in samples.iter_mut().zip(window) {
        *sample *= w;
    }
    Ok(())
}

/// `10·log10(|X|² + ε) + offset_db` for every bin.
pub fn spectrum_power(transformed: &[Iq], out: &mut [f32], offset_db: f32) -> PipelineResult<()> {
    if out.len() < transformed.len() {
        return Err(PipelineError::config(format!(
            "power buffer holds {} bins, {} needed",
            out.len(),
            transformed.len()
        )));
    }
    for (dst, bin) in out.iter_mut().zip(transformed) {
        *dst = 10.0 * (bin.norm_sqr() + POWER_EPSILON).log10() + offset_db;
    }
    Ok(())
}

/// Calibration for the full-rate spectrum of an `fft_len`-point transform.
pub fn wideband_offset_db(fft_len: usize, user_offset_db: f32) -> f32 {
    let gain = 10.0 * (fft_len as f64 / 2.0).log10();
    (CALIBRATION_REF_DB - gain + f64::from(user_offset_db)) as f32
}

/// Calibration for the decimated spectrum. `fft_len` is the full-rate
/// transform length, `decimation` the RF decimation factor.
pub fn narrowband_offset_db(fft_len: usize, decimation: usize, user_offset_db: f32) -> f32 {
    let gain = 10.0 * (fft_len as f64 / (2.0 * decimation as f64)).log10();
    (CALIBRATION_REF_DB - gain + f64::from(user_offset_db)) as f32
}

/// Frequency offset from centre of `bin` in an `fft_len`-point transform.
pub fn bin_frequency_offset_hz(bin: usize, fft_len: usize, sample_rate: u32) -> f64 {
    let k = if bin < fft_len / 2 {
        bin as f64
    } else {
        bin as f64 - fft_len as f64
    };
    k * f64::from(sample_rate) / fft_len as f64
}

/// Index and level of the strongest bin.
pub fn peak_bin(power_db: &[f32]) -> Option<(usize, f32)> {
    power_db
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (idx, level)| match best {
            Some((_, top)) if top >= level => best,
            _ => Some((idx, level)),
        })
}

/// Fixed-length transform with its window precomputed.
pub struct SpectrumEngine {
    len: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Iq>,
}

impl SpectrumEngine {
    pub fn new(len: usize, window: WindowKind) -> PipelineResult<Self> {
        Self::with_planner(&mut FftPlanner::new(), len, window)
    }

    /// Build with a shared planner so engines of equal length reuse a plan.
    pub fn with_planner(
        planner: &mut FftPlanner<f32>,
        len: usize,
        window: WindowKind,
    ) -> PipelineResult<Self> {
        if !is_supported_fft_size(len) {
            return Err(PipelineError::config(format!(
                "transform length {} is not a power of two in {}..={}",
                len, MIN_FFT_SIZE, MAX_FFT_SIZE
            )));
        }
        let fft = planner.plan_fft_forward(len);
        let scratch = vec![Iq::default(); fft.get_inplace_scratch_len()];
        Ok(Self {
            len,
            fft,
            window: window.coefficients(len),
            scratch,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }

    pub fn forward_transform(&mut self, samples: &mut [Iq]) -> PipelineResult<()> {
        if samples.len() != self.len {
            return Err(PipelineError::config(format!(
                "transform expects {} samples, got {}",
                self.len,
                samples.len()
            )));
        }
        self.fft.process_with_scratch(samples, &mut self.scratch);
        Ok(())
    }

    /// Optional window, forward transform, then power into `out`.
    /// `block` is consumed as scratch.
    pub fn power_spectrum(
        &mut self,
        block: &mut [Iq],
        windowing: bool,
        offset_db: f32,
        out: &mut [f32],
    ) -> PipelineResult<()> {
        if windowing {
            apply_window(block, &self.window)?;
        }
        self.forward_transform(block)?;
        spectrum_power(block, out, offset_db)
    }
}

/// Copy of the published spectra, in dB.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumSnapshot {
    pub wideband: Vec<f32>,
    /// `None` until the narrow-band branch has published once.
    pub narrowband: Option<Vec<f32>>,
    /// Number of wide-band publications so far.
    pub sequence: u64,
}

struct PowerBuffers {
    wide: Vec<f32>,
    wide_len: usize,
    narrow: Vec<f32>,
    narrow_len: Option<usize>,
    sequence: u64,
}

/// Power buffers shared between the worker and snapshot readers.
///
/// Both buffers are sized for [`MAX_FFT_SIZE`] once and reused across
/// sessions. Every critical section is a bounded copy.
pub struct SpectrumStore {
    inner: Mutex<PowerBuffers>,
}

impl Default for SpectrumStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PowerBuffers {
                wide: vec![0.0; MAX_FFT_SIZE],
                wide_len: 0,
                narrow: vec![0.0; MAX_FFT_SIZE],
                narrow_len: None,
                sequence: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PowerBuffers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset for a session with an `fft_len`-point wide-band transform.
    pub fn prepare(&self, fft_len: usize) {
        let mut buffers = self.lock();
        buffers.wide_len = fft_len.min(MAX_FFT_SIZE);
        let len = buffers.wide_len;
        buffers.wide[..len].fill(0.0);
        buffers.narrow_len = None;
        buffers.sequence = 0;
    }

    pub fn publish_wideband(&self, power_db: &[f32]) -> PipelineResult<()> {
        check_len(power_db)?;
        let mut buffers = self.lock();
        buffers.wide[..power_db.len()].copy_from_slice(power_db);
        buffers.wide_len = power_db.len();
        buffers.sequence += 1;
        Ok(())
    }

    pub fn publish_narrowband(&self, power_db: &[f32]) -> PipelineResult<()> {
        check_len(power_db)?;
        let mut buffers = self.lock();
        buffers.narrow[..power_db.len()].copy_from_slice(power_db);
        buffers.narrow_len = Some(power_db.len());
        Ok(())
    }

    /// Copy into `snapshot`, reusing its allocations.
    pub fn snapshot_into(&self, snapshot: &mut SpectrumSnapshot) {
        let buffers = self.lock();
        snapshot.wideband.clear();
        snapshot
            .wideband
            .extend_from_slice(&buffers.wide[..buffers.wide_len]);
        match buffers.narrow_len {
            Some(len) => {
                let narrow = snapshot.narrowband.get_or_insert_with(Vec::new);
                narrow.clear();
                narrow.extend_from_slice(&buffers.narrow[..len]);
            }
            None => snapshot.narrowband = None,
        }
        snapshot.sequence = buffers.sequence;
    }

    pub fn snapshot(&self) -> SpectrumSnapshot {
        let mut snapshot = SpectrumSnapshot::default();
        self.snapshot_into(&mut snapshot);
        snapshot
    }
}

fn check_len(power_db: &[f32]) -> PipelineResult<()> {
    if power_db.len() > MAX_FFT_SIZE {
        return Err(PipelineError::config(format!(
            "spectrum of {} bins exceeds {}",
            power_db.len(),
            MAX_FFT_SIZE
        )));
    }
    Ok(())
}

/// Maps dB values onto display levels in `0.0..=1.0`.
///
/// `display_offset_db` is the level drawn at the top edge and
/// `display_range_db` the span down to the bottom edge. Values are
/// multiplied by `spectrum_scale` relative to the top edge first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumView {
    pub settings: DisplaySettings,
}

impl SpectrumView {
    pub fn new(settings: DisplaySettings) -> Self {
        Self { settings }
    }

    pub fn level(&self, power_db: f32) -> f32 {
        let range = self.settings.display_range_db.max(1.0);
        let relative = (power_db - self.settings.display_offset_db) * self.settings.spectrum_scale;
        ((relative + range) / range).clamp(0.0, 1.0)
    }

    pub fn render_into(&self, power_db: &[f32], levels: &mut Vec<f32>) {
        levels.clear();
        levels.extend(power_db.iter().map(|&db| self.level(db)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq_norm: f32, len: usize) -> Vec<Iq> {
        (0..len)
            .map(|n| Iq::from_polar(1.0, 2.0 * PI * freq_norm * n as f32))
            .collect()
    }

    #[test]
    fn supported_sizes() {
        assert!(is_supported_fft_size(64));
        assert!(is_supported_fft_size(16384));
        assert!(is_supported_fft_size(65536));
        assert!(!is_supported_fft_size(32));
        assert!(!is_supported_fft_size(131072));
        assert!(!is_supported_fft_size(1000));
        assert!(SpectrumEngine::new(1000, WindowKind::Hamming).is_err());
    }

    #[test]
    fn calibration_offsets_for_default_plan() {
        // 10·log10(8192) and 10·log10(1024)
        let wide = wideband_offset_db(16384, 0.0);
        let narrow = narrowband_offset_db(16384, 8, 0.0);
        assert!((wide - (24.0 - 39.133_9)).abs() < 1e-3, "wide {}", wide);
        assert!((narrow - (24.0 - 30.103)).abs() < 1e-3, "narrow {}", narrow);
        assert!((wideband_offset_db(16384, -40.0) - (wide - 40.0)).abs() < 1e-4);
    }

    #[test]
    fn tone_peaks_at_expected_bin() {
        let len = 16384;
        let sample_rate = 2_048_000.0_f32;
        let freq = 100_000.0_f32;
        let mut engine = SpectrumEngine::new(len, WindowKind::Hamming).unwrap();
        let mut block = tone(freq / sample_rate, len);
        let mut power = vec![0.0; len];
        engine
            .power_spectrum(&mut block, true, wideband_offset_db(len, 0.0), &mut power)
            .unwrap();
        let (peak, _) = peak_bin(&power).unwrap();
        let expected = (freq / sample_rate * len as f32).round() as usize;
        assert!(peak.abs_diff(expected) <= 1, "peak {} expected {}", peak, expected);
    }

    #[test]
    fn negative_offset_tone_wraps_to_upper_bins() {
        let len = 1024;
        let mut engine = SpectrumEngine::new(len, WindowKind::Hann).unwrap();
        let mut block = tone(-0.125, len);
        let mut power = vec![0.0; len];
        engine.power_spectrum(&mut block, false, 0.0, &mut power).unwrap();
        let (peak, _) = peak_bin(&power).unwrap();
        assert_eq!(peak, 896);
        assert!((bin_frequency_offset_hz(peak, len, 1_024_000) + 128_000.0).abs() < 1e-6);
    }

    #[test]
    fn windowing_reduces_leakage() {
        let len = 4096;
        // Half-bin offset maximises rectangular leakage.
        let freq_norm = 100.5 / len as f32;
        let near_bin = 104;

        for kind in [WindowKind::Hamming, WindowKind::Hann, WindowKind::Blackman] {
            let mut engine = SpectrumEngine::new(len, kind).unwrap();
            let mut rect = vec![0.0; len];
            let mut block = tone(freq_norm, len);
            engine.power_spectrum(&mut block, false, 0.0, &mut rect).unwrap();

            let mut windowed = vec![0.0; len];
            let mut block = tone(freq_norm, len);
            engine
                .power_spectrum(&mut block, true, 0.0, &mut windowed)
                .unwrap();

            let rect_rel = rect[near_bin] - rect[100];
            let win_rel = windowed[near_bin] - windowed[100];
            assert!(
                win_rel < rect_rel - 20.0,
                "{:?}: windowed {} rectangular {}",
                kind,
                win_rel,
                rect_rel
            );
        }
    }

    #[test]
    fn length_mismatches_are_configuration_errors() {
        let mut engine = SpectrumEngine::new(64, WindowKind::Blackman).unwrap();
        let mut short = vec![Iq::default(); 32];
        assert!(matches!(
            engine.forward_transform(&mut short),
            Err(PipelineError::Configuration(_))
        ));
        assert!(apply_window(&mut short, engine.window()).is_err());
        let mut out = vec![0.0; 16];
        assert!(spectrum_power(&short, &mut out, 0.0).is_err());
    }

    #[test]
    fn power_of_empty_bin_is_finite() {
        let mut out = [0.0_f32; 1];
        spectrum_power(&[Iq::default()], &mut out, 0.0).unwrap();
        assert!((out[0] + 200.0).abs() < 1e-3);
    }

    #[test]
    fn window_shapes() {
        let hamming = WindowKind::Hamming.coefficients(65);
        assert!((hamming[0] - 0.08).abs() < 1e-6);
        assert!((hamming[32] - 1.0).abs() < 1e-6);
        let blackman = WindowKind::Blackman.coefficients(65);
        assert!(blackman[0].abs() < 1e-6);
        assert_eq!(WindowKind::default(), WindowKind::Hamming);
    }

    #[test]
    fn store_reports_narrowband_only_after_publish() {
        let store = SpectrumStore::new();
        store.prepare(128);
        let snap = store.snapshot();
        assert_eq!(snap.wideband.len(), 128);
        assert!(snap.narrowband.is_none());

        store.publish_wideband(&[1.0; 128]).unwrap();
        store.publish_narrowband(&[2.0; 16]).unwrap();
        let mut snap = store.snapshot();
        assert_eq!(snap.sequence, 1);
        assert_eq!(snap.narrowband.as_deref(), Some(&[2.0_f32; 16][..]));

        store.prepare(256);
        store.snapshot_into(&mut snap);
        assert_eq!(snap.wideband.len(), 256);
        assert!(snap.narrowband.is_none());
        assert!(store.publish_wideband(&vec![0.0; MAX_FFT_SIZE + 1]).is_err());
    }

    #[test]
    fn view_maps_range_to_unit_interval() {
        let view = SpectrumView::new(DisplaySettings {
            spectrum_scale: 1.0,
            display_offset_db: -20.0,
            display_range_db: 100.0,
        });
        assert_eq!(view.level(-20.0), 1.0);
        assert_eq!(view.level(0.0), 1.0);
        assert!((view.level(-70.0) - 0.5).abs() < 1e-6);
        assert_eq!(view.level(-150.0), 0.0);
        let mut levels = Vec::new();
        view.render_into(&[-120.0, -70.0], &mut levels);
        assert_eq!(levels.len(), 2);
    }
}
