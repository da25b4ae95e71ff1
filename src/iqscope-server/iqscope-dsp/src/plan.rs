// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::{Deserialize, Serialize};

use iqscope_core::{PipelineError, PipelineResult};

use crate::spectrum::{is_supported_fft_size, WindowKind, MAX_FFT_SIZE, MIN_FFT_SIZE};

/// Fraction of the audio Nyquist rate the audio low-pass may reach.
const AUDIO_CUTOFF_LIMIT: f32 = 0.95;

/// DSP settings (`[iqscope.dsp]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Wide-band transform length N; also the block size of one DSP cycle.
    pub fft_bins: usize,
    /// RF decimation factor D.
    pub decimation_factor: usize,
    /// Audio decimation factor D₂.
    pub audio_decimation_factor: usize,
    /// Queue and audio buffering, in milliseconds.
    pub audio_buffer_ms: u32,
    /// User offset added to both spectrum calibrations, in dB.
    pub fft_offset_db: f32,
    /// Apply `window` to the wide-band block before the transform.
    pub windowing: bool,
    pub window: WindowKind,
    /// Audio low-pass cutoff. Clamped below the audio Nyquist rate.
    pub audio_cutoff_hz: f32,
    pub audio_filter_taps: usize,
    /// Linear gain applied by the audio renderer.
    pub audio_gain: f32,
    /// FM de-emphasis time constant: 0 (off), 50 or 75 µs.
    pub deemphasis_us: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fft_bins: 16384,
            decimation_factor: 8,
            audio_decimation_factor: 8,
            audio_buffer_ms: 100,
            fft_offset_db: -40.0,
            windowing: false,
            window: WindowKind::Hamming,
            audio_cutoff_hz: 15_000.0,
            audio_filter_taps: 127,
            audio_gain: 1.0,
            deemphasis_us: 0,
        }
    }
}

impl PipelineConfig {
    /// Rate-independent checks.
    pub fn validate(&self) -> Result<(), String> {
        if !is_supported_fft_size(self.fft_bins) {
            return Err(format!(
                "[iqscope.dsp].fft_bins must be a power of two in {}..={}",
                MIN_FFT_SIZE, MAX_FFT_SIZE
            ));
        }
        if self.decimation_factor == 0 {
            return Err("[iqscope.dsp].decimation_factor must be >= 1".to_string());
        }
        if self.audio_decimation_factor == 0 {
            return Err("[iqscope.dsp].audio_decimation_factor must be >= 1".to_string());
        }
        if self.decimation_factor > self.fft_bins || self.audio_decimation_factor > self.fft_bins {
            return Err(format!(
                "[iqscope.dsp].decimation_factor and audio_decimation_factor must not exceed fft_bins ({})",
                self.fft_bins
            ));
        }
        let total = self
            .decimation_factor
            .checked_mul(self.audio_decimation_factor)
            .ok_or_else(|| {
                "[iqscope.dsp].decimation_factor * audio_decimation_factor overflows".to_string()
            })?;
        if self.fft_bins % total != 0 {
            return Err(format!(
                "[iqscope.dsp].fft_bins ({}) must be divisible by decimation_factor * audio_decimation_factor ({})",
                self.fft_bins, total
            ));
        }
        if !is_supported_fft_size(self.fft_bins / self.decimation_factor) {
            return Err(format!(
                "[iqscope.dsp].fft_bins / decimation_factor must be at least {}",
                MIN_FFT_SIZE
            ));
        }
        if self.audio_buffer_ms == 0 {
            return Err("[iqscope.dsp].audio_buffer_ms must be > 0".to_string());
        }
        if !self.fft_offset_db.is_finite() {
            return Err("[iqscope.dsp].fft_offset_db must be finite".to_string());
        }
        if !(self.audio_cutoff_hz.is_finite() && self.audio_cutoff_hz > 0.0) {
            return Err("[iqscope.dsp].audio_cutoff_hz must be > 0".to_string());
        }
        if self.audio_filter_taps == 0 || self.audio_filter_taps > 4096 {
            return Err("[iqscope.dsp].audio_filter_taps must be in range 1..=4096".to_string());
        }
        if !(self.audio_gain.is_finite() && self.audio_gain >= 0.0) {
            return Err("[iqscope.dsp].audio_gain must be a finite value >= 0".to_string());
        }
        if !matches!(self.deemphasis_us, 0 | 50 | 75) {
            return Err("[iqscope.dsp].deemphasis_us must be 0, 50 or 75".to_string());
        }
        Ok(())
    }
}

/// Sizes and rates for one acquisition session, fixed at start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelinePlan {
    pub fft_len: usize,
    pub decimation: usize,
    pub audio_decimation: usize,
    pub input_rate: u32,
    /// Rate after RF decimation (narrow-band spectrum and demodulator).
    pub narrow_rate: u32,
    pub audio_rate: u32,
    /// Samples per narrow-band block, `fft_len / decimation`.
    pub narrow_len: usize,
    /// Audio samples produced per cycle.
    pub audio_block_len: usize,
    pub input_capacity: usize,
    pub output_capacity: usize,
    /// Frames per audio device buffer.
    pub audio_frames: usize,
    pub buffer_ms: u32,
    pub window: WindowKind,
    pub audio_cutoff_hz: f32,
    pub audio_filter_taps: usize,
    pub audio_gain: f32,
    pub deemphasis_us: u32,
}

impl PipelinePlan {
    /// Resolve `config` against the device sample rate.
    pub fn derive(config: &PipelineConfig, input_rate: u32) -> PipelineResult<Self> {
        config.validate().map_err(PipelineError::Configuration)?;

        let decimation = config.decimation_factor;
        let audio_decimation = config.audio_decimation_factor;
        let total = (decimation * audio_decimation) as u32;
        if input_rate == 0 || input_rate % total != 0 {
            return Err(PipelineError::config(format!(
                "sample rate {} Hz is not a non-zero multiple of the total decimation {}",
                input_rate, total
            )));
        }
        let narrow_rate = input_rate / decimation as u32;
        let audio_rate = narrow_rate / audio_decimation as u32;

        let buffer_ms = u64::from(config.audio_buffer_ms);
        let input_capacity = (buffer_ms * u64::from(input_rate) / 1000) as usize;
        if input_capacity < config.fft_bins {
            return Err(PipelineError::config(format!(
                "input queue of {} samples ({} ms at {} Hz) cannot hold one {}-point block",
                input_capacity, buffer_ms, input_rate, config.fft_bins
            )));
        }
        let audio_frames = (buffer_ms * u64::from(audio_rate) / 1000) as usize;
        if audio_frames == 0 {
            return Err(PipelineError::config(format!(
                "{} ms of audio at {} Hz is less than one frame",
                buffer_ms, audio_rate
            )));
        }

        let cutoff_limit = 0.5 * audio_rate as f32 * AUDIO_CUTOFF_LIMIT;
        Ok(Self {
            fft_len: config.fft_bins,
            decimation,
            audio_decimation,
            input_rate,
            narrow_rate,
            audio_rate,
            narrow_len: config.fft_bins / decimation,
            audio_block_len: config.fft_bins / (decimation * audio_decimation),
            input_capacity,
            output_capacity: 16 * audio_frames,
            audio_frames,
            buffer_ms: config.audio_buffer_ms,
            window: config.window,
            audio_cutoff_hz: config.audio_cutoff_hz.min(cutoff_limit),
            audio_filter_taps: config.audio_filter_taps,
            audio_gain: config.audio_gain,
            deemphasis_us: config.deemphasis_us,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_plan_at_2048k() {
        let plan = PipelinePlan::derive(&PipelineConfig::default(), 2_048_000).unwrap();
        assert_eq!(plan.narrow_rate, 256_000);
        assert_eq!(plan.audio_rate, 32_000);
        assert_eq!(plan.narrow_len, 2048);
        assert_eq!(plan.audio_block_len, 256);
        assert_eq!(plan.input_capacity, 204_800);
        assert_eq!(plan.audio_frames, 3200);
        assert_eq!(plan.output_capacity, 51_200);
        assert_eq!(plan.audio_cutoff_hz, 15_000.0);
    }

    #[test]
    fn cutoff_is_clamped_below_audio_nyquist() {
        let config = PipelineConfig {
            audio_cutoff_hz: 22_050.0,
            ..PipelineConfig::default()
        };
        let plan = PipelinePlan::derive(&config, 2_048_000).unwrap();
        assert!(plan.audio_cutoff_hz < 16_000.0);
    }

    #[test]
    fn short_buffer_is_a_configuration_error() {
        let config = PipelineConfig {
            audio_buffer_ms: 5,
            ..PipelineConfig::default()
        };
        // 5 ms at 2.048 MS/s is 10240 samples, under one 16384 block.
        assert!(matches!(
            PipelinePlan::derive(&config, 2_048_000),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn rate_must_divide_by_total_decimation() {
        assert!(PipelinePlan::derive(&PipelineConfig::default(), 2_000_001).is_err());
        assert!(PipelinePlan::derive(&PipelineConfig::default(), 0).is_err());
    }

    #[test]
    fn static_validation() {
        assert!(PipelineConfig::default().validate().is_ok());
        for bad in [
            PipelineConfig {
                fft_bins: 10_000,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                fft_bins: 128,
                decimation_factor: 4,
                audio_decimation_factor: 64,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                decimation_factor: 0,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                audio_buffer_ms: 0,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                deemphasis_us: 60,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                decimation_factor: 32_768,
                ..PipelineConfig::default()
            },
        ] {
            assert!(bad.validate().is_err(), "{:?}", bad);
        }

        // Factors whose product overflows usize are a configuration error.
        let huge: PipelineConfig = toml::from_str(
            "decimation_factor = 4294967296\naudio_decimation_factor = 4294967296\n",
        )
        .unwrap();
        assert!(huge.validate().is_err());
        assert!(matches!(
            PipelinePlan::derive(&huge, 2_048_000),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg: PipelineConfig =
            toml::from_str("fft_bins = 4096\nwindow = \"blackman\"\nwindowing = true\n").unwrap();
        assert_eq!(cfg.fft_bins, 4096);
        assert_eq!(cfg.window, WindowKind::Blackman);
        assert!(cfg.windowing);
        assert_eq!(cfg.decimation_factor, 8);
    }
}
