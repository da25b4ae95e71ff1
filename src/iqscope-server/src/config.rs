// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for iqscope.
//!
//! Config is loaded from the `[iqscope]` section of `iqscope.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./iqscope.toml`
//! 3. `~/.config/iqscope/iqscope.toml`
//! 4. `/etc/iqscope/iqscope.toml`

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use iqscope_app::{parse_level, ConfigFile};
use iqscope_core::{DisplaySettings, GainSettings};
use iqscope_dsp::{PipelineConfig, SyntheticSignal, WindowKind};

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    pub general: GeneralConfig,
    /// RF front end
    pub device: DeviceConfig,
    /// Spectrum and demodulation chain
    pub dsp: PipelineConfig,
    /// Audio output
    pub audio: AudioConfig,
    /// Snapshot cadence and display mapping
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Built-in FM signal generator
    #[default]
    Synthetic,
    /// SoapySDR device (requires the `soapysdr` feature)
    Soapysdr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub source: SourceKind,
    /// SoapySDR device arguments (e.g. "driver=rtlsdr")
    pub args: Option<String>,
    pub center_frequency_hz: u64,
    pub sample_rate: u32,
    pub gain: GainSettings,
    /// Signal produced by the synthetic source
    pub synthetic: SyntheticConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Synthetic,
            args: None,
            center_frequency_hz: 106_300_000,
            sample_rate: 2_048_000,
            gain: GainSettings::default(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Carrier position relative to the centre frequency
    pub carrier_offset_hz: f64,
    pub deviation_hz: f64,
    pub tone_hz: f64,
    pub amplitude: f32,
    /// Samples per delivered block
    pub block_len: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        let signal = SyntheticSignal::default();
        Self {
            carrier_offset_hz: signal.carrier_offset_hz,
            deviation_hz: signal.deviation_hz,
            tone_hz: signal.tone_hz,
            amplitude: signal.amplitude,
            block_len: 16384,
        }
    }
}

impl DeviceConfig {
    pub fn synthetic_signal(&self) -> SyntheticSignal {
        SyntheticSignal {
            sample_rate: self.sample_rate,
            center_frequency: self.center_frequency_hz,
            carrier_offset_hz: self.synthetic.carrier_offset_hz,
            deviation_hz: self.synthetic.deviation_hz,
            tone_hz: self.synthetic.tone_hz,
            amplitude: self.synthetic.amplitude,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Play audio; when false the output queue is drained silently
    pub enabled: bool,
    /// Output device index (system default when unset)
    pub device_index: Option<usize>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device_index: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Snapshot interval in milliseconds
    pub refresh_ms: u64,
    /// Emit a JSON report line every this many snapshots
    pub report_every: u32,
    /// Print JSON report lines on stdout
    pub json: bool,
    pub spectrum_scale: f32,
    pub display_offset_db: f32,
    pub display_range_db: f32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        let settings = DisplaySettings::default();
        Self {
            refresh_ms: 100,
            report_every: 10,
            json: false,
            spectrum_scale: settings.spectrum_scale,
            display_offset_db: settings.display_offset_db,
            display_range_db: settings.display_range_db,
        }
    }
}

impl DisplayConfig {
    pub fn settings(&self) -> DisplaySettings {
        DisplaySettings {
            spectrum_scale: self.spectrum_scale,
            display_offset_db: self.display_offset_db,
            display_range_db: self.display_range_db,
        }
    }
}

impl ScopeConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.device.center_frequency_hz == 0 {
            return Err("[device].center_frequency_hz must be > 0".to_string());
        }
        if self.device.sample_rate == 0 {
            return Err("[device].sample_rate must be > 0".to_string());
        }
        if self.device.source == SourceKind::Soapysdr
            && self.device.args.as_deref().unwrap_or("").trim().is_empty()
        {
            return Err(
                "[device].args must be set for the soapysdr source ([device].source='soapysdr')"
                    .to_string(),
            );
        }
        if self.device.synthetic.block_len == 0 {
            return Err("[device.synthetic].block_len must be > 0".to_string());
        }
        self.device.gain.validate()?;
        self.dsp.validate()?;

        if self.display.refresh_ms == 0 {
            return Err("[display].refresh_ms must be > 0".to_string());
        }
        if self.display.report_every == 0 {
            return Err("[display].report_every must be > 0".to_string());
        }
        if self.display.display_range_db <= 0.0 {
            return Err("[display].display_range_db must be > 0".to_string());
        }
        Ok(())
    }

    /// Example configuration wrapped under the `[iqscope]` section header.
    pub fn example_toml() -> String {
        #[derive(Serialize)]
        struct Wrapper {
            iqscope: ScopeConfig,
        }
        let example = ScopeConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            device: DeviceConfig {
                args: Some("driver=rtlsdr".to_string()),
                ..DeviceConfig::default()
            },
            dsp: PipelineConfig {
                windowing: true,
                window: WindowKind::Hamming,
                ..PipelineConfig::default()
            },
            audio: AudioConfig::default(),
            display: DisplayConfig::default(),
        };
        toml::to_string_pretty(&Wrapper { iqscope: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    match level {
        Some(level) if parse_level(level).is_none() => Err(format!(
            "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
            level
        )),
        _ => Ok(()),
    }
}

impl ConfigFile for ScopeConfig {
    fn section_key() -> &'static str {
        "iqscope"
    }
}
