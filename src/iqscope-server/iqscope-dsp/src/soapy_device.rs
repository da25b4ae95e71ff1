// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! SoapySDR front end.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use num_complex::Complex;
use soapysdr::{Device, Direction, ErrorCode};
use tracing::{debug, info, warn};

use iqscope_core::{GainSettings, IqFeeder, PipelineError, PipelineResult, RfDevice};

/// Read timeout for one `readStream` call, in microseconds.
const READ_TIMEOUT_US: i64 = 100_000;

/// Fallback read size when the driver does not report an MTU.
const DEFAULT_READ_LEN: usize = 16384;

const CHANNEL: usize = 0;

struct Reader {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct SoapyDevice {
    device: Device,
    args: String,
    sample_rate: u32,
    center_frequency: u64,
    reader: Option<Reader>,
}

impl SoapyDevice {
    /// Open the device matching `args` (e.g. `"driver=rtlsdr"`) and program
    /// sample rate and centre frequency.
    pub fn open(args: &str, sample_rate: u32, center_frequency: u64) -> PipelineResult<Self> {
        info!("Initializing SoapySDR device with args: {}", args);
        let device = Device::new(args).map_err(|e| {
            PipelineError::device(format!(
                "Failed to open SoapySDR device (args={}): {}",
                args, e
            ))
        })?;

        device
            .set_sample_rate(Direction::Rx, CHANNEL, f64::from(sample_rate))
            .map_err(|e| PipelineError::device(format!("Failed to set sample rate: {}", e)))?;
        let actual_rate = device
            .sample_rate(Direction::Rx, CHANNEL)
            .unwrap_or(f64::from(sample_rate));
        info!(
            "Set sample rate to {} Hz (actual: {} Hz)",
            sample_rate, actual_rate
        );

        let mut this = Self {
            device,
            args: args.to_string(),
            sample_rate: actual_rate.round() as u32,
            center_frequency,
            reader: None,
        };
        this.set_center_frequency(center_frequency)?;
        Ok(this)
    }

    /// Program a named gain stage from a 0..=15 index, scaled into the
    /// element's dB range. Stages the driver does not expose are skipped.
    fn set_stage_gain(&mut self, stage: &str, index: u8) -> PipelineResult<()> {
        let stages = self
            .device
            .list_gains(Direction::Rx, CHANNEL)
            .map_err(|e| PipelineError::device(format!("Failed to list gains: {}", e)))?;
        let Some(name) = stages
            .iter()
            .find(|name| name.to_ascii_uppercase().starts_with(stage))
        else {
            debug!("{}: no {} gain stage, ignoring index {}", self.args, stage, index);
            return Ok(());
        };
        let range = self
            .device
            .gain_element_range(Direction::Rx, CHANNEL, name.as_str())
            .map_err(|e| PipelineError::device(format!("Failed to query {} range: {}", name, e)))?;
        let fraction = f64::from(index.min(GainSettings::MAX_GAIN_INDEX))
            / f64::from(GainSettings::MAX_GAIN_INDEX);
        let db = range.minimum + (range.maximum - range.minimum) * fraction;
        self.device
            .set_gain_element(Direction::Rx, CHANNEL, name.as_str(), db)
            .map_err(|e| PipelineError::device(format!("Failed to set {} gain: {}", name, e)))?;
        info!("Set {} gain to {:.1} dB (index {})", name, db, index);
        Ok(())
    }
}

impl RfDevice for SoapyDevice {
    fn name(&self) -> &str {
        &self.args
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn center_frequency(&self) -> u64 {
        self.center_frequency
    }

    fn set_center_frequency(&mut self, hz: u64) -> PipelineResult<u64> {
        self.device
            .set_frequency(Direction::Rx, CHANNEL, hz as f64, ())
            .map_err(|e| PipelineError::device(format!("Failed to set frequency: {}", e)))?;
        let actual = self
            .device
            .frequency(Direction::Rx, CHANNEL)
            .unwrap_or(hz as f64);
        info!(
            "Set center frequency to {} Hz (actual: {} Hz)",
            hz, actual
        );
        self.center_frequency = actual.round() as u64;
        Ok(self.center_frequency)
    }

    fn set_lna_gain(&mut self, gain: u8) -> PipelineResult<()> {
        self.set_stage_gain("LNA", gain)
    }

    fn set_mixer_gain(&mut self, gain: u8) -> PipelineResult<()> {
        self.set_stage_gain("MIX", gain)
    }

    fn set_vga_gain(&mut self, gain: u8) -> PipelineResult<()> {
        self.set_stage_gain("VGA", gain)
    }

    fn set_rtl_agc(&mut self, enabled: bool) -> PipelineResult<()> {
        if let Err(e) = self
            .device
            .write_setting("digital_agc", if enabled { "true" } else { "false" })
        {
            warn!("Failed to set digital AGC: {}; continuing", e);
        }
        Ok(())
    }

    fn set_tuner_agc(&mut self, enabled: bool) -> PipelineResult<()> {
        self.device
            .set_gain_mode(Direction::Rx, CHANNEL, enabled)
            .map_err(|e| PipelineError::device(format!("Failed to set gain mode: {}", e)))
    }

    fn start(&mut self, feeder: IqFeeder) -> PipelineResult<()> {
        self.stop();
        let mut stream = self
            .device
            .rx_stream::<Complex<f32>>(&[CHANNEL])
            .map_err(|e| PipelineError::device(format!("Failed to open RX stream: {}", e)))?;
        let read_len = stream.mtu().unwrap_or(DEFAULT_READ_LEN).max(1);
        stream
            .activate(None)
            .map_err(|e| PipelineError::device(format!("Failed to activate RX stream: {}", e)))?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("iqscope-soapy-rx".to_string())
            .spawn(move || {
                let mut buf = vec![Complex::new(0.0_f32, 0.0); read_len];
                while !thread_stop.load(Ordering::Acquire) {
                    match stream.read(&mut [&mut buf[..]], READ_TIMEOUT_US) {
                        Ok(n) => {
                            if let Err(PipelineError::QueueClosed) =
                                feeder.on_samples(&buf[..n], true)
                            {
                                break;
                            }
                        }
                        Err(e) if matches!(e.code, ErrorCode::Timeout) => continue,
                        Err(e) if matches!(e.code, ErrorCode::Overflow) => {
                            debug!("SoapySDR overflow");
                            continue;
                        }
                        Err(e) => {
                            feeder.report_fault(format!("RX stream read failed: {}", e));
                            break;
                        }
                    }
                }
                if let Err(e) = stream.deactivate(None) {
                    warn!("Failed to deactivate RX stream: {}", e);
                }
            })
            .map_err(|e| PipelineError::device(format!("Failed to spawn RX thread: {}", e)))?;

        info!("SoapySDR streaming, {} samples per read", read_len);
        self.reader = Some(Reader { stop, handle });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop.store(true, Ordering::Release);
            if reader.handle.join().is_err() {
                warn!("SoapySDR RX thread panicked");
            }
        }
    }
}

impl Drop for SoapyDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
