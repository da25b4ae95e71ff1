// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Software RF front end producing an FM-modulated carrier.
//!
//! The carrier sits at a fixed absolute frequency (`center + offset` at
//! construction); retuning moves the device, so the carrier moves within the
//! captured band the way a real station would.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use iqscope_core::{GainSettings, Iq, IqFeeder, PipelineError, PipelineResult, RfDevice};

/// Parameters of the generated signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticSignal {
    pub sample_rate: u32,
    pub center_frequency: u64,
    /// Carrier position relative to the initial centre frequency.
    pub carrier_offset_hz: f64,
    /// Peak FM deviation. Zero gives a plain carrier.
    pub deviation_hz: f64,
    /// Modulating audio tone.
    pub tone_hz: f64,
    pub amplitude: f32,
}

impl Default for SyntheticSignal {
    fn default() -> Self {
        Self {
            sample_rate: 2_048_000,
            center_frequency: 106_300_000,
            carrier_offset_hz: 150_000.0,
            deviation_hz: 75_000.0,
            tone_hz: 1_000.0,
            amplitude: 0.5,
        }
    }
}

/// Phase-continuous FM signal generator.
pub struct SignalGenerator {
    signal: SyntheticSignal,
    carrier_phase: f64,
    tone_phase: f64,
}

impl SignalGenerator {
    pub fn new(signal: SyntheticSignal) -> Self {
        Self {
            signal,
            carrier_phase: 0.0,
            tone_phase: 0.0,
        }
    }

    /// Fill `block`, shifting the carrier by an extra `retune_hz` (the
    /// distance the device has been tuned away from its initial centre).
    pub fn fill(&mut self, block: &mut [Iq], retune_hz: f64) {
        let rate = f64::from(self.signal.sample_rate.max(1));
        let offset = self.signal.carrier_offset_hz - retune_hz;
        let tone_step = TAU * self.signal.tone_hz / rate;
        for sample in block {
            let inst_freq = offset + self.signal.deviation_hz * self.tone_phase.sin();
            *sample = Iq::from_polar(self.signal.amplitude, self.carrier_phase as f32);
            self.carrier_phase = (self.carrier_phase + TAU * inst_freq / rate).rem_euclid(TAU);
            self.tone_phase = (self.tone_phase + tone_step).rem_euclid(TAU);
        }
    }
}

/// Front-end settings last programmed into a [`SyntheticDevice`].
///
/// Clones share state, so the settings stay readable after the device has
/// been handed to a session.
#[derive(Debug, Clone, Default)]
pub struct ProgrammedGains(Arc<Mutex<GainSettings>>);

impl ProgrammedGains {
    pub fn get(&self) -> GainSettings {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut GainSettings)) {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

struct Running {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// [`RfDevice`] backed by [`SignalGenerator`], paced at the sample rate.
pub struct SyntheticDevice {
    signal: SyntheticSignal,
    block_len: usize,
    center: Arc<AtomicU64>,
    fail_after_blocks: Option<u64>,
    gains: ProgrammedGains,
    running: Option<Running>,
}

impl SyntheticDevice {
    pub fn new(signal: SyntheticSignal, block_len: usize) -> Self {
        let center = Arc::new(AtomicU64::new(signal.center_frequency));
        Self {
            signal,
            block_len: block_len.max(1),
            center,
            fail_after_blocks: None,
            gains: ProgrammedGains::default(),
            running: None,
        }
    }

    /// Report a device fault after `blocks` blocks have been delivered.
    pub fn fail_after(mut self, blocks: u64) -> Self {
        self.fail_after_blocks = Some(blocks);
        self
    }

    pub fn programmed_gains(&self) -> ProgrammedGains {
        self.gains.clone()
    }
}

impl RfDevice for SyntheticDevice {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn sample_rate(&self) -> u32 {
        self.signal.sample_rate
    }

    fn center_frequency(&self) -> u64 {
        self.center.load(Ordering::Relaxed)
    }

    fn set_center_frequency(&mut self, hz: u64) -> PipelineResult<u64> {
        if hz == 0 {
            return Err(PipelineError::device("cannot tune to 0 Hz"));
        }
        self.center.store(hz, Ordering::Relaxed);
        Ok(hz)
    }

    fn set_lna_gain(&mut self, gain: u8) -> PipelineResult<()> {
        self.gains.update(|g| g.lna = gain);
        Ok(())
    }

    fn set_mixer_gain(&mut self, gain: u8) -> PipelineResult<()> {
        self.gains.update(|g| g.mixer = gain);
        Ok(())
    }

    fn set_vga_gain(&mut self, gain: u8) -> PipelineResult<()> {
        self.gains.update(|g| g.vga = gain);
        Ok(())
    }

    fn set_rtl_agc(&mut self, enabled: bool) -> PipelineResult<()> {
        debug!("synthetic: rtl agc {}", enabled);
        self.gains.update(|g| g.rtl_agc = enabled);
        Ok(())
    }

    fn set_tuner_agc(&mut self, enabled: bool) -> PipelineResult<()> {
        debug!("synthetic: tuner agc {}", enabled);
        self.gains.update(|g| g.tuner_agc = enabled);
        Ok(())
    }

    fn start(&mut self, feeder: IqFeeder) -> PipelineResult<()> {
        self.stop();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let center = self.center.clone();
        let initial_center = self.signal.center_frequency;
        let mut generator = SignalGenerator::new(self.signal.clone());
        let block_len = self.block_len;
        let fail_after = self.fail_after_blocks;
        let period = Duration::from_secs_f64(
            block_len as f64 / f64::from(self.signal.sample_rate.max(1)),
        );

        let handle = std::thread::Builder::new()
            .name("iqscope-synthetic".to_string())
            .spawn(move || {
                let mut block = vec![Iq::default(); block_len];
                let mut next = Instant::now();
                let mut delivered: u64 = 0;
                while !thread_stop.load(Ordering::Acquire) {
                    if fail_after.is_some_and(|limit| delivered >= limit) {
                        feeder.report_fault("synthetic fault injected");
                        break;
                    }
                    let retune = center.load(Ordering::Relaxed) as f64 - initial_center as f64;
                    generator.fill(&mut block, retune);
                    if let Err(PipelineError::QueueClosed) = feeder.on_samples(&block, true) {
                        break;
                    }
                    delivered += 1;
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
            })
            .map_err(|e| PipelineError::device(format!("failed to spawn generator: {}", e)))?;

        info!(
            "synthetic device streaming at {} Hz, centre {} Hz",
            self.signal.sample_rate,
            self.center_frequency()
        );
        self.running = Some(Running { stop, handle });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop.store(true, Ordering::Release);
            if running.handle.join().is_err() {
                warn!("synthetic generator thread panicked");
            }
        }
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
