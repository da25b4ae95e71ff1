// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! RF front-end abstraction and the producer side of the input queue.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::controls::PipelineStats;
use crate::diag::RateLimitedLog;
use crate::error::{PipelineError, PipelineResult};
use crate::queue::SampleQueue;
use crate::Iq;

/// A tunable RF front end that delivers I/Q blocks asynchronously.
///
/// Implementations push samples from their own thread or driver callback
/// through the [`IqFeeder`] handed to [`RfDevice::start`]. They must not do
/// any DSP work on that path.
pub trait RfDevice: Send {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Current I/Q sample rate (Hz).
    fn sample_rate(&self) -> u32;

    fn center_frequency(&self) -> u64;

    /// Tune to `hz`. Returns the frequency the hardware actually settled on.
    fn set_center_frequency(&mut self, hz: u64) -> PipelineResult<u64>;

    fn set_lna_gain(&mut self, gain: u8) -> PipelineResult<()>;

    fn set_mixer_gain(&mut self, gain: u8) -> PipelineResult<()>;

    fn set_vga_gain(&mut self, gain: u8) -> PipelineResult<()>;

    /// Demodulator-side (RTL2832) automatic gain control.
    fn set_rtl_agc(&mut self, enabled: bool) -> PipelineResult<()>;

    /// Tuner-side automatic gain control.
    fn set_tuner_agc(&mut self, enabled: bool) -> PipelineResult<()>;

    /// Begin streaming into `feeder`.
    fn start(&mut self, feeder: IqFeeder) -> PipelineResult<()>;

    /// Stop streaming. Must return only once no further samples will be
    /// pushed.
    fn stop(&mut self);
}

/// Front-end gain programming applied when acquisition starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainSettings {
    pub lna: u8,
    pub mixer: u8,
    pub vga: u8,
    pub rtl_agc: bool,
    pub tuner_agc: bool,
}

impl Default for GainSettings {
    fn default() -> Self {
        Self {
            lna: 7,
            mixer: 3,
            vga: 3,
            rtl_agc: false,
            tuner_agc: false,
        }
    }
}

impl GainSettings {
    /// Largest gain index accepted for any stage.
    pub const MAX_GAIN_INDEX: u8 = 15;

    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [("lna", self.lna), ("mixer", self.mixer), ("vga", self.vga)] {
            if value > Self::MAX_GAIN_INDEX {
                return Err(format!(
                    "[device.gain].{} must be in range 0..={}",
                    name,
                    Self::MAX_GAIN_INDEX
                ));
            }
        }
        Ok(())
    }

    pub fn apply(&self, device: &mut dyn RfDevice) -> PipelineResult<()> {
        device.set_rtl_agc(self.rtl_agc)?;
        device.set_tuner_agc(self.tuner_agc)?;
        device.set_vga_gain(self.vga)?;
        device.set_lna_gain(self.lna)?;
        device.set_mixer_gain(self.mixer)?;
        Ok(())
    }
}

/// First fatal error reported by a device during a session.
#[derive(Debug, Default)]
pub struct DeviceFaultSlot {
    fault: Mutex<Option<String>>,
}

impl DeviceFaultSlot {
    /// Record `message` unless an earlier fault is already stored.
    pub fn set(&self, message: String) {
        let mut fault = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if fault.is_none() {
            *fault = Some(message);
        }
    }

    pub fn get(&self) -> Option<PipelineError> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .map(PipelineError::DeviceFault)
    }
}

/// Producer handle for the input queue, given to the device on start.
///
/// `on_samples` is the whole of the device callback contract: a bounded,
/// non-blocking write. Anything that does not fit is dropped, counted and
/// logged.
#[derive(Clone)]
pub struct IqFeeder {
    queue: Arc<SampleQueue<Iq>>,
    stats: Arc<PipelineStats>,
    fault: Arc<DeviceFaultSlot>,
    overflow_log: Arc<RateLimitedLog>,
}

impl IqFeeder {
    pub fn new(
        queue: Arc<SampleQueue<Iq>>,
        stats: Arc<PipelineStats>,
        fault: Arc<DeviceFaultSlot>,
    ) -> Self {
        Self {
            queue,
            stats,
            fault,
            overflow_log: Arc::new(RateLimitedLog::new("input sample queue overflow")),
        }
    }

    /// Deliver one block from the device. Real-valued blocks are ignored.
    pub fn on_samples(&self, block: &[Iq], is_complex: bool) -> PipelineResult<()> {
        if !is_complex || block.is_empty() {
            return Ok(());
        }
        let accepted = self.queue.write(block);
        if accepted == block.len() {
            return Ok(());
        }
        if !self.queue.is_open() {
            return Err(PipelineError::QueueClosed);
        }
        let dropped = block.len() - accepted;
        self.stats.record_input_drop(dropped);
        let err = PipelineError::QueueFull {
            offered: block.len(),
            dropped,
        };
        self.overflow_log.log(&err.to_string());
        Err(err)
    }

    /// Report an unrecoverable device error. Closes the input queue so the
    /// DSP worker winds down; the session surfaces the fault on stop.
    pub fn report_fault(&self, message: impl Into<String>) {
        let message = message.into();
        error!("device fault: {}", message);
        self.fault.set(message);
        self.queue.close();
    }

    pub fn is_closed(&self) -> bool {
        !self.queue.is_open()
    }
}
