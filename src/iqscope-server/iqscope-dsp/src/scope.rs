// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Acquisition lifecycle: a long-lived [`Scope`] that owns the spectrum
//! store and live controls, and the per-start [`Session`] that owns the
//! queues, the worker, the device and the audio sink.

use std::sync::Arc;

use tracing::{info, warn};

use iqscope_core::{
    AudioRenderer, AudioSink, DeviceFaultSlot, DisplaySettings, GainSettings, Iq, IqFeeder,
    PipelineError, PipelineResult, PipelineStats, RfDevice, SampleQueue, ScopeControls,
    StatsSnapshot,
};

use crate::plan::{PipelineConfig, PipelinePlan};
use crate::spectrum::{SpectrumSnapshot, SpectrumStore};
use crate::worker::{DspChain, Worker};

pub struct Scope {
    config: PipelineConfig,
    controls: Arc<ScopeControls>,
    store: Arc<SpectrumStore>,
}

impl Scope {
    pub fn new(config: PipelineConfig, display: DisplaySettings) -> PipelineResult<Self> {
        config.validate().map_err(PipelineError::Configuration)?;
        let controls = Arc::new(ScopeControls::new(
            config.windowing,
            config.fft_offset_db,
            display,
        ));
        Ok(Self {
            config,
            controls,
            store: Arc::new(SpectrumStore::new()),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn controls(&self) -> Arc<ScopeControls> {
        self.controls.clone()
    }

    pub fn store(&self) -> Arc<SpectrumStore> {
        self.store.clone()
    }

    pub fn snapshot(&self) -> SpectrumSnapshot {
        self.store.snapshot()
    }

    /// Start acquisition on `device`, playing audio through `sink`.
    ///
    /// Every size is fixed here from the device's current sample rate; a
    /// configuration that does not fit it fails before any thread starts.
    pub fn start(
        &self,
        device: Box<dyn RfDevice>,
        sink: Box<dyn AudioSink>,
        audio_device: Option<usize>,
        gains: GainSettings,
    ) -> PipelineResult<Session> {
        gains.validate().map_err(PipelineError::Configuration)?;
        let plan = PipelinePlan::derive(&self.config, device.sample_rate())?;

        let input = Arc::new(SampleQueue::<Iq>::new(plan.input_capacity));
        let output = Arc::new(SampleQueue::<f32>::new(plan.output_capacity));
        let stats = Arc::new(PipelineStats::default());
        let fault = Arc::new(DeviceFaultSlot::default());
        self.store.prepare(plan.fft_len);

        let chain = DspChain::new(
            &plan,
            output.clone(),
            self.store.clone(),
            self.controls.clone(),
            stats.clone(),
        )?;
        input.open();
        output.open();
        let worker = Worker::spawn(chain, input.clone())?;

        // From here on, dropping the session runs the full stop sequence.
        let mut session = Session {
            plan,
            device,
            sink,
            input,
            output,
            worker: Some(worker),
            stats,
            fault,
            stopped: false,
        };

        let renderer = AudioRenderer::new(
            session.output.clone(),
            session.plan.audio_gain,
            session.stats.clone(),
        );
        session.sink.open(
            audio_device,
            session.plan.audio_rate,
            session.plan.buffer_ms,
            renderer,
        )?;
        gains.apply(session.device.as_mut())?;
        let feeder = IqFeeder::new(
            session.input.clone(),
            session.stats.clone(),
            session.fault.clone(),
        );
        session.device.start(feeder)?;

        info!(
            "acquisition started on {}: {} Hz in, {}-point FFT, narrow {} Hz, audio {} Hz",
            session.device.name(),
            session.plan.input_rate,
            session.plan.fft_len,
            session.plan.narrow_rate,
            session.plan.audio_rate
        );
        Ok(session)
    }
}

/// One running acquisition.
pub struct Session {
    plan: PipelinePlan,
    device: Box<dyn RfDevice>,
    sink: Box<dyn AudioSink>,
    input: Arc<SampleQueue<Iq>>,
    output: Arc<SampleQueue<f32>>,
    worker: Option<Worker>,
    stats: Arc<PipelineStats>,
    fault: Arc<DeviceFaultSlot>,
    stopped: bool,
}

impl Session {
    pub fn plan(&self) -> &PipelinePlan {
        &self.plan
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The device fault that ended streaming, if any.
    pub fn fault(&self) -> Option<PipelineError> {
        self.fault.get()
    }

    /// Whether the worker is still consuming samples.
    pub fn is_running(&self) -> bool {
        self.input.is_open()
            && self
                .worker
                .as_ref()
                .is_some_and(|worker| !worker.is_finished())
    }

    pub fn center_frequency(&self) -> u64 {
        self.device.center_frequency()
    }

    pub fn set_center_frequency(&mut self, hz: u64) -> PipelineResult<u64> {
        let actual = self.device.set_center_frequency(hz)?;
        info!("tuned to {} Hz (requested {} Hz)", actual, hz);
        Ok(actual)
    }

    pub fn set_lna_gain(&mut self, gain: u8) -> PipelineResult<()> {
        check_gain("lna", gain)?;
        self.device.set_lna_gain(gain)
    }

    pub fn set_mixer_gain(&mut self, gain: u8) -> PipelineResult<()> {
        check_gain("mixer", gain)?;
        self.device.set_mixer_gain(gain)
    }

    pub fn set_vga_gain(&mut self, gain: u8) -> PipelineResult<()> {
        check_gain("vga", gain)?;
        self.device.set_vga_gain(gain)
    }

    pub fn set_rtl_agc(&mut self, enabled: bool) -> PipelineResult<()> {
        self.device.set_rtl_agc(enabled)
    }

    pub fn set_tuner_agc(&mut self, enabled: bool) -> PipelineResult<()> {
        self.device.set_tuner_agc(enabled)
    }

    /// Stop acquisition. Returns the session counters, or the device fault
    /// that ended the session early.
    pub fn stop(mut self) -> PipelineResult<StatsSnapshot> {
        self.shutdown()?;
        match self.fault.get() {
            Some(fault) => Err(fault),
            None => Ok(self.stats.snapshot()),
        }
    }

    fn shutdown(&mut self) -> PipelineResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        self.input.close();
        self.output.close();
        if let Some(worker) = self.worker.as_ref() {
            worker.request_stop();
        }
        self.device.stop();
        self.sink.close();
        // The worker's buffers and filter state are released only here,
        // after the thread has exited.
        let joined = match self.worker.take() {
            Some(worker) => worker.join().map(drop),
            None => Ok(()),
        };

        let stats = self.stats.snapshot();
        info!(
            "acquisition stopped: {} cycles, {} input samples dropped, {} audio samples dropped, {} underruns",
            stats.cycles, stats.input_dropped, stats.audio_dropped, stats.audio_underruns
        );
        joined
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("session shutdown: {}", e);
        }
    }
}

fn check_gain(stage: &str, gain: u8) -> PipelineResult<()> {
    if gain > GainSettings::MAX_GAIN_INDEX {
        return Err(PipelineError::config(format!(
            "{} gain {} exceeds {}",
            stage,
            gain,
            GainSettings::MAX_GAIN_INDEX
        )));
    }
    Ok(())
}
