// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! The DSP worker: one thread that turns blocks from the input queue into
//! both spectra and the audio stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use rustfft::FftPlanner;
use tracing::{debug, info, warn};

use iqscope_core::{
    Iq, PipelineError, PipelineResult, PipelineStats, RateLimitedLog, SampleQueue, ScopeControls,
    WaitStatus,
};

use crate::decimator::Decimator;
use crate::demod::{Deemphasis, FmDemodulator};
use crate::filter::BlockFirFilter;
use crate::plan::PipelinePlan;
use crate::spectrum::{narrowband_offset_db, wideband_offset_db, SpectrumEngine, SpectrumStore};

/// Upper bound on how long the worker sleeps before re-checking its stop flag.
const WAIT_TIMEOUT: Duration = Duration::from_millis(50);

/// Everything one DSP cycle touches. Built at acquisition start, owned by
/// the worker thread while it runs, and handed back on join.
pub struct DspChain {
    plan: PipelinePlan,
    wide_engine: SpectrumEngine,
    narrow_engine: SpectrumEngine,
    rf_decimator: Decimator<Iq>,
    demod: FmDemodulator,
    audio_filter: BlockFirFilter,
    audio_decimator: Decimator<f32>,
    deemphasis: Option<Deemphasis>,

    block: Vec<Iq>,
    wide: Vec<Iq>,
    narrow: Vec<Iq>,
    narrow_fft: Vec<Iq>,
    audio: Vec<f32>,
    wide_power: Vec<f32>,
    narrow_power: Vec<f32>,

    output: Arc<SampleQueue<f32>>,
    store: Arc<SpectrumStore>,
    controls: Arc<ScopeControls>,
    stats: Arc<PipelineStats>,
    audio_overflow_log: RateLimitedLog,
    error_log: RateLimitedLog,
}

impl DspChain {
    pub fn new(
        plan: &PipelinePlan,
        output: Arc<SampleQueue<f32>>,
        store: Arc<SpectrumStore>,
        controls: Arc<ScopeControls>,
        stats: Arc<PipelineStats>,
    ) -> PipelineResult<Self> {
        let mut planner = FftPlanner::new();
        let wide_engine = SpectrumEngine::with_planner(&mut planner, plan.fft_len, plan.window)?;
        let narrow_engine =
            SpectrumEngine::with_planner(&mut planner, plan.narrow_len, plan.window)?;
        let rf_decimator = Decimator::new(plan.input_rate, plan.decimation)?;
        let audio_decimator = Decimator::new(plan.narrow_rate, plan.audio_decimation)?;
        let audio_filter = BlockFirFilter::new(
            plan.audio_cutoff_hz / plan.narrow_rate as f32,
            plan.audio_filter_taps,
            plan.narrow_len,
        );
        let deemphasis = Deemphasis::new(plan.audio_rate, plan.deemphasis_us);

        Ok(Self {
            plan: plan.clone(),
            wide_engine,
            narrow_engine,
            rf_decimator,
            demod: FmDemodulator::new(),
            audio_filter,
            audio_decimator,
            deemphasis,
            block: vec![Iq::default(); plan.fft_len],
            wide: vec![Iq::default(); plan.fft_len],
            narrow: vec![Iq::default(); plan.narrow_len],
            narrow_fft: vec![Iq::default(); plan.narrow_len],
            audio: vec![0.0; plan.narrow_len],
            wide_power: vec![0.0; plan.fft_len],
            narrow_power: vec![0.0; plan.narrow_len],
            output,
            store,
            controls,
            stats,
            audio_overflow_log: RateLimitedLog::new("output sample queue overflow"),
            error_log: RateLimitedLog::new("DSP cycle failed"),
        })
    }

    pub fn plan(&self) -> &PipelinePlan {
        &self.plan
    }

    /// Run one cycle on `block`, which must be exactly one transform long.
    pub fn process_block(&mut self, block: &[Iq]) -> PipelineResult<()> {
        if block.len() != self.plan.fft_len {
            return Err(PipelineError::config(format!(
                "DSP cycle expects {} samples, got {}",
                self.plan.fft_len,
                block.len()
            )));
        }
        self.block.copy_from_slice(block);
        self.run_cycle()
    }

    fn run_cycle(&mut self) -> PipelineResult<()> {
        let windowing = self.controls.windowing();
        let user_offset = self.controls.fft_offset_db();

        // Wide-band branch works on a copy; `block` stays raw for decimation.
        self.wide.copy_from_slice(&self.block);
        self.wide_engine.power_spectrum(
            &mut self.wide,
            windowing,
            wideband_offset_db(self.plan.fft_len, user_offset),
            &mut self.wide_power,
        )?;
        self.store.publish_wideband(&self.wide_power)?;

        let narrow_len = self
            .rf_decimator
            .process_into(&self.block, &mut self.narrow)?;
        let narrow = &self.narrow[..narrow_len];

        self.demod.demodulate(narrow, &mut self.audio)?;
        let audio = &mut self.audio[..narrow_len];
        self.audio_filter.filter_in_place(audio);
        let audio_len = self.audio_decimator.process_in_place(audio);
        let audio = &mut audio[..audio_len];
        if let Some(deemphasis) = self.deemphasis.as_mut() {
            deemphasis.process_in_place(audio);
        }
        let accepted = self.output.write(audio);
        self.stats.record_audio_written(accepted);
        if accepted < audio_len && self.output.is_open() {
            let dropped = audio_len - accepted;
            self.stats.record_audio_drop(dropped);
            self.audio_overflow_log.log(
                &PipelineError::QueueFull {
                    offered: audio_len,
                    dropped,
                }
                .to_string(),
            );
        }

        let narrow_fft = &mut self.narrow_fft[..narrow_len];
        narrow_fft.copy_from_slice(narrow);
        self.narrow_engine.power_spectrum(
            narrow_fft,
            false,
            narrowband_offset_db(self.plan.fft_len, self.plan.decimation, user_offset),
            &mut self.narrow_power[..narrow_len],
        )?;
        self.store
            .publish_narrowband(&self.narrow_power[..narrow_len])?;

        self.stats.record_cycle();
        Ok(())
    }

    /// Worker thread body. Returns the chain once stopped or the input
    /// queue closes.
    fn run(mut self, input: Arc<SampleQueue<Iq>>, stop: Arc<AtomicBool>) -> Self {
        let block_len = self.plan.fft_len;
        debug!("DSP worker started ({} samples per cycle)", block_len);
        loop {
            if stop.load(Ordering::Acquire) {
                break;
            }
            match input.wait_for(block_len, WAIT_TIMEOUT) {
                WaitStatus::Ready => {}
                WaitStatus::TimedOut => continue,
                WaitStatus::Closed => break,
            }
            if stop.load(Ordering::Acquire) {
                break;
            }
            let read = input.read_into(&mut self.block);
            if read != block_len {
                // Only possible when the queue closed between wait and read.
                debug!("DSP worker discarded a partial block of {} samples", read);
                continue;
            }
            if let Err(e) = self.run_cycle() {
                self.error_log.log(&e.to_string());
            }
        }
        debug!("DSP worker exiting");
        self
    }
}

/// Handle to a running DSP worker thread.
pub struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<DspChain>,
}

impl Worker {
    pub fn spawn(chain: DspChain, input: Arc<SampleQueue<Iq>>) -> PipelineResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("iqscope-dsp".to_string())
            .spawn(move || chain.run(input, thread_stop))
            .map_err(|e| PipelineError::Worker(format!("failed to spawn DSP worker: {}", e)))?;
        Ok(Self { stop, handle })
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop and wait for the thread, returning the chain it owned.
    pub fn join(self) -> PipelineResult<DspChain> {
        self.request_stop();
        match self.handle.join() {
            Ok(chain) => {
                info!("DSP worker stopped");
                Ok(chain)
            }
            Err(_) => {
                warn!("DSP worker panicked");
                Err(PipelineError::Worker("DSP worker panicked".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PipelineConfig;
    use crate::spectrum::peak_bin;
    use crate::synthetic::{SignalGenerator, SyntheticSignal};
    use std::time::Instant;

    struct Fixture {
        chain: DspChain,
        output: Arc<SampleQueue<f32>>,
        store: Arc<SpectrumStore>,
        controls: Arc<ScopeControls>,
        stats: Arc<PipelineStats>,
    }

    fn fixture(config: PipelineConfig, rate: u32, output_capacity: Option<usize>) -> Fixture {
        let plan = PipelinePlan::derive(&config, rate).unwrap();
        let output = Arc::new(SampleQueue::new(
            output_capacity.unwrap_or(plan.output_capacity),
        ));
        output.open();
        let store = Arc::new(SpectrumStore::new());
        store.prepare(plan.fft_len);
        let controls = Arc::new(ScopeControls::default());
        let stats = Arc::new(PipelineStats::default());
        let chain = DspChain::new(
            &plan,
            output.clone(),
            store.clone(),
            controls.clone(),
            stats.clone(),
        )
        .unwrap();
        Fixture {
            chain,
            output,
            store,
            controls,
            stats,
        }
    }

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            fft_bins: 4096,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn cycle_publishes_both_spectra_and_audio() {
        let mut fx = fixture(small_config(), 2_048_000, None);
        let mut generator = SignalGenerator::new(SyntheticSignal {
            sample_rate: 2_048_000,
            carrier_offset_hz: 200_000.0,
            deviation_hz: 0.0,
            ..SyntheticSignal::default()
        });
        let mut block = vec![Iq::default(); 4096];
        for _ in 0..4 {
            generator.fill(&mut block, 0.0);
            fx.chain.process_block(&block).unwrap();
        }

        let snap = fx.store.snapshot();
        assert_eq!(snap.sequence, 4);
        assert_eq!(snap.wideband.len(), 4096);
        assert_eq!(snap.narrowband.as_ref().map(Vec::len), Some(512));
        let (peak, _) = peak_bin(&snap.wideband).unwrap();
        // 200 kHz / 2.048 MHz * 4096
        assert!(peak.abs_diff(400) <= 1, "wide peak {}", peak);

        assert_eq!(fx.output.available(), 4 * 64);
        assert_eq!(fx.stats.snapshot().cycles, 4);
        assert_eq!(fx.stats.snapshot().audio_written, 256);
    }

    #[test]
    fn demodulated_tone_has_expected_polarity_and_level() {
        // Centred carrier, 1 kHz tone at 25 kHz deviation.
        let mut fx = fixture(small_config(), 2_048_000, None);
        let mut generator = SignalGenerator::new(SyntheticSignal {
            sample_rate: 2_048_000,
            carrier_offset_hz: 0.0,
            deviation_hz: 25_000.0,
            tone_hz: 1_000.0,
            ..SyntheticSignal::default()
        });
        let mut block = vec![Iq::default(); 4096];
        for _ in 0..16 {
            generator.fill(&mut block, 0.0);
            fx.chain.process_block(&block).unwrap();
        }
        let audio = fx.output.read(fx.output.available());
        let settled = &audio[audio.len() / 2..];
        let peak = settled.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        // 25 kHz deviation at 256 kS/s: 2·25e3/256e3
        assert!((peak - 0.195).abs() < 0.03, "peak {}", peak);
    }

    #[test]
    fn full_output_queue_drops_and_counts() {
        let mut fx = fixture(small_config(), 2_048_000, Some(100));
        let block = vec![Iq::new(1.0, 0.0); 4096];
        fx.chain.process_block(&block).unwrap();
        fx.chain.process_block(&block).unwrap();
        let stats = fx.stats.snapshot();
        assert_eq!(fx.output.available(), 100);
        assert_eq!(stats.audio_written, 100);
        assert_eq!(stats.audio_dropped, 28);
    }

    #[test]
    fn user_offset_shifts_both_spectra() {
        let mut fx = fixture(small_config(), 2_048_000, None);
        let block = vec![Iq::new(0.5, 0.0); 4096];
        fx.controls.set_fft_offset_db(0.0);
        // First cycle primes the decimator history.
        fx.chain.process_block(&block).unwrap();
        fx.chain.process_block(&block).unwrap();
        let before = fx.store.snapshot();
        fx.controls.set_fft_offset_db(-10.0);
        fx.chain.process_block(&block).unwrap();
        let after = fx.store.snapshot();
        assert!((before.wideband[0] - after.wideband[0] - 10.0).abs() < 1e-2);
        let nb_before = before.narrowband.unwrap();
        let nb_after = after.narrowband.unwrap();
        assert!((nb_before[0] - nb_after[0] - 10.0).abs() < 0.1);
    }

    #[test]
    fn wrong_block_length_is_rejected() {
        let mut fx = fixture(small_config(), 2_048_000, None);
        assert!(fx.chain.process_block(&[Iq::default(); 100]).is_err());
    }

    #[test]
    fn worker_exits_on_close_and_returns_chain() {
        let fx = fixture(small_config(), 2_048_000, None);
        let input = Arc::new(SampleQueue::new(16384));
        input.open();
        let worker = Worker::spawn(fx.chain, input.clone()).unwrap();
        input.write(&vec![Iq::new(1.0, 0.0); 8192]);

        let deadline = Instant::now() + Duration::from_secs(5);
        while fx.stats.snapshot().cycles < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(fx.stats.snapshot().cycles, 2);

        input.close();
        let deadline = Instant::now() + Duration::from_secs(1);
        while !worker.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(worker.is_finished());
        let chain = worker.join().unwrap();
        assert_eq!(chain.plan().fft_len, 4096);
    }

    #[test]
    fn worker_honours_stop_flag_while_idle() {
        let fx = fixture(small_config(), 2_048_000, None);
        let input = Arc::new(SampleQueue::new(16384));
        input.open();
        let worker = Worker::spawn(fx.chain, input).unwrap();
        let start = Instant::now();
        worker.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
