// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Pull-side audio contract: the renderer the platform callback invokes,
//! and the sink abstraction that owns that callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::controls::PipelineStats;
use crate::error::{PipelineError, PipelineResult};
use crate::queue::SampleQueue;

/// Output channels produced by [`AudioRenderer::render`]. Mono audio is
/// duplicated into both.
pub const OUTPUT_CHANNELS: usize = 2;

/// Real-time render path over the output sample queue.
///
/// `render` never blocks, never allocates and never panics: if a full
/// buffer's worth of samples is not immediately available the whole buffer
/// is silence.
pub struct AudioRenderer {
    queue: Arc<SampleQueue<f32>>,
    gain: f32,
    stats: Arc<PipelineStats>,
}

impl AudioRenderer {
    pub fn new(queue: Arc<SampleQueue<f32>>, gain: f32, stats: Arc<PipelineStats>) -> Self {
        Self { queue, gain, stats }
    }

    /// Fill an interleaved stereo buffer. Returns the number of frames that
    /// carried audio (zero when silence was substituted).
    pub fn render(&mut self, out: &mut [f32]) -> usize {
        let frames = out.len() / OUTPUT_CHANNELS;
        if frames == 0 {
            out.fill(0.0);
            return 0;
        }

        // Pull mono samples into the front of the buffer, then spread them
        // back to front so no unread sample is overwritten.
        if self.queue.try_read_exact(&mut out[..frames]).is_err() {
            out.fill(0.0);
            self.stats.record_underrun();
            return 0;
        }
        for i in (0..frames).rev() {
            let sample = (out[i] * self.gain).clamp(-1.0, 1.0);
            out[i * OUTPUT_CHANNELS] = sample;
            out[i * OUTPUT_CHANNELS + 1] = sample;
        }
        out[frames * OUTPUT_CHANNELS..].fill(0.0);
        self.stats.record_rendered(frames);
        frames
    }
}

/// Platform audio output that pulls through an [`AudioRenderer`].
pub trait AudioSink: Send {
    /// Open output device `device_index` (system default when `None`) at
    /// `sample_rate` with roughly `buffer_ms` of buffering, and start pulling.
    fn open(
        &mut self,
        device_index: Option<usize>,
        sample_rate: u32,
        buffer_ms: u32,
        renderer: AudioRenderer,
    ) -> PipelineResult<()>;

    /// Stop pulling and release the device. Idempotent.
    fn close(&mut self);
}

/// Sink that pulls and discards audio at the nominal cadence. Used when no
/// audio device is wanted so the output queue still drains.
#[derive(Default)]
pub struct DrainAudioSink {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AudioSink for DrainAudioSink {
    fn open(
        &mut self,
        _device_index: Option<usize>,
        sample_rate: u32,
        buffer_ms: u32,
        mut renderer: AudioRenderer,
    ) -> PipelineResult<()> {
        self.close();
        let frames = (sample_rate as usize * buffer_ms as usize / 1000).max(1);
        let period = Duration::from_millis(u64::from(buffer_ms.max(1)));
        let stop = Arc::new(AtomicBool::new(false));
        self.stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("iqscope-audio-drain".to_string())
            .spawn(move || {
                let mut buf = vec![0.0_f32; frames * OUTPUT_CHANNELS];
                while !stop.load(Ordering::Acquire) {
                    renderer.render(&mut buf);
                    std::thread::sleep(period);
                }
            })
            .map_err(|e| PipelineError::AudioSink(e.to_string()))?;
        debug!("audio drain sink pulling {} frames every {:?}", frames, period);
        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("audio drain thread panicked");
            }
        }
    }
}

impl Drop for DrainAudioSink {
    fn drop(&mut self) {
        self.close();
    }
}
