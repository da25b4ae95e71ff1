// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! cpal-backed audio output.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{info, warn};

use iqscope_core::{
    AudioRenderer, AudioSink, PipelineError, PipelineResult, RateLimitedLog, OUTPUT_CHANNELS,
};

/// Output sink driving an [`AudioRenderer`] from the platform audio callback.
///
/// cpal streams are not `Send` on every host, so the stream is built, played
/// and dropped on a dedicated thread that parks until `close`.
#[derive(Default)]
pub struct CpalAudioSink {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl AudioSink for CpalAudioSink {
    fn open(
        &mut self,
        device_index: Option<usize>,
        sample_rate: u32,
        buffer_ms: u32,
        renderer: AudioRenderer,
    ) -> PipelineResult<()> {
        self.close();
        let frames = (sample_rate as usize * buffer_ms as usize / 1000).max(1) as u32;
        let (ready_tx, ready_rx) = mpsc::channel::<PipelineResult<()>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("iqscope-audio".to_string())
            .spawn(move || {
                let stream = match build_stream(device_index, sample_rate, frames, renderer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(PipelineError::AudioSink(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Returns on close() or when the sink is dropped.
                let _ = stop_rx.recv();
                drop(stream);
                info!("Audio playback: stopped");
            })
            .map_err(|e| PipelineError::AudioSink(format!("failed to spawn audio thread: {}", e)))?;

        let outcome = ready_rx.recv().unwrap_or_else(|_| {
            Err(PipelineError::AudioSink(
                "audio thread exited during open".to_string(),
            ))
        });
        match outcome {
            Ok(()) => {
                self.stop_tx = Some(stop_tx);
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("audio thread panicked");
            }
        }
    }
}

impl Drop for CpalAudioSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(
    device_index: Option<usize>,
    sample_rate: u32,
    frames: u32,
    mut renderer: AudioRenderer,
) -> PipelineResult<cpal::Stream> {
    let sink_err = |e: &dyn std::fmt::Display| PipelineError::AudioSink(e.to_string());

    let host = cpal::default_host();
    let device = match device_index {
        Some(index) => host
            .output_devices()
            .map_err(|e| sink_err(&e))?
            .nth(index)
            .ok_or_else(|| {
                PipelineError::AudioSink(format!("audio output device #{} not found", index))
            })?,
        None => host.default_output_device().ok_or_else(|| {
            PipelineError::AudioSink("no default audio output device".to_string())
        })?,
    };
    info!(
        "Audio playback: using device '{}'",
        device.name().unwrap_or_else(|_| "unknown".into())
    );

    // Ask for a buffer of `frames` only when the device supports that size.
    let buffer_size = match device.default_output_config().map(|c| *c.buffer_size()) {
        Ok(cpal::SupportedBufferSize::Range { min, max }) if (min..=max).contains(&frames) => {
            cpal::BufferSize::Fixed(frames)
        }
        _ => {
            warn!(
                "Audio playback: buffer of {} frames unsupported, using device default",
                frames
            );
            cpal::BufferSize::Default
        }
    };
    let config = cpal::StreamConfig {
        channels: OUTPUT_CHANNELS as u16,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size,
    };

    let output_err_logger = Arc::new(RateLimitedLog::new("Audio output stream error"));
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                renderer.render(data);
            },
            {
                let output_err_logger = output_err_logger.clone();
                move |err| {
                    output_err_logger.log(&err.to_string());
                }
            },
            None,
        )
        .map_err(|e| sink_err(&e))?;

    info!(
        "Audio playback: ready ({}Hz, {} ch, {} frame buffer)",
        sample_rate, OUTPUT_CHANNELS, frames
    );
    Ok(stream)
}
