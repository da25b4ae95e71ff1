// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod audio;
pub mod controls;
pub mod device;
pub mod diag;
pub mod error;
pub mod queue;

/// Complex I/Q sample, the RF-domain unit.
pub type Iq = num_complex::Complex<f32>;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use audio::{AudioRenderer, AudioSink, DrainAudioSink, OUTPUT_CHANNELS};
pub use controls::{DisplaySettings, PipelineStats, ScopeControls, StatsSnapshot};
pub use device::{DeviceFaultSlot, GainSettings, IqFeeder, RfDevice};
pub use diag::RateLimitedLog;
pub use error::{PipelineError, PipelineResult};
pub use queue::{SampleQueue, WaitStatus};
