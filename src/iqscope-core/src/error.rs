// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

/// Failures raised anywhere in the acquisition pipeline.
///
/// `QueueFull` and `QueueUnderrun` are transient: the caller drops or
/// substitutes silence and keeps going. `DeviceFault` ends the session.
/// `Configuration` is only ever produced before any thread is started.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("sample queue full: dropped {dropped} of {offered} samples")]
    QueueFull { offered: usize, dropped: usize },

    #[error("sample queue underrun: requested {requested}, available {available}")]
    QueueUnderrun { requested: usize, available: usize },

    #[error("sample queue closed")]
    QueueClosed,

    #[error("device fault: {0}")]
    DeviceFault(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("audio sink error: {0}")]
    AudioSink(String),

    #[error("DSP worker error: {0}")]
    Worker(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        Self::DeviceFault(msg.into())
    }

    /// Whether acquisition can continue after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::QueueUnderrun { .. })
    }
}
