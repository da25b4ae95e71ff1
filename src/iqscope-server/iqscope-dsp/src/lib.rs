// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Signal processing and acquisition lifecycle for iqscope.

pub mod decimator;
pub mod demod;
pub mod filter;
pub mod plan;
pub mod scope;
pub mod spectrum;
pub mod synthetic;
pub mod worker;

#[cfg(feature = "soapysdr")]
pub mod soapy_device;

pub use iqscope_core::Iq;

pub use decimator::Decimator;
pub use demod::{Deemphasis, FmDemodulator};
pub use plan::{PipelineConfig, PipelinePlan};
pub use scope::{Scope, Session};
pub use spectrum::{
    bin_frequency_offset_hz, narrowband_offset_db, peak_bin, wideband_offset_db, SpectrumEngine,
    SpectrumSnapshot, SpectrumStore, SpectrumView, WindowKind,
};
pub use synthetic::{ProgrammedGains, SignalGenerator, SyntheticDevice, SyntheticSignal};

#[cfg(feature = "soapysdr")]
pub use soapy_device::SoapyDevice;
