// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Live controls and counters shared between the DSP worker, the audio
//! callback and the snapshot consumer. Everything here is lock-free.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// How dB values map onto a display: `top_db` is the upper edge, the
/// visible span is `range_db`, and `scale` stretches values before mapping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplaySettings {
    pub spectrum_scale: f32,
    pub display_offset_db: f32,
    pub display_range_db: f32,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            spectrum_scale: 1.0,
            display_offset_db: 0.0,
            display_range_db: 130.0,
        }
    }
}

/// User-adjustable settings. The worker reads the DSP-side values once per
/// cycle, the snapshot consumer reads the display values once per tick.
/// None of them require restarting acquisition.
#[derive(Debug)]
pub struct ScopeControls {
    windowing: AtomicBool,
    fft_offset_db: AtomicF32,
    spectrum_scale: AtomicF32,
    display_offset_db: AtomicF32,
    display_range_db: AtomicF32,
}

impl ScopeControls {
    pub fn new(windowing: bool, fft_offset_db: f32, display: DisplaySettings) -> Self {
        Self {
            windowing: AtomicBool::new(windowing),
            fft_offset_db: AtomicF32::new(fft_offset_db),
            spectrum_scale: AtomicF32::new(display.spectrum_scale),
            display_offset_db: AtomicF32::new(display.display_offset_db),
            display_range_db: AtomicF32::new(display.display_range_db),
        }
    }

    pub fn windowing(&self) -> bool {
        self.windowing.load(Ordering::Relaxed)
    }

    pub fn set_windowing(&self, enabled: bool) {
        self.windowing.store(enabled, Ordering::Relaxed);
    }

    /// User offset added to both branches' calibration, in dB.
    pub fn fft_offset_db(&self) -> f32 {
        self.fft_offset_db.load()
    }

    pub fn set_fft_offset_db(&self, offset_db: f32) {
        self.fft_offset_db.store(offset_db);
    }

    pub fn set_spectrum_scale(&self, scale: f32) {
        self.spectrum_scale.store(scale);
    }

    pub fn set_display_offset_db(&self, offset_db: f32) {
        self.display_offset_db.store(offset_db);
    }

    /// Visible dB span; non-positive values are clamped to 1 dB.
    pub fn set_display_range_db(&self, range_db: f32) {
        self.display_range_db.store(range_db.max(1.0));
    }

    pub fn display(&self) -> DisplaySettings {
        DisplaySettings {
            spectrum_scale: self.spectrum_scale.load(),
            display_offset_db: self.display_offset_db.load(),
            display_range_db: self.display_range_db.load(),
        }
    }
}

impl Default for ScopeControls {
    fn default() -> Self {
        Self::new(false, -40.0, DisplaySettings::default())
    }
}

/// Running counters for one acquisition session.
#[derive(Debug, Default)]
pub struct PipelineStats {
    cycles: AtomicU64,
    input_dropped: AtomicU64,
    audio_written: AtomicU64,
    audio_dropped: AtomicU64,
    audio_underruns: AtomicU64,
    audio_frames_rendered: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub input_dropped: u64,
    pub audio_written: u64,
    pub audio_dropped: u64,
    pub audio_underruns: u64,
    pub audio_frames_rendered: u64,
}

impl PipelineStats {
    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_input_drop(&self, samples: usize) {
        self.input_dropped.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_audio_written(&self, samples: usize) {
        self.audio_written.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_audio_drop(&self, samples: usize) {
        self.audio_dropped.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_underrun(&self) {
        self.audio_underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rendered(&self, frames: usize) {
        self.audio_frames_rendered.fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            input_dropped: self.input_dropped.load(Ordering::Relaxed),
            audio_written: self.audio_written.load(Ordering::Relaxed),
            audio_dropped: self.audio_dropped.load(Ordering::Relaxed),
            audio_underruns: self.audio_underruns.load(Ordering::Relaxed),
            audio_frames_rendered: self.audio_frames_rendered.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controls_round_trip_floats() {
        let controls = ScopeControls::default();
        controls.set_fft_offset_db(-37.5);
        controls.set_spectrum_scale(2.5);
        controls.set_display_offset_db(-20.0);
        controls.set_display_range_db(90.0);
        controls.set_windowing(true);
        assert_eq!(controls.fft_offset_db(), -37.5);
        assert!(controls.windowing());
        assert_eq!(
            controls.display(),
            DisplaySettings {
                spectrum_scale: 2.5,
                display_offset_db: -20.0,
                display_range_db: 90.0,
            }
        );
    }

    #[test]
    fn display_range_is_clamped() {
        let controls = ScopeControls::default();
        controls.set_display_range_db(0.0);
        assert_eq!(controls.display().display_range_db, 1.0);
    }

    #[test]
    fn stats_accumulate() {
        let stats = PipelineStats::default();
        stats.record_cycle();
        stats.record_cycle();
        stats.record_input_drop(100);
        stats.record_underrun();
        stats.record_rendered(3200);
        let snap = stats.snapshot();
        assert_eq!(snap.cycles, 2);
        assert_eq!(snap.input_dropped, 100);
        assert_eq!(snap.audio_underruns, 1);
        assert_eq!(snap.audio_frames_rendered, 3200);
    }
}
