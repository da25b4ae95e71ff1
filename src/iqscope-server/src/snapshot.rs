// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Periodic spectrum snapshot consumer.

use serde::Serialize;
use tracing::debug;

use iqscope_core::{ScopeControls, StatsSnapshot};
use iqscope_dsp::{
    bin_frequency_offset_hz, peak_bin, SpectrumSnapshot, SpectrumStore, SpectrumView,
};

use crate::config::DisplayConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeakReport {
    pub bin: usize,
    pub frequency_hz: f64,
    pub level_db: f32,
    /// Level mapped through the current display settings (0.0–1.0).
    pub display_level: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotReport {
    pub sequence: u64,
    pub center_frequency_hz: u64,
    pub wideband_peak: Option<PeakReport>,
    pub narrowband_peak: Option<PeakReport>,
    pub stats: StatsSnapshot,
}

pub struct SnapshotReporter {
    report_every: u32,
    json: bool,
    wide_rate: u32,
    narrow_rate: u32,
    ticks: u32,
    last_sequence: u64,
    snapshot: SpectrumSnapshot,
}

impl SnapshotReporter {
    pub fn new(display: &DisplayConfig, wide_rate: u32, narrow_rate: u32) -> Self {
        Self {
            report_every: display.report_every.max(1),
            json: display.json,
            wide_rate,
            narrow_rate,
            ticks: 0,
            last_sequence: 0,
            snapshot: SpectrumSnapshot::default(),
        }
    }

    /// Take one snapshot. Returns a JSON line when one is due.
    pub fn tick(
        &mut self,
        store: &SpectrumStore,
        controls: &ScopeControls,
        center_frequency_hz: u64,
        stats: StatsSnapshot,
    ) -> Option<String> {
        store.snapshot_into(&mut self.snapshot);
        if self.snapshot.sequence == self.last_sequence {
            return None;
        }
        self.last_sequence = self.snapshot.sequence;

        let view = SpectrumView::new(controls.display());
        let report = SnapshotReport {
            sequence: self.snapshot.sequence,
            center_frequency_hz,
            wideband_peak: peak_report(
                &self.snapshot.wideband,
                self.wide_rate,
                center_frequency_hz,
                &view,
            ),
            narrowband_peak: self
                .snapshot
                .narrowband
                .as_deref()
                .and_then(|bins| peak_report(bins, self.narrow_rate, center_frequency_hz, &view)),
            stats,
        };
        if let Some(peak) = report.wideband_peak {
            debug!(
                "wide-band peak: bin {} at {:.0} Hz, {:.1} dB",
                peak.bin, peak.frequency_hz, peak.level_db
            );
        }
        if let Some(peak) = report.narrowband_peak {
            debug!(
                "narrow-band peak: bin {} at {:.0} Hz, {:.1} dB",
                peak.bin, peak.frequency_hz, peak.level_db
            );
        }

        self.ticks += 1;
        if !self.json || self.ticks < self.report_every {
            return None;
        }
        self.ticks = 0;
        serde_json::to_string(&report).ok()
    }
}

fn peak_report(
    bins: &[f32],
    sample_rate: u32,
    center_frequency_hz: u64,
    view: &SpectrumView,
) -> Option<PeakReport> {
    let (bin, level_db) = peak_bin(bins)?;
    Some(PeakReport {
        bin,
        frequency_hz: center_frequency_hz as f64
            + bin_frequency_offset_hz(bin, bins.len(), sample_rate),
        level_db,
        display_level: view.level(level_db),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish(store: &SpectrumStore, wide_peak: usize) {
        let mut wide = vec![-100.0_f32; 1024];
        wide[wide_peak] = -20.0;
        store.publish_wideband(&wide).unwrap();
        let mut narrow = vec![-100.0_f32; 128];
        narrow[127] = -30.0;
        store.publish_narrowband(&narrow).unwrap();
    }

    #[test]
    fn reports_peaks_every_n_fresh_snapshots() {
        let store = SpectrumStore::new();
        store.prepare(1024);
        let controls = ScopeControls::default();
        let display = DisplayConfig {
            report_every: 2,
            json: true,
            ..DisplayConfig::default()
        };
        let mut reporter = SnapshotReporter::new(&display, 1_024_000, 128_000);

        // Nothing published yet.
        assert!(reporter
            .tick(&store, &controls, 100_000_000, StatsSnapshot::default())
            .is_none());

        publish(&store, 10);
        assert!(reporter
            .tick(&store, &controls, 100_000_000, StatsSnapshot::default())
            .is_none());
        // Same sequence: not a fresh snapshot.
        assert!(reporter
            .tick(&store, &controls, 100_000_000, StatsSnapshot::default())
            .is_none());

        publish(&store, 10);
        let line = reporter
            .tick(&store, &controls, 100_000_000, StatsSnapshot::default())
            .expect("report due");
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["sequence"], 2);
        assert_eq!(value["wideband_peak"]["bin"], 10);
        assert_eq!(value["wideband_peak"]["frequency_hz"], 100_010_000.0);
        // Bin 127 of 128 is one bin below centre at 1 kHz spacing.
        assert_eq!(value["narrowband_peak"]["frequency_hz"], 99_999_000.0);
    }

    #[test]
    fn json_disabled_never_emits() {
        let store = SpectrumStore::new();
        store.prepare(1024);
        let controls = ScopeControls::default();
        let display = DisplayConfig {
            report_every: 1,
            json: false,
            ..DisplayConfig::default()
        };
        let mut reporter = SnapshotReporter::new(&display, 1_024_000, 128_000);
        publish(&store, 3);
        assert!(reporter
            .tick(&store, &controls, 1, StatsSnapshot::default())
            .is_none());
    }

    #[test]
    fn peak_report_maps_display_level() {
        let view = SpectrumView::new(ScopeControls::default().display());
        let report = peak_report(&[-50.0, 0.0], 2_000, 0, &view).unwrap();
        assert_eq!(report.bin, 1);
        assert_eq!(report.display_level, 1.0);
        assert_eq!(report.frequency_hz, -1000.0);
    }
}
