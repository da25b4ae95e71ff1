// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod audio;
mod config;
mod snapshot;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use iqscope_app::{init_logging, ConfigFile};
use iqscope_core::{AudioSink, DrainAudioSink, DynResult, RfDevice};
use iqscope_dsp::{Scope, SyntheticDevice};

use audio::CpalAudioSink;
use config::{ScopeConfig, SourceKind};
use snapshot::SnapshotReporter;

const PKG_DESCRIPTION: &str = concat!(
    env!("CARGO_PKG_NAME"),
    " - I/Q spectrum scope and FM receiver"
);

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// I/Q source to acquire from
    #[arg(short = 's', long = "source", value_enum)]
    source: Option<SourceKind>,
    /// SoapySDR device arguments (e.g. "driver=rtlsdr")
    #[arg(short = 'a', long = "args")]
    args: Option<String>,
    /// Centre frequency in Hz
    #[arg(short = 'f', long = "frequency")]
    frequency: Option<u64>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level")]
    log_level: Option<String>,
    /// Disable audio playback; demodulated audio is drained silently
    #[arg(long = "no-audio")]
    no_audio: bool,
}

fn apply_cli_overrides(cfg: &mut ScopeConfig, cli: &Cli) {
    if let Some(source) = cli.source {
        cfg.device.source = source;
    }
    if let Some(ref args) = cli.args {
        cfg.device.args = Some(args.clone());
    }
    if let Some(frequency) = cli.frequency {
        cfg.device.center_frequency_hz = frequency;
    }
    if let Some(ref level) = cli.log_level {
        cfg.general.log_level = Some(level.clone());
    }
    if cli.no_audio {
        cfg.audio.enabled = false;
    }
}

fn build_device(cfg: &ScopeConfig) -> DynResult<Box<dyn RfDevice>> {
    match cfg.device.source {
        SourceKind::Synthetic => Ok(Box::new(SyntheticDevice::new(
            cfg.device.synthetic_signal(),
            cfg.device.synthetic.block_len,
        ))),
        #[cfg(feature = "soapysdr")]
        SourceKind::Soapysdr => {
            let args = cfg.device.args.as_deref().unwrap_or_default();
            Ok(Box::new(iqscope_dsp::SoapyDevice::open(
                args,
                cfg.device.sample_rate,
                cfg.device.center_frequency_hz,
            )?))
        }
        #[cfg(not(feature = "soapysdr"))]
        SourceKind::Soapysdr => Err(
            "soapysdr source requested but iqscope was built without the `soapysdr` feature"
                .into(),
        ),
    }
}

fn build_sink(cfg: &ScopeConfig) -> Box<dyn AudioSink> {
    if cfg.audio.enabled {
        Box::new(CpalAudioSink::default())
    } else {
        info!("Audio playback disabled");
        Box::new(DrainAudioSink::default())
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ScopeConfig::example_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = ScopeConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        ScopeConfig::load_from_default_paths()?
    };
    apply_cli_overrides(&mut cfg, &cli);
    cfg.validate()
        .map_err(|e| format!("Invalid configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let scope = Scope::new(cfg.dsp.clone(), cfg.display.settings())?;
    let device = build_device(&cfg)?;
    let session = scope.start(
        device,
        build_sink(&cfg),
        cfg.audio.device_index,
        cfg.device.gain,
    )?;

    let plan = session.plan().clone();
    let mut reporter = SnapshotReporter::new(&cfg.display, plan.input_rate, plan.narrow_rate);
    let store = scope.store();
    let controls = scope.controls();

    let mut ticker = tokio::time::interval(Duration::from_millis(cfg.display.refresh_ms));
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Ctrl+C received, shutting down");
                break;
            }
            _ = ticker.tick() => {
                if let Some(fault) = session.fault() {
                    error!("Acquisition stopped: {}", fault);
                    break;
                }
                if let Some(line) = reporter.tick(
                    &store,
                    &controls,
                    session.center_frequency(),
                    session.stats(),
                ) {
                    println!("{}", line);
                }
            }
        }
    }

    let stats = tokio::task::spawn_blocking(move || session.stop()).await??;
    info!(
        "Stopped after {} cycles: {} input samples dropped, {} audio samples dropped, {} underruns",
        stats.cycles, stats.input_dropped, stats.audio_dropped, stats.audio_underruns
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_replace_config_values() {
        let cli = Cli::parse_from([
            "iqscope",
            "--source",
            "soapysdr",
            "--args",
            "driver=rtlsdr",
            "-f",
            "94000000",
            "--no-audio",
        ]);
        let mut cfg = ScopeConfig::default();
        apply_cli_overrides(&mut cfg, &cli);
        assert_eq!(cfg.device.source, SourceKind::Soapysdr);
        assert_eq!(cfg.device.args.as_deref(), Some("driver=rtlsdr"));
        assert_eq!(cfg.device.center_frequency_hz, 94_000_000);
        assert!(!cfg.audio.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn no_overrides_keep_config() {
        let cli = Cli::parse_from(["iqscope"]);
        let mut cfg = ScopeConfig::default();
        apply_cli_overrides(&mut cfg, &cli);
        assert_eq!(cfg.device.source, SourceKind::Synthetic);
        assert!(cfg.audio.enabled);
    }

    #[test]
    fn synthetic_device_uses_configured_rate() {
        let cfg = ScopeConfig::default();
        let device = build_device(&cfg).unwrap();
        assert_eq!(device.sample_rate(), 2_048_000);
        assert_eq!(device.center_frequency(), 106_300_000);
    }
}
