use std::time::Duration as StdDuration;

use clap::{AppSettings, Parser};
use hifitime::{Duration, Epoch};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};

use burstmatch::{
    BackgroundLevel, CalibrationStatus, CorrelationConfig, EnergyBand, Instrument, Pipeline,
    PipelineOutput, Quality, RawObservation,
};

/// Cross-match synthetic burst follow-up catalogs and report what was found.
#[derive(Parser)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_long_args = true)]
struct Args {
    /// The number of bursts to simulate.
    #[clap(long, default_value_t = 12)]
    targets: usize,

    /// The number of follow-up epochs per burst.
    #[clap(long, default_value_t = 5)]
    epochs: usize,

    /// The positional match cutoff \[arcsec\].
    #[clap(long, default_value_t = 1.0)]
    max_separation: f64,

    /// The follow-up window \[hours\].
    #[clap(long, default_value_t = 168.0)]
    max_window: f64,

    /// |r| at or above which a target is reported as varying in step.
    #[clap(long, default_value_t = 0.5)]
    correlation_threshold: f64,

    /// Light-curve gaps longer than this are reported \[hours\].
    #[clap(long, default_value_t = 24.0)]
    gap_threshold: f64,

    /// Give up waiting for the pipeline after this many seconds.
    #[clap(long)]
    timeout: Option<u64>,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv). The default is to print only high-level information.
    #[clap(short, long, parse(from_occurrences))]
    verbosity: u8,

    /// Disable progress bars.
    #[clap(long)]
    no_progress_bars: bool,
}

fn main() {
    if let Err(e) = try_main() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_logging(args.verbosity);

    let config = CorrelationConfig {
        max_separation_arcsec: args.max_separation,
        max_window_hours: args.max_window,
        correlation_threshold: args.correlation_threshold,
        gap_threshold_hours: args.gap_threshold,
        ..Default::default()
    };
    let progress = ProgressBar::with_draw_target(
        None,
        if args.no_progress_bars {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stdout()
        },
    )
    .with_style(
        ProgressStyle::default_bar()
            .template("{msg:20}: [{wide_bar:.blue}] {pos}/{len} stages ({elapsed_precise})")?
            .progress_chars("=> "),
    )
    .with_message("Correlating");
    let pipeline = Pipeline::new(config)?.with_progress_bar(progress);

    let catalogs = synthetic_catalogs(args.targets, args.epochs);
    for (name, records) in &catalogs {
        info!("Catalog '{name}': {} records", records.len());
    }

    let output = match args.timeout {
        Some(secs) => pipeline.run_with_timeout(catalogs, StdDuration::from_secs(secs))?,
        None => pipeline.run(catalogs)?,
    };
    report(&output);

    Ok(())
}

fn report(output: &PipelineOutput) {
    for rejected in &output.report.rejected {
        warn!("Rejected: {rejected}");
    }
    for (target, lc) in &output.light_curves {
        let correlation = output
            .correlations
            .get(&Some(target.clone()))
            .and_then(|s| s.coefficient);
        info!(
            "{target}: {} points from [{}], {} gaps, r = {}",
            lc.len(),
            lc.instruments().join(", "),
            lc.gaps().len(),
            correlation.map_or_else(|| "n/a".to_string(), |r| format!("{r:.3}"))
        );
        for p in lc.points() {
            debug!("  {} {:>8.3} {}", p.timestamp, p.flux, p.source_instrument);
        }
    }
    for flag in &output.flags {
        info!(
            "{:?} ({:?}): {} <-> {}",
            flag.reason, flag.severity, flag.primary_id, flag.secondary_id
        );
    }
    info!(
        "{} cross-matches ({} outside the time window), {} quality flags",
        output.report.cross_matches,
        output.report.outside_time_window,
        output.report.quality_flags
    );
}

/// Deterministic stand-ins for what the metadata extractor would hand over:
/// a burst detector, an X-ray follow-up and a UV/optical follow-up. A few
/// records are deliberately broken, and some follow-ups sit on a bright
/// background.
fn synthetic_catalogs(num_targets: usize, num_epochs: usize) -> Vec<(String, Vec<RawObservation>)> {
    let start = Epoch::from_gregorian_utc_at_midnight(2005, 7, 24);
    let hour = |h: f64| Duration::from_seconds(h * 3600.0);

    let mut bat = vec![];
    let mut xrt = vec![];
    let mut uvot = vec![];
    for k in 0..num_targets {
        let target = format!("GRB{:06}", 50724 + k);
        let ra = (16.0 + 37.3 * k as f64) % 360.0;
        let dec = -72.4 + (k as f64 * 13.7) % 140.0;
        let trigger = start + hour(72.0 * k as f64);
        let peak = 5.0 + (k % 4) as f64;

        for j in 0..num_epochs {
            let epoch = trigger + hour(18.0 * j as f64);
            // A power-law decay with a little deterministic scatter.
            let decay = (1.0 + j as f64).powf(-1.2);
            let wiggle = 1.0 + 0.05 * ((k + 3 * j) % 5) as f64 - 0.1;

            bat.push(record(
                format!("BAT-{k}-{j}"),
                Instrument::detector("BAT"),
                (ra, dec),
                (epoch, hour(0.1)),
                Some(peak * decay),
                quality(12.0, BackgroundLevel::Low, CalibrationStatus::Calibrated),
                Some(EnergyBand {
                    low: 15.0,
                    high: 150.0,
                }),
                &target,
            ));

            let background = if k % 4 == 3 {
                BackgroundLevel::High
            } else {
                BackgroundLevel::Low
            };
            let dec_offset = if k % 7 == 6 && j == 0 {
                // Beyond the pole; rejected at ingestion.
                180.0
            } else {
                0.2 * (j % 3) as f64 / 3600.0
            };
            xrt.push(record(
                format!("XRT-{k}-{j}"),
                Instrument::follow_up("XRT"),
                (ra, dec + dec_offset),
                (epoch + hour(1.5), hour(0.5)),
                Some(0.4 * peak * decay * wiggle),
                quality(20.0, background, CalibrationStatus::Calibrated),
                Some(EnergyBand {
                    low: 0.3,
                    high: 10.0,
                }),
                &target,
            ));

            let calibration = if j == 0 {
                CalibrationStatus::Preliminary
            } else {
                CalibrationStatus::Calibrated
            };
            uvot.push(record(
                format!("UVOT-{k}-{j}"),
                Instrument::follow_up("UVOT"),
                (ra, dec),
                (epoch + hour(2.0), hour(0.3)),
                (j % 2 == 0).then(|| 0.1 * peak * decay),
                quality(8.0, BackgroundLevel::Medium, calibration),
                None,
                &target,
            ));
        }
    }

    vec![
        ("swift-bat".to_string(), bat),
        ("swift-xrt".to_string(), xrt),
        ("swift-uvot".to_string(), uvot),
    ]
}

#[allow(clippy::too_many_arguments)]
fn record(
    source_id: String,
    instrument: Instrument,
    (ra_deg, dec_deg): (f64, f64),
    (time_start, exposure): (Epoch, Duration),
    flux: Option<f64>,
    quality: Quality,
    energy_band: Option<EnergyBand>,
    target: &str,
) -> RawObservation {
    RawObservation {
        source_id,
        instrument,
        ra_deg,
        dec_deg,
        time_start,
        time_end: time_start + exposure,
        flux,
        flux_error: flux.map(|f| 0.1 * f),
        quality,
        energy_band,
        target: Some(target.to_string()),
    }
}

fn quality(
    signal_to_noise: f64,
    background_level: BackgroundLevel,
    calibration_status: CalibrationStatus,
) -> Quality {
    Quality {
        signal_to_noise,
        background_level,
        calibration_status,
    }
}

/// Our own modules log at the requested level; dependencies only warn.
/// `RUST_LOG` still has the final say.
fn setup_logging(verbosity: u8) {
    let level = log_level(verbosity);
    env_logger::Builder::new()
        .target(env_logger::Target::Stdout)
        .filter_level(log::LevelFilter::Warn)
        .filter_module("burstmatch", level)
        .filter_module("burstmatch_demo", level)
        .format_target(verbosity >= 3)
        .format_timestamp((verbosity >= 2).then_some(env_logger::TimestampPrecision::Millis))
        .parse_default_env()
        .init();
}

fn log_level(verbosity: u8) -> log::LevelFilter {
    match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}
