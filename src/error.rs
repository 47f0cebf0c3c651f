//! Error types for the correlation engine.
//!
//! Only [`ConfigError`] is fatal. [`RecordError`]s are collected into the run
//! report and the batch carries on without the offending record.

use hifitime::Epoch;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },

    #[error("{field} must be greater than zero, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("high_quality_separation_arcsec ({high}) must not exceed max_separation_arcsec ({max})")]
    QualityBoundaryAboveCutoff { high: f64, max: f64 },

    #[error("correlation_threshold must be in (0, 1], got {0}")]
    CorrelationThresholdRange(f64),

    #[error("low_snr_threshold ({low}) must be below high_snr_threshold ({high})")]
    SnrThresholdOrder { low: f64, high: f64 },

    #[error("at least two catalogs are needed for cross-matching, got {0}")]
    TooFewCatalogs(usize),
}

/// Why a single observation record was rejected at ingestion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordIssue {
    #[error("empty source_id")]
    EmptySourceId,

    #[error("right ascension {0} deg is not a finite value in [0, 360]")]
    RightAscension(f64),

    #[error("declination {0} deg is not a finite value in [-90, 90]")]
    Declination(f64),

    #[error("time interval ends ({end}) before it starts ({start})")]
    TimeInterval { start: Epoch, end: Epoch },

    #[error("flux is not finite ({0})")]
    Flux(f64),

    #[error("flux error is not a finite non-negative value ({0})")]
    FluxError(f64),

    #[error("signal-to-noise is not a finite non-negative value ({0})")]
    SignalToNoise(f64),

    #[error("energy band [{low}, {high}] is not a finite, non-negative, ordered range")]
    EnergyBand { low: f64, high: f64 },
}

/// A rejected record, tagged with where it came from.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("catalog '{catalog}', record {index} ('{source_id}'): {issue}")]
pub struct RecordError {
    pub catalog: String,
    /// Position of the record in the catalog as it was supplied.
    pub index: usize,
    pub source_id: String,
    pub issue: RecordIssue,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("pipeline run did not finish within {0:?}")]
    TimedOut(std::time::Duration),

    #[error("pipeline worker exited without producing a result")]
    WorkerLost,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LightCurveError {
    #[error("point at {point} is earlier than the last point of the light curve ({last})")]
    OutOfOrder { point: Epoch, last: Epoch },

    #[error("flux {0} is not finite")]
    NonFiniteFlux(f64),

    #[error("flux error {0} is not a finite, non-negative number")]
    FluxError(f64),

    #[error("'{source_id}' at {timestamp} is already the last point of the light curve")]
    Duplicate { source_id: String, timestamp: Epoch },
}
