//! Cross-observatory correlation of burst observations.
//!
//! Observations of the same patch of sky from independent instruments (a
//! wide-field detector raising an alert, narrow-field instruments following
//! it up) are paired by position and by time, their fluxes are correlated,
//! and the flux measurements of each target are merged into one light curve.
//! Disagreements in data quality between paired observations are flagged.
//!
//! Everything happens in memory. Records come in as [`RawObservation`]s,
//! results go out as plain data in a [`PipelineOutput`]; reading and writing
//! them is someone else's job.
//!
//! ```no_run
//! use burstmatch::{CorrelationConfig, Pipeline, RawObservation};
//!
//! # fn load(_: &str) -> Vec<RawObservation> { vec![] }
//! let pipeline = Pipeline::new(CorrelationConfig::default()).unwrap();
//! let output = pipeline
//!     .run(vec![("bat", load("bat")), ("xrt", load("xrt"))])
//!     .unwrap();
//! for m in &output.matches {
//!     println!("{} <-> {}", m.primary.source_id(), m.secondary.source_id());
//! }
//! ```

pub mod config;
pub mod correlation;
pub mod error;
pub mod light_curve;
pub mod matching;
pub mod observation;
pub mod pipeline;
pub mod quality;

pub use config::CorrelationConfig;
pub use correlation::{CorrelationSummary, FluxCorrelationAnalyzer};
pub use error::{ConfigError, LightCurveError, PipelineError, RecordError, RecordIssue};
pub use light_curve::{Gap, LightCurve, LightCurveBuilder, LightCurvePoint};
pub use matching::{
    angular_separation_arcsec, CrossMatch, MatchQuality, PositionMatch, PositionMatcher,
    TimeWindowMatcher, TimedPair,
};
pub use observation::{
    BackgroundLevel, CalibrationStatus, Catalog, EnergyBand, Instrument, InstrumentRole,
    Observation, Quality, RawObservation, SkyPosition,
};
pub use pipeline::{Pipeline, PipelineOutput, PipelineState, RunReport};
pub use quality::{FlagReason, QualityFlag, QualityValidator, Severity};
