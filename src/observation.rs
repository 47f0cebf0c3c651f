//! Observation records and their validated ingestion.

use std::{fmt, sync::Arc};

use hifitime::{Duration, Epoch};
use log::{debug, warn};

use crate::error::{RecordError, RecordIssue};

/// What an instrument is used for in a burst campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstrumentRole {
    /// A wide-field detector that raises the alert.
    Detector,

    /// A narrow-field instrument pointed at the alert position afterwards.
    FollowUp,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Instrument {
    pub name: String,
    pub role: InstrumentRole,
}

impl Instrument {
    pub fn detector<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            role: InstrumentRole::Detector,
        }
    }

    pub fn follow_up<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            role: InstrumentRole::FollowUp,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackgroundLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalibrationStatus {
    Calibrated,
    Preliminary,
    Uncalibrated,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quality {
    pub signal_to_noise: f64,
    pub background_level: BackgroundLevel,
    pub calibration_status: CalibrationStatus,
}

/// An energy range \[keV\].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyBand {
    pub low: f64,
    pub high: f64,
}

/// A position on the celestial sphere \[degrees\].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPosition {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

/// An observation as handed over by the metadata extractor. Nothing here has
/// been checked; turn it into an [`Observation`] with
/// [`Observation::try_from`] or ingest a whole batch with [`Catalog::ingest`].
#[derive(Debug, Clone)]
pub struct RawObservation {
    pub source_id: String,
    pub instrument: Instrument,
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub time_start: Epoch,
    pub time_end: Epoch,
    pub flux: Option<f64>,
    pub flux_error: Option<f64>,
    pub quality: Quality,
    pub energy_band: Option<EnergyBand>,

    /// The astrophysical target this record belongs to, if the extractor
    /// knows it. This engine never works target identity out by itself.
    pub target: Option<String>,
}

/// A single, validated instrument measurement.
///
/// Coordinates are finite and in range, the time interval doesn't run
/// backwards, and any flux, flux error and signal-to-noise values are finite.
/// Fields are private so that these guarantees can't be broken after
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    source_id: String,
    instrument: Instrument,
    position: SkyPosition,
    time_start: Epoch,
    time_end: Epoch,
    flux: Option<f64>,
    flux_error: Option<f64>,
    quality: Quality,
    energy_band: Option<EnergyBand>,
    target: Option<String>,
}

impl TryFrom<RawObservation> for Observation {
    type Error = RecordIssue;

    fn try_from(raw: RawObservation) -> Result<Self, Self::Error> {
        if raw.source_id.trim().is_empty() {
            return Err(RecordIssue::EmptySourceId);
        }
        if !raw.ra_deg.is_finite() || !(0.0..=360.0).contains(&raw.ra_deg) {
            return Err(RecordIssue::RightAscension(raw.ra_deg));
        }
        if !raw.dec_deg.is_finite() || !(-90.0..=90.0).contains(&raw.dec_deg) {
            return Err(RecordIssue::Declination(raw.dec_deg));
        }
        if raw.time_end < raw.time_start {
            return Err(RecordIssue::TimeInterval {
                start: raw.time_start,
                end: raw.time_end,
            });
        }
        if let Some(flux) = raw.flux {
            if !flux.is_finite() {
                return Err(RecordIssue::Flux(flux));
            }
        }
        if let Some(flux_error) = raw.flux_error {
            if !flux_error.is_finite() || flux_error < 0.0 {
                return Err(RecordIssue::FluxError(flux_error));
            }
        }
        let snr = raw.quality.signal_to_noise;
        if !snr.is_finite() || snr < 0.0 {
            return Err(RecordIssue::SignalToNoise(snr));
        }
        if let Some(EnergyBand { low, high }) = raw.energy_band {
            if !low.is_finite() || !high.is_finite() || low < 0.0 || low > high {
                return Err(RecordIssue::EnergyBand { low, high });
            }
        }

        Ok(Self {
            source_id: raw.source_id,
            instrument: raw.instrument,
            position: SkyPosition {
                ra_deg: raw.ra_deg,
                dec_deg: raw.dec_deg,
            },
            time_start: raw.time_start,
            time_end: raw.time_end,
            flux: raw.flux,
            flux_error: raw.flux_error,
            quality: raw.quality,
            energy_band: raw.energy_band,
            target: raw.target,
        })
    }
}

impl Observation {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn position(&self) -> SkyPosition {
        self.position
    }

    pub fn ra_deg(&self) -> f64 {
        self.position.ra_deg
    }

    pub fn dec_deg(&self) -> f64 {
        self.position.dec_deg
    }

    pub fn time_start(&self) -> Epoch {
        self.time_start
    }

    pub fn time_end(&self) -> Epoch {
        self.time_end
    }

    /// The centre of the exposure. Light curves are plotted against this.
    pub fn time_mid(&self) -> Epoch {
        self.time_start + (self.time_end - self.time_start) / 2
    }

    pub fn exposure(&self) -> Duration {
        self.time_end - self.time_start
    }

    pub fn flux(&self) -> Option<f64> {
        self.flux
    }

    pub fn flux_error(&self) -> Option<f64> {
        self.flux_error
    }

    pub fn quality(&self) -> &Quality {
        &self.quality
    }

    pub fn energy_band(&self) -> Option<EnergyBand> {
        self.energy_band
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }
}

/// An immutable, validated collection of observations from one source.
#[derive(Debug, Clone)]
pub struct Catalog {
    name: String,
    observations: Vec<Arc<Observation>>,
}

impl Catalog {
    /// Validate every record, keeping the good ones in their original order.
    /// Bad records are logged with their `source_id` and returned; they never
    /// stop the rest of the batch.
    pub fn ingest<S: Into<String>>(
        name: S,
        records: Vec<RawObservation>,
    ) -> (Catalog, Vec<RecordError>) {
        let name = name.into();
        let num_records = records.len();
        let mut observations = Vec::with_capacity(num_records);
        let mut rejected = vec![];

        for (index, raw) in records.into_iter().enumerate() {
            let source_id = raw.source_id.clone();
            match Observation::try_from(raw) {
                Ok(obs) => observations.push(Arc::new(obs)),
                Err(issue) => {
                    warn!("Skipping '{source_id}' from catalog '{name}': {issue}");
                    rejected.push(RecordError {
                        catalog: name.clone(),
                        index,
                        source_id,
                        issue,
                    });
                }
            }
        }
        debug!(
            "Catalog '{name}': {} of {num_records} records accepted",
            observations.len()
        );

        (Catalog { name, observations }, rejected)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn observations(&self) -> &[Arc<Observation>] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}
