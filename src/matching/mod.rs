//! Pairing observations across catalogs, by sky position and by time.

pub mod position;
pub mod time;

use std::sync::Arc;

use crate::Observation;

pub use position::{angular_separation_arcsec, PositionMatcher};
pub use time::TimeWindowMatcher;

/// How close two matched positions are. Pairs beyond the configured cutoff
/// are never classified; they just don't match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchQuality {
    High,
    Medium,
}

/// Anything that pairs a primary observation with a secondary one.
pub trait ObservationPair {
    fn primary(&self) -> &Arc<Observation>;

    fn secondary(&self) -> &Arc<Observation>;

    /// Used to break ties between equally timed pairs. Pairs without a
    /// positional match report zero.
    fn separation_arcsec(&self) -> f64 {
        0.0
    }
}

/// Output of the position stage: two observations that coincide on the sky.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionMatch {
    pub primary: Arc<Observation>,
    pub secondary: Arc<Observation>,
    pub angular_separation_arcsec: f64,
    pub match_quality: MatchQuality,
}

impl ObservationPair for PositionMatch {
    fn primary(&self) -> &Arc<Observation> {
        &self.primary
    }

    fn secondary(&self) -> &Arc<Observation> {
        &self.secondary
    }

    fn separation_arcsec(&self) -> f64 {
        self.angular_separation_arcsec
    }
}

/// Two observations paired only by time, without regard to position.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedPair {
    pub primary: Arc<Observation>,
    pub secondary: Arc<Observation>,
    pub time_delta_hours: f64,
}

impl ObservationPair for TimedPair {
    fn primary(&self) -> &Arc<Observation> {
        &self.primary
    }

    fn secondary(&self) -> &Arc<Observation> {
        &self.secondary
    }
}

/// A pair of observations that agree in both position and time.
///
/// Both observations are shared, read-only references into the catalogs they
/// came from. Later stages never edit a `CrossMatch`; they produce new ones.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossMatch {
    pub primary: Arc<Observation>,
    pub secondary: Arc<Observation>,

    /// Great-circle distance between the two positions \[arcsec\]. The same
    /// whichever way round the pair is.
    pub angular_separation_arcsec: f64,

    /// |secondary start - primary start| \[hours\].
    pub time_delta_hours: f64,

    pub match_quality: MatchQuality,

    /// The Pearson coefficient of the set this match was analysed in. Only
    /// present if both sides have a flux with an error and the set had
    /// enough data.
    pub flux_correlation: Option<f64>,
}

impl CrossMatch {
    /// Both sides carry a flux and its error.
    pub fn has_flux_pair(&self) -> bool {
        [&self.primary, &self.secondary]
            .iter()
            .all(|obs| obs.flux().is_some() && obs.flux_error().is_some())
    }

    /// The target label of this match; the primary's if it has one,
    /// otherwise the secondary's.
    pub fn target(&self) -> Option<&str> {
        self.primary.target().or_else(|| self.secondary.target())
    }

    pub(crate) fn with_flux_correlation(&self, flux_correlation: Option<f64>) -> Self {
        Self {
            flux_correlation,
            ..self.clone()
        }
    }
}

impl ObservationPair for CrossMatch {
    fn primary(&self) -> &Arc<Observation> {
        &self.primary
    }

    fn secondary(&self) -> &Arc<Observation> {
        &self.secondary
    }

    fn separation_arcsec(&self) -> f64 {
        self.angular_separation_arcsec
    }
}
