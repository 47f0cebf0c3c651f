//! Multi-instrument light curves.

use std::{cmp::Ordering, sync::Arc};

use hifitime::Epoch;
use itertools::Itertools;
use log::debug;
use vec1::Vec1;

use crate::{config::CorrelationConfig, error::LightCurveError, CrossMatch, Observation};

const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, PartialEq)]
pub struct LightCurvePoint {
    /// The middle of the exposure this flux was measured over.
    pub timestamp: Epoch,
    pub flux: f64,
    pub flux_error: Option<f64>,
    pub source_instrument: String,
    pub source_id: String,
}

impl LightCurvePoint {
    fn from_observation(obs: &Observation) -> Option<Self> {
        Some(Self {
            timestamp: obs.time_mid(),
            flux: obs.flux()?,
            flux_error: obs.flux_error(),
            source_instrument: obs.instrument().name.clone(),
            source_id: obs.source_id().to_string(),
        })
    }

    /// Light-curve order: time, then instrument name, then source id. Separate
    /// measurements sharing all three fall back to their fluxes.
    fn order(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.source_instrument.cmp(&other.source_instrument))
            .then_with(|| self.source_id.cmp(&other.source_id))
            .then(self.flux.total_cmp(&other.flux))
            .then_with(|| {
                let err = |p: &Self| p.flux_error.unwrap_or(f64::NEG_INFINITY);
                err(self).total_cmp(&err(other))
            })
    }
}

/// A stretch between two consecutive points longer than the gap threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Gap {
    pub start: Epoch,
    pub end: Epoch,
    pub duration_hours: f64,
}

/// The merged, time-ordered flux series of one target. Never empty. Once built
/// it can only grow at the end.
#[derive(Debug, Clone, PartialEq)]
pub struct LightCurve {
    target: String,
    points: Vec1<LightCurvePoint>,
    gaps: Vec<Gap>,
    gap_threshold_hours: f64,
}

impl LightCurve {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn points(&self) -> &[LightCurvePoint] {
        &self.points
    }

    pub fn gaps(&self) -> &[Gap] {
        &self.gaps
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false; a light curve has at least one point.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The instruments that contributed, sorted and deduplicated.
    pub fn instruments(&self) -> Vec<&str> {
        self.points
            .iter()
            .map(|p| p.source_instrument.as_str())
            .sorted()
            .dedup()
            .collect()
    }

    /// Add a point to the end of the curve. Points can't be inserted before
    /// the current last one; rebuild the curve instead. Appending the last
    /// point again is refused, as a rebuild would collapse it.
    pub fn append(&mut self, point: LightCurvePoint) -> Result<(), LightCurveError> {
        if !point.flux.is_finite() {
            return Err(LightCurveError::NonFiniteFlux(point.flux));
        }
        if let Some(e) = point.flux_error {
            if !e.is_finite() || e < 0.0 {
                return Err(LightCurveError::FluxError(e));
            }
        }
        let last = self.points.last();
        match point.order(last) {
            Ordering::Less => {
                return Err(LightCurveError::OutOfOrder {
                    point: point.timestamp,
                    last: last.timestamp,
                })
            }
            Ordering::Equal => {
                return Err(LightCurveError::Duplicate {
                    source_id: point.source_id,
                    timestamp: point.timestamp,
                })
            }
            Ordering::Greater => (),
        }
        if let Some(gap) = gap_between(last, &point, self.gap_threshold_hours) {
            self.gaps.push(gap);
        }
        self.points.push(point);
        Ok(())
    }
}

fn gap_between(a: &LightCurvePoint, b: &LightCurvePoint, threshold_hours: f64) -> Option<Gap> {
    let hours = (b.timestamp - a.timestamp).to_seconds() / SECONDS_PER_HOUR;
    (hours > threshold_hours).then(|| Gap {
        start: a.timestamp,
        end: b.timestamp,
        duration_hours: hours,
    })
}

#[derive(Debug, Clone)]
pub struct LightCurveBuilder {
    gap_threshold_hours: f64,
}

impl LightCurveBuilder {
    pub fn new(config: &CorrelationConfig) -> Self {
        Self {
            gap_threshold_hours: config.gap_threshold_hours,
        }
    }

    /// Merge every flux measurement of `target` from both sides of `matches`
    /// and from `observations` into one curve.
    ///
    /// An observation reached more than once (e.g. a primary with several
    /// follow-ups) contributes a single point; distinct observations always
    /// contribute their own, even when they share a source id, instrument and
    /// time (two reductions of the same exposure). Observations without a flux
    /// contribute nothing, and nothing is interpolated. The result depends
    /// only on the inputs, so rebuilding gives the same curve. Returns `None`
    /// if there's no flux at all.
    pub fn build(
        &self,
        target: &str,
        matches: &[CrossMatch],
        observations: &[Arc<Observation>],
    ) -> Option<LightCurve> {
        let mut points: Vec<LightCurvePoint> = matches
            .iter()
            .flat_map(|m| [&m.primary, &m.secondary])
            .chain(observations)
            .unique_by(|obs| Arc::as_ptr(obs))
            .filter_map(|obs| LightCurvePoint::from_observation(obs))
            .collect();
        points.sort_by(LightCurvePoint::order);

        let points = match Vec1::try_from_vec(points) {
            Ok(p) => p,
            Err(_) => {
                debug!("No flux measurements for target '{target}'");
                return None;
            }
        };
        let gaps: Vec<Gap> = points
            .iter()
            .tuple_windows()
            .filter_map(|(a, b)| gap_between(a, b, self.gap_threshold_hours))
            .collect();
        debug!(
            "Light curve for '{target}': {} points, {} gaps",
            points.len(),
            gaps.len()
        );

        Some(LightCurve {
            target: target.to_string(),
            points,
            gaps,
            gap_threshold_hours: self.gap_threshold_hours,
        })
    }
}
