//! Flux correlation between the two sides of a set of cross-matches.

use log::debug;
use ndarray::Array1;

use crate::{config::CorrelationConfig, CrossMatch};

/// What was learned about one analysed set.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationSummary {
    /// Pearson's r over the usable pairs. `None` if there were fewer than two
    /// of them, or if either side's fluxes don't vary at all.
    pub coefficient: Option<f64>,

    /// The coefficient of determination, r².
    pub r_squared: Option<f64>,

    /// Matches that had a flux and a flux error on both sides.
    pub usable_pairs: usize,

    /// |r| reached the configured threshold.
    pub correlated_variability: bool,
}

#[derive(Debug, Clone)]
pub struct CorrelatedSet {
    /// The analysed matches, in input order. Those with a usable flux pair
    /// carry the set's coefficient; the rest are otherwise unchanged.
    pub matches: Vec<CrossMatch>,
    pub summary: CorrelationSummary,
}

#[derive(Debug, Clone)]
pub struct FluxCorrelationAnalyzer {
    correlation_threshold: f64,
}

impl FluxCorrelationAnalyzer {
    pub fn new(config: &CorrelationConfig) -> Self {
        Self {
            correlation_threshold: config.correlation_threshold,
        }
    }

    pub fn analyze(&self, matches: &[CrossMatch]) -> CorrelatedSet {
        let (primary_flux, secondary_flux): (Vec<f64>, Vec<f64>) = matches
            .iter()
            .filter(|m| m.has_flux_pair())
            .filter_map(|m| Some((m.primary.flux()?, m.secondary.flux()?)))
            .unzip();
        let usable_pairs = primary_flux.len();

        let coefficient = if usable_pairs < 2 {
            None
        } else {
            pearson(&Array1::from(primary_flux), &Array1::from(secondary_flux))
        };
        let correlated_variability =
            coefficient.map_or(false, |r| r.abs() >= self.correlation_threshold);
        debug!(
            "Flux correlation over {usable_pairs} of {} matches: {coefficient:?}",
            matches.len()
        );

        let matches = matches
            .iter()
            .map(|m| {
                let r = if m.has_flux_pair() { coefficient } else { None };
                m.with_flux_correlation(r)
            })
            .collect();

        CorrelatedSet {
            matches,
            summary: CorrelationSummary {
                coefficient,
                r_squared: coefficient.map(|r| r * r),
                usable_pairs,
                correlated_variability,
            },
        }
    }
}

/// Pearson's correlation coefficient of two equally long series. `None` if
/// they're too short or either has no variance.
pub fn pearson(x: &Array1<f64>, y: &Array1<f64>) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let dx = x - x.mean()?;
    let dy = y - y.mean()?;
    let var_x = dx.dot(&dx);
    let var_y = dy.dot(&dy);
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }

    let r = dx.dot(&dy) / (var_x.sqrt() * var_y.sqrt());
    Some(r.clamp(-1.0, 1.0))
}
