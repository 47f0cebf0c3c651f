//! Temporal matching within a follow-up window.

use std::{collections::HashMap, sync::Arc};

use hifitime::Duration;
use log::{debug, trace};
use rayon::prelude::*;

use super::{CrossMatch, ObservationPair, PositionMatch, TimedPair};
use crate::{config::CorrelationConfig, Observation};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// |secondary start - primary start| \[hours\].
pub fn time_delta_hours(primary: &Observation, secondary: &Observation) -> f64 {
    (secondary.time_start() - primary.time_start())
        .abs()
        .to_seconds()
        / SECONDS_PER_HOUR
}

#[derive(Debug, Clone)]
pub struct TimeWindowMatcher {
    max_window_hours: f64,
}

impl TimeWindowMatcher {
    pub fn new(config: &CorrelationConfig) -> Self {
        Self {
            max_window_hours: config.max_window_hours,
        }
    }

    /// Keep the position matches whose start times are within the window,
    /// turning them into [`CrossMatch`]es.
    ///
    /// Every qualifying secondary of a primary is kept. Within each primary's
    /// group the matches are ranked by ascending time delta (then separation,
    /// then secondary id); groups stay in the order their primaries first
    /// appear.
    pub fn apply(&self, matches: Vec<PositionMatch>) -> Vec<CrossMatch> {
        let num_in = matches.len();
        let out: Vec<CrossMatch> = self
            .window(matches)
            .into_iter()
            .map(|(m, time_delta_hours)| CrossMatch {
                primary: m.primary,
                secondary: m.secondary,
                angular_separation_arcsec: m.angular_separation_arcsec,
                time_delta_hours,
                match_quality: m.match_quality,
                flux_correlation: None,
            })
            .collect();
        debug!(
            "{} of {num_in} position matches within {} h",
            out.len(),
            self.max_window_hours
        );
        out
    }

    /// Pair two catalogs by time alone.
    pub fn match_catalogs(
        &self,
        primaries: &[Arc<Observation>],
        secondaries: &[Arc<Observation>],
    ) -> Vec<TimedPair> {
        let mut by_time: Vec<&Arc<Observation>> = secondaries.iter().collect();
        by_time.sort_by_key(|o| o.time_start());
        // A second of slack on each side; the exact cut is made on the hours.
        let half_window = Duration::from_seconds(self.max_window_hours * SECONDS_PER_HOUR + 1.0);

        let candidates: Vec<Vec<TimedPair>> = primaries
            .par_iter()
            .map(|primary| {
                let earliest = primary.time_start() - half_window;
                let latest = primary.time_start() + half_window;
                let start = by_time.partition_point(|o| o.time_start() < earliest);
                by_time[start..]
                    .iter()
                    .take_while(|o| o.time_start() <= latest)
                    .map(|secondary| TimedPair {
                        primary: Arc::clone(primary),
                        secondary: Arc::clone(secondary),
                        time_delta_hours: 0.0,
                    })
                    .collect()
            })
            .collect();

        self.window(candidates.into_iter().flatten().collect())
            .into_iter()
            .map(|(pair, time_delta_hours)| TimedPair {
                time_delta_hours,
                ..pair
            })
            .collect()
    }

    fn window<P: ObservationPair>(&self, pairs: Vec<P>) -> Vec<(P, f64)> {
        let mut group_of: HashMap<*const Observation, usize> = HashMap::new();
        let mut kept: Vec<(usize, P, f64)> = pairs
            .into_iter()
            .filter_map(|pair| {
                let delta = time_delta_hours(pair.primary(), pair.secondary());
                if delta > self.max_window_hours {
                    trace!(
                        "{} -> {}: {delta:.2} h is outside the window",
                        pair.primary().source_id(),
                        pair.secondary().source_id()
                    );
                    return None;
                }
                if pair.secondary().time_start() < pair.primary().time_start() {
                    trace!(
                        "{} was observed {delta:.2} h before {}",
                        pair.secondary().source_id(),
                        pair.primary().source_id()
                    );
                }
                let next_group = group_of.len();
                let group = *group_of
                    .entry(Arc::as_ptr(pair.primary()))
                    .or_insert(next_group);
                Some((group, pair, delta))
            })
            .collect();

        kept.sort_by(|(group_a, a, delta_a), (group_b, b, delta_b)| {
            group_a
                .cmp(group_b)
                .then(delta_a.total_cmp(delta_b))
                .then(a.separation_arcsec().total_cmp(&b.separation_arcsec()))
                .then_with(|| a.secondary().source_id().cmp(b.secondary().source_id()))
        });
        kept.into_iter().map(|(_, pair, delta)| (pair, delta)).collect()
    }
}
