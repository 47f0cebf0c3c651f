//! Positional cross-matching on the celestial sphere.

use std::{collections::HashMap, sync::Arc};

use log::{debug, trace};
use rayon::prelude::*;

use super::{MatchQuality, PositionMatch};
use crate::{config::CorrelationConfig, Observation, SkyPosition};

const ARCSEC_PER_DEG: f64 = 3600.0;

/// Slack added to zone and RA bounds so that rounding can never push a true
/// match outside the searched region.
const SEARCH_SLACK_DEG: f64 = 1e-9;

/// Great-circle distance between two sky positions \[arcsec\], using the
/// haversine form (well behaved at sub-arcsecond separations, where the
/// spherical law of cosines loses all its precision).
///
/// The result is exactly the same whichever way round the positions are
/// given, and exactly zero for identical positions.
pub fn angular_separation_arcsec(a: SkyPosition, b: SkyPosition) -> f64 {
    let dec_a = a.dec_deg.to_radians();
    let dec_b = b.dec_deg.to_radians();
    let d_dec = (a.dec_deg - b.dec_deg).abs().to_radians();
    let d_ra = (a.ra_deg - b.ra_deg).abs().to_radians();

    let hav = (d_dec / 2.0).sin().powi(2) + dec_a.cos() * dec_b.cos() * (d_ra / 2.0).sin().powi(2);
    let sep_rad = 2.0 * hav.clamp(0.0, 1.0).sqrt().asin();
    sep_rad.to_degrees() * ARCSEC_PER_DEG
}

#[derive(Debug, Clone)]
pub struct PositionMatcher {
    max_separation_arcsec: f64,
    high_quality_separation_arcsec: f64,
}

impl PositionMatcher {
    pub fn new(config: &CorrelationConfig) -> Self {
        Self {
            max_separation_arcsec: config.max_separation_arcsec,
            high_quality_separation_arcsec: config.high_quality_separation_arcsec,
        }
    }

    /// `None` means the pair is too far apart to be a match at all.
    pub fn classify(&self, separation_arcsec: f64) -> Option<MatchQuality> {
        if separation_arcsec < self.high_quality_separation_arcsec {
            Some(MatchQuality::High)
        } else if separation_arcsec <= self.max_separation_arcsec {
            Some(MatchQuality::Medium)
        } else {
            None
        }
    }

    /// Find every (primary, secondary) pair within the separation cutoff.
    ///
    /// The secondaries are binned into declination zones one cutoff high, and
    /// each zone is sorted by RA, so a primary only has to look at a thin RA
    /// slice of at most three zones. Primaries are processed in parallel.
    ///
    /// The output is ordered by primary index, then separation, then
    /// secondary index, and is identical to [`Self::match_naive`].
    pub fn match_catalogs(
        &self,
        primaries: &[Arc<Observation>],
        secondaries: &[Arc<Observation>],
    ) -> Vec<PositionMatch> {
        let radius_deg = self.max_separation_arcsec / ARCSEC_PER_DEG;
        let index = ZoneIndex::new(secondaries, radius_deg);
        debug!(
            "Zone index: {} secondaries in {} zones of {:.3e} deg",
            secondaries.len(),
            index.zones.len(),
            radius_deg
        );

        let per_primary: Vec<Vec<PositionMatch>> = primaries
            .par_iter()
            .map(|primary| {
                let candidates = index.candidates(primary.position(), radius_deg);
                self.matches_for(primary, candidates.into_iter(), secondaries)
            })
            .collect();
        let matches: Vec<PositionMatch> = per_primary.into_iter().flatten().collect();

        debug!(
            "{} position matches between {} primaries and {} secondaries",
            matches.len(),
            primaries.len(),
            secondaries.len()
        );
        matches
    }

    /// The brute-force all-pairs version of [`Self::match_catalogs`].
    pub fn match_naive(
        &self,
        primaries: &[Arc<Observation>],
        secondaries: &[Arc<Observation>],
    ) -> Vec<PositionMatch> {
        primaries
            .iter()
            .flat_map(|primary| self.matches_for(primary, 0..secondaries.len(), secondaries))
            .collect()
    }

    fn matches_for<I: Iterator<Item = usize>>(
        &self,
        primary: &Arc<Observation>,
        candidates: I,
        secondaries: &[Arc<Observation>],
    ) -> Vec<PositionMatch> {
        let mut found: Vec<(usize, f64, MatchQuality)> = candidates
            .filter_map(|i| {
                let sep = angular_separation_arcsec(primary.position(), secondaries[i].position());
                self.classify(sep).map(|quality| (i, sep, quality))
            })
            .collect();
        found.sort_unstable_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        found
            .into_iter()
            .map(|(i, sep, match_quality)| {
                trace!(
                    "{} <-> {}: {sep:.4} arcsec ({match_quality:?})",
                    primary.source_id(),
                    secondaries[i].source_id()
                );
                PositionMatch {
                    primary: Arc::clone(primary),
                    secondary: Arc::clone(&secondaries[i]),
                    angular_separation_arcsec: sep,
                    match_quality,
                }
            })
            .collect()
    }
}

/// Declination zones, each holding (RA, catalog index) sorted by RA.
struct ZoneIndex {
    zone_height_deg: f64,
    zones: HashMap<i64, Vec<(f64, usize)>>,
}

impl ZoneIndex {
    fn new(observations: &[Arc<Observation>], zone_height_deg: f64) -> Self {
        let mut zones: HashMap<i64, Vec<(f64, usize)>> = HashMap::new();
        for (i, obs) in observations.iter().enumerate() {
            let zone = zone_of(obs.dec_deg(), zone_height_deg);
            zones.entry(zone).or_default().push((obs.ra_deg(), i));
        }
        for entries in zones.values_mut() {
            entries.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        }

        Self {
            zone_height_deg,
            zones,
        }
    }

    /// Indices of everything that could be within `radius_deg` of `pos`. This
    /// is a superset of the true matches; the caller still has to check the
    /// separation.
    fn candidates(&self, pos: SkyPosition, radius_deg: f64) -> Vec<usize> {
        let low_zone = zone_of(pos.dec_deg - radius_deg - SEARCH_SLACK_DEG, self.zone_height_deg);
        let high_zone = zone_of(pos.dec_deg + radius_deg + SEARCH_SLACK_DEG, self.zone_height_deg);
        let ra_ranges = ra_search_ranges(pos, radius_deg);

        let mut candidates = vec![];
        for zone in low_zone..=high_zone {
            let entries = match self.zones.get(&zone) {
                Some(e) => e,
                None => continue,
            };
            for &(ra_low, ra_high) in &ra_ranges {
                let start = entries.partition_point(|&(ra, _)| ra < ra_low);
                candidates.extend(
                    entries[start..]
                        .iter()
                        .take_while(|&&(ra, _)| ra <= ra_high)
                        .map(|&(_, i)| i),
                );
            }
        }
        candidates
    }
}

fn zone_of(dec_deg: f64, zone_height_deg: f64) -> i64 {
    ((dec_deg + 90.0) / zone_height_deg).floor() as i64
}

/// The RA intervals (in [0, 360]) that a circle of `radius_deg` around `pos`
/// can touch, split in two where the circle crosses RA = 0.
fn ra_search_ranges(pos: SkyPosition, radius_deg: f64) -> Vec<(f64, f64)> {
    let half_width = ra_half_width_deg(pos.dec_deg, radius_deg);
    if half_width >= 180.0 {
        return vec![(0.0, 360.0)];
    }

    let low = pos.ra_deg - half_width;
    let high = pos.ra_deg + half_width;
    match (low < 0.0, high > 360.0) {
        (true, _) => vec![(0.0, high), (low + 360.0, 360.0)],
        (_, true) => vec![(low, 360.0), (0.0, high - 360.0)],
        _ => vec![(low, high)],
    }
}

/// Half the RA extent of a circle of `radius_deg` centred at `dec_deg`, widened
/// a little to absorb rounding. Anything touching a pole gets the full circle.
fn ra_half_width_deg(dec_deg: f64, radius_deg: f64) -> f64 {
    let max_abs_dec = dec_deg.abs() + radius_deg;
    if max_abs_dec >= 90.0 {
        return 180.0;
    }
    let ratio = radius_deg.to_radians().sin() / max_abs_dec.to_radians().cos();
    if ratio >= 1.0 {
        return 180.0;
    }
    match ratio.asin().to_degrees() * 1.01 + SEARCH_SLACK_DEG {
        w if w >= 180.0 => 180.0,
        w => w,
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use hifitime::Epoch;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::observation::tests::raw;

    fn obs(id: &str, ra: f64, dec: f64) -> Arc<Observation> {
        let t = Epoch::from_gregorian_utc_at_midnight(2005, 7, 24);
        Arc::new(Observation::try_from(raw(id, ra, dec, t)).unwrap())
    }

    fn pos(ra_deg: f64, dec_deg: f64) -> SkyPosition {
        SkyPosition { ra_deg, dec_deg }
    }

    #[test]
    fn separation_is_symmetric() {
        let pairs = [
            (pos(16.0, -72.4), pos(16.00005, -72.4001)),
            (pos(359.9999, 0.0), pos(0.0001, 0.0)),
            (pos(123.4, 89.9999), pos(303.4, 89.9999)),
            (pos(0.0, -90.0), pos(180.0, 90.0)),
        ];
        for (a, b) in pairs {
            assert_eq!(angular_separation_arcsec(a, b), angular_separation_arcsec(b, a));
        }
    }

    #[test]
    fn separation_of_identical_positions_is_zero() {
        for p in [pos(0.0, 0.0), pos(16.0, -72.4), pos(359.0, 89.0), pos(12.0, -90.0)] {
            assert_eq!(angular_separation_arcsec(p, p), 0.0);
        }
    }

    #[test]
    fn separation_matches_known_values() {
        // One arcsecond along a meridian.
        assert_abs_diff_eq!(
            angular_separation_arcsec(pos(10.0, 0.0), pos(10.0, 1.0 / 3600.0)),
            1.0,
            epsilon = 1e-6
        );
        // RA offsets shrink with cos(dec).
        assert_abs_diff_eq!(
            angular_separation_arcsec(pos(10.0, 60.0), pos(10.0 + 2.0 / 3600.0, 60.0)),
            1.0,
            epsilon = 1e-4
        );
        // Across RA = 0.
        assert_abs_diff_eq!(
            angular_separation_arcsec(pos(359.9998, 0.0), pos(0.0001, 0.0)),
            1.08,
            epsilon = 1e-4
        );
        // Pole to pole.
        assert_abs_diff_eq!(
            angular_separation_arcsec(pos(0.0, -90.0), pos(0.0, 90.0)),
            180.0 * 3600.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn classification_boundaries() {
        let matcher = PositionMatcher::new(&CorrelationConfig::default());
        assert_eq!(matcher.classify(0.0), Some(MatchQuality::High));
        assert_eq!(matcher.classify(0.4999), Some(MatchQuality::High));
        assert_eq!(matcher.classify(0.5), Some(MatchQuality::Medium));
        assert_eq!(matcher.classify(1.0), Some(MatchQuality::Medium));
        assert_eq!(matcher.classify(1.0001), None);
    }

    #[test]
    fn nearby_pair_matches_and_distant_pair_does_not() {
        let matcher = PositionMatcher::new(&CorrelationConfig::default());
        let primaries = vec![obs("bat", 16.0, -72.4)];
        let secondaries = vec![obs("xrt-near", 16.00005, -72.4001), obs("xrt-far", 16.01, -72.4)];

        let matches = matcher.match_catalogs(&primaries, &secondaries);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].secondary.source_id(), "xrt-near");
        assert_eq!(matches[0].match_quality, MatchQuality::High);
        assert!(matches[0].angular_separation_arcsec < 0.5);
    }

    #[test]
    fn matches_are_one_to_many_and_ordered_by_separation() {
        let matcher = PositionMatcher::new(&CorrelationConfig::default());
        let primaries = vec![obs("p0", 200.0, 10.0), obs("p1", 50.0, -5.0)];
        let secondaries = vec![
            obs("s0", 200.0, 10.0 + 0.8 / 3600.0),
            obs("s1", 50.0, -5.0),
            obs("s2", 200.0, 10.0 + 0.2 / 3600.0),
        ];

        let matches = matcher.match_catalogs(&primaries, &secondaries);
        let ids: Vec<_> = matches
            .iter()
            .map(|m| (m.primary.source_id(), m.secondary.source_id(), m.match_quality))
            .collect();
        assert_eq!(
            ids,
            [
                ("p0", "s2", MatchQuality::High),
                ("p0", "s0", MatchQuality::Medium),
                ("p1", "s1", MatchQuality::High),
            ]
        );
    }

    #[test]
    fn matches_wrap_around_zero_ra_and_near_the_pole() {
        let matcher = PositionMatcher::new(&CorrelationConfig::default());
        let primaries = vec![obs("wrap", 359.99999, 0.0), obs("pole", 0.0, 89.99995)];
        let secondaries = vec![obs("wrap-s", 0.00001, 0.0), obs("pole-s", 180.0, 89.99995)];

        let matches = matcher.match_catalogs(&primaries, &secondaries);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches, matcher.match_naive(&primaries, &secondaries));
    }

    #[test]
    fn zone_index_agrees_with_naive_scan() {
        let mut rng = StdRng::seed_from_u64(20050724);
        let config = CorrelationConfig {
            max_separation_arcsec: 30.0,
            high_quality_separation_arcsec: 5.0,
            ..Default::default()
        };
        let matcher = PositionMatcher::new(&config);

        // Clustered around a handful of centres (some at awkward places) so
        // that plenty of pairs fall within the cutoff.
        let centres = [(0.0, 0.0), (359.999, 45.0), (120.0, -89.99), (250.0, 12.0), (80.0, 89.998)];
        let mut make = |prefix: &str, n: usize| -> Vec<Arc<Observation>> {
            (0..n)
                .map(|i| {
                    let (ra, dec) = centres[i % centres.len()];
                    let ra = (ra + rng.gen_range(-0.02..0.02) + 360.0) % 360.0;
                    let dec: f64 = (dec + rng.gen_range(-0.02..0.02_f64)).clamp(-90.0, 90.0);
                    obs(&format!("{prefix}{i}"), ra, dec)
                })
                .collect()
        };
        let primaries = make("a", 400);
        let secondaries = make("b", 400);

        let fast = matcher.match_catalogs(&primaries, &secondaries);
        let naive = matcher.match_naive(&primaries, &secondaries);
        assert!(!naive.is_empty());
        assert_eq!(fast, naive);
        assert!(fast.iter().all(|m| m.angular_separation_arcsec <= 30.0));
    }

    #[test]
    fn ra_ranges_split_at_zero() {
        let ranges = ra_search_ranges(pos(0.1, 0.0), 0.5);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].0, 0.0);
        assert_eq!(ranges[1].1, 360.0);

        assert_eq!(ra_search_ranges(pos(10.0, 89.9), 0.5), vec![(0.0, 360.0)]);
    }
}
