use std::time::Duration as StdDuration;

use approx::assert_abs_diff_eq;
use hifitime::{Duration, Epoch};

use burstmatch::{
    angular_separation_arcsec, BackgroundLevel, CalibrationStatus, ConfigError,
    CorrelationConfig, FlagReason, Instrument, MatchQuality, Pipeline, PipelineError,
    PipelineState, Quality, RawObservation, RecordIssue,
};

fn t0() -> Epoch {
    Epoch::from_gregorian_utc_at_midnight(2005, 7, 24)
}

fn hours(h: f64) -> Duration {
    Duration::from_seconds(h * 3600.0)
}

fn record(id: &str, instrument: Instrument, ra: f64, dec: f64, start: Epoch) -> RawObservation {
    RawObservation {
        source_id: id.to_string(),
        instrument,
        ra_deg: ra,
        dec_deg: dec,
        time_start: start,
        time_end: start + Duration::from_seconds(300.0),
        flux: None,
        flux_error: None,
        quality: Quality {
            signal_to_noise: 8.0,
            background_level: BackgroundLevel::Low,
            calibration_status: CalibrationStatus::Calibrated,
        },
        energy_band: None,
        target: None,
    }
}

fn bat(id: &str, ra: f64, dec: f64, start: Epoch) -> RawObservation {
    record(id, Instrument::detector("BAT"), ra, dec, start)
}

fn xrt(id: &str, ra: f64, dec: f64, start: Epoch) -> RawObservation {
    record(id, Instrument::follow_up("XRT"), ra, dec, start)
}

fn with_flux(mut r: RawObservation, flux: f64, target: &str) -> RawObservation {
    r.flux = Some(flux);
    r.flux_error = Some(0.05 * flux);
    r.target = Some(target.to_string());
    r
}

fn pipeline() -> Pipeline {
    Pipeline::new(CorrelationConfig::default()).unwrap()
}

#[test]
fn close_follow_up_a_day_later_gives_one_high_quality_match() {
    let out = pipeline()
        .run(vec![
            ("bat", vec![bat("A", 16.0, -72.4, t0())]),
            ("xrt", vec![xrt("B", 16.00005, -72.4001, t0() + hours(24.0))]),
        ])
        .unwrap();

    assert_eq!(out.matches.len(), 1);
    let m = &out.matches[0];
    assert_eq!(m.primary.source_id(), "A");
    assert_eq!(m.secondary.source_id(), "B");
    assert_eq!(m.match_quality, MatchQuality::High);
    assert!(m.angular_separation_arcsec < 0.5);
    assert_abs_diff_eq!(m.time_delta_hours, 24.0, epsilon = 1e-9);
    assert_eq!(m.flux_correlation, None);
}

#[test]
fn follow_up_many_arcseconds_away_gives_no_match() {
    let b = xrt("B", 16.01, -72.4001, t0() + hours(24.0));
    let sep = angular_separation_arcsec(
        burstmatch::SkyPosition {
            ra_deg: 16.0,
            dec_deg: -72.4,
        },
        burstmatch::SkyPosition {
            ra_deg: b.ra_deg,
            dec_deg: b.dec_deg,
        },
    );
    assert!(sep > 1.0);

    let out = pipeline()
        .run(vec![("bat", vec![bat("A", 16.0, -72.4, t0())]), ("xrt", vec![b])])
        .unwrap();
    assert!(out.matches.is_empty());
    assert_eq!(out.report.position_matches, 0);
}

#[test]
fn correlated_fluxes_are_tagged() {
    let target = "GRB050724";
    let primaries = vec![
        with_flux(bat("A1", 16.0, -72.4, t0()), 1.0, target),
        with_flux(bat("A2", 16.0, -72.4, t0() + hours(48.0)), 2.0, target),
        with_flux(bat("A3", 16.0, -72.4, t0() + hours(96.0)), 3.0, target),
    ];
    let secondaries = vec![
        with_flux(xrt("B1", 16.0, -72.4, t0() + hours(1.0)), 1.1, target),
        with_flux(xrt("B2", 16.0, -72.4, t0() + hours(49.0)), 2.3, target),
        with_flux(xrt("B3", 16.0, -72.4, t0() + hours(97.0)), 2.9, target),
    ];
    // A short window keeps the pairing one-to-one.
    let config = CorrelationConfig {
        max_window_hours: 12.0,
        ..Default::default()
    };
    let out = Pipeline::new(config)
        .unwrap()
        .run(vec![("bat", primaries), ("xrt", secondaries)])
        .unwrap();

    assert_eq!(out.matches.len(), 3);
    let summary = &out.correlations[&Some(target.to_string())];
    let r = summary.coefficient.unwrap();
    assert!(r >= 0.5);
    assert!(summary.correlated_variability);
    assert_eq!(summary.usable_pairs, 3);
    assert!(out.matches.iter().all(|m| m.flux_correlation == Some(r)));

    // Every flux measurement of the target ends up in its light curve.
    let lc = &out.light_curves[target];
    let ids: Vec<_> = lc.points().iter().map(|p| p.source_id.as_str()).collect();
    assert_eq!(ids, ["A1", "B1", "A2", "B2", "A3", "B3"]);
    assert_eq!(lc.gaps().len(), 2);
}

#[test]
fn single_flux_pair_has_no_correlation() {
    let target = "GRB050709";
    let out = pipeline()
        .run(vec![
            ("bat", vec![with_flux(bat("A", 10.0, 10.0, t0()), 4.0, target)]),
            (
                "xrt",
                vec![with_flux(xrt("B", 10.0, 10.0, t0() + hours(2.0)), 1.0, target)],
            ),
        ])
        .unwrap();

    assert_eq!(out.matches.len(), 1);
    assert_eq!(out.matches[0].flux_correlation, None);
    let summary = &out.correlations[&Some(target.to_string())];
    assert_eq!(summary.coefficient, None);
    assert!(!summary.correlated_variability);
}

#[test]
fn background_mismatch_raises_exactly_one_flag() {
    let mut noisy = bat("A", 200.0, 30.0, t0());
    noisy.quality.background_level = BackgroundLevel::High;
    let clean = xrt("B", 200.0, 30.0, t0() + hours(3.0));
    let other_a = bat("C", 100.0, -10.0, t0());
    let other_b = xrt("D", 100.0, -10.0, t0() + hours(3.0));

    let out = pipeline()
        .run(vec![("bat", vec![noisy, other_a]), ("xrt", vec![clean, other_b])])
        .unwrap();

    assert_eq!(out.matches.len(), 2);
    assert_eq!(out.flags.len(), 1);
    let flag = &out.flags[0];
    assert_eq!(flag.reason, FlagReason::BackgroundAsymmetry);
    assert_eq!(out.matches[flag.match_index].primary.source_id(), "A");
    assert_eq!(flag.secondary_id, "B");
}

#[test]
fn bad_records_are_reported_and_the_rest_still_match() {
    let mut backwards = xrt("bad-time", 16.0, -72.4, t0() + hours(5.0));
    backwards.time_end = t0();
    let mut nan_flux = xrt("bad-flux", 16.0, -72.4, t0());
    nan_flux.flux = Some(f64::NAN);

    let out = pipeline()
        .run(vec![
            (
                "bat",
                vec![bat("A", 16.0, -72.4, t0()), bat("bad-dec", 16.0, -91.0, t0())],
            ),
            (
                "xrt",
                vec![backwards, xrt("B", 16.0, -72.4, t0() + hours(1.0)), nan_flux],
            ),
        ])
        .unwrap();

    assert_eq!(out.matches.len(), 1);
    assert_eq!(out.report.observations_loaded, 2);
    let rejected: Vec<_> = out
        .report
        .rejected
        .iter()
        .map(|e| (e.catalog.as_str(), e.source_id.as_str()))
        .collect();
    assert_eq!(
        rejected,
        [("bat", "bad-dec"), ("xrt", "bad-time"), ("xrt", "bad-flux")]
    );
    assert_eq!(out.report.rejected[0].issue, RecordIssue::Declination(-91.0));
    assert_eq!(out.report.states, PipelineState::ALL);
}

#[test]
fn no_output_exceeds_the_configured_bounds() {
    let config = CorrelationConfig {
        max_separation_arcsec: 2.0,
        high_quality_separation_arcsec: 0.5,
        max_window_hours: 30.0,
        ..Default::default()
    };
    let mut primaries = vec![];
    let mut secondaries = vec![];
    for i in 0..20 {
        let ra = 50.0 + i as f64 * 0.01;
        primaries.push(bat(&format!("A{i}"), ra, 0.0, t0() + hours(i as f64)));
        for j in 0..6 {
            secondaries.push(xrt(
                &format!("B{i}-{j}"),
                ra,
                j as f64 * 0.4 / 3600.0,
                t0() + hours(i as f64 + 8.0 * j as f64),
            ));
        }
    }

    let out = Pipeline::new(config)
        .unwrap()
        .run(vec![("bat", primaries), ("xrt", secondaries)])
        .unwrap();

    assert!(!out.matches.is_empty());
    assert!(out.report.outside_time_window > 0);
    for m in &out.matches {
        assert!(m.angular_separation_arcsec <= 2.0);
        assert!(m.time_delta_hours <= 30.0);
    }
    // Within each primary, follow-ups come nearest in time first.
    for pair in out.matches.windows(2) {
        if pair[0].primary.source_id() == pair[1].primary.source_id() {
            assert!(pair[0].time_delta_hours <= pair[1].time_delta_hours);
        }
    }
}

#[test]
fn three_catalogs_are_matched_pairwise() {
    let uvot = record("C", Instrument::follow_up("UVOT"), 16.0, -72.4, t0() + hours(2.0));
    let out = pipeline()
        .run(vec![
            ("bat", vec![bat("A", 16.0, -72.4, t0())]),
            ("xrt", vec![xrt("B", 16.0, -72.4, t0() + hours(1.0))]),
            ("uvot", vec![uvot]),
        ])
        .unwrap();

    let pairs: Vec<_> = out
        .matches
        .iter()
        .map(|m| (m.primary.source_id(), m.secondary.source_id()))
        .collect();
    assert_eq!(pairs, [("A", "B"), ("A", "C"), ("B", "C")]);
}

#[test]
fn matches_stay_grouped_by_catalog_pair() {
    let uvot = |id: &str, ra: f64, dec: f64| {
        record(id, Instrument::follow_up("UVOT"), ra, dec, t0() + hours(1.0))
    };
    let out = pipeline()
        .run(vec![
            (
                "bat",
                vec![bat("A1", 16.0, -72.4, t0()), bat("A2", 120.0, 10.0, t0())],
            ),
            (
                "xrt",
                vec![
                    xrt("B1", 16.0, -72.4, t0() + hours(5.0)),
                    xrt("B2", 120.0, 10.0, t0() + hours(5.0)),
                ],
            ),
            ("uvot", vec![uvot("C1", 16.0, -72.4), uvot("C2", 120.0, 10.0)]),
        ])
        .unwrap();

    let pairs: Vec<String> = out
        .matches
        .iter()
        .map(|m| format!("{}-{}", m.primary.source_id(), m.secondary.source_id()))
        .collect();
    assert_eq!(pairs, ["A1-B1", "A2-B2", "A1-C1", "A2-C2", "B1-C1", "B2-C2"]);
}

#[test]
fn rerunning_gives_identical_light_curves() {
    let target = "GRB050724";
    let catalogs = || {
        vec![
            (
                "bat",
                vec![
                    with_flux(bat("A1", 16.0, -72.4, t0()), 9.0, target),
                    with_flux(bat("A2", 16.0, -72.4, t0() + hours(30.0)), 3.0, target),
                ],
            ),
            (
                "xrt",
                vec![
                    with_flux(xrt("B1", 16.0, -72.4, t0() + hours(30.0)), 1.0, target),
                    with_flux(xrt("B2", 16.0, -72.4, t0() + hours(2.0)), 2.0, target),
                ],
            ),
        ]
    };

    let first = pipeline().run(catalogs()).unwrap();
    let second = pipeline().run(catalogs()).unwrap();
    assert_eq!(first.light_curves, second.light_curves);
    assert_eq!(first.matches, second.matches);

    let lc = &first.light_curves[target];
    assert_eq!(lc.len(), 4);
    // A2 and B1 share a timestamp; BAT sorts before XRT.
    assert_eq!(lc.points()[2].source_id, "A2");
    assert_eq!(lc.points()[3].source_id, "B1");
}

#[test]
fn invalid_configuration_is_fatal() {
    let err = Pipeline::new(CorrelationConfig {
        max_window_hours: 0.0,
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::NotPositive {
            field: "max_window_hours",
            ..
        }
    ));
}

#[test]
fn bounded_wait_returns_the_result_or_times_out() {
    let catalogs = || {
        vec![
            ("bat".to_string(), vec![bat("A", 16.0, -72.4, t0())]),
            ("xrt".to_string(), vec![xrt("B", 16.0, -72.4, t0() + hours(1.0))]),
        ]
    };
    let out = pipeline()
        .run_with_timeout(catalogs(), StdDuration::from_secs(60))
        .unwrap();
    assert_eq!(out.matches.len(), 1);

    let big: Vec<RawObservation> = (0..5000)
        .map(|i| bat(&format!("A{i}"), (i as f64 * 0.07) % 360.0, 0.0, t0()))
        .collect();
    let result = pipeline().run_with_timeout(
        vec![("a".to_string(), big.clone()), ("b".to_string(), big)],
        StdDuration::from_nanos(1),
    );
    assert!(matches!(result, Err(PipelineError::TimedOut(_))));
}
