//! Cross-checks of data-quality indicators between matched observations.

use log::debug;

use crate::{
    config::CorrelationConfig, BackgroundLevel, CalibrationStatus, CrossMatch, Observation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlagReason {
    /// One side was observed against a low background, the other a high one.
    BackgroundAsymmetry,

    /// One side is a strong detection, the other barely a detection at all.
    SignalToNoiseAsymmetry,

    /// The two sides are at different calibration stages.
    CalibrationMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Critical,
}

/// Advisory only: a flagged match stays in the output unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityFlag {
    /// Index of the flagged match in the list that was validated.
    pub match_index: usize,
    pub primary_id: String,
    pub secondary_id: String,
    pub reason: FlagReason,
    pub severity: Severity,
}

#[derive(Debug, Clone)]
pub struct QualityValidator {
    high_snr_threshold: f64,
    low_snr_threshold: f64,
}

impl QualityValidator {
    pub fn new(config: &CorrelationConfig) -> Self {
        Self {
            high_snr_threshold: config.high_snr_threshold,
            low_snr_threshold: config.low_snr_threshold,
        }
    }

    /// At most one flag per reason per match, ordered by match index.
    pub fn validate(&self, matches: &[CrossMatch]) -> Vec<QualityFlag> {
        let flags: Vec<QualityFlag> = matches
            .iter()
            .enumerate()
            .flat_map(|(match_index, m)| {
                self.check(&m.primary, &m.secondary)
                    .into_iter()
                    .map(move |(reason, severity)| QualityFlag {
                        match_index,
                        primary_id: m.primary.source_id().to_string(),
                        secondary_id: m.secondary.source_id().to_string(),
                        reason,
                        severity,
                    })
            })
            .collect();
        debug!("{} quality flags over {} matches", flags.len(), matches.len());
        flags
    }

    fn check(&self, a: &Observation, b: &Observation) -> Vec<(FlagReason, Severity)> {
        let (qa, qb) = (a.quality(), b.quality());
        let mut found = vec![];

        use BackgroundLevel::{High, Low};
        if matches!(
            (qa.background_level, qb.background_level),
            (Low, High) | (High, Low)
        ) {
            found.push((FlagReason::BackgroundAsymmetry, Severity::Warning));
        }

        let strong = |snr: f64| snr >= self.high_snr_threshold;
        let weak = |snr: f64| snr < self.low_snr_threshold;
        let (snr_a, snr_b) = (qa.signal_to_noise, qb.signal_to_noise);
        if (strong(snr_a) && weak(snr_b)) || (weak(snr_a) && strong(snr_b)) {
            found.push((FlagReason::SignalToNoiseAsymmetry, Severity::Warning));
        }

        if qa.calibration_status != qb.calibration_status {
            let severity = if qa.calibration_status == CalibrationStatus::Uncalibrated
                || qb.calibration_status == CalibrationStatus::Uncalibrated
            {
                Severity::Critical
            } else {
                Severity::Warning
            };
            found.push((FlagReason::CalibrationMismatch, severity));
        }

        found
    }
}
