use crate::error::ConfigError;

/// Thresholds for a correlation run. Validated once by
/// [`crate::pipeline::Pipeline::new`]; nothing downstream re-checks them.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationConfig {
    /// Pairs further apart than this \[arcsec\] never become a match.
    pub max_separation_arcsec: f64,

    /// Separations strictly below this \[arcsec\] are
    /// [`crate::MatchQuality::High`]; the rest, up to the cutoff, are
    /// [`crate::MatchQuality::Medium`].
    pub high_quality_separation_arcsec: f64,

    /// The follow-up window \[hours\]. The default (one week) covers the usual
    /// delay between a wide-field alert and a scheduled narrow-field pointing.
    pub max_window_hours: f64,

    /// Sets with |r| at or above this are tagged as showing correlated
    /// variability.
    pub correlation_threshold: f64,

    /// Consecutive light-curve points further apart than this \[hours\] are
    /// reported as a gap.
    pub gap_threshold_hours: f64,

    /// Signal-to-noise at or above which an observation counts as reliable.
    pub high_snr_threshold: f64,

    /// Signal-to-noise below which an observation counts as unreliable.
    pub low_snr_threshold: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            max_separation_arcsec: 1.0,
            high_quality_separation_arcsec: 0.5,
            max_window_hours: 168.0,
            correlation_threshold: 0.5,
            gap_threshold_hours: 24.0,
            high_snr_threshold: 10.0,
            low_snr_threshold: 3.0,
        }
    }
}

impl CorrelationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("max_separation_arcsec", self.max_separation_arcsec),
            (
                "high_quality_separation_arcsec",
                self.high_quality_separation_arcsec,
            ),
            ("max_window_hours", self.max_window_hours),
            ("correlation_threshold", self.correlation_threshold),
            ("gap_threshold_hours", self.gap_threshold_hours),
            ("high_snr_threshold", self.high_snr_threshold),
            ("low_snr_threshold", self.low_snr_threshold),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite { field, value });
            }
            if value <= 0.0 {
                return Err(ConfigError::NotPositive { field, value });
            }
        }

        if self.high_quality_separation_arcsec > self.max_separation_arcsec {
            return Err(ConfigError::QualityBoundaryAboveCutoff {
                high: self.high_quality_separation_arcsec,
                max: self.max_separation_arcsec,
            });
        }
        if self.correlation_threshold > 1.0 {
            return Err(ConfigError::CorrelationThresholdRange(
                self.correlation_threshold,
            ));
        }
        if self.low_snr_threshold >= self.high_snr_threshold {
            return Err(ConfigError::SnrThresholdOrder {
                low: self.low_snr_threshold,
                high: self.high_snr_threshold,
            });
        }

        Ok(())
    }
}
