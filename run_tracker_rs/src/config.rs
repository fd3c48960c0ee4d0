use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::filters::{KalmanConfig, OutlierConfig};
use crate::power::PowerConfig;
use crate::sensor_fusion::FusionConfig;
use crate::session::SessionConfig;
use crate::stationary::StationaryConfig;

/// All tunables, grouped per component. Missing keys in a JSON file keep their defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub outlier: OutlierConfig,
    pub kalman: KalmanConfig,
    pub stationary: StationaryConfig,
    pub fusion: FusionConfig,
    pub power: PowerConfig,
    pub session: SessionConfig,
}

impl TrackerConfig {
    pub fn from_json_str(json: &str) -> TrackerResult<Self> {
        let config: TrackerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> TrackerResult<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> TrackerResult<()> {
        let o = &self.outlier;
        if o.min_stats_samples > o.stats_window {
            return Err(TrackerError::Config(format!(
                "outlier.min_stats_samples ({}) exceeds outlier.stats_window ({})",
                o.min_stats_samples, o.stats_window
            )));
        }
        let st = &self.stationary;
        if st.stationary_speed >= st.moving_speed {
            return Err(TrackerError::Config(
                "stationary.stationary_speed must be below stationary.moving_speed".to_string(),
            ));
        }
        if st.consecutive_samples == 0 {
            return Err(TrackerError::Config(
                "stationary.consecutive_samples must be at least 1".to_string(),
            ));
        }
        let k = &self.kalman;
        if k.min_dynamic_coefficient > k.max_dynamic_coefficient {
            return Err(TrackerError::Config(
                "kalman dynamic coefficient bounds are inverted".to_string(),
            ));
        }
        let f = &self.fusion;
        if f.min_stride > f.max_stride {
            return Err(TrackerError::Config("fusion stride bounds are inverted".to_string()));
        }
        if !(0.0..=1.0).contains(&f.pressure_smoothing_alpha) {
            return Err(TrackerError::Config(
                "fusion.pressure_smoothing_alpha must be within [0, 1]".to_string(),
            ));
        }
        let s = &self.session;
        if !(s.tick_interval_secs.is_finite() && s.tick_interval_secs > 0.0) {
            return Err(TrackerError::Config(
                "session.tick_interval_secs must be a positive number of seconds".to_string(),
            ));
        }
        if s.command_queue_capacity == 0 {
            return Err(TrackerError::Config(
                "session.command_queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        TrackerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = TrackerConfig::from_json_str(
            r#"{ "outlier": { "max_implied_speed": 12.0 }, "power": { "low_power_after_secs": 5 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.outlier.max_implied_speed, 12.0);
        assert_eq!(cfg.outlier.max_horizontal_accuracy, 30.0);
        assert_eq!(cfg.power.low_power_after_secs, 5.0);
        assert_eq!(cfg.session.lock_accuracy, 20.0);
    }

    #[test]
    fn test_inverted_hysteresis_rejected() {
        let err = TrackerConfig::from_json_str(
            r#"{ "stationary": { "stationary_speed": 1.0, "moving_speed": 0.5 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, TrackerError::Config(_)));
    }

    #[test]
    fn test_bad_json_is_json_error() {
        let err = TrackerConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, TrackerError::Json(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = TrackerConfig::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, TrackerError::Io(_)));
    }

    #[test]
    fn test_tick_interval_must_be_finite_and_positive() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let mut cfg = TrackerConfig::default();
            cfg.session.tick_interval_secs = bad;
            assert!(matches!(cfg.validate(), Err(TrackerError::Config(_))), "{bad}");
        }
        let err = TrackerConfig::from_json_str(r#"{ "session": { "tick_interval_secs": 1e400 } }"#);
        assert!(err.is_err());
    }
}
