//! Plausibility gate in front of the Kalman filter.
//!
//! Rules run in a fixed order and the first failing rule decides the reason.
//! Accuracy and freshness rules are absolute. The kinematic rules (implied
//! speed, implied acceleration, statistical deviation) compare against the
//! history of accepted fixes, so a long run of kinematic rejections means the
//! history itself is stale and gets rebuilt from the next fix.

use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};

use crate::smoothing::RollingWindow;
use crate::types::RawFix;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Reject fixes whose horizontal accuracy is worse than this (m)
    pub max_horizontal_accuracy: f64,
    /// Reject fixes older than this relative to `now` (s)
    pub max_fix_age: f64,
    /// Fixes closer than this to the last accepted one are duplicates (s)
    pub min_fix_interval: f64,
    pub max_implied_speed: f64,
    pub max_implied_acceleration: f64,
    pub stats_window: usize,
    pub min_stats_samples: usize,
    pub sigma_threshold: f64,
    pub speed_history: usize,
    pub max_consecutive_rejections: u32,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            max_horizontal_accuracy: 30.0,
            max_fix_age: 10.0,
            min_fix_interval: 0.1,
            max_implied_speed: 15.0,
            max_implied_acceleration: 8.0,
            stats_window: 10,
            min_stats_samples: 5,
            sigma_threshold: 3.0,
            speed_history: 3,
            max_consecutive_rejections: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    Accuracy,
    Stale,
    Duplicate,
    ImpliedSpeed,
    ImpliedAcceleration,
    Statistical,
}

impl RejectReason {
    pub fn is_kinematic(self) -> bool {
        matches!(
            self,
            RejectReason::ImpliedSpeed
                | RejectReason::ImpliedAcceleration
                | RejectReason::Statistical
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_accepted(self) -> bool {
        self == Verdict::Accepted
    }
}

/// Counters per rejection reason, reported in session snapshots
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub accuracy: u64,
    pub stale: u64,
    pub duplicate: u64,
    pub implied_speed: u64,
    pub implied_acceleration: u64,
    pub statistical: u64,
    /// Kinematic rejections overridden by the history rebuild
    pub history_resets: u64,
}

impl RejectionCounts {
    pub fn record(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::Accuracy => self.accuracy += 1,
            RejectReason::Stale => self.stale += 1,
            RejectReason::Duplicate => self.duplicate += 1,
            RejectReason::ImpliedSpeed => self.implied_speed += 1,
            RejectReason::ImpliedAcceleration => self.implied_acceleration += 1,
            RejectReason::Statistical => self.statistical += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.accuracy
            + self.stale
            + self.duplicate
            + self.implied_speed
            + self.implied_acceleration
            + self.statistical
    }
}

pub struct OutlierDetector {
    config: OutlierConfig,
    last_accepted: Option<RawFix>,
    recent_speeds: RollingWindow,
    speed_stats: RollingWindow,
    consecutive_rejections: u32,
    counts: RejectionCounts,
}

impl OutlierDetector {
    pub fn new(config: OutlierConfig) -> Self {
        let recent_speeds = RollingWindow::new(config.speed_history);
        let speed_stats = RollingWindow::new(config.stats_window);
        Self {
            config,
            last_accepted: None,
            recent_speeds,
            speed_stats,
            consecutive_rejections: 0,
            counts: RejectionCounts::default(),
        }
    }

    /// Validate `fix` at wall-clock time `now`. Accepted fixes become the new reference.
    pub fn validate(&mut self, fix: &RawFix, now: f64) -> Verdict {
        if let Some(reason) = self.check_absolute(fix, now) {
            self.counts.record(reason);
            return Verdict::Rejected(reason);
        }

        let implied_speed = match &self.last_accepted {
            Some(last) => {
                let dt = fix.timestamp - last.timestamp;
                if dt < self.config.min_fix_interval {
                    self.counts.record(RejectReason::Duplicate);
                    return Verdict::Rejected(RejectReason::Duplicate);
                }
                Some((implied_distance(last, fix) / dt, dt))
            }
            None => None,
        };

        if let Some((speed, dt)) = implied_speed {
            if let Some(reason) = self.check_kinematics(speed, dt) {
                self.consecutive_rejections += 1;
                if self.consecutive_rejections > self.config.max_consecutive_rejections {
                    log::info!(
                        "outlier: {} consecutive kinematic rejections, rebuilding history",
                        self.consecutive_rejections
                    );
                    self.counts.history_resets += 1;
                    self.recent_speeds.clear();
                    self.speed_stats.clear();
                    self.consecutive_rejections = 0;
                    self.last_accepted = Some(fix.clone());
                    return Verdict::Accepted;
                }
                self.counts.record(reason);
                log::debug!(
                    "outlier: rejected fix at {:.3} ({:?}, {:.2} m/s)",
                    fix.timestamp,
                    reason,
                    speed
                );
                return Verdict::Rejected(reason);
            }
            self.recent_speeds.push(speed);
            self.speed_stats.push(speed);
        }

        self.consecutive_rejections = 0;
        self.last_accepted = Some(fix.clone());
        Verdict::Accepted
    }

    fn check_absolute(&self, fix: &RawFix, now: f64) -> Option<RejectReason> {
        let acc = fix.horizontal_accuracy;
        if !acc.is_finite() || acc < 0.0 || acc > self.config.max_horizontal_accuracy {
            return Some(RejectReason::Accuracy);
        }
        if !fix.latitude.is_finite() || !fix.longitude.is_finite() {
            return Some(RejectReason::Accuracy);
        }
        if now - fix.timestamp > self.config.max_fix_age {
            return Some(RejectReason::Stale);
        }
        None
    }

    fn check_kinematics(&self, speed: f64, dt: f64) -> Option<RejectReason> {
        if speed > self.config.max_implied_speed {
            return Some(RejectReason::ImpliedSpeed);
        }

        if let Some(prev) = self.recent_speeds.last() {
            if (speed - prev).abs() / dt > self.config.max_implied_acceleration {
                return Some(RejectReason::ImpliedAcceleration);
            }
        }

        if self.speed_stats.len() >= self.config.min_stats_samples {
            if let (Some(mean), Some(std)) = (self.speed_stats.mean(), self.speed_stats.std_dev()) {
                if std > 1e-6 && (speed - mean).abs() > self.config.sigma_threshold * std {
                    return Some(RejectReason::Statistical);
                }
            }
        }

        None
    }

    pub fn last_accepted(&self) -> Option<&RawFix> {
        self.last_accepted.as_ref()
    }

    pub fn counts(&self) -> &RejectionCounts {
        &self.counts
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
        self.recent_speeds.clear();
        self.speed_stats.clear();
        self.consecutive_rejections = 0;
        self.counts = RejectionCounts::default();
    }
}

/// Great-circle distance between two fixes (m)
pub fn implied_distance(a: &RawFix, b: &RawFix) -> f64 {
    let pa = Point::new(a.longitude, a.latitude);
    let pb = Point::new(b.longitude, b.latitude);
    pa.haversine_distance(&pb)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAT: f64 = 47.6062;
    const LON: f64 = -122.3321;
    // ~1.11 m of latitude
    const DLAT_1M: f64 = 1.0 / 111_132.0;

    fn fix_at(t: f64, north_m: f64) -> RawFix {
        RawFix::new(t, LAT + north_m * DLAT_1M, LON, 5.0)
    }

    #[test]
    fn test_accuracy_rule() {
        let mut d = OutlierDetector::new(OutlierConfig::default());
        let mut f = fix_at(0.0, 0.0);
        f.horizontal_accuracy = 31.0;
        assert_eq!(d.validate(&f, 0.0), Verdict::Rejected(RejectReason::Accuracy));
        f.horizontal_accuracy = -1.0;
        assert_eq!(d.validate(&f, 0.0), Verdict::Rejected(RejectReason::Accuracy));
        f.horizontal_accuracy = 30.0;
        assert!(d.validate(&f, 0.0).is_accepted());
    }

    #[test]
    fn test_stale_and_duplicate() {
        let mut d = OutlierDetector::new(OutlierConfig::default());
        assert_eq!(
            d.validate(&fix_at(0.0, 0.0), 10.5),
            Verdict::Rejected(RejectReason::Stale)
        );
        assert!(d.validate(&fix_at(10.0, 0.0), 10.0).is_accepted());
        assert_eq!(
            d.validate(&fix_at(10.05, 0.1), 10.05),
            Verdict::Rejected(RejectReason::Duplicate)
        );
        assert_eq!(
            d.validate(&fix_at(9.0, 0.1), 10.1),
            Verdict::Rejected(RejectReason::Duplicate)
        );
        assert_eq!(d.counts().duplicate, 2);
    }

    #[test]
    fn test_implied_speed_rejected() {
        let mut d = OutlierDetector::new(OutlierConfig::default());
        assert!(d.validate(&fix_at(0.0, 0.0), 0.0).is_accepted());
        assert!(d.validate(&fix_at(1.0, 3.0), 1.0).is_accepted());
        assert_eq!(
            d.validate(&fix_at(2.0, 3.0 + 40.0), 2.0),
            Verdict::Rejected(RejectReason::ImpliedSpeed)
        );
        // Reference stays on the last accepted fix
        assert_eq!(d.last_accepted().unwrap().timestamp, 1.0);
    }

    #[test]
    fn test_implied_acceleration_rejected() {
        let mut d = OutlierDetector::new(OutlierConfig::default());
        assert!(d.validate(&fix_at(0.0, 0.0), 0.0).is_accepted());
        assert!(d.validate(&fix_at(1.0, 1.0), 1.0).is_accepted());
        // 1 m/s -> 12 m/s in one second
        assert_eq!(
            d.validate(&fix_at(2.0, 13.0), 2.0),
            Verdict::Rejected(RejectReason::ImpliedAcceleration)
        );
    }

    #[test]
    fn test_statistical_rejection_after_min_samples() {
        let mut d = OutlierDetector::new(OutlierConfig::default());
        let speeds = [3.0, 3.2, 2.9, 3.1, 3.0, 2.8];
        let mut north = 0.0;
        let mut t = 0.0;
        assert!(d.validate(&fix_at(t, north), t).is_accepted());
        for s in speeds {
            t += 1.0;
            north += s;
            assert!(d.validate(&fix_at(t, north), t).is_accepted());
        }
        // 9 m/s: within the acceleration limit at dt = 1 s but far outside 3 sigma
        t += 1.0;
        assert_eq!(
            d.validate(&fix_at(t, north + 9.0), t),
            Verdict::Rejected(RejectReason::Statistical)
        );
    }

    #[test]
    fn test_history_rebuilt_after_consecutive_rejections() {
        let mut d = OutlierDetector::new(OutlierConfig::default());
        assert!(d.validate(&fix_at(0.0, 0.0), 0.0).is_accepted());
        // Receiver jumped 500 m and stays there
        for k in 1..=3 {
            let t = k as f64;
            assert!(!d.validate(&fix_at(t, 500.0), t).is_accepted());
        }
        assert!(d.validate(&fix_at(4.0, 500.0), 4.0).is_accepted());
        assert_eq!(d.counts().history_resets, 1);
        assert!(d.validate(&fix_at(5.0, 502.0), 5.0).is_accepted());
    }

    #[test]
    fn test_reset_clears_reference() {
        let mut d = OutlierDetector::new(OutlierConfig::default());
        assert!(d.validate(&fix_at(0.0, 0.0), 0.0).is_accepted());
        d.reset();
        assert!(d.last_accepted().is_none());
        // Far jump accepted as a fresh first fix
        assert!(d.validate(&fix_at(1.0, 5000.0), 1.0).is_accepted());
    }
}
