//! Hysteretic moving/stationary classifier.
//!
//! Speeds are averaged over a short window and compared against two separate
//! thresholds; a transition needs several consecutive samples past the
//! threshold for the opposite state. While stationary, a burst of large
//! accelerometer spikes also counts as starting to move.
//!
//! A fix without velocity leaves the filtered speed driven by position
//! jitter alone. Such fixes vote with the speed fitted to recent positions,
//! or, until enough positions exist, with the part of the filtered speed
//! that stands out from its uncertainty.

use serde::{Deserialize, Serialize};

use crate::smoothing::{PositionRate, RollingWindow};
use crate::types::{RunningState, GRAVITY};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StationaryConfig {
    pub speed_window: usize,
    /// Average speed below which a sample votes for stationary (m/s)
    pub stationary_speed: f64,
    /// Average speed above which a sample votes for moving (m/s)
    pub moving_speed: f64,
    pub consecutive_samples: u32,
    /// |a| deviation from gravity counted as a motion spike (m/s²)
    pub accel_spike_threshold: f64,
    /// Positions in the least-squares speed fit
    pub position_rate_window: usize,
    pub position_rate_min_samples: usize,
    /// Standard deviations of filtered speed discounted before the fit is ready
    pub uncertainty_margin: f64,
}

impl Default for StationaryConfig {
    fn default() -> Self {
        Self {
            speed_window: 5,
            stationary_speed: 0.3,
            moving_speed: 0.8,
            consecutive_samples: 3,
            accel_spike_threshold: 3.0,
            position_rate_window: 20,
            position_rate_min_samples: 10,
            uncertainty_margin: 1.5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: RunningState,
    /// Time spent in the state that just ended (s)
    pub previous_duration: f64,
    pub timestamp: f64,
}

pub struct StationaryDetector {
    config: StationaryConfig,
    state: RunningState,
    speeds: RollingWindow,
    positions: PositionRate,
    below_count: u32,
    above_count: u32,
    spike_count: u32,
    state_since: Option<f64>,
}

impl StationaryDetector {
    pub fn new(config: StationaryConfig) -> Self {
        let speeds = RollingWindow::new(config.speed_window);
        let positions =
            PositionRate::new(config.position_rate_window, config.position_rate_min_samples);
        Self {
            config,
            state: RunningState::Moving,
            speeds,
            positions,
            below_count: 0,
            above_count: 0,
            spike_count: 0,
            state_since: None,
        }
    }

    /// Feed a filtered speed. Returns the transition if the state changed.
    pub fn update_speed(&mut self, speed: f64, now: f64) -> Option<StateTransition> {
        self.state_since.get_or_insert(now);
        if !speed.is_finite() {
            return None;
        }
        self.speeds.push(speed.max(0.0));
        let avg = self.speeds.mean()?;

        match self.state {
            RunningState::Moving => {
                if avg < self.config.stationary_speed {
                    self.below_count += 1;
                } else {
                    self.below_count = 0;
                }
                if self.below_count >= self.config.consecutive_samples {
                    return Some(self.transition(RunningState::Stationary, now));
                }
            }
            RunningState::Stationary => {
                if avg > self.config.moving_speed {
                    self.above_count += 1;
                } else {
                    self.above_count = 0;
                }
                if self.above_count >= self.config.consecutive_samples {
                    return Some(self.transition(RunningState::Moving, now));
                }
            }
        }
        None
    }

    /// Record the local position of an accepted fix for the speed fit
    pub fn observe_position(&mut self, timestamp: f64, north: f64, east: f64) {
        self.positions.push(timestamp, north, east);
    }

    /// Forget recorded positions, e.g. when tracking resumes somewhere else
    pub fn forget_positions(&mut self) {
        self.positions.clear();
    }

    /// Feed a fix whose velocity was not observed. `speed_std` is the
    /// filtered speed's standard deviation.
    pub fn update_unobserved(
        &mut self,
        filtered_speed: f64,
        speed_std: f64,
        now: f64,
    ) -> Option<StateTransition> {
        let speed = match self.positions.speed() {
            Some(fitted) => fitted,
            None => (filtered_speed - self.config.uncertainty_margin * speed_std.max(0.0)).max(0.0),
        };
        self.update_speed(speed, now)
    }

    /// Feed an accelerometer magnitude (gravity included). Only matters while stationary.
    pub fn update_acceleration(&mut self, magnitude: f64, now: f64) -> Option<StateTransition> {
        if self.state != RunningState::Stationary || !magnitude.is_finite() {
            return None;
        }
        if (magnitude - GRAVITY).abs() > self.config.accel_spike_threshold {
            self.spike_count += 1;
        } else {
            self.spike_count = 0;
        }
        if self.spike_count >= self.config.consecutive_samples {
            return Some(self.transition(RunningState::Moving, now));
        }
        None
    }

    fn transition(&mut self, next: RunningState, now: f64) -> StateTransition {
        let previous_duration = self.time_in_state(now);
        log::info!(
            "stationary: {:?} -> {:?} after {:.1}s",
            self.state,
            next,
            previous_duration
        );
        self.state = next;
        self.state_since = Some(now);
        self.below_count = 0;
        self.above_count = 0;
        self.spike_count = 0;
        StateTransition {
            state: next,
            previous_duration,
            timestamp: now,
        }
    }

    pub fn state(&self) -> RunningState {
        self.state
    }

    pub fn is_stationary(&self) -> bool {
        self.state == RunningState::Stationary
    }

    pub fn is_moving(&self) -> bool {
        self.state == RunningState::Moving
    }

    pub fn time_in_state(&self, now: f64) -> f64 {
        self.state_since.map_or(0.0, |since| (now - since).max(0.0))
    }

    pub fn average_speed(&self) -> Option<f64> {
        self.speeds.mean()
    }

    pub fn reset(&mut self) {
        self.state = RunningState::Moving;
        self.speeds.clear();
        self.positions.clear();
        self.below_count = 0;
        self.above_count = 0;
        self.spike_count = 0;
        self.state_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> StationaryDetector {
        StationaryDetector::new(StationaryConfig::default())
    }

    #[test]
    fn test_needs_three_consecutive_slow_samples() {
        let mut d = detector();
        // Window average drops below 0.3 only once enough slow samples accumulate
        for (i, v) in [0.0, 0.0, 0.0].iter().enumerate() {
            let t = d.update_speed(*v, i as f64);
            if i < 2 {
                assert!(t.is_none());
            } else {
                let t = t.unwrap();
                assert_eq!(t.state, RunningState::Stationary);
                assert_eq!(t.previous_duration, 2.0);
            }
        }
        assert!(d.is_stationary());
    }

    #[test]
    fn test_hysteresis_gap_does_not_flap() {
        let mut d = detector();
        for i in 0..5 {
            d.update_speed(0.0, i as f64);
        }
        assert!(d.is_stationary());
        // 0.6 m/s sits between the thresholds: no change either way
        for i in 5..30 {
            assert!(d.update_speed(0.6, i as f64).is_none());
        }
        assert!(d.is_stationary());
    }

    #[test]
    fn test_returns_to_moving_above_threshold() {
        let mut d = detector();
        for i in 0..5 {
            d.update_speed(0.0, i as f64);
        }
        let mut transition = None;
        for i in 5..15 {
            if let Some(t) = d.update_speed(3.0, i as f64) {
                transition = Some(t);
                break;
            }
        }
        let t = transition.unwrap();
        assert_eq!(t.state, RunningState::Moving);
        assert!(d.is_moving());
    }

    #[test]
    fn test_accel_spikes_wake_detector() {
        let mut d = detector();
        for i in 0..5 {
            d.update_speed(0.0, i as f64);
        }
        assert!(d.update_acceleration(14.0, 5.0).is_none());
        assert!(d.update_acceleration(9.8, 5.1).is_none());
        assert!(d.update_acceleration(14.0, 5.2).is_none());
        assert!(d.update_acceleration(4.0, 5.3).is_none());
        let t = d.update_acceleration(15.0, 5.4).unwrap();
        assert_eq!(t.state, RunningState::Moving);
    }

    #[test]
    fn test_accel_ignored_while_moving() {
        let mut d = detector();
        for i in 0..10 {
            assert!(d.update_acceleration(20.0, i as f64 * 0.1).is_none());
        }
        assert!(d.is_moving());
    }

    #[test]
    fn test_time_in_state_and_reset() {
        let mut d = detector();
        d.update_speed(2.0, 10.0);
        assert_eq!(d.time_in_state(14.0), 4.0);
        for i in 0..5 {
            d.update_speed(0.0, 15.0 + i as f64);
        }
        d.reset();
        assert!(d.is_moving());
        assert_eq!(d.time_in_state(100.0), 0.0);
        assert!(d.average_speed().is_none());
    }

    #[test]
    fn test_unobserved_velocity_discounts_uncertainty() {
        let mut d = detector();
        // 0.6 m/s of filtered speed is within 1.5 sigma of zero
        for i in 0..3 {
            d.observe_position(i as f64, 0.0, 0.0);
            d.update_unobserved(0.6, 0.5, i as f64);
        }
        assert!(d.is_stationary());
    }

    #[test]
    fn test_unobserved_velocity_uses_position_fit_once_ready() {
        let mut d = detector();
        for i in 0..5 {
            d.update_speed(0.0, i as f64);
        }
        assert!(d.is_stationary());

        // Walking east at 1.5 m/s while the filtered speed says nothing
        let mut transition = None;
        for i in 5..30 {
            let t = i as f64;
            d.observe_position(t, 0.0, 1.5 * t);
            if let Some(tr) = d.update_unobserved(0.0, 2.0, t) {
                transition = Some(tr);
                break;
            }
        }
        let t = transition.unwrap();
        assert_eq!(t.state, RunningState::Moving);
        // Ten positions before the fit, then three votes plus the window average
        assert!(t.timestamp >= 16.0 && t.timestamp <= 20.0, "at {}", t.timestamp);

        d.reset();
        assert!(d.update_unobserved(0.0, 0.0, 0.0).is_none());
    }
}
