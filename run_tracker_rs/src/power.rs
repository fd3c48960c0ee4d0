use serde::{Deserialize, Serialize};

use crate::types::{AccuracyMode, RunningState};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Continuous stationary time before dropping to low-power positioning (s)
    pub low_power_after_secs: f64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            low_power_after_secs: 8.0,
        }
    }
}

/// Picks the positioning accuracy mode from the running state.
///
/// Only ever changes the requested mode; stopping positioning is the session's job.
pub struct PowerController {
    config: PowerConfig,
    mode: AccuracyMode,
}

impl PowerController {
    pub fn new(config: PowerConfig) -> Self {
        Self {
            config,
            mode: AccuracyMode::High,
        }
    }

    /// Returns the new mode when it differs from the current one.
    pub fn evaluate(&mut self, state: RunningState, time_in_state: f64) -> Option<AccuracyMode> {
        let wanted = match state {
            RunningState::Stationary if time_in_state >= self.config.low_power_after_secs => {
                AccuracyMode::LowPower
            }
            RunningState::Stationary => self.mode,
            RunningState::Moving => AccuracyMode::High,
        };
        if wanted == self.mode {
            return None;
        }
        log::info!("power: requesting {:?} positioning", wanted);
        self.mode = wanted;
        Some(wanted)
    }

    pub fn mode(&self) -> AccuracyMode {
        self.mode
    }

    pub fn reset(&mut self) {
        self.mode = AccuracyMode::High;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_power_after_threshold() {
        let mut p = PowerController::new(PowerConfig::default());
        assert_eq!(p.evaluate(RunningState::Stationary, 3.0), None);
        assert_eq!(p.evaluate(RunningState::Stationary, 7.9), None);
        assert_eq!(
            p.evaluate(RunningState::Stationary, 8.0),
            Some(AccuracyMode::LowPower)
        );
        // Only emitted on change
        assert_eq!(p.evaluate(RunningState::Stationary, 20.0), None);
    }

    #[test]
    fn test_moving_restores_high_immediately() {
        let mut p = PowerController::new(PowerConfig::default());
        p.evaluate(RunningState::Stationary, 10.0);
        assert_eq!(p.evaluate(RunningState::Moving, 0.0), Some(AccuracyMode::High));
        assert_eq!(p.mode(), AccuracyMode::High);
    }

    #[test]
    fn test_moving_never_requests_low_power() {
        let mut p = PowerController::new(PowerConfig::default());
        assert_eq!(p.evaluate(RunningState::Moving, 600.0), None);
    }
}
