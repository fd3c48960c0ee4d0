use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::types::{FilteredLocation, PositioningStatus, RawFix, TrackingPhase};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// A fix at or below this accuracy ends the cold start (m)
    pub lock_accuracy: f64,
    /// Cold start gives up waiting after this long (s)
    pub cold_start_timeout_secs: f64,
    /// While stationary, movement up to this is drift (m)
    pub stationary_drift_floor: f64,
    /// While moving, movement below this is jitter (m)
    pub moving_jitter_floor: f64,
    /// Longest step between fixes integrated from filtered speed (s)
    pub speed_integration_max_gap: f64,
    /// Engine timer period (s)
    pub tick_interval_secs: f64,
    pub command_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lock_accuracy: 20.0,
            cold_start_timeout_secs: 30.0,
            stationary_drift_floor: 2.0,
            moving_jitter_floor: 0.3,
            speed_integration_max_gap: 5.0,
            tick_interval_secs: 1.0,
            command_queue_capacity: 1024,
        }
    }
}

/// Per-session bookkeeping, mutated only by the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: TrackingPhase,
    pub status: PositioningStatus,
    pub cumulative_distance: f64,
    pub raw_fixes: Vec<RawFix>,
    pub filtered_route: Vec<FilteredLocation>,
    pub started_at: Option<f64>,
    pub stopped_at: Option<f64>,
    /// Seconds spent paused, for moving-time statistics
    pub paused_secs: f64,
    paused_at: Option<f64>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: TrackingPhase::Idle,
            status: PositioningStatus::Searching,
            cumulative_distance: 0.0,
            raw_fixes: Vec::new(),
            filtered_route: Vec::new(),
            started_at: None,
            stopped_at: None,
            paused_secs: 0.0,
            paused_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.phase,
            TrackingPhase::Starting | TrackingPhase::Running | TrackingPhase::Paused
        )
    }

    /// Idle/Stopped → Starting. Clears the previous session's buffers.
    pub fn start(&mut self, now: f64) -> TrackerResult<()> {
        if self.is_active() {
            return Err(TrackerError::AlreadyRunning);
        }
        let status = match self.status {
            PositioningStatus::Disabled => PositioningStatus::Disabled,
            _ => PositioningStatus::Searching,
        };
        *self = Self::new();
        self.status = status;
        self.phase = TrackingPhase::Starting;
        self.started_at = Some(now);
        Ok(())
    }

    /// Starting → Running once a fix is locked or the cold start times out
    pub fn begin_running(&mut self) -> TrackerResult<()> {
        match self.phase {
            TrackingPhase::Starting => {
                self.phase = TrackingPhase::Running;
                Ok(())
            }
            other => Err(TrackerError::InvalidState(format!(
                "cannot begin running from {:?}",
                other
            ))),
        }
    }

    /// Running → Paused
    pub fn pause(&mut self, now: f64) -> TrackerResult<()> {
        match self.phase {
            TrackingPhase::Running => {
                self.phase = TrackingPhase::Paused;
                self.paused_at = Some(now);
                Ok(())
            }
            TrackingPhase::Paused => Err(TrackerError::InvalidState("Already paused".to_string())),
            TrackingPhase::Starting => Err(TrackerError::InvalidState(
                "Still acquiring a first fix".to_string(),
            )),
            TrackingPhase::Idle | TrackingPhase::Stopped => Err(TrackerError::NotRunning),
        }
    }

    /// Paused → Running
    pub fn resume(&mut self, now: f64) -> TrackerResult<()> {
        match self.phase {
            TrackingPhase::Paused => {
                self.phase = TrackingPhase::Running;
                if let Some(at) = self.paused_at.take() {
                    self.paused_secs += (now - at).max(0.0);
                }
                Ok(())
            }
            TrackingPhase::Running | TrackingPhase::Starting => {
                Err(TrackerError::InvalidState("Not paused".to_string()))
            }
            TrackingPhase::Idle | TrackingPhase::Stopped => Err(TrackerError::NotRunning),
        }
    }

    /// Starting/Running/Paused → Stopped. Buffers stay until the next start.
    pub fn stop(&mut self, now: f64) -> TrackerResult<()> {
        if !self.is_active() {
            return Err(TrackerError::NotRunning);
        }
        if let Some(at) = self.paused_at.take() {
            self.paused_secs += (now - at).max(0.0);
        }
        self.phase = TrackingPhase::Stopped;
        self.stopped_at = Some(now);
        Ok(())
    }

    /// Returns the new status when it changed
    pub fn set_status(&mut self, status: PositioningStatus) -> Option<PositioningStatus> {
        if self.status == status {
            return None;
        }
        log::info!("session: positioning {:?} -> {:?}", self.status, status);
        self.status = status;
        Some(status)
    }

    pub fn record_location(&mut self, location: FilteredLocation) {
        if !location.interpolated {
            self.cumulative_distance = location.cumulative_distance;
        }
        self.filtered_route.push(location);
    }

    pub fn last_real_location(&self) -> Option<&FilteredLocation> {
        self.filtered_route.iter().rev().find(|l| !l.interpolated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_transitions() {
        let mut s = SessionState::new();
        assert_eq!(s.phase, TrackingPhase::Idle);

        s.start(0.0).unwrap();
        assert_eq!(s.phase, TrackingPhase::Starting);
        assert!(matches!(s.start(1.0), Err(TrackerError::AlreadyRunning)));
        assert!(s.pause(1.0).is_err());

        s.begin_running().unwrap();
        s.pause(10.0).unwrap();
        assert_eq!(s.phase, TrackingPhase::Paused);
        assert!(s.pause(11.0).is_err());

        s.resume(15.0).unwrap();
        assert_eq!(s.phase, TrackingPhase::Running);
        assert_eq!(s.paused_secs, 5.0);
        assert!(s.resume(16.0).is_err());

        s.stop(20.0).unwrap();
        assert_eq!(s.phase, TrackingPhase::Stopped);
        assert!(matches!(s.stop(21.0), Err(TrackerError::NotRunning)));
    }

    #[test]
    fn test_commands_rejected_while_idle() {
        let mut s = SessionState::new();
        assert!(matches!(s.pause(0.0), Err(TrackerError::NotRunning)));
        assert!(matches!(s.resume(0.0), Err(TrackerError::NotRunning)));
        assert!(matches!(s.stop(0.0), Err(TrackerError::NotRunning)));
    }

    #[test]
    fn test_stop_while_paused_counts_pause() {
        let mut s = SessionState::new();
        s.start(0.0).unwrap();
        s.begin_running().unwrap();
        s.pause(5.0).unwrap();
        s.stop(9.0).unwrap();
        assert_eq!(s.paused_secs, 4.0);
    }

    #[test]
    fn test_restart_clears_buffers_but_keeps_disabled() {
        let mut s = SessionState::new();
        s.start(0.0).unwrap();
        s.raw_fixes.push(RawFix::new(0.0, 1.0, 1.0, 5.0));
        s.cumulative_distance = 42.0;
        s.set_status(PositioningStatus::Disabled);
        s.stop(1.0).unwrap();
        assert_eq!(s.raw_fixes.len(), 1);

        s.start(2.0).unwrap();
        assert!(s.raw_fixes.is_empty());
        assert_eq!(s.cumulative_distance, 0.0);
        assert_eq!(s.status, PositioningStatus::Disabled);
    }

    #[test]
    fn test_status_change_reported_once() {
        let mut s = SessionState::new();
        assert_eq!(s.set_status(PositioningStatus::Searching), None);
        assert_eq!(
            s.set_status(PositioningStatus::Locked),
            Some(PositioningStatus::Locked)
        );
        assert_eq!(s.set_status(PositioningStatus::Locked), None);
    }
}
