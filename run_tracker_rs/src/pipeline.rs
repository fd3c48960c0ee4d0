//! Session pipeline: sequences every input through the estimators.
//!
//! The pipeline is synchronous and never reads a clock; each call carries
//! `now` in seconds. It is meant to be owned by exactly one thread (see
//! `engine`), which is what serializes all state mutation.
//!
//! Per accepted fix:
//!   outlier gate → projection → Kalman predict/update → altitude fusion and
//!   dead-reckoning re-anchor → stationary detector → power controller →
//!   distance accounting → `LocationUpdate`

use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;
use crate::error::TrackerResult;
use crate::filters::{
    FilterStep, KalmanEstimate, KalmanFilter, KalmanState, OutlierDetector, RejectionCounts,
    Verdict,
};
use crate::power::PowerController;
use crate::projection::CoordinateProjector;
use crate::sensor_fusion::{FusionEvent, SensorFusion};
use crate::session::SessionState;
use crate::stationary::{StateTransition, StationaryDetector};
use crate::types::{
    AccuracyMode, BarometricSample, DeadReckoningEstimate, FilteredLocation, MotionSample,
    MotionState, PositioningStatus, RawFix, RunningState, SensorCapabilities, StepEvent,
    TrackingPhase,
};

// ─── Output ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub location: FilteredLocation,
    pub running_state: RunningState,
    /// Steps per minute
    pub cadence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TrackerEvent {
    PhaseChanged(TrackingPhase),
    LocationUpdate(LocationUpdate),
    PositioningStatusChanged(PositioningStatus),
    /// `duration_secs` is the time spent in the state that just ended
    RunningStateChanged {
        state: RunningState,
        duration_secs: f64,
    },
    AccuracyModeRequested(AccuracyMode),
}

/// Diagnostics view of a session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: TrackingPhase,
    pub status: PositioningStatus,
    pub running_state: RunningState,
    pub time_in_running_state: f64,
    pub cumulative_distance: f64,
    pub raw_fix_count: usize,
    pub filtered_count: usize,
    pub accuracy_mode: AccuracyMode,
    pub latest_location: Option<FilteredLocation>,
    pub motion: MotionState,
    pub dead_reckoning: Option<DeadReckoningEstimate>,
    pub rejections: RejectionCounts,
    pub kalman_updates: u64,
    pub kalman_skipped_updates: u64,
    pub kalman_reinitializations: u64,
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

pub struct Pipeline {
    config: TrackerConfig,
    capabilities: SensorCapabilities,
    session: SessionState,
    projector: CoordinateProjector,
    outlier: OutlierDetector,
    kalman: KalmanFilter,
    stationary: StationaryDetector,
    fusion: SensorFusion,
    power: PowerController,
    cold_start_buffer: Vec<RawFix>,
    /// Wall time of the last accepted fix, re-armed on resume
    last_fix_time: Option<f64>,
    /// Previous real location for distance accounting
    distance_anchor: Option<DistanceAnchor>,
}

/// What distance accounting remembers about the previous real location
#[derive(Clone, Copy, Debug)]
struct DistanceAnchor {
    north: f64,
    east: f64,
    timestamp: f64,
    speed: f64,
    velocity_observed: bool,
}

impl Pipeline {
    pub fn new(config: TrackerConfig, capabilities: SensorCapabilities) -> Self {
        Self {
            capabilities,
            session: SessionState::new(),
            projector: CoordinateProjector::new(),
            outlier: OutlierDetector::new(config.outlier.clone()),
            kalman: KalmanFilter::new(config.kalman.clone()),
            stationary: StationaryDetector::new(config.stationary.clone()),
            fusion: SensorFusion::new(config.fusion.clone(), capabilities),
            power: PowerController::new(config.power.clone()),
            cold_start_buffer: Vec::new(),
            last_fix_time: None,
            distance_anchor: None,
            config,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────

    pub fn start(&mut self, now: f64) -> TrackerResult<Vec<TrackerEvent>> {
        let previous_status = self.session.status;
        self.session.start(now)?;

        self.projector.reset();
        self.outlier.reset();
        self.kalman.reset();
        self.stationary.reset();
        self.fusion.reset(self.capabilities);
        self.power.reset();
        self.cold_start_buffer.clear();
        self.last_fix_time = None;
        self.distance_anchor = None;

        log::info!("pipeline: session started at {:.3}", now);
        let mut events = vec![TrackerEvent::PhaseChanged(TrackingPhase::Starting)];
        if self.session.status != previous_status {
            events.push(TrackerEvent::PositioningStatusChanged(self.session.status));
        }
        events.push(TrackerEvent::AccuracyModeRequested(AccuracyMode::High));
        Ok(events)
    }

    pub fn pause(&mut self, now: f64) -> TrackerResult<Vec<TrackerEvent>> {
        self.session.pause(now)?;
        log::info!("pipeline: paused at {:.3}", now);
        Ok(vec![TrackerEvent::PhaseChanged(TrackingPhase::Paused)])
    }

    pub fn resume(&mut self, now: f64) -> TrackerResult<Vec<TrackerEvent>> {
        self.session.resume(now)?;
        if self.last_fix_time.is_some() {
            self.last_fix_time = Some(now);
        }
        self.distance_anchor = None;
        self.stationary.forget_positions();
        self.fusion.suspend_dead_reckoning();
        log::info!("pipeline: resumed at {:.3}", now);
        Ok(vec![TrackerEvent::PhaseChanged(TrackingPhase::Running)])
    }

    pub fn stop(&mut self, now: f64) -> TrackerResult<Vec<TrackerEvent>> {
        self.session.stop(now)?;
        self.cold_start_buffer.clear();
        log::info!(
            "pipeline: stopped at {:.3}, {:.1} m over {} fixes",
            now,
            self.session.cumulative_distance,
            self.session.raw_fixes.len()
        );
        Ok(vec![TrackerEvent::PhaseChanged(TrackingPhase::Stopped)])
    }

    /// Positioning permission or provider toggled by the platform.
    pub fn set_positioning_available(&mut self, available: bool) -> Vec<TrackerEvent> {
        let status = match (available, self.session.status) {
            (false, _) => PositioningStatus::Disabled,
            (true, PositioningStatus::Disabled) => PositioningStatus::Searching,
            (true, current) => current,
        };
        self.session
            .set_status(status)
            .map(TrackerEvent::PositioningStatusChanged)
            .into_iter()
            .collect()
    }

    // ── Inputs ───────────────────────────────────────────────────────────

    pub fn push_fix(&mut self, fix: RawFix, now: f64) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        if !matches!(
            self.session.phase,
            TrackingPhase::Starting | TrackingPhase::Running
        ) {
            return events;
        }
        if self.session.status == PositioningStatus::Disabled {
            log::debug!("pipeline: fix dropped while positioning is disabled");
            return events;
        }
        self.session.raw_fixes.push(fix.clone());

        match self.session.phase {
            TrackingPhase::Starting => {
                let acc = fix.horizontal_accuracy;
                if acc >= 0.0 && acc <= self.config.session.lock_accuracy {
                    let mut fix_events = Vec::new();
                    if self.process_fix(&fix, now, &mut fix_events) {
                        log::info!("pipeline: locked on fix with accuracy {:.1} m", acc);
                        self.enter_running(&mut events);
                        self.cold_start_buffer.clear();
                        events.extend(fix_events);
                        return events;
                    }
                }
                self.cold_start_buffer.push(fix);
                self.check_cold_start(now, &mut events);
            }
            TrackingPhase::Running => {
                self.process_fix(&fix, now, &mut events);
            }
            _ => {}
        }
        events
    }

    pub fn push_motion(&mut self, sample: MotionSample, now: f64) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        if !self.is_processing() {
            return events;
        }
        for e in self.fusion.feed_motion(&sample) {
            log_fusion_event(&e);
        }
        if let Some(t) = self
            .stationary
            .update_acceleration(sample.acceleration_magnitude, now)
        {
            self.on_running_state_change(t, now, &mut events);
        }
        events
    }

    pub fn push_pressure(&mut self, sample: BarometricSample, _now: f64) -> Vec<TrackerEvent> {
        if self.is_processing() {
            self.fusion.feed_pressure(&sample);
        }
        Vec::new()
    }

    pub fn push_step(&mut self, event: StepEvent, _now: f64) -> Vec<TrackerEvent> {
        if self.is_processing() {
            for e in self.fusion.feed_step(&event) {
                log_fusion_event(&e);
            }
        }
        Vec::new()
    }

    /// Time-driven transitions: cold-start timeout, positioning loss, dead
    /// reckoning and the power controller's stationary timer.
    pub fn tick(&mut self, now: f64) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        match self.session.phase {
            TrackingPhase::Starting => self.check_cold_start(now, &mut events),
            TrackingPhase::Running => {
                self.check_positioning_lost(now, &mut events);
                self.advance_dead_reckoning(now, &mut events);
                if let Some(mode) = self
                    .power
                    .evaluate(self.stationary.state(), self.stationary.time_in_state(now))
                {
                    events.push(TrackerEvent::AccuracyModeRequested(mode));
                }
            }
            _ => {}
        }
        events
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn is_processing(&self) -> bool {
        matches!(
            self.session.phase,
            TrackingPhase::Starting | TrackingPhase::Running
        )
    }

    fn enter_running(&mut self, events: &mut Vec<TrackerEvent>) {
        if self.session.begin_running().is_ok() {
            log::info!("pipeline: phase Starting -> Running");
            events.push(TrackerEvent::PhaseChanged(TrackingPhase::Running));
        }
    }

    fn check_cold_start(&mut self, now: f64, events: &mut Vec<TrackerEvent>) {
        if self.session.phase != TrackingPhase::Starting {
            return;
        }
        let Some(started) = self.session.started_at else {
            return;
        };
        if now - started < self.config.session.cold_start_timeout_secs {
            return;
        }

        let max_age = self.config.outlier.max_fix_age;
        let best = std::mem::take(&mut self.cold_start_buffer)
            .into_iter()
            .filter(|f| now - f.timestamp <= max_age && f.horizontal_accuracy >= 0.0)
            .min_by(|a, b| a.horizontal_accuracy.total_cmp(&b.horizontal_accuracy));

        log::info!(
            "pipeline: cold start timed out after {:.1}s (best accuracy {:?})",
            now - started,
            best.as_ref().map(|f| f.horizontal_accuracy)
        );
        self.enter_running(events);
        if let Some(fix) = best {
            self.process_fix(&fix, now, events);
        }
    }

    /// Run one fix through the estimators. Returns false when it was rejected.
    fn process_fix(&mut self, fix: &RawFix, now: f64, events: &mut Vec<TrackerEvent>) -> bool {
        if let Verdict::Rejected(_) = self.outlier.validate(fix, now) {
            return false;
        }

        if !self.projector.is_initialized() {
            self.projector.set_origin(fix.latitude, fix.longitude);
        }
        let Ok((north, east)) = self.projector.to_local(fix.latitude, fix.longitude) else {
            return false;
        };

        let mut measurement = self.kalman.measurement(north, east, fix);
        let velocity_observed = measurement.has_velocity;
        if !velocity_observed && self.stationary.is_stationary() {
            self.kalman.constrain_at_rest(&mut measurement);
        }
        let step = self
            .kalman
            .process(&measurement, self.fusion.acceleration_variance());
        if step == FilterStep::Reinitialized {
            log::debug!("pipeline: filter reinitialized at {:.3}", fix.timestamp);
        }
        let Some(est) = self.kalman.estimate() else {
            return false;
        };
        let Ok((latitude, longitude)) = self.projector.to_geographic(est.north, est.east) else {
            return false;
        };

        for e in self.fusion.on_fix_accepted(
            latitude,
            longitude,
            fix.altitude,
            est.speed,
            est.bearing,
            fix.timestamp,
        ) {
            log_fusion_event(&e);
        }
        let altitude = self.fusion.fused_altitude(fix.altitude, est.altitude);
        self.last_fix_time = Some(now);

        if let Some(status) = self.session.set_status(PositioningStatus::Locked) {
            events.push(TrackerEvent::PositioningStatusChanged(status));
        }

        self.stationary.observe_position(fix.timestamp, north, east);
        let transition = if velocity_observed {
            self.stationary.update_speed(est.speed, now)
        } else {
            self.stationary.update_unobserved(est.speed, est.velocity_std, now)
        };
        if let Some(t) = transition {
            self.on_running_state_change(t, now, events);
        }

        let counted = self.count_distance(&est, velocity_observed);
        let cumulative = self.session.cumulative_distance + counted;

        let location = FilteredLocation {
            timestamp: fix.timestamp,
            latitude,
            longitude,
            altitude,
            speed: est.speed,
            bearing: est.bearing,
            distance_from_previous: counted,
            cumulative_distance: cumulative,
            interpolated: false,
        };
        self.session.record_location(location.clone());
        events.push(TrackerEvent::LocationUpdate(LocationUpdate {
            location,
            running_state: self.stationary.state(),
            cadence: self.fusion.cadence(),
        }));
        true
    }

    /// Distance between consecutive real locations, with the stationary
    /// safety net: drift below the floor is ignored while stationary, but
    /// anything larger still counts.
    ///
    /// While moving between two fixes that both observed velocity, the step
    /// is the trapezoid of the filtered speeds. Otherwise it is the straight
    /// line between the filtered positions.
    fn count_distance(&mut self, est: &KalmanEstimate, velocity_observed: bool) -> f64 {
        let current = DistanceAnchor {
            north: est.north,
            east: est.east,
            timestamp: est.timestamp,
            speed: est.speed,
            velocity_observed,
        };
        let Some(previous) = self.distance_anchor.replace(current) else {
            return 0.0;
        };
        let dt = current.timestamp - previous.timestamp;
        let integrate = self.stationary.is_moving()
            && current.velocity_observed
            && previous.velocity_observed
            && dt > 0.0
            && dt <= self.config.session.speed_integration_max_gap;
        let d = if integrate {
            0.5 * (previous.speed + current.speed) * dt
        } else {
            (current.north - previous.north).hypot(current.east - previous.east)
        };
        let floor_ok = if self.stationary.is_stationary() {
            d > self.config.session.stationary_drift_floor
        } else {
            d >= self.config.session.moving_jitter_floor
        };
        if floor_ok && d.is_finite() {
            d
        } else {
            0.0
        }
    }

    fn on_running_state_change(
        &mut self,
        t: StateTransition,
        now: f64,
        events: &mut Vec<TrackerEvent>,
    ) {
        events.push(TrackerEvent::RunningStateChanged {
            state: t.state,
            duration_secs: t.previous_duration,
        });
        if let Some(mode) = self
            .power
            .evaluate(self.stationary.state(), self.stationary.time_in_state(now))
        {
            events.push(TrackerEvent::AccuracyModeRequested(mode));
        }
    }

    fn check_positioning_lost(&mut self, now: f64, events: &mut Vec<TrackerEvent>) {
        let Some(last) = self.last_fix_time else {
            return;
        };
        if self.session.status == PositioningStatus::Locked
            && now - last > self.config.fusion.gps_lost_after_secs
        {
            if let Some(status) = self.session.set_status(PositioningStatus::Lost) {
                events.push(TrackerEvent::PositioningStatusChanged(status));
            }
        }
    }

    fn advance_dead_reckoning(&mut self, now: f64, events: &mut Vec<TrackerEvent>) {
        if self.session.status != PositioningStatus::Lost {
            return;
        }
        let (estimate, fusion_events) = self.fusion.tick(now, self.last_fix_time, &self.projector);
        for e in &fusion_events {
            log_fusion_event(e);
        }
        let Some(est) = estimate else {
            return;
        };
        let Some(last) = self.session.last_real_location().cloned() else {
            return;
        };

        let location = FilteredLocation {
            timestamp: now,
            latitude: est.latitude,
            longitude: est.longitude,
            altitude: last.altitude,
            speed: last.speed,
            bearing: last.bearing,
            distance_from_previous: 0.0,
            cumulative_distance: self.session.cumulative_distance,
            interpolated: true,
        };
        self.session.record_location(location.clone());
        events.push(TrackerEvent::LocationUpdate(LocationUpdate {
            location,
            running_state: self.stationary.state(),
            cadence: self.fusion.cadence(),
        }));
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn phase(&self) -> TrackingPhase {
        self.session.phase
    }

    pub fn status(&self) -> PositioningStatus {
        self.session.status
    }

    pub fn running_state(&self) -> RunningState {
        self.stationary.state()
    }

    pub fn cumulative_distance(&self) -> f64 {
        self.session.cumulative_distance
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn raw_fixes(&self) -> &[RawFix] {
        &self.session.raw_fixes
    }

    pub fn filtered_route(&self) -> &[FilteredLocation] {
        &self.session.filtered_route
    }

    pub fn kalman_state(&self) -> Option<&KalmanState> {
        self.kalman.state()
    }

    pub fn dead_reckoning(&self) -> Option<&DeadReckoningEstimate> {
        self.fusion.dead_reckoning()
    }

    pub fn accuracy_mode(&self) -> AccuracyMode {
        self.power.mode()
    }

    pub fn projector(&self) -> &CoordinateProjector {
        &self.projector
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn snapshot(&self, now: f64) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.session.phase,
            status: self.session.status,
            running_state: self.stationary.state(),
            time_in_running_state: self.stationary.time_in_state(now),
            cumulative_distance: self.session.cumulative_distance,
            raw_fix_count: self.session.raw_fixes.len(),
            filtered_count: self.session.filtered_route.len(),
            accuracy_mode: self.power.mode(),
            latest_location: self.session.filtered_route.last().cloned(),
            motion: self.fusion.motion_state(),
            dead_reckoning: self.fusion.dead_reckoning().cloned(),
            rejections: self.outlier.counts().clone(),
            kalman_updates: self.kalman.update_count(),
            kalman_skipped_updates: self.kalman.skipped_count(),
            kalman_reinitializations: self.kalman.reinit_count(),
        }
    }
}

fn log_fusion_event(event: &FusionEvent) {
    log::debug!("fusion: {:?}", event);
}
