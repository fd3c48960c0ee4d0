// sensor_fusion.rs: auxiliary sensor layer around the position filter
//
// Nothing in here touches threads, channels or the platform. It takes motion,
// pressure and step samples in and gives back:
//   - a fused altitude (GPS baseline + barometric delta)
//   - step count, cadence and stride estimate
//   - a dead-reckoned position while fixes are missing
//   - the acceleration variance that scales the Kalman process noise

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::projection::CoordinateProjector;
use crate::smoothing::{ExponentialSmoother, RollingWindow};
use crate::types::{
    BarometricSample, BarometricState, DeadReckoningEstimate, MotionSample, MotionState,
    SensorCapabilities, StepEvent,
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    // ── Barometer ──
    pub pressure_smoothing_alpha: f64,

    // ── Step detection (accelerometer fallback) ──
    pub step_peak_threshold: f64,
    pub min_step_interval: f64,
    /// Span of step history used for cadence (s)
    pub cadence_window_secs: f64,

    // ── Stride model: clamp(slope * v + offset, min, max) ──
    pub stride_slope: f64,
    pub stride_offset: f64,
    pub min_stride: f64,
    pub max_stride: f64,

    // ── Dead reckoning ──
    /// No accepted fix for longer than this means positioning is lost (s)
    pub gps_lost_after_secs: f64,
    /// No estimate is produced once the last accepted fix is older than this (s)
    pub dead_reckoning_window_secs: f64,

    // ── Motion ──
    pub accel_variance_window: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            pressure_smoothing_alpha: 0.1,
            step_peak_threshold: 12.0,
            min_step_interval: 0.25,
            cadence_window_secs: 10.0,
            stride_slope: 0.4,
            stride_offset: 0.5,
            min_stride: 0.5,
            max_stride: 2.5,
            gps_lost_after_secs: 5.0,
            dead_reckoning_window_secs: 60.0,
            accel_variance_window: 50,
        }
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum FusionEvent {
    StepsDetected { count: u32, total: u64 },
    DeadReckoningActivated { since_fix_secs: f64 },
    DeadReckoningExpired { elapsed_secs: f64 },
    DeadReckoningCleared { step_count: u64, distance: f64 },
    BaselineAltitudeCaptured { altitude: f64 },
}

/// Where steps come from, decided once per session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepSource {
    Hardware,
    AccelerometerPeaks,
    Unavailable,
}

impl StepSource {
    pub fn from_capabilities(caps: &SensorCapabilities) -> Self {
        if caps.step_counter {
            StepSource::Hardware
        } else if caps.accelerometer {
            StepSource::AccelerometerPeaks
        } else {
            StepSource::Unavailable
        }
    }
}

// ─── Barometric altimeter ────────────────────────────────────────────────────

/// Standard-atmosphere height difference between `pressure` and `reference` (hPa)
pub fn pressure_to_relative_altitude(pressure: f64, reference: f64) -> f64 {
    44_330.0 * (1.0 - (pressure / reference).powf(1.0 / 5.255))
}

pub struct BarometricAltimeter {
    smoother: ExponentialSmoother,
    reference_hpa: Option<f64>,
    baseline_altitude: Option<f64>,
    state: Option<BarometricState>,
}

impl BarometricAltimeter {
    pub fn new(alpha: f64) -> Self {
        Self {
            smoother: ExponentialSmoother::new(alpha),
            reference_hpa: None,
            baseline_altitude: None,
            state: None,
        }
    }

    pub fn feed(&mut self, sample: &BarometricSample) -> Option<BarometricState> {
        let p = sample.pressure_hpa;
        if !p.is_finite() || p <= 0.0 {
            return None;
        }
        let smoothed = self.smoother.apply(p);
        let reference = *self.reference_hpa.get_or_insert(smoothed);
        let state = BarometricState {
            raw_pressure_hpa: p,
            smoothed_pressure_hpa: smoothed,
            relative_altitude: pressure_to_relative_altitude(smoothed, reference),
        };
        self.state = Some(state.clone());
        Some(state)
    }

    /// Capture the GPS altitude the relative heights are added to. Only the first call counts.
    pub fn capture_baseline(&mut self, altitude: f64) -> bool {
        if self.baseline_altitude.is_some() || !altitude.is_finite() {
            return false;
        }
        self.baseline_altitude = Some(altitude);
        true
    }

    pub fn absolute_altitude(&self) -> Option<f64> {
        Some(self.baseline_altitude? + self.state.as_ref()?.relative_altitude)
    }

    pub fn state(&self) -> Option<&BarometricState> {
        self.state.as_ref()
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline_altitude
    }

    pub fn reset(&mut self) {
        self.smoother.reset();
        self.reference_hpa = None;
        self.baseline_altitude = None;
        self.state = None;
    }
}

// ─── Step / stride estimation ────────────────────────────────────────────────

pub struct StepEstimator {
    source: StepSource,
    peak_threshold: f64,
    min_interval: f64,
    cadence_window: f64,
    above_threshold: bool,
    last_step_time: Option<f64>,
    total_steps: u64,
    steps_since_fix: u64,
    history: VecDeque<(f64, u32)>,
    reported_cadence: Option<f64>,
}

impl StepEstimator {
    pub fn new(source: StepSource, config: &FusionConfig) -> Self {
        Self {
            source,
            peak_threshold: config.step_peak_threshold,
            min_interval: config.min_step_interval,
            cadence_window: config.cadence_window_secs,
            above_threshold: false,
            last_step_time: None,
            total_steps: 0,
            steps_since_fix: 0,
            history: VecDeque::new(),
            reported_cadence: None,
        }
    }

    /// Peak detector: arm on the rising edge, count on the falling edge.
    /// Returns true when a step was counted.
    pub fn feed_magnitude(&mut self, magnitude: f64, timestamp: f64) -> bool {
        if self.source != StepSource::AccelerometerPeaks {
            return false;
        }
        if magnitude > self.peak_threshold {
            self.above_threshold = true;
            return false;
        }
        if !self.above_threshold {
            return false;
        }
        self.above_threshold = false;
        if let Some(last) = self.last_step_time {
            if timestamp - last < self.min_interval {
                return false;
            }
        }
        self.last_step_time = Some(timestamp);
        self.record(timestamp, 1);
        true
    }

    pub fn feed_event(&mut self, event: &StepEvent) -> bool {
        if self.source != StepSource::Hardware || event.steps == 0 {
            return false;
        }
        if let Some(c) = event.cadence.filter(|c| c.is_finite() && *c >= 0.0) {
            self.reported_cadence = Some(c);
        }
        self.last_step_time = Some(event.timestamp);
        self.record(event.timestamp, event.steps);
        true
    }

    fn record(&mut self, timestamp: f64, steps: u32) {
        self.total_steps += u64::from(steps);
        self.steps_since_fix += u64::from(steps);
        self.history.push_back((timestamp, steps));
        while let Some(&(t, _)) = self.history.front() {
            if timestamp - t > self.cadence_window {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Steps per minute over the recent history
    pub fn cadence(&self) -> f64 {
        if let Some(c) = self.reported_cadence {
            return c;
        }
        let (Some(&(first, _)), Some(&(last, _))) = (self.history.front(), self.history.back())
        else {
            return 0.0;
        };
        let span = last - first;
        if span <= 0.0 {
            return 0.0;
        }
        // Steps of the first entry happened before the span started
        let steps: u32 = self.history.iter().skip(1).map(|(_, s)| *s).sum();
        f64::from(steps) / span * 60.0
    }

    pub fn source(&self) -> StepSource {
        self.source
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn steps_since_fix(&self) -> u64 {
        self.steps_since_fix
    }

    pub fn clear_since_fix(&mut self) {
        self.steps_since_fix = 0;
    }

    pub fn reset(&mut self, source: StepSource) {
        self.source = source;
        self.above_threshold = false;
        self.last_step_time = None;
        self.total_steps = 0;
        self.steps_since_fix = 0;
        self.history.clear();
        self.reported_cadence = None;
    }
}

pub fn stride_for_speed(speed: f64, config: &FusionConfig) -> f64 {
    let speed = if speed.is_finite() { speed.max(0.0) } else { 0.0 };
    (config.stride_slope * speed + config.stride_offset).clamp(config.min_stride, config.max_stride)
}

// ─── Dead reckoning ──────────────────────────────────────────────────────────

/// Last trusted position the extrapolation starts from
#[derive(Clone, Debug, PartialEq)]
struct Anchor {
    latitude: f64,
    longitude: f64,
    bearing: f64,
    stride: f64,
    timestamp: f64,
}

#[derive(Default)]
struct DeadReckoner {
    anchor: Option<Anchor>,
    activated_at: Option<f64>,
    expired: bool,
    estimate: Option<DeadReckoningEstimate>,
}

impl DeadReckoner {
    fn is_active(&self) -> bool {
        self.activated_at.is_some()
    }

    fn clear(&mut self) {
        self.activated_at = None;
        self.expired = false;
        self.estimate = None;
    }
}

// ─── The coordinator ─────────────────────────────────────────────────────────

pub struct SensorFusion {
    config: FusionConfig,
    capabilities: SensorCapabilities,
    altimeter: BarometricAltimeter,
    steps: StepEstimator,
    dead_reckoner: DeadReckoner,
    accel_window: RollingWindow,
    reported_variance: Option<f64>,
    last_magnitude: f64,
    stride: f64,
}

impl SensorFusion {
    pub fn new(config: FusionConfig, capabilities: SensorCapabilities) -> Self {
        let source = StepSource::from_capabilities(&capabilities);
        let steps = StepEstimator::new(source, &config);
        let stride = stride_for_speed(0.0, &config);
        Self {
            altimeter: BarometricAltimeter::new(config.pressure_smoothing_alpha),
            accel_window: RollingWindow::new(config.accel_variance_window),
            steps,
            dead_reckoner: DeadReckoner::default(),
            reported_variance: None,
            last_magnitude: 0.0,
            stride,
            capabilities,
            config,
        }
    }

    /// Start a new session, re-detecting which optional feeds are used.
    pub fn reset(&mut self, capabilities: SensorCapabilities) {
        self.capabilities = capabilities;
        self.steps.reset(StepSource::from_capabilities(&capabilities));
        self.altimeter.reset();
        self.dead_reckoner = DeadReckoner::default();
        self.accel_window.clear();
        self.reported_variance = None;
        self.last_magnitude = 0.0;
        self.stride = stride_for_speed(0.0, &self.config);
    }

    // ── Feeds ────────────────────────────────────────────────────────────

    pub fn feed_motion(&mut self, sample: &MotionSample) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        let mag = sample.acceleration_magnitude;
        if !mag.is_finite() {
            return events;
        }
        self.last_magnitude = mag;
        self.accel_window.push(mag);
        self.reported_variance = sample.acceleration_variance.filter(|v| v.is_finite());

        if self.steps.feed_magnitude(mag, sample.timestamp) {
            events.push(FusionEvent::StepsDetected {
                count: 1,
                total: self.steps.total_steps(),
            });
        }
        events
    }

    pub fn feed_pressure(&mut self, sample: &BarometricSample) -> Option<BarometricState> {
        if !self.capabilities.barometer {
            return None;
        }
        self.altimeter.feed(sample)
    }

    pub fn feed_step(&mut self, event: &StepEvent) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        if self.steps.feed_event(event) {
            events.push(FusionEvent::StepsDetected {
                count: event.steps,
                total: self.steps.total_steps(),
            });
        }
        events
    }

    // ── Fix hooks ────────────────────────────────────────────────────────

    /// Called for every fix that made it through the filter. Re-anchors dead
    /// reckoning on the filtered position and zeroes the step accumulator.
    pub fn on_fix_accepted(
        &mut self,
        latitude: f64,
        longitude: f64,
        raw_altitude: f64,
        speed: f64,
        bearing: f64,
        timestamp: f64,
    ) -> Vec<FusionEvent> {
        let mut events = Vec::new();

        if self.altimeter.capture_baseline(raw_altitude) {
            events.push(FusionEvent::BaselineAltitudeCaptured {
                altitude: raw_altitude,
            });
        }

        self.stride = stride_for_speed(speed, &self.config);

        if self.dead_reckoner.is_active() {
            let (step_count, distance) = self
                .dead_reckoner
                .estimate
                .as_ref()
                .map_or((0, 0.0), |e| (e.step_count, e.distance));
            log::info!(
                "fusion: fix resumed, dropping dead reckoning ({} steps, {:.1} m)",
                step_count,
                distance
            );
            events.push(FusionEvent::DeadReckoningCleared {
                step_count,
                distance,
            });
        }
        self.dead_reckoner.clear();
        self.dead_reckoner.anchor = Some(Anchor {
            latitude,
            longitude,
            bearing,
            stride: self.stride,
            timestamp,
        });
        self.steps.clear_since_fix();
        events
    }

    /// Drop any running extrapolation but keep the anchor. Used when tracking resumes
    /// after a pause so the window restarts from the resume time.
    pub fn suspend_dead_reckoning(&mut self) {
        self.dead_reckoner.clear();
    }

    /// Altitude to report for a fix: barometric when available, else the fix's own
    pub fn fused_altitude(&self, raw_altitude: f64, filtered_altitude: f64) -> f64 {
        if self.capabilities.barometer {
            if let Some(alt) = self.altimeter.absolute_altitude() {
                return alt;
            }
        }
        if raw_altitude.is_finite() {
            raw_altitude
        } else {
            filtered_altitude
        }
    }

    // ── Time-driven ──────────────────────────────────────────────────────

    /// Advance dead reckoning to `now`. Returns the estimate while one is valid.
    pub fn tick(
        &mut self,
        now: f64,
        last_fix_time: Option<f64>,
        projector: &CoordinateProjector,
    ) -> (Option<DeadReckoningEstimate>, Vec<FusionEvent>) {
        let mut events = Vec::new();
        let Some(last_fix) = last_fix_time else {
            return (None, events);
        };
        let since_fix = now - last_fix;
        if since_fix <= self.config.gps_lost_after_secs {
            return (None, events);
        }
        if self.steps.source() == StepSource::Unavailable {
            return (None, events);
        }
        let Some(anchor) = self.dead_reckoner.anchor.clone() else {
            return (None, events);
        };

        if self.dead_reckoner.activated_at.is_none() {
            log::info!(
                "fusion: no fix for {:.1}s, starting dead reckoning",
                since_fix
            );
            self.dead_reckoner.activated_at = Some(now);
            events.push(FusionEvent::DeadReckoningActivated {
                since_fix_secs: since_fix,
            });
        }

        // The window counts from the last fix, not from activation
        let elapsed = since_fix;
        if elapsed > self.config.dead_reckoning_window_secs {
            if !self.dead_reckoner.expired {
                log::info!("fusion: dead reckoning window exhausted after {:.1}s", elapsed);
                self.dead_reckoner.expired = true;
                self.dead_reckoner.estimate = None;
                events.push(FusionEvent::DeadReckoningExpired {
                    elapsed_secs: elapsed,
                });
            }
            return (None, events);
        }

        let step_count = self.steps.steps_since_fix();
        let distance = step_count as f64 * anchor.stride;
        let position = projector.offset(anchor.latitude, anchor.longitude, anchor.bearing, distance);
        let Ok((latitude, longitude)) = position else {
            return (None, events);
        };

        let estimate = DeadReckoningEstimate {
            timestamp: now,
            latitude,
            longitude,
            distance,
            step_count,
            elapsed,
            remaining_window: self.config.dead_reckoning_window_secs - elapsed,
        };
        self.dead_reckoner.estimate = Some(estimate.clone());
        (Some(estimate), events)
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Acceleration variance for process-noise scaling. None until enough samples.
    pub fn acceleration_variance(&self) -> Option<f64> {
        if self.reported_variance.is_some() {
            return self.reported_variance;
        }
        if self.accel_window.len() < 2 {
            return None;
        }
        self.accel_window.variance()
    }

    pub fn motion_state(&self) -> MotionState {
        MotionState {
            acceleration_magnitude: self.last_magnitude,
            acceleration_variance: self.acceleration_variance().unwrap_or(0.0),
            step_count: self.steps.total_steps(),
            cadence: self.steps.cadence(),
            stride_estimate: self.stride,
        }
    }

    pub fn dead_reckoning(&self) -> Option<&DeadReckoningEstimate> {
        self.dead_reckoner.estimate.as_ref()
    }

    pub fn is_dead_reckoning(&self) -> bool {
        self.dead_reckoner.is_active() && !self.dead_reckoner.expired
    }

    pub fn barometer(&self) -> Option<&BarometricState> {
        self.altimeter.state()
    }

    pub fn step_source(&self) -> StepSource {
        self.steps.source()
    }

    pub fn cadence(&self) -> f64 {
        self.steps.cadence()
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn caps(barometer: bool, step_counter: bool) -> SensorCapabilities {
        SensorCapabilities {
            barometer,
            step_counter,
            accelerometer: true,
        }
    }

    #[test]
    fn test_barometric_formula() {
        assert_eq!(pressure_to_relative_altitude(1013.25, 1013.25), 0.0);
        // ~8.3 m per hPa near sea level
        let h = pressure_to_relative_altitude(1012.25, 1013.25);
        assert!(h > 8.0 && h < 8.7, "h = {h}");
    }

    #[test]
    fn test_altitude_uses_baseline_plus_relative() {
        let mut fusion = SensorFusion::new(FusionConfig::default(), caps(true, false));
        fusion.feed_pressure(&BarometricSample { timestamp: 0.0, pressure_hpa: 1000.0 });
        fusion.on_fix_accepted(0.0, 0.0, 120.0, 0.0, 0.0, 0.0);
        assert_relative_eq!(fusion.fused_altitude(125.0, 118.0), 120.0);

        for i in 1..200 {
            fusion.feed_pressure(&BarometricSample { timestamp: i as f64, pressure_hpa: 999.0 });
        }
        let alt = fusion.fused_altitude(f64::NAN, 0.0);
        assert!(alt > 128.0 && alt < 129.0, "alt = {alt}");
    }

    #[test]
    fn test_altitude_falls_back_without_barometer() {
        let mut fusion = SensorFusion::new(FusionConfig::default(), caps(false, false));
        assert!(fusion
            .feed_pressure(&BarometricSample { timestamp: 0.0, pressure_hpa: 1000.0 })
            .is_none());
        fusion.on_fix_accepted(0.0, 0.0, 50.0, 0.0, 0.0, 0.0);
        assert_eq!(fusion.fused_altitude(52.0, 51.0), 52.0);
        assert_eq!(fusion.fused_altitude(f64::NAN, 51.0), 51.0);
    }

    #[test]
    fn test_peak_detection_with_min_interval() {
        let mut fusion = SensorFusion::new(FusionConfig::default(), caps(false, false));
        let mut steps = 0;
        // Peaks at 0.0, 0.1 (too soon), 0.5
        let trace = [
            (0.00, 13.0),
            (0.05, 9.0),
            (0.10, 13.5),
            (0.15, 9.0),
            (0.50, 14.0),
            (0.55, 9.0),
        ];
        for (t, mag) in trace {
            steps += fusion.feed_motion(&MotionSample::new(t, mag)).len();
        }
        assert_eq!(steps, 2);
        assert_eq!(fusion.motion_state().step_count, 2);
    }

    #[test]
    fn test_hardware_source_ignores_accelerometer_peaks() {
        let mut fusion = SensorFusion::new(FusionConfig::default(), caps(false, true));
        assert_eq!(fusion.step_source(), StepSource::Hardware);
        fusion.feed_motion(&MotionSample::new(0.0, 15.0));
        fusion.feed_motion(&MotionSample::new(0.1, 9.0));
        assert_eq!(fusion.motion_state().step_count, 0);
        let events = fusion.feed_step(&StepEvent { timestamp: 1.0, steps: 2, cadence: Some(170.0) });
        assert_eq!(events, vec![FusionEvent::StepsDetected { count: 2, total: 2 }]);
        assert_eq!(fusion.cadence(), 170.0);
    }

    #[test]
    fn test_cadence_from_step_history() {
        let mut fusion = SensorFusion::new(FusionConfig::default(), caps(false, true));
        for i in 0..=6 {
            fusion.feed_step(&StepEvent { timestamp: i as f64 * 0.5, steps: 1, cadence: None });
        }
        assert_relative_eq!(fusion.cadence(), 120.0, epsilon = 1e-9);
    }

    #[test]
    fn test_stride_model() {
        let c = FusionConfig::default();
        assert_eq!(stride_for_speed(0.0, &c), 0.5);
        assert_relative_eq!(stride_for_speed(3.0, &c), 1.7, epsilon = 1e-12);
        assert_eq!(stride_for_speed(10.0, &c), 2.5);
    }

    #[test]
    fn test_dead_reckoning_lifecycle() {
        let projector = CoordinateProjector::with_origin(40.0, -74.0);
        let mut fusion = SensorFusion::new(FusionConfig::default(), caps(false, true));
        fusion.on_fix_accepted(40.0, -74.0, 10.0, 2.5, 90.0, 100.0);

        // Within the lost threshold nothing happens
        let (est, _) = fusion.tick(104.0, Some(100.0), &projector);
        assert!(est.is_none());

        for k in 0..10 {
            fusion.feed_step(&StepEvent { timestamp: 101.0 + k as f64 * 0.4, steps: 1, cadence: None });
        }
        let (est, events) = fusion.tick(106.0, Some(100.0), &projector);
        let est = est.unwrap();
        assert!(matches!(events[0], FusionEvent::DeadReckoningActivated { .. }));
        assert_relative_eq!(est.distance, 15.0, epsilon = 1e-9);
        let (n, e) = projector.to_local(est.latitude, est.longitude).unwrap();
        assert_relative_eq!(n, 0.0, epsilon = 1e-6);
        assert_relative_eq!(e, 15.0, epsilon = 1e-6);
        assert!(fusion.is_dead_reckoning());

        let events = fusion.on_fix_accepted(40.0, -73.9998, 10.0, 2.5, 90.0, 108.0);
        assert!(matches!(events[0], FusionEvent::DeadReckoningCleared { step_count: 10, .. }));
        assert!(fusion.dead_reckoning().is_none());
        assert!(!fusion.is_dead_reckoning());
    }

    #[test]
    fn test_dead_reckoning_withheld_after_window() {
        let projector = CoordinateProjector::with_origin(40.0, -74.0);
        let mut fusion = SensorFusion::new(FusionConfig::default(), caps(false, false));
        fusion.on_fix_accepted(40.0, -74.0, 10.0, 2.0, 0.0, 0.0);
        assert!(fusion.tick(6.0, Some(0.0), &projector).0.is_some());
        assert!(fusion.tick(60.0, Some(0.0), &projector).0.is_some());
        let (est, events) = fusion.tick(66.5, Some(0.0), &projector);
        assert!(est.is_none());
        assert!(matches!(events[0], FusionEvent::DeadReckoningExpired { .. }));
        assert!(fusion.tick(70.0, Some(0.0), &projector).1.is_empty());
    }

    #[test]
    fn test_window_counts_from_last_fix() {
        let projector = CoordinateProjector::with_origin(40.0, -74.0);
        let mut fusion = SensorFusion::new(FusionConfig::default(), caps(false, true));
        fusion.on_fix_accepted(40.0, -74.0, 10.0, 2.0, 0.0, 5.0);
        let (est, _) = fusion.tick(11.0, Some(5.0), &projector);
        assert_relative_eq!(est.unwrap().remaining_window, 54.0, epsilon = 1e-9);

        let (est, _) = fusion.tick(65.0, Some(5.0), &projector);
        assert_relative_eq!(est.unwrap().elapsed, 60.0, epsilon = 1e-9);
        let (est, events) = fusion.tick(65.5, Some(5.0), &projector);
        assert!(est.is_none());
        assert_eq!(events, vec![FusionEvent::DeadReckoningExpired { elapsed_secs: 60.5 }]);
    }

    #[test]
    fn test_no_step_source_means_no_dead_reckoning() {
        let projector = CoordinateProjector::with_origin(0.0, 0.0);
        let mut fusion = SensorFusion::new(
            FusionConfig::default(),
            SensorCapabilities { barometer: false, step_counter: false, accelerometer: false },
        );
        fusion.on_fix_accepted(0.0, 0.0, 0.0, 1.0, 0.0, 0.0);
        assert!(fusion.tick(20.0, Some(0.0), &projector).0.is_none());
    }

    #[test]
    fn test_acceleration_variance() {
        let mut fusion = SensorFusion::new(FusionConfig::default(), caps(false, false));
        assert!(fusion.acceleration_variance().is_none());
        fusion.feed_motion(&MotionSample::new(0.0, 8.0));
        fusion.feed_motion(&MotionSample::new(0.1, 12.0));
        assert_relative_eq!(fusion.acceleration_variance().unwrap(), 4.0);

        let mut sample = MotionSample::new(0.2, 9.8);
        sample.acceleration_variance = Some(0.7);
        fusion.feed_motion(&sample);
        assert_eq!(fusion.acceleration_variance(), Some(0.7));
    }
}
