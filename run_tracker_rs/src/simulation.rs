//! Synthetic sessions for tests, the demo binary and replay fixtures.
//!
//! A `Scenario` is a time-ordered list of sensor inputs plus the ground
//! truth distance. Scenarios serialize to the same JSON format the replay
//! binary reads, so a generated scenario doubles as a recorded session.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::TrackerResult;
use crate::pipeline::{Pipeline, TrackerEvent};
use crate::projection::CoordinateProjector;
use crate::types::{
    normalize_bearing, BarometricSample, MotionSample, RawFix, SensorCapabilities, StepEvent,
    GRAVITY,
};

pub const DEFAULT_ORIGIN: (f64, f64) = (47.6062, -122.3321);
pub const DEFAULT_START: f64 = 1_700_000_000.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "sample")]
pub enum SensorInput {
    Fix(RawFix),
    Motion(MotionSample),
    Pressure(BarometricSample),
    Step(StepEvent),
    PositioningAvailable(bool),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimedInput {
    /// Delivery time (s)
    pub at: f64,
    pub input: SensorInput,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub capabilities: SensorCapabilities,
    pub start_time: f64,
    pub end_time: f64,
    pub inputs: Vec<TimedInput>,
    /// Length of the true path (m)
    pub true_distance: f64,
}

fn gaussian(rng: &mut StdRng, std: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    z * std
}

fn origin_frame() -> CoordinateProjector {
    CoordinateProjector::with_origin(DEFAULT_ORIGIN.0, DEFAULT_ORIGIN.1)
}

/// Local (north, east) → geographic around the default origin
fn to_geo(frame: &CoordinateProjector, north: f64, east: f64) -> (f64, f64) {
    frame
        .to_geographic(north, east)
        .unwrap_or(DEFAULT_ORIGIN)
}

impl Scenario {
    fn new(name: &str, capabilities: SensorCapabilities, duration: f64) -> Self {
        Scenario {
            name: name.to_string(),
            capabilities,
            start_time: DEFAULT_START,
            end_time: DEFAULT_START + duration,
            inputs: Vec::new(),
            true_distance: 0.0,
        }
    }

    fn push(&mut self, at: f64, input: SensorInput) {
        self.inputs.push(TimedInput { at, input });
    }

    fn sort(&mut self) {
        self.inputs.sort_by(|a, b| a.at.total_cmp(&b.at));
    }

    /// Standing still with uniform ±`jitter` m fix noise at 1 Hz
    pub fn stationary(seed: u64, duration_secs: u64, jitter: f64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let frame = origin_frame();
        let mut s = Scenario::new("stationary", SensorCapabilities::default(), duration_secs as f64);
        for k in 0..=duration_secs {
            let t = s.start_time + k as f64;
            let (lat, lon) = to_geo(
                &frame,
                rng.gen_range(-jitter..=jitter),
                rng.gen_range(-jitter..=jitter),
            );
            let fix = RawFix::new(t, lat, lon, 5.0)
                .with_altitude(50.0 + rng.gen_range(-2.0..=2.0))
                .with_speed(gaussian(&mut rng, 0.15).abs(), Some(0.5));
            s.push(t, SensorInput::Fix(fix));
        }
        s
    }

    /// One lap of a circle of circumference `length` at constant `speed`,
    /// starting at the origin heading north. Positions carry Gaussian noise of
    /// `position_noise` m per axis and report `accuracy` m. Doppler speed is
    /// good to 0.1 m/s and bearing to 3°.
    pub fn closed_loop(
        seed: u64,
        length: f64,
        speed: f64,
        position_noise: f64,
        accuracy: f64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let frame = origin_frame();
        let radius = length / (2.0 * PI);
        let lap_secs = length / speed;
        let mut s = Scenario::new("closed_loop", SensorCapabilities::default(), lap_secs + 1.0);
        s.true_distance = length;

        let mut offsets: Vec<f64> = (0..=lap_secs.floor() as u64).map(|k| k as f64).collect();
        if offsets.last().map_or(true, |last| *last < lap_secs) {
            offsets.push(lap_secs);
        }

        for dt in offsets {
            let theta = speed * dt / radius;
            let north = radius * theta.sin();
            let east = radius - radius * theta.cos();
            let v_north = speed * theta.cos();
            let v_east = speed * theta.sin();
            let bearing = normalize_bearing(v_east.atan2(v_north).to_degrees());

            let (lat, lon) = to_geo(
                &frame,
                north + gaussian(&mut rng, position_noise),
                east + gaussian(&mut rng, position_noise),
            );
            let t = s.start_time + dt;
            let fix = RawFix::new(t, lat, lon, accuracy)
                .with_altitude(30.0)
                .with_speed((speed + gaussian(&mut rng, 0.1)).max(0.0), Some(0.3))
                .with_bearing(normalize_bearing(bearing + gaussian(&mut rng, 3.0)));
            s.push(t, SensorInput::Fix(fix));
        }
        s
    }

    /// Straight run due east with a hardware step counter. Fixes stop for
    /// `gap_secs` starting `gap_start` seconds in.
    pub fn straight_with_gap(
        seed: u64,
        speed: f64,
        duration_secs: u64,
        gap_start: f64,
        gap_secs: f64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let frame = origin_frame();
        let caps = SensorCapabilities {
            barometer: false,
            step_counter: true,
            accelerometer: true,
        };
        let mut s = Scenario::new("straight_with_gap", caps, duration_secs as f64);
        s.true_distance = speed * duration_secs as f64;

        for k in 0..=duration_secs {
            let dt = k as f64;
            if dt > gap_start && dt < gap_start + gap_secs {
                continue;
            }
            let (lat, lon) = to_geo(
                &frame,
                gaussian(&mut rng, 1.0),
                speed * dt + gaussian(&mut rng, 1.0),
            );
            let t = s.start_time + dt;
            let fix = RawFix::new(t, lat, lon, 4.0)
                .with_altitude(12.0)
                .with_speed(speed + gaussian(&mut rng, 0.1), Some(0.3))
                .with_bearing(90.0 + gaussian(&mut rng, 2.0));
            s.push(t, SensorInput::Fix(fix));
        }

        // Hardware steps at the cadence implied by the stride model
        let stride = (0.4 * speed + 0.5).clamp(0.5, 2.5);
        let step_period = stride / speed.max(0.1);
        let cadence = 60.0 / step_period;
        let mut t = s.start_time + step_period;
        while t <= s.end_time {
            s.push(
                t,
                SensorInput::Step(StepEvent {
                    timestamp: t,
                    steps: 1,
                    cadence: Some(cadence),
                }),
            );
            t += step_period;
        }
        s.sort();
        s
    }

    /// Add a barometer feed at `rate_hz`, climbing at `climb_rate` m/s from `base_hpa`
    pub fn with_pressure(mut self, seed: u64, base_hpa: f64, climb_rate: f64, rate_hz: f64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        self.capabilities.barometer = true;
        let period = 1.0 / rate_hz.max(0.01);
        let mut t = self.start_time;
        while t <= self.end_time {
            let height = climb_rate * (t - self.start_time);
            let p = base_hpa * (1.0 - height / 44_330.0).powf(5.255) + gaussian(&mut rng, 0.01);
            self.push(
                t,
                SensorInput::Pressure(BarometricSample {
                    timestamp: t,
                    pressure_hpa: p,
                }),
            );
            t += period;
        }
        self.sort();
        self
    }

    /// Add an accelerometer feed at `rate_hz`. Walking adds a gait oscillation
    /// at `cadence_hz` steps per second whose peaks cross the step threshold.
    pub fn with_motion(mut self, seed: u64, rate_hz: f64, walking: bool, cadence_hz: f64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let period = 1.0 / rate_hz.max(1.0);
        let mut t = self.start_time;
        while t <= self.end_time {
            let gait = if walking {
                4.0 * (2.0 * PI * cadence_hz * (t - self.start_time)).sin()
            } else {
                0.0
            };
            let magnitude = GRAVITY + gait + gaussian(&mut rng, 0.05);
            self.push(t, SensorInput::Motion(MotionSample::new(t, magnitude)));
            t += period;
        }
        self.sort();
        self
    }

    /// Strip speed and bearing from every fix, as a receiver without Doppler would
    pub fn without_velocity(mut self) -> Self {
        for item in &mut self.inputs {
            if let SensorInput::Fix(fix) = &mut item.input {
                fix.speed = None;
                fix.speed_accuracy = None;
                fix.bearing = None;
            }
        }
        self.name = format!("{}_without_velocity", self.name);
        self
    }

    pub fn fixes(&self) -> impl Iterator<Item = &RawFix> {
        self.inputs.iter().filter_map(|i| match &i.input {
            SensorInput::Fix(f) => Some(f),
            _ => None,
        })
    }

    /// Replay the scenario through `pipeline`, ticking every `tick_interval`
    /// seconds. Inputs are delivered with `now` equal to their delivery time.
    pub fn drive(&self, pipeline: &mut Pipeline, tick_interval: f64) -> TrackerResult<Vec<TrackerEvent>> {
        let mut events = pipeline.start(self.start_time)?;
        let tick = tick_interval.max(0.01);
        let mut next_tick = self.start_time + tick;

        for item in &self.inputs {
            while next_tick <= item.at {
                events.extend(pipeline.tick(next_tick));
                next_tick += tick;
            }
            events.extend(deliver(pipeline, &item.input, item.at));
        }
        while next_tick <= self.end_time {
            events.extend(pipeline.tick(next_tick));
            next_tick += tick;
        }
        events.extend(pipeline.stop(self.end_time)?);
        Ok(events)
    }
}

/// Push one input into the pipeline
pub fn deliver(pipeline: &mut Pipeline, input: &SensorInput, now: f64) -> Vec<TrackerEvent> {
    match input {
        SensorInput::Fix(f) => pipeline.push_fix(f.clone(), now),
        SensorInput::Motion(m) => pipeline.push_motion(m.clone(), now),
        SensorInput::Pressure(p) => pipeline.push_pressure(p.clone(), now),
        SensorInput::Step(s) => pipeline.push_step(s.clone(), now),
        SensorInput::PositioningAvailable(a) => pipeline.set_positioning_available(*a),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_scenario() {
        let a = Scenario::closed_loop(7, 400.0, 3.0, 1.5, 5.0);
        let b = Scenario::closed_loop(7, 400.0, 3.0, 1.5, 5.0);
        assert_eq!(a.inputs, b.inputs);
        let c = Scenario::closed_loop(8, 400.0, 3.0, 1.5, 5.0);
        assert_ne!(a.inputs, c.inputs);
    }

    #[test]
    fn test_loop_closes_on_itself() {
        let s = Scenario::closed_loop(1, 400.0, 3.0, 0.0, 5.0);
        let fixes: Vec<&RawFix> = s.fixes().collect();
        let first = fixes[0];
        let last = fixes[fixes.len() - 1];
        assert!((first.latitude - last.latitude).abs() < 1e-9);
        assert!((first.longitude - last.longitude).abs() < 1e-9);
        assert_eq!(fixes.len(), 135);
    }

    #[test]
    fn test_gap_has_no_fixes() {
        let s = Scenario::straight_with_gap(3, 3.0, 30, 10.0, 8.0);
        let gap: Vec<&RawFix> = s
            .fixes()
            .filter(|f| {
                let dt = f.timestamp - s.start_time;
                dt > 10.0 && dt < 18.0
            })
            .collect();
        assert!(gap.is_empty());
        assert!(s.inputs.windows(2).all(|w| w[0].at <= w[1].at));
        assert!(s.inputs.iter().any(|i| matches!(i.input, SensorInput::Step(_))));
    }

    #[test]
    fn test_without_velocity_strips_doppler() {
        let s = Scenario::closed_loop(4, 100.0, 2.0, 1.0, 5.0).without_velocity();
        assert_eq!(s.name, "closed_loop_without_velocity");
        assert!(s.fixes().all(|f| f.speed.is_none() && f.bearing.is_none()));
        assert!(s.fixes().all(|f| f.horizontal_accuracy == 5.0));
    }

    #[test]
    fn test_scenario_json_round_trip_shape() {
        let s = Scenario::stationary(2, 3, 3.0);
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains(r#""kind":"Fix""#));
        let back: Scenario = serde_json::from_str(&json).unwrap();
        assert_eq!(back.inputs.len(), 4);
    }
}
