//! 6-state constant-velocity Kalman filter in the session's local frame.
//!
//! State: [north, east, alt, v_north, v_east, v_up]. Every fix measures the
//! full state (H = I); components the receiver did not report are measured
//! with a large variance so the filter effectively ignores them.

use serde::{Deserialize, Serialize};

use crate::types::linalg::*;
use crate::types::{normalize_bearing, RawFix};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    // ── Process noise ──
    /// Horizontal acceleration noise (m/s²)
    pub horizontal_accel_std: f64,
    /// Vertical acceleration noise (m/s²)
    pub vertical_accel_std: f64,
    /// Acceleration variance that maps to a dynamic coefficient of 1.0 ((m/s²)²)
    pub reference_accel_variance: f64,
    pub min_dynamic_coefficient: f64,
    pub max_dynamic_coefficient: f64,

    // ── Measurement noise ──
    /// Floor applied to the reported horizontal accuracy (m)
    pub min_horizontal_accuracy: f64,
    /// Altitude std as a multiple of horizontal accuracy
    pub altitude_accuracy_scale: f64,
    /// Velocity variance when speed accuracy is unreported ((m/s)²)
    pub unknown_speed_accuracy_variance: f64,
    /// Velocity variance when the velocity vector cannot be formed ((m/s)²)
    pub unknown_velocity_variance: f64,
    /// Initial velocity variance when the first fix carries no velocity
    pub initial_velocity_variance: f64,
    /// Below this reported speed a fix without bearing is treated as standing still (m/s)
    pub slow_speed_threshold: f64,
    pub vertical_velocity_variance: f64,
    /// Zero-velocity measurement variance applied at rest ((m/s)²)
    pub zero_velocity_variance: f64,
    /// Altitude variance when the fix has no altitude (m²)
    pub unknown_altitude_variance: f64,

    // ── Continuity ──
    /// Gaps at or beyond this reinitialize the filter (s)
    pub max_gap: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            horizontal_accel_std: 1.0,
            vertical_accel_std: 0.5,
            reference_accel_variance: 1.0,
            min_dynamic_coefficient: 0.5,
            max_dynamic_coefficient: 10.0,
            min_horizontal_accuracy: 1.0,
            altitude_accuracy_scale: 1.5,
            unknown_speed_accuracy_variance: 25.0,
            unknown_velocity_variance: 1e4,
            initial_velocity_variance: 4.0,
            slow_speed_threshold: 0.5,
            vertical_velocity_variance: 1.0,
            zero_velocity_variance: 0.25,
            unknown_altitude_variance: 1e6,
            max_gap: 30.0,
        }
    }
}

/// Filter state and covariance, plus the timestamp of the last measurement
#[derive(Clone, Debug, PartialEq)]
pub struct KalmanState {
    pub x: StateVec6,
    pub p: StateMat6,
    pub timestamp: f64,
}

/// A fix expressed in the local frame with its diagonal noise
#[derive(Clone, Debug, PartialEq)]
pub struct KalmanMeasurement {
    pub z: MeasurementVec6,
    pub r: MeasurementNoise6,
    pub timestamp: f64,
    /// True when the fix carried enough information to form a velocity vector
    pub has_velocity: bool,
}

/// What `process` did with a measurement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterStep {
    Initialized,
    /// Time gap was non-positive or too long
    Reinitialized,
    Updated,
    /// Innovation covariance was singular; predicted state kept
    SkippedUpdate,
}

/// Readable view of the current estimate
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KalmanEstimate {
    pub north: f64,
    pub east: f64,
    pub altitude: f64,
    pub v_north: f64,
    pub v_east: f64,
    pub v_up: f64,
    pub speed: f64,
    pub bearing: f64,
    /// RMS of the horizontal position variances (m)
    pub position_std: f64,
    /// RMS of the horizontal velocity variances (m/s)
    pub velocity_std: f64,
    pub timestamp: f64,
}

pub struct KalmanFilter {
    config: KalmanConfig,
    state: Option<KalmanState>,
    update_count: u64,
    skipped_count: u64,
    reinit_count: u64,
}

impl KalmanFilter {
    pub fn new(config: KalmanConfig) -> Self {
        Self {
            config,
            state: None,
            update_count: 0,
            skipped_count: 0,
            reinit_count: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&KalmanState> {
        self.state.as_ref()
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped_count
    }

    pub fn reinit_count(&self) -> u64 {
        self.reinit_count
    }

    pub fn reset(&mut self) {
        self.state = None;
        self.update_count = 0;
        self.skipped_count = 0;
        self.reinit_count = 0;
    }

    /// Build the measurement for a fix already projected to (north, east).
    pub fn measurement(&self, north: f64, east: f64, fix: &RawFix) -> KalmanMeasurement {
        let c = &self.config;
        let (v_north, v_east, vel_var, has_velocity) = self.velocity_measurement(fix);

        let acc = fix.horizontal_accuracy.max(c.min_horizontal_accuracy);
        let (altitude, alt_var) = if fix.has_altitude() {
            (fix.altitude, (c.altitude_accuracy_scale * acc).powi(2))
        } else {
            let alt = self.state.as_ref().map(|s| s.x[IDX_ALT]).unwrap_or(0.0);
            (alt, c.unknown_altitude_variance)
        };

        let z = MeasurementVec6::new(north, east, altitude, v_north, v_east, 0.0);
        let r = MeasurementNoise6::from_diagonal(&StateVec6::new(
            acc * acc,
            acc * acc,
            alt_var,
            vel_var,
            vel_var,
            c.vertical_velocity_variance,
        ));

        KalmanMeasurement {
            z,
            r,
            timestamp: fix.timestamp,
            has_velocity,
        }
    }

    fn velocity_measurement(&self, fix: &RawFix) -> (f64, f64, f64, bool) {
        let c = &self.config;
        let speed_var = fix
            .speed_accuracy
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(|s| s * s)
            .unwrap_or(c.unknown_speed_accuracy_variance);

        match (fix.speed, fix.bearing) {
            (Some(speed), Some(bearing)) if speed.is_finite() && bearing.is_finite() => {
                let b = bearing.to_radians();
                (speed * b.cos(), speed * b.sin(), speed_var, true)
            }
            // Slow with no heading: the receiver is close to standing still
            (Some(speed), _) if speed.is_finite() && speed < c.slow_speed_threshold => {
                (0.0, 0.0, speed_var + speed * speed, true)
            }
            _ => (0.0, 0.0, c.unknown_velocity_variance, false),
        }
    }

    /// Turn an unobserved velocity into a zero-velocity measurement. Only
    /// for fixes taken while the subject is known to be standing still.
    pub fn constrain_at_rest(&self, m: &mut KalmanMeasurement) {
        if m.has_velocity {
            return;
        }
        let var = self.config.zero_velocity_variance;
        for idx in [IDX_V_NORTH, IDX_V_EAST] {
            m.z[idx] = 0.0;
            m.r[(idx, idx)] = var;
        }
    }

    /// Seed the state directly from a measurement
    pub fn initialize(&mut self, m: &KalmanMeasurement) {
        let mut p = m.r;
        if !m.has_velocity {
            p[(IDX_V_NORTH, IDX_V_NORTH)] = self.config.initial_velocity_variance;
            p[(IDX_V_EAST, IDX_V_EAST)] = self.config.initial_velocity_variance;
        }
        let mut x = m.z;
        x[IDX_V_UP] = 0.0;
        self.state = Some(KalmanState {
            x,
            p,
            timestamp: m.timestamp,
        });
    }

    /// Process-noise scale from the current acceleration variance
    pub fn dynamic_coefficient(&self, accel_variance: Option<f64>) -> f64 {
        let c = &self.config;
        match accel_variance {
            Some(var) if var.is_finite() && c.reference_accel_variance > 0.0 => {
                let ratio = var / c.reference_accel_variance;
                ratio.clamp(c.min_dynamic_coefficient, c.max_dynamic_coefficient)
            }
            _ => 1.0,
        }
    }

    /// Constant-velocity propagation over `dt` seconds
    pub fn predict(&mut self, dt: f64, dynamic_coefficient: f64) {
        let q = build_process_noise(
            dt,
            self.config.horizontal_accel_std,
            self.config.vertical_accel_std,
            dynamic_coefficient,
        );
        let f = transition_matrix(dt);
        if let Some(s) = self.state.as_mut() {
            s.x = f * s.x;
            s.p = f * s.p * f.transpose() + q;
            symmetrize(&mut s.p);
        }
    }

    /// Standard linear update with H = I. Returns false when the update was skipped.
    pub fn update(&mut self, m: &KalmanMeasurement) -> bool {
        let Some(s) = self.state.as_mut() else {
            return false;
        };
        s.timestamp = m.timestamp;

        let innovation_cov = s.p + m.r;
        let Some(s_inv) = invert_gauss_jordan(&innovation_cov) else {
            log::warn!(
                "kalman: singular innovation covariance at t={:.3}, keeping prediction",
                m.timestamp
            );
            self.skipped_count += 1;
            return false;
        };

        let k: KalmanGain6 = s.p * s_inv;
        let y = m.z - s.x;
        s.x += k * y;

        // Joseph form keeps P positive semi-definite
        let i_k = StateMat6::identity() - k;
        s.p = i_k * s.p * i_k.transpose() + k * m.r * k.transpose();
        symmetrize(&mut s.p);

        self.update_count += 1;
        true
    }

    /// Run one fix through the filter: initialize, reinitialize across a bad gap,
    /// or predict to the fix time and update.
    pub fn process(&mut self, m: &KalmanMeasurement, accel_variance: Option<f64>) -> FilterStep {
        let Some(last) = self.state.as_ref().map(|s| s.timestamp) else {
            self.initialize(m);
            return FilterStep::Initialized;
        };

        let dt = m.timestamp - last;
        if dt <= 0.0 || dt >= self.config.max_gap {
            log::info!("kalman: gap of {:.1}s, reinitializing from fix", dt);
            self.initialize(m);
            self.reinit_count += 1;
            return FilterStep::Reinitialized;
        }

        let coef = self.dynamic_coefficient(accel_variance);
        self.predict(dt, coef);
        if self.update(m) {
            FilterStep::Updated
        } else {
            FilterStep::SkippedUpdate
        }
    }

    pub fn estimate(&self) -> Option<KalmanEstimate> {
        let s = self.state.as_ref()?;
        let x = &s.x;
        let v_north = x[IDX_V_NORTH];
        let v_east = x[IDX_V_EAST];
        let speed = v_north.hypot(v_east);
        let bearing = normalize_bearing(v_east.atan2(v_north).to_degrees());
        let position_std =
            ((s.p[(IDX_NORTH, IDX_NORTH)] + s.p[(IDX_EAST, IDX_EAST)]) / 2.0).max(0.0).sqrt();
        let velocity_std =
            ((s.p[(IDX_V_NORTH, IDX_V_NORTH)] + s.p[(IDX_V_EAST, IDX_V_EAST)]) / 2.0).max(0.0).sqrt();
        Some(KalmanEstimate {
            north: x[IDX_NORTH],
            east: x[IDX_EAST],
            altitude: x[IDX_ALT],
            v_north,
            v_east,
            v_up: x[IDX_V_UP],
            speed,
            bearing,
            position_std,
            velocity_std,
            timestamp: s.timestamp,
        })
    }
}

pub fn transition_matrix(dt: f64) -> StateMat6 {
    let mut f = StateMat6::identity();
    f[(IDX_NORTH, IDX_V_NORTH)] = dt;
    f[(IDX_EAST, IDX_V_EAST)] = dt;
    f[(IDX_ALT, IDX_V_UP)] = dt;
    f
}

/// Discrete white-noise acceleration model per axis, scaled by the dynamic coefficient
pub fn build_process_noise(
    dt: f64,
    horizontal_std: f64,
    vertical_std: f64,
    dynamic_coefficient: f64,
) -> StateMat6 {
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let dt4 = dt2 * dt2;
    let mut q = StateMat6::zeros();
    let axes = [
        (IDX_NORTH, IDX_V_NORTH, horizontal_std),
        (IDX_EAST, IDX_V_EAST, horizontal_std),
        (IDX_ALT, IDX_V_UP, vertical_std),
    ];
    for (pos, vel, std) in axes {
        let var = std * std * dynamic_coefficient;
        q[(pos, pos)] = 0.25 * dt4 * var;
        q[(pos, vel)] = 0.5 * dt3 * var;
        q[(vel, pos)] = 0.5 * dt3 * var;
        q[(vel, vel)] = dt2 * var;
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fix(t: f64) -> RawFix {
        RawFix::new(t, 0.0, 0.0, 5.0).with_altitude(100.0)
    }

    fn filter_with(north: f64, east: f64, f: &RawFix) -> KalmanFilter {
        let mut kf = KalmanFilter::new(KalmanConfig::default());
        let m = kf.measurement(north, east, f);
        assert_eq!(kf.process(&m, None), FilterStep::Initialized);
        kf
    }

    #[test]
    fn test_initialize_from_speed_and_bearing() {
        let f = fix(0.0).with_speed(3.0, Some(0.5)).with_bearing(90.0);
        let kf = filter_with(10.0, -5.0, &f);
        let est = kf.estimate().unwrap();
        assert_eq!(est.north, 10.0);
        assert_eq!(est.east, -5.0);
        assert_relative_eq!(est.v_east, 3.0, epsilon = 1e-12);
        assert_relative_eq!(est.v_north, 0.0, epsilon = 1e-12);
        assert_relative_eq!(est.bearing, 90.0, epsilon = 1e-9);
        let p = kf.state().unwrap().p;
        assert_relative_eq!(p[(0, 0)], 25.0);
        assert_relative_eq!(p[(2, 2)], 56.25);
        assert_relative_eq!(p[(3, 3)], 0.25);
    }

    #[test]
    fn test_initialize_without_velocity_uses_moderate_variance() {
        let kf = filter_with(0.0, 0.0, &fix(0.0));
        let s = kf.state().unwrap();
        assert_eq!(s.x[IDX_V_NORTH], 0.0);
        assert_eq!(s.p[(IDX_V_NORTH, IDX_V_NORTH)], 4.0);
    }

    #[test]
    fn test_predict_moves_position_and_grows_covariance() {
        let f = fix(0.0).with_speed(2.0, Some(0.5)).with_bearing(0.0);
        let mut kf = filter_with(0.0, 0.0, &f);
        let p_before = kf.state().unwrap().p[(0, 0)];
        kf.predict(1.0, 1.0);
        let s = kf.state().unwrap();
        assert_relative_eq!(s.x[IDX_NORTH], 2.0, epsilon = 1e-12);
        assert!(s.p[(0, 0)] > p_before);
    }

    #[test]
    fn test_process_noise_scales_with_coefficient() {
        let q1 = build_process_noise(1.0, 1.0, 0.5, 1.0);
        let q10 = build_process_noise(1.0, 1.0, 0.5, 10.0);
        assert_relative_eq!(q1[(0, 0)], 0.25);
        assert_relative_eq!(q1[(0, 3)], 0.5);
        assert_relative_eq!(q1[(2, 2)], 0.0625);
        assert_relative_eq!(q10[(3, 3)], 10.0 * q1[(3, 3)]);
    }

    #[test]
    fn test_dynamic_coefficient_clamped() {
        let kf = KalmanFilter::new(KalmanConfig::default());
        assert_eq!(kf.dynamic_coefficient(None), 1.0);
        assert_eq!(kf.dynamic_coefficient(Some(0.01)), 0.5);
        assert_eq!(kf.dynamic_coefficient(Some(3.0)), 3.0);
        assert_eq!(kf.dynamic_coefficient(Some(500.0)), 10.0);
    }

    #[test]
    fn test_update_pulls_toward_measurement_and_stays_symmetric() {
        let mut kf = filter_with(0.0, 0.0, &fix(0.0));
        let m = kf.measurement(4.0, 0.0, &fix(1.0));
        assert_eq!(kf.process(&m, Some(2.0)), FilterStep::Updated);
        let s = kf.state().unwrap();
        assert!(s.x[IDX_NORTH] > 0.0 && s.x[IDX_NORTH] < 4.0);
        assert_eq!(s.p, s.p.transpose());
        assert_eq!(kf.update_count(), 1);
    }

    #[test]
    fn test_gap_reinitializes() {
        let mut kf = filter_with(0.0, 0.0, &fix(0.0));
        let m = kf.measurement(50.0, 50.0, &fix(30.0));
        assert_eq!(kf.process(&m, None), FilterStep::Reinitialized);
        assert_eq!(kf.estimate().unwrap().north, 50.0);

        let m = kf.measurement(60.0, 50.0, &fix(30.0));
        assert_eq!(kf.process(&m, None), FilterStep::Reinitialized);
        assert_eq!(kf.reinit_count(), 2);
    }

    #[test]
    fn test_singular_innovation_skips_update() {
        let mut kf = filter_with(0.0, 0.0, &fix(0.0));
        // Zero covariance and zero noise make S singular
        if let Some(s) = kf.state.as_mut() {
            s.p = StateMat6::zeros();
        }
        let mut m = kf.measurement(10.0, 0.0, &fix(1.0));
        m.r = StateMat6::zeros();
        let before = kf.state().unwrap().x;
        assert!(!kf.update(&m));
        assert_eq!(kf.state().unwrap().x, before);
        assert_eq!(kf.skipped_count(), 1);
        assert!(kf.is_initialized());
    }

    #[test]
    fn test_missing_altitude_is_deweighted() {
        let mut kf = filter_with(0.0, 0.0, &fix(0.0));
        let no_alt = RawFix::new(1.0, 0.0, 0.0, 5.0);
        let m = kf.measurement(0.0, 0.0, &no_alt);
        assert_eq!(m.r[(IDX_ALT, IDX_ALT)], 1e6);
        kf.process(&m, None);
        assert_relative_eq!(kf.estimate().unwrap().altitude, 100.0, epsilon = 0.01);
    }

    #[test]
    fn test_reset_then_initialize_is_independent() {
        let mut kf = filter_with(100.0, 100.0, &fix(0.0));
        kf.reset();
        assert!(kf.estimate().is_none());
        let m = kf.measurement(0.0, 0.0, &fix(5.0));
        kf.process(&m, None);
        let fresh = filter_with(0.0, 0.0, &fix(5.0));
        assert_eq!(kf.state(), fresh.state());
    }

    #[test]
    fn test_rest_constraint_pulls_velocity_to_zero() {
        let mut free = filter_with(0.0, 0.0, &fix(0.0));
        let mut held = filter_with(0.0, 0.0, &fix(0.0));
        for k in 1..=10 {
            let t = k as f64;
            // Jitter alternating by 3 m east
            let east = if k % 2 == 0 { 3.0 } else { -3.0 };
            let m = free.measurement(0.0, east, &fix(t));
            free.process(&m, None);
            let mut m = held.measurement(0.0, east, &fix(t));
            held.constrain_at_rest(&mut m);
            assert_eq!(m.r[(IDX_V_EAST, IDX_V_EAST)], 0.25);
            held.process(&m, None);
        }
        let free = free.estimate().unwrap();
        let held = held.estimate().unwrap();
        assert!(held.speed < free.speed);
        assert!(held.velocity_std < free.velocity_std);
        assert!(held.velocity_std < 0.5);
    }

    #[test]
    fn test_rest_constraint_keeps_observed_velocity() {
        let kf = KalmanFilter::new(KalmanConfig::default());
        let f = fix(0.0).with_speed(2.0, Some(0.4)).with_bearing(0.0);
        let mut m = kf.measurement(0.0, 0.0, &f);
        let before = m.clone();
        kf.constrain_at_rest(&mut m);
        assert_eq!(m, before);
    }
}
