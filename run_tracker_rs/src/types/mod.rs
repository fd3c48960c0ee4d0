pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Standard gravity used to separate motion from the resting accelerometer reading (m/s²)
pub const GRAVITY: f64 = 9.80665;

/// Raw position fix as reported by the platform positioning subsystem
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Non-finite when the platform reported no altitude
    pub altitude: f64,
    pub speed: Option<f64>,
    /// Degrees clockwise from north
    pub bearing: Option<f64>,
    pub horizontal_accuracy: f64,
    pub speed_accuracy: Option<f64>,
}

impl RawFix {
    pub fn new(timestamp: f64, latitude: f64, longitude: f64, horizontal_accuracy: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            altitude: f64::NAN,
            speed: None,
            bearing: None,
            horizontal_accuracy,
            speed_accuracy: None,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = altitude;
        self
    }

    pub fn with_speed(mut self, speed: f64, speed_accuracy: Option<f64>) -> Self {
        self.speed = Some(speed);
        self.speed_accuracy = speed_accuracy;
        self
    }

    pub fn with_bearing(mut self, bearing: f64) -> Self {
        self.bearing = Some(bearing);
        self
    }

    pub fn has_altitude(&self) -> bool {
        self.altitude.is_finite()
    }
}

/// Smoothed location produced by the pipeline and appended to the filtered route
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilteredLocation {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// m/s
    pub speed: f64,
    /// Degrees in [0, 360)
    pub bearing: f64,
    /// Counted distance since the previous real location (0 when treated as drift)
    pub distance_from_previous: f64,
    pub cumulative_distance: f64,
    /// True when produced by dead reckoning instead of a real fix
    pub interpolated: bool,
}

/// Accelerometer reading delivered by the platform
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub timestamp: f64,
    /// |a| including gravity (m/s²)
    pub acceleration_magnitude: f64,
    /// Rolling variance if the platform already computes one
    pub acceleration_variance: Option<f64>,
}

impl MotionSample {
    pub fn new(timestamp: f64, acceleration_magnitude: f64) -> Self {
        Self {
            timestamp,
            acceleration_magnitude,
            acceleration_variance: None,
        }
    }

    pub fn from_axes(timestamp: f64, x: f64, y: f64, z: f64) -> Self {
        Self::new(timestamp, (x * x + y * y + z * z).sqrt())
    }
}

/// Derived motion picture held by the sensor fusion coordinator
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionState {
    pub acceleration_magnitude: f64,
    pub acceleration_variance: f64,
    pub step_count: u64,
    /// Steps per minute
    pub cadence: f64,
    /// Meters
    pub stride_estimate: f64,
}

/// Barometer reading in hectopascal
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BarometricSample {
    pub timestamp: f64,
    pub pressure_hpa: f64,
}

/// Hardware step detector event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    pub timestamp: f64,
    /// Steps since the previous event
    pub steps: u32,
    /// Steps per minute, when the platform reports one
    pub cadence: Option<f64>,
}

/// Output of the barometric altimeter
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BarometricState {
    pub raw_pressure_hpa: f64,
    pub smoothed_pressure_hpa: f64,
    /// Meters relative to the reference pressure captured at session start
    pub relative_altitude: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeadReckoningEstimate {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters travelled since the last accepted fix
    pub distance: f64,
    pub step_count: u64,
    /// Seconds since the last accepted fix
    pub elapsed: f64,
    /// Seconds of extrapolation still allowed
    pub remaining_window: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingPhase {
    Idle,
    Starting,
    Running,
    Paused,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositioningStatus {
    Searching,
    Locked,
    Lost,
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunningState {
    Moving,
    Stationary,
}

/// Accuracy/rate requested from the platform positioning subsystem
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccuracyMode {
    /// Full accuracy, ~1 Hz fixes
    High,
    /// Reduced accuracy and rate while the runner stands still
    LowPower,
}

/// Optional sensors detected once at session start
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorCapabilities {
    pub barometer: bool,
    pub step_counter: bool,
    pub accelerometer: bool,
}

impl Default for SensorCapabilities {
    fn default() -> Self {
        Self {
            barometer: false,
            step_counter: false,
            accelerometer: true,
        }
    }
}

/// Normalize an angle in degrees to [0, 360)
pub fn normalize_bearing(degrees: f64) -> f64 {
    let b = degrees.rem_euclid(360.0);
    if b >= 360.0 {
        0.0
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_magnitude() {
        let sample = MotionSample::from_axes(0.0, 3.0, 4.0, 0.0);
        assert_eq!(sample.acceleration_magnitude, 5.0);
    }

    #[test]
    fn test_normalize_bearing() {
        assert_eq!(normalize_bearing(-90.0), 270.0);
        assert_eq!(normalize_bearing(360.0), 0.0);
        assert_eq!(normalize_bearing(725.0), 5.0);
    }

    #[test]
    fn test_missing_altitude() {
        let fix = RawFix::new(0.0, 1.0, 2.0, 5.0);
        assert!(!fix.has_altitude());
        assert!(fix.with_altitude(12.0).has_altitude());
    }
}
