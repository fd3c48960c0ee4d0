//! Conversions from Android sensor callbacks to tracker inputs.

use run_tracker_rs::types::{BarometricSample, MotionSample, RawFix, StepEvent};
use serde::{Deserialize, Serialize};

/// `android.location.Location` as handed over from Kotlin.
/// Optional fields come with their `has*()` flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AndroidLocation {
    /// UTC milliseconds (`Location.getTime()`)
    pub time_ms: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub has_altitude: bool,
    pub altitude: f64,
    pub has_speed: bool,
    pub speed: f32,
    pub has_bearing: bool,
    pub bearing: f32,
    pub has_accuracy: bool,
    pub accuracy: f32,
    pub has_speed_accuracy: bool,
    pub speed_accuracy: f32,
}

impl AndroidLocation {
    pub fn timestamp(&self) -> f64 {
        self.time_ms as f64 / 1000.0
    }

    /// A location without accuracy maps to a negative accuracy, which the
    /// outlier gate rejects.
    pub fn to_raw_fix(&self) -> RawFix {
        let accuracy = if self.has_accuracy {
            self.accuracy as f64
        } else {
            -1.0
        };
        let mut fix = RawFix::new(self.timestamp(), self.latitude, self.longitude, accuracy);
        if self.has_altitude {
            fix = fix.with_altitude(self.altitude);
        }
        if self.has_speed {
            let speed_accuracy = self.has_speed_accuracy.then_some(self.speed_accuracy as f64);
            fix = fix.with_speed(self.speed as f64, speed_accuracy);
        }
        if self.has_bearing {
            fix = fix.with_bearing(self.bearing as f64);
        }
        fix
    }
}

/// Sensor events are stamped with `elapsedRealtimeNanos`. Convert to epoch
/// seconds using a paired reading of both clocks.
pub fn elapsed_nanos_to_epoch(event_nanos: i64, ref_epoch_secs: f64, ref_elapsed_nanos: i64) -> f64 {
    ref_epoch_secs + (event_nanos - ref_elapsed_nanos) as f64 * 1e-9
}

/// TYPE_ACCELEROMETER reading (m/s², gravity included)
pub fn accelerometer_sample(timestamp: f64, x: f64, y: f64, z: f64) -> MotionSample {
    MotionSample::from_axes(timestamp, x, y, z)
}

/// TYPE_PRESSURE reading (hPa)
pub fn pressure_sample(timestamp: f64, pressure_hpa: f64) -> BarometricSample {
    BarometricSample {
        timestamp,
        pressure_hpa,
    }
}

/// Turns the cumulative TYPE_STEP_COUNTER value into per-event deltas.
///
/// The counter counts since boot, so the first reading only sets the
/// baseline. A drop (reboot or sensor reset) re-baselines.
#[derive(Debug, Default, Clone)]
pub struct StepCounterReceiver {
    last_total: Option<u64>,
}

impl StepCounterReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_counter(&mut self, timestamp: f64, total: f64) -> Option<StepEvent> {
        if !total.is_finite() || total < 0.0 {
            return None;
        }
        let total = total as u64;
        let previous = self.last_total.replace(total)?;
        if total <= previous {
            return None;
        }
        let steps = u32::try_from(total - previous).unwrap_or(u32::MAX);
        Some(StepEvent {
            timestamp,
            steps,
            cadence: None,
        })
    }

    pub fn reset(&mut self) {
        self.last_total = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> AndroidLocation {
        AndroidLocation {
            time_ms: 1_700_000_000_500,
            latitude: 48.8584,
            longitude: 2.2945,
            has_altitude: false,
            altitude: 0.0,
            has_speed: true,
            speed: 2.5,
            has_bearing: false,
            bearing: 0.0,
            has_accuracy: true,
            accuracy: 4.0,
            has_speed_accuracy: false,
            speed_accuracy: 0.0,
        }
    }

    #[test]
    fn test_location_flags() {
        let fix = location().to_raw_fix();
        assert_eq!(fix.timestamp, 1_700_000_000.5);
        assert!(!fix.has_altitude());
        assert_eq!(fix.speed, Some(2.5));
        assert_eq!(fix.speed_accuracy, None);
        assert_eq!(fix.bearing, None);
        assert_eq!(fix.horizontal_accuracy, 4.0);
    }

    #[test]
    fn test_missing_accuracy_is_negative() {
        let mut loc = location();
        loc.has_accuracy = false;
        assert!(loc.to_raw_fix().horizontal_accuracy < 0.0);
    }

    #[test]
    fn test_step_counter_deltas() {
        let mut rx = StepCounterReceiver::new();
        assert!(rx.on_counter(0.0, 12_000.0).is_none());
        assert!(rx.on_counter(1.0, 12_000.0).is_none());
        let e = rx.on_counter(2.0, 12_003.0).unwrap();
        assert_eq!(e.steps, 3);
        assert_eq!(e.timestamp, 2.0);
        // Reboot
        assert!(rx.on_counter(3.0, 5.0).is_none());
        assert_eq!(rx.on_counter(4.0, 7.0).unwrap().steps, 2);
    }

    #[test]
    fn test_elapsed_clock_conversion() {
        let t = elapsed_nanos_to_epoch(2_500_000_000, 1_700_000_000.0, 1_000_000_000);
        assert!((t - 1_700_000_001.5).abs() < 1e-6);
    }

    #[test]
    fn test_accelerometer_magnitude() {
        let s = accelerometer_sample(0.0, 3.0, 4.0, 0.0);
        assert_eq!(s.acceleration_magnitude, 5.0);
    }
}
