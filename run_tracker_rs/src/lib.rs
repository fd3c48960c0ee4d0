//! GPS and sensor-fusion run tracking.
//!
//! Raw location fixes pass an outlier gate, are projected into a local
//! tangent plane and smoothed by a 6-state Kalman filter. Barometer, step
//! and accelerometer data refine altitude, motion state and short GPS gaps.
//! `Pipeline` is the synchronous core; `engine` runs it on a single worker
//! thread behind a cloneable handle.

pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod filters;
pub mod pipeline;
pub mod power;
pub mod projection;
pub mod sensor_fusion;
pub mod session;
pub mod simulation;
pub mod smoothing;
pub mod stationary;
pub mod types;

pub use config::TrackerConfig;
pub use engine::{Clock, EngineHandle, ManualClock, NullPlatform, PlatformAdapter, SystemClock, TrackerEngine};
pub use error::{TrackerError, TrackerResult};
pub use export::{SessionExport, SessionStats};
pub use pipeline::{LocationUpdate, Pipeline, SessionSnapshot, TrackerEvent};
pub use types::{
    AccuracyMode, BarometricSample, FilteredLocation, MotionSample, PositioningStatus, RawFix,
    RunningState, SensorCapabilities, StepEvent, TrackingPhase,
};
