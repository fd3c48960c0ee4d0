pub mod kalman;
pub mod outlier;

pub use kalman::{FilterStep, KalmanConfig, KalmanEstimate, KalmanFilter, KalmanState};
pub use outlier::{OutlierConfig, OutlierDetector, RejectReason, RejectionCounts, Verdict};
