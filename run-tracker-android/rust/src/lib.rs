// Run Tracker Android JNI Library
// Exposes the Rust run tracking engine to Kotlin via JNI

use std::sync::Once;

pub mod android_jni;
pub mod error;
pub mod sensor_receiver;
pub mod session;

pub use error::{JResult, JniError};
pub use sensor_receiver::{AndroidLocation, StepCounterReceiver};
pub use session::{JniPlatform, PlatformRequests, TrackerSession};

static LOGGER: Once = Once::new();

/// Route `log` records to logcat. Safe to call repeatedly.
pub fn init_logging() {
    LOGGER.call_once(|| {
        #[cfg(target_os = "android")]
        {
            if android_log::init("RunTracker").is_err() {
                eprintln!("RunTracker: logcat logger already installed");
            }
        }
    });
}
