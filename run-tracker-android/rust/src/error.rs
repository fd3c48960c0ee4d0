use jni::JNIEnv;
use run_tracker_rs::TrackerError;
use thiserror::Error;

/// Errors surfaced across the JNI boundary
#[derive(Error, Debug)]
pub enum JniError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("Engine not initialized")]
    NotInitialized,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("JNI error: {0}")]
    Jni(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<jni::errors::Error> for JniError {
    fn from(e: jni::errors::Error) -> Self {
        JniError::Jni(e.to_string())
    }
}

impl From<serde_json::Error> for JniError {
    fn from(e: serde_json::Error) -> Self {
        JniError::Tracker(TrackerError::Json(e))
    }
}

/// Result type for JNI operations
pub type JResult<T> = Result<T, JniError>;

/// Java exception class used for an error
pub fn exception_class(error: &JniError) -> &'static str {
    match error {
        JniError::Tracker(e) => match e {
            TrackerError::AlreadyRunning
            | TrackerError::NotRunning
            | TrackerError::InvalidState(_)
            | TrackerError::EngineStopped => "java/lang/IllegalStateException",
            TrackerError::Config(_) => "java/lang/IllegalArgumentException",
            TrackerError::Io(_) => "java/io/IOException",
            TrackerError::ProjectorNotInitialized | TrackerError::Json(_) => {
                "java/lang/RuntimeException"
            }
        },
        JniError::NotInitialized => "java/lang/IllegalStateException",
        JniError::InvalidParameters(_) => "java/lang/IllegalArgumentException",
        JniError::Jni(_) | JniError::Internal(_) => "java/lang/RuntimeException",
    }
}

/// Throw Java exception from Rust error
pub fn throw_java_exception(env: &mut JNIEnv, error: &JniError) -> JResult<()> {
    let message = error.to_string();
    env.throw_new(exception_class(error), message)
        .map_err(|_| JniError::Jni("Failed to throw exception".to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_mapping() {
        assert_eq!(
            exception_class(&JniError::Tracker(TrackerError::AlreadyRunning)),
            "java/lang/IllegalStateException"
        );
        assert_eq!(
            exception_class(&JniError::Tracker(TrackerError::Config("x".into()))),
            "java/lang/IllegalArgumentException"
        );
        assert_eq!(
            exception_class(&JniError::NotInitialized),
            "java/lang/IllegalStateException"
        );
        assert_eq!(
            exception_class(&JniError::Internal("lock".into())),
            "java/lang/RuntimeException"
        );
    }

    #[test]
    fn test_tracker_message_passes_through() {
        let e: JniError = TrackerError::NotRunning.into();
        assert_eq!(e.to_string(), TrackerError::NotRunning.to_string());
    }
}
