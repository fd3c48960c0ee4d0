use jni::objects::{JClass, JString};
use jni::sys::{jboolean, jdouble, jfloat, jint, jlong, jstring, JNI_FALSE};
use jni::JNIEnv;

use run_tracker_rs::types::{AccuracyMode, SensorCapabilities};
use run_tracker_rs::TrackerConfig;

use crate::error::{throw_java_exception, JResult, JniError};
use crate::sensor_receiver::AndroidLocation;
use crate::session::{self, TrackerSession};

fn flag(value: jboolean) -> bool {
    value != JNI_FALSE
}

/// 0 on success, -1 after throwing
fn status(env: &mut JNIEnv, result: JResult<()>) -> jint {
    match result {
        Ok(()) => 0,
        Err(e) => {
            let _ = throw_java_exception(env, &e);
            -1
        }
    }
}

/// 1 queued, 0 dropped on a full queue, -1 after throwing
fn delivery(env: &mut JNIEnv, result: JResult<bool>) -> jint {
    match result {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => {
            let _ = throw_java_exception(env, &e);
            -1
        }
    }
}

/// Java string, or null after throwing
fn java_string(env: &mut JNIEnv, result: JResult<String>) -> jstring {
    match result.and_then(|s| Ok(env.new_string(s)?)) {
        Ok(jstr) => jstr.into_raw(),
        Err(e) => {
            let _ = throw_java_exception(env, &e);
            std::ptr::null_mut()
        }
    }
}

/// JNI: Create the tracking engine, replacing any previous one.
/// `configJson` may be null or empty for defaults.
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_initEngine(
    mut env: JNIEnv,
    _class: JClass,
    config_json: JString,
    has_barometer: jboolean,
    has_step_counter: jboolean,
    has_accelerometer: jboolean,
) -> jint {
    crate::init_logging();
    let result = (|| -> JResult<()> {
        let config = if config_json.is_null() {
            TrackerConfig::default()
        } else {
            let text: String = env.get_string(&config_json)?.into();
            if text.trim().is_empty() {
                TrackerConfig::default()
            } else {
                TrackerConfig::from_json_str(&text)?
            }
        };
        let capabilities = SensorCapabilities {
            barometer: flag(has_barometer),
            step_counter: flag(has_step_counter),
            accelerometer: flag(has_accelerometer),
        };
        session::install(TrackerSession::create(config, capabilities)?)?;
        log::info!("jni: engine ready ({:?})", capabilities);
        Ok(())
    })();
    status(&mut env, result)
}

/// JNI: Stop the engine thread and drop the session
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_shutdownEngine(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = session::teardown();
    status(&mut env, result)
}

/// JNI: Start a new session (Idle/Stopped → Starting)
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_startSession(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = session::current().and_then(|s| s.start());
    status(&mut env, result)
}

/// JNI: Pause (Running → Paused)
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_pauseSession(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = session::current().and_then(|s| s.pause());
    status(&mut env, result)
}

/// JNI: Resume (Paused → Running)
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_resumeSession(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = session::current().and_then(|s| s.resume());
    status(&mut env, result)
}

/// JNI: Stop the session
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_stopSession(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = session::current().and_then(|s| s.stop());
    status(&mut env, result)
}

/// JNI: Push an `android.location.Location`, flattened with its has*() flags
/// Returns: 1 queued, 0 dropped, -1 on error
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_pushLocation(
    mut env: JNIEnv,
    _class: JClass,
    time_ms: jlong,
    latitude: jdouble,
    longitude: jdouble,
    has_altitude: jboolean,
    altitude: jdouble,
    has_speed: jboolean,
    speed: jfloat,
    has_bearing: jboolean,
    bearing: jfloat,
    has_accuracy: jboolean,
    accuracy: jfloat,
    has_speed_accuracy: jboolean,
    speed_accuracy: jfloat,
) -> jint {
    let location = AndroidLocation {
        time_ms,
        latitude,
        longitude,
        has_altitude: flag(has_altitude),
        altitude,
        has_speed: flag(has_speed),
        speed,
        has_bearing: flag(has_bearing),
        bearing,
        has_accuracy: flag(has_accuracy),
        accuracy,
        has_speed_accuracy: flag(has_speed_accuracy),
        speed_accuracy,
    };
    let result = session::current().map(|s| s.push_location(&location));
    delivery(&mut env, result)
}

/// JNI: Push accelerometer sample
/// Parameters: timestamp (seconds since epoch), x, y, z (m/s²)
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_pushAccelerometer(
    mut env: JNIEnv,
    _class: JClass,
    timestamp: jdouble,
    x: jdouble,
    y: jdouble,
    z: jdouble,
) -> jint {
    let result = session::current().map(|s| s.push_accelerometer(timestamp, x, y, z));
    delivery(&mut env, result)
}

/// JNI: Push barometer sample (hPa)
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_pushPressure(
    mut env: JNIEnv,
    _class: JClass,
    timestamp: jdouble,
    pressure_hpa: jdouble,
) -> jint {
    let result = session::current().map(|s| s.push_pressure(timestamp, pressure_hpa));
    delivery(&mut env, result)
}

/// JNI: Push the cumulative TYPE_STEP_COUNTER value
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_pushStepCounter(
    mut env: JNIEnv,
    _class: JClass,
    timestamp: jdouble,
    total_steps: jdouble,
) -> jint {
    let result = session::current().and_then(|s| s.push_step_counter(timestamp, total_steps));
    delivery(&mut env, result)
}

/// JNI: Location permission or provider toggled
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_setPositioningAvailable(
    mut env: JNIEnv,
    _class: JClass,
    available: jboolean,
) -> jint {
    let result = session::current().map(|s| s.set_positioning_available(flag(available)));
    delivery(&mut env, result)
}

/// JNI: Drain up to `max` pending tracker events
/// Returns: JSON array of `{"type": ..., "data": ...}` objects
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_pollEvents(
    mut env: JNIEnv,
    _class: JClass,
    max: jint,
) -> jstring {
    let result = (|| -> JResult<String> {
        if max < 0 {
            return Err(JniError::InvalidParameters(format!("max must be >= 0, got {}", max)));
        }
        let events = session::current()?.poll_events(max as usize);
        Ok(serde_json::to_string(&events)?)
    })();
    java_string(&mut env, result)
}

/// JNI: Accuracy mode the engine last requested
/// Returns: 0 none yet, 1 high accuracy, 2 low power, 3 positioning stopped
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_getRequestedAccuracy(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    match session::current() {
        Ok(s) => {
            let requests = s.requests();
            if requests.positioning_stopped() {
                return 3;
            }
            match requests.requested_accuracy() {
                None => 0,
                Some(AccuracyMode::High) => 1,
                Some(AccuracyMode::LowPower) => 2,
            }
        }
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            -1
        }
    }
}

/// JNI: Diagnostics snapshot as JSON
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_getSnapshotJson(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = session::current()
        .and_then(|s| s.snapshot())
        .and_then(|snap| Ok(serde_json::to_string(&snap)?));
    java_string(&mut env, result)
}

/// JNI: Export session as JSON string
/// Returns: JSON string or null on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_getSessionJson(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = session::current()
        .and_then(|s| s.export())
        .and_then(|export| Ok(export.to_json()?));
    java_string(&mut env, result)
}

/// JNI: Filtered route as GPX 1.1
#[no_mangle]
pub extern "C" fn Java_com_example_runtracker_JniBinding_getRouteGpx(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = session::current()
        .and_then(|s| s.export())
        .map(|export| export.to_gpx());
    java_string(&mut env, result)
}
