use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::Receiver;
use run_tracker_rs::engine::{EngineHandle, PlatformAdapter, SystemClock, TrackerEngine};
use run_tracker_rs::export::SessionExport;
use run_tracker_rs::pipeline::{SessionSnapshot, TrackerEvent};
use run_tracker_rs::types::{AccuracyMode, SensorCapabilities};
use run_tracker_rs::TrackerConfig;

use crate::error::{JResult, JniError};
use crate::sensor_receiver::{
    accelerometer_sample, pressure_sample, AndroidLocation, StepCounterReceiver,
};

/// What the engine asked the platform to do. Kotlin polls it after each
/// batch of events and reconfigures the location request.
#[derive(Debug, Default)]
pub struct PlatformRequests {
    accuracy: Mutex<Option<AccuracyMode>>,
    positioning_stopped: AtomicBool,
}

impl PlatformRequests {
    pub fn requested_accuracy(&self) -> Option<AccuracyMode> {
        self.accuracy.lock().ok().and_then(|m| *m)
    }

    pub fn positioning_stopped(&self) -> bool {
        self.positioning_stopped.load(Ordering::SeqCst)
    }
}

/// Engine adapter recording requests into `PlatformRequests`
pub struct JniPlatform {
    requests: Arc<PlatformRequests>,
}

impl PlatformAdapter for JniPlatform {
    fn request_accuracy(&mut self, mode: AccuracyMode) {
        log::info!("jni: accuracy {:?} requested", mode);
        if let Ok(mut m) = self.requests.accuracy.lock() {
            *m = Some(mode);
        }
        self.requests.positioning_stopped.store(false, Ordering::SeqCst);
    }

    fn stop_positioning(&mut self) {
        log::info!("jni: positioning stop requested");
        self.requests.positioning_stopped.store(true, Ordering::SeqCst);
    }
}

/// One engine plus the state the JNI layer keeps next to it
pub struct TrackerSession {
    handle: EngineHandle,
    events: Receiver<TrackerEvent>,
    requests: Arc<PlatformRequests>,
    step_counter: Mutex<StepCounterReceiver>,
}

impl TrackerSession {
    pub fn create(config: TrackerConfig, capabilities: SensorCapabilities) -> JResult<Self> {
        let requests = Arc::new(PlatformRequests::default());
        let platform = JniPlatform {
            requests: Arc::clone(&requests),
        };
        let (handle, events) = TrackerEngine::spawn(config, capabilities, platform, SystemClock)?;
        Ok(TrackerSession {
            handle,
            events,
            requests,
            step_counter: Mutex::new(StepCounterReceiver::new()),
        })
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    pub fn start(&self) -> JResult<()> {
        self.lock_step_counter()?.reset();
        Ok(self.handle.start()?)
    }

    pub fn pause(&self) -> JResult<()> {
        Ok(self.handle.pause()?)
    }

    pub fn resume(&self) -> JResult<()> {
        Ok(self.handle.resume()?)
    }

    pub fn stop(&self) -> JResult<()> {
        Ok(self.handle.stop()?)
    }

    pub fn push_location(&self, location: &AndroidLocation) -> bool {
        self.handle.deliver_fix(location.to_raw_fix())
    }

    pub fn push_accelerometer(&self, timestamp: f64, x: f64, y: f64, z: f64) -> bool {
        self.handle
            .deliver_motion(accelerometer_sample(timestamp, x, y, z))
    }

    pub fn push_pressure(&self, timestamp: f64, pressure_hpa: f64) -> bool {
        self.handle
            .deliver_pressure(pressure_sample(timestamp, pressure_hpa))
    }

    /// Cumulative step counter reading. Returns false only when a delta was dropped.
    pub fn push_step_counter(&self, timestamp: f64, total: f64) -> JResult<bool> {
        let event = self.lock_step_counter()?.on_counter(timestamp, total);
        Ok(match event {
            Some(e) => self.handle.deliver_step(e),
            None => true,
        })
    }

    pub fn set_positioning_available(&self, available: bool) -> bool {
        self.handle.set_positioning_available(available)
    }

    /// Drain up to `max` pending events without blocking
    pub fn poll_events(&self, max: usize) -> Vec<TrackerEvent> {
        self.events.try_iter().take(max).collect()
    }

    pub fn requests(&self) -> &PlatformRequests {
        &self.requests
    }

    pub fn snapshot(&self) -> JResult<SessionSnapshot> {
        Ok(self.handle.snapshot()?)
    }

    pub fn export(&self) -> JResult<SessionExport> {
        Ok(self.handle.export()?)
    }

    pub fn shutdown(&self) {
        self.handle.shutdown();
    }

    fn lock_step_counter(&self) -> JResult<std::sync::MutexGuard<'_, StepCounterReceiver>> {
        self.step_counter
            .lock()
            .map_err(|_| JniError::Internal("Failed to acquire step counter lock".to_string()))
    }
}

// Global session - stored as static to persist across JNI calls
lazy_static::lazy_static! {
    static ref GLOBAL_SESSION: Arc<Mutex<Option<Arc<TrackerSession>>>> = Arc::new(Mutex::new(None));
}

/// Replace the global session, shutting down any previous engine
pub fn install(session: TrackerSession) -> JResult<Arc<TrackerSession>> {
    let session = Arc::new(session);
    let previous = {
        let mut guard = GLOBAL_SESSION.lock().map_err(|_| {
            JniError::Internal("Failed to acquire global session lock".to_string())
        })?;
        guard.replace(Arc::clone(&session))
    };
    if let Some(old) = previous {
        old.shutdown();
    }
    Ok(session)
}

pub fn current() -> JResult<Arc<TrackerSession>> {
    let guard = GLOBAL_SESSION.lock().map_err(|_| {
        JniError::Internal("Failed to acquire global session lock".to_string())
    })?;
    guard.as_ref().map(Arc::clone).ok_or(JniError::NotInitialized)
}

/// Shut down and forget the global session
pub fn teardown() -> JResult<()> {
    let previous = GLOBAL_SESSION
        .lock()
        .map_err(|_| JniError::Internal("Failed to acquire global session lock".to_string()))?
        .take();
    if let Some(session) = previous {
        session.shutdown();
    }
    Ok(())
}
