//! Single-writer session engine.
//!
//! One worker thread owns the `Pipeline`. Platform callbacks and UI commands
//! become `Command` messages on a bounded crossbeam channel, and a tick
//! channel is selected in the same loop, so cold-start timeouts and dead
//! reckoning run on the same path as every other mutation.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::export::SessionExport;
use crate::pipeline::{Pipeline, SessionSnapshot, TrackerEvent};
use crate::types::{
    AccuracyMode, BarometricSample, FilteredLocation, MotionSample, RawFix, SensorCapabilities,
    StepEvent,
};

// ─── Platform boundary ───────────────────────────────────────────────────────

/// Outbound half of the platform boundary. Inbound data arrives through `EngineHandle`.
pub trait PlatformAdapter: Send + 'static {
    fn request_accuracy(&mut self, mode: AccuracyMode);
    fn stop_positioning(&mut self);
}

/// Adapter for hosts that do not control positioning (replay, tests)
#[derive(Debug, Default)]
pub struct NullPlatform;

impl PlatformAdapter for NullPlatform {
    fn request_accuracy(&mut self, _mode: AccuracyMode) {}
    fn stop_positioning(&mut self) {}
}

/// Source of `now` in seconds, on the same timebase as fix timestamps
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> f64;
}

/// Wall clock in Unix epoch seconds
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1e6
    }
}

/// Clock advanced by hand, for deterministic tests and simulations
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, t: f64) {
        if let Ok(mut now) = self.now.lock() {
            *now = t;
        }
    }

    pub fn advance(&self, dt: f64) {
        if let Ok(mut now) = self.now.lock() {
            *now += dt;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.lock().map(|t| *t).unwrap_or(0.0)
    }
}

// ─── Commands ────────────────────────────────────────────────────────────────

type Reply<T> = Sender<T>;

enum Command {
    Start(Reply<TrackerResult<()>>),
    Pause(Reply<TrackerResult<()>>),
    Resume(Reply<TrackerResult<()>>),
    Stop(Reply<TrackerResult<()>>),
    Fix(RawFix),
    Motion(MotionSample),
    Pressure(BarometricSample),
    Step(StepEvent),
    PositioningAvailable(bool),
    Snapshot(Reply<SessionSnapshot>),
    RawFixes(Reply<Vec<RawFix>>),
    FilteredRoute(Reply<Vec<FilteredLocation>>),
    Export(Reply<SessionExport>),
    Shutdown,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct TrackerEngine<A: PlatformAdapter, C: Clock> {
    pipeline: Pipeline,
    adapter: A,
    clock: C,
    events: Sender<TrackerEvent>,
}

impl<A: PlatformAdapter, C: Clock> TrackerEngine<A, C> {
    /// Spawn the worker thread. Events are delivered on the returned receiver.
    pub fn spawn(
        config: TrackerConfig,
        capabilities: SensorCapabilities,
        adapter: A,
        clock: C,
    ) -> TrackerResult<(EngineHandle, Receiver<TrackerEvent>)> {
        config.validate()?;
        let (cmd_tx, cmd_rx) = channel::bounded(config.session.command_queue_capacity);
        let (event_tx, event_rx) = channel::unbounded();
        let tick_interval = Duration::from_secs_f64(config.session.tick_interval_secs);

        let engine = TrackerEngine {
            pipeline: Pipeline::new(config, capabilities),
            adapter,
            clock,
            events: event_tx,
        };

        let worker = thread::Builder::new()
            .name("run-tracker-engine".to_string())
            .spawn(move || engine.run(cmd_rx, tick_interval))?;

        let handle = EngineHandle {
            tx: cmd_tx,
            worker: Arc::new(Mutex::new(Some(worker))),
        };
        Ok((handle, event_rx))
    }

    fn run(mut self, commands: Receiver<Command>, tick_interval: Duration) {
        let ticker = channel::tick(tick_interval);
        log::debug!("engine: worker started (tick {:?})", tick_interval);
        loop {
            crossbeam::select! {
                recv(commands) -> msg => match msg {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(cmd) => self.handle(cmd),
                },
                recv(ticker) -> _ => {
                    let now = self.clock.now();
                    let events = self.pipeline.tick(now);
                    self.dispatch(events);
                }
            }
        }
        log::debug!("engine: worker exiting");
    }

    fn handle(&mut self, cmd: Command) {
        let now = self.clock.now();
        match cmd {
            Command::Start(reply) => {
                let result = self.pipeline.start(now).map(|events| self.dispatch(events));
                let _ = reply.send(result);
            }
            Command::Pause(reply) => {
                let result = self.pipeline.pause(now).map(|events| self.dispatch(events));
                let _ = reply.send(result);
            }
            Command::Resume(reply) => {
                let result = self.pipeline.resume(now).map(|events| self.dispatch(events));
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                let result = self.pipeline.stop(now).map(|events| {
                    self.adapter.stop_positioning();
                    self.dispatch(events)
                });
                let _ = reply.send(result);
            }
            Command::Fix(fix) => {
                let events = self.pipeline.push_fix(fix, now);
                self.dispatch(events);
            }
            Command::Motion(sample) => {
                let events = self.pipeline.push_motion(sample, now);
                self.dispatch(events);
            }
            Command::Pressure(sample) => {
                let events = self.pipeline.push_pressure(sample, now);
                self.dispatch(events);
            }
            Command::Step(event) => {
                let events = self.pipeline.push_step(event, now);
                self.dispatch(events);
            }
            Command::PositioningAvailable(available) => {
                let events = self.pipeline.set_positioning_available(available);
                self.dispatch(events);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.pipeline.snapshot(now));
            }
            Command::RawFixes(reply) => {
                let _ = reply.send(self.pipeline.raw_fixes().to_vec());
            }
            Command::FilteredRoute(reply) => {
                let _ = reply.send(self.pipeline.filtered_route().to_vec());
            }
            Command::Export(reply) => {
                let _ = reply.send(SessionExport::from_session(self.pipeline.session()));
            }
            Command::Shutdown => {}
        }
    }

    fn dispatch(&mut self, events: Vec<TrackerEvent>) {
        for event in events {
            if let TrackerEvent::AccuracyModeRequested(mode) = event {
                self.adapter.request_accuracy(mode);
            }
            // Nobody listening is fine; the session keeps running
            let _ = self.events.send(event);
        }
    }
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// Cloneable, thread-safe front door to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<Command>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EngineHandle {
    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> TrackerResult<T> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.tx
            .send(make(reply_tx))
            .map_err(|_| TrackerError::EngineStopped)?;
        reply_rx.recv().map_err(|_| TrackerError::EngineStopped)
    }

    fn deliver(&self, cmd: Command, what: &str) -> bool {
        match self.tx.try_send(cmd) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("engine: command queue full, dropping {}", what);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn start(&self) -> TrackerResult<()> {
        self.request(Command::Start)?
    }

    pub fn pause(&self) -> TrackerResult<()> {
        self.request(Command::Pause)?
    }

    pub fn resume(&self) -> TrackerResult<()> {
        self.request(Command::Resume)?
    }

    pub fn stop(&self) -> TrackerResult<()> {
        self.request(Command::Stop)?
    }

    pub fn deliver_fix(&self, fix: RawFix) -> bool {
        self.deliver(Command::Fix(fix), "fix")
    }

    pub fn deliver_motion(&self, sample: MotionSample) -> bool {
        self.deliver(Command::Motion(sample), "motion sample")
    }

    pub fn deliver_pressure(&self, sample: BarometricSample) -> bool {
        self.deliver(Command::Pressure(sample), "pressure sample")
    }

    pub fn deliver_step(&self, event: StepEvent) -> bool {
        self.deliver(Command::Step(event), "step event")
    }

    pub fn set_positioning_available(&self, available: bool) -> bool {
        self.deliver(
            Command::PositioningAvailable(available),
            "positioning availability",
        )
    }

    pub fn snapshot(&self) -> TrackerResult<SessionSnapshot> {
        self.request(Command::Snapshot)
    }

    pub fn raw_fixes(&self) -> TrackerResult<Vec<RawFix>> {
        self.request(Command::RawFixes)
    }

    pub fn filtered_route(&self) -> TrackerResult<Vec<FilteredLocation>> {
        self.request(Command::FilteredRoute)
    }

    pub fn export(&self) -> TrackerResult<SessionExport> {
        self.request(Command::Export)
    }

    /// Stop the worker and wait for it. Later calls on any clone return `EngineStopped`.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::warn!("engine: worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::CoordinateProjector;
    use crate::types::{PositioningStatus, TrackingPhase};

    #[derive(Clone, Default)]
    struct RecordingPlatform {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl PlatformAdapter for RecordingPlatform {
        fn request_accuracy(&mut self, mode: AccuracyMode) {
            self.calls.lock().unwrap().push(format!("accuracy:{:?}", mode));
        }
        fn stop_positioning(&mut self) {
            self.calls.lock().unwrap().push("stop".to_string());
        }
    }

    fn test_config() -> TrackerConfig {
        let mut config = TrackerConfig::default();
        // Long tick so timer-driven events do not interleave with the assertions
        config.session.tick_interval_secs = 3600.0;
        config
    }

    #[test]
    fn test_commands_and_queries_round_trip() {
        let clock = ManualClock::new(1000.0);
        let platform = RecordingPlatform::default();
        let (handle, events) = TrackerEngine::spawn(
            test_config(),
            SensorCapabilities::default(),
            platform.clone(),
            clock.clone(),
        )
        .unwrap();

        assert!(matches!(handle.pause(), Err(TrackerError::NotRunning)));
        handle.start().unwrap();
        assert!(matches!(handle.start(), Err(TrackerError::AlreadyRunning)));

        let frame = CoordinateProjector::with_origin(48.85, 2.35);
        for k in 0..5 {
            let t = 1001.0 + k as f64;
            clock.set(t);
            let (lat, lon) = frame.to_geographic(2.0 * k as f64, 0.0).unwrap();
            assert!(handle.deliver_fix(RawFix::new(t, lat, lon, 5.0)));
        }

        let snap = handle.snapshot().unwrap();
        assert_eq!(snap.phase, TrackingPhase::Running);
        assert_eq!(snap.status, PositioningStatus::Locked);
        assert_eq!(snap.raw_fix_count, 5);
        assert_eq!(handle.filtered_route().unwrap().len(), 5);

        handle.stop().unwrap();
        assert_eq!(handle.raw_fixes().unwrap().len(), 5);
        assert_eq!(handle.export().unwrap().raw_fixes.len(), 5);
        handle.shutdown();
        assert!(matches!(handle.snapshot(), Err(TrackerError::EngineStopped)));

        let received: Vec<TrackerEvent> = events.try_iter().collect();
        assert_eq!(
            received.first(),
            Some(&TrackerEvent::PhaseChanged(TrackingPhase::Starting))
        );
        assert_eq!(
            received.last(),
            Some(&TrackerEvent::PhaseChanged(TrackingPhase::Stopped))
        );
        let calls = platform.calls.lock().unwrap().clone();
        assert_eq!(calls.first().map(String::as_str), Some("accuracy:High"));
        assert_eq!(calls.last().map(String::as_str), Some("stop"));
    }

    #[test]
    fn test_ticks_run_on_worker() {
        let clock = ManualClock::new(0.0);
        let mut config = TrackerConfig::default();
        config.session.tick_interval_secs = 0.01;
        let (handle, events) =
            TrackerEngine::spawn(config, SensorCapabilities::default(), NullPlatform, clock.clone())
                .unwrap();
        handle.start().unwrap();
        clock.set(45.0);

        // Cold start times out on the next tick
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut running = false;
        while std::time::Instant::now() < deadline && !running {
            if let Ok(e) = events.recv_timeout(Duration::from_millis(50)) {
                running = e == TrackerEvent::PhaseChanged(TrackingPhase::Running);
            }
        }
        assert!(running);
        handle.shutdown();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = TrackerConfig::default();
        config.session.command_queue_capacity = 0;
        let result =
            TrackerEngine::spawn(config, SensorCapabilities::default(), NullPlatform, SystemClock);
        assert!(matches!(result, Err(TrackerError::Config(_))));
    }

    #[test]
    fn test_non_finite_tick_interval_rejected() {
        let mut config = TrackerConfig::default();
        config.session.tick_interval_secs = f64::NAN;
        let result =
            TrackerEngine::spawn(config, SensorCapabilities::default(), NullPlatform, SystemClock);
        assert!(matches!(result, Err(TrackerError::Config(_))));
    }
}
