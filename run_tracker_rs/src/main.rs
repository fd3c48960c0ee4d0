use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use tokio::time::{sleep, Duration};

use run_tracker_rs::config::TrackerConfig;
use run_tracker_rs::engine::{EngineHandle, ManualClock, NullPlatform, TrackerEngine};
use run_tracker_rs::pipeline::TrackerEvent;
use run_tracker_rs::simulation::{Scenario, SensorInput};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ScenarioKind {
    Stationary,
    Loop,
    Gap,
}

#[derive(Parser, Debug)]
#[command(name = "run_tracker")]
#[command(about = "Run tracker live demo - simulated sensors through the tracking engine", long_about = None)]
struct Args {
    /// Simulated session to play
    #[arg(long, value_enum, default_value = "loop")]
    scenario: ScenarioKind,

    /// Random seed for the simulated sensors
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Playback speed relative to real time
    #[arg(long, default_value_t = 20.0)]
    rate: f64,

    /// Tracker configuration JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Save the session export (JSON and GPX) here
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

fn build_scenario(kind: ScenarioKind, seed: u64) -> Scenario {
    match kind {
        ScenarioKind::Stationary => Scenario::stationary(seed, 120, 3.0),
        ScenarioKind::Loop => {
            Scenario::closed_loop(seed, 400.0, 3.0, 1.5, 5.0).with_motion(seed, 25.0, true, 2.5)
        }
        ScenarioKind::Gap => Scenario::straight_with_gap(seed, 3.0, 90, 30.0, 15.0)
            .with_pressure(seed, 1013.25, 0.05, 1.0),
    }
}

/// Plays the scenario into the engine, pacing deliveries by `rate`
async fn sensor_loop(handle: EngineHandle, clock: ManualClock, scenario: Scenario, rate: f64) {
    let mut previous = scenario.start_time;
    let mut dropped = 0u64;
    for item in scenario.inputs {
        let wait = ((item.at - previous) / rate).max(0.0);
        if wait > 0.0 {
            sleep(Duration::from_secs_f64(wait)).await;
        }
        previous = item.at;
        clock.set(item.at);

        let accepted = match item.input {
            SensorInput::Fix(f) => handle.deliver_fix(f),
            SensorInput::Motion(m) => handle.deliver_motion(m),
            SensorInput::Pressure(p) => handle.deliver_pressure(p),
            SensorInput::Step(s) => handle.deliver_step(s),
            SensorInput::PositioningAvailable(a) => handle.set_positioning_available(a),
        };
        if !accepted {
            dropped += 1;
        }
    }
    let tail = ((scenario.end_time - previous) / rate).max(0.0);
    sleep(Duration::from_secs_f64(tail)).await;
    clock.set(scenario.end_time);
    if dropped > 0 {
        log::warn!("{} sensor inputs dropped on a full queue", dropped);
    }
}

fn print_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::LocationUpdate(u) => {
            let l = &u.location;
            println!(
                "[{}] {:>8.1} m  {:.6},{:.6}  {:.2} m/s  {:>5.1}°  {:?}{}",
                ts_now(),
                l.cumulative_distance,
                l.latitude,
                l.longitude,
                l.speed,
                l.bearing,
                u.running_state,
                if l.interpolated { "  (dead reckoning)" } else { "" }
            );
        }
        other => println!("[{}] {}", ts_now(), serde_json::to_string(other).unwrap_or_default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let rate = args.rate.max(0.1);

    let mut config = match args.config.as_ref() {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };
    // Ticks are wall-clock paced, so keep one tick per simulated interval
    config.session.tick_interval_secs /= rate;

    let scenario = build_scenario(args.scenario, args.seed);
    println!("[{}] Run Tracker Starting", ts_now());
    println!("  Scenario: {} (seed {})", scenario.name, args.seed);
    println!("  Inputs: {}", scenario.inputs.len());
    println!("  Rate: {}x", rate);

    let clock = ManualClock::new(scenario.start_time);
    let (handle, events) =
        TrackerEngine::spawn(config, scenario.capabilities, NullPlatform, clock.clone())?;

    let printer = tokio::task::spawn_blocking(move || {
        let mut count = 0u64;
        for event in events.iter() {
            print_event(&event);
            count += 1;
        }
        count
    });

    handle.start()?;
    tokio::spawn(sensor_loop(handle.clone(), clock, scenario, rate)).await?;

    let finisher = handle.clone();
    let export = tokio::task::spawn_blocking(move || -> Result<_> {
        finisher.stop()?;
        Ok(finisher.export()?)
    })
    .await??;
    handle.shutdown();
    drop(handle);
    let event_count = printer.await?;

    let stats = &export.metadata.stats;
    println!("\n=== Final Stats ===");
    println!("Events: {}", event_count);
    println!("Distance: {:.1} m", stats.total_distance_meters);
    println!("Moving time: {:.0} s", stats.moving_seconds);
    if let Some(pace) = stats.average_pace_s_per_km {
        println!("Pace: {}:{:02} /km", (pace / 60.0) as u64, (pace % 60.0) as u64);
    }
    println!("Max speed: {:.2} m/s", stats.max_speed_ms);
    println!("Fixes: {} raw, {} filtered", stats.raw_fix_count, stats.filtered_count);

    if let Some(dir) = args.output_dir.as_ref() {
        std::fs::create_dir_all(dir)?;
        let stem = format!("session_{}", ts_now_clean());
        let json_path = dir.join(format!("{}.json", stem));
        std::fs::write(&json_path, export.to_json_bytes()?)?;
        std::fs::write(dir.join(format!("{}.gpx", stem)), export.to_gpx())?;
        println!("[{}] Saved export to {}", ts_now(), json_path.display());
    }

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
