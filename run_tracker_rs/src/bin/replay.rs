use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use run_tracker_rs::config::TrackerConfig;
use run_tracker_rs::export::{SessionExport, SessionStats};
use run_tracker_rs::pipeline::{Pipeline, TrackerEvent};
use run_tracker_rs::simulation::Scenario;
use serde_json::json;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Generate {
    Stationary,
    Loop,
    Gap,
}

#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "Replay recorded sensor sessions through the tracking pipeline", long_about = None)]
struct Args {
    /// Path to a session_*.json[.gz] recording
    #[arg(long, conflicts_with_all = ["golden_dir", "generate"])]
    log: Option<PathBuf>,

    /// Directory of recordings to batch replay (processes session_*.json[.gz])
    #[arg(long)]
    golden_dir: Option<PathBuf>,

    /// Generate a synthetic recording instead of reading one
    #[arg(long, value_enum)]
    generate: Option<Generate>,

    /// Seed for --generate
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Write the generated recording here (.gz compresses)
    #[arg(long, requires = "generate")]
    save: Option<PathBuf>,

    /// Tracker configuration JSON; missing keys keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the filtered route of a single replay as GPX
    #[arg(long)]
    gpx: Option<PathBuf>,

    /// Write the full session export of a single replay as JSON
    #[arg(long)]
    export: Option<PathBuf>,
}

fn is_recording(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(".json") || n.ends_with(".json.gz"))
        .unwrap_or(false)
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

fn load_scenario(path: &Path) -> anyhow::Result<Scenario> {
    let file = File::open(path)?;
    if is_gzip(path) {
        let reader = BufReader::new(GzDecoder::new(file));
        Ok(serde_json::from_reader(reader)?)
    } else {
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

fn save_scenario(path: &Path, scenario: &Scenario) -> anyhow::Result<()> {
    let file = File::create(path)?;
    if is_gzip(path) {
        let mut gz = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut gz, scenario)?;
        gz.finish()?.flush()?;
    } else {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, scenario)?;
        writer.flush()?;
    }
    Ok(())
}

fn generate(kind: Generate, seed: u64) -> Scenario {
    match kind {
        Generate::Stationary => Scenario::stationary(seed, 600, 3.0),
        Generate::Loop => Scenario::closed_loop(seed, 400.0, 3.0, 1.5, 5.0)
            .with_motion(seed ^ 0x5eed, 50.0, true, 2.5),
        Generate::Gap => Scenario::straight_with_gap(seed, 3.0, 120, 40.0, 20.0)
            .with_pressure(seed ^ 0xba40, 1013.25, 0.05, 1.0),
    }
}

struct Replay {
    export: SessionExport,
    summary: serde_json::Value,
}

fn run_once(label: &str, scenario: &Scenario, config: &TrackerConfig) -> anyhow::Result<Replay> {
    let tick = config.session.tick_interval_secs;
    let mut pipeline = Pipeline::new(config.clone(), scenario.capabilities);
    let events = scenario.drive(&mut pipeline, tick)?;

    let mut updates = 0usize;
    let mut interpolated = 0usize;
    let mut state_changes = 0usize;
    let mut mode_requests = 0usize;
    for event in &events {
        match event {
            TrackerEvent::LocationUpdate(u) if u.location.interpolated => interpolated += 1,
            TrackerEvent::LocationUpdate(_) => updates += 1,
            TrackerEvent::RunningStateChanged { .. } => state_changes += 1,
            TrackerEvent::AccuracyModeRequested(_) => mode_requests += 1,
            _ => {}
        }
    }

    let snapshot = pipeline.snapshot(scenario.end_time);
    let stats = SessionStats::from_session(pipeline.session());
    let distance = pipeline.cumulative_distance();
    let error_pct = if scenario.true_distance > 0.0 {
        Some((distance - scenario.true_distance) / scenario.true_distance * 100.0)
    } else {
        None
    };

    log::info!(
        "{}: {:.1} m over {} fixes ({} rejected)",
        label,
        distance,
        snapshot.raw_fix_count,
        snapshot.rejections.total()
    );

    let summary = json!({
        "log": label,
        "scenario": scenario.name,
        "distance_m": distance,
        "true_distance_m": scenario.true_distance,
        "distance_error_pct": error_pct,
        "location_updates": updates,
        "interpolated_updates": interpolated,
        "running_state_changes": state_changes,
        "accuracy_mode_requests": mode_requests,
        "rejections": snapshot.rejections,
        "kalman_updates": snapshot.kalman_updates,
        "kalman_skipped_updates": snapshot.kalman_skipped_updates,
        "kalman_reinitializations": snapshot.kalman_reinitializations,
        "stats": stats,
    });

    Ok(Replay {
        export: SessionExport::from_session(pipeline.session()),
        summary,
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = match args.config.as_ref() {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };

    let mut replays = Vec::new();

    if let Some(dir) = args.golden_dir.as_ref() {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_recording(p))
            .collect();
        paths.sort();
        for path in paths {
            let label = path.display().to_string();
            match load_scenario(&path).and_then(|s| run_once(&label, &s, &config)) {
                Ok(r) => replays.push(r),
                Err(e) => eprintln!("Failed {}: {}", label, e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        let scenario = load_scenario(log)?;
        replays.push(run_once(&log.display().to_string(), &scenario, &config)?);
    } else if let Some(kind) = args.generate {
        let scenario = generate(kind, args.seed);
        if let Some(path) = args.save.as_ref() {
            save_scenario(path, &scenario)?;
            eprintln!("Saved {} inputs to {}", scenario.inputs.len(), path.display());
        }
        let label = format!("{}#{}", scenario.name, args.seed);
        replays.push(run_once(&label, &scenario, &config)?);
    } else {
        anyhow::bail!("Provide --log, --golden-dir or --generate");
    }

    if args.gpx.is_some() || args.export.is_some() {
        if replays.len() != 1 {
            anyhow::bail!("--gpx and --export need exactly one replay, got {}", replays.len());
        }
        let export = &replays[0].export;
        if let Some(path) = args.gpx.as_ref() {
            fs::write(path, export.to_gpx())?;
        }
        if let Some(path) = args.export.as_ref() {
            fs::write(path, export.to_json_bytes()?)?;
        }
    }

    let summaries: Vec<&serde_json::Value> = replays.iter().map(|r| &r.summary).collect();
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}
