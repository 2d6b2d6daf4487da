//! demo - end-to-end synthetic monitoring run
//!
//! Drives one session over a synthetic `stub://` video with scripted
//! collaborators, printing every alert and a final summary. No network and
//! no external tools are involved.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use sitewatch::monitor::{run_session, MonitorConfig, MonitorHooks, SessionControl, ViolationAlert};
use sitewatch::recognize::{Observation, ScriptedRecognizer, StaticMapper, Severity};
use sitewatch::{MonitoringSession, SessionStore};
use sitewatch::store::InMemorySessionStore;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Synthetic video length in seconds.
    #[arg(long, default_value_t = 30)]
    seconds: u64,
    /// Synthetic video frame rate.
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Seconds of video between analyzed frames.
    #[arg(long, default_value_t = 5.0)]
    interval: f64,
    /// Dedup cooldown in seconds.
    #[arg(long, default_value_t = 300.0)]
    cooldown: f64,
    /// Output directory for evidence frames and clips.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// Walk the video at decode speed instead of wall-clock pace.
    #[arg(long)]
    fast: bool,
}

struct PrintHooks {
    store: InMemorySessionStore,
    alerts: u64,
}

impl MonitorHooks for PrintHooks {
    fn on_session_update(&mut self, session: &MonitoringSession) -> Result<()> {
        self.store.upsert_session(session)
    }

    fn on_violation(&mut self, alert: &ViolationAlert) -> Result<()> {
        self.alerts += 1;
        self.store.insert_violation(alert)?;
        println!(
            "  alert {}: {} at {:.1}s in {} [{}] {}",
            alert.alert_id,
            alert.hazard_type,
            alert.timestamp_s,
            alert.location,
            alert.severity.as_str(),
            alert.osha_code.as_deref().unwrap_or("unmapped")
        );
        Ok(())
    }

    fn on_progress(&mut self, current_s: f64, total_s: f64, frame_index: u64) -> Result<()> {
        eprintln!(
            "demo: analyzing frame {} ({:.1}s / {:.1}s)",
            frame_index, current_s, total_s
        );
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }

    let total_frames = args.seconds.saturating_mul(args.fps as u64);
    let source = format!("stub://demo?fps={}&frames={}", args.fps, total_frames);

    stage("build scripted hazard sightings");
    let sighting = |observation: &str, location: &str| Observation {
        observation: observation.to_string(),
        location: location.to_string(),
        hazard_type: "PPE".to_string(),
        danger_description: "Worker exposed to head injury".to_string(),
    };
    // Same hazard on the first and third analyzed frames; the cooldown
    // decides whether the repeat produces a second alert.
    let script = vec![
        vec![sighting("Worker without a hard hat", "scaffolding")],
        vec![],
        vec![sighting("Worker without a hard hat", "scaffolding")],
        vec![sighting("Missing guardrail", "roof edge")],
    ];
    let mut recognizer = ScriptedRecognizer::new(script);
    let mut mapper = StaticMapper::new(Severity::High);

    stage("run monitoring session");
    let mut session = MonitoringSession::new(
        sitewatch::new_session_id(),
        &source,
        args.interval,
        false,
        sitewatch::now_s()?,
    );
    let control = SessionControl::new();
    let cfg = MonitorConfig {
        analysis_interval_s: args.interval,
        cooldown_s: args.cooldown,
        pacing: if args.fast {
            Duration::ZERO
        } else {
            Duration::from_millis(1000 / args.fps.max(1) as u64)
        },
        data_dir: PathBuf::from(&args.out),
        ..MonitorConfig::default()
    };
    let mut hooks = PrintHooks {
        store: InMemorySessionStore::new(),
        alerts: 0,
    };
    run_session(
        &mut session,
        &control,
        &mut recognizer,
        &mut mapper,
        &mut hooks,
        &cfg,
    )?;

    println!("demo summary:");
    println!("  source: {}", source);
    println!("  frames walked: {}", session.current_frame + 1);
    println!("  frames analyzed: {}", recognizer.calls());
    println!("  alerts emitted: {}", hooks.alerts);
    println!("  final state: {}", session.state.as_str());
    println!("  evidence under: {}/{}", args.out, session.id);
    Ok(())
}

fn stage(msg: &str) {
    eprintln!("demo: {}", msg);
}
