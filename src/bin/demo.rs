//! demo - bounded end-to-end run against the synthetic camera

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;

use camwatch::capture::{CameraConfig, ResolutionPreset};
use camwatch::config::{CamwatchConfig, EngineKind, ModelSettings};
use camwatch::App;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// How long to run the synthetic capture.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Frames per second for the synthetic source.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// Output directory for the run summary.
    #[arg(long, default_value = "demo_out")]
    out: String,
}

#[derive(Serialize)]
struct DemoSummary {
    seconds: u64,
    fps: u32,
    captured: u64,
    delivered: u64,
    dropped: u64,
    submitted: u64,
    rejected: u64,
    label_updates: u64,
    final_label: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }

    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;

    let config = CamwatchConfig {
        engine: EngineKind::Stub,
        camera: CameraConfig {
            device: "stub://demo".to_string(),
            resolution: ResolutionPreset::Low,
            target_fps: args.fps,
            ..CameraConfig::default()
        },
        models: ModelSettings {
            classifier_primary: "resnet50".to_string(),
            classifier_secondary: "rn1015k500".to_string(),
            pose_hourglass: "hourglass".to_string(),
            pose_cpm: "cpm".to_string(),
        },
    };

    stage("start pipeline");
    let mut app = App::start(&config, true)?;

    stage("run synthetic capture");
    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
    }

    stage("shut down");
    app.shutdown();

    let session = app.session_stats();
    let dispatch = app.dispatch_stats();
    let summary = DemoSummary {
        seconds: args.seconds,
        fps: args.fps,
        captured: session.captured,
        delivered: session.delivered,
        dropped: session.dropped,
        submitted: dispatch.submitted,
        rejected: dispatch.rejected,
        label_updates: app.label_updates(),
        final_label: app.label(),
    };

    let summary_path = out_dir.join("summary.json");
    fs::write(&summary_path, serde_json::to_vec_pretty(&summary)?)
        .with_context(|| format!("writing summary to {}", summary_path.display()))?;

    println!("demo summary:");
    println!("  frames captured: {}", summary.captured);
    println!("  frames delivered: {}", summary.delivered);
    println!("  frames dropped: {}", summary.dropped);
    println!("  batches submitted: {}", summary.submitted);
    println!("  batches rejected: {}", summary.rejected);
    println!("  label updates: {}", summary.label_updates);
    println!("  summary file: {}", summary_path.display());
    if !summary.final_label.is_empty() {
        println!("  final label:");
        for line in summary.final_label.lines() {
            println!("    {}", line);
        }
    }

    if summary.delivered == 0 {
        return Err(anyhow!("no frames were delivered; pipeline is broken"));
    }
    Ok(())
}

fn stage(msg: &str) {
    eprintln!("demo: {}", msg);
}
