use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gimbal_core::config::Config;
use gimbal_core::control::{self, GimbalPosition};
use gimbal_core::identity::IdentityResolver;
use gimbal_core::pipeline::Pipeline;
use gimbal_core::servo::GimbalController;
use gimbal_core::stores::{MemoryProfileStore, MemoryVectorIndex};

mod sim;
use sim::{
    ConsoleServoLink, Scene, SimAnalyzer, SimDetector, SimEmbedder, SimFrameSource, SimTracker,
    SnapshotSink,
};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "gimbal-track",
    version,
    about = "Face-tracking pan/tilt head with identity capture",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a simulated stage and build identity profiles from it.
    Run {
        /// TOML config path (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of frames to simulate
        #[arg(short, long, default_value_t = 240)]
        frames: u64,

        /// Override the capture storage root (swept at startup)
        #[arg(long)]
        storage_root: Option<PathBuf>,

        /// Save annotated frames into this directory
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,

        /// Save every Nth annotated frame
        #[arg(long, default_value_t = 30)]
        snapshot_every: u64,
    },

    /// Evaluate one steering decision and print it.
    Steer {
        /// TOML config path (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Current pan in servo units (defaults to the configured start)
        #[arg(long)]
        pan: Option<i32>,

        /// Current tilt in servo units (defaults to the configured start)
        #[arg(long)]
        tilt: Option<i32>,

        /// Subject center x, in pixels
        #[arg(long)]
        cx: i32,

        /// Subject center y, in pixels
        #[arg(long)]
        cy: i32,

        /// Frame width in pixels
        #[arg(long, default_value_t = 640)]
        width: u32,

        /// Frame height in pixels
        #[arg(long, default_value_t = 480)]
        height: u32,
    },

    /// Print the default configuration as TOML.
    Defaults,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Respect RUST_LOG; default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            frames,
            storage_root,
            snapshot_dir,
            snapshot_every,
        } => cmd_run(config, frames, storage_root, snapshot_dir, snapshot_every),
        Commands::Steer {
            config,
            pan,
            tilt,
            cx,
            cy,
            width,
            height,
        } => cmd_steer(config, pan, tilt, cx, cy, width, height),
        Commands::Defaults => cmd_defaults(),
    }
}

// ── Simulated run ─────────────────────────────────────────────────────────────

fn cmd_run(
    config_path: Option<PathBuf>,
    frames: u64,
    storage_root: Option<PathBuf>,
    snapshot_dir: Option<PathBuf>,
    snapshot_every: u64,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(root) = storage_root {
        config.storage_root = root;
    }

    info!("Simulated tracking run");
    info!("  frames  : {frames}");
    info!("  storage : {}", config.storage_root.display());

    let index = MemoryVectorIndex::new(config.identity.fingerprint_dim);
    let profiles = MemoryProfileStore::new();

    let resolver = IdentityResolver::new(
        Box::new(SimEmbedder::new(config.identity.fingerprint_dim)),
        Box::new(SimAnalyzer),
        Box::new(index.clone()),
        Box::new(profiles.clone()),
        config.identity.clone(),
    );
    let gimbal = GimbalController::new(
        Box::new(ConsoleServoLink),
        config.control.clone(),
        config.servo.clone(),
    );

    let source = SimFrameSource::new(Scene::demo(640, 480), frames);
    let detector = SimDetector::new(config.detector.min_confidence);
    let tracker = SimTracker::new(config.tracker.max_age);

    let mut pipeline = Pipeline::new(
        config,
        Box::new(source),
        Box::new(detector),
        Box::new(tracker),
        resolver,
        gimbal,
    );
    if let Some(dir) = snapshot_dir {
        pipeline = pipeline.with_sink(Box::new(SnapshotSink::new(dir, snapshot_every)?));
    }

    let pb = spinner("Tracking simulated stage…");
    pipeline.run()?;
    pb.finish_with_message("Done.");

    let stored = profiles.all();
    info!(
        frames = pipeline.frames_processed(),
        profiles = stored.len(),
        vectors = index.len(),
        "run summary"
    );
    for (id, profile) in &stored {
        match &profile.analysis {
            Some(a) => info!(
                "  {id} : {} ({}, {}, age {})",
                profile.name, a.gender, a.ethnicity, a.age
            ),
            None => info!("  {id} : {}", profile.name),
        }
    }
    let pose = pipeline.gimbal().position();
    info!(pan = pose.pan, tilt = pose.tilt, "final head pose");
    Ok(())
}

// ── One-shot steering decision ────────────────────────────────────────────────

fn cmd_steer(
    config_path: Option<PathBuf>,
    pan: Option<i32>,
    tilt: Option<i32>,
    cx: i32,
    cy: i32,
    width: u32,
    height: u32,
) -> Result<()> {
    let config = load_config(config_path)?;
    let current = GimbalPosition {
        pan: pan.unwrap_or(config.control.pan_start),
        tilt: tilt.unwrap_or(config.control.tilt_start),
    };
    let frame_center = ((width / 2) as i32, (height / 2) as i32);

    match control::steer(current, (cx, cy), frame_center, &config.control) {
        Some(next) => println!(
            "move: pan {} -> {}, tilt {} -> {}",
            current.pan, next.pan, current.tilt, next.tilt
        ),
        None => println!("hold: subject inside the dead zone"),
    }
    Ok(())
}

// ── Default config dump ───────────────────────────────────────────────────────

fn cmd_defaults() -> Result<()> {
    print!("{}", Config::default().to_toml()?);
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config: {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed_precise}]")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}
