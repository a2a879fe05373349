use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use videodup::{
    ComparisonPolicy, DedupEngine, DurationRule, EngineConfig, EngineEvent, FolderSettings,
    NotifyChangeSource, Providers,
};

#[derive(Parser, Debug)]
#[command(name = "videodup", version, about = "Watch a folder and report duplicate videos")]
struct Cli {
    /// Directory to watch
    path: PathBuf,

    /// Do not descend into subdirectories
    #[arg(long)]
    flat: bool,

    /// Subdirectories to skip
    #[arg(long, value_name = "DIR")]
    exclude: Vec<PathBuf>,

    /// File extensions treated as videos (default: common video extensions)
    #[arg(long, value_name = "EXT")]
    extension: Vec<String>,

    /// Maximum absolute duration difference in seconds
    #[arg(long, default_value_t = 2.0)]
    tolerance_secs: f64,

    /// Maximum relative duration difference in percent; overrides --tolerance-secs
    #[arg(long)]
    tolerance_percent: Option<f64>,

    /// Thumbnails sampled per video
    #[arg(long, default_value_t = 5)]
    thumbnails: u32,

    /// Per-thumbnail difference threshold in percent
    #[arg(long, default_value_t = 10.0)]
    max_difference: f64,

    /// Differing thumbnails tolerated per pair
    #[arg(long, default_value_t = 1)]
    max_different: u32,

    /// Record cache location (default: <path>/.videodup-cache.json)
    #[arg(long)]
    cache: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let cache_path = cli
        .cache
        .clone()
        .unwrap_or_else(|| cli.path.join(".videodup-cache.json"));
    let mut folder = FolderSettings::new(&cli.path, cache_path);
    folder.recursive = !cli.flat;
    folder.excluded_directories = cli.exclude.clone();
    if !cli.extension.is_empty() {
        folder = folder.with_extensions(&cli.extension);
    }

    let duration_rule = match cli.tolerance_percent {
        Some(percent) => DurationRule::RelativePercent(percent),
        None => DurationRule::AbsoluteSeconds(cli.tolerance_secs),
    };
    let comparison = ComparisonPolicy {
        duration_rule,
        thumbnail_count: cli.thumbnails,
        max_difference_percent: cli.max_difference,
        max_different_thumbnails: cli.max_different,
    };

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let engine = DedupEngine::new(Providers::ffmpeg(), Box::new(NotifyChangeSource::new()))
        .with_event_sender(event_tx);
    engine.update_configuration(EngineConfig { folder, comparison });
    engine.start()?;

    println!("Watching {} - press Ctrl+C to stop", cli.path.display());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(EngineEvent::DuplicateFound { first, second }) => {
                    println!("duplicate: {} <-> {}", first.display(), second.display());
                }
                Some(EngineEvent::Logged { message }) => {
                    log::info!("{message}");
                }
                Some(EngineEvent::ProgressUpdate { phase, current, total, .. }) => {
                    log::debug!("{phase:?} {current}/{total}");
                }
                Some(EngineEvent::Stopped) | None => break,
            }
        }
    }

    engine.stop().await;
    let snapshot = engine.snapshot();
    println!(
        "{} files tracked, {} duplicate pairs reported",
        snapshot.record_count, snapshot.duplicate_count
    );
    Ok(())
}
