use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use merger_core::classifier;
use merger_core::config::{self, AppConfig};
use merger_core::matcher::{self, MatchStrategy};
use merger_core::pipeline::{self, PrepareOptions};
use merger_core::planner::NamingFormat;
use providers::ffmpeg::{FfmpegConfig, FfmpegService};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan { folders, json } => run_scan(cfg, folders, json).await,
        Commands::Pairs {
            folders,
            strategy,
            threshold,
            json,
        } => run_pairs(cfg, folders, strategy, threshold, json).await,
        Commands::Merge {
            folders,
            output_dir,
            strategy,
            threshold,
            naming,
            template,
            delete_sources,
            workers,
            max_retries,
            dry_run,
            json,
        } => {
            run_merge(
                cfg,
                folders,
                output_dir,
                strategy,
                threshold,
                naming,
                template,
                delete_sources,
                workers,
                max_retries,
                dry_run,
                json,
            )
            .await
        }
    }
}

#[derive(Parser)]
#[command(name = "atm")]
#[command(about = "Batch-merge separated audio/video download pairs", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan folders and report every media file with its stream role
    Scan {
        /// Folders to scan (non-recursive)
        #[arg(required = true)]
        folders: Vec<PathBuf>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which video/audio pairs would be merged, without merging
    Pairs {
        /// Folders to scan (non-recursive)
        #[arg(required = true)]
        folders: Vec<PathBuf>,
        /// Matching strategy: smart|filename|duration
        #[arg(long)]
        strategy: Option<MatchStrategy>,
        /// Minimum pair confidence in [0, 1]
        #[arg(long)]
        threshold: Option<f64>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Merge matched pairs into combined files
    Merge {
        /// Folders to scan (non-recursive)
        #[arg(required = true)]
        folders: Vec<PathBuf>,
        /// Output directory; defaults to the first scanned folder
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Matching strategy: smart|filename|duration
        #[arg(long)]
        strategy: Option<MatchStrategy>,
        /// Minimum pair confidence in [0, 1]
        #[arg(long)]
        threshold: Option<f64>,
        /// Output naming: default|original|custom
        #[arg(long)]
        naming: Option<NamingFormat>,
        /// Template for custom naming; supports {name} {date} {time} {num}
        #[arg(long)]
        template: Option<String>,
        /// Delete both sources after a successful merge
        #[arg(long, default_value_t = false)]
        delete_sources: bool,
        /// Parallel probe workers
        #[arg(long)]
        workers: Option<usize>,
        /// Retries per failed task; 0 disables retrying
        #[arg(long)]
        max_retries: Option<u32>,
        /// Plan and print the tasks without touching any file
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

fn ffmpeg_config(cfg: &AppConfig) -> FfmpegConfig {
    FfmpegConfig {
        ffmpeg_path: cfg.ffmpeg.ffmpeg_path.as_deref().map(PathBuf::from),
        ffprobe_path: cfg.ffmpeg.ffprobe_path.as_deref().map(PathBuf::from),
        probe_timeout: Duration::from_secs(cfg.ffmpeg.probe_timeout_secs),
        merge_timeout: Duration::from_secs(cfg.ffmpeg.merge_timeout_secs),
    }
}

fn base_options(cfg: &AppConfig, folders: Vec<PathBuf>) -> PrepareOptions {
    PrepareOptions {
        folders,
        extensions: cfg.scan.extensions.clone(),
        exclude: cfg.scan.exclude.clone(),
        output_dir: cfg
            .output
            .dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
        matcher: cfg.matcher.clone(),
        naming: cfg.output.naming,
        custom_template: cfg.output.custom_template.clone(),
        delete_sources: cfg.output.delete_sources,
        copy_streams_only: cfg.ffmpeg.copy_streams_only,
        parallel_workers: cfg.scan.parallel_workers,
        size_threshold_mb: cfg.scan.size_threshold_mb,
        retry_on_failure: cfg.retry.enabled,
        max_retries: cfg.retry.max_retries,
    }
}

async fn run_scan(cfg: AppConfig, folders: Vec<PathBuf>, json: bool) -> Result<()> {
    let service = Arc::new(FfmpegService::new(ffmpeg_config(&cfg))?);
    let options = base_options(&cfg, folders);
    let items = pipeline::scan_items(service, &options).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for item in &items {
            println!("{}", classifier::describe(item));
        }
        println!("{} media files", items.len());
    }
    Ok(())
}

async fn run_pairs(
    cfg: AppConfig,
    folders: Vec<PathBuf>,
    strategy: Option<MatchStrategy>,
    threshold: Option<f64>,
    json: bool,
) -> Result<()> {
    let service = Arc::new(FfmpegService::new(ffmpeg_config(&cfg))?);
    let mut options = base_options(&cfg, folders);
    apply_matcher_overrides(&mut options, strategy, threshold)?;

    let items = pipeline::scan_items(service, &options).await?;
    let classified = classifier::partition(items, &mut |_| {});
    let report = matcher::match_pairs(&classified.videos, &classified.audios, &options.matcher);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "pairs": report.pairs,
                "unmatched_videos": report.unmatched_videos,
                "unmatched_audios": report.unmatched_audios,
            }))?
        );
        return Ok(());
    }
    for pair in &report.pairs {
        println!(
            "{} + {} (confidence {:.2})",
            pair.video.display_name, pair.audio.display_name, pair.confidence
        );
    }
    for video in &report.unmatched_videos {
        println!("unmatched video: {}", video.display_name);
    }
    for audio in &report.unmatched_audios {
        println!("unmatched audio: {}", audio.display_name);
    }
    println!("{} pairs", report.pairs.len());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_merge(
    cfg: AppConfig,
    folders: Vec<PathBuf>,
    output_dir: Option<PathBuf>,
    strategy: Option<MatchStrategy>,
    threshold: Option<f64>,
    naming: Option<NamingFormat>,
    template: Option<String>,
    delete_sources: bool,
    workers: Option<usize>,
    max_retries: Option<u32>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let service = Arc::new(FfmpegService::new(ffmpeg_config(&cfg))?);

    let mut options = base_options(&cfg, folders);
    apply_matcher_overrides(&mut options, strategy, threshold)?;
    if let Some(dir) = output_dir {
        options.output_dir = dir;
    } else if cfg.output.dir.is_none() {
        // Merged files land next to their sources by default.
        options.output_dir = options.folders[0].clone();
    }
    if let Some(naming) = naming {
        options.naming = naming;
    }
    if template.is_some() {
        options.custom_template = template;
    }
    if delete_sources {
        options.delete_sources = true;
    }
    if let Some(workers) = workers {
        options.parallel_workers = workers;
    }
    if let Some(retries) = max_retries {
        options.retry_on_failure = retries > 0;
        options.max_retries = retries;
    }

    if let Ok(banner) = service.version().await {
        tracing::debug!(%banner, "ffmpeg located");
    }

    let prober: Arc<dyn providers::MediaProber> = service.clone();
    let plan = match pipeline::prepare(prober, &options).await? {
        Some(plan) => plan,
        None => {
            if json {
                println!("{}", serde_json::json!({ "status": "nothing to merge" }));
            } else {
                println!("nothing to merge");
            }
            return Ok(());
        }
    };

    if dry_run {
        if json {
            let tasks: Vec<_> = plan
                .tasks
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "index": t.index,
                        "video": t.pair.video.path,
                        "audio": t.pair.audio.path,
                        "confidence": t.pair.confidence,
                        "output": t.planned_output,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        } else {
            for task in &plan.tasks {
                println!(
                    "[{}] {} + {} -> {}",
                    task.index,
                    task.pair.video.display_name,
                    task.pair.audio.display_name,
                    task.planned_output.display()
                );
            }
            println!("dry run: {} tasks planned", plan.tasks.len());
        }
        return Ok(());
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let ctrl_c_flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the current task then stopping");
            ctrl_c_flag.store(true, Ordering::SeqCst);
        }
    });

    let summary = pipeline::execute(
        service.as_ref(),
        &plan,
        &mut |done, total, outcome| {
            if json {
                return;
            }
            if outcome.success {
                println!(
                    "[{done}/{total}] merged -> {}",
                    outcome.output_path.display()
                );
            } else {
                println!(
                    "[{done}/{total}] FAILED {} ({})",
                    outcome.video_path.display(),
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
        },
        cancel,
    )
    .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "done: {} merged, {} failed, {} total{}",
            summary.succeeded,
            summary.failed,
            summary.total,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
    }
    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn apply_matcher_overrides(
    options: &mut PrepareOptions,
    strategy: Option<MatchStrategy>,
    threshold: Option<f64>,
) -> Result<()> {
    if let Some(strategy) = strategy {
        options.matcher.strategy = strategy;
    }
    if let Some(threshold) = threshold {
        if !(0.0..=1.0).contains(&threshold) {
            bail!("threshold must be between 0 and 1");
        }
        options.matcher.confidence_threshold = threshold;
    }
    Ok(())
}
