//! End-to-end orchestration: scan, classify, match, plan, execute.
//!
//! `prepare` is entirely read-only; the filesystem is first touched when a
//! prepared plan is handed to [`execute`]. This keeps dry runs and preview
//! UIs on the exact code path the real run uses.

use crate::classifier;
use crate::executor::{ProgressFn, TaskExecutor};
use crate::matcher::{self, MatcherConfig};
use crate::models::{MergePlan, RunSummary};
use crate::planner::{self, NamingFormat, PlanConfig};
use crate::scanner::{self, ScanConfig};
use anyhow::Result;
use chrono::Local;
use providers::{MediaMuxer, MediaProber};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PrepareOptions {
    pub folders: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub exclude: Vec<String>,
    pub output_dir: PathBuf,
    pub matcher: MatcherConfig,
    pub naming: NamingFormat,
    pub custom_template: Option<String>,
    pub delete_sources: bool,
    pub copy_streams_only: bool,
    pub parallel_workers: usize,
    pub size_threshold_mb: f64,
    pub retry_on_failure: bool,
    pub max_retries: u32,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        let scan = ScanConfig::default();
        Self {
            folders: Vec::new(),
            extensions: scan.extensions,
            exclude: Vec::new(),
            output_dir: PathBuf::from("."),
            matcher: MatcherConfig::default(),
            naming: NamingFormat::default(),
            custom_template: None,
            delete_sources: false,
            copy_streams_only: true,
            parallel_workers: 1,
            size_threshold_mb: scan.size_threshold_mb,
            retry_on_failure: true,
            max_retries: 2,
        }
    }
}

impl PrepareOptions {
    fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            extensions: self.extensions.clone(),
            exclude: self.exclude.clone(),
            parallel_workers: self.parallel_workers,
            size_threshold_mb: self.size_threshold_mb,
        }
    }

    fn plan_config(&self) -> PlanConfig {
        PlanConfig {
            output_dir: self.output_dir.clone(),
            naming: self.naming,
            custom_template: self.custom_template.clone(),
            delete_sources: self.delete_sources,
            copy_streams_only: self.copy_streams_only,
            max_retries: if self.retry_on_failure {
                self.max_retries
            } else {
                0
            },
        }
    }
}

/// Scan and probe the configured folders without any further processing.
pub async fn scan_items(
    prober: Arc<dyn MediaProber>,
    options: &PrepareOptions,
) -> Result<Vec<crate::models::MediaItem>> {
    scanner::scan(prober, &options.folders, &options.scan_config()).await
}

/// Build a merge plan, or `None` when there is nothing to merge.
///
/// "Nothing to merge" is the common idle case (empty folders, files
/// already combined, or no pair clearing the confidence threshold) and is
/// deliberately not an error.
pub async fn prepare(
    prober: Arc<dyn MediaProber>,
    options: &PrepareOptions,
) -> Result<Option<MergePlan>> {
    let items = scan_items(prober, options).await?;
    if items.is_empty() {
        info!("no media files found in the scanned folders");
        return Ok(None);
    }

    let classified = classifier::partition(items, &mut classifier::log_sink);
    if !classified.combined.is_empty() {
        info!(
            count = classified.combined.len(),
            "skipping files that already carry both streams"
        );
    }
    if classified.videos.is_empty() || classified.audios.is_empty() {
        info!(
            videos = classified.videos.len(),
            audios = classified.audios.len(),
            "need at least one video-only and one audio-only file"
        );
        return Ok(None);
    }

    let report = matcher::match_pairs(&classified.videos, &classified.audios, &options.matcher);
    for video in &report.unmatched_videos {
        info!(path = %video.path.display(), "no confident audio match");
    }
    for audio in &report.unmatched_audios {
        info!(path = %audio.path.display(), "audio not claimed by any video");
    }
    if report.pairs.is_empty() {
        info!("no pairs cleared the confidence threshold");
        return Ok(None);
    }

    let plan = planner::plan(
        report.pairs,
        &options.plan_config(),
        Local::now().naive_local(),
    )?;
    info!(tasks = plan.tasks.len(), "merge plan prepared");
    Ok(Some(plan))
}

/// Run a prepared plan to completion or cancellation.
pub async fn execute(
    muxer: &dyn MediaMuxer,
    plan: &MergePlan,
    progress: &mut ProgressFn<'_>,
    cancel: Arc<AtomicBool>,
) -> RunSummary {
    TaskExecutor::with_cancel(muxer, cancel).execute(plan, progress).await
}
