//! Scans folders for media files and probes them into `MediaItem`s.
//!
//! Scanning is soft-failing throughout: an unlistable folder or a file
//! whose probe fails is logged and skipped, never fatal. Probing is the
//! embarrassingly parallel phase and runs on a bounded worker pool.

use crate::classifier;
use crate::models::MediaItem;
use crate::naming;
use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use providers::{MediaProber, ProbeOutcome, ProbeReport};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Formats produced by the downloaders this tool targets.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "m4s", "mp4", "m4a", "aac", "flv", "f4v", "ts", "mkv", "webm", "mov", "avi", "mp3", "wav",
    "ogg", "opus",
];

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Lower-case suffixes without the leading dot; must be non-empty.
    pub extensions: Vec<String>,
    /// Glob patterns excluded from the scan.
    pub exclude: Vec<String>,
    pub parallel_workers: usize,
    /// Size heuristic threshold for probe-Unknown files.
    pub size_threshold_mb: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            exclude: Vec::new(),
            parallel_workers: 1,
            size_threshold_mb: classifier::DEFAULT_SIZE_THRESHOLD_MB,
        }
    }
}

/// List candidate media files across `folders`, deduplicated by canonical
/// path, sorted for determinism. Folders are not recursed into; the
/// downloaders drop both halves side by side in one directory.
pub fn collect_files(
    folders: &[PathBuf],
    extensions: &[String],
    exclude: &[String],
) -> Result<Vec<PathBuf>> {
    let extension_set: HashSet<String> = extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    if extension_set.is_empty() {
        bail!("at least one file extension is required");
    }
    let exclude_set = build_globset(exclude)?;

    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut files = Vec::new();
    for folder in folders {
        if !folder.is_dir() {
            warn!(folder = %folder.display(), "not a readable folder, skipping");
            continue;
        }
        for entry in WalkDir::new(folder).max_depth(1) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(folder = %folder.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || exclude_set.is_match(path) {
                continue;
            }
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();
            if !extension_set.contains(&ext) {
                continue;
            }
            let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            if seen.insert(canonical) {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Scan folders and probe every candidate into a `MediaItem`.
pub async fn scan(
    prober: Arc<dyn MediaProber>,
    folders: &[PathBuf],
    config: &ScanConfig,
) -> Result<Vec<MediaItem>> {
    let files = collect_files(folders, &config.extensions, &config.exclude)?;
    debug!(candidates = files.len(), "probing scanned files");

    let workers = config.parallel_workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut join_set = JoinSet::new();
    let total = files.len();
    for (slot, path) in files.into_iter().enumerate() {
        let prober = Arc::clone(&prober);
        let semaphore = Arc::clone(&semaphore);
        let threshold = config.size_threshold_mb;
        join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (slot, None),
            };
            (slot, probe_one(prober.as_ref(), &path, threshold).await)
        });
    }

    // Keep scan order even though probes complete out of order.
    let mut slots: Vec<Option<MediaItem>> = vec![None; total];
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((slot, item)) => slots[slot] = item,
            Err(e) => warn!(error = %e, "probe task failed"),
        }
    }
    Ok(slots.into_iter().flatten().collect())
}

async fn probe_one(
    prober: &dyn MediaProber,
    path: &Path,
    size_threshold_mb: f64,
) -> Option<MediaItem> {
    // Items are only ever constructed for paths that exist at probe time.
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "file vanished before probe");
            return None;
        }
    };
    let size_mb = meta.len() as f64 / (1024.0 * 1024.0);

    let report = match prober.probe(path).await {
        Ok(ProbeOutcome::Known(report)) => report,
        Ok(ProbeOutcome::Unknown) => {
            let (has_video, has_audio) =
                classifier::fallback_streams(size_mb, size_threshold_mb);
            debug!(path = %path.display(), "stream composition unknown, using size heuristic");
            ProbeReport {
                duration_secs: 0.0,
                has_video,
                has_audio,
                width: 0,
                height: 0,
            }
        }
        Err(e) => {
            // Kept in the scan so the classification report shows it, but
            // with no streams it can never enter matching.
            warn!(path = %path.display(), error = %e, "probe failed, treating file as unrecognized");
            ProbeReport::default()
        }
    };

    let display_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Some(MediaItem {
        path: path.to_path_buf(),
        base_name: naming::base_name(&display_name),
        display_name,
        duration_secs: report.duration_secs,
        has_video: report.has_video,
        has_audio: report.has_audio,
        width: report.width,
        height: report.height,
        size_mb,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::stub::StubProber;
    use std::fs;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn collects_only_matching_extensions_non_recursively() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.mp4"), b"x").unwrap();
        fs::write(temp.path().join("b.M4A"), b"x").unwrap();
        fs::write(temp.path().join("c.txt"), b"x").unwrap();
        fs::create_dir(temp.path().join("nested")).unwrap();
        fs::write(temp.path().join("nested/d.mp4"), b"x").unwrap();

        let files = collect_files(
            &[temp.path().to_path_buf()],
            &strings(&["mp4", "m4a"]),
            &[],
        )
        .unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.M4A"]);
    }

    #[test]
    fn empty_extension_set_is_a_caller_error() {
        assert!(collect_files(&[], &[], &[]).is_err());
        assert!(collect_files(&[], &strings(&["  ", "."]), &[]).is_err());
    }

    #[test]
    fn duplicate_folders_are_deduplicated() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.mp4"), b"x").unwrap();
        let folder = temp.path().to_path_buf();
        let files = collect_files(&[folder.clone(), folder], &strings(&["mp4"]), &[]).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn missing_folder_is_a_soft_failure() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.mp4"), b"x").unwrap();
        let files = collect_files(
            &[temp.path().join("missing"), temp.path().to_path_buf()],
            &strings(&["mp4"]),
            &[],
        )
        .unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn exclude_globs_filter_files() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("keep.mp4"), b"x").unwrap();
        fs::write(temp.path().join("skip_tmp.mp4"), b"x").unwrap();
        let files = collect_files(
            &[temp.path().to_path_buf()],
            &strings(&["mp4"]),
            &strings(&["*_tmp.mp4"]),
        )
        .unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("keep.mp4"));
    }

    #[tokio::test]
    async fn scan_builds_items_from_probe_reports() {
        let temp = tempfile::tempdir().unwrap();
        let video = temp.path().join("clip_video_bilibili.mp4");
        let audio = temp.path().join("clip_audio_bilibili.m4a");
        fs::write(&video, vec![0u8; 2048]).unwrap();
        fs::write(&audio, vec![0u8; 1024]).unwrap();

        let prober = StubProber::new()
            .with_report(&video, StubProber::video_report(120.0, 1920, 1080))
            .with_report(&audio, StubProber::audio_report(121.0));
        let items = scan(
            Arc::new(prober),
            &[temp.path().to_path_buf()],
            &ScanConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(items.len(), 2);
        let video_item = items.iter().find(|i| i.has_video).unwrap();
        assert_eq!(video_item.base_name, "clip");
        assert_eq!(video_item.duration_secs, 120.0);
        assert_eq!(video_item.width, 1920);
        assert!(video_item.size_mb > 0.0);
    }

    #[tokio::test]
    async fn failed_probe_degrades_the_file_to_unrecognized() {
        let temp = tempfile::tempdir().unwrap();
        let good = temp.path().join("good.mp4");
        let bad = temp.path().join("bad.mp4");
        fs::write(&good, b"x").unwrap();
        fs::write(&bad, b"x").unwrap();

        let prober = StubProber::new()
            .with_report(&good, StubProber::video_report(10.0, 640, 480))
            .fail_on(&bad);
        let items = scan(
            Arc::new(prober),
            &[temp.path().to_path_buf()],
            &ScanConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(items.len(), 2);
        let bad_item = items.iter().find(|i| i.path.ends_with("bad.mp4")).unwrap();
        assert!(!bad_item.has_video && !bad_item.has_audio);
        let good_item = items.iter().find(|i| i.path.ends_with("good.mp4")).unwrap();
        assert!(good_item.is_video_only());
    }

    #[tokio::test]
    async fn unknown_probe_falls_back_to_the_size_heuristic() {
        let temp = tempfile::tempdir().unwrap();
        let big = temp.path().join("big.ts");
        let small = temp.path().join("small.ts");
        fs::write(&big, vec![0u8; 4096]).unwrap();
        fs::write(&small, vec![0u8; 16]).unwrap();

        let config = ScanConfig {
            // Threshold between the two file sizes, in MB.
            size_threshold_mb: 2048.0 / (1024.0 * 1024.0),
            ..ScanConfig::default()
        };
        let items = scan(
            Arc::new(StubProber::new()),
            &[temp.path().to_path_buf()],
            &config,
        )
        .await
        .unwrap();
        assert_eq!(items.len(), 2);
        let big_item = items.iter().find(|i| i.path.ends_with("big.ts")).unwrap();
        let small_item = items.iter().find(|i| i.path.ends_with("small.ts")).unwrap();
        assert!(big_item.is_video_only());
        assert!(small_item.is_audio_only());
        assert_eq!(big_item.duration_secs, 0.0);
    }

    #[tokio::test]
    async fn parallel_workers_probe_everything() {
        let temp = tempfile::tempdir().unwrap();
        let mut prober = StubProber::new();
        for i in 0..8 {
            let path = temp.path().join(format!("clip{i}.mp4"));
            fs::write(&path, b"x").unwrap();
            prober = prober.with_report(&path, StubProber::video_report(10.0 + i as f64, 0, 0));
        }
        let config = ScanConfig {
            parallel_workers: 4,
            ..ScanConfig::default()
        };
        let items = scan(Arc::new(prober), &[temp.path().to_path_buf()], &config)
            .await
            .unwrap();
        assert_eq!(items.len(), 8);
        // Scan order is preserved regardless of probe completion order.
        let names: Vec<_> = items.iter().map(|i| i.display_name.clone()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
