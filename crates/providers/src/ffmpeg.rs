//! FFmpeg-backed implementations of the prober and muxer contracts.
//!
//! Probing shells out to `ffprobe` with JSON output; merging shells out to
//! `ffmpeg`. Probe results are cached in-process keyed on the file's
//! canonical path, mtime and size, so an unchanged file is probed once.

use crate::{MediaMuxer, MediaProber, ProbeOutcome, ProbeReport, ProviderError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    /// Explicit path to the ffmpeg binary; falls back to a PATH lookup.
    pub ffmpeg_path: Option<PathBuf>,
    /// Explicit path to the ffprobe binary; falls back to a PATH lookup.
    pub ffprobe_path: Option<PathBuf>,
    pub probe_timeout: Duration,
    pub merge_timeout: Duration,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            probe_timeout: Duration::from_secs(15),
            merge_timeout: Duration::from_secs(300),
        }
    }
}

type CacheKey = (PathBuf, u64, u64);

pub struct FfmpegService {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    probe_timeout: Duration,
    merge_timeout: Duration,
    probe_cache: Mutex<HashMap<CacheKey, ProbeOutcome>>,
}

impl FfmpegService {
    pub fn new(config: FfmpegConfig) -> Result<Self, ProviderError> {
        let ffmpeg = locate("ffmpeg", config.ffmpeg_path.as_deref())?;
        let ffprobe = locate("ffprobe", config.ffprobe_path.as_deref())?;
        debug!(ffmpeg = %ffmpeg.display(), ffprobe = %ffprobe.display(), "located tools");
        Ok(Self {
            ffmpeg,
            ffprobe,
            probe_timeout: config.probe_timeout,
            merge_timeout: config.merge_timeout,
            probe_cache: Mutex::new(HashMap::new()),
        })
    }

    /// First line of the `ffmpeg -version` banner.
    pub async fn version(&self) -> Result<String, ProviderError> {
        let out = Command::new(&self.ffmpeg).arg("-version").output().await?;
        if !out.status.success() {
            return Err(ProviderError::ProbeFailed("ffmpeg -version failed".into()));
        }
        let banner = String::from_utf8_lossy(&out.stdout);
        Ok(banner.lines().next().unwrap_or_default().trim().to_string())
    }
}

fn locate(name: &str, explicit: Option<&Path>) -> Result<PathBuf, ProviderError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(ProviderError::ToolMissing(path.display().to_string()));
    }
    which::which(name).map_err(|_| ProviderError::ToolMissing(name.to_string()))
}

/// Cache key for a probe result. Any component mismatch forces a re-probe.
fn cache_key(path: &Path) -> Option<CacheKey> {
    let canonical = path.canonicalize().ok()?;
    let meta = std::fs::metadata(&canonical).ok()?;
    let mtime = meta
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_secs();
    Some((canonical, mtime, meta.len()))
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

fn parse_report(raw: &str) -> Result<ProbeOutcome, ProviderError> {
    let parsed: FfprobeOutput = serde_json::from_str(raw)
        .map_err(|e| ProviderError::ProbeFailed(format!("bad ffprobe output: {e}")))?;
    if parsed.streams.is_empty() {
        return Ok(ProbeOutcome::Unknown);
    }
    let duration_secs = parsed
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));
    Ok(ProbeOutcome::Known(ProbeReport {
        duration_secs,
        has_video: video.is_some(),
        has_audio,
        width: video.and_then(|s| s.width).unwrap_or(0),
        height: video.and_then(|s| s.height).unwrap_or(0),
    }))
}

/// Sibling path the muxer writes to before renaming into place.
fn staging_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    output.with_file_name(name)
}

fn stderr_detail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no diagnostic output")
        .trim()
        .to_string()
}

#[async_trait::async_trait]
impl MediaProber for FfmpegService {
    async fn probe(&self, path: &Path) -> Result<ProbeOutcome, ProviderError> {
        let key = cache_key(path);
        if let Some(key) = &key {
            if let Ok(cache) = self.probe_cache.lock() {
                if let Some(hit) = cache.get(key) {
                    return Ok(*hit);
                }
            }
        }

        let mut cmd = Command::new(&self.ffprobe);
        cmd.args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path);
        let out = timeout(self.probe_timeout, cmd.output())
            .await
            .map_err(|_| ProviderError::TimedOut(self.probe_timeout))??;
        if !out.status.success() {
            return Err(ProviderError::ProbeFailed(stderr_detail(&out.stderr)));
        }

        let outcome = parse_report(&String::from_utf8_lossy(&out.stdout))?;
        if let Some(key) = key {
            if let Ok(mut cache) = self.probe_cache.lock() {
                cache.insert(key, outcome);
            }
        }
        Ok(outcome)
    }
}

#[async_trait::async_trait]
impl MediaMuxer for FfmpegService {
    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        copy_streams: bool,
    ) -> Result<(), ProviderError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write to a staging sibling so a failed run never clobbers `output`.
        let staging = staging_path(output);

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error"])
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio);
        if copy_streams {
            cmd.args(["-c", "copy"]);
        }
        cmd.arg("-y").arg(&staging);

        let result = timeout(self.merge_timeout, cmd.output()).await;
        let out = match result {
            Ok(out) => out?,
            Err(_) => {
                cleanup(&staging).await;
                return Err(ProviderError::TimedOut(self.merge_timeout));
            }
        };
        if !out.status.success() {
            cleanup(&staging).await;
            return Err(ProviderError::MergeFailed(stderr_detail(&out.stderr)));
        }
        if tokio::fs::metadata(&staging).await.is_err() {
            return Err(ProviderError::MergeFailed(
                "ffmpeg reported success but produced no output".into(),
            ));
        }
        tokio::fs::rename(&staging, output).await?;
        Ok(())
    }
}

async fn cleanup(staging: &Path) {
    if tokio::fs::remove_file(staging).await.is_err() {
        warn!(path = %staging.display(), "could not remove staging file");
    }
}
