//! Scriptable in-process providers for tests and dry runs.

use crate::{MediaMuxer, MediaProber, ProbeOutcome, ProbeReport, ProviderError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Prober returning canned reports per path.
///
/// Paths without a scripted report probe as `Unknown`; paths registered via
/// [`StubProber::fail_on`] fail the probe call outright.
#[derive(Debug, Default)]
pub struct StubProber {
    reports: HashMap<PathBuf, ProbeReport>,
    failing: HashSet<PathBuf>,
}

impl StubProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_report(mut self, path: impl Into<PathBuf>, report: ProbeReport) -> Self {
        self.reports.insert(path.into(), report);
        self
    }

    pub fn fail_on(mut self, path: impl Into<PathBuf>) -> Self {
        self.failing.insert(path.into());
        self
    }

    /// Canned report for a video-only stream of the given duration.
    pub fn video_report(duration_secs: f64, width: u32, height: u32) -> ProbeReport {
        ProbeReport {
            duration_secs,
            has_video: true,
            has_audio: false,
            width,
            height,
        }
    }

    /// Canned report for an audio-only stream of the given duration.
    pub fn audio_report(duration_secs: f64) -> ProbeReport {
        ProbeReport {
            duration_secs,
            has_video: false,
            has_audio: true,
            width: 0,
            height: 0,
        }
    }
}

#[async_trait::async_trait]
impl MediaProber for StubProber {
    async fn probe(&self, path: &Path) -> Result<ProbeOutcome, ProviderError> {
        if self.failing.contains(path) {
            return Err(ProviderError::ProbeFailed(format!(
                "scripted failure for {}",
                path.display()
            )));
        }
        Ok(self
            .reports
            .get(path)
            .map(|r| ProbeOutcome::Known(*r))
            .unwrap_or(ProbeOutcome::Unknown))
    }
}

/// One recorded muxer invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxCall {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub output: PathBuf,
    pub copy_streams: bool,
}

/// Muxer that fails a scripted number of leading invocations, then succeeds
/// by writing a marker file at the output path.
#[derive(Debug, Default)]
pub struct StubMuxer {
    failures_remaining: AtomicUsize,
    always_fail: bool,
    calls: Mutex<Vec<MuxCall>>,
}

impl StubMuxer {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }

    pub fn failing_times(n: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<MuxCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl MediaMuxer for StubMuxer {
    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        copy_streams: bool,
    ) -> Result<(), ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(MuxCall {
                video: video.to_path_buf(),
                audio: audio.to_path_buf(),
                output: output.to_path_buf(),
                copy_streams,
            });
        }
        if self.always_fail {
            return Err(ProviderError::MergeFailed("scripted failure".into()));
        }
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::MergeFailed("scripted failure".into()));
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, b"merged").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unscripted_path_probes_unknown() {
        let prober = StubProber::new();
        let outcome = prober.probe(Path::new("/nowhere.mp4")).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::Unknown);
    }

    #[tokio::test]
    async fn muxer_fails_then_succeeds() {
        let temp = tempfile::tempdir().unwrap();
        let out = temp.path().join("merged.mp4");
        let muxer = StubMuxer::failing_times(2);
        let v = Path::new("/v.mp4");
        let a = Path::new("/a.m4a");
        assert!(muxer.merge(v, a, &out, true).await.is_err());
        assert!(muxer.merge(v, a, &out, true).await.is_err());
        muxer.merge(v, a, &out, true).await.unwrap();
        assert!(out.exists());
        assert_eq!(muxer.calls().len(), 3);
    }
}
