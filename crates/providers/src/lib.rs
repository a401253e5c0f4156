//! Provider abstractions for media probing and muxing.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub mod ffmpeg;
pub mod stub;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("tool not found: {0}")]
    ToolMissing(String),
    #[error("probe failed: {0}")]
    ProbeFailed(String),
    #[error("merge failed: {0}")]
    MergeFailed(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Stream composition of one media file as reported by the prober.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Container duration in seconds, 0 when unknown.
    pub duration_secs: f64,
    pub has_video: bool,
    pub has_audio: bool,
    pub width: u32,
    pub height: u32,
}

/// Result of a successful probe invocation.
///
/// `Unknown` means the tool ran but could not determine the stream
/// composition; callers are expected to degrade gracefully.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    Known(ProbeReport),
    Unknown,
}

#[async_trait::async_trait]
pub trait MediaProber: Send + Sync {
    /// Probe a file. Side-effect free and idempotent for an unchanged file.
    async fn probe(&self, path: &Path) -> Result<ProbeOutcome, ProviderError>;
}

#[async_trait::async_trait]
pub trait MediaMuxer: Send + Sync {
    /// Combine a video-only and an audio-only input into `output`.
    ///
    /// On failure the output path must be left untouched; implementations
    /// write to a temporary sibling and rename into place on success.
    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        copy_streams: bool,
    ) -> Result<(), ProviderError>;
}
