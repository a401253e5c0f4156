use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Role of a media file, derived from its stream composition and never
/// stored separately from the two booleans it is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaRole {
    VideoOnly,
    AudioOnly,
    Both,
    Neither,
}

impl MediaRole {
    pub fn from_streams(has_video: bool, has_audio: bool) -> Self {
        match (has_video, has_audio) {
            (true, false) => MediaRole::VideoOnly,
            (false, true) => MediaRole::AudioOnly,
            (true, true) => MediaRole::Both,
            (false, false) => MediaRole::Neither,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MediaRole::VideoOnly => "video-only",
            MediaRole::AudioOnly => "audio-only",
            MediaRole::Both => "already combined",
            MediaRole::Neither => "unrecognized",
        }
    }
}

/// One discovered file. Created once per scan+probe pass, immutable after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub path: PathBuf,
    pub display_name: String,
    /// Stem with downloader/role suffixes stripped, the name-matching key.
    pub base_name: String,
    /// Seconds; 0 means unknown.
    pub duration_secs: f64,
    pub has_video: bool,
    pub has_audio: bool,
    /// Pixels; 0 means unknown.
    pub width: u32,
    pub height: u32,
    pub size_mb: f64,
}

impl MediaItem {
    pub fn role(&self) -> MediaRole {
        MediaRole::from_streams(self.has_video, self.has_audio)
    }

    pub fn is_video_only(&self) -> bool {
        self.role() == MediaRole::VideoOnly
    }

    pub fn is_audio_only(&self) -> bool {
        self.role() == MediaRole::AudioOnly
    }

    /// Lower-cased extension without the leading dot, empty when absent.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default()
    }

    pub fn resolution(&self) -> Option<String> {
        (self.width > 0 && self.height > 0).then(|| format!("{}x{}", self.width, self.height))
    }
}

/// One accepted video/audio association.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedPair {
    pub video: MediaItem,
    pub audio: MediaItem,
    /// Heuristic estimate in [0, 1] that the two belong together.
    pub confidence: f64,
}

impl MatchedPair {
    pub fn duration_diff(&self) -> f64 {
        (self.video.duration_secs - self.audio.duration_secs).abs()
    }
}

/// One planned unit of work.
#[derive(Debug, Clone)]
pub struct MergeTask {
    /// 1-based sequence index, stable across the run.
    pub index: usize,
    pub pair: MatchedPair,
    /// Reserved at plan time; re-validated for collisions at execution time.
    pub planned_output: PathBuf,
}

/// Ordered, fully-resolved set of merge tasks plus execution policy.
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub tasks: Vec<MergeTask>,
    pub delete_sources: bool,
    pub copy_streams_only: bool,
    /// Additional identical attempts after a failed first attempt.
    pub max_retries: u32,
}

/// Result of executing one task, recorded once and immutable after.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub success: bool,
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    /// Final path actually written; may differ from the planned path.
    pub output_path: PathBuf,
    /// Present iff the task failed.
    pub error: Option<String>,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl MergeOutcome {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Aggregate over a batch, appended to only by the executor.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// True when the run stopped before scheduling every planned task.
    pub cancelled: bool,
    /// Outcomes in completion order.
    pub outcomes: Vec<MergeOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn begin(total: usize) -> Self {
        Self {
            total,
            succeeded: 0,
            failed: 0,
            cancelled: false,
            outcomes: Vec::with_capacity(total),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, outcome: MergeOutcome) {
        if outcome.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }

    pub fn is_complete(&self) -> bool {
        self.succeeded + self.failed >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_is_a_pure_function_of_the_stream_flags() {
        assert_eq!(MediaRole::from_streams(true, false), MediaRole::VideoOnly);
        assert_eq!(MediaRole::from_streams(false, true), MediaRole::AudioOnly);
        assert_eq!(MediaRole::from_streams(true, true), MediaRole::Both);
        assert_eq!(MediaRole::from_streams(false, false), MediaRole::Neither);
    }

    #[test]
    fn extension_is_lowercased_without_dot() {
        let item = MediaItem {
            path: PathBuf::from("/dl/Clip_bilibili.MP4"),
            display_name: "Clip_bilibili.MP4".into(),
            base_name: "Clip".into(),
            duration_secs: 0.0,
            has_video: true,
            has_audio: false,
            width: 0,
            height: 0,
            size_mb: 0.0,
        };
        assert_eq!(item.extension(), "mp4");
        assert_eq!(item.resolution(), None);
    }

    #[test]
    fn summary_tallies_outcomes_in_completion_order() {
        let mut summary = RunSummary::begin(2);
        let outcome = MergeOutcome {
            success: true,
            video_path: PathBuf::from("v"),
            audio_path: PathBuf::from("a"),
            output_path: PathBuf::from("o"),
            error: None,
            retry_count: 0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        summary.record(outcome.clone());
        assert!(!summary.is_complete());
        summary.record(MergeOutcome {
            success: false,
            error: Some("boom".into()),
            ..outcome
        });
        assert!(summary.is_complete());
        assert_eq!((summary.succeeded, summary.failed), (1, 1));
    }
}
