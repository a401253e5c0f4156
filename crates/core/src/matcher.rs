//! Pairs video-only items with audio-only items under ambiguity.
//!
//! Greedy single pass: both lists are sorted by descending duration so the
//! most information-bearing items are assigned first, then each video takes
//! the highest-scoring unconsumed audio above the confidence threshold.
//! No backtracking or global assignment; inputs are small and mostly
//! unambiguous.

use crate::models::{MatchedPair, MediaItem};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// (video extension, audio extension) pairs that earn the flat bonus.
const EXTENSION_PAIRS: [(&str, &str); 5] = [
    ("m4s", "m4s"),
    ("mp4", "m4a"),
    ("mp4", "aac"),
    ("mkv", "aac"),
    ("webm", "opus"),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    #[default]
    Smart,
    Filename,
    Duration,
}

#[derive(Debug, Error)]
#[error("unknown match strategy: {0} (expected smart|filename|duration)")]
pub struct ParseStrategyError(String);

impl FromStr for MatchStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smart" => Ok(Self::Smart),
            "filename" => Ok(Self::Filename),
            "duration" => Ok(Self::Duration),
            other => Err(ParseStrategyError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub max_duration_diff_secs: f64,
    /// Minimum score in [0, 1] for a pair to be accepted.
    pub confidence_threshold: f64,
    pub strategy: MatchStrategy,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            max_duration_diff_secs: 5.0,
            confidence_threshold: 0.6,
            strategy: MatchStrategy::Smart,
        }
    }
}

/// Accepted pairs plus the leftovers, kept for diagnostics.
#[derive(Debug, Default)]
pub struct MatchReport {
    pub pairs: Vec<MatchedPair>,
    pub unmatched_videos: Vec<MediaItem>,
    pub unmatched_audios: Vec<MediaItem>,
}

/// Descending duration, ties by descending size, then path for determinism.
fn processing_order(a: &MediaItem, b: &MediaItem) -> Ordering {
    b.duration_secs
        .total_cmp(&a.duration_secs)
        .then(b.size_mb.total_cmp(&a.size_mb))
        .then_with(|| a.path.cmp(&b.path))
}

pub fn match_pairs(
    videos: &[MediaItem],
    audios: &[MediaItem],
    config: &MatcherConfig,
) -> MatchReport {
    let mut videos_sorted: Vec<&MediaItem> = videos.iter().collect();
    videos_sorted.sort_by(|a, b| processing_order(a, b));
    let mut audios_sorted: Vec<&MediaItem> = audios.iter().collect();
    audios_sorted.sort_by(|a, b| processing_order(a, b));

    let mut audios_by_base: HashMap<&str, Vec<&MediaItem>> = HashMap::new();
    for &audio in &audios_sorted {
        audios_by_base
            .entry(audio.base_name.as_str())
            .or_default()
            .push(audio);
    }

    let mut consumed: HashSet<&Path> = HashSet::new();
    let mut pairs = Vec::new();

    for &video in &videos_sorted {
        let candidates: Vec<&MediaItem> = match config.strategy {
            MatchStrategy::Duration => unconsumed(&audios_sorted, &consumed),
            MatchStrategy::Smart | MatchStrategy::Filename => {
                // Prefer same-name audios, fall back to the full pool.
                let named = audios_by_base
                    .get(video.base_name.as_str())
                    .map(|same| unconsumed(same, &consumed))
                    .unwrap_or_default();
                if named.is_empty() {
                    unconsumed(&audios_sorted, &consumed)
                } else {
                    named
                }
            }
        };

        // Strict `>` keeps the first candidate on exact ties.
        let mut best: Option<(&MediaItem, f64)> = None;
        for audio in candidates {
            let candidate_score = score(video, audio, config);
            if best.map_or(true, |(_, s)| candidate_score > s) {
                best = Some((audio, candidate_score));
            }
        }

        if let Some((audio, confidence)) = best {
            if confidence >= config.confidence_threshold {
                consumed.insert(audio.path.as_path());
                pairs.push(MatchedPair {
                    video: video.clone(),
                    audio: audio.clone(),
                    confidence,
                });
            }
        }
    }

    let matched_videos: HashSet<&Path> =
        pairs.iter().map(|p| p.video.path.as_path()).collect();
    MatchReport {
        unmatched_videos: videos
            .iter()
            .filter(|v| !matched_videos.contains(v.path.as_path()))
            .cloned()
            .collect(),
        unmatched_audios: audios
            .iter()
            .filter(|a| !consumed.contains(a.path.as_path()))
            .cloned()
            .collect(),
        pairs,
    }
}

fn unconsumed<'a>(audios: &[&'a MediaItem], consumed: &HashSet<&Path>) -> Vec<&'a MediaItem> {
    audios
        .iter()
        .filter(|a| !consumed.contains(a.path.as_path()))
        .copied()
        .collect()
}

/// Match score in [0, 1] for one candidate pair under the configured
/// strategy.
pub fn score(video: &MediaItem, audio: &MediaItem, config: &MatcherConfig) -> f64 {
    match config.strategy {
        MatchStrategy::Filename => name_similarity(video, audio),
        MatchStrategy::Duration => {
            duration_closeness(video, audio, config.max_duration_diff_secs)
        }
        MatchStrategy::Smart => {
            let mut total = name_similarity(video, audio) * 0.4;
            total += duration_closeness(video, audio, config.max_duration_diff_secs) * 0.3;
            total += size_ratio(video, audio) * 0.2;
            if extension_bonus(video, audio) {
                total += 0.1;
            }
            total.min(1.0)
        }
    }
}

fn name_similarity(video: &MediaItem, audio: &MediaItem) -> f64 {
    similarity_ratio(
        &video.base_name.to_lowercase(),
        &audio.base_name.to_lowercase(),
    )
}

/// 1.0 at equal durations, linearly down to 0.0 at `max_diff` apart. Falls
/// back to size closeness when either duration is unknown; the two terms
/// are mutually exclusive.
fn duration_closeness(video: &MediaItem, audio: &MediaItem, max_diff: f64) -> f64 {
    if video.duration_secs > 0.0 && audio.duration_secs > 0.0 {
        let diff = (video.duration_secs - audio.duration_secs).abs();
        if max_diff > 0.0 {
            (1.0 - diff / max_diff).max(0.0)
        } else if diff == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        size_closeness(video, audio)
    }
}

fn size_closeness(video: &MediaItem, audio: &MediaItem) -> f64 {
    let max = video.size_mb.max(audio.size_mb);
    if max > 0.0 {
        (1.0 - (video.size_mb - audio.size_mb).abs() / max).max(0.0)
    } else {
        0.0
    }
}

fn size_ratio(video: &MediaItem, audio: &MediaItem) -> f64 {
    if video.size_mb > 0.0 && audio.size_mb > 0.0 {
        video.size_mb.min(audio.size_mb) / video.size_mb.max(audio.size_mb)
    } else {
        0.0
    }
}

fn extension_bonus(video: &MediaItem, audio: &MediaItem) -> bool {
    let pair = (video.extension(), audio.extension());
    EXTENSION_PAIRS
        .iter()
        .any(|(v, a)| *v == pair.0 && *a == pair.1)
}

/// Similarity of two strings in [0, 1]: `2·lcs / (len_a + len_b)` over
/// characters, an LCS-based ratio in the Ratcliff/Obershelp family.
fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    // Single-row LCS table.
    let mut row = vec![0usize; b.len() + 1];
    for ca in &a {
        let mut prev_diag = 0;
        for (j, cb) in b.iter().enumerate() {
            let up = row[j + 1];
            row[j + 1] = if ca == cb {
                prev_diag + 1
            } else {
                up.max(row[j])
            };
            prev_diag = up;
        }
    }
    2.0 * row[b.len()] as f64 / (a.len() + b.len()) as f64
}
