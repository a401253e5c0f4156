//! Stream-role classification.
//!
//! The role is a pure function of the two stream flags; the only permitted
//! side effect is one human-readable report line per file, emitted to an
//! injected sink.

use crate::models::{MediaItem, MediaRole};
use providers::ProbeReport;
use tracing::info;

/// Files probing as `Unknown` above this size are presumed video-only.
pub const DEFAULT_SIZE_THRESHOLD_MB: f64 = 50.0;

pub fn classify(report: &ProbeReport) -> MediaRole {
    MediaRole::from_streams(report.has_video, report.has_audio)
}

/// Size heuristic for files whose stream composition the prober could not
/// determine: large files are presumed video-only, small ones audio-only.
pub fn fallback_streams(size_mb: f64, threshold_mb: f64) -> (bool, bool) {
    if size_mb > threshold_mb {
        (true, false)
    } else {
        (false, true)
    }
}

/// Items split by role. `combined` and `unrecognized` are reported but
/// excluded from matching.
#[derive(Debug, Default)]
pub struct Classified {
    pub videos: Vec<MediaItem>,
    pub audios: Vec<MediaItem>,
    pub combined: Vec<MediaItem>,
    pub unrecognized: Vec<MediaItem>,
}

/// One report line per file: path, role, size, and resolution for video.
pub fn describe(item: &MediaItem) -> String {
    let role = item.role();
    match item.resolution() {
        Some(res) if role == MediaRole::VideoOnly || role == MediaRole::Both => format!(
            "{} [{}] {:.1} MB {}",
            item.path.display(),
            role.label(),
            item.size_mb,
            res
        ),
        _ => format!(
            "{} [{}] {:.1} MB",
            item.path.display(),
            role.label(),
            item.size_mb
        ),
    }
}

pub fn partition(items: Vec<MediaItem>, sink: &mut dyn FnMut(&str)) -> Classified {
    let mut out = Classified::default();
    for item in items {
        sink(&describe(&item));
        match item.role() {
            MediaRole::VideoOnly => out.videos.push(item),
            MediaRole::AudioOnly => out.audios.push(item),
            MediaRole::Both => out.combined.push(item),
            MediaRole::Neither => out.unrecognized.push(item),
        }
    }
    out
}

/// Default sink routing report lines through `tracing`.
pub fn log_sink(line: &str) {
    info!("{line}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn item(name: &str, has_video: bool, has_audio: bool) -> MediaItem {
        MediaItem {
            path: PathBuf::from(format!("/in/{name}")),
            display_name: name.to_string(),
            base_name: crate::naming::base_name(name),
            duration_secs: 10.0,
            has_video,
            has_audio,
            width: if has_video { 1280 } else { 0 },
            height: if has_video { 720 } else { 0 },
            size_mb: 1.5,
        }
    }

    #[test]
    fn classify_is_pure_over_the_flag_grid() {
        for (video, audio, expected) in [
            (true, false, MediaRole::VideoOnly),
            (false, true, MediaRole::AudioOnly),
            (true, true, MediaRole::Both),
            (false, false, MediaRole::Neither),
        ] {
            let report = ProbeReport {
                has_video: video,
                has_audio: audio,
                ..ProbeReport::default()
            };
            assert_eq!(classify(&report), expected);
        }
    }

    #[test]
    fn size_heuristic_splits_on_threshold() {
        assert_eq!(fallback_streams(80.0, 50.0), (true, false));
        assert_eq!(fallback_streams(3.0, 50.0), (false, true));
        // At the threshold the file is still treated as audio.
        assert_eq!(fallback_streams(50.0, 50.0), (false, true));
    }

    #[test]
    fn partition_reports_once_per_file_and_splits_by_role() {
        let items = vec![
            item("a_video.m4s", true, false),
            item("a_audio.m4s", false, true),
            item("done.mp4", true, true),
            item("junk.mp4", false, false),
        ];
        let mut lines = Vec::new();
        let classified = partition(items, &mut |l| lines.push(l.to_string()));
        assert_eq!(lines.len(), 4);
        assert_eq!(classified.videos.len(), 1);
        assert_eq!(classified.audios.len(), 1);
        assert_eq!(classified.combined.len(), 1);
        assert_eq!(classified.unrecognized.len(), 1);
        assert!(lines[0].contains("video-only"));
        assert!(lines[0].contains("1280x720"));
        assert!(lines[3].contains("unrecognized"));
    }
}
