//! Derives the comparable "base name" used as the name-matching key.
//!
//! Downloaders split one title into `<title>_bilibili_1_video.m4s` and
//! `<title>_bilibili_1_audio.m4s` style siblings; stripping the known
//! suffixes recovers the shared title. Stripping repeats until the name
//! stops changing so the function is idempotent for every input.

use once_cell::sync::Lazy;
use regex::Regex;

static SITE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)_bilibili(_\d+(_\d+)?)?$").expect("valid pattern"));

static ROLE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(_audio|_video|_aud|_vid|_track\d+|_a\d+|_v\d+)$").expect("valid pattern"));

/// Strip a trailing known media extension; unknown extensions are part of
/// the name and stay.
fn strip_known_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if crate::scanner::DEFAULT_EXTENSIONS.contains(&ext.to_lowercase().as_str()) =>
        {
            stem
        }
        _ => name,
    }
}

/// Base name of a filename: stem with downloader and media-role suffixes
/// removed. Never fails; an empty result falls back to the original stem.
pub fn base_name(filename: &str) -> String {
    let stem = strip_known_extension(filename.trim()).trim();
    let mut current = stem.to_string();
    loop {
        let next = strip_known_extension(&current);
        let next = SITE_SUFFIX.replace(next, "");
        let next = ROLE_SUFFIX.replace(&next, "");
        let next = next.trim();
        if next == current {
            break;
        }
        current = next.to_string();
    }
    if current.is_empty() {
        stem.to_string()
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_downloader_suffixes() {
        assert_eq!(base_name("title_bilibili.mp4"), "title");
        assert_eq!(base_name("title_bilibili_1.mp4"), "title");
        assert_eq!(base_name("title_bilibili_1_2.m4s"), "title");
        assert_eq!(base_name("title_BILIBILI_3.mp4"), "title");
    }

    #[test]
    fn strips_media_role_suffixes() {
        assert_eq!(base_name("clip_audio.m4s"), "clip");
        assert_eq!(base_name("clip_video.m4s"), "clip");
        assert_eq!(base_name("clip_aud.aac"), "clip");
        assert_eq!(base_name("clip_vid.mp4"), "clip");
        assert_eq!(base_name("clip_track2.m4a"), "clip");
        assert_eq!(base_name("clip_a1.m4a"), "clip");
        assert_eq!(base_name("clip_V2.mp4"), "clip");
    }

    #[test]
    fn strips_stacked_suffixes() {
        assert_eq!(base_name("movie_v2_bilibili_1_2.mp4"), "movie");
        assert_eq!(base_name("movie_audio_bilibili.m4s"), "movie");
    }

    #[test]
    fn keeps_unknown_extensions_and_plain_names() {
        assert_eq!(base_name("notes.txt"), "notes.txt");
        assert_eq!(base_name("video_A_bilibili.mp4"), "video_A");
        assert_eq!(base_name("plain"), "plain");
    }

    #[test]
    fn empty_after_stripping_falls_back_to_stem() {
        assert_eq!(base_name("_audio.m4s"), "_audio");
        assert_eq!(base_name("_bilibili.mp4"), "_bilibili");
    }

    #[test]
    fn never_panics_on_odd_input() {
        for odd in ["", ".", "...", "  ", "_", ".mp4", "a.b.c.d"] {
            let _ = base_name(odd);
        }
    }

    #[test]
    fn is_idempotent() {
        let samples = [
            "title_bilibili_1_video.m4s",
            "clip_audio_video.mp4",
            "a.mp4.mp4",
            "_audio.m4s",
            "video_A_bilibili.mp4",
            "x.y_video.mp4",
            "notes.txt",
            "",
            "  padded name _bilibili.mp4",
        ];
        for sample in samples {
            let once = base_name(sample);
            assert_eq!(base_name(&once), once, "not idempotent for {sample:?}");
        }
    }
}
