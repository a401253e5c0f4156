//! Turns matched pairs plus naming/retry/delete policy into an ordered,
//! immutable execution plan.
//!
//! The run timestamp is a parameter, captured once for the whole plan, so
//! naming is deterministic and testable.

use crate::models::{MatchedPair, MergePlan, MergeTask};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingFormat {
    /// `{n}.ATM_{YYYY_MM_DD_HH.MM}.mp4`
    #[default]
    Default,
    /// `{video base name}.mp4`
    Original,
    /// User template with `{name}`, `{date}`, `{time}`, `{num}` placeholders.
    Custom,
}

#[derive(Debug, Error)]
#[error("unknown naming format: {0} (expected default|original|custom)")]
pub struct ParseNamingError(String);

impl FromStr for NamingFormat {
    type Err = ParseNamingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "original" => Ok(Self::Original),
            "custom" => Ok(Self::Custom),
            other => Err(ParseNamingError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanConfig {
    pub output_dir: PathBuf,
    pub naming: NamingFormat,
    pub custom_template: Option<String>,
    pub delete_sources: bool,
    pub copy_streams_only: bool,
    pub max_retries: u32,
}

/// Precondition violations, the only fail-fast surface of the engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("no pairs to plan")]
    Empty,
    #[error("custom naming requires a non-empty template")]
    MissingTemplate,
}

pub fn plan(
    pairs: Vec<MatchedPair>,
    config: &PlanConfig,
    run_at: NaiveDateTime,
) -> Result<MergePlan, PlanError> {
    if pairs.is_empty() {
        return Err(PlanError::Empty);
    }
    let template = match config.naming {
        NamingFormat::Custom => {
            let template = config
                .custom_template
                .as_deref()
                .map(str::trim)
                .unwrap_or("");
            if template.is_empty() {
                return Err(PlanError::MissingTemplate);
            }
            Some(template.to_string())
        }
        _ => None,
    };

    let mut reserved: HashSet<PathBuf> = HashSet::new();
    let mut tasks = Vec::with_capacity(pairs.len());
    for (i, pair) in pairs.into_iter().enumerate() {
        let index = i + 1;
        let name = output_name(&pair, index, run_at, config.naming, template.as_deref());
        // Best-effort reservation; re-checked authoritatively at run time.
        let planned_output = unique_path(&config.output_dir.join(name), &|p| {
            p.exists() || reserved.contains(p)
        });
        reserved.insert(planned_output.clone());
        tasks.push(MergeTask {
            index,
            pair,
            planned_output,
        });
    }
    Ok(MergePlan {
        tasks,
        delete_sources: config.delete_sources,
        copy_streams_only: config.copy_streams_only,
        max_retries: config.max_retries,
    })
}

fn output_name(
    pair: &MatchedPair,
    index: usize,
    run_at: NaiveDateTime,
    naming: NamingFormat,
    template: Option<&str>,
) -> String {
    let video_name = if pair.video.base_name.is_empty() {
        "video"
    } else {
        pair.video.base_name.as_str()
    };
    match naming {
        NamingFormat::Default => {
            format!("{index}.ATM_{}.mp4", run_at.format("%Y_%m_%d_%H.%M"))
        }
        NamingFormat::Original => format!("{video_name}.mp4"),
        NamingFormat::Custom => {
            let mut name = template
                .unwrap_or_default()
                .replace("{name}", video_name)
                .replace("{date}", &run_at.format("%Y%m%d").to_string())
                .replace("{time}", &run_at.format("%H%M").to_string())
                .replace("{num}", &format!("{index:03}"));
            if !name.to_lowercase().ends_with(".mp4") {
                name.push_str(".mp4");
            }
            name
        }
    }
}

/// Append `_1`, `_2`, … before the extension until `taken` rejects nothing.
pub fn unique_path(candidate: &Path, taken: &dyn Fn(&Path) -> bool) -> PathBuf {
    if !taken(candidate) {
        return candidate.to_path_buf();
    }
    let stem = candidate
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let ext = candidate
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let parent = candidate.parent().unwrap_or_else(|| Path::new("."));
    let mut counter = 1;
    loop {
        let name = if ext.is_empty() {
            format!("{stem}_{counter}")
        } else {
            format!("{stem}_{counter}.{ext}")
        };
        let next = parent.join(name);
        if !taken(&next) {
            return next;
        }
        counter += 1;
    }
}
