//! Configuration file loading.
//!
//! Every field has a default so the tool runs without any config file;
//! a file only overrides the sections it names.

use crate::matcher::MatcherConfig;
use crate::planner::NamingFormat;
use crate::scanner::{self, DEFAULT_EXTENSIONS};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanSection,
    pub matcher: MatcherConfig,
    pub output: OutputSection,
    pub ffmpeg: FfmpegSection,
    pub retry: RetrySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub extensions: Vec<String>,
    pub exclude: Vec<String>,
    pub parallel_workers: usize,
    pub size_threshold_mb: f64,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            exclude: Vec::new(),
            parallel_workers: 1,
            size_threshold_mb: scanner::ScanConfig::default().size_threshold_mb,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub dir: Option<String>,
    pub naming: NamingFormat,
    pub custom_template: Option<String>,
    pub delete_sources: bool,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: None,
            naming: NamingFormat::Default,
            custom_template: None,
            delete_sources: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegSection {
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
    pub copy_streams_only: bool,
    pub probe_timeout_secs: u64,
    pub merge_timeout_secs: u64,
}

impl Default for FfmpegSection {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            copy_streams_only: true,
            probe_timeout_secs: 15,
            merge_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub enabled: bool,
    pub max_retries: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
        }
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
