use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    diagnostics::{DEFAULT_LOG_FILTER, DEFAULT_TRACE_FILE_PREFIX},
    encode::EncoderConfig,
    model::{DEFAULT_LINES_PER_BEAT, DEFAULT_TICKS_PER_LINE},
    render::VideoConfig,
    scheduler::DEFAULT_NOTIFICATION_CAPACITY,
};

pub const CONFIG_FILE_NAME: &str = "tickreel.config.toml";
pub const CONFIG_PATH_ENV: &str = "TICKREEL_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub playback: PlaybackConfig,
    pub video: VideoConfig,
    pub encoder: EncoderConfig,
    pub diagnostics: DiagnosticsConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub looping: bool,
    pub notification_capacity: usize,
    /// Grid used when importing MIDI files.
    pub import_lines_per_beat: u32,
    pub import_ticks_per_line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub logs_dir: PathBuf,
    pub frames_dir: PathBuf,
    pub exports_dir: PathBuf,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            looping: false,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            import_lines_per_beat: DEFAULT_LINES_PER_BEAT,
            import_ticks_per_line: DEFAULT_TICKS_PER_LINE,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: DEFAULT_LOG_FILTER.to_string(),
            trace_file_prefix: DEFAULT_TRACE_FILE_PREFIX.to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            frames_dir: PathBuf::from("data/frames"),
            exports_dir: PathBuf::from("data/exports"),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = discover_config_path().with_context(|| {
            format!("failed to locate {CONFIG_FILE_NAME}; looked in cwd and parent directory")
        })?;
        Self::load_from(&config_path)
    }

    /// Like [`AppConfig::load`], but falls back to defaults when no config
    /// file can be found. A file that exists but does not parse is still an
    /// error.
    pub fn load_or_default() -> Result<Self> {
        match discover_config_path() {
            Ok(path) => Self::load_from(&path),
            Err(_) => {
                debug!("no config file found; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file {}", config_path.display()))?;

        let config: AppConfig = toml::from_str(&content).with_context(|| {
            format!("failed to parse config TOML from {}", config_path.display())
        })?;

        debug!(path = %config_path.display(), "config loaded");
        Ok(config)
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    [cwd.join(CONFIG_FILE_NAME), cwd.join("..").join(CONFIG_FILE_NAME)]
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| anyhow::anyhow!("{CONFIG_FILE_NAME} not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::AnimationKind;

    #[test]
    fn partial_files_keep_defaults_for_missing_sections() {
        let config: AppConfig = toml::from_str(
            r#"
            [video]
            width = 640
            height = 360
            style = "bars"
            flash_track = "Drums"

            [encoder]
            timeout_secs = 30
            "#,
        )
        .expect("config parses");

        assert_eq!(config.video.width, 640);
        assert_eq!(config.video.style, AnimationKind::Bars);
        assert_eq!(config.video.flash_track.as_deref(), Some("Drums"));
        assert_eq!(config.video.fps, VideoConfig::default().fps);
        assert_eq!(config.encoder.timeout_secs, Some(30));
        assert_eq!(config.encoder.ffmpeg_binary, "ffmpeg");
        assert_eq!(config.playback, PlaybackConfig::default());
    }

    #[test]
    fn load_from_reports_the_offending_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[video\nwidth = ").expect("write config");

        let error = AppConfig::load_from(&path).expect_err("broken toml must fail");
        assert!(format!("{error:#}").contains(CONFIG_FILE_NAME));
    }
}
