use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Pipeline configuration, loadable from a YAML file.
///
/// Every field has a default so an empty file (or no file at all) yields a
/// working configuration pointing at `ffmpeg`/`ffprobe` on PATH.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path or name of the ffmpeg binary (transcode, concat, silencedetect, trim).
    pub ffmpeg_path: PathBuf,
    /// Path or name of the ffprobe binary (duration probe).
    pub ffprobe_path: PathBuf,
    /// silencedetect noise floor in dBFS.
    pub silence_noise_db: f32,
    /// silencedetect minimum silence duration in seconds.
    pub silence_min_duration_secs: f32,
    /// Transcription chunk budget in bytes. Files strictly under this size are
    /// sent as a single chunk.
    pub max_chunk_bytes: u64,
    /// Wall-clock timeout for any single external tool invocation, in seconds.
    pub tool_timeout_secs: u64,
    /// Root directory for scratch workspaces. Defaults to a cache dir.
    pub workspace_root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            silence_noise_db: -30.0,
            silence_min_duration_secs: 0.5,
            max_chunk_bytes: 10 * 1024 * 1024,
            tool_timeout_secs: 600,
            workspace_root: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| crate::error::Error::Precondition(format!("bad config: {}", e)))?;
        Ok(config)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Directory under which scratch workspaces are created.
    pub fn scratch_root(&self) -> PathBuf {
        self.workspace_root.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("mixdown")
        })
    }
}
