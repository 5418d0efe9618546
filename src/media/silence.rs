use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::media::run_tool;

/// One detected silence, millisecond offsets from the start of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceInterval {
    pub start_ms: i64,
    pub end_ms: i64,
    pub duration_ms: i64,
}

/// Run ffmpeg's silencedetect filter over `audio` and return the detected
/// intervals in file order. The filter writes to stderr; stdout is discarded.
pub async fn detect(config: &Config, audio: &Path) -> Result<Vec<SilenceInterval>> {
    let filter = format!(
        "silencedetect=noise={}dB:d={}",
        config.silence_noise_db, config.silence_min_duration_secs
    );
    let audio_arg = audio.display().to_string();
    let output = run_tool(
        &config.ffmpeg_path,
        &["-i", &audio_arg, "-af", &filter, "-f", "null", "-"],
        config.tool_timeout(),
    )
    .await?;
    parse_silence_log(&output.stderr)
}

fn silence_value_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // e.g. "silence_start: 84.251" or "silence_end: 88.21 | silence_duration: 3.959"
        Regex::new(r"(silence_start|silence_end|silence_duration):\s*(-?\d+(?:\.\d+)?)")
            .unwrap()
    })
}

/// Parse silencedetect's stderr log into intervals. Lines come in pairs: a
/// `silence_start` line, then a `silence_end`/`silence_duration` line.
pub fn parse_silence_log(stderr: &str) -> Result<Vec<SilenceInterval>> {
    let pattern = silence_value_pattern();
    let mut intervals = Vec::new();
    let mut pending_start: Option<i64> = None;

    for line in stderr.lines().filter(|l| l.contains("silencedetect")) {
        let mut start = None;
        let mut end = None;
        let mut duration = None;
        let mut matched = false;
        for capture in pattern.captures_iter(line) {
            matched = true;
            let seconds: f64 = capture[2].parse().map_err(|_| Error::ToolOutput {
                tool: "ffmpeg".into(),
                line: line.to_string(),
            })?;
            let ms = (seconds * 1000.0).round() as i64;
            match &capture[1] {
                "silence_start" => start = Some(ms),
                "silence_end" => end = Some(ms),
                "silence_duration" => duration = Some(ms),
                _ => {}
            }
        }
        if !matched {
            return Err(Error::ToolOutput {
                tool: "ffmpeg".into(),
                line: line.to_string(),
            });
        }

        if let Some(ms) = start {
            pending_start = Some(ms);
        }
        if let (Some(start_ms), Some(end_ms)) = (pending_start, end) {
            intervals.push(SilenceInterval {
                start_ms,
                end_ms,
                duration_ms: duration.unwrap_or(end_ms - start_ms),
            });
            pending_start = None;
        }
    }
    Ok(intervals)
}

/// The interval whose start is nearest to `target_ms`. First match wins ties.
pub fn closest_to(target_ms: i64, silences: &[SilenceInterval]) -> Option<SilenceInterval> {
    let mut best: Option<SilenceInterval> = None;
    for interval in silences {
        let distance = (interval.start_ms - target_ms).abs();
        match best {
            Some(current) if (current.start_ms - target_ms).abs() <= distance => {}
            _ => best = Some(*interval),
        }
    }
    best
}

/// Total duration of `audio` in milliseconds, via ffprobe.
pub async fn probe_duration(config: &Config, audio: &Path) -> Result<i64> {
    let audio_arg = audio.display().to_string();
    let output = run_tool(
        &config.ffprobe_path,
        &[
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            &audio_arg,
        ],
        config.tool_timeout(),
    )
    .await?;
    parse_duration(&output.stdout)
}

fn parse_duration(stdout: &str) -> Result<i64> {
    let line = stdout.trim();
    let seconds: f64 = line.parse().map_err(|_| Error::ToolOutput {
        tool: "ffprobe".into(),
        line: line.to_string(),
    })?;
    Ok((seconds * 1000.0).round() as i64)
}
