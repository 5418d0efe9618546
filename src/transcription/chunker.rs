use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::media::silence::{self, SilenceInterval};
use crate::media::{millis_to_timecode, run_tool};

/// One transcribable slice of a larger audio file.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub order: usize,
    pub start_ms: i64,
    pub end_ms: i64,
    pub path: PathBuf,
}

/// Split `audio` into chunks no larger than the configured byte budget,
/// cutting at detected silences so no word is split mid-chunk.
///
/// Files strictly under the budget come back as a single chunk pointing at
/// the original file. Everything else is trimmed into `workspace`.
pub async fn split(config: &Config, audio: &Path, workspace: &Path) -> Result<Vec<Chunk>> {
    let size_bytes = std::fs::metadata(audio)?.len();
    let duration_ms = silence::probe_duration(config, audio).await?;

    if size_bytes < config.max_chunk_bytes {
        return Ok(vec![Chunk {
            order: 0,
            start_ms: 0,
            end_ms: duration_ms,
            path: audio.to_path_buf(),
        }]);
    }

    let silences = silence::detect(config, audio).await?;
    let windows = plan_windows(size_bytes, config.max_chunk_bytes, duration_ms, &silences)?;
    log::debug!(
        "splitting {} ({} bytes, {}ms) into {} chunks",
        audio.display(),
        size_bytes,
        duration_ms,
        windows.len()
    );

    let extension = audio
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp3".into());
    let mut chunks = Vec::with_capacity(windows.len());
    for (order, (start_ms, end_ms)) in windows.into_iter().enumerate() {
        let path = workspace.join(chunk_file_name(order, &extension));
        trim(config, audio, start_ms, end_ms, &path).await?;
        chunks.push(Chunk {
            order,
            start_ms,
            end_ms,
            path,
        });
    }
    Ok(chunks)
}

/// Plan chunk windows over `[0, duration_ms]`.
///
/// The file is divided into `ceil(size / budget)` parts at evenly spaced
/// targets; each interior boundary is moved to the start of the nearest
/// detected silence. The first window always starts at 0 and the last always
/// ends at the full duration.
pub fn plan_windows(
    size_bytes: u64,
    max_chunk_bytes: u64,
    duration_ms: i64,
    silences: &[SilenceInterval],
) -> Result<Vec<(i64, i64)>> {
    let parts = ((size_bytes + max_chunk_bytes - 1) / max_chunk_bytes) as i64;
    if parts <= 1 {
        return Ok(vec![(0, duration_ms)]);
    }
    if silences.is_empty() {
        return Err(Error::Transcription(format!(
            "file needs {} chunks but contains no detectable silence",
            parts
        )));
    }

    let mut boundaries = Vec::with_capacity(parts as usize + 1);
    for i in 0..=parts {
        let boundary = if i == 0 {
            0
        } else if i == parts {
            duration_ms
        } else {
            let target = i * duration_ms / parts;
            match silence::closest_to(target, silences) {
                Some(interval) => interval.start_ms,
                None => target,
            }
        };
        boundaries.push(boundary);
    }

    Ok(boundaries.windows(2).map(|pair| (pair[0], pair[1])).collect())
}

/// Zero-padded file name so chunks sort lexically in dispatch order.
pub fn chunk_file_name(order: usize, extension: &str) -> String {
    format!("{:010}.{}", order, extension)
}

async fn trim(
    config: &Config,
    audio: &Path,
    start_ms: i64,
    end_ms: i64,
    output: &Path,
) -> Result<()> {
    let audio_arg = audio.display().to_string();
    let output_arg = output.display().to_string();
    let start = millis_to_timecode(start_ms);
    let end = millis_to_timecode(end_ms);
    run_tool(
        &config.ffmpeg_path,
        &[
            "-i", &audio_arg, "-ss", &start, "-to", &end, "-c", "copy", "-y", &output_arg,
        ],
        config.tool_timeout(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn silence_at(start_ms: i64) -> SilenceInterval {
        SilenceInterval {
            start_ms,
            end_ms: start_ms + 600,
            duration_ms: 600,
        }
    }

    #[test]
    fn windows_snap_to_silence_starts() {
        let silences = vec![silence_at(8_000), silence_at(17_000)];
        let windows = plan_windows(25 * MIB, 10 * MIB, 20_000, &silences).unwrap();
        assert_eq!(windows, vec![(0, 8_000), (8_000, 17_000), (17_000, 20_000)]);
    }

    #[test]
    fn part_count_rounds_up() {
        let silences = vec![silence_at(5_000)];
        // exactly at the budget is two parts (the strict single-chunk case is
        // decided by `split` before planning)
        let windows = plan_windows(10 * MIB, 10 * MIB, 10_000, &silences).unwrap();
        assert_eq!(windows.len(), 1);
        let windows = plan_windows(10 * MIB + 1, 10 * MIB, 10_000, &silences).unwrap();
        assert_eq!(windows.len(), 2);
    }

    #[test]
    fn first_and_last_edges_are_exact() {
        let silences = vec![silence_at(3_000), silence_at(6_100), silence_at(9_500)];
        let windows = plan_windows(40 * MIB, 10 * MIB, 12_000, &silences).unwrap();
        assert_eq!(windows.first().unwrap().0, 0);
        assert_eq!(windows.last().unwrap().1, 12_000);
        assert_eq!(windows.len(), 4);
    }

    #[test]
    fn multipart_plan_without_silences_is_an_error() {
        let result = plan_windows(25 * MIB, 10 * MIB, 20_000, &[]);
        assert!(matches!(result, Err(Error::Transcription(_))));
    }

    #[test]
    fn chunk_names_sort_lexically() {
        assert_eq!(chunk_file_name(0, "mp3"), "0000000000.mp3");
        assert_eq!(chunk_file_name(12, "mp3"), "0000000012.mp3");
        assert!(chunk_file_name(2, "mp3") < chunk_file_name(10, "mp3"));
    }
}
