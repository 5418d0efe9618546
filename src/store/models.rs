use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assets::AssetRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Podcast {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub created: DateTime<Utc>,
}

/// One episode of a podcast. `complete` is derived — see
/// `podcast::episode_complete` — and persisted so queries stay cheap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub podcast_id: i64,
    pub title: String,
    pub description: String,
    pub graphic: AssetRef,
    pub produced_graphic: AssetRef,
    pub produced_audio: AssetRef,
    pub complete: bool,
    pub created: DateTime<Utc>,
    /// Stamped when the final mix is written into `produced_audio`.
    pub produced_audio_updated: Option<DateTime<Utc>>,
    /// Stamped when any segment's audio is (re)normalized.
    pub produced_audio_assets_updated: Option<DateTime<Utc>>,
}

/// One ordered audio piece of an episode's final mix. `sequence_number` is
/// 1-based and kept dense by every reorder/delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: i64,
    pub episode_id: i64,
    pub name: String,
    pub sequence_number: i32,
    pub cross_fade_duration_ms: i64,
    pub audio: AssetRef,
    pub produced_audio: AssetRef,
    pub transcribable: bool,
    pub transcript: Option<String>,
}

impl Segment {
    /// True when this segment still needs a transcript.
    pub fn needs_transcript(&self) -> bool {
        self.transcribable
            && self
                .transcript
                .as_deref()
                .map(|t| t.trim().is_empty())
                .unwrap_or(true)
    }
}
