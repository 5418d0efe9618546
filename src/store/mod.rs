pub mod models;

#[cfg(test)]
mod tests;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::assets::{AssetId, AssetRef};

pub use models::*;

/// Entity persistence for podcasts, episodes, segments, and asset refs.
///
/// A single mutex around the connection serializes all writes, which is also
/// what gives the completeness engine its single-writer-per-episode
/// discipline: nothing mutates an episode's rows concurrently.
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
        ",
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS asset_ref (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                content_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                written INTEGER NOT NULL DEFAULT 0,
                created TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS podcast (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                created TEXT NOT NULL,
                UNIQUE(owner_id, title)
            );

            CREATE TABLE IF NOT EXISTS podcast_episode (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                podcast_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                graphic INTEGER NOT NULL,
                produced_graphic INTEGER NOT NULL,
                produced_audio INTEGER NOT NULL,
                complete INTEGER NOT NULL DEFAULT 0,
                created TEXT NOT NULL,
                produced_audio_updated TEXT,
                produced_audio_assets_updated TEXT,
                FOREIGN KEY (podcast_id) REFERENCES podcast(id),
                FOREIGN KEY (graphic) REFERENCES asset_ref(id),
                FOREIGN KEY (produced_graphic) REFERENCES asset_ref(id),
                FOREIGN KEY (produced_audio) REFERENCES asset_ref(id)
            );

            CREATE INDEX IF NOT EXISTS idx_episode_podcast
                ON podcast_episode(podcast_id);

            CREATE TABLE IF NOT EXISTS podcast_episode_segment (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                podcast_episode_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                sequence_number INTEGER NOT NULL,
                cross_fade_duration_ms INTEGER NOT NULL DEFAULT 0,
                segment_audio INTEGER NOT NULL,
                produced_segment_audio INTEGER NOT NULL,
                transcribable INTEGER NOT NULL DEFAULT 1,
                transcript TEXT,
                FOREIGN KEY (podcast_episode_id) REFERENCES podcast_episode(id),
                FOREIGN KEY (segment_audio) REFERENCES asset_ref(id),
                FOREIGN KEY (produced_segment_audio) REFERENCES asset_ref(id)
            );

            CREATE INDEX IF NOT EXISTS idx_segment_episode
                ON podcast_episode_segment(podcast_episode_id, sequence_number);
        "#,
        )?;
        Ok(())
    }

    // ── asset refs ──────────────────────────────────────────────────────────

    pub fn create_asset_ref(&self, filename: &str, content_type: &str) -> Result<AssetRef> {
        let conn = self.conn.lock().unwrap();
        let created = Utc::now();
        conn.execute(
            "INSERT INTO asset_ref (filename, content_type, created) VALUES (?1, ?2, ?3)",
            params![filename, content_type, created.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_asset_ref(id)?
            .ok_or_else(|| anyhow::anyhow!("asset ref {} vanished after insert", id))
    }

    pub fn get_asset_ref(&self, asset_id: AssetId) -> Result<Option<AssetRef>> {
        let conn = self.conn.lock().unwrap();
        Ok(asset_ref_by_id(&conn, asset_id)?)
    }

    /// Record the observed size/written state of an asset after an
    /// out-of-band write. Returns the refreshed ref, or `None` for an id this
    /// store has never heard of.
    pub fn refresh_asset_ref(&self, asset_id: AssetId, size: Option<u64>) -> Result<Option<AssetRef>> {
        let conn = self.conn.lock().unwrap();
        let written = size.is_some();
        let size_bytes = size.unwrap_or(0) as i64;
        let updated = conn.execute(
            "UPDATE asset_ref SET written = ?1, size_bytes = ?2 WHERE id = ?3",
            params![written, size_bytes, asset_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        Ok(asset_ref_by_id(&conn, asset_id)?)
    }

    pub fn delete_asset_ref(&self, asset_id: AssetId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM asset_ref WHERE id = ?1", params![asset_id])?;
        Ok(())
    }

    // ── podcasts ────────────────────────────────────────────────────────────

    pub fn create_podcast(&self, owner_id: i64, title: &str) -> Result<Podcast> {
        let conn = self.conn.lock().unwrap();
        let created = Utc::now();
        conn.execute(
            "INSERT INTO podcast (owner_id, title, created) VALUES (?1, ?2, ?3)
             ON CONFLICT(owner_id, title) DO UPDATE SET title = excluded.title",
            params![owner_id, title, created.to_rfc3339()],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM podcast WHERE owner_id = ?1 AND title = ?2",
            params![owner_id, title],
            |row| row.get(0),
        )?;
        podcast_by_id(&conn, id)?.ok_or_else(|| anyhow::anyhow!("podcast {} vanished", id))
    }

    pub fn get_podcast(&self, podcast_id: i64) -> Result<Option<Podcast>> {
        let conn = self.conn.lock().unwrap();
        podcast_by_id(&conn, podcast_id)
    }

    pub fn all_podcasts(&self) -> Result<Vec<Podcast>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM podcast ORDER BY created")?;
        let podcasts = stmt
            .query_map([], podcast_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(podcasts)
    }

    pub fn delete_podcast(&self, podcast_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM podcast WHERE id = ?1", params![podcast_id])?;
        Ok(())
    }

    // ── episodes ────────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn create_episode(
        &self,
        podcast_id: i64,
        title: &str,
        description: &str,
        graphic: AssetId,
        produced_graphic: AssetId,
        produced_audio: AssetId,
    ) -> Result<Episode> {
        let conn = self.conn.lock().unwrap();
        let created = Utc::now();
        conn.execute(
            "INSERT INTO podcast_episode
                (podcast_id, title, description, graphic, produced_graphic, produced_audio, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                podcast_id,
                title,
                description,
                graphic,
                produced_graphic,
                produced_audio,
                created.to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        episode_by_id(&conn, id)?.ok_or_else(|| anyhow::anyhow!("episode {} vanished", id))
    }

    pub fn get_episode(&self, episode_id: i64) -> Result<Option<Episode>> {
        let conn = self.conn.lock().unwrap();
        episode_by_id(&conn, episode_id)
    }

    pub fn episodes_by_podcast(&self, podcast_id: i64) -> Result<Vec<Episode>> {
        let conn = self.conn.lock().unwrap();
        let ids: Vec<i64> = {
            let mut stmt = conn
                .prepare("SELECT id FROM podcast_episode WHERE podcast_id = ?1 ORDER BY created")?;
            let ids = stmt
                .query_map(params![podcast_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };
        let mut episodes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(e) = episode_by_id(&conn, id)? {
                episodes.push(e);
            }
        }
        Ok(episodes)
    }

    pub fn update_episode_draft(&self, episode_id: i64, title: &str, description: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE podcast_episode SET title = ?1, description = ?2 WHERE id = ?3",
            params![title, description, episode_id],
        )?;
        Ok(())
    }

    pub fn set_episode_complete(&self, episode_id: i64, complete: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE podcast_episode SET complete = ?1 WHERE id = ?2",
            params![complete, episode_id],
        )?;
        Ok(())
    }

    pub fn touch_produced_audio_updated(&self, episode_id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE podcast_episode SET produced_audio_updated = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), episode_id],
        )?;
        Ok(())
    }

    pub fn touch_produced_audio_assets_updated(
        &self,
        episode_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE podcast_episode SET produced_audio_assets_updated = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), episode_id],
        )?;
        Ok(())
    }

    pub fn delete_episode(&self, episode_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM podcast_episode_segment WHERE podcast_episode_id = ?1",
            params![episode_id],
        )?;
        conn.execute("DELETE FROM podcast_episode WHERE id = ?1", params![episode_id])?;
        Ok(())
    }

    /// Resolve the episode that owns an asset, looking at episode graphics
    /// and raw segment audio — the two asset slots that external writers
    /// touch. Produced assets are written by this pipeline itself and do not
    /// participate in notification resolution.
    pub fn episode_for_asset(&self, asset_id: AssetId) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT pes.podcast_episode_id AS id
                   FROM podcast_episode_segment pes
                  WHERE pes.segment_audio = ?1
                  UNION
                 SELECT pe.id AS id
                   FROM podcast_episode pe
                  WHERE pe.graphic = ?1",
                params![asset_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(id)
    }

    // ── segments ────────────────────────────────────────────────────────────

    pub fn create_segment(
        &self,
        episode_id: i64,
        name: &str,
        cross_fade_duration_ms: i64,
        audio: AssetId,
        produced_audio: AssetId,
    ) -> Result<Segment> {
        let conn = self.conn.lock().unwrap();
        let max_seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_number), 0)
               FROM podcast_episode_segment WHERE podcast_episode_id = ?1",
            params![episode_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO podcast_episode_segment
                (podcast_episode_id, name, sequence_number, cross_fade_duration_ms,
                 segment_audio, produced_segment_audio)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![episode_id, name, max_seq + 1, cross_fade_duration_ms, audio, produced_audio],
        )?;
        let id = conn.last_insert_rowid();
        segment_by_id(&conn, id)?.ok_or_else(|| anyhow::anyhow!("segment {} vanished", id))
    }

    pub fn get_segment(&self, segment_id: i64) -> Result<Option<Segment>> {
        let conn = self.conn.lock().unwrap();
        segment_by_id(&conn, segment_id)
    }

    /// Segments in playback order: `sequence_number` ascending, ties broken
    /// by id so the order is total.
    pub fn segments_for_episode(&self, episode_id: i64) -> Result<Vec<Segment>> {
        let conn = self.conn.lock().unwrap();
        let ids: Vec<i64> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM podcast_episode_segment
                  WHERE podcast_episode_id = ?1
                  ORDER BY sequence_number ASC, id ASC",
            )?;
            let ids = stmt
                .query_map(params![episode_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };
        let mut segments = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(s) = segment_by_id(&conn, id)? {
                segments.push(s);
            }
        }
        Ok(segments)
    }

    pub fn set_segment_sequence(&self, segment_id: i64, sequence_number: i32) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE podcast_episode_segment SET sequence_number = ?1 WHERE id = ?2",
            params![sequence_number, segment_id],
        )?;
        Ok(())
    }

    pub fn set_segment_transcript(
        &self,
        segment_id: i64,
        transcribable: bool,
        transcript: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE podcast_episode_segment SET transcribable = ?1, transcript = ?2 WHERE id = ?3",
            params![transcribable, transcript, segment_id],
        )?;
        Ok(())
    }

    pub fn delete_segment(&self, segment_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM podcast_episode_segment WHERE id = ?1",
            params![segment_id],
        )?;
        Ok(())
    }
}

// ── row mapping ─────────────────────────────────────────────────────────────

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn asset_ref_by_id(conn: &Connection, asset_id: AssetId) -> rusqlite::Result<Option<AssetRef>> {
    conn.query_row(
        "SELECT id, filename, content_type, size_bytes, written, created
           FROM asset_ref WHERE id = ?1",
        params![asset_id],
        |row| {
            Ok(AssetRef {
                id: row.get(0)?,
                filename: row.get(1)?,
                content_type: row.get(2)?,
                size_bytes: row.get(3)?,
                written: row.get(4)?,
                created: parse_timestamp(row.get(5)?),
            })
        },
    )
    .optional()
}

fn required_asset_ref(conn: &Connection, asset_id: AssetId) -> Result<AssetRef> {
    asset_ref_by_id(conn, asset_id)?
        .ok_or_else(|| anyhow::anyhow!("dangling asset ref {}", asset_id))
}

fn podcast_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Podcast> {
    Ok(Podcast {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        title: row.get("title")?,
        created: parse_timestamp(row.get("created")?),
    })
}

fn podcast_by_id(conn: &Connection, podcast_id: i64) -> Result<Option<Podcast>> {
    Ok(conn
        .query_row(
            "SELECT * FROM podcast WHERE id = ?1",
            params![podcast_id],
            podcast_from_row,
        )
        .optional()?)
}

fn episode_by_id(conn: &Connection, episode_id: i64) -> Result<Option<Episode>> {
    struct Row {
        id: i64,
        podcast_id: i64,
        title: String,
        description: String,
        graphic: i64,
        produced_graphic: i64,
        produced_audio: i64,
        complete: bool,
        created: String,
        produced_audio_updated: Option<String>,
        produced_audio_assets_updated: Option<String>,
    }

    let row = conn
        .query_row(
            "SELECT * FROM podcast_episode WHERE id = ?1",
            params![episode_id],
            |row| {
                Ok(Row {
                    id: row.get("id")?,
                    podcast_id: row.get("podcast_id")?,
                    title: row.get("title")?,
                    description: row.get("description")?,
                    graphic: row.get("graphic")?,
                    produced_graphic: row.get("produced_graphic")?,
                    produced_audio: row.get("produced_audio")?,
                    complete: row.get("complete")?,
                    created: row.get("created")?,
                    produced_audio_updated: row.get("produced_audio_updated")?,
                    produced_audio_assets_updated: row.get("produced_audio_assets_updated")?,
                })
            },
        )
        .optional()?;

    let Some(row) = row else { return Ok(None) };

    Ok(Some(Episode {
        id: row.id,
        podcast_id: row.podcast_id,
        title: row.title,
        description: row.description,
        graphic: required_asset_ref(conn, row.graphic)?,
        produced_graphic: required_asset_ref(conn, row.produced_graphic)?,
        produced_audio: required_asset_ref(conn, row.produced_audio)?,
        complete: row.complete,
        created: parse_timestamp(row.created),
        produced_audio_updated: row.produced_audio_updated.map(parse_timestamp),
        produced_audio_assets_updated: row.produced_audio_assets_updated.map(parse_timestamp),
    }))
}

fn segment_by_id(conn: &Connection, segment_id: i64) -> Result<Option<Segment>> {
    struct Row {
        id: i64,
        episode_id: i64,
        name: String,
        sequence_number: i32,
        cross_fade_duration_ms: i64,
        audio: i64,
        produced_audio: i64,
        transcribable: bool,
        transcript: Option<String>,
    }

    let row = conn
        .query_row(
            "SELECT * FROM podcast_episode_segment WHERE id = ?1",
            params![segment_id],
            |row| {
                Ok(Row {
                    id: row.get("id")?,
                    episode_id: row.get("podcast_episode_id")?,
                    name: row.get("name")?,
                    sequence_number: row.get("sequence_number")?,
                    cross_fade_duration_ms: row.get("cross_fade_duration_ms")?,
                    audio: row.get("segment_audio")?,
                    produced_audio: row.get("produced_segment_audio")?,
                    transcribable: row.get("transcribable")?,
                    transcript: row.get("transcript")?,
                })
            },
        )
        .optional()?;

    let Some(row) = row else { return Ok(None) };

    Ok(Some(Segment {
        id: row.id,
        episode_id: row.episode_id,
        name: row.name,
        sequence_number: row.sequence_number,
        cross_fade_duration_ms: row.cross_fade_duration_ms,
        audio: required_asset_ref(conn, row.audio)?,
        produced_audio: required_asset_ref(conn, row.produced_audio)?,
        transcribable: row.transcribable,
        transcript: row.transcript,
    }))
}
