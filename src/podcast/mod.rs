
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::assets::{AssetId, AssetStore, MediaNormalizer};
use crate::error::{Error, Result};
use crate::events::{EventBus, PodcastEvent};
use crate::store::{Episode, Podcast, Segment, Store};

/// Direction for single-step segment moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

/// Completeness rule, recomputed from the full current segment set on every
/// evaluation. Deliberately not tracked incrementally: a failed normalization
/// must not strand a stale flag.
pub fn episode_complete(episode: &Episode, segments: &[Segment]) -> bool {
    episode.graphic.written
        && episode.produced_graphic.written
        && !segments.is_empty()
        && segments
            .iter()
            .all(|s| s.audio.written && s.produced_audio.written)
}

/// Cache of podcasts keyed by id and owner, refreshed wholesale on
/// create/delete. Reads go through `get`; nothing evicts implicitly.
#[derive(Default)]
struct PodcastCache {
    by_id: HashMap<i64, Podcast>,
    by_owner: HashMap<i64, Vec<Podcast>>,
}

impl PodcastCache {
    fn get(&self, podcast_id: i64) -> Option<Podcast> {
        self.by_id.get(&podcast_id).cloned()
    }

    fn by_owner(&self, owner_id: i64) -> Vec<Podcast> {
        self.by_owner.get(&owner_id).cloned().unwrap_or_default()
    }

    fn invalidate(&mut self, podcast_id: i64) {
        if let Some(podcast) = self.by_id.remove(&podcast_id) {
            if let Some(list) = self.by_owner.get_mut(&podcast.owner_id) {
                list.retain(|p| p.id != podcast_id);
            }
        }
    }

    fn refresh_all(&mut self, podcasts: Vec<Podcast>) {
        self.by_id.clear();
        self.by_owner.clear();
        for podcast in podcasts {
            self.by_owner
                .entry(podcast.owner_id)
                .or_default()
                .push(podcast.clone());
            self.by_id.insert(podcast.id, podcast);
        }
    }
}

/// Entity lifecycle plus the completeness engine.
///
/// All writes funnel through the store's single connection, so episodes see
/// one writer at a time; the notification worker drives `on_asset_written`
/// from a single consumer loop.
pub struct PodcastService {
    store: Arc<Store>,
    assets: Arc<dyn AssetStore>,
    normalizer: Arc<dyn MediaNormalizer>,
    events: EventBus,
    cache: Mutex<PodcastCache>,
}

impl PodcastService {
    pub fn new(
        store: Arc<Store>,
        assets: Arc<dyn AssetStore>,
        normalizer: Arc<dyn MediaNormalizer>,
        events: EventBus,
    ) -> Result<Self> {
        let service = Self {
            store,
            assets,
            normalizer,
            events,
            cache: Mutex::new(PodcastCache::default()),
        };
        service.refresh_podcast_cache()?;
        Ok(service)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn assets(&self) -> &Arc<dyn AssetStore> {
        &self.assets
    }

    // ── podcasts ────────────────────────────────────────────────────────────

    pub fn create_podcast(&self, owner_id: i64, title: &str) -> Result<Podcast> {
        if title.trim().is_empty() {
            return Err(Error::Precondition("the title has no text".into()));
        }
        let podcast = self.store.create_podcast(owner_id, title)?;
        self.refresh_podcast_cache()?;
        self.events.publish(PodcastEvent::PodcastCreated {
            podcast: podcast.clone(),
        });
        Ok(podcast)
    }

    pub fn podcast(&self, podcast_id: i64) -> Result<Podcast> {
        if let Some(podcast) = self.cache.lock().unwrap().get(podcast_id) {
            return Ok(podcast);
        }
        log::debug!("podcast #{} not in cache, going to the store", podcast_id);
        let podcast = self
            .store
            .get_podcast(podcast_id)?
            .ok_or_else(|| Error::NotFound(format!("podcast {}", podcast_id)))?;
        self.refresh_podcast_cache()?;
        Ok(podcast)
    }

    pub fn podcasts_by_owner(&self, owner_id: i64) -> Vec<Podcast> {
        self.cache.lock().unwrap().by_owner(owner_id)
    }

    pub fn delete_podcast(&self, podcast_id: i64) -> Result<()> {
        let podcast = self.podcast(podcast_id)?;
        for episode in self.store.episodes_by_podcast(podcast_id)? {
            self.delete_episode(episode.id)?;
        }
        self.store.delete_podcast(podcast_id)?;
        self.cache.lock().unwrap().invalidate(podcast_id);
        self.refresh_podcast_cache()?;
        self.events.publish(PodcastEvent::PodcastDeleted { podcast });
        Ok(())
    }

    fn refresh_podcast_cache(&self) -> Result<()> {
        let podcasts = self.store.all_podcasts()?;
        self.cache.lock().unwrap().refresh_all(podcasts);
        Ok(())
    }

    // ── episodes ────────────────────────────────────────────────────────────

    /// Create an episode draft: three empty asset refs up front, then an
    /// initial blank segment so there is always something to record into.
    pub fn create_episode_draft(
        &self,
        podcast_id: i64,
        title: &str,
        description: &str,
    ) -> Result<Episode> {
        if title.trim().is_empty() {
            return Err(Error::Precondition("the title has no text".into()));
        }
        if description.trim().is_empty() {
            return Err(Error::Precondition("the description has no text".into()));
        }
        // fails early if the podcast does not exist
        self.podcast(podcast_id)?;

        let graphic = self
            .store
            .create_asset_ref("graphic", "application/octet-stream")?;
        let produced_graphic = self
            .store
            .create_asset_ref("produced-graphic.jpg", "image/jpeg")?;
        let produced_audio = self
            .store
            .create_asset_ref("produced-audio.mp3", "audio/mpeg")?;

        let episode = self.store.create_episode(
            podcast_id,
            title,
            description,
            graphic.id,
            produced_graphic.id,
            produced_audio.id,
        )?;
        self.events.publish(PodcastEvent::EpisodeCreated {
            episode: episode.clone(),
        });
        self.create_segment(episode.id, "", 0)?;
        self.episode(episode.id)
    }

    pub fn episode(&self, episode_id: i64) -> Result<Episode> {
        self.store
            .get_episode(episode_id)?
            .ok_or_else(|| Error::NotFound(format!("episode {}", episode_id)))
    }

    pub fn episodes_by_podcast(&self, podcast_id: i64) -> Result<Vec<Episode>> {
        Ok(self.store.episodes_by_podcast(podcast_id)?)
    }

    pub fn update_episode_draft(
        &self,
        episode_id: i64,
        title: &str,
        description: &str,
    ) -> Result<Episode> {
        if title.trim().is_empty() {
            return Err(Error::Precondition("the title has no text".into()));
        }
        if description.trim().is_empty() {
            return Err(Error::Precondition("the description has no text".into()));
        }
        self.episode(episode_id)?;
        self.store.update_episode_draft(episode_id, title, description)?;
        let episode = self.episode(episode_id)?;
        self.events.publish(PodcastEvent::EpisodeUpdated {
            episode: episode.clone(),
        });
        Ok(episode)
    }

    /// Cascade: segments first, then every referenced asset, so large
    /// binaries are never orphaned behind a dangling row.
    pub fn delete_episode(&self, episode_id: i64) -> Result<()> {
        let episode = self.episode(episode_id)?;
        let segments = self.store.segments_for_episode(episode_id)?;

        let mut asset_ids: Vec<AssetId> = vec![
            episode.graphic.id,
            episode.produced_graphic.id,
            episode.produced_audio.id,
        ];
        for segment in &segments {
            asset_ids.push(segment.audio.id);
            asset_ids.push(segment.produced_audio.id);
        }

        self.store.delete_episode(episode_id)?;
        for asset_id in asset_ids {
            self.assets.delete(asset_id)?;
            self.store.delete_asset_ref(asset_id)?;
        }
        self.events.publish(PodcastEvent::EpisodeDeleted { episode });
        Ok(())
    }

    // ── segments ────────────────────────────────────────────────────────────

    pub fn create_segment(
        &self,
        episode_id: i64,
        name: &str,
        cross_fade_duration_ms: i64,
    ) -> Result<Segment> {
        self.episode(episode_id)?;
        let audio = self.store.create_asset_ref("audio.mp3", "audio/mpeg")?;
        let produced_audio = self.store.create_asset_ref("produced-audio.mp3", "audio/mpeg")?;
        let segment = self.store.create_segment(
            episode_id,
            name,
            cross_fade_duration_ms,
            audio.id,
            produced_audio.id,
        )?;
        self.renumber_segments(episode_id)?;
        self.refresh_episode_completeness(episode_id)?;
        self.store
            .get_segment(segment.id)?
            .ok_or_else(|| Error::NotFound(format!("segment {}", segment.id)))
    }

    pub fn segments_of(&self, episode_id: i64) -> Result<Vec<Segment>> {
        Ok(self.store.segments_for_episode(episode_id)?)
    }

    pub fn move_segment_up(&self, episode_id: i64, segment_id: i64) -> Result<()> {
        self.move_segment(episode_id, segment_id, MoveDirection::Up)
    }

    pub fn move_segment_down(&self, episode_id: i64, segment_id: i64) -> Result<()> {
        self.move_segment(episode_id, segment_id, MoveDirection::Down)
    }

    /// Move one segment a single position. A boundary move is a logged
    /// no-op. Every successful move renumbers the whole list densely from 1,
    /// healing gaps left by earlier deletes.
    fn move_segment(&self, episode_id: i64, segment_id: i64, direction: MoveDirection) -> Result<()> {
        let mut segments = self.store.segments_for_episode(episode_id)?;
        let Some(position) = segments.iter().position(|s| s.id == segment_id) else {
            return Err(Error::NotFound(format!(
                "segment {} in episode {}",
                segment_id, episode_id
            )));
        };
        let delta: i64 = match direction {
            MoveDirection::Up => -1,
            MoveDirection::Down => 1,
        };
        let new_position = position as i64 + delta;
        if new_position < 0 || new_position > segments.len() as i64 - 1 {
            log::debug!(
                "segment {} cannot move {:?} from position {} of {}",
                segment_id,
                direction,
                position,
                segments.len()
            );
            return Ok(());
        }
        let segment = segments.remove(position);
        segments.insert(new_position as usize, segment);
        self.write_sequence(&segments)
    }

    fn renumber_segments(&self, episode_id: i64) -> Result<()> {
        let segments = self.store.segments_for_episode(episode_id)?;
        self.write_sequence(&segments)
    }

    fn write_sequence(&self, segments: &[Segment]) -> Result<()> {
        for (index, segment) in segments.iter().enumerate() {
            self.store
                .set_segment_sequence(segment.id, index as i32 + 1)?;
        }
        Ok(())
    }

    pub fn delete_segment(&self, segment_id: i64) -> Result<()> {
        let segment = self
            .store
            .get_segment(segment_id)?
            .ok_or_else(|| Error::NotFound(format!("segment {}", segment_id)))?;
        self.store.delete_segment(segment_id)?;
        for asset_id in [segment.audio.id, segment.produced_audio.id] {
            self.assets.delete(asset_id)?;
            self.store.delete_asset_ref(asset_id)?;
        }
        self.renumber_segments(segment.episode_id)?;
        self.refresh_episode_completeness(segment.episode_id)?;
        Ok(())
    }

    pub fn set_segment_transcript(
        &self,
        segment_id: i64,
        transcribable: bool,
        transcript: &str,
    ) -> Result<()> {
        self.store
            .get_segment(segment_id)?
            .ok_or_else(|| Error::NotFound(format!("segment {}", segment_id)))?;
        Ok(self
            .store
            .set_segment_transcript(segment_id, transcribable, transcript)?)
    }

    // ── completeness engine ─────────────────────────────────────────────────

    /// React to an asset-write notification.
    ///
    /// Unknown asset ids are ignored — the store is shared with unrelated
    /// subsystems. On a match the raw asset is normalized into its produced
    /// counterpart; normalization failure is logged and dropped, but
    /// completeness is still recomputed so state never freezes on a bad run.
    pub fn on_asset_written(&self, asset_id: AssetId) -> Result<()> {
        let observed = self.assets.len(asset_id)?;
        self.store.refresh_asset_ref(asset_id, observed)?;

        let Some(episode_id) = self.store.episode_for_asset(asset_id)? else {
            log::debug!("asset {} does not belong to any episode, ignoring", asset_id);
            return Ok(());
        };

        let episode = self.episode(episode_id)?;
        let segments = self.store.segments_for_episode(episode_id)?;

        if episode.graphic.id == asset_id {
            self.normalize_into(&episode.graphic, &episode.produced_graphic);
        } else if let Some(segment) = segments.iter().find(|s| s.audio.id == asset_id) {
            self.normalize_into(&segment.audio, &segment.produced_audio);
            self.store
                .touch_produced_audio_assets_updated(episode_id, Utc::now())?;
        }

        self.refresh_episode_completeness(episode_id)
    }

    fn normalize_into(&self, source: &crate::assets::AssetRef, target: &crate::assets::AssetRef) {
        match self.normalizer.normalize(source, target) {
            Ok(()) => {
                // pick up the written/size state the normalizer left behind
                match self.assets.len(target.id) {
                    Ok(observed) => {
                        if let Err(e) = self.store.refresh_asset_ref(target.id, observed) {
                            log::error!("could not refresh asset {} after normalization: {}", target.id, e);
                        }
                    }
                    Err(e) => log::error!("could not stat asset {}: {}", target.id, e),
                }
            }
            Err(e) => {
                log::error!(
                    "normalization of asset {} into {} failed: {}",
                    source.id,
                    target.id,
                    e
                );
            }
        }
    }

    /// Recompute and persist the completeness flag, then emit both the
    /// "updated" and "completion" events — always, even when the flag did
    /// not flip. Consumers de-duplicate.
    pub fn refresh_episode_completeness(&self, episode_id: i64) -> Result<()> {
        let episode = self.episode(episode_id)?;
        let segments = self.store.segments_for_episode(episode_id)?;
        let complete = episode_complete(&episode, &segments);
        self.store.set_episode_complete(episode_id, complete)?;

        let episode = self.episode(episode_id)?;
        self.events.publish(PodcastEvent::EpisodeUpdated {
            episode: episode.clone(),
        });
        self.events.publish(PodcastEvent::EpisodeCompletion { episode });
        Ok(())
    }

    /// Record that the final mix landed in the episode's produced-audio
    /// asset: refresh the ref and stamp the audit timestamp.
    pub fn write_episode_produced_audio(&self, episode_id: i64, asset_id: AssetId) -> Result<Episode> {
        let observed = self.assets.len(asset_id)?;
        self.store.refresh_asset_ref(asset_id, observed)?;
        self.store
            .touch_produced_audio_updated(episode_id, Utc::now())?;
        log::debug!("episode {} produced audio updated", episode_id);
        self.episode(episode_id)
    }
}
