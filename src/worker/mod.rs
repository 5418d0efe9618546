use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::assets::AssetId;
use crate::error::Result;
use crate::events::PodcastEvent;
use crate::podcast::PodcastService;
use crate::transcription::Transcriber;

/// Notification that an asset's bytes landed in the asset store.
#[derive(Debug, Clone, Copy)]
pub struct AssetWritten {
    pub asset_id: AssetId,
}

/// Single consumer for asset-write notifications. One loop means one writer
/// driving the completeness engine per process; back-pressure lives in the
/// channel. Runs until the channel closes or `cancel` fires.
pub async fn asset_event_task(
    service: Arc<PodcastService>,
    mut rx: mpsc::Receiver<AssetWritten>,
    cancel: CancellationToken,
) {
    log::info!("asset event worker started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("asset event worker cancelled");
                break;
            }
            message = rx.recv() => {
                let Some(AssetWritten { asset_id }) = message else {
                    log::info!("asset event channel closed");
                    break;
                };
                let service = service.clone();
                match task::spawn_blocking(move || service.on_asset_written(asset_id)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => log::error!("asset {} notification failed: {}", asset_id, e),
                    Err(e) => log::error!("asset {} notification panicked: {}", asset_id, e),
                }
            }
        }
    }
}

/// Kick off transcription whenever an episode reports complete.
///
/// Completion events are at-least-once; `needs_transcript` makes the reaction
/// idempotent. A lagged receiver just drops stale events and keeps going.
pub async fn completion_transcription_task(
    service: Arc<PodcastService>,
    transcriber: Arc<Transcriber>,
    mut events: broadcast::Receiver<PodcastEvent>,
    cancel: CancellationToken,
) {
    log::info!("transcription worker started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("transcription worker cancelled");
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(PodcastEvent::EpisodeCompletion { episode }) if episode.complete => {
                        if let Err(e) =
                            transcribe_episode(&service, &transcriber, episode.id).await
                        {
                            log::error!("transcription of episode {} failed: {}", episode.id, e);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("transcription worker lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        log::info!("event bus closed");
                        break;
                    }
                }
            }
        }
    }
}

/// Transcribe every segment of `episode_id` that still needs it. Per-segment
/// failures are logged and skipped so one bad segment never blocks the rest.
async fn transcribe_episode(
    service: &Arc<PodcastService>,
    transcriber: &Arc<Transcriber>,
    episode_id: i64,
) -> Result<()> {
    // fresh read: the completion event may be stale by now
    let segments = service.segments_of(episode_id)?;
    let pending: Vec<_> = segments.iter().filter(|s| s.needs_transcript()).collect();
    if pending.is_empty() {
        return Ok(());
    }
    log::info!(
        "episode {}: transcribing {} of {} segments",
        episode_id,
        pending.len(),
        segments.len()
    );

    let workspace = TempDir::new()?;
    for segment in pending {
        let result = async {
            let bytes = service.assets().read(segment.produced_audio.id)?;
            let path = workspace
                .path()
                .join(format!("segment-{}.mp3", segment.id));
            std::fs::write(&path, bytes)?;
            let transcript = transcriber.transcribe_file(&path).await?;
            service.set_segment_transcript(segment.id, true, &transcript)
        }
        .await;
        if let Err(e) = result {
            log::error!(
                "could not transcribe segment {} of episode {}: {}",
                segment.id,
                episode_id,
                e
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetRef, AssetStore, MediaNormalizer};
    use crate::events::EventBus;
    use crate::store::Store;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryAssets {
        blobs: Mutex<HashMap<i64, Vec<u8>>>,
    }

    impl AssetStore for MemoryAssets {
        fn write(&self, id: i64, _: &str, _: &str, bytes: &[u8]) -> Result<()> {
            self.blobs.lock().unwrap().insert(id, bytes.to_vec());
            Ok(())
        }
        fn read(&self, id: i64) -> Result<Vec<u8>> {
            self.blobs
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| crate::error::Error::NotFound(format!("asset {}", id)))
        }
        fn delete(&self, id: i64) -> Result<()> {
            self.blobs.lock().unwrap().remove(&id);
            Ok(())
        }
        fn len(&self, id: i64) -> Result<Option<u64>> {
            Ok(self.blobs.lock().unwrap().get(&id).map(|b| b.len() as u64))
        }
    }

    struct CopyNormalizer {
        assets: Arc<MemoryAssets>,
    }

    impl MediaNormalizer for CopyNormalizer {
        fn normalize(&self, source: &AssetRef, target: &AssetRef) -> Result<()> {
            let bytes = self.assets.read(source.id)?;
            self.assets
                .write(target.id, &target.filename, &target.content_type, &bytes)
        }
    }

    fn service() -> (Arc<PodcastService>, Arc<MemoryAssets>) {
        let store = Arc::new(Store::in_memory().unwrap());
        let assets = Arc::new(MemoryAssets::default());
        let normalizer = Arc::new(CopyNormalizer {
            assets: assets.clone(),
        });
        let service = Arc::new(
            PodcastService::new(store, assets.clone(), normalizer, EventBus::new(64)).unwrap(),
        );
        (service, assets)
    }

    #[tokio::test]
    async fn asset_events_drive_the_completeness_engine() {
        let (service, assets) = service();
        let podcast = service.create_podcast(1, "Show").unwrap();
        let episode = service
            .create_episode_draft(podcast.id, "Ep", "desc")
            .unwrap();
        let segment = service.segments_of(episode.id).unwrap().remove(0);

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(asset_event_task(service.clone(), rx, cancel.clone()));

        assets
            .write(segment.audio.id, "audio.mp3", "audio/mpeg", b"raw audio")
            .unwrap();
        tx.send(AssetWritten {
            asset_id: segment.audio.id,
        })
        .await
        .unwrap();

        // closing the channel drains in-flight work and stops the loop
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();

        let segment = service.segments_of(episode.id).unwrap().remove(0);
        assert!(segment.audio.written);
        assert!(segment.produced_audio.written);
        cancel.cancel();
    }

    #[tokio::test]
    async fn cancellation_stops_the_asset_worker() {
        let (service, _) = service();
        let (_tx, rx) = mpsc::channel::<AssetWritten>(1);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(asset_event_task(service, rx, cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
    }
}
