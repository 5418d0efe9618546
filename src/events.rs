use serde::Serialize;
use tokio::sync::broadcast;

use crate::store::{Episode, Podcast};

/// Outbound events. Fire-and-forget, at-least-once: every consumer must be
/// idempotent. Ordering across distinct event kinds is not guaranteed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PodcastEvent {
    PodcastCreated { podcast: Podcast },
    PodcastDeleted { podcast: Podcast },
    EpisodeCreated { episode: Episode },
    EpisodeDeleted { episode: Episode },
    EpisodeUpdated { episode: Episode },
    EpisodeCompletion { episode: Episode },
}

/// Broadcast bus for pipeline events. Publishing with no live subscribers is
/// a no-op, not an error.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PodcastEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PodcastEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: PodcastEvent) {
        if log::log_enabled!(log::Level::Debug) {
            match serde_json::to_string(&event) {
                Ok(json) => log::debug!("event: {}", json),
                Err(e) => log::debug!("event (unserializable: {})", e),
            }
        }
        // send only fails when there are no subscribers
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
