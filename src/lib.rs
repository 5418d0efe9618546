//! Podcast episode assembly, production, and transcription pipeline.
//!
//! Episodes are built from ordered segments whose raw assets arrive out of
//! band; asset-write notifications drive normalization and a derived
//! completeness flag. Complete episodes can be produced (segments concatenated
//! into one file via ffmpeg) and transcribed (silence-aware chunking, parallel
//! dispatch to a speech-to-text backend, ordered reassembly).

pub mod assets;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod podcast;
pub mod store;
pub mod transcription;
pub mod worker;

pub use assets::{AssetId, AssetRef, AssetStore, LocalAssetStore, MediaNormalizer};
pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventBus, PodcastEvent};
pub use media::producer::AudioProducer;
pub use podcast::PodcastService;
pub use store::{Episode, Podcast, Segment, Store};
pub use transcription::{TranscriptionBackend, Transcriber};
