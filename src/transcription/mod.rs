pub mod chunker;

use std::path::Path;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tempfile::TempDir;
use tokio::task;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::transcription::chunker::Chunk;

/// Speech-to-text collaborator. Implementations are expected to block; the
/// transcriber calls them from blocking worker threads.
pub trait TranscriptionBackend: Send + Sync + 'static {
    fn transcribe(&self, audio: &[u8]) -> Result<String>;
}

/// Chunk-and-dispatch transcription front end.
///
/// Large files are split at silences, chunks run on the backend concurrently
/// up to the host's parallelism, and the transcripts are rejoined in chunk
/// order. Any chunk failure fails the whole file.
pub struct Transcriber {
    config: Config,
    backend: Arc<dyn TranscriptionBackend>,
}

impl Transcriber {
    pub fn new(config: Config, backend: Arc<dyn TranscriptionBackend>) -> Self {
        Self { config, backend }
    }

    pub async fn transcribe_file(&self, audio: &Path) -> Result<String> {
        let scratch_root = self.config.scratch_root();
        std::fs::create_dir_all(&scratch_root)?;
        let workspace = TempDir::new_in(&scratch_root)?;

        let chunks = chunker::split(&self.config, audio, workspace.path()).await?;
        log::info!(
            "transcribing {} as {} chunk(s)",
            audio.display(),
            chunks.len()
        );
        // workspace must outlive dispatch; the chunks point into it
        let transcript = self.transcribe_chunks(chunks).await?;
        drop(workspace);
        Ok(transcript)
    }

    /// Dispatch chunks to the backend, bounded by available parallelism.
    /// `buffered` keeps completion order equal to chunk order.
    pub async fn transcribe_chunks(&self, chunks: Vec<Chunk>) -> Result<String> {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);

        let transcripts: Vec<String> = stream::iter(chunks)
            .map(|chunk| {
                let backend = self.backend.clone();
                async move {
                    task::spawn_blocking(move || {
                        let bytes = std::fs::read(&chunk.path)?;
                        log::debug!(
                            "transcribing chunk {} ({}..{}ms, {} bytes)",
                            chunk.order,
                            chunk.start_ms,
                            chunk.end_ms,
                            bytes.len()
                        );
                        backend.transcribe(&bytes)
                    })
                    .await
                    .map_err(|e| Error::Transcription(format!("chunk worker panicked: {}", e)))?
                }
            })
            .buffered(parallelism)
            .try_collect()
            .await?;

        Ok(transcripts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Uppercases the chunk bytes; sleeps longer for earlier chunks so any
    /// ordering bug would surface as a scrambled transcript.
    struct SlowFirstBackend;

    impl TranscriptionBackend for SlowFirstBackend {
        fn transcribe(&self, audio: &[u8]) -> Result<String> {
            let text = String::from_utf8_lossy(audio).into_owned();
            let delay = if text == "one" { 50 } else { 5 };
            std::thread::sleep(Duration::from_millis(delay));
            Ok(text.to_uppercase())
        }
    }

    struct FailingBackend;

    impl TranscriptionBackend for FailingBackend {
        fn transcribe(&self, audio: &[u8]) -> Result<String> {
            if audio == b"two" {
                return Err(Error::Transcription("model exploded".into()));
            }
            Ok("ok".into())
        }
    }

    fn write_chunks(dir: &Path, contents: &[&str]) -> Vec<Chunk> {
        contents
            .iter()
            .enumerate()
            .map(|(order, content)| {
                let path: PathBuf = dir.join(chunker::chunk_file_name(order, "mp3"));
                std::fs::write(&path, content).unwrap();
                Chunk {
                    order,
                    start_ms: order as i64 * 1000,
                    end_ms: (order as i64 + 1) * 1000,
                    path,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn transcripts_come_back_in_chunk_order() {
        let dir = TempDir::new().unwrap();
        let chunks = write_chunks(dir.path(), &["one", "two", "three"]);
        let transcriber = Transcriber::new(Config::default(), Arc::new(SlowFirstBackend));
        let transcript = transcriber.transcribe_chunks(chunks).await.unwrap();
        assert_eq!(transcript, "ONE\nTWO\nTHREE");
    }

    #[tokio::test]
    async fn one_failed_chunk_fails_the_whole_file() {
        let dir = TempDir::new().unwrap();
        let chunks = write_chunks(dir.path(), &["one", "two", "three"]);
        let transcriber = Transcriber::new(Config::default(), Arc::new(FailingBackend));
        let result = transcriber.transcribe_chunks(chunks).await;
        assert!(matches!(result, Err(Error::Transcription(_))));
    }
}
