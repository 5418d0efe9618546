use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::try_join_all;
use tempfile::TempDir;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::media::run_tool;
use crate::podcast::PodcastService;

/// Assembles an episode's final mix by concatenating its segments' produced
/// audio, in sequence order, through ffmpeg's concat demuxer.
///
/// All intermediate files live in a scratch workspace owned by a `TempDir`,
/// so they are removed on every exit path, error or not.
pub struct AudioProducer {
    config: Config,
    service: Arc<PodcastService>,
}

impl AudioProducer {
    pub fn new(config: Config, service: Arc<PodcastService>) -> Self {
        Self { config, service }
    }

    /// Produce the final mix for a complete episode and write it into the
    /// episode's produced-audio asset.
    pub async fn produce(&self, episode_id: i64) -> Result<()> {
        let episode = self.service.episode(episode_id)?;
        if !episode.complete {
            return Err(Error::Precondition(format!(
                "episode {} is not complete, refusing to produce",
                episode_id
            )));
        }
        // read the ordering fresh; it may have changed since completion
        let segments = self.service.segments_of(episode_id)?;

        let scratch_root = self.config.scratch_root();
        std::fs::create_dir_all(&scratch_root)?;
        let workspace = TempDir::new_in(&scratch_root)?;

        let mut sources = Vec::with_capacity(segments.len());
        for segment in &segments {
            let bytes = self.service.assets().read(segment.produced_audio.id)?;
            let path = workspace.path().join(format!(
                "segment-{:03}-{}.mp3",
                segment.sequence_number,
                Uuid::new_v4()
            ));
            std::fs::write(&path, bytes)?;
            sources.push(path);
        }

        let mix = self.concat(workspace.path(), &sources).await?;
        let bytes = std::fs::read(&mix)?;
        self.service.assets().write(
            episode.produced_audio.id,
            &episode.produced_audio.filename,
            &episode.produced_audio.content_type,
            &bytes,
        )?;
        self.service
            .write_episode_produced_audio(episode_id, episode.produced_audio.id)?;
        log::info!(
            "produced episode {} from {} segments ({} bytes)",
            episode_id,
            segments.len(),
            bytes.len()
        );
        Ok(())
    }

    /// Concatenate `sources` in order. Inputs are first brought to a common
    /// wav encoding so the concat demuxer can stream-copy.
    pub async fn concat(&self, workspace: &Path, sources: &[PathBuf]) -> Result<PathBuf> {
        if sources.is_empty() {
            return Err(Error::Precondition("nothing to concatenate".into()));
        }
        let wavs = try_join_all(
            sources
                .iter()
                .map(|source| self.ensure_wav(workspace, source.clone())),
        )
        .await?;

        let manifest_path = workspace.join(format!("manifest-{}.txt", Uuid::new_v4()));
        std::fs::write(&manifest_path, manifest_lines(&wavs))?;

        let output = workspace.join(format!("mix-{}.wav", Uuid::new_v4()));
        let manifest_arg = manifest_path.display().to_string();
        let output_arg = output.display().to_string();
        run_tool(
            &self.config.ffmpeg_path,
            &[
                "-f", "concat", "-safe", "0", "-i", &manifest_arg, "-c", "copy", "-y",
                &output_arg,
            ],
            self.config.tool_timeout(),
        )
        .await?;

        let len = std::fs::metadata(&output)?.len();
        if len == 0 {
            return Err(Error::Asset(format!(
                "concat produced an empty file at {}",
                output.display()
            )));
        }
        Ok(output)
    }

    /// Transcode `source` to 16-bit PCM wav unless it already is one.
    pub async fn ensure_wav(&self, workspace: &Path, source: PathBuf) -> Result<PathBuf> {
        let is_wav = source
            .extension()
            .map(|e| e.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if is_wav {
            return Ok(source);
        }
        let target = workspace.join(format!("{}.wav", Uuid::new_v4()));
        let source_arg = source.display().to_string();
        let target_arg = target.display().to_string();
        run_tool(
            &self.config.ffmpeg_path,
            &[
                "-i", &source_arg, "-acodec", "pcm_s16le", "-vn", "-f", "wav", "-y",
                &target_arg,
            ],
            self.config.tool_timeout(),
        )
        .await?;
        Ok(target)
    }
}

/// Concat demuxer manifest: one `file '<path>'` line per input, in order.
pub fn manifest_lines(paths: &[PathBuf]) -> String {
    let mut manifest = String::new();
    for path in paths {
        manifest.push_str(&format!("file '{}'\n", path.display()));
    }
    manifest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetRef, AssetStore, MediaNormalizer};
    use crate::events::EventBus;
    use crate::store::Store;

    struct NoopNormalizer;
    impl MediaNormalizer for NoopNormalizer {
        fn normalize(&self, _source: &AssetRef, _target: &AssetRef) -> Result<()> {
            Ok(())
        }
    }

    struct NoopAssets;
    impl AssetStore for NoopAssets {
        fn write(&self, _: i64, _: &str, _: &str, _: &[u8]) -> Result<()> {
            Ok(())
        }
        fn read(&self, id: i64) -> Result<Vec<u8>> {
            Err(Error::NotFound(format!("asset {}", id)))
        }
        fn delete(&self, _: i64) -> Result<()> {
            Ok(())
        }
        fn len(&self, _: i64) -> Result<Option<u64>> {
            Ok(None)
        }
    }

    fn producer() -> AudioProducer {
        let store = Arc::new(Store::in_memory().unwrap());
        let service = Arc::new(
            PodcastService::new(
                store,
                Arc::new(NoopAssets),
                Arc::new(NoopNormalizer),
                EventBus::default(),
            )
            .unwrap(),
        );
        AudioProducer::new(Config::default(), service)
    }

    #[test]
    fn manifest_preserves_input_order() {
        let paths = vec![
            PathBuf::from("/tmp/work/b.wav"),
            PathBuf::from("/tmp/work/c.wav"),
            PathBuf::from("/tmp/work/a.wav"),
        ];
        assert_eq!(
            manifest_lines(&paths),
            "file '/tmp/work/b.wav'\nfile '/tmp/work/c.wav'\nfile '/tmp/work/a.wav'\n"
        );
    }

    #[test]
    fn segments_feed_the_manifest_in_sequence_order() {
        let producer = producer();
        let service = &producer.service;
        let podcast = service.create_podcast(1, "Show").unwrap();
        let episode = service
            .create_episode_draft(podcast.id, "Ep", "desc")
            .unwrap();
        // the draft's initial segment plus two more: a, b, c
        let a = service.segments_of(episode.id).unwrap().remove(0);
        let b = service.create_segment(episode.id, "b", 0).unwrap();
        let c = service.create_segment(episode.id, "c", 0).unwrap();

        // permute playback order to b, c, a
        service.store().set_segment_sequence(a.id, 3).unwrap();
        service.store().set_segment_sequence(b.id, 1).unwrap();
        service.store().set_segment_sequence(c.id, 2).unwrap();

        let ordered: Vec<i64> = service
            .segments_of(episode.id)
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ordered, vec![b.id, c.id, a.id]);

        // and the manifest mirrors that order, not insertion order
        let paths: Vec<PathBuf> = service
            .segments_of(episode.id)
            .unwrap()
            .iter()
            .map(|s| PathBuf::from(format!("/tmp/work/segment-{}.wav", s.id)))
            .collect();
        assert_eq!(
            manifest_lines(&paths),
            format!(
                "file '/tmp/work/segment-{}.wav'\nfile '/tmp/work/segment-{}.wav'\nfile '/tmp/work/segment-{}.wav'\n",
                b.id, c.id, a.id
            )
        );
    }

    #[tokio::test]
    async fn wav_inputs_pass_through_untouched() {
        let producer = producer();
        let workspace = tempfile::TempDir::new().unwrap();
        let source = workspace.path().join("already.WAV");
        let result = producer
            .ensure_wav(workspace.path(), source.clone())
            .await
            .unwrap();
        assert_eq!(result, source);
    }

    #[tokio::test]
    async fn concat_of_nothing_is_a_precondition_error() {
        let producer = producer();
        let workspace = tempfile::TempDir::new().unwrap();
        let result = producer.concat(workspace.path(), &[]).await;
        assert!(matches!(result, Err(Error::Precondition(_))));
    }

    #[tokio::test]
    async fn producing_an_incomplete_episode_is_refused() {
        let producer = producer();
        let podcast = producer.service.create_podcast(1, "Show").unwrap();
        let episode = producer
            .service
            .create_episode_draft(podcast.id, "Ep", "desc")
            .unwrap();
        let result = producer.produce(episode.id).await;
        assert!(matches!(result, Err(Error::Precondition(_))));
    }
}
