use super::Store;

fn setup_store() -> Store {
    Store::in_memory().unwrap()
}

/// Podcast → episode → segments fixture with freshly allocated asset refs.
fn setup_episode(store: &Store) -> (i64, i64) {
    let podcast = store.create_podcast(1, "Test Podcast").unwrap();
    let graphic = store.create_asset_ref("graphic", "application/octet-stream").unwrap();
    let produced_graphic = store.create_asset_ref("produced-graphic.jpg", "image/jpeg").unwrap();
    let produced_audio = store.create_asset_ref("produced-audio.mp3", "audio/mpeg").unwrap();
    let episode = store
        .create_episode(
            podcast.id,
            "Episode 1",
            "the first one",
            graphic.id,
            produced_graphic.id,
            produced_audio.id,
        )
        .unwrap();
    (podcast.id, episode.id)
}

fn add_segment(store: &Store, episode_id: i64, name: &str) -> i64 {
    let audio = store.create_asset_ref("audio.mp3", "audio/mpeg").unwrap();
    let produced = store.create_asset_ref("produced.mp3", "audio/mpeg").unwrap();
    store
        .create_segment(episode_id, name, 0, audio.id, produced.id)
        .unwrap()
        .id
}

// =========================================================================
// Asset refs
// =========================================================================

#[test]
fn new_asset_ref_is_unwritten() {
    let store = setup_store();
    let asset = store.create_asset_ref("a.mp3", "audio/mpeg").unwrap();
    assert!(!asset.written);
    assert_eq!(asset.size_bytes, 0);
}

#[test]
fn refresh_flips_written_and_records_size() {
    let store = setup_store();
    let asset = store.create_asset_ref("a.mp3", "audio/mpeg").unwrap();

    let refreshed = store.refresh_asset_ref(asset.id, Some(1234)).unwrap().unwrap();
    assert!(refreshed.written);
    assert_eq!(refreshed.size_bytes, 1234);

    // a refresh observing nothing written flips it back
    let refreshed = store.refresh_asset_ref(asset.id, None).unwrap().unwrap();
    assert!(!refreshed.written);
    assert_eq!(refreshed.size_bytes, 0);
}

#[test]
fn refresh_of_unknown_asset_is_none() {
    let store = setup_store();
    assert!(store.refresh_asset_ref(999, Some(10)).unwrap().is_none());
}

// =========================================================================
// Episodes and segments
// =========================================================================

#[test]
fn episode_carries_resolved_asset_refs() {
    let store = setup_store();
    let (_, episode_id) = setup_episode(&store);
    let episode = store.get_episode(episode_id).unwrap().unwrap();
    assert_eq!(episode.produced_graphic.filename, "produced-graphic.jpg");
    assert!(!episode.complete);
    assert!(episode.produced_audio_updated.is_none());
}

#[test]
fn segments_are_ordered_by_sequence_then_id() {
    let store = setup_store();
    let (_, episode_id) = setup_episode(&store);
    let a = add_segment(&store, episode_id, "a");
    let b = add_segment(&store, episode_id, "b");
    let c = add_segment(&store, episode_id, "c");

    // sequence numbers were assigned 1, 2, 3
    let segments = store.segments_for_episode(episode_id).unwrap();
    assert_eq!(segments.iter().map(|s| s.id).collect::<Vec<_>>(), vec![a, b, c]);

    // force a tie: ordering falls back to id
    store.set_segment_sequence(b, 1).unwrap();
    let segments = store.segments_for_episode(episode_id).unwrap();
    assert_eq!(segments.iter().map(|s| s.id).collect::<Vec<_>>(), vec![a, b, c]);
}

#[test]
fn new_segments_append_after_max_sequence() {
    let store = setup_store();
    let (_, episode_id) = setup_episode(&store);
    add_segment(&store, episode_id, "a");
    let b = add_segment(&store, episode_id, "b");
    let segment = store.get_segment(b).unwrap().unwrap();
    assert_eq!(segment.sequence_number, 2);
}

// =========================================================================
// Asset-write notification resolution
// =========================================================================

#[test]
fn resolves_episode_from_graphic_asset() {
    let store = setup_store();
    let (_, episode_id) = setup_episode(&store);
    let episode = store.get_episode(episode_id).unwrap().unwrap();
    assert_eq!(store.episode_for_asset(episode.graphic.id).unwrap(), Some(episode_id));
}

#[test]
fn resolves_episode_from_segment_audio_asset() {
    let store = setup_store();
    let (_, episode_id) = setup_episode(&store);
    let segment_id = add_segment(&store, episode_id, "a");
    let segment = store.get_segment(segment_id).unwrap().unwrap();
    assert_eq!(store.episode_for_asset(segment.audio.id).unwrap(), Some(episode_id));
}

#[test]
fn produced_assets_do_not_resolve() {
    let store = setup_store();
    let (_, episode_id) = setup_episode(&store);
    let segment_id = add_segment(&store, episode_id, "a");
    let episode = store.get_episode(episode_id).unwrap().unwrap();
    let segment = store.get_segment(segment_id).unwrap().unwrap();

    assert_eq!(store.episode_for_asset(episode.produced_graphic.id).unwrap(), None);
    assert_eq!(store.episode_for_asset(episode.produced_audio.id).unwrap(), None);
    assert_eq!(store.episode_for_asset(segment.produced_audio.id).unwrap(), None);
}

#[test]
fn unknown_asset_resolves_to_nothing() {
    let store = setup_store();
    setup_episode(&store);
    assert_eq!(store.episode_for_asset(424242).unwrap(), None);
}

// =========================================================================
// Deletes
// =========================================================================

#[test]
fn delete_episode_removes_its_segments() {
    let store = setup_store();
    let (_, episode_id) = setup_episode(&store);
    add_segment(&store, episode_id, "a");
    add_segment(&store, episode_id, "b");

    store.delete_episode(episode_id).unwrap();
    assert!(store.get_episode(episode_id).unwrap().is_none());
    assert!(store.segments_for_episode(episode_id).unwrap().is_empty());
}

#[test]
fn transcript_update_persists() {
    let store = setup_store();
    let (_, episode_id) = setup_episode(&store);
    let segment_id = add_segment(&store, episode_id, "a");

    store.set_segment_transcript(segment_id, true, "hello world").unwrap();
    let segment = store.get_segment(segment_id).unwrap().unwrap();
    assert_eq!(segment.transcript.as_deref(), Some("hello world"));
    assert!(!segment.needs_transcript());
}
