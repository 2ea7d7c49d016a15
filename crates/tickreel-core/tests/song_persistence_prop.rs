use proptest::prelude::*;
use tickreel_core::{
    Song,
    fixtures::demo_song,
    persistence::{export_song, load_song, save_song},
};

fn notes_reference_known_tracks(song: &Song) -> bool {
    song.events
        .iter()
        .filter_map(|event| event.note)
        .all(|note| note.track < song.tracks.len())
}

/// Loading never panics, and whatever does load is playable.
fn loads_playable_or_fails(path: &std::path::Path) -> bool {
    std::panic::catch_unwind(|| match load_song(path) {
        Ok(song) => song.timing.is_valid() && notes_reference_known_tracks(&song),
        Err(_) => true,
    })
    .unwrap_or(false)
}

#[test]
fn saved_song_loads_back_identically() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("nested/demo.tickreel.json");
    let song = demo_song();

    save_song(&path, &song).expect("saving fixture song should work");
    let loaded = load_song(&path).expect("loading saved song should work");
    assert_eq!(loaded, song);
}

#[test]
fn export_names_the_file_after_the_song_id() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let song = demo_song();

    let path = export_song(&song, temp.path()).expect("export should work");
    assert_eq!(
        path.file_name().and_then(|name| name.to_str()),
        Some("9ed0a3fa-4064-458f-b95f-1fdd0bc4f0be.tickreel.json")
    );
    assert!(path.is_file());
}

#[test]
fn missing_file_reports_its_path() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("absent.tickreel.json");
    let error = load_song(&path).expect_err("absent file must fail");
    assert!(format!("{error:#}").contains("absent.tickreel.json"));
}

#[test]
fn zero_ticks_per_line_is_rejected_on_load() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("flat.tickreel.json");
    let mut song = demo_song();
    song.timing.ticks_per_line = 0;
    std::fs::write(&path, serde_json::to_vec(&song).expect("song serializes"))
        .expect("writing song json should work");

    let error = load_song(&path).expect_err("degenerate timing must fail");
    let message = format!("{error:#}");
    assert!(message.contains("flat.tickreel.json"), "{message}");
    assert!(message.contains("ticks per line 0"), "{message}");
}

#[test]
fn notes_on_undeclared_tracks_are_not_saved() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("orphan.tickreel.json");
    let mut song = demo_song();
    song.tracks.truncate(1);

    let error = save_song(&path, &song).expect_err("orphaned drum notes must fail");
    assert!(format!("{error:#}").contains("only 1 tracks exist"));
    assert!(!path.exists());
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn random_song_bytes_do_not_panic(raw in prop::collection::vec(any::<u8>(), 0..4096)) {
        let temp = tempfile::tempdir().expect("tempdir should be creatable");
        let path = temp.path().join("corrupt_random.tickreel.json");
        std::fs::write(&path, raw).expect("writing random payload should work");
        prop_assert!(loads_playable_or_fails(&path));
    }

    #[test]
    fn truncated_song_payloads_do_not_panic(prefix_len in 0usize..8192usize) {
        let temp = tempfile::tempdir().expect("tempdir should be creatable");
        let path = temp.path().join("corrupt_truncated.tickreel.json");
        save_song(&path, &demo_song()).expect("saving fixture song should work");

        let mut payload = std::fs::read(&path).expect("reading saved song should work");
        payload.truncate(prefix_len.min(payload.len()));
        std::fs::write(&path, payload).expect("writing truncated payload should work");

        prop_assert!(loads_playable_or_fails(&path));
    }

    #[test]
    fn mutated_song_payloads_do_not_panic(index in 0usize..8192usize, delta in any::<u8>()) {
        let temp = tempfile::tempdir().expect("tempdir should be creatable");
        let path = temp.path().join("corrupt_mutated.tickreel.json");
        save_song(&path, &demo_song()).expect("saving fixture song should work");

        let mut payload = std::fs::read(&path).expect("reading saved song should work");
        if !payload.is_empty() {
            let target = index % payload.len();
            payload[target] = payload[target].wrapping_add(delta);
        }
        std::fs::write(&path, payload).expect("writing mutated payload should work");

        prop_assert!(loads_playable_or_fails(&path));
    }
}
