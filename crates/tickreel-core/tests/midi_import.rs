use midly::{
    Format, Fps, Header, MetaMessage, MidiMessage, Smf, Timing as SmfTiming, TrackEvent,
    TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use tickreel_core::{
    Composition, NoteKind, import_midi_bytes, import_midi_file, persistence::load_any,
};

fn meta(delta: u32, message: MetaMessage<'static>) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Meta(message),
    }
}

fn midi(delta: u32, channel: u8, message: MidiMessage) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Midi {
            channel: u4::new(channel),
            message,
        },
    }
}

fn note_on(key: u8, vel: u8) -> MidiMessage {
    MidiMessage::NoteOn {
        key: u7::new(key),
        vel: u7::new(vel),
    }
}

fn note_off(key: u8) -> MidiMessage {
    MidiMessage::NoteOff {
        key: u7::new(key),
        vel: u7::new(0),
    }
}

fn three_track_file() -> Vec<u8> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        SmfTiming::Metrical(u15::new(480)),
    ));
    smf.tracks.push(vec![
        meta(0, MetaMessage::TrackName(b"Conductor")),
        // 500 000 us per beat = 120 bpm
        meta(0, MetaMessage::Tempo(u24::new(500_000))),
        meta(0, MetaMessage::EndOfTrack),
    ]);
    smf.tracks.push(vec![
        meta(0, MetaMessage::TrackName(b"Piano")),
        midi(0, 0, note_on(60, 100)),
        midi(240, 1, note_on(64, 90)),
        midi(240, 0, note_off(60)),
        midi(0, 1, note_off(64)),
        meta(0, MetaMessage::EndOfTrack),
    ]);
    smf.tracks.push(vec![
        midi(0, 9, note_on(36, 127)),
        // velocity zero note-on releases
        midi(120, 9, note_on(36, 0)),
        meta(0, MetaMessage::EndOfTrack),
    ]);

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes).expect("fixture smf should encode");
    bytes
}

#[test]
fn tracks_with_notes_become_song_tracks() {
    let song = import_midi_bytes(&three_track_file(), "groove", 4, 6).expect("import should work");

    assert_eq!(song.title, "groove");
    assert_eq!(song.timing.bpm, 120);
    assert_eq!(song.track_count(), 2);
    assert_eq!(song.tracks[0].name, "Piano");
    assert_eq!(song.tracks[0].columns, vec!["ch1", "ch2"]);
    assert_eq!(song.tracks[1].name, "Track 2");
    assert_eq!(song.tracks[1].columns.len(), 10);
    assert_eq!(song.track_by_name("Piano"), Some(0));
    assert_eq!(song.column_by_name(1, "ch10"), Some(9));
}

#[test]
fn ticks_are_rescaled_to_the_grid_and_sorted() {
    let song = import_midi_bytes(&three_track_file(), "groove", 4, 6).expect("import should work");
    let notes: Vec<(u64, NoteKind, u8, usize, usize)> = song
        .events
        .iter()
        .filter_map(|event| {
            event
                .note
                .map(|note| (event.tick, note.kind, note.pitch, note.track, note.column))
        })
        .collect();

    // 480 ppq onto 24 ticks per beat
    assert_eq!(
        notes,
        vec![
            (0, NoteKind::NoteOn, 60, 0, 0),
            (0, NoteKind::NoteOn, 36, 1, 9),
            (6, NoteKind::NoteOff, 36, 1, 9),
            (12, NoteKind::NoteOn, 64, 0, 1),
            (24, NoteKind::NoteOff, 60, 0, 0),
            (24, NoteKind::NoteOff, 64, 0, 1),
        ]
    );
    assert!(song.events.iter().all(|event| event.instrument.is_some()));
    assert_eq!(song.note_count(), 3);
}

#[test]
fn timecode_files_are_rejected() {
    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        SmfTiming::Timecode(Fps::Fps25, 40),
    ));
    smf.tracks.push(vec![meta(0, MetaMessage::EndOfTrack)]);
    let mut bytes = Vec::new();
    smf.write_std(&mut bytes).expect("fixture smf should encode");

    let error = import_midi_bytes(&bytes, "timecode", 4, 6).expect_err("timecode is unsupported");
    assert!(format!("{error:#}").contains("timecode"));
}

#[test]
fn garbage_bytes_are_an_error_not_a_panic() {
    assert!(import_midi_bytes(b"definitely not midi", "junk", 4, 6).is_err());
}

#[test]
fn midi_paths_load_through_the_generic_loader() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("Groove.MID");
    std::fs::write(&path, three_track_file()).expect("fixture should be writable");

    let direct = import_midi_file(&path, 4, 6).expect("direct import should work");
    assert_eq!(direct.title, "Groove");

    let loaded = load_any(&path, 4, 6).expect("extension should route to the importer");
    assert_eq!(loaded.events, direct.events);
    assert_eq!(loaded.tracks, direct.tracks);
}
