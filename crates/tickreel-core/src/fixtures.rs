use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    model::{Event, Instrument, NoteData, Song, TrackInfo},
    time::{Tick, Timing},
};

// 2026-02-23T00:00:00Z
const FIXTURE_TIMESTAMP: i64 = 1_771_804_800;

/// A short two-track song with fixed ids and timestamps, so saved fixtures
/// and fingerprints stay stable across runs.
#[must_use]
pub fn demo_song() -> Song {
    let mut song = Song::new("Tickreel Demo", Timing::new(128, 4, 6));
    song.id = Uuid::from_u128(0x9ed0_a3fa_4064_458f_b95f_1fdd_0bc4_f0be);
    let fixed_timestamp = DateTime::<Utc>::from_timestamp(FIXTURE_TIMESTAMP, 0).unwrap_or_default();
    song.created_at = fixed_timestamp;
    song.updated_at = fixed_timestamp;

    let mut lead = TrackInfo::new("Lead", "#00d1b2");
    lead.columns = vec!["melody".to_string(), "harmony".to_string()];
    lead.position = Some(0.35);
    let mut drums = TrackInfo::new("Drums", "#f77f00");
    drums.columns = vec!["kick".to_string(), "snare".to_string()];
    drums.position = Some(0.75);
    song.tracks = vec![lead, drums];

    let lead_synth = Instrument::new(0, "Pulse Lead");
    let kit = Instrument::new(1, "Kit");
    let line = Tick::from(song.timing.ticks_per_line);

    let melody: [(u64, u64, u8, u8); 6] = [
        (0, 2, 72, 118),
        (2, 2, 74, 112),
        (4, 4, 79, 110),
        (8, 2, 77, 104),
        (10, 2, 76, 100),
        (12, 4, 72, 118),
    ];
    for (start, length, pitch, velocity) in melody {
        let span = (start * line, (start + length) * line);
        push_note(&mut song, &lead_synth, span, pitch, velocity, (0, 0));
    }
    // a held harmony note under the whole phrase
    push_note(&mut song, &lead_synth, (0, 16 * line), 60, 80, (0, 1));

    for beat in 0..4_u64 {
        let kick = beat * 4 * line;
        push_note(&mut song, &kit, (kick, kick + line), 36, 127, (1, 0));
        let snare = kick + 2 * line;
        push_note(&mut song, &kit, (snare, snare + line), 38, 96, (1, 1));
    }

    song.events.sort_by_key(|event| event.tick);
    song
}

fn push_note(
    song: &mut Song,
    instrument: &Instrument,
    (start, end): (Tick, Tick),
    pitch: u8,
    velocity: u8,
    (track, column): (usize, usize),
) {
    song.events.push(Event::note(
        start,
        NoteData::on(pitch, velocity, track, column),
        instrument.clone(),
    ));
    song.events.push(Event::note(
        end,
        NoteData::off(pitch, track, column),
        instrument.clone(),
    ));
}
