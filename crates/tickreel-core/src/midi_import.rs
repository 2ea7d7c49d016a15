use std::{collections::BTreeSet, fs, path::Path};

use anyhow::{Context, Result, bail};
use midly::{MetaMessage, MidiMessage, Smf, Timing as SmfTiming, TrackEventKind};
use tracing::{debug, info, instrument};

use crate::{
    animation::palette_color,
    model::{DEFAULT_BPM, Event, Instrument, NoteData, Song, TrackInfo},
    time::{Timing, rescale_ppq_ticks},
};

#[instrument(fields(path = %path.display()))]
pub fn import_midi_file(path: &Path, lines_per_beat: u32, ticks_per_line: u32) -> Result<Song> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read midi file: {}", path.display()))?;
    let title = path
        .file_stem()
        .map_or_else(|| "Imported".to_string(), |stem| stem.to_string_lossy().into_owned());
    import_midi_bytes(&bytes, title, lines_per_beat, ticks_per_line)
}

/// Builds a song from SMF bytes. Every SMF track holding notes becomes a
/// track; MIDI channels become its columns.
pub fn import_midi_bytes(
    bytes: &[u8],
    title: impl Into<String>,
    lines_per_beat: u32,
    ticks_per_line: u32,
) -> Result<Song> {
    let smf = Smf::parse(bytes).context("invalid midi file")?;
    let ppq = match smf.header.timing {
        SmfTiming::Metrical(ppq) => ppq.as_int(),
        SmfTiming::Timecode(..) => bail!("timecode-based midi files are not supported"),
    };

    let bpm = smf
        .tracks
        .iter()
        .flatten()
        .find_map(|event| match event.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(micros_per_beat)) => {
                let micros = micros_per_beat.as_int().max(1);
                Some((60_000_000.0 / f64::from(micros)).round() as u32)
            }
            _ => None,
        })
        .unwrap_or(DEFAULT_BPM)
        .max(1);

    let timing = Timing::new(bpm, lines_per_beat.max(1), ticks_per_line.max(1));
    let mut song = Song::new(title, timing);

    for smf_track in &smf.tracks {
        let track_index = song.tracks.len();
        let mut name = None;
        let mut channels = BTreeSet::new();
        let mut events = Vec::new();
        let mut absolute = 0_u64;

        for event in smf_track {
            absolute += u64::from(event.delta.as_int());
            let tick = rescale_ppq_ticks(absolute, ppq, &timing);
            match event.kind {
                TrackEventKind::Meta(MetaMessage::TrackName(raw)) => {
                    name = Some(String::from_utf8_lossy(raw).trim().to_string());
                }
                TrackEventKind::Midi { channel, message } => {
                    let channel = usize::from(channel.as_int());
                    let note = match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            NoteData::on(key.as_int(), vel.as_int(), track_index, channel)
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            NoteData::off(key.as_int(), track_index, channel)
                        }
                        _ => continue,
                    };
                    channels.insert(channel);
                    events.push((tick, note));
                }
                _ => {}
            }
        }

        if events.is_empty() {
            continue;
        }

        let name = name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("Track {}", track_index + 1));
        let [r, g, b] = palette_color(track_index);
        let mut track = TrackInfo::new(name.clone(), format!("#{r:02x}{g:02x}{b:02x}"));
        let max_channel = channels.iter().next_back().copied().unwrap_or(0);
        track.columns = (0..=max_channel)
            .map(|channel| format!("ch{}", channel + 1))
            .collect();

        let instrument = Instrument::new(u32::try_from(track_index).unwrap_or(u32::MAX), name);
        song.events.extend(
            events
                .into_iter()
                .map(|(tick, note)| Event::note(tick, note, instrument.clone())),
        );
        debug!(track_index, columns = track.columns.len(), "midi track imported");
        song.tracks.push(track);
    }

    // tracks are merged, so restore global tick order (stable per track)
    song.events.sort_by_key(|event| event.tick);
    info!(
        bpm,
        ppq,
        tracks = song.tracks.len(),
        notes = song.note_count(),
        "midi imported"
    );
    Ok(song)
}
