use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

use crate::model::Song;

/// Rejects songs the scheduler and renderer cannot use: non-positive timing
/// and notes on tracks the song does not declare.
pub fn validate_song(song: &Song) -> Result<()> {
    if !song.timing.is_valid() {
        bail!(
            "song {} has non-positive timing: bpm {}, lines per beat {}, ticks per line {}",
            song.id,
            song.timing.bpm,
            song.timing.lines_per_beat,
            song.timing.ticks_per_line
        );
    }

    let track_count = song.tracks.len();
    if let Some((tick, track)) = song.events.iter().find_map(|event| {
        event
            .note
            .filter(|note| note.track >= track_count)
            .map(|note| (event.tick, note.track))
    }) {
        bail!(
            "song {} has a note at tick {tick} on track {track}, but only {track_count} tracks exist",
            song.id
        );
    }

    Ok(())
}

#[instrument(skip(song), fields(song_id = %song.id, path = %path.display()))]
pub fn save_song(path: &Path, song: &Song) -> Result<()> {
    validate_song(song).context("refusing to save an unplayable song")?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(song).context("failed to serialize song")?;
    let mut temp_file = tempfile::NamedTempFile::new_in(
        path.parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf),
    )
    .context("failed to create temp song file")?;

    temp_file
        .write_all(&json)
        .context("failed to write temp song file")?;
    temp_file
        .persist(path)
        .map_err(|error| anyhow::anyhow!(error.error))
        .with_context(|| format!("failed to persist song: {}", path.display()))?;

    info!("song saved");
    Ok(())
}

#[instrument(fields(path = %path.display()))]
pub fn load_song(path: &Path) -> Result<Song> {
    let content =
        fs::read(path).with_context(|| format!("failed to read song: {}", path.display()))?;
    let song: Song = serde_json::from_slice(&content).context("invalid song json")?;
    validate_song(&song).with_context(|| format!("unplayable song: {}", path.display()))?;
    info!(song_id = %song.id, events = song.events.len(), "song loaded");
    Ok(song)
}

/// Loads a song from JSON, or imports it when the path looks like a MIDI file.
pub fn load_any(path: &Path, lines_per_beat: u32, ticks_per_line: u32) -> Result<Song> {
    let is_midi = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| matches!(extension.to_ascii_lowercase().as_str(), "mid" | "midi"));
    if is_midi {
        let song = crate::midi_import::import_midi_file(path, lines_per_beat, ticks_per_line)?;
        validate_song(&song).with_context(|| format!("unplayable import: {}", path.display()))?;
        Ok(song)
    } else {
        load_song(path)
    }
}

#[instrument(skip(song), fields(song_id = %song.id, export_dir = %export_dir.display()))]
pub fn export_song(song: &Song, export_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(export_dir).with_context(|| {
        format!(
            "failed to create export directory: {}",
            export_dir.display()
        )
    })?;

    let file_name = format!("{}.tickreel.json", song.id);
    let export_path = export_dir.join(file_name);
    save_song(&export_path, song)?;

    debug!(path = %export_path.display(), "song export complete");
    Ok(export_path)
}
