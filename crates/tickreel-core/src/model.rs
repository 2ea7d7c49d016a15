use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::{Tick, Timing};

pub const DEFAULT_BPM: u32 = 120;
pub const DEFAULT_LINES_PER_BEAT: u32 = 4;
pub const DEFAULT_TICKS_PER_LINE: u32 = 6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    NoteOn,
    NoteOff,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteData {
    pub kind: NoteKind,
    pub pitch: u8,
    pub velocity: u8,
    pub track: usize,
    pub column: usize,
}

impl NoteData {
    #[must_use]
    pub const fn on(pitch: u8, velocity: u8, track: usize, column: usize) -> Self {
        Self {
            kind: NoteKind::NoteOn,
            pitch,
            velocity,
            track,
            column,
        }
    }

    #[must_use]
    pub const fn off(pitch: u8, track: usize, column: usize) -> Self {
        Self {
            kind: NoteKind::NoteOff,
            pitch,
            velocity: 0,
            track,
            column,
        }
    }
}

/// Output target a note is played on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Instrument {
    pub id: u32,
    pub name: String,
}

impl Instrument {
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub tick: Tick,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<NoteData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<Instrument>,
}

impl Event {
    #[must_use]
    pub fn note(tick: Tick, note: NoteData, instrument: Instrument) -> Self {
        Self {
            tick,
            note: Some(note),
            instrument: Some(instrument),
        }
    }

    #[must_use]
    pub fn is_note_on(&self) -> bool {
        matches!(
            self.note,
            Some(NoteData {
                kind: NoteKind::NoteOn,
                ..
            })
        )
    }
}

/// The composition collaborator: the editing layer that flattens song
/// structure into a tick-ordered event list.
pub trait Composition {
    fn render_to_events(&self, start_tick: Tick, end_tick: Option<Tick>) -> Vec<Event>;
    fn beats_per_minute(&self) -> u32;
    fn lines_per_beat(&self) -> u32;
    fn ticks_per_line(&self) -> u32;
    fn track_count(&self) -> usize;
    fn track_position_by_index(&self, track_index: usize) -> Option<f32>;
    fn track_by_name(&self, name: &str) -> Option<usize>;
    fn column_by_name(&self, track_index: usize, name: &str) -> Option<usize>;

    fn timing(&self) -> Timing {
        Timing::new(
            self.beats_per_minute(),
            self.lines_per_beat(),
            self.ticks_per_line(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackInfo {
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    /// Normalized vertical placement in `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f32>,
}

impl TrackInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
            columns: Vec::new(),
            position: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Song {
    pub id: Uuid,
    pub title: String,
    pub timing: Timing,
    pub tracks: Vec<TrackInfo>,
    pub events: Vec<Event>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Song {
    #[must_use]
    pub fn new(title: impl Into<String>, timing: Timing) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            timing,
            tracks: Vec::new(),
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn track_colors(&self) -> Vec<String> {
        self.tracks.iter().map(|track| track.color.clone()).collect()
    }

    #[must_use]
    pub fn note_count(&self) -> usize {
        self.events.iter().filter(|event| event.is_note_on()).count()
    }

    #[must_use]
    pub fn max_tick(&self) -> Tick {
        self.events
            .iter()
            .map(|event| event.tick)
            .max()
            .unwrap_or_default()
    }
}

impl Composition for Song {
    fn render_to_events(&self, start_tick: Tick, end_tick: Option<Tick>) -> Vec<Event> {
        let end_tick = end_tick.unwrap_or(Tick::MAX);
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|event| event.tick >= start_tick && event.tick <= end_tick)
            .cloned()
            .collect();
        // stable: events sharing a tick keep authoring order
        events.sort_by_key(|event| event.tick);
        events
    }

    fn beats_per_minute(&self) -> u32 {
        self.timing.bpm
    }

    fn lines_per_beat(&self) -> u32 {
        self.timing.lines_per_beat
    }

    fn ticks_per_line(&self) -> u32 {
        self.timing.ticks_per_line
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_position_by_index(&self, track_index: usize) -> Option<f32> {
        let track = self.tracks.get(track_index)?;
        track.position.or_else(|| {
            let count = self.tracks.len().max(1) as f32;
            Some((track_index as f32 + 0.5) / count)
        })
    }

    fn track_by_name(&self, name: &str) -> Option<usize> {
        self.tracks.iter().position(|track| track.name == name)
    }

    fn column_by_name(&self, track_index: usize, name: &str) -> Option<usize> {
        self.tracks
            .get(track_index)?
            .columns
            .iter()
            .position(|column| column == name)
    }
}
