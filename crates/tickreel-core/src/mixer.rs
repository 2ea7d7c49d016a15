use std::collections::BTreeMap;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument};

/// Decides whether an item on a track/column is audible for the current pass.
pub trait Gate: Send + Sync {
    fn should_play(&self, track: usize, column: usize) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerEvent {
    TrackMuted { track: usize, muted: bool },
    TrackSoloed { track: usize, soloed: bool },
    TrackAudible { track: usize, audible: bool },
}

#[derive(Debug, Default, Clone)]
struct MixState {
    muted: BTreeMap<usize, bool>,
    soloed: BTreeMap<usize, bool>,
    column_muted: BTreeMap<(usize, usize), bool>,
    column_soloed: BTreeMap<(usize, usize), bool>,
}

impl MixState {
    fn track_muted(&self, track: usize) -> bool {
        self.muted.get(&track).copied().unwrap_or(false)
    }

    fn track_soloed(&self, track: usize) -> bool {
        self.soloed.get(&track).copied().unwrap_or(false)
    }

    fn any_solo(&self) -> bool {
        self.soloed.values().any(|soloed| *soloed)
            || self.column_soloed.values().any(|soloed| *soloed)
    }

    fn should_play(&self, track: usize, column: usize) -> bool {
        let muted = self.track_muted(track) || self.column_muted(track, column);
        if self.any_solo() {
            let soloed = self.track_soloed(track)
                || self
                    .column_soloed
                    .get(&(track, column))
                    .copied()
                    .unwrap_or(false);
            soloed && !muted
        } else {
            !muted
        }
    }

    fn column_muted(&self, track: usize, column: usize) -> bool {
        self.column_muted
            .get(&(track, column))
            .copied()
            .unwrap_or(false)
    }

    /// A track is audible when at least one of its items would play: under
    /// solo that means the track itself or one of its unmuted columns is
    /// soloed.
    fn track_audible(&self, track: usize) -> bool {
        if self.track_muted(track) {
            return false;
        }
        if !self.any_solo() || self.track_soloed(track) {
            return true;
        }
        self.column_soloed
            .iter()
            .any(|(&(owner, column), &soloed)| {
                owner == track && soloed && !self.column_muted(owner, column)
            })
    }
}

/// Live mute/solo state shared between the session and both consumers.
#[derive(Debug, Default)]
pub struct Mixer {
    state: RwLock<MixState>,
    track_count: usize,
    observers: Mutex<Vec<Sender<MixerEvent>>>,
}

impl Mixer {
    #[must_use]
    pub fn new(track_count: usize) -> Self {
        Self {
            track_count,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> Receiver<MixerEvent> {
        let (sender, receiver) = unbounded();
        self.observers.lock().push(sender);
        receiver
    }

    #[must_use]
    pub fn is_muted(&self, track: usize) -> bool {
        self.state.read().track_muted(track)
    }

    #[must_use]
    pub fn is_soloed(&self, track: usize) -> bool {
        self.state.read().track_soloed(track)
    }

    #[must_use]
    pub fn any_solo(&self) -> bool {
        self.state.read().any_solo()
    }

    #[must_use]
    pub fn is_track_audible(&self, track: usize) -> bool {
        self.state.read().track_audible(track)
    }

    #[instrument(skip(self))]
    pub fn set_muted(&self, track: usize, muted: bool) {
        self.state.write().muted.insert(track, muted);
        self.broadcast(track);
    }

    #[instrument(skip(self))]
    pub fn set_soloed(&self, track: usize, soloed: bool) {
        self.state.write().soloed.insert(track, soloed);
        self.broadcast(track);
    }

    pub fn toggle_mute(&self, track: usize) -> bool {
        let muted = !self.is_muted(track);
        self.set_muted(track, muted);
        muted
    }

    pub fn toggle_solo(&self, track: usize) -> bool {
        let soloed = !self.is_soloed(track);
        self.set_soloed(track, soloed);
        soloed
    }

    #[instrument(skip(self))]
    pub fn set_column_muted(&self, track: usize, column: usize, muted: bool) {
        self.state.write().column_muted.insert((track, column), muted);
        self.broadcast(track);
    }

    #[instrument(skip(self))]
    pub fn set_column_soloed(&self, track: usize, column: usize, soloed: bool) {
        self.state
            .write()
            .column_soloed
            .insert((track, column), soloed);
        self.broadcast(track);
    }

    // Solo membership changes the audibility of every other track, so the
    // resulting state of all tracks goes out, not just the toggled one.
    fn broadcast(&self, toggled: usize) {
        let state = self.state.read().clone();
        let track_count = self.track_count.max(toggled + 1);

        let mut observers = self.observers.lock();
        if observers.is_empty() {
            return;
        }

        let mut events = Vec::with_capacity(track_count * 3);
        for track in 0..track_count {
            events.push(MixerEvent::TrackMuted {
                track,
                muted: state.track_muted(track),
            });
            events.push(MixerEvent::TrackSoloed {
                track,
                soloed: state.track_soloed(track),
            });
            events.push(MixerEvent::TrackAudible {
                track,
                audible: state.track_audible(track),
            });
        }

        observers.retain(|observer| events.iter().all(|event| observer.send(*event).is_ok()));
        debug!(
            toggled,
            track_count,
            observers = observers.len(),
            "mixer state broadcast"
        );
    }
}

impl Gate for Mixer {
    fn should_play(&self, track: usize, column: usize) -> bool {
        self.state.read().should_play(track, column)
    }
}

/// Gate that lets everything through.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenGate;

impl Gate for OpenGate {
    fn should_play(&self, _track: usize, _column: usize) -> bool {
        true
    }
}
