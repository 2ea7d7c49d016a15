use std::{collections::HashSet, sync::Arc, time::Duration};

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{
    mixer::{Gate, Mixer},
    model::{Composition, Instrument, Song},
    scheduler::{
        DEFAULT_NOTIFICATION_CAPACITY, NoteEmitter, PlaybackState, Scheduler, SchedulerError,
        SchedulerEvent,
    },
    time::Tick,
    timeline::Timeline,
};

/// Wraps the real output sink and remembers which notes are sounding so a
/// stop can silence them.
pub struct NoteTracker {
    inner: Arc<dyn NoteEmitter>,
    sounding: Mutex<HashSet<(Instrument, u8)>>,
}

impl NoteTracker {
    #[must_use]
    pub fn new(inner: Arc<dyn NoteEmitter>) -> Self {
        Self {
            inner,
            sounding: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn sounding_count(&self) -> usize {
        self.sounding.lock().len()
    }

    pub fn all_notes_off(&self) {
        let sounding: Vec<(Instrument, u8)> = self.sounding.lock().drain().collect();
        for (instrument, pitch) in &sounding {
            self.inner.stop_note(instrument, *pitch);
        }
        if !sounding.is_empty() {
            debug!(count = sounding.len(), "sounding notes released");
        }
    }
}

impl NoteEmitter for NoteTracker {
    fn play_note(&self, instrument: &Instrument, pitch: u8, velocity: u8) {
        self.sounding.lock().insert((instrument.clone(), pitch));
        self.inner.play_note(instrument, pitch, velocity);
    }

    fn stop_note(&self, instrument: &Instrument, pitch: u8) {
        self.sounding.lock().remove(&(instrument.clone(), pitch));
        self.inner.stop_note(instrument, pitch);
    }
}

/// Caller-side owner of the song, the live mixer and the playback thread.
pub struct Session {
    song: Song,
    mixer: Arc<Mixer>,
    tracker: Arc<NoteTracker>,
    scheduler: Scheduler,
    cursor_line: u64,
    stop_requested: bool,
}

impl Session {
    pub fn new(song: Song, emitter: Arc<dyn NoteEmitter>) -> anyhow::Result<Self> {
        Self::with_notification_capacity(song, emitter, DEFAULT_NOTIFICATION_CAPACITY)
    }

    pub fn with_notification_capacity(
        song: Song,
        emitter: Arc<dyn NoteEmitter>,
        notification_capacity: usize,
    ) -> anyhow::Result<Self> {
        let mixer = Arc::new(Mixer::new(song.track_count()));
        let tracker = Arc::new(NoteTracker::new(emitter));
        let scheduler = Scheduler::spawn_with_capacity(
            Arc::clone(&tracker) as Arc<dyn NoteEmitter>,
            Arc::clone(&mixer) as Arc<dyn Gate>,
            notification_capacity,
        )?;

        Ok(Self {
            song,
            mixer,
            tracker,
            scheduler,
            cursor_line: 0,
            stop_requested: false,
        })
    }

    #[must_use]
    pub fn song(&self) -> &Song {
        &self.song
    }

    #[must_use]
    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn is_looping(&self) -> bool {
        self.scheduler.is_looping()
    }

    pub fn set_looping(&self, looping: bool) {
        self.scheduler.set_is_looping(looping);
    }

    pub fn set_cursor_line(&mut self, line: u64) {
        self.cursor_line = line;
    }

    pub fn toggle_mute(&self, track: usize) -> bool {
        self.mixer.toggle_mute(track)
    }

    pub fn toggle_solo(&self, track: usize) -> bool {
        self.mixer.toggle_solo(track)
    }

    /// Builds the timeline for the next pass. Looping restricts it to the
    /// single line under the cursor.
    #[must_use]
    pub fn playback_timeline(&self) -> Timeline {
        if self.is_looping() {
            let ticks_per_line = Tick::from(self.song.ticks_per_line().max(1));
            let start = self.cursor_line * ticks_per_line;
            Timeline::window(&self.song, start, start + ticks_per_line - 1)
        } else {
            Timeline::from_composition(&self.song)
        }
    }

    #[instrument(skip(self), fields(song_id = %self.song.id, looping = self.is_looping()))]
    pub fn play(&mut self) -> Result<(), SchedulerError> {
        let timeline = Arc::new(self.playback_timeline());
        self.scheduler.initialize(timeline, self.song.timing())?;
        self.stop_requested = false;
        self.scheduler.play()?;
        info!("session playback requested");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn stop(&mut self) {
        self.stop_requested = true;
        self.scheduler.stop();
        self.tracker.all_notes_off();
    }

    /// Drains pending notifications in order, restarting the pass when
    /// looping and the song ended on its own.
    pub fn pump(&mut self) -> Vec<SchedulerEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.scheduler.events().try_recv() {
            self.on_event(event);
            drained.push(event);
        }
        drained
    }

    /// Waits for the next notification and applies the looping policy to it.
    pub fn next_event(&mut self, timeout: Duration) -> Option<SchedulerEvent> {
        let event = self.scheduler.events().recv_timeout(timeout).ok()?;
        self.on_event(event);
        Some(event)
    }

    /// Blocks until a non-looping pass ends or `timeout` passes without any
    /// notification.
    pub fn wait_until_ended(&mut self, timeout: Duration) -> Vec<SchedulerEvent> {
        let mut received = Vec::new();
        loop {
            match self.scheduler.events().recv_timeout(timeout) {
                Ok(event) => {
                    let restarted = self.on_event(event);
                    received.push(event);
                    if event == SchedulerEvent::SongEnded && !restarted {
                        return received;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!("timed out waiting for playback notifications");
                    return received;
                }
                Err(RecvTimeoutError::Disconnected) => return received,
            }
        }
    }

    fn on_event(&mut self, event: SchedulerEvent) -> bool {
        if event != SchedulerEvent::SongEnded {
            return false;
        }

        if self.is_looping()
            && !self.stop_requested
            && self.scheduler.state() == PlaybackState::Idle
        {
            // notes whose release lies outside the loop window would pile up
            self.tracker.all_notes_off();
            if let Err(error) = self.scheduler.play() {
                warn!(%error, "loop restart failed");
                return false;
            }
            debug!(line = self.cursor_line, "loop restarted");
            return true;
        }

        self.tracker.all_notes_off();
        false
    }
}
