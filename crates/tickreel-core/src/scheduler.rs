use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    mixer::Gate,
    model::{DEFAULT_BPM, DEFAULT_LINES_PER_BEAT, DEFAULT_TICKS_PER_LINE, Instrument, NoteKind},
    time::{Tick, Timing},
    timeline::Timeline,
};

pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 1_024;
const STATE_NOTIFY_TIMEOUT: Duration = Duration::from_millis(250);

/// Output sink for gated-audible notes.
pub trait NoteEmitter: Send + Sync {
    fn play_note(&self, instrument: &Instrument, pitch: u8, velocity: u8);
    fn stop_note(&self, instrument: &Instrument, pitch: u8);
}

/// Emitter that only logs. Used by the headless CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEmitter;

impl NoteEmitter for TracingEmitter {
    fn play_note(&self, instrument: &Instrument, pitch: u8, velocity: u8) {
        info!(instrument = %instrument.name, pitch, velocity, "note on");
    }

    fn stop_note(&self, instrument: &Instrument, pitch: u8) {
        info!(instrument = %instrument.name, pitch, "note off");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    TickAdvanced(Tick),
    PlayingChanged(bool),
    SongEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackState {
    Idle = 0,
    Initializing = 1,
    Playing = 2,
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Initializing,
            2 => Self::Playing,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("cannot initialize while playback is active")]
    AlreadyPlaying,
    #[error("playback thread is no longer running")]
    Disconnected,
}

enum Command {
    Initialize {
        timeline: Arc<Timeline>,
        timing: Timing,
    },
    Play,
    Shutdown,
}

/// Real-time playback driver. Owns one dedicated thread; control calls are
/// queued to it and notifications come back on a bounded FIFO channel.
pub struct Scheduler {
    commands: Sender<Command>,
    events: Receiver<SchedulerEvent>,
    state: Arc<AtomicU8>,
    playing: Arc<AtomicBool>,
    looping: AtomicBool,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn spawn(emitter: Arc<dyn NoteEmitter>, gate: Arc<dyn Gate>) -> anyhow::Result<Self> {
        Self::spawn_with_capacity(emitter, gate, DEFAULT_NOTIFICATION_CAPACITY)
    }

    pub fn spawn_with_capacity(
        emitter: Arc<dyn NoteEmitter>,
        gate: Arc<dyn Gate>,
        notification_capacity: usize,
    ) -> anyhow::Result<Self> {
        let (commands, command_rx) = unbounded();
        let (notify, events) = bounded(notification_capacity.max(1));
        let state = Arc::new(AtomicU8::new(PlaybackState::Idle as u8));
        let playing = Arc::new(AtomicBool::new(false));

        let mut worker = PlaybackWorker {
            emitter,
            gate,
            timeline: Arc::new(Timeline::default()),
            timing: Timing::new(DEFAULT_BPM, DEFAULT_LINES_PER_BEAT, DEFAULT_TICKS_PER_LINE),
            state: Arc::clone(&state),
            playing: Arc::clone(&playing),
            notify,
        };

        let handle = thread::Builder::new()
            .name("tickreel-playback".to_string())
            .spawn(move || worker.run(&command_rx))
            .context("failed to spawn playback thread")?;

        Ok(Self {
            commands,
            events,
            state,
            playing,
            looping: AtomicBool::new(false),
            worker: Some(handle),
        })
    }

    #[instrument(skip(self, timeline), fields(events = timeline.event_count()))]
    pub fn initialize(&self, timeline: Arc<Timeline>, timing: Timing) -> Result<(), SchedulerError> {
        if self.state() != PlaybackState::Idle {
            error!("initialize rejected: playback is active");
            return Err(SchedulerError::AlreadyPlaying);
        }

        self.commands
            .send(Command::Initialize { timeline, timing })
            .map_err(|_| SchedulerError::Disconnected)
    }

    #[instrument(skip(self))]
    pub fn play(&self) -> Result<(), SchedulerError> {
        if self
            .state
            .compare_exchange(
                PlaybackState::Idle as u8,
                PlaybackState::Initializing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            warn!("play ignored: playback already active");
            return Ok(());
        }

        self.playing.store(true, Ordering::Release);
        self.commands.send(Command::Play).map_err(|_| {
            self.playing.store(false, Ordering::Release);
            self.state
                .store(PlaybackState::Idle as u8, Ordering::Release);
            SchedulerError::Disconnected
        })
    }

    /// Clears the playing flag. The loop notices at its next tick; sounding
    /// notes are left to the caller.
    pub fn stop(&self) {
        if self.playing.swap(false, Ordering::AcqRel) {
            debug!("stop requested");
        }
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Acquire)
    }

    pub fn set_is_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Release);
    }

    #[must_use]
    pub fn events(&self) -> &Receiver<SchedulerEvent> {
        &self.events
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.playing.store(false, Ordering::Release);
        let _ = self.commands.send(Command::Shutdown);
        // unblock a worker parked on a full notification queue
        while self.events.try_recv().is_ok() {}
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            error!("playback thread panicked");
        }
    }
}

struct PlaybackWorker {
    emitter: Arc<dyn NoteEmitter>,
    gate: Arc<dyn Gate>,
    timeline: Arc<Timeline>,
    timing: Timing,
    state: Arc<AtomicU8>,
    playing: Arc<AtomicBool>,
    notify: Sender<SchedulerEvent>,
}

impl PlaybackWorker {
    fn run(&mut self, commands: &Receiver<Command>) {
        while let Ok(command) = commands.recv() {
            match command {
                Command::Initialize { timeline, timing } => {
                    debug!(
                        events = timeline.event_count(),
                        bpm = timing.bpm,
                        "playback timeline replaced"
                    );
                    self.timeline = timeline;
                    self.timing = timing;
                }
                Command::Play => self.play(),
                Command::Shutdown => break,
            }
        }
        debug!("playback thread exiting");
    }

    fn play(&self) {
        let Some((min_tick, max_tick)) = self.timeline.bounds() else {
            info!("empty timeline; song ended");
            self.finish_without_playing();
            return;
        };
        if !self.playing.load(Ordering::Acquire) {
            debug!("stopped before the first tick; song ended");
            self.finish_without_playing();
            return;
        }

        let tick_seconds = self.timing.tick_seconds();
        let start = Instant::now();
        self.set_state(PlaybackState::Playing);
        self.send_state(SchedulerEvent::PlayingChanged(true));
        info!(min_tick, max_tick, tick_seconds, "playback started");

        for tick in min_tick..=max_tick {
            // absolute deadlines keep sleep jitter from accumulating
            let deadline = start + Duration::from_secs_f64(tick_seconds * (tick - min_tick) as f64);
            sleep_until(deadline);

            if !self.playing.load(Ordering::Acquire) {
                debug!(tick, "playback stopped");
                break;
            }

            self.send_tick(tick);
            self.emit_tick(tick);
        }

        self.playing.store(false, Ordering::Release);
        self.set_state(PlaybackState::Idle);
        self.send_state(SchedulerEvent::PlayingChanged(false));
        self.send_state(SchedulerEvent::SongEnded);
        info!(elapsed_ms = start.elapsed().as_millis(), "playback finished");
    }

    fn finish_without_playing(&self) {
        self.playing.store(false, Ordering::Release);
        self.set_state(PlaybackState::Idle);
        self.send_state(SchedulerEvent::SongEnded);
    }

    fn emit_tick(&self, tick: Tick) {
        for event in self.timeline.events_at(tick) {
            let (Some(note), Some(instrument)) = (event.note, event.instrument.as_ref()) else {
                trace!(tick, "event without note data or instrument skipped");
                continue;
            };

            if !self.gate.should_play(note.track, note.column) {
                continue;
            }

            match note.kind {
                NoteKind::NoteOn => self
                    .emitter
                    .play_note(instrument, note.pitch, note.velocity),
                NoteKind::NoteOff => self.emitter.stop_note(instrument, note.pitch),
            }
        }
    }

    fn set_state(&self, state: PlaybackState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn send_tick(&self, tick: Tick) {
        match self.notify.try_send(SchedulerEvent::TickAdvanced(tick)) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => warn!(tick, "notification queue full; tick dropped"),
        }
    }

    fn send_state(&self, event: SchedulerEvent) {
        if self
            .notify
            .send_timeout(event, STATE_NOTIFY_TIMEOUT)
            .is_err()
        {
            warn!(?event, "state notification not delivered");
        }
    }
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mixer::OpenGate,
        model::{Event, NoteData},
    };

    #[derive(Default)]
    struct CountingEmitter {
        calls: parking_lot::Mutex<usize>,
    }

    impl NoteEmitter for CountingEmitter {
        fn play_note(&self, _instrument: &Instrument, _pitch: u8, _velocity: u8) {
            *self.calls.lock() += 1;
        }

        fn stop_note(&self, _instrument: &Instrument, _pitch: u8) {
            *self.calls.lock() += 1;
        }
    }

    fn worker(playing: bool) -> (PlaybackWorker, Arc<CountingEmitter>, Receiver<SchedulerEvent>) {
        let emitter = Arc::new(CountingEmitter::default());
        let (notify, events) = bounded(16);
        let keys = Instrument::new(0, "keys");
        let timeline = Timeline::from_events([
            Event::note(0, NoteData::on(60, 100, 0, 0), keys.clone()),
            Event::note(2, NoteData::off(60, 0, 0), keys),
        ]);
        let worker = PlaybackWorker {
            emitter: Arc::clone(&emitter) as Arc<dyn NoteEmitter>,
            gate: Arc::new(OpenGate),
            timeline: Arc::new(timeline),
            timing: Timing::new(600, 4, 6),
            state: Arc::new(AtomicU8::new(PlaybackState::Initializing as u8)),
            playing: Arc::new(AtomicBool::new(playing)),
            notify,
        };
        (worker, emitter, events)
    }

    #[test]
    fn stop_before_the_pass_starts_only_ends_the_song() {
        let (worker, emitter, events) = worker(false);
        worker.play();

        let received: Vec<SchedulerEvent> = events.try_iter().collect();
        assert_eq!(received, vec![SchedulerEvent::SongEnded]);
        assert_eq!(*emitter.calls.lock(), 0);
        assert_eq!(
            PlaybackState::from_u8(worker.state.load(Ordering::Acquire)),
            PlaybackState::Idle
        );
    }

    #[test]
    fn started_pass_reports_both_playing_transitions() {
        let (worker, emitter, events) = worker(true);
        worker.play();

        let received: Vec<SchedulerEvent> = events.try_iter().collect();
        assert_eq!(received.first(), Some(&SchedulerEvent::PlayingChanged(true)));
        assert_eq!(
            &received[received.len() - 2..],
            &[SchedulerEvent::PlayingChanged(false), SchedulerEvent::SongEnded]
        );
        assert_eq!(*emitter.calls.lock(), 2);
    }
}
