use std::time::Duration;

use serde::{Deserialize, Serialize};

pub type Tick = u64;

/// Tempo parameters of a song. All three fields must be positive; callers
/// validate before handing a `Timing` to the scheduler or the renderer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timing {
    pub bpm: u32,
    pub lines_per_beat: u32,
    pub ticks_per_line: u32,
}

impl Timing {
    #[must_use]
    pub const fn new(bpm: u32, lines_per_beat: u32, ticks_per_line: u32) -> Self {
        Self {
            bpm,
            lines_per_beat,
            ticks_per_line,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.bpm > 0 && self.lines_per_beat > 0 && self.ticks_per_line > 0
    }

    #[must_use]
    pub fn ticks_per_beat(&self) -> u64 {
        u64::from(self.lines_per_beat) * u64::from(self.ticks_per_line)
    }

    /// Zero for degenerate timings.
    #[must_use]
    pub fn tick_seconds(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        60.0 / (f64::from(self.bpm) * self.ticks_per_beat() as f64)
    }

    #[must_use]
    pub fn tick_millis(&self) -> f64 {
        self.tick_seconds() * 1_000.0
    }

    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(self.tick_seconds())
    }

    #[must_use]
    pub fn line_of(&self, tick: Tick) -> u64 {
        tick / u64::from(self.ticks_per_line.max(1))
    }
}

#[must_use]
pub fn ticks_to_seconds(ticks: u64, timing: &Timing) -> f64 {
    if !timing.is_valid() {
        return 0.0;
    }

    ticks as f64 * timing.tick_seconds()
}

#[must_use]
pub fn seconds_to_ticks(seconds: f64, timing: &Timing) -> u64 {
    if seconds <= 0.0 || !timing.is_valid() {
        return 0;
    }

    (seconds / timing.tick_seconds()).round() as u64
}

#[must_use]
pub fn ticks_to_samples(ticks: u64, timing: &Timing, sample_rate: u32) -> u64 {
    let seconds = ticks_to_seconds(ticks, timing);
    (seconds * f64::from(sample_rate)).round() as u64
}

/// Rescales a position expressed at `ppq` ticks per quarter note onto the
/// grid resolution of `timing`.
#[must_use]
pub fn rescale_ppq_ticks(ticks: u64, ppq: u16, timing: &Timing) -> u64 {
    if ppq == 0 {
        return 0;
    }

    let scale = timing.ticks_per_beat() as f64 / f64::from(ppq);
    (ticks as f64 * scale).round() as u64
}
