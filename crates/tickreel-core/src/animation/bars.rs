use std::collections::BTreeMap;

use image::RgbaImage;
use tracing::{debug, instrument, trace};

use super::{FrameClock, FrameOutcome, KEY_COUNT, Stage, key_index};
use crate::{mixer::Gate, model::NoteKind, raster::fill_rect, time::Tick, timeline::Timeline};

const RELEASE_DECAY: f32 = 0.88;
const HELD_DECAY: f32 = 0.995;
const MAX_BAR_HEIGHT_RATIO: f32 = 0.8;
const MIN_VISIBLE_LEVEL: f32 = 0.01;

/// One tick of the bar view: a level and owning track per key.
#[derive(Debug, Clone, PartialEq)]
pub struct BarFrame {
    pub levels: Vec<f32>,
    pub held: Vec<bool>,
    pub owners: Vec<usize>,
}

impl Default for BarFrame {
    fn default() -> Self {
        Self {
            levels: vec![0.0; KEY_COUNT],
            held: vec![false; KEY_COUNT],
            owners: vec![0; KEY_COUNT],
        }
    }
}

impl BarFrame {
    fn advance(&self) -> Self {
        let mut next = self.clone();
        for (level, held) in next.levels.iter_mut().zip(&next.held) {
            *level *= if *held { HELD_DECAY } else { RELEASE_DECAY };
            if *level < MIN_VISIBLE_LEVEL {
                *level = 0.0;
            }
        }
        next
    }
}

/// Keyboard bar chart: one column per key, height follows note velocity.
#[derive(Debug, Clone)]
pub struct BarAnimation {
    stage: Stage,
    frames: BTreeMap<Tick, BarFrame>,
}

impl BarAnimation {
    #[must_use]
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            frames: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn frame(&self, tick: Tick) -> Option<&BarFrame> {
        self.frames.get(&tick)
    }

    #[must_use]
    pub fn clock(&self) -> Option<FrameClock> {
        Some(FrameClock {
            min_tick: *self.frames.keys().next()?,
            tick_ms: self.stage.timing.tick_millis(),
            lead_in_ms: self.stage.lead_in_ms,
        })
    }

    #[instrument(skip_all, fields(events = timeline.event_count()))]
    pub fn generate_frames(&mut self, timeline: &Timeline, gate: &dyn Gate) {
        self.frames.clear();
        let Some((min_tick, max_tick)) = timeline.bounds() else {
            debug!("empty timeline; no bar frames");
            return;
        };

        let mut previous = BarFrame::default();
        for tick in min_tick..=max_tick {
            let mut frame = previous.advance();
            for event in timeline.events_at(tick) {
                let Some(note) = event.note else {
                    continue;
                };
                if !gate.should_play(note.track, note.column) {
                    continue;
                }
                let key = key_index(note.pitch);
                match note.kind {
                    NoteKind::NoteOn => {
                        frame.levels[key] = f32::from(note.velocity.min(127)) / 127.0;
                        frame.held[key] = true;
                        frame.owners[key] = note.track;
                    }
                    NoteKind::NoteOff => frame.held[key] = false,
                }
            }
            self.frames.insert(tick, frame.clone());
            previous = frame;
        }

        debug!(frames = self.frames.len(), "bar frames generated");
    }

    pub fn render_frame(
        &self,
        target: &mut RgbaImage,
        frame_index: u64,
        elapsed_ms: f64,
    ) -> FrameOutcome {
        let Some(tick) = self.clock().and_then(|clock| clock.tick_at(elapsed_ms)) else {
            return FrameOutcome::LeadIn;
        };
        let Some(frame) = self.frame(tick) else {
            return FrameOutcome::Missing(tick);
        };

        let height = self.stage.height as f32;
        let bar_width = (self.stage.key_x(1) - self.stage.key_x(0)).max(1.0);
        for (key, level) in frame.levels.iter().enumerate() {
            if *level <= 0.0 {
                continue;
            }
            let bar_height = level * height * MAX_BAR_HEIGHT_RATIO;
            fill_rect(
                target,
                self.stage.key_x(key) - bar_width / 2.0,
                height - bar_height,
                bar_width * 0.8,
                bar_height,
                self.stage.track_color(frame.owners[key]),
                0.85,
            );
        }

        trace!(frame_index, tick, "bar frame drawn");
        FrameOutcome::Drawn(tick)
    }
}
