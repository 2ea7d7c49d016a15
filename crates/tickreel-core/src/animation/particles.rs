use std::{collections::BTreeMap, ops::Range};

use image::RgbaImage;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, instrument, trace};

use super::{FrameClock, FrameOutcome, Stage, key_index};
use crate::{
    mixer::Gate,
    model::{NoteData, NoteKind},
    raster::fill_circle,
    time::Tick,
    timeline::Timeline,
};

/// Particles older than this many lines are dropped.
pub const AGE_LIMIT: f32 = 15.0;

const GRAVITY: f32 = 900.0;
const SPARKLE_LIFT: f32 = -120.0;
const SPARKLE_COUNT: usize = 5;
const SPARKLE_JITTER: f32 = 30.0;
const BOUNCE_DAMPING: f32 = 0.5;
const BOUNCE_JITTER: f32 = 40.0;
const FLOOR_RATIO: f32 = 0.92;
const MIN_VISIBLE_RADIUS: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticleRole {
    Note,
    Sparkle,
    Flash,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub ax: f32,
    pub ay: f32,
    pub radius: f32,
    /// Per-tick radius decay factor.
    pub a: f32,
    /// Age in lines.
    pub t: f32,
    pub role: ParticleRole,
    pub pitch: u8,
    pub track: usize,
    /// Drawn with a soft edge; no effect on physics.
    pub glow: bool,
}

impl Particle {
    fn integrate(&mut self, dt: f32, age_step: f32, floor_y: f32, rng: &mut StdRng) {
        self.radius *= self.a;
        self.vx += self.ax * dt;
        self.vy += self.ay * dt;
        self.x += self.vx * dt;
        self.y += self.vy * dt;
        self.t += age_step;

        if self.role != ParticleRole::Flash && self.y > floor_y && self.vy > 0.0 {
            self.y = floor_y;
            self.vy = -self.vy * BOUNCE_DAMPING;
            self.vx += rng.random_range(-BOUNCE_JITTER..=BOUNCE_JITTER);
        }
    }
}

/// Free-floating particle field. Every tick's frame is a contiguous slice of
/// one arena; advancing appends the survivors of the previous slice.
#[derive(Debug, Clone)]
pub struct ParticleAnimation {
    stage: Stage,
    arena: Vec<Particle>,
    frames: BTreeMap<Tick, Range<usize>>,
}

impl ParticleAnimation {
    #[must_use]
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            arena: Vec::new(),
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
    pub fn frame(&self, tick: Tick) -> Option<&[Particle]> {
        self.frames
            .get(&tick)
            .map(|range| &self.arena[range.clone()])
    }

    pub fn frames(&self) -> impl Iterator<Item = (Tick, &[Particle])> {
        self.frames
            .iter()
            .map(|(tick, range)| (*tick, &self.arena[range.clone()]))
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
        self.arena.clear();
        self.frames.clear();
        let Some((min_tick, max_tick)) = timeline.bounds() else {
            debug!("empty timeline; no particle frames");
            return;
        };

        let mut rng = StdRng::seed_from_u64(self.stage.seed);
        let dt = self.stage.timing.tick_seconds() as f32;
        let age_step = 1.0 / self.stage.timing.ticks_per_line.max(1) as f32;
        let floor_y = self.stage.height as f32 * FLOOR_RATIO;
        let mut previous = 0..0;

        for tick in min_tick..=max_tick {
            let start = self.arena.len();
            for index in previous.clone() {
                let mut particle = self.arena[index];
                particle.integrate(dt, age_step, floor_y, &mut rng);
                if particle.t <= AGE_LIMIT {
                    self.arena.push(particle);
                }
            }

            for event in timeline.events_at(tick) {
                let Some(note) = event.note else {
                    continue;
                };
                if note.kind != NoteKind::NoteOn || !gate.should_play(note.track, note.column) {
                    continue;
                }
                self.spawn_note(&note, &mut rng);
            }

            let frame = start..self.arena.len();
            trace!(tick, particles = frame.len(), "particle frame");
            self.frames.insert(tick, frame.clone());
            previous = frame;
        }

        debug!(
            frames = self.frames.len(),
            arena = self.arena.len(),
            "particle frames generated"
        );
    }

    fn spawn_note(&mut self, note: &NoteData, rng: &mut StdRng) {
        let x = self.stage.key_x(key_index(note.pitch));
        let y = self.stage.track_position(note.track) * self.stage.height as f32;
        let strength = f32::from(note.velocity.min(127)) / 127.0;
        let base = Particle {
            x,
            y,
            vx: 0.0,
            vy: -(150.0 + 250.0 * strength),
            ax: 0.0,
            ay: GRAVITY,
            radius: 8.0 + 16.0 * strength,
            a: 0.85,
            t: 0.0,
            role: ParticleRole::Note,
            pitch: note.pitch,
            track: note.track,
            glow: false,
        };

        self.arena.push(base);
        self.arena.push(Particle {
            radius: 6.0 + 6.0 * strength,
            a: 0.985,
            glow: true,
            ..base
        });

        for _ in 0..SPARKLE_COUNT {
            self.arena.push(Particle {
                vx: rng.random_range(-SPARKLE_JITTER..=SPARKLE_JITTER),
                vy: -60.0,
                ay: SPARKLE_LIFT,
                radius: 3.0,
                a: 0.95,
                role: ParticleRole::Sparkle,
                ..base
            });
        }

        if self
            .stage
            .flash
            .is_some_and(|flash| flash.matches(note.track, note.column))
        {
            let width = self.stage.width as f32;
            let height = self.stage.height as f32;
            self.arena.push(Particle {
                x: width / 2.0,
                y: height / 2.0,
                vy: 0.0,
                ay: 0.0,
                radius: width.hypot(height),
                a: 0.8,
                role: ParticleRole::Flash,
                ..base
            });
        }
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
        let Some(particles) = self.frame(tick) else {
            return FrameOutcome::Missing(tick);
        };

        for particle in particles {
            if particle.radius < MIN_VISIBLE_RADIUS {
                continue;
            }
            let fade = (1.0 - particle.t / AGE_LIMIT).clamp(0.0, 1.0);
            match particle.role {
                ParticleRole::Flash => fill_circle(
                    target,
                    particle.x,
                    particle.y,
                    particle.radius,
                    [255, 255, 255],
                    0.35 * fade,
                    true,
                ),
                ParticleRole::Sparkle => fill_circle(
                    target,
                    particle.x,
                    particle.y,
                    particle.radius,
                    [255, 255, 255],
                    0.9 * fade,
                    false,
                ),
                ParticleRole::Note => fill_circle(
                    target,
                    particle.x,
                    particle.y,
                    particle.radius,
                    self.stage.track_color(particle.track),
                    if particle.glow { 0.6 * fade } else { fade },
                    particle.glow,
                ),
            }
        }

        trace!(frame_index, tick, particles = particles.len(), "particle frame drawn");
        FrameOutcome::Drawn(tick)
    }
}
