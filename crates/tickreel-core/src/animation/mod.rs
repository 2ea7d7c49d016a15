//! Precomputed, tick-indexed visual state for offline rendering.
//!
//! Generation walks the timeline once, strictly in tick order, because every
//! frame is derived from the one before it. Rasterization afterwards only
//! reads the finished frames, so any video frame can be drawn independently.

pub mod bars;
pub mod particles;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::{
    mixer::Gate,
    model::Composition,
    raster::parse_hex_color,
    time::{Tick, Timing},
    timeline::Timeline,
};

pub use bars::{BarAnimation, BarFrame};
pub use particles::{AGE_LIMIT, Particle, ParticleAnimation, ParticleRole};

pub const KEY_COUNT: usize = 88;
const LOWEST_KEY_PITCH: u8 = 21;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnimationKind {
    #[default]
    Particles,
    Bars,
}

/// Resolved track (and optional column) whose notes trigger a full-screen flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashSelector {
    pub track: usize,
    pub column: Option<usize>,
}

impl FlashSelector {
    #[must_use]
    pub fn matches(&self, track: usize, column: usize) -> bool {
        self.track == track && self.column.is_none_or(|wanted| wanted == column)
    }
}

/// Everything a style needs to lay out and time its frames.
#[derive(Debug, Clone)]
pub struct Stage {
    pub width: u32,
    pub height: u32,
    pub timing: Timing,
    pub lead_in_ms: f64,
    pub track_positions: Vec<f32>,
    pub track_colors: Vec<[u8; 3]>,
    pub flash: Option<FlashSelector>,
    pub seed: u64,
}

impl Stage {
    #[must_use]
    pub fn for_composition(
        composition: &impl Composition,
        track_colors: &[String],
        width: u32,
        height: u32,
        lead_in_ms: f64,
    ) -> Self {
        let track_count = composition.track_count();
        let track_positions = (0..track_count)
            .map(|index| {
                composition
                    .track_position_by_index(index)
                    .unwrap_or((index as f32 + 0.5) / track_count.max(1) as f32)
            })
            .collect();
        let track_colors = (0..track_count)
            .map(|index| {
                track_colors
                    .get(index)
                    .and_then(|color| parse_hex_color(color))
                    .unwrap_or_else(|| palette_color(index))
            })
            .collect();

        Self {
            width,
            height,
            timing: composition.timing(),
            lead_in_ms,
            track_positions,
            track_colors,
            flash: None,
            seed: 0,
        }
    }

    #[must_use]
    pub fn track_color(&self, track: usize) -> [u8; 3] {
        self.track_colors
            .get(track)
            .copied()
            .unwrap_or_else(|| palette_color(track))
    }

    #[must_use]
    pub fn track_position(&self, track: usize) -> f32 {
        self.track_positions.get(track).copied().unwrap_or(0.5)
    }

    /// Horizontal position of a keyboard index, leaving a margin at both edges.
    #[must_use]
    pub fn key_x(&self, key: usize) -> f32 {
        let width = self.width as f32;
        let margin = width * 0.05;
        margin + (key as f32 / (KEY_COUNT - 1) as f32) * (width - 2.0 * margin)
    }
}

/// Maps a MIDI pitch onto the 88-key keyboard, clamping outliers to the ends.
#[must_use]
pub fn key_index(pitch: u8) -> usize {
    usize::from(pitch.saturating_sub(LOWEST_KEY_PITCH)).min(KEY_COUNT - 1)
}

#[must_use]
pub fn palette_color(index: usize) -> [u8; 3] {
    const PALETTE: [[u8; 3]; 8] = [
        [0x00, 0xd1, 0xb2],
        [0xf7, 0x7f, 0x00],
        [0x52, 0x8b, 0xff],
        [0xff, 0x4f, 0x8b],
        [0xc3, 0xe8, 0x4a],
        [0xb0, 0x6c, 0xff],
        [0xff, 0xd1, 0x66],
        [0x4f, 0xd6, 0xff],
    ];
    PALETTE[index % PALETTE.len()]
}

/// Converts elapsed video time into the timeline tick it shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    pub min_tick: Tick,
    pub tick_ms: f64,
    pub lead_in_ms: f64,
}

impl FrameClock {
    #[must_use]
    pub fn tick_at(&self, elapsed_ms: f64) -> Option<Tick> {
        let content_ms = elapsed_ms - self.lead_in_ms;
        if content_ms < 0.0 || self.tick_ms <= 0.0 {
            return None;
        }
        Some(self.min_tick + (content_ms / self.tick_ms).floor() as Tick)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Drawn(Tick),
    LeadIn,
    Missing(Tick),
}

/// Animation style chosen once at configuration time.
#[derive(Debug, Clone)]
pub enum Animation {
    Particles(ParticleAnimation),
    Bars(BarAnimation),
}

impl Animation {
    #[must_use]
    pub fn new(kind: AnimationKind, stage: Stage) -> Self {
        match kind {
            AnimationKind::Particles => Self::Particles(ParticleAnimation::new(stage)),
            AnimationKind::Bars => Self::Bars(BarAnimation::new(stage)),
        }
    }

    pub fn generate_frames(&mut self, timeline: &Timeline, gate: &dyn Gate) {
        match self {
            Self::Particles(animation) => animation.generate_frames(timeline, gate),
            Self::Bars(animation) => animation.generate_frames(timeline, gate),
        }
    }

    pub fn render_frame(
        &self,
        target: &mut RgbaImage,
        frame_index: u64,
        elapsed_ms: f64,
    ) -> FrameOutcome {
        match self {
            Self::Particles(animation) => animation.render_frame(target, frame_index, elapsed_ms),
            Self::Bars(animation) => animation.render_frame(target, frame_index, elapsed_ms),
        }
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        match self {
            Self::Particles(animation) => animation.frame_count(),
            Self::Bars(animation) => animation.frame_count(),
        }
    }

    #[must_use]
    pub fn stage(&self) -> &Stage {
        match self {
            Self::Particles(animation) => animation.stage(),
            Self::Bars(animation) => animation.stage(),
        }
    }

    #[must_use]
    pub fn clock(&self) -> Option<FrameClock> {
        match self {
            Self::Particles(animation) => animation.clock(),
            Self::Bars(animation) => animation.clock(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_index_clamps_to_keyboard() {
        assert_eq!(key_index(21), 0);
        assert_eq!(key_index(60), 39);
        assert_eq!(key_index(108), 87);
        assert_eq!(key_index(0), 0);
        assert_eq!(key_index(127), 87);
    }

    #[test]
    fn clock_floors_into_ticks_after_lead_in() {
        let clock = FrameClock {
            min_tick: 10,
            tick_ms: 20.0,
            lead_in_ms: 500.0,
        };
        assert_eq!(clock.tick_at(499.0), None);
        assert_eq!(clock.tick_at(500.0), Some(10));
        assert_eq!(clock.tick_at(539.9), Some(11));
        assert_eq!(clock.tick_at(540.0), Some(12));
    }

    #[test]
    fn flash_selector_column_is_optional() {
        let any_column = FlashSelector {
            track: 2,
            column: None,
        };
        let one_column = FlashSelector {
            track: 2,
            column: Some(1),
        };
        assert!(any_column.matches(2, 5));
        assert!(!any_column.matches(1, 0));
        assert!(one_column.matches(2, 1));
        assert!(!one_column.matches(2, 0));
    }
}
