use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::animation::Animation;

const FINGERPRINT_SCHEMA_VERSION: u32 = 1;

/// Digest of a generated animation, used to check that regeneration with the
/// same seed reproduces it exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnimationFingerprint {
    pub schema_version: u32,
    pub frame_count: usize,
    pub element_count: usize,
    pub hash: String,
}

#[instrument(skip(animation))]
pub fn fingerprint_animation(animation: &Animation) -> AnimationFingerprint {
    let mut hasher = Sha256::new();
    let mut element_count = 0_usize;

    match animation {
        Animation::Particles(particles) => {
            for (tick, frame) in particles.frames() {
                hasher.update(tick.to_le_bytes());
                hasher.update((frame.len() as u64).to_le_bytes());
                for particle in frame {
                    for value in [particle.x, particle.y, particle.radius] {
                        hasher.update(quantize(value).to_le_bytes());
                    }
                    hasher.update([particle.role as u8, particle.pitch]);
                }
                element_count += frame.len();
            }
        }
        Animation::Bars(bars) => {
            let Some(clock) = bars.clock() else {
                return finish(hasher, 0, 0);
            };
            let mut tick = clock.min_tick;
            while let Some(frame) = bars.frame(tick) {
                hasher.update(tick.to_le_bytes());
                for level in &frame.levels {
                    hasher.update(quantize(*level).to_le_bytes());
                }
                element_count += frame.levels.iter().filter(|level| **level > 0.0).count();
                tick += 1;
            }
        }
    }

    finish(hasher, animation.frame_count(), element_count)
}

fn finish(hasher: Sha256, frame_count: usize, element_count: usize) -> AnimationFingerprint {
    AnimationFingerprint {
        schema_version: FINGERPRINT_SCHEMA_VERSION,
        frame_count,
        element_count,
        hash: format!("{:x}", hasher.finalize()),
    }
}

fn quantize(value: f32) -> i32 {
    (value * 1_000.0).round() as i32
}

pub fn read_fingerprint(path: &Path) -> Result<AnimationFingerprint> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read fingerprint: {}", path.display()))?;
    let report: AnimationFingerprint =
        serde_json::from_slice(&bytes).context("failed to parse fingerprint json")?;
    Ok(report)
}

pub fn write_fingerprint(path: &Path, report: &AnimationFingerprint) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create fingerprint directory: {}", parent.display())
        })?;
    }

    let json =
        serde_json::to_vec_pretty(report).context("failed to encode fingerprint json")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write fingerprint: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        animation::AnimationKind,
        fixtures::demo_song,
        mixer::OpenGate,
        render::{VideoConfig, build_animation},
    };

    fn demo_animation(style: AnimationKind) -> Animation {
        let song = demo_song();
        let colors = song.track_colors();
        let config = VideoConfig {
            width: 320,
            height: 180,
            style,
            seed: 9,
            ..VideoConfig::default()
        };
        let (_, animation) =
            build_animation(&song, &colors, &config, &OpenGate).expect("demo song animates");
        animation
    }

    #[test]
    fn report_survives_a_write_read_cycle() {
        let temp = tempfile::tempdir().expect("tempdir should be creatable");
        let path = temp.path().join("reports/demo.fingerprint.json");
        let report = fingerprint_animation(&demo_animation(AnimationKind::Particles));

        write_fingerprint(&path, &report).expect("report should write");
        assert_eq!(read_fingerprint(&path).expect("report should read"), report);
        assert_eq!(report.schema_version, FINGERPRINT_SCHEMA_VERSION);
        assert_eq!(report.hash.len(), 64);
    }

    #[test]
    fn styles_hash_differently() {
        let particles = fingerprint_animation(&demo_animation(AnimationKind::Particles));
        let bars = fingerprint_animation(&demo_animation(AnimationKind::Bars));

        assert_eq!(particles.frame_count, bars.frame_count);
        assert!(bars.element_count > 0);
        assert_ne!(particles.hash, bars.hash);
    }
}
