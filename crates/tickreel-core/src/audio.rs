use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::{
    mixer::Gate,
    model::NoteKind,
    time::{Tick, Timing, ticks_to_samples},
    timeline::Timeline,
};

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, Clone)]
struct RenderedNote {
    start_sample: usize,
    end_sample: usize,
    amplitude: f32,
    phase_increment: u32,
}

/// Pairs note-ons with their note-offs. Notes never released ring until one
/// line past the last tick.
fn collect_rendered_notes(
    timeline: &Timeline,
    timing: &Timing,
    gate: &dyn Gate,
    sample_rate: u32,
) -> Vec<RenderedNote> {
    let Some((min_tick, max_tick)) = timeline.bounds() else {
        return Vec::new();
    };
    let to_sample = |tick: Tick| ticks_to_samples(tick - min_tick, timing, sample_rate) as usize;

    let mut open: HashMap<(usize, usize, u8), (Tick, u8)> = HashMap::new();
    let mut notes = Vec::new();
    let mut close = |start: Tick, end: Tick, pitch: u8, velocity: u8| {
        let start_sample = to_sample(start);
        let end_sample = to_sample(end);
        if end_sample <= start_sample {
            warn!(pitch, start, end, "skipping zero-length note in renderer");
            return;
        }
        notes.push(RenderedNote {
            start_sample,
            end_sample,
            amplitude: (f32::from(velocity.min(127)) / 127.0) * 0.18,
            phase_increment: frequency_to_phase_increment(note_frequency_hz(pitch), sample_rate),
        });
    };

    for (tick, events) in timeline.iter() {
        for note in events.iter().filter_map(|event| event.note) {
            if !gate.should_play(note.track, note.column) {
                continue;
            }
            let key = (note.track, note.column, note.pitch);
            match note.kind {
                NoteKind::NoteOn => {
                    if let Some((start, velocity)) = open.insert(key, (tick, note.velocity)) {
                        close(start, tick, note.pitch, velocity);
                    }
                }
                NoteKind::NoteOff => {
                    if let Some((start, velocity)) = open.remove(&key) {
                        close(start, tick, note.pitch, velocity);
                    }
                }
            }
        }
    }

    let ring_out = max_tick + Tick::from(timing.ticks_per_line.max(1));
    for ((_, _, pitch), (start, velocity)) in open {
        close(start, ring_out, pitch, velocity);
    }
    notes
}

#[instrument(skip(timeline, gate), fields(events = timeline.event_count()))]
pub fn render_timeline_samples(
    timeline: &Timeline,
    timing: &Timing,
    gate: &dyn Gate,
    sample_rate: u32,
    tail_seconds: f64,
) -> Vec<f32> {
    let sample_rate = sample_rate.max(8_000);
    let span_ticks = timeline
        .bounds()
        .map_or(0, |(min_tick, max_tick)| max_tick - min_tick + 1);
    let end_samples = ticks_to_samples(span_ticks, timing, sample_rate);
    let tail_samples = (tail_seconds.max(0.0) * f64::from(sample_rate)).round() as u64;
    let frame_count = usize::try_from(end_samples.saturating_add(tail_samples))
        .unwrap_or(sample_rate as usize);

    let notes = collect_rendered_notes(timeline, timing, gate, sample_rate);
    let mut buffer = vec![0.0_f32; frame_count];
    for note in &notes {
        let mut phase = 0_u32;
        let end = note.end_sample.min(frame_count);
        for frame in &mut buffer[note.start_sample.min(end)..end] {
            *frame += triangle_osc(phase) * note.amplitude;
            phase = phase.wrapping_add(note.phase_increment);
        }
    }

    for frame in &mut buffer {
        *frame = frame.clamp(-1.0, 1.0);
    }

    debug!(
        frames = buffer.len(),
        rendered_notes = notes.len(),
        "audio render completed"
    );
    buffer
}

#[instrument(skip(timeline, gate), fields(path = %path.display()))]
pub fn export_wav(
    timeline: &Timeline,
    timing: &Timing,
    gate: &dyn Gate,
    sample_rate: u32,
    lead_in_seconds: f64,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create wav output directory: {}",
                parent.display()
            )
        })?;
    }

    let rendered = render_timeline_samples(timeline, timing, gate, sample_rate, 1.0);
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create wav file: {}", path.display()))?;

    let silence = (lead_in_seconds.max(0.0) * f64::from(sample_rate)).round() as usize;
    let samples = std::iter::repeat_n(0.0_f32, silence).chain(rendered);
    for sample in samples {
        let quantized = (sample * f32::from(i16::MAX)).round() as i16;
        writer
            .write_sample(quantized)
            .context("failed to write left channel sample")?;
        writer
            .write_sample(quantized)
            .context("failed to write right channel sample")?;
    }

    writer.finalize().context("failed to finalize wav file")?;
    info!("wav export completed");
    Ok(())
}

fn frequency_to_phase_increment(frequency_hz: f64, sample_rate: u32) -> u32 {
    let normalized = frequency_hz / f64::from(sample_rate.max(1));
    let increment = normalized * f64::from(u32::MAX);
    increment.clamp(1.0, f64::from(u32::MAX)) as u32
}

fn note_frequency_hz(pitch: u8) -> f64 {
    let semitone_offset = f64::from(i16::from(pitch) - 69);
    440.0 * 2_f64.powf(semitone_offset / 12.0)
}

fn triangle_osc(phase: u32) -> f32 {
    let phase_unit = phase as f32 / u32::MAX as f32;
    if phase_unit < 0.5 {
        (phase_unit * 4.0) - 1.0
    } else {
        3.0 - (phase_unit * 4.0)
    }
}
