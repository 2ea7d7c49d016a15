//! End-to-end render: animation pre-pass, frame files, audio, encode.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::{info, instrument};

use crate::{
    animation::Animation,
    audio::export_wav,
    encode::{EncoderConfig, encode_video},
    mixer::Gate,
    model::Song,
    render::{
        Overlays, RenderError, RenderPlan, RenderSummary, VideoConfig, build_animation,
        render_frames,
    },
    timeline::Timeline,
};

/// Inputs of one render run. `audio` is synthesized from the song when
/// absent; `frames_dir` defaults to a scratch directory removed afterwards.
#[derive(Debug, Clone, Copy)]
pub struct VideoJob<'a> {
    pub song: &'a Song,
    pub output: &'a Path,
    pub audio: Option<&'a Path>,
    pub frames_dir: Option<&'a Path>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoReport {
    pub frames: RenderSummary,
    pub output: PathBuf,
    pub generated_audio: bool,
}

struct Prepared {
    timeline: Timeline,
    animation: Animation,
    overlays: Overlays,
    plan: RenderPlan,
}

fn prepare(song: &Song, video: &VideoConfig, gate: &dyn Gate) -> Result<Prepared, RenderError> {
    let (timeline, animation) = build_animation(song, &song.track_colors(), video, gate)?;
    let overlays = Overlays::prepare(video, animation.stage())?;
    let plan = RenderPlan::new(video, &timeline, &song.timing);
    Ok(Prepared {
        timeline,
        animation,
        overlays,
        plan,
    })
}

#[instrument(skip_all, fields(song_id = %job.song.id, output = %job.output.display()))]
pub fn render_video(
    job: &VideoJob<'_>,
    video: &VideoConfig,
    encoder: &EncoderConfig,
    gate: &dyn Gate,
) -> Result<VideoReport, RenderError> {
    if let Some(audio) = job.audio
        && !audio.is_file()
    {
        return Err(RenderError::MissingInput(audio.to_path_buf()));
    }

    let prepared = prepare(job.song, video, gate)?;
    let scratch = TempDir::new().map_err(|error| RenderError::Io(error.to_string()))?;
    let frames_dir = job
        .frames_dir
        .map_or_else(|| scratch.path().join("frames"), Path::to_path_buf);

    let frames = render_frames(
        &prepared.plan,
        &prepared.animation,
        &prepared.overlays,
        video,
        &frames_dir,
    )?;

    let (audio_path, generated_audio) = match job.audio {
        Some(audio) => (audio.to_path_buf(), false),
        None => {
            let path = scratch.path().join("audio.wav");
            export_wav(
                &prepared.timeline,
                &job.song.timing,
                gate,
                encoder.audio_sample_rate,
                prepared.plan.lead_in_ms / 1_000.0,
                &path,
            )?;
            (path, true)
        }
    };

    if let Some(parent) = job.output.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|error| RenderError::Io(format!("{}: {error}", parent.display())))?;
    }

    encode_video(
        encoder,
        &video.frame_pattern(&frames_dir),
        video.fps,
        &audio_path,
        job.output,
    )?;

    info!(
        frames = frames.frames_written,
        generated_audio, "video render completed"
    );
    Ok(VideoReport {
        frames,
        output: job.output.to_path_buf(),
        generated_audio,
    })
}

/// Writes the frame files only, skipping audio and the encoder.
#[instrument(skip_all, fields(song_id = %song.id, dir = %frames_dir.display()))]
pub fn render_frame_sequence(
    song: &Song,
    video: &VideoConfig,
    gate: &dyn Gate,
    frames_dir: &Path,
) -> Result<(Animation, RenderSummary), RenderError> {
    let prepared = prepare(song, video, gate)?;
    let summary = render_frames(
        &prepared.plan,
        &prepared.animation,
        &prepared.overlays,
        video,
        frames_dir,
    )?;
    Ok((prepared.animation, summary))
}
