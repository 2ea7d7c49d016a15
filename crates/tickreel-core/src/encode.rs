use std::{
    ffi::OsString,
    path::Path,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{audio::DEFAULT_SAMPLE_RATE, render::RenderError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncoderConfig {
    pub ffmpeg_binary: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub pixel_format: String,
    pub audio_bitrate: String,
    pub audio_sample_rate: u32,
    /// Kill the encoder after this many seconds. `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_binary: "ffmpeg".to_string(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            pixel_format: "yuv420p".to_string(),
            audio_bitrate: "320k".to_string(),
            audio_sample_rate: DEFAULT_SAMPLE_RATE,
            timeout_secs: None,
        }
    }
}

#[must_use]
pub fn encoder_args(
    config: &EncoderConfig,
    frame_pattern: &Path,
    fps: u32,
    audio_path: &Path,
    output_path: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-hide_banner", "-loglevel", "error", "-framerate"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(fps.to_string().into());
    args.push("-i".into());
    args.push(frame_pattern.as_os_str().to_owned());
    args.push("-i".into());
    args.push(audio_path.as_os_str().to_owned());
    for (flag, value) in [
        ("-c:v", config.video_codec.as_str()),
        ("-pix_fmt", config.pixel_format.as_str()),
        ("-c:a", config.audio_codec.as_str()),
        ("-b:a", config.audio_bitrate.as_str()),
    ] {
        args.push(flag.into());
        args.push(value.into());
    }
    args.push("-ar".into());
    args.push(config.audio_sample_rate.to_string().into());
    args.push(output_path.as_os_str().to_owned());
    args
}

#[instrument(skip(config), fields(ffmpeg = %config.ffmpeg_binary, output = %output_path.display()))]
pub fn encode_video(
    config: &EncoderConfig,
    frame_pattern: &Path,
    fps: u32,
    audio_path: &Path,
    output_path: &Path,
) -> Result<(), RenderError> {
    let args = encoder_args(config, frame_pattern, fps, audio_path, output_path);
    let mut child = Command::new(&config.ffmpeg_binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn()
        .map_err(|error| {
            RenderError::Encoder(format!(
                "failed to spawn {}: {error}",
                config.ffmpeg_binary
            ))
        })?;

    let status = match config.timeout_secs {
        None => child
            .wait()
            .map_err(|error| RenderError::Encoder(format!("failed to wait for encoder: {error}")))?,
        Some(timeout_secs) => {
            let deadline = Instant::now() + Duration::from_secs(timeout_secs);
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => break status,
                    Ok(None) if Instant::now() >= deadline => {
                        warn!(timeout_secs, "encoder timed out; killing");
                        if let Err(error) = child.kill() {
                            warn!(%error, "failed to kill encoder");
                        }
                        let _ = child.wait();
                        return Err(RenderError::EncoderTimeout(timeout_secs));
                    }
                    Ok(None) => thread::sleep(POLL_INTERVAL),
                    Err(error) => {
                        return Err(RenderError::Encoder(format!(
                            "failed to poll encoder: {error}"
                        )));
                    }
                }
            }
        }
    };

    if !status.success() {
        return Err(RenderError::Encoder(format!(
            "{} exited with status {status}",
            config.ffmpeg_binary
        )));
    }

    info!("video encode completed");
    Ok(())
}
