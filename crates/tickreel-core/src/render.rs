//! Offline video rendering: frame planning, static overlays and the bounded
//! parallel frame writer.

use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    thread,
};

use crossbeam_channel::unbounded;
use fontdue::{Font, FontSettings};
use image::{RgbaImage, imageops::FilterType};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    animation::{Animation, AnimationKind, FlashSelector, FrameOutcome, Stage},
    mixer::Gate,
    model::Composition,
    raster::{draw_image, fill, fill_rect, parse_hex_color},
    time::Timing,
    timeline::Timeline,
};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown flash track: {0}")]
    UnknownTrack(String),
    #[error("unknown flash column '{column}' on track '{track}'")]
    UnknownColumn { track: String, column: String },
    #[error("missing input file: {0}")]
    MissingInput(PathBuf),
    #[error("invalid video config: {0}")]
    InvalidConfig(String),
    #[error("encoder failed: {0}")]
    Encoder(String),
    #[error("encoder timed out after {0}s")]
    EncoderTimeout(u64),
    #[error("io error: {0}")]
    Io(String),
}

impl From<anyhow::Error> for RenderError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(format!("{value:#}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub lead_in_ms: u64,
    pub lead_out_ms: u64,
    pub length_ms: Option<u64>,
    pub flash_track: Option<String>,
    pub flash_column: Option<String>,
    pub background_color: String,
    pub background_image: Option<PathBuf>,
    pub track_band_alpha: f32,
    pub logo: Option<PathBuf>,
    pub logo_fade_ms: f64,
    pub scroll_text: Option<String>,
    pub font: Option<PathBuf>,
    pub font_size: f32,
    /// Pixels per second.
    pub scroll_speed: f32,
    pub style: AnimationKind,
    pub seed: u64,
    pub workers: Option<usize>,
    pub frame_prefix: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1_280,
            height: 720,
            fps: 60,
            lead_in_ms: 1_000,
            lead_out_ms: 2_000,
            length_ms: None,
            flash_track: None,
            flash_column: None,
            background_color: "#101018".to_string(),
            background_image: None,
            track_band_alpha: 0.08,
            logo: None,
            logo_fade_ms: 1_500.0,
            scroll_text: None,
            font: None,
            font_size: 32.0,
            scroll_speed: 120.0,
            style: AnimationKind::Particles,
            seed: 0,
            workers: None,
            frame_prefix: "frame".to_string(),
        }
    }
}

impl VideoConfig {
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::InvalidConfig(
                "resolution must be non-zero".to_string(),
            ));
        }
        if self.fps == 0 {
            return Err(RenderError::InvalidConfig("fps must be non-zero".to_string()));
        }
        if self.flash_column.is_some() && self.flash_track.is_none() {
            return Err(RenderError::InvalidConfig(
                "flash_column requires flash_track".to_string(),
            ));
        }
        if self.scroll_text.is_some() && self.font.is_none() {
            return Err(RenderError::InvalidConfig(
                "scroll_text requires a font".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the configured flash track/column names against the song.
    pub fn resolve_flash(
        &self,
        composition: &impl Composition,
    ) -> Result<Option<FlashSelector>, RenderError> {
        let Some(track_name) = &self.flash_track else {
            return Ok(None);
        };
        let track = composition
            .track_by_name(track_name)
            .ok_or_else(|| RenderError::UnknownTrack(track_name.clone()))?;
        let column = match &self.flash_column {
            Some(column_name) => Some(composition.column_by_name(track, column_name).ok_or_else(
                || RenderError::UnknownColumn {
                    track: track_name.clone(),
                    column: column_name.clone(),
                },
            )?),
            None => None,
        };
        Ok(Some(FlashSelector { track, column }))
    }

    #[must_use]
    pub fn frame_file_name(&self, frame_index: u64) -> String {
        format!("{}{frame_index:06}.png", self.frame_prefix)
    }

    #[must_use]
    pub fn frame_pattern(&self, frames_dir: &Path) -> PathBuf {
        frames_dir.join(format!("{}%06d.png", self.frame_prefix))
    }
}

#[must_use]
pub fn frame_count(fps: u32, lead_in_ms: f64, content_ms: f64, lead_out_ms: f64) -> u64 {
    let total_ms = (lead_in_ms + content_ms + lead_out_ms).max(0.0);
    (f64::from(fps) * total_ms / 1_000.0).floor() as u64
}

#[must_use]
pub fn frame_elapsed_ms(frame_index: u64, fps: u32) -> f64 {
    frame_index as f64 * 1_000.0 / f64::from(fps.max(1))
}

/// Song length shown in the video, excluding lead-in/out.
#[must_use]
pub fn content_ms(config: &VideoConfig, timeline: &Timeline, timing: &Timing) -> f64 {
    if let Some(length_ms) = config.length_ms {
        return length_ms as f64;
    }
    timeline.bounds().map_or(0.0, |(min_tick, max_tick)| {
        (max_tick - min_tick + 1) as f64 * timing.tick_millis()
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPlan {
    pub fps: u32,
    pub lead_in_ms: f64,
    pub content_ms: f64,
    pub lead_out_ms: f64,
    pub total_frames: u64,
}

impl RenderPlan {
    #[must_use]
    pub fn new(config: &VideoConfig, timeline: &Timeline, timing: &Timing) -> Self {
        let lead_in_ms = config.lead_in_ms as f64;
        let lead_out_ms = config.lead_out_ms as f64;
        let content_ms = content_ms(config, timeline, timing);
        Self {
            fps: config.fps,
            lead_in_ms,
            content_ms,
            lead_out_ms,
            total_frames: frame_count(config.fps, lead_in_ms, content_ms, lead_out_ms),
        }
    }
}

struct ScrollText {
    strip: RgbaImage,
    speed: f32,
}

/// Static layers drawn around the animation on every frame.
pub struct Overlays {
    width: u32,
    height: u32,
    background_color: [u8; 3],
    background: Option<RgbaImage>,
    bands: Vec<(f32, [u8; 3])>,
    band_alpha: f32,
    logo: Option<RgbaImage>,
    logo_fade_ms: f64,
    text: Option<ScrollText>,
}

impl Overlays {
    /// Loads every configured input. Missing files fail here, before any
    /// frame work starts.
    #[instrument(skip_all, fields(width = config.width, height = config.height))]
    pub fn prepare(config: &VideoConfig, stage: &Stage) -> Result<Self, RenderError> {
        let background = config
            .background_image
            .as_deref()
            .map(|path| {
                load_image(path).map(|image| {
                    image::imageops::resize(&image, config.width, config.height, FilterType::Triangle)
                })
            })
            .transpose()?;

        let logo = config
            .logo
            .as_deref()
            .map(|path| {
                load_image(path).map(|image| {
                    let max_width = (config.width / 3).max(1);
                    if image.width() > max_width {
                        let scale = max_width as f32 / image.width() as f32;
                        let height = ((image.height() as f32 * scale).round() as u32).max(1);
                        image::imageops::resize(&image, max_width, height, FilterType::Triangle)
                    } else {
                        image
                    }
                })
            })
            .transpose()?;

        let text = match (&config.scroll_text, &config.font) {
            (Some(text), Some(font_path)) => Some(ScrollText {
                strip: rasterize_text(font_path, text, config.font_size)?,
                speed: config.scroll_speed,
            }),
            _ => None,
        };

        let bands = stage
            .track_positions
            .iter()
            .enumerate()
            .map(|(track, position)| (*position, stage.track_color(track)))
            .collect();

        Ok(Self {
            width: config.width,
            height: config.height,
            background_color: parse_hex_color(&config.background_color).unwrap_or([16, 16, 24]),
            background,
            bands,
            band_alpha: config.track_band_alpha,
            logo,
            logo_fade_ms: config.logo_fade_ms,
            text,
        })
    }

    fn draw_under(&self, target: &mut RgbaImage) {
        fill(target, self.background_color);
        if let Some(background) = &self.background {
            draw_image(target, background, 0, 0, 1.0);
        }

        if self.band_alpha > 0.0 && !self.bands.is_empty() {
            let band_height = self.height as f32 / self.bands.len() as f32;
            for (position, color) in &self.bands {
                let center = position * self.height as f32;
                fill_rect(
                    target,
                    0.0,
                    center - band_height / 2.0,
                    self.width as f32,
                    band_height,
                    *color,
                    self.band_alpha,
                );
            }
        }
    }

    fn draw_over(&self, target: &mut RgbaImage, elapsed_ms: f64) {
        if let Some(logo) = &self.logo
            && self.logo_fade_ms > 0.0
        {
            let alpha = (-elapsed_ms / self.logo_fade_ms).exp() as f32;
            if alpha > 0.004 {
                let x = (i64::from(self.width) - i64::from(logo.width())) / 2;
                let y = (i64::from(self.height) - i64::from(logo.height())) / 2;
                draw_image(target, logo, x, y, alpha);
            }
        }

        if let Some(text) = &self.text {
            let travelled = (elapsed_ms / 1_000.0) as f32 * text.speed;
            let x = (self.width as f32 - travelled).round() as i64;
            let y = i64::from(self.height) - i64::from(text.strip.height()) - 16;
            draw_image(target, &text.strip, x, y, 1.0);
        }
    }

    /// Draws one complete video frame.
    pub fn compose(
        &self,
        animation: &Animation,
        frame_index: u64,
        elapsed_ms: f64,
    ) -> (RgbaImage, FrameOutcome) {
        let mut target = RgbaImage::new(self.width, self.height);
        self.draw_under(&mut target);
        let outcome = animation.render_frame(&mut target, frame_index, elapsed_ms);
        self.draw_over(&mut target, elapsed_ms);
        (target, outcome)
    }
}

fn load_image(path: &Path) -> Result<RgbaImage, RenderError> {
    if !path.is_file() {
        return Err(RenderError::MissingInput(path.to_path_buf()));
    }
    image::open(path)
        .map(|image| image.to_rgba8())
        .map_err(|error| RenderError::InvalidConfig(format!("{}: {error}", path.display())))
}

fn rasterize_text(font_path: &Path, text: &str, size: f32) -> Result<RgbaImage, RenderError> {
    if !font_path.is_file() {
        return Err(RenderError::MissingInput(font_path.to_path_buf()));
    }
    let bytes = fs::read(font_path)
        .map_err(|error| RenderError::Io(format!("{}: {error}", font_path.display())))?;
    let font = Font::from_bytes(bytes, FontSettings::default())
        .map_err(|error| RenderError::InvalidConfig(format!("{}: {error}", font_path.display())))?;

    let glyphs: Vec<_> = text.chars().map(|ch| font.rasterize(ch, size)).collect();
    let width: f32 = glyphs.iter().map(|(metrics, _)| metrics.advance_width).sum();
    let strip_width = (width.ceil() as u32).max(1);
    let strip_height = ((size * 1.5).ceil() as u32).max(1);
    let baseline = size.round() as i64;

    let mut strip = RgbaImage::new(strip_width, strip_height);
    let mut pen = 0.0_f32;
    for (metrics, coverage) in &glyphs {
        let left = pen.round() as i64 + i64::from(metrics.xmin);
        let top = baseline - metrics.height as i64 - i64::from(metrics.ymin);
        for row in 0..metrics.height {
            for column in 0..metrics.width {
                let (x, y) = (left + column as i64, top + row as i64);
                let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
                    continue;
                };
                if x < strip_width && y < strip_height {
                    let alpha = coverage[row * metrics.width + column];
                    strip.put_pixel(x, y, image::Rgba([255, 255, 255, alpha]));
                }
            }
        }
        pen += metrics.advance_width;
    }
    Ok(strip)
}

/// Counting admission gate: at most `limit` permits exist at once.
struct Admission {
    available: Mutex<usize>,
    freed: Condvar,
    limit: usize,
    peak: AtomicU64,
}

struct Permit<'a> {
    admission: &'a Admission,
}

impl Admission {
    fn new(limit: usize) -> Self {
        Self {
            available: Mutex::new(limit),
            freed: Condvar::new(),
            limit,
            peak: AtomicU64::new(0),
        }
    }

    fn acquire(&self) -> Permit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.freed.wait(&mut available);
        }
        *available -= 1;
        let in_flight = (self.limit - *available) as u64;
        self.peak.fetch_max(in_flight, Ordering::Relaxed);
        Permit { admission: self }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        *self.admission.available.lock() += 1;
        self.admission.freed.notify_one();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderSummary {
    pub frames_written: u64,
    pub frames_missing_animation: u64,
    pub workers: usize,
    pub peak_in_flight: u64,
}

#[must_use]
pub fn default_worker_count() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Writes every planned frame into `frames_dir`. Frames are independent, so
/// they are spread over `workers` threads; the call returns once all of them
/// are on disk.
#[instrument(skip(plan, animation, overlays, config), fields(frames = plan.total_frames, dir = %frames_dir.display()))]
pub fn render_frames(
    plan: &RenderPlan,
    animation: &Animation,
    overlays: &Overlays,
    config: &VideoConfig,
    frames_dir: &Path,
) -> Result<RenderSummary, RenderError> {
    fs::create_dir_all(frames_dir)
        .map_err(|error| RenderError::Io(format!("{}: {error}", frames_dir.display())))?;

    let workers = config.workers.unwrap_or_else(default_worker_count).max(1);
    let admission = Admission::new(workers);
    let failed = AtomicBool::new(false);
    let written = AtomicU64::new(0);
    let missing = AtomicU64::new(0);
    let first_error: Mutex<Option<RenderError>> = Mutex::new(None);

    thread::scope(|scope| {
        let (jobs, queue) = unbounded::<(u64, Permit<'_>)>();
        for worker in 0..workers {
            let queue = queue.clone();
            let (failed, written, missing, first_error) = (&failed, &written, &missing, &first_error);
            scope.spawn(move || {
                for (frame_index, _permit) in queue {
                    if failed.load(Ordering::Acquire) {
                        continue;
                    }
                    let elapsed_ms = frame_elapsed_ms(frame_index, plan.fps);
                    let (image, outcome) = overlays.compose(animation, frame_index, elapsed_ms);
                    if let FrameOutcome::Missing(tick) = outcome {
                        if elapsed_ms < plan.lead_in_ms + plan.content_ms {
                            warn!(frame_index, tick, "no animation frame for tick; overlays only");
                            missing.fetch_add(1, Ordering::Relaxed);
                        } else {
                            debug!(frame_index, tick, "lead-out frame");
                        }
                    }

                    let path = frames_dir.join(config.frame_file_name(frame_index));
                    if let Err(save_error) = image.save(&path) {
                        error!(worker, frame_index, %save_error, "frame write failed");
                        failed.store(true, Ordering::Release);
                        first_error.lock().get_or_insert(RenderError::Io(format!(
                            "{}: {save_error}",
                            path.display()
                        )));
                        continue;
                    }
                    written.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
        drop(queue);

        for frame_index in 0..plan.total_frames {
            if failed.load(Ordering::Acquire) {
                break;
            }
            let permit = admission.acquire();
            if jobs.send((frame_index, permit)).is_err() {
                break;
            }
        }
        drop(jobs);
    });

    if let Some(error) = first_error.into_inner() {
        return Err(error);
    }

    let summary = RenderSummary {
        frames_written: written.into_inner(),
        frames_missing_animation: missing.into_inner(),
        workers,
        peak_in_flight: admission.peak.into_inner(),
    };
    info!(
        frames_written = summary.frames_written,
        missing = summary.frames_missing_animation,
        workers,
        "frame rendering completed"
    );
    Ok(summary)
}

/// Runs the sequential animation pre-pass for a song.
#[instrument(skip_all, fields(style = ?config.style))]
pub fn build_animation(
    composition: &impl Composition,
    track_colors: &[String],
    config: &VideoConfig,
    gate: &dyn Gate,
) -> Result<(Timeline, Animation), RenderError> {
    config.validate()?;
    let timing = composition.timing();
    if !timing.is_valid() {
        return Err(RenderError::InvalidConfig(format!(
            "song timing must be positive: {timing:?}"
        )));
    }
    let mut stage = Stage::for_composition(
        composition,
        track_colors,
        config.width,
        config.height,
        config.lead_in_ms as f64,
    );
    stage.flash = config.resolve_flash(composition)?;
    stage.seed = config.seed;

    let timeline = Timeline::from_composition(composition);
    let mut animation = Animation::new(config.style, stage);
    animation.generate_frames(&timeline, gate);
    debug!(frames = animation.frame_count(), "animation pre-pass done");
    Ok((timeline, animation))
}
