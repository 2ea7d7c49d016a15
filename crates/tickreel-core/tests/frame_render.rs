use std::path::Path;

use image::{Rgba, RgbaImage};
use tickreel_core::{
    Event, Instrument, NoteData, OpenGate, RenderError, Song, Timing, TrackInfo, VideoConfig,
    render_frame_sequence,
};

fn short_song() -> Song {
    let mut song = Song::new("render", Timing::new(120, 4, 6));
    let mut lead = TrackInfo::new("Lead", "#ff0000");
    lead.columns = vec!["melody".to_string()];
    song.tracks = vec![lead];
    let synth = Instrument::new(0, "synth");
    song.events = vec![
        Event::note(0, NoteData::on(60, 120, 0, 0), synth.clone()),
        Event::note(4, NoteData::off(60, 0, 0), synth),
    ];
    song
}

fn small_config() -> VideoConfig {
    VideoConfig {
        width: 64,
        height: 36,
        fps: 60,
        lead_in_ms: 0,
        lead_out_ms: 0,
        length_ms: Some(2_000),
        track_band_alpha: 0.0,
        workers: Some(3),
        ..VideoConfig::default()
    }
}

fn frame_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("frames dir should be readable")
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    names.sort();
    names
}

#[test]
fn two_seconds_at_sixty_fps_writes_one_hundred_twenty_frames() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let frames_dir = temp.path().join("frames");

    let (_, summary) = render_frame_sequence(&short_song(), &small_config(), &OpenGate, &frames_dir)
        .expect("render should succeed");

    assert_eq!(summary.frames_written, 120);
    assert_eq!(summary.workers, 3);
    assert!(summary.peak_in_flight >= 1 && summary.peak_in_flight <= 3);

    let names = frame_files(&frames_dir);
    assert_eq!(names.len(), 120);
    assert_eq!(names.first().map(String::as_str), Some("frame000000.png"));
    assert_eq!(names.last().map(String::as_str), Some("frame000119.png"));
}

#[test]
fn frames_past_the_animation_still_get_overlays() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let frames_dir = temp.path().join("frames");

    // five ticks of animation (~104 ms) inside a two second window
    let (animation, summary) =
        render_frame_sequence(&short_song(), &small_config(), &OpenGate, &frames_dir)
            .expect("missing animation frames are not fatal");
    assert_eq!(animation.frame_count(), 5);
    assert!(summary.frames_missing_animation > 100);

    let late = image::open(frames_dir.join("frame000100.png"))
        .expect("late frame should be a valid image")
        .to_rgba8();
    assert!(late.pixels().all(|pixel| *pixel == Rgba([0x10, 0x10, 0x18, 255])));
}

#[test]
fn logo_overlay_is_drawn_and_fades() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let logo_path = temp.path().join("logo.png");
    RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255]))
        .save(&logo_path)
        .expect("logo fixture should save");

    let config = VideoConfig {
        logo: Some(logo_path),
        logo_fade_ms: 100.0,
        ..small_config()
    };
    let frames_dir = temp.path().join("frames");
    render_frame_sequence(&short_song(), &config, &OpenGate, &frames_dir)
        .expect("render should succeed");

    let center = |name: &str| {
        image::open(frames_dir.join(name))
            .expect("frame should load")
            .to_rgba8()
            .get_pixel(32, 18)
            .0
    };
    assert_eq!(center("frame000000.png"), [255, 255, 255, 255]);
    assert_eq!(center("frame000119.png"), [0x10, 0x10, 0x18, 255]);
}

#[test]
fn unknown_flash_track_fails_before_any_frame() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let frames_dir = temp.path().join("frames");
    let config = VideoConfig {
        flash_track: Some("Drums".to_string()),
        ..small_config()
    };

    let error = render_frame_sequence(&short_song(), &config, &OpenGate, &frames_dir)
        .expect_err("unresolved flash track must abort");
    assert!(matches!(error, RenderError::UnknownTrack(name) if name == "Drums"));
    assert!(!frames_dir.exists());
}

#[test]
fn unknown_flash_column_names_track_and_column() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let config = VideoConfig {
        flash_track: Some("Lead".to_string()),
        flash_column: Some("fx".to_string()),
        ..small_config()
    };

    let error = render_frame_sequence(&short_song(), &config, &OpenGate, temp.path())
        .expect_err("unresolved flash column must abort");
    assert!(matches!(
        error,
        RenderError::UnknownColumn { ref track, ref column } if track == "Lead" && column == "fx"
    ));
}

#[test]
fn missing_background_image_is_a_configuration_error() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let missing = temp.path().join("nope.png");
    let frames_dir = temp.path().join("frames");
    let config = VideoConfig {
        background_image: Some(missing.clone()),
        ..small_config()
    };

    let error = render_frame_sequence(&short_song(), &config, &OpenGate, &frames_dir)
        .expect_err("missing background must abort");
    assert!(matches!(error, RenderError::MissingInput(path) if path == missing));
    assert!(!frames_dir.exists());
}
