use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tickreel_core::{
    AppConfig, Mixer, OpenGate, SchedulerEvent, Session, TracingEmitter, VideoJob,
    build_animation, diagnostics::init_tracing_from_config, fingerprint::write_fingerprint,
    fingerprint_animation, fixtures::demo_song, import_midi_file, load_any, render_video,
    save_song,
};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "tickreel-cli")]
#[command(about = "Play tracker songs in real time and render them to video")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides the discovered tickreel.config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Plays a song through the tracing note sink.
    Play {
        song: PathBuf,

        #[arg(long = "loop")]
        looping: bool,

        /// Line under the cursor when looping.
        #[arg(long, default_value_t = 0)]
        line: u64,

        /// Number of passes to play when looping.
        #[arg(long, default_value_t = 2)]
        passes: u32,

        #[arg(long)]
        mute: Vec<usize>,

        #[arg(long)]
        solo: Vec<usize>,
    },
    Render {
        song: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// Audio track to mux; synthesized from the song when omitted.
        #[arg(long)]
        audio: Option<PathBuf>,

        /// Keeps the frame files in the configured frames directory.
        #[arg(long)]
        keep_frames: bool,

        #[arg(long)]
        mute: Vec<usize>,

        #[arg(long)]
        solo: Vec<usize>,
    },
    ImportMidi {
        midi: PathBuf,

        #[arg(long)]
        output: PathBuf,
    },
    Fingerprint {
        song: PathBuf,

        #[arg(long)]
        output: Option<PathBuf>,
    },
    Demo {
        /// Defaults to the configured exports directory.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load_or_default()?,
    };
    let log_dir = cli.log_dir.unwrap_or_else(|| config.paths.logs_dir.clone());
    let _telemetry = init_tracing_from_config(&log_dir, &config.diagnostics)?;

    let import_grid = (
        config.playback.import_lines_per_beat,
        config.playback.import_ticks_per_line,
    );

    match cli.command {
        Commands::Play {
            song,
            looping,
            line,
            passes,
            mute,
            solo,
        } => {
            let song = load_any(&song, import_grid.0, import_grid.1)?;
            let timeout = Duration::from_secs(5) + song.timing.tick_duration() * 64;
            let mut session = Session::with_notification_capacity(
                song,
                Arc::new(TracingEmitter),
                config.playback.notification_capacity,
            )?;
            apply_mix(session.mixer(), &mute, &solo);

            let passes = passes.max(1);
            let looping = looping || config.playback.looping;
            session.set_cursor_line(line);
            session.set_looping(looping && passes > 1);
            session.play()?;

            let mut ended = 0_u32;
            while let Some(event) = session.next_event(timeout) {
                if event == SchedulerEvent::SongEnded {
                    ended += 1;
                    if ended >= passes || !looping {
                        break;
                    }
                    if ended + 1 >= passes {
                        session.set_looping(false);
                    }
                }
            }
            session.stop();
            info!(passes = ended, "playback finished");
        }
        Commands::Render {
            song,
            output,
            audio,
            keep_frames,
            mute,
            solo,
        } => {
            let song = load_any(&song, import_grid.0, import_grid.1)?;
            let mixer = Mixer::new(song.tracks.len());
            apply_mix(&mixer, &mute, &solo);

            let job = VideoJob {
                song: &song,
                output: &output,
                audio: audio.as_deref(),
                frames_dir: keep_frames.then_some(config.paths.frames_dir.as_path()),
            };
            let report = render_video(&job, &config.video, &config.encoder, &mixer)
                .with_context(|| format!("failed to render {}", output.display()))?;
            info!(
                path = %report.output.display(),
                frames = report.frames.frames_written,
                "render finished"
            );
        }
        Commands::ImportMidi { midi, output } => {
            let song = import_midi_file(&midi, import_grid.0, import_grid.1)?;
            save_song(&output, &song)?;
        }
        Commands::Fingerprint { song, output } => {
            let song = load_any(&song, import_grid.0, import_grid.1)?;
            let (_, animation) =
                build_animation(&song, &song.track_colors(), &config.video, &OpenGate)?;
            let report = fingerprint_animation(&animation);
            match output {
                Some(path) => write_fingerprint(&path, &report)?,
                None => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
        Commands::Demo { output_dir } => {
            let output_dir = output_dir.unwrap_or_else(|| config.paths.exports_dir.clone());
            let song = demo_song();
            let song_path = output_dir.join("demo.tickreel.json");
            save_song(&song_path, &song)?;

            let (_, animation) =
                build_animation(&song, &song.track_colors(), &config.video, &OpenGate)?;
            write_fingerprint(
                &output_dir.join("demo.fingerprint.json"),
                &fingerprint_animation(&animation),
            )?;

            let video_path = output_dir.join("demo.mp4");
            let job = VideoJob {
                song: &song,
                output: &video_path,
                audio: None,
                frames_dir: None,
            };
            if let Err(error) = render_video(&job, &config.video, &config.encoder, &OpenGate) {
                warn!(%error, "demo video skipped");
            }
            info!(dir = %output_dir.display(), "demo written");
        }
    }

    Ok(())
}

fn apply_mix(mixer: &Mixer, mute: &[usize], solo: &[usize]) {
    for track in mute {
        mixer.set_muted(*track, true);
    }
    for track in solo {
        mixer.set_soloed(*track, true);
    }
}
