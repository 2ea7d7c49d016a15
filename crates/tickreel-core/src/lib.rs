pub mod animation;
pub mod audio;
pub mod config;
pub mod diagnostics;
pub mod encode;
pub mod fingerprint;
pub mod fixtures;
pub mod midi_import;
pub mod mixer;
pub mod model;
pub mod persistence;
pub mod raster;
pub mod render;
pub mod scheduler;
pub mod session;
pub mod time;
pub mod timeline;
pub mod video;

pub use animation::{
    AGE_LIMIT, Animation, AnimationKind, BarAnimation, FlashSelector, FrameClock, FrameOutcome,
    KEY_COUNT, Particle, ParticleAnimation, ParticleRole, Stage, key_index,
};
pub use config::AppConfig;
pub use diagnostics::{
    TelemetryGuard, init_tracing, init_tracing_from_config, init_tracing_with_options,
};
pub use encode::{EncoderConfig, encode_video, encoder_args};
pub use fingerprint::{AnimationFingerprint, fingerprint_animation};
pub use midi_import::{import_midi_bytes, import_midi_file};
pub use mixer::{Gate, Mixer, MixerEvent, OpenGate};
pub use model::{
    Composition, DEFAULT_BPM, DEFAULT_LINES_PER_BEAT, DEFAULT_TICKS_PER_LINE, Event, Instrument,
    NoteData, NoteKind, Song, TrackInfo,
};
pub use persistence::{export_song, load_any, load_song, save_song, validate_song};
pub use render::{
    Overlays, RenderError, RenderPlan, RenderSummary, VideoConfig, build_animation, render_frames,
};
pub use scheduler::{
    NoteEmitter, PlaybackState, Scheduler, SchedulerError, SchedulerEvent, TracingEmitter,
};
pub use session::{NoteTracker, Session};
pub use time::{Tick, Timing};
pub use timeline::Timeline;
pub use video::{VideoJob, VideoReport, render_frame_sequence, render_video};
