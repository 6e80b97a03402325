// synth-core/src/lib.rs

//! The core engine for the playable synth keyboard.
//! This crate is responsible for voice management, pitch estimation,
//! key and chord inference, and the rolling capture buffer that feeds
//! the neural pitch model. It is completely headless and contains no GUI code.

pub mod analysis;
pub mod audio;
pub mod chord;
pub mod config;
pub mod error;
pub mod fft;
pub mod inference;
pub mod key;
pub mod notes;
pub mod pitch;
pub mod rolling;
pub mod scale;
pub mod session;
pub mod synth;
pub mod voice;

pub use analysis::AnalysisEngine;
pub use config::EngineConfig;
pub use error::{CaptureError, ConfigError, EngineError};
pub use key::{DetectionMode, KeyEstimate};
pub use session::KeyboardSession;

use serde::Serialize;

/// What the UI reads from the engine each frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiSnapshot {
    /// Keys currently held, ascending.
    pub active_notes: Vec<voice::NoteId>,
    /// Frequency of the held key, only when exactly one key is held.
    pub display_frequency: Option<f32>,
    /// Latest key estimate; `None` until the first estimate of a session.
    pub key: Option<KeyEstimate>,
    /// Chord name, empty when fewer than two keys are held.
    pub chord: String,
    /// Input level in 0..1.
    pub audio_level: f32,
    pub is_analyzing: bool,
}
