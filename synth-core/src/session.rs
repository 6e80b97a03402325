//! # Keyboard Session
//!
//! One playable keyboard: its voices, its scale gate and its analysis engine,
//! held as plain fields so several sessions can coexist and tests can drive
//! each one directly.

use crate::UiSnapshot;
use crate::analysis::AnalysisEngine;
use crate::chord::{ChordReading, identify_chord};
use crate::config::EngineConfig;
use crate::notes::note_number_to_frequency;
use crate::scale::{ScaleGate, ScaleSelection};
use crate::voice::{AudioGraph, NoteId, VoiceManager, WaveShape};
use log::debug;
use std::time::Duration;

pub struct KeyboardSession<G: AudioGraph> {
    pub voices: VoiceManager<G>,
    pub scale: ScaleGate,
    pub analysis: AnalysisEngine,
}

impl<G: AudioGraph> KeyboardSession<G> {
    pub fn new(graph: G, config: &EngineConfig, analysis: AnalysisEngine) -> Self {
        let voices = VoiceManager::new(graph, config.wave_shape, config.voice_gain, config.release_window());
        Self { voices, scale: ScaleGate::default(), analysis }
    }

    /// Sounds a key if the scale gate admits it. Returns whether it sounded.
    pub fn press_key(&mut self, note: NoteId) -> bool {
        if !self.scale.admits(note) {
            debug!("[SESSION] Note {} is outside {}", note, self.scale.selection);
            return false;
        }
        self.voices.start_note(note, note_number_to_frequency(note))
    }

    pub fn release_key(&mut self, note: NoteId) {
        self.voices.stop_note(note);
    }

    pub fn set_wave_shape(&mut self, shape: WaveShape) {
        self.voices.set_wave_shape(shape);
    }

    pub fn set_scale(&mut self, selection: ScaleSelection) {
        self.scale.selection = selection;
    }

    pub fn set_allow_out_of_scale(&mut self, allow: bool) {
        self.scale.allow_out_of_scale = allow;
    }

    /// Chord spelled by the keys held right now.
    pub fn chord(&self) -> ChordReading {
        identify_chord(self.voices.active_notes())
    }

    /// Application tick: retires finished voices and advances analysis.
    pub fn tick(&mut self, now: Duration) -> Result<(), crate::error::EngineError> {
        self.voices.collect_released();
        self.analysis.tick(now)
    }

    /// Everything the UI needs to draw a frame.
    pub fn snapshot(&self) -> UiSnapshot {
        UiSnapshot {
            active_notes: self.voices.active_notes(),
            display_frequency: self.voices.display_frequency(),
            key: self.analysis.displayed_key(),
            chord: self.chord().to_string(),
            audio_level: self.analysis.audio_level(),
            is_analyzing: self.analysis.is_analyzing(),
        }
    }
}
