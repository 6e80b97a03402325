//! # Key Detection Module
//!
//! Infers the musical key from a decaying pitch-class histogram by correlating
//! it against the Krumhansl-Kessler major and minor key profiles.
//!
//! The histogram is fed either one estimated pitch at a time (standard mode,
//! strong decay so stale pitches fade) or in batches of note events from the
//! neural model (high accuracy mode, no decay since each batch already
//! summarises a time window).

use crate::config::check_decay;
use crate::error::ConfigError;
use crate::notes::{PITCH_CLASS_COUNT, PitchClass};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Krumhansl-Kessler major key profile, C first.
const KRUMHANSL_MAJOR: [f32; PITCH_CLASS_COUNT] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Kessler minor key profile, C first.
const KRUMHANSL_MINOR: [f32; PITCH_CLASS_COUNT] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyMode {
    Major,
    Minor,
}

impl KeyMode {
    fn profile(self) -> &'static [f32; PITCH_CLASS_COUNT] {
        match self {
            KeyMode::Major => &KRUMHANSL_MAJOR,
            KeyMode::Minor => &KRUMHANSL_MINOR,
        }
    }
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMode::Major => f.write_str("major"),
            KeyMode::Minor => f.write_str("minor"),
        }
    }
}

/// A key estimate recomputed on demand from the histogram.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEstimate {
    pub tonic: PitchClass,
    pub mode: KeyMode,
    /// Pearson correlation with the winning profile.
    pub confidence: f32,
}

impl KeyEstimate {
    /// Display name, e.g. "G major".
    pub fn name(&self) -> String {
        format!("{} {}", self.tonic, self.mode)
    }
}

/// How quickly old pitches fade from the histogram.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMode {
    /// Fast YIN path, monophonic, strongly decaying histogram.
    Standard,
    /// Batched neural path, polyphonic, no decay.
    HighAccuracy,
}

/// A note event as delivered by the note-extraction adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub start_time_seconds: f32,
    pub duration_seconds: f32,
    pub pitch_midi: f32,
    pub amplitude: f32,
    #[serde(default)]
    pub pitch_bends: Option<Vec<f32>>,
}

/// Decaying pitch-class histogram plus key-profile correlation.
#[derive(Debug, Clone)]
pub struct KeyDetector {
    histogram: [f32; PITCH_CLASS_COUNT],
    decay_factor: f32,
}

impl Default for KeyDetector {
    fn default() -> Self {
        Self { histogram: [0.0; PITCH_CLASS_COUNT], decay_factor: 0.97 }
    }
}

impl KeyDetector {
    pub fn new(decay_factor: f32) -> Result<Self, ConfigError> {
        check_decay(decay_factor)?;
        Ok(Self { decay_factor, ..Self::default() })
    }

    pub fn histogram(&self) -> &[f32; PITCH_CLASS_COUNT] {
        &self.histogram
    }

    pub fn decay_factor(&self) -> f32 {
        self.decay_factor
    }

    /// Multiplies every bin by the decay factor.
    pub fn decay(&mut self) {
        if self.decay_factor < 1.0 {
            for bin in self.histogram.iter_mut() {
                *bin *= self.decay_factor;
            }
        }
    }

    /// Decays, then adds `weight` to one pitch class.
    pub fn add_pitch(&mut self, pitch_class: PitchClass, weight: f32) {
        self.decay();
        self.histogram[pitch_class.index()] += weight;
    }

    /// Like [`add_pitch`](Self::add_pitch) for a fractional MIDI number,
    /// rounded to the nearest note.
    pub fn add_pitch_midi(&mut self, midi: f32, weight: f32) {
        self.add_pitch(PitchClass::from_index(midi.round() as i32), weight);
    }

    /// Decays once for the whole batch, then counts each note.
    pub fn add_notes(&mut self, notes: &[NoteEvent]) {
        if notes.is_empty() {
            return;
        }
        self.decay();
        for note in notes {
            let pitch_class = PitchClass::from_index(note.pitch_midi.round() as i32);
            self.histogram[pitch_class.index()] += 1.0;
        }
    }

    /// Correlates the normalised histogram with all 24 rotated profiles.
    ///
    /// Tonics are tried in ascending order, major before minor, and only a
    /// strictly higher correlation replaces the current best, so ties go to
    /// the first candidate. An empty histogram reads as C major with zero
    /// confidence.
    pub fn current_key(&self) -> KeyEstimate {
        let sum: f32 = self.histogram.iter().sum();
        let sum = if sum > 0.0 { sum } else { 1.0 };
        let mut normalized = [0.0; PITCH_CLASS_COUNT];
        for (n, &bin) in normalized.iter_mut().zip(&self.histogram) {
            *n = bin / sum;
        }

        let mut best: Option<KeyEstimate> = None;
        for tonic in PitchClass::ALL {
            for mode in [KeyMode::Major, KeyMode::Minor] {
                let profile = rotate(mode.profile(), tonic.index());
                let confidence = pearson_correlation(&normalized, &profile);
                if best.is_none_or(|b| confidence > b.confidence) {
                    best = Some(KeyEstimate { tonic, mode, confidence });
                }
            }
        }
        best.unwrap_or(KeyEstimate { tonic: PitchClass::C, mode: KeyMode::Major, confidence: 0.0 })
    }

    /// Zeroes the histogram so the next session starts fresh.
    pub fn reset(&mut self) {
        self.histogram = [0.0; PITCH_CLASS_COUNT];
    }

    pub fn set_decay_factor(&mut self, factor: f32) -> Result<(), ConfigError> {
        check_decay(factor)?;
        self.decay_factor = factor;
        Ok(())
    }
}

/// Shifts a C-based profile so that index `semitones` carries the tonic weight.
fn rotate(profile: &[f32; PITCH_CLASS_COUNT], semitones: usize) -> [f32; PITCH_CLASS_COUNT] {
    let mut rotated = [0.0; PITCH_CLASS_COUNT];
    for (i, r) in rotated.iter_mut().enumerate() {
        *r = profile[(i + PITCH_CLASS_COUNT - semitones) % PITCH_CLASS_COUNT];
    }
    rotated
}

/// Pearson correlation; zero when either input has no variance.
fn pearson_correlation(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len() as f32;
    let (mut sum_a, mut sum_b, mut sum_a2, mut sum_b2, mut sum_ab) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b) {
        sum_a += x;
        sum_b += y;
        sum_a2 += x * x;
        sum_b2 += y * y;
        sum_ab += x * y;
    }
    let numerator = n * sum_ab - sum_a * sum_b;
    let denominator = ((n * sum_a2 - sum_a * sum_a) * (n * sum_b2 - sum_b * sum_b)).sqrt();
    if denominator > 0.0 && denominator.is_finite() {
        numerator / denominator
    } else {
        0.0
    }
}
