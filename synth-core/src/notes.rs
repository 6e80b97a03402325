//! # Notes Module
//!
//! Pitch-class and note-number helpers shared by the keyboard, the scale filter,
//! the chord identifier and the key detector.
//!
//! ## Conventions
//! - Pitch classes run from C (0) to B (11) and are spelled with sharps
//! - Note numbers are MIDI numbers; the keyboard labels a key as
//!   `octave * 12 + pitch_class`, so note 60 is shown as "C5"
//! - Equal temperament with A4 (note 69) = 440 Hz

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Number of pitch classes in an octave.
pub const PITCH_CLASS_COUNT: usize = 12;

const NOTE_NAMES: [&str; PITCH_CLASS_COUNT] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A note's identity modulo octave.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    Cs,
    D,
    Ds,
    E,
    F,
    Fs,
    G,
    Gs,
    A,
    As,
    B,
}

impl PitchClass {
    /// All twelve pitch classes in ascending order.
    pub const ALL: [PitchClass; PITCH_CLASS_COUNT] = [
        PitchClass::C,
        PitchClass::Cs,
        PitchClass::D,
        PitchClass::Ds,
        PitchClass::E,
        PitchClass::F,
        PitchClass::Fs,
        PitchClass::G,
        PitchClass::Gs,
        PitchClass::A,
        PitchClass::As,
        PitchClass::B,
    ];

    /// Wraps any integer into 0..11.
    pub fn from_index(index: i32) -> PitchClass {
        Self::ALL[index.rem_euclid(PITCH_CLASS_COUNT as i32) as usize]
    }

    pub fn from_note_number(note_number: u8) -> PitchClass {
        Self::from_index(note_number as i32)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Moves the pitch class up by `semitones`, wrapping at the octave.
    pub fn transpose(self, semitones: i32) -> PitchClass {
        Self::from_index(self.index() as i32 + semitones)
    }

    pub fn name(self) -> &'static str {
        NOTE_NAMES[self.index()]
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a string is not a recognised note or pitch-class name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised note name `{0}`")]
pub struct ParseNoteError(pub String);

impl FromStr for PitchClass {
    type Err = ParseNoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NOTE_NAMES
            .iter()
            .position(|name| name.eq_ignore_ascii_case(s.trim()))
            .map(|i| Self::ALL[i])
            .ok_or_else(|| ParseNoteError(s.to_string()))
    }
}

/// A single key of the on-screen keyboard.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyboardKey {
    /// Key label (e.g., "C4", "F#4")
    pub name: String,
    pub note_number: u8,
    /// Frequency in Hz
    pub frequency: f32,
    pub is_black: bool,
}

/// Lookup from key label to note number for every representable note.
static NOTE_MAP: Lazy<BTreeMap<String, u8>> = Lazy::new(|| {
    (0..=127u8).map(|n| (note_name(n), n)).collect()
});

/// Calculates the equal-temperament frequency of a note number.
pub fn note_number_to_frequency(note_number: u8) -> f32 {
    440.0 * 2.0_f32.powf((note_number as f32 - 69.0) / 12.0)
}

/// Converts a frequency to a fractional MIDI note number.
pub fn frequency_to_midi(frequency: f32) -> f32 {
    69.0 + 12.0 * (frequency / 440.0).log2()
}

/// Formats a note number as a key label, e.g. 61 -> "C#5".
pub fn note_name(note_number: u8) -> String {
    let pitch_class = PitchClass::from_note_number(note_number);
    format!("{}{}", pitch_class, note_number / 12)
}

/// Parses a key label such as "C#4" back into its note number.
pub fn note_number_from_name(name: &str) -> Result<u8, ParseNoteError> {
    NOTE_MAP
        .get(name.trim())
        .copied()
        .ok_or_else(|| ParseNoteError(name.to_string()))
}

/// Builds two octaves of keys starting at `start_octave`.
pub fn keyboard_keys(start_octave: u8) -> Vec<KeyboardKey> {
    (start_octave..start_octave.saturating_add(2))
        .flat_map(|octave| {
            PitchClass::ALL.iter().filter_map(move |&pc| {
                let note_number = (octave as u16 * 12 + pc.index() as u16).try_into().ok()?;
                Some(KeyboardKey {
                    name: note_name(note_number),
                    note_number,
                    frequency: note_number_to_frequency(note_number),
                    is_black: pc.name().contains('#'),
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_is_440() {
        assert!((note_number_to_frequency(69) - 440.0).abs() < 1e-3);
        assert!((frequency_to_midi(440.0) - 69.0).abs() < 1e-4);
        assert!((frequency_to_midi(220.0) - 57.0).abs() < 1e-4);
    }

    #[test]
    fn pitch_class_wraps() {
        assert_eq!(PitchClass::from_index(-1), PitchClass::B);
        assert_eq!(PitchClass::from_index(13), PitchClass::Cs);
        assert_eq!(PitchClass::from_note_number(60), PitchClass::C);
        assert_eq!(PitchClass::G.transpose(7), PitchClass::D);
    }

    #[test]
    fn names_round_trip_through_the_map() {
        assert_eq!(note_name(61), "C#5");
        assert_eq!(note_number_from_name("C#5"), Ok(61));
        assert!(note_number_from_name("H2").is_err());
        assert_eq!("f#".parse::<PitchClass>(), Ok(PitchClass::Fs));
    }

    #[test]
    fn keyboard_spans_two_octaves() {
        let keys = keyboard_keys(4);
        assert_eq!(keys.len(), 24);
        assert_eq!(keys[0].name, "C4");
        assert_eq!(keys[0].note_number, 48);
        assert_eq!(keys.iter().filter(|k| k.is_black).count(), 10);
    }
}
