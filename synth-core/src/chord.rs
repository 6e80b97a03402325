//! # Chord Identifier
//!
//! Names the triad formed by the keys currently held down.
//!
//! Matching is exact: the held pitch classes must equal a triad's three pitch
//! classes, so a seventh chord or a triad with an added tone reads as
//! "Unknown" rather than as its underlying triad.

use crate::notes::{PITCH_CLASS_COUNT, PitchClass};
use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use std::fmt;

/// Triad qualities in table order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChordQuality {
    /// Major triad (e.g., C-E-G)
    Major,
    /// Minor triad (e.g., C-D#-G)
    Minor,
    /// Diminished triad (e.g., C-D#-F#)
    Diminished,
    /// Augmented triad (e.g., C-E-G#)
    Augmented,
    /// Suspended fourth (e.g., C-F-G)
    SuspendedFourth,
}

impl ChordQuality {
    pub const ALL: [ChordQuality; 5] = [
        ChordQuality::Major,
        ChordQuality::Minor,
        ChordQuality::Diminished,
        ChordQuality::Augmented,
        ChordQuality::SuspendedFourth,
    ];

    /// Semitone offsets from the root.
    pub const fn intervals(self) -> [u8; 3] {
        match self {
            ChordQuality::Major => [0, 4, 7],
            ChordQuality::Minor => [0, 3, 7],
            ChordQuality::Diminished => [0, 3, 6],
            ChordQuality::Augmented => [0, 4, 8],
            ChordQuality::SuspendedFourth => [0, 5, 7],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ChordQuality::Major => "Major",
            ChordQuality::Minor => "Minor",
            ChordQuality::Diminished => "Diminished",
            ChordQuality::Augmented => "Augmented",
            ChordQuality::SuspendedFourth => "Suspended 4th",
        }
    }
}

impl fmt::Display for ChordQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One rotation of a quality's interval pattern.
#[derive(Debug, Clone)]
struct ChordPattern {
    root: PitchClass,
    quality: ChordQuality,
    pitch_classes: BTreeSet<PitchClass>,
}

/// Every quality's twelve rotations, qualities in table order and roots ascending.
static CHORD_PATTERNS: Lazy<Vec<ChordPattern>> = Lazy::new(|| {
    let mut patterns = Vec::with_capacity(ChordQuality::ALL.len() * PITCH_CLASS_COUNT);
    for quality in ChordQuality::ALL {
        for root in PitchClass::ALL {
            let pitch_classes = quality
                .intervals()
                .iter()
                .map(|&i| root.transpose(i as i32))
                .collect();
            patterns.push(ChordPattern { root, quality, pitch_classes });
        }
    }
    patterns
});

/// What the held keys spell.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChordReading {
    /// Fewer than two keys are held.
    None,
    /// Keys are held but they do not form a known triad.
    Unknown,
    Triad { root: PitchClass, quality: ChordQuality },
}

impl fmt::Display for ChordReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChordReading::None => Ok(()),
            ChordReading::Unknown => f.write_str("Unknown"),
            ChordReading::Triad { root, quality } => write!(f, "{root} {quality}"),
        }
    }
}

/// Classifies a set of sounding note numbers. Octaves are ignored.
pub fn identify_chord<I>(notes: I) -> ChordReading
where
    I: IntoIterator<Item = u8>,
{
    let distinct_notes: BTreeSet<u8> = notes.into_iter().collect();
    if distinct_notes.len() < 2 {
        return ChordReading::None;
    }

    let played: BTreeSet<PitchClass> = distinct_notes
        .iter()
        .map(|&n| PitchClass::from_note_number(n))
        .collect();
    if played.len() < 3 {
        return ChordReading::Unknown;
    }

    CHORD_PATTERNS
        .iter()
        .find(|pattern| pattern.pitch_classes == played)
        .map(|pattern| ChordReading::Triad { root: pattern.root, quality: pattern.quality })
        .unwrap_or(ChordReading::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    // C4 = 48 in keyboard numbering.
    const C: u8 = 48;
    const D: u8 = 50;
    const E: u8 = 52;
    const F: u8 = 53;
    const G: u8 = 55;
    const B: u8 = 59;

    #[test]
    fn c_major_triad() {
        assert_eq!(identify_chord([C, E, G]).to_string(), "C Major");
    }

    #[test]
    fn extra_tones_are_unknown() {
        assert_eq!(identify_chord([C, E, G, B]), ChordReading::Unknown);
        assert_eq!(identify_chord([C, E, G, B]).to_string(), "Unknown");
    }

    #[test]
    fn too_few_notes() {
        assert_eq!(identify_chord([C]).to_string(), "");
        assert_eq!(identify_chord(Vec::<u8>::new()).to_string(), "");
        assert_eq!(identify_chord([C, C]).to_string(), "");
        assert_eq!(identify_chord([C, D]).to_string(), "Unknown");
        // Two octaves of the same pitch class: two notes, one class.
        assert_eq!(identify_chord([C, C + 12]), ChordReading::Unknown);
    }

    #[test]
    fn octave_and_order_are_ignored() {
        let reading = identify_chord([G + 12, C, E + 24]);
        assert_eq!(
            reading,
            ChordReading::Triad { root: PitchClass::C, quality: ChordQuality::Major }
        );
    }

    #[test]
    fn other_qualities() {
        assert_eq!(identify_chord([57, 60, 64]).to_string(), "A Minor");
        assert_eq!(identify_chord([59, 62, 65]).to_string(), "B Diminished");
        assert_eq!(identify_chord([C, F, G]).to_string(), "C Suspended 4th");
        // D-G-A is also G sus2, which the table does not carry.
        assert_eq!(identify_chord([D, 57, 55]).to_string(), "D Suspended 4th");
    }

    #[test]
    fn augmented_resolves_to_lowest_root_in_table() {
        // C-E-G# is symmetric; the first rotation reached is C.
        assert_eq!(identify_chord([C, E, 56]).to_string(), "C Augmented");
        assert_eq!(identify_chord([E, 56, 60]).to_string(), "C Augmented");
    }

    #[test]
    fn table_has_sixty_patterns() {
        assert_eq!(CHORD_PATTERNS.len(), 60);
        assert!(CHORD_PATTERNS.iter().all(|p| p.pitch_classes.len() == 3));
    }
}
