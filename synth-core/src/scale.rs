//! Scale membership filter for gating key presses.

use crate::notes::{PITCH_CLASS_COUNT, ParseNoteError, PitchClass};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MAJOR_INTERVALS: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];
const MINOR_INTERVALS: [u8; 7] = [0, 2, 3, 5, 7, 8, 10];

/// Scale modes the keyboard can restrict itself to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScaleMode {
    Major,
    Minor,
}

impl ScaleMode {
    /// Semitone offsets from the root that belong to the scale.
    pub const fn intervals(self) -> &'static [u8; 7] {
        match self {
            ScaleMode::Major => &MAJOR_INTERVALS,
            ScaleMode::Minor => &MINOR_INTERVALS,
        }
    }
}

impl fmt::Display for ScaleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleMode::Major => f.write_str("major"),
            ScaleMode::Minor => f.write_str("minor"),
        }
    }
}

/// Returns true when `note_number` belongs to the scale built on `root`.
///
/// A missing root or mode disables the filter and admits every note.
pub fn is_in_scale(note_number: u8, root: Option<PitchClass>, mode: Option<ScaleMode>) -> bool {
    let (Some(root), Some(mode)) = (root, mode) else {
        return true;
    };
    let pitch_class = note_number as usize % PITCH_CLASS_COUNT;
    let offset = (pitch_class + PITCH_CLASS_COUNT - root.index()) % PITCH_CLASS_COUNT;
    mode.intervals().contains(&(offset as u8))
}

/// The scale picked in the UI. Read-only to the engine.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSelection {
    pub root: Option<PitchClass>,
    pub mode: Option<ScaleMode>,
}

impl ScaleSelection {
    pub fn new(root: PitchClass, mode: ScaleMode) -> Self {
        Self { root: Some(root), mode: Some(mode) }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, note_number: u8) -> bool {
        is_in_scale(note_number, self.root, self.mode)
    }
}

impl fmt::Display for ScaleSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.root, self.mode) {
            (Some(root), Some(mode)) => write!(f, "{root} {mode}"),
            _ => f.write_str("none"),
        }
    }
}

impl FromStr for ScaleSelection {
    type Err = ParseNoteError;

    /// Accepts "none" or "<root> <major|minor>", e.g. "F# minor".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("none") {
            return Ok(Self::none());
        }
        let mut parts = s.split_whitespace();
        let (Some(root), Some(mode), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ParseNoteError(s.to_string()));
        };
        let root: PitchClass = root.parse()?;
        let mode = match mode.to_ascii_lowercase().as_str() {
            "major" => ScaleMode::Major,
            "minor" => ScaleMode::Minor,
            "none" => return Ok(Self { root: Some(root), mode: None }),
            _ => return Err(ParseNoteError(s.to_string())),
        };
        Ok(Self::new(root, mode))
    }
}

/// Decides whether a pressed key is allowed to sound.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ScaleGate {
    pub selection: ScaleSelection,
    pub allow_out_of_scale: bool,
}

impl ScaleGate {
    pub fn admits(&self, note_number: u8) -> bool {
        self.allow_out_of_scale || self.selection.contains(note_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_major_membership() {
        let root = Some(PitchClass::C);
        let mode = Some(ScaleMode::Major);
        assert!(!is_in_scale(1, root, mode));
        assert!(is_in_scale(4, root, mode));
        assert!(is_in_scale(64, root, mode));
        assert!(!is_in_scale(66, root, mode));
    }

    #[test]
    fn minor_scale_is_rooted() {
        // A minor shares its notes with C major.
        let a_minor = ScaleSelection::new(PitchClass::A, ScaleMode::Minor);
        let c_major = ScaleSelection::new(PitchClass::C, ScaleMode::Major);
        for n in 0..24 {
            assert_eq!(a_minor.contains(n), c_major.contains(n), "note {n}");
        }
        let d_minor = ScaleSelection::new(PitchClass::D, ScaleMode::Minor);
        assert!(d_minor.contains(10)); // A#
        assert!(!d_minor.contains(11)); // B
    }

    #[test]
    fn missing_root_or_mode_disables_filter() {
        for n in 0..12 {
            assert!(is_in_scale(n, None, Some(ScaleMode::Major)));
            assert!(is_in_scale(n, Some(PitchClass::D), None));
        }
    }

    #[test]
    fn parse_selection() {
        assert_eq!("none".parse::<ScaleSelection>(), Ok(ScaleSelection::none()));
        let sel: ScaleSelection = "F# minor".parse().unwrap();
        assert_eq!(sel, ScaleSelection::new(PitchClass::Fs, ScaleMode::Minor));
        assert_eq!(sel.to_string(), "F# minor");
        assert!("F# lydian".parse::<ScaleSelection>().is_err());
    }

    #[test]
    fn gate_can_be_opened() {
        let mut gate = ScaleGate {
            selection: ScaleSelection::new(PitchClass::C, ScaleMode::Major),
            allow_out_of_scale: false,
        };
        assert!(!gate.admits(61));
        gate.allow_out_of_scale = true;
        assert!(gate.admits(61));
    }
}
