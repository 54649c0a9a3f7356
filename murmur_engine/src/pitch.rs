// Note naming and pitch arithmetic over the 12-name chromatic alphabet.
//
// A `Pitch` is an absolute pitch number laid out as `octave * 12 + semitone`,
// so C0 = 0, C3 = 36 and B5 = 71. This is the numbering the scale model emits
// and the backend receives; it is *not* shifted by one octave the way MIDI
// note numbers are. Names are written with sharps (`"C#4"`), and parsing
// accepts sharps or flats (`"Db4"`), case-insensitively on the letter.
//
// `pitch_to_name` and `parse_pitch_name` are total inverses of each other
// for every pitch in range.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical names of the 12 pitch classes, sharps only.
pub const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Highest pitch number. The alphabet stops at G10 = 127.
pub const MAX_PITCH: u8 = 127;

/// Absolute pitch number (`octave * 12 + semitone`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pitch(pub u8);

impl Pitch {
    pub fn from_parts(octave: u8, pitch_class: u8) -> Option<Self> {
        let value = u16::from(octave) * 12 + u16::from(pitch_class % 12);
        u8::try_from(value)
            .ok()
            .filter(|&v| v <= MAX_PITCH)
            .map(Pitch)
    }

    pub fn octave(self) -> u8 {
        self.0 / 12
    }

    pub fn pitch_class(self) -> u8 {
        self.0 % 12
    }

    /// Shift by a number of semitones, or `None` if the result leaves the
    /// note space.
    pub fn transposed(self, semitones: i16) -> Option<Self> {
        let value = i16::from(self.0) + semitones;
        (0..=i16::from(MAX_PITCH))
            .contains(&value)
            .then(|| Pitch(value as u8))
    }

    pub fn name(self) -> String {
        pitch_to_name(self)
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            PITCH_CLASS_NAMES[self.pitch_class() as usize],
            self.octave()
        )
    }
}

/// Render a pitch as `NoteName + Octave`, e.g. `Pitch(36)` -> `"C3"`.
pub fn pitch_to_name(pitch: Pitch) -> String {
    pitch.to_string()
}

/// Parse a bare pitch-class name (`"A"`, `"F#"`, `"Bb"`) into 0..12.
pub fn parse_pitch_class(name: &str) -> Option<u8> {
    let trimmed = name.trim();
    let mut chars = trimmed.chars();
    let letter = chars.next()?;
    let base: i8 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let accidental: i8 = match chars.as_str() {
        "" => 0,
        "#" => 1,
        "b" => -1,
        _ => return None,
    };
    Some((base + accidental).rem_euclid(12) as u8)
}

/// Parse `NoteName + Octave` (`"C#4"`, `"Db4"`, `"a2"`) into a `Pitch`.
pub fn parse_pitch_name(name: &str) -> Option<Pitch> {
    let trimmed = name.trim();
    let split = trimmed.find(|c: char| c.is_ascii_digit())?;
    let (class_part, octave_part) = trimmed.split_at(split);
    let pitch_class = parse_pitch_class(class_part)?;
    let octave: u8 = octave_part.parse().ok()?;

    // Flats below C wrap into the previous octave ("Cb4" is B3).
    let base = parse_pitch_class(&class_part[..1])?;
    let octave = if base == 0 && pitch_class == 11 {
        octave.checked_sub(1)?
    } else if base == 11 && pitch_class == 0 {
        octave.checked_add(1)?
    } else {
        octave
    };
    Pitch::from_parts(octave, pitch_class)
}
