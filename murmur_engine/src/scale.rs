// Scale model: named interval patterns and the pitch lists built from them.
//
// A scale is a root pitch class, an interval pattern (semitone offsets 0-11
// from the root, strictly increasing) and an octave range. From those three
// the engine derives the *pitch list*: every scale tone in every octave of
// the range, in ascending order. Voices never pick raw pitches; they pick
// indices into this list, which is what keeps every generated note in key.
//
// Index arithmetic used throughout the engine:
// - `index = octave_block * pattern_len + degree`
// - `degree = index % pattern_len`, `octave_block = index / pattern_len`
//
// The drone voice plays below the melodic range, so the scale also derives
// three drone pitches: the root one and two octaves under the lowest melodic
// octave, and a perfect fifth above the lower of those. If the octave range
// sits too low for that, a fixed safe triple is used instead.
//
// See also: `chord.rs` for scale-degree harmony, `markov.rs` for the melodic
// walk over pitch-list indices, `mood.rs` which supplies the octave range.

use crate::error::EngineError;
use crate::pitch::{Pitch, parse_pitch_class};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Played when the drone pitches cannot be derived from the octave range
/// (C2, C3, G2).
pub const FALLBACK_DRONE: [Pitch; 3] = [Pitch(24), Pitch(36), Pitch(31)];

/// Highest octave a melodic range may reach without leaving the note space.
pub const MAX_OCTAVE: u8 = 8;

/// Named interval patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleKind {
    Major,
    Minor,
    HarmonicMinor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    PentatonicMajor,
    PentatonicMinor,
    Blues,
}

impl ScaleKind {
    pub const ALL: [ScaleKind; 10] = [
        ScaleKind::Major,
        ScaleKind::Minor,
        ScaleKind::HarmonicMinor,
        ScaleKind::Dorian,
        ScaleKind::Phrygian,
        ScaleKind::Lydian,
        ScaleKind::Mixolydian,
        ScaleKind::PentatonicMajor,
        ScaleKind::PentatonicMinor,
        ScaleKind::Blues,
    ];

    /// Semitone offsets from the root, ascending.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            ScaleKind::Major => &[0, 2, 4, 5, 7, 9, 11],
            ScaleKind::Minor => &[0, 2, 3, 5, 7, 8, 10],
            ScaleKind::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            ScaleKind::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            ScaleKind::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            ScaleKind::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            ScaleKind::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            ScaleKind::PentatonicMajor => &[0, 2, 4, 7, 9],
            ScaleKind::PentatonicMinor => &[0, 3, 5, 7, 10],
            ScaleKind::Blues => &[0, 3, 5, 6, 7, 10],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScaleKind::Major => "major",
            ScaleKind::Minor => "minor",
            ScaleKind::HarmonicMinor => "harmonic_minor",
            ScaleKind::Dorian => "dorian",
            ScaleKind::Phrygian => "phrygian",
            ScaleKind::Lydian => "lydian",
            ScaleKind::Mixolydian => "mixolydian",
            ScaleKind::PentatonicMajor => "pentatonic_major",
            ScaleKind::PentatonicMinor => "pentatonic_minor",
            ScaleKind::Blues => "blues",
        }
    }

    /// Look up a scale by name. Accepts `-`, `_` or spaces as separators.
    pub fn from_name(name: &str) -> Result<Self, EngineError> {
        let normalized = name.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let normalized = match normalized.as_str() {
            "ionian" => "major",
            "aeolian" | "natural_minor" => "minor",
            other => other,
        };
        ScaleKind::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| EngineError::UnknownScale(name.to_string()))
    }
}

/// Inclusive octave span of the melodic pitch list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OctaveRange {
    pub min: u8,
    pub max: u8,
}

impl OctaveRange {
    pub fn new(min: u8, max: u8) -> Result<Self, EngineError> {
        if min > max || max > MAX_OCTAVE {
            return Err(EngineError::InvalidOctaveRange { min, max });
        }
        Ok(OctaveRange { min, max })
    }

    pub fn octave_count(self) -> usize {
        usize::from(self.max - self.min) + 1
    }
}

/// Build the ascending pitch list for `root` / `scale` over `octaves`.
///
/// Length is `pattern_len * octave_count`. Fails without producing a list if
/// either name is unrecognized.
pub fn build_pitch_list(
    root: &str,
    scale: &str,
    octaves: OctaveRange,
) -> Result<Vec<Pitch>, EngineError> {
    Ok(Scale::new(root, scale, octaves)?.pitches)
}

/// A concrete scale instance and its derived pitch list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scale {
    pub kind: ScaleKind,
    /// Root pitch class (0 = C).
    pub root: u8,
    pub octaves: OctaveRange,
    pitches: Vec<Pitch>,
}

impl Scale {
    pub fn new(root: &str, scale: &str, octaves: OctaveRange) -> Result<Self, EngineError> {
        let root_pc =
            parse_pitch_class(root).ok_or_else(|| EngineError::UnknownRoot(root.to_string()))?;
        let kind = ScaleKind::from_name(scale)?;
        Self::from_parts(root_pc, kind, octaves)
    }

    pub fn from_parts(root: u8, kind: ScaleKind, octaves: OctaveRange) -> Result<Self, EngineError> {
        // Re-validate: the range may have been built field-by-field.
        let octaves = OctaveRange::new(octaves.min, octaves.max)?;
        let root = root % 12;
        let mut pitches = Vec::with_capacity(kind.intervals().len() * octaves.octave_count());
        for octave in octaves.min..=octaves.max {
            for &offset in kind.intervals() {
                // octave <= MAX_OCTAVE keeps this at or under 118.
                pitches.push(Pitch(octave * 12 + root + offset));
            }
        }
        Ok(Scale {
            kind,
            root,
            octaves,
            pitches,
        })
    }

    pub fn pitches(&self) -> &[Pitch] {
        &self.pitches
    }

    pub fn len(&self) -> usize {
        self.pitches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pitches.is_empty()
    }

    pub fn pattern_len(&self) -> usize {
        self.kind.intervals().len()
    }

    pub fn octave_count(&self) -> usize {
        self.octaves.octave_count()
    }

    pub fn pitch_at(&self, index: usize) -> Option<Pitch> {
        self.pitches.get(index).copied()
    }

    /// Semitones from the root up to scale degree `degree` (wrapping).
    pub fn degree_semitones(&self, degree: usize) -> u8 {
        let intervals = self.kind.intervals();
        intervals[degree % intervals.len()]
    }

    /// Size of the scale's own third above the root: major if the pattern
    /// contains a major third, otherwise minor.
    pub fn third_semitones(&self) -> u8 {
        if self.kind.intervals().contains(&4) { 4 } else { 3 }
    }

    /// The three drone pitches: root two octaves below the melodic range,
    /// root one octave below, and a fifth above the lower root.
    pub fn drone_pitches(&self) -> [Pitch; 3] {
        let derived: Vec<Pitch> = [
            self.octaves
                .min
                .checked_sub(2)
                .and_then(|o| Pitch::from_parts(o, self.root)),
            self.octaves
                .min
                .checked_sub(1)
                .and_then(|o| Pitch::from_parts(o, self.root)),
            self.octaves
                .min
                .checked_sub(2)
                .and_then(|o| Pitch::from_parts(o, self.root))
                .and_then(|p| p.transposed(7)),
        ]
        .into_iter()
        .flatten()
        .collect();

        match <[Pitch; 3]>::try_from(derived) {
            Ok(triple) => triple,
            Err(partial) => {
                warn!(
                    derived = partial.len(),
                    min_octave = self.octaves.min,
                    "drone pitches underivable, using fallback triple"
                );
                FALLBACK_DRONE
            }
        }
    }
}
