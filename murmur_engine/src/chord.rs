// Chord builder: scale-degree harmony over pitch-list indices.
//
// A chord is built from a root index into the pitch list. Its quality comes
// from the root's scale degree: major and natural minor use the classic
// diatonic tables, every other scale derives the quality from its own
// semitone intervals (a fifth of 6 semitones is diminished, a third of 3 is
// minor, anything else major).
//
// Third and fifth are stacked by scale steps, not semitones: +2 steps for a
// major third, +1 for a minor third, +4 for a perfect fifth, +3 for a
// diminished one. All tones wrap inside the root's octave block, so a chord
// never reaches past the pitch list. With probability `dissonance`, one
// extra scale tone from the same block is appended.

use crate::pitch::Pitch;
use crate::scale::{Scale, ScaleKind};
use murmur_prng::MurmurRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
}

impl ChordQuality {
    /// Quality of the triad built on `degree` of `kind`.
    pub fn for_degree(kind: ScaleKind, degree: usize) -> Self {
        use ChordQuality::*;
        match kind {
            ScaleKind::Major => [Major, Minor, Minor, Major, Major, Minor, Diminished][degree % 7],
            ScaleKind::Minor => [Minor, Diminished, Major, Minor, Minor, Major, Major][degree % 7],
            _ => derived_quality(kind.intervals(), degree),
        }
    }

    fn third_steps(self) -> usize {
        match self {
            ChordQuality::Major => 2,
            ChordQuality::Minor | ChordQuality::Diminished => 1,
        }
    }

    fn fifth_steps(self) -> usize {
        match self {
            ChordQuality::Diminished => 3,
            ChordQuality::Major | ChordQuality::Minor => 4,
        }
    }
}

fn derived_quality(intervals: &[u8], degree: usize) -> ChordQuality {
    let n = intervals.len();
    let root = intervals[degree % n];
    let span = |steps: usize| (intervals[(degree + steps) % n] + 12 - root) % 12;
    if span(4) == 6 {
        ChordQuality::Diminished
    } else if span(2) == 3 {
        ChordQuality::Minor
    } else {
        ChordQuality::Major
    }
}

/// A chord as pitch-list indices, root first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chord {
    pub quality: ChordQuality,
    pub indices: Vec<usize>,
}

impl Chord {
    pub fn pitches(&self, scale: &Scale) -> Vec<Pitch> {
        self.indices
            .iter()
            .filter_map(|&i| scale.pitch_at(i))
            .collect()
    }

    pub fn names(&self, scale: &Scale) -> Vec<String> {
        self.pitches(scale).into_iter().map(Pitch::name).collect()
    }
}

/// Build a 3-note chord on `root_index`, or 4 notes when the dissonance
/// roll fires. `root_index` is wrapped into the pitch list first.
pub fn build_chord(
    root_index: usize,
    scale: &Scale,
    dissonance: f64,
    rng: &mut MurmurRng,
) -> Chord {
    let n = scale.pattern_len();
    let root_index = root_index % scale.len().max(1);
    let block = root_index - root_index % n;
    let degree = root_index % n;
    let quality = ChordQuality::for_degree(scale.kind, degree);

    let mut indices = vec![
        root_index,
        block + (degree + quality.third_steps()) % n,
        block + (degree + quality.fifth_steps()) % n,
    ];

    if rng.random_bool(dissonance) {
        let spare: Vec<usize> = (block..block + n).filter(|i| !indices.contains(i)).collect();
        let extra = rng
            .choose(&spare)
            .copied()
            .unwrap_or_else(|| block + rng.range_usize(0, n));
        indices.push(extra);
    }

    Chord { quality, indices }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::OctaveRange;

    fn c_major() -> Scale {
        Scale::new("C", "major", OctaveRange { min: 3, max: 5 }).unwrap()
    }

    #[test]
    fn diatonic_quality_tables() {
        assert_eq!(ChordQuality::for_degree(ScaleKind::Major, 0), ChordQuality::Major);
        assert_eq!(ChordQuality::for_degree(ScaleKind::Major, 1), ChordQuality::Minor);
        assert_eq!(ChordQuality::for_degree(ScaleKind::Major, 5), ChordQuality::Minor);
        assert_eq!(ChordQuality::for_degree(ScaleKind::Major, 6), ChordQuality::Diminished);
        assert_eq!(ChordQuality::for_degree(ScaleKind::Minor, 1), ChordQuality::Diminished);
        assert_eq!(ChordQuality::for_degree(ScaleKind::Minor, 2), ChordQuality::Major);
    }

    #[test]
    fn derived_quality_matches_tables_for_diatonic_modes() {
        // Dorian on D is the white-key collection; degree 0 is D minor.
        assert_eq!(ChordQuality::for_degree(ScaleKind::Dorian, 0), ChordQuality::Minor);
        assert_eq!(ChordQuality::for_degree(ScaleKind::Dorian, 5), ChordQuality::Diminished);
        assert_eq!(ChordQuality::for_degree(ScaleKind::Mixolydian, 0), ChordQuality::Major);
    }

    #[test]
    fn tonic_chord_in_c_major() {
        let scale = c_major();
        let mut rng = MurmurRng::new(1);
        let chord = build_chord(7, &scale, 0.0, &mut rng);
        assert_eq!(chord.quality, ChordQuality::Major);
        assert_eq!(chord.indices, vec![7, 9, 11]);
        assert_eq!(chord.names(&scale), vec!["C4", "E4", "G4"]);
    }

    #[test]
    fn chord_sizes_and_blocks() {
        let scale = c_major();
        let mut rng = MurmurRng::new(77);
        for root in 0..scale.len() {
            for dissonance in [0.0, 1.0] {
                let chord = build_chord(root, &scale, dissonance, &mut rng);
                let expected = if dissonance == 1.0 { 4 } else { 3 };
                assert_eq!(chord.indices.len(), expected);
                let root_block = root / 7;
                for &i in &chord.indices {
                    assert!(i < scale.len());
                    assert!((i / 7).abs_diff(root_block) <= 1);
                }
            }
        }
    }

    #[test]
    fn dissonant_tone_is_new() {
        let scale = c_major();
        let mut rng = MurmurRng::new(4);
        for _ in 0..200 {
            let chord = build_chord(3, &scale, 1.0, &mut rng);
            let extra = chord.indices[3];
            assert!(!chord.indices[..3].contains(&extra));
        }
    }
}
