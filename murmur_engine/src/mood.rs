// Mood profiles: the musical-parameter envelope each named mood imposes.
//
// A mood is the engine's main creative dial. Its `MoodProfile` is an
// immutable template (tempo range, note-length range, velocity range,
// octave range, chord/rest probabilities, filter sweep rate, reverb send,
// dissonance factor, swing) plus two derived artifacts:
//
// - a `TransitionMatrix` over scale degrees, generated from the profile's
//   `motion` weights (relative preference for repeating a degree, moving by
//   step, by skip, or leaping) and row-normalized. Generating rather than
//   hand-writing the matrix lets any pattern length (5-tone pentatonics,
//   6-tone blues, 7-tone diatonic) share one mood table.
// - a set of three `RhythmPattern`s, ordered sparse to dense, from which
//   the rhythm voice draws with density-dependent weights.
//
// Each engine copies the profile into a mutable `MoodSettings`, which
// Parameter Evolution and the Variation System perturb. `MoodSettings`
// re-establishes `min <= max` and the absolute limits after every mutation.
//
// See also: `markov.rs` (consumer of the matrix), `evolution.rs` (mutator
// of the settings), `config.rs` (density-derived pattern weights).

use crate::error::EngineError;
use crate::scale::OctaveRange;
use murmur_prng::MurmurRng;
use serde::{Deserialize, Serialize};

/// Absolute bounds on note length in seconds, enforced after evolution.
pub const NOTE_LENGTH_LIMITS: Bounds = Bounds { min: 0.05, max: 8.0 };
/// Absolute bounds on normalized velocity.
pub const VELOCITY_LIMITS: Bounds = Bounds { min: 0.05, max: 1.0 };
/// Absolute bounds on tempo in BPM.
pub const TEMPO_LIMITS: Bounds = Bounds { min: 30.0, max: 240.0 };

/// Extra weight on transitions that land on the root degree.
const TONIC_PULL: f64 = 1.25;

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// Inclusive `min..=max` pair of floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Bounds { min, max }
    }

    pub fn mid(self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn clamp(self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }

    /// Uniform draw in `[min, max)`.
    pub fn sample(self, rng: &mut MurmurRng) -> f64 {
        rng.range_f64(self.min, self.max)
    }

    /// Clamp both ends into `limits`, then swap them if they crossed.
    pub fn normalized(self, limits: Bounds) -> Self {
        let a = limits.clamp(self.min);
        let b = limits.clamp(self.max);
        Bounds {
            min: a.min(b),
            max: a.max(b),
        }
    }
}

// ---------------------------------------------------------------------------
// Moods and profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Calm,
    Dreamy,
    Mysterious,
    Intense,
    Playful,
}

impl Mood {
    pub const ALL: [Mood; 5] = [
        Mood::Calm,
        Mood::Dreamy,
        Mood::Mysterious,
        Mood::Intense,
        Mood::Playful,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Mood::Calm => "calm",
            Mood::Dreamy => "dreamy",
            Mood::Mysterious => "mysterious",
            Mood::Intense => "intense",
            Mood::Playful => "playful",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, EngineError> {
        let normalized = name.trim().to_ascii_lowercase();
        Mood::ALL
            .into_iter()
            .find(|m| m.name() == normalized)
            .ok_or_else(|| EngineError::UnknownMood(name.to_string()))
    }

    pub fn profile(self) -> MoodProfile {
        match self {
            Mood::Calm => MoodProfile {
                tempo: Bounds::new(60.0, 80.0),
                note_length: Bounds::new(0.6, 2.0),
                velocity: Bounds::new(0.3, 0.6),
                octaves: OctaveRange { min: 3, max: 5 },
                chord_probability: 0.15,
                rest_probability: 0.35,
                filter_sweep_rate: 0.05,
                reverb_wet: 0.5,
                dissonance_factor: 0.05,
                swing: 0.0,
                motion: [0.10, 0.55, 0.25, 0.10],
            },
            Mood::Dreamy => MoodProfile {
                tempo: Bounds::new(66.0, 88.0),
                note_length: Bounds::new(0.8, 2.5),
                velocity: Bounds::new(0.25, 0.55),
                octaves: OctaveRange { min: 4, max: 6 },
                chord_probability: 0.25,
                rest_probability: 0.3,
                filter_sweep_rate: 0.08,
                reverb_wet: 0.7,
                dissonance_factor: 0.15,
                swing: 0.1,
                motion: [0.15, 0.45, 0.25, 0.15],
            },
            Mood::Mysterious => MoodProfile {
                tempo: Bounds::new(70.0, 95.0),
                note_length: Bounds::new(0.4, 1.5),
                velocity: Bounds::new(0.3, 0.65),
                octaves: OctaveRange { min: 3, max: 5 },
                chord_probability: 0.2,
                rest_probability: 0.4,
                filter_sweep_rate: 0.12,
                reverb_wet: 0.6,
                dissonance_factor: 0.35,
                swing: 0.05,
                motion: [0.10, 0.40, 0.25, 0.25],
            },
            Mood::Intense => MoodProfile {
                tempo: Bounds::new(120.0, 150.0),
                note_length: Bounds::new(0.1, 0.5),
                velocity: Bounds::new(0.6, 0.95),
                octaves: OctaveRange { min: 3, max: 5 },
                chord_probability: 0.3,
                rest_probability: 0.1,
                filter_sweep_rate: 0.5,
                reverb_wet: 0.25,
                dissonance_factor: 0.25,
                swing: 0.0,
                motion: [0.10, 0.35, 0.30, 0.25],
            },
            Mood::Playful => MoodProfile {
                tempo: Bounds::new(100.0, 126.0),
                note_length: Bounds::new(0.15, 0.6),
                velocity: Bounds::new(0.5, 0.85),
                octaves: OctaveRange { min: 4, max: 6 },
                chord_probability: 0.2,
                rest_probability: 0.2,
                filter_sweep_rate: 0.25,
                reverb_wet: 0.3,
                dissonance_factor: 0.1,
                swing: 0.2,
                motion: [0.15, 0.40, 0.30, 0.15],
            },
        }
    }

    /// The mood's three rhythm patterns, sparse to dense.
    pub fn rhythm_patterns(self) -> [RhythmPattern; 3] {
        let [a, b, c] = match self {
            Mood::Calm => ["x.......x.......", "x.......x...x...", "x...x...x...x..."],
            Mood::Dreamy => ["x.......", "x...x...", "x..x..x."],
            Mood::Mysterious => ["x.....x.....x...", "x..x....x.x.....", "x..x..x.x..x..x."],
            Mood::Intense => ["x...x...x...x...", "x.x.x.x.x.x.x.x.", "xxx.x.xxx.x.xx.x"],
            Mood::Playful => ["x..x..x.", "x.xx..x.", "x.xxx.xx"],
        };
        [
            RhythmPattern::parse(a),
            RhythmPattern::parse(b),
            RhythmPattern::parse(c),
        ]
    }
}

/// Immutable per-mood parameter template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodProfile {
    /// BPM.
    pub tempo: Bounds,
    /// Melody note length in seconds.
    pub note_length: Bounds,
    /// Normalized velocity, 0..1.
    pub velocity: Bounds,
    pub octaves: OctaveRange,
    pub chord_probability: f64,
    pub rest_probability: f64,
    /// Filter sweeps per second; a sweep lasts `1 / filter_sweep_rate`.
    pub filter_sweep_rate: f64,
    pub reverb_wet: f64,
    pub dissonance_factor: f64,
    /// Fraction of a step by which odd rhythm steps are delayed.
    pub swing: f64,
    /// Relative weight of repeat / step / skip / leap degree motion.
    pub motion: [f64; 4],
}

/// Mutable working copy of a mood profile, owned by one engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodSettings {
    pub mood: Mood,
    pub params: MoodProfile,
}

impl MoodSettings {
    pub fn new(mood: Mood) -> Self {
        MoodSettings {
            mood,
            params: mood.profile(),
        }
    }

    /// Restore `min <= max`, absolute limits, and probabilities in [0, 1].
    pub fn enforce_invariants(&mut self) {
        let p = &mut self.params;
        p.tempo = p.tempo.normalized(TEMPO_LIMITS);
        p.note_length = p.note_length.normalized(NOTE_LENGTH_LIMITS);
        p.velocity = p.velocity.normalized(VELOCITY_LIMITS);
        p.chord_probability = p.chord_probability.clamp(0.0, 1.0);
        p.rest_probability = p.rest_probability.clamp(0.0, 1.0);
        p.dissonance_factor = p.dissonance_factor.clamp(0.0, 1.0);
        p.reverb_wet = p.reverb_wet.clamp(0.0, 1.0);
        p.swing = p.swing.clamp(0.0, 0.5);
    }
}

// ---------------------------------------------------------------------------
// Transition matrix
// ---------------------------------------------------------------------------

/// Row-stochastic matrix over scale degrees: `rows[from][to]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionMatrix {
    rows: Vec<Vec<f64>>,
}

impl TransitionMatrix {
    /// Generate the matrix for a mood over a pattern of `size` degrees.
    pub fn for_mood(profile: &MoodProfile, size: usize) -> Self {
        let size = size.max(1);
        let rows = (0..size)
            .map(|from| {
                let raw: Vec<f64> = (0..size)
                    .map(|to| {
                        let d = from.abs_diff(to);
                        let circular = d.min(size - d);
                        let class = circular.min(3);
                        let w = profile.motion[class].max(0.0);
                        if to == 0 { w * TONIC_PULL } else { w }
                    })
                    .collect();
                normalize_row(raw)
            })
            .collect();
        TransitionMatrix { rows }
    }

    /// Build from explicit rows, normalizing each. Empty input yields a 1x1
    /// identity.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        if rows.is_empty() {
            return TransitionMatrix {
                rows: vec![vec![1.0]],
            };
        }
        let size = rows.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(size, 0.0);
                normalize_row(row)
            })
            .collect();
        TransitionMatrix { rows }
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, degree: usize) -> &[f64] {
        &self.rows[degree % self.rows.len()]
    }

    /// Check every row sums to 1 within `tolerance` and entries lie in [0, 1].
    pub fn is_stochastic(&self, tolerance: f64) -> bool {
        self.rows.iter().all(|row| {
            let sum: f64 = row.iter().sum();
            (sum - 1.0).abs() <= tolerance && row.iter().all(|&p| (0.0..=1.0).contains(&p))
        })
    }
}

/// Scale a row to sum to 1. Rows with no usable mass become uniform.
fn normalize_row(row: Vec<f64>) -> Vec<f64> {
    let clean: Vec<f64> = row
        .into_iter()
        .map(|w| if w.is_finite() && w > 0.0 { w } else { 0.0 })
        .collect();
    let total: f64 = clean.iter().sum();
    if total <= 0.0 {
        let n = clean.len().max(1);
        return vec![1.0 / n as f64; n];
    }
    clean.into_iter().map(|w| w / total).collect()
}

// ---------------------------------------------------------------------------
// Rhythm patterns
// ---------------------------------------------------------------------------

/// Fixed-length on/off step sequence (8 or 16 steps).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RhythmPattern {
    pub steps: Vec<bool>,
}

impl RhythmPattern {
    /// Parse `x` (hit) / `.` (rest) notation.
    pub fn parse(notation: &str) -> Self {
        RhythmPattern {
            steps: notation.chars().map(|c| c == 'x').collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.steps.iter().filter(|&&s| s).count()
    }

    pub fn is_active(&self, step: usize) -> bool {
        !self.steps.is_empty() && self.steps[step % self.steps.len()]
    }

    /// Flip each step independently with probability `p`.
    pub fn mutate(&mut self, p: f64, rng: &mut MurmurRng) -> usize {
        let mut flipped = 0;
        for step in &mut self.steps {
            if rng.random_bool(p) {
                *step = !*step;
                flipped += 1;
            }
        }
        flipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mood_matrix_is_stochastic_for_every_size() {
        for mood in Mood::ALL {
            for size in 1..=12 {
                let m = TransitionMatrix::for_mood(&mood.profile(), size);
                assert_eq!(m.size(), size);
                assert!(m.is_stochastic(1e-6), "{mood:?} size {size}");
            }
        }
    }

    #[test]
    fn stepwise_motion_outweighs_leaps() {
        let m = TransitionMatrix::for_mood(&Mood::Calm.profile(), 7);
        let row = m.row(3);
        assert!(row[2] > row[6]);
        assert!(row[4] > row[0] / TONIC_PULL);
    }

    #[test]
    fn from_rows_normalizes_and_pads() {
        let m = TransitionMatrix::from_rows(vec![vec![2.0, 2.0], vec![0.0]]);
        assert!(m.is_stochastic(1e-9));
        assert_eq!(m.row(1), &[0.5, 0.5]);
    }

    #[test]
    fn rhythm_sets_are_sparse_to_dense() {
        for mood in Mood::ALL {
            let [a, b, c] = mood.rhythm_patterns();
            assert!(a.hits() <= b.hits() && b.hits() <= c.hits(), "{mood:?}");
            for p in [&a, &b, &c] {
                assert!(p.len() == 8 || p.len() == 16, "{mood:?}");
            }
        }
    }

    #[test]
    fn profiles_satisfy_invariants() {
        for mood in Mood::ALL {
            let mut settings = MoodSettings::new(mood);
            let before = settings.clone();
            settings.enforce_invariants();
            assert_eq!(settings, before, "{mood:?} profile violates its own limits");
        }
    }

    #[test]
    fn enforce_invariants_repairs_crossed_bounds() {
        let mut settings = MoodSettings::new(Mood::Intense);
        settings.params.velocity = Bounds::new(1.4, 0.2);
        settings.params.note_length = Bounds::new(-1.0, 20.0);
        settings.enforce_invariants();
        assert_eq!(settings.params.velocity, Bounds::new(0.2, 1.0));
        assert_eq!(settings.params.note_length, NOTE_LENGTH_LIMITS);
    }

    #[test]
    fn mood_names_roundtrip() {
        for mood in Mood::ALL {
            assert_eq!(Mood::from_name(mood.name()).unwrap(), mood);
        }
        assert!(Mood::from_name("grumpy").is_err());
    }

    #[test]
    fn mutate_zero_probability_is_stable() {
        let mut rng = MurmurRng::new(1);
        let mut p = RhythmPattern::parse("x.x.x.x.");
        assert_eq!(p.mutate(0.0, &mut rng), 0);
        assert_eq!(p, RhythmPattern::parse("x.x.x.x."));
    }
}
