// Shared harmony state: the slowly-changing "current chord".
//
// Melody and ambience read the current chord; only the melody voice's
// per-tick check mutates it. The chord is regenerated from a random scale
// degree in the middle octave block whenever the backend clock passes the
// deadline, and the next deadline is drawn uniformly from 8-16 seconds
// ahead. Harmonic rhythm is therefore decoupled from the melodic tick rate.

use crate::backend::Seconds;
use crate::chord::{Chord, build_chord};
use crate::mood::Bounds;
use crate::pitch::Pitch;
use crate::scale::Scale;
use murmur_prng::MurmurRng;
use tracing::debug;

/// How long a chord is held before the next change, in seconds.
pub const CHORD_HOLD: Bounds = Bounds::new(8.0, 16.0);

#[derive(Debug, Clone, Default)]
pub struct HarmonyState {
    current: Option<Chord>,
    next_chord_deadline: Seconds,
}

impl HarmonyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Chord> {
        self.current.as_ref()
    }

    pub fn current_pitches(&self, scale: &Scale) -> Option<Vec<Pitch>> {
        self.current.as_ref().map(|c| c.pitches(scale))
    }

    pub fn deadline(&self) -> Seconds {
        self.next_chord_deadline
    }

    /// Drop the chord and make the next `refresh` regenerate immediately.
    pub fn reset(&mut self) {
        self.current = None;
        self.next_chord_deadline = 0.0;
    }

    /// Regenerate the chord if `now` is past the deadline. Returns whether
    /// the chord changed.
    pub fn refresh(
        &mut self,
        now: Seconds,
        scale: &Scale,
        dissonance: f64,
        rng: &mut MurmurRng,
    ) -> bool {
        if self.current.is_some() && now <= self.next_chord_deadline {
            return false;
        }
        let n = scale.pattern_len();
        let block = scale.octave_count() / 2;
        let degree = rng.range_usize(0, n);
        let chord = build_chord(block * n + degree, scale, dissonance, rng);
        self.next_chord_deadline = now + CHORD_HOLD.sample(rng);
        debug!(
            chord = ?chord.names(scale),
            quality = ?chord.quality,
            until = self.next_chord_deadline,
            "harmony changed"
        );
        self.current = Some(chord);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::OctaveRange;

    fn scale() -> Scale {
        Scale::new("A", "minor", OctaveRange { min: 3, max: 5 }).unwrap()
    }

    #[test]
    fn first_refresh_always_builds_a_chord() {
        let mut harmony = HarmonyState::new();
        let mut rng = MurmurRng::new(1);
        assert!(harmony.current().is_none());
        assert!(harmony.refresh(0.0, &scale(), 0.0, &mut rng));
        assert!(harmony.current().is_some());
    }

    #[test]
    fn chord_held_until_deadline() {
        let scale = scale();
        let mut harmony = HarmonyState::new();
        let mut rng = MurmurRng::new(2);
        harmony.refresh(1.0, &scale, 0.0, &mut rng);
        let deadline = harmony.deadline();
        assert!((9.0..17.0).contains(&deadline));
        assert!(!harmony.refresh(deadline, &scale, 0.0, &mut rng));
        assert!(harmony.refresh(deadline + 0.01, &scale, 0.0, &mut rng));
    }

    #[test]
    fn chords_live_in_middle_block() {
        let scale = scale();
        let mut harmony = HarmonyState::new();
        let mut rng = MurmurRng::new(3);
        for t in 0..100 {
            harmony.refresh(t as f64 * 20.0, &scale, 0.5, &mut rng);
            let root = harmony.current().unwrap().indices[0];
            assert_eq!(root / scale.pattern_len(), 1);
        }
    }

    #[test]
    fn reset_clears_chord() {
        let mut harmony = HarmonyState::new();
        let mut rng = MurmurRng::new(4);
        harmony.refresh(5.0, &scale(), 0.0, &mut rng);
        harmony.reset();
        assert!(harmony.current().is_none());
        assert_eq!(harmony.deadline(), 0.0);
    }
}
