// Markov melody walker: the engine's primary generative algorithm.
//
// The walker holds one piece of state, the current scale degree, and on each
// call draws the next degree from that degree's row of the mood's
// `TransitionMatrix`. Melodic coherence comes from two things only: the
// matrix's bias toward stepwise motion (see `mood.rs`), and periodic
// root-anchoring. With probability `ROOT_ANCHOR_PROBABILITY`, or whenever
// the walker has been reset, it jumps straight to degree 0, which keeps long
// walks from drifting away from the tonal centre.
//
// Degrees are then placed in an octave block of the pitch list. The octave
// is itself a small random walk that starts on the middle octave of the
// range and never strays more than one block from it, so edge octaves are
// reachable but the middle dominates.
//
// The returned pitch-list index is always `< scale.len()`.

use crate::mood::TransitionMatrix;
use crate::scale::Scale;
use murmur_prng::MurmurRng;

/// Chance per step of snapping back to the root degree.
pub const ROOT_ANCHOR_PROBABILITY: f64 = 0.2;

/// Down / stay / up weights for the octave walk.
const OCTAVE_STEP_WEIGHTS: [f64; 3] = [0.25, 0.5, 0.25];

#[derive(Debug, Clone, Default)]
pub struct MelodyWalker {
    /// `None` is the reset state.
    current_degree: Option<usize>,
    octave: Option<usize>,
}

impl MelodyWalker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.current_degree = None;
        self.octave = None;
    }

    pub fn current_degree(&self) -> Option<usize> {
        self.current_degree
    }

    /// Advance to the next scale degree.
    pub fn next_degree(&mut self, matrix: &TransitionMatrix, rng: &mut MurmurRng) -> usize {
        let size = matrix.size();
        let anchor = rng.random_bool(ROOT_ANCHOR_PROBABILITY);
        let next = match self.current_degree {
            Some(current) if !anchor && current < size => {
                sample_row(matrix.row(current), rng.next_f64()).unwrap_or(0)
            }
            _ => 0,
        };
        self.current_degree = Some(next);
        next
    }

    /// Advance and map the new degree to a pitch-list index.
    pub fn next_index(
        &mut self,
        matrix: &TransitionMatrix,
        scale: &Scale,
        rng: &mut MurmurRng,
    ) -> usize {
        let pattern_len = scale.pattern_len();
        let degree = self.next_degree(matrix, rng) % pattern_len;
        let octave = self.next_octave(scale.octave_count(), rng);
        octave * pattern_len + degree
    }

    fn next_octave(&mut self, octave_count: usize, rng: &mut MurmurRng) -> usize {
        let top = octave_count.saturating_sub(1) as i64;
        let center = (octave_count / 2) as i64;
        let previous = self.octave.map_or(center, |o| o as i64);
        let delta = rng.weighted_index(&OCTAVE_STEP_WEIGHTS).unwrap_or(1) as i64 - 1;
        let next = (previous + delta).clamp(center - 1, center + 1).clamp(0, top);
        self.octave = Some(next as usize);
        next as usize
    }
}

/// Walk a probability row with a draw in [0, 1): the first cumulative bucket
/// exceeding the draw wins.
fn sample_row(row: &[f64], draw: f64) -> Option<usize> {
    if row.is_empty() {
        return None;
    }
    let mut cumulative = 0.0;
    for (degree, &p) in row.iter().enumerate() {
        cumulative += p;
        if cumulative > draw {
            return Some(degree);
        }
    }
    // Rounding left the row a hair short of 1.
    row.iter().rposition(|&p| p > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mood::Mood;
    use crate::scale::{OctaveRange, ScaleKind};

    #[test]
    fn first_step_is_root() {
        let matrix = TransitionMatrix::for_mood(&Mood::Calm.profile(), 7);
        let mut rng = MurmurRng::new(7);
        let mut walker = MelodyWalker::new();
        assert_eq!(walker.next_degree(&matrix, &mut rng), 0);
        walker.reset();
        assert_eq!(walker.current_degree(), None);
        assert_eq!(walker.next_degree(&matrix, &mut rng), 0);
    }

    #[test]
    fn indices_stay_in_pitch_list() {
        let mut rng = MurmurRng::new(99);
        for kind in ScaleKind::ALL {
            for (min, max) in [(3, 3), (3, 5), (2, 7)] {
                let scale = Scale::from_parts(9, kind, OctaveRange { min, max }).unwrap();
                for mood in Mood::ALL {
                    let matrix = TransitionMatrix::for_mood(&mood.profile(), scale.pattern_len());
                    let mut walker = MelodyWalker::new();
                    for _ in 0..2_000 {
                        let i = walker.next_index(&matrix, &scale, &mut rng);
                        assert!(i < scale.len(), "{kind:?} {mood:?} index {i}");
                    }
                }
            }
        }
    }

    #[test]
    fn arbitrary_matrices_stay_in_range_and_respect_zeros() {
        let mut rng = MurmurRng::new(2024);
        let scale = Scale::from_parts(4, ScaleKind::Dorian, OctaveRange { min: 2, max: 5 }).unwrap();
        let mut matrices = vec![TransitionMatrix::from_rows(vec![vec![1.0]])];
        for size in 1..=9 {
            for _ in 0..5 {
                let rows = (0..size)
                    .map(|_| {
                        (0..size)
                            .map(|_| {
                                if rng.random_bool(0.4) {
                                    0.0
                                } else {
                                    rng.range_f64(0.0, 3.0)
                                }
                            })
                            .collect()
                    })
                    .collect();
                matrices.push(TransitionMatrix::from_rows(rows));
            }
        }
        // A row with no mass at all becomes uniform.
        matrices.push(TransitionMatrix::from_rows(vec![
            vec![0.0; 3],
            vec![0.0, 1.0, 0.0],
            vec![1.0, 0.0, 0.0],
        ]));

        for matrix in &matrices {
            assert!(matrix.is_stochastic(1e-9));
            let mut walker = MelodyWalker::new();
            for _ in 0..500 {
                let previous = walker.current_degree();
                let index = walker.next_index(matrix, &scale, &mut rng);
                assert!(index < scale.len(), "index {index} of {}", scale.len());
                let degree = walker.current_degree().unwrap();
                assert!(degree < matrix.size());
                if let Some(from) = previous {
                    if degree != 0 {
                        assert!(matrix.row(from)[degree] > 0.0, "took zero edge {from} -> {degree}");
                    }
                }
            }
        }
    }

    #[test]
    fn single_degree_matrix_always_returns_root() {
        let matrix = TransitionMatrix::from_rows(vec![vec![0.0]]);
        let mut rng = MurmurRng::new(8);
        let mut walker = MelodyWalker::new();
        for _ in 0..100 {
            assert_eq!(walker.next_degree(&matrix, &mut rng), 0);
        }
    }

    #[test]
    fn oversized_current_degree_is_treated_as_reset() {
        let big = TransitionMatrix::for_mood(&Mood::Intense.profile(), 7);
        let small = TransitionMatrix::for_mood(&Mood::Intense.profile(), 5);
        let mut rng = MurmurRng::new(3);
        let mut walker = MelodyWalker::new();
        for _ in 0..50 {
            if walker.next_degree(&big, &mut rng) >= 5 {
                break;
            }
        }
        let d = walker.next_degree(&small, &mut rng);
        assert!(d < 5);
    }

    #[test]
    fn root_is_revisited_often() {
        let matrix = TransitionMatrix::for_mood(&Mood::Mysterious.profile(), 7);
        let mut rng = MurmurRng::new(11);
        let mut walker = MelodyWalker::new();
        let n = 10_000;
        let roots = (0..n)
            .filter(|_| walker.next_degree(&matrix, &mut rng) == 0)
            .count();
        // Anchoring alone gives ~20%; the matrix adds more.
        assert!(roots as f64 / n as f64 > ROOT_ANCHOR_PROBABILITY);
    }

    #[test]
    fn octave_walk_stays_near_middle() {
        let scale = Scale::from_parts(0, ScaleKind::Major, OctaveRange { min: 1, max: 7 }).unwrap();
        let matrix = TransitionMatrix::for_mood(&Mood::Playful.profile(), 7);
        let mut rng = MurmurRng::new(5);
        let mut walker = MelodyWalker::new();
        for _ in 0..5_000 {
            let block = walker.next_index(&matrix, &scale, &mut rng) / 7;
            assert!((2..=4).contains(&block), "block {block} strayed from middle");
        }
    }

    #[test]
    fn sample_row_picks_first_exceeding_bucket() {
        let row = [0.25, 0.25, 0.5];
        assert_eq!(sample_row(&row, 0.0), Some(0));
        assert_eq!(sample_row(&row, 0.3), Some(1));
        assert_eq!(sample_row(&row, 0.75), Some(2));
        assert_eq!(sample_row(&[], 0.5), None);
    }
}
