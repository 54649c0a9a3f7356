// Deterministic, portable pseudo-random number generator for the composer.
//
// Implements xoshiro256++ (Blackman & Vigna, 2019) with SplitMix64 seeding,
// plus the small set of sampling helpers the composition engine leans on:
// uniform float ranges, Bernoulli draws, bounded multiplicative jitter, and
// weighted index selection (the "weighted choice" used for rhythm-pattern
// selection, octave walks, and the Markov melody walker).
//
// Every probabilistic decision in `murmur_engine` (whether a melody tick
// plays, which chord root is picked, which variation fires, how far the
// filter drifts) draws from one `MurmurRng` owned by the engine. Seeding it
// makes a whole performance against the offline transport reproducible,
// which is what the engine's statistical tests rely on.
//
// **Critical constraint: determinism.** The core generator uses only integer
// arithmetic. Float helpers are derived from the integer stream in a fixed
// way, so the same seed yields the same performance on every platform.

use serde::{Deserialize, Serialize};

/// Xoshiro256++ PRNG, the engine's sole source of randomness.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MurmurRng {
    s: [u64; 4],
}

impl MurmurRng {
    /// Create a new PRNG seeded from a `u64`.
    ///
    /// Uses SplitMix64 to expand the seed into the 256-bit internal state.
    /// Two instances created with the same seed produce identical streams.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Generate a uniform `f64` in [0, 1) from the upper 53 bits.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform `f64` in `[low, high)`. A degenerate range returns `low`.
    ///
    /// Panics if `low > high` or either bound is NaN.
    pub fn range_f64(&mut self, low: f64, high: f64) -> f64 {
        assert!(low <= high, "range_f64: low must be <= high ({low} > {high})");
        if low == high {
            return low;
        }
        low + self.next_f64() * (high - low)
    }

    /// Uniform integer in `[low, high)`, rejection-sampled to avoid modulo bias.
    ///
    /// Panics if `low >= high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: low must be less than high");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1));
        }
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    /// Uniform `usize` in `[low, high)`.
    ///
    /// Panics if `low >= high`.
    pub fn range_usize(&mut self, low: usize, high: usize) -> usize {
        self.range_u64(low as u64, high as u64) as usize
    }

    /// Uniform `usize` in `[low, high]`.
    ///
    /// Panics if `low > high`.
    pub fn range_usize_inclusive(&mut self, low: usize, high: usize) -> usize {
        assert!(low <= high, "range_usize_inclusive: low must be <= high");
        self.range_u64(low as u64, high as u64 + 1) as usize
    }

    /// Return `true` with probability `p`. `p <= 0` never fires, `p >= 1`
    /// always does.
    pub fn random_bool(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Multiply `value` by a factor drawn uniformly from
    /// `[1 - fraction, 1 + fraction)`.
    pub fn jitter(&mut self, value: f64, fraction: f64) -> f64 {
        let fraction = fraction.abs();
        value * self.range_f64(1.0 - fraction, 1.0 + fraction)
    }

    /// Pick an index with probability proportional to its weight.
    ///
    /// Non-finite and negative weights count as zero. Returns `None` when
    /// no weight is positive. The first cumulative bucket exceeding the
    /// draw wins.
    pub fn weighted_index(&mut self, weights: &[f64]) -> Option<usize> {
        let usable = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let total: f64 = weights.iter().copied().map(usable).sum();
        if total <= 0.0 {
            return None;
        }

        let target = self.next_f64() * total;
        let mut cumulative = 0.0;
        let mut last_positive = None;
        for (i, &w) in weights.iter().enumerate() {
            let w = usable(w);
            if w == 0.0 {
                continue;
            }
            cumulative += w;
            last_positive = Some(i);
            if cumulative > target {
                return Some(i);
            }
        }
        // Float rounding can leave `cumulative` a hair under `target`.
        last_positive
    }

    /// Pick a uniformly random element, or `None` for an empty slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.range_usize(0, items.len()))
    }
}

/// SplitMix64, used only for seeding xoshiro256++ from a single `u64`.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn determinism_same_seed_same_output() {
        let mut a = MurmurRng::new(42);
        let mut b = MurmurRng::new(42);
        for _ in 0..1000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_different_output() {
        let mut a = MurmurRng::new(42);
        let mut b = MurmurRng::new(43);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn f64_in_unit_range() {
        let mut rng = MurmurRng::new(12345);
        for _ in 0..10_000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v), "f64 out of range: {v}");
        }
    }

    #[test]
    fn range_f64_within_bounds() {
        let mut rng = MurmurRng::new(777);
        for _ in 0..10_000 {
            let v = rng.range_f64(8.0, 16.0);
            assert!((8.0..16.0).contains(&v), "range_f64 out of range: {v}");
        }
        assert_eq!(rng.range_f64(3.0, 3.0), 3.0);
    }

    #[test]
    fn range_usize_inclusive_reaches_upper_bound() {
        let mut rng = MurmurRng::new(1);
        let mut saw_max = false;
        for _ in 0..10_000 {
            let v = rng.range_usize_inclusive(0, 2);
            assert!(v <= 2);
            saw_max |= v == 2;
        }
        assert!(saw_max, "range_usize_inclusive should reach the upper bound");
    }

    #[test]
    fn random_bool_extremes() {
        let mut rng = MurmurRng::new(42);
        for _ in 0..100 {
            assert!(!rng.random_bool(0.0));
            assert!(rng.random_bool(1.0));
        }
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let mut rng = MurmurRng::new(9);
        for _ in 0..10_000 {
            let v = rng.jitter(1000.0, 0.2);
            assert!((800.0..1200.0).contains(&v), "jitter out of range: {v}");
        }
    }

    #[test]
    fn weighted_index_matches_weights() {
        let mut rng = MurmurRng::new(2024);
        let weights = [0.2, 0.3, 0.5];
        let mut counts = [0usize; 3];
        let n = 100_000;
        for _ in 0..n {
            let i = rng.weighted_index(&weights).unwrap();
            counts[i] += 1;
        }
        for (i, &w) in weights.iter().enumerate() {
            let freq = counts[i] as f64 / n as f64;
            assert!(
                (freq - w).abs() < 0.01,
                "bucket {i}: expected ~{w}, got {freq:.4}"
            );
        }
    }

    #[test]
    fn weighted_index_skips_zero_and_bad_weights() {
        let mut rng = MurmurRng::new(5);
        for _ in 0..1000 {
            let i = rng.weighted_index(&[0.0, f64::NAN, 1.0, -3.0]).unwrap();
            assert_eq!(i, 2);
        }
        assert_eq!(rng.weighted_index(&[]), None);
        assert_eq!(rng.weighted_index(&[0.0, 0.0]), None);
    }

    #[test]
    fn choose_empty_is_none() {
        let mut rng = MurmurRng::new(3);
        let empty: [u8; 0] = [];
        assert!(rng.choose(&empty).is_none());
        assert_eq!(rng.choose(&[7]), Some(&7));
    }

    #[test]
    fn serialization_roundtrip_continues_stream() {
        let mut rng = MurmurRng::new(42);
        for _ in 0..100 {
            rng.next_u64();
        }
        let json = serde_json::to_string(&rng).unwrap();
        let mut restored: MurmurRng = serde_json::from_str(&json).unwrap();
        for _ in 0..100 {
            assert_eq!(rng.next_u64(), restored.next_u64());
        }
    }
}
