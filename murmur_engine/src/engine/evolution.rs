// Parameter Evolution: slow, bounded drift of the sound while playing.
//
// Each evolution tick independently rolls three changes:
// - filter (p = 0.4): cutoff jittered by up to 20%, clamped to
//   `FILTER_RANGE`, ramped over a few seconds,
// - tempo (p = 0.3): BPM jittered by up to 5%, clamped to the mood's tempo
//   range, ramped over `TEMPO_RAMP`,
// - envelopes (p = 0.3): both ends of the note-length and velocity ranges
//   jittered by up to 5%, then `MoodSettings::enforce_invariants`.
//
// The tick period comes from the evolution dial (`DerivedSettings::
// evolution_interval`), so evolution = 100 drifts every few seconds and
// evolution = 0 barely at all.

use super::Engine;
use crate::backend::Seconds;
use crate::mood::Bounds;
use murmur_prng::MurmurRng;
use tracing::{debug, warn};

/// Allowed filter cutoff, in Hz.
pub const FILTER_RANGE: Bounds = Bounds::new(80.0, 20_000.0);
/// Used when the filter reports something unusable.
const FILTER_FALLBACK_HZ: f64 = 2_000.0;
const FILTER_PROBABILITY: f64 = 0.4;
const FILTER_JITTER: f64 = 0.2;
const FILTER_RAMP: Bounds = Bounds::new(2.0, 5.0);

const TEMPO_PROBABILITY: f64 = 0.3;
const TEMPO_JITTER: f64 = 0.05;
/// Duration of every engine-initiated tempo change.
pub const TEMPO_RAMP: Seconds = 4.0;

const ENVELOPE_PROBABILITY: f64 = 0.3;
const ENVELOPE_JITTER: f64 = 0.05;

impl Engine {
    pub(super) fn evolve(&mut self) {
        if self.rng.random_bool(FILTER_PROBABILITY) {
            let current = self.filter_frequency();
            let target = FILTER_RANGE.clamp(self.rng.jitter(current, FILTER_JITTER));
            let over = FILTER_RAMP.sample(&mut self.rng);
            self.ramp_filter(target, over);
        }

        if self.rng.random_bool(TEMPO_PROBABILITY) {
            let range = self.mood.params.tempo;
            let current = self.bpm();
            let target = range.clamp(self.rng.jitter(current, TEMPO_JITTER));
            if let Some(backend) = self.backend.as_mut() {
                match backend.transport.ramp_tempo(target, TEMPO_RAMP) {
                    Ok(()) => debug!(bpm = target, "tempo drifting"),
                    Err(e) => warn!(error = %e, "tempo ramp rejected"),
                }
            }
        }

        if self.rng.random_bool(ENVELOPE_PROBABILITY) {
            let p = &mut self.mood.params;
            p.note_length = jitter_bounds(p.note_length, &mut self.rng);
            p.velocity = jitter_bounds(p.velocity, &mut self.rng);
            self.mood.enforce_invariants();
            debug!(
                note_length = ?self.mood.params.note_length,
                velocity = ?self.mood.params.velocity,
                "envelopes drifted"
            );
        }
    }

    /// Current cutoff, sanitized into `FILTER_RANGE`.
    pub(super) fn filter_frequency(&self) -> f64 {
        let hz = self
            .backend
            .as_ref()
            .map_or(FILTER_FALLBACK_HZ, |b| b.filter.frequency());
        if hz.is_finite() {
            FILTER_RANGE.clamp(hz)
        } else {
            FILTER_FALLBACK_HZ
        }
    }

    pub(super) fn ramp_filter(&mut self, hz: f64, over: Seconds) {
        let hz = FILTER_RANGE.clamp(hz);
        if let Some(backend) = self.backend.as_mut() {
            match backend.filter.ramp_frequency(hz, over) {
                Ok(()) => debug!(hz, over, "filter ramp"),
                Err(e) => warn!(error = %e, "filter ramp rejected"),
            }
        }
    }
}

fn jitter_bounds(bounds: Bounds, rng: &mut MurmurRng) -> Bounds {
    Bounds::new(
        rng.jitter(bounds.min, ENVELOPE_JITTER),
        rng.jitter(bounds.max, ENVELOPE_JITTER),
    )
}
