// Variation System: short-lived transformations at phrase boundaries.
//
// At every melody phrase boundary the engine rolls the variation dial. On a
// hit it applies one of five transformations, chosen uniformly:
//
// - `Transpose`: rebuild the scale on a root a few semitones away, then
//   return to the configured root after `TRANSPOSE_HOLD`.
// - `RhythmSwap`: redraw the rhythm pattern from the mood's set.
// - `DensityJitter`: offset the note probability by up to +-0.2 for 5-10 s.
// - `FilterSweep`: ramp the cutoff up or down an octave over a duration set
//   by the mood's sweep rate. Permanent until evolution moves it again.
// - `DissonanceBump`: raise the chance of a fourth chord tone for 10 s.
//
// Temporary changes live in `Modifiers`, layered over the configured values
// rather than overwriting them, and each is undone by a one-shot `Revert`
// callback whose handle the engine tracks. Re-applying a variation replaces
// its pending revert. `stop()` cancels all pending reverts and restores the
// configured state immediately.

use super::Engine;
use crate::backend::{Handle, Job, Part, RevertKind, Seconds, TimeSpec};
use crate::mood::Bounds;
use crate::pitch::parse_pitch_class;
use crate::scale::Scale;
use crate::voice::VoiceCounters;
use tracing::{debug, info, warn};

/// Semitone offsets a transposition may move the root by.
pub const TRANSPOSE_STEPS: [i8; 5] = [-5, -3, 2, 5, 7];
const TRANSPOSE_HOLD: Seconds = 8.0;
const DENSITY_JITTER: f64 = 0.2;
const DENSITY_HOLD: Bounds = Bounds::new(5.0, 10.0);
const SWEEP_DURATION: Bounds = Bounds::new(1.0, 30.0);
const DISSONANCE_BUMP: f64 = 0.3;
const DISSONANCE_HOLD: Seconds = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variation {
    Transpose,
    RhythmSwap,
    DensityJitter,
    FilterSweep,
    DissonanceBump,
}

impl Variation {
    pub const ALL: [Variation; 5] = [
        Variation::Transpose,
        Variation::RhythmSwap,
        Variation::DensityJitter,
        Variation::FilterSweep,
        Variation::DissonanceBump,
    ];
}

/// Temporary offsets over the configured state.
#[derive(Debug, Default)]
pub(super) struct Modifiers {
    pub(super) transposed_root: Option<u8>,
    pub(super) density_offset: f64,
    pub(super) dissonance_boost: f64,
    pending: Vec<(Handle, RevertKind)>,
}

impl Modifiers {
    pub(super) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Consume a fired revert. False if it was cancelled or replaced.
    pub(super) fn take_pending(&mut self, handle: Handle, kind: RevertKind) -> bool {
        let before = self.pending.len();
        self.pending.retain(|&(h, k)| !(h == handle && k == kind));
        self.pending.len() != before
    }

    fn remove_kind(&mut self, kind: RevertKind) -> Option<Handle> {
        let index = self.pending.iter().position(|&(_, k)| k == kind)?;
        Some(self.pending.remove(index).0)
    }
}

impl Engine {
    pub(super) fn phrase_boundary(&mut self) {
        let threshold = self.derived().variation_threshold;
        if !self.rng.random_bool(threshold) {
            return;
        }
        if let Some(&variation) = self.rng.choose(&Variation::ALL) {
            self.apply_variation(variation);
        }
    }

    /// Apply one variation now. Ignored while idle.
    pub fn apply_variation(&mut self, variation: Variation) {
        if !self.is_playing() {
            return;
        }
        info!(?variation, "variation");
        match variation {
            Variation::Transpose => self.transpose(),
            Variation::RhythmSwap => {
                if self.voices[Part::Rhythm.index()].is_running() {
                    let pattern = self.select_rhythm_pattern();
                    if let Some(VoiceCounters::Rhythm { pattern: current, .. }) =
                        self.voices[Part::Rhythm.index()].counters_mut()
                    {
                        *current = pattern;
                    }
                }
            }
            Variation::DensityJitter => {
                self.modifiers.density_offset = self.rng.range_f64(-DENSITY_JITTER, DENSITY_JITTER);
                let hold = DENSITY_HOLD.sample(&mut self.rng);
                self.schedule_revert(RevertKind::Density, hold);
            }
            Variation::FilterSweep => {
                let current = self.filter_frequency();
                let target = if self.rng.random_bool(0.5) {
                    current * 2.0
                } else {
                    current / 2.0
                };
                let rate = self.mood.params.filter_sweep_rate;
                let over = if rate > 0.0 {
                    SWEEP_DURATION.clamp(1.0 / rate)
                } else {
                    SWEEP_DURATION.max
                };
                self.ramp_filter(target, over);
            }
            Variation::DissonanceBump => {
                self.modifiers.dissonance_boost = DISSONANCE_BUMP;
                self.schedule_revert(RevertKind::Dissonance, DISSONANCE_HOLD);
            }
        }
    }

    fn transpose(&mut self) {
        let Some(&step) = self.rng.choose(&TRANSPOSE_STEPS) else {
            return;
        };
        let base = self.configured_root();
        let root = (i16::from(base) + i16::from(step)).rem_euclid(12) as u8;
        match Scale::from_parts(root, self.scale.kind, self.scale.octaves) {
            Ok(scale) => {
                debug!(from = base, to = root, "transposed");
                self.scale = scale;
                self.harmony.reset();
                self.modifiers.transposed_root = Some(root);
                self.schedule_revert(RevertKind::Transpose, TRANSPOSE_HOLD);
            }
            Err(e) => warn!(error = %e, "transposition skipped"),
        }
    }

    fn configured_root(&self) -> u8 {
        parse_pitch_class(&self.config.root).unwrap_or(self.scale.root)
    }

    /// Replace any pending revert of `kind` with one `delay` from now. If it
    /// cannot be scheduled, revert immediately.
    fn schedule_revert(&mut self, kind: RevertKind, delay: Seconds) {
        if let Some(old) = self.modifiers.remove_kind(kind) {
            self.cancel(old);
        }
        match self.schedule_once(TimeSpec::Seconds(delay), Job::Revert(kind)) {
            Some(handle) => self.modifiers.pending.push((handle, kind)),
            None => self.apply_revert(kind),
        }
    }

    pub(super) fn apply_revert(&mut self, kind: RevertKind) {
        match kind {
            RevertKind::Transpose => {
                if self.modifiers.transposed_root.take().is_some() {
                    let root = self.configured_root();
                    match Scale::from_parts(root, self.scale.kind, self.scale.octaves) {
                        Ok(scale) => {
                            self.scale = scale;
                            self.harmony.reset();
                        }
                        Err(e) => warn!(error = %e, "could not restore root"),
                    }
                }
            }
            RevertKind::Density => self.modifiers.density_offset = 0.0,
            RevertKind::Dissonance => self.modifiers.dissonance_boost = 0.0,
        }
        debug!(?kind, "variation reverted");
    }

    /// Forget a transposition without rebuilding the scale; the caller is
    /// about to replace it.
    pub(super) fn clear_transpose(&mut self) {
        if let Some(handle) = self.modifiers.remove_kind(RevertKind::Transpose) {
            self.cancel(handle);
        }
        self.modifiers.transposed_root = None;
    }

    pub(super) fn revert_all_variations(&mut self) {
        for (handle, kind) in std::mem::take(&mut self.modifiers.pending) {
            self.cancel(handle);
            self.apply_revert(kind);
        }
    }
}
