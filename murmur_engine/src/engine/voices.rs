// Voice ticks: what each of the four layers plays when its callback fires.
//
// - Melody (every eighth note): refreshes the harmony, rolls play / rest /
//   chord, then sounds either the current chord or the next Markov pitch.
//   Every `PHRASE_TICKS` ticks it reaches a phrase boundary, where a
//   variation may fire.
// - Drone (one long cycle): rotates through four patterns over the drone
//   triple. The "shift" pattern enters its tones one at a time through
//   chained one-shot callbacks owned by the drone voice.
// - Rhythm (once per bar): schedules every active step of the current
//   pattern ahead of time, with swing on odd steps, a few milliseconds of
//   humanization, and occasional accents. Sometimes plays the bar as
//   triplets instead.
// - Ambience (sparse): occasionally sustains one long note from anywhere in
//   the pitch list, softer when it clashes with the current chord.
//
// Every note goes through `play`/`sustain`, which log and swallow backend
// errors so a failing synth costs one note, not the voice.

use super::Engine;
use crate::backend::{Job, Part, Seconds, TimeSpec};
use crate::chord::build_chord;
use crate::mood::{Bounds, RhythmPattern};
use crate::pitch::Pitch;
use crate::voice::{DRONE_CYCLE, RHYTHM_LOOP, VoiceCounters};
use tracing::{trace, warn};

/// Melody ticks per phrase.
pub const PHRASE_TICKS: u64 = 16;
/// Chance of doubling an already-active chord on a non-chord roll.
const ACTIVE_CHORD_PROBABILITY: f64 = 0.5;

/// Fraction of the drone cycle each drone chord is held for.
const DRONE_HOLD_FRACTION: f64 = 0.95;
const DRONE_VELOCITY_SCALE: f64 = 0.6;
/// (step, delay in seconds) of the shift pattern's late entries.
const SHIFT_STEPS: [(u8, Seconds); 2] = [(1, 1.5), (2, 3.0)];

const TRIPLET_PROBABILITY: f64 = 0.15;
const TRIPLET_STEPS: usize = 12;
/// Maximum timing nudge either side of a rhythm step.
const HUMANIZE: Seconds = 0.01;
const ACCENT_PROBABILITY: f64 = 0.15;
const ACCENT_VELOCITY_SCALE: f64 = 0.7;
/// Rhythm hits last this fraction of a step.
const HIT_LENGTH_FRACTION: f64 = 0.5;
/// Per-step flip chance when the pattern drifts.
const RHYTHM_MUTATION_PROBABILITY: f64 = 0.15;

const AMBIENCE_PROBABILITY: f64 = 0.1;
const AMBIENCE_LENGTH: Bounds = Bounds::new(4.0, 8.0);
const AMBIENCE_VELOCITY_SCALE: f64 = 0.6;
/// Velocity multiplier for ambience notes outside the current chord.
const AMBIENCE_CLASH_SCALE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DronePattern {
    RootFifth,
    RootThirdFifth,
    OctavePair,
    Shift,
}

impl DronePattern {
    const CYCLE: [DronePattern; 4] = [
        DronePattern::RootFifth,
        DronePattern::RootThirdFifth,
        DronePattern::OctavePair,
        DronePattern::Shift,
    ];
}

impl Engine {
    // -----------------------------------------------------------------------
    // Melody
    // -----------------------------------------------------------------------

    pub(super) fn melody_tick(&mut self, time: Seconds) {
        let ticks = match self.voices[Part::Melody.index()].counters_mut() {
            Some(VoiceCounters::Melody { ticks }) => {
                *ticks += 1;
                *ticks
            }
            _ => return,
        };

        let now = self.now();
        let dissonance = self.dissonance();
        self.harmony
            .refresh(now, &self.scale, dissonance, &mut self.rng);

        let note_probability = self.note_probability();
        let params = &self.mood.params;
        let (rest_p, chord_p) = (params.rest_probability, params.chord_probability);
        let (velocity, note_length) = (params.velocity, params.note_length);

        let should_play = self.rng.random_bool(note_probability);
        let should_rest = self.rng.random_bool(rest_p);
        let should_chord = self.rng.random_bool(chord_p);

        if should_play && !should_rest {
            let chord_active = self.harmony.current().is_some();
            let use_chord =
                should_chord || (chord_active && self.rng.random_bool(ACTIVE_CHORD_PROBABILITY));
            let pitches = if use_chord {
                self.chord_pitches()
            } else {
                self.walk_pitch()
            };
            let velocity = velocity.sample(&mut self.rng);
            let length = note_length.sample(&mut self.rng);
            let at = self.note_time(time);
            if self.play(Part::Melody, &pitches, TimeSpec::Seconds(length), at, velocity) {
                self.highlight(&pitches, length);
            }
        }

        if ticks % PHRASE_TICKS == 0 {
            self.phrase_boundary();
        }
    }

    fn walk_pitch(&mut self) -> Vec<Pitch> {
        let index = self.walker.next_index(&self.matrix, &self.scale, &mut self.rng);
        self.scale.pitch_at(index).into_iter().collect()
    }

    fn chord_pitches(&mut self) -> Vec<Pitch> {
        if let Some(pitches) = self.harmony.current_pitches(&self.scale) {
            return pitches;
        }
        let root = self.walker.next_index(&self.matrix, &self.scale, &mut self.rng);
        let dissonance = self.dissonance();
        build_chord(root, &self.scale, dissonance, &mut self.rng).pitches(&self.scale)
    }

    // -----------------------------------------------------------------------
    // Drone
    // -----------------------------------------------------------------------

    pub(super) fn drone_tick(&mut self, time: Seconds) {
        let cycle = match self.voices[Part::Drone.index()].counters_mut() {
            Some(VoiceCounters::Drone { cycles }) => {
                *cycles += 1;
                *cycles - 1
            }
            _ => return,
        };
        let pattern = DronePattern::CYCLE[(cycle % DronePattern::CYCLE.len() as u64) as usize];
        let [low, high, fifth] = self.scale.drone_pitches();
        let third = low
            .transposed(i16::from(self.scale.third_semitones()))
            .unwrap_or(fifth);
        let hold = self.drone_hold();
        let velocity = self.drone_velocity();
        let at = self.note_time(time);
        trace!(?pattern, cycle, "drone cycle");

        match pattern {
            DronePattern::RootFifth => {
                self.play(Part::Drone, &[low, fifth], TimeSpec::Seconds(hold), at, velocity);
            }
            DronePattern::RootThirdFifth => {
                self.play(Part::Drone, &[low, third, fifth], TimeSpec::Seconds(hold), at, velocity);
            }
            DronePattern::OctavePair => {
                self.play(Part::Drone, &[low, high], TimeSpec::Seconds(hold), at, velocity);
            }
            DronePattern::Shift => {
                self.sustain(Part::Drone, &[low], at, hold, velocity);
                for (step, delay) in SHIFT_STEPS {
                    let job = Job::DroneShift { step };
                    if let Some(handle) = self.schedule_once(TimeSpec::Seconds(delay), job) {
                        self.voices[Part::Drone.index()].push_chained(handle);
                    }
                }
            }
        }
    }

    /// A late entry of the shift pattern. Releases with the rest of the
    /// cycle.
    pub(super) fn drone_shift(&mut self, step: u8, time: Seconds) {
        let Some(&(_, delay)) = SHIFT_STEPS.iter().find(|(s, _)| *s == step) else {
            return;
        };
        let [_, high, fifth] = self.scale.drone_pitches();
        let pitch = if step == 1 { fifth } else { high };
        let hold = (self.drone_hold() - delay).max(0.0);
        let velocity = self.drone_velocity();
        let at = self.note_time(time);
        self.sustain(Part::Drone, &[pitch], at, hold, velocity);
    }

    fn drone_hold(&self) -> Seconds {
        DRONE_CYCLE.to_seconds(self.bpm()) * DRONE_HOLD_FRACTION
    }

    fn drone_velocity(&self) -> f64 {
        self.mood.params.velocity.mid() * DRONE_VELOCITY_SCALE
    }

    // -----------------------------------------------------------------------
    // Rhythm
    // -----------------------------------------------------------------------

    pub(super) fn rhythm_tick(&mut self, time: Seconds) {
        let pattern = match self.voices[Part::Rhythm.index()].counters_mut() {
            Some(VoiceCounters::Rhythm { pattern, loops }) => {
                *loops += 1;
                pattern.clone()
            }
            _ => return,
        };
        if pattern.is_empty() {
            return;
        }

        let bpm = self.bpm();
        let beat = TimeSpec::Beats(1.0).to_seconds(bpm);
        let bar = RHYTHM_LOOP.to_seconds(bpm);
        let triplet = self.rng.random_bool(TRIPLET_PROBABILITY);
        let (steps, step_len) = if triplet {
            (TRIPLET_STEPS, beat / 3.0)
        } else {
            (pattern.len(), bar / pattern.len() as f64)
        };
        let swing = self.mood.params.swing;
        let velocity = self.mood.params.velocity;
        let [low, high, _] = self.scale.drone_pitches();
        let start = self.note_time(time);
        let hit_length = TimeSpec::Seconds(step_len * HIT_LENGTH_FRACTION);

        for step in (0..steps).filter(|&s| pattern.is_active(s)) {
            let mut offset = step as f64 * step_len;
            if !triplet && step % 2 == 1 {
                offset += swing * step_len;
            }
            offset = (offset + self.rng.range_f64(-HUMANIZE, HUMANIZE)).max(0.0);
            let v = velocity.sample(&mut self.rng);
            self.play(Part::Rhythm, &[low], hit_length, start + offset, v);
            if self.rng.random_bool(ACCENT_PROBABILITY) {
                self.play(Part::Rhythm, &[high], hit_length, start + offset, v * ACCENT_VELOCITY_SCALE);
            }
        }
    }

    pub(super) fn rhythm_mutate(&mut self) {
        if let Some(VoiceCounters::Rhythm { pattern, .. }) =
            self.voices[Part::Rhythm.index()].counters_mut()
        {
            let flipped = pattern.mutate(RHYTHM_MUTATION_PROBABILITY, &mut self.rng);
            trace!(flipped, "rhythm pattern drifted");
        }
    }

    /// Draw one of the mood's patterns, weighted toward denser ones as
    /// density rises.
    pub(super) fn select_rhythm_pattern(&mut self) -> RhythmPattern {
        let weights = self.derived().pattern_weights;
        let index = self.rng.weighted_index(&weights).unwrap_or(1);
        let patterns = self.mood.mood.rhythm_patterns();
        patterns[index.min(patterns.len() - 1)].clone()
    }

    // -----------------------------------------------------------------------
    // Ambience
    // -----------------------------------------------------------------------

    pub(super) fn ambience_tick(&mut self, time: Seconds) {
        if !self.rng.random_bool(AMBIENCE_PROBABILITY) || self.scale.is_empty() {
            return;
        }
        let index = self.rng.range_usize(0, self.scale.len());
        let Some(pitch) = self.scale.pitch_at(index) else {
            return;
        };
        let in_chord = self.harmony.current_pitches(&self.scale).is_some_and(|chord| {
            chord
                .iter()
                .any(|p| p.pitch_class() == pitch.pitch_class())
        });
        let length = AMBIENCE_LENGTH.sample(&mut self.rng);
        let params = &self.mood.params;
        let mut velocity = params.velocity.min * AMBIENCE_VELOCITY_SCALE * (0.5 + params.reverb_wet / 2.0);
        if !in_chord {
            velocity *= AMBIENCE_CLASH_SCALE;
        }
        let at = self.note_time(time);
        if self.play(Part::Ambience, &[pitch], TimeSpec::Seconds(length), at, velocity) {
            self.highlight(&[pitch], length);
        }
    }

    // -----------------------------------------------------------------------
    // Note output
    // -----------------------------------------------------------------------

    /// Sound a note or chord. Returns whether the synth accepted it.
    pub(super) fn play(
        &mut self,
        part: Part,
        pitches: &[Pitch],
        duration: TimeSpec,
        at: Seconds,
        velocity: f64,
    ) -> bool {
        if pitches.is_empty() {
            return false;
        }
        let Some(backend) = self.backend.as_mut() else {
            return false;
        };
        let velocity = velocity.clamp(0.0, 1.0);
        match backend.synth.note_on_off(part, pitches, duration, at, velocity) {
            Ok(()) => {
                trace!(?part, ?pitches, at, velocity, "note");
                true
            }
            Err(e) => {
                warn!(?part, error = %e, "note skipped");
                false
            }
        }
    }

    /// Note-on now, note-off after `hold`, issued together.
    fn sustain(&mut self, part: Part, pitches: &[Pitch], at: Seconds, hold: Seconds, velocity: f64) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        if let Err(e) = backend.synth.note_on(part, pitches, at, velocity.clamp(0.0, 1.0)) {
            warn!(?part, error = %e, "sustained note skipped");
            return;
        }
        if let Err(e) = backend.synth.note_off(part, pitches, at + hold) {
            warn!(?part, error = %e, "release could not be scheduled");
        }
    }
}
