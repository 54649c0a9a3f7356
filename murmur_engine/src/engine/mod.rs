// The composition engine: lifecycle, callback dispatch, and live
// reconfiguration.
//
// An `Engine` is built from a validated `Config` and sits `Idle` until the
// host hands it a `Backend` via `start()`. While `Playing` it owns:
//
// - the working `MoodSettings` and its `TransitionMatrix`,
// - the current `Scale` (possibly temporarily transposed by a variation),
// - the shared `HarmonyState` and the melody's `MelodyWalker`,
// - one `VoiceSlot` per `Part`, the evolution timer handle, and the
//   pending-revert handles of active variations,
// - a single seeded `MurmurRng` from which every random decision is drawn.
//
// Time only moves when the host delivers `Fired` callbacks to `dispatch`
// (or calls `run_until`, which drains the transport itself). `dispatch`
// first checks that the callback belongs to the current session, then that
// its handle is still owned by something live. A callback from before the
// last `start()`, for a stopped voice, a replaced evolution timer, or a
// cancelled revert is dropped with a debug log, which makes stop/start and
// enable/disable races harmless.
//
// `update_config` validates and prepares everything fallible before
// mutating anything, then applies only what differs: a mood change swaps
// settings and ramps the tempo, a key change rebuilds the scale, a dial
// change reschedules evolution, an enable flag flips one voice. Untouched
// voices keep their handles.
//
// Submodules split the per-callback behavior:
// - `voices.rs`: the four voice ticks and the drone's chained steps,
// - `evolution.rs`: slow random drift of filter, tempo and envelopes,
// - `variation.rs`: phrase-boundary transformations and their reverts.
//
// See also: `voice.rs` for the slot state machine, `backend.rs` for the
// collaborator traits, `offline.rs` for a transport usable in tests.
//
// **Critical constraint: single owner.** The engine is not `Sync` and never
// shares its state with callbacks; everything flows through `dispatch`.

mod evolution;
mod variation;
mod voices;

pub use evolution::{FILTER_RANGE, TEMPO_RAMP};
pub use variation::{TRANSPOSE_STEPS, Variation};
pub use voices::PHRASE_TICKS;

use crate::backend::{Backend, Fired, Handle, Job, Part, Seconds, Session, TimeSpec};
use crate::config::{Config, ConfigPatch, DerivedSettings};
use crate::error::EngineError;
use crate::harmony::HarmonyState;
use crate::markov::MelodyWalker;
use crate::mood::{Bounds, Mood, MoodSettings, TransitionMatrix};
use crate::pitch::{PITCH_CLASS_NAMES, Pitch, parse_pitch_class};
use crate::scale::{Scale, ScaleKind};
use crate::voice::{VoiceCounters, VoiceSlot};
use murmur_prng::MurmurRng;
use serde::Serialize;
use tracing::{debug, info, warn};
use variation::Modifiers;

/// Lead time added to every note so it is never scheduled in the past.
pub const NOTE_SAFETY_OFFSET: Seconds = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Idle,
    Playing,
}

/// Snapshot for hosts and logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub mood: Mood,
    pub scale: ScaleKind,
    /// Current root name, including any temporary transposition.
    pub root: String,
    pub tempo: Option<f64>,
    pub tempo_range: Bounds,
    pub running_voices: Vec<Part>,
    pub current_chord: Option<Vec<String>>,
    pub pending_reverts: usize,
    pub note_probability: f64,
}

pub struct Engine {
    config: Config,
    state: EngineState,
    mood: MoodSettings,
    matrix: TransitionMatrix,
    scale: Scale,
    harmony: HarmonyState,
    walker: MelodyWalker,
    rng: MurmurRng,
    /// Tag of the current (or last) Playing run.
    session: Session,
    voices: [VoiceSlot; 4],
    evolution_timer: Option<Handle>,
    modifiers: Modifiers,
    backend: Option<Backend>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self, EngineError> {
        config.validate()?;
        let mood = MoodSettings::new(Mood::from_name(&config.mood)?);
        let scale = Scale::new(&config.root, &config.scale, mood.params.octaves)?;
        let matrix = TransitionMatrix::for_mood(&mood.params, scale.pattern_len());
        let seed = config.seed.unwrap_or_else(clock_seed);
        info!(
            mood = mood.mood.name(),
            scale = scale.kind.name(),
            root = %config.root,
            seed,
            "engine created"
        );
        Ok(Engine {
            config,
            state: EngineState::Idle,
            mood,
            matrix,
            scale,
            harmony: HarmonyState::new(),
            walker: MelodyWalker::new(),
            rng: MurmurRng::new(seed),
            session: Session::default(),
            voices: Part::ALL.map(VoiceSlot::new),
            evolution_timer: None,
            modifiers: Modifiers::default(),
            backend: None,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == EngineState::Playing
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn derived(&self) -> DerivedSettings {
        self.config.derived()
    }

    pub fn mood_settings(&self) -> &MoodSettings {
        &self.mood
    }

    pub fn matrix(&self) -> &TransitionMatrix {
        &self.matrix
    }

    pub fn scale(&self) -> &Scale {
        &self.scale
    }

    pub fn harmony(&self) -> &HarmonyState {
        &self.harmony
    }

    pub fn voice(&self, part: Part) -> &VoiceSlot {
        &self.voices[part.index()]
    }

    pub fn backend(&self) -> Option<&Backend> {
        self.backend.as_ref()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state,
            mood: self.mood.mood,
            scale: self.scale.kind,
            root: PITCH_CLASS_NAMES[usize::from(self.scale.root)].to_string(),
            tempo: self.backend.as_ref().map(|b| b.transport.bpm()),
            tempo_range: self.mood.params.tempo,
            running_voices: Part::ALL
                .into_iter()
                .filter(|&p| self.voices[p.index()].is_running())
                .collect(),
            current_chord: self.harmony.current().map(|c| c.names(&self.scale)),
            pending_reverts: self.modifiers.pending_count(),
            note_probability: self.note_probability(),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Idle -> Playing. Starts the transport at the mood's mid tempo, then
    /// every enabled voice and the evolution timer. Does nothing if already
    /// playing.
    pub fn start(&mut self, mut backend: Backend) {
        if self.is_playing() {
            debug!("start ignored: already playing");
            return;
        }
        if let Err(e) = backend.transport.start() {
            warn!(error = %e, "transport start failed");
        }
        let tempo = self.mood.params.tempo.mid();
        if let Err(e) = backend.transport.set_tempo(tempo) {
            warn!(error = %e, "initial tempo rejected");
        }
        self.backend = Some(backend);
        self.session = self.session.next();
        self.state = EngineState::Playing;
        self.walker.reset();
        self.harmony.reset();

        for part in Part::ALL {
            if self.config.voice_enabled(part) {
                self.enable_voice(part);
            }
        }
        self.schedule_evolution();
        info!(
            tempo,
            mood = self.mood.mood.name(),
            session = self.session.0,
            "playing"
        );
    }

    /// Playing -> Idle. Cancels every owned handle, restores anything a
    /// variation changed, and hands the backend back. `None` if idle.
    pub fn stop(&mut self) -> Option<Backend> {
        if !self.is_playing() {
            return None;
        }
        for part in Part::ALL {
            self.disable_voice(part);
        }
        self.cancel_evolution();
        self.revert_all_variations();
        self.state = EngineState::Idle;
        let mut backend = self.backend.take()?;
        if let Err(e) = backend.transport.stop() {
            warn!(error = %e, "transport stop failed");
        }
        info!("stopped");
        Some(backend)
    }

    /// Drain every callback due up to `until` from the transport.
    pub fn run_until(&mut self, until: Seconds) -> usize {
        let mut handled = 0;
        loop {
            let Some(fired) = self
                .backend
                .as_mut()
                .and_then(|b| b.transport.poll_due(until))
            else {
                break;
            };
            self.dispatch(fired);
            handled += 1;
        }
        handled
    }

    /// Handle one delivered callback. Callbacks scheduled before the last
    /// `start()`, or whose handle is no longer owned (stopped voice,
    /// replaced timer, cancelled revert), are dropped.
    pub fn dispatch(&mut self, fired: Fired) {
        if !self.is_playing() {
            debug!(handle = %fired.handle, "callback while idle dropped");
            return;
        }
        let Fired {
            handle,
            session,
            job,
            time,
        } = fired;
        if session != self.session {
            debug!(
                handle = %handle,
                session = session.0,
                ?job,
                "callback from an earlier session dropped"
            );
            return;
        }
        let live = match job {
            Job::Tick(part) if self.voices[part.index()].owns_periodic(handle) => {
                self.tick(part, time);
                true
            }
            Job::RhythmMutate if self.voices[Part::Rhythm.index()].owns_periodic(handle) => {
                self.rhythm_mutate();
                true
            }
            Job::DroneShift { step } if self.voices[Part::Drone.index()].take_chained(handle) => {
                self.drone_shift(step, time);
                true
            }
            Job::Evolve if self.evolution_timer == Some(handle) => {
                self.evolve();
                true
            }
            Job::Revert(kind) if self.modifiers.take_pending(handle, kind) => {
                self.apply_revert(kind);
                true
            }
            _ => false,
        };
        if !live {
            debug!(handle = %handle, ?job, "stale callback dropped");
        }
    }

    fn tick(&mut self, part: Part, time: Seconds) {
        match part {
            Part::Melody => self.melody_tick(time),
            Part::Drone => self.drone_tick(time),
            Part::Rhythm => self.rhythm_tick(time),
            Part::Ambience => self.ambience_tick(time),
        }
    }

    // -----------------------------------------------------------------------
    // Voices
    // -----------------------------------------------------------------------

    fn initial_counters(&mut self, part: Part) -> VoiceCounters {
        match part {
            Part::Melody => VoiceCounters::Melody { ticks: 0 },
            Part::Drone => VoiceCounters::Drone { cycles: 0 },
            Part::Rhythm => VoiceCounters::Rhythm {
                pattern: self.select_rhythm_pattern(),
                loops: 0,
            },
            Part::Ambience => VoiceCounters::Ambience,
        }
    }

    /// Start one voice. A scheduling failure leaves it stopped.
    fn enable_voice(&mut self, part: Part) {
        if !self.is_playing() || self.voices[part.index()].is_running() {
            return;
        }
        if part == Part::Melody {
            self.walker.reset();
        }
        let counters = self.initial_counters(part);
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        let entered =
            self.voices[part.index()].enter(backend.transport.as_mut(), self.session, counters);
        if let Err(e) = entered {
            warn!(?part, error = %e, "voice could not be scheduled");
        }
    }

    fn disable_voice(&mut self, part: Part) {
        if let Some(backend) = self.backend.as_mut() {
            self.voices[part.index()].exit(backend.transport.as_mut());
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    fn schedule_evolution(&mut self) {
        self.cancel_evolution();
        let interval = self.derived().evolution_interval();
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        match backend
            .transport
            .schedule_periodic(TimeSpec::Seconds(interval), self.session, Job::Evolve)
        {
            Ok(handle) => {
                debug!(interval, "evolution scheduled");
                self.evolution_timer = Some(handle);
            }
            Err(e) => warn!(error = %e, "evolution timer could not be scheduled"),
        }
    }

    fn cancel_evolution(&mut self) {
        if let Some(handle) = self.evolution_timer.take() {
            self.cancel(handle);
        }
    }

    fn schedule_once(&mut self, delay: TimeSpec, job: Job) -> Option<Handle> {
        let backend = self.backend.as_mut()?;
        match backend.transport.schedule_once(delay, self.session, job) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(?job, error = %e, "one-shot callback could not be scheduled");
                None
            }
        }
    }

    fn cancel(&mut self, handle: Handle) {
        if let Some(backend) = self.backend.as_mut() {
            backend.transport.cancel(handle);
        }
    }

    // -----------------------------------------------------------------------
    // Reconfiguration
    // -----------------------------------------------------------------------

    /// Apply a partial config. Everything fallible happens before any state
    /// changes, so an error leaves the engine untouched.
    pub fn update_config(&mut self, patch: &ConfigPatch) -> Result<(), EngineError> {
        let next = self.config.merged(patch);
        next.validate()?;

        let next_mood = Mood::from_name(&next.mood)?;
        let next_kind = ScaleKind::from_name(&next.scale)?;
        let next_root = parse_pitch_class(&next.root)
            .ok_or_else(|| EngineError::UnknownRoot(next.root.clone()))?;
        let current_root = parse_pitch_class(&self.config.root);

        let mood_changed = next_mood != self.mood.mood;
        let root_changed = Some(next_root) != current_root;
        let key_changed = root_changed || next_kind != self.scale.kind;

        let settings = mood_changed.then(|| MoodSettings::new(next_mood));
        let octaves = settings
            .as_ref()
            .map_or(self.mood.params.octaves, |s| s.params.octaves);
        let scale = if key_changed || mood_changed {
            // A new root replaces any running transposition.
            let root = if root_changed {
                next_root
            } else {
                self.modifiers.transposed_root.unwrap_or(next_root)
            };
            Some(Scale::from_parts(root, next_kind, octaves)?)
        } else {
            None
        };

        // Commit.
        let evolution_changed = next.evolution != self.config.evolution;
        let toggles: Vec<(Part, bool)> = Part::ALL
            .into_iter()
            .filter(|&p| next.voice_enabled(p) != self.config.voice_enabled(p))
            .map(|p| (p, next.voice_enabled(p)))
            .collect();
        self.config = next;

        if root_changed {
            self.clear_transpose();
        }
        if let Some(settings) = settings {
            self.mood = settings;
            self.on_mood_changed();
        }
        if let Some(scale) = scale {
            let pattern_changed = scale.pattern_len() != self.scale.pattern_len();
            self.scale = scale;
            self.harmony.reset();
            if pattern_changed {
                self.walker.reset();
            }
        }
        if mood_changed || key_changed {
            self.matrix = TransitionMatrix::for_mood(&self.mood.params, self.scale.pattern_len());
        }
        if evolution_changed && self.is_playing() {
            self.schedule_evolution();
        }
        for (part, enabled) in toggles {
            if enabled {
                self.enable_voice(part);
            } else {
                self.disable_voice(part);
            }
        }
        info!(
            mood = self.mood.mood.name(),
            scale = self.scale.kind.name(),
            root = %self.config.root,
            density = self.config.density,
            "config updated"
        );
        Ok(())
    }

    /// Convenience for flipping one voice.
    pub fn set_voice_enabled(&mut self, part: Part, enabled: bool) -> Result<(), EngineError> {
        self.update_config(&ConfigPatch::voice(part, enabled))
    }

    fn on_mood_changed(&mut self) {
        let target = self.mood.params.tempo.mid();
        if self.is_playing() {
            if let Some(backend) = self.backend.as_mut() {
                if let Err(e) = backend.transport.ramp_tempo(target, TEMPO_RAMP) {
                    warn!(error = %e, "tempo ramp rejected");
                }
            }
        }
        if self.voices[Part::Rhythm.index()].is_running() {
            let pattern = self.select_rhythm_pattern();
            if let Some(VoiceCounters::Rhythm { pattern: current, .. }) =
                self.voices[Part::Rhythm.index()].counters_mut()
            {
                *current = pattern;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Shared helpers for the submodules
    // -----------------------------------------------------------------------

    fn note_probability(&self) -> f64 {
        (self.derived().note_probability + self.modifiers.density_offset).clamp(0.0, 1.0)
    }

    fn dissonance(&self) -> f64 {
        (self.mood.params.dissonance_factor + self.modifiers.dissonance_boost).clamp(0.0, 1.0)
    }

    fn now(&self) -> Seconds {
        self.backend.as_ref().map_or(0.0, |b| b.transport.now())
    }

    fn bpm(&self) -> f64 {
        self.backend
            .as_ref()
            .map_or(self.mood.params.tempo.mid(), |b| b.transport.bpm())
    }

    /// When to sound a note for a callback nominally at `fired_at`.
    fn note_time(&self, fired_at: Seconds) -> Seconds {
        fired_at.max(self.now()) + NOTE_SAFETY_OFFSET
    }

    fn highlight(&mut self, pitches: &[Pitch], approx: Seconds) {
        if let Some(highlighter) = self.backend.as_mut().and_then(|b| b.highlighter.as_mut()) {
            for &pitch in pitches {
                highlighter.highlight(&pitch.name(), approx);
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.is_playing() {
            self.stop();
        }
    }
}

/// Seed for engines configured without one.
fn clock_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0x6d75_726d_7572, |d| d.as_nanos() as u64)
}
