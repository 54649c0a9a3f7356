// Collaborator interfaces: the clock/scheduler, the synth, the filter, and
// visual feedback.
//
// The engine never synthesizes audio and never owns a global transport.
// Everything it needs from the outside world is injected at `start()` as a
// `Backend` bundle of trait objects:
//
// - `Transport`: now-time, tempo (set and ramp), and scheduling of periodic
//   and one-shot callbacks at musical or wall-clock offsets.
// - `Synth`: note-on / note-off / note-on-off for one of the four `Part`s.
// - `FilterControl`: read and ramp the master filter's cutoff.
// - `Highlighter` (optional): fire-and-forget visual feedback.
//
// Callbacks are plain data. Scheduling a callback hands the transport a `Job`
// value and returns a `Handle`; when the job comes due the transport yields a
// `Fired` record, and the host passes it to `Engine::dispatch`. The engine
// stays the single owner of its state (no shared mutable closures), and a
// cancelled handle can be recognised and ignored even if the host already
// dequeued it.
//
// Handle numbers are only unique within one transport, so every callback is
// also tagged with the `Session` that scheduled it. The engine opens a new
// session on each `start()` and ignores anything fired for an older one,
// including callbacks dequeued from a transport it has since let go of.
//
// All calls are fire-and-forget from the engine's perspective. A call that
// returns `BackendError` costs one note or one pattern firing, never the
// schedule.
//
// See also: `offline.rs` for a virtual-clock implementation of every trait.

use crate::pitch::Pitch;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Backend time in seconds.
pub type Seconds = f64;

/// Beats per bar. The engine always reasons in 4/4.
pub const BEATS_PER_BAR: f64 = 4.0;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend has been disposed")]
    Disposed,
    #[error("no scheduled callback with handle {0}")]
    UnknownHandle(Handle),
    #[error("backend rejected call: {0}")]
    Rejected(String),
}

/// The four generative layers, also used to route notes to instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    Melody,
    Drone,
    Rhythm,
    Ambience,
}

impl Part {
    pub const ALL: [Part; 4] = [Part::Melody, Part::Drone, Part::Rhythm, Part::Ambience];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A duration or offset, either absolute or relative to the current tempo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TimeSpec {
    Seconds(f64),
    /// Quarter-note beats.
    Beats(f64),
    /// 4/4 bars.
    Bars(f64),
}

impl TimeSpec {
    pub fn to_seconds(self, bpm: f64) -> Seconds {
        let bpm = if bpm.is_finite() && bpm > 0.0 { bpm } else { 120.0 };
        match self {
            TimeSpec::Seconds(s) => s,
            TimeSpec::Beats(b) => b * 60.0 / bpm,
            TimeSpec::Bars(b) => b * BEATS_PER_BAR * 60.0 / bpm,
        }
    }
}

/// Opaque identifier of a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(pub u64);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One Idle -> Playing -> Idle run of an engine. Transports store it with
/// each callback and hand it back in `Fired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Session(pub u64);

impl Session {
    pub fn next(self) -> Session {
        Session(self.0.wrapping_add(1))
    }
}

/// Temporary modifications undone by a delayed callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevertKind {
    Transpose,
    Density,
    Dissonance,
}

/// What a scheduled callback should do when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Job {
    /// Periodic tick of one voice.
    Tick(Part),
    /// Slow periodic drift of the rhythm pattern.
    RhythmMutate,
    /// Follow-up step of the drone's delayed "shift" pattern.
    DroneShift { step: u8 },
    /// Parameter Evolution timer.
    Evolve,
    Revert(RevertKind),
}

/// A callback delivered by the transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fired {
    pub handle: Handle,
    pub session: Session,
    pub job: Job,
    /// Nominal fire time; may already be in the past when handled.
    pub time: Seconds,
}

pub trait Transport {
    fn now(&self) -> Seconds;

    /// Current tempo, including any in-progress ramp.
    fn bpm(&self) -> f64;

    /// Start the clock. Callbacks are only delivered while running.
    fn start(&mut self) -> Result<(), BackendError>;

    fn stop(&mut self) -> Result<(), BackendError>;

    fn set_tempo(&mut self, bpm: f64) -> Result<(), BackendError>;

    fn ramp_tempo(&mut self, bpm: f64, over: Seconds) -> Result<(), BackendError>;

    /// Schedule `job` to fire now and then every `interval`. Musical
    /// intervals are re-resolved against the tempo at each firing.
    fn schedule_periodic(
        &mut self,
        interval: TimeSpec,
        session: Session,
        job: Job,
    ) -> Result<Handle, BackendError>;

    /// Schedule `job` to fire once, `delay` from now.
    fn schedule_once(
        &mut self,
        delay: TimeSpec,
        session: Session,
        job: Job,
    ) -> Result<Handle, BackendError>;

    /// Cancel a callback. Unknown or already-finished handles are ignored.
    fn cancel(&mut self, handle: Handle);

    /// Deliver the next callback due at or before `up_to`, advancing the
    /// clock to its time. Returns `None` once nothing more is due.
    fn poll_due(&mut self, up_to: Seconds) -> Option<Fired>;
}

pub trait Synth {
    fn note_on(
        &mut self,
        part: Part,
        pitches: &[Pitch],
        time: Seconds,
        velocity: f64,
    ) -> Result<(), BackendError>;

    fn note_off(&mut self, part: Part, pitches: &[Pitch], time: Seconds)
    -> Result<(), BackendError>;

    fn note_on_off(
        &mut self,
        part: Part,
        pitches: &[Pitch],
        duration: TimeSpec,
        time: Seconds,
        velocity: f64,
    ) -> Result<(), BackendError>;
}

pub trait FilterControl {
    /// Current cutoff in Hz.
    fn frequency(&self) -> f64;

    /// Exponentially ramp the cutoff to `hz` over `over` seconds.
    fn ramp_frequency(&mut self, hz: f64, over: Seconds) -> Result<(), BackendError>;
}

pub trait Highlighter {
    /// Best-effort visual feedback for a sounding note, named the way
    /// `pitch_to_name` writes it (`"C#4"`). Never fails.
    fn highlight(&mut self, pitch_name: &str, approx_duration: Seconds);
}

/// Everything the engine borrows from the host while playing.
pub struct Backend {
    pub transport: Box<dyn Transport>,
    pub synth: Box<dyn Synth>,
    pub filter: Box<dyn FilterControl>,
    pub highlighter: Option<Box<dyn Highlighter>>,
}

impl Backend {
    pub fn new(
        transport: impl Transport + 'static,
        synth: impl Synth + 'static,
        filter: impl FilterControl + 'static,
    ) -> Self {
        Backend {
            transport: Box::new(transport),
            synth: Box::new(synth),
            filter: Box::new(filter),
            highlighter: None,
        }
    }

    pub fn with_highlighter(mut self, highlighter: impl Highlighter + 'static) -> Self {
        self.highlighter = Some(Box::new(highlighter));
        self
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("now", &self.transport.now())
            .field("bpm", &self.transport.bpm())
            .field("filter_hz", &self.filter.frequency())
            .field("highlighter", &self.highlighter.is_some())
            .finish()
    }
}
