// Murmur composition engine
//
// A procedural, multi-voice music engine that plays endless ambient music in
// real time. Four voices (melody, drone, rhythm, ambience) share one scale,
// one mood and one slowly changing chord. The melody walks scale degrees
// with a first-order Markov chain whose matrix is generated from the mood;
// the other voices support it with sustained drones, swung step patterns
// and sparse long tones. Parameter Evolution and the Variation System keep
// the result drifting so it never loops audibly.
//
// The engine makes no sound itself. Clock, synth and filter are injected as
// trait objects (`backend.rs`), and every scheduled callback is plain data
// delivered back through `Engine::dispatch`.
//
// Architecture:
// - pitch.rs: Pitch numbering (octave * 12 + semitone) and note names
// - scale.rs: Named interval patterns, pitch lists, drone pitches
// - mood.rs: Mood profiles, bounds, transition matrices, rhythm patterns
// - markov.rs: The melody walker over a transition matrix
// - chord.rs: Scale-degree triads and the optional dissonant tone
// - harmony.rs: The shared current chord and its change deadline
// - config.rs: Host config, partial patches, derived settings
// - backend.rs: Transport / Synth / FilterControl / Highlighter traits
// - offline.rs: Virtual-clock transport and recording collaborators
// - voice.rs: Per-voice Stopped/Running state machine and handle ownership
// - engine/: Lifecycle, dispatch, voice ticks, evolution, variations
// - error.rs: Configuration errors
//
// Every random decision draws from one seeded `MurmurRng`, so a fixed seed
// and the offline transport reproduce a performance exactly.

pub mod backend;
pub mod chord;
pub mod config;
pub mod engine;
pub mod error;
pub mod harmony;
pub mod markov;
pub mod mood;
pub mod offline;
pub mod pitch;
pub mod scale;
pub mod voice;

pub use backend::{Backend, BackendError, Part, TimeSpec};
pub use config::{Config, ConfigPatch};
pub use engine::{Engine, EngineState, EngineStatus};
pub use error::EngineError;
