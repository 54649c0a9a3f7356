// Configuration errors raised by the composition engine.
//
// These are the only errors that escape the engine. They are raised at
// construction or `update_config` time, before any state is mutated, so a
// rejected config leaves the engine exactly as it was. Failures of the audio
// collaborators are a different concern and live in `backend::BackendError`;
// those are logged and swallowed per tick, never surfaced here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown root note '{0}'")]
    UnknownRoot(String),
    #[error("unknown scale '{0}'")]
    UnknownScale(String),
    #[error("unknown mood '{0}'")]
    UnknownMood(String),
    #[error("invalid octave range {min}..={max}")]
    InvalidOctaveRange { min: u8, max: u8 },
    #[error("{field} must be within 0..=100, got {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
}
