// Host-facing configuration and the settings derived from it.
//
// `Config` is the engine's whole public parameter surface: which scale and
// root to play in, which mood, three 0-100 dials (density, variation,
// evolution), one enable flag per voice, and an optional RNG seed. It loads
// from JSON with every field defaulted, so a partial file such as
// `{"mood": "dreamy"}` is valid.
//
// Runtime changes go through `ConfigPatch`, where every field is optional.
// `Config::merged` applies a patch to produce the candidate next config,
// which the engine validates before touching any state.
//
// `DerivedSettings` are never stored. They are pure functions of the config
// (`Config::derived`), recomputed whenever read, so they cannot drift out of
// sync with the dials that produce them.
//
// See also: `engine/mod.rs` (`Engine::update_config` diffs old vs. new),
// `mood.rs` for what the mood name selects.

use crate::backend::{Part, Seconds};
use crate::error::EngineError;
use crate::mood::Mood;
use crate::pitch::parse_pitch_class;
use crate::scale::ScaleKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Evolution interval at evolution = 100.
pub const EVOLUTION_BASE_INTERVAL: Seconds = 5.0;
/// Added to the interval as evolution falls to 0.
pub const EVOLUTION_INTERVAL_SPAN: Seconds = 25.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scale: String,
    pub root: String,
    pub mood: String,
    /// 0-100. Probability that a melody tick produces a note, and bias
    /// toward denser rhythm patterns.
    pub density: f64,
    /// 0-100. Chance of a variation at each phrase boundary.
    pub variation: f64,
    /// 0-100. Higher values shorten the evolution interval.
    pub evolution: f64,
    pub melody_enabled: bool,
    pub drone_enabled: bool,
    pub rhythm_enabled: bool,
    pub ambience_enabled: bool,
    /// Fixed seed for reproducible performances. Drawn from the clock when
    /// absent.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scale: "major".to_string(),
            root: "C".to_string(),
            mood: "calm".to_string(),
            density: 50.0,
            variation: 30.0,
            evolution: 40.0,
            melody_enabled: true,
            drone_enabled: true,
            rhythm_enabled: true,
            ambience_enabled: true,
            seed: None,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Check names resolve and dials are in range.
    pub fn validate(&self) -> Result<(), EngineError> {
        parse_pitch_class(&self.root).ok_or_else(|| EngineError::UnknownRoot(self.root.clone()))?;
        ScaleKind::from_name(&self.scale)?;
        Mood::from_name(&self.mood)?;
        for (field, value) in [
            ("density", self.density),
            ("variation", self.variation),
            ("evolution", self.evolution),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(EngineError::OutOfRange { field, value });
            }
        }
        Ok(())
    }

    pub fn derived(&self) -> DerivedSettings {
        DerivedSettings::from_config(self)
    }

    pub fn voice_enabled(&self, part: Part) -> bool {
        match part {
            Part::Melody => self.melody_enabled,
            Part::Drone => self.drone_enabled,
            Part::Rhythm => self.rhythm_enabled,
            Part::Ambience => self.ambience_enabled,
        }
    }

    /// This config with every field present in `patch` overwritten.
    pub fn merged(&self, patch: &ConfigPatch) -> Config {
        let mut next = self.clone();
        if let Some(v) = &patch.scale {
            next.scale = v.clone();
        }
        if let Some(v) = &patch.root {
            next.root = v.clone();
        }
        if let Some(v) = &patch.mood {
            next.mood = v.clone();
        }
        if let Some(v) = patch.density {
            next.density = v;
        }
        if let Some(v) = patch.variation {
            next.variation = v;
        }
        if let Some(v) = patch.evolution {
            next.evolution = v;
        }
        if let Some(v) = patch.melody_enabled {
            next.melody_enabled = v;
        }
        if let Some(v) = patch.drone_enabled {
            next.drone_enabled = v;
        }
        if let Some(v) = patch.rhythm_enabled {
            next.rhythm_enabled = v;
        }
        if let Some(v) = patch.ambience_enabled {
            next.ambience_enabled = v;
        }
        if let Some(v) = patch.seed {
            next.seed = Some(v);
        }
        next
    }
}

/// A partial config update. Absent fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evolution: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub melody_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drone_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rhythm_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambience_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl ConfigPatch {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn voice(part: Part, enabled: bool) -> Self {
        let mut patch = ConfigPatch::default();
        match part {
            Part::Melody => patch.melody_enabled = Some(enabled),
            Part::Drone => patch.drone_enabled = Some(enabled),
            Part::Rhythm => patch.rhythm_enabled = Some(enabled),
            Part::Ambience => patch.ambience_enabled = Some(enabled),
        }
        patch
    }
}

/// Settings computed from the 0-100 dials.
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedSettings {
    /// Chance a melody tick plays, 0.1 at density 0 up to 0.95.
    pub note_probability: f64,
    /// Chance of a variation at a phrase boundary.
    pub variation_threshold: f64,
    /// 1.0 is the slowest evolution, 0.0 the fastest.
    pub evolution_rate: f64,
    /// Weights for choosing the sparse / medium / dense rhythm pattern.
    pub pattern_weights: [f64; 3],
}

impl DerivedSettings {
    pub fn from_config(config: &Config) -> Self {
        let density = (config.density / 100.0).clamp(0.0, 1.0);
        DerivedSettings {
            note_probability: 0.1 + 0.85 * density,
            variation_threshold: (config.variation / 100.0).clamp(0.0, 1.0),
            evolution_rate: 1.0 - (config.evolution / 100.0).clamp(0.0, 1.0),
            pattern_weights: [(1.0 - density) + 0.1, 0.5, density + 0.1],
        }
    }

    pub fn evolution_interval(&self) -> Seconds {
        EVOLUTION_BASE_INTERVAL + self.evolution_rate * EVOLUTION_INTERVAL_SPAN
    }
}
