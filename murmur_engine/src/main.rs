// Murmur performer: CLI entry point.
//
// Renders a headless performance. The engine runs against the offline
// transport, so a few minutes of music take milliseconds, and every note is
// written to the log instead of a sound card. Useful for hearing a config
// "on paper", for checking a seed reproduces, and for watching evolution
// and variations at work (`RUST_LOG=murmur_engine=debug`).
//
// Usage:
//   cargo run -p murmur_engine --bin perform -- [--config FILE] [--mood M]
//     [--scale S] [--root R] [--density N] [--variation N] [--evolution N]
//     [--seed N] [--seconds N] [--then-mood M] [--mute VOICE,...] [--status-json]
//
// Flags override values loaded from `--config`.

use clap::Parser;
use murmur_engine::backend::{BackendError, Part, Seconds, Synth, TimeSpec};
use murmur_engine::offline::{OfflineTransport, RecordingFilter};
use murmur_engine::pitch::Pitch;
use murmur_engine::{Backend, Config, ConfigPatch, Engine, EngineError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Initial filter cutoff of the rendered performance.
const START_FILTER_HZ: f64 = 2_000.0;
/// How far the clock advances per render step.
const RENDER_STEP: Seconds = 1.0;

#[derive(Parser)]
#[command(name = "perform")]
#[command(about = "Render a generative performance to the log")]
#[command(version)]
struct Cli {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    mood: Option<String>,

    #[arg(long)]
    scale: Option<String>,

    #[arg(long)]
    root: Option<String>,

    /// 0-100
    #[arg(long)]
    density: Option<f64>,

    /// 0-100
    #[arg(long)]
    variation: Option<f64>,

    /// 0-100
    #[arg(long)]
    evolution: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Length of the performance in seconds
    #[arg(short, long, default_value_t = 60.0)]
    seconds: f64,

    /// Switch to this mood halfway through
    #[arg(long)]
    then_mood: Option<String>,

    /// Voices to leave silent
    #[arg(long, value_enum, value_delimiter = ',')]
    mute: Vec<VoiceArg>,

    /// Print the final engine status as JSON
    #[arg(long)]
    status_json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum VoiceArg {
    Melody,
    Drone,
    Rhythm,
    Ambience,
}

impl From<VoiceArg> for Part {
    fn from(voice: VoiceArg) -> Part {
        match voice {
            VoiceArg::Melody => Part::Melody,
            VoiceArg::Drone => Part::Drone,
            VoiceArg::Rhythm => Part::Rhythm,
            VoiceArg::Ambience => Part::Ambience,
        }
    }
}

/// Synth that writes every note to the log.
struct LogSynth;

impl LogSynth {
    fn log(&self, part: Part, pitches: &[Pitch], at: Seconds, what: &str, velocity: f64) {
        let names: Vec<String> = pitches.iter().map(|p| p.name()).collect();
        info!(target: "notes", ?part, at, velocity, "{what} {}", names.join(" "));
    }
}

impl Synth for LogSynth {
    fn note_on(
        &mut self,
        part: Part,
        pitches: &[Pitch],
        time: Seconds,
        velocity: f64,
    ) -> Result<(), BackendError> {
        self.log(part, pitches, time, "on", velocity);
        Ok(())
    }

    fn note_off(&mut self, part: Part, pitches: &[Pitch], time: Seconds) -> Result<(), BackendError> {
        self.log(part, pitches, time, "off", 0.0);
        Ok(())
    }

    fn note_on_off(
        &mut self,
        part: Part,
        pitches: &[Pitch],
        duration: TimeSpec,
        time: Seconds,
        velocity: f64,
    ) -> Result<(), BackendError> {
        let what = match duration {
            TimeSpec::Seconds(s) => format!("{s:.2}s"),
            TimeSpec::Beats(b) => format!("{b} beats"),
            TimeSpec::Bars(b) => format!("{b} bars"),
        };
        self.log(part, pitches, time, &what, velocity);
        Ok(())
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), EngineError> {
    let base = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let mut patch = ConfigPatch {
        mood: cli.mood.clone(),
        scale: cli.scale.clone(),
        root: cli.root.clone(),
        density: cli.density,
        variation: cli.variation,
        evolution: cli.evolution,
        seed: cli.seed,
        ..ConfigPatch::default()
    };
    for &voice in &cli.mute {
        match Part::from(voice) {
            Part::Melody => patch.melody_enabled = Some(false),
            Part::Drone => patch.drone_enabled = Some(false),
            Part::Rhythm => patch.rhythm_enabled = Some(false),
            Part::Ambience => patch.ambience_enabled = Some(false),
        }
    }
    let config = base.merged(&patch);

    let mut engine = Engine::new(config)?;
    let transport = OfflineTransport::new(120.0);
    let backend = Backend::new(
        transport,
        LogSynth,
        RecordingFilter::new(START_FILTER_HZ),
    );
    engine.start(backend);

    let halfway = cli.seconds / 2.0;
    let mut switched = cli.then_mood.is_none();
    let mut t = 0.0;
    let mut callbacks = 0;
    while t < cli.seconds {
        t = (t + RENDER_STEP).min(cli.seconds);
        if !switched && t >= halfway {
            let patch = ConfigPatch {
                mood: cli.then_mood.clone(),
                ..ConfigPatch::default()
            };
            engine.update_config(&patch)?;
            switched = true;
        }
        callbacks += engine.run_until(t);
    }

    let status = engine.status();
    info!(
        callbacks,
        mood = status.mood.name(),
        tempo = ?status.tempo,
        chord = ?status.current_chord,
        "performance finished"
    );
    if cli.status_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }
    engine.stop();
    Ok(())
}
