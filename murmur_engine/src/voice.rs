// Voice lifecycle: the Stopped/Running state machine shared by all four
// voices.
//
// A running voice owns two lists of transport handles:
// - `periodic`: the loops created when it started (its tick, plus the
//   rhythm voice's slow mutation loop). Fixed for the voice's lifetime.
// - `chained`: one-shot follow-ups it scheduled from inside a tick (the
//   drone's delayed shift steps). Each is removed when it fires.
//
// `enter` and `exit` are symmetric and idempotent. Entering twice never
// double-schedules; exiting cancels every handle the voice owns, so a
// stopped voice leaves nothing behind in the transport. The engine asks a
// voice whether it owns a fired handle before acting on it, which is how
// late deliveries after a stop are recognised and dropped.
//
// Per-voice counters (melody tick number, drone pattern index, the current
// rhythm pattern) live in `VoiceCounters` inside the running state and are
// discarded on exit, so a restarted voice begins fresh.
//
// See also: `engine/voices.rs` for what each voice does when it ticks.

use crate::backend::{BackendError, Handle, Job, Part, Session, TimeSpec, Transport};
use crate::mood::RhythmPattern;
use tracing::debug;

/// Melody plays on every eighth note.
pub const MELODY_TICK: TimeSpec = TimeSpec::Beats(0.5);
/// One drone pattern per long cycle.
pub const DRONE_CYCLE: TimeSpec = TimeSpec::Bars(16.0);
/// The rhythm pattern loops once per bar.
pub const RHYTHM_LOOP: TimeSpec = TimeSpec::Bars(1.0);
/// How often the rhythm pattern drifts.
pub const RHYTHM_MUTATION_PERIOD: TimeSpec = TimeSpec::Bars(16.0);
pub const AMBIENCE_TICK: TimeSpec = TimeSpec::Bars(2.0);

/// The periodic callbacks a voice owns while running.
pub fn schedules(part: Part) -> &'static [(TimeSpec, Job)] {
    match part {
        Part::Melody => &[(MELODY_TICK, Job::Tick(Part::Melody))],
        Part::Drone => &[(DRONE_CYCLE, Job::Tick(Part::Drone))],
        Part::Rhythm => &[
            (RHYTHM_LOOP, Job::Tick(Part::Rhythm)),
            (RHYTHM_MUTATION_PERIOD, Job::RhythmMutate),
        ],
        Part::Ambience => &[(AMBIENCE_TICK, Job::Tick(Part::Ambience))],
    }
}

/// Per-voice mutable state, reset each time the voice starts.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceCounters {
    Melody { ticks: u64 },
    Drone { cycles: u64 },
    Rhythm { pattern: RhythmPattern, loops: u64 },
    Ambience,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunningVoice {
    pub periodic: Vec<Handle>,
    pub chained: Vec<Handle>,
    pub counters: VoiceCounters,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum VoiceState {
    #[default]
    Stopped,
    Running(RunningVoice),
}

#[derive(Debug, Clone)]
pub struct VoiceSlot {
    part: Part,
    state: VoiceState,
}

impl VoiceSlot {
    pub fn new(part: Part) -> Self {
        VoiceSlot {
            part,
            state: VoiceState::Stopped,
        }
    }

    pub fn part(&self) -> Part {
        self.part
    }

    pub fn state(&self) -> &VoiceState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, VoiceState::Running(_))
    }

    /// Stopped -> Running. Schedules every periodic callback of the voice,
    /// or none: if any scheduling call fails, the ones already made are
    /// cancelled and the voice stays stopped. A running voice is left as is.
    pub fn enter(
        &mut self,
        transport: &mut dyn Transport,
        session: Session,
        counters: VoiceCounters,
    ) -> Result<(), BackendError> {
        if self.is_running() {
            return Ok(());
        }
        let mut periodic = Vec::new();
        for &(interval, job) in schedules(self.part) {
            match transport.schedule_periodic(interval, session, job) {
                Ok(handle) => periodic.push(handle),
                Err(e) => {
                    for handle in periodic {
                        transport.cancel(handle);
                    }
                    return Err(e);
                }
            }
        }
        debug!(part = ?self.part, handles = ?periodic, "voice started");
        self.state = VoiceState::Running(RunningVoice {
            periodic,
            chained: Vec::new(),
            counters,
        });
        Ok(())
    }

    /// Running -> Stopped, cancelling every owned handle. Returns whether
    /// the voice was running.
    pub fn exit(&mut self, transport: &mut dyn Transport) -> bool {
        match std::mem::take(&mut self.state) {
            VoiceState::Stopped => false,
            VoiceState::Running(running) => {
                for handle in running.periodic.iter().chain(&running.chained) {
                    transport.cancel(*handle);
                }
                debug!(part = ?self.part, "voice stopped");
                true
            }
        }
    }

    pub fn owns_periodic(&self, handle: Handle) -> bool {
        match &self.state {
            VoiceState::Running(running) => running.periodic.contains(&handle),
            VoiceState::Stopped => false,
        }
    }

    /// Record a one-shot follow-up. Ignored when stopped.
    pub fn push_chained(&mut self, handle: Handle) {
        if let VoiceState::Running(running) = &mut self.state {
            running.chained.push(handle);
        }
    }

    /// Forget a chained handle that just fired. Returns whether the voice
    /// owned it.
    pub fn take_chained(&mut self, handle: Handle) -> bool {
        match &mut self.state {
            VoiceState::Running(running) => {
                let before = running.chained.len();
                running.chained.retain(|&h| h != handle);
                running.chained.len() != before
            }
            VoiceState::Stopped => false,
        }
    }

    pub fn counters_mut(&mut self) -> Option<&mut VoiceCounters> {
        match &mut self.state {
            VoiceState::Running(running) => Some(&mut running.counters),
            VoiceState::Stopped => None,
        }
    }

    pub fn handle_count(&self) -> usize {
        match &self.state {
            VoiceState::Running(running) => running.periodic.len() + running.chained.len(),
            VoiceState::Stopped => 0,
        }
    }
}
