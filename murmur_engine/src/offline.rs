// Offline backend: a virtual-clock transport and recording collaborators.
//
// `OfflineTransport` is a discrete-event scheduler. Callbacks wait in a
// priority queue ordered by `(time, sequence)` and are delivered by
// `poll_due`, which jumps the clock straight to each due time, so an hour of
// music renders in milliseconds and identically every run. Periodic
// callbacks re-enter the queue after each firing, with their musical
// interval resolved against the tempo (including an in-progress ramp) at
// that moment.
//
// `RecordingSynth`, `RecordingFilter` and `RecordingHighlighter` log every
// call instead of making sound. All four types are cheap `Clone` handles over
// shared state, so a test can hand one clone to the engine and keep another
// to inspect what happened. Each can also be told to fail, for exercising
// the engine's error tolerance.
//
// See also: `backend.rs` for the traits implemented here, `main.rs` which
// renders a headless performance with this transport.
//
// **Critical constraint: determinism.** Ties between callbacks due at the
// same instant are broken by scheduling order.

use crate::backend::{
    BackendError, FilterControl, Fired, Handle, Highlighter, Job, Part, Seconds, Session, Synth,
    TimeSpec, Transport,
};
use crate::pitch::Pitch;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::rc::Rc;

/// Shortest period a periodic callback may have; keeps a zero interval from
/// stalling the clock.
const MIN_PERIOD: Seconds = 0.001;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
struct QueueEntry {
    time: Seconds,
    sequence: u64,
    handle: Handle,
}

// Min-heap on (time, sequence): BinaryHeap is a max-heap, so reverse.
impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Clone, Copy, Debug)]
struct Scheduled {
    session: Session,
    job: Job,
    /// `None` for one-shot callbacks.
    period: Option<TimeSpec>,
}

/// Linear tempo ramp; a constant tempo is a ramp with `start == end`.
#[derive(Clone, Copy, Debug)]
struct TempoRamp {
    from: f64,
    to: f64,
    start: Seconds,
    end: Seconds,
}

impl TempoRamp {
    fn constant(bpm: f64, at: Seconds) -> Self {
        TempoRamp {
            from: bpm,
            to: bpm,
            start: at,
            end: at,
        }
    }

    fn bpm_at(&self, t: Seconds) -> f64 {
        if t >= self.end {
            self.to
        } else if t <= self.start {
            self.from
        } else {
            let f = (t - self.start) / (self.end - self.start);
            self.from + (self.to - self.from) * f
        }
    }
}

#[derive(Debug)]
struct TransportState {
    now: Seconds,
    running: bool,
    disposed: bool,
    tempo: TempoRamp,
    queue: BinaryHeap<QueueEntry>,
    scheduled: BTreeMap<Handle, Scheduled>,
    next_handle: u64,
    next_sequence: u64,
}

impl TransportState {
    fn check(&self) -> Result<(), BackendError> {
        if self.disposed {
            Err(BackendError::Disposed)
        } else {
            Ok(())
        }
    }

    fn enqueue(&mut self, time: Seconds, handle: Handle) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queue.push(QueueEntry {
            time,
            sequence,
            handle,
        });
    }

    fn add(&mut self, first_at: Seconds, scheduled: Scheduled) -> Handle {
        let handle = Handle(self.next_handle);
        self.next_handle += 1;
        self.scheduled.insert(handle, scheduled);
        self.enqueue(first_at, handle);
        handle
    }
}

/// Virtual-clock transport driven by `poll_due`.
#[derive(Clone, Debug)]
pub struct OfflineTransport {
    state: Rc<RefCell<TransportState>>,
}

impl OfflineTransport {
    pub fn new(bpm: f64) -> Self {
        OfflineTransport {
            state: Rc::new(RefCell::new(TransportState {
                now: 0.0,
                running: false,
                disposed: false,
                tempo: TempoRamp::constant(bpm, 0.0),
                queue: BinaryHeap::new(),
                scheduled: BTreeMap::new(),
                next_handle: 1,
                next_sequence: 0,
            })),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    /// Handles that are still scheduled to fire.
    pub fn active_handles(&self) -> Vec<Handle> {
        self.state.borrow().scheduled.keys().copied().collect()
    }

    pub fn active_count(&self) -> usize {
        self.state.borrow().scheduled.len()
    }

    pub fn scheduled_jobs(&self) -> Vec<Job> {
        self.state
            .borrow()
            .scheduled
            .values()
            .map(|s| s.job)
            .collect()
    }

    /// Deliver `handle` immediately, as a host would on a manual trigger.
    /// Fails if the handle is not currently scheduled. The schedule itself
    /// is left unchanged.
    pub fn force_fire(&self, handle: Handle) -> Result<Fired, BackendError> {
        let state = self.state.borrow();
        state.check()?;
        let scheduled = state
            .scheduled
            .get(&handle)
            .ok_or(BackendError::UnknownHandle(handle))?;
        Ok(Fired {
            handle,
            session: scheduled.session,
            job: scheduled.job,
            time: state.now,
        })
    }

    /// Make every subsequent call fail with `Disposed`.
    pub fn dispose(&self) {
        self.state.borrow_mut().disposed = true;
    }
}

impl Transport for OfflineTransport {
    fn now(&self) -> Seconds {
        self.state.borrow().now
    }

    fn bpm(&self) -> f64 {
        let state = self.state.borrow();
        state.tempo.bpm_at(state.now)
    }

    fn start(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        state.check()?;
        state.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        state.check()?;
        state.running = false;
        Ok(())
    }

    fn set_tempo(&mut self, bpm: f64) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        state.check()?;
        state.tempo = TempoRamp::constant(bpm, state.now);
        Ok(())
    }

    fn ramp_tempo(&mut self, bpm: f64, over: Seconds) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        state.check()?;
        let now = state.now;
        state.tempo = TempoRamp {
            from: state.tempo.bpm_at(now),
            to: bpm,
            start: now,
            end: now + over.max(0.0),
        };
        Ok(())
    }

    fn schedule_periodic(
        &mut self,
        interval: TimeSpec,
        session: Session,
        job: Job,
    ) -> Result<Handle, BackendError> {
        let mut state = self.state.borrow_mut();
        state.check()?;
        let now = state.now;
        let scheduled = Scheduled {
            session,
            job,
            period: Some(interval),
        };
        Ok(state.add(now, scheduled))
    }

    fn schedule_once(
        &mut self,
        delay: TimeSpec,
        session: Session,
        job: Job,
    ) -> Result<Handle, BackendError> {
        let mut state = self.state.borrow_mut();
        state.check()?;
        let at = state.now + delay.to_seconds(state.tempo.bpm_at(state.now)).max(0.0);
        let scheduled = Scheduled {
            session,
            job,
            period: None,
        };
        Ok(state.add(at, scheduled))
    }

    fn cancel(&mut self, handle: Handle) {
        // Its queue entry is skipped lazily when it surfaces.
        self.state.borrow_mut().scheduled.remove(&handle);
    }

    fn poll_due(&mut self, up_to: Seconds) -> Option<Fired> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if !state.running || state.disposed {
            state.now = state.now.max(up_to);
            return None;
        }
        while let Some(entry) = state.queue.peek().copied() {
            if entry.time > up_to {
                break;
            }
            state.queue.pop();
            let Some(scheduled) = state.scheduled.get(&entry.handle).copied() else {
                continue;
            };
            state.now = state.now.max(entry.time);
            match scheduled.period {
                Some(period) => {
                    let bpm = state.tempo.bpm_at(entry.time);
                    let next = entry.time + period.to_seconds(bpm).max(MIN_PERIOD);
                    state.enqueue(next, entry.handle);
                }
                None => {
                    state.scheduled.remove(&entry.handle);
                }
            }
            return Some(Fired {
                handle: entry.handle,
                session: scheduled.session,
                job: scheduled.job,
                time: entry.time,
            });
        }
        state.now = state.now.max(up_to);
        None
    }
}

// ---------------------------------------------------------------------------
// Synth
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NoteKind {
    On,
    Off,
    OnOff { duration: TimeSpec },
}

/// One recorded synth call.
#[derive(Clone, Debug, PartialEq)]
pub struct NoteEvent {
    pub part: Part,
    pub kind: NoteKind,
    pub pitches: Vec<Pitch>,
    pub time: Seconds,
    /// Zero for note-off.
    pub velocity: f64,
}

#[derive(Debug, Default)]
struct SynthLog {
    events: Vec<NoteEvent>,
    failures_remaining: usize,
    disposed: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RecordingSynth {
    log: Rc<RefCell<SynthLog>>,
}

impl RecordingSynth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NoteEvent> {
        self.log.borrow().events.clone()
    }

    pub fn count(&self, part: Part) -> usize {
        self.log
            .borrow()
            .events
            .iter()
            .filter(|e| e.part == part)
            .count()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().events.clear();
    }

    /// Reject the next `n` calls.
    pub fn fail_next(&self, n: usize) {
        self.log.borrow_mut().failures_remaining = n;
    }

    pub fn dispose(&self) {
        self.log.borrow_mut().disposed = true;
    }

    fn record(&self, event: NoteEvent) -> Result<(), BackendError> {
        let mut log = self.log.borrow_mut();
        if log.disposed {
            return Err(BackendError::Disposed);
        }
        if log.failures_remaining > 0 {
            log.failures_remaining -= 1;
            return Err(BackendError::Rejected("injected synth failure".into()));
        }
        log.events.push(event);
        Ok(())
    }
}

impl Synth for RecordingSynth {
    fn note_on(
        &mut self,
        part: Part,
        pitches: &[Pitch],
        time: Seconds,
        velocity: f64,
    ) -> Result<(), BackendError> {
        self.record(NoteEvent {
            part,
            kind: NoteKind::On,
            pitches: pitches.to_vec(),
            time,
            velocity,
        })
    }

    fn note_off(&mut self, part: Part, pitches: &[Pitch], time: Seconds) -> Result<(), BackendError> {
        self.record(NoteEvent {
            part,
            kind: NoteKind::Off,
            pitches: pitches.to_vec(),
            time,
            velocity: 0.0,
        })
    }

    fn note_on_off(
        &mut self,
        part: Part,
        pitches: &[Pitch],
        duration: TimeSpec,
        time: Seconds,
        velocity: f64,
    ) -> Result<(), BackendError> {
        self.record(NoteEvent {
            part,
            kind: NoteKind::OnOff { duration },
            pitches: pitches.to_vec(),
            time,
            velocity,
        })
    }
}

// ---------------------------------------------------------------------------
// Filter and highlighter
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FilterLog {
    frequency: f64,
    ramps: Vec<(f64, Seconds)>,
    disposed: bool,
}

/// Filter whose ramps land instantly on their target.
#[derive(Clone, Debug)]
pub struct RecordingFilter {
    log: Rc<RefCell<FilterLog>>,
}

impl RecordingFilter {
    pub fn new(hz: f64) -> Self {
        RecordingFilter {
            log: Rc::new(RefCell::new(FilterLog {
                frequency: hz,
                ramps: Vec::new(),
                disposed: false,
            })),
        }
    }

    /// Every `(target_hz, seconds)` ramp requested so far.
    pub fn ramps(&self) -> Vec<(f64, Seconds)> {
        self.log.borrow().ramps.clone()
    }

    pub fn dispose(&self) {
        self.log.borrow_mut().disposed = true;
    }
}

impl FilterControl for RecordingFilter {
    fn frequency(&self) -> f64 {
        self.log.borrow().frequency
    }

    fn ramp_frequency(&mut self, hz: f64, over: Seconds) -> Result<(), BackendError> {
        let mut log = self.log.borrow_mut();
        if log.disposed {
            return Err(BackendError::Disposed);
        }
        log.frequency = hz;
        log.ramps.push((hz, over));
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecordingHighlighter {
    log: Rc<RefCell<Vec<(String, Seconds)>>>,
}

impl RecordingHighlighter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(pitch name, approximate duration)` in call order.
    pub fn highlights(&self) -> Vec<(String, Seconds)> {
        self.log.borrow().clone()
    }
}

impl Highlighter for RecordingHighlighter {
    fn highlight(&mut self, pitch_name: &str, approx_duration: Seconds) {
        self.log
            .borrow_mut()
            .push((pitch_name.to_string(), approx_duration));
    }
}
