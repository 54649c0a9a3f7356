// Integration tests for whole performances on the offline backend.
//
// Each test builds an engine from JSON config, starts it against an
// `OfflineTransport` with recording synth and filter, and drives the clock
// with `run_until`. The transport, synth and filter are shared handles, so
// the test keeps a clone of each to inspect scheduled callbacks and emitted
// notes after the engine has consumed the backend.

use murmur_engine::backend::{Fired, Handle, Job, Part, Seconds, Transport};
use murmur_engine::engine::{FILTER_RANGE, NOTE_SAFETY_OFFSET, TEMPO_RAMP, Variation};
use murmur_engine::mood::{
    Mood, NOTE_LENGTH_LIMITS, RhythmPattern, TransitionMatrix, VELOCITY_LIMITS,
};
use murmur_engine::offline::{
    NoteEvent, NoteKind, OfflineTransport, RecordingFilter, RecordingHighlighter, RecordingSynth,
};
use murmur_engine::voice::{VoiceCounters, VoiceState};
use murmur_engine::{Backend, Config, ConfigPatch, Engine, EngineState};

/// Only the drone sounds, in C major.
const DRONE_ONLY: &str = r#"{"root": "C", "scale": "major", "seed": 111,
    "melody_enabled": false, "rhythm_enabled": false, "ambience_enabled": false}"#;

struct Rig {
    transport: OfflineTransport,
    synth: RecordingSynth,
    filter: RecordingFilter,
    highlighter: RecordingHighlighter,
}

/// Helper: a fresh offline rig, and a backend sharing its collaborators.
fn rig() -> (Rig, Backend) {
    let rig = Rig {
        transport: OfflineTransport::new(100.0),
        synth: RecordingSynth::new(),
        filter: RecordingFilter::new(2_000.0),
        highlighter: RecordingHighlighter::new(),
    };
    let backend = Backend::new(rig.transport.clone(), rig.synth.clone(), rig.filter.clone())
        .with_highlighter(rig.highlighter.clone());
    (rig, backend)
}

/// Helper: build an engine from JSON and start it on a fresh offline rig.
fn start(json: &str) -> (Engine, Rig) {
    let mut engine = Engine::new(Config::from_json(json).unwrap()).unwrap();
    let (rig, backend) = rig();
    engine.start(backend);
    (engine, rig)
}

fn drone_events(synth: &RecordingSynth) -> Vec<NoteEvent> {
    synth
        .events()
        .into_iter()
        .filter(|e| e.part == Part::Drone)
        .collect()
}

/// Pending chained callbacks of the drone's shift pattern.
fn pending_drone_shifts(transport: &OfflineTransport) -> Vec<Fired> {
    transport
        .active_handles()
        .into_iter()
        .map(|h| transport.force_fire(h).unwrap())
        .filter(|f| matches!(f.job, Job::DroneShift { .. }))
        .collect()
}

/// Step the clock in half seconds until the drone enters its shift pattern.
fn run_to_drone_shift(engine: &mut Engine, transport: &OfflineTransport) -> Seconds {
    let mut t = 0.0;
    while pending_drone_shifts(transport).is_empty() {
        t += 0.5;
        assert!(t < 600.0, "drone never reached its shift pattern");
        engine.run_until(t);
    }
    t
}

fn rhythm_pattern(engine: &Engine) -> RhythmPattern {
    match engine.voice(Part::Rhythm).state() {
        VoiceState::Running(running) => match &running.counters {
            VoiceCounters::Rhythm { pattern, .. } => pattern.clone(),
            other => panic!("rhythm voice holds {other:?}"),
        },
        VoiceState::Stopped => panic!("rhythm voice stopped"),
    }
}

/// Helper: the long-lived (periodic) callbacks currently scheduled.
fn periodic_handles(transport: &OfflineTransport) -> Vec<(Handle, Job)> {
    transport
        .active_handles()
        .into_iter()
        .map(|h| (h, transport.force_fire(h).unwrap().job))
        .filter(|(_, job)| matches!(job, Job::Tick(_) | Job::RhythmMutate | Job::Evolve))
        .collect()
}

#[test]
fn start_then_stop_leaves_nothing_scheduled() {
    let (mut engine, rig) = start(r#"{"root": "A", "scale": "minor", "mood": "calm", "seed": 11}"#);
    assert_eq!(engine.state(), EngineState::Playing);
    engine.run_until(45.0);
    assert!(!rig.synth.events().is_empty());

    let before = rig.transport.active_handles();
    assert!(!before.is_empty());
    let backend = engine.stop();
    assert!(backend.is_some());
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(rig.transport.active_count(), 0);
    assert!(!rig.transport.is_running());
    for handle in before {
        assert!(rig.transport.force_fire(handle).is_err());
    }
}

#[test]
fn late_callbacks_after_stop_are_dropped() {
    let (mut engine, rig) = start(r#"{"seed": 12}"#);
    let melody = periodic_handles(&rig.transport)
        .into_iter()
        .find(|(_, job)| *job == Job::Tick(Part::Melody))
        .unwrap();
    let stale = rig.transport.force_fire(melody.0).unwrap();
    engine.stop();
    rig.synth.clear();
    engine.dispatch(stale);
    assert!(rig.synth.events().is_empty());
}

#[test]
fn restart_on_a_new_transport_ignores_old_callbacks() {
    let json = r#"{"density": 100, "seed": 14,
        "drone_enabled": false, "rhythm_enabled": false, "ambience_enabled": false}"#;
    let (mut engine, old) = start(json);
    let (melody, _) = periodic_handles(&old.transport)
        .into_iter()
        .find(|(_, job)| *job == Job::Tick(Part::Melody))
        .unwrap();
    let stale = old.transport.force_fire(melody).unwrap();
    engine.stop();

    let (new, backend) = rig();
    engine.start(backend);
    // The new transport numbers its handles from scratch, so the stale
    // handle collides with the live melody tick.
    assert!(
        periodic_handles(&new.transport).contains(&(stale.handle, Job::Tick(Part::Melody)))
    );
    for _ in 0..20 {
        engine.dispatch(stale);
    }
    assert_eq!(new.synth.count(Part::Melody), 0);
    assert_eq!(old.synth.count(Part::Melody), 0);

    engine.run_until(5.0);
    assert!(new.synth.count(Part::Melody) > 0);
}

#[test]
fn drone_cycles_through_its_patterns() {
    let (mut engine, rig) = start(DRONE_ONLY);
    let t = run_to_drone_shift(&mut engine, &rig.transport);
    assert_eq!(pending_drone_shifts(&rig.transport).len(), 2);
    assert_eq!(engine.voice(Part::Drone).handle_count(), 3);

    let scale = engine.scale().clone();
    let [low, high, fifth] = scale.drone_pitches();
    let third = low.transposed(i16::from(scale.third_semitones())).unwrap();

    let held: Vec<_> = drone_events(&rig.synth)
        .into_iter()
        .filter(|e| matches!(e.kind, NoteKind::OnOff { .. }))
        .map(|e| e.pitches)
        .collect();
    assert_eq!(held, vec![vec![low, fifth], vec![low, third, fifth], vec![low, high]]);

    // The shift pattern enters one tone at a time.
    engine.run_until(t + 4.0);
    assert!(pending_drone_shifts(&rig.transport).is_empty());
    assert_eq!(engine.voice(Part::Drone).handle_count(), 1);
    let events = drone_events(&rig.synth);
    let entries: Vec<_> = events.iter().filter(|e| e.kind == NoteKind::On).collect();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].pitches, vec![low]);
    assert_eq!(entries[1].pitches, vec![fifth]);
    assert_eq!(entries[2].pitches, vec![high]);
    assert!((entries[1].time - entries[0].time - 1.5).abs() < 1e-9);
    assert!((entries[2].time - entries[0].time - 3.0).abs() < 1e-9);
    assert!(entries[0].time >= NOTE_SAFETY_OFFSET);

    // Every entry is released together with its issue.
    let releases: Vec<_> = events.iter().filter(|e| e.kind == NoteKind::Off).collect();
    assert_eq!(releases.len(), 3);
    for (on, off) in entries.iter().zip(&releases) {
        assert_eq!(on.pitches, off.pitches);
        assert!(off.time > on.time);
    }
}

#[test]
fn stopping_mid_shift_cancels_the_chain() {
    let (mut engine, rig) = start(DRONE_ONLY);
    run_to_drone_shift(&mut engine, &rig.transport);
    let in_flight = pending_drone_shifts(&rig.transport);
    assert_eq!(in_flight.len(), 2);
    let before = drone_events(&rig.synth).len();

    let backend = engine.stop().unwrap();
    assert_eq!(rig.transport.active_count(), 0);
    for fired in &in_flight {
        assert!(rig.transport.force_fire(fired.handle).is_err());
        engine.dispatch(*fired);
    }
    assert_eq!(drone_events(&rig.synth).len(), before);

    // Nor after a restart on the same transport.
    engine.start(backend);
    for fired in &in_flight {
        engine.dispatch(*fired);
    }
    assert_eq!(drone_events(&rig.synth).len(), before);
    engine.stop();
    assert_eq!(rig.transport.active_count(), 0);
}

#[test]
fn rhythm_pattern_drifts_while_playing() {
    let (mut engine, rig) = start(
        r#"{"seed": 121, "melody_enabled": false, "drone_enabled": false,
            "ambience_enabled": false}"#,
    );
    let initial = rhythm_pattern(&engine);
    let mut seen = vec![initial.clone()];
    let mut t = 0.0;
    while t < 600.0 {
        t += 5.0;
        engine.run_until(t);
        let pattern = rhythm_pattern(&engine);
        assert_eq!(pattern.len(), initial.len());
        if !seen.contains(&pattern) {
            seen.push(pattern);
        }
    }
    assert!(seen.len() > 2, "pattern only took {} shapes", seen.len());
    assert!(rig.synth.count(Part::Rhythm) > 0);
}

#[test]
fn restart_after_stop_plays_again() {
    let (mut engine, rig) = start(r#"{"seed": 13}"#);
    engine.run_until(10.0);
    let backend = engine.stop().unwrap();
    rig.synth.clear();
    engine.start(backend);
    assert_eq!(periodic_handles(&rig.transport).len(), 6);
    engine.run_until(40.0);
    assert!(rig.synth.count(Part::Drone) > 0);
}

#[test]
fn mood_change_ramps_tempo_without_restarting_voices() {
    let (mut engine, rig) = start(r#"{"root": "A", "scale": "minor", "mood": "calm", "seed": 21}"#);
    engine.run_until(10.0);
    let calm = Mood::Calm.profile().tempo;
    assert!(calm.contains(rig.transport.bpm()));
    let handles_before = periodic_handles(&rig.transport);

    let patch = ConfigPatch {
        mood: Some("intense".into()),
        ..ConfigPatch::default()
    };
    engine.update_config(&patch).unwrap();

    assert_eq!(engine.mood_settings().mood, Mood::Intense);
    assert_eq!(engine.mood_settings().params, Mood::Intense.profile());
    assert_eq!(
        engine.matrix(),
        &TransitionMatrix::for_mood(&Mood::Intense.profile(), 7)
    );
    assert_eq!(periodic_handles(&rig.transport), handles_before);

    engine.run_until(10.0 + TEMPO_RAMP + 1.0);
    let intense = Mood::Intense.profile().tempo;
    let bpm = rig.transport.bpm();
    assert!(intense.contains(bpm), "tempo {bpm} outside {intense:?}");
}

#[test]
fn evolution_stays_in_bounds() {
    let (mut engine, rig) = start(
        r#"{"mood": "playful", "evolution": 100, "seed": 31,
            "melody_enabled": false, "drone_enabled": false,
            "rhythm_enabled": false, "ambience_enabled": false}"#,
    );
    let tempo = Mood::Playful.profile().tempo;
    // Evolution fires every 5 s at evolution = 100: 1000 ticks.
    let mut t = 0.0;
    while t < 5_000.0 {
        t += 5.0;
        engine.run_until(t);
        let bpm = rig.transport.bpm();
        assert!(tempo.contains(bpm), "tempo {bpm} left {tempo:?} at {t}");
        let params = &engine.mood_settings().params;
        assert!(params.note_length.min <= params.note_length.max);
        assert!(params.velocity.min <= params.velocity.max);
        assert!(NOTE_LENGTH_LIMITS.contains(params.note_length.min));
        assert!(NOTE_LENGTH_LIMITS.contains(params.note_length.max));
        assert!(VELOCITY_LIMITS.contains(params.velocity.max));
    }
    let ramps = rig.filter.ramps();
    assert!(ramps.len() > 100);
    for (hz, over) in ramps {
        assert!(FILTER_RANGE.contains(hz), "filter {hz} out of range");
        assert!(over > 0.0);
    }
    assert!(rig.synth.events().is_empty());
}

#[test]
fn backend_failures_cost_notes_not_voices() {
    let (mut engine, rig) = start(r#"{"density": 100, "seed": 41}"#);
    rig.synth.fail_next(40);
    engine.run_until(60.0);
    assert!(engine.is_playing());
    let ticks = periodic_handles(&rig.transport)
        .into_iter()
        .filter(|(_, job)| matches!(job, Job::Tick(_)))
        .count();
    assert_eq!(ticks, 4);
    assert!(rig.synth.count(Part::Melody) > 0);

    rig.synth.dispose();
    rig.filter.dispose();
    engine.run_until(120.0);
    assert!(engine.is_playing());
    assert!(engine.stop().is_some());
}

#[test]
fn voice_toggles_are_idempotent() {
    let (mut engine, rig) = start(r#"{"seed": 51}"#);
    let full = periodic_handles(&rig.transport).len();

    engine.set_voice_enabled(Part::Rhythm, false).unwrap();
    engine.set_voice_enabled(Part::Rhythm, false).unwrap();
    assert_eq!(periodic_handles(&rig.transport).len(), full - 2);
    assert!(!engine.voice(Part::Rhythm).is_running());

    engine.set_voice_enabled(Part::Rhythm, true).unwrap();
    engine.set_voice_enabled(Part::Rhythm, true).unwrap();
    assert_eq!(periodic_handles(&rig.transport).len(), full);
    assert!(engine.voice(Part::Rhythm).is_running());
}

#[test]
fn disabled_voice_stays_silent() {
    let (mut engine, rig) = start(r#"{"seed": 52, "drone_enabled": false}"#);
    engine.run_until(120.0);
    assert_eq!(rig.synth.count(Part::Drone), 0);
    assert!(rig.synth.count(Part::Melody) > 0);
    assert!(rig.synth.count(Part::Rhythm) > 0);
}

#[test]
fn melody_stays_in_key_and_ahead_of_the_clock() {
    let (mut engine, rig) = start(r#"{"root": "D", "scale": "dorian", "variation": 0, "seed": 61}"#);
    engine.run_until(120.0);
    let scale = engine.scale().clone();
    let melody: Vec<_> = rig
        .synth
        .events()
        .into_iter()
        .filter(|e| e.part == Part::Melody)
        .collect();
    assert!(melody.len() > 20);
    for event in &melody {
        assert!(matches!(event.kind, NoteKind::OnOff { .. }));
        assert!(event.time >= 0.03);
        assert!((0.0..=1.0).contains(&event.velocity));
        for pitch in &event.pitches {
            assert!(scale.pitches().contains(pitch), "{pitch} not in D dorian");
        }
    }
    let names: Vec<String> = scale.pitches().iter().map(|p| p.name()).collect();
    let highlights = rig.highlighter.highlights();
    assert!(!highlights.is_empty());
    for (name, approx) in highlights {
        assert!(names.contains(&name), "highlighted {name} outside D dorian");
        assert!(approx > 0.0);
    }
}

#[test]
fn same_seed_same_performance() {
    let json = r#"{"mood": "mysterious", "density": 70, "variation": 60, "seed": 71}"#;
    let (mut a, rig_a) = start(json);
    let (mut b, rig_b) = start(json);
    a.run_until(180.0);
    b.run_until(180.0);
    assert_eq!(rig_a.synth.events(), rig_b.synth.events());
    assert_eq!(rig_a.filter.ramps(), rig_b.filter.ramps());
}

#[test]
fn transposition_reverts_after_hold() {
    let (mut engine, rig) = start(
        r#"{"root": "A", "scale": "minor", "variation": 0, "seed": 81}"#,
    );
    engine.run_until(1.0);
    engine.apply_variation(Variation::Transpose);
    assert_ne!(engine.scale().root, 9);
    assert_eq!(engine.status().pending_reverts, 1);

    let now = rig.transport.now();
    engine.run_until(now + 9.0);
    assert_eq!(engine.scale().root, 9);
    assert_eq!(engine.status().pending_reverts, 0);
}

#[test]
fn stop_restores_varied_state() {
    let (mut engine, rig) = start(r#"{"root": "E", "variation": 0, "seed": 91}"#);
    engine.apply_variation(Variation::Transpose);
    engine.apply_variation(Variation::DissonanceBump);
    engine.apply_variation(Variation::DensityJitter);
    assert_eq!(engine.status().pending_reverts, 3);

    engine.stop();
    assert_eq!(engine.scale().root, 4);
    assert_eq!(engine.status().pending_reverts, 0);
    assert_eq!(engine.status().note_probability, engine.derived().note_probability);
    assert_eq!(rig.transport.active_count(), 0);
}

#[test]
fn reapplied_variation_replaces_its_revert() {
    let (mut engine, rig) = start(r#"{"variation": 0, "seed": 92}"#);
    engine.apply_variation(Variation::DissonanceBump);
    engine.apply_variation(Variation::DissonanceBump);
    assert_eq!(engine.status().pending_reverts, 1);
    let reverts = rig
        .transport
        .scheduled_jobs()
        .into_iter()
        .filter(|job| matches!(job, Job::Revert(_)))
        .count();
    assert_eq!(reverts, 1);
}

#[test]
fn status_serializes() {
    let (engine, _rig) = start(r#"{"mood": "dreamy", "seed": 101}"#);
    let status = engine.status();
    assert_eq!(status.running_voices.len(), 4);
    assert_eq!(status.tempo, Some(Mood::Dreamy.profile().tempo.mid()));
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["mood"], "dreamy");
    assert_eq!(json["state"], "Playing");
}
