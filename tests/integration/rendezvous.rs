//! Action rendezvous integration tests
//!
//! Requests issued while the processor runs land at a block boundary, one
//! at a time. The main thread plays the audio callback; requesters run on
//! spawned threads and block until their action has been applied.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;
use hostrack::prelude::*;
use hostrack::{GainPlugin, PeakSnapshot, PostActionKind};

use crate::helpers::tolerances::*;
use crate::helpers::*;

const FRAMES: usize = TEST_BUFFER_SIZE as usize;

fn add_named_gain(engine: &Engine, name: &str, gain: f32) -> PluginId {
    engine
        .add_plugin_named(Box::new(GainPlugin::new(gain)), Some(name.to_string()))
        .unwrap()
}

fn names(engine: &Engine) -> Vec<String> {
    engine
        .snapshot()
        .plugins
        .iter()
        .map(|p| p.name.clone())
        .collect()
}

#[test]
fn test_request_waits_for_block_boundary() {
    let engine = rack_engine();
    add_named_gain(&engine, "A", 1.0);
    add_named_gain(&engine, "B", 1.0);
    let mut processor = engine.activate().unwrap();

    let requester = {
        let engine = engine.clone();
        thread::spawn(move || engine.request_remove_plugin(0))
    };
    assert!(wait_for(|| engine.pending_action() == PostActionKind::RemovePlugin));

    // nothing moves until the audio thread reaches a block boundary
    thread::sleep(Duration::from_millis(20));
    assert!(!requester.is_finished());
    assert_eq!(processor.plugin_count(), 2);

    let mut io = StereoIo::silent(FRAMES);
    assert!(run_until(&mut processor, &mut io, || requester.is_finished()));
    let removed = requester.join().unwrap().unwrap();
    assert_eq!(removed.info().label, "gain");
    assert_eq!(processor.plugin_count(), 1);
    assert_eq!(names(&engine), vec!["B"]);
    assert_eq!(engine.pending_action(), PostActionKind::None);
    engine.deactivate(processor);
}

#[test]
fn test_remove_is_atomic_across_blocks() {
    let engine = rack_engine();
    add_named_gain(&engine, "A", 0.5);
    add_named_gain(&engine, "B", 0.25);
    add_named_gain(&engine, "C", 0.8);
    let mut processor = engine.activate().unwrap();
    let mut io = StereoIo::dc(1.0, FRAMES);

    let requester = {
        let engine = engine.clone();
        thread::spawn(move || engine.remove_plugin(0))
    };

    // every block sees either A*B*C or B*C, never a half-shifted table
    let mut after = 0;
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        io.run(&mut processor, TEST_BUFFER_SIZE);
        let first = io.out_l[0];
        assert!(io.out_l.iter().all(|s| *s == first));
        let full_chain = (first - 0.1).abs() < FLOAT_EPSILON;
        let shifted = (first - 0.2).abs() < FLOAT_EPSILON;
        assert!(full_chain || shifted, "block observed a partial table: {first}");
        if shifted {
            after += 1;
        }
        if requester.is_finished() && after > 0 {
            break;
        }
        thread::sleep(Duration::from_micros(200));
    }
    assert!(requester.is_finished());
    requester.join().unwrap().unwrap();
    assert!(after > 0);
    assert_eq!(names(&engine), vec!["B", "C"]);
    engine.deactivate(processor);
}

#[test]
fn test_second_request_waits_for_first() {
    let engine = rack_engine();
    add_named_gain(&engine, "X0", 1.0);
    add_named_gain(&engine, "X1", 1.0);
    add_named_gain(&engine, "X2", 1.0);
    let mut processor = engine.activate().unwrap();
    let mut io = StereoIo::silent(FRAMES);

    let first = {
        let engine = engine.clone();
        thread::spawn(move || engine.remove_plugin(0))
    };
    assert!(wait_for(|| engine.pending_action() == PostActionKind::RemovePlugin));

    let second = {
        let engine = engine.clone();
        thread::spawn(move || engine.request_switch_plugins(0, 1))
    };

    // the second requester is held at the gate and cannot replace the first
    thread::sleep(Duration::from_millis(30));
    assert!(!first.is_finished());
    assert!(!second.is_finished());
    assert_eq!(engine.pending_action(), PostActionKind::RemovePlugin);

    assert!(run_until(&mut processor, &mut io, || first.is_finished()));
    first.join().unwrap().unwrap();

    assert!(run_until(&mut processor, &mut io, || second.is_finished()));
    second.join().unwrap().unwrap();

    // remove(0) then switch(0, 1): [X0, X1, X2] -> [X1, X2] -> [X2, X1]
    assert_eq!(names(&engine), vec!["X2", "X1"]);
    assert_eq!(processor.plugin_count(), 2);
    engine.deactivate(processor);
}

#[test]
fn test_switch_exchanges_identities_and_resets_meters() {
    let engine = rack_engine();
    add_named_gain(&engine, "X", 1.0);
    add_named_gain(&engine, "Y", 0.25);
    let mut processor = engine.activate().unwrap();
    let mut io = StereoIo::dc(1.0, FRAMES);
    io.run(&mut processor, TEST_BUFFER_SIZE);
    assert_abs_diff_eq!(engine.peaks(0).unwrap().outs[0], 1.0, epsilon = FLOAT_EPSILON);

    let requester = {
        let engine = engine.clone();
        thread::spawn(move || engine.request_switch_plugins(0, 1))
    };
    assert!(run_until(&mut processor, &mut io, || requester.is_finished()));
    requester.join().unwrap().unwrap();

    assert_eq!(engine.slot_info(0).unwrap().name, "Y");
    assert_eq!(engine.slot_info(1).unwrap().name, "X");
    // meters belong to positions: slot 0 now reports Y's output
    assert_abs_diff_eq!(engine.peaks(0).unwrap().outs[0], 0.25, epsilon = FLOAT_EPSILON);
    engine.deactivate(processor);

    // applied while parked, the reset is visible before any block runs
    engine.request_switch_plugins(0, 1).unwrap();
    assert_eq!(engine.slot_info(0).unwrap().name, "X");
    assert_eq!(engine.peaks(0).unwrap(), PeakSnapshot::default());
    assert_eq!(engine.peaks(1).unwrap(), PeakSnapshot::default());
}

#[test]
fn test_zero_count_stops_visiting_stale_slots() {
    let engine = rack_engine();
    let (a, a_calls) = CountingPlugin::new();
    let (b, b_calls) = CountingPlugin::new();
    engine.add_plugin_instance(Box::new(a)).unwrap();
    engine.add_plugin_instance(Box::new(b)).unwrap();

    let mut processor = engine.activate().unwrap();
    let mut io = StereoIo::dc(0.5, FRAMES);
    io.run(&mut processor, TEST_BUFFER_SIZE);
    assert_eq!(a_calls.load(Ordering::Relaxed), 1);

    let requester = {
        let engine = engine.clone();
        thread::spawn(move || engine.request_zero_plugin_count())
    };
    assert!(run_until(&mut processor, &mut io, || requester.is_finished()));
    requester.join().unwrap().unwrap();
    assert_eq!(engine.plugin_count(), 0);
    assert_eq!(processor.plugin_count(), 0);

    let a_before = a_calls.load(Ordering::Relaxed);
    let b_before = b_calls.load(Ordering::Relaxed);
    for _ in 0..4 {
        io.run(&mut processor, TEST_BUFFER_SIZE);
    }
    assert_eq!(a_calls.load(Ordering::Relaxed), a_before);
    assert_eq!(b_calls.load(Ordering::Relaxed), b_before);
    // empty rack: straight through
    assert!(io.out_l.iter().all(|s| *s == 0.5));

    // the stale handles are still owned by the table until reclaimed
    let requester = {
        let engine = engine.clone();
        thread::spawn(move || engine.remove_all_plugins())
    };
    assert!(run_until(&mut processor, &mut io, || requester.is_finished()));
    let reclaimed = requester.join().unwrap().unwrap();
    assert_eq!(reclaimed.len(), 2);
    engine.deactivate(processor);
}

#[test]
fn test_add_after_zero_displaces_stale_handle() {
    let engine = rack_engine();
    let (stale, calls) = CountingPlugin::new();
    engine.add_plugin_instance(Box::new(stale)).unwrap();
    engine.request_zero_plugin_count().unwrap();

    let id = engine.add_plugin_instance(Box::new(GainPlugin::new(0.5))).unwrap();
    assert_eq!(id, 0);

    let mut processor = engine.activate().unwrap();
    let mut io = StereoIo::dc(1.0, FRAMES);
    io.run(&mut processor, TEST_BUFFER_SIZE);
    assert_eq!(calls.load(Ordering::Relaxed), 0);
    assert!(signals_approx_equal(&io.out_l, &[0.5; FRAMES], FLOAT_EPSILON));
    engine.deactivate(processor);
}

#[test]
fn test_deactivate_finishes_in_flight_request() {
    let engine = rack_engine();
    add_named_gain(&engine, "A", 1.0);
    let processor = engine.activate().unwrap();

    let requester = {
        let engine = engine.clone();
        thread::spawn(move || engine.remove_plugin(0))
    };
    assert!(wait_for(|| engine.pending_action() == PostActionKind::RemovePlugin));

    // the audio callback stops without running another block
    engine.deactivate(processor);
    requester.join().unwrap().unwrap();
    assert_eq!(engine.plugin_count(), 0);
    assert_eq!(engine.pending_action(), PostActionKind::None);
}

#[test]
fn test_add_while_running() {
    let engine = rack_engine();
    let mut processor = engine.activate().unwrap();
    let mut io = StereoIo::dc(1.0, FRAMES);

    let requester = {
        let engine = engine.clone();
        thread::spawn(move || engine.add_plugin(&PluginDescriptor::internal("gain")))
    };
    assert!(run_until(&mut processor, &mut io, || requester.is_finished()));
    assert_eq!(requester.join().unwrap().unwrap(), 0);
    assert_eq!(processor.plugin_count(), 1);
    assert_eq!(engine.plugin_count(), 1);
    engine.deactivate(processor);
}
