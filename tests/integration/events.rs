//! Event buffer integration tests
//!
//! Fixed 512-event capacity with drop-on-overflow, rack event chaining and
//! sample-accurate parameter changes.

use hostrack::core::EventOverflow;
use hostrack::prelude::*;
use hostrack::{EngineEventKind, GainPlugin, TransposePlugin, MAX_EVENTS};

use crate::helpers::tolerances::*;
use crate::helpers::*;

const FRAMES: usize = TEST_BUFFER_SIZE as usize;

fn note_numbers(events: &EventBuffer) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e.kind {
            EngineEventKind::Midi(midi) => Some(midi.data[1]),
            _ => None,
        })
        .collect()
}

#[test]
fn test_overflow_drops_without_touching_stored_events() {
    let mut buffer = EventBuffer::new();
    assert_eq!(buffer.capacity(), MAX_EVENTS);
    for i in 0..MAX_EVENTS {
        buffer
            .push(EngineEvent::parameter(i as u32, 0, i as f32))
            .unwrap();
    }
    let stored: Vec<EngineEvent> = buffer.iter().copied().collect();

    let result = buffer.push(EngineEvent::parameter(999, 0, -1.0));
    assert_eq!(result, Err(EventOverflow { capacity: MAX_EVENTS }));
    assert_eq!(buffer.len(), MAX_EVENTS);
    assert_eq!(buffer.as_slice(), stored.as_slice());
    assert_eq!(buffer.dropped(), 1);
}

#[test]
fn test_engine_counts_dropped_input_events() {
    let engine = rack_engine();
    let mut processor = engine.activate().unwrap();
    for i in 0..(MAX_EVENTS + 88) {
        let _ = processor
            .events_in_mut()
            .push(EngineEvent::note_on(0, 0, (i % 128) as u8, 100));
    }
    let mut io = StereoIo::silent(FRAMES);
    io.run(&mut processor, TEST_BUFFER_SIZE);

    // empty rack: inbound events come straight back out
    assert_eq!(processor.events_out().len(), MAX_EVENTS);
    assert_eq!(engine.events_dropped(), 88);
    // the inbound buffer is cleared after every block
    assert!(processor.events_in_mut().is_empty());
    engine.deactivate(processor);
}

#[test]
fn test_events_pass_plugins_without_event_output() {
    let engine = rack_engine();
    engine.add_plugin_instance(Box::new(GainPlugin::default())).unwrap();
    engine
        .add_plugin_instance(Box::new(TransposePlugin::new(12)))
        .unwrap();

    let mut processor = engine.activate().unwrap();
    processor
        .events_in_mut()
        .push(EngineEvent::note_on(3, 0, 60, 100))
        .unwrap();
    processor
        .events_in_mut()
        .push(EngineEvent::note_off(40, 0, 120))
        .unwrap();
    let mut io = StereoIo::silent(FRAMES);
    io.run(&mut processor, TEST_BUFFER_SIZE);

    // gain has no event output so its input reaches transpose; 120+12 is
    // out of range and dropped
    assert_eq!(note_numbers(processor.events_out()), vec![72]);
    assert_eq!(processor.events_out().as_slice()[0].time, 3);

    io.run(&mut processor, TEST_BUFFER_SIZE);
    assert!(processor.events_out().is_empty());
    engine.deactivate(processor);
}

#[test]
fn test_patchbay_plugins_all_receive_inbound_events() {
    let engine = patchbay_engine();
    engine
        .add_plugin_instance(Box::new(TransposePlugin::new(1)))
        .unwrap();
    engine
        .add_plugin_instance(Box::new(TransposePlugin::new(2)))
        .unwrap();

    let mut processor = engine.activate().unwrap();
    processor
        .events_in_mut()
        .push(EngineEvent::note_on(0, 0, 60, 100))
        .unwrap();
    let mut io = StereoIo::silent(FRAMES);
    io.run_full(&mut processor, TEST_BUFFER_SIZE);

    assert_eq!(note_numbers(processor.events_out()), vec![61, 62]);
    engine.deactivate(processor);
}

#[test]
fn test_patchbay_output_events_stay_time_ordered() {
    let engine = patchbay_engine();
    engine
        .add_plugin_instance(Box::new(TransposePlugin::new(1)))
        .unwrap();
    engine
        .add_plugin_instance(Box::new(TransposePlugin::new(2)))
        .unwrap();

    let mut processor = engine.activate().unwrap();
    processor
        .events_in_mut()
        .push(EngineEvent::note_on(0, 0, 60, 100))
        .unwrap();
    processor
        .events_in_mut()
        .push(EngineEvent::note_on(40, 0, 64, 100))
        .unwrap();
    let mut io = StereoIo::silent(FRAMES);
    io.run_full(&mut processor, TEST_BUFFER_SIZE);

    let times: Vec<u32> = processor.events_out().iter().map(|e| e.time).collect();
    assert_eq!(times, vec![0, 0, 40, 40]);
    // ties keep slot order
    assert_eq!(note_numbers(processor.events_out()), vec![61, 62, 65, 66]);
    engine.deactivate(processor);
}

#[test]
fn test_parameter_change_is_sample_accurate() {
    let engine = rack_engine();
    engine.add_plugin_instance(Box::new(GainPlugin::new(1.0))).unwrap();

    let mut processor = engine.activate().unwrap();
    processor
        .events_in_mut()
        .push(EngineEvent::parameter(16, GainPlugin::PARAM_GAIN, 0.5))
        .unwrap();
    let mut io = StereoIo::dc(1.0, FRAMES);
    io.run(&mut processor, TEST_BUFFER_SIZE);

    assert!(signals_approx_equal(&io.out_l[..16], &[1.0; 16], FLOAT_EPSILON));
    assert!(signals_approx_equal(
        &io.out_l[16..],
        &vec![0.5; FRAMES - 16],
        FLOAT_EPSILON
    ));

    // the new gain holds in the next block
    io.run(&mut processor, TEST_BUFFER_SIZE);
    assert!(signals_approx_equal(&io.out_l, &[0.5; FRAMES], FLOAT_EPSILON));
    engine.deactivate(processor);
}
