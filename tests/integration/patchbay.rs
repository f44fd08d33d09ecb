//! Patchbay mode integration tests
//!
//! Graph routing between host channels and plugin ports, ascending slot
//! order with one-block feedback delay, and edge maintenance when slots
//! move.

use hostrack::core::{Error as CoreError, PluginFaultKind};
use hostrack::prelude::*;
use hostrack::{EngineNotification, GainPlugin, SinePlugin};

use crate::helpers::tolerances::*;
use crate::helpers::*;

const FRAMES: usize = TEST_BUFFER_SIZE as usize;

#[test]
fn test_unrouted_graph_is_silent() {
    let engine = patchbay_engine();
    assert!(engine.connections().is_empty());
    engine.add_plugin_instance(Box::new(GainPlugin::default())).unwrap();

    let mut processor = engine.activate().unwrap();
    assert!(processor.is_patchbay());
    let mut io = StereoIo::dc(1.0, FRAMES);
    io.run_full(&mut processor, TEST_BUFFER_SIZE);
    assert_silence(&io.out_l, SILENCE_THRESHOLD);
    assert_silence(&io.out_r, SILENCE_THRESHOLD);
    engine.deactivate(processor);
}

#[test]
fn test_host_through_plugin_to_host() {
    let engine = patchbay_engine();
    let gain = engine.add_plugin_instance(Box::new(GainPlugin::new(0.5))).unwrap();
    engine
        .connect(Endpoint::audio_in(0), Endpoint::plugin(gain, 0))
        .unwrap();
    engine
        .connect(Endpoint::plugin(gain, 0), Endpoint::audio_out(1))
        .unwrap();

    let mut processor = engine.activate().unwrap();
    let mut io = StereoIo::dc(0.8, FRAMES);
    io.run_full(&mut processor, TEST_BUFFER_SIZE);
    assert_silence(&io.out_l, SILENCE_THRESHOLD);
    assert!(signals_approx_equal(&io.out_r, &[0.4; FRAMES], FLOAT_EPSILON));
    engine.deactivate(processor);
}

#[test]
fn test_fan_in_sums() {
    let engine = patchbay_engine();
    let a = engine
        .add_plugin_instance(Box::new(SinePlugin::new(500.0, 0.25)))
        .unwrap();
    let b = engine
        .add_plugin_instance(Box::new(SinePlugin::new(500.0, 0.25)))
        .unwrap();
    engine
        .connect(Endpoint::plugin(a, 0), Endpoint::audio_out(0))
        .unwrap();
    engine
        .connect(Endpoint::plugin(b, 0), Endpoint::audio_out(0))
        .unwrap();

    let mut processor = engine.activate().unwrap();
    let mut io = StereoIo::silent(FRAMES);
    io.run_full(&mut processor, TEST_BUFFER_SIZE);
    let expected: Vec<f32> = generate_sine(500.0, TEST_SAMPLE_RATE, FRAMES)
        .into_iter()
        .map(|s| s * 0.5)
        .collect();
    assert!(signals_approx_equal(&io.out_l, &expected, DSP_EPSILON));
    engine.deactivate(processor);
}

#[test]
fn test_edge_from_higher_slot_is_one_block_late() {
    let engine = patchbay_engine();
    let late = engine.add_plugin_instance(Box::new(GainPlugin::new(1.0))).unwrap();
    let early = engine.add_plugin_instance(Box::new(GainPlugin::new(1.0))).unwrap();
    engine
        .connect(Endpoint::audio_in(0), Endpoint::plugin(early, 0))
        .unwrap();
    // slot 1 feeds slot 0, which already ran this block
    engine
        .connect(Endpoint::plugin(early, 0), Endpoint::plugin(late, 0))
        .unwrap();
    engine
        .connect(Endpoint::plugin(late, 0), Endpoint::audio_out(0))
        .unwrap();

    let mut processor = engine.activate().unwrap();
    let mut io = StereoIo::dc(0.5, FRAMES);
    io.run_full(&mut processor, TEST_BUFFER_SIZE);
    assert_silence(&io.out_l, SILENCE_THRESHOLD);

    io.in_l.fill(0.25);
    io.run_full(&mut processor, TEST_BUFFER_SIZE);
    assert!(signals_approx_equal(&io.out_l, &[0.5; FRAMES], FLOAT_EPSILON));

    io.run_full(&mut processor, TEST_BUFFER_SIZE);
    assert!(signals_approx_equal(&io.out_l, &[0.25; FRAMES], FLOAT_EPSILON));
    engine.deactivate(processor);
}

#[test]
fn test_rack_pseudo_group_rejected() {
    let engine = patchbay_engine();
    let result = engine.connect(Endpoint::audio_in(0), Endpoint::rack(0));
    assert!(matches!(result, Err(CoreError::InvalidGroup(_))));
    let result = engine.connect(Endpoint::audio_in(0), Endpoint::plugin(0, 0));
    assert!(matches!(result, Err(CoreError::InvalidPluginId { id: 0, .. })));

    let sine = engine
        .add_plugin(&PluginDescriptor::internal("sine"))
        .unwrap();
    // a generator has no inputs
    let result = engine.connect(Endpoint::audio_in(0), Endpoint::plugin(sine, 0));
    assert!(matches!(result, Err(CoreError::InvalidPort { .. })));
}

#[test]
fn test_remove_drops_edges_and_shifts_ids() {
    let engine = patchbay_engine();
    let first = engine.add_plugin_instance(Box::new(GainPlugin::default())).unwrap();
    let second = engine
        .add_plugin(&PluginDescriptor::internal("gain").with_name("Second"))
        .unwrap();
    engine
        .connect(Endpoint::audio_in(0), Endpoint::plugin(first, 0))
        .unwrap();
    engine
        .connect(Endpoint::plugin(first, 0), Endpoint::plugin(second, 0))
        .unwrap();
    let kept = engine
        .connect(Endpoint::plugin(second, 1), Endpoint::audio_out(1))
        .unwrap();

    engine.remove_plugin(first).unwrap();

    let connections = engine.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].id, kept);
    assert_eq!(connections[0].source, Endpoint::plugin(0, 1));
    assert_eq!(
        engine.connection_names(),
        vec!["Second:out_2".to_string(), "AudioOut:playback_2".to_string()]
    );
}

#[test]
fn test_switch_moves_edges_with_plugins() {
    let engine = patchbay_engine();
    let half = engine.add_plugin_instance(Box::new(GainPlugin::new(0.5))).unwrap();
    let quarter = engine
        .add_plugin_instance(Box::new(GainPlugin::new(0.25)))
        .unwrap();
    engine
        .connect(Endpoint::audio_in(0), Endpoint::plugin(half, 0))
        .unwrap();
    engine
        .connect(Endpoint::plugin(half, 0), Endpoint::audio_out(0))
        .unwrap();

    engine.request_switch_plugins(half, quarter).unwrap();
    assert_eq!(
        engine.connections()[0].dest,
        Endpoint::plugin(quarter, 0),
        "edges follow the plugin to its new slot"
    );

    let mut processor = engine.activate().unwrap();
    let mut io = StereoIo::dc(1.0, FRAMES);
    io.run_full(&mut processor, TEST_BUFFER_SIZE);
    assert!(signals_approx_equal(&io.out_l, &[0.5; FRAMES], FLOAT_EPSILON));
    engine.deactivate(processor);
}

#[test]
fn test_zero_drops_plugin_edges_only() {
    let engine = patchbay_engine();
    let gain = engine.add_plugin_instance(Box::new(GainPlugin::default())).unwrap();
    engine
        .connect(Endpoint::audio_in(0), Endpoint::plugin(gain, 0))
        .unwrap();
    let direct = engine
        .connect(Endpoint::audio_in(1), Endpoint::audio_out(1))
        .unwrap();

    let removed = engine.remove_all_plugins().unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(engine.plugin_count(), 0);
    let connections = engine.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].id, direct);
}

#[test]
fn test_non_finite_plugin_is_muted() {
    let engine = patchbay_engine();
    let notifications = engine.notifications();
    let bad = engine.add_plugin_instance(Box::new(NonFinitePlugin)).unwrap();
    engine
        .connect(Endpoint::audio_in(0), Endpoint::plugin(bad, 0))
        .unwrap();
    engine
        .connect(Endpoint::plugin(bad, 0), Endpoint::audio_out(0))
        .unwrap();

    let mut processor = engine.activate().unwrap();
    let mut io = StereoIo::dc(0.5, FRAMES);
    io.run_full(&mut processor, TEST_BUFFER_SIZE);
    io.run_full(&mut processor, TEST_BUFFER_SIZE);

    assert!(io.out_l.iter().all(|s| *s == 0.0));
    assert!(engine.peaks(bad).unwrap().faulted);
    let faults: Vec<_> = notifications
        .try_iter()
        .filter(|n| matches!(n, EngineNotification::PluginFault { .. }))
        .collect();
    assert_eq!(
        faults,
        vec![EngineNotification::PluginFault {
            id: bad,
            kind: PluginFaultKind::NonFinite,
        }]
    );
    engine.deactivate(processor);
}
