//! Engine lifecycle integration tests
//!
//! Creation, activation, configuration changes, slot table bounds and
//! teardown.

use std::collections::HashSet;

use hostrack::core::Error as CoreError;
use hostrack::prelude::*;
use hostrack::{EngineNotification, GainPlugin, PostActionKind};
use proptest::prelude::*;

use crate::helpers::*;

#[test]
fn test_engine_defaults() {
    let engine = rack_engine();
    assert_eq!(engine.process_mode(), ProcessMode::Rack);
    assert_eq!(engine.max_plugins(), 16);
    assert_eq!(engine.plugin_count(), 0);
    assert_eq!(engine.next_plugin_id(), 0);
    assert_eq!(engine.buffer_size(), TEST_BUFFER_SIZE);
    assert_eq!(engine.sample_rate(), TEST_SAMPLE_RATE);
    assert_eq!(engine.pending_action(), PostActionKind::None);
    assert!(!engine.is_running());
}

#[test]
fn test_invalid_config_rejected() {
    let result = Engine::new(EngineConfig {
        buffer_size: 0,
        ..Default::default()
    });
    assert!(matches!(result, Err(CoreError::InvalidConfig(_))));

    let result = Engine::new(EngineConfig {
        plugin_limit: PluginLimit::Patchbay255,
        ..Default::default()
    });
    assert!(matches!(result, Err(CoreError::InvalidConfig(_))));
}

#[test]
fn test_config_from_json_fills_defaults() {
    let config = EngineConfig::from_json(r#"{ "name": "live", "buffer_size": 128 }"#).unwrap();
    assert_eq!(config.name, "live");
    assert_eq!(config.buffer_size, 128);
    assert_eq!(config.process_mode, ProcessMode::Rack);
    assert!(config.auto_connect);

    let engine = Engine::new(config).unwrap();
    assert_eq!(engine.name(), "live");
}

#[test]
fn test_activate_twice_fails() {
    let engine = rack_engine();
    let processor = engine.activate().unwrap();
    assert!(engine.is_running());
    assert!(matches!(engine.activate(), Err(CoreError::EngineRunning)));
    engine.deactivate(processor);
    assert!(!engine.is_running());
}

#[test]
fn test_buffer_size_only_while_stopped() {
    let engine = rack_engine();
    engine.add_plugin_instance(Box::new(GainPlugin::new(0.5))).unwrap();

    let processor = engine.activate().unwrap();
    assert!(matches!(
        engine.set_buffer_size(256),
        Err(CoreError::EngineRunning)
    ));
    engine.deactivate(processor);

    engine.set_buffer_size(256).unwrap();
    engine.set_sample_rate(44_100.0).unwrap();
    assert_eq!(engine.buffer_size(), 256);
    assert_eq!(engine.sample_rate(), 44_100.0);

    let mut processor = engine.activate().unwrap();
    assert_eq!(processor.buffer_size(), 256);
    let mut io = StereoIo::dc(1.0, 256);
    io.run(&mut processor, 256);
    assert!(signals_approx_equal(
        &io.out_l,
        &[0.5; 256],
        tolerances::FLOAT_EPSILON
    ));
    engine.deactivate(processor);
}

#[test]
fn test_fractional_sample_rate_is_reported_exactly() {
    let engine = rack_engine();
    let notifications = engine.notifications();
    engine.set_sample_rate(44_099.5).unwrap();
    assert_eq!(engine.sample_rate(), 44_099.5);
    assert!(notifications
        .try_iter()
        .any(|n| n == EngineNotification::SampleRateChanged(44_099.5)));
}

#[test]
fn test_slot_table_full() {
    let engine = rack_engine();
    for _ in 0..engine.max_plugins() {
        engine.add_plugin_instance(Box::new(GainPlugin::default())).unwrap();
    }
    assert_eq!(engine.next_plugin_id(), engine.max_plugins());

    let result = engine.add_plugin_instance(Box::new(GainPlugin::default()));
    assert!(matches!(result, Err(CoreError::SlotTableFull(16))));
    assert!(engine.last_error().contains("Maximum number of plugins"));
    assert_eq!(engine.plugin_count(), 16);
}

#[test]
fn test_remove_out_of_range() {
    let engine = rack_engine();
    engine.add_plugin_instance(Box::new(GainPlugin::default())).unwrap();
    let result = engine.remove_plugin(3);
    assert!(matches!(
        result,
        Err(CoreError::InvalidPluginId { id: 3, count: 1 })
    ));
    let result = engine.request_switch_plugins(0, 1);
    assert!(matches!(
        result,
        Err(CoreError::InvalidPluginId { id: 1, count: 1 })
    ));
}

#[test]
fn test_slot_info_and_names() {
    let engine = rack_engine();
    let id = engine
        .add_plugin(&PluginDescriptor::internal("gain").with_name("Trim"))
        .unwrap();
    let info = engine.slot_info(id).unwrap();
    assert_eq!(info.name, "Trim");
    assert_eq!(info.info.label, "gain");
    assert_eq!(info.port_count(PortKind::AudioIn), 2);
    assert_eq!(info.port_name(PortKind::AudioOut, 1), Some("out_2"));
    assert!(info.has_event_input);
    assert!(engine.slot_info(1).is_none());
}

#[test]
fn test_notifications_follow_mutations() {
    let engine = rack_engine();
    let notifications = engine.notifications();
    engine.add_plugin(&PluginDescriptor::internal("sine")).unwrap();
    engine.remove_plugin(0).unwrap();

    let seen: Vec<EngineNotification> = notifications.try_iter().collect();
    assert!(seen
        .iter()
        .any(|n| matches!(n, EngineNotification::PluginAdded { id: 0, name } if name == "Sine")));
    assert!(seen
        .iter()
        .any(|n| matches!(n, EngineNotification::PluginRemoved { id: 0 })));
}

#[test]
fn test_close_rejects_further_mutations() {
    let engine = rack_engine();
    engine.add_plugin(&PluginDescriptor::internal("gain")).unwrap();
    engine.close().unwrap();
    assert!(engine.is_about_to_close());
    assert_eq!(engine.plugin_count(), 0);
    assert!(matches!(
        engine.add_plugin(&PluginDescriptor::internal("gain")),
        Err(CoreError::AboutToClose)
    ));
    // closing twice is harmless
    engine.close().unwrap();
}

#[test]
fn test_engine_without_factory() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let result = engine.add_plugin(&PluginDescriptor::internal("gain"));
    assert!(matches!(result, Err(CoreError::PluginCreation(_))));
}

#[derive(Debug, Clone)]
enum SlotOp {
    Add,
    Remove(u32),
    Switch(u32, u32),
}

fn slot_op() -> impl Strategy<Value = SlotOp> {
    prop_oneof![
        3 => Just(SlotOp::Add),
        2 => (0u32..20).prop_map(SlotOp::Remove),
        1 => (0u32..20, 0u32..20).prop_map(|(a, b)| SlotOp::Switch(a, b)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The live range never exceeds the table and holds each instance once.
    #[test]
    fn prop_slot_table_stays_contiguous(ops in prop::collection::vec(slot_op(), 1..60)) {
        let engine = rack_engine();
        let max = engine.max_plugins();
        let mut expected: u32 = 0;

        for op in ops {
            match op {
                SlotOp::Add => {
                    let result = engine.add_plugin_instance(Box::new(GainPlugin::default()));
                    if expected < max {
                        prop_assert_eq!(result.unwrap(), expected);
                        expected += 1;
                    } else {
                        prop_assert!(matches!(result, Err(CoreError::SlotTableFull(_))));
                    }
                }
                SlotOp::Remove(id) => {
                    let result = engine.remove_plugin(id);
                    if id < expected {
                        prop_assert!(result.is_ok());
                        expected -= 1;
                    } else {
                        prop_assert!(result.is_err());
                    }
                }
                SlotOp::Switch(a, b) => {
                    let result = engine.request_switch_plugins(a, b);
                    prop_assert_eq!(result.is_ok(), a < expected && b < expected);
                }
            }

            let snapshot = engine.snapshot();
            prop_assert!(engine.plugin_count() <= max);
            prop_assert_eq!(engine.plugin_count(), expected);
            let ids: HashSet<u64> = snapshot.plugins.iter().map(|p| p.instance_id).collect();
            prop_assert_eq!(ids.len(), snapshot.plugins.len());
        }
    }
}
