use sensorsim_devkit::record_helpers::write_records;
use sensorsim_devkit::{RecordBuilder, TestHarness};
use sensorsim_kernel::{ChannelDescriptor, ChannelKind, MachineModel, Mode, SimError, State};
use serde_json::json;

#[test]
fn test_saved_configuration_is_stable() {
    let harness = TestHarness::new().unwrap();
    harness.add_channel(ChannelDescriptor::temperature(1)).unwrap();
    harness.add_channel(ChannelDescriptor::temperature(2)).unwrap();
    let path = harness.path("test_machine_model_configuration.json");
    harness.machine.lock().save(&path).unwrap();

    let mut restored = MachineModel::new();
    restored.restore(&path).unwrap();
    let names: Vec<String> = restored.list_channels().iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["Temperature_sensor_001", "Temperature_sensor_002"]);

    // save -> restore -> save donne le même document
    let second = harness.path("second.json");
    restored.save(&second).unwrap();
    let a: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let b: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&second).unwrap()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_restore_skips_invalid_records() {
    let harness = TestHarness::new().unwrap();
    let path = harness.path("mixed.json");
    write_records(
        &path,
        &[
            RecordBuilder::temperature(1).unwrap().set("current_value", json!(42.0)).build(),
            RecordBuilder::pressure(1).unwrap().without("channel").build(),
            RecordBuilder::pressure(2).unwrap().set_channel("kind", json!("humidity")).build(),
            RecordBuilder::pressure(3).unwrap().without("st_dev_broken").build(),
            RecordBuilder::pressure(4).unwrap().set_channel("namespace", json!("Line2")).build(),
        ],
    )
    .unwrap();

    let mut machine = harness.machine.lock();
    machine.set_mode(Mode::Idle);
    let report = machine.restore(&path).unwrap();

    let skipped: Vec<usize> = report.skipped.iter().map(|s| s.index).collect();
    assert_eq!(skipped, vec![1, 2, 3]);
    assert_eq!(report.restored.len(), 2);

    let temperature = machine.channel(ChannelDescriptor::temperature(1).id()).unwrap();
    assert_eq!(temperature.last().value, 42.0);
    let pressure = machine.channel(ChannelDescriptor::pressure(4).id()).unwrap();
    assert_eq!(pressure.descriptor().namespace, "Line2");
    pressure.with_driver(|d| {
        assert_eq!(d.mode(), Mode::Idle);
        assert_eq!(d.state(), State::Normal);
    });
}

#[test]
fn test_restore_rejects_non_array() {
    let harness = TestHarness::new().unwrap();
    let path = harness.path("object.json");
    std::fs::write(&path, r#"{"channel": {"kind": "temperature"}}"#).unwrap();
    let result = harness.machine.lock().restore(&path);
    assert!(matches!(result, Err(SimError::MalformedRecord(_))));
    assert!(harness.machine.lock().is_empty());
}

#[test]
fn test_restored_driver_starts_from_saved_value() {
    let harness = TestHarness::new().unwrap();
    harness.add_channel(ChannelDescriptor::pressure(9)).unwrap();
    let at_save = harness.measure_all()[0].value;
    let path = harness.path("pressure.json");
    harness.machine.lock().save(&path).unwrap();
    harness.measure_all();

    let mut restored = MachineModel::new();
    restored.restore(&path).unwrap();
    let handle = restored.channel(ChannelDescriptor::pressure(9).id()).unwrap();
    assert_eq!(handle.descriptor().kind, ChannelKind::Pressure);
    assert_eq!(handle.last().value, at_save);
}
