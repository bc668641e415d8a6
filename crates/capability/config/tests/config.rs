use std::collections::HashMap;
use std::time::Duration;

use magbus_config::{AcquisitionConfig, CollectorConfig, ConfigError, SinkKind, load_sensors};

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let table: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key| table.get(key).cloned()
}

#[test]
fn load_acquisition_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("MAGBUS_STATION", "wic");
        std::env::set_var("MAGBUS_MQTT_PORT", "1884");
        std::env::set_var("MAGBUS_POLL_TIMEOUT_MS", "2500");
    }

    let config = AcquisitionConfig::from_env().expect("config");
    assert_eq!(config.station, "wic");
    assert_eq!(config.mqtt.port, 1884);
    assert_eq!(config.poll_timeout, Duration::from_millis(2500));
}

#[test]
fn acquisition_defaults() {
    let config =
        AcquisitionConfig::from_lookup(lookup(&[("MAGBUS_STATION", "wic")])).expect("config");
    assert_eq!(config.mqtt.host, "localhost");
    assert_eq!(config.mqtt.port, 1883);
    assert_eq!(config.mqtt.qos, 0);
    assert!(config.mqtt.client_id.starts_with("magbus-"));
    assert_eq!(config.serial_prefix, "/dev/tty");
    assert_eq!(config.restart_backoff, Duration::from_secs(5));
    assert_eq!(config.sensors_file.to_str(), Some("sensors.json"));
    assert!(config.buffer_dir.is_none());
    assert!(config.mysql_url.is_none());
}

#[test]
fn missing_station_is_reported() {
    let err = AcquisitionConfig::from_lookup(lookup(&[])).expect_err("station required");
    assert!(matches!(err, ConfigError::Missing(key) if key == "MAGBUS_STATION"));
}

#[test]
fn invalid_numbers_are_reported() {
    let err = AcquisitionConfig::from_lookup(lookup(&[
        ("MAGBUS_STATION", "wic"),
        ("MAGBUS_MQTT_PORT", "mqtt"),
    ]))
    .expect_err("bad port");
    assert!(matches!(
        err,
        ConfigError::Invalid(key, value) if key == "MAGBUS_MQTT_PORT" && value == "mqtt"
    ));

    let err = AcquisitionConfig::from_lookup(lookup(&[
        ("MAGBUS_STATION", "wic"),
        ("MAGBUS_MQTT_QOS", "3"),
    ]))
    .expect_err("bad qos");
    assert!(matches!(err, ConfigError::Invalid(key, _) if key == "MAGBUS_MQTT_QOS"));
}

#[test]
fn file_sink_requires_archive_dir() {
    let err = CollectorConfig::from_lookup(lookup(&[("MAGBUS_SINKS", "log,file")]))
        .expect_err("archive dir");
    assert!(matches!(err, ConfigError::Missing(key) if key == "MAGBUS_ARCHIVE_DIR"));

    let config = CollectorConfig::from_lookup(lookup(&[
        ("MAGBUS_SINKS", "log, file"),
        ("MAGBUS_ARCHIVE_DIR", "/srv/archive"),
        ("MAGBUS_MISMATCH_POLICY", "fail-fast"),
    ]))
    .expect("config");
    assert_eq!(config.sinks, vec![SinkKind::Log, SinkKind::File]);
    assert_eq!(config.collect_station, "all");
    assert_eq!(config.mismatch_policy, "fail-fast");
    assert_eq!(config.sink_queue, 1024);
}

#[test]
fn unknown_sink_is_invalid() {
    let err = CollectorConfig::from_lookup(lookup(&[("MAGBUS_SINKS", "mysql")])).expect_err("sink");
    assert!(matches!(err, ConfigError::Invalid(key, _) if key == "MAGBUS_SINKS"));
}

#[test]
fn sensor_list_loads_with_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sensors.json");
    std::fs::write(
        &path,
        r#"[
            {"sensorid": "LEMI036_1_0002", "port": "USB0", "baudrate": 57600, "protocol": "Lemi"},
            {"sensorid": "ENV05_2_0001", "port": "USB1", "protocol": "Env", "stack": 3}
        ]"#,
    )
    .expect("write");

    let sensors = load_sensors(&path).expect("sensors");
    assert_eq!(sensors.len(), 2);
    assert_eq!(sensors[0].baudrate, 57600);
    assert_eq!(sensors[1].baudrate, 9600);
    assert_eq!(sensors[1].stack, 3);
}

#[test]
fn duplicate_sensor_ids_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sensors.json");
    std::fs::write(
        &path,
        r#"[{"sensorid": "CS_1_0001", "port": "S0", "protocol": "CS"},
            {"sensorid": "CS_1_0001", "port": "S1", "protocol": "CS"}]"#,
    )
    .expect("write");
    let err = load_sensors(&path).expect_err("duplicate");
    assert!(matches!(err, ConfigError::Sensors { reason, .. } if reason.contains("duplicate")));
}
