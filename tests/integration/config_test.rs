//! Configuration persistence tests.

use bikespeed::sensors::SensorIdentity;
use bikespeed::storage::config::{load_config_from, save_config_to, AppConfig};

#[test]
fn test_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let config = load_config_from(&path).unwrap();

    assert_eq!(config.sensor.wheel_circumference_mm, 2170);
    assert!(config.sensor.last_sensor_id.is_none());
    assert_eq!(config.data_dir, dir.path());
    assert!(!path.exists());
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = AppConfig::default();
    config.sensor.set_wheel_circumference(2096).unwrap();
    config
        .sensor
        .remember_sensor(&SensorIdentity::new("C4:7C:8D:6A:1B:2F"));
    config.sensor.scan_timeout_secs = 10;
    save_config_to(&config, &path).unwrap();

    let loaded = load_config_from(&path).unwrap();
    assert_eq!(loaded.sensor, config.sensor);
    assert_eq!(loaded.sensor.session_config().wheel_circumference_mm, 2096);
}

#[test]
fn test_invalid_wheel_in_file_is_reset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "version = \"0.1.0\"\n\n[sensor]\nwheel_circumference_mm = 12\n",
    )
    .unwrap();

    let config = load_config_from(&path).unwrap();

    assert_eq!(config.sensor.wheel_circumference_mm, 2170);
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "version = [").unwrap();

    assert!(load_config_from(&path).is_err());
}
