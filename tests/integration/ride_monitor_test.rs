//! End-to-end tests for the ride monitor: power-on, connection, discovery,
//! notifications and odometer totals, all over the scripted adapter.

use crate::sensor_mock::{
    adapter, discovery_results, notification, peripheral, sensor, Call, CallLog, MockCentral,
};
use bikespeed::sensors::csc::CSC_MEASUREMENT_UUID;
use bikespeed::sensors::{
    AdapterEvent, AdapterState, LinkEvent, PeripheralEvent, SensorEvent, SessionError,
    SessionState,
};
use bikespeed::storage::config::load_config_from;
use bikespeed::{AppConfig, MonitorOptions, RideMonitor};

fn monitor(
    state: AdapterState,
    config: AppConfig,
    options: MonitorOptions,
) -> (RideMonitor<MockCentral>, CallLog) {
    let (central, log) = MockCentral::new(state);
    let central = central.with_known(sensor("AA"));
    (RideMonitor::new(central, config, options), log)
}

fn remembered(device_id: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.sensor.last_sensor_id = Some(device_id.to_string());
    config
}

/// Feed link events in order and collect everything the monitor surfaced.
fn feed(monitor: &mut RideMonitor<MockCentral>, events: Vec<LinkEvent>) -> Vec<SensorEvent> {
    events
        .into_iter()
        .flat_map(|event| monitor.handle_link_event(event))
        .collect()
}

/// Bring a remembered sensor "AA" all the way to an active session.
fn active_ride() -> (RideMonitor<MockCentral>, CallLog) {
    let (mut monitor, log) = monitor(
        AdapterState::PoweredOn,
        remembered("AA"),
        MonitorOptions::default(),
    );
    monitor.begin();
    monitor.handle_link_event(adapter(AdapterEvent::Connected(sensor("AA"))));
    feed(&mut monitor, discovery_results("AA"));
    (monitor, log)
}

#[test]
fn test_waits_for_power_on_before_reconnecting() {
    let (mut monitor, log) = monitor(
        AdapterState::PoweredOff,
        remembered("AA"),
        MonitorOptions::default(),
    );

    assert!(monitor.begin().is_empty());
    assert!(log.calls().is_empty());

    let events =
        monitor.handle_link_event(adapter(AdapterEvent::StateChanged(AdapterState::PoweredOn)));

    assert_eq!(
        events,
        vec![SensorEvent::AdapterStateChanged(AdapterState::PoweredOn)]
    );
    assert_eq!(
        log.calls(),
        vec![Call::Cancel("AA".into()), Call::Connect("AA".into())]
    );
}

#[test]
fn test_reconnect_disabled_in_config() {
    let mut config = remembered("AA");
    config.sensor.reconnect_on_power_on = false;
    let (mut monitor, log) = monitor(AdapterState::PoweredOn, config, MonitorOptions::default());

    monitor.begin();

    assert!(log.calls().is_empty());
}

#[test]
fn test_unknown_remembered_sensor_is_scanned_for() {
    let (mut monitor, log) = monitor(
        AdapterState::PoweredOn,
        remembered("GONE"),
        MonitorOptions::default(),
    );

    assert_eq!(monitor.begin(), vec![SensorEvent::ScanStarted]);
    assert!(!log.contains(&Call::Connect("GONE".into())));
    assert!(monitor.coordinator().is_scanning());

    // Only the remembered sensor is picked up
    monitor.handle_link_event(adapter(AdapterEvent::Discovered(sensor("BB"))));
    assert!(!log.contains(&Call::Connect("BB".into())));

    let events = monitor.handle_link_event(adapter(AdapterEvent::Discovered(sensor("GONE"))));
    assert_eq!(
        events,
        vec![SensorEvent::Discovered(sensor("GONE")), SensorEvent::ScanStopped]
    );
    assert_eq!(log.last(), Some(Call::Connect("GONE".into())));
}

#[test]
fn test_remembered_sensor_preferred_over_first_seen() {
    let options = MonitorOptions {
        auto_connect_first: true,
        ..Default::default()
    };
    let (mut monitor, log) = monitor(AdapterState::PoweredOn, remembered("GONE"), options);
    monitor.begin();

    monitor.handle_link_event(adapter(AdapterEvent::Discovered(sensor("BB"))));
    assert!(!log.contains(&Call::Connect("BB".into())));

    monitor.handle_link_event(adapter(AdapterEvent::Discovered(sensor("GONE"))));
    assert_eq!(log.last(), Some(Call::Connect("GONE".into())));
}

#[test]
fn test_nothing_selected_does_not_scan() {
    let (mut monitor, log) = monitor(
        AdapterState::PoweredOn,
        AppConfig::default(),
        MonitorOptions::default(),
    );

    assert!(monitor.begin().is_empty());
    assert!(!monitor.coordinator().is_scanning());
    assert!(log.calls().is_empty());
}

#[test]
fn test_full_ride() {
    let (mut monitor, log) = active_ride();

    assert_eq!(monitor.session_state(), Some(&SessionState::Active));
    assert!(log.contains(&Call::DiscoverServices("AA".into())));
    assert!(log.contains(&Call::SetNotify("AA".into(), CSC_MEASUREMENT_UUID, true)));
    assert!(monitor.odometer().is_running());
    assert_eq!(monitor.odometer().distance_m(), Some(0.0));

    let first = monitor.handle_link_event(notification("AA", Some((100, 1024)), Some((10, 1024))));
    assert!(first.is_empty());

    let second =
        monitor.handle_link_event(notification("AA", Some((110, 2048)), Some((11, 2048))));
    assert_eq!(second.len(), 1);

    let snapshot = monitor.odometer().snapshot();
    let distance = 10.0 * 2170.0 / 1000.0;
    assert_eq!(monitor.odometer().distance_m(), Some(distance));
    assert_eq!(snapshot.distance_m, Some(distance));
    assert_eq!(snapshot.cadence_rpm, Some(60.0));
    assert!((snapshot.speed_kmh.unwrap() - distance * 3.6).abs() < 1e-9);

    monitor.handle_link_event(notification("AA", Some((115, 3072)), Some((12, 3072))));
    let total = monitor.odometer().distance_m().unwrap();
    assert!((total - 15.0 * 2170.0 / 1000.0).abs() < 1e-9);
    assert!((monitor.odometer().snapshot().max_speed_kmh.unwrap() - distance * 3.6).abs() < 1e-9);
}

#[test]
fn test_ride_with_configured_wheel() {
    let mut config = remembered("AA");
    config.sensor.set_wheel_circumference(2000).unwrap();
    let (mut monitor, _log) = monitor(AdapterState::PoweredOn, config, MonitorOptions::default());
    monitor.begin();
    monitor.handle_link_event(adapter(AdapterEvent::Connected(sensor("AA"))));
    feed(&mut monitor, discovery_results("AA"));

    monitor.handle_link_event(notification("AA", Some((1, 1024)), None));
    monitor.handle_link_event(notification("AA", Some((2, 2048)), None));

    assert_eq!(monitor.odometer().distance_m(), Some(2.0));
}

#[test]
fn test_counter_wrap_during_ride() {
    let (mut monitor, _log) = active_ride();

    monitor.handle_link_event(notification("AA", Some((u32::MAX - 2, 65_000)), None));
    monitor.handle_link_event(notification("AA", Some((3, 500)), None));

    let distance = monitor.odometer().distance_m().unwrap();
    assert_eq!(distance, 5.0 * 2170.0 / 1000.0);
    assert!(monitor.odometer().snapshot().speed_kmh.unwrap() > 0.0);
}

#[test]
fn test_auto_connect_first_sensor() {
    let options = MonitorOptions {
        auto_connect_first: true,
        ..Default::default()
    };
    let (mut monitor, log) = monitor(AdapterState::PoweredOn, AppConfig::default(), options);

    assert_eq!(monitor.begin(), vec![SensorEvent::ScanStarted]);
    assert!(monitor.coordinator().is_scanning());

    let events = monitor.handle_link_event(adapter(AdapterEvent::Discovered(sensor("BB"))));
    assert_eq!(
        events,
        vec![SensorEvent::Discovered(sensor("BB")), SensorEvent::ScanStopped]
    );
    assert!(log.contains(&Call::StopScan));
    assert_eq!(log.last(), Some(Call::Connect("BB".into())));
    assert_eq!(
        monitor.config().sensor.last_sensor_id.as_deref(),
        Some("BB")
    );

    // Scan is over; later advertisements are ignored
    let events = monitor.handle_link_event(adapter(AdapterEvent::Discovered(sensor("CC"))));
    assert!(events.is_empty());
}

#[test]
fn test_explicit_sensor_waits_for_match() {
    let options = MonitorOptions {
        sensor_id: Some("DD".into()),
        ..Default::default()
    };
    let (mut monitor, log) = monitor(AdapterState::PoweredOn, AppConfig::default(), options);
    monitor.begin();

    monitor.handle_link_event(adapter(AdapterEvent::Discovered(sensor("BB"))));
    assert!(!log.contains(&Call::Connect("BB".into())));

    monitor.handle_link_event(adapter(AdapterEvent::Discovered(sensor("DD"))));
    assert_eq!(log.last(), Some(Call::Connect("DD".into())));
}

#[test]
fn test_link_loss_clears_session_and_totals() {
    let (mut monitor, _log) = active_ride();
    monitor.handle_link_event(notification("AA", Some((100, 1024)), None));
    monitor.handle_link_event(notification("AA", Some((110, 2048)), None));
    assert!(monitor.odometer().distance_m().unwrap() > 0.0);

    let events = monitor.handle_link_event(peripheral(
        "AA",
        PeripheralEvent::Disconnected {
            error: Some("connection timeout".into()),
        },
    ));
    assert!(matches!(
        events.as_slice(),
        [SensorEvent::Error { error: SessionError::Transport(_), .. }]
    ));
    assert!(matches!(
        monitor.session_state(),
        Some(SessionState::Failed(_))
    ));

    let events = monitor.handle_link_event(adapter(AdapterEvent::Disconnected {
        identity: sensor("AA"),
        error: Some("connection timeout".into()),
    }));
    assert_eq!(
        events,
        vec![SensorEvent::Disconnected {
            identity: sensor("AA"),
            error: Some("connection timeout".into()),
        }]
    );
    assert!(monitor.session().is_none());
    assert!(!monitor.odometer().is_running());
    assert_eq!(monitor.odometer().distance_m(), None);
}

#[test]
fn test_connection_failure_leaves_no_session() {
    let (mut monitor, _log) = monitor(
        AdapterState::PoweredOn,
        remembered("AA"),
        MonitorOptions::default(),
    );
    monitor.begin();

    let events = monitor.handle_link_event(adapter(AdapterEvent::ConnectFailed {
        identity: sensor("AA"),
        error: "Peer removed pairing information".into(),
    }));

    assert!(matches!(
        events.as_slice(),
        [SensorEvent::ConnectionFailed { .. }]
    ));
    assert!(monitor.session().is_none());
}

#[test]
fn test_disconnect_stops_session() {
    let (mut monitor, log) = active_ride();
    log.clear();

    monitor.disconnect().unwrap();

    assert_eq!(
        log.calls(),
        vec![
            Call::SetNotify("AA".into(), CSC_MEASUREMENT_UUID, false),
            Call::Cancel("AA".into()),
        ]
    );
    assert!(monitor.session().is_none());
    assert!(!monitor.odometer().is_running());

    // Late notifications for the released sensor go nowhere
    assert!(monitor
        .handle_link_event(notification("AA", Some((1, 1)), None))
        .is_empty());
}

#[test]
fn test_events_for_other_peripherals_ignored() {
    let (mut monitor, _log) = active_ride();

    let events = monitor.handle_link_event(peripheral(
        "ZZ",
        PeripheralEvent::Disconnected { error: None },
    ));

    assert!(events.is_empty());
    assert_eq!(monitor.session_state(), Some(&SessionState::Active));
}

#[test]
fn test_selected_sensor_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let options = MonitorOptions {
        auto_connect_first: true,
        config_path: Some(path.clone()),
        ..Default::default()
    };
    let (mut monitor, _log) = monitor(AdapterState::PoweredOn, AppConfig::default(), options);
    monitor.begin();
    monitor.handle_link_event(adapter(AdapterEvent::Discovered(sensor("BB"))));

    let saved = load_config_from(&path).unwrap();
    assert_eq!(saved.sensor.last_sensor_id.as_deref(), Some("BB"));
    assert!(saved.sensor.last_connected_at.is_some());
}

#[test]
fn test_shutdown_releases_everything() {
    let (mut monitor, log) = active_ride();
    log.clear();

    monitor.shutdown();

    assert!(log.contains(&Call::Cancel("AA".into())));
    assert!(monitor.session().is_none());
}
