//! Unit tests for CSC Measurement decoding and derived values.

use crate::common::measurement;
use bikespeed::sensors::csc::{
    crank_revolution_delta, decode, decode_with_wheel, derive, event_time_delta,
    wheel_revolution_delta, DecodeError, DEFAULT_WHEEL_CIRCUMFERENCE_MM, MAX_EVENT_TIME_S,
};

#[test]
fn test_decode_wheel_and_crank() {
    // Flags: 0x03, wheel 100 revs @ 512 ticks, crank 10 revs @ 256 ticks
    let data = [0x03, 0x64, 0x00, 0x00, 0x00, 0x00, 0x02, 0x0A, 0x00, 0x00, 0x01];
    let sample = decode(&data).unwrap();

    assert!(sample.has_wheel);
    assert!(sample.has_crank);
    assert_eq!(sample.cumulative_wheel_revolutions, 100);
    assert_eq!(sample.last_wheel_event_time, 0.5);
    assert_eq!(sample.cumulative_crank_revolutions, 10);
    assert_eq!(sample.last_crank_event_time, 0.25);
}

#[test]
fn test_decode_wheel_only() {
    let sample = decode(&measurement(Some((70_000, 3072)), None)).unwrap();

    assert_eq!(sample.wheel(), Some((70_000, 3.0)));
    assert_eq!(sample.crank(), None);
}

#[test]
fn test_decode_no_data() {
    let sample = decode(&[0x00]).unwrap();

    assert!(!sample.has_wheel);
    assert!(!sample.has_crank);
}

#[test]
fn test_decode_uses_wheel_circumference() {
    let sample = decode_with_wheel(&measurement(Some((1, 0)), None), 2096).unwrap();
    assert_eq!(sample.wheel_circumference_mm, 2096);

    let sample = decode(&measurement(Some((1, 0)), None)).unwrap();
    assert_eq!(sample.wheel_circumference_mm, DEFAULT_WHEEL_CIRCUMFERENCE_MM);
}

#[test]
fn test_decode_truncated_for_each_layout() {
    let frames = [
        measurement(Some((1, 1)), None),
        measurement(None, Some((1, 1))),
        measurement(Some((1, 1)), Some((1, 1))),
    ];

    for frame in frames {
        let short = &frame[..frame.len() - 1];
        assert_eq!(
            decode(short),
            Err(DecodeError::Truncated {
                expected: frame.len(),
                actual: frame.len() - 1,
            })
        );
    }
}

#[test]
fn test_decode_flags_only_with_wheel_flag() {
    assert!(matches!(decode(&[0x01]), Err(DecodeError::Truncated { .. })));
}

#[test]
fn test_wheel_counter_wraparound() {
    assert_eq!(wheel_revolution_delta(3, u32::MAX - 2), 5);

    let previous = decode(&measurement(Some((u32::MAX - 2, 1024)), None)).unwrap();
    let current = decode(&measurement(Some((3, 2048)), None)).unwrap();
    let reading = derive(&current, Some(&previous)).unwrap();

    assert_eq!(reading.distance_delta_m, Some(5.0 * 2170.0 / 1000.0));
}

#[test]
fn test_crank_counter_wraparound() {
    assert_eq!(crank_revolution_delta(0, u16::MAX), 0);
    assert_eq!(crank_revolution_delta(4, u16::MAX - 1), 5);
}

#[test]
fn test_crank_time_wraparound() {
    let previous = decode(&measurement(None, Some((10, 65_500)))).unwrap();
    let current = decode(&measurement(None, Some((11, 100)))).unwrap();

    let delta = event_time_delta(current.last_crank_event_time, previous.last_crank_event_time);
    assert!(delta > 0.0);
    assert!(delta < MAX_EVENT_TIME_S);
    assert!((delta - 135.0 / 1024.0).abs() < 1e-12);

    let reading = derive(&current, Some(&previous)).unwrap();
    let cadence = reading.cadence_rpm.unwrap();
    assert!((cadence - 60.0 / (135.0 / 1024.0)).abs() < 1e-9);
}

#[test]
fn test_zero_wheel_time_means_no_speed() {
    let previous = decode(&measurement(Some((100, 4096)), None)).unwrap();
    let current = decode(&measurement(Some((103, 4096)), None)).unwrap();
    let reading = derive(&current, Some(&previous)).unwrap();

    assert!(reading.distance_delta_m.unwrap() > 0.0);
    assert_eq!(reading.speed_m_s, None);
}

#[test]
fn test_zero_crank_time_means_zero_cadence() {
    let previous = decode(&measurement(None, Some((50, 777)))).unwrap();
    let current = decode(&measurement(None, Some((52, 777)))).unwrap();
    let reading = derive(&current, Some(&previous)).unwrap();

    assert_eq!(reading.cadence_rpm, Some(0.0));
}

#[test]
fn test_derive_without_previous_is_none() {
    for frame in [
        measurement(Some((1, 1)), None),
        measurement(None, Some((1, 1))),
        measurement(Some((1, 1)), Some((1, 1))),
        vec![0x00],
    ] {
        let sample = decode(&frame).unwrap();
        assert_eq!(derive(&sample, None), None);
    }
}

#[test]
fn test_derive_requires_capability_on_both_samples() {
    let previous = decode(&measurement(Some((100, 1024)), None)).unwrap();
    let current = decode(&measurement(Some((101, 2048)), Some((5, 2048)))).unwrap();
    let reading = derive(&current, Some(&previous)).unwrap();

    assert!(reading.distance_delta_m.is_some());
    assert!(reading.speed_m_s.is_some());
    assert_eq!(reading.cadence_rpm, None);
}

#[test]
fn test_distance_and_speed_round_trip() {
    let previous = decode(&measurement(Some((1000, 1024)), Some((200, 1024)))).unwrap();
    let current = decode(&measurement(Some((1003, 2048)), Some((201, 1536)))).unwrap();
    let reading = derive(&current, Some(&previous)).unwrap();

    let distance = (3.0 * 2170.0) / 1000.0;
    let wheel_time = 2.0 - 1.0;
    assert_eq!(reading.distance_delta_m, Some(distance));
    assert_eq!(reading.speed_m_s, Some(distance / wheel_time));

    // One revolution in half a second
    assert_eq!(reading.cadence_rpm, Some(120.0));
}
