//! CSC (Cycling Speed and Cadence) protocol implementation.
//!
//! Parses CSC Measurement (0x2A5B) notifications and derives speed, cadence
//! and distance from two consecutive samples.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Cycling Speed and Cadence Service UUID (0x1816)
pub const CSC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1816_0000_1000_8000_0080_5f9b_34fb);

/// CSC Measurement Characteristic UUID (0x2A5B)
pub const CSC_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x0000_2a5b_0000_1000_8000_0080_5f9b_34fb);

/// CSC Feature Characteristic UUID (0x2A5C)
pub const CSC_FEATURE_UUID: Uuid = Uuid::from_u128(0x0000_2a5c_0000_1000_8000_0080_5f9b_34fb);

/// Sensor Location Characteristic UUID (0x2A5D)
pub const SENSOR_LOCATION_UUID: Uuid = Uuid::from_u128(0x0000_2a5d_0000_1000_8000_0080_5f9b_34fb);

/// SC Control Point Characteristic UUID (0x2A55)
pub const SC_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a55_0000_1000_8000_0080_5f9b_34fb);

/// Flags bit 0: wheel revolution data present.
pub const WHEEL_FLAG_MASK: u8 = 0b01;

/// Flags bit 1: crank revolution data present.
pub const CRANK_FLAG_MASK: u8 = 0b10;

/// Default wheel circumference in millimeters (700x30c).
pub const DEFAULT_WHEEL_CIRCUMFERENCE_MM: u32 = 2170;

/// Event time resolution: ticks per second.
pub const TIME_SCALE: f64 = 1024.0;

/// Largest representable event time, in seconds.
pub const MAX_EVENT_TIME_S: f64 = u16::MAX as f64 / TIME_SCALE;

const WHEEL_DATA_LEN: usize = 6;
const CRANK_DATA_LEN: usize = 4;

/// Returns true for the characteristics exposed by the CSC service.
pub fn is_csc_characteristic(uuid: &Uuid) -> bool {
    *uuid == CSC_MEASUREMENT_UUID
        || *uuid == CSC_FEATURE_UUID
        || *uuid == SENSOR_LOCATION_UUID
        || *uuid == SC_CONTROL_POINT_UUID
}

/// Errors produced while decoding a measurement frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame is shorter than its flags byte requires.
    #[error("Truncated measurement: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// One decoded CSC Measurement.
///
/// Wheel fields are only meaningful when `has_wheel` is set and crank fields
/// only when `has_crank` is set. Use [`Sample::wheel`] and [`Sample::crank`]
/// to read them safely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Wheel revolution data present (flags bit 0)
    pub has_wheel: bool,
    /// Crank revolution data present (flags bit 1)
    pub has_crank: bool,
    /// Cumulative wheel revolutions
    pub cumulative_wheel_revolutions: u32,
    /// Last wheel event time in seconds
    pub last_wheel_event_time: f64,
    /// Cumulative crank revolutions
    pub cumulative_crank_revolutions: u16,
    /// Last crank event time in seconds
    pub last_crank_event_time: f64,
    /// Wheel circumference in millimeters
    pub wheel_circumference_mm: u32,
}

impl Sample {
    /// Wheel revolutions and event time, if present.
    pub fn wheel(&self) -> Option<(u32, f64)> {
        self.has_wheel
            .then_some((self.cumulative_wheel_revolutions, self.last_wheel_event_time))
    }

    /// Crank revolutions and event time, if present.
    pub fn crank(&self) -> Option<(u16, f64)> {
        self.has_crank
            .then_some((self.cumulative_crank_revolutions, self.last_crank_event_time))
    }
}

impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Wheel revs: ")?;
        match self.wheel() {
            Some((revs, time)) => write!(f, "{} @ {:.3}s", revs, time)?,
            None => write!(f, "n/a")?,
        }
        write!(f, ". Crank revs: ")?;
        match self.crank() {
            Some((revs, time)) => write!(f, "{} @ {:.3}s", revs, time),
            None => write!(f, "n/a"),
        }
    }
}

/// Values derived from two consecutive samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedReading {
    /// Speed in meters per second
    pub speed_m_s: Option<f64>,
    /// Cadence in RPM
    pub cadence_rpm: Option<f64>,
    /// Distance travelled since the previous sample, in meters
    pub distance_delta_m: Option<f64>,
}

impl DerivedReading {
    /// Speed converted to km/h.
    pub fn speed_kmh(&self) -> Option<f64> {
        self.speed_m_s.map(|s| s * 3.6)
    }

    /// True when no value could be derived.
    pub fn is_empty(&self) -> bool {
        self.speed_m_s.is_none() && self.cadence_rpm.is_none() && self.distance_delta_m.is_none()
    }
}

/// Decode a CSC Measurement using the default wheel circumference.
pub fn decode(data: &[u8]) -> Result<Sample, DecodeError> {
    decode_with_wheel(data, DEFAULT_WHEEL_CIRCUMFERENCE_MM)
}

/// Decode a CSC Measurement notification.
///
/// The data format is:
/// - Byte 0: Flags (bit 0 wheel data, bit 1 crank data)
/// - Wheel data (if bit 0): u32 cumulative revolutions, u16 last event time
/// - Crank data (if bit 1): u16 cumulative revolutions, u16 last event time
///
/// All fields are little-endian and event times are in 1/1024 s.
pub fn decode_with_wheel(data: &[u8], wheel_circumference_mm: u32) -> Result<Sample, DecodeError> {
    let flags = *data.first().ok_or(DecodeError::Truncated {
        expected: 1,
        actual: 0,
    })?;

    let has_wheel = (flags & WHEEL_FLAG_MASK) != 0;
    let has_crank = (flags & CRANK_FLAG_MASK) != 0;

    let mut expected = 1;
    if has_wheel {
        expected += WHEEL_DATA_LEN;
    }
    if has_crank {
        expected += CRANK_DATA_LEN;
    }
    if data.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: data.len(),
        });
    }

    let mut sample = Sample {
        has_wheel,
        has_crank,
        cumulative_wheel_revolutions: 0,
        last_wheel_event_time: 0.0,
        cumulative_crank_revolutions: 0,
        last_crank_event_time: 0.0,
        wheel_circumference_mm,
    };
    let mut offset = 1usize;

    if has_wheel {
        sample.cumulative_wheel_revolutions = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        let ticks = u16::from_le_bytes([data[offset + 4], data[offset + 5]]);
        sample.last_wheel_event_time = f64::from(ticks) / TIME_SCALE;
        offset += WHEEL_DATA_LEN;
    }

    if has_crank {
        sample.cumulative_crank_revolutions = u16::from_le_bytes([data[offset], data[offset + 1]]);
        let ticks = u16::from_le_bytes([data[offset + 2], data[offset + 3]]);
        sample.last_crank_event_time = f64::from(ticks) / TIME_SCALE;
    }

    Ok(sample)
}

/// Wheel revolutions between two samples, allowing for one counter wrap.
pub fn wheel_revolution_delta(current: u32, previous: u32) -> u32 {
    if current >= previous {
        current - previous
    } else {
        (u32::MAX - previous) + current
    }
}

/// Crank revolutions between two samples, allowing for one counter wrap.
pub fn crank_revolution_delta(current: u16, previous: u16) -> u16 {
    if current >= previous {
        current - previous
    } else {
        (u16::MAX - previous) + current
    }
}

/// Seconds between two event times, allowing for one counter wrap.
pub fn event_time_delta(current: f64, previous: f64) -> f64 {
    if current >= previous {
        current - previous
    } else {
        (MAX_EVENT_TIME_S - previous) + current
    }
}

/// Derive speed, cadence and distance from the current and previous sample.
///
/// Returns `None` when there is no previous sample. A counter that wrapped
/// more than once between the two samples cannot be detected.
pub fn derive(current: &Sample, previous: Option<&Sample>) -> Option<DerivedReading> {
    let previous = previous?;
    let mut reading = DerivedReading::default();

    if let (Some((revs, time)), Some((prev_revs, prev_time))) = (current.wheel(), previous.wheel())
    {
        let time_delta = event_time_delta(time, prev_time);
        let revs_delta = wheel_revolution_delta(revs, prev_revs);

        let distance =
            f64::from(revs_delta) * f64::from(current.wheel_circumference_mm) / 1000.0;
        reading.distance_delta_m = Some(distance);
        if time_delta > 0.0 {
            reading.speed_m_s = Some(distance / time_delta);
        }
    }

    if let (Some((revs, time)), Some((prev_revs, prev_time))) = (current.crank(), previous.crank())
    {
        let time_delta = event_time_delta(time, prev_time);
        let revs_delta = f64::from(crank_revolution_delta(revs, prev_revs));

        reading.cadence_rpm = Some(if time_delta == 0.0 {
            0.0
        } else {
            60.0 * revs_delta / time_delta
        });
    }

    Some(reading)
}
