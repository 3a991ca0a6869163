//! Ride totals accumulated from derived CSC readings.

use crate::sensors::csc::DerivedReading;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Distance below which the total is not worth showing, in meters.
pub const MIN_DISPLAY_DISTANCE_M: f64 = 1.0;

/// Snapshot of the odometer for display or export.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RideSnapshot {
    /// Latest speed in km/h
    pub speed_kmh: Option<f64>,
    /// Latest cadence in RPM
    pub cadence_rpm: Option<f64>,
    /// Accumulated distance in meters
    pub distance_m: Option<f64>,
    /// Maximum speed in km/h
    pub max_speed_kmh: Option<f64>,
}

/// Accumulates distance and tracks the latest values.
///
/// The odometer is only running between [`Odometer::start`] and
/// [`Odometer::clear`]; readings outside that window are ignored.
#[derive(Debug, Clone, Default)]
pub struct Odometer {
    distance_m: Option<f64>,
    speed_m_s: Option<f64>,
    cadence_rpm: Option<f64>,
    max_speed_m_s: Option<f64>,
    started_at: Option<DateTime<Utc>>,
}

impl Odometer {
    /// Create a stopped odometer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accumulating from zero.
    pub fn start(&mut self) {
        *self = Self {
            distance_m: Some(0.0),
            started_at: Some(Utc::now()),
            ..Self::default()
        };
    }

    /// Stop and forget all totals.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Whether the odometer is accumulating.
    pub fn is_running(&self) -> bool {
        self.distance_m.is_some()
    }

    /// When accumulation started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Apply one reading.
    pub fn record(&mut self, reading: &DerivedReading) {
        let Some(total) = self.distance_m.as_mut() else {
            return;
        };
        *total += reading.distance_delta_m.unwrap_or(0.0);

        self.speed_m_s = reading.speed_m_s;
        self.cadence_rpm = reading.cadence_rpm;
        if let Some(speed) = reading.speed_m_s {
            if self.max_speed_m_s.map_or(true, |max| speed > max) {
                self.max_speed_m_s = Some(speed);
            }
        }
    }

    /// Accumulated distance in meters.
    pub fn distance_m(&self) -> Option<f64> {
        self.distance_m
    }

    /// Accumulated distance, once it reaches [`MIN_DISPLAY_DISTANCE_M`].
    pub fn displayable_distance_m(&self) -> Option<f64> {
        self.distance_m.filter(|d| *d >= MIN_DISPLAY_DISTANCE_M)
    }

    /// Current values for display.
    pub fn snapshot(&self) -> RideSnapshot {
        RideSnapshot {
            speed_kmh: self.speed_m_s.map(|s| s * 3.6),
            cadence_rpm: self.cadence_rpm,
            distance_m: self.displayable_distance_m(),
            max_speed_kmh: self.max_speed_m_s.map(|s| s * 3.6),
        }
    }
}
