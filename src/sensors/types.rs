//! Sensor types and enums for BLE speed/cadence sensors.

use crate::sensors::csc::{DecodeError, DerivedReading, DEFAULT_WHEEL_CIRCUMFERENCE_MM};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable identity of a remote peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorIdentity {
    /// Platform peripheral identifier
    pub device_id: String,
    /// Advertised name, if any
    pub name: Option<String>,
}

impl SensorIdentity {
    /// Create an identity without a name.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            name: None,
        }
    }

    /// Attach an advertised name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name for display, falling back to the device id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.device_id)
    }
}

impl std::fmt::Display for SensorIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} [{}]", name, self.device_id),
            None => write!(f, "[{}]", self.device_id),
        }
    }
}

/// State of the local Bluetooth adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    /// State not yet known
    #[default]
    Unknown,
    /// Adapter is resetting
    Resetting,
    /// Platform has no BLE support
    Unsupported,
    /// Application is not allowed to use Bluetooth
    Unauthorized,
    /// Bluetooth is switched off
    PoweredOff,
    /// Ready to scan and connect
    PoweredOn,
}

impl AdapterState {
    /// Scanning and connecting are only allowed when powered on.
    pub fn is_powered_on(&self) -> bool {
        *self == AdapterState::PoweredOn
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterState::Unknown => write!(f, "Unknown"),
            AdapterState::Resetting => write!(f, "Resetting"),
            AdapterState::Unsupported => write!(f, "Bluetooth not supported"),
            AdapterState::Unauthorized => write!(f, "Bluetooth not authorized"),
            AdapterState::PoweredOff => write!(f, "Bluetooth Off"),
            AdapterState::PoweredOn => write!(f, "Bluetooth ON"),
        }
    }
}

/// Connection state of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Active connection
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Per-session configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Wheel circumference in millimeters
    pub wheel_circumference_mm: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wheel_circumference_mm: DEFAULT_WHEEL_CIRCUMFERENCE_MM,
        }
    }
}

impl SessionConfig {
    /// Configuration with a custom wheel circumference.
    pub fn with_wheel(wheel_circumference_mm: u32) -> Self {
        Self {
            wheel_circumference_mm,
        }
    }
}

/// Events surfaced to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    /// Adapter state changed
    AdapterStateChanged(AdapterState),
    /// Scan started
    ScanStarted,
    /// Scan stopped
    ScanStopped,
    /// A CSC sensor was discovered during scanning
    Discovered(SensorIdentity),
    /// Connection established
    Connected(SensorIdentity),
    /// Connection attempt failed
    ConnectionFailed {
        identity: SensorIdentity,
        error: String,
    },
    /// Connection lost or closed
    Disconnected {
        identity: SensorIdentity,
        error: Option<String>,
    },
    /// Session subscribed to measurements
    Ready(SensorIdentity),
    /// New derived values
    Reading {
        identity: SensorIdentity,
        reading: DerivedReading,
    },
    /// Session error, fatal or not
    Error {
        identity: SensorIdentity,
        error: SessionError,
    },
    /// A scan or disconnect request failed in the transport
    CentralError(SensorError),
}

/// Errors raised by a sensor session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// Adapter or connection level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Peripheral does not expose the CSC service
    #[error("Cadence service not found for this peripheral")]
    ServiceNotFound,

    /// CSC service has no usable characteristics
    #[error("No characteristics found for the cadence service")]
    NoCharacteristics,

    /// Malformed measurement frame
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A single measurement update failed
    #[error("Error receiving measurement update: {0}")]
    UpdateFailed(String),
}

impl SessionError {
    /// Whether the error ends the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Decode(_) | SessionError::UpdateFailed(_))
    }
}

/// Errors that can occur in the sensor system.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    /// BLE adapter not found or unavailable
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    /// Adapter is not powered on
    #[error("Bluetooth adapter not ready: {0}")]
    AdapterNotReady(AdapterState),

    /// Failed to start or stop BLE scanning
    #[error("Scan failed: {0}")]
    ScanFailed(String),

    /// Sensor not found with given device ID
    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    /// Failed to change notification state
    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// No live peripheral handle for a session
    #[error("Sensor {0} is not connected")]
    SessionUnavailable(String),

    /// Generic BLE error
    #[error("BLE error: {0}")]
    BleError(String),
}
