//! Transport capabilities used by the session and coordinator.
//!
//! Requests are fire-and-forget: a backend starts the operation and later
//! reports the outcome as an event on the single sequential event stream.
//! An `Err` returned from a request means it could not even be issued.

use crate::sensors::types::{AdapterState, SensorError, SensorIdentity};
use uuid::Uuid;

/// Outcome of a peripheral request, or an unsolicited peripheral event.
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralEvent {
    /// Service discovery finished
    ServicesDiscovered(Result<Vec<Uuid>, String>),
    /// Characteristic discovery for `service` finished
    CharacteristicsDiscovered {
        service: Uuid,
        result: Result<Vec<Uuid>, String>,
    },
    /// Notification state of a characteristic changed
    NotificationStateChanged {
        characteristic: Uuid,
        result: Result<bool, String>,
    },
    /// A characteristic value was pushed by the peripheral
    ValueUpdated {
        characteristic: Uuid,
        result: Result<Vec<u8>, String>,
    },
    /// Link lost or closed
    Disconnected { error: Option<String> },
}

/// Events from the central adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// Adapter state changed
    StateChanged(AdapterState),
    /// A peripheral advertising the scanned services was found
    Discovered(SensorIdentity),
    /// Connection established
    Connected(SensorIdentity),
    /// Connection attempt failed
    ConnectFailed {
        identity: SensorIdentity,
        error: String,
    },
    /// Connection lost or cancelled
    Disconnected {
        identity: SensorIdentity,
        error: Option<String>,
    },
    /// A request accepted earlier failed in the transport
    RequestFailed(SensorError),
}

/// Everything that travels on the sequential event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Adapter-level event
    Adapter(AdapterEvent),
    /// Event for one peripheral
    Peripheral {
        device_id: String,
        event: PeripheralEvent,
    },
}

/// Handle to one connected peripheral.
pub trait PeripheralLink: Send {
    /// Identity of the remote peripheral.
    fn identity(&self) -> &SensorIdentity;

    /// Request service discovery, optionally filtered to `services`.
    fn discover_services(&mut self, services: &[Uuid]) -> Result<(), SensorError>;

    /// Request characteristic discovery for `service`.
    fn discover_characteristics(&mut self, service: Uuid) -> Result<(), SensorError>;

    /// Enable or disable notifications on `characteristic`.
    fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> Result<(), SensorError>;
}

/// Scan/connect capability of the local adapter.
pub trait CentralLink {
    /// Peripheral handle type produced by this central.
    type Peripheral: PeripheralLink;

    /// Current adapter state.
    fn adapter_state(&self) -> AdapterState;

    /// Start scanning for peripherals advertising `services`.
    fn start_scan(&mut self, services: &[Uuid]) -> Result<(), SensorError>;

    /// Stop scanning.
    fn stop_scan(&mut self) -> Result<(), SensorError>;

    /// Whether a scan is running.
    fn is_scanning(&self) -> bool;

    /// Request a connection.
    fn connect(&mut self, identity: &SensorIdentity) -> Result<(), SensorError>;

    /// Cancel a pending or established connection.
    fn cancel_connection(&mut self, identity: &SensorIdentity) -> Result<(), SensorError>;

    /// Resolve a persisted identifier to a peripheral the platform still knows.
    fn retrieve(&self, device_id: &str) -> Option<SensorIdentity>;

    /// Live handle for a connected peripheral.
    fn peripheral(&self, identity: &SensorIdentity) -> Option<Self::Peripheral>;
}
