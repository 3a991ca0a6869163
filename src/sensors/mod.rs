//! Sensor module for BLE Cycling Speed and Cadence devices.

pub mod ble;
pub mod central;
pub mod csc;
pub mod events;
pub mod link;
pub mod session;
pub mod types;

pub use ble::{BleCentral, BlePeripheral};
pub use central::{CentralCoordinator, CentralObserver};
pub use csc::{decode, decode_with_wheel, derive, DecodeError, DerivedReading, Sample};
pub use events::EventSink;
pub use link::{AdapterEvent, CentralLink, LinkEvent, PeripheralEvent, PeripheralLink};
pub use session::{SensorSession, SessionObserver, SessionState};
pub use types::{
    AdapterState, ConnectionState, SensorError, SensorEvent, SensorIdentity, SessionConfig,
    SessionError,
};
