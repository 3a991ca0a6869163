//! Channel-backed observer that turns callbacks into [`SensorEvent`]s.

use crate::sensors::central::CentralObserver;
use crate::sensors::csc::DerivedReading;
use crate::sensors::session::SessionObserver;
use crate::sensors::types::{
    AdapterState, SensorError, SensorEvent, SessionError, SensorIdentity,
};
use crossbeam::channel::Sender;

/// Forwards session and coordinator callbacks onto a crossbeam channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<SensorEvent>,
}

impl EventSink {
    /// Create a sink writing to `tx`.
    pub fn new(tx: Sender<SensorEvent>) -> Self {
        Self { tx }
    }

    /// Send an event, dropping it if the receiver is gone.
    fn send_event(&self, event: SensorEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Sensor event receiver dropped");
        }
    }
}

impl SessionObserver for EventSink {
    fn sensor_ready(&mut self, identity: &SensorIdentity) {
        self.send_event(SensorEvent::Ready(identity.clone()));
    }

    fn sensor_reading(&mut self, identity: &SensorIdentity, reading: DerivedReading) {
        self.send_event(SensorEvent::Reading {
            identity: identity.clone(),
            reading,
        });
    }

    fn sensor_error(&mut self, identity: &SensorIdentity, error: SessionError) {
        self.send_event(SensorEvent::Error {
            identity: identity.clone(),
            error,
        });
    }
}

impl CentralObserver for EventSink {
    fn adapter_state_changed(&mut self, state: AdapterState) {
        self.send_event(SensorEvent::AdapterStateChanged(state));
    }

    fn scan_state_changed(&mut self, scanning: bool) {
        self.send_event(if scanning {
            SensorEvent::ScanStarted
        } else {
            SensorEvent::ScanStopped
        });
    }

    fn sensor_discovered(&mut self, identity: &SensorIdentity) {
        self.send_event(SensorEvent::Discovered(identity.clone()));
    }

    fn sensor_connected(&mut self, identity: &SensorIdentity) {
        self.send_event(SensorEvent::Connected(identity.clone()));
    }

    fn connection_failed(&mut self, identity: &SensorIdentity, error: &str) {
        self.send_event(SensorEvent::ConnectionFailed {
            identity: identity.clone(),
            error: error.to_string(),
        });
    }

    fn sensor_disconnected(&mut self, identity: &SensorIdentity, error: Option<&str>) {
        self.send_event(SensorEvent::Disconnected {
            identity: identity.clone(),
            error: error.map(str::to_string),
        });
    }

    fn request_failed(&mut self, error: &SensorError) {
        self.send_event(SensorEvent::CentralError(error.clone()));
    }
}
