//! Central coordinator for CSC sensor scanning and connections.
//!
//! The coordinator drives a [`CentralLink`] and tracks sensors by identity
//! only. Sessions are owned by the application; the coordinator hands out
//! the peripheral link through [`CentralCoordinator::open_session`].

use crate::sensors::csc::CSC_SERVICE_UUID;
use crate::sensors::link::{AdapterEvent, CentralLink};
use crate::sensors::session::{SensorSession, SessionObserver};
use crate::sensors::types::{
    AdapterState, ConnectionState, SensorError, SensorIdentity, SessionConfig,
};
use std::collections::HashMap;

/// Receives adapter and connection lifecycle events.
pub trait CentralObserver: Send {
    /// Adapter state changed. Called with every reported state.
    fn adapter_state_changed(&mut self, state: AdapterState);

    /// Scanning started or stopped.
    fn scan_state_changed(&mut self, scanning: bool);

    /// A new CSC sensor was found.
    fn sensor_discovered(&mut self, identity: &SensorIdentity);

    /// A connection was established.
    fn sensor_connected(&mut self, identity: &SensorIdentity);

    /// A connection attempt failed.
    fn connection_failed(&mut self, identity: &SensorIdentity, error: &str);

    /// An established or pending connection ended.
    fn sensor_disconnected(&mut self, identity: &SensorIdentity, error: Option<&str>);

    /// A scan or disconnect request failed after it was issued.
    fn request_failed(&mut self, error: &SensorError);
}

/// Manages scanning and connections over a [`CentralLink`].
pub struct CentralCoordinator<C: CentralLink> {
    link: C,
    observer: Box<dyn CentralObserver>,
    adapter_state: AdapterState,
    scanning: bool,
    /// Discovered sensors (device_id -> identity)
    discovered: HashMap<String, SensorIdentity>,
    /// Tracked connections (device_id -> state)
    connections: HashMap<String, ConnectionState>,
}

impl<C: CentralLink> CentralCoordinator<C> {
    /// Create a coordinator over `link`.
    pub fn new(link: C, observer: Box<dyn CentralObserver>) -> Self {
        let adapter_state = link.adapter_state();
        Self {
            link,
            observer,
            adapter_state,
            scanning: false,
            discovered: HashMap::new(),
            connections: HashMap::new(),
        }
    }

    /// Last reported adapter state.
    pub fn adapter_state(&self) -> AdapterState {
        self.adapter_state
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Underlying central link.
    pub fn link(&self) -> &C {
        &self.link
    }

    /// Get list of discovered sensors.
    pub fn discovered(&self) -> Vec<SensorIdentity> {
        self.discovered.values().cloned().collect()
    }

    /// Connection state for a device.
    pub fn connection_state(&self, device_id: &str) -> ConnectionState {
        self.connections
            .get(device_id)
            .copied()
            .unwrap_or_default()
    }

    /// Start scanning for CSC sensors.
    pub fn start_scan(&mut self) -> Result<(), SensorError> {
        if self.adapter_state != AdapterState::PoweredOn {
            return Err(SensorError::AdapterNotReady(self.adapter_state));
        }
        if self.scanning {
            return Ok(());
        }

        tracing::info!("Starting sensor discovery");
        self.discovered.clear();
        self.link.start_scan(&[CSC_SERVICE_UUID])?;
        self.scanning = true;
        self.observer.scan_state_changed(true);
        Ok(())
    }

    /// Stop scanning.
    pub fn stop_scan(&mut self) -> Result<(), SensorError> {
        if !self.scanning && !self.link.is_scanning() {
            return Ok(());
        }

        tracing::info!("Stopping sensor discovery");
        self.link.stop_scan()?;
        self.scanning = false;
        self.observer.scan_state_changed(false);
        Ok(())
    }

    /// Connect to a sensor, cancelling any pending connection to it first.
    pub fn connect(&mut self, identity: &SensorIdentity) -> Result<(), SensorError> {
        if self.adapter_state != AdapterState::PoweredOn {
            return Err(SensorError::AdapterNotReady(self.adapter_state));
        }

        self.disconnect(identity)?;

        tracing::info!("Connecting to sensor: {}", identity);
        self.link.connect(identity)?;
        self.connections
            .insert(identity.device_id.clone(), ConnectionState::Connecting);
        Ok(())
    }

    /// Disconnect from a sensor. Later events for it are ignored.
    pub fn disconnect(&mut self, identity: &SensorIdentity) -> Result<(), SensorError> {
        let previous = self.connections.remove(&identity.device_id);
        if previous.is_some() {
            tracing::info!("Disconnecting from sensor: {}", identity);
        }
        self.link.cancel_connection(identity)
    }

    /// Resolve a persisted device id to a sensor the platform still knows.
    pub fn retrieve_known(&self, device_id: &str) -> Option<SensorIdentity> {
        let identity = self.link.retrieve(device_id);
        if identity.is_none() {
            tracing::debug!("No known peripheral for {}", device_id);
        }
        identity
    }

    /// Hand the live peripheral of a connected sensor to a new session.
    pub fn open_session(
        &self,
        identity: &SensorIdentity,
        config: SessionConfig,
        observer: Box<dyn SessionObserver>,
    ) -> Result<SensorSession<C::Peripheral>, SensorError> {
        if self.connection_state(&identity.device_id) != ConnectionState::Connected {
            return Err(SensorError::SessionUnavailable(identity.device_id.clone()));
        }

        let peripheral = self
            .link
            .peripheral(identity)
            .ok_or_else(|| SensorError::SessionUnavailable(identity.device_id.clone()))?;

        Ok(SensorSession::new(peripheral, config, observer))
    }

    /// Apply one adapter event.
    pub fn handle_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::StateChanged(state) => {
                tracing::info!("Adapter state changed: {}", state);
                self.adapter_state = state;
                if state != AdapterState::PoweredOn && self.scanning {
                    self.scanning = false;
                    self.observer.scan_state_changed(false);
                }
                self.observer.adapter_state_changed(state);
            }
            AdapterEvent::Discovered(identity) => {
                if !self.scanning {
                    tracing::debug!("Discovery of {} after scan stopped ignored", identity);
                    return;
                }
                let is_new = self
                    .discovered
                    .insert(identity.device_id.clone(), identity.clone())
                    .is_none();
                if is_new {
                    tracing::debug!("Discovered sensor: {}", identity);
                    self.observer.sensor_discovered(&identity);
                }
            }
            AdapterEvent::Connected(identity) => {
                if self.connection_state(&identity.device_id) != ConnectionState::Connecting {
                    tracing::warn!("Unrequested connection to {} cancelled", identity);
                    if let Err(e) = self.link.cancel_connection(&identity) {
                        tracing::warn!("Failed to cancel connection to {}: {}", identity, e);
                    }
                    return;
                }
                tracing::info!("Connected to sensor: {}", identity);
                self.connections
                    .insert(identity.device_id.clone(), ConnectionState::Connected);
                self.observer.sensor_connected(&identity);
            }
            AdapterEvent::ConnectFailed { identity, error } => {
                if self.connections.remove(&identity.device_id).is_none() {
                    return;
                }
                tracing::error!("Error connecting to sensor {}: {}", identity, error);
                self.observer.connection_failed(&identity, &error);
            }
            AdapterEvent::Disconnected { identity, error } => {
                if self.connections.remove(&identity.device_id).is_none() {
                    tracing::debug!("Disconnect of untracked sensor {} ignored", identity);
                    return;
                }
                tracing::info!("Sensor disconnected: {}", identity);
                self.observer
                    .sensor_disconnected(&identity, error.as_deref());
            }
            AdapterEvent::RequestFailed(error) => {
                tracing::error!("{}", error);
                if matches!(error, SensorError::ScanFailed(_)) && self.scanning {
                    self.scanning = false;
                    self.observer.scan_state_changed(false);
                }
                self.observer.request_failed(&error);
            }
        }
    }
}

impl<C: CentralLink> Drop for CentralCoordinator<C> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_scan() {
            tracing::warn!("Failed to stop scanning on shutdown: {}", e);
        }
    }
}
