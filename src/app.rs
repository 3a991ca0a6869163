//! Ride monitor: wires the coordinator, one sensor session and the odometer.
//!
//! Link events are applied in arrival order. Coordinator and session report
//! back through an [`EventSink`]; the monitor drains those events after every
//! link event, reacts to them and returns them to the caller for display.

use crate::metrics::odometer::Odometer;
use crate::sensors::central::CentralCoordinator;
use crate::sensors::events::EventSink;
use crate::sensors::link::{CentralLink, LinkEvent};
use crate::sensors::session::{SensorSession, SessionState};
use crate::sensors::types::{AdapterState, SensorError, SensorEvent, SensorIdentity};
use crate::storage::config::{save_config_to, AppConfig};
use crossbeam::channel::{Receiver, Sender};
use std::path::PathBuf;

/// How the monitor picks a sensor.
#[derive(Debug, Clone, Default)]
pub struct MonitorOptions {
    /// Connect to this device id instead of the remembered one
    pub sensor_id: Option<String>,
    /// Connect to the first sensor found while scanning
    pub auto_connect_first: bool,
    /// Where to persist the chosen sensor; `None` keeps it in memory
    pub config_path: Option<PathBuf>,
}

/// Runs one CSC sensor from adapter power-on to readings.
pub struct RideMonitor<C: CentralLink> {
    coordinator: CentralCoordinator<C>,
    session: Option<SensorSession<C::Peripheral>>,
    odometer: Odometer,
    config: AppConfig,
    options: MonitorOptions,
    /// Sensor to connect to when the scan reports it
    awaiting: Option<String>,
    event_tx: Sender<SensorEvent>,
    event_rx: Receiver<SensorEvent>,
}

impl<C: CentralLink> RideMonitor<C> {
    /// Create a monitor over `link`.
    pub fn new(link: C, config: AppConfig, options: MonitorOptions) -> Self {
        let (event_tx, event_rx) = crossbeam::channel::unbounded();
        let coordinator = CentralCoordinator::new(link, Box::new(EventSink::new(event_tx.clone())));

        Self {
            coordinator,
            session: None,
            odometer: Odometer::new(),
            config,
            options,
            awaiting: None,
            event_tx,
            event_rx,
        }
    }

    /// Coordinator in use.
    pub fn coordinator(&self) -> &CentralCoordinator<C> {
        &self.coordinator
    }

    /// Active session, if a sensor is connected.
    pub fn session(&self) -> Option<&SensorSession<C::Peripheral>> {
        self.session.as_ref()
    }

    /// State of the active session.
    pub fn session_state(&self) -> Option<&SessionState> {
        self.session.as_ref().map(|s| s.state())
    }

    /// Ride totals.
    pub fn odometer(&self) -> &Odometer {
        &self.odometer
    }

    /// Current configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Act on the adapter state known at startup.
    ///
    /// A platform that is already powered on reports no state change, so the
    /// power-on handling has to run once up front.
    pub fn begin(&mut self) -> Vec<SensorEvent> {
        if self.coordinator.adapter_state() == AdapterState::PoweredOn {
            self.on_powered_on();
        }
        self.drain_events()
    }

    /// Apply one event from the transport.
    pub fn handle_link_event(&mut self, event: LinkEvent) -> Vec<SensorEvent> {
        match event {
            LinkEvent::Adapter(event) => self.coordinator.handle_event(event),
            LinkEvent::Peripheral { device_id, event } => match self.session.as_mut() {
                Some(session) if session.identity().device_id == device_id => {
                    session.handle_event(event)
                }
                _ => tracing::debug!("Event for {} without a session ignored", device_id),
            },
        }
        self.drain_events()
    }

    /// Start scanning for sensors.
    pub fn start_scan(&mut self) -> Result<Vec<SensorEvent>, SensorError> {
        self.coordinator.start_scan()?;
        Ok(self.drain_events())
    }

    /// Connect to `identity`, replacing the current sensor.
    pub fn select_sensor(&mut self, identity: &SensorIdentity) -> Result<(), SensorError> {
        if let Err(e) = self.coordinator.stop_scan() {
            tracing::warn!("Failed to stop scanning: {}", e);
        }

        if let Some(current) = self.session.as_ref().map(|s| s.identity().clone()) {
            if current.device_id != identity.device_id {
                self.release_sensor(&current)?;
            }
        }

        tracing::info!("Need to connect to sensor {}", identity);
        self.coordinator.connect(identity)?;

        self.config.sensor.remember_sensor(identity);
        self.persist_config();
        Ok(())
    }

    /// Disconnect the current sensor.
    pub fn disconnect(&mut self) -> Result<Vec<SensorEvent>, SensorError> {
        if let Some(identity) = self.session.as_ref().map(|s| s.identity().clone()) {
            self.release_sensor(&identity)?;
        }
        Ok(self.drain_events())
    }

    /// Stop scanning and release the sensor.
    pub fn shutdown(&mut self) -> Vec<SensorEvent> {
        tracing::info!("Shutting down ride monitor");
        if let Err(e) = self.coordinator.stop_scan() {
            tracing::warn!("Failed to stop scanning: {}", e);
        }
        if let Err(e) = self.disconnect() {
            tracing::warn!("Failed to disconnect: {}", e);
        }
        self.drain_events()
    }

    fn release_sensor(&mut self, identity: &SensorIdentity) -> Result<(), SensorError> {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.stop() {
                tracing::warn!("Failed to stop session for {}: {}", identity, e);
            }
        }
        self.odometer.clear();
        self.coordinator.disconnect(identity)
    }

    fn drain_events(&mut self) -> Vec<SensorEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            self.react(&event);
            drained.push(event);
        }
        drained
    }

    fn react(&mut self, event: &SensorEvent) {
        match event {
            SensorEvent::AdapterStateChanged(AdapterState::PoweredOn) => self.on_powered_on(),
            SensorEvent::Discovered(identity) => self.on_discovered(identity),
            SensorEvent::Connected(identity) => self.on_connected(identity),
            SensorEvent::ConnectionFailed { identity, .. }
            | SensorEvent::Disconnected { identity, .. } => {
                let owns = self
                    .session
                    .as_ref()
                    .map_or(true, |s| s.identity().device_id == identity.device_id);
                if owns {
                    self.session = None;
                    self.odometer.clear();
                }
            }
            SensorEvent::Ready(_) => self.odometer.start(),
            SensorEvent::Reading { reading, .. } => self.odometer.record(reading),
            SensorEvent::Error { identity, error } if error.is_fatal() => {
                tracing::error!(
                    "An error occurred discovering {} services/characteristics: {}",
                    identity,
                    error
                );
            }
            _ => {}
        }
    }

    fn on_powered_on(&mut self) {
        let wanted = self
            .options
            .sensor_id
            .clone()
            .or_else(|| {
                self.config
                    .sensor
                    .reconnect_on_power_on
                    .then(|| self.config.sensor.last_sensor_id.clone())
                    .flatten()
            });

        if let Some(device_id) = wanted {
            if let Some(identity) = self.coordinator.retrieve_known(&device_id) {
                tracing::info!("Reconnecting to previous sensor {}", identity);
                if let Err(e) = self.select_sensor(&identity) {
                    tracing::warn!("Failed to reconnect to {}: {}", identity, e);
                } else {
                    return;
                }
            } else {
                tracing::info!("Sensor {} not known to the adapter, scanning for it", device_id);
            }
            self.awaiting = Some(device_id);
        } else if !self.options.auto_connect_first {
            tracing::warn!("No sensor selected and none remembered; nothing to connect to");
            return;
        }

        if let Err(e) = self.coordinator.start_scan() {
            tracing::warn!("Failed to start scanning: {}", e);
        }
    }

    fn on_discovered(&mut self, identity: &SensorIdentity) {
        if self.session.is_some() {
            return;
        }
        let wanted = match &self.awaiting {
            Some(device_id) => *device_id == identity.device_id,
            None => self.options.auto_connect_first,
        };
        if wanted {
            if let Err(e) = self.select_sensor(identity) {
                tracing::warn!("Failed to connect to {}: {}", identity, e);
            }
        }
    }

    fn on_connected(&mut self, identity: &SensorIdentity) {
        let observer = Box::new(EventSink::new(self.event_tx.clone()));
        match self
            .coordinator
            .open_session(identity, self.config.sensor.session_config(), observer)
        {
            Ok(mut session) => {
                tracing::info!("Sensor connected. {}", identity);
                session.start();
                self.session = Some(session);
            }
            Err(e) => tracing::error!("Cannot open session for {}: {}", identity, e),
        }
    }

    fn persist_config(&self) {
        if let Some(path) = &self.options.config_path {
            if let Err(e) = save_config_to(&self.config, path) {
                tracing::warn!("Failed to save configuration: {}", e);
            }
        }
    }
}
