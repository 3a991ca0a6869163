//! Per-sensor discovery and subscription state machine.
//!
//! A session owns one [`PeripheralLink`]. It asks the link for the CSC
//! service, then its characteristics, subscribes to the measurement
//! characteristic and turns every notification into a [`DerivedReading`].
//! All results come back through [`SensorSession::handle_event`] in arrival
//! order. At most one discovery request is outstanding at a time: a restart
//! issued while one is pending waits for its reply, which is then discarded.

use crate::sensors::csc::{
    decode_with_wheel, derive, is_csc_characteristic, DerivedReading, Sample,
    CSC_MEASUREMENT_UUID, CSC_SERVICE_UUID,
};
use crate::sensors::link::{PeripheralEvent, PeripheralLink};
use crate::sensors::types::{SessionConfig, SessionError, SensorError, SensorIdentity};
use uuid::Uuid;

/// Receives the results of a session.
pub trait SessionObserver: Send {
    /// Notifications are enabled on the measurement characteristic.
    fn sensor_ready(&mut self, identity: &SensorIdentity);

    /// New values were derived from a measurement.
    fn sensor_reading(&mut self, identity: &SensorIdentity, reading: DerivedReading);

    /// Something went wrong. Fatal errors are followed by no further events.
    fn sensor_error(&mut self, identity: &SensorIdentity, error: SessionError);
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    /// Created, not started
    #[default]
    Idle,
    /// Waiting for service discovery
    Discovering,
    /// Waiting for characteristic discovery
    SubscribingCharacteristics,
    /// Receiving measurements
    Active,
    /// Stopped by the application
    Stopped,
    /// Terminated by an error
    Failed(SessionError),
}

impl SessionState {
    /// Stopped and failed sessions only react to `start()`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed(_))
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Discovering => write!(f, "Discovering services"),
            SessionState::SubscribingCharacteristics => write!(f, "Discovering characteristics"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Stopped => write!(f, "Stopped"),
            SessionState::Failed(e) => write!(f, "Failed: {}", e),
        }
    }
}

/// Discovery request awaiting its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Services,
    Characteristics,
}

/// Session for one CSC sensor.
pub struct SensorSession<P: PeripheralLink> {
    link: P,
    identity: SensorIdentity,
    config: SessionConfig,
    observer: Box<dyn SessionObserver>,
    state: SessionState,
    measurement: Option<Uuid>,
    last_sample: Option<Sample>,
    pending: Option<Pending>,
    /// Restart deferred until the pending reply arrives
    restart_deferred: bool,
}

impl<P: PeripheralLink> SensorSession<P> {
    /// Create a session that takes ownership of `link`.
    pub fn new(link: P, config: SessionConfig, observer: Box<dyn SessionObserver>) -> Self {
        let identity = link.identity().clone();
        Self {
            link,
            identity,
            config,
            observer,
            state: SessionState::Idle,
            measurement: None,
            last_sample: None,
            pending: None,
            restart_deferred: false,
        }
    }

    /// Identity of the sensor.
    pub fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Last successfully decoded sample.
    pub fn last_sample(&self) -> Option<&Sample> {
        self.last_sample.as_ref()
    }

    /// Underlying peripheral link.
    pub fn link(&self) -> &P {
        &self.link
    }

    /// Start (or restart) discovery.
    pub fn start(&mut self) {
        match self.state {
            SessionState::Idle | SessionState::Stopped | SessionState::Failed(_) => {}
            _ => {
                tracing::warn!(
                    "Ignoring start for {}: session already {}",
                    self.identity,
                    self.state
                );
                return;
            }
        }

        tracing::info!("Starting session for {}", self.identity);
        self.last_sample = None;
        self.measurement = None;
        self.state = SessionState::Discovering;

        if let Some(pending) = self.pending {
            tracing::debug!(
                "Restart of {} deferred until {:?} discovery reply arrives",
                self.identity,
                pending
            );
            self.restart_deferred = true;
            return;
        }
        self.request_services();
    }

    fn request_services(&mut self) {
        match self.link.discover_services(&[CSC_SERVICE_UUID]) {
            Ok(()) => self.pending = Some(Pending::Services),
            Err(e) => self.fail(SessionError::Transport(e.to_string())),
        }
    }

    /// Match a discovery reply against the pending request.
    ///
    /// Returns false when the reply must not be applied: nothing was asked
    /// for, or it answers a request made before a restart.
    fn accept_reply(&mut self, reply: Pending) -> bool {
        if self.pending != Some(reply) {
            tracing::debug!("Unrequested {:?} reply for {} ignored", reply, self.identity);
            return false;
        }
        self.pending = None;

        if self.restart_deferred {
            self.restart_deferred = false;
            tracing::debug!("Stale {:?} reply for {} discarded", reply, self.identity);
            if self.state == SessionState::Discovering {
                self.request_services();
            }
            return false;
        }
        true
    }

    /// Stop receiving measurements.
    pub fn stop(&mut self) -> Result<(), SensorError> {
        match self.state {
            SessionState::Stopped | SessionState::Failed(_) => return Ok(()),
            SessionState::Active => {
                self.state = SessionState::Stopped;
                tracing::info!("Stopping session for {}", self.identity);
                if let Some(characteristic) = self.measurement {
                    self.link.set_notify(characteristic, false)?;
                }
            }
            _ => {
                tracing::info!("Stopping session for {} while {}", self.identity, self.state);
                self.state = SessionState::Stopped;
            }
        }
        Ok(())
    }

    /// Apply one event from the peripheral.
    pub fn handle_event(&mut self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::ServicesDiscovered(result) => {
                if self.accept_reply(Pending::Services) {
                    self.on_services(result)
                }
            }
            PeripheralEvent::CharacteristicsDiscovered { service, result } => {
                if self.accept_reply(Pending::Characteristics) {
                    self.on_characteristics(service, result)
                }
            }
            PeripheralEvent::NotificationStateChanged {
                characteristic,
                result,
            } => self.on_notification_state(characteristic, result),
            PeripheralEvent::ValueUpdated {
                characteristic,
                result,
            } => self.on_value(characteristic, result),
            PeripheralEvent::Disconnected { error } => self.on_disconnected(error),
        }
    }

    fn on_services(&mut self, result: Result<Vec<Uuid>, String>) {
        if self.state != SessionState::Discovering {
            tracing::debug!("Late service discovery for {} ignored ({})", self.identity, self.state);
            return;
        }

        let services = match result {
            Ok(services) => services,
            Err(e) => return self.fail(SessionError::Transport(e)),
        };

        if !services.contains(&CSC_SERVICE_UUID) {
            return self.fail(SessionError::ServiceNotFound);
        }

        tracing::debug!("Cadence service discovered on {}", self.identity);
        self.state = SessionState::SubscribingCharacteristics;
        match self.link.discover_characteristics(CSC_SERVICE_UUID) {
            Ok(()) => self.pending = Some(Pending::Characteristics),
            Err(e) => self.fail(SessionError::Transport(e.to_string())),
        }
    }

    fn on_characteristics(&mut self, service: Uuid, result: Result<Vec<Uuid>, String>) {
        if self.state != SessionState::SubscribingCharacteristics || service != CSC_SERVICE_UUID {
            tracing::debug!(
                "Late characteristic discovery for {} ignored ({})",
                self.identity,
                self.state
            );
            return;
        }

        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => return self.fail(SessionError::Transport(e)),
        };

        for characteristic in &characteristics {
            if is_csc_characteristic(characteristic) {
                tracing::debug!("CSC characteristic [{}] on {}", characteristic, self.identity);
            }
        }

        if !characteristics.contains(&CSC_MEASUREMENT_UUID) {
            return self.fail(SessionError::NoCharacteristics);
        }

        tracing::debug!("Found measurement characteristic on {}. Subscribing...", self.identity);
        if let Err(e) = self.link.set_notify(CSC_MEASUREMENT_UUID, true) {
            return self.fail(SessionError::Transport(e.to_string()));
        }

        self.measurement = Some(CSC_MEASUREMENT_UUID);
        self.state = SessionState::Active;
        tracing::info!("Sensor {} ready", self.identity);
        self.observer.sensor_ready(&self.identity);
    }

    fn on_notification_state(&mut self, characteristic: Uuid, result: Result<bool, String>) {
        if self.state.is_terminal() || Some(characteristic) != self.measurement {
            return;
        }

        match result {
            Ok(enabled) => tracing::debug!(
                "Notifications for [{}] on {} {}",
                characteristic,
                self.identity,
                if enabled { "enabled" } else { "disabled" }
            ),
            Err(e) => self.fail(SessionError::Transport(format!(
                "Error receiving measurement updates: {}",
                e
            ))),
        }
    }

    fn on_value(&mut self, characteristic: Uuid, result: Result<Vec<u8>, String>) {
        if self.state != SessionState::Active || Some(characteristic) != self.measurement {
            return;
        }

        let data = match result {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Measurement update failed on {}: {}", self.identity, e);
                self.observer
                    .sensor_error(&self.identity, SessionError::UpdateFailed(e));
                return;
            }
        };

        let sample = match decode_with_wheel(&data, self.config.wheel_circumference_mm) {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!("Dropping malformed frame {:02x?} from {}: {}", data, self.identity, e);
                self.observer.sensor_error(&self.identity, e.into());
                return;
            }
        };

        tracing::debug!("{}: {}", self.identity, sample);
        let reading = derive(&sample, self.last_sample.as_ref());
        self.last_sample = Some(sample);

        if let Some(reading) = reading {
            self.observer.sensor_reading(&self.identity, reading);
        }
    }

    fn on_disconnected(&mut self, error: Option<String>) {
        // A dead link answers nothing.
        self.pending = None;
        self.restart_deferred = false;

        if self.state.is_terminal() {
            return;
        }

        let reason = error.unwrap_or_else(|| "peripheral disconnected".to_string());
        self.fail(SessionError::Transport(reason));
    }

    fn fail(&mut self, error: SessionError) {
        tracing::error!("Session for {} failed: {}", self.identity, error);
        self.state = SessionState::Failed(error.clone());
        self.observer.sensor_error(&self.identity, error);
    }
}
