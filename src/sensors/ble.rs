//! btleplug transport for the CSC session and coordinator.
//!
//! Every request spawns a tokio task that performs the BLE operation and
//! posts the outcome as a [`LinkEvent`] on one unbounded channel. The
//! application drains that channel in order, which gives the session and
//! coordinator a single sequential event stream.

use crate::sensors::csc::CSC_SERVICE_UUID;
use crate::sensors::link::{AdapterEvent, CentralLink, LinkEvent, PeripheralEvent, PeripheralLink};
use crate::sensors::types::{AdapterState, SensorError, SensorIdentity};
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// A peripheral seen by the adapter.
#[derive(Clone)]
struct KnownPeripheral {
    peripheral: Peripheral,
    identity: SensorIdentity,
}

type PeripheralCache = Arc<Mutex<HashMap<String, KnownPeripheral>>>;

fn map_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        _ => AdapterState::Unknown,
    }
}

fn send(tx: &UnboundedSender<LinkEvent>, event: LinkEvent) {
    if tx.send(event).is_err() {
        tracing::trace!("Link event receiver dropped");
    }
}

/// btleplug-backed [`CentralLink`].
pub struct BleCentral {
    adapter: Adapter,
    runtime: Handle,
    events: UnboundedSender<LinkEvent>,
    state: Arc<Mutex<AdapterState>>,
    known: PeripheralCache,
    scanning: Arc<AtomicBool>,
}

impl BleCentral {
    /// Open the first Bluetooth adapter and start pumping its events.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn new(events: UnboundedSender<LinkEvent>) -> Result<Self, SensorError> {
        tracing::info!("Initializing BLE central");

        let manager = Manager::new()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapter = manager
            .adapters()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?
            .into_iter()
            .next()
            .ok_or(SensorError::AdapterNotFound)?;

        // Adapters that cannot report their state are usable as soon as they exist.
        let state = match adapter.adapter_state().await {
            Ok(state) => map_state(state),
            Err(e) => {
                tracing::debug!("Adapter state unavailable ({}), assuming powered on", e);
                AdapterState::PoweredOn
            }
        };

        let known: PeripheralCache = Arc::new(Mutex::new(HashMap::new()));
        if let Ok(peripherals) = adapter.peripherals().await {
            for peripheral in peripherals {
                let identity = identify(&peripheral).await;
                if let Ok(mut known) = known.lock() {
                    known.insert(
                        identity.device_id.clone(),
                        KnownPeripheral {
                            peripheral,
                            identity,
                        },
                    );
                }
            }
        }

        let central = Self {
            adapter,
            runtime: Handle::current(),
            events,
            state: Arc::new(Mutex::new(state)),
            known,
            scanning: Arc::new(AtomicBool::new(false)),
        };
        central.spawn_event_pump().await?;

        tracing::info!("BLE adapter initialized ({})", state);
        Ok(central)
    }

    async fn spawn_event_pump(&self) -> Result<(), SensorError> {
        let mut stream = self
            .adapter
            .events()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapter = self.adapter.clone();
        let tx = self.events.clone();
        let state = self.state.clone();
        let known = self.known.clone();

        self.runtime.spawn(async move {
            while let Some(event) = stream.next().await {
                match event {
                    CentralEvent::StateUpdate(central_state) => {
                        let mapped = map_state(central_state);
                        if let Ok(mut state) = state.lock() {
                            *state = mapped;
                        }
                        send(&tx, LinkEvent::Adapter(AdapterEvent::StateChanged(mapped)));
                    }
                    CentralEvent::DeviceDiscovered(id) => {
                        let peripheral = match adapter.peripheral(&id).await {
                            Ok(p) => p,
                            Err(_) => continue,
                        };
                        let Some(services) = peripheral
                            .properties()
                            .await
                            .ok()
                            .flatten()
                            .map(|p| p.services)
                        else {
                            continue;
                        };
                        if !services.contains(&CSC_SERVICE_UUID) {
                            continue;
                        }

                        let identity = identify(&peripheral).await;
                        if let Ok(mut known) = known.lock() {
                            known.insert(
                                identity.device_id.clone(),
                                KnownPeripheral {
                                    peripheral,
                                    identity: identity.clone(),
                                },
                            );
                        }
                        send(&tx, LinkEvent::Adapter(AdapterEvent::Discovered(identity)));
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        let device_id = id.to_string();
                        let identity = known
                            .lock()
                            .ok()
                            .and_then(|known| known.get(&device_id).map(|k| k.identity.clone()))
                            .unwrap_or_else(|| SensorIdentity::new(device_id.clone()));

                        send(
                            &tx,
                            LinkEvent::Peripheral {
                                device_id,
                                event: PeripheralEvent::Disconnected { error: None },
                            },
                        );
                        send(
                            &tx,
                            LinkEvent::Adapter(AdapterEvent::Disconnected {
                                identity,
                                error: None,
                            }),
                        );
                    }
                    _ => {}
                }
            }
            tracing::debug!("Adapter event stream ended");
        });

        Ok(())
    }

    fn lookup(&self, device_id: &str) -> Option<KnownPeripheral> {
        self.known.lock().ok()?.get(device_id).cloned()
    }
}

/// Build an identity from a peripheral's id and advertised name.
async fn identify(peripheral: &Peripheral) -> SensorIdentity {
    let identity = SensorIdentity::new(peripheral.id().to_string());
    match peripheral.properties().await.ok().flatten().and_then(|p| p.local_name) {
        Some(name) => identity.with_name(name),
        None => identity,
    }
}

impl CentralLink for BleCentral {
    type Peripheral = BlePeripheral;

    fn adapter_state(&self) -> AdapterState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or_default()
    }

    fn start_scan(&mut self, services: &[Uuid]) -> Result<(), SensorError> {
        let adapter = self.adapter.clone();
        let filter = ScanFilter {
            services: services.to_vec(),
        };

        let tx = self.events.clone();
        let scanning = self.scanning.clone();

        scanning.store(true, Ordering::SeqCst);
        self.runtime.spawn(async move {
            if let Err(e) = adapter.start_scan(filter).await {
                scanning.store(false, Ordering::SeqCst);
                send(
                    &tx,
                    LinkEvent::Adapter(AdapterEvent::RequestFailed(SensorError::ScanFailed(
                        e.to_string(),
                    ))),
                );
            }
        });
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), SensorError> {
        let adapter = self.adapter.clone();
        let tx = self.events.clone();

        self.scanning.store(false, Ordering::SeqCst);
        self.runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                send(
                    &tx,
                    LinkEvent::Adapter(AdapterEvent::RequestFailed(SensorError::ScanFailed(
                        e.to_string(),
                    ))),
                );
            }
        });
        Ok(())
    }

    fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    fn connect(&mut self, identity: &SensorIdentity) -> Result<(), SensorError> {
        let known = self
            .lookup(&identity.device_id)
            .ok_or_else(|| SensorError::SensorNotFound(identity.device_id.clone()))?;
        let tx = self.events.clone();
        let identity = known.identity.clone();

        self.runtime.spawn(async move {
            let event = match known.peripheral.connect().await {
                Ok(()) => AdapterEvent::Connected(identity),
                Err(e) => AdapterEvent::ConnectFailed {
                    identity,
                    error: e.to_string(),
                },
            };
            send(&tx, LinkEvent::Adapter(event));
        });
        Ok(())
    }

    fn cancel_connection(&mut self, identity: &SensorIdentity) -> Result<(), SensorError> {
        let Some(known) = self.lookup(&identity.device_id) else {
            return Ok(());
        };

        let tx = self.events.clone();

        self.runtime.spawn(async move {
            if known.peripheral.is_connected().await.unwrap_or(false) {
                if let Err(e) = known.peripheral.disconnect().await {
                    let error = format!("failed to disconnect {}: {}", known.identity, e);
                    send(
                        &tx,
                        LinkEvent::Adapter(AdapterEvent::RequestFailed(SensorError::BleError(
                            error,
                        ))),
                    );
                }
            }
        });
        Ok(())
    }

    fn retrieve(&self, device_id: &str) -> Option<SensorIdentity> {
        self.lookup(device_id).map(|known| known.identity)
    }

    fn peripheral(&self, identity: &SensorIdentity) -> Option<BlePeripheral> {
        let known = self.lookup(&identity.device_id)?;
        Some(BlePeripheral {
            peripheral: known.peripheral,
            identity: known.identity,
            runtime: self.runtime.clone(),
            events: self.events.clone(),
            notifications_pumped: false,
        })
    }
}

/// btleplug-backed [`PeripheralLink`].
pub struct BlePeripheral {
    peripheral: Peripheral,
    identity: SensorIdentity,
    runtime: Handle,
    events: UnboundedSender<LinkEvent>,
    notifications_pumped: bool,
}

impl BlePeripheral {
    fn emit(tx: &UnboundedSender<LinkEvent>, device_id: &str, event: PeripheralEvent) {
        send(
            tx,
            LinkEvent::Peripheral {
                device_id: device_id.to_string(),
                event,
            },
        );
    }
}

impl PeripheralLink for BlePeripheral {
    fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    fn discover_services(&mut self, _services: &[Uuid]) -> Result<(), SensorError> {
        let peripheral = self.peripheral.clone();
        let tx = self.events.clone();
        let device_id = self.identity.device_id.clone();

        self.runtime.spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(peripheral.services().iter().map(|s| s.uuid).collect()),
                Err(e) => Err(e.to_string()),
            };
            Self::emit(&tx, &device_id, PeripheralEvent::ServicesDiscovered(result));
        });
        Ok(())
    }

    fn discover_characteristics(&mut self, service: Uuid) -> Result<(), SensorError> {
        let peripheral = self.peripheral.clone();
        let tx = self.events.clone();
        let device_id = self.identity.device_id.clone();

        // btleplug resolves characteristics together with services.
        self.runtime.spawn(async move {
            let characteristics = peripheral
                .services()
                .into_iter()
                .find(|s| s.uuid == service)
                .map(|s| s.characteristics.iter().map(|c| c.uuid).collect())
                .unwrap_or_default();
            Self::emit(
                &tx,
                &device_id,
                PeripheralEvent::CharacteristicsDiscovered {
                    service,
                    result: Ok(characteristics),
                },
            );
        });
        Ok(())
    }

    fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> Result<(), SensorError> {
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or_else(|| {
                SensorError::SubscriptionFailed(format!("unknown characteristic {}", characteristic))
            })?;

        let start_pump = enabled && !self.notifications_pumped;
        self.notifications_pumped |= start_pump;

        let peripheral = self.peripheral.clone();
        let tx = self.events.clone();
        let device_id = self.identity.device_id.clone();
        let runtime = self.runtime.clone();

        self.runtime.spawn(async move {
            if start_pump {
                match peripheral.notifications().await {
                    Ok(mut stream) => {
                        let tx = tx.clone();
                        let device_id = device_id.clone();
                        runtime.spawn(async move {
                            while let Some(notification) = stream.next().await {
                                Self::emit(
                                    &tx,
                                    &device_id,
                                    PeripheralEvent::ValueUpdated {
                                        characteristic: notification.uuid,
                                        result: Ok(notification.value),
                                    },
                                );
                            }
                            tracing::debug!("Notification stream for {} ended", device_id);
                        });
                    }
                    Err(e) => {
                        Self::emit(
                            &tx,
                            &device_id,
                            PeripheralEvent::NotificationStateChanged {
                                characteristic,
                                result: Err(e.to_string()),
                            },
                        );
                        return;
                    }
                }
            }

            let outcome = if enabled {
                peripheral.subscribe(&target).await
            } else {
                peripheral.unsubscribe(&target).await
            };
            Self::emit(
                &tx,
                &device_id,
                PeripheralEvent::NotificationStateChanged {
                    characteristic,
                    result: outcome.map(|()| enabled).map_err(|e| e.to_string()),
                },
            );
        });
        Ok(())
    }
}
