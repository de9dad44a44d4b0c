use std::sync::{Arc, Mutex};
use std::time::Duration;
use btleplug::api::{Central, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::channel::mpsc::Sender;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::device::platform::BlePlatform;
use crate::device::types::{
    CharacteristicHandle, GattCharacteristic, GattService, LinkEvent, LinkId, PeripheralRef, PlatformEvent,
};
use crate::error::DeviceError;

#[derive(Debug, Clone, Copy)]
struct Timing {
    connect_deadline: Duration,
    write_deadline: Duration,
    link_poll_delay: Duration,
    is_connected_deadline: Duration,
    write_type: WriteType,
}

impl From<&Config> for Timing {
    fn from(config: &Config) -> Self {
        Timing {
            connect_deadline: config.connect_deadline(),
            write_deadline: config.write_deadline(),
            link_poll_delay: config.link_poll_delay(),
            is_connected_deadline: config.is_connected_deadline(),
            write_type: if config.write_with_response { WriteType::WithResponse } else { WriteType::WithoutResponse },
        }
    }
}

struct ActiveLink {
    link: LinkId,
    // None until the connect request completes
    peripheral: Option<Peripheral>,
    cancel: CancellationToken,
}

/// `BlePlatform` on top of btleplug. Requests run as tokio tasks, outcomes are sent to `events`.
///
/// Must be used from within a tokio runtime.
pub struct BtleplugPlatform {
    adapters: Vec<Adapter>,
    events: Sender<PlatformEvent>,
    timing: Timing,
    active: Arc<Mutex<Option<ActiveLink>>>,
}

async fn emit(events: &mut Sender<PlatformEvent>, link: LinkId, kind: LinkEvent) {
    if let Err(err) = events.send(PlatformEvent { link, kind }).await {
        debug!("Platform event receiver is gone: {}", err);
    }
}

/// Find the peripheral whose platform id is `key`, or failing that whose address is `key`.
async fn find_peripheral(adapters: &[Adapter], key: &str) -> Result<Peripheral, DeviceError> {
    let mut by_address = None;

    for adapter in adapters {
        let peripherals = match adapter.peripherals().await {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to query BLE adapter for peripherals: {}", err);
                continue;
            },
        };

        for peripheral in peripherals {
            if peripheral.id().to_string() == key {
                info!("Using peripheral {}", key);
                return Ok(peripheral);
            }

            if by_address.is_some() {
                continue;
            }

            match peripheral.properties().await {
                Err(err) => {
                    warn!("Could not query peripheral for properties: {:?}", err);
                },
                Ok(None) => {},
                Ok(Some(properties)) => {
                    if properties.address.to_string().eq_ignore_ascii_case(key) {
                        info!(
                            "Using peripheral {} {:?} {}",
                            properties.address,
                            properties.address_type,
                            properties.local_name.unwrap_or(String::from("NONE")),
                        );
                        by_address = Some(peripheral);
                    }
                },
            }
        }
    }

    by_address.ok_or_else(|| DeviceError::PeripheralNotFound(key.to_string()))
}

async fn connect_peripheral(adapters: &[Adapter], identifier: &str) -> Result<Peripheral, DeviceError> {
    let peripheral = find_peripheral(adapters, identifier).await?;

    info!("Connecting to peripheral...");
    peripheral.connect().await?;
    Ok(peripheral)
}

async fn discover_services(peripheral: &Peripheral) -> Result<Vec<GattService>, DeviceError> {
    info!("Connected; Discovering services...");
    peripheral.discover_services().await?;

    // btleplug orders services and characteristics by uuid
    let services = peripheral.services()
        .into_iter()
        .map(|service| GattService {
            uuid: service.uuid,
            characteristics: service.characteristics
                .iter()
                .map(|characteristic| GattCharacteristic { uuid: characteristic.uuid })
                .collect(),
        })
        .collect();

    Ok(services)
}

fn find_characteristic(peripheral: &Peripheral, handle: &CharacteristicHandle) -> Result<Characteristic, DeviceError> {
    peripheral.characteristics()
        .into_iter()
        .find(|characteristic| characteristic.uuid == handle.uuid && characteristic.service_uuid == handle.service_uuid)
        .ok_or(DeviceError::CharacteristicNotFound(handle.uuid))
}

fn read_notifications_task(cancel: CancellationToken, peripheral: Peripheral, link: LinkId, mut events: Sender<PlatformEvent>) {
    spawn(async move {
        let mut notification_stream = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to open notification stream: {}", err);
                return;
            },
        };

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                data = notification_stream.next() => match data {
                    Some(data) => {
                        let kind = LinkEvent::Notification { characteristic: data.uuid, value: data.value };
                        emit(&mut events, link, kind).await;
                    },
                    None => break 'mainloop,
                },
            }
        }

        debug!("Notification stream of link {} closed", link);
    });
}

/// Take `link` out of `active` and stop its tasks. Returns None when another link (or none) is active.
fn release_link(active: &Mutex<Option<ActiveLink>>, link: LinkId) -> Option<ActiveLink> {
    let released = {
        let mut active = active.lock().expect("Failed to lock active link");
        let is_current = active.as_ref().map_or(false, |current| current.link == link);
        if is_current { active.take() } else { None }
    };

    if let Some(released) = &released {
        released.cancel.cancel();
    }
    released
}

fn watch_link_task(
    cancel: CancellationToken,
    active: Arc<Mutex<Option<ActiveLink>>>,
    peripheral: Peripheral,
    link: LinkId,
    timing: Timing,
    mut events: Sender<PlatformEvent>,
) {
    spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(timing.link_poll_delay) => {},
            }

            let connected = tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(timing.is_connected_deadline) => {
                    warn!("Checking for connection status took too long");
                    false
                },
                result = peripheral.is_connected() => match result {
                    Err(err) => {
                        warn!("Error checking for connection state: {:?}", err);
                        false
                    },
                    Ok(connected) => connected,
                },
            };

            if !connected {
                info!("Link {} lost", link);
                release_link(&active, link);
                emit(&mut events, link, LinkEvent::Lost).await;
                return;
            }
        }
    });
}

impl BtleplugPlatform {
    pub fn new(adapters: Vec<Adapter>, events: Sender<PlatformEvent>, config: &Config) -> Self {
        BtleplugPlatform {
            adapters,
            events,
            timing: Timing::from(config),
            active: Arc::new(Mutex::new(None)),
        }
    }

    fn peripheral(&self, link: LinkId) -> Result<Peripheral, DeviceError> {
        let active = self.active.lock().expect("Failed to lock active link");

        match active.as_ref() {
            Some(ActiveLink { link: active_link, peripheral: Some(peripheral), .. }) if *active_link == link => {
                Ok(peripheral.clone())
            },
            _ => Err(DeviceError::NoLink),
        }
    }
}

impl BlePlatform for BtleplugPlatform {
    fn connect(&mut self, link: LinkId, peripheral: &PeripheralRef) -> Result<(), DeviceError> {
        if self.adapters.is_empty() {
            return Err(DeviceError::NoAdapter);
        }

        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock().expect("Failed to lock active link");
            if let Some(previous) = active.take() {
                previous.cancel.cancel();
            }
            *active = Some(ActiveLink { link, peripheral: None, cancel: cancel.clone() });
        }

        let adapters = self.adapters.clone();
        let identifier = peripheral.identifier.clone();
        let active = self.active.clone();
        let timing = self.timing;
        let mut events = self.events.clone();

        spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Connect request of link {} cancelled", link);
                    return;
                },
                _ = sleep(timing.connect_deadline) => Err(DeviceError::Deadline("Connecting to peripheral")),
                result = connect_peripheral(&adapters, &identifier) => result,
            };

            let peripheral = match result {
                Ok(peripheral) => peripheral,
                Err(err) => {
                    warn!("Connecting to peripheral failed: {}", err);
                    emit(&mut events, link, LinkEvent::Failed(err.to_string())).await;
                    return;
                },
            };

            let still_wanted = {
                let mut active = active.lock().expect("Failed to lock active link");
                match active.as_mut() {
                    Some(current) if current.link == link && !cancel.is_cancelled() => {
                        current.peripheral = Some(peripheral.clone());
                        true
                    },
                    _ => false,
                }
            };

            if !still_wanted {
                info!("Link {} was released while connecting, disconnecting", link);
                if let Err(err) = peripheral.disconnect().await {
                    warn!("Failed to disconnect peripheral: {}", err);
                }
                return;
            }

            read_notifications_task(cancel.clone(), peripheral.clone(), link, events.clone());
            watch_link_task(cancel, active, peripheral, link, timing, events.clone());
            emit(&mut events, link, LinkEvent::Established).await;
        });

        Ok(())
    }

    fn discover_services(&mut self, link: LinkId) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(link)?;
        let mut events = self.events.clone();

        spawn(async move {
            let kind = match discover_services(&peripheral).await {
                Ok(services) => LinkEvent::ServicesResolved(services),
                Err(err) => {
                    warn!("Discovering services failed: {}", err);
                    LinkEvent::Failed(err.to_string())
                },
            };
            emit(&mut events, link, kind).await;
        });

        Ok(())
    }

    fn write(&mut self, link: LinkId, characteristic: &CharacteristicHandle, value: &[u8]) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(link)?;
        let characteristic = find_characteristic(&peripheral, characteristic)?;
        let value = value.to_vec();
        let timing = self.timing;

        spawn(async move {
            let fut = peripheral.write(&characteristic, &value, timing.write_type);

            tokio::select! {
                _ = sleep(timing.write_deadline) => {
                    warn!("Sending to characteristic {} took too long", characteristic.uuid);
                }
                result = fut => {
                    if let Err(err) = result {
                        warn!("Failed to send to characteristic {}: {:?}", characteristic.uuid, err);
                    }
                }
            };
        });

        Ok(())
    }

    fn set_notifications(&mut self, link: LinkId, characteristic: &CharacteristicHandle, enabled: bool) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(link)?;
        let characteristic = find_characteristic(&peripheral, characteristic)?;
        let timing = self.timing;

        spawn(async move {
            let result = tokio::select! {
                _ = sleep(timing.write_deadline) => Err(DeviceError::Deadline("Changing the subscription")),
                result = async {
                    if enabled {
                        peripheral.subscribe(&characteristic).await
                    } else {
                        peripheral.unsubscribe(&characteristic).await
                    }
                } => result.map_err(DeviceError::from),
            };

            match result {
                Ok(()) => debug!("Subscription to {} is now {}", characteristic.uuid, enabled),
                Err(err) => warn!("Failed to change subscription to {}: {}", characteristic.uuid, err),
            }
        });

        Ok(())
    }

    fn disconnect(&mut self, link: LinkId) {
        let Some(released) = release_link(&self.active, link) else {
            debug!("Link {} is not active", link);
            return;
        };

        if let Some(peripheral) = released.peripheral {
            let mut events = self.events.clone();
            spawn(async move {
                if let Err(err) = peripheral.disconnect().await {
                    warn!("Failed to disconnect peripheral: {}", err);
                }
                emit(&mut events, link, LinkEvent::Lost).await;
            });
        }
    }
}
