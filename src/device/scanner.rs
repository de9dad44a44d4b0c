use std::time::Duration;
use btleplug::api::{BDAddr, Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::channel::mpsc::Sender;
use futures::stream::select_all;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::device::types::ScanEvent;
use crate::error::DeviceError;

/// All adapters of the host. Having no adapter is an error.
pub async fn find_adapters(manager: &Manager) -> Result<Vec<Adapter>, DeviceError> {
    let adapters = manager.adapters().await?;

    if adapters.is_empty() {
        return Err(DeviceError::NoAdapter);
    }

    Ok(adapters)
}

// CoreBluetooth reports 00:00:00:00:00:00 for every peripheral
fn display_address(address: BDAddr) -> Option<String> {
    if address.into_inner() == [0; 6] {
        None
    } else {
        Some(address.to_string())
    }
}

/// Sightings are keyed on the platform peripheral id, the address is only shown.
fn sighting_event(identifier: String, properties: PeripheralProperties) -> ScanEvent {
    ScanEvent::Sighting {
        identifier,
        address: display_address(properties.address),
        name: properties.local_name,
        rssi: properties.rssi,
    }
}

async fn sighting(adapter: &Adapter, id: &PeripheralId) -> Option<ScanEvent> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(peripheral) => peripheral,
        Err(err) => {
            debug!("Discovered peripheral is gone: {}", err);
            return None;
        },
    };

    match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            None
        },
        Ok(None) => None,
        Ok(Some(properties)) => Some(sighting_event(id.to_string(), properties)),
    }
}

async fn scan(adapters: &[Adapter], duration: Duration, cancel: &CancellationToken, sender: &mut Sender<ScanEvent>) -> Result<(), DeviceError> {
    if adapters.is_empty() {
        return Err(DeviceError::NoAdapter);
    }

    let mut streams = Vec::with_capacity(adapters.len());
    for (index, adapter) in adapters.iter().enumerate() {
        info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        let events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;
        streams.push(events.map(move |event| (index, event)).boxed());
    }

    let mut events = select_all(streams);
    let deadline = sleep(duration);
    tokio::pin!(deadline);

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            _ = &mut deadline => {
                debug!("Scan duration elapsed");
                break 'mainloop;
            },
            event = events.next() => match event {
                None => break 'mainloop,
                Some((index, CentralEvent::DeviceDiscovered(id))) | Some((index, CentralEvent::DeviceUpdated(id))) => {
                    if let Some(sighting) = sighting(&adapters[index], &id).await {
                        if sender.send(sighting).await.is_err() {
                            break 'mainloop;
                        }
                    }
                },
                Some(_) => {},
            },
        }
    }

    Ok(())
}

/// Scan on every adapter for `duration` or until `cancel`, forwarding sightings to `sender`.
/// The last event sent is always `Finished` or `Failed`.
pub fn scan_task(adapters: Vec<Adapter>, duration: Duration, cancel: CancellationToken, mut sender: Sender<ScanEvent>) -> JoinHandle<()> {
    spawn(async move {
        let last_event = match scan(&adapters, duration, &cancel, &mut sender).await {
            Ok(()) => ScanEvent::Finished,
            Err(err) => {
                warn!("Scanning failed {:?}", err);
                ScanEvent::Failed(err.to_string())
            },
        };

        for adapter in &adapters {
            if let Err(err) = adapter.stop_scan().await {
                warn!("Failed to stop scanning: {}", err);
            }
        }

        if sender.send(last_event).await.is_err() {
            debug!("Scan event receiver is gone");
        }
    })
}
