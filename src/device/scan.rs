use indexmap::IndexMap;
use log::{debug, info};

use crate::device::types::PeripheralRef;
use crate::error::SessionError;

/// Results of one discovery run, keyed by identifier in order of first sighting.
#[derive(Debug, Default)]
pub struct ScanSession {
    active: bool,
    peripherals: IndexMap<String, PeripheralRef>,
}

impl ScanSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.active {
            return Err(SessionError::AlreadyRunning);
        }

        self.active = true;
        self.peripherals.clear();
        info!("Scan started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.active {
            self.active = false;
            info!("Scan stopped with {} peripheral(s)", self.peripherals.len());
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Record an advertisement. A repeat sighting keeps its original position; a sighting
    /// without a name or rssi keeps the previously seen value.
    pub fn on_sighting(&mut self, identifier: &str, name: Option<String>, rssi: Option<i16>) {
        self.on_advertisement(identifier, None, name, rssi);
    }

    /// Same as `on_sighting`, also recording the bluetooth address for display.
    pub fn on_advertisement(&mut self, identifier: &str, address: Option<String>, name: Option<String>, rssi: Option<i16>) {
        if !self.active {
            debug!("Dropping sighting of {} after the scan stopped", identifier);
            return;
        }

        match self.peripherals.get_mut(identifier) {
            Some(peripheral) => {
                if address.is_some() {
                    peripheral.address = address;
                }
                if name.is_some() {
                    peripheral.name = name;
                }
                if rssi.is_some() {
                    peripheral.rssi = rssi;
                }
            },
            None => {
                debug!("New peripheral {} {:?} {:?} {:?}", identifier, address, name, rssi);
                self.peripherals.insert(identifier.to_string(), PeripheralRef {
                    identifier: identifier.to_string(),
                    address,
                    name,
                    rssi,
                });
            },
        }
    }

    pub fn results(&self) -> Vec<&PeripheralRef> {
        self.peripherals.values().collect()
    }

    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }

    pub fn get(&self, identifier: &str) -> Option<&PeripheralRef> {
        self.peripherals.get(identifier)
    }

    /// Look up by identifier or by address, ignoring case.
    pub fn find(&self, key: &str) -> Option<&PeripheralRef> {
        self.get(key).or_else(|| self.peripherals.values().find(|peripheral| peripheral.matches(key)))
    }

    /// Zero based position in the result list.
    pub fn get_index(&self, index: usize) -> Option<&PeripheralRef> {
        self.peripherals.get_index(index).map(|(_, peripheral)| peripheral)
    }
}
