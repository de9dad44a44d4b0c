use std::fmt;
use uuid::Uuid;

/// A peripheral seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralRef {
    /// Platform id of the peripheral. Unique per peripheral, unlike the address which
    /// CoreBluetooth reports as all zeros.
    pub identifier: String,
    /// Bluetooth address, e.g. "AA:BB:CC:DD:EE:FF", when the platform exposes it
    pub address: Option<String>,
    pub name: Option<String>,
    /// dBm at the last sighting
    pub rssi: Option<i16>,
}

impl PeripheralRef {
    pub fn new(identifier: impl Into<String>) -> Self {
        PeripheralRef {
            identifier: identifier.into(),
            address: None,
            name: None,
            rssi: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown device")
    }

    /// True if `key` is the identifier or the address, ignoring case.
    pub fn matches(&self, key: &str) -> bool {
        self.identifier.eq_ignore_ascii_case(key)
            || self.address.as_deref().map_or(false, |address| address.eq_ignore_ascii_case(key))
    }
}

impl fmt::Display for PeripheralRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.display_name(), self.identifier)?;
        if let Some(address) = self.address.as_deref().filter(|address| *address != self.identifier) {
            write!(f, " {}", address)?;
        }
        if let Some(rssi) = self.rssi {
            write!(f, " {} dBm", rssi)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicRole {
    LedControl,
    NotifySource,
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            CharacteristicRole::LedControl => "LED control",
            CharacteristicRole::NotifySource => "notification",
        };

        write!(f, "{}", result)
    }
}

/// A characteristic resolved from the GATT table of the connected peripheral.
/// Only `DeviceConnection` creates these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub role: CharacteristicRole,
    pub service_index: usize,
    pub characteristic_index: usize,
    pub service_uuid: Uuid,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    MissingCharacteristic(CharacteristicRole),
    Platform(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::MissingCharacteristic(role) => write!(f, "missing {} characteristic", role),
            FailureReason::Platform(message) => write!(f, "{}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ServicesDiscovering,
    Ready,
    Failed(FailureReason),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::ServicesDiscovering => write!(f, "Discovering services"),
            ConnectionState::Ready => write!(f, "Ready"),
            ConnectionState::Failed(reason) => write!(f, "Failed ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
}

/// A discovered GATT service, characteristics in platform order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// Generation of a connect request. Every `DeviceConnection::connect` gets a new one.
pub type LinkId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Established,
    ServicesResolved(Vec<GattService>),
    Notification { characteristic: Uuid, value: Vec<u8> },
    Lost,
    Failed(String),
}

/// An event raised by the platform backend for one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformEvent {
    pub link: LinkId,
    pub kind: LinkEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Sighting {
        identifier: String,
        address: Option<String>,
        name: Option<String>,
        rssi: Option<i16>,
    },
    Finished,
    Failed(String),
}
