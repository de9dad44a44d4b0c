use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::device::constants::{led_command_value, CHARACTERISTIC_INDEX, LED_COUNT, LED_SERVICE_INDEX, NOTIFY_SERVICE_INDEX};
use crate::device::counter::NotificationCounter;
use crate::device::platform::BlePlatform;
use crate::device::types::{
    CharacteristicHandle, CharacteristicRole, ConnectionState, FailureReason, GattService, LinkEvent, LinkId,
    PeripheralRef, PlatformEvent,
};
use crate::error::SessionError;

/// Where the two application characteristics sit in the discovered GATT table.
///
/// The peripheral firmware does not advertise stable UUIDs for them, so they are found by
/// position. A peripheral with a different table fails with a missing characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GattLayout {
    pub led_service_index: usize,
    pub notify_service_index: usize,
    pub characteristic_index: usize,
}

impl Default for GattLayout {
    fn default() -> Self {
        GattLayout {
            led_service_index: LED_SERVICE_INDEX,
            notify_service_index: NOTIFY_SERVICE_INDEX,
            characteristic_index: CHARACTERISTIC_INDEX,
        }
    }
}

impl GattLayout {
    fn service_index(&self, role: CharacteristicRole) -> usize {
        match role {
            CharacteristicRole::LedControl => self.led_service_index,
            CharacteristicRole::NotifySource => self.notify_service_index,
        }
    }

    pub fn resolve(&self, services: &[GattService], role: CharacteristicRole) -> Option<CharacteristicHandle> {
        let service_index = self.service_index(role);
        let service = services.get(service_index)?;
        let characteristic = service.characteristics.get(self.characteristic_index)?;

        Some(CharacteristicHandle {
            role,
            service_index,
            characteristic_index: self.characteristic_index,
            service_uuid: service.uuid,
            uuid: characteristic.uuid,
        })
    }
}

/// The link to one peripheral.
///
/// Platform events must be applied by the single owner of this value, in the order the
/// platform raised them.
pub struct DeviceConnection<P: BlePlatform> {
    platform: P,
    layout: GattLayout,
    state: ConnectionState,
    // 0 until the first connect
    link: LinkId,
    peripheral: Option<PeripheralRef>,
    led_char: Option<CharacteristicHandle>,
    notify_char: Option<CharacteristicHandle>,
    notifications_enabled: bool,
    counter: NotificationCounter,
}

impl<P: BlePlatform> DeviceConnection<P> {
    pub fn new(platform: P, layout: GattLayout) -> Self {
        DeviceConnection {
            platform,
            layout,
            state: ConnectionState::Disconnected,
            link: 0,
            peripheral: None,
            led_char: None,
            notify_char: None,
            notifications_enabled: false,
            counter: NotificationCounter::new(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    /// The peripheral of the current or last link.
    pub fn peripheral(&self) -> Option<&PeripheralRef> {
        self.peripheral.as_ref()
    }

    pub fn characteristic(&self, role: CharacteristicRole) -> Option<&CharacteristicHandle> {
        match role {
            CharacteristicRole::LedControl => self.led_char.as_ref(),
            CharacteristicRole::NotifySource => self.notify_char.as_ref(),
        }
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled
    }

    pub fn notification_count(&self) -> u64 {
        self.counter.value()
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn connect(&mut self, peripheral: PeripheralRef) -> Result<(), SessionError> {
        if self.state != ConnectionState::Disconnected {
            return Err(SessionError::AlreadyConnected);
        }

        let link = self.link + 1;
        info!("Connecting to peripheral {} (link {})", peripheral, link);
        self.platform.connect(link, &peripheral)?;

        self.link = link;
        self.peripheral = Some(peripheral);
        self.counter.reset();
        self.transition(ConnectionState::Connecting);
        Ok(())
    }

    pub fn on_link_established(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!("Ignoring link established in state {}", self.state);
            return;
        }

        self.transition(ConnectionState::ServicesDiscovering);

        if let Err(err) = self.platform.discover_services(self.link) {
            warn!("Requesting service discovery failed: {}", err);
            self.transition(ConnectionState::Failed(FailureReason::Platform(err.to_string())));
        }
    }

    pub fn on_services_resolved(&mut self, services: &[GattService]) -> Result<(), SessionError> {
        if self.state != ConnectionState::ServicesDiscovering {
            debug!("Ignoring resolved services in state {}", self.state);
            return Ok(());
        }

        debug!("Peripheral has {} service(s)", services.len());

        let led_char = self.layout.resolve(services, CharacteristicRole::LedControl);
        let notify_char = self.layout.resolve(services, CharacteristicRole::NotifySource);

        match (led_char, notify_char) {
            (Some(led_char), Some(notify_char)) => {
                info!("LED characteristic {}, notification characteristic {}", led_char.uuid, notify_char.uuid);
                self.led_char = Some(led_char);
                self.notify_char = Some(notify_char);
                self.transition(ConnectionState::Ready);
                Ok(())
            },
            (led_char, _) => {
                let role = match led_char {
                    None => CharacteristicRole::LedControl,
                    Some(_) => CharacteristicRole::NotifySource,
                };
                warn!("Peripheral has no {} characteristic at the expected position", role);
                self.transition(ConnectionState::Failed(FailureReason::MissingCharacteristic(role)));
                Err(SessionError::MissingCharacteristic(role))
            },
        }
    }

    /// Returns `LinkLost` if this ended a link, nothing if already disconnected.
    pub fn on_link_lost(&mut self) -> Result<(), SessionError> {
        if self.state == ConnectionState::Disconnected {
            debug!("Ignoring link lost while disconnected");
            return Ok(());
        }

        warn!("Connection lost");
        self.release();
        Err(SessionError::LinkLost)
    }

    /// Counts one event while ready, the payload is not inspected.
    pub fn on_notification(&mut self, payload: &[u8]) {
        if !self.is_ready() {
            debug!("Ignoring notification in state {}", self.state);
            return;
        }

        let count = self.counter.increment();
        debug!("Notification {} received ({} byte(s))", count, payload.len());
    }

    /// Requests the write that sets LED `index` and returns the byte that was sent.
    pub fn write_led(&mut self, index: usize, on: bool) -> Result<u8, SessionError> {
        let led_char = match (&self.state, &self.led_char) {
            (ConnectionState::Ready, Some(led_char)) => led_char,
            _ => return Err(SessionError::NotReady),
        };

        if index >= LED_COUNT {
            return Err(SessionError::InvalidLedIndex(index));
        }

        let value = led_command_value(index, on);
        debug!("Writing {:#04x} to LED characteristic", value);
        self.platform.write(self.link, led_char, &[value])?;
        Ok(value)
    }

    pub fn set_notifications(&mut self, enabled: bool) -> Result<(), SessionError> {
        let notify_char = match (&self.state, &self.notify_char) {
            (ConnectionState::Ready, Some(notify_char)) => notify_char,
            _ => return Err(SessionError::NotReady),
        };

        info!("{} notifications", if enabled { "Enabling" } else { "Disabling" });
        self.platform.set_notifications(self.link, notify_char, enabled)?;
        self.notifications_enabled = enabled;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }

        info!("Disconnecting (link {})", self.link);
        self.platform.disconnect(self.link);
        self.release();
    }

    /// Apply one platform event. Events of an earlier link are dropped.
    pub fn handle_event(&mut self, event: PlatformEvent) -> Result<(), SessionError> {
        if event.link != self.link {
            debug!("Dropping event of stale link {} (current {}): {:?}", event.link, self.link, event.kind);
            return Ok(());
        }

        match event.kind {
            LinkEvent::Established => {
                self.on_link_established();
                Ok(())
            },
            LinkEvent::ServicesResolved(services) => self.on_services_resolved(&services),
            LinkEvent::Notification { characteristic, value } => {
                let from_notify_char = self.notify_char
                    .as_ref()
                    .map_or(false, |notify_char| notify_char.uuid == characteristic);

                if from_notify_char {
                    self.on_notification(&value);
                } else {
                    debug!("Ignoring notification from characteristic {}", characteristic);
                }
                Ok(())
            },
            LinkEvent::Lost => self.on_link_lost(),
            LinkEvent::Failed(message) => {
                match self.state {
                    ConnectionState::Connecting | ConnectionState::ServicesDiscovering => {
                        warn!("Connecting to peripheral failed: {}", message);
                        self.transition(ConnectionState::Failed(FailureReason::Platform(message)));
                    },
                    _ => debug!("Ignoring platform failure in state {}: {}", self.state, message),
                }
                Ok(())
            },
        }
    }

    fn release(&mut self) {
        self.led_char = None;
        self.notify_char = None;
        self.notifications_enabled = false;
        self.transition(ConnectionState::Disconnected);
    }

    fn transition(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state {} -> {}", self.state, state);
            self.state = state;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use uuid::Uuid;
    use crate::device::types::GattCharacteristic;
    use crate::error::DeviceError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Request {
        Connect(LinkId, String),
        DiscoverServices(LinkId),
        Write(LinkId, Uuid, Vec<u8>),
        SetNotifications(LinkId, Uuid, bool),
        Disconnect(LinkId),
    }

    #[derive(Debug, Default)]
    pub struct RecordingPlatform {
        pub requests: Vec<Request>,
        pub reject: bool,
    }

    impl RecordingPlatform {
        fn check(&self) -> Result<(), DeviceError> {
            if self.reject {
                return Err(DeviceError::NoLink);
            }
            Ok(())
        }
    }

    impl BlePlatform for RecordingPlatform {
        fn connect(&mut self, link: LinkId, peripheral: &PeripheralRef) -> Result<(), DeviceError> {
            self.check()?;
            self.requests.push(Request::Connect(link, peripheral.identifier.clone()));
            Ok(())
        }

        fn discover_services(&mut self, link: LinkId) -> Result<(), DeviceError> {
            self.check()?;
            self.requests.push(Request::DiscoverServices(link));
            Ok(())
        }

        fn write(&mut self, link: LinkId, characteristic: &CharacteristicHandle, value: &[u8]) -> Result<(), DeviceError> {
            self.check()?;
            self.requests.push(Request::Write(link, characteristic.uuid, value.to_vec()));
            Ok(())
        }

        fn set_notifications(&mut self, link: LinkId, characteristic: &CharacteristicHandle, enabled: bool) -> Result<(), DeviceError> {
            self.check()?;
            self.requests.push(Request::SetNotifications(link, characteristic.uuid, enabled));
            Ok(())
        }

        fn disconnect(&mut self, link: LinkId) {
            self.requests.push(Request::Disconnect(link));
        }
    }

    pub fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    /// Four services with one characteristic each; characteristic uuid = service uuid + 0x100.
    pub fn four_services() -> Vec<GattService> {
        (1..=4u128)
            .map(|n| GattService {
                uuid: uuid(n),
                characteristics: vec![GattCharacteristic { uuid: uuid(n + 0x100) }],
            })
            .collect()
    }

    pub const LED_UUID: u128 = 0x103;
    pub const NOTIFY_UUID: u128 = 0x104;

    fn connection() -> DeviceConnection<RecordingPlatform> {
        DeviceConnection::new(RecordingPlatform::default(), GattLayout::default())
    }

    fn ready_connection() -> DeviceConnection<RecordingPlatform> {
        let mut connection = connection();
        connection.connect(PeripheralRef::new("AA:BB")).unwrap();
        connection.on_link_established();
        connection.on_services_resolved(&four_services()).unwrap();
        assert!(connection.is_ready());
        connection
    }

    fn assert_not_ready(connection: &mut DeviceConnection<RecordingPlatform>) {
        assert!(matches!(connection.write_led(0, true), Err(SessionError::NotReady)));
        assert!(matches!(connection.set_notifications(true), Err(SessionError::NotReady)));
    }

    #[test]
    fn test_happy_path() {
        let connection = ready_connection();

        assert_eq!(connection.platform().requests, vec![
            Request::Connect(1, "AA:BB".to_string()),
            Request::DiscoverServices(1),
        ]);

        let led_char = connection.characteristic(CharacteristicRole::LedControl).unwrap();
        assert_eq!(led_char.service_index, 2);
        assert_eq!(led_char.characteristic_index, 0);
        assert_eq!(led_char.uuid, uuid(LED_UUID));

        let notify_char = connection.characteristic(CharacteristicRole::NotifySource).unwrap();
        assert_eq!(notify_char.service_index, 3);
        assert_eq!(notify_char.uuid, uuid(NOTIFY_UUID));
    }

    #[test]
    fn test_not_ready_in_every_other_state() {
        let mut connection = connection();
        assert_not_ready(&mut connection);

        connection.connect(PeripheralRef::new("AA:BB")).unwrap();
        assert_eq!(connection.state(), &ConnectionState::Connecting);
        assert_not_ready(&mut connection);

        connection.on_link_established();
        assert_eq!(connection.state(), &ConnectionState::ServicesDiscovering);
        assert_not_ready(&mut connection);

        let _ = connection.on_services_resolved(&four_services()[..3]);
        assert!(matches!(connection.state(), ConnectionState::Failed(_)));
        assert_not_ready(&mut connection);

        // nothing reached the platform besides connect and discovery
        assert_eq!(connection.platform().requests.len(), 2);
    }

    #[test]
    fn test_write_led_value_encoding() {
        let mut connection = ready_connection();

        assert_eq!(connection.write_led(1, true).unwrap(), 2);
        assert_eq!(connection.write_led(1, false).unwrap(), 0);
        assert_eq!(connection.write_led(2, true).unwrap(), 3);
        assert!(matches!(connection.write_led(3, true), Err(SessionError::InvalidLedIndex(3))));

        let writes: Vec<&Request> = connection.platform().requests.iter()
            .filter(|r| matches!(r, Request::Write(..)))
            .collect();
        assert_eq!(writes, vec![
            &Request::Write(1, uuid(LED_UUID), vec![2]),
            &Request::Write(1, uuid(LED_UUID), vec![0]),
            &Request::Write(1, uuid(LED_UUID), vec![3]),
        ]);
    }

    #[test]
    fn test_missing_characteristic_fails() {
        let mut connection = connection();
        connection.connect(PeripheralRef::new("AA:BB")).unwrap();
        connection.on_link_established();

        let mut services = four_services();
        services[2].characteristics.clear();

        let result = connection.on_services_resolved(&services);
        assert!(matches!(result, Err(SessionError::MissingCharacteristic(CharacteristicRole::LedControl))));
        assert_eq!(
            connection.state(),
            &ConnectionState::Failed(FailureReason::MissingCharacteristic(CharacteristicRole::LedControl)),
        );

        // connect is refused until the failed link is torn down
        assert!(matches!(connection.connect(PeripheralRef::new("AA:BB")), Err(SessionError::AlreadyConnected)));
        connection.disconnect();
        assert_eq!(connection.state(), &ConnectionState::Disconnected);
        assert!(connection.connect(PeripheralRef::new("AA:BB")).is_ok());
    }

    #[test]
    fn test_missing_notify_service() {
        let mut connection = connection();
        connection.connect(PeripheralRef::new("AA:BB")).unwrap();
        connection.on_link_established();

        let result = connection.on_services_resolved(&four_services()[..3]);
        assert!(matches!(result, Err(SessionError::MissingCharacteristic(CharacteristicRole::NotifySource))));
        assert!(connection.characteristic(CharacteristicRole::LedControl).is_none());
    }

    #[test]
    fn test_connect_twice_fails() {
        let mut connection = connection();
        connection.connect(PeripheralRef::new("AA:BB")).unwrap();
        assert!(matches!(connection.connect(PeripheralRef::new("CC:DD")), Err(SessionError::AlreadyConnected)));
        assert_eq!(connection.peripheral().unwrap().identifier, "AA:BB");
    }

    #[test]
    fn test_rejected_connect_changes_nothing() {
        let mut connection = DeviceConnection::new(
            RecordingPlatform { requests: vec![], reject: true },
            GattLayout::default(),
        );

        assert!(matches!(connection.connect(PeripheralRef::new("AA:BB")), Err(SessionError::Platform { .. })));
        assert_eq!(connection.state(), &ConnectionState::Disconnected);
        assert_eq!(connection.link(), 0);
        assert!(connection.peripheral().is_none());
    }

    #[test]
    fn test_rejected_reconnect_keeps_counter() {
        let mut connection = ready_connection();
        for _ in 0..3 {
            connection.on_notification(&[1]);
        }
        connection.disconnect();

        connection.platform_mut().reject = true;
        assert!(matches!(connection.connect(PeripheralRef::new("CC:DD")), Err(SessionError::Platform { .. })));
        assert_eq!(connection.notification_count(), 3);
        assert_eq!(connection.state(), &ConnectionState::Disconnected);
        assert_eq!(connection.link(), 1);
        assert_eq!(connection.peripheral().unwrap().identifier, "AA:BB");
    }

    #[test]
    fn test_link_lost_clears_handles() {
        let mut connection = ready_connection();
        connection.set_notifications(true).unwrap();

        assert!(matches!(connection.on_link_lost(), Err(SessionError::LinkLost)));
        assert_eq!(connection.state(), &ConnectionState::Disconnected);
        assert!(connection.characteristic(CharacteristicRole::LedControl).is_none());
        assert!(connection.characteristic(CharacteristicRole::NotifySource).is_none());
        assert!(!connection.notifications_enabled());
        assert!(matches!(connection.write_led(0, true), Err(SessionError::NotReady)));

        // a second teardown event is dropped
        assert!(connection.on_link_lost().is_ok());
    }

    #[test]
    fn test_link_lost_from_every_state() {
        let mut connection = connection();
        connection.connect(PeripheralRef::new("AA:BB")).unwrap();
        assert!(connection.on_link_lost().is_err());
        assert_eq!(connection.state(), &ConnectionState::Disconnected);

        connection.connect(PeripheralRef::new("AA:BB")).unwrap();
        connection.on_link_established();
        assert!(connection.on_link_lost().is_err());
        assert_eq!(connection.state(), &ConnectionState::Disconnected);

        connection.connect(PeripheralRef::new("AA:BB")).unwrap();
        connection.on_link_established();
        let _ = connection.on_services_resolved(&[]);
        assert!(connection.on_link_lost().is_err());
        assert_eq!(connection.state(), &ConnectionState::Disconnected);
    }

    #[test]
    fn test_notifications_count_events() {
        let mut connection = ready_connection();
        connection.set_notifications(true).unwrap();
        assert!(connection.notifications_enabled());

        for payload in [&[][..], &[0xff, 0x01][..], &[7][..], &[0; 20][..]] {
            connection.on_notification(payload);
        }
        assert_eq!(connection.notification_count(), 4);

        connection.set_notifications(false).unwrap();
        assert!(!connection.notifications_enabled());
        assert_eq!(connection.notification_count(), 4);
        assert!(connection.platform().requests.contains(&Request::SetNotifications(1, uuid(NOTIFY_UUID), false)));
    }

    #[test]
    fn test_counter_reset_only_on_connect() {
        let mut connection = ready_connection();
        connection.on_notification(&[1]);
        connection.on_notification(&[1]);

        let _ = connection.on_link_lost();
        assert_eq!(connection.notification_count(), 2);

        connection.connect(PeripheralRef::new("AA:BB")).unwrap();
        assert_eq!(connection.notification_count(), 0);
    }

    #[test]
    fn test_notification_outside_ready_is_dropped() {
        let mut connection = connection();
        connection.on_notification(&[1]);
        connection.connect(PeripheralRef::new("AA:BB")).unwrap();
        connection.on_notification(&[1]);
        assert_eq!(connection.notification_count(), 0);
    }

    #[test]
    fn test_handle_event_filters_characteristic() {
        let mut connection = ready_connection();

        connection.handle_event(PlatformEvent {
            link: 1,
            kind: LinkEvent::Notification { characteristic: uuid(LED_UUID), value: vec![1] },
        }).unwrap();
        assert_eq!(connection.notification_count(), 0);

        connection.handle_event(PlatformEvent {
            link: 1,
            kind: LinkEvent::Notification { characteristic: uuid(NOTIFY_UUID), value: vec![1] },
        }).unwrap();
        assert_eq!(connection.notification_count(), 1);
    }

    #[test]
    fn test_stale_link_events_are_dropped() {
        let mut connection = connection();
        connection.connect(PeripheralRef::new("AA:BB")).unwrap();
        connection.disconnect();
        connection.connect(PeripheralRef::new("AA:BB")).unwrap();
        assert_eq!(connection.link(), 2);

        // teardown of the first link arrives late
        connection.handle_event(PlatformEvent { link: 1, kind: LinkEvent::Lost }).unwrap();
        assert_eq!(connection.state(), &ConnectionState::Connecting);

        connection.handle_event(PlatformEvent { link: 1, kind: LinkEvent::Established }).unwrap();
        assert_eq!(connection.state(), &ConnectionState::Connecting);

        connection.handle_event(PlatformEvent { link: 2, kind: LinkEvent::Established }).unwrap();
        assert_eq!(connection.state(), &ConnectionState::ServicesDiscovering);
        assert!(connection.platform().requests.contains(&Request::DiscoverServices(2)));
    }

    #[test]
    fn test_out_of_order_events_are_dropped() {
        let mut connection = connection();
        connection.connect(PeripheralRef::new("AA:BB")).unwrap();

        // services before the link is up
        connection.on_services_resolved(&four_services()).unwrap();
        assert_eq!(connection.state(), &ConnectionState::Connecting);

        connection.on_link_established();
        connection.on_services_resolved(&four_services()).unwrap();
        connection.on_link_established();
        assert!(connection.is_ready());
    }

    #[test]
    fn test_platform_failure_while_connecting() {
        let mut connection = connection();
        connection.connect(PeripheralRef::new("AA:BB")).unwrap();

        connection.handle_event(PlatformEvent {
            link: 1,
            kind: LinkEvent::Failed("peripheral not found".to_string()),
        }).unwrap();
        assert_eq!(
            connection.state(),
            &ConnectionState::Failed(FailureReason::Platform("peripheral not found".to_string())),
        );
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut connection = ready_connection();
        connection.disconnect();
        connection.disconnect();

        let disconnects = connection.platform().requests.iter()
            .filter(|r| matches!(r, Request::Disconnect(_)))
            .count();
        assert_eq!(disconnects, 1);
        assert_eq!(connection.state(), &ConnectionState::Disconnected);
        assert!(connection.characteristic(CharacteristicRole::LedControl).is_none());
    }

    #[test]
    fn test_custom_layout() {
        let layout = GattLayout { led_service_index: 0, notify_service_index: 1, characteristic_index: 0 };
        let mut connection = DeviceConnection::new(RecordingPlatform::default(), layout);
        connection.connect(PeripheralRef::new("AA:BB")).unwrap();
        connection.on_link_established();
        connection.on_services_resolved(&four_services()[..2]).unwrap();

        assert_eq!(connection.characteristic(CharacteristicRole::LedControl).unwrap().uuid, uuid(0x101));
        assert_eq!(connection.characteristic(CharacteristicRole::NotifySource).unwrap().uuid, uuid(0x102));
    }
}
