use log::{info, warn};

use crate::console::types::Target;
use crate::device::connection::{DeviceConnection, GattLayout};
use crate::device::leds::{LedPanel, LedState};
use crate::device::platform::BlePlatform;
use crate::device::scan::ScanSession;
use crate::device::types::{ConnectionState, PeripheralRef, PlatformEvent, ScanEvent};
use crate::error::SessionError;

/// Owns the scan results, the connection and the LED panel, and applies user intents and
/// platform events to them one at a time.
pub struct Controller<P: BlePlatform> {
    scan: ScanSession,
    connection: DeviceConnection<P>,
    leds: LedPanel,
}

impl<P: BlePlatform> Controller<P> {
    pub fn new(platform: P, layout: GattLayout) -> Self {
        Controller {
            scan: ScanSession::new(),
            connection: DeviceConnection::new(platform, layout),
            leds: LedPanel::new(),
        }
    }

    pub fn scan(&self) -> &ScanSession {
        &self.scan
    }

    pub fn connection(&self) -> &DeviceConnection<P> {
        &self.connection
    }

    pub fn state(&self) -> &ConnectionState {
        self.connection.state()
    }

    pub fn leds(&self) -> LedState {
        self.leds.state()
    }

    pub fn notification_count(&self) -> u64 {
        self.connection.notification_count()
    }

    pub fn start_scan(&mut self) -> Result<(), SessionError> {
        self.scan.start()
    }

    pub fn stop_scan(&mut self) {
        self.scan.stop();
    }

    /// Returns true when this event ended the scan.
    pub fn handle_scan_event(&mut self, event: ScanEvent) -> bool {
        match event {
            ScanEvent::Sighting { identifier, address, name, rssi } => {
                self.scan.on_advertisement(&identifier, address, name, rssi);
                false
            },
            ScanEvent::Finished => {
                self.scan.stop();
                true
            },
            ScanEvent::Failed(message) => {
                warn!("Scan failed: {}", message);
                self.scan.stop();
                true
            },
        }
    }

    pub fn select(&self, target: &Target) -> Result<PeripheralRef, SessionError> {
        match target {
            Target::Position(position) => position
                .checked_sub(1)
                .and_then(|index| self.scan.get_index(index))
                .cloned()
                .ok_or_else(|| SessionError::UnknownPeripheral(format!("#{}", position))),
            Target::Address(key) => Ok(self
                .scan
                .find(key)
                .cloned()
                .unwrap_or_else(|| PeripheralRef::new(key.clone()))),
        }
    }

    /// Connect to the selected peripheral. The LED panel is kept when reconnecting to the
    /// peripheral of the previous link and cleared otherwise.
    pub fn connect(&mut self, target: &Target) -> Result<PeripheralRef, SessionError> {
        let peripheral = self.select(target)?;
        let same_peripheral = self.connection
            .peripheral()
            .map_or(false, |previous| previous.identifier == peripheral.identifier);

        self.connection.connect(peripheral.clone())?;

        if !same_peripheral {
            self.leds.reset();
        }
        Ok(peripheral)
    }

    /// Flip LED `index` and send it to the device. Returns the byte written.
    pub fn toggle_led(&mut self, index: usize) -> Result<u8, SessionError> {
        if !self.connection.is_ready() {
            return Err(SessionError::NotReady);
        }

        let state = self.leds.toggle(index)?;
        match self.connection.write_led(index, state.is_on(index)) {
            Ok(value) => {
                info!("LED {} is now {}", index + 1, if state.is_on(index) { "on" } else { "off" });
                Ok(value)
            },
            Err(err) => {
                self.leds.toggle(index)?;
                Err(err)
            },
        }
    }

    pub fn set_notifications(&mut self, enabled: bool) -> Result<(), SessionError> {
        self.connection.set_notifications(enabled)
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect();
    }

    pub fn handle_device_event(&mut self, event: PlatformEvent) -> Result<(), SessionError> {
        self.connection.handle_event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::connection::tests::{four_services, uuid, RecordingPlatform, Request, LED_UUID};
    use crate::device::types::LinkEvent;

    fn controller() -> Controller<RecordingPlatform> {
        Controller::new(RecordingPlatform::default(), GattLayout::default())
    }

    fn sighting(identifier: &str, name: &str, rssi: i16) -> ScanEvent {
        ScanEvent::Sighting {
            identifier: identifier.to_string(),
            address: None,
            name: Some(name.to_string()),
            rssi: Some(rssi),
        }
    }

    fn make_ready(controller: &mut Controller<RecordingPlatform>) {
        let link = controller.connection().link();
        controller.handle_device_event(PlatformEvent { link, kind: LinkEvent::Established }).unwrap();
        controller.handle_device_event(PlatformEvent { link, kind: LinkEvent::ServicesResolved(four_services()) }).unwrap();
        assert_eq!(controller.state(), &ConnectionState::Ready);
    }

    #[test]
    fn test_scan_events() {
        let mut controller = controller();
        controller.start_scan().unwrap();

        assert!(!controller.handle_scan_event(sighting("AA:BB", "Sensor1", -60)));
        assert!(!controller.handle_scan_event(sighting("CC:DD", "Sensor2", -70)));
        assert!(controller.handle_scan_event(ScanEvent::Finished));

        assert!(!controller.scan().is_active());
        assert_eq!(controller.scan().len(), 2);
        assert!(matches!(controller.start_scan(), Ok(())));
    }

    #[test]
    fn test_select() {
        let mut controller = controller();
        controller.start_scan().unwrap();
        controller.handle_scan_event(sighting("AA:BB", "Sensor1", -60));

        assert_eq!(controller.select(&Target::Position(1)).unwrap().name.as_deref(), Some("Sensor1"));
        assert!(matches!(controller.select(&Target::Position(0)), Err(SessionError::UnknownPeripheral(_))));
        assert!(matches!(controller.select(&Target::Position(2)), Err(SessionError::UnknownPeripheral(_))));

        let known = controller.select(&Target::Address("AA:BB".to_string())).unwrap();
        assert_eq!(known.rssi, Some(-60));
        let unknown = controller.select(&Target::Address("11:22".to_string())).unwrap();
        assert_eq!(unknown, PeripheralRef::new("11:22"));
    }

    #[test]
    fn test_select_by_address_connects_by_identifier() {
        let mut controller = controller();
        controller.start_scan().unwrap();
        controller.handle_scan_event(ScanEvent::Sighting {
            identifier: "hci0/dev_AA_BB".to_string(),
            address: Some("AA:BB".to_string()),
            name: Some("Sensor1".to_string()),
            rssi: Some(-60),
        });

        let peripheral = controller.connect(&Target::Address("aa:bb".to_string())).unwrap();
        assert_eq!(peripheral.identifier, "hci0/dev_AA_BB");
        assert_eq!(
            controller.connection().platform().requests,
            vec![Request::Connect(1, "hci0/dev_AA_BB".to_string())],
        );
    }

    #[test]
    fn test_toggle_before_ready_leaves_leds_alone() {
        let mut controller = controller();
        assert!(matches!(controller.toggle_led(0), Err(SessionError::NotReady)));

        controller.connect(&Target::Address("AA:BB".to_string())).unwrap();
        assert!(matches!(controller.toggle_led(0), Err(SessionError::NotReady)));
        assert_eq!(controller.leds(), LedState::default());
    }

    #[test]
    fn test_toggle_writes_led_value() {
        let mut controller = controller();
        controller.connect(&Target::Address("AA:BB".to_string())).unwrap();
        make_ready(&mut controller);

        assert_eq!(controller.toggle_led(1).unwrap(), 2);
        assert!(controller.leds().is_on(1));
        assert_eq!(controller.toggle_led(1).unwrap(), 0);
        assert!(!controller.leds().is_on(1));
        assert!(matches!(controller.toggle_led(5), Err(SessionError::InvalidLedIndex(5))));

        let requests = &controller.connection().platform().requests;
        assert!(requests.contains(&Request::Write(1, uuid(LED_UUID), vec![2])));
        assert!(requests.contains(&Request::Write(1, uuid(LED_UUID), vec![0])));
    }

    #[test]
    fn test_leds_kept_for_same_peripheral_only() {
        let mut controller = controller();
        controller.connect(&Target::Address("AA:BB".to_string())).unwrap();
        make_ready(&mut controller);
        controller.toggle_led(0).unwrap();

        let link = controller.connection().link();
        assert!(matches!(
            controller.handle_device_event(PlatformEvent { link, kind: LinkEvent::Lost }),
            Err(SessionError::LinkLost),
        ));
        assert!(controller.leds().is_on(0));

        controller.connect(&Target::Address("AA:BB".to_string())).unwrap();
        assert!(controller.leds().is_on(0));

        controller.disconnect();
        controller.connect(&Target::Address("CC:DD".to_string())).unwrap();
        assert_eq!(controller.leds(), LedState::default());
    }

    #[test]
    fn test_rejected_write_reverts_led() {
        let mut controller = controller();
        controller.connect(&Target::Address("AA:BB".to_string())).unwrap();
        make_ready(&mut controller);

        controller.connection.platform_mut().reject = true;
        assert!(matches!(controller.toggle_led(2), Err(SessionError::Platform { .. })));
        assert!(!controller.leds().is_on(2));
    }
}
