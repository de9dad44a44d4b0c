use crate::device::types::{CharacteristicHandle, LinkId, PeripheralRef};
use crate::error::DeviceError;

/// The bluetooth stack a `DeviceConnection` drives.
///
/// Every method only issues a request and returns. The outcome is reported later as a
/// `PlatformEvent` tagged with the same `LinkId`, which the owner of the connection feeds
/// back into `DeviceConnection::handle_event`. An `Err` means the request was not issued.
pub trait BlePlatform {
    fn connect(&mut self, link: LinkId, peripheral: &PeripheralRef) -> Result<(), DeviceError>;

    fn discover_services(&mut self, link: LinkId) -> Result<(), DeviceError>;

    fn write(&mut self, link: LinkId, characteristic: &CharacteristicHandle, value: &[u8]) -> Result<(), DeviceError>;

    fn set_notifications(&mut self, link: LinkId, characteristic: &CharacteristicHandle, enabled: bool) -> Result<(), DeviceError>;

    /// Release the link. The platform may still raise events for it afterwards.
    fn disconnect(&mut self, link: LinkId);
}
