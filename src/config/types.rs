use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::connection::GattLayout;
use crate::device::constants::{CONNECT_DEADLINE, IS_CONNECTED_DEADLINE, LINK_POLL_DELAY, SCAN_DURATION, WRITE_DEADLINE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// milliseconds
    pub scan_duration: u64,
    /// milliseconds
    pub connect_deadline: u64,
    /// milliseconds
    pub write_deadline: u64,
    /// milliseconds
    pub link_poll_delay: u64,
    /// milliseconds
    pub is_connected_deadline: u64,
    /// Write the LED characteristic with response (the default write type of most stacks)
    pub write_with_response: bool,
    pub gatt_layout: GattLayout,
}

impl Config {
    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration)
    }

    pub fn connect_deadline(&self) -> Duration {
        Duration::from_millis(self.connect_deadline)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline)
    }

    pub fn link_poll_delay(&self) -> Duration {
        Duration::from_millis(self.link_poll_delay)
    }

    pub fn is_connected_deadline(&self) -> Duration {
        Duration::from_millis(self.is_connected_deadline)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scan_duration: SCAN_DURATION,
            connect_deadline: CONNECT_DEADLINE,
            write_deadline: WRITE_DEADLINE,
            link_poll_delay: LINK_POLL_DELAY,
            is_connected_deadline: IS_CONNECTED_DEADLINE,
            write_with_response: true,
            gatt_layout: GattLayout::default(),
        }
    }
}
