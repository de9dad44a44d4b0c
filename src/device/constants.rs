/**
 * Number of LEDs on the peripheral.
 */
pub const LED_COUNT: usize = 3;

/**
 * Value written to the LED characteristic to switch an LED off.
 * Switching LED `n` on writes `n + 1`, so the byte identifies the LED rather than a channel.
 */
pub const LED_OFF_VALUE: u8 = 0x00;

/**
 * Position of the service holding the LED characteristic in the discovered GATT table.
 */
pub const LED_SERVICE_INDEX: usize = 2;

/**
 * Position of the service holding the notification characteristic in the discovered GATT table.
 */
pub const NOTIFY_SERVICE_INDEX: usize = 3;

/**
 * Position of the characteristic inside both services.
 */
pub const CHARACTERISTIC_INDEX: usize = 0;

/**
 * How long (milliseconds) a scan runs before it is stopped.
 */
pub const SCAN_DURATION: u64 = 10_000;

/**
 * How long (milliseconds) connecting to a peripheral may take.
 */
pub const CONNECT_DEADLINE: u64 = 10_000;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How often (milliseconds) to check if the peripheral is still connected.
 */
pub const LINK_POLL_DELAY: u64 = 500;

/**
 * How long (milliseconds) checking if the peripheral is still connected may take
 */
pub const IS_CONNECTED_DEADLINE: u64 = 2000;

/// Byte written to the LED characteristic for LED `index` in the given state.
pub fn led_command_value(index: usize, on: bool) -> u8 {
    if on {
        (index + 1) as u8
    } else {
        LED_OFF_VALUE
    }
}
