use std::fmt;

use crate::device::constants::{led_command_value, LED_COUNT};
use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedState([bool; LED_COUNT]);

impl LedState {
    pub fn is_on(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    /// The byte that sets LED `index` to its state in `self`.
    pub fn write_value(&self, index: usize) -> u8 {
        led_command_value(index, self.is_on(index))
    }

    pub fn as_array(&self) -> [bool; LED_COUNT] {
        self.0
    }
}

impl fmt::Display for LedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, on) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, " ")?;
            }
            write!(f, "LED{}:{}", index + 1, if *on { "on" } else { "off" })?;
        }
        Ok(())
    }
}

/// Local LED state. Forwarding a change to the device is up to the caller.
#[derive(Debug, Default)]
pub struct LedPanel {
    state: LedState,
}

impl LedPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LedState {
        self.state
    }

    pub fn toggle(&mut self, index: usize) -> Result<LedState, SessionError> {
        let led = self.state.0.get_mut(index).ok_or(SessionError::InvalidLedIndex(index))?;
        *led = !*led;
        Ok(self.state)
    }

    pub fn reset(&mut self) {
        self.state = LedState::default();
    }
}
