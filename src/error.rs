use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;
use uuid::Uuid;

use crate::device::types::CharacteristicRole;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (bluetooth): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("Failed to start application (runtime): {source}")]
    Runtime { #[from] source: io::Error },

    #[error("{source}")]
    Session { #[from] source: SessionError },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0} (type help for a list of commands)")]
    Unknown(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failures reported by the platform bluetooth backend.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("No peripheral with id or address {0} has been seen by any adapter")]
    PeripheralNotFound(String),

    #[error("There is no active link to a peripheral")]
    NoLink,

    #[error("The peripheral has no characteristic {0}")]
    CharacteristicNotFound(Uuid),

    #[error("{0} took too long")]
    Deadline(&'static str),
}

/// Failures of the session operations (scan, connect, led write, subscribe).
/// None of these are retried.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A scan is already running")]
    AlreadyRunning,

    #[error("A connection is already active, disconnect first")]
    AlreadyConnected,

    #[error("The device is not ready")]
    NotReady,

    #[error("The {0} characteristic is not available on this device")]
    MissingCharacteristic(CharacteristicRole),

    #[error("The link to the device was lost")]
    LinkLost,

    #[error("There is no LED with index {0}")]
    InvalidLedIndex(usize),

    #[error("Unknown peripheral: {0}")]
    UnknownPeripheral(String),

    #[error("Platform request failed: {source}")]
    Platform { #[from] source: DeviceError },
}
