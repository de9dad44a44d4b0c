pub mod btle;
pub mod connection;
pub mod constants;
pub mod counter;
pub mod leds;
pub mod platform;
pub mod scan;
pub mod scanner;
pub mod types;
