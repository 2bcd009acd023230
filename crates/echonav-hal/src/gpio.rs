//! Generic `GpioBus` trait for the trigger/echo lines of the ultrasonic
//! rangers.
//!
//! The bus also owns the time base used for echo measurement: callers take
//! timestamps with [`GpioBus::now_micros`] and pause with [`GpioBus::delay`],
//! so a simulated bus can run on a virtual clock.

use std::time::Duration;

use echonav_types::NavError;

/// Logic level of a digital pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

/// A digital I/O bus addressed by BCM pin number.
pub trait GpioBus: Send {
    /// Configure `pin` as a push-pull output.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] if the pin cannot be claimed.
    fn setup_output(&mut self, pin: u8) -> Result<(), NavError>;

    /// Configure `pin` as an input.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] if the pin cannot be claimed.
    fn setup_input(&mut self, pin: u8) -> Result<(), NavError>;

    /// Drive an output pin to `level`.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] if the pin is not an output or
    /// the write fails.
    fn set_output(&mut self, pin: u8, level: Level) -> Result<(), NavError>;

    /// Sample the current level of an input pin.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] if the pin is not an input or the
    /// read fails.
    fn read_input(&mut self, pin: u8) -> Result<Level, NavError>;

    /// Monotonic timestamp in microseconds.
    fn now_micros(&self) -> u64;

    /// Block the calling thread for `duration`.
    fn delay(&mut self, duration: Duration);

    /// Return every claimed pin to its reset state.
    fn release(&mut self) {}
}
