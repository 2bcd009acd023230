//! Generic `Gyroscope` trait for single-axis rate sensors.

use echonav_types::NavError;

/// A rate gyroscope exposing the vertical (yaw) axis.
pub trait Gyroscope: Send {
    /// Angular rate around the Z axis in degrees per second, uncorrected for
    /// bias.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] if the device does not answer.
    fn read_rate_z(&mut self) -> Result<f64, NavError>;

    /// Release the underlying bus handle.
    fn release(&mut self) {}
}
