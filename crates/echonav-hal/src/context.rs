//! [`HardwareContext`] – explicitly owned sensor hardware handles.
//!
//! The context bundles the GPIO bus (ultrasonic rangers) and the gyroscope
//! bus so sensors receive their hardware through their constructor instead
//! of reaching for process-wide state.  Clones share the same handles.
//!
//! Lifecycle: [`HardwareContext::init`] once at startup,
//! [`HardwareContext::release`] once at shutdown.  After release every
//! accessor returns [`NavError::HardwareFault`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use echonav_types::NavError;
use parking_lot::{Mutex, MutexGuard};
use tracing::info;

use crate::gpio::GpioBus;
use crate::gyro::Gyroscope;

/// Shared, releasable access to the sensor buses.
#[derive(Clone)]
pub struct HardwareContext {
    gpio: Arc<Mutex<Box<dyn GpioBus>>>,
    gyro: Arc<Mutex<Box<dyn Gyroscope>>>,
    released: Arc<AtomicBool>,
}

impl HardwareContext {
    /// Take ownership of the sensor drivers.
    pub fn init(gpio: Box<dyn GpioBus>, gyro: Box<dyn Gyroscope>) -> Self {
        info!("hardware context initialised");
        Self {
            gpio: Arc::new(Mutex::new(gpio)),
            gyro: Arc::new(Mutex::new(gyro)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Lock the GPIO bus.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] once the context has been released.
    pub fn gpio(&self) -> Result<MutexGuard<'_, Box<dyn GpioBus>>, NavError> {
        self.ensure_live("gpio")?;
        Ok(self.gpio.lock())
    }

    /// Lock the gyroscope.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] once the context has been released.
    pub fn gyro(&self) -> Result<MutexGuard<'_, Box<dyn Gyroscope>>, NavError> {
        self.ensure_live("gyroscope")?;
        Ok(self.gyro.lock())
    }

    /// `true` after [`release`](Self::release) has run.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Release both buses.  Only the first call touches the hardware; later
    /// calls return `false` and do nothing.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.gpio.lock().release();
        self.gyro.lock().release();
        info!("hardware context released");
        true
    }

    fn ensure_live(&self, component: &str) -> Result<(), NavError> {
        if self.is_released() {
            return Err(NavError::hardware(component, "hardware context already released"));
        }
        Ok(())
    }
}
