//! Embassy framework support for NUC472.
//!
//! This module provides the time driver for the Embassy framework, running on the low-power
//! ticker so timers keep counting across power-down.

#[cfg(feature = "time-driver")]
mod time_driver;

#[cfg(feature = "time-driver")]
pub(crate) use time_driver::on_compare;

/// Initialize the Embassy time driver.
///
/// The low-power ticker must be initialized before calling this function.
///
/// # Safety
///
/// This function should be called only once.
pub unsafe fn init() {
    #[cfg(feature = "time-driver")]
    critical_section::with(|cs| time_driver::init(cs));
}
