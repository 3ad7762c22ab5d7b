//! # soundcard-drivers
//!
//! Platform backends for soundcard-core.
//!
//! Provides:
//! - `CpalDriver`: one descriptor per cpal host (ALSA, CoreAudio, WASAPI, JACK),
//!   callback driven. Behind the `device-cpal` feature.
//! - `OssDriver`: `/dev/dsp*` devices with blocking I/O on driver-owned
//!   threads and the `/dev/mixer*` ioctl mixer (Linux, FreeBSD).
//! - `WasapiDriver`: shared-mode WASAPI endpoints via the MMDevice API, with
//!   endpoint volume as the mixer (Windows).
//!
//! ## Usage
//! ```ignore
//! use soundcard_core::SoundCardManager;
//!
//! let manager = SoundCardManager::global();
//! soundcard_drivers::register_platform_drivers(&manager);
//! let card = manager.get_default_capture_card().unwrap();
//! let reader = card.create_reader().unwrap();
//! ```

use std::sync::Arc;

use soundcard_core::{SoundCardDescriptor, SoundCardManager};

#[cfg(feature = "device-cpal")]
pub mod cpal_backend;
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub mod oss;
#[cfg(target_os = "windows")]
pub mod wasapi;

#[cfg(feature = "device-cpal")]
pub use cpal_backend::CpalDriver;
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub use oss::OssDriver;
#[cfg(target_os = "windows")]
pub use wasapi::WasapiDriver;

/// Backends compiled into this build, in registration order.
pub fn platform_drivers() -> Vec<Arc<dyn SoundCardDescriptor>> {
    #[allow(unused_mut)]
    let mut drivers: Vec<Arc<dyn SoundCardDescriptor>> = Vec::new();

    #[cfg(target_os = "windows")]
    drivers.push(Arc::new(WasapiDriver::new()));

    #[cfg(feature = "device-cpal")]
    for driver in CpalDriver::available() {
        drivers.push(Arc::new(driver));
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    drivers.push(Arc::new(OssDriver::new()));

    drivers
}

/// Register every compiled-in backend with `manager`. Returns the number of
/// cards found.
pub fn register_platform_drivers(manager: &SoundCardManager) -> usize {
    let mut total = 0;
    for driver in platform_drivers() {
        let driver_type = driver.driver_type().to_string();
        match manager.register_descriptor(driver) {
            Ok(count) => total += count,
            Err(e) => log::error!("{} driver rejected: {}", driver_type, e),
        }
    }
    log::info!("{} sound card(s) across {} driver(s)", total, manager.driver_types().len());
    total
}
