//! Endpoint volume as the card mixer.
//!
//! A WASAPI endpoint carries one direction, so it exposes a single volume
//! control. `Master` always maps to it; `Playback` and `Capture` map to it
//! only on an endpoint of that direction.

use windows::Win32::Media::Audio::Endpoints::IAudioEndpointVolume;
use windows::Win32::System::Com::CLSCTX_ALL;

use soundcard_core::{Direction, MixerElement, SoundCardError};

use super::enumerator::{ComGuard, Endpoints};

/// Whether `element` addresses an endpoint of `direction`.
pub fn controls(direction: Direction, element: MixerElement) -> bool {
    match element {
        MixerElement::Master => true,
        MixerElement::Playback => direction == Direction::Playback,
        MixerElement::Capture => direction == Direction::Capture,
    }
}

pub fn percent_to_scalar(percent: u8) -> f32 {
    percent.min(100) as f32 / 100.0
}

pub fn scalar_to_percent(scalar: f32) -> u8 {
    (scalar.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Run `f` against the endpoint volume of `endpoint_id` on the calling thread.
fn with_volume<R>(
    endpoint_id: &str,
    f: impl FnOnce(&IAudioEndpointVolume) -> windows::core::Result<R>,
) -> Result<R, SoundCardError> {
    let _com = ComGuard::new()?;
    let device = Endpoints::new()?.device(endpoint_id)?;
    let volume: IAudioEndpointVolume = unsafe { device.Activate(CLSCTX_ALL, None) }
        .map_err(|e| SoundCardError::Backend(format!("{}: no endpoint volume: {}", endpoint_id, e)))?;
    f(&volume).map_err(|e| SoundCardError::Backend(format!("{}: endpoint volume: {}", endpoint_id, e)))
}

pub fn set_level(endpoint_id: &str, percent: u8) -> Result<(), SoundCardError> {
    with_volume(endpoint_id, |v| unsafe {
        v.SetMasterVolumeLevelScalar(percent_to_scalar(percent), std::ptr::null())
    })
}

pub fn get_level(endpoint_id: &str) -> Result<u8, SoundCardError> {
    with_volume(endpoint_id, |v| unsafe { v.GetMasterVolumeLevelScalar() }).map(scalar_to_percent)
}

pub fn set_mute(endpoint_id: &str, muted: bool) -> Result<(), SoundCardError> {
    with_volume(endpoint_id, |v| unsafe { v.SetMute(muted.into(), std::ptr::null()) })
}

pub fn get_mute(endpoint_id: &str) -> Result<bool, SoundCardError> {
    with_volume(endpoint_id, |v| unsafe { v.GetMute() }.map(|m| m.as_bool()))
}
