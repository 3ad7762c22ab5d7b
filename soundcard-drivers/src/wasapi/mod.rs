//! WASAPI backend (Windows).
//!
//! Each active MMDevice endpoint is one card: capture endpoints are capture
//! cards, render endpoints are playback cards. Streams open in shared mode on
//! their own COM thread (see [`stream`]); the mixer is the endpoint volume.

pub mod enumerator;
pub mod stream;
pub mod volume;

use std::sync::Arc;

use soundcard_core::{
    Capabilities, CaptureDevice, CardData, DetectedCard, Direction, MixerElement, PlaybackDevice, SoundCard,
    SoundCardDescriptor, SoundCardError,
};

use self::enumerator::{ComGuard, Endpoints};
use self::stream::{WasapiCapture, WasapiPlayback};

pub const WASAPI_DRIVER_TYPE: &str = "WASAPI";

/// Private data of a WASAPI card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasapiCardData {
    pub endpoint_id: String,
    pub direction: Direction,
}

pub struct WasapiDriver;

impl WasapiDriver {
    pub fn new() -> Self {
        Self
    }

    fn data(card: &SoundCard) -> Result<WasapiCardData, SoundCardError> {
        card.with_data(|d: &mut WasapiCardData| d.clone())
            .ok_or_else(|| SoundCardError::InvalidState(format!("{} is not a WASAPI card", card.id())))
    }

    /// Endpoint whose volume `element` addresses on `card`.
    fn volume_target(card: &SoundCard, element: MixerElement) -> Result<String, SoundCardError> {
        let data = Self::data(card)?;
        if !volume::controls(data.direction, element) {
            return Err(SoundCardError::Unsupported("mixer element"));
        }
        Ok(data.endpoint_id)
    }
}

impl Default for WasapiDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundCardDescriptor for WasapiDriver {
    fn driver_type(&self) -> &str {
        WASAPI_DRIVER_TYPE
    }

    fn directions(&self) -> Capabilities {
        Capabilities::DUPLEX
    }

    fn detect(&self) -> Result<Vec<DetectedCard>, SoundCardError> {
        let _com = ComGuard::new()?;
        let endpoints = Endpoints::new()?.list()?;
        log::debug!("WASAPI: {} active endpoint(s)", endpoints.len());
        Ok(endpoints
            .into_iter()
            .map(|e| {
                let caps = e.direction.capability();
                let data = WasapiCardData {
                    endpoint_id: e.id,
                    direction: e.direction,
                };
                DetectedCard::new(e.name, caps, data)
            })
            .collect())
    }

    fn set_level(&self, card: &SoundCard, element: MixerElement, percent: u8) -> Result<(), SoundCardError> {
        volume::set_level(&Self::volume_target(card, element)?, percent)
    }

    fn get_level(&self, card: &SoundCard, element: MixerElement) -> Result<u8, SoundCardError> {
        volume::get_level(&Self::volume_target(card, element)?)
    }

    fn set_mute(&self, card: &SoundCard, element: MixerElement, muted: bool) -> Result<(), SoundCardError> {
        volume::set_mute(&Self::volume_target(card, element)?, muted)
    }

    fn get_mute(&self, card: &SoundCard, element: MixerElement) -> Result<bool, SoundCardError> {
        volume::get_mute(&Self::volume_target(card, element)?)
    }

    fn create_capture(&self, card: &Arc<SoundCard>) -> Result<Box<dyn CaptureDevice>, SoundCardError> {
        Ok(Box::new(WasapiCapture::new(Self::data(card)?.endpoint_id)))
    }

    fn create_playback(&self, card: &Arc<SoundCard>) -> Result<Box<dyn PlaybackDevice>, SoundCardError> {
        Ok(Box::new(WasapiPlayback::new(Self::data(card)?.endpoint_id)))
    }

    /// Shared mode lets several clients open the same endpoint.
    fn duplicate(&self, card: &SoundCard) -> Result<Box<dyn CardData>, SoundCardError> {
        Ok(card.clone_data())
    }
}
