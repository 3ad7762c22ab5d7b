use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::models::card::{Capabilities, CaptureSource, MixerElement};
use crate::models::error::SoundCardError;
use crate::registry::card::SoundCard;
use crate::traits::device::{CaptureDevice, PlaybackDevice};

/// Driver-private data attached to a [`SoundCard`].
///
/// Owned exclusively by its card. Must be deep-cloneable so that
/// [`SoundCard::dup`] never shares mutable state with the original.
pub trait CardData: Any + Send + fmt::Debug {
    fn clone_data(&self) -> Box<dyn CardData>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Send + Clone + fmt::Debug> CardData for T {
    fn clone_data(&self) -> Box<dyn CardData> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One device found by a detection pass, before it is wrapped into a
/// [`SoundCard`] by the registry.
#[derive(Debug)]
pub struct DetectedCard {
    pub name: String,
    pub capabilities: Capabilities,
    pub data: Box<dyn CardData>,
}

impl DetectedCard {
    pub fn new(name: impl Into<String>, capabilities: Capabilities, data: impl CardData) -> Self {
        Self {
            name: name.into(),
            capabilities,
            data: Box::new(data),
        }
    }
}

/// A sound-card backend (ALSA, OSS, WASAPI, ...).
///
/// One implementation per backend, registered once with the
/// [`SoundCardManager`](crate::registry::manager::SoundCardManager). Mixer
/// operations default to [`SoundCardError::Unsupported`]; capture-source
/// selection defaults to a no-op success for backends without the
/// distinction.
pub trait SoundCardDescriptor: Send + Sync {
    /// Backend name used as the id prefix of its cards ("ALSA", "OSS", ...).
    fn driver_type(&self) -> &str;

    /// Directions this backend can ever open. Must not be empty.
    fn directions(&self) -> Capabilities;

    /// Enumerate the devices currently present.
    fn detect(&self) -> Result<Vec<DetectedCard>, SoundCardError>;

    /// Called once when a card of this backend is created.
    fn init(&self, _card: &SoundCard) {}

    /// Called once when the last owner of a card of this backend drops it.
    fn uninit(&self, _card: &SoundCard) {}

    fn set_level(&self, _card: &SoundCard, _element: MixerElement, _percent: u8) -> Result<(), SoundCardError> {
        Err(SoundCardError::Unsupported("mixer level"))
    }

    fn get_level(&self, _card: &SoundCard, _element: MixerElement) -> Result<u8, SoundCardError> {
        Err(SoundCardError::Unsupported("mixer level"))
    }

    fn set_mute(&self, _card: &SoundCard, _element: MixerElement, _muted: bool) -> Result<(), SoundCardError> {
        Err(SoundCardError::Unsupported("mute"))
    }

    fn get_mute(&self, _card: &SoundCard, _element: MixerElement) -> Result<bool, SoundCardError> {
        Err(SoundCardError::Unsupported("mute"))
    }

    fn set_capture_source(&self, _card: &SoundCard, _source: CaptureSource) -> Result<(), SoundCardError> {
        Ok(())
    }

    /// Create the device behind a reader node.
    fn create_capture(&self, _card: &Arc<SoundCard>) -> Result<Box<dyn CaptureDevice>, SoundCardError> {
        Err(SoundCardError::Unsupported("capture"))
    }

    /// Create the device behind a writer node.
    fn create_playback(&self, _card: &Arc<SoundCard>) -> Result<Box<dyn PlaybackDevice>, SoundCardError> {
        Err(SoundCardError::Unsupported("playback"))
    }

    /// Deep-copy the private data of `card` for an independent second open.
    fn duplicate(&self, card: &SoundCard) -> Result<Box<dyn CardData>, SoundCardError> {
        Err(SoundCardError::DuplicateUnsupported(card.id().to_string()))
    }

    /// Called when the registry drops this backend.
    fn unload(&self) {}
}
