use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::graph::reader::SoundReader;
use crate::graph::writer::SoundWriter;
use crate::models::card::{card_id, Capabilities, CaptureSource, CardInfo, Direction, MixerElement};
use crate::models::config::StreamConfiguration;
use crate::models::error::SoundCardError;
use crate::traits::descriptor::{CardData, DetectedCard, SoundCardDescriptor};
use crate::traits::device::{CaptureDevice, PlaybackDevice};

/// One discovered audio device.
///
/// Live cards are shared as `Arc<SoundCard>`: the registry holds one
/// reference and every open reader or writer holds another. The backend's
/// `uninit` runs when the last reference goes away, so a card removed from
/// the registry by a reload stays valid until its streams close.
pub struct SoundCard {
    name: String,
    id: String,
    capabilities: Capabilities,
    descriptor: Arc<dyn SoundCardDescriptor>,
    data: Mutex<Box<dyn CardData>>,
}

impl SoundCard {
    pub fn new(descriptor: Arc<dyn SoundCardDescriptor>, detected: DetectedCard) -> Self {
        let card = Self {
            id: card_id(descriptor.driver_type(), &detected.name),
            name: detected.name,
            capabilities: detected.capabilities,
            descriptor,
            data: Mutex::new(detected.data),
        };
        card.descriptor.init(&card);
        card
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn driver_type(&self) -> &str {
        self.descriptor.driver_type()
    }

    pub fn descriptor(&self) -> &Arc<dyn SoundCardDescriptor> {
        &self.descriptor
    }

    pub fn info(&self) -> CardInfo {
        CardInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            driver_type: self.driver_type().to_string(),
            capabilities: self.capabilities,
        }
    }

    /// Typed access to the driver-private data.
    ///
    /// Returns `None` when the data is not a `T` (a card of another backend).
    /// Do not call back into the card from `f`.
    pub fn with_data<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.data.lock();
        let data: &mut dyn CardData = &mut **guard;
        data.as_any_mut().downcast_mut::<T>().map(f)
    }

    /// Deep copy of the driver-private data.
    pub fn clone_data(&self) -> Box<dyn CardData> {
        let guard = self.data.lock();
        let data: &dyn CardData = &**guard;
        data.clone_data()
    }

    /// Independent copy of this card, for driving the same device from two
    /// graph paths. Fails when the backend cannot open a device twice.
    pub fn dup(&self) -> Result<SoundCard, SoundCardError> {
        let data = self.descriptor.duplicate(self)?;
        log::debug!("duplicated card {}", self.id);
        Ok(SoundCard::new(
            Arc::clone(&self.descriptor),
            DetectedCard {
                name: self.name.clone(),
                capabilities: self.capabilities,
                data,
            },
        ))
    }

    /// Reader node bound to this card, using the default stream configuration.
    pub fn create_reader(self: &Arc<Self>) -> Result<SoundReader, SoundCardError> {
        self.create_reader_with(StreamConfiguration::default())
    }

    pub fn create_reader_with(self: &Arc<Self>, config: StreamConfiguration) -> Result<SoundReader, SoundCardError> {
        let device = self.create_capture_device()?;
        SoundReader::new(Arc::clone(self), device, config)
    }

    /// Writer node bound to this card, using the default stream configuration.
    pub fn create_writer(self: &Arc<Self>) -> Result<SoundWriter, SoundCardError> {
        self.create_writer_with(StreamConfiguration::default())
    }

    pub fn create_writer_with(self: &Arc<Self>, config: StreamConfiguration) -> Result<SoundWriter, SoundCardError> {
        let device = self.create_playback_device()?;
        SoundWriter::new(Arc::clone(self), device, config)
    }

    pub(crate) fn create_capture_device(self: &Arc<Self>) -> Result<Box<dyn CaptureDevice>, SoundCardError> {
        if !self.capabilities.supports(Direction::Capture) {
            return Err(SoundCardError::Unsupported("capture"));
        }
        self.descriptor.create_capture(self)
    }

    pub(crate) fn create_playback_device(self: &Arc<Self>) -> Result<Box<dyn PlaybackDevice>, SoundCardError> {
        if !self.capabilities.supports(Direction::Playback) {
            return Err(SoundCardError::Unsupported("playback"));
        }
        self.descriptor.create_playback(self)
    }

    /// Set a mixer level in percent. Values above 100 are clamped.
    pub fn set_level(&self, element: MixerElement, percent: u8) -> Result<(), SoundCardError> {
        self.descriptor.set_level(self, element, percent.min(100))
    }

    pub fn get_level(&self, element: MixerElement) -> Result<u8, SoundCardError> {
        self.descriptor.get_level(self, element)
    }

    pub fn set_mute(&self, element: MixerElement, muted: bool) -> Result<(), SoundCardError> {
        self.descriptor.set_mute(self, element, muted)
    }

    pub fn get_mute(&self, element: MixerElement) -> Result<bool, SoundCardError> {
        self.descriptor.get_mute(self, element)
    }

    pub fn set_capture_source(&self, source: CaptureSource) -> Result<(), SoundCardError> {
        self.descriptor.set_capture_source(self, source)
    }
}

impl Drop for SoundCard {
    fn drop(&mut self) {
        self.descriptor.uninit(self);
    }
}

impl fmt::Debug for SoundCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundCard")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}
