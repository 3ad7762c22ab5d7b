//! Deterministic in-process backend.
//!
//! Cards are described by [`NullCardSpec`]s and can be plugged or unplugged at
//! runtime. Capture data is injected by hand and playback ticks are recorded,
//! both through a [`NullTap`], so graph behavior can be checked without audio
//! hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::card::{Capabilities, CaptureSource, MixerElement};
use crate::models::error::SoundCardError;
use crate::models::format::{StreamFormat, StreamRequest};
use crate::processing::stream_pipe::StreamPipe;
use crate::registry::card::SoundCard;
use crate::traits::descriptor::{CardData, DetectedCard, SoundCardDescriptor};
use crate::traits::device::{CaptureDevice, PlaybackDevice};

pub const NULL_DRIVER_TYPE: &str = "Null";

const DEFAULT_LEVEL: u8 = 75;

/// Description of one synthetic device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullCardSpec {
    pub name: String,
    pub capabilities: Capabilities,
    /// Rate the device insists on, `None` to accept any request.
    pub native_rate: Option<u32>,
}

impl NullCardSpec {
    pub fn new(name: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            name: name.into(),
            capabilities,
            native_rate: None,
        }
    }

    pub fn duplex(name: impl Into<String>) -> Self {
        Self::new(name, Capabilities::DUPLEX)
    }

    pub fn capture_only(name: impl Into<String>) -> Self {
        Self::new(name, Capabilities::CAPTURE)
    }

    pub fn playback_only(name: impl Into<String>) -> Self {
        Self::new(name, Capabilities::PLAYBACK)
    }

    pub fn with_native_rate(mut self, rate: u32) -> Self {
        self.native_rate = Some(rate);
        self
    }
}

/// Mixer kept in memory, one level and mute flag per element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareMixer {
    levels: [u8; 3],
    mutes: [bool; 3],
    source: CaptureSource,
}

impl SoftwareMixer {
    pub fn level(&self, element: MixerElement) -> u8 {
        self.levels[element.index()]
    }

    pub fn set_level(&mut self, element: MixerElement, percent: u8) {
        self.levels[element.index()] = percent.min(100);
    }

    pub fn is_muted(&self, element: MixerElement) -> bool {
        self.mutes[element.index()]
    }

    pub fn set_muted(&mut self, element: MixerElement, muted: bool) {
        self.mutes[element.index()] = muted;
    }

    pub fn capture_source(&self) -> CaptureSource {
        self.source
    }
}

impl Default for SoftwareMixer {
    fn default() -> Self {
        Self {
            levels: [DEFAULT_LEVEL; 3],
            mutes: [false; 3],
            source: CaptureSource::default(),
        }
    }
}

#[derive(Debug, Default)]
struct TapState {
    capture: Option<StreamPipe>,
    capture_open: bool,
    capture_running: bool,
    playback_open: bool,
    played: Vec<Vec<u8>>,
    lost: bool,
}

/// Test handle on the streams of one null card.
///
/// Cloning yields another handle to the same streams.
#[derive(Debug, Clone, Default)]
pub struct NullTap {
    state: Arc<Mutex<TapState>>,
}

impl NullTap {
    fn new() -> Self {
        Self::default()
    }

    /// Deliver bytes as if the hardware captured them. Returns `false` when
    /// no capture stream is running.
    pub fn inject(&self, bytes: &[u8]) -> bool {
        let state = self.state.lock();
        match &state.capture {
            Some(pipe) if state.capture_running && !state.lost => {
                pipe.push(bytes);
                true
            }
            _ => false,
        }
    }

    /// Every tick written to the playback stream so far.
    pub fn played(&self) -> Vec<Vec<u8>> {
        self.state.lock().played.clone()
    }

    /// Simulate the device vanishing under open streams.
    pub fn unplug(&self) {
        let mut state = self.state.lock();
        state.lost = true;
        if let Some(pipe) = &state.capture {
            pipe.mark_lost();
        }
    }

    pub fn is_capture_open(&self) -> bool {
        self.state.lock().capture_open
    }

    pub fn is_playback_open(&self) -> bool {
        self.state.lock().playback_open
    }
}

/// Private data of a null card.
#[derive(Debug, Clone)]
pub struct NullCardData {
    native_rate: Option<u32>,
    mixer: SoftwareMixer,
    tap: NullTap,
}

impl NullCardData {
    fn new(spec: &NullCardSpec) -> Self {
        Self {
            native_rate: spec.native_rate,
            mixer: SoftwareMixer::default(),
            tap: NullTap::new(),
        }
    }

    pub fn mixer(&self) -> &SoftwareMixer {
        &self.mixer
    }
}

/// The null backend.
#[derive(Debug, Default)]
pub struct NullDriver {
    specs: Mutex<Vec<NullCardSpec>>,
    fail_detect: AtomicBool,
    live: AtomicUsize,
    unloaded: AtomicBool,
}

impl NullDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cards(specs: Vec<NullCardSpec>) -> Self {
        Self {
            specs: Mutex::new(specs),
            ..Self::default()
        }
    }

    /// Make a device appear on the next detection pass.
    pub fn plug(&self, spec: NullCardSpec) {
        self.specs.lock().push(spec);
    }

    /// Make a device disappear from the next detection pass. Returns whether
    /// it was present.
    pub fn unplug(&self, name: &str) -> bool {
        let mut specs = self.specs.lock();
        let before = specs.len();
        specs.retain(|s| s.name != name);
        before != specs.len()
    }

    pub fn set_detect_failure(&self, fail: bool) {
        self.fail_detect.store(fail, Ordering::SeqCst);
    }

    /// Cards of this backend currently alive (initialized, not yet uninitialized).
    pub fn live_cards(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn was_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::SeqCst)
    }

    /// Stream tap of a null card, `None` for cards of other backends.
    pub fn tap(card: &SoundCard) -> Option<NullTap> {
        card.with_data(|data: &mut NullCardData| data.tap.clone())
    }

    fn with_data<R>(card: &SoundCard, f: impl FnOnce(&mut NullCardData) -> R) -> Result<R, SoundCardError> {
        card.with_data(f)
            .ok_or_else(|| SoundCardError::InvalidState(format!("{} is not a null card", card.id())))
    }
}

impl SoundCardDescriptor for NullDriver {
    fn driver_type(&self) -> &str {
        NULL_DRIVER_TYPE
    }

    fn directions(&self) -> Capabilities {
        Capabilities::DUPLEX
    }

    fn detect(&self) -> Result<Vec<DetectedCard>, SoundCardError> {
        if self.fail_detect.load(Ordering::SeqCst) {
            return Err(SoundCardError::Backend("simulated detection failure".into()));
        }
        Ok(self
            .specs
            .lock()
            .iter()
            .map(|spec| DetectedCard::new(spec.name.clone(), spec.capabilities, NullCardData::new(spec)))
            .collect())
    }

    fn init(&self, card: &SoundCard) {
        self.live.fetch_add(1, Ordering::SeqCst);
        log::trace!("null card {} initialized", card.id());
    }

    fn uninit(&self, card: &SoundCard) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        log::trace!("null card {} released", card.id());
    }

    fn set_level(&self, card: &SoundCard, element: MixerElement, percent: u8) -> Result<(), SoundCardError> {
        Self::with_data(card, |d| d.mixer.set_level(element, percent))
    }

    fn get_level(&self, card: &SoundCard, element: MixerElement) -> Result<u8, SoundCardError> {
        Self::with_data(card, |d| d.mixer.level(element))
    }

    fn set_mute(&self, card: &SoundCard, element: MixerElement, muted: bool) -> Result<(), SoundCardError> {
        Self::with_data(card, |d| d.mixer.set_muted(element, muted))
    }

    fn get_mute(&self, card: &SoundCard, element: MixerElement) -> Result<bool, SoundCardError> {
        Self::with_data(card, |d| d.mixer.is_muted(element))
    }

    fn set_capture_source(&self, card: &SoundCard, source: CaptureSource) -> Result<(), SoundCardError> {
        Self::with_data(card, |d| d.mixer.source = source)
    }

    fn create_capture(&self, card: &Arc<SoundCard>) -> Result<Box<dyn CaptureDevice>, SoundCardError> {
        let (tap, native_rate) = Self::with_data(card, |d| (d.tap.clone(), d.native_rate))?;
        Ok(Box::new(NullCapture {
            id: card.id().to_string(),
            tap,
            native_rate,
            open: false,
        }))
    }

    fn create_playback(&self, card: &Arc<SoundCard>) -> Result<Box<dyn PlaybackDevice>, SoundCardError> {
        let (tap, native_rate) = Self::with_data(card, |d| (d.tap.clone(), d.native_rate))?;
        Ok(Box::new(NullPlayback {
            id: card.id().to_string(),
            tap,
            native_rate,
            open: false,
        }))
    }

    fn duplicate(&self, card: &SoundCard) -> Result<Box<dyn CardData>, SoundCardError> {
        let copy = Self::with_data(card, |d| NullCardData {
            native_rate: d.native_rate,
            mixer: d.mixer.clone(),
            tap: NullTap::new(),
        })?;
        Ok(Box::new(copy))
    }

    fn unload(&self) {
        self.unloaded.store(true, Ordering::SeqCst);
    }
}

fn negotiate(request: &StreamRequest, native_rate: Option<u32>) -> StreamFormat {
    request.format.with_rate(native_rate.unwrap_or(request.format.rate))
}

struct NullCapture {
    id: String,
    tap: NullTap,
    native_rate: Option<u32>,
    open: bool,
}

impl CaptureDevice for NullCapture {
    fn open(&mut self, request: &StreamRequest, pipe: StreamPipe) -> Result<StreamFormat, SoundCardError> {
        let mut state = self.tap.state.lock();
        if state.lost {
            return Err(SoundCardError::DeviceNotFound(self.id.clone()));
        }
        if state.capture_open {
            return Err(SoundCardError::DeviceBusy(self.id.clone()));
        }
        state.capture_open = true;
        state.capture = Some(pipe);
        self.open = true;
        Ok(negotiate(request, self.native_rate))
    }

    fn start(&mut self) -> Result<(), SoundCardError> {
        if !self.open {
            return Err(SoundCardError::InvalidState("capture not open".into()));
        }
        self.tap.state.lock().capture_running = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.open {
            self.tap.state.lock().capture_running = false;
        }
    }

    fn close(&mut self) {
        // a stream whose open was refused must not release the owner's tap
        if !self.open {
            return;
        }
        let mut state = self.tap.state.lock();
        state.capture_running = false;
        state.capture_open = false;
        state.capture = None;
        self.open = false;
    }
}

struct NullPlayback {
    id: String,
    tap: NullTap,
    native_rate: Option<u32>,
    open: bool,
}

impl PlaybackDevice for NullPlayback {
    fn open(&mut self, request: &StreamRequest) -> Result<StreamFormat, SoundCardError> {
        let mut state = self.tap.state.lock();
        if state.lost {
            return Err(SoundCardError::DeviceNotFound(self.id.clone()));
        }
        if state.playback_open {
            return Err(SoundCardError::DeviceBusy(self.id.clone()));
        }
        state.playback_open = true;
        self.open = true;
        Ok(negotiate(request, self.native_rate))
    }

    fn start(&mut self) -> Result<(), SoundCardError> {
        Ok(())
    }

    fn write(&mut self, tick: &[u8]) -> Result<(), SoundCardError> {
        let mut state = self.tap.state.lock();
        if state.lost {
            return Err(SoundCardError::DeviceLost);
        }
        state.played.push(tick.to_vec());
        Ok(())
    }

    fn stop(&mut self) {}

    fn close(&mut self) {
        if self.open {
            self.tap.state.lock().playback_open = false;
            self.open = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn request() -> StreamRequest {
        StreamRequest {
            format: StreamFormat::default(),
            tick_interval: Duration::from_millis(10),
            max_buffered_ticks: 4,
        }
    }

    fn card(driver: &Arc<NullDriver>) -> Arc<SoundCard> {
        let detected = driver.detect().unwrap().pop().unwrap();
        Arc::new(SoundCard::new(driver.clone(), detected))
    }

    #[test]
    fn inject_only_while_running() {
        let driver = Arc::new(NullDriver::with_cards(vec![NullCardSpec::duplex("n")]));
        let card = card(&driver);
        let tap = NullDriver::tap(&card).unwrap();
        let mut capture = driver.create_capture(&card).unwrap();
        let pipe = StreamPipe::new();

        capture.open(&request(), pipe.clone()).unwrap();
        assert!(!tap.inject(&[1, 2]));
        capture.start().unwrap();
        assert!(tap.inject(&[1, 2]));
        capture.stop();
        assert!(!tap.inject(&[3]));
        capture.close();

        assert_eq!(pipe.available(), 2);
        assert!(!tap.is_capture_open());
    }

    #[test]
    fn failed_second_open_keeps_first() {
        let driver = Arc::new(NullDriver::with_cards(vec![NullCardSpec::duplex("n")]));
        let card = card(&driver);
        let mut first = driver.create_playback(&card).unwrap();
        let mut second = driver.create_playback(&card).unwrap();

        first.open(&request()).unwrap();
        assert!(matches!(second.open(&request()), Err(SoundCardError::DeviceBusy(_))));
        second.close();
        assert!(NullDriver::tap(&card).unwrap().is_playback_open());
    }

    #[test]
    fn write_after_unplug_is_lost() {
        let driver = Arc::new(NullDriver::with_cards(vec![NullCardSpec::duplex("n")]));
        let card = card(&driver);
        let mut playback = driver.create_playback(&card).unwrap();
        playback.open(&request()).unwrap();

        NullDriver::tap(&card).unwrap().unplug();
        assert_eq!(playback.write(&[0; 4]), Err(SoundCardError::DeviceLost));
    }

    #[test]
    fn mute_and_source_are_stored() {
        let driver = Arc::new(NullDriver::with_cards(vec![NullCardSpec::duplex("n")]));
        let card = card(&driver);
        card.set_mute(MixerElement::Capture, true).unwrap();
        card.set_capture_source(CaptureSource::Line).unwrap();

        assert_eq!(card.get_mute(MixerElement::Capture), Ok(true));
        assert_eq!(card.get_mute(MixerElement::Master), Ok(false));
        let source = card.with_data(|d: &mut NullCardData| d.mixer().capture_source());
        assert_eq!(source, Some(CaptureSource::Line));
    }
}
