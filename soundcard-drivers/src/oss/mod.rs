//! Open Sound System backend.
//!
//! Cards are the `/dev/dsp*` nodes present at detection time, each paired with
//! the `/dev/mixer*` node of the same index. Streams do blocking I/O on
//! driver-owned threads; see [`stream`].

pub mod ioctl;
pub mod mixer;
pub mod stream;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use soundcard_core::{
    Capabilities, CaptureDevice, CaptureSource, DetectedCard, MixerElement, PlaybackDevice, SoundCard,
    SoundCardDescriptor, SoundCardError,
};

use self::mixer::OssMixer;
use self::stream::{OssCapture, OssPlayback};

pub const OSS_DRIVER_TYPE: &str = "OSS";

/// Highest dsp index probed.
const MAX_DEVICES: usize = 10;

/// Private data of an OSS card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OssCardData {
    pub dsp_path: PathBuf,
    pub mixer: Option<OssMixer>,
}

/// The OSS backend.
pub struct OssDriver {
    dev_root: PathBuf,
}

impl OssDriver {
    pub fn new() -> Self {
        Self::with_dev_root("/dev")
    }

    /// Probe device nodes under another directory.
    pub fn with_dev_root(root: impl Into<PathBuf>) -> Self {
        Self { dev_root: root.into() }
    }

    fn node(&self, base: &str, index: usize) -> PathBuf {
        if index == 0 {
            self.dev_root.join(base)
        } else {
            self.dev_root.join(format!("{}{}", base, index))
        }
    }

    fn data(card: &SoundCard) -> Result<OssCardData, SoundCardError> {
        card.with_data(|d: &mut OssCardData| d.clone())
            .ok_or_else(|| SoundCardError::InvalidState(format!("{} is not an OSS card", card.id())))
    }

    fn mixer(card: &SoundCard) -> Result<OssMixer, SoundCardError> {
        Self::data(card)?
            .mixer
            .ok_or(SoundCardError::Unsupported("mixer"))
    }
}

impl Default for OssDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundCardDescriptor for OssDriver {
    fn driver_type(&self) -> &str {
        OSS_DRIVER_TYPE
    }

    fn directions(&self) -> Capabilities {
        Capabilities::DUPLEX
    }

    fn detect(&self) -> Result<Vec<DetectedCard>, SoundCardError> {
        let mut cards = Vec::new();
        for index in 0..MAX_DEVICES {
            let dsp_path = self.node("dsp", index);
            if !dsp_path.exists() {
                continue;
            }
            let mixer_path = self.node("mixer", index);
            let mixer = mixer_path.exists().then(|| OssMixer::new(mixer_path));
            let data = OssCardData {
                dsp_path: dsp_path.clone(),
                mixer,
            };
            cards.push(DetectedCard::new(dsp_path.display().to_string(), Capabilities::DUPLEX, data));
        }
        log::debug!("OSS: {} dsp node(s) under {}", cards.len(), self.dev_root.display());
        Ok(cards)
    }

    fn set_level(&self, card: &SoundCard, element: MixerElement, percent: u8) -> Result<(), SoundCardError> {
        Self::mixer(card)?.set_level(element, percent)
    }

    fn get_level(&self, card: &SoundCard, element: MixerElement) -> Result<u8, SoundCardError> {
        Self::mixer(card)?.get_level(element)
    }

    fn set_capture_source(&self, card: &SoundCard, source: CaptureSource) -> Result<(), SoundCardError> {
        Self::mixer(card)?.set_capture_source(source)
    }

    fn create_capture(&self, card: &Arc<SoundCard>) -> Result<Box<dyn CaptureDevice>, SoundCardError> {
        Ok(Box::new(OssCapture::new(Self::data(card)?.dsp_path)))
    }

    fn create_playback(&self, card: &Arc<SoundCard>) -> Result<Box<dyn PlaybackDevice>, SoundCardError> {
        Ok(Box::new(OssPlayback::new(Self::data(card)?.dsp_path)))
    }
}

/// Map an `open(2)` failure on a device node to the error callers act on.
pub(crate) fn open_error(path: &Path, err: io::Error) -> SoundCardError {
    let path = path.display().to_string();
    match err.raw_os_error() {
        Some(nix::libc::EBUSY) => SoundCardError::DeviceBusy(path),
        Some(nix::libc::EACCES) | Some(nix::libc::EPERM) => SoundCardError::PermissionDenied(path),
        Some(nix::libc::ENOENT) | Some(nix::libc::ENODEV) | Some(nix::libc::ENXIO) => {
            SoundCardError::DeviceNotFound(path)
        }
        _ => SoundCardError::Backend(format!("{}: {}", path, err)),
    }
}
