use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use soundcard_core::{CaptureSource, MixerElement, SoundCardError};

use super::ioctl::{self, SOUND_MIXER_IGAIN, SOUND_MIXER_LINE, SOUND_MIXER_MIC, SOUND_MIXER_PCM, SOUND_MIXER_RECSRC, SOUND_MIXER_VOLUME};
use super::open_error;

/// `/dev/mixer*` node paired with a dsp device. Opened per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OssMixer {
    path: PathBuf,
}

impl OssMixer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_level(&self, element: MixerElement, percent: u8) -> Result<(), SoundCardError> {
        let file = self.open()?;
        ioctl::mixer_write(file.as_raw_fd(), device_for(element), ioctl::encode_level(percent))
    }

    pub fn get_level(&self, element: MixerElement) -> Result<u8, SoundCardError> {
        let file = self.open()?;
        ioctl::mixer_read(file.as_raw_fd(), device_for(element)).map(ioctl::decode_level)
    }

    pub fn set_capture_source(&self, source: CaptureSource) -> Result<(), SoundCardError> {
        let file = self.open()?;
        ioctl::mixer_write(file.as_raw_fd(), SOUND_MIXER_RECSRC, recsrc_mask(source))
    }

    fn open(&self) -> Result<File, SoundCardError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| open_error(&self.path, e))
    }
}

fn device_for(element: MixerElement) -> u8 {
    match element {
        MixerElement::Master => SOUND_MIXER_VOLUME,
        MixerElement::Playback => SOUND_MIXER_PCM,
        MixerElement::Capture => SOUND_MIXER_IGAIN,
    }
}

fn recsrc_mask(source: CaptureSource) -> i32 {
    match source {
        CaptureSource::Mic => 1 << SOUND_MIXER_MIC,
        CaptureSource::Line => 1 << SOUND_MIXER_LINE,
    }
}
