//! OSS ioctl numbers and wrappers.

use std::io;
use std::mem;
use std::os::fd::RawFd;

use nix::libc;

use soundcard_core::SoundCardError;

pub const AFMT_S16_LE: i32 = 0x0000_0010;

pub const SOUND_MIXER_VOLUME: u8 = 0;
pub const SOUND_MIXER_PCM: u8 = 4;
pub const SOUND_MIXER_LINE: u8 = 6;
pub const SOUND_MIXER_MIC: u8 = 7;
pub const SOUND_MIXER_IGAIN: u8 = 12;
pub const SOUND_MIXER_RECSRC: u8 = 0xff;

const SNDCTL_DSP_MAGIC: u8 = b'P';
const SNDCTL_DSP_RESET: u8 = 0;
const SNDCTL_DSP_SPEED: u8 = 2;
const SNDCTL_DSP_GETBLKSIZE: u8 = 4;
const SNDCTL_DSP_SETFMT: u8 = 5;
const SNDCTL_DSP_CHANNELS: u8 = 6;

nix::ioctl_none!(oss_reset, SNDCTL_DSP_MAGIC, SNDCTL_DSP_RESET);
nix::ioctl_readwrite!(oss_set_speed, SNDCTL_DSP_MAGIC, SNDCTL_DSP_SPEED, i32);
nix::ioctl_readwrite!(oss_get_blksize, SNDCTL_DSP_MAGIC, SNDCTL_DSP_GETBLKSIZE, i32);
nix::ioctl_readwrite!(oss_set_format, SNDCTL_DSP_MAGIC, SNDCTL_DSP_SETFMT, i32);
nix::ioctl_readwrite!(oss_set_channels, SNDCTL_DSP_MAGIC, SNDCTL_DSP_CHANNELS, i32);

const SOUND_MIXER_MAGIC: u8 = b'M';

/// Parameters actually accepted by a dsp device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DspParams {
    pub rate: u32,
    pub channels: u16,
    pub block_size: usize,
}

/// Set 16-bit format, channel count and rate, in the order OSS requires.
pub fn configure_dsp(fd: RawFd, rate: u32, channels: u16) -> Result<DspParams, SoundCardError> {
    let mut format = AFMT_S16_LE;
    unsafe { oss_set_format(fd, &mut format) }.map_err(|e| ioctl_error("SNDCTL_DSP_SETFMT", e))?;
    if format != AFMT_S16_LE {
        return Err(SoundCardError::UnsupportedFormat(format!(
            "device refused signed 16-bit, offered format {:#x}",
            format
        )));
    }

    let mut ch = channels as i32;
    unsafe { oss_set_channels(fd, &mut ch) }.map_err(|e| ioctl_error("SNDCTL_DSP_CHANNELS", e))?;
    if ch <= 0 {
        return Err(SoundCardError::UnsupportedFormat(format!("channel count {}", ch)));
    }

    let mut speed = rate as i32;
    unsafe { oss_set_speed(fd, &mut speed) }.map_err(|e| ioctl_error("SNDCTL_DSP_SPEED", e))?;
    if speed <= 0 {
        return Err(SoundCardError::UnsupportedFormat(format!("rate {}", speed)));
    }

    let mut block = 0i32;
    if let Err(e) = unsafe { oss_get_blksize(fd, &mut block) } {
        log::debug!("SNDCTL_DSP_GETBLKSIZE failed: {}", e);
    }

    Ok(DspParams {
        rate: speed as u32,
        channels: ch as u16,
        block_size: block.max(0) as usize,
    })
}

/// Drop whatever the device still buffers.
pub fn reset_dsp(fd: RawFd) {
    if let Err(e) = unsafe { oss_reset(fd) } {
        log::debug!("SNDCTL_DSP_RESET failed: {}", e);
    }
}

/// `MIXER_READ(dev)`.
pub fn mixer_read(fd: RawFd, dev: u8) -> Result<i32, SoundCardError> {
    let mut value: libc::c_int = 0;
    let request = nix::request_code_read!(SOUND_MIXER_MAGIC, dev, mem::size_of::<libc::c_int>());
    let res = unsafe { libc::ioctl(fd, request as _, &mut value as *mut libc::c_int) };
    if res < 0 {
        return Err(mixer_error(dev));
    }
    Ok(value)
}

/// `MIXER_WRITE(dev)`.
pub fn mixer_write(fd: RawFd, dev: u8, value: i32) -> Result<(), SoundCardError> {
    let mut value: libc::c_int = value;
    let request = nix::request_code_readwrite!(SOUND_MIXER_MAGIC, dev, mem::size_of::<libc::c_int>());
    let res = unsafe { libc::ioctl(fd, request as _, &mut value as *mut libc::c_int) };
    if res < 0 {
        return Err(mixer_error(dev));
    }
    Ok(())
}

/// Stereo mixer value with both sides at `percent`.
pub fn encode_level(percent: u8) -> i32 {
    let p = percent.min(100) as i32;
    p | (p << 8)
}

/// Left-channel level of a mixer value.
pub fn decode_level(value: i32) -> u8 {
    (value & 0xff).min(100) as u8
}

fn ioctl_error(name: &str, errno: nix::errno::Errno) -> SoundCardError {
    SoundCardError::ConfigurationFailed(format!("{} failed: {}", name, errno))
}

fn mixer_error(dev: u8) -> SoundCardError {
    SoundCardError::Backend(format!("mixer ioctl on device {} failed: {}", dev, io::Error::last_os_error()))
}
