//! Blocking dsp I/O on driver-owned threads.
//!
//! OSS offers no callback: a capture thread loops on `read` and pushes into
//! the node's pipe, a playback thread drains its own pipe and loops on
//! `write`. Both block in the kernel, never on the ticker thread.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;

use soundcard_core::processing::pcm;
use soundcard_core::{
    CaptureDevice, PlaybackDevice, SoundCardError, StreamFormat, StreamPipe, StreamRequest, XrunAction, XrunRecovery,
};

use super::ioctl::{self, DspParams};
use super::open_error;

/// An open dsp node and the parameters it accepted.
struct Dsp {
    file: Arc<File>,
    params: DspParams,
}

impl Dsp {
    /// Open without blocking on a busy device, then switch to blocking I/O.
    fn open(path: &Path, write: bool, request: &StreamRequest) -> Result<Self, SoundCardError> {
        let mut options = OpenOptions::new();
        if write {
            options.write(true);
        } else {
            options.read(true);
        }
        let file = options
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| open_error(path, e))?;
        fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(OFlag::empty()))
            .map_err(|e| SoundCardError::Backend(format!("failed to clear O_NONBLOCK: {}", e)))?;

        let params = ioctl::configure_dsp(file.as_raw_fd(), request.format.rate, request.format.channels)?;
        log::debug!(
            "{}: {} Hz, {} channel(s), block {} bytes",
            path.display(),
            params.rate,
            params.channels,
            params.block_size
        );
        Ok(Self {
            file: Arc::new(file),
            params,
        })
    }

    /// Bytes per read or write: one tick at the device's channel count.
    fn period_bytes(&self, request: &StreamRequest) -> usize {
        let format = StreamFormat::new(self.params.rate, self.params.channels);
        format.bytes_for(request.tick_interval).max(format.bytes_per_frame())
    }
}

/// Whether a failed read or write means the device node went away, as
/// opposed to an overrun or underrun the driver can be reset out of.
fn is_fatal(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENODEV) | Some(libc::ENXIO) | Some(libc::EBADF))
}

/// I/O thread handle shared by both directions.
#[derive(Default)]
struct Worker {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn spawn(&mut self, name: &str, body: impl FnOnce(Arc<AtomicBool>) + Send + 'static) -> Result<(), SoundCardError> {
        if self.handle.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || body(running))
            .map_err(|e| SoundCardError::Backend(format!("failed to spawn {} thread: {}", name, e)))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Ask the thread to stop and wait for it. Returns within one period.
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// --- Capture ---

pub struct OssCapture {
    path: PathBuf,
    dsp: Option<Dsp>,
    pipe: Option<StreamPipe>,
    graph_channels: usize,
    period: usize,
    worker: Worker,
}

impl OssCapture {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            dsp: None,
            pipe: None,
            graph_channels: 1,
            period: 0,
            worker: Worker::default(),
        }
    }
}

impl CaptureDevice for OssCapture {
    fn open(&mut self, request: &StreamRequest, pipe: StreamPipe) -> Result<StreamFormat, SoundCardError> {
        if self.dsp.is_some() {
            return Err(SoundCardError::InvalidState("capture already open".into()));
        }
        let dsp = Dsp::open(&self.path, false, request)?;
        self.period = dsp.period_bytes(request);
        self.graph_channels = request.format.channels as usize;
        let rate = dsp.params.rate;
        self.dsp = Some(dsp);
        self.pipe = Some(pipe);
        Ok(request.format.with_rate(rate))
    }

    fn start(&mut self) -> Result<(), SoundCardError> {
        let (dsp, pipe) = match (&self.dsp, &self.pipe) {
            (Some(dsp), Some(pipe)) => (dsp, pipe.clone()),
            _ => return Err(SoundCardError::InvalidState("capture not open".into())),
        };
        let file = Arc::clone(&dsp.file);
        let device_channels = dsp.params.channels as usize;
        let graph_channels = self.graph_channels;
        let period = self.period;
        let name = self.path.display().to_string();

        self.worker.spawn("oss-capture", move |running| {
            let mut buf = vec![0u8; period];
            let mut recovery = XrunRecovery::new(pipe.clone());
            while running.load(Ordering::SeqCst) {
                match (&*file).read(&mut buf) {
                    Ok(0) => continue,
                    Ok(n) => {
                        recovery.on_success();
                        let samples = pcm::le_bytes_to_i16(&buf[..n]);
                        let samples = pcm::remap_channels(&samples, device_channels, graph_channels);
                        pipe.push_owned(pcm::i16_to_le_bytes(&samples));
                    }
                    Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => continue,
                    Err(e) => match recovery.on_error(is_fatal(&e)) {
                        XrunAction::Reprime => {
                            log::warn!("{}: read failed, resetting: {}", name, e);
                            ioctl::reset_dsp(file.as_raw_fd());
                        }
                        XrunAction::Lost => {
                            log::error!("{}: read failed, device lost: {}", name, e);
                            break;
                        }
                    },
                }
            }
        })
    }

    fn stop(&mut self) {
        self.worker.stop();
    }

    fn close(&mut self) {
        self.worker.stop();
        if let Some(dsp) = self.dsp.take() {
            ioctl::reset_dsp(dsp.file.as_raw_fd());
        }
        self.pipe = None;
    }
}

// --- Playback ---

pub struct OssPlayback {
    path: PathBuf,
    dsp: Option<Dsp>,
    pipe: StreamPipe,
    graph_channels: usize,
    period: usize,
    worker: Worker,
}

impl OssPlayback {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            dsp: None,
            pipe: StreamPipe::new(),
            graph_channels: 1,
            period: 0,
            worker: Worker::default(),
        }
    }
}

impl PlaybackDevice for OssPlayback {
    fn open(&mut self, request: &StreamRequest) -> Result<StreamFormat, SoundCardError> {
        if self.dsp.is_some() {
            return Err(SoundCardError::InvalidState("playback already open".into()));
        }
        let dsp = Dsp::open(&self.path, true, request)?;
        self.period = dsp.period_bytes(request);
        self.graph_channels = request.format.channels as usize;
        self.pipe = StreamPipe::bounded(request.max_buffered_bytes() * 2);
        let rate = dsp.params.rate;
        self.dsp = Some(dsp);
        Ok(request.format.with_rate(rate))
    }

    fn start(&mut self) -> Result<(), SoundCardError> {
        let dsp = self
            .dsp
            .as_ref()
            .ok_or_else(|| SoundCardError::InvalidState("playback not open".into()))?;
        let file = Arc::clone(&dsp.file);
        let device_channels = dsp.params.channels as usize;
        let graph_channels = self.graph_channels;
        let pipe = self.pipe.clone();
        let name = self.path.display().to_string();
        // graph bytes that make up one device period
        let graph_period = self.period / device_channels.max(1) * graph_channels;

        self.worker.spawn("oss-playback", move |running| {
            let mut tick = vec![0u8; graph_period];
            let mut recovery = XrunRecovery::new(pipe.clone());
            while running.load(Ordering::SeqCst) {
                // silence on underrun keeps the device clocked
                pipe.fill(&mut tick);
                let samples = pcm::remap_channels(&pcm::le_bytes_to_i16(&tick), graph_channels, device_channels);
                let out = pcm::i16_to_le_bytes(&samples);
                match (&*file).write_all(&out) {
                    Ok(()) => recovery.on_success(),
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => match recovery.on_error(is_fatal(&e)) {
                        XrunAction::Reprime => {
                            log::warn!("{}: write failed, resetting: {}", name, e);
                            ioctl::reset_dsp(file.as_raw_fd());
                        }
                        XrunAction::Lost => {
                            log::error!("{}: write failed, device lost: {}", name, e);
                            break;
                        }
                    },
                }
            }
        })
    }

    fn write(&mut self, tick: &[u8]) -> Result<(), SoundCardError> {
        if self.pipe.is_lost() {
            return Err(SoundCardError::DeviceLost);
        }
        self.pipe.push(tick);
        Ok(())
    }

    fn stop(&mut self) {
        self.worker.stop();
    }

    fn close(&mut self) {
        self.worker.stop();
        if let Some(dsp) = self.dsp.take() {
            ioctl::reset_dsp(dsp.file.as_raw_fd());
        }
        self.pipe.clear();
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

    #[test]
    fn missing_device_fails_open() {
        let mut capture = OssCapture::new(PathBuf::from("/nonexistent/dsp7"));
        let err = capture.open(&request(), StreamPipe::new()).unwrap_err();
        assert!(matches!(err, SoundCardError::DeviceNotFound(_)));
        // closing a never-opened device is harmless
        capture.close();
    }

    #[test]
    fn only_vanished_nodes_are_fatal() {
        assert!(is_fatal(&io::Error::from_raw_os_error(libc::ENODEV)));
        assert!(is_fatal(&io::Error::from_raw_os_error(libc::ENXIO)));
        assert!(is_fatal(&io::Error::from_raw_os_error(libc::EBADF)));
        assert!(!is_fatal(&io::Error::from_raw_os_error(libc::EIO)));
        assert!(!is_fatal(&io::Error::from_raw_os_error(libc::EAGAIN)));
        assert!(!is_fatal(&io::Error::new(ErrorKind::Other, "overrun")));
    }

    #[test]
    fn start_before_open_is_rejected() {
        let mut playback = OssPlayback::new(PathBuf::from("/nonexistent/dsp7"));
        assert!(matches!(playback.start(), Err(SoundCardError::InvalidState(_))));
        assert!(playback.write(&[0; 4]).is_ok());
    }
}
