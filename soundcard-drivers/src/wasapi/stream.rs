//! Shared-mode WASAPI streams.
//!
//! Every COM object of a stream lives on one session thread: it activates the
//! `IAudioClient`, reports the endpoint mix format back to `open`, then obeys
//! start and stop commands while polling the endpoint buffer. The graph node
//! only ever sees the [`StreamPipe`].

use std::sync::mpsc::{self, TryRecvError};
use std::thread;
use std::time::Duration;

use windows::core::{Error, HRESULT, PCWSTR};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use soundcard_core::processing::pcm;
use soundcard_core::{
    CaptureDevice, PlaybackDevice, SoundCardError, StreamFormat, StreamPipe, StreamRequest, XrunAction, XrunRecovery,
};

use super::enumerator::{ComGuard, Endpoints};

/// Endpoint buffer size in 100 ns units (100 ms).
const BUFFER_DURATION: i64 = 1_000_000;

/// Poll period of the session thread.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long `open` waits for the session thread to initialize the client.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Endpoint mix format as the session thread sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MixFormat {
    rate: u32,
    channels: usize,
    float: bool,
}

impl MixFormat {
    fn bytes_per_frame(&self) -> usize {
        self.channels * if self.float { 4 } else { 2 }
    }
}

enum Command {
    Start(mpsc::Sender<Result<(), SoundCardError>>),
    Stop(mpsc::Sender<()>),
}

/// Handle on a session thread. Dropping the command sender ends it.
struct Session {
    commands: Option<mpsc::Sender<Command>>,
    handle: Option<thread::JoinHandle<()>>,
}

/// Per-direction buffer work done by the session thread while started.
trait Pump {
    /// Move whatever the endpoint has ready, or has room for.
    fn pump(&mut self) -> Result<(), Error>;
    fn pipe(&self) -> &StreamPipe;
}

impl Session {
    fn spawn<F, P>(name: &str, setup: F) -> Result<(Self, MixFormat), SoundCardError>
    where
        F: FnOnce() -> Result<(IAudioClient, P, MixFormat), SoundCardError> + Send + 'static,
        P: Pump,
    {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let _com = match ComGuard::new() {
                    Ok(guard) => guard,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let (client, pump) = match setup() {
                    Ok((client, pump, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        (client, pump)
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_session(&thread_name, &client, pump, cmd_rx);
            })
            .map_err(|e| SoundCardError::Backend(format!("failed to spawn {} thread: {}", name, e)))?;

        let mut session = Session {
            commands: Some(cmd_tx),
            handle: Some(handle),
        };
        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(format)) => Ok((session, format)),
            Ok(Err(e)) => {
                session.shutdown();
                Err(e)
            }
            Err(_) => {
                session.shutdown();
                Err(SoundCardError::Backend(format!("{} thread did not report", name)))
            }
        }
    }

    fn start(&self) -> Result<(), SoundCardError> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| SoundCardError::InvalidState("stream closed".into()))?;
        let (tx, rx) = mpsc::channel();
        commands.send(Command::Start(tx)).map_err(|_| SoundCardError::DeviceLost)?;
        rx.recv().map_err(|_| SoundCardError::DeviceLost)?
    }

    /// Returns once the session thread no longer touches the pipe.
    fn stop(&self) {
        if let Some(commands) = &self.commands {
            let (tx, rx) = mpsc::channel();
            if commands.send(Command::Stop(tx)).is_ok() {
                let _ = rx.recv();
            }
        }
    }

    fn shutdown(&mut self) {
        self.commands.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_session<P: Pump>(name: &str, client: &IAudioClient, mut pump: P, commands: mpsc::Receiver<Command>) {
    let mut started = false;
    let mut failed = false;
    let mut recovery = XrunRecovery::new(pump.pipe().clone());
    let _mmcss = register_pro_audio();

    loop {
        let command = if started {
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        };

        match command {
            Some(Command::Start(reply)) => {
                if failed {
                    let _ = reply.send(Err(SoundCardError::DeviceLost));
                    continue;
                }
                if !started {
                    let result = unsafe { client.Start() }
                        .map_err(|e| SoundCardError::Backend(format!("IAudioClient::Start failed: {}", e)));
                    started = result.is_ok();
                    let _ = reply.send(result);
                } else {
                    let _ = reply.send(Ok(()));
                }
            }
            Some(Command::Stop(ack)) => {
                if started {
                    let _ = unsafe { client.Stop() };
                    started = false;
                }
                let _ = ack.send(());
            }
            None => {
                thread::sleep(POLL_INTERVAL);
                let err = match pump.pump() {
                    Ok(()) => {
                        recovery.on_success();
                        continue;
                    }
                    Err(e) => e,
                };
                let mut action = recovery.on_error(is_fatal(err.code()));
                if action == XrunAction::Reprime {
                    log::warn!("{}: stream glitch, re-priming: {}", name, err);
                    if let Err(e) = reprime(client) {
                        log::warn!("{}: re-prime failed: {}", name, e);
                        action = recovery.on_reprime_failed();
                    }
                }
                if action == XrunAction::Lost {
                    log::error!("{}: device lost: {}", name, err);
                    let _ = unsafe { client.Stop() };
                    started = false;
                    failed = true;
                }
            }
        }
    }

    if started {
        let _ = unsafe { client.Stop() };
    }
}

/// Whether a stream error means the endpoint itself went away.
fn is_fatal(code: HRESULT) -> bool {
    code == AUDCLNT_E_DEVICE_INVALIDATED
}

/// Drop whatever the endpoint buffered and restart the stream.
fn reprime(client: &IAudioClient) -> Result<(), Error> {
    unsafe {
        client.Stop()?;
        client.Reset()?;
        client.Start()
    }
}

/// Raise the session thread to the "Pro Audio" MMCSS class. Best effort.
fn register_pro_audio() -> Option<windows::Win32::Foundation::HANDLE> {
    let mut task_index: u32 = 0;
    let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
    unsafe { AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index) }.ok()
}

/// Activate and initialize a shared-mode client on `endpoint_id`.
fn activate(endpoint_id: &str) -> Result<(IAudioClient, MixFormat), SoundCardError> {
    let endpoints = Endpoints::new()?;
    let device = endpoints.device(endpoint_id)?;
    unsafe {
        let client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| map_activate_error(endpoint_id, e))?;

        let mix_ptr = client
            .GetMixFormat()
            .map_err(|e| SoundCardError::ConfigurationFailed(format!("GetMixFormat failed: {}", e)))?;
        let mix = &*mix_ptr;
        let bits = mix.wBitsPerSample;
        let format = MixFormat {
            rate: mix.nSamplesPerSec,
            channels: mix.nChannels as usize,
            float: bits == 32,
        };

        let init = client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_NOPERSIST,
            BUFFER_DURATION,
            0,
            mix_ptr,
            None,
        );
        CoTaskMemFree(Some(mix_ptr as *const _ as *const _));
        init.map_err(|e| map_activate_error(endpoint_id, e))?;

        if bits != 32 && bits != 16 {
            return Err(SoundCardError::UnsupportedFormat(format!("{}-bit mix format", bits)));
        }
        Ok((client, format))
    }
}

fn map_activate_error(endpoint_id: &str, e: Error) -> SoundCardError {
    let code = e.code();
    if code == AUDCLNT_E_DEVICE_IN_USE {
        SoundCardError::DeviceBusy(endpoint_id.to_string())
    } else if code == AUDCLNT_E_DEVICE_INVALIDATED {
        SoundCardError::DeviceNotFound(endpoint_id.to_string())
    } else if code == windows::Win32::Foundation::E_ACCESSDENIED {
        SoundCardError::PermissionDenied(endpoint_id.to_string())
    } else {
        SoundCardError::ConfigurationFailed(format!("{}: {}", endpoint_id, e))
    }
}

/// Endpoint frames to 16-bit samples.
fn decode_frames(bytes: &[u8], float: bool) -> Vec<i16> {
    if float {
        bytes
            .chunks_exact(4)
            .map(|b| pcm::f32_to_i16(f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            .collect()
    } else {
        pcm::le_bytes_to_i16(bytes)
    }
}

/// 16-bit samples into endpoint frames. `out` is sized by the caller.
fn encode_frames(samples: &[i16], float: bool, out: &mut [u8]) {
    if float {
        for (dst, s) in out.chunks_exact_mut(4).zip(samples.iter().chain(std::iter::repeat(&0))) {
            dst.copy_from_slice(&pcm::i16_to_f32(*s).to_le_bytes());
        }
    } else {
        for (dst, s) in out.chunks_exact_mut(2).zip(samples.iter().chain(std::iter::repeat(&0))) {
            dst.copy_from_slice(&s.to_le_bytes());
        }
    }
}

// --- Capture ---

struct CapturePump {
    client: IAudioCaptureClient,
    format: MixFormat,
    graph_channels: usize,
    pipe: StreamPipe,
}

impl Pump for CapturePump {
    fn pump(&mut self) -> Result<(), Error> {
        unsafe {
            let mut packet = self.client.GetNextPacketSize()?;
            while packet > 0 {
                let mut data: *mut u8 = std::ptr::null_mut();
                let mut frames: u32 = 0;
                let mut flags: u32 = 0;
                self.client.GetBuffer(&mut data, &mut frames, &mut flags, None, None)?;

                if flags & (AUDCLNT_BUFFERFLAGS_DATA_DISCONTINUITY.0 as u32) != 0 {
                    self.pipe.note_xrun();
                }
                let len = frames as usize * self.format.bytes_per_frame();
                let samples = if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 || data.is_null() {
                    vec![0i16; frames as usize * self.format.channels]
                } else {
                    decode_frames(std::slice::from_raw_parts(data, len), self.format.float)
                };
                self.client.ReleaseBuffer(frames)?;

                let samples = pcm::remap_channels(&samples, self.format.channels, self.graph_channels);
                self.pipe.push_owned(pcm::i16_to_le_bytes(&samples));
                packet = self.client.GetNextPacketSize()?;
            }
        }
        Ok(())
    }

    fn pipe(&self) -> &StreamPipe {
        &self.pipe
    }
}

pub struct WasapiCapture {
    endpoint_id: String,
    session: Option<Session>,
}

impl WasapiCapture {
    pub fn new(endpoint_id: String) -> Self {
        Self {
            endpoint_id,
            session: None,
        }
    }
}

impl CaptureDevice for WasapiCapture {
    fn open(&mut self, request: &StreamRequest, pipe: StreamPipe) -> Result<StreamFormat, SoundCardError> {
        if self.session.is_some() {
            return Err(SoundCardError::InvalidState("capture already open".into()));
        }
        let endpoint_id = self.endpoint_id.clone();
        let graph_channels = request.format.channels as usize;

        let (session, format) = Session::spawn("wasapi-capture", move || {
            let (client, format) = activate(&endpoint_id)?;
            let capture: IAudioCaptureClient = unsafe { client.GetService() }
                .map_err(|e| SoundCardError::ConfigurationFailed(format!("GetService failed: {}", e)))?;
            let pump = CapturePump {
                client: capture,
                format,
                graph_channels,
                pipe,
            };
            Ok((client, pump, format))
        })?;

        log::debug!(
            "{}: capture opened at {} Hz, {} endpoint channel(s)",
            self.endpoint_id,
            format.rate,
            format.channels
        );
        self.session = Some(session);
        Ok(request.format.with_rate(format.rate))
    }

    fn start(&mut self) -> Result<(), SoundCardError> {
        match &self.session {
            Some(session) => session.start(),
            None => Err(SoundCardError::InvalidState("capture not open".into())),
        }
    }

    fn stop(&mut self) {
        if let Some(session) = &self.session {
            session.stop();
        }
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.shutdown();
        }
    }
}

// --- Playback ---

struct RenderPump {
    client: IAudioRenderClient,
    audio: IAudioClient,
    buffer_frames: u32,
    format: MixFormat,
    graph_channels: usize,
    pipe: StreamPipe,
    scratch: Vec<u8>,
}

impl Pump for RenderPump {
    fn pump(&mut self) -> Result<(), Error> {
        unsafe {
            let padding = self.audio.GetCurrentPadding()?;
            let frames = self.buffer_frames.saturating_sub(padding);
            if frames == 0 {
                return Ok(());
            }
            self.scratch.resize(frames as usize * self.graph_channels * 2, 0);
            // zero-filled on underrun
            self.pipe.fill(&mut self.scratch);
            let samples =
                pcm::remap_channels(&pcm::le_bytes_to_i16(&self.scratch), self.graph_channels, self.format.channels);

            let data = self.client.GetBuffer(frames)?;
            let len = frames as usize * self.format.bytes_per_frame();
            encode_frames(&samples, self.format.float, std::slice::from_raw_parts_mut(data, len));
            self.client.ReleaseBuffer(frames, 0)?;
        }
        Ok(())
    }

    fn pipe(&self) -> &StreamPipe {
        &self.pipe
    }
}

pub struct WasapiPlayback {
    endpoint_id: String,
    session: Option<Session>,
    pipe: StreamPipe,
}

impl WasapiPlayback {
    pub fn new(endpoint_id: String) -> Self {
        Self {
            endpoint_id,
            session: None,
            pipe: StreamPipe::new(),
        }
    }
}

impl PlaybackDevice for WasapiPlayback {
    fn open(&mut self, request: &StreamRequest) -> Result<StreamFormat, SoundCardError> {
        if self.session.is_some() {
            return Err(SoundCardError::InvalidState("playback already open".into()));
        }
        self.pipe = StreamPipe::bounded(request.max_buffered_bytes() * 2);
        let pipe = self.pipe.clone();
        let endpoint_id = self.endpoint_id.clone();
        let graph_channels = request.format.channels as usize;

        let (session, format) = Session::spawn("wasapi-playback", move || {
            let (client, format) = activate(&endpoint_id)?;
            let render: IAudioRenderClient = unsafe { client.GetService() }
                .map_err(|e| SoundCardError::ConfigurationFailed(format!("GetService failed: {}", e)))?;
            let buffer_frames = unsafe { client.GetBufferSize() }
                .map_err(|e| SoundCardError::ConfigurationFailed(format!("GetBufferSize failed: {}", e)))?;
            let pump = RenderPump {
                client: render,
                audio: client.clone(),
                buffer_frames,
                format,
                graph_channels,
                pipe,
                scratch: Vec::new(),
            };
            Ok((client, pump, format))
        })?;

        log::debug!(
            "{}: playback opened at {} Hz, {} endpoint channel(s)",
            self.endpoint_id,
            format.rate,
            format.channels
        );
        self.session = Some(session);
        Ok(request.format.with_rate(format.rate))
    }

    fn start(&mut self) -> Result<(), SoundCardError> {
        match &self.session {
            Some(session) => session.start(),
            None => Err(SoundCardError::InvalidState("playback not open".into())),
        }
    }

    fn write(&mut self, tick: &[u8]) -> Result<(), SoundCardError> {
        if self.pipe.is_lost() {
            return Err(SoundCardError::DeviceLost);
        }
        self.pipe.push(tick);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(session) = &self.session {
            session.stop();
        }
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.shutdown();
        }
        self.pipe.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_frames_round_to_pcm() {
        let bytes: Vec<u8> = [0.0f32, 1.0, -1.0].iter().flat_map(|s| s.to_le_bytes()).collect();
        let samples = decode_frames(&bytes, true);
        assert_eq!(samples[0], 0);
        assert_eq!(samples[1], i16::MAX);
        assert!(samples[2] <= -i16::MAX);
    }

    #[test]
    fn short_input_pads_with_silence() {
        let mut out = vec![0xffu8; 8];
        encode_frames(&[1000], false, &mut out);
        assert_eq!(&out[..2], &1000i16.to_le_bytes());
        assert!(out[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn only_invalidated_endpoint_is_fatal() {
        assert!(is_fatal(AUDCLNT_E_DEVICE_INVALIDATED));
        assert!(!is_fatal(AUDCLNT_E_BUFFER_ERROR));
        assert!(!is_fatal(AUDCLNT_E_BUFFER_OPERATION_PENDING));
    }

    #[test]
    fn mix_format_frame_size() {
        let f = MixFormat {
            rate: 48000,
            channels: 2,
            float: true,
        };
        assert_eq!(f.bytes_per_frame(), 8);
        assert_eq!(MixFormat { float: false, ..f }.bytes_per_frame(), 4);
    }
}
