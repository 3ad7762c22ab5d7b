//! cpal-based backend, one descriptor per audio host.
//!
//! cpal streams are not `Send`, so every open stream lives on a keeper thread
//! that owns it and obeys commands from the graph node. The audio callback
//! converts between the device's native sample format and the graph's
//! 16-bit PCM and talks to the node only through a [`StreamPipe`].

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig, StreamError, SupportedStreamConfig};

use soundcard_core::processing::pcm;
use soundcard_core::{
    Capabilities, CaptureDevice, CardData, DetectedCard, PlaybackDevice, SoundCard, SoundCardDescriptor,
    SoundCardError, StreamFormat, StreamPipe, StreamRequest,
};

/// How long `open` waits for the keeper thread to build the stream.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Descriptor for one cpal host.
pub struct CpalDriver {
    host_id: cpal::HostId,
}

impl CpalDriver {
    pub fn new(host_id: cpal::HostId) -> Self {
        Self { host_id }
    }

    /// One driver per host available on this system.
    pub fn available() -> Vec<CpalDriver> {
        cpal::available_hosts().into_iter().map(CpalDriver::new).collect()
    }
}

/// Private data of a cpal card: enough to find the device again.
#[derive(Debug, Clone)]
pub struct CpalCardData {
    host_id: cpal::HostId,
    device_name: String,
}

impl SoundCardDescriptor for CpalDriver {
    fn driver_type(&self) -> &str {
        self.host_id.name()
    }

    fn directions(&self) -> Capabilities {
        Capabilities::DUPLEX
    }

    fn detect(&self) -> Result<Vec<DetectedCard>, SoundCardError> {
        let host = cpal::host_from_id(self.host_id)
            .map_err(|e| SoundCardError::Backend(format!("{} host unavailable: {}", self.host_id.name(), e)))?;
        let devices = host
            .devices()
            .map_err(|e| SoundCardError::Backend(format!("failed to enumerate devices: {}", e)))?;

        // some hosts list the capture and playback side of a device separately
        let mut found: Vec<(String, Capabilities)> = Vec::new();
        for device in devices {
            let name = match device.name() {
                Ok(name) => name,
                Err(e) => {
                    log::debug!("skipping unnamed device: {}", e);
                    continue;
                }
            };
            let mut caps = Capabilities::DISABLED;
            if device.supported_input_configs().map(|mut c| c.next().is_some()).unwrap_or(false) {
                caps |= Capabilities::CAPTURE;
            }
            if device.supported_output_configs().map(|mut c| c.next().is_some()).unwrap_or(false) {
                caps |= Capabilities::PLAYBACK;
            }
            if caps.is_empty() {
                continue;
            }
            match found.iter_mut().find(|(n, _)| *n == name) {
                Some((_, existing)) => *existing |= caps,
                None => found.push((name, caps)),
            }
        }

        log::debug!("{}: {} device(s)", self.host_id.name(), found.len());
        Ok(found
            .into_iter()
            .map(|(name, caps)| {
                let data = CpalCardData {
                    host_id: self.host_id,
                    device_name: name.clone(),
                };
                DetectedCard::new(name, caps, data)
            })
            .collect())
    }

    fn create_capture(&self, card: &Arc<SoundCard>) -> Result<Box<dyn CaptureDevice>, SoundCardError> {
        let data = card_data(card)?;
        Ok(Box::new(CpalCapture {
            data,
            keeper: None,
        }))
    }

    fn create_playback(&self, card: &Arc<SoundCard>) -> Result<Box<dyn PlaybackDevice>, SoundCardError> {
        let data = card_data(card)?;
        Ok(Box::new(CpalPlayback {
            data,
            keeper: None,
            pipe: StreamPipe::new(),
        }))
    }

    /// cpal hosts run in shared mode, so a second handle on the same device
    /// just opens another stream.
    fn duplicate(&self, card: &SoundCard) -> Result<Box<dyn CardData>, SoundCardError> {
        Ok(card.clone_data())
    }
}

fn card_data(card: &SoundCard) -> Result<CpalCardData, SoundCardError> {
    card.with_data(|d: &mut CpalCardData| d.clone())
        .ok_or_else(|| SoundCardError::InvalidState(format!("{} is not a cpal card", card.id())))
}

fn find_device(data: &CpalCardData) -> Result<cpal::Device, SoundCardError> {
    let host = cpal::host_from_id(data.host_id).map_err(|e| SoundCardError::Backend(e.to_string()))?;
    let mut devices = host.devices().map_err(|e| SoundCardError::Backend(e.to_string()))?;
    devices
        .find(|d| d.name().map(|n| n == data.device_name).unwrap_or(false))
        .ok_or_else(|| SoundCardError::DeviceNotFound(data.device_name.clone()))
}

/// Pick the supported configuration closest to the request: the requested
/// rate when the device offers it, otherwise the device default.
fn choose_config(
    ranges: Vec<cpal::SupportedStreamConfigRange>,
    default: Option<SupportedStreamConfig>,
    request: &StreamRequest,
) -> Result<SupportedStreamConfig, SoundCardError> {
    let usable = |format: SampleFormat| matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16);
    let rate = request.format.rate;
    let wanted_channels = request.format.channels;

    let mut matching: Vec<_> = ranges
        .into_iter()
        .filter(|r| usable(r.sample_format()))
        .filter(|r| r.min_sample_rate().0 <= rate && r.max_sample_rate().0 >= rate)
        .collect();
    // exact channel count first, then i16 to skip a conversion
    matching.sort_by_key(|r| (r.channels() != wanted_channels, r.sample_format() != SampleFormat::I16));
    if let Some(range) = matching.into_iter().next() {
        return Ok(range.with_sample_rate(cpal::SampleRate(rate)));
    }

    match default {
        Some(config) if usable(config.sample_format()) => Ok(config),
        Some(config) => Err(SoundCardError::UnsupportedFormat(format!(
            "device sample format {:?}",
            config.sample_format()
        ))),
        None => Err(SoundCardError::UnsupportedFormat(format!("no configuration for {} Hz", rate))),
    }
}

fn error_handler(pipe: StreamPipe, device_name: String) -> impl FnMut(StreamError) + Send + 'static {
    move |err| match err {
        StreamError::DeviceNotAvailable => {
            log::warn!("{}: device removed", device_name);
            pipe.mark_lost();
        }
        // the host re-prepares the stream itself after an xrun
        other => {
            log::warn!("{}: stream error: {}", device_name, other);
            pipe.note_xrun();
        }
    }
}

enum Command {
    Play(mpsc::Sender<Result<(), SoundCardError>>),
    Pause,
}

/// Handle on the thread owning a cpal stream. Dropping the command sender
/// ends the thread, which drops the stream.
struct Keeper {
    commands: Option<mpsc::Sender<Command>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Keeper {
    /// Spawn a keeper that builds its stream with `build` and reports the
    /// negotiated config back.
    fn spawn<F>(name: &str, build: F) -> Result<(Self, StreamConfig), SoundCardError>
    where
        F: FnOnce() -> Result<(cpal::Stream, StreamConfig), SoundCardError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();

        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let stream = match build() {
                    Ok((stream, config)) => {
                        let _ = ready_tx.send(Ok(config));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while let Ok(command) = cmd_rx.recv() {
                    match command {
                        Command::Play(reply) => {
                            let result = stream
                                .play()
                                .map_err(|e| SoundCardError::Backend(format!("failed to start stream: {}", e)));
                            let _ = reply.send(result);
                        }
                        Command::Pause => {
                            if let Err(e) = stream.pause() {
                                log::debug!("pause failed: {}", e);
                            }
                        }
                    }
                }
            })
            .map_err(|e| SoundCardError::Backend(format!("failed to spawn stream thread: {}", e)))?;

        let mut keeper = Keeper {
            commands: Some(cmd_tx),
            handle: Some(handle),
        };
        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(config)) => Ok((keeper, config)),
            Ok(Err(e)) => {
                keeper.shutdown();
                Err(e)
            }
            Err(_) => {
                keeper.shutdown();
                Err(SoundCardError::Backend("stream thread did not report".into()))
            }
        }
    }

    fn play(&self) -> Result<(), SoundCardError> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| SoundCardError::InvalidState("stream closed".into()))?;
        let (tx, rx) = mpsc::channel();
        commands
            .send(Command::Play(tx))
            .map_err(|_| SoundCardError::DeviceLost)?;
        rx.recv().map_err(|_| SoundCardError::DeviceLost)?
    }

    fn pause(&self) {
        if let Some(commands) = &self.commands {
            let _ = commands.send(Command::Pause);
        }
    }

    fn shutdown(&mut self) {
        self.commands.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Keeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// --- Capture ---

struct CpalCapture {
    data: CpalCardData,
    keeper: Option<Keeper>,
}

fn capture_callback<T>(
    pipe: StreamPipe,
    device_channels: usize,
    graph_channels: usize,
) -> impl FnMut(&[T], &cpal::InputCallbackInfo) + Send + 'static
where
    T: SizedSample,
    i16: FromSample<T>,
{
    move |data: &[T], _| {
        let samples: Vec<i16> = data.iter().map(|&s| s.to_sample::<i16>()).collect();
        let samples = pcm::remap_channels(&samples, device_channels, graph_channels);
        pipe.push_owned(pcm::i16_to_le_bytes(&samples));
    }
}

impl CaptureDevice for CpalCapture {
    fn open(&mut self, request: &StreamRequest, pipe: StreamPipe) -> Result<StreamFormat, SoundCardError> {
        if self.keeper.is_some() {
            return Err(SoundCardError::InvalidState("capture already open".into()));
        }
        let data = self.data.clone();
        let request = *request;

        let (keeper, config) = Keeper::spawn("cpal-capture", move || {
            let device = find_device(&data)?;
            let ranges: Vec<_> = device
                .supported_input_configs()
                .map(|c| c.collect())
                .unwrap_or_default();
            let supported = choose_config(ranges, device.default_input_config().ok(), &request)?;
            let config = supported.config();
            let device_channels = config.channels as usize;
            let graph_channels = request.format.channels as usize;
            let on_error = error_handler(pipe.clone(), data.device_name.clone());

            let stream = match supported.sample_format() {
                SampleFormat::F32 => device.build_input_stream(
                    &config,
                    capture_callback::<f32>(pipe, device_channels, graph_channels),
                    on_error,
                    None,
                ),
                SampleFormat::I16 => device.build_input_stream(
                    &config,
                    capture_callback::<i16>(pipe, device_channels, graph_channels),
                    on_error,
                    None,
                ),
                SampleFormat::U16 => device.build_input_stream(
                    &config,
                    capture_callback::<u16>(pipe, device_channels, graph_channels),
                    on_error,
                    None,
                ),
                other => return Err(SoundCardError::UnsupportedFormat(format!("{:?}", other))),
            }
            .map_err(map_build_error)?;
            Ok((stream, config))
        })?;

        log::debug!(
            "{}: capture opened at {} Hz, {} device channel(s)",
            self.data.device_name,
            config.sample_rate.0,
            config.channels
        );
        self.keeper = Some(keeper);
        Ok(request.format.with_rate(config.sample_rate.0))
    }

    fn start(&mut self) -> Result<(), SoundCardError> {
        match &self.keeper {
            Some(keeper) => keeper.play(),
            None => Err(SoundCardError::InvalidState("capture not open".into())),
        }
    }

    fn stop(&mut self) {
        if let Some(keeper) = &self.keeper {
            keeper.pause();
        }
    }

    fn close(&mut self) {
        if let Some(mut keeper) = self.keeper.take() {
            keeper.shutdown();
        }
    }
}

// --- Playback ---

struct CpalPlayback {
    data: CpalCardData,
    keeper: Option<Keeper>,
    pipe: StreamPipe,
}

fn playback_callback<T>(
    pipe: StreamPipe,
    device_channels: usize,
    graph_channels: usize,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: SizedSample + FromSample<i16>,
{
    let mut scratch = Vec::new();
    move |data: &mut [T], _| {
        let frames = data.len() / device_channels.max(1);
        scratch.resize(frames * graph_channels * 2, 0);
        // zero-filled on underrun
        pipe.fill(&mut scratch);
        let samples = pcm::remap_channels(&pcm::le_bytes_to_i16(&scratch), graph_channels, device_channels);
        for (out, sample) in data.iter_mut().zip(samples.iter().chain(std::iter::repeat(&0))) {
            *out = T::from_sample(*sample);
        }
    }
}

impl PlaybackDevice for CpalPlayback {
    fn open(&mut self, request: &StreamRequest) -> Result<StreamFormat, SoundCardError> {
        if self.keeper.is_some() {
            return Err(SoundCardError::InvalidState("playback already open".into()));
        }
        // device-side queue: what the graph wrote but the callback has not consumed yet
        self.pipe = StreamPipe::bounded(request.max_buffered_bytes() * 2);
        let pipe = self.pipe.clone();
        let data = self.data.clone();
        let request = *request;

        let (keeper, config) = Keeper::spawn("cpal-playback", move || {
            let device = find_device(&data)?;
            let ranges: Vec<_> = device
                .supported_output_configs()
                .map(|c| c.collect())
                .unwrap_or_default();
            let supported = choose_config(ranges, device.default_output_config().ok(), &request)?;
            let config = supported.config();
            let device_channels = config.channels as usize;
            let graph_channels = request.format.channels as usize;
            let on_error = error_handler(pipe.clone(), data.device_name.clone());

            let stream = match supported.sample_format() {
                SampleFormat::F32 => device.build_output_stream(
                    &config,
                    playback_callback::<f32>(pipe, device_channels, graph_channels),
                    on_error,
                    None,
                ),
                SampleFormat::I16 => device.build_output_stream(
                    &config,
                    playback_callback::<i16>(pipe, device_channels, graph_channels),
                    on_error,
                    None,
                ),
                SampleFormat::U16 => device.build_output_stream(
                    &config,
                    playback_callback::<u16>(pipe, device_channels, graph_channels),
                    on_error,
                    None,
                ),
                other => return Err(SoundCardError::UnsupportedFormat(format!("{:?}", other))),
            }
            .map_err(map_build_error)?;
            Ok((stream, config))
        })?;

        self.keeper = Some(keeper);
        Ok(request.format.with_rate(config.sample_rate.0))
    }

    fn start(&mut self) -> Result<(), SoundCardError> {
        match &self.keeper {
            Some(keeper) => keeper.play(),
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
        if let Some(keeper) = &self.keeper {
            keeper.pause();
        }
    }

    fn close(&mut self) {
        if let Some(mut keeper) = self.keeper.take() {
            keeper.shutdown();
        }
        self.pipe.clear();
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> SoundCardError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => SoundCardError::DeviceNotFound("device not available".into()),
        cpal::BuildStreamError::StreamConfigNotSupported => {
            SoundCardError::UnsupportedFormat("stream configuration not supported".into())
        }
        other => SoundCardError::DeviceBusy(other.to_string()),
    }
}
