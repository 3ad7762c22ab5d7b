use std::fmt;
use std::sync::Arc;

use crate::graph::queue::BufferQueue;
use crate::graph::stats::NodeStats;
use crate::models::config::StreamConfiguration;
use crate::models::error::SoundCardError;
use crate::models::format::StreamFormat;
use crate::models::state::StreamState;
use crate::processing::pcm;
use crate::processing::stream_pipe::StreamPipe;
use crate::registry::card::SoundCard;
use crate::traits::device::CaptureDevice;
use crate::traits::filter::{Filter, TickContext};

/// Multiple of the overflow threshold at which the device side itself starts
/// dropping, for when the ticker stalls entirely.
const HARD_LIMIT_FACTOR: usize = 8;

/// Capture node: moves audio from a sound card into the graph.
///
/// ```text
/// [device callback / I/O thread] → [StreamPipe] → process() → [output queue]
/// ```
///
/// Each tick the node emits every whole tick of audio buffered by the device.
/// When more than `max_buffered_ticks` ticks have piled up (the ticker fell
/// behind), the oldest audio is discarded down to a single tick: continuity is
/// traded for bounded latency.
pub struct SoundReader {
    name: String,
    card: Arc<SoundCard>,
    device: Box<dyn CaptureDevice>,
    config: StreamConfiguration,
    state: StreamState,
    negotiated: Option<StreamFormat>,
    pipe: StreamPipe,
    output: BufferQueue,
    tick_bytes: usize,
    stats: NodeStats,
}

impl SoundReader {
    pub fn new(
        card: Arc<SoundCard>,
        device: Box<dyn CaptureDevice>,
        config: StreamConfiguration,
    ) -> Result<Self, SoundCardError> {
        config.validate().map_err(SoundCardError::ConfigurationFailed)?;
        Ok(Self {
            name: format!("reader({})", card.id()),
            card,
            device,
            config,
            state: StreamState::Closed,
            negotiated: None,
            pipe: StreamPipe::new(),
            output: BufferQueue::new(),
            tick_bytes: 0,
            stats: NodeStats::default(),
        })
    }

    pub fn card(&self) -> &Arc<SoundCard> {
        &self.card
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn config(&self) -> &StreamConfiguration {
        &self.config
    }

    /// Queue receiving one buffer per emitted tick.
    pub fn output(&self) -> BufferQueue {
        self.output.clone()
    }

    /// Format negotiated with the hardware, once open.
    pub fn negotiated_format(&self) -> Option<StreamFormat> {
        self.negotiated
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            xruns: self.pipe.xruns(),
            ..self.stats
        }
    }

    /// Bytes buffered between the device and this node.
    pub fn buffered(&self) -> usize {
        self.pipe.available()
    }

    pub fn set_rate(&mut self, rate: u32) -> Result<(), SoundCardError> {
        self.reconfigure(|c| c.sample_rate = rate)
    }

    pub fn set_channels(&mut self, channels: u16) -> Result<(), SoundCardError> {
        self.reconfigure(|c| c.channels = channels)
    }

    pub fn set_max_buffered_ticks(&mut self, ticks: usize) -> Result<(), SoundCardError> {
        self.reconfigure(|c| c.max_buffered_ticks = ticks)
    }

    /// Must match the period of the ticker the node is attached to.
    pub fn set_tick_interval_ms(&mut self, ms: u32) -> Result<(), SoundCardError> {
        self.reconfigure(|c| c.tick_interval_ms = ms)
    }

    /// Bind a closed reader to another card, typically after its device was
    /// removed.
    pub fn reattach(&mut self, card: &Arc<SoundCard>) -> Result<(), SoundCardError> {
        if !self.state.is_closed() {
            return Err(SoundCardError::InvalidState(format!("cannot reattach a {} reader", self.state)));
        }
        self.device = card.create_capture_device()?;
        self.card = Arc::clone(card);
        self.name = format!("reader({})", card.id());
        log::info!("{} reattached", self.name);
        Ok(())
    }

    fn reconfigure(&mut self, change: impl FnOnce(&mut StreamConfiguration)) -> Result<(), SoundCardError> {
        if !self.state.accepts_configuration() {
            return Err(SoundCardError::InvalidState(format!(
                "cannot reconfigure a {} stream",
                self.state
            )));
        }
        let mut config = self.config.clone();
        change(&mut config);
        config.validate().map_err(SoundCardError::ConfigurationFailed)?;
        self.config = config;
        Ok(())
    }

    fn close_device(&mut self) {
        self.device.close();
        self.pipe.clear();
        self.negotiated = None;
        self.state = StreamState::Closed;
    }
}

impl Filter for SoundReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn preprocess(&mut self, ctx: &TickContext) -> Result<(), SoundCardError> {
        if !self.state.is_closed() {
            return Err(SoundCardError::InvalidState(format!("{} is already {}", self.name, self.state)));
        }
        if ctx.interval != self.config.tick_interval() {
            return Err(SoundCardError::ConfigurationFailed(format!(
                "{}: ticker period {:?} does not match the configured {} ms",
                self.name, ctx.interval, self.config.tick_interval_ms
            )));
        }
        self.state = StreamState::Opening;

        let request = self.config.request();
        self.pipe = StreamPipe::new();

        let negotiated = match self.device.open(&request, self.pipe.clone()) {
            Ok(format) => format,
            Err(e) => {
                log::error!("{}: failed to open capture: {}", self.name, e);
                self.close_device();
                return Err(e);
            }
        };
        if negotiated.rate != request.format.rate {
            log::info!(
                "{}: hardware negotiated {} Hz instead of {} Hz",
                self.name,
                negotiated.rate,
                request.format.rate
            );
        }

        self.tick_bytes = negotiated.bytes_for(ctx.interval);
        if self.tick_bytes == 0 {
            log::error!("{}: {} gives an empty {:?} tick", self.name, negotiated, ctx.interval);
            self.close_device();
            return Err(SoundCardError::ConfigurationFailed(format!(
                "{} Hz holds no whole frame per {:?} tick",
                negotiated.rate, ctx.interval
            )));
        }
        self.pipe
            .set_limit(self.tick_bytes * self.config.max_buffered_ticks * HARD_LIMIT_FACTOR);
        self.negotiated = Some(negotiated);

        if let Err(e) = self.device.start() {
            log::error!("{}: failed to start capture: {}", self.name, e);
            self.close_device();
            return Err(e);
        }

        self.state = StreamState::Running;
        log::info!("{}: capture running at {}", self.name, negotiated);
        Ok(())
    }

    fn process(&mut self, _ctx: &TickContext) {
        if !self.state.is_running() || self.tick_bytes == 0 {
            return;
        }
        if self.pipe.is_lost() {
            log::warn!("{}: capture device lost", self.name);
            self.close_device();
            return;
        }

        self.stats.ticks += 1;
        let tick = self.tick_bytes;
        let threshold = tick * self.config.max_buffered_ticks;

        let (discarded, chunks) = self.pipe.with_fifo(|fifo| {
            let mut discarded = 0;
            if fifo.available() > threshold {
                discarded = fifo.skip(fifo.available() - tick);
            }
            let mut chunks = Vec::new();
            while let Some(chunk) = fifo.read_vec(tick) {
                chunks.push(chunk);
            }
            (discarded, chunks)
        });

        if discarded > 0 {
            log::warn!("{}: consumer fell behind, dropped {} bytes", self.name, discarded);
            self.pipe.note_discarded(discarded);
            self.stats.discarded_bytes += discarded as u64;
        }
        if let Some(last) = chunks.last() {
            self.stats.level = pcm::rms_level(last);
        }
        for chunk in chunks {
            self.stats.emitted_bytes += chunk.len() as u64;
            self.output.put(chunk);
        }
    }

    fn postprocess(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.state = StreamState::Stopping;
        self.device.stop();
        self.close_device();
        log::info!("{}: capture closed", self.name);
    }
}

impl fmt::Debug for SoundReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundReader")
            .field("card", &self.card.id())
            .field("state", &self.state)
            .field("negotiated", &self.negotiated)
            .field("tick_bytes", &self.tick_bytes)
            .finish_non_exhaustive()
    }
}

impl Drop for SoundReader {
    fn drop(&mut self) {
        self.postprocess();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::drivers::null::{NullCardSpec, NullDriver};
    use crate::traits::descriptor::SoundCardDescriptor;

    const CTX: TickContext = TickContext {
        tick: 0,
        interval: Duration::from_millis(10),
    };

    fn reader(spec: NullCardSpec) -> (Arc<NullDriver>, Arc<SoundCard>, SoundReader) {
        let driver = Arc::new(NullDriver::with_cards(vec![spec]));
        let detected = driver.detect().unwrap().pop().unwrap();
        let card = Arc::new(SoundCard::new(driver.clone(), detected));
        let reader = card.create_reader().unwrap();
        (driver, card, reader)
    }

    #[test]
    fn emits_whole_ticks_in_order() {
        let (_, card, mut reader) = reader(NullCardSpec::duplex("mic"));
        reader.preprocess(&CTX).unwrap();
        let tap = NullDriver::tap(&card).unwrap();

        let data: Vec<u8> = (0..400u32).map(|i| i as u8).collect();
        assert!(tap.inject(&data));
        reader.process(&CTX);

        let out = reader.output().drain();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], data[..160].to_vec());
        assert_eq!(out[1], data[160..320].to_vec());
        // the 80-byte remainder waits for more data
        assert_eq!(reader.buffered(), 80);
    }

    #[test]
    fn settings_rejected_while_running() {
        let (_, _, mut reader) = reader(NullCardSpec::duplex("mic"));
        reader.set_rate(16000).unwrap();
        reader.preprocess(&CTX).unwrap();

        assert!(matches!(reader.set_rate(8000), Err(SoundCardError::InvalidState(_))));
        assert!(matches!(reader.set_channels(2), Err(SoundCardError::InvalidState(_))));
        assert_eq!(reader.config().sample_rate, 16000);

        reader.postprocess();
        assert!(reader.set_channels(2).is_ok());
    }

    #[test]
    fn invalid_setting_rejected() {
        let (_, _, mut reader) = reader(NullCardSpec::duplex("mic"));
        assert!(matches!(reader.set_channels(0), Err(SoundCardError::ConfigurationFailed(_))));
    }

    #[test]
    fn reports_negotiated_rate() {
        let (_, _, mut reader) = reader(NullCardSpec::duplex("mic").with_native_rate(16000));
        reader.preprocess(&CTX).unwrap();
        let format = reader.negotiated_format().unwrap();
        assert_eq!(format.rate, 16000);
        assert_eq!(format.channels, 1);
    }

    #[test]
    fn second_open_fails_without_panicking() {
        let (_, card, mut first) = reader(NullCardSpec::duplex("mic"));
        first.preprocess(&CTX).unwrap();

        let mut second = card.create_reader().unwrap();
        let err = second.preprocess(&CTX).unwrap_err();
        assert!(matches!(err, SoundCardError::DeviceBusy(_)));
        assert!(second.state().is_closed());

        // an inert node ignores ticks
        second.process(&CTX);
        assert_eq!(second.stats().ticks, 0);
    }

    #[test]
    fn device_loss_closes_and_reattach_recovers() {
        let (driver, card, mut reader) = reader(NullCardSpec::duplex("mic"));
        reader.preprocess(&CTX).unwrap();
        let tap = NullDriver::tap(&card).unwrap();
        tap.inject(&[1; 100]);
        tap.unplug();

        reader.process(&CTX);
        assert!(reader.state().is_closed());
        assert_eq!(reader.buffered(), 0);
        reader.process(&CTX);
        assert!(reader.output().is_empty());

        let replacement = Arc::new(SoundCard::new(
            driver.clone(),
            driver.detect().unwrap().pop().unwrap(),
        ));
        reader.reattach(&replacement).unwrap();
        reader.preprocess(&CTX).unwrap();
        assert!(reader.state().is_running());
        assert_eq!(reader.card().id(), replacement.id());
    }

    #[test]
    fn empty_tick_fails_preprocess() {
        let (_, card, mut reader) = reader(NullCardSpec::duplex("mic").with_native_rate(50));
        let err = reader.preprocess(&CTX).unwrap_err();
        assert!(matches!(err, SoundCardError::ConfigurationFailed(_)));
        assert!(reader.state().is_closed());
        assert!(!NullDriver::tap(&card).unwrap().is_capture_open());
    }

    #[test]
    fn ticker_period_must_match_configuration() {
        let (_, _, mut reader) = reader(NullCardSpec::duplex("mic"));
        reader.set_tick_interval_ms(20).unwrap();
        assert!(matches!(
            reader.preprocess(&CTX),
            Err(SoundCardError::ConfigurationFailed(_))
        ));
        assert!(reader.state().is_closed());
    }

    #[test]
    fn postprocess_is_idempotent() {
        let (_, card, mut reader) = reader(NullCardSpec::duplex("mic"));
        reader.preprocess(&CTX).unwrap();
        reader.postprocess();
        reader.postprocess();
        assert!(reader.state().is_closed());
        assert!(!NullDriver::tap(&card).unwrap().is_capture_open());
    }
}
