use std::fmt;
use std::sync::Arc;

use crate::graph::queue::BufferQueue;
use crate::graph::stats::NodeStats;
use crate::models::config::StreamConfiguration;
use crate::models::error::SoundCardError;
use crate::models::format::StreamFormat;
use crate::models::state::StreamState;
use crate::processing::bufferizer::Bufferizer;
use crate::processing::pcm;
use crate::registry::card::SoundCard;
use crate::traits::device::PlaybackDevice;
use crate::traits::filter::{Filter, TickContext};

/// Playback node: moves audio from the graph to a sound card.
///
/// Each tick the node drains exactly one tick of bytes from its input and
/// hands it to the device. When the input has run dry the tick is filled with
/// silence of the same length, so the device never starves into crackle and
/// the ticker never waits.
pub struct SoundWriter {
    name: String,
    card: Arc<SoundCard>,
    device: Box<dyn PlaybackDevice>,
    config: StreamConfiguration,
    state: StreamState,
    negotiated: Option<StreamFormat>,
    input: BufferQueue,
    pending: Bufferizer,
    tick_bytes: usize,
    stats: NodeStats,
}

impl SoundWriter {
    pub fn new(
        card: Arc<SoundCard>,
        device: Box<dyn PlaybackDevice>,
        config: StreamConfiguration,
    ) -> Result<Self, SoundCardError> {
        config.validate().map_err(SoundCardError::ConfigurationFailed)?;
        Ok(Self {
            name: format!("writer({})", card.id()),
            card,
            device,
            config,
            state: StreamState::Closed,
            negotiated: None,
            input: BufferQueue::new(),
            pending: Bufferizer::new(),
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

    /// Queue the upstream node feeds.
    pub fn input(&self) -> BufferQueue {
        self.input.clone()
    }

    pub fn negotiated_format(&self) -> Option<StreamFormat> {
        self.negotiated
    }

    /// Bytes of one tick in the negotiated format, 0 while closed.
    pub fn tick_bytes(&self) -> usize {
        self.tick_bytes
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    /// Bytes accepted from upstream but not yet written.
    pub fn buffered(&self) -> usize {
        self.pending.available()
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

    /// Bind a closed writer to another card.
    pub fn reattach(&mut self, card: &Arc<SoundCard>) -> Result<(), SoundCardError> {
        if !self.state.is_closed() {
            return Err(SoundCardError::InvalidState(format!("cannot reattach a {} writer", self.state)));
        }
        self.device = card.create_playback_device()?;
        self.card = Arc::clone(card);
        self.name = format!("writer({})", card.id());
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
        self.pending.clear();
        self.negotiated = None;
        self.state = StreamState::Closed;
    }

    /// Move everything upstream queued into the pending FIFO, then apply the
    /// latency bound.
    fn absorb_input(&mut self) {
        for buffer in self.input.drain() {
            self.pending.put_owned(buffer);
        }
        let threshold = self.tick_bytes * self.config.max_buffered_ticks;
        if self.pending.available() > threshold {
            let dropped = self.pending.skip(self.pending.available() - self.tick_bytes);
            log::warn!("{}: producer ran ahead, dropped {} bytes", self.name, dropped);
            self.stats.discarded_bytes += dropped as u64;
        }
    }
}

impl Filter for SoundWriter {
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
        let negotiated = match self.device.open(&request) {
            Ok(format) => format,
            Err(e) => {
                log::error!("{}: failed to open playback: {}", self.name, e);
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
        self.negotiated = Some(negotiated);

        if let Err(e) = self.device.start() {
            log::error!("{}: failed to start playback: {}", self.name, e);
            self.close_device();
            return Err(e);
        }

        self.state = StreamState::Running;
        log::info!("{}: playback running at {}", self.name, negotiated);
        Ok(())
    }

    fn process(&mut self, _ctx: &TickContext) {
        if !self.state.is_running() || self.tick_bytes == 0 {
            // inert: keep upstream from piling up
            self.input.clear();
            return;
        }

        self.stats.ticks += 1;
        self.absorb_input();

        let mut tick = vec![0u8; self.tick_bytes];
        if self.pending.read(&mut tick) {
            self.stats.emitted_bytes += tick.len() as u64;
            self.stats.level = pcm::rms_level(&tick);
        } else {
            // partial data stays queued for the next tick
            self.stats.silent_ticks += 1;
            self.stats.level = 0.0;
        }

        match self.device.write(&tick) {
            Ok(()) => {}
            Err(SoundCardError::DeviceLost) => {
                log::warn!("{}: playback device lost", self.name);
                self.close_device();
            }
            Err(e) => log::error!("{}: write failed: {}", self.name, e),
        }
    }

    fn postprocess(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.state = StreamState::Stopping;
        self.device.stop();
        self.close_device();
        log::info!("{}: playback closed", self.name);
    }
}

impl fmt::Debug for SoundWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundWriter")
            .field("card", &self.card.id())
            .field("state", &self.state)
            .field("negotiated", &self.negotiated)
            .field("tick_bytes", &self.tick_bytes)
            .finish_non_exhaustive()
    }
}

impl Drop for SoundWriter {
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

    fn writer(spec: NullCardSpec) -> (Arc<SoundCard>, SoundWriter) {
        let driver = Arc::new(NullDriver::with_cards(vec![spec]));
        let detected = driver.detect().unwrap().pop().unwrap();
        let card = Arc::new(SoundCard::new(driver, detected));
        let writer = card.create_writer().unwrap();
        (card, writer)
    }

    #[test]
    fn starved_tick_is_silence() {
        let (card, mut writer) = writer(NullCardSpec::duplex("spk"));
        writer.preprocess(&CTX).unwrap();
        writer.process(&CTX);

        let played = NullDriver::tap(&card).unwrap().played();
        assert_eq!(played, vec![vec![0u8; 160]]);
        assert_eq!(writer.stats().silent_ticks, 1);
    }

    #[test]
    fn partial_tick_waits_for_more() {
        let (card, mut writer) = writer(NullCardSpec::duplex("spk"));
        writer.preprocess(&CTX).unwrap();

        writer.input().put(vec![5; 100]);
        writer.process(&CTX);
        assert_eq!(writer.buffered(), 100);

        writer.input().put(vec![6; 60]);
        writer.process(&CTX);

        let played = NullDriver::tap(&card).unwrap().played();
        assert_eq!(played[0], vec![0u8; 160]);
        let mut expected = vec![5u8; 100];
        expected.extend_from_slice(&[6; 60]);
        assert_eq!(played[1], expected);
    }

    #[test]
    fn latency_is_bounded() {
        let (card, mut writer) = writer(NullCardSpec::duplex("spk"));
        writer.preprocess(&CTX).unwrap();

        // ten ticks at once, numbered by tick
        for i in 0..10u8 {
            writer.input().put(vec![i; 160]);
        }
        writer.process(&CTX);

        let played = NullDriver::tap(&card).unwrap().played();
        assert_eq!(played, vec![vec![9u8; 160]]);
        assert_eq!(writer.stats().discarded_bytes, 9 * 160);
        assert_eq!(writer.buffered(), 0);
    }

    #[test]
    fn tick_follows_negotiated_rate() {
        let (_, mut writer) = writer(NullCardSpec::duplex("spk").with_native_rate(48000));
        writer.preprocess(&CTX).unwrap();
        assert_eq!(writer.tick_bytes(), 960);
    }

    #[test]
    fn device_loss_closes_node() {
        let (card, mut writer) = writer(NullCardSpec::duplex("spk"));
        writer.preprocess(&CTX).unwrap();
        NullDriver::tap(&card).unwrap().unplug();

        writer.process(&CTX);
        assert!(writer.state().is_closed());

        writer.input().put(vec![1; 160]);
        writer.process(&CTX);
        assert!(writer.input().is_empty());
    }

    #[test]
    fn empty_tick_fails_preprocess() {
        // 50 Hz holds no whole frame in 10 ms
        let (card, mut writer) = writer(NullCardSpec::duplex("spk").with_native_rate(50));
        let err = writer.preprocess(&CTX).unwrap_err();
        assert!(matches!(err, SoundCardError::ConfigurationFailed(_)));
        assert!(writer.state().is_closed());
        assert!(!NullDriver::tap(&card).unwrap().is_playback_open());
    }

    #[test]
    fn ticker_period_must_match_configuration() {
        let (card, mut writer) = writer(NullCardSpec::duplex("spk"));
        writer.set_tick_interval_ms(20).unwrap();
        let err = writer.preprocess(&CTX).unwrap_err();
        assert!(matches!(err, SoundCardError::ConfigurationFailed(_)));
        assert!(writer.state().is_closed());

        let ctx = TickContext {
            tick: 0,
            interval: Duration::from_millis(20),
        };
        writer.preprocess(&ctx).unwrap();
        assert_eq!(writer.tick_bytes(), 320);
        writer.process(&ctx);
        assert_eq!(NullDriver::tap(&card).unwrap().played(), vec![vec![0u8; 320]]);
    }

    #[test]
    fn debug_names_card_and_state() {
        let (_, writer) = writer(NullCardSpec::duplex("spk"));
        let text = format!("{:?}", writer);
        assert!(text.contains("Null: spk"));
        assert!(text.contains("Closed"));
    }

    #[test]
    fn capture_only_card_has_no_writer() {
        let driver = Arc::new(NullDriver::with_cards(vec![NullCardSpec::capture_only("mic")]));
        let detected = driver.detect().unwrap().pop().unwrap();
        let card = Arc::new(SoundCard::new(driver, detected));
        assert_eq!(card.create_writer().unwrap_err(), SoundCardError::Unsupported("playback"));
    }
}
