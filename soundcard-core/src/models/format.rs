use std::time::Duration;

/// Bit depth of the graph's PCM format. Drivers convert to and from it.
pub const GRAPH_BIT_DEPTH: u16 = 16;

/// PCM format of a stream as seen by the processing graph: signed 16-bit
/// little-endian, interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamFormat {
    pub rate: u32,
    pub channels: u16,
    pub bits: u16,
}

impl StreamFormat {
    pub fn new(rate: u32, channels: u16) -> Self {
        Self {
            rate,
            channels,
            bits: GRAPH_BIT_DEPTH,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits as usize / 8)
    }

    /// Number of bytes covering `duration` of audio, rounded down to whole frames.
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frames = (self.rate as u128 * duration.as_micros() / 1_000_000) as usize;
        frames * self.bytes_per_frame()
    }

    pub fn with_rate(self, rate: u32) -> Self {
        Self { rate, ..self }
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::new(8000, 1)
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Hz/{} ch/{} bit", self.rate, self.channels, self.bits)
    }
}

/// Parameters a graph node hands to a device when opening it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub format: StreamFormat,
    pub tick_interval: Duration,
    /// Ticks of unread audio tolerated before the oldest data is discarded.
    pub max_buffered_ticks: usize,
}

impl StreamRequest {
    pub fn tick_bytes(&self) -> usize {
        self.format.bytes_for(self.tick_interval)
    }

    pub fn max_buffered_bytes(&self) -> usize {
        self.tick_bytes() * self.max_buffered_ticks.max(1)
    }
}
