use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::SoundCardError;
use super::format::{StreamFormat, StreamRequest, GRAPH_BIT_DEPTH};

/// Configuration of a capture or playback stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfiguration {
    /// Requested sample rate in Hz (default: 8000).
    pub sample_rate: u32,

    /// Number of interleaved channels (default: 1).
    pub channels: u16,

    /// PCM bit depth of the graph format. Only 16 is accepted.
    pub bit_depth: u16,

    /// Ticker period in milliseconds (default: 10).
    pub tick_interval_ms: u32,

    /// Ticks of unread audio a node tolerates before discarding the oldest
    /// data (default: 4).
    pub max_buffered_ticks: usize,
}

impl StreamConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if !(4000..=192_000).contains(&self.sample_rate) {
            return Err(format!("unsupported sample rate: {}", self.sample_rate));
        }
        if self.bit_depth != GRAPH_BIT_DEPTH {
            return Err(format!("unsupported bit depth: {}", self.bit_depth));
        }
        if ![1, 2].contains(&self.channels) {
            return Err(format!("unsupported channel count: {}", self.channels));
        }
        if self.tick_interval_ms == 0 || self.tick_interval_ms > 1000 {
            return Err(format!("unsupported tick interval: {} ms", self.tick_interval_ms));
        }
        if self.max_buffered_ticks < 2 {
            return Err("max_buffered_ticks must be at least 2".into());
        }
        Ok(())
    }

    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, SoundCardError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SoundCardError::ConfigurationFailed(format!("invalid stream configuration: {}", e)))?;
        config.validate().map_err(SoundCardError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn format(&self) -> StreamFormat {
        StreamFormat::new(self.sample_rate, self.channels)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms as u64)
    }

    pub fn request(&self) -> StreamRequest {
        StreamRequest {
            format: self.format(),
            tick_interval: self.tick_interval(),
            max_buffered_ticks: self.max_buffered_ticks,
        }
    }
}

impl Default for StreamConfiguration {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            channels: 1,
            bit_depth: GRAPH_BIT_DEPTH,
            tick_interval_ms: 10,
            max_buffered_ticks: 4,
        }
    }
}

/// Configuration of the background device rediscovery poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotplugConfig {
    /// Interval between two detection passes in milliseconds (default: 2000).
    pub poll_interval_ms: u64,
}

impl HotplugConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 2000 }
    }
}
