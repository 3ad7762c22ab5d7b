//! # soundcard-core
//!
//! Platform-agnostic sound-card abstraction and real-time audio I/O.
//!
//! Backends (cpal, OSS, WASAPI, and the built-in null driver) implement
//! `SoundCardDescriptor` and register with a `SoundCardManager`. Cards hand
//! out `SoundReader` / `SoundWriter` graph nodes that a `Ticker` drives at a
//! fixed period, decoupled from the device threads by a locked byte FIFO.
//!
//! ## Architecture
//!
//! ```text
//! soundcard-core (this crate)
//! ├── traits/       ← SoundCardDescriptor, CaptureDevice, PlaybackDevice, Filter, SoundCardDelegate
//! ├── models/       ← SoundCardError, StreamState, StreamConfiguration, Capabilities, StreamFormat
//! ├── processing/   ← Bufferizer, StreamPipe, XrunRecovery, PCM conversion helpers
//! ├── registry/     ← SoundCardManager, SoundCard, HotplugMonitor
//! ├── graph/        ← SoundReader, SoundWriter, Ticker, BufferQueue
//! └── drivers/      ← NullDriver (deterministic, hardware-free)
//! ```

pub mod drivers;
pub mod graph;
pub mod models;
pub mod processing;
pub mod registry;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use drivers::null::{NullCardSpec, NullDriver, NullTap, NULL_DRIVER_TYPE};
pub use graph::queue::BufferQueue;
pub use graph::reader::SoundReader;
pub use graph::stats::NodeStats;
pub use graph::ticker::{SharedFilter, Ticker};
pub use graph::writer::SoundWriter;
pub use models::card::{Capabilities, CaptureSource, CardInfo, Direction, MixerElement};
pub use models::config::{HotplugConfig, StreamConfiguration};
pub use models::error::SoundCardError;
pub use models::format::{StreamFormat, StreamRequest};
pub use models::state::StreamState;
pub use processing::bufferizer::Bufferizer;
pub use processing::stream_pipe::StreamPipe;
pub use processing::xrun::{XrunAction, XrunRecovery};
pub use registry::card::SoundCard;
pub use registry::hotplug::HotplugMonitor;
pub use registry::manager::SoundCardManager;
pub use traits::delegate::SoundCardDelegate;
pub use traits::descriptor::{CardData, DetectedCard, SoundCardDescriptor};
pub use traits::device::{CaptureDevice, PlaybackDevice};
pub use traits::filter::{Filter, TickContext};
