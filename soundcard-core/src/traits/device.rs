use crate::models::error::SoundCardError;
use crate::models::format::{StreamFormat, StreamRequest};
use crate::processing::stream_pipe::StreamPipe;

/// Platform capture stream behind a [`SoundReader`](crate::graph::reader::SoundReader).
///
/// The device owns its native handle. Once started, its callback or I/O
/// thread pushes graph-format bytes into the pipe given to `open`; it never
/// touches the ticker thread.
pub trait CaptureDevice: Send {
    /// Open the native stream and return the format actually negotiated.
    /// The rate may differ from the request; channels and bit depth are
    /// converted to the requested graph format by the driver.
    fn open(&mut self, request: &StreamRequest, pipe: StreamPipe) -> Result<StreamFormat, SoundCardError>;

    /// Begin asynchronous delivery.
    fn start(&mut self) -> Result<(), SoundCardError>;

    /// Stop delivery. After return no further writes to the pipe happen.
    fn stop(&mut self);

    /// Release the native handle. Idempotent; implies `stop`.
    fn close(&mut self);
}

/// Platform playback stream behind a [`SoundWriter`](crate::graph::writer::SoundWriter).
pub trait PlaybackDevice: Send {
    fn open(&mut self, request: &StreamRequest) -> Result<StreamFormat, SoundCardError>;

    fn start(&mut self) -> Result<(), SoundCardError>;

    /// Hand one tick of graph-format bytes to the device. Must not block on
    /// the OS audio subsystem. Returns [`SoundCardError::DeviceLost`] once the
    /// device went away.
    fn write(&mut self, tick: &[u8]) -> Result<(), SoundCardError>;

    fn stop(&mut self);

    fn close(&mut self);
}
