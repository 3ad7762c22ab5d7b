use std::time::Duration;

use crate::models::error::SoundCardError;

/// Per-tick information handed to graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickContext {
    /// Number of the tick being run, starting at 0.
    pub tick: u64,
    pub interval: Duration,
}

/// Node of the media-processing graph driven by a
/// [`Ticker`](crate::graph::ticker::Ticker).
pub trait Filter: Send {
    fn name(&self) -> &str;

    /// Runs once before the first `process`. A failure leaves the node inert.
    fn preprocess(&mut self, ctx: &TickContext) -> Result<(), SoundCardError>;

    /// Runs once per tick. Must never block on the OS audio subsystem.
    fn process(&mut self, ctx: &TickContext);

    /// Runs once when the node leaves the ticker.
    fn postprocess(&mut self);
}
