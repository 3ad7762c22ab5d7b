/// Counters kept by a reader or writer node.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeStats {
    /// Ticks processed while running.
    pub ticks: u64,
    /// Bytes of real audio emitted downstream (reader) or to the device (writer).
    pub emitted_bytes: u64,
    /// Ticks filled with silence because no data was available.
    pub silent_ticks: u64,
    /// Bytes dropped by the overflow policy.
    pub discarded_bytes: u64,
    /// Glitches the capture device recovered from (readers only).
    pub xruns: u64,
    /// RMS level of the last emitted tick, 0.0–1.0.
    pub level: f32,
}
