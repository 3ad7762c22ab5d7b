use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::bufferizer::Bufferizer;

struct PipeShared {
    fifo: Mutex<Bufferizer>,
    /// Hard cap on buffered bytes, 0 for none.
    limit: AtomicUsize,
    lost: AtomicBool,
    underruns: AtomicU64,
    discarded: AtomicU64,
    /// Device-side overruns, underruns and discontinuities.
    xruns: AtomicU64,
}

/// A [`Bufferizer`] and the mutex guarding it, shared between a device
/// thread (OS callback or driver I/O loop) and the ticker thread.
///
/// The lock is only held for the duration of one FIFO operation, never
/// across a blocking OS call. Cloning yields another handle to the same FIFO.
#[derive(Clone)]
pub struct StreamPipe {
    shared: Arc<PipeShared>,
}

impl StreamPipe {
    /// Pipe without a producer-side cap.
    pub fn new() -> Self {
        Self::bounded(0)
    }

    /// Pipe that keeps at most `limit` bytes, dropping the oldest on push.
    /// A `limit` of 0 disables the cap.
    pub fn bounded(limit: usize) -> Self {
        Self {
            shared: Arc::new(PipeShared {
                fifo: Mutex::new(Bufferizer::new()),
                limit: AtomicUsize::new(limit),
                lost: AtomicBool::new(false),
                underruns: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                xruns: AtomicU64::new(0),
            }),
        }
    }

    /// Change the hard cap. Takes effect on the next push.
    pub fn set_limit(&self, limit: usize) {
        self.shared.limit.store(limit, Ordering::Relaxed);
    }

    /// Producer side: append bytes.
    pub fn push(&self, bytes: &[u8]) {
        self.push_owned(bytes.to_vec());
    }

    pub fn push_owned(&self, bytes: Vec<u8>) {
        let dropped = {
            let mut fifo = self.shared.fifo.lock();
            fifo.put_owned(bytes);
            let limit = self.shared.limit.load(Ordering::Relaxed);
            if limit > 0 && fifo.available() > limit {
                let excess = fifo.available() - limit;
                fifo.skip(excess)
            } else {
                0
            }
        };
        if dropped > 0 {
            self.shared.discarded.fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }

    /// Consumer side: take exactly `count` bytes, or nothing.
    pub fn pop_exact(&self, count: usize) -> Option<Vec<u8>> {
        self.shared.fifo.lock().read_vec(count)
    }

    /// Fill `out` entirely from the FIFO, or with silence when not enough data
    /// is buffered (counted as an underrun). Partial data stays queued.
    ///
    /// Returns `true` when real data was delivered.
    pub fn fill(&self, out: &mut [u8]) -> bool {
        if self.shared.fifo.lock().read(out) {
            return true;
        }
        out.fill(0);
        self.shared.underruns.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Run `f` with the FIFO locked.
    pub fn with_fifo<R>(&self, f: impl FnOnce(&mut Bufferizer) -> R) -> R {
        f(&mut self.shared.fifo.lock())
    }

    /// Record bytes dropped by a consumer-side policy.
    pub fn note_discarded(&self, bytes: usize) {
        self.shared.discarded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a glitch the device recovered from. Set from the device thread.
    pub fn note_xrun(&self) {
        self.shared.xruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn available(&self) -> usize {
        self.shared.fifo.lock().available()
    }

    pub fn clear(&self) {
        self.shared.fifo.lock().clear();
    }

    /// Flag the device behind this pipe as gone. Set from the device thread.
    pub fn mark_lost(&self) {
        self.shared.lost.store(true, Ordering::SeqCst);
    }

    pub fn is_lost(&self) -> bool {
        self.shared.lost.load(Ordering::SeqCst)
    }

    /// Reset the lost flag and counters for a fresh open.
    pub fn reset(&self) {
        self.clear();
        self.shared.lost.store(false, Ordering::SeqCst);
        self.shared.underruns.store(0, Ordering::Relaxed);
        self.shared.discarded.store(0, Ordering::Relaxed);
        self.shared.xruns.store(0, Ordering::Relaxed);
    }

    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    pub fn discarded_bytes(&self) -> u64 {
        self.shared.discarded.load(Ordering::Relaxed)
    }

    pub fn xruns(&self) -> u64 {
        self.shared.xruns.load(Ordering::Relaxed)
    }

    /// Whether two handles point at the same FIFO.
    pub fn same_pipe(&self, other: &StreamPipe) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Default for StreamPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StreamPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPipe")
            .field("available", &self.available())
            .field("limit", &self.shared.limit.load(Ordering::Relaxed))
            .field("lost", &self.is_lost())
            .finish()
    }
}
