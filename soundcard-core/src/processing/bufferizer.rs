use std::collections::VecDeque;

/// Byte FIFO accumulating variable-sized writes and serving fixed-sized reads.
///
/// Decouples the producer cadence (device callback or I/O thread) from the
/// consumer cadence (ticker). Not synchronized: wrap it in a mutex, or use
/// [`StreamPipe`](super::stream_pipe::StreamPipe) which does.
///
/// There is no implicit cap. Callers decide when excess data is dropped
/// (see [`Bufferizer::skip`]).
#[derive(Debug, Default)]
pub struct Bufferizer {
    chunks: VecDeque<Vec<u8>>,
    /// Bytes of the front chunk already consumed.
    head: usize,
    available: usize,
}

impl Bufferizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a copy of `bytes` to the tail.
    pub fn put(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.put_owned(bytes.to_vec());
    }

    /// Append an owned buffer to the tail without copying it.
    pub fn put_owned(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        self.available += bytes.len();
        self.chunks.push_back(bytes);
    }

    /// Fill `out` entirely from the head.
    ///
    /// Returns `false` and leaves the buffer untouched when fewer than
    /// `out.len()` bytes are available. No partial reads.
    pub fn read(&mut self, out: &mut [u8]) -> bool {
        if out.len() > self.available {
            return false;
        }

        let mut written = 0;
        while written < out.len() {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let remaining = &front[self.head..];
            let n = remaining.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&remaining[..n]);
            written += n;
            self.consume_front(n);
        }
        self.available -= written;
        true
    }

    /// Read exactly `count` bytes into a new vector, or `None` if not enough
    /// data is buffered.
    pub fn read_vec(&mut self, count: usize) -> Option<Vec<u8>> {
        if count > self.available {
            return None;
        }
        let mut out = vec![0u8; count];
        self.read(&mut out);
        Some(out)
    }

    /// Discard up to `count` of the oldest bytes. Returns how many were dropped.
    pub fn skip(&mut self, count: usize) -> usize {
        let count = count.min(self.available);
        let mut left = count;
        while left > 0 {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let n = (front.len() - self.head).min(left);
            self.consume_front(n);
            left -= n;
        }
        self.available -= count;
        count
    }

    /// Number of unread bytes.
    pub fn available(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Drop all buffered data.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.head = 0;
        self.available = 0;
    }

    fn consume_front(&mut self, n: usize) {
        self.head += n;
        if self.chunks.front().is_some_and(|c| self.head >= c.len()) {
            self.chunks.pop_front();
            self.head = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_put_read() {
        let mut buf = Bufferizer::new();
        buf.put(&[1, 2, 3]);

        assert_eq!(buf.available(), 3);
        assert_eq!(buf.read_vec(3), Some(vec![1, 2, 3]));
        assert!(buf.is_empty());
    }

    #[test]
    fn read_spans_chunks() {
        let mut buf = Bufferizer::new();
        buf.put(&[1, 2]);
        buf.put(&[3]);
        buf.put(&[4, 5, 6]);

        assert_eq!(buf.read_vec(4), Some(vec![1, 2, 3, 4]));
        assert_eq!(buf.available(), 2);
        assert_eq!(buf.read_vec(2), Some(vec![5, 6]));
    }

    #[test]
    fn short_read_leaves_state_untouched() {
        let mut buf = Bufferizer::new();
        buf.put(&[1, 2, 3]);
        buf.read_vec(1);

        let mut out = [0u8; 5];
        assert!(!buf.read(&mut out));
        assert_eq!(out, [0u8; 5]);
        assert_eq!(buf.available(), 2);
        assert_eq!(buf.read_vec(2), Some(vec![2, 3]));
    }

    #[test]
    fn skip_drops_oldest() {
        let mut buf = Bufferizer::new();
        buf.put(&[1, 2, 3]);
        buf.put(&[4, 5, 6]);

        assert_eq!(buf.skip(4), 4);
        assert_eq!(buf.available(), 2);
        assert_eq!(buf.read_vec(2), Some(vec![5, 6]));

        assert_eq!(buf.skip(10), 0);
    }

    #[test]
    fn skip_more_than_available() {
        let mut buf = Bufferizer::new();
        buf.put(&[9; 7]);
        assert_eq!(buf.skip(100), 7);
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_operations() {
        let mut buf = Bufferizer::new();
        buf.put(&[]);
        buf.put_owned(Vec::new());

        assert!(buf.is_empty());
        assert_eq!(buf.read_vec(0), Some(Vec::new()));
        assert_eq!(buf.read_vec(1), None);
    }

    #[test]
    fn clear_resets_partial_head() {
        let mut buf = Bufferizer::new();
        buf.put(&[1, 2, 3, 4]);
        buf.read_vec(1);
        buf.clear();

        assert_eq!(buf.available(), 0);
        buf.put(&[7, 8]);
        assert_eq!(buf.read_vec(2), Some(vec![7, 8]));
    }

    #[test]
    fn available_tracks_many_small_writes() {
        let mut buf = Bufferizer::new();
        for i in 0..100u8 {
            buf.put(&[i]);
        }
        assert_eq!(buf.available(), 100);
        let all = buf.read_vec(100).unwrap();
        assert_eq!(all, (0..100u8).collect::<Vec<_>>());
    }
}
