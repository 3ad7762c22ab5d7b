use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Buffer queue linking two graph nodes.
///
/// A reader's output queue or a writer's input queue. Cloning yields another
/// handle to the same queue.
#[derive(Clone, Default, Debug)]
pub struct BufferQueue {
    inner: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl BufferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, buffer: Vec<u8>) {
        self.inner.lock().push_back(buffer);
    }

    pub fn get(&self) -> Option<Vec<u8>> {
        self.inner.lock().pop_front()
    }

    /// Take every queued buffer, oldest first.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
