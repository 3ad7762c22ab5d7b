use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::error::SoundCardError;
use crate::traits::filter::{Filter, TickContext};

/// A graph node shared between its owner and the ticker.
pub type SharedFilter = Arc<Mutex<dyn Filter>>;

struct TickerShared {
    interval: Duration,
    nodes: Mutex<Vec<SharedFilter>>,
    tick: AtomicU64,
    running: AtomicBool,
}

impl TickerShared {
    fn context(&self) -> TickContext {
        TickContext {
            tick: self.tick.load(Ordering::SeqCst),
            interval: self.interval,
        }
    }

    fn run_tick(&self) {
        let ctx = TickContext {
            tick: self.tick.fetch_add(1, Ordering::SeqCst),
            interval: self.interval,
        };
        let nodes = self.nodes.lock().clone();
        for node in nodes {
            node.lock().process(&ctx);
        }
    }
}

/// Fixed-period driver of the processing graph.
///
/// Nodes run in attachment order, so attach readers before the nodes that
/// consume their output. The ticker thread only ever touches node state and
/// the pipes behind it; device I/O stays on the device threads.
pub struct Ticker {
    shared: Arc<TickerShared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self {
            shared: Arc::new(TickerShared {
                interval,
                nodes: Mutex::new(Vec::new()),
                tick: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
            handle: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.shared.tick.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn node_count(&self) -> usize {
        self.shared.nodes.lock().len()
    }

    /// Run the node's `preprocess` and add it to the graph.
    ///
    /// The node is attached even when `preprocess` fails; it then stays inert
    /// until detached. The failure is returned so the caller can fall back.
    pub fn attach(&self, node: SharedFilter) -> Result<(), SoundCardError> {
        let ctx = self.shared.context();
        let result = {
            let mut guard = node.lock();
            let result = guard.preprocess(&ctx);
            if let Err(e) = &result {
                log::error!("{} failed to start, left inert: {}", guard.name(), e);
            }
            result
        };
        self.shared.nodes.lock().push(node);
        result
    }

    /// Remove a node and run its `postprocess`. Returns whether it was attached.
    pub fn detach(&self, node: &SharedFilter) -> bool {
        let removed = {
            let mut nodes = self.shared.nodes.lock();
            let before = nodes.len();
            nodes.retain(|n| !same_node(n, node));
            before != nodes.len()
        };
        if removed {
            node.lock().postprocess();
        }
        removed
    }

    /// Run a single tick on the calling thread.
    pub fn tick_once(&self) {
        self.shared.run_tick();
    }

    /// Start ticking on a dedicated thread.
    pub fn start(&mut self) -> Result<(), SoundCardError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("soundcard-ticker".into())
            .spawn(move || {
                let interval = shared.interval;
                let mut next = Instant::now() + interval;
                while shared.running.load(Ordering::SeqCst) {
                    let now = Instant::now();
                    if now < next {
                        thread::sleep(next - now);
                        continue;
                    }
                    shared.run_tick();
                    next += interval;
                    if Instant::now() > next + interval {
                        log::debug!("ticker late by more than one period, resynchronizing");
                        next = Instant::now() + interval;
                    }
                }
            })
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                SoundCardError::Backend(format!("failed to spawn ticker thread: {}", e))
            })?;
        self.handle = Some(handle);
        log::debug!("ticker started at {:?}", self.shared.interval);
        Ok(())
    }

    /// Stop the thread, then postprocess and drop every node.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let nodes = std::mem::take(&mut *self.shared.nodes.lock());
        for node in nodes {
            node.lock().postprocess();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn same_node(a: &SharedFilter, b: &SharedFilter) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Probe {
        fail: bool,
        log: Vec<String>,
    }

    impl Filter for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn preprocess(&mut self, _ctx: &TickContext) -> Result<(), SoundCardError> {
            self.log.push("pre".into());
            if self.fail {
                return Err(SoundCardError::DeviceBusy("probe".into()));
            }
            Ok(())
        }

        fn process(&mut self, ctx: &TickContext) {
            self.log.push(format!("tick {}", ctx.tick));
        }

        fn postprocess(&mut self) {
            self.log.push("post".into());
        }
    }

    #[test]
    fn lifecycle_order() {
        let ticker = Ticker::new(Duration::from_millis(10));
        let probe = Arc::new(Mutex::new(Probe::default()));
        let node: SharedFilter = probe.clone();

        ticker.attach(node.clone()).unwrap();
        ticker.tick_once();
        ticker.tick_once();
        assert!(ticker.detach(&node));
        assert!(!ticker.detach(&node));

        assert_eq!(probe.lock().log, vec!["pre", "tick 0", "tick 1", "post"]);
    }

    #[test]
    fn failed_preprocess_is_reported_and_kept() {
        let ticker = Ticker::new(Duration::from_millis(10));
        let node: SharedFilter = Arc::new(Mutex::new(Probe {
            fail: true,
            ..Probe::default()
        }));
        assert!(ticker.attach(node).is_err());
        assert_eq!(ticker.node_count(), 1);
    }

    #[test]
    fn thread_ticks_and_stop_postprocesses() {
        let mut ticker = Ticker::new(Duration::from_millis(5));
        let probe = Arc::new(Mutex::new(Probe::default()));
        ticker.attach(probe.clone()).unwrap();

        ticker.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while ticker.ticks() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        ticker.stop();

        assert!(!ticker.is_running());
        assert_eq!(ticker.node_count(), 0);
        let log = probe.lock().log.clone();
        assert!(log.len() >= 5);
        assert_eq!(log.last().map(String::as_str), Some("post"));
    }
}
