use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::models::config::HotplugConfig;
use crate::models::error::SoundCardError;
use crate::registry::manager::SoundCardManager;

/// Granularity at which the poller checks for a stop request.
const STOP_POLL: Duration = Duration::from_millis(20);

/// Background poller that rediscovers devices at a fixed interval.
///
/// Each pass runs [`SoundCardManager::reload_if_changed`], so the card list
/// (and the registry delegate) only changes when the hardware did. Open
/// streams are unaffected by a pass.
pub struct HotplugMonitor {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl HotplugMonitor {
    pub fn start(manager: Arc<SoundCardManager>, config: HotplugConfig) -> Result<Self, SoundCardError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let interval = config.poll_interval();

        let handle = thread::Builder::new()
            .name("soundcard-hotplug".into())
            .spawn(move || {
                log::debug!("hot-plug monitor polling every {:?}", interval);
                let mut next = Instant::now() + interval;
                while flag.load(Ordering::SeqCst) {
                    let now = Instant::now();
                    if now < next {
                        thread::sleep((next - now).min(STOP_POLL));
                        continue;
                    }
                    if manager.reload_if_changed() {
                        log::info!("sound cards rediscovered: {} card(s)", manager.list().len());
                    }
                    next = Instant::now() + interval;
                }
            })
            .map_err(|e| SoundCardError::Backend(format!("failed to spawn hot-plug thread: {}", e)))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop polling and wait for the poller thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HotplugMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
