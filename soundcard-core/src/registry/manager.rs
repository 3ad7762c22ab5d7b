use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::graph::reader::SoundReader;
use crate::graph::writer::SoundWriter;
use crate::models::card::{card_id, Capabilities, CardInfo};
use crate::models::error::SoundCardError;
use crate::registry::card::SoundCard;
use crate::traits::delegate::SoundCardDelegate;
use crate::traits::descriptor::{DetectedCard, SoundCardDescriptor};

#[derive(Default)]
struct Registry {
    descriptors: Vec<Arc<dyn SoundCardDescriptor>>,
    cards: Vec<Arc<SoundCard>>,
}

/// Registry of sound-card backends and the cards they currently detect.
///
/// Construct one explicitly and pass it (usually as `Arc<SoundCardManager>`)
/// to whoever needs device access. [`SoundCardManager::global`] offers a
/// lazily created process-wide instance for callers that want one.
///
/// Lookups take a read lock on the card list. Reloads are serialized by a
/// separate lock, run detection without blocking readers, then publish the
/// new list in one step: a reader sees either the old list or the new one.
pub struct SoundCardManager {
    registry: RwLock<Registry>,
    reload_lock: Mutex<()>,
    delegate: RwLock<Option<Arc<dyn SoundCardDelegate>>>,
}

impl SoundCardManager {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            reload_lock: Mutex::new(()),
            delegate: RwLock::new(None),
        }
    }

    /// Process-wide instance, created on first access and never torn down.
    pub fn global() -> Arc<SoundCardManager> {
        static GLOBAL: OnceLock<Arc<SoundCardManager>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(SoundCardManager::new())))
    }

    pub fn set_delegate(&self, delegate: Arc<dyn SoundCardDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    /// Register a backend and run its detection once.
    ///
    /// Returns the number of cards the backend contributed. A backend whose
    /// detection fails is still registered and simply contributes no cards.
    pub fn register_descriptor(&self, descriptor: Arc<dyn SoundCardDescriptor>) -> Result<usize, SoundCardError> {
        if descriptor.directions().is_empty() {
            return Err(SoundCardError::InvalidDescriptor(format!(
                "{} offers neither capture nor playback",
                descriptor.driver_type()
            )));
        }

        let mut failures = Vec::new();
        let added = {
            let _reload = self.reload_lock.lock();
            let detected = Self::detect_one(&descriptor, &mut failures);
            let cards: Vec<Arc<SoundCard>> = detected
                .into_iter()
                .map(|c| Arc::new(SoundCard::new(Arc::clone(&descriptor), c)))
                .collect();
            let added = cards.len();

            log::info!("registered {} driver: {} card(s)", descriptor.driver_type(), added);
            let mut registry = self.registry.write();
            registry.descriptors.push(descriptor);
            registry.cards.extend(cards);
            added
        };
        self.notify_failures(failures);
        if added > 0 {
            self.notify_changed();
        }
        Ok(added)
    }

    /// Append a card to the live list. No deduplication by id.
    pub fn add_card(&self, card: SoundCard) -> Arc<SoundCard> {
        let card = Arc::new(card);
        let mut registry = self.registry.write();
        if registry.cards.iter().any(|c| c.id() == card.id()) {
            log::warn!("card id {} registered twice", card.id());
        }
        registry.cards.push(Arc::clone(&card));
        card
    }

    /// Card with the given id, or the first card when `id` is `None`.
    pub fn get_card(&self, id: Option<&str>) -> Option<Arc<SoundCard>> {
        let registry = self.registry.read();
        let found = match id {
            None => registry.cards.first(),
            Some(id) => registry.cards.iter().find(|c| c.id() == id),
        };
        if found.is_none() {
            match id {
                Some(id) => log::warn!("no card with id {}", id),
                None => log::warn!("no sound card available"),
            }
        }
        found.cloned()
    }

    /// First card able to capture.
    pub fn get_default_capture_card(&self) -> Option<Arc<SoundCard>> {
        self.first_with(Capabilities::CAPTURE)
    }

    /// First card able to play back.
    pub fn get_default_playback_card(&self) -> Option<Arc<SoundCard>> {
        self.first_with(Capabilities::PLAYBACK)
    }

    /// First card able to do both.
    pub fn get_default_card(&self) -> Option<Arc<SoundCard>> {
        self.first_with(Capabilities::DUPLEX)
    }

    pub fn cards(&self) -> Vec<Arc<SoundCard>> {
        self.registry.read().cards.clone()
    }

    pub fn list(&self) -> Vec<CardInfo> {
        self.registry.read().cards.iter().map(|c| c.info()).collect()
    }

    pub fn driver_types(&self) -> Vec<String> {
        self.registry
            .read()
            .descriptors
            .iter()
            .map(|d| d.driver_type().to_string())
            .collect()
    }

    /// Drop every live card and re-run detection of every backend, in
    /// registration order.
    ///
    /// Cards still held by an open stream are only torn down once that stream
    /// releases them.
    pub fn reload(&self) {
        let mut failures = Vec::new();
        {
            let _reload = self.reload_lock.lock();
            let descriptors = self.descriptors();
            let detected = Self::detect_all(&descriptors, &mut failures);
            self.publish(Self::wrap(detected));
        }
        self.notify_failures(failures);
        self.notify_changed();
    }

    /// Re-run detection and replace the card list only if the cards or
    /// their capabilities changed. Returns whether a change was published.
    pub fn reload_if_changed(&self) -> bool {
        let mut failures = Vec::new();
        let changed = {
            let _reload = self.reload_lock.lock();
            let descriptors = self.descriptors();
            let detected = Self::detect_all(&descriptors, &mut failures);

            let found: Vec<(String, Capabilities)> = detected
                .iter()
                .map(|(d, c)| (card_id(d.driver_type(), &c.name), c.capabilities))
                .collect();
            let current: Vec<(String, Capabilities)> = self
                .registry
                .read()
                .cards
                .iter()
                .map(|c| (c.id().to_string(), c.capabilities()))
                .collect();
            if found == current {
                false
            } else {
                log::info!("sound card set changed: {} -> {} card(s)", current.len(), found.len());
                self.publish(Self::wrap(detected));
                true
            }
        };
        self.notify_failures(failures);
        if changed {
            self.notify_changed();
        }
        changed
    }

    /// Drop all cards and backends. Each backend's `unload` is called once.
    pub fn unload(&self) {
        let _reload = self.reload_lock.lock();
        let (descriptors, cards) = {
            let mut registry = self.registry.write();
            (
                std::mem::take(&mut registry.descriptors),
                std::mem::take(&mut registry.cards),
            )
        };
        drop(cards);
        for descriptor in descriptors {
            log::debug!("unloading {} driver", descriptor.driver_type());
            descriptor.unload();
        }
    }

    /// Reader node on the card with the given id.
    pub fn create_reader(&self, id: &str) -> Result<SoundReader, SoundCardError> {
        self.get_card(Some(id))
            .ok_or_else(|| SoundCardError::DeviceNotFound(id.to_string()))?
            .create_reader()
    }

    /// Writer node on the card with the given id.
    pub fn create_writer(&self, id: &str) -> Result<SoundWriter, SoundCardError> {
        self.get_card(Some(id))
            .ok_or_else(|| SoundCardError::DeviceNotFound(id.to_string()))?
            .create_writer()
    }

    // --- Internal helpers ---

    fn first_with(&self, wanted: Capabilities) -> Option<Arc<SoundCard>> {
        let found = self
            .registry
            .read()
            .cards
            .iter()
            .find(|c| c.capabilities().contains(wanted))
            .cloned();
        if found.is_none() {
            log::warn!("no {} card available", wanted);
        }
        found
    }

    fn descriptors(&self) -> Vec<Arc<dyn SoundCardDescriptor>> {
        self.registry.read().descriptors.clone()
    }

    /// Run one backend's detection. A failure is logged and recorded in
    /// `failures` for the delegate, to be reported once the reload lock is
    /// released.
    fn detect_one(
        descriptor: &Arc<dyn SoundCardDescriptor>,
        failures: &mut Vec<(String, SoundCardError)>,
    ) -> Vec<DetectedCard> {
        match descriptor.detect() {
            Ok(cards) => cards,
            Err(e) => {
                log::error!("{} detection failed: {}", descriptor.driver_type(), e);
                failures.push((descriptor.driver_type().to_string(), e));
                Vec::new()
            }
        }
    }

    fn detect_all(
        descriptors: &[Arc<dyn SoundCardDescriptor>],
        failures: &mut Vec<(String, SoundCardError)>,
    ) -> Vec<(Arc<dyn SoundCardDescriptor>, DetectedCard)> {
        let mut detected = Vec::new();
        for descriptor in descriptors {
            for card in Self::detect_one(descriptor, failures) {
                detected.push((Arc::clone(descriptor), card));
            }
        }
        detected
    }

    fn wrap(detected: Vec<(Arc<dyn SoundCardDescriptor>, DetectedCard)>) -> Vec<Arc<SoundCard>> {
        detected
            .into_iter()
            .map(|(d, c)| Arc::new(SoundCard::new(d, c)))
            .collect()
    }

    fn publish(&self, cards: Vec<Arc<SoundCard>>) {
        let old = std::mem::replace(&mut self.registry.write().cards, cards);
        for card in &old {
            if Arc::strong_count(card) > 1 {
                log::debug!("card {} still in use, teardown deferred", card.id());
            }
        }
        drop(old);
    }

    fn notify_failures(&self, failures: Vec<(String, SoundCardError)>) {
        if failures.is_empty() {
            return;
        }
        let delegate = self.delegate.read().clone();
        if let Some(delegate) = delegate {
            for (driver_type, error) in &failures {
                delegate.on_detect_failed(driver_type, error);
            }
        }
    }

    fn notify_changed(&self) {
        let delegate = self.delegate.read().clone();
        if let Some(delegate) = delegate {
            delegate.on_cards_changed(&self.list());
        }
    }
}

impl Default for SoundCardManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::null::{NullCardSpec, NullDriver};
    use crate::models::card::MixerElement;

    fn manager_with(cards: Vec<NullCardSpec>) -> (SoundCardManager, Arc<NullDriver>) {
        let manager = SoundCardManager::new();
        let driver = Arc::new(NullDriver::with_cards(cards));
        manager.register_descriptor(driver.clone()).unwrap();
        (manager, driver)
    }

    struct NoDirections;

    impl SoundCardDescriptor for NoDirections {
        fn driver_type(&self) -> &str {
            "Broken"
        }

        fn directions(&self) -> Capabilities {
            Capabilities::DISABLED
        }

        fn detect(&self) -> Result<Vec<DetectedCard>, SoundCardError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Recorder {
        changes: Mutex<Vec<usize>>,
        failures: Mutex<Vec<String>>,
    }

    impl SoundCardDelegate for Recorder {
        fn on_cards_changed(&self, cards: &[CardInfo]) {
            self.changes.lock().push(cards.len());
        }

        fn on_detect_failed(&self, driver_type: &str, _error: &SoundCardError) {
            self.failures.lock().push(driver_type.to_string());
        }
    }

    #[test]
    fn register_populates_cards() {
        let (manager, _) = manager_with(vec![NullCardSpec::duplex("a"), NullCardSpec::capture_only("mic")]);
        let ids: Vec<String> = manager.list().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["Null: a", "Null: mic"]);
        assert_eq!(manager.driver_types(), vec!["Null"]);
    }

    #[test]
    fn rejects_descriptor_without_directions() {
        let manager = SoundCardManager::new();
        let err = manager.register_descriptor(Arc::new(NoDirections)).unwrap_err();
        assert!(matches!(err, SoundCardError::InvalidDescriptor(_)));
        assert!(manager.driver_types().is_empty());
    }

    #[test]
    fn get_card_by_id_or_first() {
        let (manager, _) = manager_with(vec![NullCardSpec::duplex("a"), NullCardSpec::duplex("b")]);
        assert_eq!(manager.get_card(Some("Null: b")).unwrap().name(), "b");
        assert_eq!(manager.get_card(None).unwrap().name(), "a");
        assert!(manager.get_card(Some("Null: zzz")).is_none());
    }

    #[test]
    fn empty_registry_lookups() {
        let manager = SoundCardManager::new();
        assert!(manager.get_card(None).is_none());
        assert!(manager.get_default_capture_card().is_none());
        assert!(manager.get_default_playback_card().is_none());
    }

    #[test]
    fn defaults_respect_capabilities() {
        let (manager, _) = manager_with(vec![
            NullCardSpec::playback_only("spk"),
            NullCardSpec::capture_only("mic"),
        ]);
        assert_eq!(manager.get_default_capture_card().unwrap().name(), "mic");
        assert_eq!(manager.get_default_playback_card().unwrap().name(), "spk");
        assert!(manager.get_default_card().is_none());
    }

    #[test]
    fn add_card_does_not_deduplicate() {
        let (manager, driver) = manager_with(vec![NullCardSpec::duplex("a")]);
        let detected = driver.detect().unwrap().pop().unwrap();
        manager.add_card(SoundCard::new(driver, detected));
        assert_eq!(manager.list().len(), 2);
    }

    #[test]
    fn reload_keeps_ids_new_objects() {
        let (manager, _) = manager_with(vec![NullCardSpec::duplex("a")]);
        let before = manager.get_card(Some("Null: a")).unwrap();
        manager.reload();
        let after = manager.get_card(Some("Null: a")).unwrap();
        assert_eq!(before.id(), after.id());
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn reload_defers_teardown_of_cards_in_use() {
        let (manager, driver) = manager_with(vec![NullCardSpec::duplex("a")]);
        let held = manager.get_card(None).unwrap();
        manager.reload();
        // the held card and the freshly detected one
        assert_eq!(driver.live_cards(), 2);
        drop(held);
        assert_eq!(driver.live_cards(), 1);
    }

    #[test]
    fn reload_if_changed_only_on_difference() {
        let (manager, driver) = manager_with(vec![NullCardSpec::duplex("a")]);
        let recorder = Arc::new(Recorder::default());
        manager.set_delegate(recorder.clone());

        assert!(!manager.reload_if_changed());
        driver.plug(NullCardSpec::capture_only("usb-mic"));
        assert!(manager.reload_if_changed());
        assert_eq!(manager.list().len(), 2);
        driver.unplug("a");
        assert!(manager.reload_if_changed());
        assert_eq!(manager.list()[0].name, "usb-mic");

        assert_eq!(*recorder.changes.lock(), vec![2, 1]);
    }

    #[test]
    fn capability_change_counts_as_change() {
        let (manager, driver) = manager_with(vec![NullCardSpec::playback_only("usb")]);
        assert!(manager.get_default_capture_card().is_none());

        // same device, now exposing its input side too
        driver.unplug("usb");
        driver.plug(NullCardSpec::duplex("usb"));
        assert!(manager.reload_if_changed());
        assert_eq!(manager.get_default_capture_card().unwrap().id(), "Null: usb");
        assert!(!manager.reload_if_changed());
    }

    /// Delegate that re-enters the registry from its callback.
    struct Reentrant {
        manager: std::sync::Weak<SoundCardManager>,
        seen: Mutex<Vec<usize>>,
    }

    impl SoundCardDelegate for Reentrant {
        fn on_cards_changed(&self, cards: &[CardInfo]) {
            self.seen.lock().push(cards.len());
            if let Some(manager) = self.manager.upgrade() {
                // nothing changed since the notification: no recursion
                assert!(!manager.reload_if_changed());
                assert_eq!(manager.list().len(), cards.len());
            }
        }
    }

    #[test]
    fn delegate_may_call_back_into_manager() {
        let manager = Arc::new(SoundCardManager::new());
        let delegate = Arc::new(Reentrant {
            manager: Arc::downgrade(&manager),
            seen: Mutex::new(Vec::new()),
        });
        manager.set_delegate(delegate.clone());

        let driver = Arc::new(NullDriver::with_cards(vec![NullCardSpec::duplex("a")]));
        manager.register_descriptor(driver.clone()).unwrap();
        manager.reload();
        driver.plug(NullCardSpec::duplex("b"));
        assert!(manager.reload_if_changed());

        assert_eq!(*delegate.seen.lock(), vec![1, 1, 2]);
    }

    #[test]
    fn readers_never_see_a_partial_list() {
        let manager = Arc::new(SoundCardManager::new());
        let specs = vec![
            NullCardSpec::duplex("a"),
            NullCardSpec::capture_only("b"),
            NullCardSpec::playback_only("c"),
        ];
        manager
            .register_descriptor(Arc::new(NullDriver::with_cards(specs)))
            .unwrap();

        let reloader = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    manager.reload();
                }
            })
        };

        let mut observed = 0;
        while !reloader.is_finished() || observed == 0 {
            let ids: Vec<String> = manager.list().into_iter().map(|c| c.id).collect();
            assert_eq!(ids, vec!["Null: a", "Null: b", "Null: c"]);
            assert!(manager.get_default_capture_card().is_some());
            assert!(manager.get_default_playback_card().is_some());
            observed += 1;
        }
        reloader.join().unwrap();
    }

    #[test]
    fn failed_detection_contributes_nothing() {
        let manager = SoundCardManager::new();
        let recorder = Arc::new(Recorder::default());
        manager.set_delegate(recorder.clone());

        let broken = Arc::new(NullDriver::with_cards(vec![NullCardSpec::duplex("x")]));
        broken.set_detect_failure(true);
        assert_eq!(manager.register_descriptor(broken).unwrap(), 0);

        let working = Arc::new(NullDriver::with_cards(vec![NullCardSpec::duplex("y")]));
        assert_eq!(manager.register_descriptor(working).unwrap(), 1);

        assert_eq!(manager.list().len(), 1);
        assert_eq!(*recorder.failures.lock(), vec!["Null".to_string()]);
    }

    #[test]
    fn unload_clears_everything() {
        let (manager, driver) = manager_with(vec![NullCardSpec::duplex("a")]);
        manager.unload();
        assert!(manager.list().is_empty());
        assert!(manager.driver_types().is_empty());
        assert_eq!(driver.live_cards(), 0);
        assert!(driver.was_unloaded());
    }

    #[test]
    fn create_nodes_by_id() {
        let (manager, _) = manager_with(vec![NullCardSpec::duplex("a")]);
        assert!(manager.create_reader("Null: a").is_ok());
        assert!(manager.create_writer("Null: a").is_ok());
        assert_eq!(
            manager.create_reader("Null: nope").unwrap_err(),
            SoundCardError::DeviceNotFound("Null: nope".into())
        );
    }

    #[test]
    fn mixer_through_registry_card() {
        let (manager, _) = manager_with(vec![NullCardSpec::duplex("a")]);
        let card = manager.get_card(None).unwrap();
        card.set_level(MixerElement::Playback, 40).unwrap();
        assert_eq!(manager.get_card(None).unwrap().get_level(MixerElement::Playback), Ok(40));
    }

    #[test]
    fn global_is_shared() {
        let a = SoundCardManager::global();
        let b = SoundCardManager::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
