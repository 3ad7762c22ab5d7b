use crate::models::card::CardInfo;
use crate::models::error::SoundCardError;

/// Event delegate for registry notifications.
///
/// Called from whichever thread ran the reload (the hot-plug poller, or the
/// caller of `reload`), after the registry released its locks: a delegate may
/// query or reload the manager from inside a callback. Implementations should
/// marshal to the UI thread if needed.
pub trait SoundCardDelegate: Send + Sync {
    /// The live card list changed.
    fn on_cards_changed(&self, cards: &[CardInfo]);

    /// A backend failed to enumerate; it contributes no cards this pass.
    fn on_detect_failed(&self, _driver_type: &str, _error: &SoundCardError) {}
}
