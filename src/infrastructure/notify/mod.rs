//! Notification channel implementations

mod broadcast;

pub use broadcast::BroadcastNotifier;
