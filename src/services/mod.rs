pub mod adjustment_monitor;
pub mod notifier;
pub mod positions;
pub mod price_feed;
pub mod reconciliation;
pub mod settings;
