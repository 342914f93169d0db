//! Commit notifications for downstream delivery.
//!
//! The log store publishes on the [`EventBus`] after each successful append
//! or undo; transports subscribe per topic and forward to clients.
mod bus;

pub use bus::{EventBus, Notification, Topic};
