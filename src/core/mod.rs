//! Shared primitives: subscriptions, listener fan-out, keys, units

pub mod keys;
pub mod listeners;
pub mod subscription;
pub mod units;

pub use listeners::{Listener, ListenerSet};
pub use subscription::Subscription;
