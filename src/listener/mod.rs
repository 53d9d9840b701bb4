//! Background listener correlating observed events with expectations.
//!
//! A test registers expected events, starts the listener, drives the
//! application and finally asks whether every expectation was seen. The
//! worker polls the event source on a fixed interval and only looks at
//! events newer than the last one it processed.

/// Listener tunables.
pub mod config;
/// Expectation registrations.
pub mod subscription;
/// The listener handle.
pub mod system;
mod worker;

pub use config::ListenerConfig;
pub use subscription::{Callback, GotEvents, ListenOptions, Subscription, SubscriptionId};
pub use system::EventListener;
pub use worker::PollSummary;
