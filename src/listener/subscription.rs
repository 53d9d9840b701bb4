//! Expected-event registrations.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attribute::{AttributeMatcher, AttributeName};
use crate::error::ListenerError;
use crate::event::EventDescriptor;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Called with `(expected, observed)` whenever an expectation matches.
pub type Callback = Arc<dyn Fn(&EventDescriptor, &EventDescriptor) + Send + Sync>;

/// Options for [`EventListener::listen_to`](super::EventListener::listen_to).
#[derive(Clone, Default)]
pub struct ListenOptions {
    /// Invoked on every match.
    pub callback: Option<Callback>,
    /// Stop matching once the first event arrived.
    pub first_event: bool,
}

impl ListenOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&EventDescriptor, &EventDescriptor) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub const fn first_event(mut self, first_event: bool) -> Self {
        self.first_event = first_event;
        self
    }
}

impl fmt::Debug for ListenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenOptions")
            .field("callback", &self.callback.is_some())
            .field("first_event", &self.first_event)
            .finish()
    }
}

pub(crate) fn lock<'a, T>(
    m: &'a Mutex<T>,
    context: &'static str,
) -> Result<MutexGuard<'a, T>, ListenerError> {
    m.lock().map_err(|_| ListenerError::PoisonedLock { context })
}

/// A registered expectation and its match history.
///
/// The expectation is mutated only by target resolution; `matched` is
/// append-only.
pub struct Subscription {
    id: SubscriptionId,
    expected: Mutex<EventDescriptor>,
    callback: Option<Callback>,
    first_event: bool,
    matched: Mutex<Vec<EventDescriptor>>,
}

impl Subscription {
    pub(crate) fn new(expected: EventDescriptor, options: ListenOptions) -> Self {
        Self {
            id: SubscriptionId::new(),
            expected: Mutex::new(expected),
            callback: options.callback,
            first_event: options.first_event,
            matched: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub const fn first_event(&self) -> bool {
        self.first_event
    }

    /// Snapshot of the expectation, including a resolved `target_id`.
    pub fn expected(&self) -> Result<EventDescriptor, ListenerError> {
        Ok(lock(&self.expected, "subscription.expected")?.clone())
    }

    /// Keep a resolved `target_id`; an id already present wins.
    pub(crate) fn store_target_id(&self, target_id: AttributeMatcher) -> Result<(), ListenerError> {
        let mut expected = lock(&self.expected, "subscription.expected")?;
        if !expected.contains(AttributeName::TargetId) {
            expected.add_attributes([target_id]);
        }
        Ok(())
    }

    /// Snapshot of the events matched so far.
    pub fn matched(&self) -> Result<Vec<EventDescriptor>, ListenerError> {
        Ok(lock(&self.matched, "subscription.matched")?.clone())
    }

    pub fn match_count(&self) -> Result<usize, ListenerError> {
        Ok(lock(&self.matched, "subscription.matched")?.len())
    }

    /// True when this subscription no longer needs polling.
    pub fn is_done(&self) -> Result<bool, ListenerError> {
        Ok(self.first_event && self.match_count()? > 0)
    }

    /// Append a match; refused for a first-event subscription that already has one.
    pub(crate) fn record_match(&self, observed: EventDescriptor) -> Result<bool, ListenerError> {
        let mut matched = lock(&self.matched, "subscription.matched")?;
        if self.first_event && !matched.is_empty() {
            return Ok(false);
        }
        matched.push(observed);
        Ok(true)
    }

    /// Run the callback. A panicking callback is logged and otherwise ignored.
    pub(crate) fn notify(&self, expected: &EventDescriptor, observed: &EventDescriptor) {
        let Some(callback) = &self.callback else {
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| callback(expected, observed))).is_err() {
            tracing::warn!(
                subscription = %self.id,
                expected = %expected,
                "event callback panicked"
            );
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("first_event", &self.first_event)
            .field("callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

/// An expectation together with the events that matched it.
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct GotEvents {
    pub id: SubscriptionId,
    pub expected: EventDescriptor,
    pub matched: Vec<EventDescriptor>,
}

impl GotEvents {
    /// Number of matched events.
    #[must_use]
    pub fn count(&self) -> usize {
        self.matched.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::record::EventRecord;

    fn observed(id: u64) -> EventDescriptor {
        EventDescriptor::from_record(&EventRecord::new(id, "vm_create"))
    }

    #[test]
    fn first_event_accepts_one_match() {
        let sub = Subscription::new(EventDescriptor::new(), ListenOptions::new().first_event(true));
        assert!(!sub.is_done().unwrap());
        assert!(sub.record_match(observed(1)).unwrap());
        assert!(sub.is_done().unwrap());
        assert!(!sub.record_match(observed(2)).unwrap());
        assert_eq!(sub.match_count().unwrap(), 1);
    }

    #[test]
    fn collecting_subscription_keeps_all() {
        let sub = Subscription::new(EventDescriptor::new(), ListenOptions::new());
        for id in 1..=3 {
            assert!(sub.record_match(observed(id)).unwrap());
        }
        assert!(!sub.is_done().unwrap());
        let ids: Vec<_> = sub.matched().unwrap().iter().filter_map(EventDescriptor::id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn resolved_target_id_is_stored_once() {
        let mut expected = EventDescriptor::new();
        expected.add_raw("target_name", "vm1");
        let sub = Subscription::new(expected, ListenOptions::new());
        sub.store_target_id(AttributeMatcher::new(AttributeName::TargetId, 42)).unwrap();
        sub.store_target_id(AttributeMatcher::new(AttributeName::TargetId, 43)).unwrap();
        let stored = sub.expected().unwrap();
        assert_eq!(stored.value(AttributeName::TargetId), Some(&crate::AttributeValue::Int(42)));
        assert!(stored.contains(AttributeName::TargetName));
    }

    #[test]
    fn panicking_callback_is_contained() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let sub = Subscription::new(
            EventDescriptor::new(),
            ListenOptions::new().callback(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                panic!("callback failure");
            }),
        );
        sub.notify(&EventDescriptor::new(), &observed(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
