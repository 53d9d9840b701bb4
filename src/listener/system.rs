//! The event listener handle.
//!
//! `EventListener` owns the expectation registry and a background worker that
//! polls the event source. The handle is `Sync`: a test can share it with
//! callbacks or helper threads while the worker runs.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use tracing::Dispatch;

use crate::attribute::AttributeName;
use crate::error::{EventResult, ListenerError, ValidationError};
use crate::event::EventDescriptor;
use crate::record::EventRecord;
use crate::resolver::IdResolver;
use crate::storage::{EventSource, ObjectLookup};
use crate::value::AttributeValue;

use super::config::ListenerConfig;
use super::subscription::{lock, GotEvents, ListenOptions, Subscription, SubscriptionId};
use super::worker::{build_query, fetch, poll_pass, worker_loop, PollSummary, Shared};

struct Running {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

/// Listens to the application's event stream and correlates it with
/// expected events.
///
/// ```rust,ignore
/// let listener = EventListener::new(events, objects, ListenerConfig::default());
/// listener.register_event([
///     ("event_type", "vm_create".into()),
///     ("target_type", "VmOrTemplate".into()),
///     ("target_name", "my_vm".into()),
/// ])?;
/// listener.start()?;
/// // ... drive the application ...
/// listener.shutdown()?;
/// assert!(listener.check_expected_events()?);
/// ```
pub struct EventListener {
    shared: Arc<Shared>,
    config: ListenerConfig,
    dispatch: Dispatch,
    run: Mutex<Option<Running>>,
}

impl EventListener {
    /// Create a stopped listener.
    ///
    /// Logs go to the dispatcher that is current on the calling thread; use
    /// [`with_dispatch`](Self::with_dispatch) to pick another sink.
    pub fn new(
        events: Arc<dyn EventSource>,
        objects: Arc<dyn ObjectLookup>,
        config: ListenerConfig,
    ) -> Self {
        let resolver = IdResolver::new(objects, config.target_types.clone());
        Self {
            shared: Arc::new(Shared::new(events, resolver)),
            config,
            dispatch: tracing::dispatcher::get_default(Dispatch::clone),
            run: Mutex::new(None),
        }
    }

    /// Send this listener's logs, including the worker's, to `dispatch`.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ListenerConfig {
        &self.config
    }

    #[must_use]
    pub fn resolver(&self) -> &IdResolver {
        &self.shared.resolver
    }

    fn logged<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    /// Set the watermark from `reference`, or from the newest event in the stream.
    ///
    /// With no reference and an empty stream the watermark stays as it is.
    pub fn set_last_record(&self, reference: Option<&EventDescriptor>) -> EventResult<()> {
        let id = match reference {
            Some(evt) => Some(evt.id().ok_or(ValidationError::MissingEventId)?),
            None => self.shared.events.latest(1)?.first().map(|r| r.id),
        };
        if let Some(id) = id {
            self.shared.advance_watermark(id)?;
        }
        Ok(())
    }

    /// Last processed event id.
    pub fn watermark(&self) -> EventResult<Option<u64>> {
        Ok(self.shared.watermark()?)
    }

    /// Start polling for events newer than the current newest one.
    ///
    /// # Errors
    /// - `AlreadyRunning` if the worker is still alive
    /// - storage errors while reading the newest event
    pub fn start(&self) -> EventResult<()> {
        self.start_from(None)
    }

    /// Start polling for events newer than `reference`.
    pub fn start_after(&self, reference: &EventDescriptor) -> EventResult<()> {
        self.start_from(Some(reference))
    }

    fn start_from(&self, reference: Option<&EventDescriptor>) -> EventResult<()> {
        let mut run = lock(&self.run, "listener.run")?;
        if run.as_ref().is_some_and(|r| !r.join.is_finished()) {
            return Err(ListenerError::AlreadyRunning.into());
        }

        self.set_last_record(reference)?;
        self.shared.stopping.store(false, Ordering::Release);

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let dispatch = self.dispatch.clone();
        let poll_interval = self.config.poll_interval;
        let join = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    worker_loop(&shared, &stop_rx, poll_interval);
                });
            })
            .map_err(|e| ListenerError::Spawn {
                message: e.to_string(),
            })?;

        *run = Some(Running { stop_tx, join });
        let watermark = self.shared.watermark()?;
        self.logged(|| tracing::info!(?watermark, "Event Listener has been started"));
        Ok(())
    }

    /// Ask the worker to exit at its next check. Does not wait.
    pub fn stop(&self) -> EventResult<()> {
        self.shared.stopping.store(true, Ordering::Release);
        if let Some(running) = lock(&self.run, "listener.run")?.as_ref() {
            // A full channel already carries a stop request.
            let _ = running.stop_tx.try_send(());
        }
        self.logged(|| tracing::info!("Event Listener has been stopped"));
        Ok(())
    }

    /// Wait for the worker to exit. Returns at once if none was started.
    ///
    /// Does not stop the worker; see [`shutdown`](Self::shutdown).
    pub fn join(&self) -> EventResult<()> {
        let Some(running) = lock(&self.run, "listener.run")?.take() else {
            return Ok(());
        };
        if running.join.thread().id() == thread::current().id() {
            // Joining from a callback would deadlock; the worker exits on its own.
            return Ok(());
        }
        running
            .join
            .join()
            .map_err(|_| ListenerError::WorkerPanicked)?;
        Ok(())
    }

    /// [`stop`](Self::stop) followed by [`join`](Self::join).
    pub fn shutdown(&self) -> EventResult<()> {
        self.stop()?;
        self.join()
    }

    /// True while the worker thread is alive.
    #[must_use]
    pub fn started(&self) -> bool {
        lock(&self.run, "listener.run")
            .map(|run| run.as_ref().is_some_and(|r| !r.join.is_finished()))
            .unwrap_or(false)
    }

    /// Build an expectation from `(name, value)` pairs.
    ///
    /// Unknown names are logged and dropped.
    pub fn new_event<I, K, V>(&self, pairs: I) -> EventDescriptor
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<AttributeValue>,
    {
        self.logged(|| {
            let mut event = EventDescriptor::new();
            for (name, value) in pairs {
                event.add_raw(name.as_ref(), value);
            }
            event
        })
    }

    /// Register expectations, one subscription each.
    ///
    /// Every expectation is validated before any is registered: a target
    /// name with an unmapped target type is a configuration error.
    pub fn listen_to<I>(&self, events: I, options: ListenOptions) -> EventResult<Vec<SubscriptionId>>
    where
        I: IntoIterator<Item = EventDescriptor>,
    {
        let events: Vec<EventDescriptor> = events.into_iter().collect();
        for evt in &events {
            self.validate(evt)?;
        }

        let subscriptions: Vec<Arc<Subscription>> = events
            .into_iter()
            .map(|evt| Arc::new(Subscription::new(evt, options.clone())))
            .collect();
        let ids = subscriptions.iter().map(|s| s.id()).collect();
        self.enqueue(subscriptions)?;
        Ok(ids)
    }

    fn enqueue(&self, subscriptions: Vec<Arc<Subscription>>) -> EventResult<()> {
        let mut registry = lock(&self.shared.registry, "listener.registry")?;
        for sub in subscriptions {
            let expected = sub.expected()?;
            self.logged(|| {
                tracing::info!(subscription = %sub.id(), event = %expected, "event is added to listening queue");
            });
            registry.push(sub);
        }
        Ok(())
    }

    fn validate(&self, evt: &EventDescriptor) -> EventResult<()> {
        if evt.contains(AttributeName::TargetId) {
            return Ok(());
        }
        let Some(target_name) = evt.value(AttributeName::TargetName) else {
            return Ok(());
        };
        let target_type = evt
            .value(AttributeName::TargetType)
            .and_then(AttributeValue::as_str);
        self.shared.resolver.ensure_mapped(target_type, target_name)?;
        Ok(())
    }

    /// Register a single expectation that is satisfied by its first event.
    pub fn register_event<I, K, V>(&self, pairs: I) -> EventResult<SubscriptionId>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<AttributeValue>,
    {
        self.register_event_with(pairs, true)
    }

    /// Like [`register_event`](Self::register_event) with an explicit `first_event`.
    pub fn register_event_with<I, K, V>(&self, pairs: I, first_event: bool) -> EventResult<SubscriptionId>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<AttributeValue>,
    {
        let evt = self.new_event(pairs);
        self.logged(|| tracing::info!(event = %evt, "registering event"));
        self.validate(&evt)?;
        let sub = Arc::new(Subscription::new(
            evt,
            ListenOptions::new().first_event(first_event),
        ));
        let id = sub.id();
        self.enqueue(vec![sub])?;
        Ok(id)
    }

    /// Expectations with the events matched so far.
    pub fn got_events(&self) -> EventResult<Vec<GotEvents>> {
        let mut out = Vec::new();
        for sub in self.shared.snapshot()? {
            out.push(GotEvents {
                id: sub.id(),
                expected: sub.expected()?,
                matched: sub.matched()?,
            });
        }
        self.logged(|| {
            for got in &out {
                tracing::info!(event = %got.expected, matched = got.count(), "expected event status");
            }
        });
        Ok(out)
    }

    /// True iff every expectation matched at least once (vacuously true).
    pub fn check_expected_events(&self) -> EventResult<bool> {
        for sub in self.shared.snapshot()? {
            if sub.match_count()? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Registered subscriptions in registration order.
    pub fn subscriptions(&self) -> EventResult<Vec<Arc<Subscription>>> {
        Ok(self.shared.snapshot()?)
    }

    /// Forget all expectations.
    pub fn reset_events(&self) -> EventResult<()> {
        lock(&self.shared.registry, "listener.registry")?.clear();
        Ok(())
    }

    /// Run one polling pass on the calling thread.
    ///
    /// Waits while the worker (or another caller) is mid-pass. Calling it from
    /// a callback fails with `ListenerError::ReentrantPoll`.
    pub fn poll_once(&self) -> EventResult<PollSummary> {
        self.logged(|| poll_pass(&self.shared))
    }

    /// Events newer than the watermark that pass `expected`'s filters.
    ///
    /// Resolves `expected`'s target first; `None` means it does not exist
    /// yet. Storage errors are returned, not contained.
    pub fn get_next_portion(
        &self,
        expected: &mut EventDescriptor,
    ) -> EventResult<Option<Vec<EventRecord>>> {
        let watermark = self.shared.watermark()?;
        let Some(query) = build_query(&self.shared.resolver, expected, watermark)? else {
            return Ok(None);
        };
        Ok(Some(fetch(self.shared.events.as_ref(), &query)?))
    }
}

impl std::fmt::Debug for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListener")
            .field("config", &self.config)
            .field("started", &self.started())
            .finish_non_exhaustive()
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        // Signal only; the worker exits once it sees the flag or the closed channel.
        self.shared.stopping.store(true, Ordering::Release);
        if let Ok(mut run) = self.run.lock() {
            drop(run.take());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use crossbeam_channel::Receiver;

    use super::*;
    use crate::query::EventQuery;
    use crate::storage::{InMemoryAppliance, InMemoryEventSource, InMemoryObjects, ObjectRef, StorageError};

    /// Blocks the first call until released.
    struct Gate {
        armed: AtomicBool,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl Gate {
        fn new() -> (Self, Receiver<()>, Sender<()>) {
            let (entered_tx, entered_rx) = bounded(1);
            let (release_tx, release_rx) = bounded(1);
            let gate = Self {
                armed: AtomicBool::new(true),
                entered: entered_tx,
                release: release_rx,
            };
            (gate, entered_rx, release_tx)
        }

        fn pass(&self) {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.send(()).unwrap();
                self.release.recv().unwrap();
            }
        }
    }

    struct GatedEvents {
        inner: Arc<InMemoryEventSource>,
        gate: Gate,
    }

    impl EventSource for GatedEvents {
        fn latest(&self, limit: usize) -> Result<Vec<EventRecord>, StorageError> {
            self.inner.latest(limit)
        }

        fn filter(&self, query: &EventQuery) -> Result<Vec<EventRecord>, StorageError> {
            self.gate.pass();
            self.inner.filter(query)
        }
    }

    struct GatedObjects {
        inner: Arc<InMemoryObjects>,
        gate: Gate,
    }

    impl ObjectLookup for GatedObjects {
        fn find_by_name(&self, collection: &str, name: &str) -> Result<Vec<ObjectRef>, StorageError> {
            self.gate.pass();
            self.inner.find_by_name(collection, name)
        }
    }

    fn listener(app: &InMemoryAppliance) -> EventListener {
        EventListener::new(
            app.event_source(),
            app.object_lookup(),
            ListenerConfig::default().with_poll_interval(Duration::from_millis(10)),
        )
    }

    #[test]
    fn start_sets_watermark_to_newest_event() {
        let app = InMemoryAppliance::new();
        let l = listener(&app);
        l.start().unwrap();
        assert_eq!(l.watermark().unwrap(), None);
        l.shutdown().unwrap();

        app.events.publish(EventRecord::new(0, "a")).unwrap();
        app.events.publish(EventRecord::new(0, "b")).unwrap();
        l.start().unwrap();
        assert_eq!(l.watermark().unwrap(), Some(2));
        l.shutdown().unwrap();
    }

    #[test]
    fn start_twice_is_rejected() {
        let app = InMemoryAppliance::new();
        let l = listener(&app);
        l.start().unwrap();
        let err = l.start().unwrap_err();
        assert!(matches!(err, crate::EventError::Listener(ListenerError::AlreadyRunning)));
        l.shutdown().unwrap();
        assert!(!l.started());

        l.start().unwrap();
        assert!(l.started());
        l.shutdown().unwrap();
    }

    #[test]
    fn start_after_reference_event() {
        let app = InMemoryAppliance::new();
        for _ in 0..5 {
            app.events.publish(EventRecord::new(0, "a")).unwrap();
        }
        let l = listener(&app);
        let reference = EventDescriptor::from_record(&EventRecord::new(3, "a"));
        l.start_after(&reference).unwrap();
        assert_eq!(l.watermark().unwrap(), Some(3));
        l.shutdown().unwrap();

        let err = l.set_last_record(Some(&EventDescriptor::new())).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn unknown_pairs_are_dropped() {
        let app = InMemoryAppliance::new();
        let l = listener(&app);
        let evt = l.new_event([("event_type", "vm_create"), ("bogus", "x")]);
        assert_eq!(evt.len(), 1);
    }

    #[test]
    fn unmapped_target_type_is_rejected_at_registration() {
        let app = InMemoryAppliance::new();
        let l = listener(&app);
        let good = l.new_event([("event_type", "vm_create")]);
        let bad = l.new_event([("target_type", "Flavor"), ("target_name", "small")]);
        let err = l.listen_to([good, bad], ListenOptions::new()).unwrap_err();
        assert!(matches!(err, crate::EventError::Resolve(_)));
        assert!(l.got_events().unwrap().is_empty());
    }

    #[test]
    fn reset_makes_check_vacuous() {
        let app = InMemoryAppliance::new();
        let l = listener(&app);
        l.register_event([("event_type", "vm_create")]).unwrap();
        assert!(!l.check_expected_events().unwrap());
        l.reset_events().unwrap();
        assert!(l.check_expected_events().unwrap());
    }

    #[test]
    fn overlapping_passes_record_each_event_once() {
        let app = InMemoryAppliance::new();
        let (gate, entered, release) = Gate::new();
        let events = Arc::new(GatedEvents {
            inner: Arc::clone(&app.events),
            gate,
        });
        let l = Arc::new(EventListener::new(events, app.object_lookup(), ListenerConfig::default()));
        l.register_event_with([("event_type", "vm_create")], false).unwrap();
        app.events.publish(EventRecord::new(0, "vm_create")).unwrap();

        let first = {
            let l = Arc::clone(&l);
            thread::spawn(move || l.poll_once().unwrap())
        };
        entered.recv().unwrap();
        let second = {
            let l = Arc::clone(&l);
            thread::spawn(move || l.poll_once().unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        release.send(()).unwrap();
        first.join().unwrap();
        second.join().unwrap();

        let ids: Vec<_> = l.got_events().unwrap()[0].matched.iter().map(EventDescriptor::id).collect();
        assert_eq!(ids, vec![Some(1)]);
    }

    #[test]
    fn slow_lookup_does_not_block_readers() {
        let app = InMemoryAppliance::new();
        let (gate, entered, release) = Gate::new();
        let objects = Arc::new(GatedObjects {
            inner: Arc::clone(&app.objects),
            gate,
        });
        app.objects.insert_with_id("vms", 42, "vm1").unwrap();
        let l = Arc::new(EventListener::new(app.event_source(), objects, ListenerConfig::default()));
        l.register_event([("target_type", "VmOrTemplate"), ("target_name", "vm1")]).unwrap();

        let pass = {
            let l = Arc::clone(&l);
            thread::spawn(move || l.poll_once().unwrap())
        };
        entered.recv().unwrap();

        let (got_tx, got_rx) = bounded(1);
        {
            let l = Arc::clone(&l);
            thread::spawn(move || got_tx.send(l.got_events().unwrap().len()).unwrap());
        }
        let read = got_rx.recv_timeout(Duration::from_secs(2));
        release.send(()).unwrap();
        assert_eq!(read, Ok(1));

        pass.join().unwrap();
        let expected = &l.got_events().unwrap()[0].expected;
        assert_eq!(expected.value(AttributeName::TargetId), Some(&AttributeValue::Int(42)));
    }

    #[test]
    fn poll_from_callback_is_refused() {
        let app = InMemoryAppliance::new();
        let l = Arc::new(listener(&app));
        let (result_tx, result_rx) = bounded(1);
        let weak = Arc::downgrade(&l);
        l.listen_to(
            [l.new_event([("event_type", "vm_create")])],
            ListenOptions::new().callback(move |_: &EventDescriptor, _: &EventDescriptor| {
                if let Some(l) = weak.upgrade() {
                    let nested = l.poll_once();
                    result_tx
                        .send(matches!(
                            nested,
                            Err(crate::EventError::Listener(ListenerError::ReentrantPoll))
                        ))
                        .unwrap();
                }
            }),
        )
        .unwrap();
        app.events.publish(EventRecord::new(0, "vm_create")).unwrap();

        let summary = l.poll_once().unwrap();
        assert_eq!(summary.matched, 1);
        assert_eq!(result_rx.try_recv(), Ok(true));
    }

    #[test]
    fn string_timestamp_expectation_matches_on_poll() {
        let app = InMemoryAppliance::new();
        let record: EventRecord = serde_json::from_value(serde_json::json!({
            "id": 1,
            "event_type": "vm_create",
            "timestamp": "2026-10-19T10:00:00Z",
        }))
        .unwrap();
        app.events.publish_record(record).unwrap();

        let l = listener(&app);
        l.register_event([("event_type", "vm_create"), ("timestamp", "2026-10-19T10:00:00Z")])
            .unwrap();
        l.poll_once().unwrap();
        assert!(l.check_expected_events().unwrap());
    }

    #[test]
    fn register_event_returns_registered_id() {
        let app = InMemoryAppliance::new();
        let l = listener(&app);
        let id = l.register_event([("event_type", "vm_create")]).unwrap();
        let subs = l.subscriptions().unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].id(), id);
        assert!(subs[0].first_event());

        let err = l
            .register_event([
                ("target_type", AttributeValue::from("VmOrTemplate")),
                ("target_name", AttributeValue::Float(1.5)),
            ])
            .unwrap_err();
        assert!(matches!(err, crate::EventError::Resolve(_)));
        assert_eq!(l.subscriptions().unwrap().len(), 1);
    }

    #[test]
    fn get_next_portion_propagates_storage_errors() {
        let app = InMemoryAppliance::new();
        let l = listener(&app);
        let mut evt = l.new_event([("event_type", "vm_create")]);
        app.events.fail_next(1).unwrap();
        let err = l.get_next_portion(&mut evt).unwrap_err();
        assert!(err.is_storage());

        app.events.publish(EventRecord::new(0, "vm_create")).unwrap();
        let records = l.get_next_portion(&mut evt).unwrap().unwrap();
        assert_eq!(records.len(), 1);
    }
}
