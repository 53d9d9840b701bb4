//! Polling pass and worker loop.
//!
//! The registry is copied out before a pass starts, so the test thread can
//! register or reset expectations while the worker waits on the event source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::attribute::AttributeName;
use crate::error::{EventResult, ListenerError, ResolveError};
use crate::event::{EventDescriptor, Resolution};
use crate::query::EventQuery;
use crate::record::EventRecord;
use crate::resolver::IdResolver;
use crate::storage::{EventSource, StorageError};

use super::subscription::{lock, Subscription};

/// Counters describing one polling pass.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Subscriptions whose events were queried.
    pub polled: usize,
    /// Subscriptions skipped because their target does not exist yet.
    pub pending: usize,
    /// First-event subscriptions that already matched.
    pub done: usize,
    /// Subscriptions whose processing failed.
    pub failed: usize,
    pub matched: usize,
    /// The pass was cut short by a stop request.
    pub interrupted: bool,
}

/// State shared between the listener handle and its worker.
pub(crate) struct Shared {
    pub(crate) events: Arc<dyn EventSource>,
    pub(crate) resolver: IdResolver,
    pub(crate) registry: Mutex<Vec<Arc<Subscription>>>,
    pub(crate) watermark: Mutex<Option<u64>>,
    pub(crate) stopping: AtomicBool,
    pass: Mutex<()>,
    pass_owner: Mutex<Option<ThreadId>>,
}

impl Shared {
    pub(crate) fn new(events: Arc<dyn EventSource>, resolver: IdResolver) -> Self {
        Self {
            events,
            resolver,
            registry: Mutex::new(Vec::new()),
            watermark: Mutex::new(None),
            stopping: AtomicBool::new(false),
            pass: Mutex::new(()),
            pass_owner: Mutex::new(None),
        }
    }

    pub(crate) fn snapshot(&self) -> Result<Vec<Arc<Subscription>>, ListenerError> {
        Ok(lock(&self.registry, "listener.registry")?.clone())
    }

    pub(crate) fn watermark(&self) -> Result<Option<u64>, ListenerError> {
        Ok(*lock(&self.watermark, "listener.watermark")?)
    }

    /// Raise the watermark to `id`; never lowers it.
    pub(crate) fn advance_watermark(&self, id: u64) -> Result<(), ListenerError> {
        let mut watermark = lock(&self.watermark, "listener.watermark")?;
        *watermark = Some(watermark.map_or(id, |w| w.max(id)));
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Take the pass lock; passes never overlap.
    fn begin_pass(&self) -> Result<PassGuard<'_>, ListenerError> {
        let current = thread::current().id();
        if *lock(&self.pass_owner, "listener.pass_owner")? == Some(current) {
            return Err(ListenerError::ReentrantPoll);
        }
        let pass = lock(&self.pass, "listener.pass")?;
        *lock(&self.pass_owner, "listener.pass_owner")? = Some(current);
        Ok(PassGuard {
            shared: self,
            _pass: pass,
        })
    }
}

struct PassGuard<'a> {
    shared: &'a Shared,
    _pass: MutexGuard<'a, ()>,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut owner) = self.shared.pass_owner.lock() {
            *owner = None;
        }
    }
}

/// Resolve the expectation's target and build its query.
///
/// `None` means the target does not exist yet.
pub(crate) fn build_query(
    resolver: &IdResolver,
    expected: &mut EventDescriptor,
    watermark: Option<u64>,
) -> Result<Option<EventQuery>, ResolveError> {
    if expected.resolve_target_id(resolver)? == Resolution::Pending {
        return Ok(None);
    }

    let mut query = EventQuery::after(watermark);
    for name in AttributeName::FILTERABLE {
        if let Some(value) = expected.value(name).filter(|v| !v.is_empty()) {
            query = query.and_eq(name, value.clone());
        }
    }
    Ok(Some(query))
}

/// Run `query` and return the records in ascending id order.
pub(crate) fn fetch(
    events: &dyn EventSource,
    query: &EventQuery,
) -> Result<Vec<EventRecord>, StorageError> {
    let mut records = events.filter(query)?;
    records.sort_by_key(|r| r.id);
    Ok(records)
}

enum Outcome {
    Pending,
    Polled { matched: usize },
}

fn process(shared: &Shared, sub: &Subscription, watermark: Option<u64>) -> EventResult<Outcome> {
    // Resolve on a copy; the lookup must not block readers of the expectation.
    let mut expected = sub.expected()?;
    let had_target = expected.contains(AttributeName::TargetId);
    let Some(query) = build_query(&shared.resolver, &mut expected, watermark)? else {
        return Ok(Outcome::Pending);
    };
    if !had_target {
        if let Some(target_id) = expected.get(AttributeName::TargetId) {
            sub.store_target_id(target_id.clone())?;
        }
    }

    let records = fetch(shared.events.as_ref(), &query)?;
    tracing::trace!(subscription = %sub.id(), %query, found = records.len(), "queried events");

    let mut matched = 0;
    for record in records {
        if sub.is_done()? {
            break;
        }
        let observed = EventDescriptor::from_record(&record);
        if !expected.is_compatible_with(&observed)? {
            continue;
        }
        if !sub.record_match(observed.clone())? {
            break;
        }
        tracing::info!(subscription = %sub.id(), expected = %expected, got = %observed, "matched expected event");
        sub.notify(&expected, &observed);
        shared.advance_watermark(record.id)?;
        matched += 1;
    }
    Ok(Outcome::Polled { matched })
}

/// One pass over every registered expectation.
///
/// Failures are contained per subscription and counted in the summary.
/// Concurrent callers wait for the running pass to finish; a call from inside
/// a callback fails with `ReentrantPoll`.
pub(crate) fn poll_pass(shared: &Shared) -> EventResult<PollSummary> {
    let _pass = shared.begin_pass()?;
    let subscriptions = shared.snapshot()?;
    let watermark = shared.watermark()?;
    let mut summary = PollSummary::default();

    for sub in subscriptions {
        if shared.stop_requested() {
            summary.interrupted = true;
            break;
        }
        if sub.is_done()? {
            summary.done += 1;
            continue;
        }
        match process(shared, &sub, watermark) {
            Ok(Outcome::Pending) => summary.pending += 1,
            Ok(Outcome::Polled { matched }) => {
                summary.polled += 1;
                summary.matched += matched;
            }
            Err(e) => {
                tracing::error!(subscription = %sub.id(), error = %e, "failed to process expected event");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

/// Sleep, poll, repeat until stopped.
///
/// The sleep is a wait on the stop channel, so a stop request ends it early.
pub(crate) fn worker_loop(shared: &Shared, stop_rx: &Receiver<()>, poll_interval: Duration) {
    tracing::debug!(?poll_interval, "event listener worker started");
    loop {
        match stop_rx.recv_timeout(poll_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if shared.stop_requested() {
            break;
        }
        match poll_pass(shared) {
            Ok(summary) => tracing::debug!(?summary, "poll pass finished"),
            Err(e) => tracing::error!(error = %e, "poll pass failed"),
        }
    }
    tracing::debug!("event listener worker exited");
}
