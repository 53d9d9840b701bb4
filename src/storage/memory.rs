//! In-memory backends.
//!
//! Thread-safe stand-ins for the application's event stream and object
//! collections. They are intended for tests, demos and as a reference for
//! real backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::query::EventQuery;
use crate::record::EventRecord;
use crate::storage::traits::{EventSource, ObjectLookup, ObjectRef, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug)]
struct EventState {
    records: Vec<EventRecord>,
    next_id: u64,
    fail_next: usize,
}

impl Default for EventState {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            next_id: 1,
            fail_next: 0,
        }
    }
}

impl EventState {
    fn take_failure(&mut self, op: &str) -> Result<(), StorageError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(StorageError::Unavailable(format!("injected failure on {op}")));
        }
        Ok(())
    }
}

/// An append-only event stream with monotonically increasing ids.
#[derive(Debug, Default)]
pub struct InMemoryEventSource {
    state: RwLock<EventState>,
    queries: AtomicUsize,
}

impl InMemoryEventSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return its id. The record's own id is ignored.
    pub fn publish(&self, mut record: EventRecord) -> Result<u64, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("events.publish"))?;
        let id = state.next_id;
        state.next_id += 1;
        record.id = id;
        state.records.push(record);
        Ok(id)
    }

    /// Append an event keeping its id.
    ///
    /// Ids must keep increasing; an id at or below the last one is rejected.
    pub fn publish_record(&self, record: EventRecord) -> Result<u64, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("events.publish_record"))?;
        if record.id < state.next_id {
            return Err(StorageError::Backend(format!(
                "event id {} is not above the last published id {}",
                record.id,
                state.next_id - 1
            )));
        }
        let id = record.id;
        state.next_id = id + 1;
        state.records.push(record);
        Ok(id)
    }

    /// Make the next `count` queries fail with [`StorageError::Unavailable`].
    pub fn fail_next(&self, count: usize) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("events.fail_next"))?;
        state.fail_next = count;
        Ok(())
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("events.len"))?;
        Ok(state.records.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Number of `filter` calls served so far, failed ones included.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Acquire)
    }
}

impl EventSource for InMemoryEventSource {
    fn latest(&self, limit: usize) -> Result<Vec<EventRecord>, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("events.latest"))?;
        state.take_failure("latest")?;
        Ok(state.records.iter().rev().take(limit).cloned().collect())
    }

    fn filter(&self, query: &EventQuery) -> Result<Vec<EventRecord>, StorageError> {
        self.queries.fetch_add(1, Ordering::AcqRel);
        let mut state = self.state.write().map_err(|_| lock_err("events.filter"))?;
        state.take_failure("filter")?;
        Ok(state
            .records
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
struct ObjectState {
    by_collection: HashMap<String, Vec<ObjectRef>>,
    next_id: i64,
}

impl Default for ObjectState {
    fn default() -> Self {
        Self {
            by_collection: HashMap::new(),
            next_id: 1,
        }
    }
}

/// Named object collections such as `vms` or `hosts`.
#[derive(Debug, Default)]
pub struct InMemoryObjects {
    state: RwLock<ObjectState>,
}

impl InMemoryObjects {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object and return its freshly assigned id.
    pub fn insert(&self, collection: &str, name: impl Into<String>) -> Result<i64, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("objects.insert"))?;
        let id = state.next_id;
        state.next_id += 1;
        state
            .by_collection
            .entry(collection.to_string())
            .or_default()
            .push(ObjectRef { id, name: name.into() });
        Ok(id)
    }

    /// Add an object with a caller-chosen id.
    pub fn insert_with_id(
        &self,
        collection: &str,
        id: i64,
        name: impl Into<String>,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("objects.insert_with_id"))?;
        let rows = state.by_collection.entry(collection.to_string()).or_default();
        if rows.iter().any(|o| o.id == id) {
            return Err(StorageError::Backend(format!(
                "duplicate id {id} in collection {collection}"
            )));
        }
        rows.push(ObjectRef { id, name: name.into() });
        state.next_id = state.next_id.max(id + 1);
        Ok(())
    }

    /// Remove every object named `name`; returns how many were removed.
    pub fn remove(&self, collection: &str, name: &str) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("objects.remove"))?;
        let Some(rows) = state.by_collection.get_mut(collection) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|o| o.name != name);
        Ok(before - rows.len())
    }
}

impl ObjectLookup for InMemoryObjects {
    fn find_by_name(&self, collection: &str, name: &str) -> Result<Vec<ObjectRef>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("objects.find_by_name"))?;
        Ok(state
            .by_collection
            .get(collection)
            .map(|rows| rows.iter().filter(|o| o.name == name).cloned().collect())
            .unwrap_or_default())
    }
}

/// In-memory event stream and object collections, bundled.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default)]
pub struct InMemoryAppliance {
    pub events: Arc<InMemoryEventSource>,
    pub objects: Arc<InMemoryObjects>,
}

impl InMemoryAppliance {
    /// Create a new bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The event stream as a trait object.
    #[must_use]
    pub fn event_source(&self) -> Arc<dyn EventSource> {
        Arc::clone(&self.events) as Arc<dyn EventSource>
    }

    /// The object collections as a trait object.
    #[must_use]
    pub fn object_lookup(&self) -> Arc<dyn ObjectLookup> {
        Arc::clone(&self.objects) as Arc<dyn ObjectLookup>
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeName;

    #[test]
    fn publish_assigns_increasing_ids() {
        let events = InMemoryEventSource::new();
        let a = events.publish(EventRecord::new(0, "vm_create")).unwrap();
        let b = events.publish(EventRecord::new(0, "vm_start")).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(events.len().unwrap(), 2);
    }

    #[test]
    fn latest_is_newest_first() {
        let events = InMemoryEventSource::new();
        assert!(events.latest(1).unwrap().is_empty());
        for kind in ["a", "b", "c"] {
            events.publish(EventRecord::new(0, kind)).unwrap();
        }
        let latest = events.latest(1).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, 3);
    }

    #[test]
    fn publish_record_rejects_stale_ids() {
        let events = InMemoryEventSource::new();
        events.publish_record(EventRecord::new(10, "a")).unwrap();
        assert!(events.publish_record(EventRecord::new(10, "b")).is_err());
        assert_eq!(events.publish(EventRecord::new(0, "c")).unwrap(), 11);
    }

    #[test]
    fn filter_applies_query_and_counts() {
        let events = InMemoryEventSource::new();
        events.publish(EventRecord::new(0, "vm_create").with_target("VmOrTemplate", 1)).unwrap();
        events.publish(EventRecord::new(0, "vm_create").with_target("VmOrTemplate", 2)).unwrap();

        let q = EventQuery::after(Some(0)).and_eq(AttributeName::TargetId, 2);
        let hits = events.filter(&q).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);
        assert_eq!(events.query_count(), 1);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let events = InMemoryEventSource::new();
        events.fail_next(1).unwrap();
        let err = events.filter(&EventQuery::new()).unwrap_err();
        assert!(err.is_retryable());
        assert!(events.filter(&EventQuery::new()).is_ok());
    }

    #[test]
    fn objects_find_by_name() {
        let objects = InMemoryObjects::new();
        let id = objects.insert("vms", "vm1").unwrap();
        objects.insert("hosts", "vm1").unwrap();

        let hits = objects.find_by_name("vms", "vm1").unwrap();
        assert_eq!(hits, vec![ObjectRef { id, name: "vm1".to_string() }]);
        assert!(objects.find_by_name("services", "vm1").unwrap().is_empty());

        assert_eq!(objects.remove("vms", "vm1").unwrap(), 1);
        assert!(objects.find_by_name("vms", "vm1").unwrap().is_empty());
    }

    #[test]
    fn insert_with_id_moves_counter() {
        let objects = InMemoryObjects::new();
        objects.insert_with_id("vms", 42, "vm1").unwrap();
        assert!(objects.insert_with_id("vms", 42, "vm2").is_err());
        assert_eq!(objects.insert("vms", "vm3").unwrap(), 43);
    }
}
