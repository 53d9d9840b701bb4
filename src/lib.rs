//! # eventwatch - event correlation for integration tests
//!
//! eventwatch watches the event stream of an application under test and
//! checks it against events a test expects to happen. Expectations are
//! partial: they name only the attributes that matter, and may reference
//! their target object by name before that object exists.
//!
//! ## Core Concepts
//!
//! - **AttributeMatcher**: A named, typed value with an optional custom comparator
//! - **EventDescriptor**: A set of matchers describing an expected or observed event
//! - **IdResolver**: Turns an object name into a database id
//! - **EventListener**: Polls the event stream in the background and records matches
//!
//! ## Usage
//!
//! ```rust,ignore
//! use eventwatch::{EventListener, InMemoryAppliance, ListenerConfig};
//!
//! let app = InMemoryAppliance::new();
//! let listener = EventListener::new(app.event_source(), app.object_lookup(), ListenerConfig::default());
//!
//! listener.register_event([
//!     ("event_type", "vm_create".into()),
//!     ("target_type", "VmOrTemplate".into()),
//!     ("target_name", "my_vm".into()),
//! ])?;
//! listener.start()?;
//! // ... create the VM ...
//! listener.shutdown()?;
//! assert!(listener.check_expected_events()?);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Matching
pub mod attribute;
pub mod error;
pub mod event;
pub mod value;

// Event stream access
pub mod query;
pub mod record;
pub mod resolver;
pub mod storage;

pub mod listener;

pub use attribute::{AttributeMatcher, AttributeName, Comparator};
pub use error::{EventError, EventResult, ListenerError, MatchError, ResolveError, ValidationError};
pub use event::{EventDescriptor, Resolution};
pub use query::{Comparison, EventQuery, Predicate};
pub use record::EventRecord;
pub use resolver::{IdResolver, TargetTypes};
pub use value::{AttributeValue, ValueType};

pub use listener::{
    Callback, EventListener, GotEvents, ListenOptions, ListenerConfig, PollSummary, Subscription,
    SubscriptionId,
};
pub use storage::{
    EventSource, InMemoryAppliance, InMemoryEventSource, InMemoryObjects, ObjectLookup, ObjectRef,
    StorageError,
};
