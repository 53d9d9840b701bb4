//! Interfaces to the application under test.
//!
//! The listener reads the event stream through [`EventSource`] and resolves
//! object names through [`ObjectLookup`]. The in-memory backends stand in for
//! the application in tests and embedded use.

mod memory;
mod traits;

pub use memory::{InMemoryAppliance, InMemoryEventSource, InMemoryObjects};
pub use traits::{EventSource, ObjectLookup, ObjectRef, StorageError};
