//! Event descriptors.
//!
//! An [`EventDescriptor`] is a set of attribute matchers describing either an
//! *expected* event (built by a test) or an *observed* event (built from an
//! [`EventRecord`]). Matching is partial: an expectation only constrains the
//! attributes it names.

use std::collections::BTreeMap;
use std::fmt;

use crate::attribute::{AttributeMatcher, AttributeName};
use crate::error::{MatchError, ResolveError, ValidationError};
use crate::record::EventRecord;
use crate::resolver::IdResolver;
use crate::value::AttributeValue;

/// Outcome of [`EventDescriptor::resolve_target_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// `target_id` was already present.
    AlreadyResolved,
    /// No `target_name` to resolve.
    NoReference,
    /// `target_name` was resolved to this id and stored as `target_id`.
    Resolved(i64),
    /// The referenced object does not exist yet.
    Pending,
}

impl Resolution {
    /// True unless resolution has to be retried later.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Expected or observed event.
#[derive(Debug, Clone, Default)]
pub struct EventDescriptor {
    attributes: BTreeMap<AttributeName, AttributeMatcher>,
}

impl EventDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the observed descriptor of a raw record.
    ///
    /// Every default attribute is present; missing fields are null.
    #[must_use]
    pub fn from_record(record: &EventRecord) -> Self {
        let mut event = Self::new();
        event.add_attributes(
            AttributeName::DEFAULTS
                .into_iter()
                .map(|name| AttributeMatcher::new(name, record.field(name))),
        );
        event
    }

    /// Build a descriptor from one-key objects such as `{"event_type": "vm_create"}`.
    pub fn with_bundles<'a, I>(bundles: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = &'a serde_json::Map<String, serde_json::Value>>,
    {
        let mut event = Self::new();
        for bundle in bundles {
            event.add_attributes([AttributeMatcher::from_bundle(bundle)?]);
        }
        Ok(event)
    }

    /// Store matchers by name, replacing earlier ones.
    pub fn add_attributes<I>(&mut self, attrs: I) -> &mut Self
    where
        I: IntoIterator<Item = AttributeMatcher>,
    {
        for attr in attrs {
            self.attributes.insert(attr.name(), attr);
        }
        self
    }

    /// Add an attribute by wire name.
    ///
    /// Names outside the recognized set are logged and ignored.
    pub fn add_raw(&mut self, name: &str, value: impl Into<AttributeValue>) -> &mut Self {
        match name.parse::<AttributeName>() {
            Ok(name) => self.add_attributes([AttributeMatcher::new(name, value)]),
            Err(_) => {
                tracing::warn!(
                    attribute = name,
                    "The attribute is absent in default attributes. Ignoring."
                );
                self
            }
        }
    }

    #[must_use]
    pub fn get(&self, name: AttributeName) -> Option<&AttributeMatcher> {
        self.attributes.get(&name)
    }

    /// Value of an attribute, if present.
    #[must_use]
    pub fn value(&self, name: AttributeName) -> Option<&AttributeValue> {
        self.get(name).map(AttributeMatcher::value)
    }

    #[must_use]
    pub fn contains(&self, name: AttributeName) -> bool {
        self.attributes.contains_key(&name)
    }

    /// Event id of an observed event.
    #[must_use]
    pub fn id(&self) -> Option<u64> {
        self.value(AttributeName::Id)
            .and_then(AttributeValue::as_int)
            .and_then(|id| u64::try_from(id).ok())
    }

    pub fn names(&self) -> impl Iterator<Item = AttributeName> + '_ {
        self.attributes.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeMatcher> {
        self.attributes.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Resolve `target_name` to a `target_id`.
    ///
    /// A name that does not resolve yet yields [`Resolution::Pending`]; only
    /// configuration and backend failures are errors.
    pub fn resolve_target_id(&mut self, resolver: &IdResolver) -> Result<Resolution, ResolveError> {
        if self.contains(AttributeName::TargetId) {
            return Ok(Resolution::AlreadyResolved);
        }
        let Some(target_name) = self.value(AttributeName::TargetName).cloned() else {
            return Ok(Resolution::NoReference);
        };
        let target_type = self
            .value(AttributeName::TargetType)
            .and_then(AttributeValue::as_str)
            .map(str::to_owned);

        match resolver.resolve_id(target_type.as_deref(), &target_name) {
            Ok(id) => {
                self.add_attributes([AttributeMatcher::new(AttributeName::TargetId, id)]);
                Ok(Resolution::Resolved(id))
            }
            Err(e) if e.is_transient() => Ok(Resolution::Pending),
            Err(e) => Err(e),
        }
    }

    /// Partial match: every attribute present on both sides must match.
    ///
    /// Vacuously true when the two descriptors share no attribute.
    pub fn is_compatible_with(&self, other: &Self) -> Result<bool, MatchError> {
        for (name, attr) in &self.attributes {
            let Some(theirs) = other.attributes.get(name) else {
                continue;
            };
            if !attr.matches(theirs)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl FromIterator<AttributeMatcher> for EventDescriptor {
    fn from_iter<T: IntoIterator<Item = AttributeMatcher>>(iter: T) -> Self {
        let mut event = Self::new();
        event.add_attributes(iter);
        event
    }
}

impl fmt::Display for EventDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Event(")?;
        for (i, attr) in self.attributes.values().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", attr.name(), attr.value())?;
        }
        f.write_str(")")
    }
}
