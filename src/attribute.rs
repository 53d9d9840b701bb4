//! Event attributes and how they are compared.
//!
//! An [`AttributeMatcher`] holds one named attribute value, optionally with a
//! custom [`Comparator`]. Expectations and observed events are both made of
//! matchers; the expectation side decides how the comparison is done.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MatchError, ValidationError};
use crate::value::{AttributeValue, ValueType};

/// Recognized event attribute names.
///
/// `TargetName` is synthetic: it never appears on observed events and is
/// converted to `TargetId` before an expectation is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeName {
    CreatedOn,
    EventType,
    Href,
    Id,
    Message,
    Source,
    TargetId,
    TargetType,
    Timestamp,
    TargetName,
}

impl AttributeName {
    /// Attributes read from every observed event.
    pub const DEFAULTS: [Self; 9] = [
        Self::CreatedOn,
        Self::EventType,
        Self::Href,
        Self::Id,
        Self::Message,
        Self::Source,
        Self::TargetId,
        Self::TargetType,
        Self::Timestamp,
    ];

    /// Attributes that are pushed down to the event source as query filters.
    pub const FILTERABLE: [Self; 4] = [
        Self::EventType,
        Self::TargetType,
        Self::TargetId,
        Self::Source,
    ];

    /// Wire name of the attribute.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreatedOn => "created_on",
            Self::EventType => "event_type",
            Self::Href => "href",
            Self::Id => "id",
            Self::Message => "message",
            Self::Source => "source",
            Self::TargetId => "target_id",
            Self::TargetType => "target_type",
            Self::Timestamp => "timestamp",
            Self::TargetName => "target_name",
        }
    }

    #[must_use]
    pub const fn is_synthetic(self) -> bool {
        matches!(self, Self::TargetName)
    }

    #[must_use]
    pub fn is_filterable(self) -> bool {
        Self::FILTERABLE.contains(&self)
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = match s {
            "created_on" => Self::CreatedOn,
            "event_type" => Self::EventType,
            "href" => Self::Href,
            "id" => Self::Id,
            "message" => Self::Message,
            "source" => Self::Source,
            "target_id" => Self::TargetId,
            "target_type" => Self::TargetType,
            "timestamp" => Self::Timestamp,
            "target_name" => Self::TargetName,
            other => {
                return Err(ValidationError::UnknownAttribute {
                    name: other.to_string(),
                })
            }
        };
        Ok(name)
    }
}

type CompareFn = dyn Fn(&AttributeValue, &AttributeValue) -> bool + Send + Sync;

/// A custom binary predicate `(expected, actual) -> bool`.
#[derive(Clone)]
pub struct Comparator {
    label: Arc<str>,
    func: Arc<CompareFn>,
}

impl Comparator {
    /// Wrap an arbitrary predicate. `label` is only used for display.
    pub fn new<F>(label: impl Into<String>, func: F) -> Self
    where
        F: Fn(&AttributeValue, &AttributeValue) -> bool + Send + Sync + 'static,
    {
        Self {
            label: Arc::from(label.into()),
            func: Arc::new(func),
        }
    }

    /// Matches when the actual string contains the expected string.
    #[must_use]
    pub fn contains() -> Self {
        Self::new("contains", |expected, actual| match (expected.as_str(), actual.as_str()) {
            (Some(e), Some(a)) => a.contains(e),
            _ => false,
        })
    }

    /// Matches when the actual value differs from the expected one.
    #[must_use]
    pub fn not_equal() -> Self {
        Self::new("not_equal", |expected, actual| !expected.loosely_equals(actual))
    }

    /// Matches when the actual string matches `pattern`.
    ///
    /// The expected value is ignored; the pattern carries the expectation.
    pub fn regex(pattern: &str) -> Result<Self, ValidationError> {
        let re = Regex::new(pattern).map_err(|e| ValidationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(format!("regex({pattern})"), move |_, actual| {
            actual.as_str().is_some_and(|a| re.is_match(a))
        }))
    }

    /// Apply the predicate.
    #[must_use]
    pub fn compare(&self, expected: &AttributeValue, actual: &AttributeValue) -> bool {
        (self.func)(expected, actual)
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Comparator").field(&self.label).finish()
    }
}

/// One event attribute together with the way it should be compared.
#[derive(Debug, Clone)]
pub struct AttributeMatcher {
    name: AttributeName,
    value: AttributeValue,
    value_type: ValueType,
    comparator: Option<Comparator>,
}

impl AttributeMatcher {
    pub fn new(name: AttributeName, value: impl Into<AttributeValue>) -> Self {
        let value = value.into();
        Self {
            name,
            value_type: value.value_type(),
            value,
            comparator: None,
        }
    }

    /// Build a matcher from a one-key object such as `{"event_type": "vm_create"}`.
    ///
    /// The key must be a recognized attribute name.
    pub fn from_bundle(
        bundle: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, ValidationError> {
        let mut entries = bundle.iter();
        let (Some((name, value)), None) = (entries.next(), entries.next()) else {
            return Err(ValidationError::MalformedBundle { keys: bundle.len() });
        };
        let name = name.parse::<AttributeName>()?;
        Ok(Self::new(name, AttributeValue::from(value.clone())))
    }

    /// Override the inferred value type.
    #[must_use]
    pub fn with_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    /// Compare with `comparator` instead of equality.
    #[must_use]
    pub fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    #[must_use]
    pub const fn name(&self) -> AttributeName {
        self.name
    }

    #[must_use]
    pub const fn value(&self) -> &AttributeValue {
        &self.value
    }

    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        self.value_type
    }

    #[must_use]
    pub const fn comparator(&self) -> Option<&Comparator> {
        self.comparator.as_ref()
    }

    /// Check whether `other` (the observed attribute) satisfies this one.
    ///
    /// Empty values only match when both sides are null.
    pub fn matches(&self, other: &Self) -> Result<bool, MatchError> {
        if self.name != other.name {
            return Err(MatchError::NameMismatch {
                expected: self.name.as_str(),
                actual: other.name.as_str(),
            });
        }

        if self.value.is_empty() || other.value.is_empty() {
            return Ok(self.value.is_null() && other.value.is_null());
        }

        Ok(match &self.comparator {
            Some(cmp) => cmp.compare(&self.value, &other.value),
            None => self.value.loosely_equals(&other.value),
        })
    }
}

impl fmt::Display for AttributeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})={}", self.name, self.value_type, self.value)?;
        if let Some(cmp) = &self.comparator {
            write!(f, ", cmp_func {}", cmp.label())?;
        }
        Ok(())
    }
}
