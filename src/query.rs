//! Conjunctive filters sent to the event source.
//!
//! An [`EventQuery`] is a list of predicates that must all hold. Backends can
//! either evaluate it directly against records or render it as REST
//! `filter[]` expressions.

use std::cmp::Ordering;
use std::fmt;

use crate::attribute::AttributeName;
use crate::record::EventRecord;
use crate::value::AttributeValue;

/// Comparison operator of a [`Predicate`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
    Ge,
    Lt,
}

impl Comparison {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
        }
    }
}

/// `field <op> value`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: AttributeName,
    pub op: Comparison,
    pub value: AttributeValue,
}

impl Predicate {
    /// Evaluate against a record. Comparisons between incomparable values are false.
    #[must_use]
    pub fn holds_for(&self, record: &EventRecord) -> bool {
        let actual = record.field(self.field);
        match self.op {
            Comparison::Eq => actual.loosely_equals(&self.value),
            Comparison::Gt => compare(&actual, &self.value) == Some(Ordering::Greater),
            Comparison::Ge => matches!(
                compare(&actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Comparison::Lt => compare(&actual, &self.value) == Some(Ordering::Less),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.field, self.op.as_str(), self.value.to_filter_operand())
    }
}

fn compare(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    use AttributeValue as V;

    match (a, b) {
        (V::Int(x), V::Int(y)) => Some(x.cmp(y)),
        (V::Int(_) | V::Float(_), V::Int(_) | V::Float(_)) => {
            a.as_float().and_then(|x| b.as_float().and_then(|y| x.partial_cmp(&y)))
        }
        (V::String(x), V::String(y)) => Some(x.cmp(y)),
        (V::Timestamp(x), V::Timestamp(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// A conjunction of predicates. The empty query matches every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    predicates: Vec<Predicate>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events strictly newer than `watermark`; everything when there is none.
    #[must_use]
    pub fn after(watermark: Option<u64>) -> Self {
        let query = Self::new();
        match watermark {
            Some(id) => query.and(AttributeName::Id, Comparison::Gt, id_value(id)),
            None => query,
        }
    }

    /// Add a predicate.
    #[must_use]
    pub fn and(
        mut self,
        field: AttributeName,
        op: Comparison,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.predicates.push(Predicate {
            field,
            op,
            value: value.into(),
        });
        self
    }

    /// Add an equality predicate.
    #[must_use]
    pub fn and_eq(self, field: AttributeName, value: impl Into<AttributeValue>) -> Self {
        self.and(field, Comparison::Eq, value)
    }

    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    #[must_use]
    pub fn matches(&self, record: &EventRecord) -> bool {
        self.predicates.iter().all(|p| p.holds_for(record))
    }

    /// Render as REST `filter[]` parameters, e.g. `id>41`, `event_type=vm_create`.
    #[must_use]
    pub fn to_filter_params(&self) -> Vec<String> {
        self.predicates.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for EventQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.predicates.is_empty() {
            return f.write_str("*");
        }
        f.write_str(&self.to_filter_params().join(" & "))
    }
}

pub(crate) fn id_value(id: u64) -> AttributeValue {
    AttributeValue::Int(i64::try_from(id).unwrap_or(i64::MAX))
}
