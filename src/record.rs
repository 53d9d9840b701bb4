//! Raw event rows as returned by the event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attribute::AttributeName;
use crate::query::id_value;
use crate::value::AttributeValue;

/// One row of the application's event stream.
///
/// Field names follow the REST representation, so a record deserializes
/// directly from the `resources` array of an event stream query.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl EventRecord {
    /// Starts a record with the given id and event type.
    #[must_use]
    pub fn new(id: u64, event_type: impl Into<String>) -> Self {
        Self {
            id,
            event_type: Some(event_type.into()),
            ..Self::default()
        }
    }

    /// Set the target of the event.
    #[must_use]
    pub fn with_target(mut self, target_type: impl Into<String>, target_id: i64) -> Self {
        self.target_type = Some(target_type.into());
        self.target_id = Some(target_id);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Read a default attribute. Missing fields, and the synthetic
    /// `target_name`, read as null.
    #[must_use]
    pub fn field(&self, name: AttributeName) -> AttributeValue {
        match name {
            AttributeName::Id => id_value(self.id),
            AttributeName::EventType => self.event_type.clone().into(),
            AttributeName::TargetId => self.target_id.into(),
            AttributeName::TargetType => self.target_type.clone().into(),
            AttributeName::Source => self.source.clone().into(),
            AttributeName::Message => self.message.clone().into(),
            AttributeName::Href => self.href.clone().into(),
            AttributeName::CreatedOn => self.created_on.into(),
            AttributeName::Timestamp => self.timestamp.into(),
            AttributeName::TargetName => AttributeValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_rest_shape() {
        let json = serde_json::json!({
            "id": 1207,
            "event_type": "vm_create",
            "target_id": 42,
            "target_type": "VmOrTemplate",
            "source": "EVM",
            "href": "https://appliance/api/event_streams/1207",
            "timestamp": "2026-10-19T10:00:00Z",
            "ems_id": 3
        });
        let rec: EventRecord = serde_json::from_value(json).unwrap();
        assert_eq!(rec.id, 1207);
        assert_eq!(rec.field(AttributeName::TargetId), AttributeValue::Int(42));
        assert_eq!(rec.field(AttributeName::Message), AttributeValue::Null);
        assert!(rec.field(AttributeName::Timestamp).as_timestamp().is_some());
    }

    #[test]
    fn target_name_is_never_observed() {
        let rec = EventRecord::new(1, "vm_create").with_target("VmOrTemplate", 42);
        assert_eq!(rec.field(AttributeName::TargetName), AttributeValue::Null);
        assert_eq!(rec.field(AttributeName::Id), AttributeValue::Int(1));
    }
}
