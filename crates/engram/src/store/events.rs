//! Change notification events
//!
//! Every successful upsert or delete publishes exactly one event on a
//! broadcast channel. Delivery is best-effort fan-out: a slow subscriber
//! lags and drops events rather than blocking publishers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::RecordKind;

/// What happened to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// The record was created or updated
    Upsert,
    /// The record was removed
    Delete,
}

/// A single change notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Kind of the affected record
    pub kind: RecordKind,
    /// Id of the affected record
    pub id: String,
    /// What happened
    pub action: ChangeAction,
    /// When the change was persisted
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Build an event stamped with the current time
    pub fn now(kind: RecordKind, id: impl Into<String>, action: ChangeAction) -> Self {
        Self {
            kind,
            id: id.into(),
            action,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = ChangeEvent::now(RecordKind::Conversation, "r1", ChangeAction::Upsert);
        let json = serde_json::to_string(&event).expect("Failed to serialize event");
        assert!(json.contains("\"upsert\""));
        assert!(json.contains("\"conversation\""));

        let deserialized: ChangeEvent =
            serde_json::from_str(&json).expect("Failed to deserialize event");
        assert_eq!(deserialized.id, "r1");
        assert_eq!(deserialized.action, ChangeAction::Upsert);
    }
}
