use chrono::Utc;
use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type ObligationId = String;

/// Milliseconds since the Unix epoch. All trigger arithmetic is done on
/// these integers; differences may be negative.
pub type EpochMillis = i64;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> EpochMillis {
    Utc::now().timestamp_millis()
}

/// Source collection an obligation came from. Routes trigger thresholds
/// and notification templates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObligationKind {
    Task,
    Invoice,
    Approval,
}

impl ObligationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Invoice => "invoice",
            Self::Approval => "approval",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObligationStatus {
    Open,
    Resolved,
}

/// How an observing user relates to an obligation record. Each active
/// filter carries one relation; a record matching several filters gets
/// the union of their relations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Relation {
    Owner,
    Responsible,
    Viewer,
}

/// An obligation record as delivered by the entity store's change feed.
/// Field names mirror the store's wire shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obligation {
    pub id: ObligationId,
    pub owner_id: UserId,
    #[serde(default)]
    pub responsible_id: Option<UserId>,
    #[serde(default)]
    pub viewer_ids: Vec<UserId>,
    pub created_at: EpochMillis,
    #[serde(default)]
    pub due_at: Option<EpochMillis>,
    pub status: ObligationStatus,
    pub title: String,
    pub kind: ObligationKind,
}

impl Obligation {
    pub fn is_open(&self) -> bool {
        self.status == ObligationStatus::Open
    }
}

/// Where a notification originated. Obligation kinds map 1:1; Mail and
/// Team notifications are appended by other parts of the application
/// through the same sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Task,
    Invoice,
    Approval,
    Mail,
    Team,
}

impl From<ObligationKind> for Origin {
    fn from(kind: ObligationKind) -> Self {
        match kind {
            ObligationKind::Task => Self::Task,
            ObligationKind::Invoice => Self::Invoice,
            ObligationKind::Approval => Self::Approval,
        }
    }
}

/// A notification before the sink assigns its id and creation timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct NotificationDraft {
    pub recipient_id: UserId,
    pub origin: Origin,
    pub title: String,
    pub message: String,
    /// Back-reference to the obligation that produced this notification.
    pub source_id: ObligationId,
    /// The idempotency key of the fired trigger, for deep-links and
    /// future dedup lookups.
    pub event_key: String,
}

/// An immutable record in a recipient's inbox.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: u64,
    pub recipient_id: UserId,
    pub created_at: EpochMillis,
    pub unread: bool,
    pub origin: Origin,
    pub title: String,
    pub message: String,
    pub source_id: ObligationId,
    pub event_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obligation_wire_shape() {
        let json = r#"{
            "id": "t-1",
            "ownerId": "alice",
            "responsibleId": "bob",
            "viewerIds": ["carol"],
            "createdAt": 1700000000000,
            "dueAt": 1700086400000,
            "status": "open",
            "title": "File the report",
            "kind": "task"
        }"#;

        let ob: Obligation = serde_json::from_str(json).unwrap();
        assert_eq!(ob.owner_id, "alice");
        assert_eq!(ob.responsible_id.as_deref(), Some("bob"));
        assert_eq!(ob.kind, ObligationKind::Task);
        assert!(ob.is_open());
    }

    #[test]
    fn test_optional_fields_default() {
        // A pure approval-wait has no deadline and may have no viewers.
        let json = r#"{
            "id": "a-1",
            "ownerId": "alice",
            "createdAt": 1700000000000,
            "status": "open",
            "title": "Sign-off request",
            "kind": "approval"
        }"#;

        let ob: Obligation = serde_json::from_str(json).unwrap();
        assert!(ob.due_at.is_none());
        assert!(ob.responsible_id.is_none());
        assert!(ob.viewer_ids.is_empty());
    }

    #[test]
    fn test_missing_created_at_is_rejected() {
        let json = r#"{
            "id": "t-2",
            "ownerId": "alice",
            "status": "open",
            "title": "Broken record",
            "kind": "task"
        }"#;

        assert!(serde_json::from_str::<Obligation>(json).is_err());
    }
}
