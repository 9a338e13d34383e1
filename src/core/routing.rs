// Escalation routing: turns a fired trigger into a concrete
// notification draft, or drops it when the required role is not
// assigned on the record.

use chrono::{TimeZone, Utc};

use super::model::{EpochMillis, NotificationDraft, Obligation, ObligationKind, UserId};
use super::triggers::{FiredTrigger, RecipientRole, TriggerKind};

/// Resolve the recipient and templates for a fired trigger.
///
/// Recipients come only from the record's own ids; an absent role (e.g.
/// no decision-maker assigned yet) drops the trigger silently.
pub fn route(obligation: &Obligation, fired: &FiredTrigger) -> Option<NotificationDraft> {
    let recipient_id = resolve_recipient(obligation, &fired.role)?;
    let (title, message) = templates(obligation, &fired.kind);

    Some(NotificationDraft {
        recipient_id,
        origin: obligation.kind.into(),
        title,
        message,
        source_id: obligation.id.clone(),
        event_key: fired.key.clone(),
    })
}

fn resolve_recipient(obligation: &Obligation, role: &RecipientRole) -> Option<UserId> {
    match role {
        RecipientRole::Responsible => obligation.responsible_id.clone(),
        RecipientRole::Owner => Some(obligation.owner_id.clone()),
        RecipientRole::Viewer(id) => Some(id.clone()),
    }
}

fn templates(obligation: &Obligation, kind: &TriggerKind) -> (String, String) {
    let subject = &obligation.title;
    match (obligation.kind, kind) {
        (ObligationKind::Task, TriggerKind::DueSoon) => (
            "Task due soon".to_string(),
            format!("\"{}\" is due {}", subject, due_text(obligation.due_at)),
        ),
        (ObligationKind::Task, TriggerKind::Overdue) => (
            "Task overdue".to_string(),
            format!("\"{}\" was due {}", subject, due_text(obligation.due_at)),
        ),
        (ObligationKind::Invoice, TriggerKind::DueSoon) => (
            "Invoice due soon".to_string(),
            format!("Invoice \"{}\" is due {}", subject, due_text(obligation.due_at)),
        ),
        (ObligationKind::Invoice, TriggerKind::Overdue) => (
            "Invoice overdue".to_string(),
            format!("Invoice \"{}\" was due {}", subject, due_text(obligation.due_at)),
        ),
        (ObligationKind::Approval, TriggerKind::DueSoon) => (
            "Decision due soon".to_string(),
            format!("\"{}\" needs your decision {}", subject, due_text(obligation.due_at)),
        ),
        (ObligationKind::Approval, TriggerKind::Overdue) => (
            "Decision overdue".to_string(),
            format!("\"{}\" was due {}", subject, due_text(obligation.due_at)),
        ),
        (ObligationKind::Approval, TriggerKind::Stalled { hours: 48 }) => (
            "Approval pending".to_string(),
            format!("\"{}\": assignee has not responded", subject),
        ),
        (ObligationKind::Approval, TriggerKind::Stalled { hours: 72 }) => (
            "Approval stalled".to_string(),
            format!("\"{}\": assignee has not decided", subject),
        ),
        (ObligationKind::Approval, TriggerKind::Stalled { .. }) => (
            "Approval reminder".to_string(),
            format!("\"{}\" is still awaiting your decision", subject),
        ),
        (_, TriggerKind::Stalled { hours }) => (
            "Still open".to_string(),
            format!("\"{}\" has been open for over {} hours", subject, hours),
        ),
    }
}

/// Human-readable due date for message text.
fn due_text(due_at: Option<EpochMillis>) -> String {
    due_at
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|at| format!("on {}", at.format("%Y-%m-%d %H:%M UTC")))
        .unwrap_or_else(|| "soon".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ObligationStatus, Origin};

    fn make_obligation(kind: ObligationKind) -> Obligation {
        Obligation {
            id: "ob-1".to_string(),
            owner_id: "owner".to_string(),
            responsible_id: Some("resp".to_string()),
            viewer_ids: vec!["v1".to_string()],
            created_at: 1_700_000_000_000,
            due_at: Some(1_700_086_400_000),
            status: ObligationStatus::Open,
            title: "Quarterly review".to_string(),
            kind,
        }
    }

    fn fired(kind: TriggerKind, role: RecipientRole) -> FiredTrigger {
        FiredTrigger {
            kind,
            key: "task:ob-1:dueSoon:1700086400000".to_string(),
            role,
        }
    }

    #[test]
    fn test_task_due_soon_goes_to_responsible() {
        let ob = make_obligation(ObligationKind::Task);
        let draft = route(&ob, &fired(TriggerKind::DueSoon, RecipientRole::Responsible)).unwrap();

        assert_eq!(draft.recipient_id, "resp");
        assert_eq!(draft.origin, Origin::Task);
        assert_eq!(draft.title, "Task due soon");
        assert!(draft.message.contains("Quarterly review"));
        assert!(draft.message.contains("2023-11-15"));
        assert_eq!(draft.source_id, "ob-1");
    }

    #[test]
    fn test_invoice_overdue_goes_to_owner() {
        let ob = make_obligation(ObligationKind::Invoice);
        let draft = route(&ob, &fired(TriggerKind::Overdue, RecipientRole::Owner)).unwrap();

        assert_eq!(draft.recipient_id, "owner");
        assert_eq!(draft.title, "Invoice overdue");
    }

    #[test]
    fn test_missing_responsible_drops_silently() {
        let mut ob = make_obligation(ObligationKind::Approval);
        ob.responsible_id = None;

        let result = route(&ob, &fired(TriggerKind::DueSoon, RecipientRole::Responsible));
        assert!(result.is_none());
    }

    #[test]
    fn test_viewer_escalation_addresses_that_viewer() {
        let ob = make_obligation(ObligationKind::Approval);
        let draft = route(
            &ob,
            &fired(
                TriggerKind::Stalled { hours: 72 },
                RecipientRole::Viewer("v1".to_string()),
            ),
        )
        .unwrap();

        assert_eq!(draft.recipient_id, "v1");
        assert!(draft.message.contains("assignee has not decided"));
    }

    #[test]
    fn test_approval_stall_messages_per_tier() {
        let ob = make_obligation(ObligationKind::Approval);

        let reminder = route(
            &ob,
            &fired(TriggerKind::Stalled { hours: 24 }, RecipientRole::Responsible),
        )
        .unwrap();
        assert!(reminder.message.contains("awaiting your decision"));

        let requester = route(
            &ob,
            &fired(TriggerKind::Stalled { hours: 48 }, RecipientRole::Owner),
        )
        .unwrap();
        assert_eq!(requester.recipient_id, "owner");
        assert!(requester.message.contains("has not responded"));
    }
}
