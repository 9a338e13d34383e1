// Trigger evaluation for obligation records.
//
// Evaluation is a pure function of the record, the observing user's
// settings and relations, and the current time. Firing state lives in
// the fired-key store, not here.

use std::collections::HashSet;

use super::model::{EpochMillis, Obligation, ObligationKind, Relation, UserId};
use super::settings::NotifySettings;

const MS_PER_HOUR: i64 = 3_600_000;

/// A time-relative condition that can fire for an obligation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    /// The deadline is within the configured window.
    DueSoon,
    /// The deadline has passed.
    Overdue,
    /// The obligation has been open longer than the tier threshold.
    Stalled { hours: i64 },
}

/// Who a fired trigger should be delivered to. The router resolves the
/// role against the record's actual ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecipientRole {
    Responsible,
    Owner,
    Viewer(UserId),
}

/// A trigger condition that is currently true for an obligation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FiredTrigger {
    pub kind: TriggerKind,
    /// Idempotency key: one notification per distinct key, ever.
    pub key: String,
    pub role: RecipientRole,
}

/// Recipient rule for a stall tier.
#[derive(Clone, Copy)]
enum TierRecipient {
    Responsible,
    Owner,
    /// One notification per viewer id, each with its own key.
    Viewers,
}

/// An elapsed-time threshold with its own recipient rule, registered
/// per (kind, relation) pair.
struct StallTier {
    hours: i64,
    recipient: TierRecipient,
}

/// Context for one evaluation pass.
pub struct TriggerContext<'a> {
    pub obligation: &'a Obligation,
    /// Relations the observing user has to this record, unioned across
    /// all matching filters.
    pub relations: &'a HashSet<Relation>,
    pub settings: &'a NotifySettings,
}

/// Stall tiers for an obligation kind, seen from one query direction.
///
/// The decision-maker side of an approval carries the 24h reminder and
/// the 72h viewer escalation; the requester side carries its own 48h
/// escalation. Invoices stall only against their due date.
fn stall_tiers(kind: ObligationKind, relation: Relation) -> &'static [StallTier] {
    const RESPONSIBLE_TIERS: &[StallTier] = &[
        StallTier {
            hours: 24,
            recipient: TierRecipient::Responsible,
        },
        StallTier {
            hours: 72,
            recipient: TierRecipient::Viewers,
        },
    ];
    const REQUESTER_TIERS: &[StallTier] = &[StallTier {
        hours: 48,
        recipient: TierRecipient::Owner,
    }];

    match (kind, relation) {
        (ObligationKind::Task | ObligationKind::Approval, Relation::Responsible) => {
            RESPONSIBLE_TIERS
        }
        (ObligationKind::Approval, Relation::Owner) => REQUESTER_TIERS,
        _ => &[],
    }
}

/// The primary recipient of due-soon and overdue notifications.
/// Invoices have no separate responsible concept; the owner is notified.
fn primary_role(kind: ObligationKind) -> RecipientRole {
    match kind {
        ObligationKind::Task | ObligationKind::Approval => RecipientRole::Responsible,
        ObligationKind::Invoice => RecipientRole::Owner,
    }
}

fn key_for(obligation: &Obligation, trigger: &str, epoch: EpochMillis) -> String {
    // The kind prefix keeps ids from different source collections apart.
    format!(
        "{}:{}:{}:{}",
        obligation.kind.as_str(),
        obligation.id,
        trigger,
        epoch
    )
}

/// Compute the set of currently-true triggers for one obligation.
pub fn evaluate_triggers(ctx: &TriggerContext, now: EpochMillis) -> Vec<FiredTrigger> {
    let obligation = ctx.obligation;
    let mut fired = Vec::new();

    // Resolved obligations never produce new notifications.
    if !obligation.is_open() {
        return fired;
    }

    // Deadline-relative triggers. A missing dueAt is a valid state
    // (pure approval-wait), not an error.
    if let Some(due_at) = obligation.due_at {
        let delta = due_at - now;
        let window = ctx.settings.due_soon_window_ms(obligation.kind);

        if delta >= 0 && delta <= window {
            fired.push(FiredTrigger {
                kind: TriggerKind::DueSoon,
                key: key_for(obligation, "dueSoon", due_at),
                role: primary_role(obligation.kind),
            });
        }
        if delta < 0 && ctx.settings.enable_overdue_alerts {
            fired.push(FiredTrigger {
                kind: TriggerKind::Overdue,
                key: key_for(obligation, "overdue", due_at),
                role: primary_role(obligation.kind),
            });
        }
    }

    // Elapsed-time stall tiers, keyed on createdAt.
    let elapsed = now - obligation.created_at;
    for relation in ctx.relations {
        for tier in stall_tiers(obligation.kind, *relation) {
            if elapsed <= tier.hours * MS_PER_HOUR {
                continue;
            }
            let trigger = format!("stalled{}", tier.hours);
            match tier.recipient {
                TierRecipient::Viewers => {
                    // One fired trigger per viewer, each with its own key,
                    // so a viewer added after the threshold still gets
                    // exactly one notification on the next cycle.
                    for viewer in &obligation.viewer_ids {
                        let mut key = key_for(obligation, &trigger, obligation.created_at);
                        key.push(':');
                        key.push_str(viewer);
                        fired.push(FiredTrigger {
                            kind: TriggerKind::Stalled { hours: tier.hours },
                            key,
                            role: RecipientRole::Viewer(viewer.clone()),
                        });
                    }
                }
                TierRecipient::Responsible | TierRecipient::Owner => {
                    let role = match tier.recipient {
                        TierRecipient::Responsible => RecipientRole::Responsible,
                        _ => RecipientRole::Owner,
                    };
                    fired.push(FiredTrigger {
                        kind: TriggerKind::Stalled { hours: tier.hours },
                        key: key_for(obligation, &trigger, obligation.created_at),
                        role,
                    });
                }
            }
        }
    }

    fired
}
