// Per-user evaluation pipeline: triggers -> fired-key dedup -> routing.
//
// The engine plans notifications; the caller appends them to the sink
// and confirms each key only after its append succeeded, keeping the
// mark-after-write ordering that bounds crash duplicates to one.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;

use super::fired::FiredStore;
use super::model::{
    EpochMillis, NotificationDraft, Obligation, ObligationId, ObligationKind, Relation, UserId,
};
use super::routing;
use super::settings::NotifySettings;
use super::triggers::{evaluate_triggers, TriggerContext};

/// A notification the engine decided to send, paired with the key that
/// must be marked once the append is durable.
#[derive(Clone, Debug)]
pub struct PlannedNotification {
    pub key: String,
    pub draft: NotificationDraft,
}

/// An obligation as seen by one user in one cycle: the record plus the
/// union of relations across all filters it matched.
pub type ObservedObligation = (Obligation, HashSet<Relation>);

pub struct NotifyEngine {
    user_id: UserId,
    settings: NotifySettings,
    fired: FiredStore,
}

impl NotifyEngine {
    pub fn new(user_id: UserId, settings: NotifySettings, data_dir: PathBuf) -> Self {
        Self {
            user_id,
            settings,
            fired: FiredStore::new(data_dir),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Swap in new settings (hot-reload friendly).
    pub fn update_settings(&mut self, settings: NotifySettings) {
        self.settings = settings;
    }

    /// Evaluate one merged batch and return the notifications to send.
    /// Already-fired keys are dropped; resolved records prune their keys.
    pub fn plan_cycle(
        &mut self,
        observed: &[ObservedObligation],
        now: EpochMillis,
    ) -> Vec<PlannedNotification> {
        let mut planned = Vec::new();
        let mut seen_this_cycle = HashSet::new();

        for (obligation, relations) in observed {
            if !obligation.is_open() {
                if let Err(e) = self.prune_resolved(obligation) {
                    log::warn!(
                        "Failed to prune fired keys for {}: {}",
                        obligation.id,
                        e
                    );
                }
                continue;
            }

            let ctx = TriggerContext {
                obligation,
                relations,
                settings: &self.settings,
            };
            for fired in evaluate_triggers(&ctx, now) {
                if self.fired.has_fired(&self.user_id, &fired.key) {
                    continue;
                }
                if !seen_this_cycle.insert(fired.key.clone()) {
                    continue;
                }
                if let Some(draft) = routing::route(obligation, &fired) {
                    planned.push(PlannedNotification {
                        key: fired.key,
                        draft,
                    });
                }
            }
        }

        planned
    }

    /// Record a key as fired. Call only after the notification has been
    /// durably appended.
    pub fn confirm_fired(&mut self, key: &str, now: EpochMillis) -> io::Result<()> {
        self.fired.mark_fired(&self.user_id, key, now)
    }

    fn prune_resolved(&mut self, obligation: &Obligation) -> io::Result<()> {
        let prefix = format!("{}:{}:", obligation.kind.as_str(), obligation.id);
        self.fired.prune_prefix(&self.user_id, &prefix)
    }
}

/// Merge per-filter batches into one record set per (kind, id), with
/// the relation union. A user who is both owner and viewer of a record
/// is evaluated once. Malformed records are skipped with a warning.
pub fn merge_batches(
    filters: &[(Relation, Vec<serde_json::Value>)],
) -> Vec<ObservedObligation> {
    let mut merged: HashMap<(ObligationKind, ObligationId), ObservedObligation> = HashMap::new();

    for (relation, records) in filters {
        for record in records {
            let obligation: Obligation = match serde_json::from_value(record.clone()) {
                Ok(ob) => ob,
                Err(e) => {
                    log::warn!("Skipping malformed obligation record: {}", e);
                    continue;
                }
            };
            let key = (obligation.kind, obligation.id.clone());
            let entry = merged
                .entry(key)
                .or_insert_with(|| (obligation.clone(), HashSet::new()));
            // Later deliveries carry the freshest copy of the record.
            entry.0 = obligation;
            entry.1.insert(*relation);
        }
    }

    merged.into_values().collect()
}
