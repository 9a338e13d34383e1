//! Per-user watch sessions.
//!
//! One forwarder task per filter feeds batches into a single evaluation
//! task, so check-then-mark on fired keys is naturally serialized per
//! user. The evaluation task re-runs on every delivery and on a coarse
//! interval, to catch stall thresholds that pass with no store change.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::engine::{merge_batches, NotifyEngine};
use super::feed::{ObligationBatch, ObligationFeed, ObligationFilter};
use super::inbox::{NotificationSink, SinkError};
use super::model::{now_ms, Notification, NotificationDraft, Relation};

/// Tuning knobs for a watch session.
#[derive(Clone, Debug)]
pub struct WatchOptions {
    /// Coarse re-evaluation interval for elapsed-time triggers.
    pub eval_interval: Duration,
    /// Total append attempts per notification before giving up for the
    /// cycle. An unconfirmed key fires again next cycle.
    pub append_attempts: u32,
    /// Initial backoff after a failed append or dropped subscription.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            eval_interval: Duration::from_secs(120),
            append_attempts: 3,
            backoff_base: Duration::from_millis(250),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

/// Handle to a running session. `stop` waits for the tasks to finish;
/// dropping the handle also ends them, without waiting.
pub struct WatchSession {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WatchSession {
    /// Stop all subscription and evaluation tasks. In-flight appends
    /// complete; no new evaluation is scheduled afterward.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Start watching the given filters for the engine's user.
///
/// All filters run concurrently and independently; a failing
/// subscription is retried with backoff and never blocks the others.
pub fn start_watch(
    engine: NotifyEngine,
    feed: Arc<dyn ObligationFeed>,
    sink: Box<dyn NotificationSink>,
    filters: Vec<ObligationFilter>,
    options: WatchOptions,
) -> WatchSession {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (batch_tx, batch_rx) = mpsc::channel::<(usize, ObligationBatch)>(32);
    let mut tasks = Vec::new();

    let relations: Vec<Relation> = filters.iter().map(|f| f.relation).collect();

    for (index, filter) in filters.into_iter().enumerate() {
        tasks.push(tokio::spawn(forward_subscription(
            index,
            filter,
            Arc::clone(&feed),
            batch_tx.clone(),
            shutdown_rx.clone(),
            options.clone(),
        )));
    }
    drop(batch_tx);

    tasks.push(tokio::spawn(evaluation_loop(
        engine,
        sink,
        relations,
        batch_rx,
        shutdown_rx,
        options,
    )));

    WatchSession {
        shutdown: shutdown_tx,
        tasks,
    }
}

/// Subscribe, forward batches, and resubscribe with doubling backoff
/// when the subscription drops.
async fn forward_subscription(
    index: usize,
    filter: ObligationFilter,
    feed: Arc<dyn ObligationFeed>,
    batch_tx: mpsc::Sender<(usize, ObligationBatch)>,
    mut shutdown: watch::Receiver<bool>,
    options: WatchOptions,
) {
    let mut backoff = options.backoff_base;

    loop {
        let mut rx = feed.subscribe(filter.clone());

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                delivered = rx.recv() => match delivered {
                    Some(batch) => {
                        backoff = options.backoff_base;
                        if batch_tx.send((index, batch)).await.is_err() {
                            return; // Evaluation loop is gone
                        }
                    }
                    None => break,
                },
            }
        }

        log::warn!(
            "Subscription dropped for {:?} {:?}; retrying in {:?}",
            filter.kind,
            filter.relation,
            backoff
        );
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(options.backoff_cap);
    }
}

async fn evaluation_loop(
    mut engine: NotifyEngine,
    mut sink: Box<dyn NotificationSink>,
    relations: Vec<Relation>,
    mut batch_rx: mpsc::Receiver<(usize, ObligationBatch)>,
    mut shutdown: watch::Receiver<bool>,
    options: WatchOptions,
) {
    // Latest full snapshot per filter; merged fresh on every cycle.
    let mut latest: Vec<Vec<serde_json::Value>> = vec![Vec::new(); relations.len()];
    let mut interval = tokio::time::interval(options.eval_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // The first tick completes immediately

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            delivered = batch_rx.recv() => match delivered {
                Some((index, batch)) => {
                    latest[index] = batch.records;
                    run_cycle(&mut engine, sink.as_mut(), &relations, &latest, &options).await;
                }
                None => return, // All subscriptions gone
            },
            _ = interval.tick() => {
                run_cycle(&mut engine, sink.as_mut(), &relations, &latest, &options).await;
            }
        }
    }
}

async fn run_cycle(
    engine: &mut NotifyEngine,
    sink: &mut dyn NotificationSink,
    relations: &[Relation],
    latest: &[Vec<serde_json::Value>],
    options: &WatchOptions,
) {
    let per_filter: Vec<(Relation, Vec<serde_json::Value>)> = relations
        .iter()
        .zip(latest.iter())
        .map(|(relation, records)| (*relation, records.clone()))
        .collect();
    let observed = merge_batches(&per_filter);

    let now = now_ms();
    for planned in engine.plan_cycle(&observed, now) {
        match append_with_retry(sink, &planned.draft, options).await {
            Ok(_) => {
                // Mark only after the append is durable; a crash in
                // between costs at most one duplicate next cycle.
                if let Err(e) = engine.confirm_fired(&planned.key, now) {
                    log::warn!("Failed to persist fired key {}: {}", planned.key, e);
                }
            }
            Err(e) => {
                log::warn!(
                    "Dropping notification for {} this cycle: {}",
                    planned.draft.recipient_id,
                    e
                );
            }
        }
    }
}

/// Bounded retries with doubling backoff around a sink append.
async fn append_with_retry(
    sink: &mut dyn NotificationSink,
    draft: &NotificationDraft,
    options: &WatchOptions,
) -> Result<Notification, SinkError> {
    let mut backoff = options.backoff_base;
    let mut attempt = 0;

    loop {
        match sink.append(draft) {
            Ok(record) => return Ok(record),
            Err(e) => {
                attempt += 1;
                if attempt >= options.append_attempts.max(1) {
                    return Err(e);
                }
                log::warn!(
                    "Inbox append for {} failed (attempt {}): {}; retrying",
                    draft.recipient_id,
                    attempt,
                    e
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(options.backoff_cap);
            }
        }
    }
}
