//! Append-only notification inboxes.
//!
//! The sink never deduplicates; that is the fired-key store's job,
//! enforced by the watcher before an append is attempted.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use thiserror::Error;

use super::model::{now_ms, Notification, NotificationDraft, UserId};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("inbox io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("inbox serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("inbox closed")]
    Closed,
}

/// Appends notification records to recipients' inboxes.
pub trait NotificationSink: Send {
    /// Append a record with `unread = true` and a sink-assigned id and
    /// creation timestamp. Returns the stored record.
    fn append(&mut self, draft: &NotificationDraft) -> Result<Notification, SinkError>;

    /// Unread-record count for a recipient.
    fn unread_count(&mut self, recipient_id: &UserId) -> Result<usize, SinkError>;
}

fn materialize(draft: &NotificationDraft, id: u64) -> Notification {
    Notification {
        id,
        recipient_id: draft.recipient_id.clone(),
        created_at: now_ms(),
        unread: true,
        origin: draft.origin,
        title: draft.title.clone(),
        message: draft.message.clone(),
        source_id: draft.source_id.clone(),
        event_key: draft.event_key.clone(),
    }
}

/// In-memory inbox, used in tests and embedded deployments.
#[derive(Default)]
pub struct MemoryInbox {
    inboxes: HashMap<UserId, Vec<Notification>>,
    next_id: u64,
    /// When set, every append fails. Lets tests exercise the retry path.
    #[cfg(test)]
    pub fail_appends: bool,
}

impl MemoryInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications appended for a recipient, in append order.
    pub fn notifications(&self, recipient_id: &str) -> &[Notification] {
        self.inboxes
            .get(recipient_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn total_appended(&self) -> usize {
        self.inboxes.values().map(Vec::len).sum()
    }
}

impl NotificationSink for MemoryInbox {
    fn append(&mut self, draft: &NotificationDraft) -> Result<Notification, SinkError> {
        #[cfg(test)]
        if self.fail_appends {
            return Err(SinkError::Closed);
        }

        self.next_id += 1;
        let record = materialize(draft, self.next_id);
        self.inboxes
            .entry(draft.recipient_id.clone())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    fn unread_count(&mut self, recipient_id: &UserId) -> Result<usize, SinkError> {
        Ok(self
            .notifications(recipient_id)
            .iter()
            .filter(|n| n.unread)
            .count())
    }
}

/// File-backed inbox: one JSON array per recipient under the data
/// directory.
pub struct FileInbox {
    data_dir: PathBuf,
    next_id: u64,
}

impl FileInbox {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            next_id: 0,
        }
    }

    fn inbox_path(&self, recipient_id: &str) -> PathBuf {
        self.data_dir.join(format!("inbox_{}.json", recipient_id))
    }

    fn read_inbox(&self, recipient_id: &str) -> Result<Vec<Notification>, SinkError> {
        let path = self.inbox_path(recipient_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl NotificationSink for FileInbox {
    fn append(&mut self, draft: &NotificationDraft) -> Result<Notification, SinkError> {
        let mut records = self.read_inbox(&draft.recipient_id)?;

        // Ids continue past anything already on disk.
        let max_existing = records.iter().map(|n| n.id).max().unwrap_or(0);
        self.next_id = self.next_id.max(max_existing) + 1;

        let record = materialize(draft, self.next_id);
        records.push(record.clone());

        fs::create_dir_all(&self.data_dir)?;
        let content = serde_json::to_string_pretty(&records)?;
        fs::write(self.inbox_path(&draft.recipient_id), content)?;
        Ok(record)
    }

    fn unread_count(&mut self, recipient_id: &UserId) -> Result<usize, SinkError> {
        Ok(self
            .read_inbox(recipient_id)?
            .iter()
            .filter(|n| n.unread)
            .count())
    }
}
