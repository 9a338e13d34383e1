#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]

pub mod core;

pub use crate::core::engine::NotifyEngine;
pub use crate::core::feed::{MemoryFeed, ObligationFeed, ObligationFilter};
pub use crate::core::inbox::{FileInbox, MemoryInbox, NotificationSink};
pub use crate::core::model::{Notification, Obligation, ObligationKind, ObligationStatus, Relation};
pub use crate::core::settings::{NotifySettings, SettingsStore};
pub use crate::core::watcher::{start_watch, WatchOptions, WatchSession};
